//! Query construction: a map of column → literal (an array literal
//! expands to an OR group), ANDed across columns; plus order and field
//! projections.

use rusqlite::types::Value as SqlValue;

/// A single query literal: a scalar or an OR group of scalars.
#[derive(Clone, Debug)]
pub enum Literal {
    Int(i64),
    Text(String),
    Blob(Vec<u8>),
}

#[derive(Clone, Debug)]
pub enum QueryValue {
    One(Literal),
    Any(Vec<Literal>),
}

impl From<u32> for QueryValue {
    fn from(v: u32) -> Self {
        QueryValue::One(Literal::Int(v as i64))
    }
}

impl From<&str> for QueryValue {
    fn from(v: &str) -> Self {
        QueryValue::One(Literal::Text(v.to_string()))
    }
}

impl From<String> for QueryValue {
    fn from(v: String) -> Self {
        QueryValue::One(Literal::Text(v))
    }
}

#[derive(Clone, Debug, Default)]
pub struct Query {
    pub(crate) columns: Vec<(String, QueryValue)>,
}

impl Query {
    pub fn new() -> Self {
        Query { columns: Vec::new() }
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        self.columns.push((column.into(), value.into()));
        self
    }

    pub fn any(mut self, column: impl Into<String>, values: Vec<Literal>) -> Self {
        self.columns.push((column.into(), QueryValue::Any(values)));
        self
    }
}

/// Columns whose TEXT/BLOB content is subject to the per-field CTR
/// encryption discipline. Integer columns (`id`, `type`, `parent`,
/// `user1`, `user2`, `time`) are always stored and queried in the
/// clear — their equality is exact, not ciphertext-based.
pub fn column_is_encryptable(column: &str) -> bool {
    matches!(column, "name" | "user3" | "user4" | "head" | "body")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Clone, Debug, Default)]
pub struct Order {
    pub(crate) columns: Vec<(String, Direction)>,
}

impl Order {
    pub fn new() -> Self {
        Order { columns: Vec::new() }
    }

    pub fn asc(mut self, column: impl Into<String>) -> Self {
        self.columns.push((column.into(), Direction::Asc));
        self
    }

    pub fn desc(mut self, column: impl Into<String>) -> Self {
        self.columns.push((column.into(), Direction::Desc));
        self
    }
}

/// Builds a `WHERE ... ` clause (without the leading keyword) and the
/// parameter list, encrypting TEXT/BLOB literals under `key` when
/// `encrypt` is set and the column is encryptable.
pub fn build_where(
    query: &Query,
    key: &[u8; 32],
    encrypt: bool,
) -> (String, Vec<SqlValue>) {
    if query.columns.is_empty() {
        return ("1=1".to_string(), Vec::new());
    }
    let mut clauses = Vec::new();
    let mut params = Vec::new();
    for (col, value) in &query.columns {
        let should_encrypt = encrypt && column_is_encryptable(col);
        match value {
            QueryValue::One(lit) => {
                clauses.push(format!("{col} = ?"));
                params.push(literal_to_sql(lit, should_encrypt, key));
            }
            QueryValue::Any(lits) => {
                let placeholders: Vec<&str> = lits.iter().map(|_| "?").collect();
                clauses.push(format!("{col} IN ({})", placeholders.join(", ")));
                for lit in lits {
                    params.push(literal_to_sql(lit, should_encrypt, key));
                }
            }
        }
    }
    (clauses.join(" AND "), params)
}

pub fn build_order(order: &Order) -> String {
    if order.columns.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = order
        .columns
        .iter()
        .map(|(c, d)| format!("{c} {}", if *d == Direction::Asc { "ASC" } else { "DESC" }))
        .collect();
    format!(" ORDER BY {}", parts.join(", "))
}

pub fn build_fields(fields: &[&str]) -> String {
    if fields.is_empty() {
        "*".to_string()
    } else {
        fields.join(", ")
    }
}

fn literal_to_sql(lit: &Literal, encrypt: bool, key: &[u8; 32]) -> SqlValue {
    match lit {
        Literal::Int(n) => SqlValue::Integer(*n),
        Literal::Text(s) => {
            // Always bound as BLOB (not TEXT) so that encrypted and
            // plaintext values round-trip through the same column
            // storage class and a later fetch doesn't need to guess
            // which one it is.
            let mut bytes = s.clone().into_bytes();
            if encrypt {
                shroud_crypto::ctr_zero(key, &mut bytes);
            }
            SqlValue::Blob(bytes)
        }
        Literal::Blob(b) => {
            let mut bytes = b.clone();
            if encrypt {
                shroud_crypto::ctr_zero(key, &mut bytes);
            }
            SqlValue::Blob(bytes)
        }
    }
}
