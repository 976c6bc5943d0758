//! The encrypted node store: schema, key management, and the generic
//! node CRUD surface. Typed helpers (contacts, requests, messages,
//! resources, directories, config) live in [`crate::typed`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use zeroize::Zeroize;

use shroud_crypto::rsa::{PrivateKey, PublicKey};
use shroud_value::{Object, Value};

use crate::error::Error;
use crate::node::{Node, NodeType, CONFIG_NODE_ID, DATA_NODE_ID, ROOT_NODE_ID, VFS_NODE_ID};
use crate::query::{build_fields, build_order, build_where, Order, Query};

pub const STORAGE_VERSION: i32 = 1;

const SCHEMA: &str = "CREATE TABLE nodes (
    id     INTEGER PRIMARY KEY,
    time   INTEGER NOT NULL,
    type   INTEGER NOT NULL,
    parent INTEGER NOT NULL,
    name   TEXT,
    user1  INTEGER NOT NULL DEFAULT 0,
    user2  INTEGER NOT NULL DEFAULT 0,
    user3  BLOB,
    user4  BLOB,
    head   BLOB,
    body   BLOB
)";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DirKind {
    Incoming,
    Outgoing,
}

struct OpenBlob {
    node_id: u32,
    stream: shroud_crypto::CtrStream,
}

/// An open, self-contained encrypted store. One account per file.
pub struct Store {
    conn: Mutex<Connection>,
    key: [u8; 32],
    account_id: u32,
    account_label: String,
    public_key: PublicKey,
    private_key: PrivateKey,
    open_blobs: Mutex<HashMap<u32, OpenBlob>>,
    dir_cache: Mutex<HashMap<(DirKind, u32), u32>>,
}

impl Drop for Store {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl Store {
    /// Creates a fresh store file. Fails if `file` already exists.
    ///
    /// `account_id` is the account id assigned by the server on account
    /// creation, not locally minted — storage and the server must agree
    /// on it for every later request that carries `accountId`.
    pub fn init(
        file: impl AsRef<Path>,
        password: &str,
        account_id: u32,
        account_label: &str,
        account_info: &Value,
    ) -> Result<Self, Error> {
        let file = file.as_ref();
        if file.exists() {
            return Err(Error::FileExists);
        }
        let conn = Connection::open(file)?;
        conn.execute_batch(SCHEMA)?;

        let key = {
            let bytes = shroud_crypto::random::bytes(32, shroud_crypto::random::Strength::VeryStrong)?;
            let mut arr = [0u8; 32];
            arr.copy_from_slice(&bytes);
            arr
        };

        let mut password_hash = shroud_crypto::sha256(password.as_bytes());
        let mut key_enc = key;
        shroud_crypto::ctr_zero(&password_hash, &mut key_enc);
        let mut pwd_check = password_hash;
        shroud_crypto::ctr_zero(&password_hash, &mut pwd_check);

        let (public_key, private_key) = shroud_crypto::rsa::generate(2048)?;

        let mut root_head = Object::new();
        root_head.insert("key", Value::Raw(key_enc.to_vec()));
        root_head.insert("pwd", Value::Raw(pwd_check.to_vec()));
        let root = Node {
            id: ROOT_NODE_ID,
            time: now(),
            node_type: NodeType::Unknown,
            parent: 0,
            name: String::new(),
            user1: STORAGE_VERSION as u32,
            user2: 0,
            user3: String::new(),
            user4: String::new(),
            head: Value::Object(root_head).encode()?,
            body: Vec::new(),
        };
        insert_node_unencrypted(&conn, &root)?;

        let (pub_e, pub_n, pub_size) = public_key.to_hex_parts();
        let (a, b, c, d, p, q, priv_size) = private_key.to_hex_parts();
        let mut pub_obj = Object::new();
        pub_obj.insert("e", Value::from(pub_e));
        pub_obj.insert("n", Value::from(pub_n));
        pub_obj.insert("size", Value::from(pub_size as i32));
        let mut priv_obj = Object::new();
        priv_obj.insert("a", Value::from(a));
        priv_obj.insert("b", Value::from(b));
        priv_obj.insert("c", Value::from(c));
        priv_obj.insert("d", Value::from(d));
        priv_obj.insert("p", Value::from(p));
        priv_obj.insert("q", Value::from(q));
        priv_obj.insert("size", Value::from(priv_size as i32));

        let mut data_body = Object::new();
        data_body.insert("accountId", Value::from(account_id as i32));
        data_body.insert("accountLabel", Value::from(account_label));
        data_body.insert("publicKey", Value::Object(pub_obj));
        data_body.insert("privateKey", Value::Object(priv_obj));
        data_body.insert("accountInfo", account_info.clone());

        let data_node = Node {
            id: DATA_NODE_ID,
            time: now(),
            node_type: NodeType::Unknown,
            parent: ROOT_NODE_ID,
            name: String::new(),
            user1: 0,
            user2: 0,
            user3: String::new(),
            user4: String::new(),
            head: Vec::new(),
            body: Value::Object(data_body).encode()?,
        };
        insert_node_unencrypted(&conn, &data_node)?;

        let mut vfs = Node::new(NodeType::Directory, ROOT_NODE_ID, "vfs");
        vfs.id = VFS_NODE_ID;
        vfs.time = now();
        insert_node_unencrypted(&conn, &vfs)?;

        let mut config = Node::new(NodeType::Unknown, ROOT_NODE_ID, "config");
        config.id = CONFIG_NODE_ID;
        config.time = now();
        insert_node_unencrypted(&conn, &config)?;

        password_hash.zeroize();

        Ok(Store {
            conn: Mutex::new(conn),
            key,
            account_id,
            account_label: account_label.to_string(),
            public_key,
            private_key,
            open_blobs: Mutex::new(HashMap::new()),
            dir_cache: Mutex::new(HashMap::new()),
        })
    }

    /// Opens an existing store file, verifying `password`.
    pub fn open(file: impl AsRef<Path>, password: &str) -> Result<Self, Error> {
        let file = file.as_ref();
        if !file.exists() {
            return Err(Error::FileNotFound);
        }
        let conn = Connection::open(file)?;

        let root = get_node_raw(&conn, ROOT_NODE_ID)?.ok_or(Error::NotFound)?;
        let root_head = Value::decode(&root.head)?;
        let root_obj = root_head.as_object().ok_or(Error::NotFound)?;
        let key_enc = root_obj.get("key").and_then(Value::as_raw).ok_or(Error::NotFound)?;
        let pwd_check = root_obj.get("pwd").and_then(Value::as_raw).ok_or(Error::NotFound)?;

        let mut password_hash = shroud_crypto::sha256(password.as_bytes());
        let mut check = pwd_check.to_vec();
        shroud_crypto::ctr_zero(&password_hash, &mut check);
        if check != password_hash {
            password_hash.zeroize();
            tracing::warn!(file = %file.display(), "storage open rejected: wrong password");
            return Err(Error::WrongPassword);
        }

        let mut key = key_enc.to_vec();
        shroud_crypto::ctr_zero(&password_hash, &mut key);
        password_hash.zeroize();
        let mut key_arr = [0u8; 32];
        key_arr.copy_from_slice(&key);
        key.zeroize();

        // id=2 (like the rest of the 1..4 bootstrap range) is stored
        // unencrypted, so its body decodes directly.
        let data = get_node_raw(&conn, DATA_NODE_ID)?.ok_or(Error::NotFound)?;
        let data_value = Value::decode(&data.body)?;
        let data_obj = data_value.as_object().ok_or(Error::NotFound)?;

        let account_id = data_obj.get("accountId").and_then(Value::as_i32).unwrap_or(0) as u32;
        let account_label = data_obj
            .get("accountLabel")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let pub_obj = data_obj.get("publicKey").and_then(Value::as_object).ok_or(Error::NotFound)?;
        let priv_obj = data_obj.get("privateKey").and_then(Value::as_object).ok_or(Error::NotFound)?;
        let public_key = PublicKey::from_hex_parts(
            pub_obj.get("e").and_then(Value::as_str).unwrap_or_default(),
            pub_obj.get("n").and_then(Value::as_str).unwrap_or_default(),
            pub_obj.get("size").and_then(Value::as_i32).unwrap_or(0) as usize,
        )?;
        let private_key = PrivateKey {
            a: parse_hex(priv_obj, "a")?,
            b: parse_hex(priv_obj, "b")?,
            c: parse_hex(priv_obj, "c")?,
            d: parse_hex(priv_obj, "d")?,
            p: parse_hex(priv_obj, "p")?,
            q: parse_hex(priv_obj, "q")?,
            size: priv_obj.get("size").and_then(Value::as_i32).unwrap_or(0) as usize,
        };

        Ok(Store {
            conn: Mutex::new(conn),
            key: key_arr,
            account_id,
            account_label,
            public_key,
            private_key,
            open_blobs: Mutex::new(HashMap::new()),
            dir_cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn account_id(&self) -> u32 {
        self.account_id
    }

    pub fn account_label(&self) -> &str {
        &self.account_label
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    pub(crate) fn key(&self) -> &[u8; 32] {
        &self.key
    }

    pub(crate) fn dir_cache(&self) -> &Mutex<HashMap<(DirKind, u32), u32>> {
        &self.dir_cache
    }

    /// Inserts `node`, assigning a fresh random id if zero.
    pub fn add_node(&self, node: &mut Node, encrypt: bool) -> Result<(), Error> {
        if node.id == 0 {
            node.id = shroud_crypto::mk_id()?;
        }
        if node.time == 0 {
            node.time = now();
        }
        let conn = self.conn.lock().unwrap();
        if encrypt {
            insert_node_encrypted(&conn, node, &self.key)
        } else {
            insert_node_unencrypted(&conn, node)
        }
    }

    pub fn get_node(
        &self,
        query: &Query,
        order: &Order,
        fields: &[&str],
        offset: i64,
        decrypt: bool,
    ) -> Result<Option<Node>, Error> {
        Ok(self.get_nodes(query, order, fields, 1, offset, decrypt, true)?.into_iter().next())
    }

    /// `encrypt_query` controls whether query literals bound to
    /// encryptable columns are encrypted before comparison; pass `false`
    /// when querying a reserved id (1..4), whose row is stored in the
    /// clear.
    pub fn get_nodes(
        &self,
        query: &Query,
        order: &Order,
        fields: &[&str],
        limit: i64,
        offset: i64,
        decrypt: bool,
        encrypt_query: bool,
    ) -> Result<Vec<Node>, Error> {
        let (where_clause, params) = build_where(query, &self.key, encrypt_query);
        let order_clause = build_order(order);
        let field_clause = build_fields(fields);
        let limit_clause = if limit > 0 { format!(" LIMIT {limit}") } else { String::new() };
        let sql = format!(
            "SELECT {field_clause} FROM nodes WHERE {where_clause}{order_clause}{limit_clause} OFFSET {offset}"
        );

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let col_names: Vec<String> = if fields.is_empty() {
            ALL_COLUMNS.iter().map(|s| s.to_string()).collect()
        } else {
            fields.iter().map(|s| s.to_string()).collect()
        };
        let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
            row_to_partial(row, &col_names)
        })?;

        let mut out = Vec::new();
        for row in rows {
            let mut node = row?;
            if decrypt {
                decrypt_node(&mut node, &self.key);
            }
            out.push(node);
        }
        Ok(out)
    }

    pub fn update_node(&self, id: u32, update: &Object, encrypt: bool) -> Result<bool, Error> {
        if update.is_empty() {
            return Ok(false);
        }
        let conn = self.conn.lock().unwrap();
        let mut sets = Vec::new();
        let mut params: Vec<rusqlite::types::Value> = Vec::new();
        for (col, value) in update.iter() {
            sets.push(format!("{col} = ?"));
            params.push(value_to_sql(col, value, encrypt, &self.key));
        }
        params.push(rusqlite::types::Value::Integer(id as i64));
        let sql = format!("UPDATE nodes SET {} WHERE id = ?", sets.join(", "));
        let n = conn.execute(&sql, rusqlite::params_from_iter(params))?;
        Ok(n > 0)
    }

    pub fn delete_node(&self, query: &Query, delete_children: bool, encrypt_query: bool) -> Result<bool, Error> {
        let conn = self.conn.lock().unwrap();
        let (where_clause, params) = build_where(query, &self.key, encrypt_query);
        if delete_children {
            let ids_sql = format!("SELECT id FROM nodes WHERE {where_clause}");
            let mut stmt = conn.prepare(&ids_sql)?;
            let ids: Vec<i64> = stmt
                .query_map(rusqlite::params_from_iter(params.clone()), |row| row.get(0))?
                .collect::<Result<_, _>>()?;
            for id in ids {
                conn.execute("DELETE FROM nodes WHERE parent = ?1", params![id])?;
            }
        }
        let sql = format!("DELETE FROM nodes WHERE {where_clause}");
        let n = conn.execute(&sql, rusqlite::params_from_iter(params))?;
        Ok(n > 0)
    }

    pub fn count(&self, query: &Query, encrypt_query: bool) -> Result<u32, Error> {
        let conn = self.conn.lock().unwrap();
        let (where_clause, params) = build_where(query, &self.key, encrypt_query);
        let sql = format!("SELECT COUNT(*) FROM nodes WHERE {where_clause}");
        let n: i64 = conn.query_row(&sql, rusqlite::params_from_iter(params), |row| row.get(0))?;
        Ok(n as u32)
    }

    /// Runs `f` wrapped in a single SQLite transaction, resolving the
    /// multi-statement atomicity the reference left open.
    pub fn transaction<T>(&self, f: impl FnOnce(&Store) -> Result<T, Error>) -> Result<T, Error> {
        {
            let conn = self.conn.lock().unwrap();
            conn.execute_batch("BEGIN IMMEDIATE")?;
        }
        match f(self) {
            Ok(v) => {
                self.conn.lock().unwrap().execute_batch("COMMIT")?;
                Ok(v)
            }
            Err(e) => {
                tracing::error!(error = %e, "storage transaction rolled back");
                let _ = self.conn.lock().unwrap().execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    // ─── BLOB streaming ──────────────────────────────────────────────

    pub fn open_body_blob(&self, id: u32) -> Result<(), Error> {
        let stream = shroud_crypto::CtrStream::new(self.key, [0u8; 16]);
        self.open_blobs.lock().unwrap().insert(id, OpenBlob { node_id: id, stream });
        Ok(())
    }

    pub fn close_body_blob(&self, id: u32) -> Result<(), Error> {
        self.open_blobs.lock().unwrap().remove(&id);
        Ok(())
    }

    pub fn read_body_blob(&self, id: u32, buf: &mut [u8], offset: u32) -> Result<(), Error> {
        let conn = self.conn.lock().unwrap();
        let body: Vec<u8> =
            conn.query_row("SELECT body FROM nodes WHERE id = ?1", params![id], |row| row.get(0))?;
        drop(conn);
        let n = buf.len();
        let end = offset as usize + n;
        if end > body.len() {
            return Err(Error::NotFound);
        }
        buf.copy_from_slice(&body[offset as usize..end]);
        let mut blobs = self.open_blobs.lock().unwrap();
        let open = blobs.get_mut(&id).ok_or(Error::NoOpenBlob(id))?;
        open.stream.apply(buf);
        Ok(())
    }

    /// Writes `data` into the blob's body at `offset`, encrypting with
    /// the handle's running CTR stream. Callers must write sequentially
    /// from offset 0 within one open/close cycle.
    pub fn write_body_blob(&self, id: u32, data: &[u8], offset: u32) -> Result<(), Error> {
        let mut ciphertext = data.to_vec();
        {
            let mut blobs = self.open_blobs.lock().unwrap();
            let open = blobs.get_mut(&id).ok_or(Error::NoOpenBlob(id))?;
            open.stream.apply(&mut ciphertext);
        }
        let conn = self.conn.lock().unwrap();
        let mut body: Vec<u8> =
            conn.query_row("SELECT body FROM nodes WHERE id = ?1", params![id], |row| row.get(0))
                .optional()?
                .unwrap_or_default();
        let end = offset as usize + ciphertext.len();
        if body.len() < end {
            body.resize(end, 0);
        }
        body[offset as usize..end].copy_from_slice(&ciphertext);
        conn.execute("UPDATE nodes SET body = ?1 WHERE id = ?2", params![body, id])?;
        Ok(())
    }

    pub fn zero_body_blob(&self, id: u32) -> Result<(), Error> {
        let conn = self.conn.lock().unwrap();
        let len: i64 = conn
            .query_row("SELECT LENGTH(body) FROM nodes WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?
            .unwrap_or(0);
        let zeros = vec![0u8; len.max(0) as usize];
        conn.execute("UPDATE nodes SET body = ?1 WHERE id = ?2", params![zeros, id])?;
        Ok(())
    }
}

fn parse_hex(obj: &Object, key: &str) -> Result<num_bigint::BigUint, Error> {
    let s = obj.get(key).and_then(Value::as_str).ok_or(Error::NotFound)?;
    num_bigint::BigUint::parse_bytes(s.as_bytes(), 16).ok_or(Error::NotFound)
}

const ALL_COLUMNS: &[&str] =
    &["id", "time", "type", "parent", "name", "user1", "user2", "user3", "user4", "head", "body"];

fn insert_node_unencrypted(conn: &Connection, node: &Node) -> Result<(), Error> {
    conn.execute(
        "INSERT INTO nodes (id, time, type, parent, name, user1, user2, user3, user4, head, body)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            node.id,
            node.time,
            node.node_type.as_i32(),
            node.parent,
            node.name,
            node.user1,
            node.user2,
            node.user3.as_bytes(),
            node.user4.as_bytes(),
            node.head,
            node.body,
        ],
    )?;
    Ok(())
}

fn insert_node_encrypted(conn: &Connection, node: &Node, key: &[u8; 32]) -> Result<(), Error> {
    let mut name = node.name.clone().into_bytes();
    shroud_crypto::ctr_zero(key, &mut name);
    let mut user3 = node.user3.clone().into_bytes();
    shroud_crypto::ctr_zero(key, &mut user3);
    let mut user4 = node.user4.clone().into_bytes();
    shroud_crypto::ctr_zero(key, &mut user4);
    let mut head = node.head.clone();
    shroud_crypto::ctr_zero(key, &mut head);
    let mut body = node.body.clone();
    shroud_crypto::ctr_zero(key, &mut body);

    conn.execute(
        "INSERT INTO nodes (id, time, type, parent, name, user1, user2, user3, user4, head, body)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            node.id,
            node.time,
            node.node_type.as_i32(),
            node.parent,
            name,
            node.user1,
            node.user2,
            user3,
            user4,
            head,
            body,
        ],
    )?;
    Ok(())
}

fn get_node_raw(conn: &Connection, id: u32) -> Result<Option<Node>, Error> {
    conn.query_row(
        "SELECT id, time, type, parent, name, user1, user2, user3, user4, head, body FROM nodes WHERE id = ?1",
        params![id],
        |row| row_to_partial(row, &ALL_COLUMNS.iter().map(|s| s.to_string()).collect::<Vec<_>>()),
    )
    .optional()
    .map_err(Error::from)
}

fn row_to_partial(row: &rusqlite::Row<'_>, columns: &[String]) -> rusqlite::Result<Node> {
    let mut node = Node::new(NodeType::Unknown, 0, "");
    for (idx, col) in columns.iter().enumerate() {
        match col.as_str() {
            "id" => node.id = row.get::<_, i64>(idx)? as u32,
            "time" => node.time = row.get(idx)?,
            "type" => node.node_type = NodeType::from_i32(row.get(idx)?),
            "parent" => node.parent = row.get::<_, i64>(idx)? as u32,
            "name" => node.name = bytes_to_string(row.get::<_, Option<Vec<u8>>>(idx)?),
            "user1" => node.user1 = row.get::<_, i64>(idx)? as u32,
            "user2" => node.user2 = row.get::<_, i64>(idx)? as u32,
            "user3" => node.user3 = bytes_to_string(row.get::<_, Option<Vec<u8>>>(idx)?),
            "user4" => node.user4 = bytes_to_string(row.get::<_, Option<Vec<u8>>>(idx)?),
            "head" => node.head = row.get::<_, Option<Vec<u8>>>(idx)?.unwrap_or_default(),
            "body" => node.body = row.get::<_, Option<Vec<u8>>>(idx)?.unwrap_or_default(),
            _ => {}
        }
    }
    Ok(node)
}

fn bytes_to_string(bytes: Option<Vec<u8>>) -> String {
    bytes.map(|b| String::from_utf8_lossy(&b).into_owned()).unwrap_or_default()
}

fn is_reserved(id: u32) -> bool {
    (ROOT_NODE_ID..=CONFIG_NODE_ID).contains(&id)
}

fn decrypt_node(node: &mut Node, key: &[u8; 32]) {
    if is_reserved(node.id) {
        return;
    }
    let mut name = node.name.clone().into_bytes();
    shroud_crypto::ctr_zero(key, &mut name);
    node.name = String::from_utf8_lossy(&name).into_owned();
    let mut user3 = node.user3.clone().into_bytes();
    shroud_crypto::ctr_zero(key, &mut user3);
    node.user3 = String::from_utf8_lossy(&user3).into_owned();
    let mut user4 = node.user4.clone().into_bytes();
    shroud_crypto::ctr_zero(key, &mut user4);
    node.user4 = String::from_utf8_lossy(&user4).into_owned();
    shroud_crypto::ctr_zero(key, &mut node.head);
    shroud_crypto::ctr_zero(key, &mut node.body);
}

fn value_to_sql(column: &str, value: &Value, encrypt: bool, key: &[u8; 32]) -> rusqlite::types::Value {
    use rusqlite::types::Value as SqlValue;
    let should_encrypt = encrypt && crate::query::column_is_encryptable(column);
    match value {
        Value::Int32(n) => SqlValue::Integer(*n as i64),
        Value::Bool(b) => SqlValue::Integer(if *b { 1 } else { 0 }),
        Value::String(s) => {
            let mut bytes = s.clone().into_bytes();
            if should_encrypt {
                shroud_crypto::ctr_zero(key, &mut bytes);
            }
            SqlValue::Blob(bytes)
        }
        Value::Raw(b) => {
            let mut bytes = b.clone();
            if should_encrypt {
                shroud_crypto::ctr_zero(key, &mut bytes);
            }
            SqlValue::Blob(bytes)
        }
        Value::Null => SqlValue::Null,
        _ => SqlValue::Null,
    }
}
