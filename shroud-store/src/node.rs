//! The `nodes` table row shape: fixed metadata columns plus two opaque
//! binary columns (`head`, `body`).

/// Reserved node ids, always present and never re-encrypted under a
/// different key.
pub const ROOT_NODE_ID: u32 = 1;
pub const DATA_NODE_ID: u32 = 2;
pub const VFS_NODE_ID: u32 = 3;
pub const CONFIG_NODE_ID: u32 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeType {
    Unknown,
    Request,
    Contact,
    History,
    Message,
    Resource,
    Directory,
    Custom,
}

impl NodeType {
    pub fn as_i32(self) -> i32 {
        match self {
            NodeType::Unknown => 0,
            NodeType::Request => 1,
            NodeType::Contact => 2,
            NodeType::History => 3,
            NodeType::Message => 4,
            NodeType::Resource => 5,
            NodeType::Directory => 6,
            NodeType::Custom => 7,
        }
    }

    pub fn from_i32(v: i32) -> Self {
        match v {
            1 => NodeType::Request,
            2 => NodeType::Contact,
            3 => NodeType::History,
            4 => NodeType::Message,
            5 => NodeType::Resource,
            6 => NodeType::Directory,
            7 => NodeType::Custom,
            _ => NodeType::Unknown,
        }
    }
}

/// A single row of the `nodes` table.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub id: u32,
    pub time: i64,
    pub node_type: NodeType,
    pub parent: u32,
    pub name: String,
    pub user1: u32,
    pub user2: u32,
    pub user3: String,
    pub user4: String,
    pub head: Vec<u8>,
    pub body: Vec<u8>,
}

impl Node {
    pub fn new(node_type: NodeType, parent: u32, name: impl Into<String>) -> Self {
        Node {
            id: 0,
            time: 0,
            node_type,
            parent,
            name: name.into(),
            user1: 0,
            user2: 0,
            user3: String::new(),
            user4: String::new(),
            head: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn head_value(&self) -> Result<shroud_value::Value, shroud_value::Error> {
        shroud_value::Value::decode(&self.head)
    }

    pub fn body_value(&self) -> Result<shroud_value::Value, shroud_value::Error> {
        shroud_value::Value::decode(&self.body)
    }

    pub fn set_head_value(&mut self, v: &shroud_value::Value) -> Result<(), shroud_value::Error> {
        self.head = v.encode()?;
        Ok(())
    }

    pub fn set_body_value(&mut self, v: &shroud_value::Value) -> Result<(), shroud_value::Error> {
        self.body = v.encode()?;
        Ok(())
    }
}
