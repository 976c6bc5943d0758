//! Encrypted, self-contained node store.
//!
//! A [`Store`] is a single SQLite file holding one account's entire state
//! as rows in a generic `nodes` table: contacts, pending requests,
//! directories, message history, and resource blobs. Most columns are
//! AES-CTR encrypted under a per-store key derived from the user's
//! password; the bootstrap rows (ids 1..4) are always stored unencrypted
//! so the store can locate and unlock its own key.

mod error;
mod node;
mod query;
mod store;
mod typed;

pub use error::Error;
pub use node::{Node, NodeType, CONFIG_NODE_ID, DATA_NODE_ID, ROOT_NODE_ID, VFS_NODE_ID};
pub use query::{Direction, Literal, Order, Query, QueryValue};
pub use store::{DirKind, Store, STORAGE_VERSION};
pub use typed::{Contact, MessageStatus, ResourceType, StoredMessage, StoredResource};
