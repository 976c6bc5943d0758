//! Typed helpers layered over the generic node CRUD: contacts, requests,
//! directories, history, messages, resources, and the config whitelist.
//! Grounded on `Storage::addContact`/`getContact`/`addRequest`/
//! `createDirectory`/`createHistory`/`storeMessage`/`storeResource`/
//! `incomingDir`/`outgoingDir`/`getConfig`/`setConfig` in the reference
//! implementation.

use shroud_value::{Object, Value};

use crate::error::Error;
use crate::node::{Node, NodeType, DATA_NODE_ID, VFS_NODE_ID};
use crate::query::{Order, Query};
use crate::store::{DirKind, Store};

/// Config keys accepted by [`Store::set_config`]. Unknown keys are
/// rejected rather than silently dropped.
const CONFIG_WHITELIST: &[&str] = &["findByLabel", "findByPhone", "notifyStatus"];

#[derive(Clone, Debug, PartialEq)]
pub struct Contact {
    pub contact_id: u32,
    pub label: String,
    pub phone: String,
    pub public_key: Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageStatus {
    Idle,
    Incoming,
    Outgoing,
    Sent,
    Recv,
    Failure,
}

impl MessageStatus {
    fn as_i32(self) -> i32 {
        match self {
            MessageStatus::Idle => 0,
            MessageStatus::Incoming => 1,
            MessageStatus::Outgoing => 2,
            MessageStatus::Sent => 3,
            MessageStatus::Recv => 4,
            MessageStatus::Failure => 5,
        }
    }

    fn from_i32(v: i32) -> Self {
        match v {
            1 => MessageStatus::Incoming,
            2 => MessageStatus::Outgoing,
            3 => MessageStatus::Sent,
            4 => MessageStatus::Recv,
            5 => MessageStatus::Failure,
            _ => MessageStatus::Idle,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StoredMessage {
    pub id: u32,
    pub time: i64,
    pub history_id: u32,
    pub src: u32,
    pub dst: u32,
    pub status: MessageStatus,
    pub user_data: Value,
    pub text: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceType {
    Unknown,
    Text,
    File,
    Image,
    Audio,
    Video,
}

impl ResourceType {
    pub fn as_i32(self) -> i32 {
        match self {
            ResourceType::Unknown => 0,
            ResourceType::Text => 1,
            ResourceType::File => 2,
            ResourceType::Image => 3,
            ResourceType::Audio => 4,
            ResourceType::Video => 5,
        }
    }

    pub fn from_i32(v: i32) -> Self {
        match v {
            1 => ResourceType::Text,
            2 => ResourceType::File,
            3 => ResourceType::Image,
            4 => ResourceType::Audio,
            5 => ResourceType::Video,
            _ => ResourceType::Unknown,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StoredResource {
    pub id: u32,
    pub res_type: ResourceType,
    pub name: String,
    pub data: Vec<u8>,
    pub md5_hex: String,
    pub user_data: Value,
}

impl Store {
    /// Upserts a contact by label: inserts a fresh `Contact` node, or
    /// (when a contact with that label already exists and `contact_id`/
    /// `public_key` are supplied) refreshes its account id and public key.
    pub fn add_contact(
        &self,
        contact_id: u32,
        label: &str,
        phone: &str,
        label2: &str,
        public_key: Option<&Value>,
    ) -> Result<(), Error> {
        let existing = self.get_node(
            &Query::new().eq("type", contact_type()).eq("name", label),
            &Order::new(),
            &[],
            0,
            true,
        )?;

        match existing {
            None => {
                let mut node = Node::new(NodeType::Contact, 0, label);
                node.user1 = contact_id;
                node.user3 = phone.to_string();
                node.user4 = label2.to_string();
                if let Some(pk) = public_key {
                    let mut body = Object::new();
                    body.insert("publicKey", pk.clone());
                    node.set_body_value(&Value::Object(body))?;
                }
                self.add_node(&mut node, true)?;
                Ok(())
            }
            Some(mut node) => {
                if contact_id != 0 && public_key.is_some() {
                    node.user1 = contact_id;
                    let mut body = node.body_value().ok().and_then(|v| v.as_object().cloned()).unwrap_or_default();
                    body.insert("publicKey", public_key.unwrap().clone());
                    node.set_body_value(&Value::Object(body))?;
                    let mut update = Object::new();
                    update.insert("user1", Value::from(node.user1 as i32));
                    update.insert("body", Value::Raw(node.body.clone()));
                    self.update_node(node.id, &update, true)?;
                }
                Ok(())
            }
        }
    }

    pub fn get_contact_by_label(&self, label: &str) -> Result<Option<Contact>, Error> {
        let node = self.get_node(
            &Query::new().eq("type", contact_type()).eq("name", label),
            &Order::new(),
            &[],
            0,
            true,
        )?;
        node.map(|n| node_to_contact(&n)).transpose()
    }

    pub fn get_contact_by_id(&self, contact_id: u32) -> Result<Option<Contact>, Error> {
        let node = self.get_node(
            &Query::new().eq("type", contact_type()).eq("user1", contact_id),
            &Order::new(),
            &[],
            0,
            true,
        )?;
        node.map(|n| node_to_contact(&n)).transpose()
    }

    pub fn get_contacts(&self) -> Result<Vec<Contact>, Error> {
        let nodes = self.get_nodes(
            &Query::new().eq("type", contact_type()),
            &Order::new(),
            &[],
            0,
            0,
            true,
            true,
        )?;
        nodes.iter().map(node_to_contact).collect()
    }

    pub fn delete_contact(&self, contact_id: u32) -> Result<bool, Error> {
        self.delete_node(
            &Query::new().eq("user1", contact_id).eq("type", contact_type()),
            false,
            true,
        )
    }

    /// Stores a request body keyed by `request_id`, under
    /// `NodeType::Request`.
    pub fn add_request(&self, request_id: u32, body: &Value) -> Result<(), Error> {
        let mut node = Node::new(NodeType::Request, 0, "");
        node.id = request_id;
        node.set_body_value(body)?;
        self.add_node(&mut node, true)?;
        Ok(())
    }

    pub fn delete_request(&self, request_id: u32) -> Result<bool, Error> {
        self.delete_node(
            &Query::new().eq("id", request_id).eq("type", request_type()),
            false,
            true,
        )
    }

    pub fn get_request(&self, request_id: u32) -> Result<Option<Value>, Error> {
        let node = self.get_node(
            &Query::new().eq("id", request_id).eq("type", request_type()),
            &Order::new(),
            &[],
            0,
            true,
        )?;
        node.map(|n| n.body_value().map_err(Error::from)).transpose()
    }

    pub fn get_requests(&self) -> Result<Vec<Value>, Error> {
        let nodes = self.get_nodes(
            &Query::new().eq("type", request_type()),
            &Order::new(),
            &[],
            0,
            0,
            true,
            true,
        )?;
        nodes.iter().map(|n| n.body_value().map_err(Error::from)).collect()
    }

    /// Creates a directory node under `parent`, or under the vfs root
    /// node when `parent` is zero.
    pub fn create_directory(&self, name: &str, parent: u32) -> Result<Node, Error> {
        let mut node = Node::new(NodeType::Directory, if parent != 0 { parent } else { VFS_NODE_ID }, name);
        self.add_node(&mut node, true)?;
        Ok(node)
    }

    pub fn create_history(&self, contact_id: u32) -> Result<u32, Error> {
        let mut node = Node::new(NodeType::History, 0, "");
        node.user1 = contact_id;
        self.add_node(&mut node, true)?;
        Ok(node.id)
    }

    /// Returns the most recent history node for `contact_id`, creating
    /// one if none exists yet.
    pub fn latest_history(&self, contact_id: u32) -> Result<u32, Error> {
        let node = self.get_node(
            &Query::new().eq("user1", contact_id).eq("type", history_type()),
            &Order::new().desc("id"),
            &[],
            0,
            true,
        )?;
        match node {
            Some(n) => Ok(n.id),
            None => self.create_history(contact_id),
        }
    }

    pub fn store_message(&self, msg: &StoredMessage) -> Result<Node, Error> {
        let mut node = Node::new(NodeType::Message, msg.history_id, "");
        node.id = msg.id;
        node.time = msg.time;
        node.user1 = msg.src;
        node.user2 = msg.dst;

        let mut head = Object::new();
        head.insert("status", Value::from(msg.status.as_i32()));
        head.insert("userData", msg.user_data.clone());
        node.set_head_value(&Value::Object(head))?;

        let mut body = Object::new();
        if let Some(text) = &msg.text {
            body.insert("text", Value::from(text.as_str()));
        }
        node.set_body_value(&Value::Object(body))?;

        self.add_node(&mut node, true)?;
        Ok(node)
    }

    pub fn update_message(&self, msg: &StoredMessage) -> Result<bool, Error> {
        let existing = self.get_node(
            &Query::new().eq("id", msg.id).eq("type", message_type()),
            &Order::new(),
            &[],
            0,
            true,
        )?;
        let Some(existing) = existing else { return Ok(false) };

        let mut head = existing.head_value().ok().and_then(|v| v.as_object().cloned()).unwrap_or_default();
        head.insert("status", Value::from(msg.status.as_i32()));
        head.insert("userData", msg.user_data.clone());

        let mut body = existing.body_value().ok().and_then(|v| v.as_object().cloned()).unwrap_or_default();
        if let Some(text) = &msg.text {
            body.insert("text", Value::from(text.as_str()));
        }

        let mut update = Object::new();
        update.insert("time", Value::from(msg.time as i32));
        update.insert("head", Value::Object(head).encode().map(Value::Raw)?);
        update.insert("body", Value::Object(body).encode().map(Value::Raw)?);
        self.update_node(msg.id, &update, true)
    }

    pub fn get_messages(&self, history_id: u32) -> Result<Vec<StoredMessage>, Error> {
        let nodes = self.get_nodes(
            &Query::new().eq("parent", history_id).eq("type", message_type()),
            &Order::new().asc("id"),
            &[],
            0,
            0,
            true,
            true,
        )?;
        nodes.iter().map(node_to_message).collect()
    }

    /// Stores a resource body, recording its MD5 in `user3` for dedup.
    /// When `blank_space` is non-zero, the body column is pre-sized with
    /// zero bytes instead of written with `data` (a caller that will
    /// stream the payload in afterwards via [`Store::open_body_blob`]).
    pub fn store_resource(
        &self,
        id: u32,
        res_type: ResourceType,
        name: &str,
        data: &[u8],
        message_id: u32,
        blank_space: u32,
        parent: u32,
        user_data: &Value,
    ) -> Result<Node, Error> {
        let mut node = Node::new(NodeType::Resource, if parent != 0 { parent } else { VFS_NODE_ID }, name);
        node.id = if id != 0 { id } else { shroud_crypto::mk_id()? };
        node.user1 = res_type.as_i32() as u32;
        node.user2 = message_id;
        node.user3 = shroud_crypto::md5_hex(data);

        let mut head = Object::new();
        head.insert("status", Value::from(0i32));
        head.insert("userData", user_data.clone());
        node.set_head_value(&Value::Object(head))?;

        node.body = if blank_space > 0 { vec![0u8; blank_space as usize] } else { data.to_vec() };

        self.add_node(&mut node, true)?;
        Ok(node)
    }

    pub fn get_resource(&self, id: u32) -> Result<Option<StoredResource>, Error> {
        let node = self.get_node(
            &Query::new().eq("id", id).eq("type", resource_type()),
            &Order::new(),
            &[],
            0,
            true,
        )?;
        node.map(|n| node_to_resource(&n)).transpose()
    }

    pub fn get_resources(&self) -> Result<Vec<StoredResource>, Error> {
        let nodes = self.get_nodes(
            &Query::new().eq("type", resource_type()),
            &Order::new(),
            &[],
            0,
            0,
            true,
            true,
        )?;
        nodes.iter().map(node_to_resource).collect()
    }

    /// Lazily creates and caches the per-contact "Incoming" directory
    /// under the vfs root, named after the contact's directory kind.
    pub fn incoming_dir(&self, contact_id: u32) -> Result<u32, Error> {
        self.contact_dir(DirKind::Incoming, "Incoming", contact_id)
    }

    pub fn outgoing_dir(&self, contact_id: u32) -> Result<u32, Error> {
        self.contact_dir(DirKind::Outgoing, "Outgoing", contact_id)
    }

    fn contact_dir(&self, kind: DirKind, top_name: &str, contact_id: u32) -> Result<u32, Error> {
        if let Some(id) = self.dir_cache().lock().unwrap().get(&(kind, contact_id)) {
            return Ok(*id);
        }
        let contact = self.get_contact_by_id(contact_id)?.ok_or(Error::NotFound)?;

        let top = self.get_node(
            &Query::new().eq("parent", VFS_NODE_ID).eq("name", top_name),
            &Order::new(),
            &[],
            0,
            true,
        )?;
        let top = match top {
            Some(n) => n,
            None => self.create_directory(top_name, VFS_NODE_ID)?,
        };

        let dir = self.get_node(
            &Query::new().eq("parent", top.id).eq("name", contact.label.as_str()),
            &Order::new(),
            &[],
            0,
            true,
        )?;
        let dir = match dir {
            Some(n) => n,
            None => self.create_directory(&contact.label, top.id)?,
        };

        self.dir_cache().lock().unwrap().insert((kind, contact_id), dir.id);
        Ok(dir.id)
    }

    /// Returns the `accountInfo` value passed to [`Store::init`] (e.g. the
    /// server-assigned `accountPw`), read back from the unencrypted data
    /// node.
    pub fn account_info(&self) -> Result<Value, Error> {
        let node = self
            .get_node(&Query::new().eq("id", DATA_NODE_ID), &Order::new(), &[], 0, true)?
            .ok_or(Error::NotFound)?;
        let body = node.body_value()?;
        Ok(body.as_object().and_then(|o| o.get("accountInfo")).cloned().unwrap_or(Value::Null))
    }

    /// Returns the config node's body, or an empty object if unset.
    pub fn get_config(&self) -> Result<Object, Error> {
        let node = self.config_node()?;
        Ok(node.body_value()?.as_object().cloned().unwrap_or_default())
    }

    /// Merges whitelisted keys from `config` into the stored config
    /// object. Returns [`Error::RejectedConfigKey`] on the first key not
    /// in the whitelist.
    pub fn set_config(&self, config: &Object) -> Result<(), Error> {
        for (key, _) in config.iter() {
            if !CONFIG_WHITELIST.contains(&key.as_str()) {
                tracing::warn!(key = %key, "rejecting config key not in whitelist");
                return Err(Error::RejectedConfigKey(key.clone()));
            }
        }
        let node = self.config_node()?;
        let mut stored = node.body_value()?.as_object().cloned().unwrap_or_default();
        for (key, value) in config.iter() {
            stored.insert(key.clone(), value.clone());
        }
        let mut update = Object::new();
        update.insert("body", Value::Object(stored).encode().map(Value::Raw)?);
        self.update_node(node.id, &update, false)?;
        Ok(())
    }

    fn config_node(&self) -> Result<Node, Error> {
        self.get_node(&Query::new().eq("id", crate::node::CONFIG_NODE_ID), &Order::new(), &[], 0, false)?
            .ok_or(Error::NotFound)
    }
}

fn node_to_contact(node: &Node) -> Result<Contact, Error> {
    let body = node.body_value()?.as_object().cloned().unwrap_or_default();
    Ok(Contact {
        contact_id: node.user1,
        label: node.name.clone(),
        phone: node.user3.clone(),
        public_key: body.get("publicKey").cloned().unwrap_or(Value::Null),
    })
}

fn node_to_message(node: &Node) -> Result<StoredMessage, Error> {
    let head = node.head_value()?.as_object().cloned().unwrap_or_default();
    let body = node.body_value()?.as_object().cloned().unwrap_or_default();
    Ok(StoredMessage {
        id: node.id,
        time: node.time,
        history_id: node.parent,
        src: node.user1,
        dst: node.user2,
        status: MessageStatus::from_i32(head.get("status").and_then(Value::as_i32).unwrap_or(0)),
        user_data: head.get("userData").cloned().unwrap_or(Value::Null),
        text: body.get("text").and_then(Value::as_str).map(|s| s.to_string()),
    })
}

fn node_to_resource(node: &Node) -> Result<StoredResource, Error> {
    let head = node.head_value()?.as_object().cloned().unwrap_or_default();
    Ok(StoredResource {
        id: node.id,
        res_type: ResourceType::from_i32(node.user1 as i32),
        name: node.name.clone(),
        data: node.body.clone(),
        md5_hex: node.user3.clone(),
        user_data: head.get("userData").cloned().unwrap_or(Value::Null),
    })
}

/// Shorthand for node-type filter literals in typed queries.
mod type_filter {
    use crate::node::NodeType;

    pub fn contact() -> u32 {
        NodeType::Contact.as_i32() as u32
    }
    pub fn request() -> u32 {
        NodeType::Request.as_i32() as u32
    }
    pub fn history() -> u32 {
        NodeType::History.as_i32() as u32
    }
    pub fn message() -> u32 {
        NodeType::Message.as_i32() as u32
    }
    pub fn resource() -> u32 {
        NodeType::Resource.as_i32() as u32
    }
}
use type_filter::{contact as contact_type, history as history_type, message as message_type, request as request_type, resource as resource_type};

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn temp_store() -> (Store, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        std::fs::remove_file(file.path()).unwrap();
        let store = Store::init(file.path(), "hunter2", 1, "tester", &Value::Object(Object::new())).unwrap();
        (store, file)
    }

    #[test]
    fn contact_upsert_and_lookup() {
        let (store, _file) = temp_store();
        store.add_contact(42, "alice", "+1555", "", Some(&Value::from("pk"))).unwrap();
        let c = store.get_contact_by_label("alice").unwrap().unwrap();
        assert_eq!(c.contact_id, 42);
        assert_eq!(c.phone, "+1555");

        store.add_contact(43, "alice", "", "", Some(&Value::from("pk2"))).unwrap();
        let c = store.get_contact_by_label("alice").unwrap().unwrap();
        assert_eq!(c.contact_id, 43);
        assert_eq!(store.get_contacts().unwrap().len(), 1);
    }

    #[test]
    fn request_roundtrip() {
        let (store, _file) = temp_store();
        let mut body = Object::new();
        body.insert("kind", Value::from("Login"));
        store.add_request(99, &Value::Object(body)).unwrap();
        let got = store.get_request(99).unwrap().unwrap();
        assert_eq!(got.as_object().unwrap().get("kind").and_then(Value::as_str), Some("Login"));
        assert!(store.delete_request(99).unwrap());
        assert!(store.get_request(99).unwrap().is_none());
    }

    #[test]
    fn history_is_created_lazily_and_reused() {
        let (store, _file) = temp_store();
        let h1 = store.latest_history(7).unwrap();
        let h2 = store.latest_history(7).unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn message_store_update_and_list() {
        let (store, _file) = temp_store();
        let history = store.create_history(1).unwrap();
        let msg = StoredMessage {
            id: 1001,
            time: 1_700_000_000,
            history_id: history,
            src: 1,
            dst: 2,
            status: MessageStatus::Outgoing,
            user_data: Value::Null,
            text: Some("hello".to_string()),
        };
        store.store_message(&msg).unwrap();
        let mut updated = msg.clone();
        updated.status = MessageStatus::Sent;
        assert!(store.update_message(&updated).unwrap());

        let list = store.get_messages(history).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].status, MessageStatus::Sent);
        assert_eq!(list[0].text.as_deref(), Some("hello"));
    }

    #[test]
    fn resource_roundtrip_and_dedup_hash() {
        let (store, _file) = temp_store();
        let node = store
            .store_resource(0, ResourceType::Text, "note.txt", b"hi there", 0, 0, 0, &Value::Null)
            .unwrap();
        let res = store.get_resource(node.id).unwrap().unwrap();
        assert_eq!(res.data, b"hi there");
        assert_eq!(res.md5_hex, shroud_crypto::md5_hex(b"hi there"));
    }

    #[test]
    fn config_whitelist_rejects_unknown_keys() {
        let (store, _file) = temp_store();
        let mut good = Object::new();
        good.insert("findByLabel", Value::Bool(true));
        store.set_config(&good).unwrap();
        assert_eq!(store.get_config().unwrap().get("findByLabel").and_then(Value::as_bool), Some(true));

        let mut bad = Object::new();
        bad.insert("notAWhitelistedKey", Value::Bool(true));
        assert!(matches!(store.set_config(&bad), Err(Error::RejectedConfigKey(_))));
    }

    #[test]
    fn incoming_and_outgoing_dirs_are_cached_and_distinct() {
        let (store, _file) = temp_store();
        store.add_contact(5, "bob", "", "", None).unwrap();
        let inc = store.incoming_dir(5).unwrap();
        let inc2 = store.incoming_dir(5).unwrap();
        let out = store.outgoing_dir(5).unwrap();
        assert_eq!(inc, inc2);
        assert_ne!(inc, out);
    }
}
