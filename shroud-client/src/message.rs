//! Per-message streaming state machines: [`MessageSender`] drives the
//! encrypt-sign-chunk pipeline, [`MessageReceiver`] the reassemble-
//! verify-decrypt pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use shroud_buffer::Buffer;
use shroud_crypto::rsa::{PrivateKey, PublicKey};
use shroud_crypto::{AesCtr, CtrStream, Sha256Digest};
use shroud_proto::{Packet, PacketKind, MAX_PACKET_BODY};
use shroud_store::{MessageStatus, ResourceType, Store, StoredMessage};
use shroud_value::{Object, Value};

use crate::errors::Error;
use crate::event::{Dispatcher, Event};

/// A named blob within a [`Message`]. `md5` is recomputed whenever
/// `set_data` replaces the payload.
#[derive(Clone, Debug, PartialEq)]
pub struct Resource {
    pub id: u32,
    pub res_type: ResourceType,
    pub name: String,
    pub data: Vec<u8>,
    pub md5: [u8; 16],
    pub user_data: Value,
}

impl Resource {
    pub fn new(res_type: ResourceType, name: impl Into<String>) -> Self {
        Resource { id: 0, res_type, name: name.into(), data: Vec::new(), md5: shroud_crypto::md5(&[]), user_data: Value::Null }
    }

    pub fn set_data(&mut self, data: Vec<u8>) {
        self.md5 = shroud_crypto::md5(&data);
        self.data = data;
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// A user payload: an ordered list of resources plus routing/history
/// metadata. `id` is unique within a client; `src`/`dst` are non-zero
/// once the message leaves the `Idle` status.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub id: u32,
    pub status: MessageStatus,
    pub time: i64,
    pub history_id: u32,
    pub src: u32,
    pub dst: u32,
    pub resources: Vec<Resource>,
    pub user_data: Value,
}

impl Message {
    pub fn new(history_id: u32, src: u32, dst: u32) -> Self {
        Message {
            id: 0,
            status: MessageStatus::Idle,
            time: 0,
            history_id,
            src,
            dst,
            resources: Vec::new(),
            user_data: Value::Null,
        }
    }

    pub fn add_resource(&mut self, resource: Resource) {
        self.resources.push(resource);
    }

    pub fn resource(&self, id: u32) -> Option<&Resource> {
        self.resources.iter().find(|r| r.id == id)
    }
}

/// Copies the message key out of its locked-memory `Buffer` into the fixed
/// array `CtrStream`/`AesCtr` take by value. The copy is transient: it lives
/// only for the duration of the cipher call that consumes it.
fn mk_array(mk: &Buffer) -> [u8; 32] {
    let mut arr = [0u8; 32];
    mk.read(&mut arr, 32, 0);
    arr
}

fn increment_salt(salt: &mut [u8; 16]) {
    let word = u32::from_le_bytes(salt[12..16].try_into().unwrap());
    salt[12..16].copy_from_slice(&word.wrapping_add(1).to_le_bytes());
}

fn parts_for(size: usize) -> u32 {
    size.div_ceil(MAX_PACKET_BODY).max(1) as u32
}

fn now() -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

/// Parses a `Contact.public_key` value (the `{e,n,size}` map stored in a
/// contact node's body) into an RSA key usable for wrapping a message key.
pub(crate) fn public_key_from_value(v: &Value) -> Result<PublicKey, Error> {
    let obj = v.as_object().ok_or(Error::MalformedHead("publicKey"))?;
    let e = obj.get("e").and_then(Value::as_str).ok_or(Error::MalformedHead("publicKey.e"))?;
    let n = obj.get("n").and_then(Value::as_str).ok_or(Error::MalformedHead("publicKey.n"))?;
    let size = obj.get("size").and_then(Value::as_i32).ok_or(Error::MalformedHead("publicKey.size"))? as usize;
    PublicKey::from_hex_parts(e, n, size).map_err(Error::from)
}

/// Looks up an existing `Resource` node by name + content hash under
/// `dir`, the dedup check both the sender (against its outgoing mirror)
/// and the receiver (against its incoming archive) perform per resource.
fn find_resource_id(store: &Store, dir: u32, name: &str, hash_hex: &str) -> Result<Option<u32>, Error> {
    let resource_type = shroud_store::NodeType::Resource.as_i32() as u32;
    let node = store.get_node(
        &shroud_store::Query::new().eq("type", resource_type).eq("parent", dir).eq("name", name).eq("user3", hash_hex),
        &shroud_store::Order::new(),
        &["id"],
        0,
        true,
    )?;
    Ok(node.map(|n| n.id))
}

// ─── Sender ─────────────────────────────────────────────────────────────

struct ResourcePlan {
    index: usize,
    total_parts: u32,
}

/// Drives one outbound [`Message`] to completion, one packet per
/// `process()` call.
pub struct MessageSender {
    store: Arc<Store>,
    own_private: PrivateKey,
    message: Message,
    mk: Buffer,
    base_salt: [u8; 16],
    salt: [u8; 16],
    ctr: CtrStream,
    digest: Sha256Digest,
    keys: Vec<(u32, Vec<u8>)>,
    plan: Vec<ResourcePlan>,
    plan_idx: usize,
    part_idx: u32,
    parts_sent: u32,
    total_parts: u32,
    first_packet_sent: bool,
}

impl MessageSender {
    /// Builds the sender, persisting the outgoing message and wrapping
    /// the fresh message key for every recipient (and `own_public`, so
    /// the sender can decrypt its own archive copy).
    pub fn init(
        store: Arc<Store>,
        own_account_id: u32,
        own_public: &PublicKey,
        own_private: &PrivateKey,
        mut message: Message,
        recipients: &[(u32, PublicKey)],
    ) -> Result<Self, Error> {
        if message.id == 0 {
            message.id = shroud_crypto::mk_id()?;
        }
        if message.time == 0 {
            message.time = now();
        }

        let outgoing_dir = store.outgoing_dir(message.dst)?;
        let mut plan = Vec::new();
        let mut total_parts = 0u32;
        for index in 0..message.resources.len() {
            if message.resources[index].size() == 0 {
                continue;
            }
            let hash_hex = shroud_crypto::to_hex(&message.resources[index].md5);
            let existing = find_resource_id(&store, outgoing_dir, &message.resources[index].name, &hash_hex)?;
            let node_id = match existing {
                Some(id) => id,
                None => {
                    let resource = &message.resources[index];
                    store.store_resource(0, resource.res_type, &resource.name, &resource.data, 0, 0, outgoing_dir, &resource.user_data)?.id
                }
            };
            message.resources[index].id = node_id;
            let resource_parts = parts_for(message.resources[index].size());
            total_parts += resource_parts;
            plan.push(ResourcePlan { index, total_parts: resource_parts });
        }
        if total_parts == 0 {
            return Err(Error::MalformedHead("message has no resources to send"));
        }

        let mk = Buffer::create_from(&shroud_crypto::random::bytes(32, shroud_crypto::random::Strength::VeryStrong)?);
        let base_salt: [u8; 16] = {
            let bytes = shroud_crypto::random::bytes(16, shroud_crypto::random::Strength::Strong)?;
            bytes.try_into().unwrap()
        };

        let mut keys = Vec::with_capacity(recipients.len() + 1);
        keys.push((own_account_id, shroud_crypto::rsa::encrypt(own_public, mk.as_slice())?));
        for (account_id, public_key) in recipients {
            keys.push((*account_id, shroud_crypto::rsa::encrypt(public_key, mk.as_slice())?));
        }

        message.status = MessageStatus::Outgoing;
        store.store_message(&to_stored(&message))?;

        Ok(MessageSender {
            store,
            own_private: own_private.clone(),
            message,
            ctr: CtrStream::new(mk_array(&mk), base_salt),
            mk,
            base_salt,
            salt: base_salt,
            digest: Sha256Digest::new(),
            keys,
            plan,
            plan_idx: 0,
            part_idx: 0,
            parts_sent: 0,
            total_parts,
            first_packet_sent: false,
        })
    }

    fn meta_value(&self) -> Result<Value, Error> {
        let mut items = Vec::with_capacity(self.plan.len());
        for entry in &self.plan {
            let resource = &self.message.resources[entry.index];
            let mut item = Object::new();
            item.insert("id", Value::from(resource.id as i32));
            item.insert("name", Value::from(resource.name.as_str()));
            item.insert("size", Value::from(resource.size() as i32));
            item.insert("hash", Value::from(shroud_crypto::to_hex(&resource.md5)));
            item.insert("parts", Value::from(entry.total_parts as i32));
            items.push(Value::Object(item));
        }
        let mut meta = Object::new();
        meta.insert("resources", Value::Array(items));
        Ok(Value::Object(meta))
    }

    /// Produces the next packet, or `None` once every resource has been
    /// fully streamed.
    pub fn process(&mut self, dispatcher: &Dispatcher) -> Result<Option<Packet>, Error> {
        if self.plan_idx >= self.plan.len() {
            return Ok(None);
        }
        if self.part_idx == 0 {
            increment_salt(&mut self.salt);
            self.ctr = CtrStream::new(mk_array(&self.mk), self.salt);
            self.digest = Sha256Digest::new();
        }

        let entry_index = self.plan_idx;
        let resource_index = self.plan[entry_index].index;
        let resource = &self.message.resources[resource_index];
        let offset = self.part_idx as usize * MAX_PACKET_BODY;
        let end = (offset + MAX_PACKET_BODY).min(resource.data.len());
        let mut chunk = resource.data[offset..end].to_vec();
        self.ctr.apply(&mut chunk);
        self.digest.update(&chunk);

        let is_last_of_resource = end == resource.data.len();
        let resource_parts = self.plan[entry_index].total_parts;

        let mut head = Object::new();
        head.insert("messageId", Value::from(self.message.id as i32));
        head.insert("messageTime", Value::from(self.message.time as i32));
        head.insert("messageSrc", Value::from(self.message.src as i32));
        head.insert("messageDst", Value::from(self.message.dst as i32));
        head.insert("messagePart", Value::from(self.parts_sent as i32));
        head.insert("messageParts", Value::from(self.total_parts as i32));
        head.insert("resourceId", Value::from(resource.id as i32));
        head.insert("resourceType", Value::from(resource.res_type.as_i32()));
        head.insert("resourceSize", Value::from(resource.size() as i32));
        head.insert("resourcePart", Value::from(self.part_idx as i32));
        head.insert("resourceParts", Value::from(resource_parts as i32));

        if !self.first_packet_sent {
            let meta_bytes = self.meta_value()?.encode()?;
            let mut meta_ct = meta_bytes;
            AesCtr::new(mk_array(&self.mk), self.base_salt).apply(&mut meta_ct);
            head.insert("salt", Value::Raw(self.base_salt.to_vec()));
            head.insert("meta", Value::Raw(meta_ct));
            let key_list: Vec<Value> = self
                .keys
                .iter()
                .map(|(dst, ct)| {
                    let mut entry = Object::new();
                    entry.insert("dst", Value::from(*dst as i32));
                    entry.insert("key", Value::Raw(ct.clone()));
                    Value::Object(entry)
                })
                .collect();
            head.insert("keys", Value::Array(key_list));
            self.first_packet_sent = true;
        }

        if is_last_of_resource {
            let digest = std::mem::replace(&mut self.digest, Sha256Digest::new()).finalize();
            let signature = shroud_crypto::rsa::sign(&self.own_private, &digest)?;
            head.insert("signature", Value::Raw(signature));
            tracing::debug!(message_id = self.message.id, resource_id = resource.id, "resource fully sent");
            dispatcher.emit(Event::ResourceSent { message_id: self.message.id, resource_id: resource.id });
        }

        self.parts_sent += 1;
        self.part_idx += 1;
        if is_last_of_resource {
            self.plan_idx += 1;
            self.part_idx = 0;
        }

        if self.parts_sent == self.total_parts {
            self.message.status = MessageStatus::Sent;
            self.store.update_message(&to_stored(&self.message))?;
            dispatcher.emit(Event::MessageSent { message_id: self.message.id });
        }

        let packet = Packet::new(PacketKind::Message, Value::Object(head).encode()?, chunk)?;
        Ok(Some(packet))
    }

    pub fn is_done(&self) -> bool {
        self.plan_idx >= self.plan.len()
    }

    pub fn message_id(&self) -> u32 {
        self.message.id
    }
}

// ─── Receiver ───────────────────────────────────────────────────────────

#[derive(Clone)]
struct ResourceMeta {
    id: u32,
    name: String,
    size: u32,
    hash: String,
    parts: u32,
}

enum Sink {
    Blob(u32),
    Memory(Vec<u8>),
}

struct ActiveResource {
    meta: ResourceMeta,
    res_type: ResourceType,
    ctr: CtrStream,
    digest: Sha256Digest,
    sink: Sink,
    parts_done: u32,
    skip: bool,
}

/// Reassembles one inbound message from its constituent packets.
pub struct MessageReceiver {
    store: Arc<Store>,
    own_private: PrivateKey,
    sender_public: PublicKey,
    message: Message,
    mk: Buffer,
    salt: [u8; 16],
    meta: HashMap<u32, ResourceMeta>,
    active: HashMap<u32, ActiveResource>,
    parts_processed: u32,
    total_parts: u32,
}

impl MessageReceiver {
    /// Creates a receiver from the first `Message`-kind packet's head for
    /// a new message id: requires `messageKey`, `salt`, and `meta`.
    pub fn new(
        store: Arc<Store>,
        own_account_id: u32,
        own_private: &PrivateKey,
        sender_public: &PublicKey,
        src: u32,
        head: &Object,
        dispatcher: &Dispatcher,
    ) -> Result<Self, Error> {
        let message_id = head.get("messageId").and_then(Value::as_i32).ok_or(Error::MalformedHead("messageId"))? as u32;
        let key_ct = find_key_for(head, own_account_id)?;
        let mk_bytes = shroud_crypto::rsa::decrypt(own_private, &key_ct)?;
        if mk_bytes.len() != 32 {
            return Err(Error::MalformedHead("messageKey"));
        }
        let mk = Buffer::create_from(&mk_bytes);
        let salt: [u8; 16] = head
            .get("salt")
            .and_then(Value::as_raw)
            .ok_or(Error::MalformedHead("salt"))?
            .try_into()
            .map_err(|_| Error::MalformedHead("salt"))?;
        let meta_ct = head.get("meta").and_then(Value::as_raw).ok_or(Error::MalformedHead("meta"))?;
        let meta_bytes = AesCtr::new(mk_array(&mk), salt).apply_to(meta_ct);
        let meta_value = Value::decode(&meta_bytes)?;
        let resources = meta_value.as_object().and_then(|o| o.get("resources")).and_then(Value::as_array).unwrap_or(&[]);

        let mut meta = HashMap::new();
        for item in resources {
            let obj = item.as_object().ok_or(Error::MalformedHead("meta.resources[]"))?;
            let id = obj.get("id").and_then(Value::as_i32).ok_or(Error::MalformedHead("meta.id"))? as u32;
            let name = obj.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
            let size = obj.get("size").and_then(Value::as_i32).unwrap_or(0) as u32;
            let hash = obj.get("hash").and_then(Value::as_str).unwrap_or_default().to_string();
            let parts = obj.get("parts").and_then(Value::as_i32).unwrap_or(1) as u32;
            meta.insert(id, ResourceMeta { id, name, size, hash, parts });
        }
        let total_parts = meta.values().map(|m| m.parts).sum();

        let history_id = store.latest_history(src)?;
        let mut message = Message::new(history_id, src, own_account_id);
        message.id = message_id;
        message.status = MessageStatus::Incoming;
        message.time = now();
        store.store_message(&to_stored(&message))?;
        dispatcher.emit(Event::MessageIncoming { message_id: message.id });

        Ok(MessageReceiver {
            store,
            own_private: own_private.clone(),
            sender_public: sender_public.clone(),
            message,
            mk,
            salt,
            meta,
            active: HashMap::new(),
            parts_processed: 0,
            total_parts,
        })
    }

    pub fn message_id(&self) -> u32 {
        self.message.id
    }

    pub fn is_complete(&self) -> bool {
        self.parts_processed >= self.total_parts
    }

    /// Processes one inbound packet's head + ciphertext body.
    pub fn process(&mut self, head: &Object, ciphertext: &[u8], dispatcher: &Dispatcher) -> Result<(), Error> {
        let resource_id = head.get("resourceId").and_then(Value::as_i32).ok_or(Error::MalformedHead("resourceId"))? as u32;
        let resource_part = head.get("resourcePart").and_then(Value::as_i32).ok_or(Error::MalformedHead("resourcePart"))? as u32;

        if !self.active.contains_key(&resource_id) {
            let meta = self.meta.get(&resource_id).cloned().ok_or(Error::NotFound)?;
            let res_type = ResourceType::from_i32(head.get("resourceType").and_then(Value::as_i32).unwrap_or(0));
            let dir = self.store.incoming_dir(self.message.src)?;
            let existing = find_resource_id(&self.store, dir, &meta.name, &meta.hash)?;

            increment_salt(&mut self.salt);
            let ctr = CtrStream::new(mk_array(&self.mk), self.salt);

            if let Some(existing_id) = existing {
                dispatcher.emit(Event::ResourceRecv {
                    message_id: self.message.id,
                    resource_id,
                    replaced: Some((resource_id, existing_id)),
                });
                self.active.insert(
                    resource_id,
                    ActiveResource { meta, res_type, ctr, digest: Sha256Digest::new(), sink: Sink::Memory(Vec::new()), parts_done: 0, skip: true },
                );
            } else {
                let sink = if res_type == ResourceType::Text {
                    Sink::Memory(vec![0u8; meta.size as usize])
                } else {
                    let node = self.store.store_resource(0, res_type, &meta.name, &[], 0, meta.size, dir, &Value::Null)?;
                    // `store_resource` hashed the blank placeholder body; the real
                    // content hash is already known from the sender's meta map.
                    let mut fixup = Object::new();
                    fixup.insert("user3", Value::from(meta.hash.clone()));
                    self.store.update_node(node.id, &fixup, true)?;
                    self.store.open_body_blob(node.id)?;
                    Sink::Blob(node.id)
                };
                let mut resource = Resource::new(res_type, meta.name.clone());
                resource.id = resource_id;
                self.message.add_resource(resource);
                self.active.insert(resource_id, ActiveResource { meta, res_type, ctr, digest: Sha256Digest::new(), sink, parts_done: 0, skip: false });
            }
        }

        let active = self.active.get_mut(&resource_id).ok_or(Error::NotFound)?;
        if active.skip {
            active.parts_done += 1;
            self.parts_processed += 1;
            return self.maybe_finish(dispatcher);
        }

        active.digest.update(ciphertext);
        let mut plaintext = ciphertext.to_vec();
        active.ctr.apply(&mut plaintext);
        let offset = resource_part as usize * MAX_PACKET_BODY;
        match &mut active.sink {
            Sink::Blob(id) => self.store.write_body_blob(*id, &plaintext, offset as u32)?,
            Sink::Memory(buf) => {
                let end = offset + plaintext.len();
                if buf.len() < end {
                    buf.resize(end, 0);
                }
                buf[offset..end].copy_from_slice(&plaintext);
            }
        }
        active.parts_done += 1;

        if active.parts_done == active.meta.parts {
            if let Sink::Blob(id) = &active.sink {
                self.store.close_body_blob(*id)?;
            }
            let digest = std::mem::replace(&mut active.digest, Sha256Digest::new()).finalize();
            let signature = head.get("signature").and_then(Value::as_raw).ok_or(Error::MalformedHead("signature"))?;
            let verified = shroud_crypto::rsa::verify(&self.sender_public, &digest, signature)?;
            if !verified {
                tracing::warn!(message_id = self.message.id, resource_id, "signature verification failed, dropping resource");
                if let Sink::Blob(id) = &active.sink {
                    self.store.zero_body_blob(*id)?;
                }
                dispatcher.emit(Event::Error {
                    message: format!("signature verification failed for resource {resource_id}"),
                    file: file!(),
                    line: line!(),
                });
                self.active.remove(&resource_id);
                self.message.resources.retain(|r| r.id != resource_id);
            } else {
                tracing::debug!(message_id = self.message.id, resource_id, "resource fully received and verified");
                if let Sink::Memory(buf) = &active.sink {
                    if let Some(resource) = self.message.resources.iter_mut().find(|r| r.id == resource_id) {
                        resource.set_data(buf.clone());
                    }
                }
            }
        }

        self.parts_processed += 1;
        self.maybe_finish(dispatcher)
    }

    fn maybe_finish(&mut self, dispatcher: &Dispatcher) -> Result<(), Error> {
        if self.parts_processed >= self.total_parts {
            self.message.status = MessageStatus::Recv;
            self.store.update_message(&to_stored(&self.message))?;
            dispatcher.emit(Event::MessageRecv { message_id: self.message.id });
        }
        Ok(())
    }
}

fn find_key_for(head: &Object, account_id: u32) -> Result<Vec<u8>, Error> {
    let keys = head.get("keys").and_then(Value::as_array).ok_or(Error::MalformedHead("keys"))?;
    for entry in keys {
        let obj = entry.as_object().ok_or(Error::MalformedHead("keys[]"))?;
        if obj.get("dst").and_then(Value::as_i32) == Some(account_id as i32) {
            return obj.get("key").and_then(Value::as_raw).map(|b| b.to_vec()).ok_or(Error::MalformedHead("keys[].key"));
        }
    }
    Err(Error::MalformedHead("no key ciphertext for this account"))
}

fn to_stored(message: &Message) -> StoredMessage {
    StoredMessage {
        id: message.id,
        time: message.time,
        history_id: message.history_id,
        src: message.src,
        dst: message.dst,
        status: message.status,
        user_data: message.user_data.clone(),
        text: message.resources.iter().find(|r| r.res_type == ResourceType::Text).and_then(|r| String::from_utf8(r.data.clone()).ok()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shroud_crypto::rsa;
    use tempfile::NamedTempFile;

    fn temp_store(account_id: u32, label: &str) -> (Arc<Store>, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        std::fs::remove_file(file.path()).unwrap();
        let store = Store::init(file.path(), "hunter2", account_id, label, &Value::Null).unwrap();
        (Arc::new(store), file)
    }

    fn contact_value(public_key: &PublicKey) -> Value {
        let (e, n, size) = public_key.to_hex_parts();
        let mut obj = Object::new();
        obj.insert("e", Value::from(e));
        obj.insert("n", Value::from(n));
        obj.insert("size", Value::from(size as i32));
        Value::Object(obj)
    }

    #[test]
    fn salt_increments_as_a_wrapping_little_endian_u32_at_offset_12() {
        let mut salt = [0u8; 16];
        increment_salt(&mut salt);
        assert_eq!(&salt[12..16], &1u32.to_le_bytes());
        assert_eq!(&salt[0..12], &[0u8; 12]);

        salt[12..16].copy_from_slice(&u32::MAX.to_le_bytes());
        increment_salt(&mut salt);
        assert_eq!(&salt[12..16], &0u32.to_le_bytes());
    }

    /// Drives a one-recipient send/receive pair end to end over two text
    /// resources (multiple parts on the second, forcing a salt bump
    /// between resources) and checks the receiver reassembles both.
    #[test]
    fn sender_receiver_roundtrip_multi_resource() {
        let (sender_store, _f1) = temp_store(1, "alice");
        let (receiver_store, _f2) = temp_store(2, "bob");

        let (sender_pub, sender_priv) = rsa::generate(1024).unwrap();
        let (receiver_pub, receiver_priv) = rsa::generate(1024).unwrap();

        sender_store.add_contact(2, "bob", "", "", Some(&contact_value(&receiver_pub))).unwrap();
        receiver_store.add_contact(1, "alice", "", "", Some(&contact_value(&sender_pub))).unwrap();

        let mut message = Message::new(0, 1, 2);
        let mut r1 = Resource::new(ResourceType::Text, "note.txt");
        r1.set_data(b"hello bob".to_vec());
        message.add_resource(r1);
        let mut r2 = Resource::new(ResourceType::File, "photo.bin");
        r2.set_data(vec![0xabu8; MAX_PACKET_BODY + 123]);
        message.add_resource(r2);

        let mut sender = MessageSender::init(
            sender_store.clone(),
            1,
            &sender_pub,
            &sender_priv,
            message,
            &[(2, receiver_pub.clone())],
        )
        .unwrap();

        let dispatcher = Dispatcher::new();
        let mut packets = Vec::new();
        while let Some(packet) = sender.process(&dispatcher).unwrap() {
            packets.push(packet);
        }
        assert!(sender.is_done());
        assert_eq!(packets.len(), 1 + parts_for(MAX_PACKET_BODY + 123) as usize);

        let first_head = Value::decode(&packets[0].head).unwrap().as_object().cloned().unwrap();
        let mut receiver =
            MessageReceiver::new(receiver_store.clone(), 2, &receiver_priv, &sender_pub, 1, &first_head, &dispatcher).unwrap();

        for packet in &packets {
            let head = Value::decode(&packet.head).unwrap().as_object().cloned().unwrap();
            receiver.process(&head, &packet.body, &dispatcher).unwrap();
        }
        assert!(receiver.is_complete());

        let text_resource = receiver.message.resources.iter().find(|r| r.res_type == ResourceType::Text).unwrap();
        assert_eq!(text_resource.data, b"hello bob");

        let file_resource = receiver.message.resources.iter().find(|r| r.res_type == ResourceType::File).unwrap();
        let stored = receiver_store.get_resource(file_resource.id).unwrap().unwrap();
        assert_eq!(stored.data, vec![0xabu8; MAX_PACKET_BODY + 123]);
    }

    #[test]
    fn duplicate_outgoing_resource_is_not_restored() {
        let (sender_store, _f1) = temp_store(1, "alice");
        let (_receiver_store, _f2) = temp_store(2, "bob");
        let (sender_pub, sender_priv) = rsa::generate(1024).unwrap();
        let (receiver_pub, _receiver_priv) = rsa::generate(1024).unwrap();
        sender_store.add_contact(2, "bob", "", "", Some(&contact_value(&receiver_pub))).unwrap();

        let dispatcher = Dispatcher::new();
        let mut send_once = |data: &[u8]| {
            let mut message = Message::new(0, 1, 2);
            let mut resource = Resource::new(ResourceType::File, "dup.bin");
            resource.set_data(data.to_vec());
            message.add_resource(resource);
            let mut sender =
                MessageSender::init(sender_store.clone(), 1, &sender_pub, &sender_priv, message, &[(2, receiver_pub.clone())])
                    .unwrap();
            while sender.process(&dispatcher).unwrap().is_some() {}
        };

        send_once(b"same content");
        let before = sender_store.get_resources().unwrap().len();
        send_once(b"same content");
        let after = sender_store.get_resources().unwrap().len();
        assert_eq!(before, after, "dedup should reuse the existing outgoing resource node");
    }

    #[test]
    fn receiver_dedup_emits_replaced_and_writes_no_new_blob() {
        let (sender_store, _f1) = temp_store(1, "alice");
        let (receiver_store, _f2) = temp_store(2, "bob");
        let (sender_pub, sender_priv) = rsa::generate(1024).unwrap();
        let (receiver_pub, receiver_priv) = rsa::generate(1024).unwrap();
        sender_store.add_contact(2, "bob", "", "", Some(&contact_value(&receiver_pub))).unwrap();
        receiver_store.add_contact(1, "alice", "", "", Some(&contact_value(&sender_pub))).unwrap();

        let dispatcher = Dispatcher::new();
        let send_and_recv = |sender_store: Arc<Store>, receiver_store: Arc<Store>| -> Vec<Packet> {
            let mut message = Message::new(0, 1, 2);
            let mut resource = Resource::new(ResourceType::File, "repeat.bin");
            resource.set_data(b"identical payload".to_vec());
            message.add_resource(resource);
            let mut sender =
                MessageSender::init(sender_store, 1, &sender_pub, &sender_priv, message, &[(2, receiver_pub.clone())]).unwrap();
            let mut packets = Vec::new();
            while let Some(p) = sender.process(&dispatcher).unwrap() {
                packets.push(p);
            }
            let _ = receiver_store;
            packets
        };

        let first = send_and_recv(sender_store.clone(), receiver_store.clone());
        let head = Value::decode(&first[0].head).unwrap().as_object().cloned().unwrap();
        let mut receiver = MessageReceiver::new(receiver_store.clone(), 2, &receiver_priv, &sender_pub, 1, &head, &dispatcher).unwrap();
        for packet in &first {
            let head = Value::decode(&packet.head).unwrap().as_object().cloned().unwrap();
            receiver.process(&head, &packet.body, &dispatcher).unwrap();
        }
        let resources_after_first = receiver_store.get_resources().unwrap().len();

        let second = send_and_recv(sender_store, receiver_store.clone());
        let head2 = Value::decode(&second[0].head).unwrap().as_object().cloned().unwrap();
        let mut receiver2 = MessageReceiver::new(receiver_store.clone(), 2, &receiver_priv, &sender_pub, 1, &head2, &dispatcher).unwrap();
        for packet in &second {
            let head = Value::decode(&packet.head).unwrap().as_object().cloned().unwrap();
            receiver2.process(&head, &packet.body, &dispatcher).unwrap();
        }
        let resources_after_second = receiver_store.get_resources().unwrap().len();
        assert_eq!(resources_after_first, resources_after_second, "dedup must not create a second blob node");
    }

    #[test]
    fn tampered_ciphertext_fails_signature_verification_and_drops_resource() {
        let (sender_store, _f1) = temp_store(1, "alice");
        let (receiver_store, _f2) = temp_store(2, "bob");
        let (sender_pub, sender_priv) = rsa::generate(1024).unwrap();
        let (receiver_pub, receiver_priv) = rsa::generate(1024).unwrap();
        sender_store.add_contact(2, "bob", "", "", Some(&contact_value(&receiver_pub))).unwrap();
        receiver_store.add_contact(1, "alice", "", "", Some(&contact_value(&sender_pub))).unwrap();

        let mut message = Message::new(0, 1, 2);
        let mut resource = Resource::new(ResourceType::Text, "secret.txt");
        resource.set_data(b"do not tamper with me".to_vec());
        message.add_resource(resource);

        let mut sender =
            MessageSender::init(sender_store, 1, &sender_pub, &sender_priv, message, &[(2, receiver_pub.clone())]).unwrap();
        let dispatcher = Dispatcher::new();
        let mut packets = Vec::new();
        while let Some(p) = sender.process(&dispatcher).unwrap() {
            packets.push(p);
        }
        // Flip a bit in the (only) chunk's ciphertext body.
        packets[0].body[0] ^= 0xff;

        let head = Value::decode(&packets[0].head).unwrap().as_object().cloned().unwrap();
        let mut receiver = MessageReceiver::new(receiver_store, 2, &receiver_priv, &sender_pub, 1, &head, &dispatcher).unwrap();
        receiver.process(&head, &packets[0].body, &dispatcher).unwrap();

        assert!(receiver.message.resources.is_empty(), "a resource that fails signature verification is dropped");
        assert!(receiver.is_complete());
    }
}

