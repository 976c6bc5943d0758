//! The `Client` orchestrator: owns the connection, the request tracker,
//! and the live message sender/receiver collections, and drives the
//! reader/sender thread pair.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use shroud_crypto::rsa::{PrivateKey, PublicKey};
use shroud_proto::{Packet, PacketKind};
use shroud_store::Store;
use shroud_value::{Object, Value};

use crate::connection::{Connection, TlsVerification, DEFAULT_PORT};
use crate::contact::PresenceMap;
use crate::errors::Error;
use crate::event::{Dispatcher, Event};
use crate::message::{public_key_from_value, Message, MessageReceiver, MessageSender};
use crate::request::{Request, RequestKind, RequestStatus};
use crate::thread_util::{CancelToken, Shared};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(20);
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(15);
const RECONNECT_POLL: Duration = Duration::from_millis(200);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClientStatus {
    Disconnected,
    Connecting,
    Connected,
    Secure,
    LoggedIn,
}

#[derive(Clone)]
struct AccountContext {
    account_id: u32,
    public_key: PublicKey,
    private_key: PrivateKey,
}

/// Network/storage configuration fixed for the lifetime of a `Client`.
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: PathBuf,
    pub tls_verification: TlsVerification,
    /// How often the sender pings the relay when otherwise idle.
    /// Defaults to [`HEARTBEAT_INTERVAL`]; override knob for callers
    /// that need tighter/looser liveness than the protocol default.
    pub heartbeat_interval: Duration,
    /// How long the reader waits for any inbound packet before treating
    /// the connection as dead. Defaults to [`HEARTBEAT_TIMEOUT`].
    pub heartbeat_timeout: Duration,
    /// Delay between reconnect attempts after a lost connection.
    /// Defaults to [`RECONNECT_INTERVAL`].
    pub reconnect_interval: Duration,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, storage_dir: impl Into<PathBuf>) -> Self {
        ClientConfig {
            host: host.into(),
            port: DEFAULT_PORT,
            storage_dir: storage_dir.into(),
            tls_verification: TlsVerification::Platform,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            heartbeat_timeout: HEARTBEAT_TIMEOUT,
            reconnect_interval: RECONNECT_INTERVAL,
        }
    }
}

fn now() -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

fn storage_path(storage_dir: &std::path::Path, label: &str) -> PathBuf {
    storage_dir.join(format!("{}.store", shroud_crypto::sha256_hex(label.as_bytes())))
}

/// A condition variable the reader uses to wake the sender when there is
/// work pending, per the concurrency model's single producer/consumer
/// pair.
struct Wake {
    pending: Mutex<bool>,
    cv: Condvar,
}

impl Wake {
    fn new() -> Self {
        Wake { pending: Mutex::new(false), cv: Condvar::new() }
    }

    fn notify(&self) {
        *self.pending.lock().unwrap() = true;
        self.cv.notify_one();
    }

    fn wait_timeout(&self, timeout: Duration) {
        let guard = self.pending.lock().unwrap();
        let (mut guard, _) = self.cv.wait_timeout(guard, timeout).unwrap();
        *guard = false;
    }
}

/// The connection/request/message orchestrator. Every field is an
/// `Arc`/`Shared` handle, so a `Client` clones cheaply and may be shared
/// across the reader/sender threads and the caller's own threads alike.
#[derive(Clone)]
pub struct Client {
    config: Arc<ClientConfig>,
    status: Shared<ClientStatus>,
    dispatcher: Arc<Dispatcher>,
    conn: Shared<Option<Arc<Connection>>>,
    store: Shared<Option<Arc<Store>>>,
    account: Shared<Option<AccountContext>>,
    requests: Shared<HashMap<u32, Request>>,
    senders: Shared<Vec<MessageSender>>,
    receivers: Shared<HashMap<u32, MessageReceiver>>,
    presence: PresenceMap,
    last_recv: Shared<i64>,
    last_sent: Shared<i64>,
    ever_connected: Shared<bool>,
    cancel: CancelToken,
    wake: Arc<Wake>,
    threads: Arc<Mutex<Vec<std::thread::JoinHandle<()>>>>,
    followups: Arc<Mutex<HashMap<u32, Box<dyn FnOnce(&Client, &Object) + Send>>>>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Client {
            config: Arc::new(config),
            status: Shared::new(ClientStatus::Disconnected),
            dispatcher: Arc::new(Dispatcher::new()),
            conn: Shared::new(None),
            store: Shared::new(None),
            account: Shared::new(None),
            requests: Shared::new(HashMap::new()),
            senders: Shared::new(Vec::new()),
            receivers: Shared::new(HashMap::new()),
            presence: PresenceMap::new(),
            last_recv: Shared::new(0),
            last_sent: Shared::new(0),
            ever_connected: Shared::new(false),
            cancel: CancelToken::new(),
            wake: Arc::new(Wake::new()),
            threads: Arc::new(Mutex::new(Vec::new())),
            followups: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn status(&self) -> ClientStatus {
        self.status.get()
    }

    pub fn is_online(&self, account_id: u32) -> bool {
        self.presence.is_online(account_id)
    }

    // ─── Public API surface ─────────────────────────────────────────────

    pub fn set_event_handler(&self, handler: impl Fn(Event) + Send + 'static) {
        self.dispatcher.on_event(handler);
    }

    /// Starts the reader and sender threads and begins the connect
    /// procedure. Idempotent-ish: calling twice spawns a second pair,
    /// which callers should avoid.
    pub fn connect(&self) {
        let reader = self.clone();
        let reader_handle = std::thread::Builder::new().name("shroud-reader".into()).spawn(move || reader.reader_loop()).expect("spawn reader thread");
        let sender = self.clone();
        let sender_handle = std::thread::Builder::new().name("shroud-sender".into()).spawn(move || sender.sender_loop()).expect("spawn sender thread");
        self.threads.lock().unwrap().push(reader_handle);
        self.threads.lock().unwrap().push(sender_handle);
    }

    /// Signals cancellation, wakes the sender, and joins both threads.
    pub fn cancel_and_join(&self) {
        self.cancel.cancel();
        self.wake.notify();
        let mut threads = self.threads.lock().unwrap();
        for handle in threads.drain(..) {
            let _ = handle.join();
        }
        self.requests.lock().clear();
        self.senders.lock().clear();
        self.receivers.lock().clear();
        self.status.set(ClientStatus::Disconnected);
    }

    pub fn create_account(&self, account_info: Object, storage_password: impl Into<String>) -> u32 {
        let mut head = Object::new();
        for (k, v) in account_info.iter() {
            head.insert(k.clone(), v.clone());
        }
        let storage_password = storage_password.into();
        let label = account_info.get("label").and_then(Value::as_str).unwrap_or_default().to_string();
        self.post_request_with_followup(RequestKind::CreateAccount, head, move |client, response| {
            client.handle_create_account(&storage_password, &label, response);
        })
    }

    pub fn login(&self, storage: Arc<Store>) -> u32 {
        let account_pw = storage.account_info().unwrap_or(Value::Null);
        let mut head = Object::new();
        head.insert("accountId", Value::from(storage.account_id() as i32));
        head.insert("accountPw", account_pw);
        head.insert("config", Value::Object(storage.get_config().unwrap_or_default()));
        self.store.set(Some(storage.clone()));
        self.account.set(Some(AccountContext {
            account_id: storage.account_id(),
            public_key: storage.public_key().clone(),
            private_key: storage.private_key().clone(),
        }));
        self.post_request(RequestKind::Login, head)
    }

    pub fn set_config(&self, config: Object) -> u32 {
        let mut head = Object::new();
        head.insert("config", Value::Object(config));
        self.post_request(RequestKind::Config, head)
    }

    pub fn add_contact(&self, add_code: impl Into<String>, label: impl Into<String>, phone: impl Into<String>) -> u32 {
        let mut head = Object::new();
        head.insert("addCode", Value::from(add_code.into()));
        head.insert("label", Value::from(label.into()));
        head.insert("phone", Value::from(phone.into()));
        self.post_request(RequestKind::AddContact, head)
    }

    pub fn create_add_code(&self) -> u32 {
        self.post_request(RequestKind::CreateAddCode, Object::new())
    }

    pub fn find_contact(&self, query: impl Into<String>) -> u32 {
        let mut head = Object::new();
        head.insert("query", Value::from(query.into()));
        self.post_request(RequestKind::FindContact, head)
    }

    pub fn accept_contact(&self, request_id: u32) -> u32 {
        let mut head = Object::new();
        head.insert("origId", Value::from(request_id as i32));
        self.post_request(RequestKind::AcceptContact, head)
    }

    pub fn reject_contact(&self, request_id: u32) -> u32 {
        let mut head = Object::new();
        head.insert("origId", Value::from(request_id as i32));
        self.post_request(RequestKind::RejectContact, head)
    }

    pub fn request_contact_status(&self, contacts: &[u32]) -> u32 {
        let mut head = Object::new();
        head.insert("contacts", Value::Array(contacts.iter().map(|id| Value::from(*id as i32)).collect()));
        self.post_request(RequestKind::ContactStatus, head)
    }

    pub fn cancel_request(&self, request_id: u32) {
        self.requests.lock().remove(&request_id);
    }

    /// Enqueues a message for the sender thread to stream out. Requires
    /// an open store and the recipient's public key from the contact
    /// table (or the client's own, for `dst == own account id`).
    pub fn post_message(&self, message: Message) -> Result<u32, Error> {
        let store = self.store.get().ok_or(Error::WrongState("no open store"))?;
        let account = self.account.get().ok_or(Error::WrongState("not logged in"))?;
        let recipient_key = if message.dst == account.account_id {
            account.public_key.clone()
        } else {
            let contact = store.get_contact_by_id(message.dst)?.ok_or(Error::UnknownContact(message.dst))?;
            public_key_from_value(&contact.public_key)?
        };
        let dst = message.dst;
        let sender = MessageSender::init(store, account.account_id, &account.public_key, &account.private_key, message, &[(dst, recipient_key)])?;
        let message_id = sender.message_id();
        self.senders.lock().push(sender);
        self.wake.notify();
        Ok(message_id)
    }

    pub fn post_event(&self, event: Event) {
        self.dispatcher.emit(event);
    }

    fn post_request(&self, kind: RequestKind, head: Object) -> u32 {
        let id = shroud_crypto::mk_id().unwrap_or(1);
        self.requests.lock().insert(id, Request::new(id, kind, head));
        self.wake.notify();
        id
    }

    /// Like `post_request`, but the follow-up runs with `&self` once the
    /// response arrives, before the generic `RequestCompleted` event — used
    /// for kinds whose side effects this orchestrator must perform itself
    /// (CreateAccount's storage init, in particular).
    fn post_request_with_followup(&self, kind: RequestKind, head: Object, followup: impl FnOnce(&Client, &Object) + Send + 'static) -> u32 {
        let id = self.post_request(kind, head);
        self.followups.lock().unwrap().insert(id, Box::new(followup));
        id
    }

    // ─── Connect procedure ──────────────────────────────────────────────

    fn try_connect(&self) -> Result<(), Error> {
        self.status.set(ClientStatus::Connecting);
        tracing::debug!(host = %self.config.host, port = self.config.port, "connecting");
        match Connection::connect(&self.config.host, self.config.port, &self.config.tls_verification, &self.cancel) {
            Ok(conn) => {
                self.conn.set(Some(Arc::new(conn)));
                self.status.set(ClientStatus::Secure);
                self.last_recv.set(now());
                self.last_sent.set(0);
                if self.ever_connected.get() {
                    tracing::info!(host = %self.config.host, "reconnected");
                    self.dispatcher.emit(Event::Reconnected);
                } else {
                    self.ever_connected.set(true);
                    tracing::info!(host = %self.config.host, "connection established");
                    self.dispatcher.emit(Event::ConnectionSuccess);
                }
                Ok(())
            }
            Err(e) => {
                self.status.set(ClientStatus::Disconnected);
                tracing::warn!(error = %e, "connect attempt failed");
                self.dispatcher.emit(Event::ConnectionFailure(e.to_string()));
                Err(e)
            }
        }
    }

    fn reconnect_wait(&self) {
        tracing::debug!(interval_secs = self.config.reconnect_interval.as_secs(), "waiting before next reconnect attempt");
        let deadline = Instant::now() + self.config.reconnect_interval;
        while Instant::now() < deadline {
            if self.cancel.is_cancelled() {
                return;
            }
            std::thread::sleep(RECONNECT_POLL);
        }
    }

    // ─── Reader loop ────────────────────────────────────────────────────

    fn reader_loop(&self) {
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            if self.try_connect().is_err() {
                self.reconnect_wait();
                continue;
            }
            self.run_reader_session();
        }
    }

    fn run_reader_session(&self) {
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            let last_sent = self.last_sent.get();
            if last_sent > 0 && now() >= last_sent + self.config.heartbeat_timeout.as_secs() as i64 {
                tracing::warn!("heartbeat timed out, forcing reconnect");
                self.dispatcher.emit(Event::ConnectionInterrupted);
                self.status.set(ClientStatus::Disconnected);
                self.conn.set(None);
                return;
            }

            let Some(conn) = self.conn.get() else { return };
            match conn.read_packet() {
                Ok(None) => {}
                Ok(Some(packet)) => {
                    self.last_sent.set(0);
                    self.last_recv.set(now());
                    self.dispatch_packet(packet);
                }
                Err(_) => {
                    self.status.set(ClientStatus::Disconnected);
                    self.conn.set(None);
                    self.dispatcher.emit(Event::Disconnected);
                    return;
                }
            }

            let idle_request = self.requests.lock().values().any(|r| r.status == RequestStatus::Idle);
            let live_sender = !self.senders.lock().is_empty();
            let heartbeat_due = {
                let last_recv = self.last_recv.get();
                last_recv > 0 && now() >= last_recv + self.config.heartbeat_interval.as_secs() as i64
            };
            if idle_request || live_sender || heartbeat_due {
                self.wake.notify();
            }
        }
    }

    fn dispatch_packet(&self, packet: Packet) {
        match packet.kind {
            PacketKind::Heartbeat => {}
            PacketKind::Request => self.handle_request_packet(&packet),
            PacketKind::Message => self.handle_message_packet(&packet),
        }
    }

    fn handle_request_packet(&self, packet: &Packet) {
        let Ok(value) = Value::decode(&packet.head) else { return };
        let Some(head) = value.as_object() else { return };
        let Some(request_id) = head.get("requestId").and_then(Value::as_i32).map(|v| v as u32) else { return };
        let request_type = head.get("requestType").and_then(Value::as_str).unwrap_or_default();
        let status = head.get("status").and_then(Value::as_i32).unwrap_or(0);

        let live = self.requests.lock().contains_key(&request_id);
        if live {
            let kind_and_response = {
                let mut requests = self.requests.lock();
                requests.get_mut(&request_id).and_then(|r| r.process_recv(status, head.clone()).ok().map(|resp| (r.kind, resp)))
            };
            if let Some((kind, response)) = kind_and_response {
                if let Some(followup) = self.followups.lock().unwrap().remove(&request_id) {
                    followup(self, &response);
                }
                self.apply_request_side_effects(kind, status == 1, &response);
                if status == 1 {
                    self.dispatcher.emit(Event::RequestCompleted { request_id, kind, response });
                } else {
                    let message = response.get("message").and_then(Value::as_str).map(str::to_string);
                    tracing::warn!(request_id, kind = kind.as_str(), message = ?message, "request failed");
                    self.dispatcher.emit(Event::RequestFailed { request_id, kind, message, file: file!(), line: line!() });
                }
            }
            return;
        }

        match request_type {
            "AddContact" => self.handle_peer_add_contact(request_id, head),
            "AcceptContact" => self.handle_peer_accept_contact(request_id, head),
            "RejectContact" => self.handle_peer_reject_contact(head),
            "ContactStatus" => self.handle_peer_contact_status(head),
            _ => {}
        }
    }

    fn apply_request_side_effects(&self, kind: RequestKind, ok: bool, response: &Object) {
        if !ok {
            return;
        }
        match kind {
            RequestKind::Login => self.status.set(ClientStatus::LoggedIn),
            RequestKind::AddContact => {
                if let Some(store) = self.store.get() {
                    let _ = store.add_request(response.get("requestId").and_then(Value::as_i32).unwrap_or(0) as u32, &Value::Object(response.clone()));
                }
            }
            _ => {}
        }
    }

    fn handle_create_account(&self, storage_password: &str, label: &str, response: &Object) {
        let status = response.get("status").and_then(Value::as_i32).unwrap_or(0);
        if status != 1 {
            return;
        }
        let Some(account_id) = response.get("accountId").and_then(Value::as_i32).map(|v| v as u32) else { return };
        let account_pw = response.get("accountPw").cloned().unwrap_or(Value::Null);
        let path = storage_path(&self.config.storage_dir, label);
        let mut account_info = Object::new();
        account_info.insert("accountPw", account_pw);
        match Store::init(&path, storage_password, account_id, label, &Value::Object(account_info)) {
            Ok(store) => {
                let store = Arc::new(store);
                let public_key = store.public_key().clone();
                let private_key = store.private_key().clone();
                self.store.set(Some(store));
                self.account.set(Some(AccountContext { account_id, public_key, private_key }));
            }
            Err(e) => {
                self.dispatcher.emit(Event::Error { message: format!("storage init failed: {e}"), file: file!(), line: line!() });
            }
        }
    }

    fn handle_peer_add_contact(&self, request_id: u32, head: &Object) {
        let Some(store) = self.store.get() else { return };
        let _ = store.add_request(request_id, &Value::Object(head.clone()));
    }

    fn handle_peer_accept_contact(&self, request_id: u32, head: &Object) {
        let Some(store) = self.store.get() else { return };
        let orig_id = head.get("requestId").and_then(Value::as_i32).unwrap_or(request_id as i32) as u32;
        let contact_id = head.get("contactId").and_then(Value::as_i32).unwrap_or(0) as u32;
        let label = head.get("label").and_then(Value::as_str).unwrap_or_default().to_string();
        let public_key = head.get("publicKey").cloned().unwrap_or(Value::Null);
        let online = head.get("contactStatus").and_then(Value::as_i32).unwrap_or(0) == 1;

        let result = store.transaction(|tx| {
            tx.delete_request(orig_id)?;
            tx.add_contact(contact_id, &label, "", "", Some(&public_key))?;
            Ok(())
        });
        if result.is_err() {
            return;
        }
        self.presence.set(contact_id, online);
        self.dispatcher.emit(Event::ContactStatus { account_id: contact_id, online });
        if let Ok(config) = store.get_config() {
            self.set_config(config);
        }
        let mut dispatch_head = Object::new();
        dispatch_head.insert("requestDispatchId", Value::from(orig_id as i32));
        self.post_request(RequestKind::Dispatch, dispatch_head);
    }

    fn handle_peer_reject_contact(&self, head: &Object) {
        let Some(store) = self.store.get() else { return };
        if let Some(orig_id) = head.get("requestId").and_then(Value::as_i32) {
            let _ = store.delete_request(orig_id as u32);
        }
    }

    fn handle_peer_contact_status(&self, head: &Object) {
        let Some(account_id) = head.get("accountId").and_then(Value::as_i32).map(|v| v as u32) else { return };
        let online = head.get("online").and_then(Value::as_i32).unwrap_or(0) == 1;
        self.presence.set(account_id, online);
        self.dispatcher.emit(Event::ContactStatus { account_id, online });
    }

    fn handle_message_packet(&self, packet: &Packet) {
        let Ok(value) = Value::decode(&packet.head) else { return };
        let Some(head) = value.as_object() else { return };
        let Some(message_id) = head.get("messageId").and_then(Value::as_i32).map(|v| v as u32) else { return };
        let Some(src) = head.get("messageSrc").and_then(Value::as_i32).map(|v| v as u32) else { return };

        let Some(store) = self.store.get() else { return };
        let Some(account) = self.account.get() else { return };

        if !self.receivers.lock().contains_key(&message_id) {
            let sender_public = if src == account.account_id {
                account.public_key.clone()
            } else {
                match store.get_contact_by_id(src).ok().flatten().and_then(|c| public_key_from_value(&c.public_key).ok()) {
                    Some(k) => k,
                    None => return,
                }
            };
            match MessageReceiver::new(store.clone(), account.account_id, &account.private_key, &sender_public, src, head, &self.dispatcher) {
                Ok(receiver) => {
                    self.receivers.lock().insert(message_id, receiver);
                }
                Err(_) => return,
            }
        }

        let finished = {
            let mut receivers = self.receivers.lock();
            let Some(receiver) = receivers.get_mut(&message_id) else { return };
            let result = receiver.process(head, &packet.body, &self.dispatcher);
            result.is_err()
        };
        let done = self.receivers.lock().get(&message_id).map(MessageReceiver::is_complete).unwrap_or(true);
        if finished || done {
            self.receivers.lock().remove(&message_id);
        }
    }

    // ─── Sender loop ─────────────────────────────────────────────────────

    fn sender_loop(&self) {
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            self.wake.wait_timeout(Duration::from_secs(1));
            if self.cancel.is_cancelled() {
                return;
            }
            if self.status.get() < ClientStatus::Secure {
                std::thread::sleep(Duration::from_secs(1));
                continue;
            }
            self.sender_tick();
        }
    }

    fn sender_tick(&self) {
        let expired: Vec<u32> = {
            let mut requests = self.requests.lock();
            let mut expired = Vec::new();
            for (id, request) in requests.iter_mut() {
                if request.check_timeout() {
                    expired.push(*id);
                }
            }
            requests.retain(|_, r| !r.status.is_terminal());
            expired
        };
        for request_id in expired {
            tracing::info!(request_id, "request timed out");
            self.dispatcher.emit(Event::RequestTimeout { request_id });
        }

        let Some(conn) = self.conn.get() else { return };

        let idle_heads: Vec<Value> = {
            let mut requests = self.requests.lock();
            requests.values_mut().filter_map(|r| r.process_send()).collect()
        };
        let mut did_work = !idle_heads.is_empty();
        for head in idle_heads {
            if let Ok(encoded) = head.encode() {
                if let Ok(packet) = Packet::new(PacketKind::Request, encoded, Vec::new()) {
                    let _ = conn.write_frame(&packet.serialize());
                }
            }
        }

        let mut finished_senders = Vec::new();
        {
            let mut senders = self.senders.lock();
            for (index, sender) in senders.iter_mut().enumerate() {
                did_work = true;
                match sender.process(&self.dispatcher) {
                    Ok(Some(packet)) => {
                        let _ = conn.write_frame(&packet.serialize());
                    }
                    Ok(None) => {}
                    Err(e) => {
                        self.dispatcher.emit(Event::ResourceFailure { message_id: sender.message_id(), resource_id: 0 });
                        tracing::warn!(error = %e, "message sender failed");
                    }
                }
                if sender.is_done() {
                    finished_senders.push(index);
                }
            }
            for index in finished_senders.into_iter().rev() {
                senders.remove(index);
            }
        }

        if did_work {
            return;
        }

        let last_recv = self.last_recv.get();
        if last_recv > 0 && now() >= last_recv + self.config.heartbeat_interval.as_secs() as i64 {
            if conn.write_frame(&Packet::heartbeat().serialize()).is_ok() {
                self.last_sent.set(now());
                self.last_recv.set(0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn test_client() -> Client {
        Client::new(ClientConfig::new("localhost", std::env::temp_dir()))
    }

    fn request_packet(request_id: u32, request_type: &str, status: i32, message: Option<&str>) -> Packet {
        let mut head = Object::new();
        head.insert("requestId", Value::from(request_id as i32));
        head.insert("requestType", Value::from(request_type));
        head.insert("status", Value::from(status));
        if let Some(m) = message {
            head.insert("message", Value::from(m));
        }
        Packet::new(PacketKind::Request, Value::Object(head).encode().unwrap(), Vec::new()).unwrap()
    }

    /// §8 scenario 2's success half: a `{status:1}` Login response must
    /// echo its full head back to the caller and flip the client to
    /// `LoggedIn`.
    #[test]
    fn successful_response_emits_request_completed_with_echoed_response() {
        let client = test_client();
        let id = client.post_request(RequestKind::Login, Object::new());
        let (tx, rx) = mpsc::channel();
        client.set_event_handler(move |event| {
            let _ = tx.send(event);
        });
        client.handle_request_packet(&request_packet(id, "Login", 1, None));
        match rx.recv_timeout(Duration::from_secs(1)).unwrap() {
            Event::RequestCompleted { request_id, kind, response } => {
                assert_eq!(request_id, id);
                assert_eq!(kind, RequestKind::Login);
                assert_eq!(response.get("status").and_then(Value::as_i32), Some(1));
            }
            other => panic!("expected RequestCompleted, got {other:?}"),
        }
        assert_eq!(client.status(), ClientStatus::LoggedIn);
    }

    /// §8 scenario 2's failure half: a `{status:0, message:"bad pw"}`
    /// Login response must surface that message through a distinct
    /// failure event rather than an indistinguishable `RequestCompleted`,
    /// and must not flip the client to `LoggedIn`.
    #[test]
    fn failed_response_emits_request_failed_with_message() {
        let client = test_client();
        let id = client.post_request(RequestKind::Login, Object::new());
        let (tx, rx) = mpsc::channel();
        client.set_event_handler(move |event| {
            let _ = tx.send(event);
        });
        client.handle_request_packet(&request_packet(id, "Login", 0, Some("bad pw")));
        match rx.recv_timeout(Duration::from_secs(1)).unwrap() {
            Event::RequestFailed { request_id, kind, message, .. } => {
                assert_eq!(request_id, id);
                assert_eq!(kind, RequestKind::Login);
                assert_eq!(message.as_deref(), Some("bad pw"));
            }
            other => panic!("expected RequestFailed, got {other:?}"),
        }
        assert_ne!(client.status(), ClientStatus::LoggedIn);
    }

    /// §4.6 / §4.9.6: `FindContact`'s response is a transparent echo —
    /// the caller must be able to read fields out of it that the client
    /// orchestrator has no side effect for.
    #[test]
    fn find_contact_response_is_echoed_to_the_caller() {
        let client = test_client();
        let id = client.post_request(RequestKind::FindContact, Object::new());
        let mut head = Object::new();
        head.insert("requestId", Value::from(id as i32));
        head.insert("requestType", Value::from("FindContact"));
        head.insert("status", Value::from(1i32));
        head.insert("label", Value::from("alice"));
        let packet = Packet::new(PacketKind::Request, Value::Object(head).encode().unwrap(), Vec::new()).unwrap();

        let (tx, rx) = mpsc::channel();
        client.set_event_handler(move |event| {
            let _ = tx.send(event);
        });
        client.handle_request_packet(&packet);
        match rx.recv_timeout(Duration::from_secs(1)).unwrap() {
            Event::RequestCompleted { kind, response, .. } => {
                assert_eq!(kind, RequestKind::FindContact);
                assert_eq!(response.get("label").and_then(Value::as_str), Some("alice"));
            }
            other => panic!("expected RequestCompleted, got {other:?}"),
        }
    }
}
