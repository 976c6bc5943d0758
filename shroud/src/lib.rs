//! # shroud — end-to-end encrypted messenger client core
//!
//! `shroud` is the concurrency and protocol engine plus the encrypted
//! storage engine for an E2EE messenger client. It wires together five
//! focused sub-crates:
//!
//! | Sub-crate       | Role                                                     |
//! |-----------------|-----------------------------------------------------------|
//! | `shroud-buffer` | Value-semantic byte buffer + locked-memory allocator      |
//! | `shroud-value`  | Schema-less tagged value tree, binary encode/decode        |
//! | `shroud-crypto` | AES-CTR, MD5/SHA-256, RSA, CSPRNG                          |
//! | `shroud-proto`  | Wire packet framing                                        |
//! | `shroud-store`  | Encrypted SQLite-backed node store                         |
//! | `shroud-client` | Connection engine, request tracker, message pipeline, `Client` |
//!
//! ## Quick start
//!
//! ```no_run
//! use shroud::client::{Client, ClientConfig, Event};
//!
//! let config = ClientConfig::new("relay.example.org", "/var/lib/shroud");
//! let client = Client::new(config);
//! client.set_event_handler(|event| match event {
//!     Event::ConnectionSuccess => println!("connected"),
//!     _ => {}
//! });
//! client.connect();
//! ```
//!
//! Creating and opening local storage:
//!
//! ```no_run
//! use shroud::store::Store;
//! use shroud::value::Value;
//!
//! # fn run() -> Result<(), shroud::store::Error> {
//! let store = Store::init("/var/lib/shroud/alice.store", "hunter2", 42, "alice", &Value::Null)?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

/// Re-export of [`shroud_buffer`] — the value-semantic byte buffer and
/// locked-memory allocator.
pub use shroud_buffer as buffer;

/// Re-export of [`shroud_value`] — the tagged value tree used for every
/// on-wire and in-storage metadata blob.
pub use shroud_value as value;

/// Re-export of [`shroud_crypto`] — AES-CTR, digests, RSA, CSPRNG.
pub use shroud_crypto as crypto;

/// Re-export of [`shroud_proto`] — the wire packet frame.
pub use shroud_proto as proto;

/// Re-export of [`shroud_store`] — the encrypted node store.
pub use shroud_store as store;

/// Re-export of [`shroud_client`] — the connection engine and `Client`
/// orchestrator.
pub use shroud_client as client;

// ─── Convenience re-exports ────────────────────────────────────────────

pub use shroud_client::{Client, ClientConfig, ClientStatus, Event, TlsVerification};
pub use shroud_client::{Message, MessageReceiver, MessageSender, Resource};
pub use shroud_store::{Contact, ResourceType, Store};
pub use shroud_value::{Object, Value};
