//! # shroud-client
//!
//! Connection engine, request tracker, and message streaming pipeline for
//! an end-to-end encrypted messenger client.
//!
//! ## Features
//! - TCP+TLS transport with pluggable server certificate verification
//! - Reconnecting reader/sender thread pair driven by a single `Client`
//! - Correlated request/response tracking with timeouts
//! - Chunked, encrypted, signed message and resource streaming backed by
//!   [`shroud_store`]
//! - Contact presence tracking and an async event dispatcher
//!
//! ## Quick start
//!
//! ```no_run
//! use shroud_client::{Client, ClientConfig, Event};
//!
//! let config = ClientConfig::new("relay.example.org", "/var/lib/shroud");
//! let client = Client::new(config);
//! client.set_event_handler(|event| match event {
//!     Event::ConnectionSuccess => println!("connected"),
//!     _ => {}
//! });
//! client.connect();
//! ```

mod client;
mod connection;
mod contact;
mod errors;
mod event;
mod message;
mod request;
mod thread_util;

pub use client::{Client, ClientConfig, ClientStatus, HEARTBEAT_INTERVAL, HEARTBEAT_TIMEOUT, RECONNECT_INTERVAL};
pub use connection::{Connection, TlsVerification, DEFAULT_PORT};
pub use contact::PresenceMap;
pub use errors::Error;
pub use event::{Dispatcher, Event, Handler};
pub use message::{Message, MessageReceiver, MessageSender, Resource};
pub use request::{Request, RequestKind, RequestStatus};
pub use thread_util::{CancelToken, CancellableThread, Shared};
