//! shroud-cli — bootstrap binary exercising the full client flow (account
//! creation, login, add-contact, send/receive) against a running relay.
//!
//! This binary is deliberately thin: it owns argument parsing, config
//! loading, and blocking-on-events glue. All protocol and storage logic
//! lives in the `shroud` library crates.
//!
//! ```text
//! shroud-cli create-account <label> <password>
//! shroud-cli login <store-file> <password>
//! shroud-cli send <store-file> <password> <dst-account-id> <file-path>
//! shroud-cli listen <store-file> <password>
//! ```

mod config;

use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use shroud::client::{Client, ClientConfig, Event};
use shroud::store::{ResourceType, Store};
use shroud::value::{Object, Value};
use shroud::{Message, Resource};

const CONFIG_FILE: &str = "shroud.toml";
const EVENT_WAIT: Duration = Duration::from_secs(30);

fn main() {
    if std::env::var("RUST_LOG").is_err() {
        // SAFETY: single-threaded at this point in `main`, before any
        // worker thread is spawned.
        unsafe { std::env::set_var("RUST_LOG", "shroud_client=info,shroud_cli=info") };
    }
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cfg = config::Config::load(CONFIG_FILE)?;

    match args.first().map(String::as_str) {
        Some("create-account") => {
            let label = args.get(1).ok_or("usage: create-account <label> <password>")?;
            let password = args.get(2).ok_or("usage: create-account <label> <password>")?;
            create_account(cfg, label, password)
        }
        Some("login") => {
            let store_file = args.get(1).ok_or("usage: login <store-file> <password>")?;
            let password = args.get(2).ok_or("usage: login <store-file> <password>")?;
            login_and_wait(cfg, store_file.into(), password)?;
            Ok(())
        }
        Some("send") => {
            let store_file = args.get(1).ok_or("usage: send <store-file> <password> <dst> <file-path>")?;
            let password = args.get(2).ok_or("usage: send <store-file> <password> <dst> <file-path>")?;
            let dst: u32 = args.get(3).ok_or("usage: send <store-file> <password> <dst> <file-path>")?.parse()?;
            let file_path = args.get(4).ok_or("usage: send <store-file> <password> <dst> <file-path>")?;
            send(cfg, store_file.into(), password, dst, file_path)
        }
        Some("listen") => {
            let store_file = args.get(1).ok_or("usage: listen <store-file> <password>")?;
            let password = args.get(2).ok_or("usage: listen <store-file> <password>")?;
            listen(cfg, store_file.into(), password)
        }
        _ => {
            eprintln!("usage: shroud-cli <create-account|login|send|listen> ...");
            std::process::exit(2);
        }
    }
}

fn new_client(cfg: config::Config) -> Client {
    let mut client_config = ClientConfig::new(cfg.host, cfg.storage_dir);
    client_config.port = cfg.port;
    client_config.tls_verification = cfg.tls_verification;
    client_config.heartbeat_interval = cfg.heartbeat_interval;
    client_config.heartbeat_timeout = cfg.heartbeat_timeout;
    client_config.reconnect_interval = cfg.reconnect_interval;
    Client::new(client_config)
}

/// Drives `client.connect()` and blocks until `ConnectionSuccess` or
/// `ConnectionFailure`, forwarding every other event to `on_event`.
fn connect_and_wait(client: &Client, on_event: impl Fn(Event) + Send + 'static) -> Result<(), Box<dyn std::error::Error>> {
    let (tx, rx) = mpsc::channel();
    client.set_event_handler(move |event| {
        if matches!(event, Event::ConnectionSuccess | Event::ConnectionFailure(_)) {
            let _ = tx.send(event.clone());
        }
        on_event(event);
    });
    client.connect();
    match rx.recv_timeout(EVENT_WAIT) {
        Ok(Event::ConnectionSuccess) => Ok(()),
        Ok(Event::ConnectionFailure(reason)) => Err(format!("connect failed: {reason}").into()),
        _ => Err("timed out waiting to connect".into()),
    }
}

/// Registers a handler that watches for `post`'s request to complete,
/// runs `post` to obtain its request id, then blocks for that id's
/// outcome: `Ok(response)` on `RequestCompleted`'s echoed head,
/// `Err(message)` on `RequestFailed`'s carried `message` (the spec's
/// `{status:0, message}` response discipline, surfaced to the caller
/// instead of silently dropped).
fn await_request(client: &Client, post: impl FnOnce(&Client) -> u32) -> Result<Object, Box<dyn std::error::Error>> {
    let (tx, rx) = mpsc::channel();
    let expected = Arc::new(Mutex::new(None));
    let expected_for_handler = Arc::clone(&expected);
    client.set_event_handler(move |event| {
        let Some(expected_id) = *expected_for_handler.lock().unwrap() else { return };
        match event {
            Event::RequestCompleted { request_id, response, .. } if request_id == expected_id => {
                let _ = tx.send(Ok(response));
            }
            Event::RequestFailed { request_id, message, .. } if request_id == expected_id => {
                let _ = tx.send(Err(message.unwrap_or_else(|| "request failed".to_string())));
            }
            _ => {}
        }
    });
    *expected.lock().unwrap() = Some(post(client));
    rx.recv_timeout(EVENT_WAIT).map_err(|_| "timed out waiting for a response")?.map_err(Into::into)
}

fn create_account(cfg: config::Config, label: &str, password: &str) -> Result<(), Box<dyn std::error::Error>> {
    let client = new_client(cfg);
    connect_and_wait(&client, |event| tracing::debug!(?event, "event"))?;

    await_request(&client, |client| {
        let mut account_info = Object::new();
        account_info.insert("label", Value::from(label));
        account_info.insert("findByLabel", Value::from(true));
        account_info.insert("findByPhone", Value::from(false));
        client.create_account(account_info, password)
    })?;
    println!("account {label:?} created");
    client.cancel_and_join();
    Ok(())
}

fn open_and_login(cfg: config::Config, store_file: PathBuf, password: &str) -> Result<(Client, std::sync::Arc<Store>), Box<dyn std::error::Error>> {
    let store = std::sync::Arc::new(Store::open(&store_file, password)?);
    let client = new_client(cfg);
    connect_and_wait(&client, |event| tracing::debug!(?event, "event"))?;

    let login_store = store.clone();
    await_request(&client, move |client| client.login(login_store))?;
    Ok((client, store))
}

fn login_and_wait(cfg: config::Config, store_file: PathBuf, password: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (client, store) = open_and_login(cfg, store_file, password)?;
    println!("logged in as {} ({})", store.account_label(), store.account_id());
    client.cancel_and_join();
    Ok(())
}

fn send(cfg: config::Config, store_file: PathBuf, password: &str, dst: u32, file_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (client, store) = open_and_login(cfg, store_file, password)?;

    let (tx, rx) = mpsc::channel();
    client.set_event_handler(move |event| {
        if let Event::MessageSent { .. } | Event::ResourceFailure { .. } = event {
            let _ = tx.send(event.clone());
        }
    });

    let history = store.latest_history(dst)?;
    let mut message = Message::new(history, store.account_id(), dst);
    let data = std::fs::read(file_path)?;
    let name = PathBuf::from(file_path).file_name().and_then(|n| n.to_str()).unwrap_or("file").to_string();
    let mut resource = Resource::new(ResourceType::File, name);
    resource.set_data(data);
    message.add_resource(resource);
    client.post_message(message)?;

    match rx.recv_timeout(EVENT_WAIT) {
        Ok(Event::MessageSent { message_id }) => println!("message {message_id} sent"),
        Ok(Event::ResourceFailure { .. }) => return Err("resource send failed".into()),
        _ => return Err("timed out waiting for message to finish sending".into()),
    }
    client.cancel_and_join();
    Ok(())
}

fn listen(cfg: config::Config, store_file: PathBuf, password: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (client, _store) = open_and_login(cfg, store_file, password)?;
    client.set_event_handler(|event| match event {
        Event::MessageIncoming { message_id } => println!("incoming message {message_id}"),
        Event::MessageRecv { message_id } => println!("message {message_id} fully received"),
        Event::ResourceRecv { message_id, resource_id, replaced } => {
            println!("resource {resource_id} of message {message_id} received (replaced={replaced:?})")
        }
        Event::ContactStatus { account_id, online } => println!("contact {account_id} is now {}", if online { "online" } else { "offline" }),
        Event::Error { message, .. } => eprintln!("error: {message}"),
        _ => {}
    });
    println!("listening; press Ctrl+C to stop");
    loop {
        std::thread::sleep(Duration::from_secs(1));
    }
}
