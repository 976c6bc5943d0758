//! Event dispatcher: a FIFO of observable events, delivered to registered
//! handlers on a dedicated thread (or inline, for callers that need
//! ordering relative to the call that raised the event).

use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex};

use shroud_value::Object;

use crate::request::RequestKind;
use crate::thread_util::CancellableThread;

/// Everything the client layer can report back to the application.
#[derive(Clone, Debug)]
pub enum Event {
    ConnectionSuccess,
    ConnectionFailure(String),
    ConnectionInterrupted,
    Reconnected,
    Disconnected,
    RequestTimeout { request_id: u32 },
    /// A request's response carried `status: 1`; `response` is the full
    /// decoded head, the "transparent echo to the caller" the spec's
    /// per-kind response discipline requires for `Config`/`FindContact`/
    /// `Dispatch` (and every other kind's caller besides).
    RequestCompleted { request_id: u32, kind: RequestKind, response: Object },
    /// A request's response carried `status: 0`, or the request map had
    /// no entry to begin with. `message` is the response's optional
    /// `message` field, mirrored alongside `file`/`line` the way
    /// [`Event::Error`] reports every other non-request failure.
    RequestFailed { request_id: u32, kind: RequestKind, message: Option<String>, file: &'static str, line: u32 },
    MessageIncoming { message_id: u32 },
    MessageSent { message_id: u32 },
    MessageRecv { message_id: u32 },
    ResourceSent { message_id: u32, resource_id: u32 },
    ResourceRecv { message_id: u32, resource_id: u32, replaced: Option<(u32, u32)> },
    ResourceFailure { message_id: u32, resource_id: u32 },
    ContactStatus { account_id: u32, online: bool },
    Error { message: String, file: &'static str, line: u32 },
}

pub type Handler = Box<dyn Fn(Event) + Send + 'static>;

/// FIFO event queue drained by a dedicated thread, with an `immediate`
/// bypass for callers that need the handler invoked synchronously on the
/// calling thread instead of queued.
pub struct Dispatcher {
    tx: Sender<Event>,
    handlers: Arc<Mutex<Vec<Handler>>>,
    worker: Option<CancellableThread>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (tx, rx) = channel::<Event>();
        let handlers: Arc<Mutex<Vec<Handler>>> = Arc::new(Mutex::new(Vec::new()));
        let handlers_for_thread = Arc::clone(&handlers);
        let worker = CancellableThread::spawn("event-dispatcher", move |cancel| {
            while !cancel.is_cancelled() {
                match rx.recv_timeout(std::time::Duration::from_millis(200)) {
                    Ok(event) => {
                        for handler in handlers_for_thread.lock().unwrap().iter() {
                            handler(event.clone());
                        }
                    }
                    Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
                    Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
        });
        Dispatcher { tx, handlers, worker: Some(worker) }
    }

    pub fn on_event(&self, handler: impl Fn(Event) + Send + 'static) {
        self.handlers.lock().unwrap().push(Box::new(handler));
    }

    /// Queues `event` for asynchronous delivery on the dispatcher thread.
    pub fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    /// Invokes every registered handler inline, bypassing the queue. Used
    /// where the caller needs the handler to observe state before the
    /// call that raised the event returns.
    pub fn emit_immediate(&self, event: Event) {
        for handler in self.handlers.lock().unwrap().iter() {
            handler(event.clone());
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Dispatcher::new()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn handler_receives_queued_events() {
        let dispatcher = Dispatcher::new();
        let (tx, rx) = mpsc::channel();
        dispatcher.on_event(move |event| {
            let _ = tx.send(event);
        });
        dispatcher.emit(Event::ConnectionSuccess);
        let event = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(matches!(event, Event::ConnectionSuccess));
    }

    #[test]
    fn immediate_emit_bypasses_queue() {
        let dispatcher = Dispatcher::new();
        let seen = Arc::new(Mutex::new(false));
        let seen_clone = Arc::clone(&seen);
        dispatcher.on_event(move |_| {
            *seen_clone.lock().unwrap() = true;
        });
        dispatcher.emit_immediate(Event::Disconnected);
        assert!(*seen.lock().unwrap());
    }
}
