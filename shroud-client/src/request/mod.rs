//! Abstract correlated RPC: a typed kind, a head map, a timeout, and a
//! state machine driven by the sender/reader threads.

use shroud_value::{Object, Value};

use crate::errors::Error;

pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestKind {
    Dispatch,
    CreateAccount,
    Login,
    Config,
    AddContact,
    CreateAddCode,
    FindContact,
    AcceptContact,
    RejectContact,
    ContactStatus,
    GetInbox,
    GetMessage,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::Dispatch => "Dispatch",
            RequestKind::CreateAccount => "CreateAccount",
            RequestKind::Login => "Login",
            RequestKind::Config => "Config",
            RequestKind::AddContact => "AddContact",
            RequestKind::CreateAddCode => "CreateAddCode",
            RequestKind::FindContact => "FindContact",
            RequestKind::AcceptContact => "AcceptContact",
            RequestKind::RejectContact => "RejectContact",
            RequestKind::ContactStatus => "ContactStatus",
            RequestKind::GetInbox => "GetInbox",
            RequestKind::GetMessage => "GetMessage",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestStatus {
    Inactive,
    Idle,
    Sending,
    WaitingForResponse,
    Completed,
    Timeout,
    Error,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Timeout | RequestStatus::Error)
    }
}

/// A single outbound correlated operation, owned by the client's request
/// map until it reaches a terminal status.
pub struct Request {
    pub id: u32,
    pub kind: RequestKind,
    pub status: RequestStatus,
    pub timeout: std::time::Duration,
    pub start_time: std::time::Instant,
    pub head: Object,
}

impl Request {
    pub fn new(id: u32, kind: RequestKind, head: Object) -> Self {
        Request {
            id,
            kind,
            status: RequestStatus::Idle,
            timeout: std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            start_time: std::time::Instant::now(),
            head,
        }
    }

    /// Framed head for a fresh send: `requestId` + `requestType` plus the
    /// kind-specific fields already present in `self.head`.
    pub fn send_head(&self) -> Value {
        let mut head = self.head.clone();
        head.insert("requestId", Value::from(self.id as i32));
        head.insert("requestType", Value::from(self.kind.as_str()));
        Value::Object(head)
    }

    /// Called repeatedly by the sender thread. Transitions Idle →
    /// Sending → WaitingForResponse on a successful frame-and-send;
    /// returns the framed head to send, or `None` if there is nothing to
    /// do this tick.
    pub fn process_send(&mut self) -> Option<Value> {
        if self.status != RequestStatus::Idle {
            return None;
        }
        self.status = RequestStatus::Sending;
        let head = self.send_head();
        self.status = RequestStatus::WaitingForResponse;
        Some(head)
    }

    /// Called by the reader thread when an inbound Request-kind packet's
    /// `requestId` matches. `status` is the server's integer status field
    /// (1=success, 0=failure); `response` is the rest of the head.
    pub fn process_recv(&mut self, status: i32, response: Object) -> Result<Object, Error> {
        if self.status != RequestStatus::WaitingForResponse {
            return Err(Error::WrongState("request not awaiting a response"));
        }
        self.status = if status == 1 { RequestStatus::Completed } else { RequestStatus::Error };
        Ok(response)
    }

    /// Checked on each maintenance pass; transitions to Timeout if the
    /// deadline has passed and the request isn't mid-send.
    pub fn check_timeout(&mut self) -> bool {
        if self.status == RequestStatus::Sending {
            return false;
        }
        if self.status.is_terminal() {
            return false;
        }
        if self.start_time.elapsed() > self.timeout {
            self.status = RequestStatus::Timeout;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_then_recv_completes() {
        let mut req = Request::new(42, RequestKind::Login, Object::new());
        let head = req.process_send().unwrap();
        assert_eq!(head.as_object().unwrap().get("requestId").and_then(Value::as_i32), Some(42));
        assert_eq!(req.status, RequestStatus::WaitingForResponse);

        let response = req.process_recv(1, Object::new()).unwrap();
        assert!(response.is_empty());
        assert_eq!(req.status, RequestStatus::Completed);
    }

    #[test]
    fn recv_before_send_is_rejected() {
        let mut req = Request::new(1, RequestKind::Dispatch, Object::new());
        assert!(req.process_recv(1, Object::new()).is_err());
    }

    #[test]
    fn failure_status_transitions_to_error() {
        let mut req = Request::new(2, RequestKind::AddContact, Object::new());
        req.process_send();
        req.process_recv(0, Object::new()).unwrap();
        assert_eq!(req.status, RequestStatus::Error);
    }

    #[test]
    fn timeout_fires_after_deadline_elapses() {
        let mut req = Request::new(3, RequestKind::GetInbox, Object::new());
        req.timeout = std::time::Duration::from_millis(1);
        req.process_send();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(req.check_timeout());
        assert_eq!(req.status, RequestStatus::Timeout);
    }
}
