//! Live contact presence: a mutex-guarded map from account id to
//! online/offline, updated by `ContactStatus` server pushes and read by
//! callers wanting a snapshot without going through the event stream.

use std::collections::HashMap;

use crate::thread_util::Shared;

#[derive(Clone, Default)]
pub struct PresenceMap {
    inner: Shared<HashMap<u32, bool>>,
}

impl PresenceMap {
    pub fn new() -> Self {
        PresenceMap { inner: Shared::new(HashMap::new()) }
    }

    pub fn set(&self, account_id: u32, online: bool) {
        self.inner.lock().insert(account_id, online);
    }

    pub fn is_online(&self, account_id: u32) -> bool {
        self.inner.lock().get(&account_id).copied().unwrap_or(false)
    }

    pub fn remove(&self, account_id: u32) {
        self.inner.lock().remove(&account_id);
    }

    pub fn snapshot(&self) -> HashMap<u32, bool> {
        self.inner.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_and_forgets_presence() {
        let presence = PresenceMap::new();
        assert!(!presence.is_online(7));
        presence.set(7, true);
        assert!(presence.is_online(7));
        presence.remove(7);
        assert!(!presence.is_online(7));
    }
}
