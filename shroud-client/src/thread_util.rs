//! Small concurrency primitives shared by the reader/sender/dispatcher
//! threads: a mutex-guarded value wrapper, and a cancellable thread base.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

/// A value shared between threads behind a mutex, with a terser call
/// surface than `Arc<Mutex<T>>` at every use site.
#[derive(Debug)]
pub struct Shared<T> {
    inner: Arc<Mutex<T>>,
}

impl<T> Shared<T> {
    pub fn new(value: T) -> Self {
        Shared { inner: Arc::new(Mutex::new(value)) }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.lock().clone()
    }

    pub fn set(&self, value: T) {
        *self.lock() = value;
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Shared { inner: Arc::clone(&self.inner) }
    }
}

/// A cooperative stop flag, checked by a worker loop between blocking
/// operations (or passed to a select/poll timeout as the cancellation
/// condition).
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken { flag: Arc::new(AtomicBool::new(false)) }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// A named background thread that can be asked to stop and joined once.
pub struct CancellableThread {
    name: &'static str,
    cancel: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl CancellableThread {
    pub fn spawn(name: &'static str, f: impl FnOnce(CancelToken) + Send + 'static) -> Self {
        let cancel = CancelToken::new();
        let cancel_for_thread = cancel.clone();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || f(cancel_for_thread))
            .expect("failed to spawn thread");
        CancellableThread { name, cancel, handle: Some(handle) }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Signals cancellation and blocks until the thread exits.
    pub fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!(thread = self.name, "worker thread panicked");
            }
        }
    }
}

impl Drop for CancellableThread {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn shared_value_round_trips() {
        let shared = Shared::new(0i32);
        shared.set(7);
        assert_eq!(shared.get(), 7);
    }

    #[test]
    fn cancellable_thread_stops_promptly() {
        let (tx, rx) = mpsc::channel();
        let thread = CancellableThread::spawn("test-worker", move |cancel| {
            while !cancel.is_cancelled() {
                std::thread::sleep(Duration::from_millis(5));
            }
            let _ = tx.send(());
        });
        thread.stop();
        assert!(rx.recv_timeout(Duration::from_secs(1)).is_ok());
    }
}
