//! # Destroy Signal
//!
//! A one-shot notification list. Objects, connections and event loops each own
//! one and fire it exactly once when they are destroyed.
//!
//! ## Invariants
//!
//! - Each subscriber runs at most once. Firing takes a snapshot, runs it, and
//!   leaves the list empty.
//! - A subscriber that panics is logged and skipped; the rest still run.
//! - Subscribing after the signal fired drops the callback without running it.

use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::Weak;

use crate::error::Error;
use crate::error::Result;

type Callback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct State {
    next_key: u64,
    listeners: Vec<(u64, Callback)>,
    fired: bool,
}

#[derive(Clone, Default)]
pub struct Signal {
    state: Arc<Mutex<State>>,
}

/// Returned by [`Signal::subscribe`]; used to cancel the subscription.
#[derive(Clone, Debug)]
pub struct ListenerHandle {
    state: Weak<Mutex<State>>,
    key: u64,
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, callback: impl FnOnce() + Send + 'static) -> ListenerHandle {
        let mut state = lock(&self.state);
        let key = state.next_key;
        state.next_key += 1;
        if !state.fired {
            state.listeners.push((key, Box::new(callback)));
        }
        ListenerHandle { state: Arc::downgrade(&self.state), key }
    }

    /// Cancels `handle`. Returns whether it was still pending.
    pub fn unsubscribe(&self, handle: &ListenerHandle) -> bool {
        handle.unsubscribe()
    }

    /// Runs every pending subscriber once. Returns how many ran.
    ///
    /// `label` names the owner in logs and in the `AlreadyDestroyed` error.
    pub fn emit(&self, label: &str) -> Result<usize> {
        let snapshot = {
            let mut state = lock(&self.state);
            if state.fired {
                return Err(Error::AlreadyDestroyed(label.to_string()));
            }
            state.fired = true;
            std::mem::take(&mut state.listeners)
        };

        let count = snapshot.len();
        for (key, callback) in snapshot {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(callback)) {
                tracing::error!(
                    owner = label,
                    listener = key,
                    panic = %panic_message(payload.as_ref()),
                    "destroy listener panicked"
                );
            }
        }
        tracing::trace!(owner = label, count, "destroy signal fired");
        Ok(count)
    }

    pub fn is_fired(&self) -> bool {
        lock(&self.state).fired
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.state).listeners.len()
    }
}

impl ListenerHandle {
    /// Removes the subscription. A no-op once the signal fired.
    pub fn unsubscribe(&self) -> bool {
        let Some(state) = self.state.upgrade() else {
            return false;
        };
        let mut state = lock(&state);
        let before = state.listeners.len();
        state.listeners.retain(|(key, _)| *key != self.key);
        state.listeners.len() != before
    }

    /// Whether the callback is still waiting to run.
    pub fn is_active(&self) -> bool {
        match self.state.upgrade() {
            Some(state) => lock(&state).listeners.iter().any(|(key, _)| *key == self.key),
            None => false,
        }
    }
}

impl std::fmt::Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("Signal")
            .field("listeners", &state.listeners.len())
            .field("fired", &state.fired)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_unsubscribed_listener_does_not_fire() {
        let signal = Signal::new();
        let (a, on_a) = counter();
        let (b, on_b) = counter();
        let handle_a = signal.subscribe(on_a);
        signal.subscribe(on_b);

        assert!(signal.unsubscribe(&handle_a));
        assert_eq!(signal.emit("object").unwrap(), 1);
        assert_eq!(a.load(Ordering::SeqCst), 0);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_second_emit_is_error_and_does_not_refire() {
        let signal = Signal::new();
        let (count, on_destroy) = counter();
        signal.subscribe(on_destroy);

        signal.emit("object").unwrap();
        let err = signal.emit("object").unwrap_err();
        assert!(matches!(err, Error::AlreadyDestroyed(_)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(signal.is_fired());
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let signal = Signal::new();
        let (count, on_destroy) = counter();
        signal.subscribe(|| panic!("listener fault"));
        signal.subscribe(on_destroy);

        assert_eq!(signal.emit("object").unwrap(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handle_after_fire() {
        let signal = Signal::new();
        let (_, on_destroy) = counter();
        let handle = signal.subscribe(on_destroy);
        assert!(handle.is_active());
        assert_eq!(signal.listener_count(), 1);

        signal.emit("object").unwrap();
        assert!(!handle.is_active());
        assert!(!handle.unsubscribe());
        assert_eq!(signal.listener_count(), 0);
    }

    #[test]
    fn test_subscribe_after_fire_never_runs() {
        let signal = Signal::new();
        signal.emit("object").unwrap();
        let (count, on_destroy) = counter();
        let handle = signal.subscribe(on_destroy);
        assert!(!handle.is_active());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
