//! Observable State
//!
//! Two primitives for sharing state out of the acquisition worker:
//!
//! - [`Published<T>`]: a value replaced atomically as a whole, built on
//!   `tokio::sync::watch`. Readers clone the current value and never observe a
//!   half-written update. Async consumers can also `subscribe()` and await
//!   changes.
//! - [`ListenerRegistry<E>`]: a copy-on-write list of synchronous listeners.
//!   Notification walks the list as it was when notification started, in
//!   registration order. Listeners may be added or removed from any thread
//!   while a notification is in progress.
//!
//! # Example
//!
//! ```rust
//! use power_core::observable::{ListenerRegistry, Published};
//!
//! let value = Published::new(1u32);
//! let mut rx = value.subscribe();
//! value.replace(2);
//! assert_eq!(value.get(), 2);
//! assert!(rx.has_changed().unwrap());
//!
//! let registry: ListenerRegistry<u32> = ListenerRegistry::new();
//! let id = registry.subscribe(|v: &u32| {
//!     println!("got {v}");
//!     Ok(())
//! });
//! registry.notify(&3);
//! assert!(registry.unsubscribe(id));
//! ```
//!
//! # Failure Isolation
//!
//! A listener returning `Err` or panicking is logged and skipped; the
//! remaining listeners are still called and the caller is not affected.

use parking_lot::RwLock;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

// =============================================================================
// Published<T>
// =============================================================================

/// A value that is always replaced as a whole.
///
/// Clones share the same underlying channel.
pub struct Published<T>
where
    T: Clone + Send + Sync + 'static,
{
    sender: Arc<watch::Sender<T>>,
}

impl<T: Clone + Send + Sync + 'static> Clone for Published<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + fmt::Debug + 'static> fmt::Debug for Published<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Published")
            .field("value", &*self.sender.borrow())
            .finish()
    }
}

impl<T> Published<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(initial_value: T) -> Self {
        let (sender, _) = watch::channel(initial_value);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Get the current value (clone).
    pub fn get(&self) -> T {
        self.sender.borrow().clone()
    }

    /// Replace the value, returning the previous one.
    ///
    /// Succeeds whether or not anyone is subscribed.
    pub fn replace(&self, value: T) -> T {
        self.sender.send_replace(value)
    }

    /// Replace the value only if `f` reports a modification.
    ///
    /// Subscribers are woken only when `f` returns `true`.
    pub fn modify_if<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut T) -> bool,
    {
        self.sender.send_if_modified(f)
    }

    /// Subscribe to future replacements.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

// =============================================================================
// Listeners
// =============================================================================

/// A synchronous change listener.
///
/// Implemented for any `Fn(&E) -> anyhow::Result<()>` closure.
pub trait Listener<E>: Send + Sync {
    fn on_event(&self, event: &E) -> anyhow::Result<()>;
}

impl<E, F> Listener<E> for F
where
    F: Fn(&E) -> anyhow::Result<()> + Send + Sync,
{
    fn on_event(&self, event: &E) -> anyhow::Result<()> {
        self(event)
    }
}

/// Handle returned by [`ListenerRegistry::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

type Entries<E> = Arc<Vec<(ListenerId, Arc<dyn Listener<E>>)>>;

/// Copy-on-write listener list with registration-order delivery.
pub struct ListenerRegistry<E> {
    entries: RwLock<Entries<E>>,
    next_id: AtomicU64,
}

impl<E> Default for ListenerRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for ListenerRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

impl<E> ListenerRegistry<E> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Arc::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a closure listener. It will be called after every listener registered before it.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe_arc(Arc::new(listener))
    }

    /// Register a listener implementing [`Listener`].
    pub fn subscribe_listener<L>(&self, listener: L) -> ListenerId
    where
        L: Listener<E> + 'static,
    {
        self.subscribe_arc(Arc::new(listener))
    }

    /// Register a shared listener.
    pub fn subscribe_arc(&self, listener: Arc<dyn Listener<E>>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut guard = self.entries.write();
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push((id, listener));
        *guard = Arc::new(next);
        id
    }

    /// Remove a listener. Returns `false` if it was not registered.
    ///
    /// A notification already in progress may still call the listener once.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut guard = self.entries.write();
        if !guard.iter().any(|(entry_id, _)| *entry_id == id) {
            return false;
        }
        let next: Vec<_> = guard
            .iter()
            .filter(|(entry_id, _)| *entry_id != id)
            .cloned()
            .collect();
        *guard = Arc::new(next);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Deliver `event` to every listener registered at the time of the call.
    ///
    /// Returns the number of listeners that failed.
    pub fn notify(&self, event: &E) -> usize {
        let entries = self.entries.read().clone();
        let mut failures = 0;
        for (id, listener) in entries.iter() {
            match catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    tracing::error!(listener = %id, error = %e, "Listener failed");
                }
                Err(_) => {
                    failures += 1;
                    tracing::error!(listener = %id, "Listener panicked");
                }
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use parking_lot::Mutex;
    use tracing_test::traced_test;

    #[test]
    fn test_published_replace_returns_previous() {
        let value = Published::new(10);
        assert_eq!(value.replace(20), 10);
        assert_eq!(value.get(), 20);
    }

    #[test]
    fn test_published_clone_shares_value() {
        let value = Published::new("a".to_string());
        let clone = value.clone();
        value.replace("b".to_string());
        assert_eq!(clone.get(), "b");
    }

    #[tokio::test]
    async fn test_published_subscriber_sees_change() {
        let value = Published::new(0u32);
        let mut rx = value.subscribe();
        assert_eq!(value.subscriber_count(), 1);

        let writer = value.clone();
        tokio::spawn(async move {
            writer.replace(7);
        });

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 7);
    }

    #[test]
    fn test_modify_if_skips_unchanged() {
        let value = Published::new(5);
        let mut rx = value.subscribe();
        assert!(!value.modify_if(|_| false));
        assert!(!rx.has_changed().unwrap());
        assert!(value.modify_if(|v| {
            *v = 6;
            true
        }));
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn test_registration_order() {
        let registry: ListenerRegistry<u8> = ListenerRegistry::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let calls = calls.clone();
            registry.subscribe(move |_: &u8| {
                calls.lock().push(tag);
                Ok(())
            });
        }

        assert_eq!(registry.notify(&1), 0);
        assert_eq!(*calls.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_unsubscribe() {
        let registry: ListenerRegistry<u8> = ListenerRegistry::new();
        let id = registry.subscribe(|_: &u8| Ok(()));
        assert_eq!(registry.len(), 1);
        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        assert!(registry.is_empty());
    }

    #[traced_test]
    #[test]
    fn test_failing_listener_is_isolated() {
        let registry: ListenerRegistry<u8> = ListenerRegistry::new();
        let reached = Arc::new(Mutex::new(0u32));

        registry.subscribe(|_: &u8| Err(anyhow!("boom")));
        registry.subscribe(|_: &u8| -> anyhow::Result<()> { panic!("listener panic") });
        let counter = reached.clone();
        registry.subscribe(move |_: &u8| {
            *counter.lock() += 1;
            Ok(())
        });

        assert_eq!(registry.notify(&0), 2);
        assert_eq!(*reached.lock(), 1);
        assert!(logs_contain("Listener failed"));
        assert!(logs_contain("Listener panicked"));
    }

    #[test]
    fn test_subscribe_during_notify_is_deferred() {
        let registry: Arc<ListenerRegistry<u8>> = Arc::new(ListenerRegistry::new());
        let late_calls = Arc::new(Mutex::new(0u32));

        let inner_registry = registry.clone();
        let inner_calls = late_calls.clone();
        registry.subscribe(move |_: &u8| {
            let calls = inner_calls.clone();
            inner_registry.subscribe(move |_: &u8| {
                *calls.lock() += 1;
                Ok(())
            });
            Ok(())
        });

        registry.notify(&0);
        assert_eq!(*late_calls.lock(), 0);
        assert_eq!(registry.len(), 2);

        registry.notify(&0);
        assert_eq!(*late_calls.lock(), 1);
    }
}
