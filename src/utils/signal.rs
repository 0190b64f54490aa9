//! Observable value holder with explicit, scoped subscriptions.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct SignalInner<T> {
    value: T,
    next_id: u64,
    subscribers: Vec<(u64, Callback<T>)>,
}

/// A value that notifies subscribers whenever it is replaced.
///
/// Cloning a `Signal` yields another handle to the same value. Callbacks run
/// on the thread that calls [`Signal::set`], after the new value is stored,
/// and never while the internal lock is held, so a callback may read the
/// signal again.
pub struct Signal<T> {
    inner: Arc<Mutex<SignalInner<T>>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("Signal")
            .field("value", &inner.value)
            .field("subscribers", &inner.subscribers.len())
            .finish()
    }
}

fn lock<T>(inner: &Mutex<SignalInner<T>>) -> MutexGuard<'_, SignalInner<T>> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Clone + Send + 'static> Signal<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SignalInner {
                value,
                next_id: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Current value
    pub fn get(&self) -> T {
        lock(&self.inner).value.clone()
    }

    /// Read the current value without cloning it
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&lock(&self.inner).value)
    }

    /// Replace the value and notify subscribers
    pub fn set(&self, value: T) {
        let (value, subscribers) = {
            let mut inner = lock(&self.inner);
            inner.value = value;
            let subscribers: Vec<Callback<T>> =
                inner.subscribers.iter().map(|(_, cb)| Arc::clone(cb)).collect();
            (inner.value.clone(), subscribers)
        };

        for callback in subscribers {
            callback(&value);
        }
    }

    /// Modify the value in place and notify subscribers
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let mut value = self.get();
        f(&mut value);
        self.set(value);
    }

    /// Register a callback; it stays registered until the returned guard is dropped
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = {
            let mut inner = lock(&self.inner);
            let id = inner.next_id;
            inner.next_id += 1;
            inner.subscribers.push((id, Arc::new(callback)));
            id
        };

        let weak: Weak<Mutex<SignalInner<T>>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                lock(&inner).subscribers.retain(|(sid, _)| *sid != id);
            }
        })
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner).subscribers.len()
    }
}

/// Guard returned by [`Signal::subscribe`]; unsubscribes on drop
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Unsubscribe now
    pub fn unsubscribe(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_get_set() {
        let signal = Signal::new(1);
        assert_eq!(signal.get(), 1);
        signal.set(2);
        assert_eq!(signal.get(), 2);
        signal.update(|v| *v += 3);
        assert_eq!(signal.get(), 5);
        assert_eq!(signal.with(|v| *v * 2), 10);
    }

    #[test]
    fn test_subscribers_are_notified_until_dropped() {
        let signal = Signal::new(String::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let counter = Arc::clone(&calls);
        let sink = Arc::clone(&seen);
        let subscription = signal.subscribe(move |value: &String| {
            counter.fetch_add(1, Ordering::SeqCst);
            sink.lock().unwrap().push(value.clone());
        });
        assert_eq!(signal.subscriber_count(), 1);

        signal.set("a".to_string());
        signal.set("b".to_string());
        drop(subscription);
        signal.set("c".to_string());

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn test_explicit_unsubscribe() {
        let signal = Signal::new(0);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let subscription = signal.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        subscription.unsubscribe();
        signal.set(1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_callback_can_read_signal() {
        let signal = Signal::new(0);
        let reader = signal.clone();
        let observed = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&observed);
        let _subscription = signal.subscribe(move |_| {
            sink.store(reader.get(), Ordering::SeqCst);
        });

        signal.set(42);
        assert_eq!(observed.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn test_guard_outliving_signal_is_harmless() {
        let signal = Signal::new(0);
        let subscription = signal.subscribe(|_| {});
        drop(signal);
        drop(subscription);
    }
}
