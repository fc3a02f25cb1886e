//! Lock probes run on the watchdog's dedicated probe queue.
//!
//! A probe acquires and releases a resource the caller wants watched. If
//! the resource is deadlocked the probe never returns, the probe queue's
//! ping never completes, and the watchdog reports the probe by name.

use std::fmt;
use std::sync::Arc;

/// A caller-supplied resource acquisition check.
pub trait Probe: Send + Sync {
    /// Try to acquire the watched resource, then release it.
    fn probe(&self);

    /// Name used in blocked reports.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// A probe built from a closure.
pub struct FnProbe<F> {
    name: String,
    check: F,
}

impl<F> FnProbe<F>
where
    F: Fn() + Send + Sync,
{
    /// Create a named probe.
    pub fn new(name: impl Into<String>, check: F) -> Self {
        Self {
            name: name.into(),
            check,
        }
    }
}

impl<F> Probe for FnProbe<F>
where
    F: Fn() + Send + Sync,
{
    fn probe(&self) {
        (self.check)();
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<F> fmt::Debug for FnProbe<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnProbe").field("name", &self.name).finish()
    }
}

/// Probe that locks a shared `parking_lot` mutex and drops the guard.
pub struct MutexProbe<T> {
    name: String,
    lock: Arc<parking_lot::Mutex<T>>,
}

impl<T> MutexProbe<T> {
    /// Watch `lock` under `name`.
    pub fn new(name: impl Into<String>, lock: Arc<parking_lot::Mutex<T>>) -> Self {
        Self {
            name: name.into(),
            lock,
        }
    }
}

impl<T: Send> Probe for MutexProbe<T> {
    fn probe(&self) {
        drop(self.lock.lock());
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<T> fmt::Debug for MutexProbe<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutexProbe")
            .field("name", &self.name)
            .field("locked", &self.lock.is_locked())
            .finish()
    }
}

/// Shorthand for a shared [`FnProbe`].
pub fn probe_fn<F>(name: impl Into<String>, check: F) -> Arc<dyn Probe>
where
    F: Fn() + Send + Sync + 'static,
{
    Arc::new(FnProbe::new(name, check))
}

/// Identity comparison of two probe handles.
pub(crate) fn same_probe(a: &Arc<dyn Probe>, b: &Arc<dyn Probe>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counting(AtomicU32);

    impl Probe for Counting {
        fn probe(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_default_name_is_type_name() {
        let probe = Counting(AtomicU32::new(0));
        assert!(probe.name().ends_with("Counting"));
        probe.probe();
        assert_eq!(probe.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fn_probe() {
        let hits = Arc::new(AtomicU32::new(0));
        let probe_hits = Arc::clone(&hits);
        let probe = probe_fn("cache-lock", move || {
            probe_hits.fetch_add(1, Ordering::SeqCst);
        });
        probe.probe();
        probe.probe();
        assert_eq!(probe.name(), "cache-lock");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_mutex_probe_releases_lock() {
        let lock = Arc::new(parking_lot::Mutex::new(0_u32));
        let probe = MutexProbe::new("state", Arc::clone(&lock));
        probe.probe();
        assert!(!lock.is_locked());
        assert_eq!(probe.name(), "state");
    }

    #[test]
    fn test_same_probe_identity() {
        let a = probe_fn("a", || {});
        let b = probe_fn("a", || {});
        assert!(same_probe(&a, &Arc::clone(&a)));
        assert!(!same_probe(&a, &b));
    }
}
