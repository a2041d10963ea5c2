//! Value fixtures

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Mutable counter used as a slot value.
///
/// Interior mutability lets a branch change the value it was handed, which is
/// how tests tell two branches' instances apart.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicI64,
}

impl Counter {
    /// A counter holding `start`
    pub fn new(start: i64) -> Self {
        Self {
            value: AtomicI64::new(start),
        }
    }

    /// Add one and return the new value
    pub fn increment(&self) -> i64 {
        self.value.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Current value
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }
}

/// Counts how many times an initializer ran
#[derive(Debug, Clone, Default)]
pub struct CallCounter {
    calls: Arc<AtomicUsize>,
}

impl CallCounter {
    /// A counter with no calls recorded
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one call and return the number of calls before it
    pub fn tick(&self) -> usize {
        self.calls.fetch_add(1, Ordering::SeqCst)
    }

    /// Calls recorded so far, shared across clones
    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Initializer producing a fresh [`Counter`] starting at zero
    pub fn counter_initializer(&self) -> impl Fn() -> Counter + Send + Sync + 'static {
        let calls = self.clone();
        move || {
            calls.tick();
            Counter::new(0)
        }
    }
}
