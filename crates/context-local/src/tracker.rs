//! Non-owning registry of lazily created values
//!
//! A tracker holds a [`Weak`] for every value a slot's initializer produced.
//! It never keeps a value alive: once the last [`Arc`] held by a branch or by
//! application code is dropped, the value disappears from enumeration. Entries
//! themselves are never removed, so the entry count only grows.
//!
//! Entries are appended to an open segment of fixed capacity. A full segment
//! is sealed into an immutable `Arc<[Weak<T>]>`, so taking a snapshot copies
//! segment pointers plus at most one open segment, and never the whole list.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, trace};

/// Entries per sealed segment
const SEGMENT_LEN: usize = 64;

type Segment<T> = Arc<[Weak<T>]>;

struct Segments<T> {
    sealed: Vec<Segment<T>>,
    open: Vec<Weak<T>>,
}

impl<T> Segments<T> {
    fn len(&self) -> usize {
        self.sealed.len() * SEGMENT_LEN + self.open.len()
    }
}

/// Append-only collection of weak references to created values
pub struct InstanceTracker<T> {
    segments: Mutex<Segments<T>>,
}

impl<T> InstanceTracker<T> {
    /// An empty tracker
    pub fn new() -> Self {
        Self {
            segments: Mutex::new(Segments {
                sealed: Vec::new(),
                open: Vec::with_capacity(SEGMENT_LEN),
            }),
        }
    }

    /// Record `value` without extending its lifetime
    pub fn register(&self, value: &Arc<T>) {
        let entries = {
            let mut segments = self.segments.lock();
            segments.open.push(Arc::downgrade(value));
            if segments.open.len() == SEGMENT_LEN {
                let full = std::mem::replace(&mut segments.open, Vec::with_capacity(SEGMENT_LEN));
                segments.sealed.push(full.into());
            }
            segments.len()
        };
        trace!(entries, "tracked created instance");
    }

    /// Values that are still alive.
    ///
    /// The entry list is snapshotted when this is called; the returned
    /// iterator upgrades entries one at a time and skips the dead ones.
    /// Registrations made after the call are not included. Call again for a
    /// fresh pass.
    pub fn instances(&self) -> Instances<T> {
        let (segments, remaining) = self.snapshot();
        Instances {
            segments: segments.into_iter(),
            current: None,
            index: 0,
            remaining,
        }
    }

    /// Number of registrations, dead or alive
    pub fn entry_count(&self) -> usize {
        self.segments.lock().len()
    }

    /// Number of registered values still alive
    pub fn live_count(&self) -> usize {
        let (segments, _) = self.snapshot();
        segments
            .iter()
            .flat_map(|segment| segment.iter())
            .filter(|entry| entry.strong_count() > 0)
            .count()
    }

    fn snapshot(&self) -> (Vec<Segment<T>>, usize) {
        let segments = self.segments.lock();
        let mut snapshot = Vec::with_capacity(segments.sealed.len() + 1);
        snapshot.extend(segments.sealed.iter().cloned());
        if !segments.open.is_empty() {
            snapshot.push(Arc::from(segments.open.as_slice()));
        }
        (snapshot, segments.len())
    }
}

impl<T> Default for InstanceTracker<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for InstanceTracker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceTracker")
            .field("type", &std::any::type_name::<T>())
            .field("entries", &self.entry_count())
            .finish()
    }
}

/// Iterator over the live values of one tracker snapshot
pub struct Instances<T> {
    segments: std::vec::IntoIter<Segment<T>>,
    current: Option<Segment<T>>,
    index: usize,
    remaining: usize,
}

impl<T> Instances<T> {
    /// An iterator that yields nothing, for slots without tracking
    pub fn empty() -> Self {
        Self {
            segments: Vec::new().into_iter(),
            current: None,
            index: 0,
            remaining: 0,
        }
    }
}

impl<T> Iterator for Instances<T> {
    type Item = Arc<T>;

    fn next(&mut self) -> Option<Arc<T>> {
        loop {
            if let Some(segment) = &self.current {
                if let Some(entry) = segment.get(self.index) {
                    self.index += 1;
                    self.remaining -= 1;
                    match entry.upgrade() {
                        Some(value) => return Some(value),
                        None => continue,
                    }
                }
            }
            self.current = Some(self.segments.next()?);
            self.index = 0;
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

type SharedTracker = Arc<dyn Any + Send + Sync>;

static SHARED_TRACKERS: Lazy<Mutex<HashMap<TypeId, SharedTracker>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// The process-wide tracker for value type `T`.
///
/// Every call with the same `T` returns the same tracker, so slots that opt
/// into [`TrackingScope::SharedByType`](crate::TrackingScope::SharedByType)
/// aggregate their created values here.
pub fn shared<T>() -> Arc<InstanceTracker<T>>
where
    T: Send + Sync + 'static,
{
    let mut created = false;
    let entry = SHARED_TRACKERS
        .lock()
        .entry(TypeId::of::<T>())
        .or_insert_with(|| {
            created = true;
            Arc::new(InstanceTracker::<T>::new()) as SharedTracker
        })
        .clone();

    if created {
        debug!(
            value_type = std::any::type_name::<T>(),
            "created shared instance tracker"
        );
    }
    // Only `InstanceTracker<T>` is ever stored under `TypeId::of::<T>()`.
    entry
        .downcast::<InstanceTracker<T>>()
        .unwrap_or_else(|_| unreachable!("shared tracker registered under a foreign TypeId"))
}
