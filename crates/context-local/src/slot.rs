//! Typed slot whose value flows into forked branches
//!
//! A [`ContextSlot`] stores nothing itself. Its value lives in the bindings of
//! whichever branch reads or writes it, so the same slot can hold different
//! values on different threads and tasks at once.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, trace, warn};

use crate::ambient::{self, Binding};
use crate::config::{SlotConfig, TrackingScope};
use crate::error::{BoxError, Result, SlotError};
use crate::key::SlotKey;
use crate::tracker::{self, InstanceTracker, Instances};

type Initializer<T> = Arc<dyn Fn() -> std::result::Result<T, BoxError> + Send + Sync>;

/// Holds a value that is inherited by every branch forked from the branch
/// that set it.
///
/// ```
/// use context_local::{spawn_thread, ContextSlot};
///
/// let request_id: ContextSlot<String> = ContextSlot::new();
/// request_id.set("req-42".to_owned());
///
/// let seen = spawn_thread(move || request_id.get().ok().flatten())
///     .join()
///     .unwrap();
/// assert_eq!(seen.as_deref().map(String::as_str), Some("req-42"));
/// ```
pub struct ContextSlot<T> {
    key: SlotKey,
    label: Option<String>,
    initializer: Option<Initializer<T>>,
    tracker: Option<Arc<InstanceTracker<T>>>,
}

impl<T> ContextSlot<T>
where
    T: Send + Sync + 'static,
{
    /// A slot with no initializer: reads return `None` until a value is set
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// A slot that creates a value with `initializer` whenever a branch reads
    /// it before any ancestor has set one.
    ///
    /// With `track_created_instances`, every created value is recorded in a
    /// tracker private to this slot; see [`ContextSlot::instances`].
    pub fn with_initializer<F>(initializer: F, track_created_instances: bool) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::builder()
            .initializer(initializer)
            .tracking(TrackingScope::from_flag(track_created_instances))
            .build()
    }

    /// Start configuring a slot
    pub fn builder() -> SlotBuilder<T> {
        SlotBuilder::new()
    }

    /// Identity of this slot in every branch's bindings
    pub fn key(&self) -> SlotKey {
        self.key
    }

    /// Label shown in log events and errors
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Whether reads on an unbound branch create a value
    pub fn has_initializer(&self) -> bool {
        self.initializer.is_some()
    }

    /// The value bound on the current branch, creating it if needed.
    ///
    /// On a miss with an initializer configured, the initializer runs on the
    /// calling thread and its value is bound to the current branch before it
    /// is returned. Later reads on this branch, and on branches forked from it
    /// afterwards, see that value without running the initializer again.
    ///
    /// A failed initializer leaves the branch unbound. A panicking initializer
    /// unwinds through this call.
    pub fn get(&self) -> Result<Option<Arc<T>>> {
        if let Some(value) = self.peek()? {
            return Ok(Some(value));
        }

        let Some(initializer) = &self.initializer else {
            trace!(slot = %self.key, "no binding and no initializer");
            return Ok(None);
        };

        // No borrow of the branch is held here, so the initializer may use
        // other slots freely.
        let value = match initializer() {
            Ok(value) => Arc::new(value),
            Err(source) => {
                warn!(
                    slot = %self.key,
                    label = self.label(),
                    error = %source,
                    "slot initializer failed"
                );
                return Err(SlotError::initializer(self.key, self.label(), source));
            }
        };

        ambient::set_binding(self.key, value.clone());
        if let Some(tracker) = &self.tracker {
            tracker.register(&value);
        }
        trace!(
            slot = %self.key,
            branch = %ambient::current_branch_id(),
            "lazily initialized binding"
        );
        Ok(Some(value))
    }

    /// The value bound on the current branch, without running the initializer
    pub fn peek(&self) -> Result<Option<Arc<T>>> {
        ambient::get_binding(&self.key)
            .map(|binding| self.downcast(binding))
            .transpose()
    }

    /// Bind `value` to the current branch
    pub fn set(&self, value: T) {
        self.set_arc(Arc::new(value));
    }

    /// Bind an already shared value to the current branch.
    ///
    /// A write made while the thread is being torn down is discarded.
    pub fn set_arc(&self, value: Arc<T>) {
        ambient::set_binding(self.key, value);
    }

    /// Bind `Some(value)`, or clear the binding for `None`.
    ///
    /// Absence is never stored as a value, so after `store(None)` the next read
    /// behaves as if the slot had never been written on this branch.
    pub fn store(&self, value: Option<Arc<T>>) {
        match value {
            Some(value) => self.set_arc(value),
            None => self.clear(),
        }
    }

    /// Remove the current branch's binding
    pub fn clear(&self) {
        ambient::remove_binding(&self.key);
    }

    /// Remove and return the current branch's binding
    pub fn take(&self) -> Result<Option<Arc<T>>> {
        ambient::remove_binding(&self.key)
            .map(|binding| self.downcast(binding))
            .transpose()
    }

    /// Whether the current branch has a binding for this slot
    pub fn is_set(&self) -> bool {
        ambient::contains_binding(&self.key)
    }

    /// Values created by the initializer that are still alive somewhere.
    ///
    /// Empty when tracking is disabled.
    pub fn instances(&self) -> Instances<T> {
        match &self.tracker {
            Some(tracker) => tracker.instances(),
            None => Instances::empty(),
        }
    }

    /// Tracker recording this slot's created values, if any
    pub fn tracker(&self) -> Option<&Arc<InstanceTracker<T>>> {
        self.tracker.as_ref()
    }

    fn downcast(&self, binding: Binding) -> Result<Arc<T>> {
        binding.downcast::<T>().map_err(|_| {
            error!(
                slot = %self.key,
                expected = std::any::type_name::<T>(),
                "binding has unexpected type"
            );
            SlotError::type_mismatch::<T>(self.key)
        })
    }
}

impl<T> Default for ContextSlot<T>
where
    T: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ContextSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextSlot")
            .field("key", &self.key)
            .field("label", &self.label)
            .field("initializer", &self.initializer.is_some())
            .field("tracker", &self.tracker)
            .finish()
    }
}

/// Builder for [`ContextSlot`]
pub struct SlotBuilder<T> {
    config: SlotConfig,
    initializer: Option<Initializer<T>>,
}

impl<T> SlotBuilder<T>
where
    T: Send + Sync + 'static,
{
    fn new() -> Self {
        Self {
            config: SlotConfig::default(),
            initializer: None,
        }
    }

    /// Apply a loaded configuration, replacing label and tracking
    pub fn config(mut self, config: SlotConfig) -> Self {
        self.config = config;
        self
    }

    /// Label for log events and errors
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.config.label = Some(label.into());
        self
    }

    /// Where created values are recorded
    pub fn tracking(mut self, tracking: TrackingScope) -> Self {
        self.config.tracking = tracking;
        self
    }

    /// Create a value on the first read of each unbound branch
    pub fn initializer<F>(mut self, initializer: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.initializer = Some(Arc::new(move || Ok(initializer())));
        self
    }

    /// Use an initializer that can fail. Its error is returned from
    /// [`ContextSlot::get`] as [`SlotError::Initializer`].
    pub fn try_initializer<F, E>(mut self, initializer: F) -> Self
    where
        F: Fn() -> std::result::Result<T, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        self.initializer = Some(Arc::new(move || initializer().map_err(Into::into)));
        self
    }

    /// Create the slot with a fresh key
    pub fn build(self) -> ContextSlot<T> {
        let key = SlotKey::generate();
        let tracker = match self.config.tracking {
            TrackingScope::Disabled => None,
            TrackingScope::PerSlot => Some(Arc::new(InstanceTracker::new())),
            TrackingScope::SharedByType => Some(tracker::shared::<T>()),
        };
        if tracker.is_some() && self.initializer.is_none() {
            debug!(slot = %key, "tracking enabled on a slot without initializer");
        }
        debug!(
            slot = %key,
            label = self.config.label.as_deref(),
            tracking = ?self.config.tracking,
            "created context slot"
        );

        ContextSlot {
            key,
            label: self.config.label,
            initializer: self.initializer,
            tracker,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ambient::Branch;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_unset_slot_reads_none_repeatably() {
        let slot: ContextSlot<u32> = ContextSlot::new();
        assert!(slot.get().unwrap().is_none());
        assert!(slot.get().unwrap().is_none());
        assert!(!slot.is_set());
    }

    #[test]
    fn test_lazy_value_is_cached_per_branch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let slot = ContextSlot::with_initializer(
            move || counter.fetch_add(1, Ordering::SeqCst),
            false,
        );

        let first = slot.get().unwrap().unwrap();
        let second = slot.get().unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_peek_does_not_initialize() {
        let slot = ContextSlot::with_initializer(|| 3u8, false);
        assert!(slot.peek().unwrap().is_none());
        assert!(!slot.is_set());
        assert_eq!(slot.get().unwrap().as_deref(), Some(&3));
        assert!(slot.is_set());
    }

    #[test]
    fn test_store_none_clears_binding() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let slot = ContextSlot::with_initializer(
            move || counter.fetch_add(1, Ordering::SeqCst),
            false,
        );

        slot.set(100);
        assert_eq!(slot.get().unwrap().as_deref(), Some(&100));
        slot.store(None);
        assert!(!slot.is_set());
        assert_eq!(slot.get().unwrap().as_deref(), Some(&0));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_take_returns_previous_value() {
        let slot: ContextSlot<&'static str> = ContextSlot::new();
        slot.set("value");
        assert_eq!(slot.take().unwrap().as_deref(), Some(&"value"));
        assert!(slot.take().unwrap().is_none());
    }

    #[test]
    fn test_failed_initializer_is_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let slot = ContextSlot::<u32>::builder()
            .label("flaky")
            .try_initializer(move || {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err("not yet")
                } else {
                    Ok(11)
                }
            })
            .build();

        let err = slot.get().unwrap_err();
        assert!(matches!(err, SlotError::Initializer { ref label, .. } if label.as_deref() == Some("flaky")));
        assert!(!slot.is_set());
        assert_eq!(slot.get().unwrap().as_deref(), Some(&11));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_initializer_may_read_other_slots() {
        let base = Arc::new(ContextSlot::with_initializer(|| 2u32, false));
        let inner = base.clone();
        let derived = ContextSlot::with_initializer(move || inner.get().unwrap().map_or(0, |v| *v * 10), false);

        assert_eq!(derived.get().unwrap().as_deref(), Some(&20));
        assert!(base.is_set());
    }

    #[test]
    fn test_instances_empty_without_tracking() {
        let slot = ContextSlot::with_initializer(|| 1u16, false);
        let _value = slot.get().unwrap();
        assert!(slot.tracker().is_none());
        assert_eq!(slot.instances().count(), 0);
    }

    #[test]
    fn test_tracked_slot_records_lazy_values_only() {
        let slot = ContextSlot::with_initializer(|| 1u16, true);
        let created = slot.get().unwrap().unwrap();
        let explicit = Branch::fork().run(|| {
            slot.set(2);
            slot.get().unwrap().unwrap()
        });

        let live: Vec<Arc<u16>> = slot.instances().collect();
        assert_eq!(live.len(), 1);
        assert!(Arc::ptr_eq(&live[0], &created));
        assert_eq!(*explicit, 2);
    }

    #[test]
    fn test_builder_applies_config() {
        let config = SlotConfig::default()
            .with_label("configured")
            .with_tracking(TrackingScope::PerSlot);
        let slot = ContextSlot::<u8>::builder().config(config).initializer(|| 0).build();
        assert_eq!(slot.label(), Some("configured"));
        assert!(slot.has_initializer());
        assert!(slot.tracker().is_some());
    }

    #[test]
    fn test_distinct_slots_have_distinct_keys() {
        let a: ContextSlot<u8> = ContextSlot::new();
        let b: ContextSlot<u8> = ContextSlot::new();
        assert_ne!(a.key(), b.key());

        a.set(1);
        assert!(b.get().unwrap().is_none());
    }

    #[test]
    fn test_dropping_slot_keeps_other_bindings() {
        let kept: ContextSlot<u8> = ContextSlot::new();
        kept.set(4);
        {
            let dropped: ContextSlot<u8> = ContextSlot::new();
            dropped.set(5);
        }
        assert_eq!(kept.get().unwrap().as_deref(), Some(&4));
    }
}
