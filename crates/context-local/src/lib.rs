//! Context-propagated value slots
//!
//! A [`ContextSlot<T>`] holds a value that flows from a parent execution
//! branch (a thread or a task) into every branch forked from it, without
//! passing it as a parameter. A child that writes the slot changes only its
//! own subtree: the parent and any sibling already forked keep their values.
//!
//! Branches are forked explicitly through [`spawn`], [`spawn_blocking`],
//! [`spawn_thread`], [`PropagateBranch`] or [`Branch::fork`]. Each fork gets
//! a copy of its parent's bindings as they were at that moment.
//!
//! Slots can create a default lazily on first read. Each branch that reads
//! before any ancestor has set a value gets its own fresh value. Optionally
//! every such value is recorded in an [`InstanceTracker`] that holds it
//! weakly, so live instances can be enumerated without keeping them alive.
//!
//! ```
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use context_local::{spawn_thread, ContextSlot};
//!
//! let hits = std::sync::Arc::new(ContextSlot::with_initializer(|| AtomicU64::new(0), true));
//!
//! let slot = hits.clone();
//! let local = hits.get()?.unwrap();
//! local.fetch_add(1, Ordering::Relaxed);
//!
//! // A thread forked now inherits the parent's counter.
//! let inherited = spawn_thread(move || slot.get().ok().flatten()).join().unwrap();
//! assert!(std::sync::Arc::ptr_eq(&local, &inherited.unwrap()));
//! assert_eq!(hits.instances().count(), 1);
//! # Ok::<(), context_local::SlotError>(())
//! ```

pub mod ambient;
pub mod config;
pub mod error;
pub mod key;
pub mod propagation;
pub mod slot;
pub mod tracker;

pub use ambient::{current_bindings, current_branch_id, Bindings, Branch, BranchGuard};
pub use config::{SlotConfig, TrackingScope};
pub use error::{BoxError, Result, SlotError};
pub use key::{BranchId, SlotKey};
pub use propagation::{
    spawn, spawn_blocking, spawn_thread, spawn_thread_named, BranchBatch, BranchFuture,
    PropagateBranch,
};
pub use slot::{ContextSlot, SlotBuilder};
pub use tracker::{InstanceTracker, Instances};
