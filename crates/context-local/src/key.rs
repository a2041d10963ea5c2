//! Identity tokens for slots and execution branches.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// Process-unique identity of a [`ContextSlot`](crate::ContextSlot).
///
/// A key is generated once when the slot is constructed and never changes.
/// There is no public constructor, so a key can only come from a slot and two
/// distinct slots never share one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey(Uuid);

impl SlotKey {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID, for diagnostics.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot-{}", self.0.as_simple())
    }
}

static NEXT_BRANCH_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of an execution branch.
///
/// Only used to correlate forks in logs; bindings are never looked up by
/// branch id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BranchId(u64);

impl BranchId {
    pub(crate) fn next() -> Self {
        Self(NEXT_BRANCH_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "branch-{}", self.0)
    }
}
