//! Per-branch binding storage
//!
//! Every execution branch owns a [`Bindings`] map from slot key to value.
//! Forking a child clones the parent's current map by value, after which
//! neither side observes the other's writes. The map is copy-on-write, so a
//! fork costs one `Arc` clone until somebody writes.
//!
//! The current branch lives in a thread-local. A thread that was never handed
//! a branch is its own root with empty bindings. [`Branch::enter`] installs a
//! forked branch for synchronous code; [`Branch::scope`] installs it around
//! every poll of a future, which is how task-spawning helpers in
//! [`crate::propagation`] carry bindings across `.await` points and worker
//! threads.
//!
//! The thread-local is only borrowed for map lookups and pointer swaps.
//! Replaced values are dropped and trace events are emitted after the borrow
//! ends, so a value's `Drop` or a tracing layer may read slots freely. Once
//! the thread-local has been torn down at thread exit, the branch reads as
//! empty and writes are discarded.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::trace;

use crate::key::{BranchId, SlotKey};

/// Type-erased value stored under a slot key
pub(crate) type Binding = Arc<dyn Any + Send + Sync>;

/// Copy-on-write binding map of one execution branch
#[derive(Clone, Default)]
pub struct Bindings {
    map: Arc<HashMap<SlotKey, Binding>>,
}

impl Bindings {
    /// Number of slots bound on this branch
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether no slot is bound on this branch
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Whether `key` has a binding
    pub fn contains(&self, key: &SlotKey) -> bool {
        self.map.contains_key(key)
    }

    /// Keys bound on this branch, in no particular order
    pub fn keys(&self) -> impl Iterator<Item = &SlotKey> {
        self.map.keys()
    }

    pub(crate) fn get(&self, key: &SlotKey) -> Option<Binding> {
        self.map.get(key).cloned()
    }

    pub(crate) fn insert(&mut self, key: SlotKey, value: Binding) -> Option<Binding> {
        Arc::make_mut(&mut self.map).insert(key, value)
    }

    pub(crate) fn remove(&mut self, key: &SlotKey) -> Option<Binding> {
        // Avoid copying a shared map just to learn the key was absent.
        if !self.map.contains_key(key) {
            return None;
        }
        Arc::make_mut(&mut self.map).remove(key)
    }

    /// Whether both maps are the same allocation, i.e. neither side has
    /// written since they were forked
    pub fn shares_storage_with(&self, other: &Bindings) -> bool {
        Arc::ptr_eq(&self.map, &other.map)
    }
}

impl fmt::Debug for Bindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.map.keys()).finish()
    }
}

/// Identity plus bindings of the branch installed on a thread
#[derive(Debug)]
pub(crate) struct BranchState {
    pub(crate) id: BranchId,
    pub(crate) bindings: Bindings,
}

impl BranchState {
    fn root() -> Self {
        Self {
            id: BranchId::next(),
            bindings: Bindings::default(),
        }
    }
}

thread_local! {
    static CURRENT_BRANCH: RefCell<Option<BranchState>> = const { RefCell::new(None) };
}

/// Run `f` against the current branch, creating the thread root on first use.
///
/// Returns `None` when the thread-local is already destroyed or borrowed, in
/// which case `f` never runs. `f` must not call back into user code and must
/// not drop bindings: return them so they drop after the borrow ends.
fn with_current<R>(f: impl FnOnce(&mut BranchState) -> R) -> Option<R> {
    let mut created = None;
    let result = CURRENT_BRANCH
        .try_with(|cell| {
            let mut current = cell.try_borrow_mut().ok()?;
            let state = current.get_or_insert_with(|| {
                let root = BranchState::root();
                created = Some(root.id);
                root
            });
            Some(f(state))
        })
        .ok()
        .flatten();

    if let Some(id) = created {
        trace!(branch = %id, "thread root branch created");
    }
    result
}

/// Install `state` as the current branch and return the one it replaces.
///
/// If the thread-local is unavailable, `state` is handed straight back.
fn swap_current(state: Option<BranchState>) -> Option<BranchState> {
    let mut incoming = Some(state);
    let swapped = CURRENT_BRANCH
        .try_with(|cell| {
            let mut current = cell.try_borrow_mut().ok()?;
            Some(std::mem::replace(&mut *current, incoming.take()?))
        })
        .ok()
        .flatten();

    match swapped {
        Some(previous) => previous,
        None => incoming.flatten(),
    }
}

pub(crate) fn get_binding(key: &SlotKey) -> Option<Binding> {
    with_current(|state| state.bindings.get(key)).flatten()
}

pub(crate) fn set_binding(key: SlotKey, value: Binding) {
    let replaced = with_current(|state| state.bindings.insert(key, value));
    drop(replaced);
}

pub(crate) fn remove_binding(key: &SlotKey) -> Option<Binding> {
    with_current(|state| state.bindings.remove(key)).flatten()
}

pub(crate) fn contains_binding(key: &SlotKey) -> bool {
    with_current(|state| state.bindings.contains(key)).unwrap_or(false)
}

/// Id of the branch the calling code runs in.
///
/// During thread teardown there is no current branch; each call then returns
/// a fresh id.
pub fn current_branch_id() -> BranchId {
    with_current(|state| state.id).unwrap_or_else(BranchId::next)
}

/// Snapshot of the current branch's bindings
pub fn current_bindings() -> Bindings {
    with_current(|state| state.bindings.clone()).unwrap_or_default()
}

/// A forked execution branch that has not been entered yet.
///
/// This is the explicit context object handed to a child at spawn time. It
/// carries a by-value copy of the parent's bindings as they were when
/// [`Branch::fork`] ran.
#[derive(Debug)]
pub struct Branch {
    id: BranchId,
    parent: Option<BranchId>,
    bindings: Bindings,
}

impl Branch {
    /// Fork a child of the current branch
    pub fn fork() -> Self {
        let (parent, bindings) =
            with_current(|state| (Some(state.id), state.bindings.clone())).unwrap_or_default();
        let child = Self {
            id: BranchId::next(),
            parent,
            bindings,
        };
        trace!(
            parent = ?child.parent,
            child = %child.id,
            bindings = child.bindings.len(),
            "forked branch"
        );
        child
    }

    /// A new root branch with no bindings and no parent
    pub fn detached() -> Self {
        Self {
            id: BranchId::next(),
            parent: None,
            bindings: Bindings::default(),
        }
    }

    /// Fork a sibling of this branch: a new branch with the same parent and
    /// an independent copy of the same bindings
    pub fn fork_sibling(&self) -> Self {
        Self {
            id: BranchId::next(),
            parent: self.parent,
            bindings: self.bindings.clone(),
        }
    }

    /// Id the branch will run under
    pub fn id(&self) -> BranchId {
        self.id
    }

    /// Branch this one was forked from; `None` for detached branches
    pub fn parent(&self) -> Option<BranchId> {
        self.parent
    }

    /// Bindings the branch will start with
    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    /// Install this branch on the current thread until the guard drops
    pub fn enter(self) -> BranchGuard {
        BranchGuard::install(self.into_state())
    }

    /// Run `f` inside this branch, restoring the caller's branch afterwards
    pub fn run<R>(self, f: impl FnOnce() -> R) -> R {
        let _guard = self.enter();
        f()
    }

    pub(crate) fn into_state(self) -> BranchState {
        BranchState {
            id: self.id,
            bindings: self.bindings,
        }
    }
}

/// Guard for a branch installed on the current thread.
///
/// Dropping the guard discards the branch's bindings and restores whatever
/// branch was current before [`Branch::enter`]. Guards are `!Send` and must be
/// dropped in reverse order of creation.
#[must_use = "the branch is exited as soon as the guard is dropped"]
pub struct BranchGuard {
    previous: Option<BranchState>,
    exited: bool,
    _not_send: PhantomData<*const ()>,
}

impl BranchGuard {
    pub(crate) fn install(state: BranchState) -> Self {
        let previous = swap_current(Some(state));
        Self {
            previous,
            exited: false,
            _not_send: PhantomData,
        }
    }

    /// Restore the previous branch and hand back the state of the one that
    /// was installed, including any writes made while it was current
    pub(crate) fn exit(mut self) -> BranchState {
        self.exited = true;
        swap_current(self.previous.take()).unwrap_or_else(BranchState::root)
    }
}

impl Drop for BranchGuard {
    fn drop(&mut self) {
        if !self.exited {
            let discarded = swap_current(self.previous.take());
            drop(discarded);
        }
    }
}

impl fmt::Debug for BranchGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BranchGuard")
            .field("previous", &self.previous.as_ref().map(|state| state.id))
            .finish()
    }
}
