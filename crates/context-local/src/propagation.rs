//! Fork points for threads and tasks
//!
//! Each helper here forks the caller's branch at the moment it is called and
//! runs the new unit of work inside the child. Work started through plain
//! `tokio::spawn` or `std::thread::spawn` inherits nothing: it sees the root
//! bindings of whichever thread happens to run it.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::task::JoinHandle;
use tracing::{trace, warn, Instrument, Span};

use crate::ambient::{Branch, BranchGuard, BranchState};
use crate::key::BranchId;

impl Branch {
    /// Run `future` inside this branch.
    ///
    /// The branch is installed for the duration of every poll and taken back
    /// out afterwards, so tasks that share a worker thread never observe each
    /// other's bindings.
    pub fn scope<F>(self, future: F) -> BranchFuture<F>
    where
        F: Future,
    {
        BranchFuture {
            inner: Box::pin(future),
            state: Some(self.into_state()),
        }
    }
}

/// Future running inside its own branch
pub struct BranchFuture<F> {
    inner: Pin<Box<F>>,
    state: Option<BranchState>,
}

impl<F> BranchFuture<F> {
    /// Branch this future runs in
    pub fn branch_id(&self) -> Option<BranchId> {
        self.state.as_ref().map(|state| state.id)
    }
}

impl<F> Future for BranchFuture<F>
where
    F: Future,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let state = match this.state.take() {
            Some(state) => state,
            // Only reachable if a previous poll panicked.
            None => Branch::detached().into_state(),
        };

        let guard = BranchGuard::install(state);
        let poll = this.inner.as_mut().poll(cx);
        this.state = Some(guard.exit());
        poll
    }
}

/// Extension trait for running futures in a forked branch
pub trait PropagateBranch: Future + Sized {
    /// Fork the current branch now and run this future in the child
    fn in_current_branch(self) -> BranchFuture<Self> {
        Branch::fork().scope(self)
    }

    /// Run this future in a specific branch
    fn in_branch(self, branch: Branch) -> BranchFuture<Self> {
        branch.scope(self)
    }
}

impl<F: Future> PropagateBranch for F {}

/// Spawn a tokio task in a fork of the current branch
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let branch = Branch::fork();
    trace!(child = %branch.id(), "spawning task");
    tokio::spawn(branch.scope(future).instrument(Span::current()))
}

/// Run blocking work on tokio's blocking pool in a fork of the current branch
pub fn spawn_blocking<F, R>(f: F) -> JoinHandle<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let branch = Branch::fork();
    let span = Span::current();
    tokio::task::spawn_blocking(move || {
        let _entered = span.enter();
        branch.run(f)
    })
}

/// Spawn an OS thread in a fork of the current branch
pub fn spawn_thread<F, R>(f: F) -> std::thread::JoinHandle<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let branch = Branch::fork();
    let span = Span::current();
    std::thread::spawn(move || {
        let _entered = span.enter();
        branch.run(f)
    })
}

/// Spawn a named OS thread in a fork of the current branch
pub fn spawn_thread_named<F, R>(
    name: impl Into<String>,
    f: F,
) -> std::io::Result<std::thread::JoinHandle<R>>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let branch = Branch::fork();
    let span = Span::current();
    std::thread::Builder::new().name(name.into()).spawn(move || {
        let _entered = span.enter();
        branch.run(f)
    })
}

/// Group of tasks, each spawned in its own fork of the caller's branch
pub struct BranchBatch<T> {
    handles: Vec<JoinHandle<T>>,
}

impl<T> BranchBatch<T>
where
    T: Send + 'static,
{
    /// An empty batch
    pub fn new() -> Self {
        Self {
            handles: Vec::new(),
        }
    }

    /// Fork the current branch and spawn `future` in it
    pub fn push<F>(&mut self, future: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        self.handles.push(spawn(future));
    }

    /// Number of tasks spawned so far
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether no task has been pushed
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every task, returning outputs in push order.
    ///
    /// A task that panicked re-raises its panic here. Cancelled tasks are
    /// skipped.
    pub async fn join_all(self) -> Vec<T> {
        let mut results = Vec::with_capacity(self.handles.len());
        for handle in self.handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                Err(err) => warn!(error = %err, "batched branch task did not complete"),
            }
        }
        results
    }
}

impl<T> Default for BranchBatch<T>
where
    T: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
