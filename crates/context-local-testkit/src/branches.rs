//! Helpers for fanning work out across forked branches

use context_local::{spawn, spawn_thread};

/// Run `f(i)` for `i in 0..count`, each on its own thread forked from the
/// caller's branch, and collect the results in index order
pub fn fan_out_threads<R, F>(count: usize, f: F) -> Vec<R>
where
    F: Fn(usize) -> R + Clone + Send + 'static,
    R: Send + 'static,
{
    let handles: Vec<_> = (0..count)
        .map(|i| {
            let f = f.clone();
            spawn_thread(move || f(i))
        })
        .collect();
    handles
        .into_iter()
        .map(|handle| handle.join().expect("forked thread panicked"))
        .collect()
}

/// Task flavour of [`fan_out_threads`]
pub async fn fan_out_tasks<R, F, Fut>(count: usize, f: F) -> Vec<R>
where
    F: Fn(usize) -> Fut,
    Fut: std::future::Future<Output = R> + Send + 'static,
    R: Send + 'static,
{
    let handles: Vec<_> = (0..count).map(|i| spawn(f(i))).collect();
    let mut results = Vec::with_capacity(count);
    for handle in handles {
        results.push(handle.await.expect("forked task panicked"));
    }
    results
}

/// Fresh multi-threaded runtime for tests that need to control their own
/// runtime, e.g. from inside a proptest body
pub fn test_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build test runtime")
}
