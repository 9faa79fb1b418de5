//! Spawn-join over the client machines.
//!
//! Every per-machine step (installing, copying, running a YCSB phase) acts on its own remote
//! host and shares nothing with the others. [`run_threaded`] spawns one thread per machine and
//! joins them all before returning, which is the only synchronization the driver needs between
//! stages.

use crate::error::{Error, Result};
use log::{debug, error};

/// Run `f` on every item concurrently and wait for all of them.
///
/// The results come back in the order of `items`. A task that panics is reported as an error for
/// its own item; the others still run to completion.
pub fn run_threaded<T, R, F>(items: &[T], f: F) -> Vec<Result<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> Result<R> + Sync,
{
    let f = &f;
    std::thread::scope(|s| {
        let handles: Vec<_> = items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                debug!("Spawning task {}", i);
                s.spawn(move || f(item))
            })
            .collect();
        handles
            .into_iter()
            .enumerate()
            .map(|(i, handle)| match handle.join() {
                Ok(r) => r,
                Err(_) => {
                    error!("Task {} panicked", i);
                    Err(Error::Panicked(i.to_string()))
                }
            })
            .collect()
    })
}

/// Like [`run_threaded`], but fail unless every task succeeded. The error names every failing
/// item through `label`.
pub fn run_threaded_all<T, R, F, L>(items: &[T], label: L, f: F) -> Result<Vec<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> Result<R> + Sync,
    L: Fn(&T) -> String,
{
    let mut failures = Vec::new();
    let mut results = Vec::with_capacity(items.len());
    for (item, r) in items.iter().zip(run_threaded(items, f)) {
        match r {
            Ok(r) => results.push(r),
            Err(e) => failures.push((label(item), e)),
        }
    }
    if failures.is_empty() {
        Ok(results)
    } else {
        Err(Error::PartialInstall { failures })
    }
}
