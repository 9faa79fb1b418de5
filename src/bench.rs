//! The lifecycle of a benchmark run.
//!
//! A run goes through the same stages, in this order, for every benchmark:
//!
//! 1. **check prerequisites**: validate the configuration. No external call is made, so a
//! failure here costs nothing.
//! 2. **prepare**: provision resources and set up the client machines. A benchmark that
//! provisions anything sets [`RunContext::always_call_cleanup`] before doing so.
//! 3. **run**: execute the workload and return the samples.
//! 4. **cleanup**: release what prepare provisioned.
//!
//! [`run_benchmark`] ties them together. Cleanup runs exactly once: always after a successful
//! run, and after a failed prepare or run whenever `always_call_cleanup` was set. It is held by
//! a guard, so a panic inside a stage releases the resources too.
//!
//! A cleanup failure never hides samples: after a successful run it is handed back in
//! [`Outcome::cleanup_error`]; after a failed run it is logged and the run's own error is
//! returned.

use crate::error::{Error, Result};
use crate::resources::{ManagedResource, Resource};
use crate::vm::ClientVm;
use crate::ycsb::YcsbExecutor;
use crate::Sample;
use log::{error, info, warn};
use quanta::Instant;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Everything one run carries from stage to stage.
pub struct RunContext {
    pub run_id: String,

    /// The client machines the workload runs on.
    pub vms: Vec<Arc<dyn ClientVm>>,

    /// The resource provisioned by prepare, if any.
    pub resource: Option<Arc<ManagedResource>>,

    /// The workload executor set up by prepare, if any.
    pub executor: Option<YcsbExecutor>,

    /// Once set, cleanup runs even when a later stage fails.
    pub always_call_cleanup: bool,

    interrupted: Arc<AtomicBool>,
}

impl RunContext {
    pub fn new(run_id: &str, vms: Vec<Arc<dyn ClientVm>>) -> Self {
        Self {
            run_id: run_id.to_string(),
            vms,
            resource: None,
            executor: None,
            always_call_cleanup: false,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share an interruption flag (set from a signal handler) with the run.
    pub fn with_interrupt(mut self, interrupted: Arc<AtomicBool>) -> Self {
        self.interrupted = interrupted;
        self
    }

    pub fn check_interrupted(&self) -> Result<()> {
        match self.interrupted.load(Ordering::SeqCst) {
            true => Err(Error::Interrupted),
            false => Ok(()),
        }
    }
}

/// The stages of one kind of benchmark.
pub trait Benchmark: Send + Sync {
    fn name(&self) -> &str;

    /// Validate what can be validated without touching the outside world.
    fn check_prerequisites(&self) -> Result<()>;

    /// The resource a run with `run_id` provisions, not created yet.
    fn resource(&self, run_id: &str) -> Result<Box<dyn Resource>>;

    fn prepare(&self, ctx: &mut RunContext) -> Result<()>;

    fn run(&self, ctx: &mut RunContext) -> Result<Vec<Sample>>;

    fn cleanup(&self, ctx: &mut RunContext) -> Result<()>;
}

/// The result of a successful run.
#[derive(Debug)]
pub struct Outcome {
    pub samples: Vec<Sample>,

    /// Set when the run succeeded but releasing its resources did not.
    pub cleanup_error: Option<Error>,
}

/// Runs cleanup once, on every exit path after prepare started.
struct CleanupGuard<'a> {
    benchmark: &'a dyn Benchmark,
    ctx: &'a mut RunContext,
    done: bool,
}

impl CleanupGuard<'_> {
    fn release(&mut self) -> Result<()> {
        assert!(!self.done, "cleanup should only run once");
        self.done = true;
        info!("Cleaning up {} run {}", self.benchmark.name(), self.ctx.run_id);
        let start = Instant::now();
        let result = self.benchmark.cleanup(self.ctx);
        info!("Cleanup took {:.2}s", start.elapsed().as_secs_f64());
        result
    }
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        if !self.done && self.ctx.always_call_cleanup {
            if let Err(e) = self.release() {
                error!("Cleanup of run {} failed: {}", self.ctx.run_id, e);
            }
        }
    }
}

fn stages(benchmark: &dyn Benchmark, ctx: &mut RunContext) -> Result<Vec<Sample>> {
    let start = Instant::now();
    benchmark.prepare(ctx)?;
    info!("Prepare took {:.2}s", start.elapsed().as_secs_f64());
    ctx.check_interrupted()?;
    let start = Instant::now();
    let samples = benchmark.run(ctx)?;
    info!("Run took {:.2}s", start.elapsed().as_secs_f64());
    Ok(samples)
}

/// Run every stage of `benchmark` once.
pub fn run_benchmark(benchmark: &dyn Benchmark, ctx: &mut RunContext) -> Result<Outcome> {
    let start = Instant::now();
    info!("Running {} with run id {}", benchmark.name(), ctx.run_id);
    benchmark.check_prerequisites()?;

    let mut guard = CleanupGuard {
        benchmark,
        ctx,
        done: false,
    };
    match stages(benchmark, guard.ctx) {
        Ok(mut samples) => {
            let cleanup_error = guard.release().err();
            if let Some(e) = &cleanup_error {
                error!(
                    "Run {} succeeded but its cleanup failed, resources may be left behind: {}",
                    guard.ctx.run_id, e
                );
            }
            let mut metadata = BTreeMap::new();
            metadata.insert("benchmark".to_string(), benchmark.name().to_string());
            metadata.insert("run_id".to_string(), guard.ctx.run_id.clone());
            samples.push(Sample::new(
                "End to End Runtime",
                start.elapsed().as_secs_f64(),
                "seconds",
                metadata,
            ));
            Ok(Outcome {
                samples,
                cleanup_error,
            })
        }
        Err(e) => {
            error!("{} run {} failed: {}", benchmark.name(), guard.ctx.run_id, e);
            if guard.ctx.always_call_cleanup {
                if let Err(cleanup) = guard.release() {
                    error!("Cleanup of run {} failed: {}", guard.ctx.run_id, cleanup);
                }
            } else {
                warn!("Nothing was provisioned, skipping cleanup");
                guard.done = true;
            }
            Err(e)
        }
    }
}
