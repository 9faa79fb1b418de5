#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! A benchmark driver for cloud data stores.
//!
//! A benchmark run with `cloudbench` provisions a resource in the cloud (such as a Firestore
//! collection), installs a workload generator (YCSB) on a pool of client machines, runs a load
//! phase followed by a measured run phase from all clients, collects the measurements as
//! [`Sample`]s, and deletes the resource again. Deletion is attempted exactly once per run, also
//! when provisioning or the workload failed halfway.
//!
//! All the heavy lifting is done by external command line tools (`gcloud`, `firebase`, `ssh`,
//! YCSB). This crate plumbs configuration into them, runs them with retries, and keeps track of
//! what was provisioned.
//!
//! A few key design choices include:
//!
//! - A run is a fixed sequence of stages: check prerequisites, prepare, run, cleanup. A
//! benchmark implements each stage through the [`bench::Benchmark`] trait, and the driver in
//! [`bench::run_benchmark`] owns the guarantee that cleanup happens.
//! - Benchmarks are registered with [`inventory`] and selected by name from a TOML
//! configuration file, so new ones can be added from other crates without touching this one.
//! - There is no global state. Everything a run needs travels in [`bench::RunContext`].
//!
//! More detailed usage could be found in the module-level rustdocs:
//!
//! - [`mod@config`] for the configuration format and its layering.
//! - [`mod@resources`] for the lifecycle of provisioned resources.
//! - [`mod@ycsb`] for how YCSB is driven and how its output is aggregated.
//! - [`cmdline()`] for the usage of the default command line interface.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// A single measurement produced by a benchmark run.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Sample {
    /// What was measured, e.g. `overall Throughput` or `read AverageLatency`.
    pub metric: String,

    pub value: f64,

    /// Unit of `value`, empty for plain counts.
    pub unit: String,

    /// The conditions of the measurement: phase, workload, number of clients, ...
    pub metadata: BTreeMap<String, String>,

    /// Seconds since the Unix epoch at the time the sample was taken.
    pub timestamp: f64,
}

impl Sample {
    pub fn new(metric: &str, value: f64, unit: &str, metadata: BTreeMap<String, String>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        Self {
            metric: metric.to_string(),
            value,
            unit: unit.to_string(),
            metadata,
            timestamp,
        }
    }
}

impl fmt::Display for Sample {
    /// `metric "<metric>" value <value> unit <unit> <key> <value> ...`, one line.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "metric {:?} value {:.2} unit {}",
            self.metric,
            self.value,
            if self.unit.is_empty() { "." } else { &self.unit }
        )?;
        for (k, v) in self.metadata.iter() {
            write!(f, " {} {}", k, v)?;
        }
        Ok(())
    }
}

pub mod bench;
pub mod benchmarks;
pub mod cmd;
mod cmdline;
pub mod config;
mod error;
pub mod resources;
pub mod thread;
pub mod vm;
pub mod ycsb;

#[cfg(test)]
mod testing;

pub use cmdline::cmdline;
pub use error::{Error, Result};

pub extern crate inventory;
pub extern crate toml;
