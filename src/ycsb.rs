//! Driving YCSB on the client machines.
//!
//! YCSB is an opaque executable here. The executor builds its command lines, runs the load phase
//! on every client, waits for all of them, runs the measured phase, and turns the reports
//! printed by each client into aggregated [`Sample`]s.
//!
//! ## Configuration Format
//!
//! ```toml
//! [ycsb]
//! version = "0.17.0"             # release downloaded onto the clients
//! install_dir = "/opt/pkb/ycsb"  # where it is unpacked
//! workloads = ["workloada"]      # workload files run in order; the first one is loaded
//! record_count = 1000            # records loaded, split across clients
//! operation_count = 1000         # operations per workload, split across clients
//! threads = 1                    # client threads per machine
//! preload_threads = 8            # optional: client threads per machine in the load phase
//! ```
//!
//! ## Parameters
//!
//! A phase takes a [`Params`] map. `threads` and `target` become the `-threads` and `-target`
//! flags, every other entry is passed as `-p key=value`.

use crate::cmd::shell_quote;
use crate::error::{Error, Result};
use crate::thread::run_threaded;
use crate::vm::{ClientVm, Package};
use crate::Sample;
use log::{info, warn};
use quanta::Instant;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub type Params = BTreeMap<String, String>;

const FLAG_PARAMS: [&str; 2] = ["threads", "target"];

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct YcsbOpt {
    pub version: String,
    pub install_dir: String,
    pub workloads: Vec<String>,
    pub record_count: u64,
    pub operation_count: u64,
    pub threads: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preload_threads: Option<usize>,
}

impl Default for YcsbOpt {
    fn default() -> Self {
        Self {
            version: "0.17.0".to_string(),
            install_dir: "/opt/pkb/ycsb".to_string(),
            workloads: vec!["workloada".to_string()],
            record_count: 1000,
            operation_count: 1000,
            threads: 1,
            preload_threads: None,
        }
    }
}

impl YcsbOpt {
    pub(crate) fn sanity(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::Configuration(msg.to_string()));
        if self.workloads.is_empty() {
            return invalid("ycsb.workloads should not be empty");
        }
        if self.threads == 0 {
            return invalid("ycsb.threads should be positive");
        }
        if self.preload_threads == Some(0) {
            return invalid("ycsb.preload_threads should be positive if given");
        }
        if self.record_count == 0 || self.operation_count == 0 {
            return invalid("ycsb.record_count and ycsb.operation_count should be positive");
        }
        Ok(())
    }

    /// The YCSB release, unpacked into `install_dir` unless it is already there.
    pub fn package(&self) -> Package {
        let dir = shell_quote(&self.install_dir);
        let url = format!(
            "https://github.com/brianfrankcooper/YCSB/releases/download/{0}/ycsb-{0}.tar.gz",
            self.version
        );
        let install_script = format!(
            "test -x {dir}/bin/ycsb || {{ \
             command -v java >/dev/null || sudo apt-get install -y default-jre-headless; \
             sudo mkdir -p {dir} && \
             curl -fsSL {url} | sudo tar -xzf - -C {dir} --strip-components=1; }}",
            dir = dir,
            url = shell_quote(&url),
        );
        Package {
            name: "ycsb".to_string(),
            install_script,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Load,
    Run,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Load => write!(f, "load"),
            Stage::Run => write!(f, "run"),
        }
    }
}

/// The statistics one client printed, by group (`OVERALL`, `READ`, ...) and statistic name
/// (`Throughput(ops/sec)`, `AverageLatency(us)`, ...).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct YcsbResult {
    pub groups: BTreeMap<String, BTreeMap<String, f64>>,
}

/// Parse the report YCSB prints at the end of a phase. `None` if there is no `[OVERALL]`
/// section, i.e. the phase did not finish.
pub fn parse_output(output: &str) -> Option<YcsbResult> {
    let mut result = YcsbResult::default();
    for line in output.lines() {
        let line = line.trim();
        if !line.starts_with('[') {
            continue;
        }
        let mut parts = line.splitn(3, ',').map(|s| s.trim());
        let (Some(group), Some(stat), Some(value)) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        let Some(group) = group.strip_prefix('[').and_then(|g| g.strip_suffix(']')) else {
            continue;
        };
        // histogram buckets look like `[READ], 0, 1234` or `[READ], >1000, 3`
        if is_bucket(stat) {
            continue;
        }
        let Ok(value) = value.parse::<f64>() else {
            continue;
        };
        result
            .groups
            .entry(group.to_string())
            .or_default()
            .insert(stat.to_string(), value);
    }
    result.groups.contains_key("OVERALL").then_some(result)
}

fn is_bucket(stat: &str) -> bool {
    stat.parse::<u64>().is_ok()
        || stat
            .strip_prefix('>')
            .is_some_and(|s| s.parse::<u64>().is_ok())
}

enum Combine {
    Sum,
    Min,
    Max,
    WeightedMean,
}

fn combine_kind(stat: &str) -> Combine {
    match stat {
        "Throughput(ops/sec)" | "Operations" => Combine::Sum,
        "AverageLatency(us)" => Combine::WeightedMean,
        "MinLatency(us)" => Combine::Min,
        s if s.starts_with("Return=") => Combine::Sum,
        // run time, max latency and percentiles: the slowest client bounds the result
        _ => Combine::Max,
    }
}

/// Merge the reports of all clients of one phase.
pub fn combine(results: &[YcsbResult]) -> YcsbResult {
    let mut merged = YcsbResult::default();
    for r in results.iter() {
        for (group, stats) in r.groups.iter() {
            for stat in stats.keys() {
                if merged
                    .groups
                    .get(group)
                    .is_some_and(|s| s.contains_key(stat))
                {
                    continue;
                }
                let present: Vec<(f64, f64)> = results
                    .iter()
                    .filter_map(|r| {
                        let stats = r.groups.get(group)?;
                        let value = *stats.get(stat)?;
                        let ops = stats.get("Operations").copied().unwrap_or(0.0);
                        Some((value, ops))
                    })
                    .collect();
                let values = present.iter().map(|(v, _)| *v);
                let value = match combine_kind(stat) {
                    Combine::Sum => values.sum::<f64>(),
                    Combine::Min => values.fold(f64::INFINITY, f64::min),
                    Combine::Max => values.fold(f64::NEG_INFINITY, f64::max),
                    Combine::WeightedMean => {
                        let ops: f64 = present.iter().map(|(_, o)| *o).sum();
                        if ops > 0.0 {
                            present.iter().map(|(v, o)| v * o).sum::<f64>() / ops
                        } else {
                            values.sum::<f64>() / present.len() as f64
                        }
                    }
                };
                merged
                    .groups
                    .entry(group.clone())
                    .or_default()
                    .insert(stat.clone(), value);
            }
        }
    }
    merged
}

/// `(start, count)` of the `i`-th of `n` even shares of `total`.
fn share(total: u64, n: usize, i: usize) -> (u64, u64) {
    let start = total * i as u64 / n as u64;
    let end = total * (i as u64 + 1) / n as u64;
    (start, end - start)
}

/// Split `Statistic(unit)` into its name and unit.
fn split_unit(stat: &str) -> (&str, &str) {
    match stat.strip_suffix(')').and_then(|s| s.split_once('(')) {
        Some((name, unit)) => (name, unit),
        None => (stat, ""),
    }
}

pub struct YcsbExecutor {
    database: String,
    opt: YcsbOpt,
}

impl YcsbExecutor {
    pub fn new(database: &str, opt: &YcsbOpt) -> Self {
        Self {
            database: database.to_string(),
            opt: opt.clone(),
        }
    }

    fn threads(&self, params: &Params) -> String {
        params
            .get("threads")
            .cloned()
            .unwrap_or_else(|| self.opt.threads.to_string())
    }

    /// The shell command of one phase on one client.
    pub fn command(&self, stage: Stage, workload: &str, params: &Params) -> String {
        let dir = &self.opt.install_dir;
        let mut words = vec![
            format!("{}/bin/ycsb", dir),
            stage.to_string(),
            self.database.clone(),
            "-P".to_string(),
            format!("{}/workloads/{}", dir, workload),
            "-threads".to_string(),
            self.threads(params),
        ];
        if let Some(target) = params.get("target") {
            words.push("-target".to_string());
            words.push(target.clone());
        }
        for (k, v) in params.iter() {
            if FLAG_PARAMS.contains(&k.as_str()) {
                continue;
            }
            words.push("-p".to_string());
            words.push(format!("{}={}", k, v));
        }
        words
            .iter()
            .map(|w| shell_quote(w))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn execute(&self, vm: &dyn ClientVm, command: &str) -> Result<YcsbResult> {
        let out = vm.remote_command(command)?;
        let result = parse_output(&out.stdout).ok_or_else(|| Error::Ycsb {
            vm: vm.name().to_string(),
            reason: format!(
                "no [OVERALL] section in the output\nstdout: {}\nstderr: {}",
                out.stdout, out.stderr
            ),
        })?;
        for (group, stats) in result.groups.iter() {
            if let Some(errors) = stats.get("Return=ERROR").filter(|n| **n > 0.0) {
                warn!("{} reported {} failed {} operation(s)", vm.name(), errors, group);
            }
        }
        Ok(result)
    }

    fn phase(
        &self,
        stage: Stage,
        workload: &str,
        vms: &[Arc<dyn ClientVm>],
        params: &Params,
    ) -> Result<Vec<Sample>> {
        let n = vms.len();
        if n == 0 {
            return Err(Error::Configuration(
                "no client machines to run ycsb on".to_string(),
            ));
        }
        info!("Starting ycsb {} of {} on {} client(s)", stage, workload, n);
        let start = Instant::now();
        let clients: Vec<(usize, &Arc<dyn ClientVm>)> = vms.iter().enumerate().collect();
        let results = run_threaded(&clients, |entry| {
            let (i, vm) = *entry;
            let mut params = params.clone();
            params.insert("recordcount".to_string(), self.opt.record_count.to_string());
            match stage {
                Stage::Load => {
                    let (start, count) = share(self.opt.record_count, n, i);
                    params.insert("insertstart".to_string(), start.to_string());
                    params.insert("insertcount".to_string(), count.to_string());
                }
                Stage::Run => {
                    let (_, count) = share(self.opt.operation_count, n, i);
                    params.insert("operationcount".to_string(), count.to_string());
                }
            }
            self.execute(vm.as_ref(), &self.command(stage, workload, &params))
        });
        let results = results.into_iter().collect::<Result<Vec<_>>>()?;
        info!(
            "ycsb {} of {} finished in {:.2}s",
            stage,
            workload,
            start.elapsed().as_secs_f64()
        );
        Ok(self.samples(stage, workload, n, params, &combine(&results)))
    }

    fn samples(
        &self,
        stage: Stage,
        workload: &str,
        clients: usize,
        params: &Params,
        result: &YcsbResult,
    ) -> Vec<Sample> {
        let mut metadata = BTreeMap::new();
        metadata.insert("stage".to_string(), stage.to_string());
        metadata.insert("workload".to_string(), workload.to_string());
        metadata.insert("database".to_string(), self.database.clone());
        metadata.insert("clients".to_string(), clients.to_string());
        metadata.insert("threads".to_string(), self.threads(params));
        let mut samples = Vec::new();
        for (group, stats) in result.groups.iter() {
            for (stat, value) in stats.iter() {
                let (name, unit) = split_unit(stat);
                let metric = format!("{} {}", group.to_lowercase(), name);
                samples.push(Sample::new(&metric, *value, unit, metadata.clone()));
            }
        }
        samples
    }

    /// Populate the store from every client.
    pub fn load(&self, vms: &[Arc<dyn ClientVm>], params: &Params) -> Result<Vec<Sample>> {
        let workload = self.opt.workloads.first().ok_or_else(|| {
            Error::Configuration("ycsb.workloads should not be empty".to_string())
        })?;
        self.phase(Stage::Load, workload, vms, params)
    }

    /// Run every workload, one after another, on every client.
    pub fn run(&self, vms: &[Arc<dyn ClientVm>], params: &Params) -> Result<Vec<Sample>> {
        let mut samples = Vec::new();
        for workload in self.opt.workloads.iter() {
            samples.extend(self.phase(Stage::Run, workload, vms, params)?);
        }
        Ok(samples)
    }

    /// Load on all clients, then run on all clients. No client starts the measured phase
    /// before every client finished loading.
    pub fn load_and_run(
        &self,
        vms: &[Arc<dyn ClientVm>],
        load_params: &Params,
        run_params: &Params,
    ) -> Result<Vec<Sample>> {
        let mut samples = self.load(vms, load_params)?;
        samples.extend(self.run(vms, run_params)?);
        Ok(samples)
    }
}
