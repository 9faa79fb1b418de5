//! Loading the configuration of a benchmark run.
//!
//! ## Configuration Format
//!
//! A configuration file is formatted in TOML. Only the `[benchmark]` section with its `name` is
//! required; everything else falls back to the defaults registered with the benchmark, and then
//! to the defaults of each section.
//!
//! ```toml
//! [benchmark]
//! name = "cloud_firestore_ycsb"
//! # benchmark-specific options
//!
//! [run]
//! run_id = "abc123"  # default: 8 random hex digits
//! zone = "us-central1-a"
//!
//! [vm_groups.default]
//! # see `crate::vm`
//!
//! [ycsb]
//! # see `crate::ycsb`
//!
//! [retry]
//! # see `crate::cmd`
//! ```
//!
//! The sources are layered, later ones winning:
//!
//! 1. the default configuration registered by the benchmark,
//! 2. the user's file,
//! 3. environment variables: `CLOUDBENCH_<SECTION>__<KEY>`, e.g. `CLOUDBENCH_YCSB__THREADS=4`,
//! 4. command line overrides ([`Overrides`]).

use crate::cmd::RetryOpt;
use crate::error::{Error, Result};
use crate::ycsb::YcsbOpt;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

const ENV_PREFIX: &str = "CLOUDBENCH_";

/// The `[benchmark]` section. Options other than `name` and `description` are handed to the
/// benchmark's constructor.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct BenchmarkSection {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(flatten)]
    pub opt: toml::Table,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct RunOpt {
    /// Unique id of the run. Every resource the run provisions is named after it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
}

fn one() -> usize {
    1
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct VmGroupOpt {
    #[serde(default = "one")]
    pub vm_count: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_type: Option<String>,

    #[serde(default)]
    pub hosts: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh_key: Option<PathBuf>,

    #[serde(default)]
    pub local: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Config {
    pub benchmark: BenchmarkSection,

    #[serde(default)]
    pub run: RunOpt,

    #[serde(default)]
    pub vm_groups: BTreeMap<String, VmGroupOpt>,

    #[serde(default)]
    pub ycsb: YcsbOpt,

    #[serde(default)]
    pub retry: RetryOpt,
}

/// Settings given on the command line. They override every other source.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub run_id: Option<String>,

    /// Number of client machines of the `default` VM group.
    pub client_vms: Option<usize>,

    /// Number of YCSB threads of the load phase.
    pub preload_threads: Option<usize>,
}

impl Overrides {
    pub fn apply(&self, config: &mut Config) {
        if let Some(run_id) = &self.run_id {
            config.run.run_id = Some(run_id.clone());
        }
        if let Some(n) = self.client_vms {
            config
                .vm_groups
                .entry("default".to_string())
                .or_insert_with(|| VmGroupOpt {
                    vm_count: n,
                    machine_type: None,
                    hosts: Vec::new(),
                    user: None,
                    ssh_key: None,
                    local: false,
                })
                .vm_count = n;
        }
        if let Some(n) = self.preload_threads {
            config.ycsb.preload_threads = Some(n);
        }
    }
}

/// The name of the benchmark a user configuration asks for.
pub fn benchmark_name(text: &str) -> Result<String> {
    let name = Figment::new()
        .merge(Toml::string(text))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract_inner::<String>("benchmark.name")?;
    Ok(name)
}

impl Config {
    /// Merge a benchmark's default configuration, the user's configuration and the
    /// environment.
    pub fn load(default: &str, text: &str) -> Result<Self> {
        let figment = Figment::new()
            .merge(Toml::string(default))
            .merge(Toml::string(text))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        let config: Config = figment.extract()?;
        debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }

    /// The id of this run, generated on first use when the configuration has none.
    pub fn ensure_run_id(&mut self) -> String {
        self.run
            .run_id
            .get_or_insert_with(|| format!("{:08x}", rand::random::<u32>()))
            .clone()
    }

    pub fn zone(&self) -> &str {
        self.run.zone.as_deref().unwrap_or_default()
    }

    /// Reject configurations that cannot run, before anything is provisioned.
    pub fn sanity(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::Configuration(msg));
        if let Some(run_id) = &self.run.run_id {
            let valid = !run_id.is_empty()
                && run_id
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
            if !valid {
                return invalid(format!(
                    "run_id should be lowercase letters and digits, got {:?}",
                    run_id
                ));
            }
        }
        if self.vm_groups.is_empty() {
            return invalid("at least one vm group should be given".to_string());
        }
        for (name, group) in self.vm_groups.iter() {
            if group.vm_count == 0 {
                return invalid(format!("vm_count of group {} should be positive", name));
            }
            if !group.local && group.hosts.len() < group.vm_count {
                return invalid(format!(
                    "vm group {} needs {} host(s) but lists {}",
                    name,
                    group.vm_count,
                    group.hosts.len()
                ));
            }
        }
        self.ycsb.sanity()?;
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts should be positive".to_string());
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Configuration(e.to_string()))
    }

    #[cfg(test)]
    pub(crate) fn for_test() -> Self {
        Figment::new()
            .merge(Toml::string(
                r#"
                [benchmark]
                name = "test"

                [run]
                run_id = "abc123"

                [vm_groups.default]
                local = true
                "#,
            ))
            .extract()
            .unwrap()
    }
}
