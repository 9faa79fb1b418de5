//! The registered benchmarks.
//!
//! A configuration file selects its benchmark by `benchmark.name`. Each benchmark registers its
//! name, its default configuration (the bottom layer described in [`crate::config`]) and a
//! constructor with [`inventory`]. A minimal example would be: `inventory::submit! {
//! Registry::new("name", DEFAULT_CONFIG, constructor_fn) };`.
//!
//! [`cloud_firestore_ycsb`] is a complete example of this process.

use crate::bench::Benchmark;
use crate::cmd::CommandRunner;
use crate::config::Config;
use crate::error::Result;
use hashbrown::HashMap;
use log::debug;

pub mod cloud_firestore_ycsb;

type Constructor = fn(&Config, CommandRunner) -> Result<Box<dyn Benchmark>>;

/// A registered benchmark. Use [`inventory::submit!`] to add one.
#[derive(Debug)]
pub struct Registry<'a> {
    pub(crate) name: &'a str,
    pub(crate) config: &'a str,
    constructor: Constructor,
}

impl<'a> Registry<'a> {
    pub const fn new(name: &'a str, config: &'a str, constructor: Constructor) -> Self {
        Self {
            name,
            config,
            constructor,
        }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    /// The default configuration of the benchmark, in TOML.
    pub fn config(&self) -> &str {
        self.config
    }

    pub fn build(&self, config: &Config, runner: CommandRunner) -> Result<Box<dyn Benchmark>> {
        (self.constructor)(config, runner)
    }
}

inventory::collect!(Registry<'static>);

fn registered() -> HashMap<&'static str, &'static Registry<'static>> {
    let mut registered = HashMap::new();
    for r in inventory::iter::<Registry> {
        debug!("Adding supported benchmark: {}", r.name);
        assert!(registered.insert(r.name, r).is_none()); // no existing name
    }
    registered
}

/// Look up a benchmark by the name used in configuration files.
pub fn find(name: &str) -> Option<&'static Registry<'static>> {
    registered().get(name).copied()
}

/// All registered benchmarks, sorted by name.
pub fn iter() -> Vec<&'static Registry<'static>> {
    let mut all: Vec<_> = registered().into_values().collect();
    all.sort_by_key(|r| r.name);
    all
}
