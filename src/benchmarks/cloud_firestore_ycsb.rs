//! YCSB against a Google Cloud Firestore collection.
//!
//! Every run writes into its own collection `pkb-<run_id>`, which the cleanup stage deletes
//! again. The clients authenticate with a service account key that is copied to each of them
//! during prepare; see [`crate::resources::firestore`] for the options of the collection.

use crate::bench::{Benchmark, RunContext};
use crate::benchmarks::Registry;
use crate::cmd::CommandRunner;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::resources::firestore::{FirestoreCollection, FirestoreOpt};
use crate::resources::{resource_name, ManagedResource, Resource, ResourceIdentity};
use crate::thread::run_threaded_all;
use crate::ycsb::{Params, YcsbExecutor, YcsbOpt};
use crate::Sample;
use log::info;
use std::path::Path;
use std::sync::Arc;

pub const BENCHMARK_NAME: &str = "cloud_firestore_ycsb";

pub const BENCHMARK_CONFIG: &str = r#"
[benchmark]
name = "cloud_firestore_ycsb"
description = "Run YCSB against Google Cloud Firestore. Configure the number of client machines with vm_groups.default.vm_count."

[vm_groups.default]
vm_count = 1
machine_type = "n1-standard-1"
"#;

/// Where the service account key lands on every client.
pub const PRIVATE_KEYFILE_DIR: &str = "/tmp/serviceAccountKey.json";

const DATABASE: &str = "googlefirestore";

pub struct CloudFirestoreYcsb {
    opt: FirestoreOpt,
    ycsb: YcsbOpt,
    zone: String,
    runner: CommandRunner,
}

impl CloudFirestoreYcsb {
    pub fn new(config: &Config, runner: CommandRunner) -> Result<Self> {
        Ok(Self {
            opt: FirestoreOpt::from_table(&config.benchmark.opt)?,
            ycsb: config.ycsb.clone(),
            zone: config.zone().to_string(),
            runner,
        })
    }

    pub fn new_benchmark(config: &Config, runner: CommandRunner) -> Result<Box<dyn Benchmark>> {
        Ok(Box::new(Self::new(config, runner)?))
    }

    /// The parameters of the load and the run phase, in this order.
    pub fn parameters(&self, run_id: &str) -> (Params, Params) {
        let mut run_params = Params::new();
        run_params.insert(
            "googlefirestore.serviceAccountKey".to_string(),
            PRIVATE_KEYFILE_DIR.to_string(),
        );
        run_params.insert(
            "googlefirestore.projectId".to_string(),
            self.opt.project.clone(),
        );
        run_params.insert("googlefirestore.debug".to_string(), self.opt.debug.clone());
        run_params.insert("table".to_string(), resource_name(run_id));
        let mut load_params = run_params.clone();
        if let Some(threads) = self.ycsb.preload_threads {
            load_params.insert("threads".to_string(), threads.to_string());
        }
        (load_params, run_params)
    }
}

impl Benchmark for CloudFirestoreYcsb {
    fn name(&self) -> &str {
        BENCHMARK_NAME
    }

    fn check_prerequisites(&self) -> Result<()> {
        self.opt.sanity()
    }

    fn resource(&self, run_id: &str) -> Result<Box<dyn Resource>> {
        let identity = ResourceIdentity::for_run(run_id, &self.opt.project, &self.zone);
        Ok(Box::new(FirestoreCollection::new(
            identity,
            &self.opt,
            self.runner.clone(),
        )))
    }

    fn prepare(&self, ctx: &mut RunContext) -> Result<()> {
        ctx.always_call_cleanup = true;
        let resource = Arc::new(ManagedResource::new(self.resource(&ctx.run_id)?));
        ctx.resource = Some(resource.clone());
        resource.create()?;

        let package = self.ycsb.package();
        let keyfile = Path::new(&self.opt.keyfile);
        run_threaded_all(
            &ctx.vms,
            |vm| vm.name().to_string(),
            |vm| {
                vm.install(&package)?;
                vm.remote_copy(keyfile, PRIVATE_KEYFILE_DIR)
            },
        )?;
        info!("YCSB is ready on {} client(s)", ctx.vms.len());
        ctx.executor = Some(YcsbExecutor::new(DATABASE, &self.ycsb));
        Ok(())
    }

    fn run(&self, ctx: &mut RunContext) -> Result<Vec<Sample>> {
        let executor = ctx
            .executor
            .as_ref()
            .ok_or_else(|| Error::Configuration("run called before prepare".to_string()))?;
        let (load_params, run_params) = self.parameters(&ctx.run_id);
        executor.load_and_run(&ctx.vms, &load_params, &run_params)
    }

    fn cleanup(&self, ctx: &mut RunContext) -> Result<()> {
        match &ctx.resource {
            Some(resource) => resource.delete(),
            None => {
                info!("No collection was provisioned for run {}", ctx.run_id);
                Ok(())
            }
        }
    }
}

inventory::submit! {
    Registry::new(BENCHMARK_NAME, BENCHMARK_CONFIG, CloudFirestoreYcsb::new_benchmark)
}
