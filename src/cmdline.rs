use crate::bench::{run_benchmark, RunContext};
use crate::benchmarks::{self, Registry};
use crate::cmd::CommandRunner;
use crate::config::{benchmark_name, Config, Overrides};
use crate::error::{Error, Result};
use crate::resources::ManagedResource;
use crate::vm;
use clap::ValueHint::FilePath;
use clap::{Args, Parser, Subcommand};
use log::{debug, error, info, warn};
use std::fs::read_to_string;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Args, Debug)]
struct OverrideArgs {
    #[arg(long)]
    #[arg(help = "Id of the run, names every resource it provisions")]
    run_id: Option<String>,

    #[arg(long)]
    #[arg(help = "Number of client machines in the default VM group")]
    client_vms: Option<usize>,

    #[arg(long)]
    #[arg(help = "Number of YCSB threads per client in the load phase")]
    preload_threads: Option<usize>,
}

impl OverrideArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            run_id: self.run_id.clone(),
            client_vms: self.client_vms,
            preload_threads: self.preload_threads,
        }
    }
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(short = 'c')]
    #[arg(value_hint = FilePath)]
    #[arg(help = "Path to the benchmark's TOML config file")]
    config: String,

    #[command(flatten)]
    overrides: OverrideArgs,

    #[arg(long)]
    #[arg(help = "Print samples as JSON lines")]
    json: bool,
}

#[derive(Args, Debug)]
struct DeleteArgs {
    #[arg(short = 'c')]
    #[arg(value_hint = FilePath)]
    #[arg(help = "Path to the benchmark's TOML config file")]
    config: String,

    #[arg(long)]
    #[arg(help = "Id of the run whose resources are deleted")]
    run_id: String,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    #[arg(short = 'c')]
    #[arg(value_hint = FilePath)]
    #[arg(help = "Path to the benchmark's TOML config file")]
    config: String,

    #[command(flatten)]
    overrides: OverrideArgs,
}

#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Run a benchmark and print its samples")]
    Run(RunArgs),
    #[command(about = "Delete the resources left behind by a run")]
    Delete(DeleteArgs),
    #[command(about = "Print the merged configuration of a benchmark")]
    Config(ConfigArgs),
    #[command(about = "List all registered benchmarks")]
    List,
}

fn load(path: &str, overrides: &Overrides) -> Result<(Config, &'static Registry<'static>)> {
    let text = read_to_string(path)?;
    let name = benchmark_name(&text)?;
    let registry = benchmarks::find(&name)
        .ok_or_else(|| Error::Configuration(format!("unknown benchmark {:?}", name)))?;
    let mut config = Config::load(registry.config(), &text)?;
    overrides.apply(&mut config);
    config.ensure_run_id();
    config.sanity()?;
    Ok((config, registry))
}

/// Returns whether the run's resources were released.
fn run_cli(args: &RunArgs) -> Result<bool> {
    let (mut config, registry) = load(&args.config, &args.overrides.overrides())?;
    let run_id = config.ensure_run_id();
    let runner = CommandRunner::system(config.retry.clone());
    let benchmark = registry.build(&config, runner.clone())?;
    let vms = vm::pool(&config, &runner)?;

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
        warn!("SIGINT received, stopping after the current stage");
    })
    .map_err(|e| Error::Configuration(format!("cannot set the Ctrl-C handler: {}", e)))?;

    let mut ctx = RunContext::new(&run_id, vms).with_interrupt(interrupted);
    let outcome = run_benchmark(benchmark.as_ref(), &mut ctx)?;
    for sample in outcome.samples.iter() {
        if args.json {
            println!("{}", serde_json::to_string(sample)?);
        } else {
            println!("{}", sample);
        }
    }
    Ok(outcome.cleanup_error.is_none())
}

fn delete_cli(args: &DeleteArgs) -> Result<bool> {
    let overrides = Overrides {
        run_id: Some(args.run_id.clone()),
        ..Default::default()
    };
    let (config, registry) = load(&args.config, &overrides)?;
    let runner = CommandRunner::system(config.retry.clone());
    let benchmark = registry.build(&config, runner)?;
    let resource = ManagedResource::existing(benchmark.resource(&args.run_id)?);
    resource.delete()?;
    info!("Deleted {}", resource.identity().full_name());
    Ok(true)
}

fn config_cli(args: &ConfigArgs) -> Result<bool> {
    let (config, _) = load(&args.config, &args.overrides.overrides())?;
    print!("{}", config.to_toml()?);
    Ok(true)
}

fn list_cli() -> Result<bool> {
    for r in benchmarks::iter() {
        println!("Registered benchmark: {}", r.name);
    }
    Ok(true)
}

/// The default command line interface.
///
/// This function is public and can be called in a different crate. For example, one can add
/// their own benchmarks by registering them with [`inventory`] (see [`crate::benchmarks`]).
/// Then, calling this function will produce a binary that has the same usage as the one in this
/// crate.
///
/// ## Usage
///
/// To get the usage of the command line interface, users can run:
///
/// ```bash
/// cloudbench -h
/// ```
///
/// The interface supports four modes, `run`, `delete`, `config` and `list`. Logging is controlled
/// by `RUST_LOG`, e.g. `RUST_LOG=info` shows every stage and `RUST_LOG=debug` every external
/// command.
///
/// ### Run mode
///
/// Usage:
///
/// ```bash
/// cloudbench run -c <CONFIG> [--run-id <ID>] [--client-vms <N>] [--preload-threads <N>] [--json]
/// ```
///
/// Where `CONFIG` is the path to the benchmark configuration file; its format is documented in
/// [`crate::config`]. The samples are printed one per line once the run and its cleanup are
/// done. The process exits with status 1 if the run failed, and also if the run succeeded but
/// its resources could not be deleted.
///
/// Ctrl-C stops the run at the next stage boundary. Provisioned resources are still deleted.
///
/// ### Delete mode
///
/// Usage:
///
/// ```bash
/// cloudbench delete -c <CONFIG> --run-id <ID>
/// ```
///
/// Deletes what the run `ID` provisioned, for runs whose cleanup failed or was killed.
///
/// ### Config mode
///
/// Usage:
///
/// ```bash
/// cloudbench config -c <CONFIG>
/// ```
///
/// Prints the configuration after merging the defaults, the file, the environment and the
/// command line.
///
/// ### List mode
///
/// Usage:
/// ``` bash
/// cloudbench list
/// ```
///
/// This command lists all registered benchmarks' names.
pub fn cmdline() {
    env_logger::init();
    let cli = Cli::parse();
    debug!("Starting cloudbench with args: {:?}", cli);
    let result = match cli.command {
        Commands::Run(args) => run_cli(&args),
        Commands::Delete(args) => delete_cli(&args),
        Commands::Config(args) => config_cli(&args),
        Commands::List => list_cli(),
    };
    match result {
        Ok(true) => {}
        Ok(false) => {
            error!("Resources of the run may be left behind, see the log above");
            std::process::exit(1);
        }
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}
