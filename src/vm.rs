//! Client machines that run the benchmark executable.
//!
//! Provisioning the machines is not this crate's business: a VM group in the configuration
//! either lists hosts reachable over `ssh`, or asks for the local machine.
//!
//! ## Configuration Format
//!
//! ```toml
//! [vm_groups.default]
//! vm_count = 2                      # how many clients of this group take part
//! machine_type = "n1-standard-1"    # informational, reported with the samples
//! hosts = ["10.0.0.2", "10.0.0.3"]  # at least `vm_count` hosts
//! user = "perfkit"                  # optional ssh user
//! ssh_key = "/home/me/.ssh/id_rsa"  # optional ssh identity
//!
//! [vm_groups.local]
//! vm_count = 1
//! local = true                      # run on this machine, no ssh
//! ```

use crate::cmd::{shell_quote, CommandOutput, CommandRunner, IssueOpt};
use crate::config::{Config, VmGroupOpt};
use crate::error::{Error, Result};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Something that can be installed on a client machine.
#[derive(Clone, Debug, PartialEq)]
pub struct Package {
    pub name: String,

    /// A shell script that installs the package. It must be safe to run twice.
    pub install_script: String,
}

pub trait ClientVm: Send + Sync {
    fn name(&self) -> &str;

    /// Run a shell command on the machine. A non-zero exit is an error.
    fn remote_command(&self, command: &str) -> Result<CommandOutput>;

    /// Copy a local file to `remote` on the machine.
    fn remote_copy(&self, local: &Path, remote: &str) -> Result<()>;

    fn install(&self, package: &Package) -> Result<()> {
        info!("Installing {} on {}", package.name, self.name());
        self.remote_command(&package.install_script).map(|_| ())
    }
}

const SSH_OPTS: [&str; 8] = [
    "-o",
    "StrictHostKeyChecking=no",
    "-o",
    "UserKnownHostsFile=/dev/null",
    "-o",
    "ConnectTimeout=10",
    "-o",
    "LogLevel=ERROR",
];

/// A machine reached over `ssh` and `scp`.
pub struct SshVm {
    name: String,
    host: String,
    user: Option<String>,
    ssh_key: Option<PathBuf>,
    runner: CommandRunner,
}

impl SshVm {
    pub fn new(
        name: &str,
        host: &str,
        user: Option<&str>,
        ssh_key: Option<&Path>,
        runner: CommandRunner,
    ) -> Self {
        Self {
            name: name.to_string(),
            host: host.to_string(),
            user: user.map(|u| u.to_string()),
            ssh_key: ssh_key.map(|k| k.to_path_buf()),
            runner,
        }
    }

    fn target(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }

    fn base(&self, program: &str) -> Vec<String> {
        let mut argv = vec![program.to_string()];
        argv.extend(SSH_OPTS.iter().map(|s| s.to_string()));
        if let Some(key) = &self.ssh_key {
            argv.push("-i".to_string());
            argv.push(key.to_string_lossy().to_string());
        }
        argv
    }
}

impl ClientVm for SshVm {
    fn name(&self) -> &str {
        &self.name
    }

    fn remote_command(&self, command: &str) -> Result<CommandOutput> {
        let mut argv = self.base("ssh");
        argv.push(self.target());
        argv.push(command.to_string());
        self.runner.issue(&argv, IssueOpt::default())
    }

    fn remote_copy(&self, local: &Path, remote: &str) -> Result<()> {
        let mut argv = self.base("scp");
        argv.push(local.to_string_lossy().to_string());
        argv.push(format!("{}:{}", self.target(), remote));
        self.runner.issue(&argv, IssueOpt::retryable()).map(|_| ())
    }
}

/// The machine this process runs on.
pub struct LocalVm {
    name: String,
    runner: CommandRunner,
}

impl LocalVm {
    pub fn new(name: &str, runner: CommandRunner) -> Self {
        Self {
            name: name.to_string(),
            runner,
        }
    }
}

impl ClientVm for LocalVm {
    fn name(&self) -> &str {
        &self.name
    }

    fn remote_command(&self, command: &str) -> Result<CommandOutput> {
        self.runner.issue(&["sh", "-c", command], IssueOpt::default())
    }

    fn remote_copy(&self, local: &Path, remote: &str) -> Result<()> {
        let local = local.to_string_lossy();
        let script = format!("cp {} {}", shell_quote(&local), shell_quote(remote));
        self.remote_command(&script).map(|_| ())
    }
}

fn group(name: &str, opt: &VmGroupOpt, runner: &CommandRunner) -> Result<Vec<Arc<dyn ClientVm>>> {
    if opt.local {
        return Ok((0..opt.vm_count)
            .map(|i| {
                Arc::new(LocalVm::new(&format!("{}-{}", name, i), runner.clone()))
                    as Arc<dyn ClientVm>
            })
            .collect());
    }
    if opt.hosts.len() < opt.vm_count {
        return Err(Error::Configuration(format!(
            "vm group {} needs {} host(s) but lists {}",
            name,
            opt.vm_count,
            opt.hosts.len()
        )));
    }
    Ok(opt.hosts[..opt.vm_count]
        .iter()
        .enumerate()
        .map(|(i, host)| {
            Arc::new(SshVm::new(
                &format!("{}-{}", name, i),
                host,
                opt.user.as_deref(),
                opt.ssh_key.as_deref(),
                runner.clone(),
            )) as Arc<dyn ClientVm>
        })
        .collect())
}

/// Every client machine of every VM group, groups in name order.
pub fn pool(config: &Config, runner: &CommandRunner) -> Result<Vec<Arc<dyn ClientVm>>> {
    let mut vms = Vec::new();
    for (name, opt) in config.vm_groups.iter() {
        vms.extend(group(name, opt, runner)?);
    }
    info!("Client pool: {} machine(s)", vms.len());
    Ok(vms)
}
