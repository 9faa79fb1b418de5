//! Scripted stand-ins for processes and client machines, shared by the unit tests.

use crate::cmd::{CommandOutput, Spawn};
use crate::error::{Error, Result};
use crate::vm::ClientVm;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

pub fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        argv: Vec::new(),
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code: 0,
    }
}

pub fn fail(exit_code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        argv: Vec::new(),
        stdout: String::new(),
        stderr: stderr.to_string(),
        exit_code,
    }
}

type Responder = Box<dyn Fn(&[String]) -> CommandOutput + Send + Sync>;

/// Answers every command with a closure and records what was asked.
pub struct FakeSpawn {
    calls: Mutex<Vec<Vec<String>>>,
    respond: Responder,
}

impl FakeSpawn {
    pub fn new(
        respond: impl Fn(&[String]) -> CommandOutput + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            respond: Box::new(respond),
        })
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }
}

impl Spawn for FakeSpawn {
    fn spawn(&self, argv: &[String]) -> std::io::Result<CommandOutput> {
        self.calls.lock().push(argv.to_vec());
        let mut output = (self.respond)(argv);
        output.argv = argv.to_vec();
        Ok(output)
    }
}

/// A client machine that records commands and copies, and answers with a closure.
pub struct FakeVm {
    name: String,
    pub log: Arc<Mutex<Vec<String>>>,
    respond: Responder,
}

impl FakeVm {
    pub fn new(
        name: &str,
        log: Arc<Mutex<Vec<String>>>,
        respond: impl Fn(&[String]) -> CommandOutput + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            log,
            respond: Box::new(respond),
        }
    }
}

impl ClientVm for FakeVm {
    fn name(&self) -> &str {
        &self.name
    }

    fn remote_command(&self, command: &str) -> Result<CommandOutput> {
        self.log.lock().push(format!("{}: {}", self.name, command));
        let argv = vec![self.name.clone(), command.to_string()];
        let output = (self.respond)(&argv);
        if output.success() {
            Ok(output)
        } else {
            Err(Error::CommandFailed {
                argv,
                stdout: output.stdout,
                stderr: output.stderr,
                exit_code: output.exit_code,
            })
        }
    }

    fn remote_copy(&self, local: &Path, remote: &str) -> Result<()> {
        self.log
            .lock()
            .push(format!("{}: copy {} {}", self.name, local.display(), remote));
        Ok(())
    }
}
