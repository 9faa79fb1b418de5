use thiserror::Error;

/// All the ways a benchmark invocation can fail.
#[derive(Debug, Error)]
pub enum Error {
    /// A required configuration value is missing or invalid. Raised before any external call.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An external command exited non-zero after all of its attempts.
    #[error(
        "command `{}` failed with exit code {exit_code}\nstdout: {stdout}\nstderr: {stderr}",
        argv.join(" ")
    )]
    CommandFailed {
        argv: Vec<String>,
        stdout: String,
        stderr: String,
        exit_code: i32,
    },

    /// The external command could not be started at all.
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Presence of a resource could not be determined.
    #[error("cannot determine whether {name} exists: {reason}")]
    AmbiguousState { name: String, reason: String },

    /// One or more client machines failed to set up.
    #[error("setup failed on {} client(s): {}", failures.len(), describe(failures))]
    PartialInstall { failures: Vec<(String, Error)> },

    /// A paginated delete stopped before the collection was empty.
    #[error("deleted {deleted} document(s) from {collection} but stopped: {reason}")]
    DeleteIncomplete {
        collection: String,
        deleted: usize,
        reason: String,
    },

    /// YCSB ran but its output could not be turned into results.
    #[error("ycsb on {vm}: {reason}")]
    Ycsb { vm: String, reason: String },

    /// A per-machine task panicked.
    #[error("task {0} panicked")]
    Panicked(String),

    /// The process received an interrupt between stages.
    #[error("interrupted")]
    Interrupted,

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Figment(#[from] Box<figment::Error>),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn describe(failures: &[(String, Error)]) -> String {
    failures
        .iter()
        .map(|(vm, e)| format!("[{}] {}", vm, e))
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<figment::Error> for Error {
    fn from(e: figment::Error) -> Self {
        Error::Figment(Box::new(e))
    }
}

impl Error {
    /// The stderr of a failed command, if this error came from one.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Error::CommandFailed { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
