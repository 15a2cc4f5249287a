use crate::config::ExecutionMode;
use thiserror::Error;

/// Errors raised to the caller that builds or invokes a command.
///
/// Once a command is running, failures are reported through its exit code
/// instead; nothing here is produced from inside a worker.
#[derive(Error, Debug)]
pub enum Error {
    #[error("unknown channel '{0}' (expected stdin, stdout or stderr)")]
    UnknownChannel(String),
    #[error("channel '{channel}' cannot be bound to {what}")]
    Misbound { channel: String, what: &'static str },
    #[error("command '{program}' could not be spawned: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("command was already started")]
    AlreadyStarted,
    #[error("command was not started yet")]
    NotStarted,
    #[error("{command}: {message}")]
    Usage { command: String, message: String },
    #[error("no scope named '{0}' is registered")]
    UnknownScope(String),
    #[error("execution mode {0:?} is not implemented")]
    UnsupportedMode(ExecutionMode),
    #[error(transparent)]
    Factory(#[from] anyhow::Error),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
