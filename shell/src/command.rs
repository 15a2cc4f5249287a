use crate::channel::Channels;
use crate::env::Environment;
use crate::error::Result;
use std::fs::File;
use std::io::{PipeReader, PipeWriter, Read, Write};
use std::process::{ChildStderr, ChildStdin, ChildStdout, Stdio};

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// Function commands report 0 unless fault reporting is switched on.
pub type ExitCode = i32;

/// Abstraction over a readable stream that can be bound as a command's input.
///
/// OS-backed streams (files, pipe ends, child pipes) convert straight into a
/// [`Stdio`] handle. In-memory streams have no handle and hand themselves back
/// so that the caller can pump them through a pipe instead.
pub trait Stdin: Read + Send {
    /// Convert this input into a [`Stdio`] handle suitable for `std::process::Command`.
    fn stdio(self: Box<Self>) -> std::result::Result<Stdio, Box<dyn Read + Send>>;
}

/// Abstraction over a writable stream that can be bound as a command's output.
///
/// See [`Stdin`] for the meaning of the error branch.
pub trait Stdout: Write + Send {
    /// Convert this output into a [`Stdio`] handle suitable for `std::process::Command`.
    fn stdio(self: Box<Self>) -> std::result::Result<Stdio, Box<dyn Write + Send>>;
}

macro_rules! os_stdin {
    ($($ty:ty),*) => {$(
        impl Stdin for $ty {
            fn stdio(self: Box<Self>) -> std::result::Result<Stdio, Box<dyn Read + Send>> {
                Ok((*self).into())
            }
        }
    )*};
}

macro_rules! os_stdout {
    ($($ty:ty),*) => {$(
        impl Stdout for $ty {
            fn stdio(self: Box<Self>) -> std::result::Result<Stdio, Box<dyn Write + Send>> {
                Ok((*self).into())
            }
        }
    )*};
}

os_stdin!(File, PipeReader, ChildStdout, ChildStderr);
os_stdout!(File, PipeWriter, ChildStdin);

/// Which executor runs a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// An in-process function driven through the generator protocol.
    Function,
    /// A native child process.
    Process,
}

/// Object-safe interface shared by function and process commands.
///
/// A command is started at most once. After [`Command::start`] returns, every
/// channel bound to [`crate::Binding::Pipe`] has a live counterpart that can be
/// taken with the matching `take_*` method.
pub trait Command: Send {
    /// Bind channels and begin execution without blocking.
    fn start(&mut self, channels: Channels) -> Result<()>;

    /// Block until the command finished and return its exit code.
    fn wait(&mut self) -> Result<ExitCode>;

    /// Terminal exit code, or `None` while running or before start.
    fn status(&self) -> Option<ExitCode>;

    /// Writable end of a piped stdin.
    fn take_stdin(&mut self) -> Option<Box<dyn Stdout>>;

    /// Readable end of a piped stdout.
    fn take_stdout(&mut self) -> Option<Box<dyn Stdin>>;

    /// Readable end of a piped stderr.
    fn take_stderr(&mut self) -> Option<Box<dyn Stdin>>;

    /// Executor backing this command.
    fn kind(&self) -> CommandKind;

    /// Start and, when `wait` is set, block for the exit code.
    fn invoke(&mut self, wait: bool, channels: Channels) -> Result<Option<ExitCode>> {
        self.start(channels)?;
        if wait {
            return self.wait().map(Some);
        }
        Ok(None)
    }
}

/// Factory that turns positional arguments into a runnable command.
///
/// Namespaces hand these out by name; see [`crate::Namespace`].
pub trait CommandFactory: Send + Sync {
    /// Create a fresh, unstarted command for the provided arguments.
    fn create(&self, env: &Environment, args: &[String]) -> Result<Box<dyn Command>>;

    /// One-line description shown in command listings.
    fn description(&self) -> &str {
        ""
    }
}

/// Convert flags and dash-args into the argument list handed to a command.
///
/// Arguments pass through unchanged for now; both executors route through
/// here so the conversion has a single home.
pub fn canonicalize(args: &[String]) -> Vec<String> {
    args.to_vec()
}

impl std::fmt::Debug for dyn Stdin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Stdin")
    }
}

impl std::fmt::Debug for dyn Stdout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Stdout")
    }
}
