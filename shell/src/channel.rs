//! Channel names, bindings and their materialization into open streams.
//!
//! A command has exactly three channels. Each one is bound to the caller's
//! own stream, a file, an anonymous pipe to be created, or a stream that is
//! already open (typically another command's pipe end). [`Channels::open`]
//! turns the bindings into live streams right before a command starts.

use crate::command::{Stdin, Stdout};
use crate::env::Environment;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::path::PathBuf;
use std::str::FromStr;

/// One of the three recognized channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Channel {
    Stdin,
    Stdout,
    Stderr,
}

impl Channel {
    /// All channels, input first.
    pub const ALL: [Channel; 3] = [Channel::Stdin, Channel::Stdout, Channel::Stderr];

    /// Canonical channel name.
    pub fn name(self) -> &'static str {
        match self {
            Channel::Stdin => "stdin",
            Channel::Stdout => "stdout",
            Channel::Stderr => "stderr",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Channel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stdin" => Ok(Channel::Stdin),
            "stdout" => Ok(Channel::Stdout),
            "stderr" => Ok(Channel::Stderr),
            other => Err(Error::UnknownChannel(other.to_string())),
        }
    }
}

/// How a single channel is sourced or sunk.
pub enum Binding {
    /// The caller's own standard stream.
    Inherit,
    /// A file: opened read-only for stdin, created/truncated otherwise.
    Path(PathBuf),
    /// Placeholder for a fresh anonymous pipe; the other end becomes
    /// available from the command after it starts.
    Pipe,
    /// An already-open readable stream, valid for stdin only.
    Reader(Box<dyn Stdin>),
    /// An already-open writable stream, valid for stdout and stderr only.
    Writer(Box<dyn Stdout>),
}

impl Binding {
    /// Bind a file path.
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Binding::Path(path.into())
    }

    /// Bind an open readable stream.
    pub fn reader(reader: impl Stdin + 'static) -> Self {
        Binding::Reader(Box::new(reader))
    }

    /// Bind an open writable stream.
    pub fn writer(writer: impl Stdout + 'static) -> Self {
        Binding::Writer(Box::new(writer))
    }

    fn describe(&self) -> &'static str {
        match self {
            Binding::Inherit => "inherit",
            Binding::Path(_) => "path",
            Binding::Pipe => "pipe",
            Binding::Reader(_) => "reader",
            Binding::Writer(_) => "writer",
        }
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Path(path) => f.debug_tuple("Path").field(path).finish(),
            other => f.write_str(other.describe()),
        }
    }
}

/// Channel bindings requested for one invocation, keyed by channel name.
///
/// Names are only checked when the bindings are opened, so a binding for an
/// unknown channel surfaces as [`Error::UnknownChannel`] at invocation time.
/// Channels left unset are inherited.
#[derive(Debug, Default)]
pub struct Channels {
    bindings: BTreeMap<String, Binding>,
}

impl Channels {
    /// No explicit bindings: everything inherited.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind any channel by name.
    pub fn bind(mut self, name: impl Into<String>, binding: Binding) -> Self {
        self.bindings.insert(name.into(), binding);
        self
    }

    /// Bind stdin.
    pub fn stdin(self, binding: Binding) -> Self {
        self.bind(Channel::Stdin.name(), binding)
    }

    /// Bind stdout.
    pub fn stdout(self, binding: Binding) -> Self {
        self.bind(Channel::Stdout.name(), binding)
    }

    /// Bind stderr.
    pub fn stderr(self, binding: Binding) -> Self {
        self.bind(Channel::Stderr.name(), binding)
    }

    /// Replace the binding for `name`, returning the previous one.
    pub fn insert(&mut self, name: impl Into<String>, binding: Binding) -> Option<Binding> {
        self.bindings.insert(name.into(), binding)
    }

    /// Remove the binding for `name`.
    pub fn remove(&mut self, name: &str) -> Option<Binding> {
        self.bindings.remove(name)
    }

    /// Whether `name` has an explicit binding.
    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// Fail with [`Error::UnknownChannel`] if any name is not a channel.
    pub fn validate(&self) -> Result<()> {
        for name in self.bindings.keys() {
            name.parse::<Channel>()?;
        }
        Ok(())
    }

    /// Validate names, materialize pipe placeholders and open files.
    ///
    /// Nothing is opened unless every name is valid.
    pub(crate) fn open(mut self, env: &Environment) -> Result<Opened> {
        self.validate()?;
        let mut take = |channel: Channel| {
            self.bindings
                .remove(channel.name())
                .unwrap_or(Binding::Inherit)
        };
        let (stdin_binding, stdout_binding, stderr_binding) =
            (take(Channel::Stdin), take(Channel::Stdout), take(Channel::Stderr));

        let (stdin, stdin_writer) = open_input(stdin_binding, env)?;
        let (stdout, stdout_reader) = open_output(Channel::Stdout, stdout_binding, env)?;
        let (stderr, stderr_reader) = open_output(Channel::Stderr, stderr_binding, env)?;
        Ok(Opened {
            stdin,
            stdout,
            stderr,
            stdin_writer,
            stdout_reader,
            stderr_reader,
        })
    }
}

/// Live streams for one command plus the caller-side ends of any pipes.
pub(crate) struct Opened {
    pub(crate) stdin: Box<dyn Stdin>,
    pub(crate) stdout: Box<dyn Stdout>,
    pub(crate) stderr: Box<dyn Stdout>,
    pub(crate) stdin_writer: Option<Box<dyn Stdout>>,
    pub(crate) stdout_reader: Option<Box<dyn Stdin>>,
    pub(crate) stderr_reader: Option<Box<dyn Stdin>>,
}

type Input = (Box<dyn Stdin>, Option<Box<dyn Stdout>>);
type Output = (Box<dyn Stdout>, Option<Box<dyn Stdin>>);

fn open_input(binding: Binding, env: &Environment) -> Result<Input> {
    match binding {
        Binding::Inherit => Ok((Box::new(std::io::stdin()), None)),
        Binding::Path(path) => {
            let file = File::open(env.resolve(&path))?;
            Ok((Box::new(file), None))
        }
        Binding::Pipe => {
            let (reader, writer) = std::io::pipe()?;
            log::debug!("materialized pipe for stdin");
            Ok((Box::new(reader), Some(Box::new(writer))))
        }
        Binding::Reader(reader) => Ok((reader, None)),
        Binding::Writer(_) => Err(Error::Misbound {
            channel: Channel::Stdin.to_string(),
            what: "a writable stream",
        }),
    }
}

fn open_output(channel: Channel, binding: Binding, env: &Environment) -> Result<Output> {
    match binding {
        Binding::Inherit => {
            let inherited: Box<dyn Stdout> = match channel {
                Channel::Stderr => Box::new(std::io::stderr()),
                _ => Box::new(std::io::stdout()),
            };
            Ok((inherited, None))
        }
        Binding::Path(path) => {
            let file = File::create(env.resolve(&path))?;
            Ok((Box::new(file), None))
        }
        Binding::Pipe => {
            let (reader, writer) = std::io::pipe()?;
            log::debug!("materialized pipe for {}", channel);
            Ok((Box::new(writer), Some(Box::new(reader))))
        }
        Binding::Writer(writer) => Ok((writer, None)),
        Binding::Reader(_) => Err(Error::Misbound {
            channel: channel.to_string(),
            what: "a readable stream",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_adapters::{MemReader, MemWriter};
    use std::io::{Read, Write};

    #[test]
    fn test_parses_only_the_three_channel_names() {
        assert_eq!("stdin".parse::<Channel>().unwrap(), Channel::Stdin);
        assert_eq!("stderr".parse::<Channel>().unwrap(), Channel::Stderr);
        assert!(matches!(
            "stdlog".parse::<Channel>(),
            Err(Error::UnknownChannel(name)) if name == "stdlog"
        ));
    }

    #[test]
    fn test_unknown_name_fails_before_anything_is_opened() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("never-created.txt");
        let channels = Channels::new()
            .stdout(Binding::path(&target))
            .bind("stdaux", Binding::Pipe);

        let res = channels.open(&Environment::in_dir(dir.path()));
        assert!(matches!(res, Err(Error::UnknownChannel(_))));
        assert!(!target.exists());
    }

    #[test]
    fn test_pipe_placeholder_yields_connected_ends() {
        let env = Environment::new();
        let mut opened = Channels::new()
            .stdin(Binding::Pipe)
            .stdout(Binding::Pipe)
            .open(&env)
            .unwrap();

        let mut feed = opened.stdin_writer.take().unwrap();
        feed.write_all(b"in\n").unwrap();
        drop(feed);
        let mut seen = String::new();
        opened.stdin.read_to_string(&mut seen).unwrap();
        assert_eq!(seen, "in\n");

        opened.stdout.write_all(b"out\n").unwrap();
        drop(opened.stdout);
        let mut back = String::new();
        opened
            .stdout_reader
            .take()
            .unwrap()
            .read_to_string(&mut back)
            .unwrap();
        assert_eq!(back, "out\n");
        assert!(opened.stderr_reader.is_none());
    }

    #[test]
    fn test_output_path_is_truncated_and_relative_to_env() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("out.txt"), "old contents that are long").unwrap();

        let opened = Channels::new()
            .stdout(Binding::path("out.txt"))
            .open(&Environment::in_dir(dir.path()))
            .unwrap();
        let mut out = opened.stdout;
        out.write_all(b"new\n").unwrap();
        drop(out);

        let written = std::fs::read_to_string(dir.path().join("out.txt")).unwrap();
        assert_eq!(written, "new\n");
    }

    #[test]
    fn test_streams_must_match_direction() {
        let env = Environment::new();
        let wrong_in = Channels::new().stdin(Binding::writer(MemWriter::new())).open(&env);
        assert!(matches!(wrong_in, Err(Error::Misbound { .. })));

        let wrong_out = Channels::new()
            .stderr(Binding::reader(MemReader::new("x")))
            .open(&env);
        assert!(matches!(wrong_out, Err(Error::Misbound { .. })));
    }
}
