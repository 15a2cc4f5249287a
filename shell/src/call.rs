//! Lazily invoked calls and the ways to combine them.
//!
//! - [`CommandCall`]: one command, executed at most once.
//! - [`PipingCall`]: a flat chain of commands, each stdout feeding the next stdin.
//! - [`FunnelCall`]: a call whose stdout goes to a freshly truncated file.
//!
//! Calls are built with [`pipe`] and [`redirect_to`] (or the matching
//! methods) and run with [`Call::call`], [`Call::run`] or by collecting
//! their output with [`Call::output`] / [`Call::capture`].

use crate::channel::{Binding, Channel, Channels};
use crate::command::{Command, CommandKind, ExitCode, Stdin, Stdout};
use crate::error::{Error, Result};
use std::io::{self, Read};
use std::path::PathBuf;
use std::thread;

/// Marker returned by [`Call::render`].
///
/// An interactive output layer that sees this value drops it together with
/// the character written right before it.
pub const SUPPRESS_SENTINEL: &str = "--DELETE NEXT 348ty1[29yavi--";

/// Where a call is in its single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Unstarted,
    Called,
    Finished(ExitCode),
}

/// Everything a finished call wrote, decoded as UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captured {
    pub stdout: String,
    pub stderr: String,
    pub status: ExitCode,
}

/// Output of [`Call::output`]: stdout text, then stderr text.
///
/// Empty when the call had already been invoked.
#[derive(Debug, Default)]
pub struct Output {
    parts: std::vec::IntoIter<String>,
}

impl Iterator for Output {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.parts.next()
    }
}

impl From<Captured> for Output {
    fn from(captured: Captured) -> Self {
        Self {
            parts: vec![captured.stdout, captured.stderr].into_iter(),
        }
    }
}

/// Behavior shared by every kind of call.
pub trait Call: Send {
    /// Invoke with per-channel overrides (unset channels are inherited).
    ///
    /// Returns the exit code when `wait` is set. A call that was already
    /// invoked does nothing and returns `Ok(None)`.
    fn call(&mut self, wait: bool, channels: Channels) -> Result<Option<ExitCode>>;

    /// Block until the invoked call finished.
    fn wait(&mut self) -> Result<ExitCode>;

    /// Current lifecycle state.
    fn status(&self) -> CallStatus;

    /// Writable end of the first command's piped stdin.
    fn take_stdin(&mut self) -> Option<Box<dyn Stdout>>;

    /// Readable end of the last command's piped stdout.
    fn take_stdout(&mut self) -> Option<Box<dyn Stdin>>;

    /// Readable end of the last command's piped stderr.
    fn take_stderr(&mut self) -> Option<Box<dyn Stdin>>;

    /// Invoke with everything inherited and wait.
    fn run(&mut self) -> Result<ExitCode> {
        match self.call(true, Channels::new())? {
            Some(code) => Ok(code),
            None => self.wait(),
        }
    }

    /// Invoke with stdout and stderr piped back, read both and wait.
    fn capture(&mut self) -> Result<Captured> {
        if self.status() != CallStatus::Unstarted {
            return Err(Error::AlreadyStarted);
        }
        let channels = Channels::new()
            .stdout(Binding::Pipe)
            .stderr(Binding::Pipe);
        self.call(false, channels)?;

        let stdout = self.take_stdout();
        let stderr = self.take_stderr().map(|mut reader| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf).map(|_| buf)
            })
        });
        let mut out = Vec::new();
        if let Some(mut reader) = stdout {
            reader.read_to_end(&mut out)?;
        }
        let err = match stderr {
            Some(handle) => handle
                .join()
                .map_err(|_| io::Error::other("stderr reader panicked"))??,
            None => Vec::new(),
        };
        let status = self.wait()?;
        Ok(Captured {
            stdout: decode(out),
            stderr: decode(err),
            status,
        })
    }

    /// Run once and yield the stdout text followed by the stderr text.
    fn output(&mut self) -> Result<Output> {
        if self.status() != CallStatus::Unstarted {
            return Ok(Output::default());
        }
        self.capture().map(Output::from)
    }

    /// Invoke (if not yet invoked) for its effect and return [`SUPPRESS_SENTINEL`].
    fn render(&mut self) -> Result<&'static str> {
        if self.status() == CallStatus::Unstarted {
            self.run()?;
        }
        Ok(SUPPRESS_SENTINEL)
    }
}

fn decode(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes).unwrap_or_else(|e| {
        log::warn!("captured output is not valid UTF-8, decoding lossily");
        String::from_utf8_lossy(e.as_bytes()).into_owned()
    })
}

/// Anything that can take part in a pipeline.
pub trait Stages {
    /// The commands, in pipeline order.
    fn into_stages(self) -> Vec<Box<dyn Command>>;
}

/// Chain `left` into `right`, flattening both sides into one pipeline.
pub fn pipe(left: impl Stages, right: impl Stages) -> PipingCall {
    let mut commands = left.into_stages();
    commands.extend(right.into_stages());
    PipingCall {
        commands,
        status: CallStatus::Unstarted,
    }
}

/// Send the stdout of `call` to `path`, truncating it when invoked.
pub fn redirect_to(call: impl Call + 'static, path: impl Into<PathBuf>) -> FunnelCall {
    FunnelCall {
        call: Box::new(call),
        path: path.into(),
    }
}

/// A single command, executed at most once.
pub struct CommandCall {
    command: Box<dyn Command>,
    status: CallStatus,
}

impl CommandCall {
    /// Wrap an unstarted command.
    pub fn new(command: Box<dyn Command>) -> Self {
        Self {
            command,
            status: CallStatus::Unstarted,
        }
    }

    /// Executor behind this call.
    pub fn kind(&self) -> CommandKind {
        self.command.kind()
    }

    /// Pipe this call's stdout into `next`.
    pub fn pipe(self, next: impl Stages) -> PipingCall {
        pipe(self, next)
    }

    /// Funnel this call's stdout into `path`.
    pub fn redirect_to(self, path: impl Into<PathBuf>) -> FunnelCall {
        redirect_to(self, path)
    }
}

impl std::fmt::Debug for CommandCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandCall")
            .field("kind", &self.command.kind())
            .field("status", &self.status)
            .finish()
    }
}

impl Stages for CommandCall {
    fn into_stages(self) -> Vec<Box<dyn Command>> {
        vec![self.command]
    }
}

impl Call for CommandCall {
    fn call(&mut self, wait: bool, channels: Channels) -> Result<Option<ExitCode>> {
        if self.status != CallStatus::Unstarted {
            return Ok(None);
        }
        self.status = CallStatus::Called;
        let code = self.command.invoke(wait, channels)?;
        if let Some(code) = code {
            self.status = CallStatus::Finished(code);
        }
        Ok(code)
    }

    fn wait(&mut self) -> Result<ExitCode> {
        if self.status == CallStatus::Unstarted {
            return Err(Error::NotStarted);
        }
        let code = self.command.wait()?;
        self.status = CallStatus::Finished(code);
        Ok(code)
    }

    fn status(&self) -> CallStatus {
        self.status
    }

    fn take_stdin(&mut self) -> Option<Box<dyn Stdout>> {
        self.command.take_stdin()
    }

    fn take_stdout(&mut self) -> Option<Box<dyn Stdin>> {
        self.command.take_stdout()
    }

    fn take_stderr(&mut self) -> Option<Box<dyn Stdin>> {
        self.command.take_stderr()
    }
}

/// Commands wired stdout to stdin, left to right.
///
/// Only the first stdin and the last stdout/stderr are open to the caller.
/// The overall status is the rightmost non-zero stage status, or 0.
pub struct PipingCall {
    commands: Vec<Box<dyn Command>>,
    status: CallStatus,
}

impl PipingCall {
    /// Append `next` to the chain.
    pub fn pipe(self, next: impl Stages) -> PipingCall {
        pipe(self, next)
    }

    /// Funnel the last stage's stdout into `path`.
    pub fn redirect_to(self, path: impl Into<PathBuf>) -> FunnelCall {
        redirect_to(self, path)
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Always false; a pipeline has at least two stages.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Executor of every stage, in order.
    pub fn kinds(&self) -> Vec<CommandKind> {
        self.commands.iter().map(|c| c.kind()).collect()
    }

    /// Exit code of every stage that has finished.
    pub fn statuses(&self) -> Vec<Option<ExitCode>> {
        self.commands.iter().map(|c| c.status()).collect()
    }
}

impl std::fmt::Debug for PipingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipingCall")
            .field("stages", &self.kinds())
            .field("status", &self.status)
            .finish()
    }
}

impl Stages for PipingCall {
    fn into_stages(self) -> Vec<Box<dyn Command>> {
        self.commands
    }
}

fn upstream(previous: Option<Box<dyn Stdin>>) -> Binding {
    previous.map_or(Binding::Inherit, Binding::Reader)
}

impl Call for PipingCall {
    fn call(&mut self, wait: bool, mut channels: Channels) -> Result<Option<ExitCode>> {
        if self.status != CallStatus::Unstarted {
            return Ok(None);
        }
        // every name is checked before the first stage starts
        channels.validate()?;
        self.status = CallStatus::Called;

        let Some((last, rest)) = self.commands.split_last_mut() else {
            return Ok(Some(0));
        };
        let mut previous: Option<Box<dyn Stdin>> = None;
        for (i, command) in rest.iter_mut().enumerate() {
            let mut stage = Channels::new().stdout(Binding::Pipe);
            if i == 0 {
                if let Some(stdin) = channels.remove(Channel::Stdin.name()) {
                    stage = stage.stdin(stdin);
                }
            } else {
                stage = stage.stdin(upstream(previous.take()));
            }
            command.start(stage)?;
            previous = command.take_stdout();
        }
        if !rest.is_empty() {
            channels.insert(Channel::Stdin.name(), upstream(previous.take()));
        }
        last.start(channels)?;
        log::debug!("started pipeline of {} stages", self.commands.len());

        if wait {
            return self.wait().map(Some);
        }
        Ok(None)
    }

    fn wait(&mut self) -> Result<ExitCode> {
        if self.status == CallStatus::Unstarted {
            return Err(Error::NotStarted);
        }
        let mut overall = 0;
        for command in &mut self.commands {
            let code = command.wait()?;
            if code != 0 {
                overall = code;
            }
        }
        self.status = CallStatus::Finished(overall);
        Ok(overall)
    }

    fn status(&self) -> CallStatus {
        self.status
    }

    fn take_stdin(&mut self) -> Option<Box<dyn Stdout>> {
        self.commands.first_mut().and_then(|c| c.take_stdin())
    }

    fn take_stdout(&mut self) -> Option<Box<dyn Stdin>> {
        self.commands.last_mut().and_then(|c| c.take_stdout())
    }

    fn take_stderr(&mut self) -> Option<Box<dyn Stdin>> {
        self.commands.last_mut().and_then(|c| c.take_stderr())
    }
}

/// A call whose stdout is written to a file.
pub struct FunnelCall {
    call: Box<dyn Call>,
    path: PathBuf,
}

impl FunnelCall {
    /// Destination file.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl std::fmt::Debug for FunnelCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunnelCall")
            .field("path", &self.path)
            .field("status", &self.call.status())
            .finish()
    }
}

impl Call for FunnelCall {
    fn call(&mut self, wait: bool, mut channels: Channels) -> Result<Option<ExitCode>> {
        if self.call.status() != CallStatus::Unstarted {
            return Ok(None);
        }
        // the file is created by the last stage, after every name was checked,
        // relative to that stage's working directory
        channels.validate()?;
        log::debug!("funneling stdout into {}", self.path.display());
        channels.insert(Channel::Stdout.name(), Binding::path(self.path.clone()));
        self.call.call(wait, channels)
    }

    fn wait(&mut self) -> Result<ExitCode> {
        self.call.wait()
    }

    fn status(&self) -> CallStatus {
        self.call.status()
    }

    fn take_stdin(&mut self) -> Option<Box<dyn Stdout>> {
        self.call.take_stdin()
    }

    fn take_stdout(&mut self) -> Option<Box<dyn Stdin>> {
        self.call.take_stdout()
    }

    fn take_stderr(&mut self) -> Option<Box<dyn Stdin>> {
        self.call.take_stderr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Environment;
    use crate::function::FunctionCommand;
    use crate::io_adapters::MemWriter;
    use crate::protocol::Session;
    use std::io::Write;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn function(body: impl Fn(&mut Session) -> anyhow::Result<()> + Send + 'static) -> CommandCall {
        CommandCall::new(Box::new(FunctionCommand::new(
            "test",
            Environment::new(),
            body,
        )))
    }

    fn emit(text: &'static str) -> CommandCall {
        function(move |s| {
            s.send(text);
            Ok(())
        })
    }

    fn keep(needle: &'static str) -> CommandCall {
        function(move |s| {
            while let Some(line) = s.read_line() {
                if line.contains(needle) {
                    s.print(line);
                }
            }
            Ok(())
        })
    }

    #[test]
    fn test_command_call_runs_at_most_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let mut call = function(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(call.call(true, Channels::new()).unwrap(), Some(0));
        assert_eq!(call.call(true, Channels::new()).unwrap(), None);
        assert_eq!(call.status(), CallStatus::Finished(0));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_piping_flattens_into_one_chain() {
        let chain = emit("a").pipe(keep("a")).pipe(keep("a"));
        assert_eq!(chain.len(), 3);
        let nested = pipe(emit("a"), pipe(keep("a"), keep("a")));
        assert_eq!(nested.len(), 3);
        assert_eq!(nested.kinds(), vec![CommandKind::Function; 3]);
    }

    #[test]
    fn test_grouping_does_not_change_output() {
        let mut left = emit("Hello\nWorld!\nWow")
            .pipe(keep("W"))
            .pipe(keep("o"));
        let mut right = pipe(emit("Hello\nWorld!\nWow"), pipe(keep("W"), keep("o")));
        let left = left.capture().unwrap();
        let right = right.capture().unwrap();
        assert_eq!(left, right);
        assert_eq!(left.stdout, "World!\nWow\n");
    }

    #[test]
    fn test_pipeline_feeds_first_stage_from_caller() {
        let mut chain = keep("b").pipe(keep("bb"));
        let out = MemWriter::new();
        let channels = Channels::new()
            .stdin(Binding::Pipe)
            .stdout(Binding::writer(out.clone()));
        assert_eq!(chain.call(false, channels).unwrap(), None);

        let mut feed = chain.take_stdin().unwrap();
        feed.write_all(b"a\nb\nbb\nabba\n").unwrap();
        drop(feed);
        assert_eq!(chain.wait().unwrap(), 0);
        assert_eq!(out.text(), "bb\nabba\n");
    }

    #[test]
    fn test_pipeline_rejects_unknown_channel_before_any_stage_starts() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let first = function(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let mut chain = first.pipe(keep("x"));
        let res = chain.call(true, Channels::new().bind("stdlog", Binding::Inherit));
        assert!(matches!(res, Err(Error::UnknownChannel(_))));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_output_yields_stdout_then_stderr_once() {
        let mut call = function(|s| {
            s.print("out");
            s.eprint("err");
            Ok(())
        });
        let parts: Vec<String> = call.output().unwrap().collect();
        assert_eq!(parts, vec!["out\n".to_string(), "err\n".to_string()]);
        assert_eq!(call.output().unwrap().count(), 0);
        assert!(matches!(call.capture(), Err(Error::AlreadyStarted)));
    }

    #[test]
    fn test_funnel_truncates_and_leaves_stdout_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        std::fs::write(&path, "stale contents that should vanish\n").unwrap();

        let mut funnel = emit("fresh").redirect_to(&path);
        let captured = funnel.capture().unwrap();
        assert_eq!(captured.stdout, "");
        assert_eq!(captured.status, 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "fresh\n");
    }

    #[test]
    fn test_funnel_of_called_call_does_not_touch_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keep.txt");
        std::fs::write(&path, "keep\n").unwrap();

        let mut call = emit("ignored");
        call.call(true, Channels::new().stdout(Binding::writer(MemWriter::new())))
            .unwrap();
        let mut funnel = redirect_to(call, &path);
        assert_eq!(funnel.run().unwrap(), 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "keep\n");
    }

    #[test]
    fn test_funnel_unknown_channel_leaves_file_intact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keep.txt");
        std::fs::write(&path, "keep\n").unwrap();

        let mut funnel = emit("fresh").redirect_to(&path);
        let res = funnel.call(true, Channels::new().bind("stdlog", Binding::Inherit));
        assert!(matches!(res, Err(Error::UnknownChannel(name)) if name == "stdlog"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "keep\n");
        assert_eq!(funnel.status(), CallStatus::Unstarted);
    }

    #[test]
    fn test_render_invokes_once_and_returns_sentinel() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let mut call = function(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(call.render().unwrap(), SUPPRESS_SENTINEL);
        assert_eq!(call.render().unwrap(), SUPPRESS_SENTINEL);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_pipeline_status_is_rightmost_failure() {
        use crate::process::ProcessCommand;
        let sh = |script: &str| {
            CommandCall::new(Box::new(ProcessCommand::new(
                "sh",
                &["-c".to_string(), script.to_string()],
                Environment::new(),
            )))
        };
        let mut chain = sh("exit 2").pipe(sh("cat >/dev/null; exit 5")).pipe(sh("cat"));
        assert_eq!(chain.run().unwrap(), 5);
        assert_eq!(chain.statuses(), vec![Some(2), Some(5), Some(0)]);
        assert_eq!(chain.status(), CallStatus::Finished(5));
    }
}
