use crate::channel::Channels;
use crate::command::{Command, CommandFactory, CommandKind, ExitCode, Stdin, Stdout, canonicalize};
use crate::env::Environment;
use crate::error::{Error, Result};
use std::io::{self, Read, Write};
use std::process::{Child, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};

/// Command that runs a native program.
///
/// Channels are handed to the OS as they are; only in-memory streams need a
/// helper thread that copies them through a pipe.
#[derive(Debug)]
pub struct ProcessCommand {
    program: String,
    args: Vec<String>,
    env: Environment,
    child: Option<Child>,
    pumps: Vec<JoinHandle<io::Result<u64>>>,
    status: Option<ExitCode>,
    stdin: Option<Box<dyn Stdout>>,
    stdout: Option<Box<dyn Stdin>>,
    stderr: Option<Box<dyn Stdin>>,
}

impl ProcessCommand {
    /// Prepare `program` with `args`; the program is looked up in `PATH` on start.
    pub fn new(program: impl Into<String>, args: &[String], env: Environment) -> Self {
        Self {
            program: program.into(),
            args: canonicalize(args),
            env,
            child: None,
            pumps: Vec::new(),
            status: None,
            stdin: None,
            stdout: None,
            stderr: None,
        }
    }

    /// Factory running `program` with whatever arguments it is called with.
    pub fn from_proc_name(program: impl Into<String>) -> ProcessFactory {
        ProcessFactory {
            program: program.into(),
        }
    }

    /// Program name as given.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// OS process id once started.
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }
}

impl Command for ProcessCommand {
    fn start(&mut self, channels: Channels) -> Result<()> {
        if self.child.is_some() {
            return Err(Error::AlreadyStarted);
        }
        let opened = channels.open(&self.env)?;
        let (stdin, feed) = input_stdio(opened.stdin);
        let (stdout, out_sink) = output_stdio(opened.stdout);
        let (stderr, err_sink) = output_stdio(opened.stderr);

        let mut command = std::process::Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.env.vars.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&self.env.current_dir)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(stderr);
        log::debug!("spawning '{}' with {:?}", self.program, self.args);
        let mut child = command.spawn().map_err(|source| Error::Spawn {
            program: self.program.clone(),
            source,
        })?;
        // release the child's ends of our pipes so readers see EOF when it exits
        drop(command);

        if let (Some(source), Some(sink)) = (feed, child.stdin.take()) {
            self.pumps.push(pump(source, sink)?);
        }
        if let (Some(sink), Some(source)) = (out_sink, child.stdout.take()) {
            self.pumps.push(pump(source, sink)?);
        }
        if let (Some(sink), Some(source)) = (err_sink, child.stderr.take()) {
            self.pumps.push(pump(source, sink)?);
        }

        self.stdin = opened.stdin_writer;
        self.stdout = opened.stdout_reader;
        self.stderr = opened.stderr_reader;
        self.child = Some(child);
        Ok(())
    }

    fn wait(&mut self) -> Result<ExitCode> {
        if let Some(code) = self.status {
            return Ok(code);
        }
        let child = self.child.as_mut().ok_or(Error::NotStarted)?;
        let exit_status = child.wait()?;
        for handle in self.pumps.drain(..) {
            match handle.join() {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => log::debug!("stream copy for '{}' stopped: {}", self.program, e),
                Err(_) => log::warn!("stream copy thread for '{}' panicked", self.program),
            }
        }
        let code = match exit_status.code() {
            Some(x) => x,
            None => terminated_by_signal(exit_status),
        };
        log::debug!("'{}' exited with {}", self.program, code);
        self.status = Some(code);
        Ok(code)
    }

    fn status(&self) -> Option<ExitCode> {
        self.status
    }

    fn take_stdin(&mut self) -> Option<Box<dyn Stdout>> {
        self.stdin.take()
    }

    fn take_stdout(&mut self) -> Option<Box<dyn Stdin>> {
        self.stdout.take()
    }

    fn take_stderr(&mut self) -> Option<Box<dyn Stdin>> {
        self.stderr.take()
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Process
    }
}

/// Handle for the child's stdin, plus the stream to pump into it if it has none.
fn input_stdio(stream: Box<dyn Stdin>) -> (Stdio, Option<Box<dyn Read + Send>>) {
    match stream.stdio() {
        Ok(stdio) => (stdio, None),
        Err(source) => (Stdio::piped(), Some(source)),
    }
}

/// Handle for a child's output, plus the stream to pump it into if it has none.
fn output_stdio(stream: Box<dyn Stdout>) -> (Stdio, Option<Box<dyn Write + Send>>) {
    match stream.stdio() {
        Ok(stdio) => (stdio, None),
        Err(sink) => (Stdio::piped(), Some(sink)),
    }
}

/// Copy `source` into `sink` on a helper thread, closing `sink` at the end.
fn pump<R, W>(mut source: R, mut sink: W) -> io::Result<JoinHandle<io::Result<u64>>>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    thread::Builder::new()
        .name("stream-pump".to_string())
        .spawn(move || {
            let copied = io::copy(&mut source, &mut sink)?;
            sink.flush()?;
            Ok(copied)
        })
}

/// Factory produced by [`ProcessCommand::from_proc_name`].
#[derive(Debug, Clone)]
pub struct ProcessFactory {
    program: String,
}

impl CommandFactory for ProcessFactory {
    fn create(&self, env: &Environment, args: &[String]) -> Result<Box<dyn Command>> {
        Ok(Box::new(ProcessCommand::new(
            self.program.clone(),
            args,
            env.clone(),
        )))
    }

    fn description(&self) -> &str {
        "external program"
    }
}

#[cfg(unix)]
fn terminated_by_signal(exit_status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    if let Some(signal) = ExitStatusExt::signal(&exit_status) {
        128 + signal
    } else if ExitStatusExt::core_dumped(&exit_status) {
        255
    } else {
        -1
    }
}

#[cfg(not(unix))]
fn terminated_by_signal(_exit_status: ExitStatus) -> i32 {
    -1
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use crate::channel::Binding;
    use crate::io_adapters::{MemReader, MemWriter};

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn sh(script: &str) -> ProcessCommand {
        ProcessCommand::new("sh", &args(&["-c", script]), Environment::new())
    }

    #[test]
    fn test_unknown_channel_fails_before_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("spawned");
        let mut cmd = ProcessCommand::new(
            "touch",
            &[marker.to_string_lossy().into_owned()],
            Environment::new(),
        );
        let res = cmd.start(Channels::new().bind("stdlog", Binding::Inherit));
        assert!(matches!(res, Err(Error::UnknownChannel(name)) if name == "stdlog"));
        assert!(cmd.id().is_none());
        assert!(!marker.exists());
    }

    #[test]
    fn test_exit_code_is_returned_verbatim() {
        assert_eq!(sh("exit 3").invoke(true, Channels::new()).unwrap(), Some(3));
        assert_eq!(sh("true").invoke(true, Channels::new()).unwrap(), Some(0));
    }

    #[test]
    fn test_killed_process_reports_signal_code() {
        assert_eq!(sh("kill -9 $$").invoke(true, Channels::new()).unwrap(), Some(137));
    }

    #[test]
    fn test_missing_program_is_a_spawn_error() {
        let mut cmd = ProcessCommand::new("pipekit-no-such-program", &[], Environment::new());
        assert!(matches!(
            cmd.start(Channels::new()),
            Err(Error::Spawn { program, .. }) if program == "pipekit-no-such-program"
        ));
    }

    #[test]
    fn test_piped_stdout_is_readable_after_start() {
        let mut cmd = ProcessCommand::new("echo", &args(&["Hello", "World!"]), Environment::new());
        cmd.start(Channels::new().stdout(Binding::Pipe)).unwrap();
        let mut out = String::new();
        cmd.take_stdout().unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(cmd.wait().unwrap(), 0);
        assert_eq!(out, "Hello World!\n");
        assert_eq!(cmd.status(), Some(0));
    }

    #[test]
    fn test_memory_streams_are_pumped() {
        let out = MemWriter::new();
        let err = MemWriter::new();
        let channels = Channels::new()
            .stdin(Binding::reader(MemReader::new("Hello\nWorld!\n")))
            .stdout(Binding::writer(out.clone()))
            .stderr(Binding::writer(err.clone()));
        let mut cmd = sh("grep Wo; echo warn >&2");
        assert_eq!(cmd.invoke(true, channels).unwrap(), Some(0));
        assert_eq!(out.text(), "World!\n");
        assert_eq!(err.text(), "warn\n");
    }

    #[test]
    fn test_runs_in_env_dir_with_exports() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();
        let mut env = Environment::in_dir(dir.path());
        env.set_var("GREETING", "hi");

        let out = MemWriter::new();
        let mut cmd = ProcessCommand::new("sh", &args(&["-c", "ls; echo $GREETING"]), env);
        cmd.invoke(true, Channels::new().stdout(Binding::writer(out.clone())))
            .unwrap();
        assert_eq!(out.text(), "marker.txt\nhi\n");
    }

    #[test]
    fn test_factory_creates_process_commands() {
        let factory = ProcessCommand::from_proc_name("echo");
        let mut cmd = factory.create(&Environment::new(), &args(&["x"])).unwrap();
        assert_eq!(cmd.kind(), CommandKind::Process);
        let out = MemWriter::new();
        cmd.invoke(true, Channels::new().stdout(Binding::writer(out.clone())))
            .unwrap();
        assert_eq!(out.text(), "x\n");
    }
}
