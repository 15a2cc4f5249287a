//! In-process commands.
//!
//! A [`FunctionCommand`] runs its body on a dedicated thread and drives it
//! from a second one. The body speaks the [`crate::protocol`] messages
//! through its [`Session`]; the driver turns them into reads and writes on
//! the bound channels. The caller gets control back as soon as both threads
//! are spawned, with the caller-side pipe ends ready to be taken.

use crate::channel::{Channel, Channels, Opened};
use crate::command::{Command, CommandFactory, CommandKind, ExitCode, Stdin, Stdout, canonicalize};
use crate::env::Environment;
use crate::error::{Error, Result};
use crate::protocol::{Event, Message, Session};
use anyhow::{Context, anyhow, bail};
use std::io::{BufRead, BufReader, Write};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;

/// Body of an in-process command, run once on its own thread.
pub type Body = Box<dyn FnOnce(&mut Session) -> anyhow::Result<()> + Send>;

/// Generator-style function turned into commands by [`GeneratorFactory`].
pub type Generator = Arc<dyn Fn(&mut Session, &[String]) -> anyhow::Result<()> + Send + Sync>;

/// Terminal status shared between the driver and callers, set exactly once.
#[derive(Debug, Default)]
struct Completion {
    status: Mutex<Option<ExitCode>>,
    fault: Mutex<Option<String>>,
    done: Condvar,
}

impl Completion {
    fn finish(&self, code: ExitCode, fault: Option<String>) {
        *self.fault.lock().unwrap_or_else(PoisonError::into_inner) = fault;
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        if status.is_none() {
            *status = Some(code);
            self.done.notify_all();
        }
    }

    fn poll(&self) -> Option<ExitCode> {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait(&self) -> ExitCode {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(code) = *status {
                return code;
            }
            status = self
                .done
                .wait(status)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn fault(&self) -> Option<String> {
        self.fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// A command implemented by a Rust function.
///
/// The exit code is 0 however the body ends, unless the environment it was
/// created in has `report_faults` set, in which case an error or panic in the
/// body exits with 1. Either way the fault is logged and kept for
/// [`FunctionCommand::fault`].
pub struct FunctionCommand {
    name: String,
    env: Environment,
    body: Option<Body>,
    completion: Arc<Completion>,
    stdin: Option<Box<dyn Stdout>>,
    stdout: Option<Box<dyn Stdin>>,
    stderr: Option<Box<dyn Stdin>>,
}

impl FunctionCommand {
    /// Wrap `body`; nothing runs until the command is started.
    pub fn new(
        name: impl Into<String>,
        env: Environment,
        body: impl FnOnce(&mut Session) -> anyhow::Result<()> + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            env,
            body: Some(Box::new(body)),
            completion: Arc::default(),
            stdin: None,
            stdout: None,
            stderr: None,
        }
    }

    /// Factory creating a fresh command from `generator` for every set of arguments.
    pub fn from_generator(
        name: impl Into<String>,
        generator: impl Fn(&mut Session, &[String]) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> GeneratorFactory {
        GeneratorFactory {
            name: name.into(),
            description: String::new(),
            generator: Arc::new(generator),
        }
    }

    /// Command name used in logs and thread names.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Error or panic message of a finished body, if it failed.
    pub fn fault(&self) -> Option<String> {
        self.completion.fault()
    }
}

impl std::fmt::Debug for FunctionCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionCommand")
            .field("name", &self.name)
            .field("started", &self.body.is_none())
            .field("status", &self.completion.poll())
            .finish()
    }
}

impl Command for FunctionCommand {
    fn start(&mut self, channels: Channels) -> Result<()> {
        if self.body.is_none() {
            return Err(Error::AlreadyStarted);
        }
        let mut opened = channels.open(&self.env)?;
        self.stdin = opened.stdin_writer.take();
        self.stdout = opened.stdout_reader.take();
        self.stderr = opened.stderr_reader.take();

        let body = self.body.take().ok_or(Error::AlreadyStarted)?;
        let env = self.env.clone();
        let name = self.name.clone();
        let completion = Arc::clone(&self.completion);
        log::debug!("starting function command '{}'", self.name);
        thread::Builder::new()
            .name(format!("{}-driver", self.name))
            .spawn(move || drive(name, body, env, opened, completion))?;
        Ok(())
    }

    fn wait(&mut self) -> Result<ExitCode> {
        if self.body.is_some() {
            return Err(Error::NotStarted);
        }
        Ok(self.completion.wait())
    }

    fn status(&self) -> Option<ExitCode> {
        self.completion.poll()
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
        CommandKind::Function
    }
}

/// Factory produced by [`FunctionCommand::from_generator`].
#[derive(Clone)]
pub struct GeneratorFactory {
    name: String,
    description: String,
    generator: Generator,
}

impl GeneratorFactory {
    /// Attach the one-line description shown in listings.
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl std::fmt::Debug for GeneratorFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorFactory")
            .field("name", &self.name)
            .finish()
    }
}

impl CommandFactory for GeneratorFactory {
    fn create(&self, env: &Environment, args: &[String]) -> Result<Box<dyn Command>> {
        let generator = Arc::clone(&self.generator);
        let args = canonicalize(args);
        Ok(Box::new(FunctionCommand::new(
            self.name.clone(),
            env.clone(),
            move |session| generator(session, &args),
        )))
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Driver thread: spawn the body, serve its messages, close the channels,
/// then publish the exit code.
fn drive(
    name: String,
    body: Body,
    env: Environment,
    mut io: Opened,
    completion: Arc<Completion>,
) {
    let report_faults = env.report_faults;
    let (event_tx, event_rx) = mpsc::sync_channel(0);
    let (reply_tx, reply_rx) = mpsc::sync_channel(1);
    let session = Session::new(event_tx, reply_rx, env);

    let spawned = thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            let mut session = session;
            let outcome = body(&mut session);
            session.finish(outcome);
        });

    let outcome = match spawned {
        Ok(_) => serve(&event_rx, &reply_tx, &mut io),
        Err(e) => Err(anyhow!(e).context("could not spawn command body")),
    };
    drop(io);

    let (code, fault) = match outcome {
        Ok(()) => (0, None),
        Err(e) => {
            log::warn!("function command '{}' failed: {:#}", name, e);
            (if report_faults { 1 } else { 0 }, Some(format!("{:#}", e)))
        }
    };
    log::debug!("function command '{}' finished with {}", name, code);
    completion.finish(code, fault);
}

fn serve(
    events: &Receiver<Event>,
    replies: &SyncSender<Option<String>>,
    io: &mut Opened,
) -> anyhow::Result<()> {
    let mut input = BufReader::new(&mut io.stdin);
    loop {
        let raw = match events.recv() {
            Ok(Event::Yield(raw)) => raw,
            Ok(Event::Done(outcome)) => return outcome,
            Err(_) => bail!("command body panicked"),
        };
        log::trace!("message {:?}", raw);
        let message = Message::parse(raw)?;

        if let Some((channel, line)) = message.output {
            let sink = match channel {
                Channel::Stderr => &mut io.stderr,
                _ => &mut io.stdout,
            };
            sink.write_all(line.as_bytes())
                .and_then(|()| sink.write_all(b"\n"))
                .and_then(|()| sink.flush())
                .with_context(|| format!("writing to {}", channel))?;
        }

        let reply = if message.wants_line {
            read_line(&mut input).context("reading from stdin")?
        } else {
            None
        };
        if replies.send(reply).is_err() {
            bail!("command body stopped listening");
        }
    }
}

/// Next line without its terminator, `None` at end of input.
fn read_line(input: &mut impl BufRead) -> std::io::Result<Option<String>> {
    let mut buf = Vec::new();
    if input.read_until(b'\n', &mut buf)? == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    let line = String::from_utf8(buf).unwrap_or_else(|e| {
        log::warn!("input line is not valid UTF-8, decoding lossily");
        String::from_utf8_lossy(e.as_bytes()).into_owned()
    });
    Ok(Some(line))
}
