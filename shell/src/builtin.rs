use crate::command::{Command, CommandFactory, canonicalize};
use crate::env::Environment;
use crate::error::{Error, Result};
use crate::function::FunctionCommand;
use crate::protocol::Session;
use anyhow::{Context, bail};
use argh::{EarlyExit, FromArgs};
use regex::RegexBuilder;
use std::fs;
use std::marker::PhantomData;
use std::path::Path;

/// Commands of the standard scope.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and run in-process
/// as [`FunctionCommand`]s speaking the line protocol.
pub(crate) trait BuiltinCommand: Sized + FromArgs + Send + 'static {
    /// Canonical name of the command, e.g. "echo" or "grep".
    fn name() -> &'static str;

    /// One-line description for listings.
    fn about() -> &'static str;

    /// Body run on the command's own thread.
    fn run(self, session: &mut Session) -> anyhow::Result<()>;
}

/// Factory creating builtin `T` from its arguments.
pub(crate) struct Factory<T> {
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T: BuiltinCommand> CommandFactory for Factory<T> {
    fn create(&self, env: &Environment, args: &[String]) -> Result<Box<dyn Command>> {
        let args = canonicalize(args);
        let argv: Vec<&str> = args.iter().map(String::as_str).collect();
        match T::from_args(&[T::name()], &argv) {
            Ok(cmd) => Ok(Box::new(FunctionCommand::new(
                T::name(),
                env.clone(),
                move |session| cmd.run(session),
            ))),
            // --help and friends: print the text like any other output
            Err(EarlyExit {
                output,
                status: Ok(()),
            }) => Ok(Box::new(FunctionCommand::new(
                T::name(),
                env.clone(),
                move |session| {
                    for line in output.lines() {
                        session.print(line);
                    }
                    Ok(())
                },
            ))),
            Err(EarlyExit {
                output,
                status: Err(()),
            }) => Err(Error::Usage {
                command: T::name().to_string(),
                message: output.trim_end().to_string(),
            }),
        }
    }

    fn description(&self) -> &str {
        T::about()
    }
}

#[derive(FromArgs)]
/// write the arguments to standard output, separated by spaces.
pub struct Echo {
    #[argh(positional, greedy)]
    /// values to print as-is, separated by spaces.
    pub args: Vec<String>,
}

impl BuiltinCommand for Echo {
    fn name() -> &'static str {
        "echo"
    }

    fn about() -> &'static str {
        "write the arguments to standard output"
    }

    fn run(self, session: &mut Session) -> anyhow::Result<()> {
        let text = self.args.join(" ");
        // a single trailing newline is the line terminator itself
        session.send(text.strip_suffix('\n').unwrap_or(&text));
        Ok(())
    }
}

#[derive(FromArgs)]
/// copy file(s), or standard input, to standard output line by line
pub struct Cat {
    #[argh(positional, greedy)]
    /// files to print. If none provided, reads from stdin.
    pub files: Vec<String>,
}

impl BuiltinCommand for Cat {
    fn name() -> &'static str {
        "cat"
    }

    fn about() -> &'static str {
        "copy files or standard input to standard output"
    }

    fn run(self, session: &mut Session) -> anyhow::Result<()> {
        if self.files.is_empty() {
            let mut line = session.read_line();
            while let Some(text) = line {
                line = session.send((text, true));
            }
            return Ok(());
        }
        for name in &self.files {
            let path = session.env().resolve(Path::new(name));
            let content =
                fs::read_to_string(&path).with_context(|| format!("cat: {}", name))?;
            for line in content.lines() {
                session.print(line);
            }
        }
        Ok(())
    }
}

#[derive(FromArgs)]
/// print lines matching a pattern
pub struct Grep {
    #[argh(switch, short = 'v')]
    /// select non-matching lines
    pub invert: bool,

    #[argh(switch, short = 'i')]
    /// ignore case distinctions
    pub ignore_case: bool,

    #[argh(positional)]
    /// the pattern to search for (a regular expression)
    pub pattern: String,

    #[argh(positional, greedy)]
    /// files to search. If none provided, reads from stdin.
    pub files: Vec<String>,
}

impl BuiltinCommand for Grep {
    fn name() -> &'static str {
        "grep"
    }

    fn about() -> &'static str {
        "print lines matching a pattern"
    }

    fn run(self, session: &mut Session) -> anyhow::Result<()> {
        let re = RegexBuilder::new(&self.pattern)
            .case_insensitive(self.ignore_case)
            .build()
            .with_context(|| format!("Invalid regex pattern: {}", self.pattern))?;
        let selected = |line: &str| re.is_match(line) ^ self.invert;

        if self.files.is_empty() {
            let mut line = session.read_line();
            while let Some(text) = line {
                line = if selected(text.as_str()) {
                    session.send((text, true))
                } else {
                    session.read_line()
                };
            }
            return Ok(());
        }

        let prefix = self.files.len() > 1;
        let mut failed = Vec::new();
        for name in &self.files {
            let path = session.env().resolve(Path::new(name));
            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) => {
                    session.eprint(format!("grep: {}: {}", name, e));
                    failed.push(name.as_str());
                    continue;
                }
            };
            for line in content.lines().filter(|line| selected(*line)) {
                if prefix {
                    session.print(format!("{}:{}", name, line));
                } else {
                    session.print(line);
                }
            }
        }
        if !failed.is_empty() {
            bail!("grep: unreadable: {}", failed.join(", "));
        }
        Ok(())
    }
}
