//! Compose external programs and in-process Rust functions into shell-style
//! pipelines.
//!
//! Both kinds of command share one interface ([`Command`]): they are started
//! with a set of [`Channels`], expose the caller-side ends of any piped
//! channel, and finish with an exit code. On top of that sit lazily invoked
//! calls ([`CommandCall`], [`PipingCall`], [`FunnelCall`]) and a [`Shell`]
//! that resolves bare names through an ordered list of [`Namespace`]s,
//! falling back to an external program of the same name.
//!
//! ```no_run
//! use pipekit::{Call, Shell};
//!
//! let sh = Shell::default();
//! let mut call = sh
//!     .resolve("echo")
//!     .call(["Hello\nWorld!"])?
//!     .pipe(sh.resolve("grep").call(["Wo"])?);
//! assert_eq!(call.capture()?.stdout, "World!\n");
//! # Ok::<(), pipekit::Error>(())
//! ```
//!
//! In-process commands are written against a [`Session`], which carries the
//! line protocol described in [`protocol`].

mod builtin;
pub mod call;
pub mod channel;
pub mod command;
pub mod config;
pub mod env;
mod error;
pub mod function;
mod io_adapters;
pub mod process;
pub mod protocol;
pub mod shell;

pub use call::{
    Call, CallStatus, Captured, CommandCall, FunnelCall, Output, PipingCall, SUPPRESS_SENTINEL,
    Stages, pipe, redirect_to,
};
pub use channel::{Binding, Channel, Channels};
pub use command::{Command, CommandFactory, CommandKind, ExitCode, Stdin, Stdout};
pub use config::{ExecutionMode, ShellConfig};
pub use env::Environment;
pub use error::{Error, Result};
pub use function::{FunctionCommand, GeneratorFactory};
pub use io_adapters::{MemReader, MemWriter};
pub use process::{ProcessCommand, ProcessFactory};
pub use protocol::{Message, Part, ProtocolError, Session, Yielded};
pub use shell::{Listing, Namespace, PartialCall, Registry, Scope, Shell};
