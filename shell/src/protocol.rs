//! The message protocol spoken between an in-process command body and the
//! driver that makes it look like a process.
//!
//! A body never touches its channels. Each step it yields a raw message made
//! of one to three parts; the driver normalizes it into a [`Message`], writes
//! the output line (if any) to the bound channel and, when asked, reads one
//! line of input and sends it back.
//!
//! Normalization rules, applied in order:
//! 1. an unset last part means "wants the next input line";
//! 2. a textual last part gets an implicit `false` flag appended;
//! 3. one part is just the flag, two parts are `(line, flag)` for stdout,
//!    three parts are `(channel, line, flag)`.

use crate::channel::Channel;
use crate::env::Environment;
use std::sync::mpsc::{Receiver, SyncSender};
use thiserror::Error;

/// One element of a raw message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Unset,
    Flag(bool),
    Text(String),
}

/// A raw message as yielded by a command body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Yielded(pub Vec<Part>);

impl From<Vec<Part>> for Yielded {
    fn from(parts: Vec<Part>) -> Self {
        Yielded(parts)
    }
}

impl From<()> for Yielded {
    fn from(_: ()) -> Self {
        Yielded(vec![Part::Unset])
    }
}

impl From<bool> for Yielded {
    fn from(wants_line: bool) -> Self {
        Yielded(vec![Part::Flag(wants_line)])
    }
}

impl From<&str> for Yielded {
    fn from(line: &str) -> Self {
        Yielded(vec![Part::Text(line.to_string())])
    }
}

impl From<String> for Yielded {
    fn from(line: String) -> Self {
        Yielded(vec![Part::Text(line)])
    }
}

impl From<Option<&str>> for Yielded {
    fn from(line: Option<&str>) -> Self {
        match line {
            Some(line) => line.into(),
            None => ().into(),
        }
    }
}

macro_rules! yielded_pairs {
    ($($text:ty),*) => {$(
        impl From<($text, bool)> for Yielded {
            fn from((line, wants_line): ($text, bool)) -> Self {
                Yielded(vec![Part::Text(line.to_string()), Part::Flag(wants_line)])
            }
        }

        impl From<(Channel, $text)> for Yielded {
            fn from((channel, line): (Channel, $text)) -> Self {
                Yielded(vec![
                    Part::Text(channel.name().to_string()),
                    Part::Text(line.to_string()),
                ])
            }
        }

        impl From<(Channel, $text, bool)> for Yielded {
            fn from((channel, line, wants_line): (Channel, $text, bool)) -> Self {
                Yielded(vec![
                    Part::Text(channel.name().to_string()),
                    Part::Text(line.to_string()),
                    Part::Flag(wants_line),
                ])
            }
        }
    )*};
}

yielded_pairs!(&str, String);

/// A raw message the driver could not make sense of.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty message")]
    Empty,
    #[error("malformed message {0:?}")]
    Malformed(Vec<Part>),
    #[error("cannot write to channel '{0}'")]
    Channel(String),
}

/// A normalized protocol step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Line to write, without terminator, and where to write it.
    pub output: Option<(Channel, String)>,
    /// Whether the body wants the next input line sent back.
    pub wants_line: bool,
}

impl Message {
    /// Normalize a raw message.
    pub fn parse(raw: Yielded) -> Result<Self, ProtocolError> {
        let mut parts = raw.0;
        match parts.last() {
            None => return Err(ProtocolError::Empty),
            Some(Part::Unset) => {
                parts.pop();
                parts.push(Part::Flag(true));
            }
            Some(Part::Text(_)) => parts.push(Part::Flag(false)),
            Some(Part::Flag(_)) => {}
        }

        match parts.as_slice() {
            [Part::Flag(wants_line)] => Ok(Message {
                output: None,
                wants_line: *wants_line,
            }),
            [Part::Text(line), Part::Flag(wants_line)] => Ok(Message {
                output: Some((Channel::Stdout, line.clone())),
                wants_line: *wants_line,
            }),
            [Part::Text(channel), Part::Text(line), Part::Flag(wants_line)] => {
                let channel = match channel.parse::<Channel>() {
                    Ok(Channel::Stdin) | Err(_) => {
                        return Err(ProtocolError::Channel(channel.clone()));
                    }
                    Ok(channel) => channel,
                };
                Ok(Message {
                    output: Some((channel, line.clone())),
                    wants_line: *wants_line,
                })
            }
            other => Err(ProtocolError::Malformed(other.to_vec())),
        }
    }
}

/// What a body thread tells its driver.
#[derive(Debug)]
pub(crate) enum Event {
    Yield(Yielded),
    Done(anyhow::Result<()>),
}

/// The body side of the protocol.
///
/// Every call blocks until the driver has handled the message, so a body
/// only runs ahead of its channels by one step. Once the driver is gone
/// (its output was closed), sends become no-ops returning `None`.
#[derive(Debug)]
pub struct Session {
    events: SyncSender<Event>,
    replies: Receiver<Option<String>>,
    env: Environment,
    closed: bool,
}

impl Session {
    pub(crate) fn new(
        events: SyncSender<Event>,
        replies: Receiver<Option<String>>,
        env: Environment,
    ) -> Self {
        Self {
            events,
            replies,
            env,
            closed: false,
        }
    }

    /// Yield one raw message and return what the driver sent back.
    ///
    /// The reply is the next input line (terminator stripped) when the
    /// message asked for one, `None` at end of input or otherwise.
    pub fn send(&mut self, message: impl Into<Yielded>) -> Option<String> {
        if self.closed {
            return None;
        }
        if self.events.send(Event::Yield(message.into())).is_err() {
            self.closed = true;
            return None;
        }
        match self.replies.recv() {
            Ok(reply) => reply,
            Err(_) => {
                self.closed = true;
                None
            }
        }
    }

    /// Write a line to stdout.
    pub fn print(&mut self, line: impl Into<String>) {
        self.send((Channel::Stdout, line.into(), false));
    }

    /// Write a line to stderr.
    pub fn eprint(&mut self, line: impl Into<String>) {
        self.send((Channel::Stderr, line.into(), false));
    }

    /// Read the next input line, `None` at end of input.
    pub fn read_line(&mut self) -> Option<String> {
        self.send(())
    }

    /// Environment the command was created in.
    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// Whether the driver stopped listening.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn finish(self, outcome: anyhow::Result<()>) {
        // the driver may already be gone; nothing left to report to
        let _ = self.events.send(Event::Done(outcome));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: impl Into<Yielded>) -> Result<Message, ProtocolError> {
        Message::parse(raw.into())
    }

    #[test]
    fn test_unset_means_wants_line() {
        assert_eq!(
            parse(()).unwrap(),
            Message {
                output: None,
                wants_line: true
            }
        );
        assert!(parse(None::<&str>).unwrap().wants_line);
    }

    #[test]
    fn test_lone_flag_is_no_output() {
        let msg = parse(false).unwrap();
        assert_eq!(msg.output, None);
        assert!(!msg.wants_line);
    }

    #[test]
    fn test_text_goes_to_stdout_without_wanting_input() {
        let msg = parse("hello").unwrap();
        assert_eq!(msg.output, Some((Channel::Stdout, "hello".to_string())));
        assert!(!msg.wants_line);
    }

    #[test]
    fn test_line_and_flag_pair() {
        let msg = parse(("World!", true)).unwrap();
        assert_eq!(msg.output, Some((Channel::Stdout, "World!".to_string())));
        assert!(msg.wants_line);

        let msg = parse(vec![Part::Text("World!".into()), Part::Unset]).unwrap();
        assert_eq!(msg.output, Some((Channel::Stdout, "World!".to_string())));
        assert!(msg.wants_line);
    }

    #[test]
    fn test_explicit_channel_with_and_without_flag() {
        let msg = parse((Channel::Stderr, "oops")).unwrap();
        assert_eq!(msg.output, Some((Channel::Stderr, "oops".to_string())));
        assert!(!msg.wants_line);

        let msg = parse(Yielded(vec![
            Part::Text("stderr".into()),
            Part::Text("oops".into()),
            Part::Unset,
        ]))
        .unwrap();
        assert!(msg.wants_line);
    }

    #[test]
    fn test_rejects_bad_shapes() {
        assert_eq!(parse(Vec::<Part>::new()), Err(ProtocolError::Empty));
        assert_eq!(
            parse((Channel::Stdin, "x")),
            Err(ProtocolError::Channel("stdin".into()))
        );
        assert!(matches!(
            parse(vec![Part::Flag(true), Part::Flag(true)]),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            parse(vec![
                Part::Text("a".into()),
                Part::Text("b".into()),
                Part::Text("c".into()),
                Part::Text("d".into()),
            ]),
            Err(ProtocolError::Malformed(_))
        ));
    }
}
