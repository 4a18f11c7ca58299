pub mod del;
pub mod echo;
pub mod executable;
pub mod get;
pub mod ping;
pub mod set;

use bytes::Bytes;
use std::str::FromStr;
use std::{str, vec};
use strum_macros::{AsRefStr, EnumString};
use thiserror::Error as ThisError;

use crate::commands::executable::Executable;
use crate::frame::Frame;
use crate::store::Store;
use crate::Error;

use del::Del;
use echo::Echo;
use get::Get;
use ping::Ping;
use set::Set;

#[derive(Debug, PartialEq)]
pub enum Command {
    Del(Del),
    Echo(Echo),
    Get(Get),
    Ping(Ping),
    Set(Set),
}

/// Names are matched case-sensitively, in upper case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "UPPERCASE")]
pub enum CommandName {
    Del,
    Echo,
    Get,
    Ping,
    Set,
}

impl Command {
    pub fn name(&self) -> CommandName {
        match self {
            Command::Del(_) => CommandName::Del,
            Command::Echo(_) => CommandName::Echo,
            Command::Get(_) => CommandName::Get,
            Command::Ping(_) => CommandName::Ping,
            Command::Set(_) => CommandName::Set,
        }
    }
}

impl Executable for Command {
    fn exec(self, store: Store) -> Result<Frame, Error> {
        match self {
            Command::Del(cmd) => cmd.exec(store),
            Command::Echo(cmd) => cmd.exec(store),
            Command::Get(cmd) => cmd.exec(store),
            Command::Ping(cmd) => cmd.exec(store),
            Command::Set(cmd) => cmd.exec(store),
        }
    }
}

impl TryFrom<Frame> for Command {
    type Error = Error;

    fn try_from(frame: Frame) -> Result<Self, Self::Error> {
        // Clients send commands to the server as RESP arrays.
        let frames = match frame {
            Frame::Array(array) if !array.is_empty() => array,
            frame => {
                return Err(CommandError::InvalidFrame {
                    expected: "non-empty array".to_string(),
                    actual: frame,
                }
                .into())
            }
        };

        let parser = &mut CommandParser::new(frames);

        let command_name = parser.parse_command_name()?;
        let command_name = CommandName::from_str(&command_name).map_err(|_| {
            CommandError::UnknownCommand {
                command: command_name.clone(),
            }
        })?;

        match command_name {
            CommandName::Del => Del::try_from(parser).map(Command::Del),
            CommandName::Echo => Echo::try_from(parser).map(Command::Echo),
            CommandName::Get => Get::try_from(parser).map(Command::Get),
            CommandName::Ping => Ping::try_from(parser).map(Command::Ping),
            CommandName::Set => Set::try_from(parser).map(Command::Set),
        }
    }
}

pub struct CommandParser {
    command: String,
    parts: vec::IntoIter<Frame>,
}

impl CommandParser {
    fn new(frames: Vec<Frame>) -> CommandParser {
        CommandParser {
            command: String::new(),
            parts: frames.into_iter(),
        }
    }

    fn parse_command_name(&mut self) -> Result<String, CommandError> {
        let command_name = self.next_string("command name")?;
        self.command.clone_from(&command_name);
        Ok(command_name)
    }

    fn next_frame(&mut self, argument: &'static str) -> Result<Frame, CommandError> {
        self.parts
            .next()
            .ok_or_else(|| CommandError::MissingArgument {
                command: self.command.clone(),
                argument,
            })
    }

    fn next_string(&mut self, argument: &'static str) -> Result<String, CommandError> {
        match self.next_frame(argument)? {
            // Both `Simple` and `Bulk` representation may be strings. Strings are parsed to UTF-8.
            // While errors are stored as strings, they are considered separate types.
            Frame::Simple(s) => Ok(s),
            Frame::Bulk(bytes) => str::from_utf8(&bytes[..])
                .map(|s| s.to_string())
                .map_err(CommandError::InvalidUTF8String),
            frame => Err(CommandError::InvalidFrame {
                expected: "simple or bulk string".to_string(),
                actual: frame,
            }),
        }
    }

    fn next_bytes(&mut self, argument: &'static str) -> Result<Bytes, CommandError> {
        match self.next_frame(argument)? {
            Frame::Simple(s) => Ok(Bytes::from(s)),
            Frame::Bulk(bytes) => Ok(bytes),
            frame => Err(CommandError::InvalidFrame {
                expected: "simple or bulk string".to_string(),
                actual: frame,
            }),
        }
    }
}

#[derive(Debug, ThisError, PartialEq)]
pub enum CommandError {
    #[error("ERR wrong number of arguments for '{command}' command, missing {argument}")]
    MissingArgument {
        command: String,
        argument: &'static str,
    },
    #[error("ERR unknown command '{command}'")]
    UnknownCommand { command: String },
    #[error("WRONGTYPE Operation against key '{key}' holding the wrong kind of value")]
    TypeMismatch { key: String },
    #[error("ERR protocol error; invalid frame, expected {expected}, got {actual}")]
    InvalidFrame { expected: String, actual: Frame },
    #[error("ERR protocol error; invalid UTF-8 string")]
    InvalidUTF8String(#[from] str::Utf8Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_get_command_with_simple_string() {
        let get_frame = Frame::Array(vec![
            Frame::Simple(String::from("GET")),
            Frame::Simple(String::from("foo")),
        ]);

        let get_command = Command::try_from(get_frame).unwrap();

        assert_eq!(
            get_command,
            Command::Get(Get {
                key: String::from("foo")
            })
        );
    }

    #[test]
    fn parse_get_command_with_bulk_string() {
        let get_frame = Frame::request(["GET", "foo-from-bytes"]);

        let get_command = Command::try_from(get_frame).unwrap();

        assert_eq!(
            get_command,
            Command::Get(Get {
                key: String::from("foo-from-bytes")
            })
        );
        assert_eq!(get_command.name(), CommandName::Get);
    }

    #[test]
    fn parse_set_command() {
        let set_frame = Frame::Array(vec![
            Frame::Bulk(Bytes::from("SET")),
            Frame::Bulk(Bytes::from("foo")),
            Frame::Simple(String::from("baz")),
        ]);

        let set_command = Command::try_from(set_frame).unwrap();

        assert_eq!(
            set_command,
            Command::Set(Set {
                key: String::from("foo"),
                value: Bytes::from("baz")
            })
        );
    }

    #[test]
    fn command_names_are_case_sensitive() {
        let frame = Frame::request(["get", "foo"]);
        let err = Command::try_from(frame).err().unwrap();
        let err = err.downcast_ref::<CommandError>().unwrap();

        assert_eq!(
            *err,
            CommandError::UnknownCommand {
                command: "get".to_string()
            }
        );
    }

    #[test]
    fn unknown_command() {
        let frame = Frame::request(["FOO", "bar"]);
        let err = Command::try_from(frame).err().unwrap();

        assert!(err.to_string().contains("FOO"));
        assert_eq!(
            *err.downcast_ref::<CommandError>().unwrap(),
            CommandError::UnknownCommand {
                command: "FOO".to_string()
            }
        );
    }

    #[test]
    fn request_must_be_a_non_empty_array() {
        for frame in [
            Frame::Simple("PING".to_string()),
            Frame::Array(vec![]),
            Frame::NullArray,
        ] {
            let err = Command::try_from(frame).err().unwrap();
            let err = err.downcast_ref::<CommandError>().unwrap();

            assert!(matches!(err, CommandError::InvalidFrame { .. }));
        }
    }

    #[test]
    fn command_name_must_be_a_string() {
        let frame = Frame::Array(vec![Frame::Integer(1)]);
        let err = Command::try_from(frame).err().unwrap();
        let err = err.downcast_ref::<CommandError>().unwrap();

        assert_eq!(
            *err,
            CommandError::InvalidFrame {
                expected: "simple or bulk string".to_string(),
                actual: Frame::Integer(1)
            }
        );
    }

    #[test]
    fn invalid_utf8_key() {
        let frame = Frame::Array(vec![
            Frame::Bulk(Bytes::from("GET")),
            Frame::Bulk(Bytes::from_static(b"\xff\xfe")),
        ]);
        let err = Command::try_from(frame).err().unwrap();
        let err = err.downcast_ref::<CommandError>().unwrap();

        assert!(matches!(err, CommandError::InvalidUTF8String(_)));
    }
}
