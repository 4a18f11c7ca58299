// https://redis.io/docs/reference/protocol-spec

use std::fmt;

use bytes::Bytes;

use crate::serializer::EncodeError;

pub(crate) static CRLF: &[u8; 2] = b"\r\n";

/// A single RESP value.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    /// Null bulk string, `$-1`.
    Null,
    /// Null array, `*-1`.
    NullArray,
    Array(Vec<Frame>),
}

impl Frame {
    /// Builds the array of bulk strings clients use to send a command.
    pub fn request<I, S>(parts: I) -> Frame
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        Frame::Array(
            parts
                .into_iter()
                .map(|part| Frame::Bulk(Bytes::copy_from_slice(part.as_ref())))
                .collect(),
        )
    }

    /// Whether the frame, and every frame nested in it, can be put on the wire.
    ///
    /// Error messages travel in the line based form, so a message holding CR or LF cannot be
    /// encoded no matter which string form the serializer is asked to use.
    pub fn is_encodable(&self) -> bool {
        match self {
            Frame::Error(msg) => !has_line_break(msg.as_bytes()),
            Frame::Array(frames) => frames.iter().all(Frame::is_encodable),
            Frame::Simple(_)
            | Frame::Integer(_)
            | Frame::Bulk(_)
            | Frame::Null
            | Frame::NullArray => true,
        }
    }
}

impl TryFrom<f64> for Frame {
    type Error = EncodeError;

    fn try_from(number: f64) -> Result<Self, EncodeError> {
        if !number.is_finite()
            || number.fract() != 0.0
            || number < i64::MIN as f64
            || number >= i64::MAX as f64
        {
            return Err(EncodeError::NotAnInteger(number));
        }

        Ok(Frame::Integer(number as i64))
    }
}

impl From<i64> for Frame {
    fn from(integer: i64) -> Self {
        Frame::Integer(integer)
    }
}

impl From<&str> for Frame {
    fn from(s: &str) -> Self {
        Frame::Bulk(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<Bytes> for Frame {
    fn from(bytes: Bytes) -> Self {
        Frame::Bulk(bytes)
    }
}

impl From<Option<Bytes>> for Frame {
    fn from(bytes: Option<Bytes>) -> Self {
        bytes.map_or(Frame::Null, Frame::Bulk)
    }
}

// Human readable rendering, used by logs and the CLI. Not the wire format.
impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Simple(s) => write!(f, "{}", s),
            Frame::Error(s) => write!(f, "(error) {}", s),
            Frame::Integer(i) => write!(f, "(integer) {}", i),
            Frame::Bulk(bytes) => write!(f, "\"{}\"", String::from_utf8_lossy(bytes)),
            Frame::Null | Frame::NullArray => write!(f, "(nil)"),
            Frame::Array(arr) if arr.is_empty() => write!(f, "(empty array)"),
            Frame::Array(arr) => {
                for (i, frame) in arr.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}) {}", i + 1, frame)?;
                }
                Ok(())
            }
        }
    }
}

pub(crate) fn has_line_break(bytes: &[u8]) -> bool {
    bytes.iter().any(|&b| b == b'\r' || b == b'\n')
}

/// The first byte of every RESP value identifies its type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum DataType {
    SimpleString, // '+'
    SimpleError,  // '-'
    Integer,      // ':'
    BulkString,   // '$'
    Array,        // '*'
}

impl TryFrom<u8> for DataType {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            b'+' => Ok(Self::SimpleString),
            b'-' => Ok(Self::SimpleError),
            b':' => Ok(Self::Integer),
            b'$' => Ok(Self::BulkString),
            b'*' => Ok(Self::Array),
            _ => Err(byte),
        }
    }
}

impl From<DataType> for u8 {
    fn from(value: DataType) -> Self {
        match value {
            DataType::SimpleString => b'+',
            DataType::SimpleError => b'-',
            DataType::Integer => b':',
            DataType::BulkString => b'$',
            DataType::Array => b'*',
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_is_an_array_of_bulk_strings() {
        let frame = Frame::request(["SET", "foo", "bar"]);

        assert_eq!(
            frame,
            Frame::Array(vec![
                Frame::Bulk(Bytes::from("SET")),
                Frame::Bulk(Bytes::from("foo")),
                Frame::Bulk(Bytes::from("bar")),
            ])
        );
    }

    #[test]
    fn error_with_line_break_is_not_encodable() {
        assert!(Frame::Error("ERR boom".to_string()).is_encodable());
        assert!(!Frame::Error("ERR\r\nboom".to_string()).is_encodable());

        let nested = Frame::Array(vec![
            Frame::Integer(1),
            Frame::Array(vec![Frame::Error("bad\n".to_string())]),
        ]);
        assert!(!nested.is_encodable());
    }

    #[test]
    fn bulk_with_line_break_is_encodable() {
        let frame = Frame::Array(vec![Frame::Bulk(Bytes::from("a\r\nb")), Frame::NullArray]);
        assert!(frame.is_encodable());
    }

    #[test]
    fn whole_numbers_convert_to_integers() {
        assert_eq!(Frame::try_from(42.0), Ok(Frame::Integer(42)));
        assert_eq!(Frame::try_from(-7.0), Ok(Frame::Integer(-7)));
    }

    #[test]
    fn fractional_numbers_are_rejected() {
        assert_eq!(Frame::try_from(1.5), Err(EncodeError::NotAnInteger(1.5)));
        assert!(Frame::try_from(f64::NAN).is_err());
        assert!(Frame::try_from(f64::INFINITY).is_err());
    }

    #[test]
    fn display_renders_like_a_cli() {
        let frame = Frame::Array(vec![
            Frame::Bulk(Bytes::from("foo")),
            Frame::Null,
            Frame::Integer(3),
        ]);

        assert_eq!(frame.to_string(), "1) \"foo\"\n2) (nil)\n3) (integer) 3");
        assert_eq!(Frame::Simple("OK".to_string()).to_string(), "OK");
    }
}
