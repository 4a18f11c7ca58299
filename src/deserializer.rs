use std::io::Cursor;

use bytes::{Buf, Bytes};
use thiserror::Error as ThisError;

use crate::frame::{DataType, Frame};

/// How many arrays may be nested inside one another.
pub const MAX_DEPTH: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum ParseError {
    #[error("unexpected token '{}' at offset {offset}", .byte.escape_ascii())]
    UnexpectedToken { byte: u8, offset: usize },
    /// More bytes are needed to finish the frame. The data seen so far is not malformed.
    #[error("not enough data to parse an entire frame, input ends at offset {offset}")]
    TruncatedInput { offset: usize },
    #[error("trailing data after frame at offset {offset}")]
    TrailingData { offset: usize },
    #[error("invalid UTF-8 string at offset {offset}")]
    InvalidUtf8 { offset: usize },
    #[error("integer overflow at offset {offset}")]
    IntegerOverflow { offset: usize },
    #[error("arrays nested deeper than {MAX_DEPTH} at offset {offset}")]
    NestingTooDeep { offset: usize },
}

impl ParseError {
    pub fn is_truncated(&self) -> bool {
        matches!(self, ParseError::TruncatedInput { .. })
    }
}

/// What happens to bytes left over after the top-level frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// The buffer must hold exactly one frame.
    Single,
    /// The buffer may hold several frames; call `parse` again to get the next one.
    Stream,
}

/// Recursive-descent RESP parser over a borrowed buffer.
///
/// The cursor only ever moves forward. After a successful `parse`, `position` is the number of
/// bytes consumed from the start of the buffer, so the caller can re-slice the buffer and go on
/// with the next frame.
pub struct Deserializer<'a> {
    cursor: Cursor<&'a [u8]>,
    mode: Mode,
    depth: usize,
}

impl<'a> Deserializer<'a> {
    pub fn new(src: &'a [u8]) -> Deserializer<'a> {
        Self::with_mode(src, Mode::Single)
    }

    pub fn stream(src: &'a [u8]) -> Deserializer<'a> {
        Self::with_mode(src, Mode::Stream)
    }

    pub fn with_mode(src: &'a [u8], mode: Mode) -> Deserializer<'a> {
        Deserializer {
            cursor: Cursor::new(src),
            mode,
            depth: 0,
        }
    }

    /// Iterates over every frame in `src`, stopping after the first error.
    pub fn frames(src: &'a [u8]) -> Frames<'a> {
        Frames {
            deserializer: Self::stream(src),
            done: false,
        }
    }

    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    pub fn has_remaining(&self) -> bool {
        self.cursor.has_remaining()
    }

    /// The bytes not consumed yet.
    pub fn remaining(&self) -> &'a [u8] {
        let buf: &'a [u8] = *self.cursor.get_ref();
        &buf[self.position().min(buf.len())..]
    }

    pub fn parse(&mut self) -> Result<Frame, ParseError> {
        self.depth = 0;
        let frame = self.parse_value()?;

        if self.mode == Mode::Single && self.has_remaining() {
            return Err(ParseError::TrailingData {
                offset: self.position(),
            });
        }

        Ok(frame)
    }

    fn parse_value(&mut self) -> Result<Frame, ParseError> {
        // The first byte in an RESP-serialized payload always identifies its type.
        let offset = self.position();
        let data_type = DataType::try_from(self.next_byte()?)
            .map_err(|byte| ParseError::UnexpectedToken { byte, offset })?;

        match data_type {
            // +<text>\r\n
            DataType::SimpleString => self.read_line_string().map(Frame::Simple),
            // -<text>\r\n
            DataType::SimpleError => self.read_line_string().map(Frame::Error),
            // :<digits>\r\n
            DataType::Integer => self.read_unsigned().map(Frame::Integer),
            // $<length>\r\n<data>\r\n
            DataType::BulkString => match self.read_length()? {
                None => Ok(Frame::Null),
                Some(length) => {
                    let data = self.read_exact(length)?;
                    self.expect_crlf()?;
                    Ok(Frame::Bulk(Bytes::copy_from_slice(data)))
                }
            },
            // *<number-of-elements>\r\n<element-1>...<element-n>
            DataType::Array => match self.read_length()? {
                None => Ok(Frame::NullArray),
                Some(length) => {
                    if self.depth == MAX_DEPTH {
                        return Err(ParseError::NestingTooDeep { offset });
                    }

                    // The length comes from the peer, don't trust it for the allocation.
                    let capacity = length.min(Buf::remaining(&self.cursor));
                    let mut frames = Vec::with_capacity(capacity);
                    self.depth += 1;
                    for _ in 0..length {
                        if !self.has_remaining() {
                            return Err(ParseError::TruncatedInput {
                                offset: self.position(),
                            });
                        }
                        frames.push(self.parse_value()?);
                    }
                    self.depth -= 1;
                    Ok(Frame::Array(frames))
                }
            },
        }
    }

    /// Reads a length prefix shared by bulk strings and arrays. `-1` is the null sentinel.
    fn read_length(&mut self) -> Result<Option<usize>, ParseError> {
        if self.peek_byte()? == b'-' {
            self.cursor.advance(1);
            self.expect_byte(b'1')?;
            self.expect_crlf()?;
            return Ok(None);
        }

        let offset = self.position();
        let length = self.read_unsigned()?;
        usize::try_from(length)
            .map(Some)
            .map_err(|_| ParseError::IntegerOverflow { offset })
    }

    /// Reads a non-empty run of decimal digits terminated by CRLF. There is no sign handling.
    fn read_unsigned(&mut self) -> Result<i64, ParseError> {
        let start = self.position();
        let mut value: i64 = 0;

        loop {
            let offset = self.position();
            match self.peek_byte()? {
                b'\r' if offset > start => break,
                byte @ b'0'..=b'9' => {
                    self.cursor.advance(1);
                    value = value
                        .checked_mul(10)
                        .and_then(|v| v.checked_add(i64::from(byte - b'0')))
                        .ok_or(ParseError::IntegerOverflow { offset })?;
                }
                byte => return Err(ParseError::UnexpectedToken { byte, offset }),
            }
        }

        self.expect_crlf()?;
        Ok(value)
    }

    fn read_line_string(&mut self) -> Result<String, ParseError> {
        let offset = self.position();
        let line = self.read_line()?;
        String::from_utf8(line.to_vec()).map_err(|_| ParseError::InvalidUtf8 { offset })
    }

    /// Reads up to the next line terminator and consumes it. A bare LF is rejected.
    fn read_line(&mut self) -> Result<&'a [u8], ParseError> {
        let buf: &'a [u8] = *self.cursor.get_ref();
        let start = self.position();

        let end = buf[start..]
            .iter()
            .position(|&b| b == b'\r' || b == b'\n')
            .map(|index| start + index)
            .ok_or(ParseError::TruncatedInput { offset: buf.len() })?;

        self.cursor.set_position(end as u64);
        self.expect_crlf()?;

        Ok(&buf[start..end])
    }

    fn read_exact(&mut self, length: usize) -> Result<&'a [u8], ParseError> {
        let buf: &'a [u8] = *self.cursor.get_ref();

        if Buf::remaining(&self.cursor) < length {
            return Err(ParseError::TruncatedInput { offset: buf.len() });
        }

        let start = self.position();
        self.cursor.advance(length);
        Ok(&buf[start..start + length])
    }

    fn expect_crlf(&mut self) -> Result<(), ParseError> {
        self.expect_byte(b'\r')?;
        self.expect_byte(b'\n')
    }

    fn expect_byte(&mut self, expected: u8) -> Result<(), ParseError> {
        let offset = self.position();
        match self.next_byte()? {
            byte if byte == expected => Ok(()),
            byte => Err(ParseError::UnexpectedToken { byte, offset }),
        }
    }

    fn peek_byte(&self) -> Result<u8, ParseError> {
        self.cursor
            .chunk()
            .first()
            .copied()
            .ok_or(ParseError::TruncatedInput {
                offset: self.position(),
            })
    }

    fn next_byte(&mut self) -> Result<u8, ParseError> {
        if !self.has_remaining() {
            return Err(ParseError::TruncatedInput {
                offset: self.position(),
            });
        }
        Ok(self.cursor.get_u8())
    }
}

/// Stream mode iterator returned by [`Deserializer::frames`].
pub struct Frames<'a> {
    deserializer: Deserializer<'a>,
    done: bool,
}

impl<'a> Frames<'a> {
    /// Bytes consumed by the frames yielded so far.
    pub fn position(&self) -> usize {
        self.deserializer.position()
    }
}

impl<'a> Iterator for Frames<'a> {
    type Item = Result<Frame, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || !self.deserializer.has_remaining() {
            return None;
        }

        let result = self.deserializer.parse();
        self.done = result.is_err();
        Some(result)
    }
}
