use bytes::{BufMut, BytesMut};
use thiserror::Error as ThisError;

use crate::frame::{has_line_break, DataType, Frame, CRLF};

#[derive(Debug, Clone, PartialEq, ThisError)]
pub enum EncodeError {
    #[error("invalid input; value is not RESP encodable")]
    InvalidInput,
    #[error("invalid integer {0}")]
    NotAnInteger(f64),
    #[error("simple string contains LF or CR character")]
    ContainsLineBreak,
}

/// Encodes frames into RESP wire bytes.
///
/// `bulk_strings` picks the encoding of string values (`Frame::Bulk`). Everything sent over a
/// connection uses the bulk form, which carries arbitrary bytes. The simple form is terser but
/// refuses strings holding CR or LF. Status replies (`Frame::Simple`) always use the simple form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Serializer {
    bulk_strings: bool,
}

impl Serializer {
    pub fn new(bulk_strings: bool) -> Serializer {
        Serializer { bulk_strings }
    }

    pub fn bulk() -> Serializer {
        Self::new(true)
    }

    pub fn simple() -> Serializer {
        Self::new(false)
    }

    pub fn serialize(&self, frame: &Frame) -> Result<Vec<u8>, EncodeError> {
        let mut dst = BytesMut::new();
        self.serialize_into(frame, &mut dst)?;
        Ok(dst.to_vec())
    }

    /// Appends the encoding of `frame` to `dst`. Nothing is written when the frame is rejected.
    pub fn serialize_into(&self, frame: &Frame, dst: &mut BytesMut) -> Result<(), EncodeError> {
        if !frame.is_encodable() {
            return Err(EncodeError::InvalidInput);
        }
        self.check_line_breaks(frame)?;

        self.write(frame, dst);
        Ok(())
    }

    fn check_line_breaks(&self, frame: &Frame) -> Result<(), EncodeError> {
        match frame {
            Frame::Simple(s) if has_line_break(s.as_bytes()) => {
                Err(EncodeError::ContainsLineBreak)
            }
            Frame::Bulk(bytes) if !self.bulk_strings && has_line_break(bytes) => {
                Err(EncodeError::ContainsLineBreak)
            }
            Frame::Array(frames) => frames
                .iter()
                .try_for_each(|frame| self.check_line_breaks(frame)),
            _ => Ok(()),
        }
    }

    fn write(&self, frame: &Frame, dst: &mut BytesMut) {
        match frame {
            Frame::Simple(s) => write_line(dst, DataType::SimpleString, s.as_bytes()),
            Frame::Error(s) => write_line(dst, DataType::SimpleError, s.as_bytes()),
            Frame::Integer(i) => write_line(dst, DataType::Integer, i.to_string().as_bytes()),
            Frame::Bulk(bytes) if self.bulk_strings => {
                write_line(dst, DataType::BulkString, bytes.len().to_string().as_bytes());
                dst.put_slice(bytes);
                dst.put_slice(CRLF);
            }
            Frame::Bulk(bytes) => write_line(dst, DataType::SimpleString, bytes),
            Frame::Null => write_line(dst, DataType::BulkString, b"-1"),
            Frame::NullArray => write_line(dst, DataType::Array, b"-1"),
            Frame::Array(frames) => {
                write_line(dst, DataType::Array, frames.len().to_string().as_bytes());
                for frame in frames {
                    self.write(frame, dst);
                }
            }
        }
    }
}

impl Default for Serializer {
    fn default() -> Self {
        Self::bulk()
    }
}

fn write_line(dst: &mut BytesMut, data_type: DataType, payload: &[u8]) {
    dst.reserve(1 + payload.len() + CRLF.len());
    dst.put_u8(u8::from(data_type));
    dst.put_slice(payload);
    dst.put_slice(CRLF);
}
