use bytes::{Buf, BytesMut};
use std::env;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::deserializer::Deserializer;
use crate::frame::Frame;
use crate::serializer::Serializer;
use crate::Error;

const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024;

/// Frames a byte stream that may split or coalesce RESP values across reads.
///
/// Unlike the server's per-read handling, a truncated frame is not an error here: the decoder
/// keeps the bytes and waits for more.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
    serializer: Serializer,
}

impl FrameCodec {
    pub fn new() -> FrameCodec {
        let max_frame_size = env::var("MINIDIS_MAX_FRAME_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_FRAME_SIZE);

        Self::with_max_frame_size(max_frame_size)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> FrameCodec {
        FrameCodec {
            max_frame_size,
            serializer: Serializer::bulk(),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        // Check if the frame size exceeds a certain limit to prevent DoS attacks
        if src.len() > self.max_frame_size {
            return Err("frame size exceeds limit".into());
        }

        let mut deserializer = Deserializer::stream(&src[..]);
        let frame = match deserializer.parse() {
            Ok(frame) => frame,
            // Not enough data to parse a frame.
            Err(err) if err.is_truncated() => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let position = deserializer.position();

        trace!(bytes = position, "decoded frame");

        // Remove the parsed frame from the buffer.
        src.advance(position);

        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.serializer.serialize_into(&frame, dst)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn waits_for_the_rest_of_a_split_frame() {
        let mut codec = FrameCodec::with_max_frame_size(1024);
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$3\r\nfo"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 19);

        buf.extend_from_slice(b"o\r\n");

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::request(["GET", "foo"]))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn decodes_coalesced_frames_one_at_a_time() {
        let mut codec = FrameCodec::with_max_frame_size(1024);
        let mut buf = BytesMut::from(&b"+OK\r\n$3\r\nbar\r\n"[..]);

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Simple("OK".to_string()))
        );
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Bulk(Bytes::from("bar")))
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn malformed_frame_is_an_error() {
        let mut codec = FrameCodec::with_max_frame_size(1024);
        let mut buf = BytesMut::from(&b"?what\r\n"[..]);

        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn oversized_buffer_is_an_error() {
        let mut codec = FrameCodec::with_max_frame_size(4);
        let mut buf = BytesMut::from(&b"$3\r\nbar\r\n"[..]);

        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn deeply_nested_arrays_are_an_error() {
        let mut codec = FrameCodec::with_max_frame_size(1024 * 1024);
        let mut buf = BytesMut::from(&b"*1\r\n".repeat(100_000)[..]);

        let err = codec.decode(&mut buf).unwrap_err();

        assert!(err.to_string().contains("nested"));
    }

    #[test]
    fn encodes_requests_with_bulk_strings() {
        let mut codec = FrameCodec::with_max_frame_size(1024);
        let mut dst = BytesMut::new();

        codec
            .encode(Frame::request(["ECHO", "hi"]), &mut dst)
            .unwrap();

        assert_eq!(&dst[..], b"*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n");
    }
}
