use bytes::BytesMut;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::commands::executable::Executable;
use crate::commands::Command;
use crate::deserializer::Deserializer;
use crate::frame::Frame;
use crate::serializer::{EncodeError, Serializer};
use crate::store::Store;
use crate::Error;

/// The most a single read hands to `process_chunk`.
const READ_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Reading requests and writing replies.
    Open,
    /// The peer went away or the socket failed. Nothing more is written.
    Closing,
    /// The socket is shut down.
    Closed,
}

/// One accepted client connection.
pub struct Connection {
    pub id: Uuid,
    pub address: SocketAddr,
    stream: TcpStream,
    // Each read lands in this buffer and is handled on its own: a request split across two reads
    // is not stitched back together.
    buffer: BytesMut,
    state: ConnectionState,
}

impl Connection {
    pub fn new(stream: TcpStream, address: SocketAddr) -> Connection {
        Connection {
            id: Uuid::new_v4(),
            address,
            stream,
            buffer: BytesMut::with_capacity(READ_CHUNK_SIZE),
            state: ConnectionState::Open,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Serves requests until the peer closes the connection or the socket fails.
    pub async fn run(&mut self, store: &Store) -> Result<(), Error> {
        let result = self.serve(store).await;
        self.state = ConnectionState::Closing;
        result
    }

    async fn serve(&mut self, store: &Store) -> Result<(), Error> {
        while self.state == ConnectionState::Open {
            self.buffer.clear();
            self.buffer.reserve(READ_CHUNK_SIZE);

            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                debug!("peer closed the connection");
                break;
            }

            let replies = process_chunk(&self.buffer, store)?;
            self.stream.write_all(&replies).await?;
        }

        Ok(())
    }

    pub async fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }

        if let Err(e) = self.stream.shutdown().await {
            debug!("failed to shut down socket: {}", e);
        }
        self.state = ConnectionState::Closed;
    }
}

/// Handles every request found in one read and returns the encoded replies.
///
/// Requests are peeled off the chunk front to back. The first one that fails to parse gets a
/// single `Cannot parse` error reply and the rest of the chunk is dropped.
pub fn process_chunk(chunk: &[u8], store: &Store) -> Result<BytesMut, EncodeError> {
    let serializer = Serializer::bulk();
    let mut replies = BytesMut::new();
    let mut position = 0;

    while position < chunk.len() {
        let mut deserializer = Deserializer::stream(&chunk[position..]);

        match deserializer.parse() {
            Ok(frame) => {
                position += deserializer.position();
                let reply = dispatch(frame, store);
                serializer.serialize_into(&reply, &mut replies)?;
            }
            Err(err) => {
                warn!(
                    offset = position,
                    dropped = chunk.len() - position,
                    "failed to parse request: {}",
                    err
                );
                let reply = Frame::Error("Cannot parse".to_string());
                serializer.serialize_into(&reply, &mut replies)?;
                break;
            }
        }
    }

    Ok(replies)
}

/// Runs one request against the store. Command errors become error replies.
pub fn dispatch(frame: Frame, store: &Store) -> Frame {
    let result = Command::try_from(frame).and_then(|cmd| {
        debug!(command = ?cmd.name(), "executing command");
        cmd.exec(store.clone())
    });

    match result {
        Ok(reply) => reply,
        Err(err) => {
            debug!("command failed: {}", err);
            // Error replies are line based.
            Frame::Error(err.to_string().replace(['\r', '\n'], " "))
        }
    }
}
