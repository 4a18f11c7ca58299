use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error as ThisError;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, warn};

use crate::codec::FrameCodec;
use crate::frame::Frame;
use crate::Error;

/// How long the connection may stay silent before it is torn down.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, ThisError)]
pub enum ClientError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("protocol error; {0}")]
    Protocol(String),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("connection idle for {0:?}")]
    Timeout(Duration),
    /// The server answered with an error reply.
    #[error("{0}")]
    Server(String),
}

impl From<Error> for ClientError {
    fn from(err: Error) -> Self {
        match err.downcast::<io::Error>() {
            Ok(err) => ClientError::Io(*err),
            Err(err) => ClientError::Protocol(err.to_string()),
        }
    }
}

impl ClientError {
    /// The error handed to every request still waiting when the reader stops with `self`.
    fn for_pending_request(&self) -> ClientError {
        match self {
            ClientError::Timeout(idle_timeout) => ClientError::Timeout(*idle_timeout),
            ClientError::Protocol(msg) => ClientError::Protocol(msg.clone()),
            _ => ClientError::ConnectionClosed,
        }
    }
}

type Reply = Result<Frame, ClientError>;
type Writer = Arc<AsyncMutex<FramedWrite<OwnedWriteHalf, FrameCodec>>>;

/// Requests waiting for a reply, oldest first.
#[derive(Default)]
struct Pending {
    queue: VecDeque<oneshot::Sender<Reply>>,
    closed: bool,
}

fn lock(pending: &Mutex<Pending>) -> MutexGuard<'_, Pending> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A connection to a server. Replies arrive in request order, so each one goes to the oldest
/// request still waiting.
pub struct Client {
    writer: Writer,
    pending: Arc<Mutex<Pending>>,
    reader: JoinHandle<()>,
}

impl Client {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Client, ClientError> {
        Self::connect_with_timeout(addr, DEFAULT_IDLE_TIMEOUT).await
    }

    pub async fn connect_with_timeout<A: ToSocketAddrs>(
        addr: A,
        idle_timeout: Duration,
    ) -> Result<Client, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        debug!("client connected to {}", stream.peer_addr()?);

        let (read_half, write_half) = stream.into_split();
        let writer = Arc::new(AsyncMutex::new(FramedWrite::new(
            write_half,
            FrameCodec::new(),
        )));
        let pending = Arc::new(Mutex::new(Pending::default()));

        let reader = tokio::spawn(read_replies(
            FramedRead::new(read_half, FrameCodec::new()),
            writer.clone(),
            pending.clone(),
            idle_timeout,
        ));

        Ok(Client {
            writer,
            pending,
            reader,
        })
    }

    /// Sends a command as an array of bulk strings and waits for its reply. Error replies are
    /// returned as `ClientError::Server`.
    pub async fn request<I, S>(&self, parts: I) -> Result<Frame, ClientError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let frame = Frame::request(parts);
        let (tx, rx) = oneshot::channel();

        {
            // The writer lock orders both the queue and the socket.
            let mut writer = self.writer.lock().await;

            {
                let mut pending = lock(&self.pending);
                if pending.closed {
                    return Err(ClientError::ConnectionClosed);
                }
                pending.queue.push_back(tx);
            }

            if let Err(e) = writer.send(frame).await {
                lock(&self.pending).queue.pop_back();
                return Err(e.into());
            }
        }

        match rx.await.map_err(|_| ClientError::ConnectionClosed)?? {
            Frame::Error(msg) => Err(ClientError::Server(msg)),
            frame => Ok(frame),
        }
    }

    pub async fn ping(&self, message: Option<&str>) -> Result<Frame, ClientError> {
        match message {
            Some(message) => self.request(["PING", message]).await,
            None => self.request(["PING"]).await,
        }
    }

    pub async fn echo(&self, message: &str) -> Result<Frame, ClientError> {
        self.request(["ECHO", message]).await
    }

    pub async fn set(&self, key: &str, value: impl AsRef<[u8]>) -> Result<Frame, ClientError> {
        self.request([&b"SET"[..], key.as_bytes(), value.as_ref()])
            .await
    }

    pub async fn get(&self, key: &str) -> Result<Option<Bytes>, ClientError> {
        match self.request(["GET", key]).await? {
            Frame::Bulk(value) => Ok(Some(value)),
            Frame::Null => Ok(None),
            frame => Err(ClientError::Protocol(format!(
                "unexpected reply to GET: {}",
                frame
            ))),
        }
    }

    pub async fn del(&self, key: &str) -> Result<Frame, ClientError> {
        self.request(["DEL", key]).await
    }

    pub fn pending_requests(&self) -> usize {
        lock(&self.pending).queue.len()
    }

    pub async fn disconnect(self) -> Result<(), ClientError> {
        self.writer.lock().await.close().await?;
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_replies(
    mut reader: FramedRead<OwnedReadHalf, FrameCodec>,
    writer: Writer,
    pending: Arc<Mutex<Pending>>,
    idle_timeout: Duration,
) {
    let reason = loop {
        let reply = match time::timeout(idle_timeout, reader.next()).await {
            Err(_) => {
                warn!("no data received for {:?}, closing connection", idle_timeout);
                break ClientError::Timeout(idle_timeout);
            }
            Ok(None) => break ClientError::ConnectionClosed,
            Ok(Some(reply)) => reply,
        };

        let Some(waiting) = lock(&pending).queue.pop_front() else {
            error!("received a reply with no request waiting for it");
            break ClientError::Protocol("unexpected reply".to_string());
        };

        match reply {
            Ok(frame) => {
                // The requester may have given up on the reply.
                let _ = waiting.send(Ok(frame));
            }
            Err(e) => {
                // The decoder can't find the next frame boundary after a malformed one.
                let _ = waiting.send(Err(ClientError::Protocol(e.to_string())));
                break ClientError::ConnectionClosed;
            }
        }
    };

    debug!("client connection closing: {}", reason);

    let waiting = {
        let mut pending = lock(&pending);
        pending.closed = true;
        std::mem::take(&mut pending.queue)
    };
    for request in waiting {
        let _ = request.send(Err(reason.for_pending_request()));
    }

    if let Err(e) = writer.lock().await.close().await {
        debug!("failed to close client socket: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    /// Accepts one connection, waits for `expect` request bytes, then writes `reply` at once.
    async fn scripted_server(expect: usize, reply: &'static [u8]) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; expect];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(reply).await.unwrap();
            // Keep the socket open until the client is done.
            let _ = socket.read(&mut [0u8; 1]).await;
        });

        addr
    }

    #[tokio::test]
    async fn coalesced_replies_resolve_requests_in_order() {
        let ping = b"*1\r\n$4\r\nPING\r\n".len();
        let echo = b"*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n".len();
        let addr = scripted_server(ping + echo, b"$4\r\nPONG\r\n$2\r\nhi\r\n").await;

        let client = Client::connect(addr).await.unwrap();
        let (pong, hi) = tokio::join!(client.ping(None), client.echo("hi"));

        assert_eq!(pong.unwrap(), Frame::Bulk(Bytes::from("PONG")));
        assert_eq!(hi.unwrap(), Frame::Bulk(Bytes::from("hi")));
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn error_reply_is_a_server_error() {
        let request = b"*1\r\n$3\r\nFOO\r\n".len();
        let addr = scripted_server(request, b"-ERR unknown command 'FOO'\r\n").await;

        let client = Client::connect(addr).await.unwrap();
        let err = client.request(["FOO"]).await.unwrap_err();

        assert!(matches!(err, ClientError::Server(ref msg) if msg.contains("FOO")));
    }

    #[tokio::test]
    async fn malformed_reply_rejects_the_request() {
        let request = b"*1\r\n$4\r\nPING\r\n".len();
        let addr = scripted_server(request, b"?garbage\r\n").await;

        let client = Client::connect(addr).await.unwrap();
        let err = client.ping(None).await.unwrap_err();

        assert!(matches!(err, ClientError::Protocol(_)));
    }

    #[tokio::test]
    async fn idle_timeout_ends_the_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            // Never answer.
            let mut buf = [0u8; 64];
            while let Ok(n) = socket.read(&mut buf).await {
                if n == 0 {
                    break;
                }
            }
        });

        let client = Client::connect_with_timeout(addr, Duration::from_millis(100))
            .await
            .unwrap();
        let err = client.ping(None).await.unwrap_err();

        assert!(matches!(err, ClientError::Timeout(t) if t == Duration::from_millis(100)));
        assert!(matches!(
            client.ping(None).await,
            Err(ClientError::ConnectionClosed)
        ));
    }
}
