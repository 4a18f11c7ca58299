use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::connection::Connection;
use crate::store::Store;
use crate::Error;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 6379;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// Live connection tasks, keyed by the peer address.
#[derive(Clone, Default)]
struct Registry {
    connections: Arc<Mutex<HashMap<SocketAddr, JoinHandle<()>>>>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<SocketAddr, JoinHandle<()>>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct Server {
    config: Config,
    store: Store,
}

impl Server {
    pub fn new(config: Config) -> Server {
        Self::with_store(config, Store::new())
    }

    /// Serves `store` instead of a fresh, empty one.
    pub fn with_store(config: Config, store: Store) -> Server {
        Server { config, store }
    }

    /// Binds the listener and starts accepting connections in the background.
    pub async fn start(self) -> Result<ServerHandle, Error> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let local_addr = listener.local_addr()?;

        info!("server listening on {}", local_addr);

        let registry = Registry::default();
        let shutdown = Arc::new(Notify::new());

        let accept = tokio::spawn(accept_loop(
            listener,
            self.store.clone(),
            registry.clone(),
            shutdown.clone(),
        ));

        Ok(ServerHandle {
            local_addr,
            store: self.store,
            registry,
            shutdown,
            accept,
        })
    }
}

/// Controls a started server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    store: Store,
    registry: Registry,
    shutdown: Arc<Notify>,
    accept: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn connection_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Stops the server. Every open connection is closed without waiting for the peer, then the
    /// listener is closed. Returns once the listener is gone.
    pub async fn stop(self) -> Result<(), Error> {
        self.shutdown.notify_one();
        self.accept.await?;

        info!("server stopped");
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    store: Store,
    registry: Registry,
    shutdown: Arc<Notify>,
) {
    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            accepted = listener.accept() => match accepted {
                Ok((socket, client_address)) => {
                    info!("Accepted connection from {:?}", client_address);

                    // Hold the lock across the spawn so the task can't deregister before it is
                    // registered.
                    let mut connections = registry.lock();
                    let task = tokio::spawn(handle_connection(
                        socket,
                        client_address,
                        store.clone(),
                        registry.clone(),
                    ));
                    connections.insert(client_address, task);
                }
                Err(e) => error!("failed to accept connection: {}", e),
            },
        }
    }

    // Only this loop registers connections, so the drain sees all of them.
    let connections: Vec<_> = registry.lock().drain().collect();
    for (client_address, connection) in connections {
        debug!("closing connection from {:?}", client_address);
        connection.abort();
        // Resolves once the task is dropped, and its socket with it.
        if let Err(e) = connection.await {
            if !e.is_cancelled() {
                error!("connection task failed: {}", e);
            }
        }
    }

    drop(listener);
    info!("listener closed");
}

#[instrument(
    name = "connection",
    skip(stream, store, registry),
    fields(connection_id, client_address)
)]
async fn handle_connection(
    stream: TcpStream,
    client_address: SocketAddr,
    store: Store,
    registry: Registry,
) {
    let mut conn = Connection::new(stream, client_address);

    tracing::Span::current()
        .record("connection_id", conn.id.to_string())
        .record("client_address", client_address.to_string());

    if let Err(e) = conn.run(&store).await {
        warn!("connection error: {}", e);
    }

    conn.close().await;
    registry.lock().remove(&client_address);

    info!("Connection closed");
}

/// Runs a server until Ctrl-C is received.
pub async fn run(config: Config) -> Result<(), Error> {
    let _ = tracing_subscriber::fmt()
        .try_init()
        .map_err(|e| debug!("Failed to initialize global tracing: {}", e));

    let server = Server::new(config).start().await?;

    signal::ctrl_c().await?;
    info!("shutdown signal received");

    server.stop().await
}
