//! ChatServer dispatcher
//!
//! Owns the listener, the registry and the identity counter. Accepts
//! connections one at a time, admits or rejects them against the registry
//! capacity, and supervises one handler task per admitted connection.

use std::future::{pending, Future};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::AppError;
use crate::handler::{handle_connection, Admission};
use crate::registry::Registry;
use crate::types::{ClientId, IdAllocator};

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// The relay's accept loop and shared state
pub struct ChatServer {
    listener: TcpListener,
    registry: Arc<Registry>,
    ids: IdAllocator,
    config: Arc<ServerConfig>,
    handlers: JoinSet<(ClientId, Result<(), AppError>)>,
}

impl ChatServer {
    /// Bind the listener described by `config`
    pub async fn bind(config: ServerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr()).await?;
        Ok(Self::from_listener(listener, config))
    }

    /// Wrap an already bound listener
    pub fn from_listener(listener: TcpListener, config: ServerConfig) -> Self {
        Self {
            listener,
            registry: Arc::new(Registry::new(config.max_clients)),
            ids: IdAllocator::new(),
            config: Arc::new(config),
            handlers: JoinSet::new(),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared handle to the registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Run the accept loop forever
    pub async fn run(self) {
        self.run_until(pending::<()>()).await
    }

    /// Run the accept loop until `shutdown` resolves
    ///
    /// On shutdown every handler is aborted; each one deregisters its
    /// client as it is dropped.
    pub async fn run_until<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("ChatServer started (capacity {})", self.registry.capacity());

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.dispatch(stream, addr),
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(joined) = self.handlers.join_next() => self.reap(joined),
            }
        }

        info!("ChatServer shutting down");
        self.handlers.shutdown().await;
    }

    /// Admit or reject one accepted connection
    fn dispatch(&mut self, stream: TcpStream, addr: SocketAddr) {
        if self.registry.is_full() {
            info!("Max clients reached. Rejected: {}", addr);
            drop(stream);
            return;
        }

        let id = self.ids.next();
        let admission = match Admission::admit(&self.registry, id, addr, self.config.outbound_queue) {
            Ok(admission) => admission,
            Err(e) => {
                warn!("{} ({})", e, addr);
                return;
            }
        };

        info!("Client {} connected from {}", id, addr);
        debug!("Total clients: {}", self.registry.len());

        let config = self.config.clone();
        self.handlers.spawn(async move {
            let result = handle_connection(stream, admission, config).await;
            (id, result)
        });
    }

    fn reap(&self, joined: Result<(ClientId, Result<(), AppError>), tokio::task::JoinError>) {
        match joined {
            Ok((id, Ok(()))) => info!("Client {} disconnected", id),
            Ok((id, Err(e))) => info!("Client {} dropped: {}", id, e),
            Err(e) => error!("Connection handler failed: {}", e),
        }
        debug!("Total clients: {}", self.registry.len());
    }
}
