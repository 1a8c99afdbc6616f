//! Connection handler
//!
//! Drives one admitted connection through its lifecycle:
//! `Naming` (read the display name) → `Relaying` (fan lines out to
//! everyone else) → `Closed` (deregister and release the socket).
//!
//! Reads happen on the handler task. Writes happen on a separate writer
//! task that drains the client's outbound queue, so broadcasts from other
//! handlers never touch this socket directly.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info, warn};

use crate::broadcast::{self, broadcast};
use crate::client::Client;
use crate::config::ServerConfig;
use crate::error::{AppError, RegistryFull};
use crate::registry::{Registration, Registry};
use crate::types::{ClientId, DisplayName};

/// Line that ends a session the same way a closed socket does
pub const EXIT_SENTINEL: &str = "exit";

type LineSink<S> = SplitSink<Framed<S, LinesCodec>, Arc<str>>;
type LineStream<S> = SplitStream<Framed<S, LinesCodec>>;

/// Connection lifecycle state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    /// Waiting for the display name
    Naming,
    /// Relaying lines under the given name
    Relaying(DisplayName),
    /// Terminal
    Closed,
}

/// An admitted connection that has not been handed to its handler yet
#[derive(Debug)]
pub struct Admission {
    pub registration: Registration,
    pub addr: SocketAddr,
    pub outbound: mpsc::Receiver<Arc<str>>,
}

impl Admission {
    /// Register a new client and create its outbound queue
    pub fn admit(
        registry: &Arc<Registry>,
        id: ClientId,
        addr: SocketAddr,
        queue: usize,
    ) -> Result<Self, RegistryFull> {
        let (tx, outbound) = mpsc::channel(queue);
        let registration = Registration::register(registry.clone(), Client::new(id, addr, tx))?;
        Ok(Self {
            registration,
            addr,
            outbound,
        })
    }
}

/// What the next read produced
enum Inbound {
    Line(String),
    Eof,
    Failed(AppError),
}

/// Per-connection state machine
struct Connection<S> {
    registration: Registration,
    addr: SocketAddr,
    lines: LineStream<S>,
    writer: JoinHandle<Result<(), AppError>>,
    writer_done: bool,
    write_timeout: Duration,
    state: State,
    failure: Option<AppError>,
}

/// Run one connection to completion
///
/// Returns the error that ended the session, if any. The client is
/// deregistered before this returns, on every path.
pub async fn handle_connection<S>(
    stream: S,
    admission: Admission,
    config: Arc<ServerConfig>,
) -> Result<(), AppError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let Admission {
        registration,
        addr,
        outbound,
    } = admission;
    let id = registration.id();

    let codec = LinesCodec::new_with_max_length(config.max_line_length);
    let (sink, lines) = Framed::new(stream, codec).split();

    let writer = tokio::spawn(write_loop(sink, outbound, config.write_timeout, id));

    let mut conn = Connection {
        registration,
        addr,
        lines,
        writer,
        writer_done: false,
        write_timeout: config.write_timeout,
        state: State::Naming,
        failure: None,
    };

    conn.run().await;
    conn.close().await
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn id(&self) -> ClientId {
        self.registration.id()
    }

    fn registry(&self) -> &Registry {
        self.registration.registry()
    }

    async fn run(&mut self) {
        loop {
            self.state = match std::mem::replace(&mut self.state, State::Closed) {
                State::Naming => self.naming().await,
                State::Relaying(name) => self.relaying(name).await,
                State::Closed => return,
            };
        }
    }

    async fn next_line(&mut self) -> Inbound {
        tokio::select! {
            item = self.lines.next() => match item {
                Some(Ok(line)) => Inbound::Line(line),
                Some(Err(e)) => Inbound::Failed(e.into()),
                None => Inbound::Eof,
            },
            // The writer only stops on its own when the socket is dead.
            joined = &mut self.writer, if !self.writer_done => {
                self.writer_done = true;
                match joined {
                    Ok(Ok(())) => Inbound::Eof,
                    Ok(Err(e)) => Inbound::Failed(e),
                    Err(e) => Inbound::Failed(AppError::Io(std::io::Error::other(e))),
                }
            }
        }
    }

    async fn naming(&mut self) -> State {
        let raw = match self.next_line().await {
            Inbound::Line(raw) => raw,
            Inbound::Eof => {
                info!("Client {} ({}) closed before naming", self.id(), self.addr);
                return State::Closed;
            }
            Inbound::Failed(e) => {
                self.failure = Some(e);
                return State::Closed;
            }
        };

        match DisplayName::parse(&raw) {
            Ok(name) => {
                let msg = broadcast::joined(&name);
                info!("{}", msg);
                broadcast(self.registry(), self.id(), &msg);
                // Peers only ever see a name after its join went out.
                self.registry().set_name(self.id(), name.clone());
                State::Relaying(name)
            }
            Err(e) => {
                info!("Client {} ({}) didn't enter a valid name", self.id(), self.addr);
                self.failure = Some(e);
                State::Closed
            }
        }
    }

    async fn relaying(&mut self, name: DisplayName) -> State {
        match self.next_line().await {
            Inbound::Line(line) if line == EXIT_SENTINEL => {
                self.announce_leave(&name);
                State::Closed
            }
            Inbound::Line(line) if line.is_empty() => State::Relaying(name),
            Inbound::Line(line) => {
                broadcast(self.registry(), self.id(), &line);
                info!("{} -> {}", line, name);
                State::Relaying(name)
            }
            Inbound::Eof => {
                self.announce_leave(&name);
                State::Closed
            }
            Inbound::Failed(e) => {
                warn!("Client {} ({}) transport error: {}", self.id(), self.addr, e);
                self.announce_leave(&name);
                self.failure = Some(e);
                State::Closed
            }
        }
    }

    fn announce_leave(&self, name: &DisplayName) {
        let msg = broadcast::left(name);
        info!("{}", msg);
        broadcast(self.registry(), self.id(), &msg);
    }

    /// Deregister, let the writer flush, release the socket
    async fn close(self) -> Result<(), AppError> {
        let Connection {
            registration,
            lines,
            mut writer,
            writer_done,
            write_timeout,
            failure,
            ..
        } = self;
        let id = registration.id();

        drop(lines);
        // Drops the last outbound sender, which ends the writer.
        drop(registration);

        if !writer_done && timeout(write_timeout, &mut writer).await.is_err() {
            debug!("Writer for client {} did not finish, aborting", id);
            writer.abort();
        }

        debug!("Connection {} closed", id);
        failure.map_or(Ok(()), Err)
    }
}

/// Drain the outbound queue into the socket
///
/// Each write is bounded by `write_timeout`; a slow or dead peer ends the
/// writer instead of blocking anyone.
async fn write_loop<S>(
    mut sink: LineSink<S>,
    mut outbound: mpsc::Receiver<Arc<str>>,
    write_timeout: Duration,
    id: ClientId,
) -> Result<(), AppError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(line) = outbound.recv().await {
        match timeout(write_timeout, sink.send(line)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("Write to client {} failed: {}", id, e);
                return Err(e.into());
            }
            Err(_) => {
                debug!("Write to client {} timed out", id);
                return Err(AppError::WriteTimeout);
            }
        }
    }

    let _ = timeout(write_timeout, sink.close()).await;
    debug!("Write task ended for client {}", id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
    use tokio_util::codec::LinesCodecError;

    fn addr() -> SocketAddr {
        "127.0.0.1:7000".parse().unwrap()
    }

    fn config() -> Arc<ServerConfig> {
        Arc::new(ServerConfig {
            write_timeout: Duration::from_millis(500),
            ..ServerConfig::default()
        })
    }

    /// Register a passive peer that just collects what it is sent
    fn observer(registry: &Arc<Registry>, id: u64) -> (Registration, mpsc::Receiver<Arc<str>>) {
        let admission = Admission::admit(registry, ClientId(id), addr(), 16).unwrap();
        (admission.registration, admission.outbound)
    }

    fn spawn_handler(
        registry: &Arc<Registry>,
        id: u64,
    ) -> (DuplexStream, JoinHandle<Result<(), AppError>>) {
        spawn_with(registry, id, 4096, config())
    }

    fn spawn_with(
        registry: &Arc<Registry>,
        id: u64,
        buffer: usize,
        config: Arc<ServerConfig>,
    ) -> (DuplexStream, JoinHandle<Result<(), AppError>>) {
        let (client, server) = duplex(buffer);
        let admission = Admission::admit(registry, ClientId(id), addr(), 16).unwrap();
        let handle = tokio::spawn(handle_connection(server, admission, config));
        (client, handle)
    }

    #[tokio::test]
    async fn test_join_relay_exit() {
        let registry = Arc::new(Registry::new(4));
        let (_bob, mut bob_rx) = observer(&registry, 20);
        let (mut alice, handle) = spawn_handler(&registry, 21);

        alice.write_all(b"Alice\nhello\n\nexit\n").await.unwrap();

        assert_eq!(&*bob_rx.recv().await.unwrap(), "Alice has joined");
        assert_eq!(&*bob_rx.recv().await.unwrap(), "hello");
        assert_eq!(&*bob_rx.recv().await.unwrap(), "Alice has left");

        handle.await.unwrap().unwrap();
        assert!(!registry.contains(ClientId(21)));
        assert!(registry.contains(ClientId(20)));
    }

    #[tokio::test]
    async fn test_eof_announces_leave_once() {
        let registry = Arc::new(Registry::new(4));
        let (_bob, mut bob_rx) = observer(&registry, 20);
        let (mut alice, handle) = spawn_handler(&registry, 21);

        alice.write_all(b"Alice\n").await.unwrap();
        assert_eq!(&*bob_rx.recv().await.unwrap(), "Alice has joined");
        drop(alice);

        handle.await.unwrap().unwrap();
        assert_eq!(&*bob_rx.recv().await.unwrap(), "Alice has left");
        assert!(bob_rx.try_recv().is_err());
        assert!(!registry.contains(ClientId(21)));
    }

    #[tokio::test]
    async fn test_invalid_name_closes_without_broadcast() {
        let registry = Arc::new(Registry::new(4));
        let (_bob, mut bob_rx) = observer(&registry, 20);
        let (mut alice, handle) = spawn_handler(&registry, 21);

        let long = format!("{}\n", "x".repeat(31));
        alice.write_all(long.as_bytes()).await.unwrap();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(AppError::InvalidName(31))));
        assert!(bob_rx.try_recv().is_err());
        assert!(!registry.contains(ClientId(21)));
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let registry = Arc::new(Registry::new(4));
        let (mut alice, handle) = spawn_handler(&registry, 21);

        alice.write_all(b"\n").await.unwrap();

        assert!(matches!(handle.await.unwrap(), Err(AppError::InvalidName(0))));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_peer_receives_broadcast_lines() {
        let registry = Arc::new(Registry::new(4));
        let (alice, alice_handle) = spawn_handler(&registry, 21);
        let (mut bob, bob_handle) = spawn_handler(&registry, 22);

        let (alice_read, mut alice_write) = tokio::io::split(alice);
        let mut alice_lines = BufReader::new(alice_read).lines();

        alice_write.write_all(b"Alice\n").await.unwrap();
        bob.write_all(b"Bob\n").await.unwrap();
        assert_eq!(alice_lines.next_line().await.unwrap().unwrap(), "Bob has joined");

        bob.write_all(b"hi alice\nexit\n").await.unwrap();
        assert_eq!(alice_lines.next_line().await.unwrap().unwrap(), "hi alice");
        assert_eq!(alice_lines.next_line().await.unwrap().unwrap(), "Bob has left");
        bob_handle.await.unwrap().unwrap();

        alice_write.write_all(b"exit\n").await.unwrap();
        alice_handle.await.unwrap().unwrap();
        assert!(alice_lines.next_line().await.unwrap().is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_stalled_reader_times_out_and_leaves() {
        let registry = Arc::new(Registry::new(4));
        let (_bob, mut bob_rx) = observer(&registry, 20);
        let config = Arc::new(ServerConfig {
            write_timeout: Duration::from_millis(300),
            ..ServerConfig::default()
        });
        // Never read from, so the 64-byte pipe fills up
        let (mut stall, handle) = spawn_with(&registry, 21, 64, config);

        stall.write_all(b"Stall\n").await.unwrap();
        assert_eq!(&*bob_rx.recv().await.unwrap(), "Stall has joined");

        let line = "z".repeat(100);
        for _ in 0..10 {
            broadcast(&registry, ClientId(20), &line);
        }

        let result = timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert!(matches!(result, Err(AppError::WriteTimeout)));
        assert_eq!(&*bob_rx.recv().await.unwrap(), "Stall has left");
        assert!(bob_rx.try_recv().is_err());
        assert!(!registry.contains(ClientId(21)));
    }

    #[tokio::test]
    async fn test_overlong_line_ends_session() {
        let registry = Arc::new(Registry::new(4));
        let (_bob, mut bob_rx) = observer(&registry, 20);
        let (mut alice, handle) = spawn_handler(&registry, 21);

        let long = format!("Alice\n{}\n", "x".repeat(3000));
        alice.write_all(long.as_bytes()).await.unwrap();

        let result = handle.await.unwrap();
        assert!(matches!(
            result,
            Err(AppError::Codec(LinesCodecError::MaxLineLengthExceeded))
        ));
        assert_eq!(&*bob_rx.recv().await.unwrap(), "Alice has joined");
        assert_eq!(&*bob_rx.recv().await.unwrap(), "Alice has left");
        assert!(bob_rx.try_recv().is_err());
        assert!(!registry.contains(ClientId(21)));
    }

    #[tokio::test]
    async fn test_line_at_limit_is_relayed() {
        let registry = Arc::new(Registry::new(4));
        let (_bob, mut bob_rx) = observer(&registry, 20);
        let (mut alice, handle) = spawn_handler(&registry, 21);

        let line = "y".repeat(crate::config::BUFFER_SIZE);
        alice
            .write_all(format!("Alice\n{}\nexit\n", line).as_bytes())
            .await
            .unwrap();

        assert_eq!(&*bob_rx.recv().await.unwrap(), "Alice has joined");
        assert_eq!(&*bob_rx.recv().await.unwrap(), line.as_str());
        assert_eq!(&*bob_rx.recv().await.unwrap(), "Alice has left");
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_crlf_name_and_exit() {
        let registry = Arc::new(Registry::new(4));
        let (_bob, mut bob_rx) = observer(&registry, 20);
        let (mut alice, handle) = spawn_handler(&registry, 21);

        alice.write_all(b"Alice\r\nexit\r\n").await.unwrap();

        assert_eq!(&*bob_rx.recv().await.unwrap(), "Alice has joined");
        assert_eq!(&*bob_rx.recv().await.unwrap(), "Alice has left");
        handle.await.unwrap().unwrap();
        assert!(!registry.contains(ClientId(21)));
    }
}
