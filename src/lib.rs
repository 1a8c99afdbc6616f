//! Line-oriented TCP Chat Relay Library
//!
//! Every connected client picks a display name, then each line it sends
//! is relayed to every other connected client.
//!
//! # Features
//! - Name handshake (first line, 1-30 printable bytes)
//! - Join/leave announcements (`<name> has joined`, `<name> has left`)
//! - Line relay to all peers except the sender
//! - `exit` sentinel for a graceful leave
//! - Fixed capacity; excess connections are closed immediately
//!
//! # Architecture
//! - `ChatServer` is the dispatcher: it accepts, admits against the
//!   `Registry` capacity and spawns one handler task per connection
//! - The `Registry` is the only shared state: a fixed slot table behind
//!   one mutex
//! - Each handler runs a `Naming → Relaying → Closed` state machine and
//!   owns a writer task fed by a bounded per-client queue, so broadcasts
//!   never wait on a slow peer
//!
//! # Example
//! ```ignore
//! use chat_relay::{ChatServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let server = ChatServer::bind(ServerConfig::with_port(8080)).await?;
//!     server.run().await;
//!     Ok(())
//! }
//! ```

pub mod broadcast;
pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod registry;
pub mod server;
pub mod types;

// Re-export main types for convenience
pub use broadcast::{broadcast, Delivery};
pub use client::Client;
pub use config::ServerConfig;
pub use error::{AppError, RegistryFull, SendError};
pub use handler::{handle_connection, Admission, State};
pub use registry::{Registration, Registry, MAX_CLIENTS};
pub use server::ChatServer;
pub use types::{ClientId, DisplayName, IdAllocator};
