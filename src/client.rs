//! Client struct definition
//!
//! Represents an admitted connection as seen by the registry: identity,
//! peer address, display name and the handle to its outbound queue.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::SendError;
use crate::types::{ClientId, DisplayName};

/// Connected client information
///
/// The socket itself is owned by the connection handler; other handlers
/// only reach this client through `sender`.
#[derive(Debug)]
pub struct Client {
    /// Unique identifier for this client
    pub id: ClientId,
    /// Remote endpoint captured at accept time
    pub addr: SocketAddr,
    /// Display name (None before the handshake completes)
    pub name: Option<DisplayName>,
    /// Relay → client line queue
    pub sender: mpsc::Sender<Arc<str>>,
}

impl Client {
    /// Create a new client with the given ID, address and sender channel
    pub fn new(id: ClientId, addr: SocketAddr, sender: mpsc::Sender<Arc<str>>) -> Self {
        Self {
            id,
            addr,
            name: None,
            sender,
        }
    }

    /// Queue a line for this client without waiting
    ///
    /// Returns an error if the queue is full or the writer has gone away.
    pub fn deliver(&self, line: Arc<str>) -> Result<(), SendError> {
        self.sender.try_send(line).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::ChannelFull,
            mpsc::error::TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }

    /// Get the display name for this client
    ///
    /// Returns the name if set, otherwise "Unknown".
    pub fn display_name(&self) -> &str {
        self.name.as_ref().map(DisplayName::as_str).unwrap_or("Unknown")
    }

    /// Check if this client has completed the handshake
    pub fn has_name(&self) -> bool {
        self.name.is_some()
    }
}
