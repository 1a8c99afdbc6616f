//! Error types for the chat relay
//!
//! Defines connection-level errors, outbound delivery errors and the
//! registry admission error. Uses thiserror for ergonomic error definitions.

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

use crate::client::Client;

/// Application-level errors
///
/// Every variant ends the connection it occurred on and nothing else.
#[derive(Debug, Error)]
pub enum AppError {
    /// IO error on the client socket
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Line framing error (over-long line or IO failure while framing)
    #[error("Line codec error: {0}")]
    Codec(#[from] LinesCodecError),

    /// A single socket write exceeded the configured bound
    #[error("Write timed out")]
    WriteTimeout,

    /// Name submitted during the handshake was rejected
    #[error("Invalid display name ({0} bytes)")]
    InvalidName(usize),
}

/// Outbound delivery errors
///
/// Occurs when a broadcast cannot be queued for a peer.
#[derive(Debug, Error)]
pub enum SendError {
    /// The peer's outbound queue is full (peer is not draining)
    #[error("Channel full")]
    ChannelFull,

    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,
}

/// Registry has no free slot
///
/// Carries the rejected record back to the caller.
#[derive(Debug, Error)]
#[error("Registry full, client {} not admitted", .0.id)]
pub struct RegistryFull(pub Client);
