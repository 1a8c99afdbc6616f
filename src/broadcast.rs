//! Broadcast relay
//!
//! Fans one line out to every registered client except its originator.
//! Delivery only queues the line on each peer's outbound channel, so a
//! stalled peer never holds the registry lock.

use std::sync::Arc;

use tracing::warn;

use crate::registry::Registry;
use crate::types::{ClientId, DisplayName};

/// Outcome of one broadcast pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Peers the line was queued for
    pub delivered: usize,
    /// Peers whose queue was full or closed
    pub dropped: usize,
}

/// Send `payload` to every registered client other than `from`
///
/// A failure for one peer is logged and skipped; the peer's own handler
/// notices its dead transport on its next read or write.
pub fn broadcast(registry: &Registry, from: ClientId, payload: &str) -> Delivery {
    let line: Arc<str> = Arc::from(payload);
    let mut report = Delivery::default();

    registry.for_each_except(from, |peer| match peer.deliver(line.clone()) {
        Ok(()) => report.delivered += 1,
        Err(e) => {
            warn!("Delivery to client {} ({}) failed: {}", peer.id, peer.addr, e);
            report.dropped += 1;
        }
    });

    report
}

/// Announcement sent when a client completes the handshake
pub fn joined(name: &DisplayName) -> String {
    format!("{} has joined", name)
}

/// Announcement sent when a named client leaves
pub fn left(name: &DisplayName) -> String {
    format!("{} has left", name)
}
