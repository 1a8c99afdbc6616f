//! Basic type definitions for the chat relay
//!
//! Provides newtype wrappers for type safety:
//! - `ClientId`: process-unique integer connection identity
//! - `IdAllocator`: monotonic source of `ClientId`s
//! - `DisplayName`: validated name chosen during the join handshake

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::AppError;

/// First identity handed out by a fresh allocator
pub const FIRST_CLIENT_ID: u64 = 10;

/// Maximum display name length in bytes
pub const MAX_NAME_LEN: usize = 30;

/// Unique client identifier (newtype pattern)
///
/// Never reused while the process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic identity counter
///
/// `next` is a single atomic increment, so concurrent admissions can
/// never observe the same identity.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    /// Create an allocator starting at [`FIRST_CLIENT_ID`]
    pub fn new() -> Self {
        Self::starting_at(FIRST_CLIENT_ID)
    }

    fn starting_at(base: u64) -> Self {
        Self {
            next: AtomicU64::new(base),
        }
    }

    /// Hand out the next identity
    pub fn next(&self) -> ClientId {
        ClientId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Display name (1-30 bytes, no control characters)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DisplayName(String);

impl DisplayName {
    /// Validate a name submitted during the join handshake
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        if raw.is_empty() || raw.len() > MAX_NAME_LEN || raw.chars().any(char::is_control) {
            return Err(AppError::InvalidName(raw.len()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DisplayName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
