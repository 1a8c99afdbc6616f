//! Connection registry
//!
//! Fixed-capacity slot table of admitted clients behind a single mutex.
//! Insert, remove and full-table iteration all hold the lock for the whole
//! structural operation; callers never touch slots directly.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::client::Client;
use crate::error::RegistryFull;
use crate::types::{ClientId, DisplayName};

/// Default number of simultaneously registered clients
pub const MAX_CLIENTS: usize = 100;

/// Shared table of active clients
#[derive(Debug)]
pub struct Registry {
    slots: Mutex<Vec<Option<Client>>>,
}

impl Registry {
    /// Create an empty registry with `capacity` slots
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots: Mutex::new(slots),
        }
    }

    /// Lock the slot table, recovering it if a holder panicked
    fn lock(&self) -> MutexGuard<'_, Vec<Option<Client>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Place a client in the first free slot
    ///
    /// Fails without overwriting anything when every slot is taken.
    pub fn insert(&self, client: Client) -> Result<(), RegistryFull> {
        let mut slots = self.lock();
        match slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                debug!("Registered client {}", client.id);
                *slot = Some(client);
                Ok(())
            }
            None => Err(RegistryFull(client)),
        }
    }

    /// Clear the slot holding `id`
    ///
    /// Returns the removed client; an unknown id is a no-op.
    pub fn remove(&self, id: ClientId) -> Option<Client> {
        let mut slots = self.lock();
        let slot = slots
            .iter_mut()
            .find(|slot| matches!(slot, Some(c) if c.id == id))?;
        debug!("Deregistered client {}", id);
        slot.take()
    }

    /// Record the display name chosen by `id`
    ///
    /// Returns false if the client is no longer registered.
    pub fn set_name(&self, id: ClientId, name: DisplayName) -> bool {
        let mut slots = self.lock();
        match slots.iter_mut().flatten().find(|c| c.id == id) {
            Some(client) => {
                client.name = Some(name);
                true
            }
            None => false,
        }
    }

    /// Visit every registered client except `id`
    ///
    /// The lock is held for the full pass, so `f` must not block.
    pub fn for_each_except<F>(&self, id: ClientId, mut f: F)
    where
        F: FnMut(&Client),
    {
        let slots = self.lock();
        for client in slots.iter().flatten().filter(|c| c.id != id) {
            f(client);
        }
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.lock().iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().len()
    }

    /// Check whether another insert would fail
    pub fn is_full(&self) -> bool {
        self.lock().iter().all(Option::is_some)
    }

    /// Check whether `id` is currently registered
    pub fn contains(&self, id: ClientId) -> bool {
        self.lock().iter().flatten().any(|c| c.id == id)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(MAX_CLIENTS)
    }
}

/// Scoped registry membership
///
/// Dropping the guard removes the client, whatever path the owning task
/// exits through (return, error, panic or abort).
#[derive(Debug)]
pub struct Registration {
    registry: Arc<Registry>,
    id: ClientId,
}

impl Registration {
    /// Insert `client` and tie its removal to the returned guard
    pub fn register(registry: Arc<Registry>, client: Client) -> Result<Self, RegistryFull> {
        let id = client.id;
        registry.insert(client)?;
        Ok(Self { registry, id })
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}
