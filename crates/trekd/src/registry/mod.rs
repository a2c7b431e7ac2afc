//! Participant registry.
//!
//! The registry maps display names to reachable participants and keeps
//! per-name message statistics, which survive departure and accumulate
//! across reconnections.
//!
//! # Locking
//!
//! All state sits behind one reader-writer lock:
//!
//! - Membership changes (join, register, remove) take the exclusive lock.
//!   Name allocation runs inside that same section, so two concurrent
//!   joins never receive the same name.
//! - Lookups, listings, statistics snapshots and counter increments take
//!   the shared lock. Counters are atomics, so a message send never
//!   needs exclusive access.
//! - [`Registry::pause_for`] holds the exclusive lock for a fixed time.
//!   Every other registry operation waits for it.
//!
//! # Panic-Free Guarantees
//!
//! No method in this module panics. Unknown names yield `None`.

mod state;

pub use state::{RegistryError, StatCounters};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{error, info};

use trek_core::{ParticipantName, ParticipantStats};

use crate::naming::NameAllocator;
use crate::participant::{Participant, ParticipantHandle};
use state::RegistryState;

/// Shared, cloneable handle to the participant registry.
#[derive(Clone)]
pub struct Registry {
    state: Arc<RwLock<RegistryState>>,
    allocator: Arc<NameAllocator>,
}

impl Registry {
    /// Creates an empty registry that names joining participants with
    /// `allocator`.
    pub fn new(allocator: NameAllocator) -> Self {
        Self {
            state: Arc::new(RwLock::new(RegistryState::default())),
            allocator: Arc::new(allocator),
        }
    }

    // ========================================================================
    // Membership
    // ========================================================================

    /// Allocates a unique name, builds the participant for it and
    /// registers it, all under one exclusive section.
    ///
    /// Fails with `NameTaken` if `build` returns a participant carrying a
    /// name other than the allocated one that is already held; that
    /// participant is dropped unregistered.
    pub async fn join<P, F>(&self, build: F) -> Result<Arc<P>, RegistryError>
    where
        P: Participant + 'static,
        F: FnOnce(ParticipantName) -> P,
    {
        let mut state = self.state.write().await;

        let name = {
            let mut rng = rand::thread_rng();
            self.allocator.allocate(&mut rng, |candidate| state.contains(candidate))
        };

        let participant = Arc::new(build(name.clone()));
        let handle: ParticipantHandle = Arc::clone(&participant) as ParticipantHandle;

        if let Err(e) = state.insert(handle) {
            error!(allocated = %name, error = %e, "Joining participant rejected");
            return Err(e);
        }

        info!(name = %name, participants = state.len(), "Participant joined");
        Ok(participant)
    }

    /// Registers a participant under the name it already carries.
    pub async fn register<P>(&self, participant: Arc<P>) -> Result<(), RegistryError>
    where
        P: Participant + 'static,
    {
        let name = participant.name().clone();
        let mut state = self.state.write().await;
        state.insert(participant as ParticipantHandle)?;

        info!(name = %name, participants = state.len(), "Participant registered");
        Ok(())
    }

    /// Removes the participant registered under `name`.
    ///
    /// Statistics for the name are kept.
    pub async fn remove(&self, name: &ParticipantName) -> Option<ParticipantHandle> {
        let mut state = self.state.write().await;
        let removed = state.remove(name);
        if removed.is_some() {
            info!(name = %name, participants = state.len(), "Participant removed");
        }
        removed
    }

    /// Removes `participant` if its name still maps to it.
    ///
    /// A session that was evicted and whose name has since been taken by
    /// someone else must not remove the new holder.
    pub async fn remove_if_same(&self, participant: &ParticipantHandle) -> bool {
        let name = participant.name();
        let mut state = self.state.write().await;
        let removed = state.remove_if_same(name, participant);
        if removed {
            info!(name = %name, participants = state.len(), "Participant left");
        }
        removed
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn lookup(&self, name: &ParticipantName) -> Option<ParticipantHandle> {
        self.state.read().await.lookup(name)
    }

    pub async fn contains(&self, name: &ParticipantName) -> bool {
        self.state.read().await.contains(name)
    }

    /// Names of all currently registered participants, sorted.
    pub async fn list_names(&self) -> Vec<ParticipantName> {
        self.state.read().await.sorted_names()
    }

    /// Every registered participant except `exclude`.
    pub async fn participants_except(
        &self,
        exclude: Option<&ParticipantName>,
    ) -> Vec<ParticipantHandle> {
        self.state.read().await.participants_except(exclude)
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    /// Live counters of `name`, only while it is registered.
    pub async fn sender_counters(&self, name: &ParticipantName) -> Option<Arc<StatCounters>> {
        self.state.read().await.active_counters(name)
    }

    /// Statistics for `name`, including names that have left.
    pub async fn stats_for(&self, name: &ParticipantName) -> Option<ParticipantStats> {
        self.state.read().await.stats_for(name)
    }

    /// Statistics of every name ever registered.
    pub async fn snapshot_stats(&self) -> BTreeMap<ParticipantName, ParticipantStats> {
        self.state.read().await.all_stats()
    }

    /// Statistics of currently registered participants only.
    pub async fn active_stats(&self) -> BTreeMap<ParticipantName, ParticipantStats> {
        self.state.read().await.active_stats()
    }

    // ========================================================================
    // Contention
    // ========================================================================

    /// Holds the exclusive lock for `duration`.
    pub async fn pause_for(&self, duration: Duration) {
        let _guard = self.state.write().await;
        tokio::time::sleep(duration).await;
    }
}
