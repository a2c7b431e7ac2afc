//! Registry state - the mappings guarded by the registry lock.
//!
//! Everything here is synchronous. The async [`Registry`](super::Registry)
//! wraps `RegistryState` in one reader-writer lock and never exposes the
//! maps themselves.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;

use trek_core::{ParticipantName, ParticipantStats};

use crate::participant::{same_participant, ParticipantHandle};

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The display name is held by another registered participant.
    #[error("name already taken: {0}")]
    NameTaken(ParticipantName),
}

/// Live counters for one name.
///
/// Incremented under the shared lock; only insertion of a new entry
/// needs the exclusive lock.
#[derive(Debug, Default)]
pub struct StatCounters {
    broadcast_count: AtomicU64,
    private_count: AtomicU64,
    connection_count: AtomicU64,
}

impl StatCounters {
    pub fn record_broadcast(&self) {
        self.broadcast_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_private(&self) {
        self.private_count.fetch_add(1, Ordering::Relaxed);
    }

    fn record_connection(&self) {
        self.connection_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of the counters.
    pub fn snapshot(&self) -> ParticipantStats {
        ParticipantStats {
            broadcast_count: self.broadcast_count.load(Ordering::Relaxed),
            private_count: self.private_count.load(Ordering::Relaxed),
            connection_count: self.connection_count.load(Ordering::Relaxed),
        }
    }
}

/// The two registry mappings.
#[derive(Default)]
pub(super) struct RegistryState {
    /// Currently reachable participants
    participants: HashMap<ParticipantName, ParticipantHandle>,

    /// Counters per name, kept after the participant leaves
    stats: HashMap<ParticipantName, Arc<StatCounters>>,
}

impl RegistryState {
    pub(super) fn contains(&self, name: &ParticipantName) -> bool {
        self.participants.contains_key(name)
    }

    /// Inserts a participant under its own name.
    pub(super) fn insert(&mut self, participant: ParticipantHandle) -> Result<(), RegistryError> {
        let name = participant.name().clone();
        if self.participants.contains_key(&name) {
            return Err(RegistryError::NameTaken(name));
        }

        self.stats
            .entry(name.clone())
            .or_default()
            .record_connection();
        self.participants.insert(name, participant);
        Ok(())
    }

    pub(super) fn remove(&mut self, name: &ParticipantName) -> Option<ParticipantHandle> {
        self.participants.remove(name)
    }

    /// Removes `name` only while it still maps to `participant`.
    pub(super) fn remove_if_same(
        &mut self,
        name: &ParticipantName,
        participant: &ParticipantHandle,
    ) -> bool {
        match self.participants.get(name) {
            Some(current) if same_participant(current, participant) => {
                self.participants.remove(name);
                true
            }
            _ => false,
        }
    }

    pub(super) fn lookup(&self, name: &ParticipantName) -> Option<ParticipantHandle> {
        self.participants.get(name).cloned()
    }

    pub(super) fn len(&self) -> usize {
        self.participants.len()
    }

    pub(super) fn sorted_names(&self) -> Vec<ParticipantName> {
        let mut names: Vec<ParticipantName> = self.participants.keys().cloned().collect();
        names.sort();
        names
    }

    pub(super) fn participants_except(
        &self,
        exclude: Option<&ParticipantName>,
    ) -> Vec<ParticipantHandle> {
        self.participants
            .iter()
            .filter(|(name, _)| Some(*name) != exclude)
            .map(|(_, p)| Arc::clone(p))
            .collect()
    }

    /// Counters of a participant that is currently registered.
    pub(super) fn active_counters(&self, name: &ParticipantName) -> Option<Arc<StatCounters>> {
        if !self.participants.contains_key(name) {
            return None;
        }
        self.stats.get(name).cloned()
    }

    pub(super) fn stats_for(&self, name: &ParticipantName) -> Option<ParticipantStats> {
        self.stats.get(name).map(|c| c.snapshot())
    }

    pub(super) fn all_stats(&self) -> BTreeMap<ParticipantName, ParticipantStats> {
        self.stats
            .iter()
            .map(|(name, c)| (name.clone(), c.snapshot()))
            .collect()
    }

    pub(super) fn active_stats(&self) -> BTreeMap<ParticipantName, ParticipantStats> {
        self.participants
            .keys()
            .filter_map(|name| self.stats_for(name).map(|s| (name.clone(), s)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::participant::ScriptedBot;

    fn bot(name: &str) -> ParticipantHandle {
        Arc::new(ScriptedBot::new(ParticipantName::new(name)))
    }

    #[test]
    fn test_insert_rejects_duplicate_name() {
        let mut state = RegistryState::default();
        state.insert(bot("data")).unwrap();

        let err = state.insert(bot("data")).unwrap_err();
        assert_eq!(err, RegistryError::NameTaken(ParticipantName::new("data")));
        assert_eq!(state.len(), 1);
        // The rejected insert must not count as a connection.
        assert_eq!(
            state.stats_for(&ParticipantName::new("data")).unwrap().connection_count,
            1
        );
    }

    #[test]
    fn test_stats_survive_removal_and_accumulate() {
        let mut state = RegistryState::default();
        let name = ParticipantName::new("riker");

        state.insert(bot("riker")).unwrap();
        state.active_counters(&name).unwrap().record_broadcast();
        assert!(state.remove(&name).is_some());

        assert!(state.active_counters(&name).is_none());
        assert_eq!(state.stats_for(&name).unwrap().broadcast_count, 1);

        state.insert(bot("riker")).unwrap();
        let stats = state.stats_for(&name).unwrap();
        assert_eq!(stats.connection_count, 2);
        assert_eq!(stats.broadcast_count, 1);
    }

    #[test]
    fn test_remove_if_same_ignores_newer_holder() {
        let mut state = RegistryState::default();
        let name = ParticipantName::new("q");

        let first = bot("q");
        state.insert(Arc::clone(&first)).unwrap();
        state.remove(&name);

        let second = bot("q");
        state.insert(Arc::clone(&second)).unwrap();

        assert!(!state.remove_if_same(&name, &first));
        assert!(state.contains(&name));
        assert!(state.remove_if_same(&name, &second));
        assert!(!state.contains(&name));
    }

    #[test]
    fn test_participants_except() {
        let mut state = RegistryState::default();
        for name in ["data", "troi", "worf"] {
            state.insert(bot(name)).unwrap();
        }

        let others = state.participants_except(Some(&ParticipantName::new("troi")));
        let mut names: Vec<&str> = others.iter().map(|p| p.name().as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["data", "worf"]);

        assert_eq!(state.participants_except(None).len(), 3);
    }

    #[test]
    fn test_active_stats_only_lists_joined() {
        let mut state = RegistryState::default();
        state.insert(bot("data")).unwrap();
        state.insert(bot("lwaxana")).unwrap();
        state.remove(&ParticipantName::new("lwaxana"));

        let active = state.active_stats();
        assert_eq!(active.len(), 1);
        assert!(active.contains_key(&ParticipantName::new("data")));
        assert_eq!(state.all_stats().len(), 2);
    }
}
