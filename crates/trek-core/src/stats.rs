//! Per-participant delivery statistics.

use serde::{Deserialize, Serialize};

/// Counters kept for every name that has ever joined.
///
/// Stats outlive the participant: they are retained after a leave or an
/// eviction and keep accumulating when the same name joins again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantStats {
    /// Broadcast messages sent by this participant
    pub broadcast_count: u64,

    /// Private messages sent by this participant (attempts, not deliveries)
    pub private_count: u64,

    /// Number of times this name has joined
    pub connection_count: u64,
}

impl ParticipantStats {
    /// Stats for a name that has just joined for the first time.
    pub fn first_join() -> Self {
        Self {
            connection_count: 1,
            ..Self::default()
        }
    }

    /// Total messages sent, broadcast and private.
    pub fn messages_sent(&self) -> u64 {
        self.broadcast_count + self.private_count
    }
}

/// Aggregate view of the chat room for the inspection surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    /// Participants currently joined
    pub participants: usize,

    /// Broadcast messages sent since process start
    pub broadcast_total: u64,

    /// Private messages sent since process start
    pub private_total: u64,
}

impl StatusSummary {
    /// Builds a summary from the current participant count and every
    /// stats entry recorded so far.
    pub fn from_stats<'a>(
        participants: usize,
        stats: impl IntoIterator<Item = &'a ParticipantStats>,
    ) -> Self {
        stats
            .into_iter()
            .fold(Self { participants, ..Self::default() }, |mut acc, s| {
                acc.broadcast_total += s.broadcast_count;
                acc.private_total += s.private_count;
                acc
            })
    }
}
