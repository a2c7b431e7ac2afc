//! Display-name allocation for joining participants.
//!
//! Candidates are drawn at random from a themed pool. After a bounded
//! number of draws the allocator switches to synthetic names made of a
//! fixed prefix and a random number. The caller supplies the "taken"
//! predicate and must run the allocation inside the same exclusive
//! section that reserves the result.

use rand::seq::SliceRandom;
use rand::Rng;

use trek_core::ParticipantName;

use crate::config::NamingConfig;

/// Default themed pool.
pub const DEFAULT_POOL: &[&str] = &[
    "picard", "worf", "data", "barclay", "troi", "lwaxana", "q", "crusher", "wesley", "obrien",
    "laforge", "riker", "borg",
];

/// Default number of pool draws before falling back to synthetic names.
pub const DEFAULT_POOL_ATTEMPTS: usize = 100;

/// Default synthetic name prefix.
pub const DEFAULT_SYNTHETIC_PREFIX: &str = "cadet#";

/// Default exclusive upper bound of the random synthetic suffix.
pub const DEFAULT_SYNTHETIC_RANGE: u32 = 10_000;

/// Picks unique display names.
#[derive(Debug, Clone)]
pub struct NameAllocator {
    pool: Vec<ParticipantName>,
    attempts: usize,
    synthetic_prefix: String,
    synthetic_range: u32,
}

impl Default for NameAllocator {
    fn default() -> Self {
        Self::new(
            DEFAULT_POOL.iter().map(|n| ParticipantName::new(*n)).collect(),
            DEFAULT_POOL_ATTEMPTS,
            DEFAULT_SYNTHETIC_PREFIX,
            DEFAULT_SYNTHETIC_RANGE,
        )
    }
}

impl NameAllocator {
    pub fn new(
        pool: Vec<ParticipantName>,
        attempts: usize,
        synthetic_prefix: impl Into<String>,
        synthetic_range: u32,
    ) -> Self {
        Self {
            pool,
            attempts,
            synthetic_prefix: synthetic_prefix.into(),
            synthetic_range: synthetic_range.max(1),
        }
    }

    pub fn from_config(config: &NamingConfig) -> Self {
        Self::new(
            config.pool.iter().map(|n| ParticipantName::new(n.as_str())).collect(),
            config.attempts,
            config.synthetic_prefix.as_str(),
            config.synthetic_range,
        )
    }

    /// Returns a name for which `is_taken` is false.
    ///
    /// Tries up to `attempts` random pool entries, then as many random
    /// synthetic names as the synthetic range holds. If all of those
    /// collide, synthetic suffixes continue past the range one by one,
    /// so the call always terminates.
    pub fn allocate<R, F>(&self, rng: &mut R, is_taken: F) -> ParticipantName
    where
        R: Rng,
        F: Fn(&ParticipantName) -> bool,
    {
        if !self.pool.is_empty() {
            for _ in 0..self.attempts {
                if let Some(candidate) = self.pool.choose(rng) {
                    if !is_taken(candidate) {
                        return candidate.clone();
                    }
                }
            }
        }

        for _ in 0..self.synthetic_range {
            let candidate = self.synthetic(u64::from(rng.gen_range(0..self.synthetic_range)));
            if !is_taken(&candidate) {
                return candidate;
            }
        }

        let mut suffix = u64::from(self.synthetic_range);
        loop {
            let candidate = self.synthetic(suffix);
            if !is_taken(&candidate) {
                return candidate;
            }
            suffix += 1;
        }
    }

    /// Returns true if `name` could have been produced by the fallback.
    pub fn is_synthetic(&self, name: &ParticipantName) -> bool {
        name.has_prefix(&self.synthetic_prefix)
    }

    fn synthetic(&self, suffix: u64) -> ParticipantName {
        ParticipantName::new(format!("{}{}", self.synthetic_prefix, suffix))
    }
}
