//! Autonomous participants.
//!
//! Bots have no connection. They register under a fixed name, ignore
//! everything delivered to them and post through [`Router::dispatch`]
//! like any other sender. A bot's loop ends when the router reports a
//! terminal error (the bot was evicted), when it is closed, or on
//! shutdown. Bots are never re-registered.

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use trek_core::{ChatMessage, ParticipantKind, ParticipantName};
use trek_protocol::ServerMessage;

use super::{DeliveryError, Participant};
use crate::config::BotConfig;
use crate::flavor::{Enhancer, ScriptedFlavor};
use crate::router::Router;

// ============================================================================
// Scripted Bot
// ============================================================================

/// Timing for scripted bots.
#[derive(Debug, Clone)]
pub struct BotSchedule {
    /// Range the delay between two posts is drawn from
    pub interval: RangeInclusive<Duration>,
}

impl BotSchedule {
    fn next_delay(&self) -> Duration {
        let (min, max) = (*self.interval.start(), *self.interval.end());
        if max <= min {
            return min;
        }
        rand::thread_rng().gen_range(min..=max)
    }
}

/// Bot that posts scripted broadcast lines on a randomized timer.
pub struct ScriptedBot {
    name: ParticipantName,
    closed: CancellationToken,
}

impl ScriptedBot {
    pub fn new(name: ParticipantName) -> Self {
        Self {
            name,
            closed: CancellationToken::new(),
        }
    }

    /// Runs the posting loop until eviction or shutdown.
    pub async fn run(
        self: Arc<Self>,
        router: Router,
        schedule: BotSchedule,
        enhancer: Arc<dyn Enhancer>,
        shutdown: CancellationToken,
    ) {
        let mut enhance_count = 0usize;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.closed.cancelled() => break,
                _ = sleep(schedule.next_delay()) => {}
            }

            let mut message = ChatMessage::default();
            if enhancer.enhance(&self.name, &mut message, enhance_count) {
                enhance_count += 1;
            }
            if message.message.is_empty() {
                debug!(name = %self.name, "Nothing scripted, skipping post");
                continue;
            }

            match router.dispatch(&self.name, message).await {
                Ok(_) => debug!(name = %self.name, "Bot posted"),
                Err(e) if e.is_terminal() => {
                    info!(name = %self.name, error = %e, "Bot stopping");
                    break;
                }
                Err(e) => warn!(name = %self.name, error = %e, "Bot post failed"),
            }
        }

        debug!(name = %self.name, "Bot loop ended");
    }
}

#[async_trait]
impl Participant for ScriptedBot {
    fn name(&self) -> &ParticipantName {
        &self.name
    }

    fn kind(&self) -> ParticipantKind {
        ParticipantKind::Bot
    }

    async fn deliver(&self, _message: &ServerMessage) -> Result<(), DeliveryError> {
        Ok(())
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

// ============================================================================
// Stall Bot
// ============================================================================

/// Timing for the stall bot.
#[derive(Debug, Clone)]
pub struct StallSchedule {
    /// Iterations between two stalls (the first iteration always stalls)
    pub stall_every: u64,

    /// How long each stall holds the registry
    pub stall_for: Duration,

    /// Delay between two self-addressed messages
    pub send_interval: Duration,
}

/// Adversarial bot that periodically freezes the whole registry.
///
/// Between stalls it keeps sending private messages to itself, which
/// exercises the private dispatch path under contention.
pub struct StallBot {
    name: ParticipantName,
    closed: CancellationToken,
}

impl StallBot {
    pub fn new(name: ParticipantName) -> Self {
        Self {
            name,
            closed: CancellationToken::new(),
        }
    }

    /// Runs the stall loop until a dispatch fails, eviction or shutdown.
    pub async fn run(self: Arc<Self>, router: Router, schedule: StallSchedule, shutdown: CancellationToken) {
        let stall_every = schedule.stall_every.max(1);
        let mut iteration: u64 = 0;

        loop {
            if iteration % stall_every == 0 {
                debug!(name = %self.name, duration = ?schedule.stall_for, "Stalling registry");
                router.pause_registry(schedule.stall_for).await;
            }
            iteration = iteration.wrapping_add(1);

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.closed.cancelled() => break,
                _ = sleep(schedule.send_interval) => {}
            }

            let message = ChatMessage::private_to(self.name.clone(), "");
            if let Err(e) = router.dispatch(&self.name, message).await {
                info!(name = %self.name, error = %e, "Stall bot stopping");
                break;
            }
        }
    }
}

#[async_trait]
impl Participant for StallBot {
    fn name(&self) -> &ParticipantName {
        &self.name
    }

    fn kind(&self) -> ParticipantKind {
        ParticipantKind::Stall
    }

    async fn deliver(&self, _message: &ServerMessage) -> Result<(), DeliveryError> {
        Ok(())
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

// ============================================================================
// Spawning
// ============================================================================

/// Registers the configured bots and spawns their loops.
///
/// Bots whose name is already taken are skipped with a warning.
pub async fn spawn_bots(
    router: &Router,
    config: &BotConfig,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    let enhancer: Arc<dyn Enhancer> = Arc::new(ScriptedFlavor::star_trek());
    let schedule = BotSchedule {
        interval: config.min_interval()..=config.max_interval(),
    };

    for name in &config.names {
        let bot = Arc::new(ScriptedBot::new(ParticipantName::new(name.as_str())));
        if let Err(e) = router.register(Arc::clone(&bot)).await {
            warn!(name = %name, error = %e, "Skipping bot");
            continue;
        }

        handles.push(tokio::spawn(bot.run(
            router.clone(),
            schedule.clone(),
            Arc::clone(&enhancer),
            shutdown.clone(),
        )));
    }

    if config.stall.enabled {
        let bot = Arc::new(StallBot::new(ParticipantName::new(config.stall.name.as_str())));
        match router.register(Arc::clone(&bot)).await {
            Ok(()) => {
                let schedule = StallSchedule {
                    stall_every: config.stall.every,
                    stall_for: Duration::from_millis(config.stall.pause_ms),
                    send_interval: Duration::from_millis(config.stall.send_interval_ms),
                };
                handles.push(tokio::spawn(bot.run(router.clone(), schedule, shutdown)));
            }
            Err(e) => warn!(name = %config.stall.name, error = %e, "Skipping stall bot"),
        }
    }

    info!(bots = handles.len(), "Bots started");
    handles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::NameAllocator;
    use crate::registry::Registry;

    fn test_router() -> Router {
        Router::new(Registry::new(NameAllocator::default()))
    }

    #[test]
    fn test_schedule_delay_within_range() {
        let schedule = BotSchedule {
            interval: Duration::from_millis(10)..=Duration::from_millis(20),
        };
        for _ in 0..100 {
            let d = schedule.next_delay();
            assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(20));
        }
    }

    #[test]
    fn test_schedule_degenerate_range() {
        let schedule = BotSchedule {
            interval: Duration::from_millis(30)..=Duration::from_millis(5),
        };
        assert_eq!(schedule.next_delay(), Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_scripted_bot_posts_and_counts_broadcasts() {
        let router = test_router();
        let bot = Arc::new(ScriptedBot::new(ParticipantName::new("data")));
        router.register(Arc::clone(&bot)).await.unwrap();

        let shutdown = CancellationToken::new();
        let schedule = BotSchedule {
            interval: Duration::from_millis(1)..=Duration::from_millis(2),
        };
        let task = tokio::spawn(Arc::clone(&bot).run(
            router.clone(),
            schedule,
            Arc::new(ScriptedFlavor::star_trek()),
            shutdown.clone(),
        ));

        sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        task.await.unwrap();

        let stats = router
            .registry()
            .stats_for(&ParticipantName::new("data"))
            .await
            .unwrap();
        assert!(stats.broadcast_count > 0);
        assert_eq!(stats.private_count, 0);
    }

    #[tokio::test]
    async fn test_scripted_bot_stops_after_eviction() {
        let router = test_router();
        let bot = Arc::new(ScriptedBot::new(ParticipantName::new("worf")));
        router.register(Arc::clone(&bot)).await.unwrap();

        let schedule = BotSchedule {
            interval: Duration::from_millis(1)..=Duration::from_millis(1),
        };
        let task = tokio::spawn(Arc::clone(&bot).run(
            router.clone(),
            schedule,
            Arc::new(ScriptedFlavor::star_trek()),
            CancellationToken::new(),
        ));

        assert!(router.evict(&ParticipantName::new("worf")).await.is_some());

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("bot loop should end after eviction")
            .unwrap();
        assert!(router.registry().lookup(&ParticipantName::new("worf")).await.is_none());
    }

    #[tokio::test]
    async fn test_stall_bot_messages_itself() {
        let router = test_router();
        let bot = Arc::new(StallBot::new(ParticipantName::new("not_romulan")));
        router.register(Arc::clone(&bot)).await.unwrap();

        let shutdown = CancellationToken::new();
        let schedule = StallSchedule {
            stall_every: 1_000,
            stall_for: Duration::from_millis(5),
            send_interval: Duration::from_millis(1),
        };
        let task = tokio::spawn(Arc::clone(&bot).run(router.clone(), schedule, shutdown.clone()));

        sleep(Duration::from_millis(60)).await;
        shutdown.cancel();
        task.await.unwrap();

        let stats = router
            .registry()
            .stats_for(&ParticipantName::new("not_romulan"))
            .await
            .unwrap();
        assert!(stats.private_count > 0);
        assert_eq!(stats.broadcast_count, 0);
    }
}
