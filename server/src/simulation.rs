//! Fixed-step tiger simulation.
//!
//! The loop wakes every poll interval, but the world only advances once a
//! full step of wall time has accumulated, and then by exactly one step.

use crate::context::ServerContext;
use crate::session_manager::Audience;
use crate::tiger::TigerEvent;
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, Instant, MissedTickBehavior};

/// Ticks between periodic statistics lines.
const STATS_INTERVAL: u64 = 100;

#[derive(Debug)]
pub struct TickClock {
    step: Duration,
    accumulated: Duration,
    last: Instant,
}

impl TickClock {
    pub fn new(step: Duration, now: Instant) -> Self {
        Self {
            step,
            accumulated: Duration::ZERO,
            last: now,
        }
    }

    /// Adds the time since the previous call. Returns true when a step is
    /// due; the accumulator then restarts from zero, so a late wake-up
    /// still yields a single step.
    pub fn advance(&mut self, now: Instant) -> bool {
        self.accumulated += now.saturating_duration_since(self.last);
        self.last = now;

        if self.accumulated >= self.step {
            self.accumulated = Duration::ZERO;
            true
        } else {
            false
        }
    }

    pub fn step_secs(&self) -> f32 {
        self.step.as_secs_f32()
    }
}

/// Runs one simulation step and broadcasts every tiger's state to the roster.
/// Returns the number of ready players the update went to.
pub async fn run_tick(ctx: &ServerContext, dt: f32) -> usize {
    let (players, ready) = {
        let sessions = ctx.sessions.read().await;
        (sessions.player_positions(), sessions.ready_count())
    };

    let (events, updates) = {
        let mut world = ctx.world.write().await;
        let events = world.step(&players, dt);
        let updates = if ready > 0 {
            world.tiger_update_packets()
        } else {
            Vec::new()
        };
        (events, updates)
    };

    for event in events {
        match event {
            TigerEvent::AttackFired { tiger_id, target } => {
                debug!(
                    "Tiger {} attacks at ({:.1}, {:.1})",
                    tiger_id, target.x, target.z
                );
            }
        }
    }

    if ready > 0 {
        ctx.broadcast_all(&updates, Audience::Roster).await;
    }
    ready
}

/// Drives [`run_tick`] until `shutdown` flips to true.
pub async fn run_simulation(ctx: Arc<ServerContext>, mut shutdown: watch::Receiver<bool>) {
    let mut poll = interval(ctx.config.poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut clock = TickClock::new(ctx.config.tick_step, Instant::now());
    let dt = clock.step_secs();
    let mut ticks: u64 = 0;
    let mut busiest = Duration::ZERO;

    info!("Simulation running at {:.0}ms steps", dt * 1000.0);

    loop {
        tokio::select! {
            _ = poll.tick() => {
                if !clock.advance(Instant::now()) {
                    continue;
                }

                let started = Instant::now();
                let ready = run_tick(&ctx, dt).await;
                busiest = busiest.max(started.elapsed());
                ticks += 1;

                if ticks % STATS_INTERVAL == 0 {
                    debug!(
                        "Tick {}: {} ready players, slowest tick {:?}",
                        ticks, ready, busiest
                    );
                    busiest = Duration::ZERO;
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    debug!("Simulation stopped after {} ticks", ticks);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::world::World;
    use assert_approx_eq::assert_approx_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use shared::{Packet, Username};
    use tokio::sync::{mpsc, Notify};

    #[test]
    fn test_clock_waits_for_full_step() {
        let start = Instant::now();
        let mut clock = TickClock::new(Duration::from_millis(50), start);

        assert!(!clock.advance(start + Duration::from_millis(10)));
        assert!(!clock.advance(start + Duration::from_millis(40)));
        assert!(clock.advance(start + Duration::from_millis(50)));
        assert!(!clock.advance(start + Duration::from_millis(60)));
    }

    #[test]
    fn test_clock_late_wakeup_yields_one_step() {
        let start = Instant::now();
        let mut clock = TickClock::new(Duration::from_millis(50), start);

        assert!(clock.advance(start + Duration::from_millis(175)));
        assert!(!clock.advance(start + Duration::from_millis(180)));
        assert_approx_eq!(clock.step_secs(), 0.05);
    }

    fn context() -> ServerContext {
        let (tx, _rx) = mpsc::unbounded_channel();
        let world = World::seeded(0, StdRng::seed_from_u64(5));
        ServerContext::new(ServerConfig::default(), world, tx)
    }

    #[tokio::test]
    async fn test_tick_without_ready_players_sends_nothing() {
        let ctx = context();
        assert_eq!(run_tick(&ctx, 0.05).await, 0);
        assert_eq!(ctx.world.read().await.tick(), 1);
    }

    #[tokio::test]
    async fn test_tick_broadcasts_one_update_per_tiger() {
        let ctx = context();
        let (tx, mut rx) = mpsc::channel(64);
        {
            let mut sessions = ctx.sessions.write().await;
            let id = sessions
                .add_session("127.0.0.1:9000".parse().unwrap(), tx, Arc::new(Notify::new()))
                .unwrap();
            sessions.begin_login(id, &Username::new("alice")).unwrap();
            sessions.mark_ready(id).unwrap();
        }

        assert_eq!(run_tick(&ctx, 0.05).await, 1);

        let mut updates = 0;
        while let Ok(frame) = rx.try_recv() {
            assert!(matches!(Packet::decode(&frame).unwrap(), Packet::TigerUpdate(_)));
            updates += 1;
        }
        assert_eq!(updates, 16);
    }

    #[tokio::test]
    async fn test_simulation_stops_on_shutdown() {
        let ctx = Arc::new(context());
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(run_simulation(Arc::clone(&ctx), rx));

        tokio::time::sleep(Duration::from_millis(120)).await;
        tx.send_replace(true);

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(ctx.world.read().await.tick() >= 1);
    }
}
