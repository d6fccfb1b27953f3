//! Periodic idle sweep over all rooms
//!
//! The reaper only stamps the wall clock and posts a sweep event into each
//! room's mailbox; thresholds and eviction happen inside the room so its
//! state is never touched from outside the actor.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::debug;

use crate::game::room::RoomRegistry;
use crate::game::RoomEvent;
use crate::util::time::unix_millis;

/// Sweep cadence; warn/kick thresholds live in Config
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

pub struct IdleReaper {
    registry: Arc<RoomRegistry>,
}

impl IdleReaper {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self { registry }
    }

    pub async fn run(self) {
        let mut tick = interval(SWEEP_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tick.tick().await;
            let now = unix_millis();
            for handle in self.registry.handles() {
                // A full or closed mailbox just means this room skips a tick
                if handle.event_tx.try_send(RoomEvent::SweepIdle { now }).is_err() {
                    debug!(room_id = %handle.id, "Skipped idle sweep");
                }
            }
        }
    }
}
