//! Liveness bot: a synthetic client that keeps a designated room occupied
//!
//! Speaks the same event protocol as a WebSocket session, flagged as a bot so
//! it never counts against room capacity and is never idle-kicked. It walks a
//! circular patrol path to look alive to spectators and reconnects whenever
//! the room goes away.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::{interval, sleep};
use tracing::{info, warn};
use uuid::Uuid;

use crate::game::room::RoomRegistry;
use crate::game::{RoomEvent, SessionTx};
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, GameMode};

/// Cadence of the synthetic position updates
const STEP_INTERVAL: Duration = Duration::from_millis(500);
/// Delay before rejoining after the room went away
const RECONNECT_DELAY: Duration = Duration::from_secs(3);
/// Radius of the patrol circle
const PATROL_RADIUS: f32 = 8.0;
/// Angle advanced per step
const STEP_ANGLE: f32 = 0.1;

pub struct LivenessBot {
    registry: Arc<RoomRegistry>,
    room_id: String,
}

impl LivenessBot {
    pub fn new(registry: Arc<RoomRegistry>, room_id: String) -> Self {
        Self { registry, room_id }
    }

    pub async fn run(self) {
        loop {
            if let Err(reason) = self.patrol().await {
                warn!(room_id = %self.room_id, reason, "Liveness bot disconnected, reconnecting");
            }
            sleep(RECONNECT_DELAY).await;
        }
    }

    /// One connection lifetime: join, then walk circles until the room drops
    async fn patrol(&self) -> Result<(), &'static str> {
        let conn_id = Uuid::new_v4();
        let handle = self.registry.get_or_create(&self.room_id, GameMode::FreeForAll);

        let (tx, mut rx) = SessionTx::channel();
        // The bot has no use for anything the room tells it
        tokio::spawn(async move { while rx.recv().await.is_some() {} });

        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .event_tx
            .send(RoomEvent::Join {
                conn_id,
                name: "bot".to_string(),
                team_preference: None,
                is_bot: true,
                tx,
                reply: reply_tx,
            })
            .await
            .map_err(|_| "room mailbox closed")?;

        match reply_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(_)) | Err(_) => return Err("join refused"),
        }

        info!(room_id = %self.room_id, conn_id = %conn_id, "Liveness bot joined");

        let mut angle: f32 = 0.0;
        let mut tick = interval(STEP_INTERVAL);
        loop {
            tick.tick().await;
            angle += STEP_ANGLE;
            let update = ClientMsg::Update {
                x: PATROL_RADIUS * angle.cos(),
                y: 10.0,
                z: PATROL_RADIUS * angle.sin(),
                rx: 0.0,
                ry: angle + std::f32::consts::FRAC_PI_2,
            };
            let event = RoomEvent::Client {
                conn_id,
                msg: update,
                received_at: unix_millis(),
            };
            if handle.event_tx.send(event).await.is_err() {
                return Err("room closed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test(start_paused = true)]
    async fn bot_populates_its_room() {
        let config = Config {
            server_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "info".into(),
            client_origin: "*".into(),
            room_capacity: 5,
            idle_warn: Duration::from_secs(110),
            idle_kick: Duration::from_secs(120),
            bomb_fuse: Duration::from_secs(40),
            bot_room: Some("plaza".into()),
        };
        let registry = RoomRegistry::new(Arc::new(config));

        let bot = LivenessBot::new(registry.clone(), "plaza".to_string());
        tokio::spawn(bot.run());

        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let populated = registry
                .handles()
                .iter()
                .any(|h| h.id == "plaza" && h.player_count() == 1);
            if populated {
                return;
            }
        }
        panic!("bot never joined its room");
    }
}
