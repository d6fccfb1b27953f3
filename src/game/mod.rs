//! Authoritative room logic

pub mod bomb;
pub mod bot;
pub mod player;
pub mod reaper;
pub mod room;

pub use player::PlayerState;
pub use room::{RoomHandle, RoomRegistry};

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::ws::protocol::{ClientMsg, ServerMsg, Team};

/// Capacity of a session's outbound queue. A client this far behind is
/// considered dead for reliable traffic.
pub const OUTBOUND_BUFFER: usize = 256;

/// Sender half of a session's outbound queue, held by the room
#[derive(Debug, Clone)]
pub struct SessionTx {
    tx: mpsc::Sender<ServerMsg>,
}

impl SessionTx {
    pub fn channel() -> (SessionTx, mpsc::Receiver<ServerMsg>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        (SessionTx { tx }, rx)
    }

    /// Enqueue a reliable message. Returns false when the session is gone or
    /// hopelessly backed up; the caller should drop the player.
    pub fn send(&self, msg: ServerMsg) -> bool {
        self.tx.try_send(msg).is_ok()
    }

    /// Enqueue a volatile message; dropped silently under backpressure since
    /// the next one supersedes it.
    pub fn send_volatile(&self, msg: ServerMsg) {
        let _ = self.tx.try_send(msg);
    }
}

/// Events delivered to a room's mailbox
pub enum RoomEvent {
    /// A session (or the liveness bot) asks to join. The reply resolves
    /// synchronously so a rejected session can keep its connection.
    Join {
        conn_id: Uuid,
        name: String,
        team_preference: Option<Team>,
        is_bot: bool,
        tx: SessionTx,
        reply: oneshot::Sender<Result<(), JoinError>>,
    },

    /// A protocol message from a joined session
    Client {
        conn_id: Uuid,
        msg: ClientMsg,
        received_at: u64,
    },

    /// Transport-level disconnect
    Leave { conn_id: Uuid },

    /// Idle reaper tick; `now` is stamped by the reaper
    SweepIdle { now: u64 },

    /// A planted fuse ran out. Stale rounds are ignored.
    FuseExpired { round: u64 },
}

/// Why a join was refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("Room is full (Max {capacity})")]
    RoomFull { capacity: usize },

    /// The room shut down while the join was in flight
    #[error("Room is unavailable, try again")]
    Closed,
}
