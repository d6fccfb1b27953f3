//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Team membership in objective mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Team {
    /// Counter-terrorists defend the bomb sites
    #[serde(rename = "CT")]
    Ct,
    /// Terrorists carry and plant the bomb
    #[serde(rename = "T")]
    T,
}

impl Team {
    /// Name used in round result announcements
    pub fn victory_name(self) -> &'static str {
        match self {
            Team::Ct => "COUNTER-TERRORISTS",
            Team::T => "TERRORISTS",
        }
    }
}

/// Game mode for a room, fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameMode {
    /// Free-for-all deathmatch
    #[serde(rename = "ffa")]
    FreeForAll,
    /// Team bomb plant/defuse
    #[serde(rename = "ctt")]
    TeamObjective,
}

impl Default for GameMode {
    fn default() -> Self {
        Self::FreeForAll
    }
}

/// Bomb site designation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BombSite {
    A,
    B,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMsg {
    /// Request to join a room (first message of a session)
    Join {
        name: String,
        room: String,
        #[serde(default)]
        mode: GameMode,
        #[serde(default)]
        team_preference: Option<Team>,
    },

    /// Position/facing update, streamed continuously
    Update { x: f32, y: f32, z: f32, rx: f32, ry: f32 },

    /// Weapon fired; relayed to the room for visuals/audio only
    Shoot,

    /// Client-computed hit against another player
    Hit { target_id: Uuid, damage: i32 },

    /// Return to the world after death
    Respawn,

    /// Room chat; `mid` is a client-generated id used for dedup
    ChatMessage { msg: String, mid: String, ts: u64 },

    /// Plant the bomb at a site (carrier only)
    PlantBomb { site: BombSite },

    /// Defuse the planted bomb (defenders only)
    DefuseBomb,

    /// Push-to-talk started
    VoiceStart,

    /// Push-to-talk ended
    VoiceEnd,

    /// Opaque compressed audio chunk, relayed undecoded
    VoiceData { data: serde_json::Value },
}

impl ClientMsg {
    /// Volatile messages may be dropped under backpressure; the next one
    /// supersedes them anyway.
    pub fn is_volatile(&self) -> bool {
        matches!(self, ClientMsg::Update { .. } | ClientMsg::VoiceData { .. })
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMsg {
    /// Join confirmation with a snapshot of everyone in the room
    Joined {
        id: Uuid,
        players: Vec<PlayerSnapshot>,
    },

    /// Another player joined the room
    PlayerJoined {
        #[serde(flatten)]
        player: PlayerSnapshot,
    },

    /// A player disconnected or was kicked
    PlayerLeft { id: Uuid },

    /// Position update from another player (volatile)
    PlayerUpdate { id: Uuid, x: f32, y: f32, z: f32, rx: f32, ry: f32 },

    /// Another player fired their weapon
    RemoteShoot { id: Uuid },

    /// Damage applied; `hp` is the post-hit value, clamped at 0
    PlayerDamaged { id: Uuid, hp: i32, attacker_id: Uuid },

    /// A player's hp reached 0; carries the updated counters
    PlayerDied {
        id: Uuid,
        attacker_id: Uuid,
        kills: u32,
        deaths: u32,
    },

    /// A dead player returned at their spawn point
    PlayerRespawn { id: Uuid, x: f32, y: f32, z: f32 },

    /// Full kill/death table, refreshed after every death
    ScoreboardUpdate { players: Vec<ScoreEntry> },

    /// Chat relay; server-authored messages use a nil id and name "SERVER"
    ChatMessage {
        id: Uuid,
        name: String,
        msg: String,
        mid: String,
        ts: u64,
    },

    /// Team decided at join time (objective mode only)
    TeamAssignment {
        id: Uuid,
        team: Team,
        is_carrier: bool,
        mode: GameMode,
    },

    /// Bomb handed to a new carrier (None while no attacker is connected)
    BombCarrier { id: Option<Uuid> },

    /// Bomb planted; clients derive the countdown from `explode_time`
    BombPlanted {
        site: BombSite,
        planted_at: u64,
        explode_time: u64,
    },

    /// Bomb defused before the fuse ran out
    BombDefused { message: String },

    /// Round resolved; a fresh bomb goes to `carrier_id`
    RoundResult {
        winner: String,
        message: String,
        carrier_id: Option<Uuid>,
    },

    /// A player started talking
    VoiceStart { id: Uuid },

    /// A player stopped talking
    VoiceEnd { id: Uuid },

    /// Relayed audio chunk (volatile)
    VoiceData { id: Uuid, data: serde_json::Value },

    /// Operational error surfaced to the client
    ErrorMsg { message: String },
}

impl ServerMsg {
    pub fn is_volatile(&self) -> bool {
        matches!(self, ServerMsg::PlayerUpdate { .. } | ServerMsg::VoiceData { .. })
    }
}

/// Full player state as seen by clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub id: Uuid,
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub rx: f32,
    pub ry: f32,
    pub hp: i32,
    pub is_dead: bool,
    pub kills: u32,
    pub deaths: u32,
    pub team: Option<Team>,
}

/// One scoreboard row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreEntry {
    pub id: Uuid,
    pub name: String,
    pub kills: u32,
    pub deaths: u32,
    pub team: Option<Team>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_accepts_camel_case_fields() {
        let raw = r#"{"type":"join","name":"Ana","room":"r1","mode":"ctt","teamPreference":"T"}"#;
        let msg: ClientMsg = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMsg::Join {
                name,
                room,
                mode,
                team_preference,
            } => {
                assert_eq!(name, "Ana");
                assert_eq!(room, "r1");
                assert_eq!(mode, GameMode::TeamObjective);
                assert_eq!(team_preference, Some(Team::T));
            }
            other => panic!("parsed wrong variant: {:?}", other),
        }
    }

    #[test]
    fn join_defaults_mode_and_preference() {
        let raw = r#"{"type":"join","name":"Ana","room":"r1"}"#;
        let msg: ClientMsg = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMsg::Join {
                mode,
                team_preference,
                ..
            } => {
                assert_eq!(mode, GameMode::FreeForAll);
                assert_eq!(team_preference, None);
            }
            other => panic!("parsed wrong variant: {:?}", other),
        }
    }

    #[test]
    fn bomb_planted_wire_shape() {
        let msg = ServerMsg::BombPlanted {
            site: BombSite::A,
            planted_at: 1_000,
            explode_time: 41_000,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "bomb_planted");
        assert_eq!(value["site"], "A");
        assert_eq!(value["plantedAt"], 1_000);
        assert_eq!(value["explodeTime"], 41_000);
    }

    #[test]
    fn hit_accepts_camel_case_target() {
        let id = Uuid::new_v4();
        let raw = format!(r#"{{"type":"hit","targetId":"{}","damage":60}}"#, id);
        let msg: ClientMsg = serde_json::from_str(&raw).unwrap();
        match msg {
            ClientMsg::Hit { target_id, damage } => {
                assert_eq!(target_id, id);
                assert_eq!(damage, 60);
            }
            other => panic!("parsed wrong variant: {:?}", other),
        }
    }
}
