//! Authoritative per-player state

use uuid::Uuid;

use crate::ws::protocol::{PlayerSnapshot, ScoreEntry, Team};

/// Full health on spawn and respawn
pub const MAX_HP: i32 = 100;

/// Minimum position delta that counts as real movement. Anything below is
/// treated as noise and does not refresh the idle timer.
const MOVE_EPSILON: f32 = 0.05;
/// Same threshold for facing, in radians
const TURN_EPSILON: f32 = 0.01;

/// Player state in a room (authoritative)
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub id: Uuid,
    pub name: String,

    // Last known transform, overwritten by client updates
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub rx: f32,
    pub ry: f32,

    // Combat
    pub hp: i32,
    pub is_dead: bool,
    pub kills: u32,
    pub deaths: u32,

    /// Fixed for the session; None in free-for-all and for bots
    pub team: Option<Team>,

    /// Unix millis of the last meaningful action, drives idle eviction
    pub last_activity: u64,
    /// Whether the one-time idle warning has been sent for the current
    /// inactivity stretch
    pub idle_warned: bool,

    /// Synthetic liveness connection; exempt from capacity and eviction
    pub is_bot: bool,
}

impl PlayerState {
    pub fn new(id: Uuid, name: String, team: Option<Team>, is_bot: bool, now: u64) -> Self {
        let (x, y, z, rx, ry) = spawn_transform(team);
        Self {
            id,
            name,
            x,
            y,
            z,
            rx,
            ry,
            hp: MAX_HP,
            is_dead: false,
            kills: 0,
            deaths: 0,
            team,
            last_activity: now,
            idle_warned: false,
            is_bot,
        }
    }

    /// Overwrite the transform with a client-reported one. Returns true when
    /// the change exceeds the noise threshold in position or facing.
    pub fn apply_transform(&mut self, x: f32, y: f32, z: f32, rx: f32, ry: f32) -> bool {
        let moved = (x - self.x).abs() > MOVE_EPSILON
            || (y - self.y).abs() > MOVE_EPSILON
            || (z - self.z).abs() > MOVE_EPSILON
            || (rx - self.rx).abs() > TURN_EPSILON
            || (ry - self.ry).abs() > TURN_EPSILON;

        self.x = x;
        self.y = y;
        self.z = z;
        self.rx = rx;
        self.ry = ry;

        moved
    }

    /// Record a meaningful action (movement, shot, chat, objective)
    pub fn touch(&mut self, now: u64) {
        self.last_activity = now;
        self.idle_warned = false;
    }

    /// Reset for a new life at the team spawn
    pub fn respawn(&mut self) {
        let (x, y, z, rx, ry) = spawn_transform(self.team);
        self.x = x;
        self.y = y;
        self.z = z;
        self.rx = rx;
        self.ry = ry;
        self.hp = MAX_HP;
        self.is_dead = false;
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            id: self.id,
            name: self.name.clone(),
            x: self.x,
            y: self.y,
            z: self.z,
            rx: self.rx,
            ry: self.ry,
            hp: self.hp,
            is_dead: self.is_dead,
            kills: self.kills,
            deaths: self.deaths,
            team: self.team,
        }
    }

    pub fn score_entry(&self) -> ScoreEntry {
        ScoreEntry {
            id: self.id,
            name: self.name.clone(),
            kills: self.kills,
            deaths: self.deaths,
            team: self.team,
        }
    }
}

/// Deterministic spawn transform: (x, y, z, rx, ry). Teams start at opposite
/// corners of the map facing the middle; everyone else drops in at the center
/// platform.
pub fn spawn_transform(team: Option<Team>) -> (f32, f32, f32, f32, f32) {
    match team {
        Some(Team::Ct) => (-25.0, 10.0, -25.0, 0.0, std::f32::consts::FRAC_PI_4),
        Some(Team::T) => (
            25.0,
            10.0,
            25.0,
            0.0,
            std::f32::consts::FRAC_PI_4 - std::f32::consts::PI,
        ),
        None => (0.0, 10.0, 0.0, 0.0, 0.0),
    }
}

/// Fallback display name derived from the connection id
pub fn default_name(id: Uuid) -> String {
    format!("Player_{}", &id.to_string()[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_below_epsilon_is_not_movement() {
        let mut p = PlayerState::new(Uuid::new_v4(), "p".into(), None, false, 0);
        assert!(!p.apply_transform(0.01, 10.0, 0.0, 0.0, 0.0));
        // Transform is still overwritten even when below the threshold
        assert!((p.x - 0.01).abs() < f32::EPSILON);
    }

    #[test]
    fn real_movement_exceeds_epsilon() {
        let mut p = PlayerState::new(Uuid::new_v4(), "p".into(), None, false, 0);
        assert!(p.apply_transform(1.0, 10.0, 0.0, 0.0, 0.0));
        assert!(p.apply_transform(1.0, 10.0, 0.0, 0.0, 0.5));
    }

    #[test]
    fn respawn_restores_health_and_spawn() {
        let mut p = PlayerState::new(Uuid::new_v4(), "p".into(), Some(Team::Ct), false, 0);
        p.hp = 0;
        p.is_dead = true;
        p.apply_transform(5.0, 2.0, 5.0, 0.0, 0.0);
        p.respawn();
        assert_eq!(p.hp, MAX_HP);
        assert!(!p.is_dead);
        assert!((p.x - -25.0).abs() < f32::EPSILON);
    }
}
