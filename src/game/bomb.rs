//! Bomb objective state machine
//!
//! One bomb per objective room. It is either held by an attacking-team
//! player, planted at a site with a running fuse, or unassigned while no
//! eligible carrier is connected. Explosion and defusal resolve the round
//! and immediately produce a fresh carried/unassigned bomb.

use uuid::Uuid;

use crate::ws::protocol::BombSite;

/// Where the bomb currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BombPhase {
    /// No eligible attacker connected
    Unassigned,
    /// Held by a connected attacking-team player
    Carried { carrier: Uuid },
    /// Ticking at a site; the room resolves the round when the fuse fires
    Planted {
        site: BombSite,
        planted_at: u64,
        explode_at: u64,
    },
}

#[derive(Debug, Clone)]
pub struct Bomb {
    pub phase: BombPhase,
}

impl Bomb {
    pub fn new() -> Self {
        Self {
            phase: BombPhase::Unassigned,
        }
    }

    pub fn carrier(&self) -> Option<Uuid> {
        match self.phase {
            BombPhase::Carried { carrier } => Some(carrier),
            _ => None,
        }
    }

    pub fn is_planted(&self) -> bool {
        matches!(self.phase, BombPhase::Planted { .. })
    }

    /// Only the current carrier may plant, and only while the bomb is carried
    pub fn can_plant(&self, conn_id: Uuid) -> bool {
        self.carrier() == Some(conn_id)
    }

    /// Move to Planted, clearing the carrier. Returns (planted_at, explode_at)
    /// for the broadcast.
    pub fn plant(&mut self, site: BombSite, now: u64, fuse_ms: u64) -> (u64, u64) {
        let explode_at = now + fuse_ms;
        self.phase = BombPhase::Planted {
            site,
            planted_at: now,
            explode_at,
        };
        (now, explode_at)
    }

    /// Hand the bomb to a new carrier, or leave it unassigned
    pub fn assign(&mut self, carrier: Option<Uuid>) {
        self.phase = match carrier {
            Some(carrier) => BombPhase::Carried { carrier },
            None => BombPhase::Unassigned,
        };
    }
}

impl Default for Bomb {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_carrier_can_plant() {
        let holder = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut bomb = Bomb::new();
        assert!(!bomb.can_plant(holder));

        bomb.assign(Some(holder));
        assert!(bomb.can_plant(holder));
        assert!(!bomb.can_plant(other));
    }

    #[test]
    fn planting_clears_carrier_and_sets_fuse() {
        let holder = Uuid::new_v4();
        let mut bomb = Bomb::new();
        bomb.assign(Some(holder));

        let (planted_at, explode_at) = bomb.plant(BombSite::B, 10_000, 40_000);
        assert_eq!(planted_at, 10_000);
        assert_eq!(explode_at, 50_000);
        assert!(bomb.is_planted());
        assert_eq!(bomb.carrier(), None);
        // A planted bomb can no longer be planted, even by the former carrier
        assert!(!bomb.can_plant(holder));
    }

    #[test]
    fn reassign_after_resolution() {
        let mut bomb = Bomb::new();
        bomb.assign(Some(Uuid::new_v4()));
        bomb.plant(BombSite::A, 0, 40_000);

        bomb.assign(None);
        assert_eq!(bomb.phase, BombPhase::Unassigned);

        let next = Uuid::new_v4();
        bomb.assign(Some(next));
        assert_eq!(bomb.carrier(), Some(next));
        assert!(!bomb.is_planted());
    }
}
