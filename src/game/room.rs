//! Room registry and the per-room authoritative event loop
//!
//! Every room runs as its own task owning all room state. Sessions talk to it
//! through an mpsc mailbox, so handlers for a given room never interleave and
//! the state needs no locks. Cross-room operations do not exist.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::seq::IteratorRandom;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::util::time::unix_millis;
use crate::ws::protocol::{BombSite, ClientMsg, GameMode, ServerMsg, Team};

use super::bomb::{Bomb, BombPhase};
use super::player::{default_name, PlayerState};
use super::{JoinError, RoomEvent, SessionTx};

/// Mailbox depth per room
const MAILBOX_BUFFER: usize = 256;

/// A freshly created room waits this long for its first join before closing
const EMPTY_ROOM_GRACE: Duration = Duration::from_secs(30);

/// Handle to a running room
#[derive(Clone)]
pub struct RoomHandle {
    pub id: String,
    /// Mode the room was created with; later joins cannot change it
    pub mode: GameMode,
    pub(crate) uid: Uuid,
    pub event_tx: mpsc::Sender<RoomEvent>,
    player_count: Arc<AtomicUsize>,
}

impl RoomHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.event_tx.is_closed()
    }
}

/// Registry of all active rooms
pub struct RoomRegistry {
    rooms: DashMap<String, RoomHandle>,
    config: Arc<Config>,
    /// Handed to room tasks so they can deregister themselves on close
    weak_self: Weak<RoomRegistry>,
}

impl RoomRegistry {
    pub fn new(config: Arc<Config>) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            rooms: DashMap::new(),
            config,
            weak_self: weak_self.clone(),
        })
    }

    /// Look up a room, creating it when absent. An existing room keeps its
    /// mode; `mode` only applies when this call creates the room. A handle
    /// whose task already exited is replaced, so concurrent joins to a new id
    /// always land in exactly one live room.
    pub fn get_or_create(&self, room_id: &str, mode: GameMode) -> RoomHandle {
        match self.rooms.entry(room_id.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_closed() {
                    let handle = Room::spawn(room_id, mode, self);
                    entry.insert(handle.clone());
                    handle
                } else {
                    entry.get().clone()
                }
            }
            Entry::Vacant(entry) => {
                let handle = Room::spawn(room_id, mode, self);
                entry.insert(handle.clone());
                handle
            }
        }
    }

    /// Snapshot of all room handles, for the idle reaper and health endpoint
    pub fn handles(&self) -> Vec<RoomHandle> {
        self.rooms.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms
            .iter()
            .filter(|entry| !entry.value().is_closed())
            .count()
    }

    pub fn total_players(&self) -> usize {
        self.rooms
            .iter()
            .filter(|entry| !entry.value().is_closed())
            .map(|entry| entry.value().player_count())
            .sum()
    }

    /// Remove a room entry, but only if it still belongs to the given
    /// instance; a replacement room under the same id stays untouched.
    fn forget(&self, room_id: &str, uid: Uuid) {
        self.rooms.remove_if(room_id, |_, handle| handle.uid == uid);
    }
}

/// The authoritative room actor
struct Room {
    id: String,
    mode: GameMode,
    uid: Uuid,
    players: HashMap<Uuid, PlayerState>,
    senders: HashMap<Uuid, SessionTx>,
    /// Present only in objective mode
    bomb: Option<Bomb>,
    /// Bumped at every round resolution; stale fuse timers check it
    round: u64,
    /// Set on the first successful join; empties after that destroy the room
    ever_occupied: bool,
    /// Sessions whose reliable queue overflowed, dropped after each event
    stale: Vec<Uuid>,
    event_rx: mpsc::Receiver<RoomEvent>,
    event_tx: mpsc::Sender<RoomEvent>,
    player_count: Arc<AtomicUsize>,
    registry: Weak<RoomRegistry>,
    config: Arc<Config>,
}

impl Room {
    fn spawn(id: &str, mode: GameMode, registry: &RoomRegistry) -> RoomHandle {
        let (event_tx, event_rx) = mpsc::channel(MAILBOX_BUFFER);
        let player_count = Arc::new(AtomicUsize::new(0));
        let uid = Uuid::new_v4();
        let config = registry.config.clone();

        let handle = RoomHandle {
            id: id.to_string(),
            mode,
            uid,
            event_tx: event_tx.clone(),
            player_count: player_count.clone(),
        };

        let room = Room {
            id: id.to_string(),
            mode,
            uid,
            players: HashMap::new(),
            senders: HashMap::new(),
            bomb: (mode == GameMode::TeamObjective).then(Bomb::new),
            round: 0,
            ever_occupied: false,
            stale: Vec::new(),
            event_rx,
            event_tx,
            player_count,
            registry: registry.weak_self.clone(),
            config,
        };

        tokio::spawn(room.run());
        handle
    }

    async fn run(mut self) {
        info!(room_id = %self.id, mode = ?self.mode, "Room opened");

        loop {
            let event = if self.players.is_empty() {
                match timeout(EMPTY_ROOM_GRACE, self.event_rx.recv()).await {
                    Ok(Some(event)) => event,
                    Ok(None) => break,
                    Err(_) => {
                        debug!(room_id = %self.id, "No occupants arrived, closing");
                        break;
                    }
                }
            } else {
                match self.event_rx.recv().await {
                    Some(event) => event,
                    None => break,
                }
            };

            self.handle_event(event);
            self.flush_stale();

            if self.ever_occupied && self.players.is_empty() {
                break;
            }
        }

        if let Some(registry) = self.registry.upgrade() {
            registry.forget(&self.id, self.uid);
        }
        info!(room_id = %self.id, "Room closed");
    }

    fn handle_event(&mut self, event: RoomEvent) {
        match event {
            RoomEvent::Join {
                conn_id,
                name,
                team_preference,
                is_bot,
                tx,
                reply,
            } => self.handle_join(conn_id, name, team_preference, is_bot, tx, reply),
            RoomEvent::Client {
                conn_id,
                msg,
                received_at,
            } => self.handle_client(conn_id, msg, received_at),
            RoomEvent::Leave { conn_id } => self.handle_leave(conn_id),
            RoomEvent::SweepIdle { now } => self.sweep_idle(now),
            RoomEvent::FuseExpired { round } => self.handle_fuse_expired(round),
        }
    }

    fn handle_client(&mut self, conn_id: Uuid, msg: ClientMsg, received_at: u64) {
        match msg {
            ClientMsg::Join { .. } => {
                warn!(room_id = %self.id, conn_id = %conn_id, "Join from a session already in the room, ignoring");
            }
            ClientMsg::Update { x, y, z, rx, ry } => {
                self.handle_update(conn_id, x, y, z, rx, ry, received_at)
            }
            ClientMsg::Shoot => self.handle_shoot(conn_id, received_at),
            ClientMsg::Hit { target_id, damage } => {
                self.handle_hit(conn_id, target_id, damage, received_at)
            }
            ClientMsg::Respawn => self.handle_respawn(conn_id, received_at),
            ClientMsg::ChatMessage { msg, mid, ts } => {
                self.handle_chat(conn_id, msg, mid, ts, received_at)
            }
            ClientMsg::PlantBomb { site } => self.handle_plant(conn_id, site, received_at),
            ClientMsg::DefuseBomb => self.handle_defuse(conn_id, received_at),
            ClientMsg::VoiceStart => self.relay_voice(conn_id, ServerMsg::VoiceStart { id: conn_id }),
            ClientMsg::VoiceEnd => self.relay_voice(conn_id, ServerMsg::VoiceEnd { id: conn_id }),
            ClientMsg::VoiceData { data } => {
                self.relay_voice(conn_id, ServerMsg::VoiceData { id: conn_id, data })
            }
        }
    }

    // ------------------------------------------------------------------
    // Join / leave
    // ------------------------------------------------------------------

    fn handle_join(
        &mut self,
        conn_id: Uuid,
        name: String,
        team_preference: Option<Team>,
        is_bot: bool,
        tx: SessionTx,
        reply: tokio::sync::oneshot::Sender<Result<(), JoinError>>,
    ) {
        if self.players.contains_key(&conn_id) {
            let _ = reply.send(Ok(()));
            return;
        }

        let occupants = self.players.values().filter(|p| !p.is_bot).count();
        if !is_bot && occupants >= self.config.room_capacity {
            info!(room_id = %self.id, conn_id = %conn_id, "Join rejected, room full");
            let _ = reply.send(Err(JoinError::RoomFull {
                capacity: self.config.room_capacity,
            }));
            return;
        }

        let name = {
            let trimmed = name.trim();
            if trimmed.is_empty() {
                default_name(conn_id)
            } else {
                trimmed.to_string()
            }
        };

        let team = match (self.mode, is_bot) {
            (GameMode::TeamObjective, false) => Some(self.balance_team(team_preference)),
            _ => None,
        };

        let player = PlayerState::new(conn_id, name, team, is_bot, unix_millis());
        let snapshot = player.snapshot();

        self.players.insert(conn_id, player);
        self.senders.insert(conn_id, tx);
        self.player_count.store(self.players.len(), Ordering::Relaxed);
        self.ever_occupied = true;

        if reply.send(Ok(())).is_err() {
            // Session died between sending the join and hearing back
            self.remove_player(conn_id);
            return;
        }

        let players: Vec<_> = self.players.values().map(PlayerState::snapshot).collect();
        self.push(conn_id, ServerMsg::Joined { id: conn_id, players });
        self.broadcast_others(conn_id, &ServerMsg::PlayerJoined { player: snapshot });

        if let Some(team) = team {
            let is_carrier = self.offer_bomb(conn_id, team);
            self.broadcast(&ServerMsg::TeamAssignment {
                id: conn_id,
                team,
                is_carrier,
                mode: self.mode,
            });
            if is_carrier {
                self.broadcast(&ServerMsg::BombCarrier { id: Some(conn_id) });
            }
        }

        info!(
            room_id = %self.id,
            conn_id = %conn_id,
            player_count = self.players.len(),
            is_bot,
            "Player joined room"
        );
    }

    /// Least-populated team wins; ties honor the caller's preference and
    /// otherwise flip a coin.
    fn balance_team(&self, preference: Option<Team>) -> Team {
        let (ct, t) = self
            .players
            .values()
            .fold((0usize, 0usize), |(ct, t), p| match p.team {
                Some(Team::Ct) => (ct + 1, t),
                Some(Team::T) => (ct, t + 1),
                None => (ct, t),
            });

        if ct < t {
            Team::Ct
        } else if t < ct {
            Team::T
        } else {
            preference.unwrap_or_else(|| if rand::random() { Team::T } else { Team::Ct })
        }
    }

    /// Hand the bomb to a newly joined attacker when nobody holds it
    fn offer_bomb(&mut self, conn_id: Uuid, team: Team) -> bool {
        let Some(bomb) = self.bomb.as_mut() else {
            return false;
        };
        if team == Team::T && bomb.phase == BombPhase::Unassigned {
            bomb.assign(Some(conn_id));
            true
        } else {
            false
        }
    }

    fn handle_leave(&mut self, conn_id: Uuid) {
        if self.players.contains_key(&conn_id) {
            self.remove_player(conn_id);
        }
    }

    fn remove_player(&mut self, conn_id: Uuid) {
        let Some(player) = self.players.remove(&conn_id) else {
            return;
        };
        self.senders.remove(&conn_id);
        self.player_count.store(self.players.len(), Ordering::Relaxed);

        let carried_here = self
            .bomb
            .as_ref()
            .map_or(false, |bomb| bomb.carrier() == Some(conn_id));
        if carried_here {
            let next = self.pick_carrier();
            if let Some(bomb) = self.bomb.as_mut() {
                bomb.assign(next);
            }
            self.broadcast(&ServerMsg::BombCarrier { id: next });
        }

        self.broadcast(&ServerMsg::PlayerLeft { id: conn_id });

        info!(
            room_id = %self.id,
            conn_id = %conn_id,
            name = %player.name,
            player_count = self.players.len(),
            "Player left room"
        );
    }

    /// Choose a new carrier among connected attackers; bots never carry
    fn pick_carrier(&self) -> Option<Uuid> {
        let mut rng = rand::thread_rng();
        self.players
            .values()
            .filter(|p| p.team == Some(Team::T) && !p.is_bot)
            .map(|p| p.id)
            .choose(&mut rng)
    }

    // ------------------------------------------------------------------
    // Movement and combat
    // ------------------------------------------------------------------

    fn handle_update(&mut self, conn_id: Uuid, x: f32, y: f32, z: f32, rx: f32, ry: f32, now: u64) {
        let Some(player) = self.players.get_mut(&conn_id) else {
            return;
        };
        if player.apply_transform(x, y, z, rx, ry) {
            player.touch(now);
        }
        self.broadcast_others(conn_id, &ServerMsg::PlayerUpdate { id: conn_id, x, y, z, rx, ry });
    }

    fn handle_shoot(&mut self, conn_id: Uuid, now: u64) {
        let Some(player) = self.players.get_mut(&conn_id) else {
            return;
        };
        player.touch(now);
        self.broadcast_others(conn_id, &ServerMsg::RemoteShoot { id: conn_id });
    }

    /// Damage values are client-reported and trusted; the server only
    /// bookkeeps and clamps.
    fn handle_hit(&mut self, attacker_id: Uuid, target_id: Uuid, damage: i32, now: u64) {
        if let Some(attacker) = self.players.get_mut(&attacker_id) {
            attacker.touch(now);
        }

        let (hp, newly_dead, deaths) = {
            let Some(target) = self.players.get_mut(&target_id) else {
                debug!(room_id = %self.id, target_id = %target_id, "Hit against unknown target, ignoring");
                return;
            };
            target.hp = (target.hp - damage).max(0);
            let newly_dead = target.hp == 0 && !target.is_dead;
            if newly_dead {
                target.is_dead = true;
                target.deaths += 1;
            }
            (target.hp, newly_dead, target.deaths)
        };

        self.broadcast(&ServerMsg::PlayerDamaged {
            id: target_id,
            hp,
            attacker_id,
        });

        if newly_dead {
            let kills = match self.players.get_mut(&attacker_id) {
                Some(attacker) => {
                    attacker.kills += 1;
                    attacker.kills
                }
                None => 0,
            };

            self.broadcast(&ServerMsg::PlayerDied {
                id: target_id,
                attacker_id,
                kills,
                deaths,
            });

            let players: Vec<_> = self.players.values().map(PlayerState::score_entry).collect();
            self.broadcast(&ServerMsg::ScoreboardUpdate { players });

            info!(room_id = %self.id, victim = %target_id, attacker = %attacker_id, "Player died");
        }
    }

    fn handle_respawn(&mut self, conn_id: Uuid, now: u64) {
        let Some(player) = self.players.get_mut(&conn_id) else {
            return;
        };
        player.respawn();
        player.touch(now);
        let (x, y, z) = (player.x, player.y, player.z);
        self.broadcast(&ServerMsg::PlayerRespawn { id: conn_id, x, y, z });
    }

    // ------------------------------------------------------------------
    // Chat and voice
    // ------------------------------------------------------------------

    fn handle_chat(&mut self, conn_id: Uuid, msg: String, mid: String, ts: u64, now: u64) {
        if msg.trim().is_empty() {
            return;
        }
        let Some(player) = self.players.get_mut(&conn_id) else {
            return;
        };
        player.touch(now);
        let name = player.name.clone();
        self.broadcast(&ServerMsg::ChatMessage {
            id: conn_id,
            name,
            msg,
            mid,
            ts,
        });
    }

    /// Voice relays go to the whole room in free-for-all and to the sender's
    /// team in objective mode. Chunks are opaque; the server never decodes.
    fn relay_voice(&mut self, conn_id: Uuid, msg: ServerMsg) {
        let Some(sender) = self.players.get(&conn_id) else {
            return;
        };
        match sender.team {
            Some(team) if self.mode == GameMode::TeamObjective => {
                self.broadcast_team(team, conn_id, &msg)
            }
            _ => self.broadcast_others(conn_id, &msg),
        }
    }

    // ------------------------------------------------------------------
    // Bomb objective
    // ------------------------------------------------------------------

    fn handle_plant(&mut self, conn_id: Uuid, site: BombSite, now: u64) {
        if self.mode != GameMode::TeamObjective {
            return;
        }
        let fuse_ms = self.config.bomb_fuse.as_millis() as u64;

        let (planted_at, explode_time) = {
            let Some(player) = self.players.get_mut(&conn_id) else {
                return;
            };
            if player.team != Some(Team::T) {
                debug!(room_id = %self.id, conn_id = %conn_id, "Plant from a non-attacker, ignoring");
                return;
            }
            let Some(bomb) = self.bomb.as_mut() else {
                return;
            };
            if !bomb.can_plant(conn_id) {
                debug!(room_id = %self.id, conn_id = %conn_id, "Plant without the bomb or while planted, ignoring");
                return;
            }
            player.touch(now);
            bomb.plant(site, now, fuse_ms)
        };

        self.broadcast(&ServerMsg::BombPlanted {
            site,
            planted_at,
            explode_time,
        });
        info!(room_id = %self.id, conn_id = %conn_id, site = ?site, "Bomb planted");
        self.start_fuse();
    }

    /// Deferred one-shot posting back into the mailbox. The round counter
    /// makes it inert once the round resolves; a closed mailbox (room
    /// destroyed) swallows it entirely.
    fn start_fuse(&self) {
        let tx = self.event_tx.clone();
        let round = self.round;
        let fuse = self.config.bomb_fuse;
        tokio::spawn(async move {
            tokio::time::sleep(fuse).await;
            let _ = tx.send(RoomEvent::FuseExpired { round }).await;
        });
    }

    fn handle_fuse_expired(&mut self, round: u64) {
        if round != self.round {
            return; // a round already resolved under this fuse
        }
        if !self.bomb.as_ref().map_or(false, Bomb::is_planted) {
            return;
        }
        info!(room_id = %self.id, "Bomb exploded");
        self.end_round(Team::T, "Target destroyed");
    }

    fn handle_defuse(&mut self, conn_id: Uuid, now: u64) {
        if self.mode != GameMode::TeamObjective {
            return;
        }
        {
            let Some(player) = self.players.get_mut(&conn_id) else {
                return;
            };
            if player.team != Some(Team::Ct) {
                debug!(room_id = %self.id, conn_id = %conn_id, "Defuse from a non-defender, ignoring");
                return;
            }
            if !self.bomb.as_ref().map_or(false, Bomb::is_planted) {
                debug!(room_id = %self.id, conn_id = %conn_id, "Defuse with no planted bomb, ignoring");
                return;
            }
            player.touch(now);
        }

        self.broadcast(&ServerMsg::BombDefused {
            message: "Bomb defused!".to_string(),
        });
        info!(room_id = %self.id, conn_id = %conn_id, "Bomb defused");
        self.end_round(Team::Ct, "Bomb defused");
    }

    /// Resolve the round, then immediately rebuild the objective: fresh bomb,
    /// new carrier from the connected attackers.
    fn end_round(&mut self, winner: Team, reason: &str) {
        self.round += 1;

        let carrier = self.pick_carrier();
        if let Some(bomb) = self.bomb.as_mut() {
            bomb.assign(carrier);
        }

        let message = format!("{}. {} win the round.", reason, winner.victory_name());
        self.broadcast(&ServerMsg::RoundResult {
            winner: winner.victory_name().to_string(),
            message,
            carrier_id: carrier,
        });
        self.broadcast(&ServerMsg::BombCarrier { id: carrier });

        info!(
            room_id = %self.id,
            winner = winner.victory_name(),
            round = self.round,
            "Round resolved"
        );
    }

    // ------------------------------------------------------------------
    // Idle eviction
    // ------------------------------------------------------------------

    fn sweep_idle(&mut self, now: u64) {
        let warn_ms = self.config.idle_warn.as_millis() as u64;
        let kick_ms = self.config.idle_kick.as_millis() as u64;

        let mut to_warn = Vec::new();
        let mut to_kick = Vec::new();
        for player in self.players.values() {
            if player.is_bot {
                continue;
            }
            let idle = now.saturating_sub(player.last_activity);
            if idle >= kick_ms {
                to_kick.push(player.id);
            } else if idle >= warn_ms && !player.idle_warned {
                to_warn.push(player.id);
            }
        }

        let remaining_secs = (kick_ms - warn_ms) / 1000;
        for conn_id in to_warn {
            if let Some(player) = self.players.get_mut(&conn_id) {
                player.idle_warned = true;
            }
            self.push(
                conn_id,
                ServerMsg::ChatMessage {
                    id: Uuid::nil(),
                    name: "SERVER".to_string(),
                    msg: format!(
                        "No activity detected. You will be disconnected in {}s.",
                        remaining_secs
                    ),
                    mid: format!("idle-warn-{}-{}", conn_id, now),
                    ts: now,
                },
            );
            debug!(room_id = %self.id, conn_id = %conn_id, "Idle warning sent");
        }

        for conn_id in to_kick {
            info!(room_id = %self.id, conn_id = %conn_id, "Kicking idle player");
            self.push(
                conn_id,
                ServerMsg::ErrorMsg {
                    message: "Disconnected: idle for too long".to_string(),
                },
            );
            self.remove_player(conn_id);
        }
    }

    // ------------------------------------------------------------------
    // Delivery
    // ------------------------------------------------------------------

    fn push(&mut self, conn_id: Uuid, msg: ServerMsg) {
        let Some(tx) = self.senders.get(&conn_id) else {
            return;
        };
        if msg.is_volatile() {
            tx.send_volatile(msg);
        } else if !tx.send(msg) {
            self.stale.push(conn_id);
        }
    }

    fn broadcast(&mut self, msg: &ServerMsg) {
        let ids: Vec<Uuid> = self.senders.keys().copied().collect();
        for id in ids {
            self.push(id, msg.clone());
        }
    }

    fn broadcast_others(&mut self, except: Uuid, msg: &ServerMsg) {
        let ids: Vec<Uuid> = self.senders.keys().copied().filter(|id| *id != except).collect();
        for id in ids {
            self.push(id, msg.clone());
        }
    }

    fn broadcast_team(&mut self, team: Team, except: Uuid, msg: &ServerMsg) {
        let ids: Vec<Uuid> = self
            .players
            .values()
            .filter(|p| p.team == Some(team) && p.id != except)
            .map(|p| p.id)
            .collect();
        for id in ids {
            self.push(id, msg.clone());
        }
    }

    /// Drop sessions whose reliable queue overflowed. Removal broadcasts can
    /// surface more stale sessions; the loop drains until quiet.
    fn flush_stale(&mut self) {
        while let Some(conn_id) = self.stale.pop() {
            if self.players.contains_key(&conn_id) {
                warn!(room_id = %self.id, conn_id = %conn_id, "Dropping unresponsive session");
                self.remove_player(conn_id);
            }
        }
    }
}
