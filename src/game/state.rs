//! Match data model, start-of-match setup and end-of-game detection

use chrono::{DateTime, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::f64::consts::TAU;
use std::sync::Arc;
use tracing::info;

use super::geometry::Vector;
use super::rules::MatchConfig;
use super::{MatchId, PlayerId, TaskId};

/// Match status. `CrewWin` and `AdversaryWin` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStatus {
    Lobby,
    InProgress,
    CrewWin,
    AdversaryWin,
}

impl MatchStatus {
    /// Numeric code used on the wire
    pub fn code(self) -> u8 {
        match self {
            MatchStatus::Lobby => 0,
            MatchStatus::InProgress => 1,
            MatchStatus::CrewWin => 2,
            MatchStatus::AdversaryWin => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, MatchStatus::CrewWin | MatchStatus::AdversaryWin)
    }
}

/// Player state in a match (authoritative)
#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    /// Assigned at match start
    pub color: Option<String>,
    pub alive: bool,
    pub adversary: bool,
    pub connected: bool,
    pub position: Vector,
    pub direction: Vector,
    /// Baseline for the next movement-rate check
    pub last_heard: DateTime<Utc>,

    // Diagnostics only
    pub reported_drift: f64,
    pub clock_skew_ms: i64,
}

impl Player {
    pub fn new(id: PlayerId, name: String, spawn: Vector, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name,
            color: None,
            alive: true,
            adversary: false,
            connected: true,
            position: spawn,
            direction: Vector::ZERO,
            last_heard: now,
            reported_drift: 0.0,
            clock_skew_ms: 0,
        }
    }

    /// Alive, connected and still able to affect the outcome
    pub fn is_active(&self) -> bool {
        self.alive && self.connected
    }
}

/// A task station and its claim
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub location: Vector,
    pub claimant: Option<PlayerId>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub complete: bool,
}

impl Task {
    pub fn new(id: TaskId, location: Vector) -> Self {
        Self {
            id,
            location,
            claimant: None,
            claimed_at: None,
            complete: false,
        }
    }

    pub fn release(&mut self) {
        self.claimant = None;
        self.claimed_at = None;
    }
}

/// Result of a successful join
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Seat taken, match still waiting for players
    Seated,
    /// Seat taken and the match is now at capacity
    Filled,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("Match is full")]
    MatchFull,

    /// The match inbox stayed full for the whole join wait
    #[error("Match is busy, try again")]
    MatchBusy,

    #[error("Match is no longer accepting players")]
    MatchClosed,
}

/// Match state (owned by the match task)
pub struct MatchState {
    pub id: MatchId,
    pub seed: u64,
    pub status: MatchStatus,
    pub players: HashMap<PlayerId, Player>,
    pub tasks: HashMap<TaskId, Task>,
    pub timestamp: DateTime<Utc>,
    pub config: Arc<MatchConfig>,
    rng: ChaCha8Rng,
}

impl MatchState {
    pub fn new(id: MatchId, seed: u64, config: Arc<MatchConfig>) -> Self {
        let tasks = config
            .tasks
            .iter()
            .map(|spot| (spot.id.clone(), Task::new(spot.id.clone(), spot.location)))
            .collect();

        Self {
            id,
            seed,
            status: MatchStatus::Lobby,
            players: HashMap::new(),
            tasks,
            timestamp: Utc::now(),
            config,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn capacity(&self) -> usize {
        self.config.rules.players_per_match
    }

    /// Seat a player while the match is still in the lobby
    pub fn add_player(&mut self, id: PlayerId, name: String) -> Result<JoinOutcome, JoinError> {
        if self.status != MatchStatus::Lobby || self.players.len() >= self.capacity() {
            return Err(JoinError::MatchFull);
        }

        let spawn = self.config.rules.start_center;
        self.players.insert(id, Player::new(id, name, spawn, Utc::now()));

        if self.players.len() == self.capacity() {
            Ok(JoinOutcome::Filled)
        } else {
            Ok(JoinOutcome::Seated)
        }
    }

    /// Player ids in a stable order (by id)
    pub fn ordered_player_ids(&self) -> Vec<PlayerId> {
        let mut ids: Vec<PlayerId> = self.players.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Lobby → InProgress: pick adversaries, hand out colours and spawn points.
    ///
    /// Returns false (and changes nothing) unless the match is a full lobby.
    pub fn start(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != MatchStatus::Lobby || self.players.len() != self.capacity() {
            return false;
        }

        let ids = self.ordered_player_ids();

        // Draw without replacement
        let mut pool = ids.clone();
        let mut adversaries = Vec::with_capacity(self.config.rules.adversaries_per_match);
        for _ in 0..self.config.rules.adversaries_per_match {
            let idx = self.rng.gen_range(0..pool.len());
            adversaries.push(pool.swap_remove(idx));
        }

        let rules = &self.config.rules;
        let step = TAU / ids.len() as f64;
        for (i, id) in ids.iter().enumerate() {
            if let Some(player) = self.players.get_mut(id) {
                let angle = step * (i + 1) as f64;
                player.adversary = adversaries.contains(id);
                player.color = rules.colors.get(i).cloned();
                player.position = rules.start_center + Vector::from_angle(angle) * rules.start_radius;
                player.direction = Vector::from_angle(angle);
                player.last_heard = now;
            }
        }

        self.status = MatchStatus::InProgress;
        self.timestamp = now;

        info!(
            match_id = %self.id,
            players = ids.len(),
            "Match in progress"
        );
        true
    }

    /// Handle a lost connection. Lobby seats are freed unless the match is
    /// already full and waiting to start.
    pub fn disconnect_player(&mut self, id: PlayerId) -> bool {
        if self.status == MatchStatus::Lobby && self.players.len() < self.capacity() {
            return self.players.remove(&id).is_some();
        }

        match self.players.get_mut(&id) {
            Some(player) if player.connected => {
                player.connected = false;
                self.release_claims(id);
                true
            }
            _ => false,
        }
    }

    /// Drop every in-progress claim held by a player
    pub fn release_claims(&mut self, id: PlayerId) {
        for task in self.tasks.values_mut() {
            if !task.complete && task.claimant == Some(id) {
                task.release();
            }
        }
    }

    pub fn connected_player_ids(&self) -> Vec<PlayerId> {
        self.players
            .values()
            .filter(|p| p.connected)
            .map(|p| p.id)
            .collect()
    }

    /// (adversaries, crew) that are alive and connected
    pub fn active_counts(&self) -> (usize, usize) {
        self.players
            .values()
            .filter(|p| p.is_active())
            .fold((0, 0), |(adv, crew), p| {
                if p.adversary {
                    (adv + 1, crew)
                } else {
                    (adv, crew + 1)
                }
            })
    }

    pub fn completed_tasks(&self) -> usize {
        self.tasks.values().filter(|t| t.complete).count()
    }

    /// Re-evaluate the win conditions. Returns true when this call made the
    /// match terminal; a terminal match is never touched again.
    pub fn check_end_of_game(&mut self) -> bool {
        if self.status != MatchStatus::InProgress {
            return false;
        }

        let (adversaries, crew) = self.active_counts();
        let all_tasks_done = !self.tasks.is_empty() && self.completed_tasks() == self.tasks.len();

        let outcome = if adversaries == 0 {
            Some(MatchStatus::CrewWin)
        } else if crew == 0 {
            Some(MatchStatus::AdversaryWin)
        } else if all_tasks_done {
            Some(MatchStatus::CrewWin)
        } else {
            None
        };

        match outcome {
            Some(status) => {
                self.status = status;
                info!(
                    match_id = %self.id,
                    status = ?status,
                    adversaries,
                    crew,
                    completed_tasks = self.completed_tasks(),
                    "Match over"
                );
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::game::map::MapData;
    use crate::game::rules::MatchRules;
    use std::collections::HashSet;
    use uuid::Uuid;

    pub(crate) fn test_config() -> Arc<MatchConfig> {
        MatchConfig::new(MatchRules::default(), MapData::bundled().unwrap()).unwrap()
    }

    /// A started ten-player match
    pub(crate) fn started_match(seed: u64) -> MatchState {
        let mut state = MatchState::new(Uuid::new_v4(), seed, test_config());
        for i in 0..10 {
            state.add_player(Uuid::new_v4(), format!("p{i}")).unwrap();
        }
        assert!(state.start(Utc::now()));
        state
    }

    pub(crate) fn adversaries(state: &MatchState) -> Vec<PlayerId> {
        let mut ids: Vec<_> = state
            .players
            .values()
            .filter(|p| p.adversary)
            .map(|p| p.id)
            .collect();
        ids.sort();
        ids
    }

    pub(crate) fn crew(state: &MatchState) -> Vec<PlayerId> {
        let mut ids: Vec<_> = state
            .players
            .values()
            .filter(|p| !p.adversary)
            .map(|p| p.id)
            .collect();
        ids.sort();
        ids
    }

    #[test]
    fn lobby_fills_to_capacity() {
        let mut state = MatchState::new(Uuid::new_v4(), 1, test_config());
        for i in 0..9 {
            assert_eq!(
                state.add_player(Uuid::new_v4(), format!("p{i}")),
                Ok(JoinOutcome::Seated)
            );
        }
        assert_eq!(
            state.add_player(Uuid::new_v4(), "last".into()),
            Ok(JoinOutcome::Filled)
        );
        assert_eq!(
            state.add_player(Uuid::new_v4(), "extra".into()),
            Err(JoinError::MatchFull)
        );
    }

    #[test]
    fn start_requires_full_lobby() {
        let mut state = MatchState::new(Uuid::new_v4(), 1, test_config());
        state.add_player(Uuid::new_v4(), "solo".into()).unwrap();
        assert!(!state.start(Utc::now()));
        assert_eq!(state.status, MatchStatus::Lobby);
    }

    #[test]
    fn start_assigns_roles_colors_and_circle() {
        for seed in 0..20 {
            let state = started_match(seed);
            assert_eq!(state.status, MatchStatus::InProgress);
            assert_eq!(adversaries(&state).len(), 2);

            let colors: HashSet<_> = state.players.values().filter_map(|p| p.color.clone()).collect();
            assert_eq!(colors.len(), 10);

            let rules = &state.config.rules;
            let mut angles: Vec<f64> = state
                .players
                .values()
                .map(|p| {
                    let offset = p.position - rules.start_center;
                    assert!((offset.length() - rules.start_radius).abs() < 1e-9);
                    offset.y.atan2(offset.x).rem_euclid(TAU)
                })
                .collect();
            angles.sort_by(|a, b| a.partial_cmp(b).unwrap());
            for pair in angles.windows(2) {
                assert!((pair[1] - pair[0] - TAU / 10.0).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn start_is_deterministic_for_a_seed() {
        let config = test_config();
        let ids: Vec<PlayerId> = (0..10).map(|_| Uuid::new_v4()).collect();
        let pick = |seed| {
            let mut state = MatchState::new(Uuid::new_v4(), seed, config.clone());
            for id in &ids {
                state.add_player(*id, "p".into()).unwrap();
            }
            state.start(Utc::now());
            adversaries(&state)
        };
        assert_eq!(pick(42), pick(42));
    }

    #[test]
    fn lobby_disconnect_frees_the_seat() {
        let mut state = MatchState::new(Uuid::new_v4(), 1, test_config());
        let id = Uuid::new_v4();
        state.add_player(id, "leaver".into()).unwrap();
        assert!(state.disconnect_player(id));
        assert!(state.players.is_empty());
    }

    #[test]
    fn full_lobby_disconnect_keeps_the_seat() {
        let mut state = MatchState::new(Uuid::new_v4(), 1, test_config());
        let ids: Vec<PlayerId> = (0..10).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            state.add_player(*id, "p".into()).unwrap();
        }
        assert!(state.disconnect_player(ids[0]));
        assert_eq!(state.players.len(), 10);
        assert!(!state.players[&ids[0]].connected);
        assert!(state.start(Utc::now()));
    }

    #[test]
    fn crew_wins_when_adversaries_leave() {
        let mut state = started_match(7);
        for id in adversaries(&state) {
            state.disconnect_player(id);
        }
        assert!(state.check_end_of_game());
        assert_eq!(state.status, MatchStatus::CrewWin);
    }

    #[test]
    fn adversaries_win_when_no_crew_remains() {
        let mut state = started_match(7);
        for id in crew(&state) {
            state.players.get_mut(&id).unwrap().alive = false;
        }
        assert!(state.check_end_of_game());
        assert_eq!(state.status, MatchStatus::AdversaryWin);
    }

    #[test]
    fn all_tasks_complete_is_a_crew_win() {
        let mut state = started_match(3);
        for task in state.tasks.values_mut() {
            task.complete = true;
        }
        assert!(state.check_end_of_game());
        assert_eq!(state.status, MatchStatus::CrewWin);
    }

    #[test]
    fn terminal_status_is_sticky() {
        let mut state = started_match(3);
        for id in crew(&state) {
            state.players.get_mut(&id).unwrap().alive = false;
        }
        state.check_end_of_game();
        for id in adversaries(&state) {
            state.disconnect_player(id);
        }
        assert!(!state.check_end_of_game());
        assert_eq!(state.status, MatchStatus::AdversaryWin);
    }
}
