//! Anti-cheat checks for every client action.
//!
//! Each sub-intent of an [`Action`] is judged on its own: a rejected move
//! does not stop a kill or a task interaction carried by the same message.
//! Whatever happens, the submitter's diagnostics and `last_heard` baseline
//! are refreshed afterwards.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::util::time::elapsed_secs;

use super::geometry::{Vector, EPS};
use super::state::{MatchState, MatchStatus};
use super::{Action, PlayerId, TaskId};

/// Why a sub-intent was turned into a no-op
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("match is not in progress")]
    WrongStatus,

    #[error("unknown player {0}")]
    PlayerNotFound(PlayerId),

    #[error("player is dead")]
    PlayerDead,

    #[error("player is not an adversary")]
    NotAdversary,

    #[error("invalid kill target")]
    InvalidTarget,

    #[error("moved faster than allowed")]
    TooFast,

    #[error("destination is not walkable")]
    NotWalkable,

    #[error("out of range")]
    OutOfRange,

    #[error("unknown task {0}")]
    TaskNotFound(TaskId),

    #[error("task already complete")]
    TaskComplete,

    #[error("task already claimed")]
    TaskClaimed,

    #[error("task not claimed by this player")]
    NotClaimant,

    #[error("task dwell time not reached")]
    TooEarly,
}

/// Per-sub-intent results; `None` means the action did not carry it
#[derive(Debug, Default)]
pub struct ActionOutcome {
    pub moved: Option<Result<(), Rejection>>,
    pub kill: Option<Result<(), Rejection>>,
    pub start_task: Option<Result<(), Rejection>>,
    pub cancel_task: Option<Result<(), Rejection>>,
    pub complete_task: Option<Result<(), Rejection>>,
}

/// Largest distance reachable in `elapsed` seconds, plus `extra` reach
fn reach(state: &MatchState, elapsed: f64, extra: f64) -> f64 {
    let rules = &state.config.rules;
    elapsed.max(0.0) * rules.move_speed + extra + rules.move_allowance
}

/// Run the whole pipeline for one action
pub fn apply_action(state: &mut MatchState, action: &Action) -> ActionOutcome {
    debug!(match_id = %state.id, player_id = %action.player_id, "Applying action");

    let mut outcome = ActionOutcome::default();

    if let Some(position) = action.position {
        outcome.moved = Some(apply_move(state, action, position));
    }
    if let Some(victim) = action.kill {
        outcome.kill = Some(apply_kill(state, action, victim));
    }
    if let Some(task_id) = &action.start_task {
        outcome.start_task = Some(start_task(state, action, task_id));
    }
    if let Some(task_id) = &action.cancel_task {
        outcome.cancel_task = Some(cancel_task(state, action, task_id));
    }
    if let Some(task_id) = &action.complete_task {
        outcome.complete_task = Some(complete_task(state, action, task_id));
    }

    log_rejections(state, action, &outcome);
    refresh_player(state, action);

    outcome
}

fn log_rejections(state: &MatchState, action: &Action, outcome: &ActionOutcome) {
    let results = [
        ("move", &outcome.moved),
        ("kill", &outcome.kill),
        ("start_task", &outcome.start_task),
        ("cancel_task", &outcome.cancel_task),
        ("complete_task", &outcome.complete_task),
    ];
    for (intent, result) in results {
        if let Some(Err(reason)) = result {
            warn!(
                match_id = %state.id,
                player_id = %action.player_id,
                intent,
                reason = %reason,
                "Rejected action"
            );
        }
    }
}

/// Diagnostics and the rate-check baseline; runs whatever the outcome
fn refresh_player(state: &mut MatchState, action: &Action) {
    if let Some(player) = state.players.get_mut(&action.player_id) {
        player.reported_drift = action.drift;
        player.clock_skew_ms = (action.received_at - action.timestamp).num_milliseconds();
        player.last_heard = player.last_heard.max(action.timestamp);

        debug!(
            match_id = %state.id,
            player_id = %player.id,
            drift = player.reported_drift,
            clock_skew_ms = player.clock_skew_ms,
            "Client diagnostics"
        );
    }
}

fn apply_move(state: &mut MatchState, action: &Action, destination: Vector) -> Result<(), Rejection> {
    if state.status != MatchStatus::InProgress {
        return Err(Rejection::WrongStatus);
    }

    let player = state
        .players
        .get(&action.player_id)
        .ok_or(Rejection::PlayerNotFound(action.player_id))?;
    if !player.alive {
        return Err(Rejection::PlayerDead);
    }

    let max = reach(state, elapsed_secs(player.last_heard, action.timestamp), 0.0);
    if player.position.squared_distance(destination) > max * max {
        return Err(Rejection::TooFast);
    }

    if !state.config.navmesh.contains(destination) {
        return Err(Rejection::NotWalkable);
    }

    let player = state
        .players
        .get_mut(&action.player_id)
        .ok_or(Rejection::PlayerNotFound(action.player_id))?;
    player.position = destination;
    if let Some(direction) = action.direction.filter(|d| d.is_finite()) {
        player.direction = direction;
    }
    Ok(())
}

fn apply_kill(state: &mut MatchState, action: &Action, victim_id: PlayerId) -> Result<(), Rejection> {
    if state.status != MatchStatus::InProgress {
        return Err(Rejection::WrongStatus);
    }

    let killer = state
        .players
        .get(&action.player_id)
        .ok_or(Rejection::PlayerNotFound(action.player_id))?;
    if !killer.alive {
        return Err(Rejection::PlayerDead);
    }
    if !killer.adversary {
        return Err(Rejection::NotAdversary);
    }

    let victim = state
        .players
        .get(&victim_id)
        .ok_or(Rejection::PlayerNotFound(victim_id))?;
    if victim.id == killer.id || victim.adversary || !victim.alive {
        return Err(Rejection::InvalidTarget);
    }

    // The victim may have moved since we last heard from them
    let max = reach(
        state,
        elapsed_secs(victim.last_heard, action.timestamp),
        state.config.rules.kill_range,
    );
    if killer.position.squared_distance(victim.position) > max * max {
        return Err(Rejection::OutOfRange);
    }

    if let Some(victim) = state.players.get_mut(&victim_id) {
        victim.alive = false;
    }
    state.release_claims(victim_id);
    Ok(())
}

/// The submitter must stand within reach of the task
fn check_task_range(state: &MatchState, player_id: PlayerId, task_id: &TaskId) -> Result<(), Rejection> {
    let player = state
        .players
        .get(&player_id)
        .ok_or(Rejection::PlayerNotFound(player_id))?;
    let task = state
        .tasks
        .get(task_id)
        .ok_or_else(|| Rejection::TaskNotFound(task_id.clone()))?;

    if player.position.distance(task.location) > state.config.rules.task_range + EPS {
        return Err(Rejection::OutOfRange);
    }
    Ok(())
}

fn start_task(state: &mut MatchState, action: &Action, task_id: &TaskId) -> Result<(), Rejection> {
    if state.status != MatchStatus::InProgress {
        return Err(Rejection::WrongStatus);
    }

    let task = state
        .tasks
        .get(task_id)
        .ok_or_else(|| Rejection::TaskNotFound(task_id.clone()))?;
    if task.complete {
        return Err(Rejection::TaskComplete);
    }
    if task.claimant.is_some() {
        return Err(Rejection::TaskClaimed);
    }
    check_task_range(state, action.player_id, task_id)?;

    claim(state, task_id, action.player_id, action.timestamp);
    Ok(())
}

fn claim(state: &mut MatchState, task_id: &TaskId, player_id: PlayerId, at: DateTime<Utc>) {
    if let Some(task) = state.tasks.get_mut(task_id) {
        task.claimant = Some(player_id);
        task.claimed_at = Some(at);
    }
}

/// Shared preconditions for cancel and complete
fn check_own_claim(state: &MatchState, action: &Action, task_id: &TaskId) -> Result<(), Rejection> {
    if state.status != MatchStatus::InProgress {
        return Err(Rejection::WrongStatus);
    }

    let task = state
        .tasks
        .get(task_id)
        .ok_or_else(|| Rejection::TaskNotFound(task_id.clone()))?;
    if task.complete {
        return Err(Rejection::TaskComplete);
    }
    if task.claimant != Some(action.player_id) {
        return Err(Rejection::NotClaimant);
    }
    check_task_range(state, action.player_id, task_id)
}

fn cancel_task(state: &mut MatchState, action: &Action, task_id: &TaskId) -> Result<(), Rejection> {
    check_own_claim(state, action, task_id)?;

    if let Some(task) = state.tasks.get_mut(task_id) {
        task.release();
    }
    Ok(())
}

fn complete_task(state: &mut MatchState, action: &Action, task_id: &TaskId) -> Result<(), Rejection> {
    check_own_claim(state, action, task_id)?;

    let dwell = state.config.rules.task_dwell.as_secs_f64();
    let task = state
        .tasks
        .get_mut(task_id)
        .ok_or_else(|| Rejection::TaskNotFound(task_id.clone()))?;
    let claimed_at = task.claimed_at.ok_or(Rejection::NotClaimant)?;
    if elapsed_secs(claimed_at, action.timestamp) < dwell {
        return Err(Rejection::TooEarly);
    }

    task.complete = true;
    Ok(())
}
