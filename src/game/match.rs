//! Match actor: the single event loop that owns and mutates a match

use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::rules::MatchConfig;
use super::snapshot::SnapshotBuilder;
use super::state::{JoinError, JoinOutcome, MatchState, MatchStatus};
use super::validation::apply_action;
use super::{Action, MatchId, PlayerId};

/// How long registry-side calls may wait for room in a match inbox
const INBOX_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound on waiting for connections to close after the final snapshot
const TEARDOWN_GRACE: Duration = Duration::from_secs(10);

/// Outcome of handing a snapshot to the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Outbound queue full; the transport has force-closed the connection
    Saturated,
    NotConnected,
}

/// Transport side of snapshot delivery.
///
/// Implementations must never block: `deliver` either queues the payload
/// or reports why it could not.
pub trait SnapshotSink: Send + Sync + 'static {
    fn deliver(&self, player_id: PlayerId, snapshot: Bytes, is_final: bool) -> Delivery;

    /// Resolves once every listed player's connection tasks have stopped
    fn wait_closed(&self, players: Vec<PlayerId>) -> BoxFuture<'static, ()>;
}

/// Events processed by the match loop, in arrival order
#[derive(Debug)]
pub enum MatchEvent {
    Join {
        player_id: PlayerId,
        name: String,
        reply: oneshot::Sender<Result<JoinOutcome, JoinError>>,
    },
    Start,
    Action(Action),
    Disconnect(PlayerId),
    Quit,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Match inbox is full")]
    InboxFull,

    #[error("Match has shut down")]
    MatchClosed,

    #[error("Unknown match {0}")]
    UnknownMatch(MatchId),
}

/// The fields the registry may read without going through the inbox
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchSummary {
    pub status: MatchStatus,
    pub player_count: usize,
    pub connected_count: usize,
}

impl MatchSummary {
    fn of(state: &MatchState) -> Self {
        Self {
            status: state.status,
            player_count: state.players.len(),
            connected_count: state.players.values().filter(|p| p.connected).count(),
        }
    }
}

/// Handle to a running match
#[derive(Clone)]
pub struct MatchHandle {
    pub id: MatchId,
    inbox: mpsc::Sender<MatchEvent>,
    summary: Arc<Mutex<MatchSummary>>,
}

impl MatchHandle {
    pub fn summary(&self) -> MatchSummary {
        *self.summary.lock()
    }

    /// Queue an action without waiting; dropped if the inbox is full
    pub fn submit(&self, action: Action) -> Result<(), SubmitError> {
        self.try_send(MatchEvent::Action(action))
    }

    /// Queue a disconnect notification, waiting a bounded time for room.
    ///
    /// Unlike actions, disconnects are never dropped just because the inbox
    /// is momentarily full.
    pub async fn notify_disconnect(&self, player_id: PlayerId) -> Result<(), SubmitError> {
        self.send(MatchEvent::Disconnect(player_id)).await
    }

    fn try_send(&self, event: MatchEvent) -> Result<(), SubmitError> {
        self.inbox.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SubmitError::InboxFull,
            mpsc::error::TrySendError::Closed(_) => SubmitError::MatchClosed,
        })
    }

    async fn send(&self, event: MatchEvent) -> Result<(), SubmitError> {
        self.inbox
            .send_timeout(event, INBOX_SEND_TIMEOUT)
            .await
            .map_err(|e| match e {
                mpsc::error::SendTimeoutError::Timeout(_) => SubmitError::InboxFull,
                mpsc::error::SendTimeoutError::Closed(_) => SubmitError::MatchClosed,
            })
    }

    /// Ask the match loop to seat a player; the loop does the capacity check
    pub async fn join(&self, player_id: PlayerId, name: String) -> Result<JoinOutcome, JoinError> {
        let (reply, rx) = oneshot::channel();
        self.send(MatchEvent::Join {
            player_id,
            name,
            reply,
        })
        .await
        .map_err(|e| match e {
            SubmitError::InboxFull => JoinError::MatchBusy,
            _ => JoinError::MatchClosed,
        })?;

        rx.await.map_err(|_| JoinError::MatchClosed)?
    }

    pub async fn start(&self) -> Result<(), SubmitError> {
        self.send(MatchEvent::Start).await
    }
}

/// Registry of all live matches, plus which match each player belongs to
pub struct MatchRegistry {
    matches: DashMap<MatchId, MatchHandle>,
    player_matches: DashMap<PlayerId, MatchId>,
    config: Arc<MatchConfig>,
    sink: Arc<dyn SnapshotSink>,
    inbox_capacity: usize,
}

impl MatchRegistry {
    pub fn new(config: Arc<MatchConfig>, sink: Arc<dyn SnapshotSink>, inbox_capacity: usize) -> Self {
        Self {
            matches: DashMap::new(),
            player_matches: DashMap::new(),
            config,
            sink,
            inbox_capacity: inbox_capacity.max(1),
        }
    }

    /// Create a match, start its loop and register it until the loop ends
    pub fn spawn_match(self: &Arc<Self>) -> MatchHandle {
        let match_id = MatchId::new_v4();
        let seed = rand::random::<u64>();

        let (game_match, handle) = GameMatch::new(
            match_id,
            seed,
            self.config.clone(),
            self.sink.clone(),
            self.inbox_capacity,
        );
        self.matches.insert(match_id, handle.clone());

        info!(match_id = %match_id, "Created new match");

        let registry = self.clone();
        tokio::spawn(async move {
            game_match.run().await;

            // Cleanup after match ends
            registry.matches.remove(&match_id);
            registry.player_matches.retain(|_, m| *m != match_id);

            info!(match_id = %match_id, "Match removed from registry");
        });

        handle
    }

    pub fn get(&self, id: &MatchId) -> Option<MatchHandle> {
        self.matches.get(id).map(|m| m.value().clone())
    }

    pub fn assign(&self, player_id: PlayerId, match_id: MatchId) {
        self.player_matches.insert(player_id, match_id);
    }

    pub fn match_of(&self, player_id: &PlayerId) -> Option<MatchId> {
        self.player_matches.get(player_id).map(|m| *m)
    }

    /// Route an action into its match's inbox without waiting
    pub fn submit(&self, match_id: MatchId, action: Action) -> Result<(), SubmitError> {
        self.get(&match_id)
            .ok_or(SubmitError::UnknownMatch(match_id))?
            .submit(action)
    }

    /// Tell the owning match that a player's connection is gone
    pub fn notify_disconnect(&self, player_id: PlayerId) {
        let Some(match_id) = self.match_of(&player_id) else {
            debug!(player_id = %player_id, "Disconnect for player without a match");
            return;
        };

        let Some(handle) = self.get(&match_id) else {
            debug!(player_id = %player_id, match_id = %match_id, "Disconnect for a finished match");
            return;
        };

        // Never block the disconnecting connection on the match inbox
        tokio::spawn(async move {
            if let Err(e) = handle.notify_disconnect(player_id).await {
                warn!(player_id = %player_id, match_id = %match_id, error = %e, "Dropped disconnect notification");
            }
        });
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn connected_players(&self) -> usize {
        self.matches
            .iter()
            .map(|m| m.value().summary().connected_count)
            .sum()
    }
}

/// The authoritative match loop
pub struct GameMatch {
    state: MatchState,
    inbox: mpsc::Receiver<MatchEvent>,
    /// Used only by teardown to deliver `Quit`; weak so the loop also ends
    /// once every handle is dropped
    quit_tx: mpsc::WeakSender<MatchEvent>,
    sink: Arc<dyn SnapshotSink>,
    snapshot_builder: SnapshotBuilder,
    summary: Arc<Mutex<MatchSummary>>,
    final_sent: bool,
}

impl GameMatch {
    pub fn new(
        id: MatchId,
        seed: u64,
        config: Arc<MatchConfig>,
        sink: Arc<dyn SnapshotSink>,
        inbox_capacity: usize,
    ) -> (Self, MatchHandle) {
        let (inbox_tx, inbox) = mpsc::channel(inbox_capacity);
        let state = MatchState::new(id, seed, config);
        let summary = Arc::new(Mutex::new(MatchSummary::of(&state)));

        let handle = MatchHandle {
            id,
            inbox: inbox_tx.clone(),
            summary: summary.clone(),
        };

        let game_match = Self {
            state,
            inbox,
            quit_tx: inbox_tx.downgrade(),
            sink,
            snapshot_builder: SnapshotBuilder::new(),
            summary,
            final_sent: false,
        };

        (game_match, handle)
    }

    /// Run the event loop until `Quit` arrives or every sender is gone
    pub async fn run(mut self) {
        info!(match_id = %self.state.id, seed = self.state.seed, "Match loop started");

        let mut ticker = interval(self.state.config.rules.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.on_tick(),
                event = self.inbox.recv() => match event {
                    Some(MatchEvent::Quit) | None => break,
                    Some(event) => self.handle_event(event),
                },
            }
        }

        let stats = self.snapshot_builder.stats();
        info!(
            match_id = %self.state.id,
            status = ?self.state.status,
            snapshots = stats.total_snapshots,
            snapshot_bytes = stats.total_bytes,
            avg_players = stats.avg_players_per_snapshot,
            "Match loop stopped"
        );
    }

    fn handle_event(&mut self, event: MatchEvent) {
        match event {
            MatchEvent::Join {
                player_id,
                name,
                reply,
            } => {
                let result = self.state.add_player(player_id, name);
                match &result {
                    Ok(_) => info!(
                        match_id = %self.state.id,
                        player_id = %player_id,
                        player_count = self.state.players.len(),
                        "Player joined match"
                    ),
                    Err(e) => warn!(match_id = %self.state.id, player_id = %player_id, error = %e, "Join refused"),
                }
                self.publish_summary();

                // A dropped receiver means the joiner gave up; its seat stays
                // until the connection's disconnect arrives
                let _ = reply.send(result);
            }
            MatchEvent::Start => {
                if !self.state.start(Utc::now()) {
                    warn!(
                        match_id = %self.state.id,
                        status = ?self.state.status,
                        player_count = self.state.players.len(),
                        "Ignored start request"
                    );
                }
                self.after_mutation();
            }
            MatchEvent::Action(action) => {
                apply_action(&mut self.state, &action);
                self.after_mutation();
            }
            MatchEvent::Disconnect(player_id) => {
                if self.state.disconnect_player(player_id) {
                    info!(match_id = %self.state.id, player_id = %player_id, "Player left match");
                }
                self.after_mutation();
            }
            MatchEvent::Quit => {}
        }
    }

    fn on_tick(&mut self) {
        if self.final_sent {
            return;
        }
        if self.state.status.is_terminal() {
            self.emit_final();
            return;
        }

        let unreachable = self.broadcast(false).1;
        if !unreachable.is_empty() {
            self.drop_unresponsive(unreachable);
            self.after_mutation();
        }
    }

    /// End-of-game check, summary refresh and, on the terminal transition,
    /// the final snapshot
    fn after_mutation(&mut self) {
        self.state.check_end_of_game();
        self.publish_summary();

        if self.state.status.is_terminal() && !self.final_sent {
            self.emit_final();
        }
    }

    fn publish_summary(&self) {
        *self.summary.lock() = MatchSummary::of(&self.state);
    }

    fn drop_unresponsive(&mut self, players: Vec<PlayerId>) {
        for player_id in players {
            warn!(match_id = %self.state.id, player_id = %player_id, "Disconnecting unresponsive player");
            self.state.disconnect_player(player_id);
        }
    }

    /// Send one snapshot to every connected player.
    ///
    /// Returns (queued, unreachable) recipients. Unreachable players had a
    /// full outbound queue, or had no connection at all while the match is
    /// in progress (their disconnect notification never made it in).
    fn broadcast(&mut self, is_final: bool) -> (Vec<PlayerId>, Vec<PlayerId>) {
        let in_progress = self.state.status == MatchStatus::InProgress;
        let recipients = self.state.connected_player_ids();
        let bytes = match self.snapshot_builder.build(&mut self.state, Utc::now(), is_final) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(match_id = %self.state.id, error = %e, "Dropping snapshot");
                return (Vec::new(), Vec::new());
            }
        };

        let mut queued = Vec::with_capacity(recipients.len());
        let mut unreachable = Vec::new();
        for player_id in recipients {
            match self.sink.deliver(player_id, bytes.clone(), is_final) {
                Delivery::Queued => queued.push(player_id),
                Delivery::Saturated => unreachable.push(player_id),
                Delivery::NotConnected if in_progress => unreachable.push(player_id),
                Delivery::NotConnected => {
                    debug!(match_id = %self.state.id, player_id = %player_id, "No connection for snapshot");
                }
            }
        }
        (queued, unreachable)
    }

    /// Deliver the one final snapshot, then quit once those connections close
    fn emit_final(&mut self) {
        self.final_sent = true;

        let (queued, unreachable) = self.broadcast(true);
        self.drop_unresponsive(unreachable);
        self.publish_summary();

        info!(
            match_id = %self.state.id,
            status = ?self.state.status,
            recipients = queued.len(),
            "Final snapshot sent"
        );

        let closed = self.sink.wait_closed(queued);
        let quit_tx = self.quit_tx.clone();
        let match_id = self.state.id;
        tokio::spawn(async move {
            if tokio::time::timeout(TEARDOWN_GRACE, closed).await.is_err() {
                warn!(match_id = %match_id, "Connections still open after final snapshot, quitting anyway");
            }
            if let Some(tx) = quit_tx.upgrade() {
                let _ = tx.send(MatchEvent::Quit).await;
            }
        });
    }
}
