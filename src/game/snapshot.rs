//! Snapshot building and serialization

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::trace;

use crate::ws::protocol::{MatchSnapshot, PlayerSnapshot, ServerMsg, TaskSnapshot};

use super::state::MatchState;

#[derive(Debug, thiserror::Error)]
#[error("Failed to serialize snapshot: {0}")]
pub struct SnapshotError(#[from] serde_json::Error);

/// Builds snapshots for network transmission
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    stats: SnapshotStats,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the full match state.
    ///
    /// Adversary flags are sent to every recipient unredacted.
    pub fn capture(state: &MatchState, now: DateTime<Utc>, is_final: bool) -> MatchSnapshot {
        let players = state
            .players
            .values()
            .map(|p| {
                (
                    p.id,
                    PlayerSnapshot {
                        id: p.id,
                        name: p.name.clone(),
                        color: p.color.clone(),
                        alive: p.alive,
                        adversary: p.adversary,
                        connected: p.connected,
                        position: p.position,
                        direction: p.direction,
                    },
                )
            })
            .collect();

        let tasks = state
            .tasks
            .values()
            .map(|t| {
                (
                    t.id.clone(),
                    TaskSnapshot {
                        id: t.id.clone(),
                        location: t.location,
                        claimant: t.claimant,
                        claimed_at: t.claimed_at,
                        complete: t.complete,
                    },
                )
            })
            .collect();

        MatchSnapshot {
            match_id: state.id,
            status: state.status.code(),
            players,
            tasks,
            timestamp: now,
            is_final,
        }
    }

    /// Build and serialize a snapshot message, once for all recipients
    pub fn build(
        &mut self,
        state: &mut MatchState,
        now: DateTime<Utc>,
        is_final: bool,
    ) -> Result<Bytes, SnapshotError> {
        state.timestamp = now;
        let msg = ServerMsg::Snapshot(Self::capture(state, now, is_final));
        let bytes = Bytes::from(serde_json::to_vec(&msg)?);

        self.stats.record(state.players.len(), bytes.len());
        trace!(
            match_id = %state.id,
            bytes = bytes.len(),
            total_snapshots = self.stats.total_snapshots,
            "Built snapshot"
        );
        Ok(bytes)
    }

    pub fn stats(&self) -> &SnapshotStats {
        &self.stats
    }
}

/// Snapshot size stats for debugging
#[derive(Debug, Default)]
pub struct SnapshotStats {
    pub total_snapshots: u64,
    pub total_bytes: u64,
    pub avg_players_per_snapshot: f32,
}

impl SnapshotStats {
    pub fn record(&mut self, player_count: usize, bytes: usize) {
        self.total_snapshots += 1;
        self.total_bytes += bytes as u64;

        // Running average
        let n = self.total_snapshots as f32;
        self.avg_players_per_snapshot =
            self.avg_players_per_snapshot * ((n - 1.0) / n) + (player_count as f32 / n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::tests::started_match;

    #[test]
    fn snapshot_carries_full_state() {
        let mut state = started_match(9);
        let mut builder = SnapshotBuilder::new();
        let now = Utc::now();

        let bytes = builder.build(&mut state, now, false).unwrap();
        let msg: ServerMsg = serde_json::from_slice(&bytes).unwrap();
        let ServerMsg::Snapshot(snapshot) = msg else {
            panic!("expected a snapshot");
        };

        assert_eq!(snapshot.match_id, state.id);
        assert_eq!(snapshot.status, 1);
        assert_eq!(snapshot.players.len(), 10);
        assert_eq!(snapshot.tasks.len(), 6);
        assert_eq!(snapshot.players.values().filter(|p| p.adversary).count(), 2);
        assert!(!snapshot.is_final);
        assert_eq!(snapshot.timestamp, now);
        assert_eq!(state.timestamp, now);
        assert_eq!(builder.stats().total_snapshots, 1);
    }

    #[test]
    fn unclaimed_task_omits_claim_fields() {
        let mut state = started_match(9);
        let claimant = state.connected_player_ids()[0];
        let upload = state.tasks.get_mut("upload").unwrap();
        upload.claimant = Some(claimant);
        upload.claimed_at = Some(Utc::now());

        let bytes = SnapshotBuilder::new().build(&mut state, Utc::now(), true).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["type"], "snapshot");
        assert_eq!(json["is_final"], true);

        let wiring = &json["tasks"]["wiring"];
        assert!(wiring.get("claimant").is_none());
        assert!(wiring.get("claimed_at").is_none());
        assert_eq!(wiring["location"]["x"], 700.0);

        let upload = &json["tasks"]["upload"];
        assert_eq!(upload["claimant"], claimant.to_string());
        assert!(upload["claimed_at"].is_string());
    }
}
