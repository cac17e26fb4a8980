//! The one joinable match and its replacement once it fills

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::game::r#match::MatchSummary;
use crate::game::state::{JoinError, JoinOutcome};
use crate::game::{MatchHandle, MatchId, MatchRegistry, PlayerId};

/// Where a newly admitted player ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Joined {
    pub player_id: PlayerId,
    pub match_id: MatchId,
}

/// Lobby service: holds the open match and rotates it when full
pub struct Lobby {
    /// Held across a join so joins are admitted one at a time
    open: Mutex<MatchHandle>,
    registry: Arc<MatchRegistry>,
}

impl Lobby {
    /// Must be called from within the runtime; spawns the first open match
    pub fn new(registry: Arc<MatchRegistry>) -> Self {
        let open = registry.spawn_match();
        Self {
            open: Mutex::new(open),
            registry,
        }
    }

    /// Seat a player in the open match.
    ///
    /// The join that fills the match also starts it and opens a fresh one,
    /// so the next caller never waits on a match that is spinning up.
    pub async fn join(&self, player_id: PlayerId, name: String) -> Result<Joined, JoinError> {
        let mut open = self.open.lock().await;

        let outcome = match open.join(player_id, name.clone()).await {
            Err(JoinError::MatchClosed) => {
                // The open match died under us; replace it and retry once
                warn!(match_id = %open.id, "Open match is gone, replacing it");
                *open = self.registry.spawn_match();
                open.join(player_id, name).await?
            }
            other => other?,
        };

        let joined = Joined {
            player_id,
            match_id: open.id,
        };
        self.registry.assign(player_id, open.id);

        if outcome == JoinOutcome::Filled {
            info!(match_id = %open.id, "Match full, starting");
            if let Err(e) = open.start().await {
                error!(match_id = %open.id, error = %e, "Failed to start full match");
            }
            *open = self.registry.spawn_match();
        }

        Ok(joined)
    }

    /// Id and summary of the match currently accepting players
    pub async fn open_match(&self) -> (MatchId, MatchSummary) {
        let open = self.open.lock().await;
        (open.id, open.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::r#match::{Delivery, SnapshotSink};
    use crate::game::state::tests::test_config;
    use crate::game::state::MatchStatus;
    use bytes::Bytes;
    use futures::future::BoxFuture;
    use std::collections::HashSet;
    use std::time::Duration;
    use uuid::Uuid;

    /// Accepts and discards every snapshot, as if each player were connected
    struct NullSink;

    impl SnapshotSink for NullSink {
        fn deliver(&self, _: PlayerId, _: Bytes, _: bool) -> Delivery {
            Delivery::Queued
        }

        fn wait_closed(&self, _: Vec<PlayerId>) -> BoxFuture<'static, ()> {
            Box::pin(async {})
        }
    }

    fn lobby() -> (Lobby, Arc<MatchRegistry>) {
        let registry = Arc::new(MatchRegistry::new(test_config(), Arc::new(NullSink), 64));
        (Lobby::new(registry.clone()), registry)
    }

    #[tokio::test]
    async fn tenth_join_starts_match_and_opens_another() {
        let (lobby, registry) = lobby();
        let (first, _) = lobby.open_match().await;

        let mut joined = Vec::new();
        for i in 0..10 {
            joined.push(lobby.join(Uuid::new_v4(), format!("p{i}")).await.unwrap());
        }
        assert!(joined.iter().all(|j| j.match_id == first));
        let ids: HashSet<_> = joined.iter().map(|j| j.player_id).collect();
        assert_eq!(ids.len(), 10);

        let (second, summary) = lobby.open_match().await;
        assert_ne!(first, second);
        assert_eq!(summary.player_count, 0);

        let next = lobby.join(Uuid::new_v4(), "p10".into()).await.unwrap();
        assert_eq!(next.match_id, second);
        assert_eq!(registry.match_of(&next.player_id), Some(second));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let started = registry.get(&first).unwrap().summary();
        assert_eq!(started.status, MatchStatus::InProgress);
        assert_eq!(started.player_count, 10);
        assert_eq!(registry.active_matches(), 2);
    }

    #[tokio::test]
    async fn concurrent_joins_never_overfill() {
        let (lobby, registry) = lobby();
        let lobby = Arc::new(lobby);

        let tasks: Vec<_> = (0..25)
            .map(|i| {
                let lobby = lobby.clone();
                tokio::spawn(async move { lobby.join(Uuid::new_v4(), format!("p{i}")).await })
            })
            .collect();

        let mut per_match = std::collections::HashMap::new();
        for task in tasks {
            let joined = task.await.unwrap().unwrap();
            *per_match.entry(joined.match_id).or_insert(0usize) += 1;
        }

        let mut counts: Vec<_> = per_match.values().copied().collect();
        counts.sort();
        assert_eq!(counts, vec![5, 10, 10]);
        assert_eq!(registry.active_matches(), 3);
    }
}
