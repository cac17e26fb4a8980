//! Live websocket connections, keyed by player

use bytes::Bytes;
use dashmap::DashMap;
use futures::future::{join_all, BoxFuture};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::game::r#match::{Delivery, SnapshotSink};
use crate::game::PlayerId;

/// One queued snapshot on its way to the socket
#[derive(Debug)]
pub struct Outbound {
    pub payload: Bytes,
    pub is_final: bool,
}

struct Connection {
    outbound: mpsc::Sender<Outbound>,
    cancel: Arc<watch::Sender<bool>>,
    closed: watch::Receiver<bool>,
}

/// Channels handed to the reader/writer tasks of a newly registered connection
pub struct ConnectionChannels {
    pub outbound_rx: mpsc::Receiver<Outbound>,
    /// Set to stop both tasks; either task sets it when it exits
    pub cancel: Arc<watch::Sender<bool>>,
    /// Set once both tasks have stopped
    pub closed: watch::Sender<bool>,
}

/// Registry of connected players' outbound queues
pub struct ConnectionRegistry {
    connections: DashMap<PlayerId, Connection>,
    outbound_capacity: usize,
}

impl ConnectionRegistry {
    pub fn new(outbound_capacity: usize) -> Self {
        Self {
            connections: DashMap::new(),
            outbound_capacity: outbound_capacity.max(1),
        }
    }

    pub fn register(&self, player_id: PlayerId) -> ConnectionChannels {
        let (outbound, outbound_rx) = mpsc::channel(self.outbound_capacity);
        let (cancel, _) = watch::channel(false);
        let cancel = Arc::new(cancel);
        let (closed, closed_rx) = watch::channel(false);

        self.connections.insert(
            player_id,
            Connection {
                outbound,
                cancel: cancel.clone(),
                closed: closed_rx,
            },
        );
        debug!(player_id = %player_id, connections = self.connections.len(), "Connection registered");

        ConnectionChannels {
            outbound_rx,
            cancel,
            closed,
        }
    }

    pub fn remove(&self, player_id: &PlayerId) {
        if self.connections.remove(player_id).is_some() {
            debug!(player_id = %player_id, "Connection removed");
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }
}

impl SnapshotSink for ConnectionRegistry {
    fn deliver(&self, player_id: PlayerId, snapshot: Bytes, is_final: bool) -> Delivery {
        let Some(conn) = self.connections.get(&player_id) else {
            return Delivery::NotConnected;
        };

        match conn.outbound.try_send(Outbound {
            payload: snapshot,
            is_final,
        }) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(player_id = %player_id, "Outbound queue full, dropping connection");
                conn.cancel.send_replace(true);
                Delivery::Saturated
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::NotConnected,
        }
    }

    fn wait_closed(&self, players: Vec<PlayerId>) -> BoxFuture<'static, ()> {
        let pending: Vec<_> = players
            .iter()
            .filter_map(|id| self.connections.get(id).map(|conn| conn.closed.clone()))
            .collect();

        Box::pin(async move {
            // A dropped sender also counts as closed
            join_all(pending.into_iter().map(|mut closed| async move {
                let _ = closed.wait_for(|done| *done).await;
            }))
            .await;
        })
    }
}
