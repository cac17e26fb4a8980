//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::{MatchConfig, MatchRegistry};
use crate::matchmaking::Lobby;
use crate::ws::ConnectionRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub connections: Arc<ConnectionRegistry>,
    pub matches: Arc<MatchRegistry>,
    pub lobby: Arc<Lobby>,
}

impl AppState {
    /// Must be called inside the runtime; opens the first lobby match
    pub fn new(config: Config, match_config: Arc<MatchConfig>) -> Self {
        let config = Arc::new(config);

        let connections = Arc::new(ConnectionRegistry::new(config.outbound_capacity));

        // Matches deliver snapshots straight into the connection registry
        let matches = Arc::new(MatchRegistry::new(
            match_config,
            connections.clone(),
            config.match_inbox_capacity,
        ));

        let lobby = Arc::new(Lobby::new(matches.clone()));

        Self {
            config,
            connections,
            matches,
            lobby,
        }
    }
}
