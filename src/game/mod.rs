//! Match simulation modules

pub mod geometry;
pub mod map;
pub mod r#match;
pub mod rules;
pub mod snapshot;
pub mod state;
pub mod validation;

pub use r#match::{MatchHandle, MatchRegistry};
pub use rules::MatchConfig;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use geometry::Vector;

pub type MatchId = Uuid;
pub type PlayerId = Uuid;
pub type TaskId = String;

/// A validated-for-shape client action, ready for the match loop.
///
/// Each sub-intent is optional and judged on its own.
#[derive(Debug, Clone)]
pub struct Action {
    pub player_id: PlayerId,
    pub position: Option<Vector>,
    pub direction: Option<Vector>,
    pub kill: Option<PlayerId>,
    pub start_task: Option<TaskId>,
    pub cancel_task: Option<TaskId>,
    pub complete_task: Option<TaskId>,
    /// Client clock when the action was taken
    pub timestamp: DateTime<Utc>,
    /// Client-reported divergence, diagnostic only
    pub drift: f64,
    /// Server clock when the transport received it
    pub received_at: DateTime<Utc>,
}

impl Action {
    /// An action carrying no sub-intents
    pub fn new(player_id: PlayerId, timestamp: DateTime<Utc>) -> Self {
        Self {
            player_id,
            position: None,
            direction: None,
            kill: None,
            start_task: None,
            cancel_task: None,
            complete_task: None,
            timestamp,
            drift: 0.0,
            received_at: Utc::now(),
        }
    }
}
