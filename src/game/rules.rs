//! Match tunables and the per-match immutable configuration

use std::sync::Arc;
use std::time::Duration;

use super::geometry::{Navmesh, Vector};
use super::map::{MapData, MapError, TaskSpot};

/// Player colours, one per seat
pub const COLORS: [&str; 10] = [
    "#D71E22", "#1D3CE9", "#1B913E", "#FF63D4", "#FF8D1C", "#FFFF67", "#4A565E", "#E9F7FF",
    "#783DD2", "#80582D",
];

/// Gameplay constants shared by every match
#[derive(Debug, Clone)]
pub struct MatchRules {
    /// Players needed to start (and the hard cap)
    pub players_per_match: usize,
    /// Adversaries chosen at start
    pub adversaries_per_match: usize,
    /// World units per second
    pub move_speed: f64,
    /// Slack added to every movement bound
    pub move_allowance: f64,
    /// Extra reach granted to a kill
    pub kill_range: f64,
    /// Max distance between a player and a task they interact with
    pub task_range: f64,
    /// Minimum time between claiming and completing a task
    pub task_dwell: Duration,
    /// Centre of the spawn circle
    pub start_center: Vector,
    /// Radius of the spawn circle
    pub start_radius: f64,
    /// Snapshot broadcasts per second
    pub tick_rate: u32,
    pub colors: Vec<String>,
}

impl Default for MatchRules {
    fn default() -> Self {
        Self {
            players_per_match: 10,
            adversaries_per_match: 2,
            move_speed: 200.0,
            move_allowance: 0.1,
            kill_range: 30.0,
            task_range: 30.0,
            task_dwell: Duration::from_secs(5),
            start_center: Vector::new(818.0, 294.0),
            start_radius: 70.0,
            tick_rate: 20,
            colors: COLORS.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl MatchRules {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.tick_rate.max(1)))
    }
}

/// Everything a match needs that never changes: rules, navmesh and task layout.
///
/// Built once at startup and shared by every match through an `Arc`.
#[derive(Debug)]
pub struct MatchConfig {
    pub rules: MatchRules,
    pub navmesh: Navmesh,
    pub tasks: Vec<TaskSpot>,
}

impl MatchConfig {
    /// Validate the map against the rules and freeze the result
    pub fn new(rules: MatchRules, map: MapData) -> Result<Arc<Self>, MapError> {
        if rules.colors.len() < rules.players_per_match {
            return Err(MapError::Invalid(format!(
                "{} colours for {} players",
                rules.colors.len(),
                rules.players_per_match
            )));
        }
        if rules.adversaries_per_match == 0 || rules.adversaries_per_match >= rules.players_per_match {
            return Err(MapError::Invalid(format!(
                "{} adversaries for {} players",
                rules.adversaries_per_match, rules.players_per_match
            )));
        }

        let (navmesh, tasks) = map.into_navmesh()?;
        for task in &tasks {
            if !navmesh.contains(task.location) {
                return Err(MapError::Invalid(format!(
                    "task {} at ({}, {}) is not walkable",
                    task.id, task.location.x, task.location.y
                )));
            }
        }

        Ok(Arc::new(Self {
            rules,
            navmesh,
            tasks,
        }))
    }
}
