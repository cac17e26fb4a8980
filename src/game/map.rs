//! Map file loading

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use super::geometry::{Navmesh, Vector};

/// Map bundled into the binary, used when no `MAP_PATH` is configured
pub const DEFAULT_MAP: &str = include_str!("../../assets/map.json");

/// Raw map file contents
#[derive(Debug, Clone, Deserialize)]
pub struct MapData {
    /// World rectangle, from the origin to this corner
    pub bounds: Vector,
    /// Walkable rings as `[x, y]` pairs
    pub polygons: Vec<Vec<[f64; 2]>>,
    #[serde(default)]
    pub tasks: Vec<TaskSpot>,
}

/// A task station
#[derive(Debug, Clone, Deserialize)]
pub struct TaskSpot {
    pub id: String,
    #[serde(flatten)]
    pub location: Vector,
}

/// Fatal map problems, reported at startup
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("Failed to read map file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed map data: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Map has no usable polygons")]
    NoPolygons,

    #[error("Duplicate task id: {0}")]
    DuplicateTask(String),

    #[error("Invalid map: {0}")]
    Invalid(String),
}

impl MapData {
    pub fn from_json(json: &str) -> Result<Self, MapError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, MapError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn bundled() -> Result<Self, MapError> {
        Self::from_json(DEFAULT_MAP)
    }

    /// Build the navmesh and check the task list
    pub fn into_navmesh(self) -> Result<(Navmesh, Vec<TaskSpot>), MapError> {
        if !self.bounds.is_finite() || self.bounds.x <= 0.0 || self.bounds.y <= 0.0 {
            return Err(MapError::Invalid("bounds must be positive".to_string()));
        }

        let navmesh = Navmesh::build(self.bounds, &self.polygons);
        if navmesh.polygons().is_empty() {
            return Err(MapError::NoPolygons);
        }

        let mut seen = HashSet::new();
        for task in &self.tasks {
            if !seen.insert(task.id.as_str()) {
                return Err(MapError::DuplicateTask(task.id.clone()));
            }
        }

        Ok((navmesh, self.tasks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_map_loads() {
        let (navmesh, tasks) = MapData::bundled().unwrap().into_navmesh().unwrap();
        assert!(!navmesh.polygons().is_empty());
        assert_eq!(tasks.len(), 6);
        for task in &tasks {
            assert!(navmesh.contains(task.location), "task {} not walkable", task.id);
        }
    }

    #[test]
    fn malformed_json_is_fatal() {
        assert!(matches!(
            MapData::from_json("{\"bounds\": 3}"),
            Err(MapError::Parse(_))
        ));
    }

    #[test]
    fn map_without_usable_polygons_is_rejected() {
        let map = MapData::from_json(
            r#"{"bounds": {"x": 10, "y": 10}, "polygons": [[[0, 0], [1, 1]]]}"#,
        )
        .unwrap();
        assert!(matches!(map.into_navmesh(), Err(MapError::NoPolygons)));
    }

    #[test]
    fn duplicate_task_ids_are_rejected() {
        let map = MapData::from_json(
            r#"{
                "bounds": {"x": 10, "y": 10},
                "polygons": [[[0, 0], [10, 0], [10, 10], [0, 10]]],
                "tasks": [{"id": "a", "x": 1, "y": 1}, {"id": "a", "x": 2, "y": 2}]
            }"#,
        )
        .unwrap();
        assert!(matches!(map.into_navmesh(), Err(MapError::DuplicateTask(id)) if id == "a"));
    }
}
