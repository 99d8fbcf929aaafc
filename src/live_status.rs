use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::format;
use crate::types::TrackingState;

/// Snapshot of the in-progress session for external dashboards.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LiveStatus {
    pub timestamp: f64,
    pub running: bool,
    pub elapsed_seconds: u64,
    pub elapsed_display: String,
    pub distance_meters: f64,
    pub current_speed_kmh: f64,
    pub steps: u64,
    pub vertex_count: usize,
    // Last kept vertex
    pub last_lat: Option<f64>,
    pub last_lon: Option<f64>,
}

impl LiveStatus {
    pub fn new() -> Self {
        Self::from_state(&TrackingState::default(), false)
    }

    pub fn from_state(state: &TrackingState, running: bool) -> Self {
        let last = state.path_points.last();
        Self {
            timestamp: current_timestamp(),
            running,
            elapsed_seconds: state.elapsed_time_seconds,
            elapsed_display: format::format_duration(state.elapsed_time_seconds),
            distance_meters: state.distance_meters,
            current_speed_kmh: state.current_speed_kmh,
            steps: state.steps,
            vertex_count: state.path_points.len(),
            last_lat: last.map(|p| p.latitude),
            last_lon: last.map(|p| p.longitude),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

impl Default for LiveStatus {
    fn default() -> Self {
        Self::new()
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
