//! Tracker configuration.
//!
//! Every field has a default matching the behaviour of the mobile app, so an
//! empty JSON object (or no file at all) is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{TrackerError, TrackerResult};

pub const MAPS_API_KEY_ENV: &str = "MAPS_API_KEY";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub filter: FilterConfig,
    pub location: LocationRequestConfig,
    /// Period of the elapsed-time tick
    pub tick_interval_ms: u64,
    /// Register the step counter feed when the device has one
    pub step_counter_enabled: bool,
    pub database_path: String,
    pub map: MapConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Samples with a known accuracy radius above this are dropped
    pub max_accuracy_meters: f64,
    /// Deltas at or above this never count toward distance
    pub max_jump_meters: f64,
    /// Minimum spacing between kept polyline vertices
    pub min_vertex_spacing_meters: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationPriority {
    HighAccuracy,
    BalancedPowerAccuracy,
    LowPower,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationRequestConfig {
    pub priority: LocationPriority,
    pub interval_ms: u64,
    pub min_update_interval_ms: u64,
    pub min_update_distance_meters: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    pub base_url: String,
    pub width: u32,
    pub height: u32,
    /// Falls back to the `MAPS_API_KEY` environment variable when empty
    pub api_key: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            filter: FilterConfig::default(),
            location: LocationRequestConfig::default(),
            tick_interval_ms: 1000,
            step_counter_enabled: true,
            database_path: "path_tracker.db".to_string(),
            map: MapConfig::default(),
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            max_accuracy_meters: 80.0,
            max_jump_meters: 1000.0,
            min_vertex_spacing_meters: 3.0,
        }
    }
}

impl Default for LocationRequestConfig {
    fn default() -> Self {
        Self {
            priority: LocationPriority::HighAccuracy,
            interval_ms: 2000,
            min_update_interval_ms: 1000,
            min_update_distance_meters: 1.0,
        }
    }
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            base_url: "https://maps.googleapis.com/maps/api/staticmap".to_string(),
            width: 600,
            height: 600,
            api_key: String::new(),
        }
    }
}

impl MapConfig {
    pub fn resolved_api_key(&self) -> String {
        if !self.api_key.is_empty() {
            return self.api_key.clone();
        }
        std::env::var(MAPS_API_KEY_ENV).unwrap_or_default()
    }
}

impl TrackerConfig {
    pub fn from_json_str(json: &str) -> TrackerResult<Self> {
        let config: TrackerConfig =
            serde_json::from_str(json).map_err(|e| TrackerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> TrackerResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            TrackerError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    /// Default config, or the file's contents when a path is given.
    pub fn load(path: Option<&Path>) -> TrackerResult<Self> {
        match path {
            Some(path) => Self::from_json_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> TrackerResult<()> {
        let f = &self.filter;
        if !(f.max_accuracy_meters > 0.0) {
            return Err(TrackerError::Config(
                "filter.max_accuracy_meters must be positive".to_string(),
            ));
        }
        if !(f.max_jump_meters > 0.0) {
            return Err(TrackerError::Config(
                "filter.max_jump_meters must be positive".to_string(),
            ));
        }
        if !(f.min_vertex_spacing_meters >= 0.0) {
            return Err(TrackerError::Config(
                "filter.min_vertex_spacing_meters must not be negative".to_string(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(TrackerError::Config(
                "tick_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.location.min_update_interval_ms > self.location.interval_ms {
            return Err(TrackerError::Config(
                "location.min_update_interval_ms must not exceed location.interval_ms".to_string(),
            ));
        }
        if self.map.width == 0 || self.map.height == 0 {
            return Err(TrackerError::Config("map size must be non-zero".to_string()));
        }
        Ok(())
    }
}
