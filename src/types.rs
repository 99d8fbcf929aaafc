use geo::Point;
use serde::{Deserialize, Serialize};

use crate::geo_math;

/// A retained polyline vertex.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp_millis: i64,
}

impl SessionPoint {
    pub fn new(latitude: f64, longitude: f64, timestamp_millis: i64) -> Self {
        Self {
            latitude,
            longitude,
            timestamp_millis,
        }
    }

    /// `geo` points are (x, y) = (lon, lat)
    pub fn position(&self) -> Point<f64> {
        Point::new(self.longitude, self.latitude)
    }

    /// Range check; NaN fails every comparison so it is rejected too.
    pub fn has_valid_coordinates(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Raw location fix as delivered by a location provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp_millis: i64,
    /// Horizontal accuracy radius in meters, `None` when the provider has no estimate
    #[serde(default)]
    pub accuracy_meters: Option<f64>,
    /// Instantaneous speed in m/s, `None` when unavailable
    #[serde(default)]
    pub speed_mps: Option<f64>,
}

impl LocationSample {
    pub fn new(latitude: f64, longitude: f64, timestamp_millis: i64) -> Self {
        Self {
            latitude,
            longitude,
            timestamp_millis,
            accuracy_meters: None,
            speed_mps: None,
        }
    }

    pub fn with_accuracy(mut self, accuracy_meters: f64) -> Self {
        self.accuracy_meters = Some(accuracy_meters);
        self
    }

    pub fn with_speed(mut self, speed_mps: f64) -> Self {
        self.speed_mps = Some(speed_mps);
        self
    }

    pub fn position(&self) -> Point<f64> {
        Point::new(self.longitude, self.latitude)
    }

    pub fn to_session_point(&self) -> SessionPoint {
        SessionPoint::new(self.latitude, self.longitude, self.timestamp_millis)
    }
}

/// Running aggregate of the in-progress session.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackingState {
    pub elapsed_time_seconds: u64,
    pub distance_meters: f64,
    pub current_speed_kmh: f64,
    pub steps: u64,
    pub path_points: Vec<SessionPoint>,
}

/// Completed session, either a fresh summary (empty id/title) or a stored record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingSession {
    pub id: String,
    pub title: String,
    pub start_time_millis: i64,
    pub duration_seconds: u64,
    pub distance_meters: f64,
    pub average_speed_kmh: f64,
    pub steps: u64,
    pub points: Vec<SessionPoint>,
}

impl TrackingSession {
    /// Summary of a stopped session. Id and title are filled in later.
    pub fn from_final_state(start_time_millis: i64, state: TrackingState) -> Self {
        let average_speed_kmh =
            geo_math::average_speed_kmh(state.distance_meters, state.elapsed_time_seconds);

        Self {
            id: String::new(),
            title: String::new(),
            start_time_millis,
            duration_seconds: state.elapsed_time_seconds,
            distance_meters: state.distance_meters,
            average_speed_kmh,
            steps: state.steps,
            points: state.path_points,
        }
    }

    pub fn with_title(&self, title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..self.clone()
        }
    }

    pub fn with_id(&self, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..self.clone()
        }
    }

    pub fn is_persisted(&self) -> bool {
        !self.id.is_empty()
    }
}
