//! Noise rejection for raw location samples.
//!
//! Fixes outside the coordinate range (or NaN) are dropped first. Then
//! three independent gates:
//! - accuracy: drop samples whose reported radius is too large
//! - jump: keep implausible deltas out of the cumulative distance
//! - spacing: limit polyline density
//!
//! The filter holds no state. The caller owns the previous accepted sample
//! and the last kept vertex.

use crate::config::FilterConfig;
use crate::geo_math;
use crate::types::{LocationSample, SessionPoint};

/// Outcome of running an accuracy-accepted sample through the jump gate.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleAssessment {
    /// Distance from the previous accepted sample, 0 for the first one
    pub delta_meters: f64,
    /// What to add to the cumulative distance (0 when the jump gate trips)
    pub distance_increment_meters: f64,
    pub speed_kmh: f64,
    pub point: SessionPoint,
}

impl SampleAssessment {
    pub fn is_jump(&self) -> bool {
        self.delta_meters > 0.0 && self.distance_increment_meters == 0.0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PointFilter {
    config: FilterConfig,
}

impl PointFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Unknown accuracy passes.
    pub fn accepts_accuracy(&self, accuracy_meters: Option<f64>) -> bool {
        match accuracy_meters {
            Some(accuracy) => accuracy <= self.config.max_accuracy_meters,
            None => true,
        }
    }

    pub fn counts_toward_distance(&self, delta_meters: f64) -> bool {
        delta_meters < self.config.max_jump_meters
    }

    /// `None` means there is no previous vertex, which always keeps the point.
    pub fn keeps_spacing(&self, distance_from_last_vertex: Option<f64>) -> bool {
        match distance_from_last_vertex {
            Some(distance) => distance >= self.config.min_vertex_spacing_meters,
            None => true,
        }
    }

    pub fn keeps_vertex(&self, last_vertex: Option<&SessionPoint>, candidate: &SessionPoint) -> bool {
        let distance = last_vertex
            .map(|last| geo_math::distance_meters(last.position(), candidate.position()));
        self.keeps_spacing(distance)
    }

    /// Accuracy gate plus jump gate. Returns `None` for samples that must be
    /// ignored entirely.
    pub fn assess(
        &self,
        previous_accepted: Option<&LocationSample>,
        sample: &LocationSample,
    ) -> Option<SampleAssessment> {
        let point = sample.to_session_point();
        if !point.has_valid_coordinates() || !self.accepts_accuracy(sample.accuracy_meters) {
            return None;
        }

        let delta_meters = previous_accepted
            .map(|prev| geo_math::distance_meters(prev.position(), sample.position()))
            .unwrap_or(0.0);

        let distance_increment_meters = if self.counts_toward_distance(delta_meters) {
            delta_meters
        } else {
            0.0
        };

        Some(SampleAssessment {
            delta_meters,
            distance_increment_meters,
            speed_kmh: geo_math::speed_kmh(sample.speed_mps),
            point,
        })
    }
}

impl Default for PointFilter {
    fn default() -> Self {
        Self::new(FilterConfig::default())
    }
}

/// Point `meters` due north of `origin`, found by bisection on the same
/// distance function the filter uses.
#[cfg(test)]
pub(crate) fn point_north_of(origin: &LocationSample, meters: f64) -> (f64, f64) {
    let mut low = 0.0_f64;
    let mut high = 1.0_f64;
    for _ in 0..200 {
        let mid = (low + high) / 2.0;
        let candidate = geo::Point::new(origin.longitude, origin.latitude + mid);
        if geo_math::distance_meters(origin.position(), candidate) < meters {
            low = mid;
        } else {
            high = mid;
        }
    }
    (origin.latitude + high, origin.longitude)
}
