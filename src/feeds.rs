//! Seams between the engine and the device: location fixes, step counter,
//! wall clock.

use futures::stream::BoxStream;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use crate::config::{LocationPriority, LocationRequestConfig};
use crate::error::TrackerResult;
use crate::types::LocationSample;

pub type LocationStream = BoxStream<'static, LocationSample>;
/// Cumulative step counts since device boot
pub type StepStream = BoxStream<'static, u64>;

#[derive(Clone, Debug, PartialEq)]
pub struct LocationRequest {
    pub priority: LocationPriority,
    pub interval: Duration,
    pub min_update_interval: Duration,
    pub min_update_distance_meters: f64,
}

impl From<&LocationRequestConfig> for LocationRequest {
    fn from(config: &LocationRequestConfig) -> Self {
        LocationRequest {
            priority: config.priority,
            interval: Duration::from_millis(config.interval_ms),
            min_update_interval: Duration::from_millis(config.min_update_interval_ms),
            min_update_distance_meters: config.min_update_distance_meters,
        }
    }
}

impl Default for LocationRequest {
    fn default() -> Self {
        Self::from(&LocationRequestConfig::default())
    }
}

pub trait LocationProvider: Send + Sync {
    /// Begin delivering fixes. Dropping the stream unsubscribes.
    fn location_updates(&self, request: &LocationRequest) -> TrackerResult<LocationStream>;
}

pub trait StepCounter: Send + Sync {
    /// `None` when the device has no step counter sensor.
    fn step_updates(&self) -> Option<StepStream>;
}

pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Clock driven by the caller; used for replays and tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(start_millis),
        }
    }

    pub fn set(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Device without a step counter.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoStepCounter;

impl StepCounter for NoStepCounter {
    fn step_updates(&self) -> Option<StepStream> {
        None
    }
}
