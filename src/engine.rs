//! Session engine: owns the feeds of one tracking session and turns raw
//! samples into writes on the [`TrackingStore`].

use futures::StreamExt;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::config::TrackerConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::feeds::{Clock, LocationProvider, LocationRequest, LocationStream, StepCounter, StepStream, SystemClock};
use crate::point_filter::PointFilter;
use crate::tracking_store::TrackingStore;
use crate::types::{LocationSample, TrackingSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
    Idle,
    Running,
}

/// Applies the filter gates to location samples and writes the survivors.
///
/// Holds the last accuracy-accepted sample, which is the reference for the
/// jump gate. The last kept vertex lives in the store and is read inside the
/// same mutation that appends the next one.
pub struct LocationProcessor {
    filter: PointFilter,
    last_accepted: Option<LocationSample>,
}

impl LocationProcessor {
    pub fn new(filter: PointFilter) -> Self {
        Self {
            filter,
            last_accepted: None,
        }
    }

    pub fn last_accepted(&self) -> Option<&LocationSample> {
        self.last_accepted.as_ref()
    }

    /// Returns false when the sample was dropped (bad coordinates or poor
    /// accuracy) or the store was not running.
    pub fn process(&mut self, store: &TrackingStore, sample: &LocationSample) -> TrackerResult<bool> {
        let Some(assessment) = self.filter.assess(self.last_accepted.as_ref(), sample) else {
            debug!(
                "Dropping fix at {} ({}, {}) with accuracy {:?} m",
                sample.timestamp_millis, sample.latitude, sample.longitude, sample.accuracy_meters
            );
            return Ok(false);
        };

        if assessment.is_jump() {
            debug!(
                "Jump of {:.1} m at {} not counted toward distance",
                assessment.delta_meters, sample.timestamp_millis
            );
        }

        self.last_accepted = Some(sample.clone());

        let filter = &self.filter;
        store.update_state(|state| {
            state.current_speed_kmh = assessment.speed_kmh;
            state.distance_meters += assessment.distance_increment_meters;
            if filter.keeps_vertex(state.path_points.last(), &assessment.point) {
                state.path_points.push(assessment.point);
            }
        })
    }
}

/// Converts cumulative since-boot counts into steps since session start.
#[derive(Debug, Default)]
pub struct StepBaseline {
    baseline: Option<u64>,
}

impl StepBaseline {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first reading becomes the baseline. A counter that went backwards
    /// (device reboot) reads as 0.
    pub fn steps_since_start(&mut self, cumulative_steps: u64) -> u64 {
        let baseline = *self.baseline.get_or_insert(cumulative_steps);
        cumulative_steps.saturating_sub(baseline)
    }
}

/// Runs one session at a time: `Idle -> Running -> Idle`.
pub struct SessionEngine {
    store: Arc<TrackingStore>,
    config: TrackerConfig,
    location: Arc<dyn LocationProvider>,
    steps: Arc<dyn StepCounter>,
    clock: Arc<dyn Clock>,
    state: EngineState,
    start_time_millis: i64,
    feeds: JoinSet<()>,
}

impl SessionEngine {
    pub fn new(
        store: Arc<TrackingStore>,
        config: TrackerConfig,
        location: Arc<dyn LocationProvider>,
        steps: Arc<dyn StepCounter>,
    ) -> Self {
        Self {
            store,
            config,
            location,
            steps,
            clock: Arc::new(SystemClock),
            state: EngineState::Idle,
            start_time_millis: 0,
            feeds: JoinSet::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == EngineState::Running
    }

    pub fn store(&self) -> &Arc<TrackingStore> {
        &self.store
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Wall-clock start of the current (or last) session
    pub fn start_time_millis(&self) -> i64 {
        self.start_time_millis
    }

    /// Idle -> Running. Must be called from within a tokio runtime.
    pub fn start(&mut self) -> TrackerResult<()> {
        match self.state {
            EngineState::Running => return Err(TrackerError::AlreadyRunning),
            EngineState::Idle => {}
        }

        self.start_time_millis = self.clock.now_millis();
        self.store.start_tracking()?;

        let request = LocationRequest::from(&self.config.location);
        let locations = match self.location.location_updates(&request) {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Location updates unavailable: {}", e);
                self.store.stop_tracking()?;
                return Err(e);
            }
        };

        let filter = PointFilter::new(self.config.filter.clone());
        self.feeds
            .spawn(run_location_feed(Arc::clone(&self.store), filter, locations));

        if self.config.step_counter_enabled {
            match self.steps.step_updates() {
                Some(steps) => {
                    self.feeds.spawn(run_step_feed(Arc::clone(&self.store), steps));
                }
                None => info!("No step counter on this device, steps stay at 0"),
            }
        }

        let period = Duration::from_millis(self.config.tick_interval_ms.max(1));
        self.feeds.spawn(run_tick_feed(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            self.start_time_millis,
            period,
        ));

        self.state = EngineState::Running;
        info!("Tracking session started at {}", self.start_time_millis);
        Ok(())
    }

    /// Running -> Idle. Cancels every feed, waits for them, then freezes the
    /// state into a summary with empty id and title.
    pub async fn stop(&mut self) -> TrackerResult<TrackingSession> {
        match self.state {
            EngineState::Idle => return Err(TrackerError::NotRunning),
            EngineState::Running => {}
        }

        self.cancel_feeds().await;
        self.state = EngineState::Idle;

        let final_state = self.store.state()?;
        self.store.stop_tracking()?;

        let summary = TrackingSession::from_final_state(self.start_time_millis, final_state);
        info!(
            "Tracking session stopped: {} s, {:.1} m, {} steps, {} points",
            summary.duration_seconds,
            summary.distance_meters,
            summary.steps,
            summary.points.len()
        );
        Ok(summary)
    }

    /// Tear down without producing a summary. Safe to call while idle.
    pub async fn shutdown(&mut self) -> TrackerResult<()> {
        if self.state == EngineState::Running {
            info!("Shutting down running session");
        }
        self.cancel_feeds().await;
        self.state = EngineState::Idle;
        self.store.stop_tracking()
    }

    async fn cancel_feeds(&mut self) {
        self.feeds.abort_all();
        while let Some(result) = self.feeds.join_next().await {
            if let Err(e) = result {
                if !e.is_cancelled() {
                    warn!("Feed task failed: {}", e);
                }
            }
        }
    }
}

impl Drop for SessionEngine {
    fn drop(&mut self) {
        if self.state == EngineState::Running {
            self.feeds.abort_all();
            if let Err(e) = self.store.stop_tracking() {
                warn!("Failed to clear running flag on drop: {}", e);
            }
        }
    }
}

async fn run_location_feed(store: Arc<TrackingStore>, filter: PointFilter, mut updates: LocationStream) {
    let mut processor = LocationProcessor::new(filter);
    while let Some(sample) = updates.next().await {
        if let Err(e) = processor.process(&store, &sample) {
            warn!("Failed to apply location sample: {}", e);
        }
    }
    warn!("Location feed ended");
}

async fn run_step_feed(store: Arc<TrackingStore>, mut updates: StepStream) {
    let mut baseline = StepBaseline::new();
    while let Some(cumulative) = updates.next().await {
        let steps = baseline.steps_since_start(cumulative);
        let result = store.update_state_if(|state| {
            if state.steps == steps {
                return false;
            }
            state.steps = steps;
            true
        });
        if let Err(e) = result {
            warn!("Failed to apply step count: {}", e);
        }
    }
    warn!("Step counter feed ended");
}

async fn run_tick_feed(store: Arc<TrackingStore>, clock: Arc<dyn Clock>, start_millis: i64, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let elapsed = ((clock.now_millis() - start_millis).max(0) / 1000) as u64;
        let result = store.update_state_if(|state| {
            if state.elapsed_time_seconds == elapsed {
                return false;
            }
            state.elapsed_time_seconds = elapsed;
            true
        });
        if let Err(e) = result {
            warn!("Failed to apply elapsed time: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds::{ManualClock, NoStepCounter};
    use crate::geo_math;
    use crate::point_filter::point_north_of;
    use crate::sensors::{ChannelLocationProvider, ChannelStepCounter};
    use crate::types::TrackingState;
    use approx::assert_relative_eq;

    struct Harness {
        engine: SessionEngine,
        store: Arc<TrackingStore>,
        location: Arc<ChannelLocationProvider>,
        steps: Arc<ChannelStepCounter>,
        clock: Arc<ManualClock>,
    }

    fn harness() -> Harness {
        let store = Arc::new(TrackingStore::new());
        let location = Arc::new(ChannelLocationProvider::new());
        let steps = Arc::new(ChannelStepCounter::new());
        let clock = Arc::new(ManualClock::new(0));
        let config = TrackerConfig {
            tick_interval_ms: 10,
            ..TrackerConfig::default()
        };
        let engine = SessionEngine::new(
            Arc::clone(&store),
            config,
            Arc::clone(&location) as Arc<dyn LocationProvider>,
            Arc::clone(&steps) as Arc<dyn StepCounter>,
        )
        .with_clock(Arc::clone(&clock) as Arc<dyn Clock>);

        Harness {
            engine,
            store,
            location,
            steps,
            clock,
        }
    }

    async fn wait_for<F>(store: &TrackingStore, predicate: F) -> TrackingState
    where
        F: Fn(&TrackingState) -> bool,
    {
        let mut states = store.subscribe_state().unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let state = states.recv().await.expect("store dropped");
                if predicate(&state) {
                    return state;
                }
            }
        })
        .await
        .expect("timed out waiting for state")
    }

    fn origin() -> LocationSample {
        LocationSample::new(48.8566, 2.3522, 1_000).with_accuracy(5.0)
    }

    fn north_of(from: &LocationSample, meters: f64, timestamp: i64) -> LocationSample {
        let (lat, lon) = point_north_of(from, meters);
        LocationSample::new(lat, lon, timestamp).with_accuracy(5.0)
    }

    #[test]
    fn test_step_baseline() {
        let mut baseline = StepBaseline::new();
        assert_eq!(baseline.steps_since_start(1500), 0);
        assert_eq!(baseline.steps_since_start(1502), 2);
        assert_eq!(baseline.steps_since_start(1510), 10);
        assert_eq!(baseline.steps_since_start(20), 0);
    }

    #[test]
    fn test_processor_ignores_samples_while_stopped() {
        let store = TrackingStore::new();
        let mut processor = LocationProcessor::new(PointFilter::default());
        assert!(!processor.process(&store, &origin()).unwrap());
        assert_eq!(store.state().unwrap(), TrackingState::default());
    }

    #[test]
    fn test_out_of_range_and_nan_fixes_change_nothing() {
        let store = TrackingStore::new();
        store.start_tracking().unwrap();
        let mut processor = LocationProcessor::new(PointFilter::default());

        let start = LocationSample::new(10.0, 10.0, 1_000);
        assert!(processor.process(&store, &start).unwrap());
        let before = store.state().unwrap();

        assert!(!processor.process(&store, &LocationSample::new(95.0, 10.0, 2_000)).unwrap());
        assert!(!processor.process(&store, &LocationSample::new(f64::NAN, 10.0, 3_000)).unwrap());
        assert_eq!(store.state().unwrap(), before);
        assert_eq!(processor.last_accepted(), Some(&start));

        // Movement after the bad fixes is still measured from the last good one
        let next = north_of(&start, 50.0, 4_000);
        assert!(processor.process(&store, &next).unwrap());
        let state = store.state().unwrap();
        assert_relative_eq!(state.distance_meters, 50.0, epsilon = 1e-3);
        assert_eq!(state.path_points.len(), 2);
        assert!(state.path_points.iter().all(|p| p.has_valid_coordinates()));
    }

    #[tokio::test]
    async fn test_start_and_stop_lifecycle() {
        let mut h = harness();
        assert_eq!(h.engine.state(), EngineState::Idle);
        assert_eq!(h.engine.stop().await.unwrap_err(), TrackerError::NotRunning);

        h.engine.start().unwrap();
        assert!(h.engine.is_running());
        assert!(h.store.is_running().unwrap());
        assert!(h.location.is_subscribed());
        assert_eq!(h.engine.start().unwrap_err(), TrackerError::AlreadyRunning);

        let summary = h.engine.stop().await.unwrap();
        assert!(summary.id.is_empty());
        assert!(summary.title.is_empty());
        assert!(!h.store.is_running().unwrap());
        assert!(!h.location.is_subscribed());
        assert!(!h.steps.is_subscribed());
    }

    #[tokio::test]
    async fn test_location_request_parameters() {
        let mut h = harness();
        h.engine.start().unwrap();
        let request = h.location.last_request().unwrap();
        assert_eq!(request.interval, Duration::from_secs(2));
        assert_eq!(request.min_update_interval, Duration::from_secs(1));
        assert_eq!(request.min_update_distance_meters, 1.0);
        h.engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_low_accuracy_sample_dropped_entirely() {
        let mut h = harness();
        h.engine.start().unwrap();

        let start = origin();
        h.location.push(start.clone());
        h.location
            .push(north_of(&start, 100.0, 2_000).with_accuracy(81.0).with_speed(9.0));
        h.location.push(north_of(&start, 50.0, 3_000).with_accuracy(79.0));
        h.location.push(north_of(&start, 60.0, 4_000));

        let state = wait_for(&h.store, |s| s.path_points.len() == 3).await;
        assert_relative_eq!(state.distance_meters, 60.0, epsilon = 1e-3);
        assert_eq!(state.current_speed_kmh, 0.0);

        h.engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_accuracy_is_processed() {
        let mut h = harness();
        h.engine.start().unwrap();

        h.location.push(LocationSample::new(10.0, 10.0, 1_000));
        let state = wait_for(&h.store, |s| s.path_points.len() == 1).await;
        assert_eq!(state.path_points[0].latitude, 10.0);

        h.engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_jump_updates_reference_but_not_distance() {
        let mut h = harness();
        h.engine.start().unwrap();

        let start = origin();
        let jumped = north_of(&start, 1500.0, 2_000).with_speed(10.0);
        let after = north_of(&jumped, 999.0, 3_000).with_speed(1.0);
        h.location.push(start);
        h.location.push(jumped);

        let state = wait_for(&h.store, |s| s.path_points.len() == 2).await;
        assert_eq!(state.distance_meters, 0.0);
        assert_relative_eq!(state.current_speed_kmh, 36.0);

        h.location.push(after);
        let state = wait_for(&h.store, |s| s.path_points.len() == 3).await;
        assert_relative_eq!(state.distance_meters, 999.0, epsilon = 1e-3);
        assert_relative_eq!(state.current_speed_kmh, 3.6);

        h.engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_spacing_measured_from_last_kept_vertex() {
        let mut h = harness();
        h.engine.start().unwrap();

        let start = origin();
        h.location.push(start.clone());
        h.location.push(north_of(&start, 2.9, 2_000));
        h.location.push(north_of(&start, 3.05, 3_000));

        let state = wait_for(&h.store, |s| s.path_points.len() == 2).await;
        assert_eq!(state.path_points[0].timestamp_millis, 1_000);
        assert_eq!(state.path_points[1].timestamp_millis, 3_000);
        // 2.9 m out, then 0.15 m further
        assert_relative_eq!(state.distance_meters, 3.05, epsilon = 1e-3);

        h.engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_steps_relative_to_first_reading() {
        let mut h = harness();
        let mut states = h.store.subscribe_state().unwrap();
        h.engine.start().unwrap();

        h.steps.push(1500);
        h.steps.push(1502);
        h.steps.push(1510);
        wait_for(&h.store, |s| s.steps == 10).await;
        let summary = h.engine.stop().await.unwrap();
        assert_eq!(summary.steps, 10);

        let mut seen: Vec<u64> = states.drain().iter().map(|s| s.steps).collect();
        seen.dedup();
        assert_eq!(seen, vec![0, 2, 10]);
    }

    #[tokio::test]
    async fn test_missing_step_counter_keeps_zero() {
        let store = Arc::new(TrackingStore::new());
        let location = Arc::new(ChannelLocationProvider::new());
        let mut engine = SessionEngine::new(
            Arc::clone(&store),
            TrackerConfig::default(),
            Arc::clone(&location) as Arc<dyn LocationProvider>,
            Arc::new(NoStepCounter),
        );
        engine.start().unwrap();
        location.push(origin());
        wait_for(&store, |s| s.path_points.len() == 1).await;

        let summary = engine.stop().await.unwrap();
        assert_eq!(summary.steps, 0);
    }

    #[tokio::test]
    async fn test_tick_writes_elapsed_seconds() {
        let mut h = harness();
        h.clock.set(10_000);
        h.engine.start().unwrap();
        assert_eq!(h.engine.start_time_millis(), 10_000);

        h.clock.set(15_500);
        wait_for(&h.store, |s| s.elapsed_time_seconds == 5).await;

        h.clock.set(10_000 + 1_800_000);
        wait_for(&h.store, |s| s.elapsed_time_seconds == 1800).await;

        let summary = h.engine.stop().await.unwrap();
        assert_eq!(summary.start_time_millis, 10_000);
        assert_eq!(summary.duration_seconds, 1800);
        assert_relative_eq!(
            summary.average_speed_kmh,
            geo_math::average_speed_kmh(summary.distance_meters, 1800)
        );
    }

    #[tokio::test]
    async fn test_summary_freezes_final_state() {
        let mut h = harness();
        h.engine.start().unwrap();

        let start = origin();
        h.location.push(start.clone());
        h.location.push(north_of(&start, 20.0, 2_000).with_speed(1.5));
        let live = wait_for(&h.store, |s| s.path_points.len() == 2).await;

        let summary = h.engine.stop().await.unwrap();
        assert_eq!(summary.points, live.path_points);
        assert_eq!(summary.distance_meters, live.distance_meters);

        // Store keeps the final values readable, and ignores late samples
        assert!(!h.location.push(north_of(&start, 40.0, 3_000)));
        assert_eq!(h.store.state().unwrap().path_points.len(), 2);
    }

    #[tokio::test]
    async fn test_restart_begins_from_zero() {
        let mut h = harness();
        h.engine.start().unwrap();
        h.location.push(origin());
        wait_for(&h.store, |s| s.path_points.len() == 1).await;
        h.engine.stop().await.unwrap();

        h.engine.start().unwrap();
        assert_eq!(h.store.state().unwrap().path_points.len(), 0);
        h.location.push(north_of(&origin(), 5_000.0, 9_000));
        let state = wait_for(&h.store, |s| s.path_points.len() == 1).await;
        // New session has no reference sample, so no jump and no distance
        assert_eq!(state.distance_meters, 0.0);
        h.engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_drop_while_running_cleans_up() {
        let h = harness();
        let Harness {
            mut engine,
            store,
            location,
            ..
        } = h;
        engine.start().unwrap();
        drop(engine);

        assert!(!store.is_running().unwrap());
        tokio::time::timeout(Duration::from_secs(5), async {
            while location.is_subscribed() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("location subscription leaked");
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let mut h = harness();
        h.engine.shutdown().await.unwrap();
        h.engine.start().unwrap();
        h.engine.shutdown().await.unwrap();
        assert!(!h.engine.is_running());
        assert!(!h.store.is_running().unwrap());
        assert!(!h.location.is_subscribed());
    }
}
