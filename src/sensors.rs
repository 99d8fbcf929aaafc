//! Concrete location and step feeds: channel-backed (embedding and tests),
//! simulated walk, recorded replay, and Termux:API readers.

use flate2::read::GzDecoder;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::f64::consts::PI;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Interval, MissedTickBehavior};

use crate::error::{lock_poisoned, TrackerError, TrackerResult};
use crate::feeds::{
    Clock, LocationProvider, LocationRequest, LocationStream, ManualClock, StepCounter, StepStream,
    SystemClock,
};
use crate::types::LocationSample;

const METERS_PER_DEGREE_LAT: f64 = 111_320.0;

fn receiver_stream<T: Send + 'static>(rx: mpsc::UnboundedReceiver<T>) -> stream::BoxStream<'static, T> {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
}

fn ticker(slot: &mut Option<Interval>, period: Duration) -> &mut Interval {
    slot.get_or_insert_with(|| {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    })
}

// ===== Channel-backed feeds =====

/// Location provider fed by the host application (or a test) through [`push`].
/// Each subscription gets its own channel; fixes pushed while nobody is
/// subscribed are dropped, like a real provider with no registered listener.
///
/// [`push`]: ChannelLocationProvider::push
#[derive(Default)]
pub struct ChannelLocationProvider {
    current: Mutex<Option<mpsc::UnboundedSender<LocationSample>>>,
    last_request: Mutex<Option<LocationRequest>>,
}

impl ChannelLocationProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when no subscription is active.
    pub fn push(&self, sample: LocationSample) -> bool {
        match self.current.lock() {
            Ok(guard) => guard
                .as_ref()
                .map(|tx| tx.send(sample).is_ok())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        match self.current.lock() {
            Ok(guard) => guard.as_ref().map(|tx| !tx.is_closed()).unwrap_or(false),
            Err(_) => false,
        }
    }

    pub fn last_request(&self) -> Option<LocationRequest> {
        self.last_request.lock().ok().and_then(|r| r.clone())
    }
}

impl LocationProvider for ChannelLocationProvider {
    fn location_updates(&self, request: &LocationRequest) -> TrackerResult<LocationStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self
            .current
            .lock()
            .map_err(|_| lock_poisoned("location provider"))? = Some(tx);
        *self
            .last_request
            .lock()
            .map_err(|_| lock_poisoned("location request"))? = Some(request.clone());
        Ok(receiver_stream(rx))
    }
}

/// Step counter fed through [`push`](ChannelStepCounter::push).
pub struct ChannelStepCounter {
    available: bool,
    current: Mutex<Option<mpsc::UnboundedSender<u64>>>,
}

impl ChannelStepCounter {
    pub fn new() -> Self {
        Self {
            available: true,
            current: Mutex::new(None),
        }
    }

    /// A device without the sensor.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            current: Mutex::new(None),
        }
    }

    pub fn push(&self, cumulative_steps: u64) -> bool {
        match self.current.lock() {
            Ok(guard) => guard
                .as_ref()
                .map(|tx| tx.send(cumulative_steps).is_ok())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        match self.current.lock() {
            Ok(guard) => guard.as_ref().map(|tx| !tx.is_closed()).unwrap_or(false),
            Err(_) => false,
        }
    }
}

impl Default for ChannelStepCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl StepCounter for ChannelStepCounter {
    fn step_updates(&self) -> Option<StepStream> {
        if !self.available {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let mut guard = match self.current.lock() {
            Ok(guard) => guard,
            Err(e) => {
                log::warn!("Step channel lock poisoned, no step updates: {}", e);
                return None;
            }
        };
        *guard = Some(tx);
        Some(receiver_stream(rx))
    }
}

// ===== Simulated walk =====

/// Synthetic walk for demos: steady pace with GPS jitter, plus an occasional
/// low-accuracy fix so the filter has something to reject.
#[derive(Clone, Debug)]
pub struct SimulatedLocationProvider {
    pub origin_latitude: f64,
    pub origin_longitude: f64,
    pub speed_mps: f64,
    /// Degrees clockwise from north
    pub heading_deg: f64,
    /// Every n-th fix is reported with a poor accuracy radius (0 = never)
    pub noisy_every: u64,
}

impl Default for SimulatedLocationProvider {
    fn default() -> Self {
        Self {
            origin_latitude: 37.7749,
            origin_longitude: -122.4194,
            speed_mps: 1.4,
            heading_deg: 45.0,
            noisy_every: 17,
        }
    }
}

impl SimulatedLocationProvider {
    fn sample_at(&self, seq: u64, elapsed_secs: f64) -> LocationSample {
        let t = seq as f64;
        let travelled = self.speed_mps * elapsed_secs;
        let heading = self.heading_deg.to_radians();
        let jitter_m = (t * 0.7).sin() * 1.5;

        let north = travelled * heading.cos() + jitter_m;
        let east = travelled * heading.sin() + (t * 0.3).cos() * 1.0;

        let latitude = self.origin_latitude + north / METERS_PER_DEGREE_LAT;
        let longitude = self.origin_longitude
            + east / (METERS_PER_DEGREE_LAT * self.origin_latitude.to_radians().cos());

        let accuracy = if self.noisy_every > 0 && seq > 0 && seq % self.noisy_every == 0 {
            120.0
        } else {
            5.0 + (t * 0.1).sin() * 2.0
        };

        LocationSample {
            latitude,
            longitude,
            timestamp_millis: SystemClock.now_millis(),
            accuracy_meters: Some(accuracy),
            speed_mps: Some((self.speed_mps + (t * 0.5).sin() * 0.3).max(0.0)),
        }
    }
}

impl LocationProvider for SimulatedLocationProvider {
    fn location_updates(&self, request: &LocationRequest) -> TrackerResult<LocationStream> {
        let walk = self.clone();
        let period = request.min_update_interval.max(Duration::from_millis(10));

        let stream = stream::unfold((None::<Interval>, 0u64), move |(mut slot, seq)| {
            let walk = walk.clone();
            async move {
                ticker(&mut slot, period).tick().await;
                let elapsed = seq as f64 * period.as_secs_f64();
                let sample = walk.sample_at(seq, elapsed);
                Some((sample, (slot, seq + 1)))
            }
        });
        Ok(stream.boxed())
    }
}

/// Cumulative counter starting from an arbitrary since-boot value.
#[derive(Clone, Debug)]
pub struct SimulatedStepCounter {
    pub boot_steps: u64,
    pub cadence_steps_per_sec: f64,
    pub period: Duration,
}

impl Default for SimulatedStepCounter {
    fn default() -> Self {
        Self {
            boot_steps: 12_000,
            cadence_steps_per_sec: 1.8,
            period: Duration::from_secs(1),
        }
    }
}

impl StepCounter for SimulatedStepCounter {
    fn step_updates(&self) -> Option<StepStream> {
        let config = self.clone();
        let stream = stream::unfold((None::<Interval>, 0u64), move |(mut slot, seq)| {
            let config = config.clone();
            async move {
                ticker(&mut slot, config.period).tick().await;
                let elapsed = seq as f64 * config.period.as_secs_f64();
                let t = seq as f64;
                let walked = (config.cadence_steps_per_sec * elapsed + (t * 0.9).sin()).max(0.0);
                Some((config.boot_steps + walked as u64, (slot, seq + 1)))
            }
        });
        Some(stream.boxed())
    }
}

// ===== Replay =====

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepReading {
    pub timestamp_millis: i64,
    pub cumulative_steps: u64,
}

/// Recorded feed log: `{"locations": [...], "steps": [...]}`, plain or gzipped.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayLog {
    #[serde(default)]
    pub locations: Vec<LocationSample>,
    #[serde(default)]
    pub steps: Vec<StepReading>,
}

impl ReplayLog {
    pub fn load(path: impl AsRef<Path>) -> TrackerResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            TrackerError::Feed(format!("Failed to open {}: {}", path.display(), e))
        })?;

        let mut reader: Box<dyn Read> = if path.extension().map_or(false, |ext| ext == "gz") {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(BufReader::new(file))
        };

        let mut json = String::new();
        reader
            .read_to_string(&mut json)
            .map_err(|e| TrackerError::Feed(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> TrackerResult<Self> {
        let mut log: ReplayLog =
            serde_json::from_str(json).map_err(|e| TrackerError::Feed(e.to_string()))?;
        log.locations.sort_by_key(|s| s.timestamp_millis);
        log.steps.sort_by_key(|s| s.timestamp_millis);
        Ok(log)
    }

    pub fn first_timestamp(&self) -> Option<i64> {
        let loc = self.locations.first().map(|s| s.timestamp_millis);
        let step = self.steps.first().map(|s| s.timestamp_millis);
        match (loc, step) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        let loc = self.locations.last().map(|s| s.timestamp_millis);
        let step = self.steps.last().map(|s| s.timestamp_millis);
        match (loc, step) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Pacing for replayed feeds.
#[derive(Clone, Debug)]
pub struct ReplayPacing {
    /// 1.0 = real time, 10.0 = ten times faster; `None` replays without delays
    pub speedup: Option<f64>,
    /// Advanced to each sample's timestamp as it is emitted
    pub clock: Option<Arc<ManualClock>>,
}

impl ReplayPacing {
    pub fn immediate() -> Self {
        Self {
            speedup: None,
            clock: None,
        }
    }

    fn delay(&self, gap_millis: i64) -> Option<Duration> {
        let speedup = self.speedup?;
        if gap_millis <= 0 || speedup <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(gap_millis as f64 / 1000.0 / speedup))
    }
}

fn replay_stream<T, F>(items: Vec<T>, timestamp: F, pacing: ReplayPacing) -> stream::BoxStream<'static, T>
where
    T: Send + 'static,
    F: Fn(&T) -> i64 + Send + Sync + 'static,
{
    let timestamp = Arc::new(timestamp);
    stream::unfold(
        (items.into_iter(), None::<i64>),
        move |(mut iter, previous)| {
            let pacing = pacing.clone();
            let timestamp = Arc::clone(&timestamp);
            async move {
                let item = iter.next()?;
                let ts = timestamp(&item);
                if let Some(delay) = previous.and_then(|prev| pacing.delay(ts - prev)) {
                    sleep(delay).await;
                } else {
                    tokio::task::yield_now().await;
                }
                if let Some(clock) = &pacing.clock {
                    clock.set(ts);
                }
                Some((item, (iter, Some(ts))))
            }
        },
    )
    .boxed()
}

pub struct ReplayLocationProvider {
    samples: Vec<LocationSample>,
    pacing: ReplayPacing,
}

impl ReplayLocationProvider {
    pub fn new(samples: Vec<LocationSample>, pacing: ReplayPacing) -> Self {
        Self { samples, pacing }
    }
}

impl LocationProvider for ReplayLocationProvider {
    fn location_updates(&self, _request: &LocationRequest) -> TrackerResult<LocationStream> {
        Ok(replay_stream(
            self.samples.clone(),
            |s: &LocationSample| s.timestamp_millis,
            self.pacing.clone(),
        ))
    }
}

pub struct ReplayStepCounter {
    readings: Vec<StepReading>,
    pacing: ReplayPacing,
}

impl ReplayStepCounter {
    pub fn new(readings: Vec<StepReading>, pacing: ReplayPacing) -> Self {
        Self { readings, pacing }
    }
}

impl StepCounter for ReplayStepCounter {
    fn step_updates(&self) -> Option<StepStream> {
        if self.readings.is_empty() {
            return None;
        }
        let stream = replay_stream(
            self.readings.clone(),
            |r: &StepReading| r.timestamp_millis,
            self.pacing.clone(),
        )
        .map(|r| r.cumulative_steps);
        Some(stream.boxed())
    }
}

// ===== Termux:API =====

/// Polls `termux-location` at the requested interval.
#[derive(Clone, Copy, Debug, Default)]
pub struct TermuxLocationProvider;

impl LocationProvider for TermuxLocationProvider {
    fn location_updates(&self, request: &LocationRequest) -> TrackerResult<LocationStream> {
        let period = request.min_update_interval.max(Duration::from_secs(1));
        let stream = stream::unfold(None::<Interval>, move |mut slot| async move {
            loop {
                ticker(&mut slot, period).tick().await;
                match tokio::task::spawn_blocking(read_termux_location).await {
                    Ok(Some(sample)) => return Some((sample, slot)),
                    Ok(None) => continue,
                    Err(e) => {
                        log::warn!("termux-location reader failed: {}", e);
                        return None;
                    }
                }
            }
        });
        Ok(stream.boxed())
    }
}

/// Polls `termux-sensor` for the step counter. Probes once on construction.
#[derive(Clone, Copy, Debug)]
pub struct TermuxStepCounter {
    available: bool,
    period: Duration,
}

impl TermuxStepCounter {
    pub fn detect() -> Self {
        let available = read_termux_step_count().is_some();
        if !available {
            log::info!("No step counter reported by termux-sensor");
        }
        Self {
            available,
            period: Duration::from_secs(1),
        }
    }
}

impl StepCounter for TermuxStepCounter {
    fn step_updates(&self) -> Option<StepStream> {
        if !self.available {
            return None;
        }
        let period = self.period;
        let stream = stream::unfold(None::<Interval>, move |mut slot| async move {
            loop {
                ticker(&mut slot, period).tick().await;
                match tokio::task::spawn_blocking(read_termux_step_count).await {
                    Ok(Some(steps)) => return Some((steps, slot)),
                    Ok(None) => continue,
                    Err(_) => return None,
                }
            }
        });
        Some(stream.boxed())
    }
}

fn read_termux_location() -> Option<LocationSample> {
    let output = Command::new("termux-location")
        .arg("-p")
        .arg("gps")
        .arg("-r")
        .arg("once")
        .output()
        .ok()?;
    let text = String::from_utf8_lossy(&output.stdout);
    parse_termux_location(&text, SystemClock.now_millis())
}

fn read_termux_step_count() -> Option<u64> {
    let output = Command::new("termux-sensor")
        .arg("-s")
        .arg("step_counter")
        .arg("-n")
        .arg("1")
        .output()
        .ok()?;
    let text = String::from_utf8_lossy(&output.stdout);
    parse_termux_step_count(&text)
}

/// `termux-location` prints one JSON object:
/// `{"latitude": .., "longitude": .., "accuracy": .., "speed": .., "elapsedMs": ..}`
pub fn parse_termux_location(output: &str, now_millis: i64) -> Option<LocationSample> {
    let value: Value = serde_json::from_str(output.trim()).ok()?;
    let latitude = value.get("latitude")?.as_f64()?;
    let longitude = value.get("longitude")?.as_f64()?;

    // elapsedMs is the age of the fix
    let age = value.get("elapsedMs").and_then(Value::as_i64).unwrap_or(0);

    Some(LocationSample {
        latitude,
        longitude,
        timestamp_millis: now_millis - age.max(0),
        accuracy_meters: value.get("accuracy").and_then(Value::as_f64),
        speed_mps: value.get("speed").and_then(Value::as_f64),
    })
}

/// `termux-sensor` prints `{"<sensor name>": {"values": [count]}}`.
pub fn parse_termux_step_count(output: &str) -> Option<u64> {
    let value: Value = serde_json::from_str(output.trim()).ok()?;
    value
        .as_object()?
        .values()
        .find_map(|sensor| sensor.get("values")?.as_array()?.first()?.as_f64())
        .filter(|count| *count >= 0.0)
        .map(|count| count as u64)
}

/// Bearing-free helper for building fixtures: meters east/north of an origin.
pub fn offset_position(latitude: f64, longitude: f64, north_m: f64, east_m: f64) -> (f64, f64) {
    let lat = latitude + north_m / METERS_PER_DEGREE_LAT;
    let lon = longitude + east_m / (METERS_PER_DEGREE_LAT * (latitude * PI / 180.0).cos());
    (lat, lon)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_parse_termux_location() {
        let json = r#"{
            "latitude": 40.4168,
            "longitude": -3.7038,
            "altitude": 650.0,
            "accuracy": 12.5,
            "vertical_accuracy": 3.0,
            "bearing": 90.0,
            "speed": 1.2,
            "elapsedMs": 40,
            "provider": "gps"
        }"#;
        let sample = parse_termux_location(json, 10_000).unwrap();
        assert_eq!(sample.latitude, 40.4168);
        assert_eq!(sample.longitude, -3.7038);
        assert_eq!(sample.accuracy_meters, Some(12.5));
        assert_eq!(sample.speed_mps, Some(1.2));
        assert_eq!(sample.timestamp_millis, 9_960);
    }

    #[test]
    fn test_parse_termux_location_missing_fields() {
        let sample = parse_termux_location(r#"{"latitude": 1.0, "longitude": 2.0}"#, 5).unwrap();
        assert_eq!(sample.accuracy_meters, None);
        assert_eq!(sample.speed_mps, None);
        assert!(parse_termux_location(r#"{"latitude": 1.0}"#, 5).is_none());
        assert!(parse_termux_location("", 5).is_none());
    }

    #[test]
    fn test_parse_termux_step_count() {
        let json = r#"{"LSM6DSO Step Counter": {"values": [1502.0]}}"#;
        assert_eq!(parse_termux_step_count(json), Some(1502));
        assert_eq!(parse_termux_step_count("{}"), None);
        assert_eq!(parse_termux_step_count("garbage"), None);
    }

    #[test]
    fn test_replay_log_sorted_on_load() {
        let json = r#"{
            "locations": [
                {"latitude": 1.0, "longitude": 1.0, "timestamp_millis": 2000},
                {"latitude": 0.0, "longitude": 0.0, "timestamp_millis": 1000, "accuracy_meters": 4.0}
            ],
            "steps": [{"timestamp_millis": 500, "cumulative_steps": 10}]
        }"#;
        let log = ReplayLog::from_json(json).unwrap();
        assert_eq!(log.locations[0].timestamp_millis, 1000);
        assert_eq!(log.locations[0].accuracy_meters, Some(4.0));
        assert_eq!(log.first_timestamp(), Some(500));
        assert_eq!(log.last_timestamp(), Some(2000));
    }

    #[test]
    fn test_replay_log_gzip() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("walk.json.gz");
        let log = ReplayLog {
            locations: vec![LocationSample::new(1.0, 2.0, 3)],
            steps: vec![],
        };
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder
            .write_all(serde_json::to_string(&log).unwrap().as_bytes())
            .unwrap();
        encoder.finish().unwrap();

        assert_eq!(ReplayLog::load(&path).unwrap(), log);
    }

    #[tokio::test]
    async fn test_replay_provider_drives_clock() {
        let clock = Arc::new(ManualClock::new(0));
        let provider = ReplayLocationProvider::new(
            vec![LocationSample::new(0.0, 0.0, 1_000), LocationSample::new(0.0, 0.0, 4_000)],
            ReplayPacing {
                speedup: None,
                clock: Some(Arc::clone(&clock)),
            },
        );

        let mut stream = provider.location_updates(&LocationRequest::default()).unwrap();
        assert_eq!(stream.next().await.unwrap().timestamp_millis, 1_000);
        assert_eq!(clock.now_millis(), 1_000);
        assert_eq!(stream.next().await.unwrap().timestamp_millis, 4_000);
        assert_eq!(clock.now_millis(), 4_000);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_channel_provider_subscription_lifecycle() {
        let provider = ChannelLocationProvider::new();
        assert!(!provider.push(LocationSample::new(0.0, 0.0, 0)));

        let mut stream = provider.location_updates(&LocationRequest::default()).unwrap();
        assert!(provider.is_subscribed());
        assert!(provider.push(LocationSample::new(1.0, 1.0, 1)));
        assert_eq!(stream.next().await.unwrap().latitude, 1.0);
        assert!(provider.last_request().is_some());

        drop(stream);
        assert!(!provider.is_subscribed());
        assert!(!provider.push(LocationSample::new(2.0, 2.0, 2)));
    }

    #[tokio::test]
    async fn test_unavailable_step_counter() {
        assert!(ChannelStepCounter::unavailable().step_updates().is_none());
        assert!(ReplayStepCounter::new(vec![], ReplayPacing::immediate())
            .step_updates()
            .is_none());
    }

    #[test]
    fn test_poisoned_step_channel_gives_no_updates() {
        let counter = Arc::new(ChannelStepCounter::new());
        let poisoner = Arc::clone(&counter);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.current.lock().unwrap();
            panic!("poison the step channel lock");
        })
        .join();

        assert!(counter.current.is_poisoned());
        assert!(counter.step_updates().is_none());
        assert!(!counter.push(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_walk_moves_and_flags_noise() {
        let provider = SimulatedLocationProvider {
            noisy_every: 3,
            ..SimulatedLocationProvider::default()
        };
        let samples: Vec<LocationSample> = provider
            .location_updates(&LocationRequest::default())
            .unwrap()
            .take(4)
            .collect()
            .await;

        assert_eq!(samples.len(), 4);
        assert_eq!(samples[3].accuracy_meters, Some(120.0));
        assert!(samples[2].latitude > samples[0].latitude);
    }

    #[test]
    fn test_offset_position() {
        let (lat, lon) = offset_position(0.0, 0.0, METERS_PER_DEGREE_LAT, 0.0);
        assert!((lat - 1.0).abs() < 1e-9);
        assert_eq!(lon, 0.0);
    }
}
