// Path Tracker Library
// GPS session recording: filtering, live state, session engine, storage

pub mod capability;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod feeds;
pub mod format;
pub mod geo_math;
pub mod handoff;
pub mod history;
pub mod live_status;
pub mod logging;
pub mod observable;
pub mod persistence;
pub mod point_filter;
pub mod sensors;
pub mod service;
pub mod static_map;
pub mod summary;
pub mod tracking_store;
pub mod types;

pub use config::TrackerConfig;
pub use engine::{EngineState, SessionEngine};
pub use error::{TrackerError, TrackerResult};
pub use feeds::{Clock, LocationProvider, StepCounter};
pub use persistence::{SessionRepository, SqliteSessionRepository};
pub use service::{EngineCommand, ServiceEvent, ServiceHandle, TrackingService};
pub use summary::{SaveOutcome, SummaryDraft};
pub use tracking_store::TrackingStore;
pub use types::{LocationSample, SessionPoint, TrackingSession, TrackingState};
