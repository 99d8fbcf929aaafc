use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::json;

use path_tracker::engine::{LocationProcessor, StepBaseline};
use path_tracker::format::{format_distance, format_duration};
use path_tracker::logging;
use path_tracker::point_filter::PointFilter;
use path_tracker::sensors::ReplayLog;
use path_tracker::static_map;
use path_tracker::summary::PENDING_SUMMARY_FILE;
use path_tracker::{
    SaveOutcome, SqliteSessionRepository, SummaryDraft, TrackerConfig, TrackerError,
    TrackingSession, TrackingStore,
};

#[derive(Parser, Debug)]
struct Args {
    /// Path to a feed log (.json or .json.gz)
    #[arg(long, conflicts_with = "log_dir")]
    log: Option<PathBuf>,

    /// Directory of feed logs to batch replay
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// JSON config file (filter thresholds)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Accuracy gate override (meters)
    #[arg(long)]
    max_accuracy: Option<f64>,

    /// Jump gate override (meters)
    #[arg(long)]
    max_jump: Option<f64>,

    /// Vertex spacing override (meters)
    #[arg(long)]
    min_spacing: Option<f64>,

    /// Store each replayed session under this title
    #[arg(long)]
    save_as: Option<String>,

    /// Session database for --save-as (overrides config)
    #[arg(long)]
    db: Option<String>,

    /// Where summaries that could not be saved are written
    #[arg(long, default_value = ".")]
    pending_dir: PathBuf,

    /// Print machine-readable results
    #[arg(long, default_value_t = false)]
    json: bool,
}

enum Event<'a> {
    Location(&'a path_tracker::LocationSample),
    Steps(u64),
}

/// Run a recorded log through the same filter and step logic the engine
/// uses, with elapsed time taken from the log's own timestamps.
fn replay(log: &ReplayLog, config: &TrackerConfig) -> Result<TrackingSession> {
    let start = log.first_timestamp().context("log contains no readings")?;

    let mut timeline: Vec<(i64, Event)> = log
        .locations
        .iter()
        .map(|s| (s.timestamp_millis, Event::Location(s)))
        .chain(
            log.steps
                .iter()
                .map(|r| (r.timestamp_millis, Event::Steps(r.cumulative_steps))),
        )
        .collect();
    timeline.sort_by_key(|(ts, _)| *ts);

    let store = TrackingStore::new();
    store.start_tracking()?;

    let mut processor = LocationProcessor::new(PointFilter::new(config.filter.clone()));
    let mut baseline = StepBaseline::new();
    let mut dropped = 0usize;

    for (timestamp, event) in &timeline {
        let elapsed = ((timestamp - start).max(0) / 1000) as u64;
        store.update_state(|state| state.elapsed_time_seconds = elapsed)?;

        match event {
            Event::Location(sample) => {
                if !processor.process(&store, sample)? {
                    dropped += 1;
                }
            }
            Event::Steps(cumulative) if config.step_counter_enabled => {
                let steps = baseline.steps_since_start(*cumulative);
                store.update_state(|state| state.steps = steps)?;
            }
            Event::Steps(_) => {}
        }
    }

    let state = store.state()?;
    store.stop_tracking()?;
    log::info!("Dropped {} low-accuracy fixes", dropped);
    Ok(TrackingSession::from_final_state(start, state))
}

fn collect_logs(args: &Args) -> Result<Vec<PathBuf>> {
    if let Some(log) = &args.log {
        return Ok(vec![log.clone()]);
    }
    let Some(dir) = &args.log_dir else {
        bail!("pass --log or --log-dir");
    };
    let mut logs: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            name.ends_with(".json") || name.ends_with(".json.gz")
        })
        .collect();
    logs.sort();
    Ok(logs)
}

/// `<pending_dir>/<log stem>.pending_summary.json`
fn pending_path(pending_dir: &Path, log: &Path) -> PathBuf {
    let stem = log
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.trim_end_matches(".gz").trim_end_matches(".json"))
        .unwrap_or("replay");
    pending_dir.join(format!("{}.{}", stem, PENDING_SUMMARY_FILE))
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();

    let mut config = TrackerConfig::load(args.config.as_deref())?;
    if let Some(v) = args.max_accuracy {
        config.filter.max_accuracy_meters = v;
    }
    if let Some(v) = args.max_jump {
        config.filter.max_jump_meters = v;
    }
    if let Some(v) = args.min_spacing {
        config.filter.min_vertex_spacing_meters = v;
    }
    if let Some(db) = &args.db {
        config.database_path = db.clone();
    }
    config.validate()?;

    if matches!(&args.save_as, Some(title) if title.trim().is_empty()) {
        bail!("--save-as needs a non-blank title");
    }
    let repository = match &args.save_as {
        Some(_) => match SqliteSessionRepository::open(&config.database_path) {
            Ok(repository) => Some(repository),
            Err(e) => {
                log::warn!("Cannot open {}: {}", config.database_path, e);
                None
            }
        },
        None => None,
    };

    for path in collect_logs(&args)? {
        let log = ReplayLog::load(&path)?;
        let summary = replay(&log, &config)
            .with_context(|| format!("replaying {}", path.display()))?;

        if args.json {
            println!(
                "{}",
                json!({
                    "log": path.display().to_string(),
                    "fixes": log.locations.len(),
                    "duration_seconds": summary.duration_seconds,
                    "distance_meters": summary.distance_meters,
                    "average_speed_kmh": summary.average_speed_kmh,
                    "steps": summary.steps,
                    "vertices": summary.points.len(),
                    "map_url": static_map::static_map_url(&summary.points, &config.map),
                })
            );
        } else {
            println!("=== {} ===", path.display());
            println!("  Fixes: {} ({} vertices kept)", log.locations.len(), summary.points.len());
            println!("  Duration: {}", format_duration(summary.duration_seconds));
            println!("  Distance: {}", format_distance(summary.distance_meters));
            println!("  Average speed: {:.2} km/h", summary.average_speed_kmh);
            println!("  Steps: {}", summary.steps);
        }

        if let Some(title) = &args.save_as {
            let mut draft = SummaryDraft::new(summary);
            draft.set_title(title.clone());
            let saved = match &repository {
                Some(repository) => draft.save(repository).await,
                None => Err(TrackerError::Storage(format!(
                    "database {} unavailable",
                    config.database_path
                ))),
            };
            match saved {
                Ok(SaveOutcome::Saved { id }) => println!("  Saved as {}", id),
                Ok(SaveOutcome::TitleRequired) => bail!("--save-as needs a non-blank title"),
                Err(e) => {
                    let pending = pending_path(&args.pending_dir, &path);
                    draft
                        .write_pending(&pending)
                        .with_context(|| format!("saving failed ({}), keeping the summary failed too", e))?;
                    println!("  Not saved ({}), kept in {}", e, pending.display());
                }
            }
        }
    }

    Ok(())
}
