use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, Instant};

use path_tracker::feeds::{LocationProvider, StepCounter};
use path_tracker::format::{format_distance, format_duration};
use path_tracker::live_status::LiveStatus;
use path_tracker::logging;
use path_tracker::sensors::{
    ReplayLocationProvider, ReplayLog, ReplayPacing, ReplayStepCounter, SimulatedLocationProvider,
    SimulatedStepCounter, TermuxLocationProvider, TermuxStepCounter,
};
use path_tracker::summary::PENDING_SUMMARY_FILE;
use path_tracker::{
    SaveOutcome, ServiceEvent, SessionEngine, SqliteSessionRepository, SummaryDraft,
    TrackerConfig, TrackingService, TrackingStore,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Feed {
    /// Synthetic walk
    Simulated,
    /// termux-location / termux-sensor
    Termux,
    /// Recorded log, see --log
    Replay,
}

#[derive(Parser, Debug)]
#[command(name = "path_tracker")]
#[command(about = "Record a walk: filtered GPS path, distance, speed and steps", long_about = None)]
struct Args {
    /// Duration in seconds (0 = until Ctrl-C)
    #[arg(value_name = "SECONDS", default_value = "0")]
    duration: u64,

    /// Where location and step readings come from
    #[arg(long, value_enum, default_value = "simulated")]
    feed: Feed,

    /// Feed log for --feed replay (.json or .json.gz)
    #[arg(long, required_if_eq("feed", "replay"))]
    log: Option<PathBuf>,

    /// Replay speed multiplier for --feed replay
    #[arg(long, default_value = "1.0")]
    speedup: f64,

    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Session database (overrides config)
    #[arg(long)]
    db: Option<String>,

    /// Title for the saved session; prompted for when omitted
    #[arg(long)]
    title: Option<String>,

    /// Ignore the step counter
    #[arg(long)]
    no_steps: bool,

    /// Output directory for live_status.json
    #[arg(long, default_value = "path_tracker_sessions")]
    output_dir: String,
}

fn build_feeds(args: &Args) -> Result<(Arc<dyn LocationProvider>, Arc<dyn StepCounter>)> {
    let location: Arc<dyn LocationProvider>;
    let steps: Arc<dyn StepCounter>;
    match args.feed {
        Feed::Simulated => {
            location = Arc::new(SimulatedLocationProvider::default());
            steps = Arc::new(SimulatedStepCounter::default());
        }
        Feed::Termux => {
            location = Arc::new(TermuxLocationProvider);
            steps = Arc::new(TermuxStepCounter::detect());
        }
        Feed::Replay => {
            let path = args.log.as_ref().context("--feed replay needs --log")?;
            let log = ReplayLog::load(path)?;
            let pacing = ReplayPacing {
                speedup: Some(args.speedup),
                clock: None,
            };
            println!(
                "[{}] Replaying {} fixes, {} step readings from {}",
                ts_now(),
                log.locations.len(),
                log.steps.len(),
                path.display()
            );
            location = Arc::new(ReplayLocationProvider::new(log.locations, pacing.clone()));
            steps = Arc::new(ReplayStepCounter::new(log.steps, pacing));
        }
    }
    Ok((location, steps))
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<ServiceEvent>) -> Result<ServiceEvent> {
    events
        .recv()
        .await
        .context("tracking service exited unexpectedly")
}

type Input = Lines<BufReader<Stdin>>;

async fn prompt_title(input: &mut Input) -> Result<Option<String>> {
    loop {
        println!("Session title (empty line to retry, Ctrl-D to discard):");
        match input.next_line().await? {
            Some(line) if !line.trim().is_empty() => return Ok(Some(line.trim().to_string())),
            Some(_) => println!("A title is required to save the session."),
            None => return Ok(None),
        }
    }
}

async fn confirm_retry(input: &mut Input) -> Result<bool> {
    println!("Retry saving? [Y/n]");
    Ok(match input.next_line().await? {
        Some(line) => !line.trim().eq_ignore_ascii_case("n"),
        None => false,
    })
}

/// Write the draft next to the live status so `sessions import` can store it later.
fn keep_pending(draft: &SummaryDraft, path: &Path) -> Result<()> {
    if let Err(e) = draft.write_pending(path) {
        eprintln!("Could not keep the session on disk ({}); summary follows:", e);
        println!("{}", draft.encoded()?);
        return Err(e.into());
    }
    println!(
        "Session kept in {}. Store it later with: sessions import {}",
        path.display(),
        path.display()
    );
    Ok(())
}

async fn save_draft(
    draft: &mut SummaryDraft,
    database_path: &str,
    mut title: Option<String>,
    pending_path: &Path,
) -> Result<()> {
    let repository = match SqliteSessionRepository::open(database_path) {
        Ok(repository) => repository,
        Err(e) => {
            eprintln!("Cannot open session database {}: {}", database_path, e);
            return keep_pending(draft, pending_path);
        }
    };

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    loop {
        if draft.title().trim().is_empty() {
            let next = match title.take() {
                Some(t) => Some(t),
                None => prompt_title(&mut input).await?,
            };
            match next {
                Some(t) => draft.set_title(t),
                None => {
                    println!("Session discarded.");
                    return Ok(());
                }
            }
        }

        match draft.save(&repository).await {
            Ok(SaveOutcome::Saved { id }) => {
                println!("[{}] Saved session {} as \"{}\"", ts_now(), id, draft.title());
                return Ok(());
            }
            Ok(SaveOutcome::TitleRequired) => println!("A title is required to save the session."),
            Err(e) if e.is_recoverable() => {
                eprintln!("Saving failed: {}", e);
                if !confirm_retry(&mut input).await? {
                    return keep_pending(draft, pending_path);
                }
            }
            Err(e) => {
                eprintln!("Saving failed: {}", e);
                return keep_pending(draft, pending_path);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();

    let mut config = TrackerConfig::load(args.config.as_deref())?;
    if let Some(db) = &args.db {
        config.database_path = db.clone();
    }
    if args.no_steps {
        config.step_counter_enabled = false;
    }
    config.validate()?;
    if args.speedup <= 0.0 {
        bail!("--speedup must be positive");
    }

    println!("[{}] Path Tracker Starting", ts_now());
    println!("  Duration: {} seconds (0=until Ctrl-C)", args.duration);
    println!("  Feed: {:?}", args.feed);
    println!("  Database: {}", config.database_path);
    println!("  Output Dir: {}", args.output_dir);

    std::fs::create_dir_all(&args.output_dir)?;
    let status_path = format!("{}/live_status.json", args.output_dir);

    let (location, steps) = build_feeds(&args)?;
    let store = Arc::new(TrackingStore::new());
    let engine = SessionEngine::new(Arc::clone(&store), config.clone(), location, steps);
    let (service, mut events) = TrackingService::spawn(engine);

    service.start()?;
    match next_event(&mut events).await? {
        ServiceEvent::Started { .. } => println!("[{}] Tracking started", ts_now()),
        ServiceEvent::CommandFailed { error, .. } => bail!("Failed to start tracking: {}", error),
        other => bail!("Unexpected service event: {:?}", other),
    }

    let started = Instant::now();
    let mut status_ticker = interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = status_ticker.tick() => {
                let state = store.state()?;
                let running = store.is_running()?;
                if let Err(e) = LiveStatus::from_state(&state, running).save(&status_path) {
                    log::warn!("Failed to write {}: {}", status_path, e);
                }
                if args.duration > 0 && started.elapsed().as_secs() >= args.duration {
                    println!("[{}] Duration reached, stopping...", ts_now());
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("[{}] Interrupted, stopping...", ts_now());
                break;
            }
        }
    }

    service.stop()?;
    let encoded = match next_event(&mut events).await? {
        ServiceEvent::ShowSummary { encoded } => encoded,
        ServiceEvent::CommandFailed { error, .. } => bail!("Failed to stop tracking: {}", error),
        other => bail!("Unexpected service event: {:?}", other),
    };
    service.close().await?;

    let final_path = format!("{}/live_status_final.json", args.output_dir);
    let written = store
        .state()
        .map_err(anyhow::Error::from)
        .and_then(|state| Ok(LiveStatus::from_state(&state, false).save(&final_path)?));
    if let Err(e) = written {
        log::warn!("Failed to write {}: {}", final_path, e);
    }

    let mut draft = SummaryDraft::from_encoded(&encoded)?;
    let summary = draft.session().clone();
    println!("\n=== Session Summary ===");
    println!("Duration: {}", format_duration(summary.duration_seconds));
    println!("Distance: {}", format_distance(summary.distance_meters));
    println!("Average speed: {:.2} km/h", summary.average_speed_kmh);
    println!("Steps: {}", summary.steps);
    println!("Path points: {}", summary.points.len());

    // An earlier unsaved session may already be parked there
    let mut pending_path = Path::new(&args.output_dir).join(PENDING_SUMMARY_FILE);
    if pending_path.exists() {
        pending_path = Path::new(&args.output_dir)
            .join(format!("pending_summary_{}.json", summary.start_time_millis));
    }
    save_draft(&mut draft, &config.database_path, args.title.clone(), &pending_path).await
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
