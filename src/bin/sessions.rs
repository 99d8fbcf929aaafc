use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use path_tracker::export::GpxTrack;
use path_tracker::format::{format_date_time, format_distance, format_duration};
use path_tracker::history::HistoryView;
use path_tracker::logging;
use path_tracker::static_map;
use path_tracker::{
    SaveOutcome, SqliteSessionRepository, SummaryDraft, TrackerConfig, TrackingSession,
};

#[derive(Parser, Debug)]
#[command(name = "sessions")]
#[command(about = "Browse recorded sessions", long_about = None)]
struct Args {
    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Session database (overrides config)
    #[arg(long)]
    db: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List sessions, newest first
    List,
    /// Print one session as JSON
    Show { id: String },
    /// Static map URL for a session's path
    Map {
        id: String,
        /// Download the image to this file
        #[arg(long)]
        download: Option<PathBuf>,
    },
    /// Export a session as GPX
    Gpx {
        id: String,
        /// Output file (stdout when omitted)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Delete a session and its points
    Delete { id: String },
    /// Store a summary that was kept on disk after a failed save
    Import {
        file: PathBuf,
        /// Title to store it under (keeps the saved title when omitted)
        #[arg(long)]
        title: Option<String>,
    },
}

fn print_row(session: &TrackingSession) {
    println!(
        "{}  {:<24} {}  {:>9}  {:>10}  {:>6} steps",
        session.id,
        session.title,
        format_date_time(session.start_time_millis),
        format_duration(session.duration_seconds),
        format_distance(session.distance_meters),
        session.steps
    );
}

fn print_view(view: &HistoryView) {
    match view {
        HistoryView::Loading => {}
        HistoryView::Empty => println!("No sessions recorded yet."),
        HistoryView::Sessions(sessions) => sessions.iter().for_each(print_row),
        HistoryView::Error(message) => eprintln!("Failed to load sessions: {}", message),
    }
}

async fn find(repository: &SqliteSessionRepository, id: &str) -> Result<TrackingSession> {
    repository
        .session(id)
        .await?
        .with_context(|| format!("no session with id {}", id))
}

async fn download(url: &str, path: &Path) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(concat!("path_tracker/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let response = client.get(url).send().await?.error_for_status()?;
    let bytes = response.bytes().await?;
    tokio::fs::write(path, &bytes).await?;
    println!("Wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();

    let mut config = TrackerConfig::load(args.config.as_deref())?;
    if let Some(db) = &args.db {
        config.database_path = db.clone();
    }
    config.validate()?;

    let repository = SqliteSessionRepository::open(&config.database_path)?;

    match args.command {
        Command::List => {
            let view = HistoryView::from_result(repository.all_sessions().await);
            print_view(&view);
        }
        Command::Show { id } => {
            let session = find(&repository, &id).await?;
            println!("{}", serde_json::to_string_pretty(&session)?);
        }
        Command::Map { id, download: target } => {
            let session = find(&repository, &id).await?;
            let url = static_map::static_map_url(&session.points, &config.map);
            if url.is_empty() {
                bail!("session {} has no path points", id);
            }
            println!("{}", url);
            if let Some(path) = target {
                if config.map.resolved_api_key().is_empty() {
                    log::warn!("No maps API key configured, the request will likely be refused");
                }
                download(&url, &path).await?;
            }
        }
        Command::Gpx { id, out } => {
            let session = find(&repository, &id).await?;
            let xml = GpxTrack::from_session(&session).to_gpx_xml();
            match out {
                Some(path) => {
                    std::fs::write(&path, xml)?;
                    println!("Wrote {}", path.display());
                }
                None => print!("{}", xml),
            }
        }
        Command::Delete { id } => {
            if repository.delete_session(&id).await? {
                println!("Deleted {}", id);
            } else {
                bail!("no session with id {}", id);
            }
        }
        Command::Import { file, title } => {
            let mut draft = SummaryDraft::load_pending(&file)?;
            if let Some(title) = title {
                draft.set_title(title);
            }
            match draft.save(&repository).await? {
                SaveOutcome::Saved { id } => {
                    std::fs::remove_file(&file)?;
                    println!("Saved {} as \"{}\"", id, draft.title());
                }
                SaveOutcome::TitleRequired => bail!("{} has no title, pass --title", file.display()),
            }
        }
    }

    Ok(())
}
