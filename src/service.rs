//! Command surface around the engine: start/stop commands arrive over a
//! channel, a worker task drives the engine, results go out as events.

use log::{debug, info, warn};
use std::fmt;
use std::str::FromStr;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::engine::SessionEngine;
use crate::error::{TrackerError, TrackerResult};
use crate::handoff;

pub const ACTION_START_TRACKING: &str = "action_start_tracking";
pub const ACTION_STOP_TRACKING: &str = "action_stop_tracking";
pub const ACTION_SHOW_SUMMARY: &str = "action_show_summary";
/// Key under which the encoded summary travels with [`ACTION_SHOW_SUMMARY`]
pub const EXTRA_TRACKING_SUMMARY: &str = "extra_tracking_summary";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCommand {
    Start,
    Stop,
}

impl EngineCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineCommand::Start => ACTION_START_TRACKING,
            EngineCommand::Stop => ACTION_STOP_TRACKING,
        }
    }
}

impl fmt::Display for EngineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineCommand {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            ACTION_START_TRACKING => Ok(EngineCommand::Start),
            ACTION_STOP_TRACKING => Ok(EngineCommand::Stop),
            other => Err(TrackerError::InvalidParameters(format!(
                "Unknown command: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServiceEvent {
    Started { start_time_millis: i64 },
    /// Navigate to the summary screen; `encoded` is the handoff payload
    ShowSummary { encoded: String },
    CommandFailed { command: EngineCommand, error: TrackerError },
}

impl ServiceEvent {
    pub fn action(&self) -> Option<&'static str> {
        match self {
            ServiceEvent::ShowSummary { .. } => Some(ACTION_SHOW_SUMMARY),
            _ => None,
        }
    }
}

pub struct TrackingService;

impl TrackingService {
    /// Move `engine` onto a worker task. Dropping or closing the handle
    /// tears the engine down.
    pub fn spawn(engine: SessionEngine) -> (ServiceHandle, mpsc::UnboundedReceiver<ServiceEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_service(engine, command_rx, event_tx));
        (
            ServiceHandle {
                commands: command_tx,
                task,
            },
            event_rx,
        )
    }
}

pub struct ServiceHandle {
    commands: mpsc::UnboundedSender<EngineCommand>,
    task: JoinHandle<()>,
}

impl ServiceHandle {
    pub fn send(&self, command: EngineCommand) -> TrackerResult<()> {
        self.commands
            .send(command)
            .map_err(|_| TrackerError::Internal("Tracking service is not running".to_string()))
    }

    pub fn start(&self) -> TrackerResult<()> {
        self.send(EngineCommand::Start)
    }

    pub fn stop(&self) -> TrackerResult<()> {
        self.send(EngineCommand::Stop)
    }

    /// Close the command channel and wait for the worker to shut the engine down.
    pub async fn close(self) -> TrackerResult<()> {
        let ServiceHandle { commands, task } = self;
        drop(commands);
        task.await?;
        Ok(())
    }
}

async fn run_service(
    mut engine: SessionEngine,
    mut commands: mpsc::UnboundedReceiver<EngineCommand>,
    events: mpsc::UnboundedSender<ServiceEvent>,
) {
    info!("Tracking service ready");

    while let Some(command) = commands.recv().await {
        debug!("Received {}", command);
        let event = match command {
            EngineCommand::Start => match engine.start() {
                Ok(()) => ServiceEvent::Started {
                    start_time_millis: engine.start_time_millis(),
                },
                Err(error) => ServiceEvent::CommandFailed { command, error },
            },
            EngineCommand::Stop => {
                let encoded = match engine.stop().await {
                    Ok(summary) => handoff::encode_summary(&summary),
                    Err(e) => Err(e),
                };
                match encoded {
                    Ok(encoded) => ServiceEvent::ShowSummary { encoded },
                    Err(error) => ServiceEvent::CommandFailed { command, error },
                }
            }
        };

        if let ServiceEvent::CommandFailed { command, error } = &event {
            warn!("{} failed: {}", command, error);
        }
        if events.send(event).is_err() {
            debug!("No listener for service events");
        }
    }

    if let Err(e) = engine.shutdown().await {
        warn!("Engine shutdown failed: {}", e);
    }
    info!("Tracking service stopped");
}
