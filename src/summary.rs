use log::warn;
use std::path::Path;

use crate::error::{TrackerError, TrackerResult};
use crate::handoff;
use crate::persistence::SessionRepository;
use crate::types::TrackingSession;

/// File name used by the binaries for a draft that could not be stored.
pub const PENDING_SUMMARY_FILE: &str = "pending_summary.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Nothing was stored; the title is blank
    TitleRequired,
    Saved { id: String },
}

/// A finished session waiting for a title before it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryDraft {
    session: TrackingSession,
    title_required: bool,
}

impl SummaryDraft {
    pub fn new(session: TrackingSession) -> Self {
        Self {
            session,
            title_required: false,
        }
    }

    /// Build from a handoff payload.
    pub fn from_encoded(encoded: &str) -> TrackerResult<Self> {
        Ok(Self::new(handoff::decode_summary(encoded)?))
    }

    /// Read a draft parked by [`write_pending`](Self::write_pending).
    pub fn load_pending(path: impl AsRef<Path>) -> TrackerResult<Self> {
        let path = path.as_ref();
        let encoded = std::fs::read_to_string(path).map_err(|e| {
            TrackerError::Storage(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_encoded(&encoded)
    }

    /// Handoff payload of the draft, title included.
    pub fn encoded(&self) -> TrackerResult<String> {
        handoff::encode_summary(&self.session)
    }

    /// Keep the draft on disk when the database cannot take it.
    pub fn write_pending(&self, path: impl AsRef<Path>) -> TrackerResult<()> {
        let path = path.as_ref();
        std::fs::write(path, self.encoded()?).map_err(|e| {
            TrackerError::Storage(format!("Failed to write {}: {}", path.display(), e))
        })
    }

    pub fn session(&self) -> &TrackingSession {
        &self.session
    }

    pub fn title(&self) -> &str {
        &self.session.title
    }

    pub fn is_title_required(&self) -> bool {
        self.title_required
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.session = self.session.with_title(title);
        self.title_required = false;
    }

    /// Whitespace-only titles are refused. On storage failure the error is
    /// returned and the draft is left as it was.
    pub async fn save<R: SessionRepository>(&mut self, repository: &R) -> TrackerResult<SaveOutcome> {
        if self.session.title.trim().is_empty() {
            self.title_required = true;
            return Ok(SaveOutcome::TitleRequired);
        }

        match repository.insert_session(&self.session).await {
            Ok(id) => {
                self.session = self.session.with_id(id.clone());
                Ok(SaveOutcome::Saved { id })
            }
            Err(e) => {
                warn!("Saving session \"{}\" failed: {}", self.session.title, e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observable::{Observable, Subscription};
    use crate::persistence::SqliteSessionRepository;
    use crate::types::{SessionPoint, TrackingState};

    struct FailingRepository;

    impl SessionRepository for FailingRepository {
        async fn insert_session(&self, _session: &TrackingSession) -> TrackerResult<String> {
            Err(TrackerError::Storage("disk I/O error".to_string()))
        }

        fn observe_all_sessions(&self) -> TrackerResult<Subscription<Vec<TrackingSession>>> {
            Ok(Observable::new(Vec::new()).subscribe())
        }
    }

    fn finished() -> TrackingSession {
        TrackingSession::from_final_state(
            1_000,
            TrackingState {
                elapsed_time_seconds: 60,
                distance_meters: 100.0,
                current_speed_kmh: 6.0,
                steps: 120,
                path_points: vec![SessionPoint::new(1.0, 1.0, 1_000)],
            },
        )
    }

    #[tokio::test]
    async fn test_blank_title_is_refused() {
        let repo = SqliteSessionRepository::in_memory().unwrap();
        let mut draft = SummaryDraft::new(finished());

        assert_eq!(draft.save(&repo).await.unwrap(), SaveOutcome::TitleRequired);
        assert!(draft.is_title_required());

        draft.set_title("   ");
        assert!(!draft.is_title_required());
        assert_eq!(draft.save(&repo).await.unwrap(), SaveOutcome::TitleRequired);
        assert_eq!(repo.session_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_save_with_title() {
        let repo = SqliteSessionRepository::in_memory().unwrap();
        let mut draft = SummaryDraft::new(finished());
        draft.set_title("Morning walk");

        let SaveOutcome::Saved { id } = draft.save(&repo).await.unwrap() else {
            panic!("expected saved");
        };
        assert_eq!(draft.session().id, id);

        let stored = repo.all_sessions().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].title, "Morning walk");
    }

    #[tokio::test]
    async fn test_storage_failure_keeps_draft() {
        let mut draft = SummaryDraft::new(finished());
        draft.set_title("Evening run");
        let before = draft.clone();

        let err = draft.save(&FailingRepository).await.unwrap_err();
        assert!(matches!(err, TrackerError::Storage(_)));
        assert_eq!(draft, before);
    }

    #[tokio::test]
    async fn test_pending_draft_survives_failed_save() {
        let tmp_dir = tempfile::TempDir::new().expect("failed to create temp dir");
        let path = tmp_dir.path().join(PENDING_SUMMARY_FILE);

        let mut draft = SummaryDraft::new(finished());
        draft.set_title("Lunch loop");
        let err = draft.save(&FailingRepository).await.unwrap_err();
        assert!(err.is_recoverable());
        draft.write_pending(&path).unwrap();

        let mut restored = SummaryDraft::load_pending(&path).unwrap();
        assert_eq!(restored, draft);

        let repo = SqliteSessionRepository::in_memory().unwrap();
        let SaveOutcome::Saved { id } = restored.save(&repo).await.unwrap() else {
            panic!("expected saved");
        };
        let stored = repo.session(&id).await.unwrap().unwrap();
        assert_eq!(stored.title, "Lunch loop");
        assert_eq!(stored.points, finished().points);
    }

    #[test]
    fn test_load_pending_missing_file() {
        let tmp_dir = tempfile::TempDir::new().expect("failed to create temp dir");
        let err = SummaryDraft::load_pending(tmp_dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, TrackerError::Storage(_)));
    }

    #[test]
    fn test_from_encoded() {
        let encoded = handoff::encode_summary(&finished()).unwrap();
        let draft = SummaryDraft::from_encoded(&encoded).unwrap();
        assert_eq!(draft.session(), &finished());
        assert_eq!(draft.title(), "");
    }
}
