use futures::{Stream, StreamExt};

use crate::error::TrackerResult;
use crate::persistence::SessionRepository;
use crate::types::TrackingSession;

/// What the session history screen shows.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryView {
    Loading,
    Empty,
    Sessions(Vec<TrackingSession>),
    Error(String),
}

impl HistoryView {
    pub fn from_result(result: TrackerResult<Vec<TrackingSession>>) -> Self {
        match result {
            Ok(sessions) if sessions.is_empty() => HistoryView::Empty,
            Ok(sessions) => HistoryView::Sessions(sessions),
            Err(e) => HistoryView::Error(e.to_string()),
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, HistoryView::Loading)
    }
}

/// `Loading`, then one view per emitted session list. A failed subscription
/// yields a single `Error` view.
pub fn history_views<R: SessionRepository>(repository: &R) -> impl Stream<Item = HistoryView> {
    let loading = futures::stream::iter([HistoryView::Loading]);
    match repository.observe_all_sessions() {
        Ok(lists) => loading
            .chain(lists.map(|sessions| HistoryView::from_result(Ok(sessions))))
            .left_stream(),
        Err(e) => loading
            .chain(futures::stream::iter([HistoryView::Error(e.to_string())]))
            .right_stream(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackerError;
    use crate::persistence::SqliteSessionRepository;

    #[test]
    fn test_from_result() {
        assert_eq!(HistoryView::from_result(Ok(vec![])), HistoryView::Empty);
        let view = HistoryView::from_result(Err(TrackerError::Storage("locked".to_string())));
        assert!(matches!(view, HistoryView::Error(ref msg) if msg.contains("locked")));
    }

    #[tokio::test]
    async fn test_history_follows_repository() {
        let repo = SqliteSessionRepository::in_memory().unwrap();
        let mut views = Box::pin(history_views(&repo));

        assert!(views.next().await.unwrap().is_loading());
        assert_eq!(views.next().await.unwrap(), HistoryView::Empty);

        let session = TrackingSession {
            id: String::new(),
            title: "Lunch loop".to_string(),
            start_time_millis: 42,
            duration_seconds: 10,
            distance_meters: 12.0,
            average_speed_kmh: 4.32,
            steps: 15,
            points: vec![],
        };
        repo.insert_session(&session).await.unwrap();

        match views.next().await.unwrap() {
            HistoryView::Sessions(sessions) => assert_eq!(sessions[0].title, "Lunch loop"),
            other => panic!("unexpected view {:?}", other),
        }
    }
}
