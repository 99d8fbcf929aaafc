//! SQLite store for completed sessions.
//!
//! One mutex-guarded connection; every call runs on tokio's blocking pool.
//! Writes and the refresh of the observed session list happen under the same
//! lock, so observers see lists in write order.

use log::{info, warn};
use rusqlite::{params, Connection};
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::{lock_poisoned, TrackerResult};
use crate::observable::{Observable, Subscription};
use crate::types::{SessionPoint, TrackingSession};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY NOT NULL,
        title TEXT NOT NULL,
        start_time_millis INTEGER NOT NULL,
        duration_seconds INTEGER NOT NULL,
        distance_meters REAL NOT NULL,
        average_speed_kmh REAL NOT NULL,
        steps INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS location_points (
        uid INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
        latitude REAL NOT NULL CHECK (latitude BETWEEN -90.0 AND 90.0),
        longitude REAL NOT NULL CHECK (longitude BETWEEN -180.0 AND 180.0),
        timestamp_millis INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_location_points_session_id ON location_points(session_id);
    CREATE INDEX IF NOT EXISTS idx_sessions_start_time ON sessions(start_time_millis DESC);
"#;

/// Where finished sessions go.
pub trait SessionRepository: Send + Sync {
    /// Store the session under a freshly generated id and return that id.
    /// The header and all of its points become visible together or not at all.
    fn insert_session(
        &self,
        session: &TrackingSession,
    ) -> impl Future<Output = TrackerResult<String>> + Send;

    /// Current list first, then the full list after every write.
    /// Newest session first; points in chronological order.
    fn observe_all_sessions(&self) -> TrackerResult<Subscription<Vec<TrackingSession>>>;
}

/// 128 random bits, hex encoded.
pub fn new_session_id() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

#[derive(Debug)]
struct Inner {
    conn: Connection,
    sessions: Observable<Vec<TrackingSession>>,
}

impl Inner {
    fn refresh(&mut self) {
        match load_all(&self.conn) {
            Ok(sessions) => self.sessions.set(sessions),
            Err(e) => warn!("Failed to reload sessions after write: {}", e),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SqliteSessionRepository {
    inner: Arc<Mutex<Inner>>,
}

impl SqliteSessionRepository {
    pub fn open(path: impl AsRef<Path>) -> TrackerResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        info!("Opened session database at {}", path.display());
        Self::from_connection(conn)
    }

    pub fn in_memory() -> TrackerResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> TrackerResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        let sessions = load_all(&conn)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                conn,
                sessions: Observable::new(sessions),
            })),
        })
    }

    async fn with_inner<T, F>(&self, f: F) -> TrackerResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Inner) -> TrackerResult<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut guard = inner.lock().map_err(|_| lock_poisoned("database"))?;
            f(&mut guard)
        })
        .await?
    }

    /// One-shot read, same ordering as [`SessionRepository::observe_all_sessions`].
    pub async fn all_sessions(&self) -> TrackerResult<Vec<TrackingSession>> {
        self.with_inner(|inner| load_all(&inner.conn)).await
    }

    pub async fn session(&self, id: &str) -> TrackerResult<Option<TrackingSession>> {
        let id = id.to_string();
        self.with_inner(move |inner| {
            let sessions = load_all(&inner.conn)?;
            Ok(sessions.into_iter().find(|s| s.id == id))
        })
        .await
    }

    /// Returns whether a session was removed. Its points go with it.
    pub async fn delete_session(&self, id: &str) -> TrackerResult<bool> {
        let id = id.to_string();
        self.with_inner(move |inner| {
            let removed = inner
                .conn
                .execute("DELETE FROM sessions WHERE id = ?1", params![id])
                .map_err(|e| {
                    warn!("Failed to delete session {}: {}", id, e);
                    e
                })?;
            if removed > 0 {
                inner.refresh();
            }
            Ok(removed > 0)
        })
        .await
    }

    pub async fn session_count(&self) -> TrackerResult<usize> {
        self.with_inner(|inner| {
            let count: i64 = inner
                .conn
                .query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }

    pub async fn point_count(&self) -> TrackerResult<usize> {
        self.with_inner(|inner| {
            let count: i64 = inner
                .conn
                .query_row("SELECT COUNT(*) FROM location_points", [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }
}

impl SessionRepository for SqliteSessionRepository {
    async fn insert_session(&self, session: &TrackingSession) -> TrackerResult<String> {
        let session = session.clone();
        self.with_inner(move |inner| {
            let id = insert(&mut inner.conn, &session).map_err(|e| {
                warn!("Failed to store session: {}", e);
                e
            })?;
            inner.refresh();
            info!(
                "Stored session {} ({} points, {:.1} m)",
                id,
                session.points.len(),
                session.distance_meters
            );
            Ok(id)
        })
        .await
    }

    fn observe_all_sessions(&self) -> TrackerResult<Subscription<Vec<TrackingSession>>> {
        let mut inner = self.inner.lock().map_err(|_| lock_poisoned("database"))?;
        Ok(inner.sessions.subscribe())
    }
}

fn insert(conn: &mut Connection, session: &TrackingSession) -> rusqlite::Result<String> {
    let id = new_session_id();
    let tx = conn.transaction()?;

    tx.execute(
        "INSERT INTO sessions \
            (id, title, start_time_millis, duration_seconds, distance_meters, average_speed_kmh, steps) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id,
            session.title,
            session.start_time_millis,
            session.duration_seconds as i64,
            session.distance_meters,
            session.average_speed_kmh,
            session.steps as i64
        ],
    )?;

    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO location_points (session_id, latitude, longitude, timestamp_millis) \
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for point in &session.points {
            stmt.execute(params![
                id,
                point.latitude,
                point.longitude,
                point.timestamp_millis
            ])?;
        }
    }

    tx.commit()?;
    Ok(id)
}

fn load_all(conn: &Connection) -> TrackerResult<Vec<TrackingSession>> {
    let mut stmt = conn.prepare(
        "SELECT id, title, start_time_millis, duration_seconds, distance_meters, average_speed_kmh, steps \
         FROM sessions ORDER BY start_time_millis DESC, id ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(TrackingSession {
            id: row.get(0)?,
            title: row.get(1)?,
            start_time_millis: row.get(2)?,
            duration_seconds: row.get::<_, i64>(3)?.max(0) as u64,
            distance_meters: row.get(4)?,
            average_speed_kmh: row.get(5)?,
            steps: row.get::<_, i64>(6)?.max(0) as u64,
            points: Vec::new(),
        })
    })?;

    let mut points_stmt = conn.prepare_cached(
        "SELECT latitude, longitude, timestamp_millis FROM location_points \
         WHERE session_id = ?1 ORDER BY timestamp_millis ASC, uid ASC",
    )?;

    let mut sessions = Vec::new();
    for row in rows {
        let mut session = row?;
        let points = points_stmt.query_map(params![session.id], |row| {
            Ok(SessionPoint::new(row.get(0)?, row.get(1)?, row.get(2)?))
        })?;
        for point in points {
            session.points.push(point?);
        }
        sessions.push(session);
    }
    Ok(sessions)
}
