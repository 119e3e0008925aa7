//! Usage log persisted in SQLite.
//!
//! Connection policy: every operation opens its own connection and drops it
//! when done. There is no pool and no transaction spanning statements; each
//! statement is atomic on its own and concurrent writers are serialized by
//! SQLite's file lock (with a busy timeout so they wait instead of failing).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::{Connection, params};
use tracing::debug;

/// Days reported by [`StatsStore::aggregate_usage`].
pub const MAX_DAILY_ROWS: usize = 7;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    /// The database could not be opened.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    /// A schema or insert statement failed.
    #[error("write failed: {0}")]
    WriteFailed(String),
    /// A read statement failed or returned malformed data.
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Number of usage rows recorded on one calendar day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyAggregate {
    pub day: NaiveDate,
    pub count: i64,
}

/// Result of [`StatsStore::aggregate_usage`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UsageSummary {
    pub total_users: i64,
    /// Most recent day first, at most [`MAX_DAILY_ROWS`] entries.
    pub daily: Vec<DailyAggregate>,
}

/// Storage port for the usage log.
#[async_trait]
pub trait StatsStore: Send + Sync {
    /// Create the usage table if it does not exist yet.
    async fn ensure_schema(&self) -> Result<(), StorageError>;

    /// Append one usage row stamped with the current time.
    async fn record_usage(&self, user_id: i64, chat_id: i64) -> Result<(), StorageError>;

    /// Distinct users plus per-day counts for the most recent days.
    async fn aggregate_usage(&self) -> Result<UsageSummary, StorageError>;
}

/// SQLite-backed [`StatsStore`] that connects per call.
pub struct SqliteStats {
    path: PathBuf,
}

impl SqliteStats {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Build from a connection string: `sqlite://path`, `sqlite:path` or a bare path.
    pub fn from_url(url: &str) -> Result<Self, StorageError> {
        let path = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url);

        if path.is_empty() {
            return Err(StorageError::Unavailable("empty database path".into()));
        }
        // Each call opens a fresh connection, so an in-memory database would always be empty
        if path == ":memory:" || path.starts_with("file::memory:") {
            return Err(StorageError::Unavailable(
                "in-memory databases are not supported".into(),
            ));
        }

        Ok(Self::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(path: &Path) -> Result<Connection, StorageError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Unavailable(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let conn = Connection::open(path)
            .map_err(|e| StorageError::Unavailable(format!("cannot open {}: {e}", path.display())))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(conn)
    }

    /// Insert a row with an explicit timestamp.
    #[cfg(test)]
    pub fn record_usage_at(&self, user_id: i64, chat_id: i64, at: chrono::NaiveDateTime) {
        let conn = Self::connect(&self.path).unwrap();
        conn.execute(
            "INSERT INTO stats (user_id, chat_id, created_at) VALUES (?1, ?2, ?3)",
            params![user_id, chat_id, at.format("%Y-%m-%d %H:%M:%S").to_string()],
        )
        .unwrap();
    }

    /// Total usage rows.
    #[cfg(test)]
    pub fn row_count(&self) -> usize {
        let conn = Self::connect(&self.path).unwrap();
        conn.query_row("SELECT COUNT(*) FROM stats", [], |row| row.get::<_, i64>(0))
            .unwrap() as usize
    }
}

/// Run a blocking storage closure off the async runtime.
async fn run_blocking<T, F>(f: F) -> Result<T, StorageError>
where
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Unavailable(format!("storage task failed: {e}")))?
}

#[async_trait]
impl StatsStore for SqliteStats {
    async fn ensure_schema(&self) -> Result<(), StorageError> {
        let path = self.path.clone();
        run_blocking(move || {
            let conn = Self::connect(&path)?;
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS stats (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL,
                    chat_id INTEGER NOT NULL,
                    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
                );

                CREATE INDEX IF NOT EXISTS idx_stats_created_at ON stats(created_at);
                "#,
            )
            .map_err(|e| StorageError::WriteFailed(format!("schema: {e}")))?;
            debug!("Usage schema ready at {:?}", path);
            Ok(())
        })
        .await
    }

    async fn record_usage(&self, user_id: i64, chat_id: i64) -> Result<(), StorageError> {
        let path = self.path.clone();
        run_blocking(move || {
            let conn = Self::connect(&path)?;
            conn.execute(
                "INSERT INTO stats (user_id, chat_id) VALUES (?1, ?2)",
                params![user_id, chat_id],
            )
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn aggregate_usage(&self) -> Result<UsageSummary, StorageError> {
        let path = self.path.clone();
        run_blocking(move || {
            let conn = Self::connect(&path)?;
            let query_err = |e: rusqlite::Error| StorageError::QueryFailed(e.to_string());

            let total_users: i64 = conn
                .query_row("SELECT COUNT(DISTINCT user_id) FROM stats", [], |row| row.get(0))
                .map_err(query_err)?;

            let mut stmt = conn
                .prepare(
                    "SELECT date(created_at) AS day, COUNT(*) AS cnt
                     FROM stats
                     WHERE date(created_at) IS NOT NULL
                     GROUP BY day
                     ORDER BY day DESC
                     LIMIT ?1",
                )
                .map_err(query_err)?;

            let rows = stmt
                .query_map(params![MAX_DAILY_ROWS as i64], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })
                .map_err(query_err)?;

            let mut daily = Vec::new();
            for row in rows {
                let (day, count) = row.map_err(query_err)?;
                let day = NaiveDate::parse_from_str(&day, "%Y-%m-%d")
                    .map_err(|e| StorageError::QueryFailed(format!("bad day '{day}': {e}")))?;
                daily.push(DailyAggregate { day, count });
            }

            Ok(UsageSummary { total_users, daily })
        })
        .await
    }
}

/// Records one usage row per processed event.
#[derive(Clone)]
pub struct UsageRecorder {
    store: Arc<dyn StatsStore>,
}

impl UsageRecorder {
    pub fn new(store: Arc<dyn StatsStore>) -> Self {
        Self { store }
    }

    pub async fn record(&self, user_id: i64, chat_id: i64) -> Result<(), StorageError> {
        self.store.record_usage(user_id, chat_id).await?;
        debug!("Recorded usage: user={} chat={}", user_id, chat_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDateTime, Utc};
    use tempfile::TempDir;

    fn temp_store() -> (TempDir, SqliteStats) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStats::new(dir.path().join("stats.db"));
        (dir, store)
    }

    fn at(day: &str, time: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(&format!("{day} {time}"), "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn date(day: &str) -> NaiveDate {
        NaiveDate::parse_from_str(day, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_from_url_variants() {
        assert_eq!(SqliteStats::from_url("sqlite://data/a.db").unwrap().path(), Path::new("data/a.db"));
        assert_eq!(SqliteStats::from_url("sqlite:b.db").unwrap().path(), Path::new("b.db"));
        assert_eq!(SqliteStats::from_url("/var/lib/c.db").unwrap().path(), Path::new("/var/lib/c.db"));
    }

    #[test]
    fn test_from_url_rejects_memory_and_empty() {
        assert!(matches!(SqliteStats::from_url(":memory:"), Err(StorageError::Unavailable(_))));
        assert!(matches!(SqliteStats::from_url("sqlite://:memory:"), Err(StorageError::Unavailable(_))));
        assert!(matches!(SqliteStats::from_url("sqlite://"), Err(StorageError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_ensure_schema_is_idempotent() {
        let (_dir, store) = temp_store();
        store.ensure_schema().await.unwrap();
        store.ensure_schema().await.unwrap();

        let conn = Connection::open(store.path()).unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'stats'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 1);
    }

    #[tokio::test]
    async fn test_ensure_schema_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStats::new(dir.path().join("nested/deeper/stats.db"));
        store.ensure_schema().await.unwrap();
        assert!(store.path().exists());
    }

    #[tokio::test]
    async fn test_unreachable_path_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"file").unwrap();
        let store = SqliteStats::new(blocker.join("stats.db"));

        assert!(matches!(store.ensure_schema().await, Err(StorageError::Unavailable(_))));
        assert!(matches!(store.record_usage(1, 1).await, Err(StorageError::Unavailable(_))));
        assert!(matches!(store.aggregate_usage().await, Err(StorageError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_record_without_schema_fails_to_write() {
        let (_dir, store) = temp_store();
        assert!(matches!(store.record_usage(1, 1).await, Err(StorageError::WriteFailed(_))));
    }

    #[tokio::test]
    async fn test_record_usage_stores_ids_and_timestamp() {
        let (_dir, store) = temp_store();
        store.ensure_schema().await.unwrap();

        let before = Utc::now().date_naive();
        store.record_usage(100, -2000).await.unwrap();
        let after = Utc::now().date_naive();

        let conn = Connection::open(store.path()).unwrap();
        let (user_id, chat_id): (i64, i64) = conn
            .query_row("SELECT user_id, chat_id FROM stats", [], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap();
        assert_eq!((user_id, chat_id), (100, -2000));

        let summary = store.aggregate_usage().await.unwrap();
        assert_eq!(summary.total_users, 1);
        assert_eq!(summary.daily.len(), 1);
        assert!(summary.daily[0].day == before || summary.daily[0].day == after);
    }

    #[tokio::test]
    async fn test_aggregate_three_days() {
        let (_dir, store) = temp_store();
        store.ensure_schema().await.unwrap();

        // 2 rows, 5 rows, 1 row
        store.record_usage_at(1, 10, at("2024-03-01", "09:00:00"));
        store.record_usage_at(2, 10, at("2024-03-01", "23:59:59"));
        for user in 1..=5 {
            store.record_usage_at(user, 10, at("2024-03-02", "12:00:00"));
        }
        store.record_usage_at(3, 11, at("2024-03-04", "00:00:00"));

        let summary = store.aggregate_usage().await.unwrap();
        assert_eq!(summary.total_users, 5);
        assert_eq!(
            summary.daily,
            vec![
                DailyAggregate { day: date("2024-03-04"), count: 1 },
                DailyAggregate { day: date("2024-03-02"), count: 5 },
                DailyAggregate { day: date("2024-03-01"), count: 2 },
            ]
        );
        assert_eq!(summary.daily.iter().map(|d| d.count).sum::<i64>(), 8);
        assert_eq!(store.row_count(), 8);
    }

    #[tokio::test]
    async fn test_aggregate_keeps_most_recent_seven_days() {
        let (_dir, store) = temp_store();
        store.ensure_schema().await.unwrap();

        for day in 1..=10 {
            store.record_usage_at(day, 1, at(&format!("2024-05-{day:02}"), "08:00:00"));
        }

        let summary = store.aggregate_usage().await.unwrap();
        assert_eq!(summary.total_users, 10);
        assert_eq!(summary.daily.len(), MAX_DAILY_ROWS);
        assert_eq!(summary.daily[0].day, date("2024-05-10"));
        assert_eq!(summary.daily[6].day, date("2024-05-04"));
        assert!(summary.daily.windows(2).all(|w| w[0].day > w[1].day));
    }

    #[tokio::test]
    async fn test_aggregate_empty_table() {
        let (_dir, store) = temp_store();
        store.ensure_schema().await.unwrap();

        let summary = store.aggregate_usage().await.unwrap();
        assert_eq!(summary, UsageSummary::default());
    }

    #[tokio::test]
    async fn test_recorder_appends_rows() {
        let (_dir, store) = temp_store();
        store.ensure_schema().await.unwrap();
        let path = store.path().to_path_buf();

        let recorder = UsageRecorder::new(Arc::new(store));
        recorder.record(7, 7).await.unwrap();
        recorder.record(7, 7).await.unwrap();

        assert_eq!(SqliteStats::new(path).row_count(), 2);
    }
}
