use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::debug;

use crate::error::IngestError;
use crate::models::{ActivityType, Session, SessionTable};

pub const INGESTED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Append-only record of batches that were already ingested
pub trait IngestionLog {
    fn processed_batches(&self) -> Result<HashSet<String>, IngestError>;

    fn record_batch(&self, batch: &str, ingested_at: DateTime<Utc>) -> Result<(), IngestError>;
}

/// Destination for extracted sessions, one table per activity type
pub trait SinkWriter {
    /// Append every session of `table`, returning the number of rows written
    fn append_sessions(&self, table: &SessionTable, ingested_at: DateTime<Utc>) -> Result<usize, IngestError>;
}

/// SQLite-backed warehouse holding the session tables and the processing log
pub struct Warehouse {
    conn: Connection,
}

impl Warehouse {
    pub fn open(path: &Path) -> Result<Self, IngestError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, IngestError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, IngestError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS quiz_table (
                activity_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                start_timestamp INTEGER NOT NULL,
                activity_duration INTEGER NOT NULL,
                status TEXT NOT NULL,
                score INTEGER,
                ingested_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS challenge_table (
                activity_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                start_timestamp INTEGER NOT NULL,
                activity_duration INTEGER NOT NULL,
                status TEXT NOT NULL,
                score INTEGER,
                ingested_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS video_table (
                activity_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                start_timestamp INTEGER NOT NULL,
                activity_duration INTEGER NOT NULL,
                status TEXT NOT NULL,
                ingested_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS processing_logs (
                filename TEXT NOT NULL,
                ingested_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self { conn })
    }

    /// Every session stored for `activity`, in insertion order
    pub fn sessions(&self, activity: ActivityType) -> Result<Vec<Session>, IngestError> {
        let score_column = if activity.is_scorable() { "score" } else { "NULL" };
        let sql = format!(
            "SELECT activity_id, user_id, start_timestamp, activity_duration, status, {score_column} \
             FROM {} ORDER BY rowid",
            activity.table_name()
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(Session {
                activity_id: row.get(0)?,
                user_id: row.get(1)?,
                start_timestamp: row.get(2)?,
                activity_duration: row.get(3)?,
                status: row.get(4)?,
                score: row.get(5)?,
            })
        })?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn row_count(&self, activity: ActivityType) -> Result<usize, IngestError> {
        let sql = format!("SELECT COUNT(*) FROM {}", activity.table_name());
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

impl IngestionLog for Warehouse {
    fn processed_batches(&self) -> Result<HashSet<String>, IngestError> {
        let mut stmt = self.conn.prepare("SELECT filename FROM processing_logs")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<HashSet<_>, _>>()?)
    }

    fn record_batch(&self, batch: &str, ingested_at: DateTime<Utc>) -> Result<(), IngestError> {
        self.conn.execute(
            "INSERT INTO processing_logs (filename, ingested_at) VALUES (?1, ?2)",
            params![batch, format_ingested_at(ingested_at)],
        )?;
        debug!(batch, "recorded batch in processing log");
        Ok(())
    }
}

impl SinkWriter for Warehouse {
    fn append_sessions(&self, table: &SessionTable, ingested_at: DateTime<Utc>) -> Result<usize, IngestError> {
        let ingested_at = format_ingested_at(ingested_at);
        let name = table.activity.table_name();
        let tx = self.conn.unchecked_transaction()?;

        {
            if table.activity.is_scorable() {
                let mut stmt = tx.prepare(&format!(
                    "INSERT INTO {name} (activity_id, user_id, start_timestamp, activity_duration, status, score, ingested_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                ))?;
                for s in &table.sessions {
                    stmt.execute(params![
                        s.activity_id,
                        s.user_id,
                        s.start_timestamp,
                        s.activity_duration,
                        s.status,
                        s.score,
                        ingested_at
                    ])?;
                }
            } else {
                let mut stmt = tx.prepare(&format!(
                    "INSERT INTO {name} (activity_id, user_id, start_timestamp, activity_duration, status, ingested_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
                ))?;
                for s in &table.sessions {
                    stmt.execute(params![
                        s.activity_id,
                        s.user_id,
                        s.start_timestamp,
                        s.activity_duration,
                        s.status,
                        ingested_at
                    ])?;
                }
            }
        }

        tx.commit()?;
        debug!(table = name, rows = table.len(), "appended sessions");
        Ok(table.len())
    }
}

/// Whole-second UTC rendering used for `ingested_at` columns
pub fn format_ingested_at(ingested_at: DateTime<Utc>) -> String {
    ingested_at.format(INGESTED_AT_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn session(activity_id: i64, score: Option<i64>) -> Session {
        Session {
            activity_id,
            user_id: 42,
            start_timestamp: 1000,
            activity_duration: 60,
            status: "complete".to_string(),
            score,
        }
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 15, 8, 30, 0).unwrap()
    }

    #[test]
    fn test_append_is_append_only() {
        let warehouse = Warehouse::open_in_memory().unwrap();
        let table = SessionTable {
            activity: ActivityType::Quiz,
            sessions: vec![session(1, Some(80))],
        };

        warehouse.append_sessions(&table, at()).unwrap();
        warehouse.append_sessions(&table, at()).unwrap();

        // No upsert: the same rows appended twice are stored twice
        assert_eq!(warehouse.row_count(ActivityType::Quiz).unwrap(), 2);
        assert_eq!(warehouse.sessions(ActivityType::Quiz).unwrap()[0].score, Some(80));
    }

    #[test]
    fn test_video_table_has_no_score() {
        let warehouse = Warehouse::open_in_memory().unwrap();
        let table = SessionTable {
            activity: ActivityType::Video,
            sessions: vec![session(3, None)],
        };

        assert_eq!(warehouse.append_sessions(&table, at()).unwrap(), 1);
        let stored = warehouse.sessions(ActivityType::Video).unwrap();
        assert_eq!(stored, vec![session(3, None)]);
    }

    #[test]
    fn test_processing_log_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("warehouse.db");
        {
            let warehouse = Warehouse::open(&path).unwrap();
            warehouse.record_batch("raw_data/data_1.tsv", at()).unwrap();
        }

        // Reopening keeps the log
        let warehouse = Warehouse::open(&path).unwrap();
        let processed = warehouse.processed_batches().unwrap();
        assert!(processed.contains("raw_data/data_1.tsv"));
        assert_eq!(processed.len(), 1);
    }

    #[test]
    fn test_ingested_at_format() {
        assert_eq!(format_ingested_at(at()), "2023-01-15 08:30:00");
    }
}
