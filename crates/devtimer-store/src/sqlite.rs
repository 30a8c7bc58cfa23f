//! SQLite-based store implementation

use chrono::{DateTime, Local, NaiveDate};
use devtimer_util::DeviceId;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::{AuditEvent, AuditEventType, Store, StoreError, StoreResult};

const DAY_FORMAT: &str = "%Y-%m-%d";

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            -- Audit log (append-only)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_json TEXT NOT NULL
            );

            -- Usage accounting
            CREATE TABLE IF NOT EXISTS usage (
                device_id TEXT NOT NULL,
                day TEXT NOT NULL,
                duration_secs INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (device_id, day)
            );

            -- Calibrated thresholds, bytes per minute
            CREATE TABLE IF NOT EXISTS threshold_overrides (
                device_id TEXT PRIMARY KEY,
                bytes_per_minute INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Daemon state (single row)
            CREATE TABLE IF NOT EXISTS daemon_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                last_reset_date TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            CREATE INDEX IF NOT EXISTS idx_usage_day ON usage(day);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

fn parse_day(s: &str) -> StoreResult<NaiveDate> {
    NaiveDate::parse_from_str(s, DAY_FORMAT)
        .map_err(|e| StoreError::Serialization(format!("bad date '{s}': {e}")))
}

fn to_sql_int(value: u64) -> StoreResult<i64> {
    i64::try_from(value).map_err(|_| StoreError::Serialization(format!("{value} exceeds i64")))
}

impl Store for SqliteStore {
    fn append_audit(&self, mut event: AuditEvent) -> StoreResult<()> {
        let conn = self.conn.lock();
        let event_json = serde_json::to_string(&event.event)?;

        conn.execute(
            "INSERT INTO audit_log (timestamp, event_json) VALUES (?, ?)",
            params![event.timestamp.to_rfc3339(), event_json],
        )?;

        event.id = conn.last_insert_rowid();
        debug!(event_id = event.id, "Audit event appended");

        Ok(())
    }

    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_json FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit], |row| {
            let id: i64 = row.get(0)?;
            let timestamp_str: String = row.get(1)?;
            let event_json: String = row.get(2)?;
            Ok((id, timestamp_str, event_json))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp_str, event_json) = row?;
            let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
                .map(|dt| dt.with_timezone(&Local))
                .unwrap_or_else(|_| devtimer_util::now());
            let event: AuditEventType = serde_json::from_str(&event_json)?;

            events.push(AuditEvent {
                id,
                timestamp,
                event,
            });
        }

        Ok(events)
    }

    fn get_usage(&self, device_id: &DeviceId, day: NaiveDate) -> StoreResult<Duration> {
        let conn = self.conn.lock();
        let day_str = day.format(DAY_FORMAT).to_string();

        let secs: Option<i64> = conn
            .query_row(
                "SELECT duration_secs FROM usage WHERE device_id = ? AND day = ?",
                params![device_id.as_str(), day_str],
                |row| row.get(0),
            )
            .optional()?;

        Ok(Duration::from_secs(secs.unwrap_or(0).max(0) as u64))
    }

    fn add_usage(&self, device_id: &DeviceId, day: NaiveDate, duration: Duration) -> StoreResult<()> {
        let conn = self.conn.lock();
        let day_str = day.format(DAY_FORMAT).to_string();
        let secs = to_sql_int(duration.as_secs())?;

        conn.execute(
            r#"
            INSERT INTO usage (device_id, day, duration_secs)
            VALUES (?, ?, ?)
            ON CONFLICT(device_id, day)
            DO UPDATE SET duration_secs = duration_secs + excluded.duration_secs
            "#,
            params![device_id.as_str(), day_str, secs],
        )?;

        debug!(device_id = %device_id, day = %day_str, added_secs = secs, "Usage added");
        Ok(())
    }

    fn prune_usage_before(&self, day: NaiveDate) -> StoreResult<usize> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM usage WHERE day < ?",
            [day.format(DAY_FORMAT).to_string()],
        )?;
        Ok(removed)
    }

    fn get_threshold_override(&self, device_id: &DeviceId) -> StoreResult<Option<u64>> {
        let conn = self.conn.lock();

        let bytes: Option<i64> = conn
            .query_row(
                "SELECT bytes_per_minute FROM threshold_overrides WHERE device_id = ?",
                [device_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        Ok(bytes.map(|b| b.max(0) as u64))
    }

    fn set_threshold_override(&self, device_id: &DeviceId, bytes_per_minute: u64) -> StoreResult<()> {
        let conn = self.conn.lock();

        conn.execute(
            r#"
            INSERT INTO threshold_overrides (device_id, bytes_per_minute, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(device_id)
            DO UPDATE SET bytes_per_minute = excluded.bytes_per_minute,
                          updated_at = excluded.updated_at
            "#,
            params![
                device_id.as_str(),
                to_sql_int(bytes_per_minute)?,
                devtimer_util::now().to_rfc3339()
            ],
        )?;

        debug!(device_id = %device_id, bytes_per_minute, "Threshold override set");
        Ok(())
    }

    fn get_last_reset_date(&self) -> StoreResult<Option<NaiveDate>> {
        let conn = self.conn.lock();

        let day: Option<Option<String>> = conn
            .query_row(
                "SELECT last_reset_date FROM daemon_state WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        day.flatten().as_deref().map(parse_day).transpose()
    }

    fn set_last_reset_date(&self, day: NaiveDate) -> StoreResult<()> {
        let conn = self.conn.lock();

        conn.execute(
            r#"
            INSERT INTO daemon_state (id, last_reset_date)
            VALUES (1, ?)
            ON CONFLICT(id)
            DO UPDATE SET last_reset_date = excluded.last_reset_date
            "#,
            [day.format(DAY_FORMAT).to_string()],
        )?;

        debug!(day = %day, "Last reset date saved");
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.conn.lock().query_row("SELECT 1", [], |_| Ok(())).is_ok()
    }
}
