use super::schema::{self, SCHEMA_VERSION};
use crate::error::Result;
use crate::leak::LeakRecord;
use crate::metrics::SampleSnapshot;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::time::{Duration, Instant};

/// Session writer for monitoring data
///
/// Samples are buffered in memory and written per checkpoint in one
/// transaction; leak records are upserted immediately so a crash keeps
/// the detections seen so far.
pub struct Storage {
    conn: Connection,
    start: Instant,
    pending: Vec<(i64, SampleSnapshot)>,
}

impl Storage {
    /// Create a new session database file
    pub fn new(
        path: &Path,
        process_name: &str,
        pid: u32,
        interval: Duration,
        capacity: usize,
    ) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL allows concurrent reads while the session is recording
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;

        Self::init(conn, process_name, pid, interval, capacity)
    }

    /// In-memory session, used by tests and short-lived embedders.
    pub fn in_memory(process_name: &str, pid: u32) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, process_name, pid, Duration::from_secs(1), 120)
    }

    fn init(
        conn: Connection,
        process_name: &str,
        pid: u32,
        interval: Duration,
        capacity: usize,
    ) -> Result<Self> {
        schema::create_tables(&conn)?;
        schema::set_meta(&conn, "version", &SCHEMA_VERSION.to_string())?;
        schema::set_meta(&conn, "pid", &pid.to_string())?;
        schema::set_meta(&conn, "process_name", process_name)?;
        schema::set_meta(&conn, "start_time", &chrono::Utc::now().to_rfc3339())?;
        schema::set_meta(&conn, "interval_ms", &interval.as_millis().to_string())?;
        schema::set_meta(&conn, "history_capacity", &capacity.to_string())?;

        Ok(Storage {
            conn,
            start: Instant::now(),
            pending: Vec::new(),
        })
    }

    /// Buffer one sampler tick for the next flush
    pub fn record_sample(&mut self, snapshot: &SampleSnapshot) {
        let timestamp_ms = self.start.elapsed().as_millis() as i64;
        self.pending.push((timestamp_ms, *snapshot));
    }

    /// Upsert a leak record. Called both at detection and at resolution;
    /// the correlation id keys the row.
    pub fn record_leak(&mut self, record: &LeakRecord) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO leaks
             (correlation, entity, kind, details, detected_at, resolved, resolution_secs, snapshot)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                record.correlation.0 as i64,
                record.entity as i64,
                record.kind,
                record.details,
                record.detected_at.to_rfc3339(),
                record.resolved as i64,
                record.resolution.map(|d| d.as_secs_f64()),
                record.snapshot,
            ],
        )?;
        Ok(())
    }

    /// Write all buffered samples in one transaction
    pub fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO samples (timestamp_ms, cpu, memory_mb, fps, leaks)
                 VALUES (?, ?, ?, ?, ?)",
            )?;
            for (timestamp_ms, snap) in self.pending.drain(..) {
                stmt.execute(params![
                    timestamp_ms,
                    snap.cpu,
                    snap.memory_mb,
                    snap.fps,
                    snap.leaks
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Aggregate view of one recorded session
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub process_name: String,
    pub pid: u32,
    pub started: String,
    pub duration_secs: f64,
    pub samples: u64,
    pub avg_cpu: f64,
    pub max_cpu: f64,
    pub avg_memory_mb: f64,
    pub max_memory_mb: f64,
    /// Minimum over nonzero frame-rate readings, if any were recorded.
    pub min_fps: Option<f64>,
    pub max_fps: f64,
    pub leaks_detected: u64,
    pub leaks_resolved: u64,
}

pub fn session_summary(conn: &Connection) -> Result<SessionSummary> {
    let process_name =
        schema::get_meta(conn, "process_name")?.unwrap_or_else(|| "unknown".to_string());
    let pid = schema::get_meta(conn, "pid")?
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let started = schema::get_meta(conn, "start_time")?.unwrap_or_else(|| "unknown".to_string());

    let (samples, duration_ms): (u64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(MAX(timestamp_ms), 0) FROM samples",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let (avg_cpu, max_cpu, avg_memory_mb, max_memory_mb, max_fps): (f64, f64, f64, f64, f64) =
        conn.query_row(
            "SELECT COALESCE(AVG(cpu), 0), COALESCE(MAX(cpu), 0),
                    COALESCE(AVG(memory_mb), 0), COALESCE(MAX(memory_mb), 0),
                    COALESCE(MAX(fps), 0)
             FROM samples",
            [],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            },
        )?;

    let min_fps: Option<f64> = conn
        .query_row("SELECT MIN(fps) FROM samples WHERE fps > 0", [], |row| {
            row.get(0)
        })
        .optional()?
        .flatten();

    let (leaks_detected, leaks_resolved): (u64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(resolved), 0) FROM leaks",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    Ok(SessionSummary {
        process_name,
        pid,
        started,
        duration_secs: duration_ms as f64 / 1000.0,
        samples,
        avg_cpu,
        max_cpu,
        avg_memory_mb,
        max_memory_mb,
        min_fps,
        max_fps,
        leaks_detected,
        leaks_resolved: leaks_resolved as u64,
    })
}

/// One leak row as recorded
#[derive(Debug, Clone)]
pub struct LeakRow {
    pub correlation: i64,
    pub entity: i64,
    pub kind: String,
    pub details: String,
    pub detected_at: String,
    pub resolved: bool,
    pub resolution_secs: Option<f64>,
}

pub fn query_leaks(conn: &Connection) -> Result<Vec<LeakRow>> {
    let mut stmt = conn.prepare(
        "SELECT correlation, entity, kind, details, detected_at, resolved, resolution_secs
         FROM leaks ORDER BY correlation",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(LeakRow {
            correlation: row.get(0)?,
            entity: row.get(1)?,
            kind: row.get(2)?,
            details: row.get(3)?,
            detected_at: row.get(4)?,
            resolved: row.get::<_, i64>(5)? != 0,
            resolution_secs: row.get(6)?,
        })
    })?;

    let mut leaks = Vec::new();
    for row in rows {
        leaks.push(row?);
    }
    Ok(leaks)
}

/// Recorded sample rows as (timestamp_ms, cpu, memory_mb, fps, leaks)
pub fn query_samples(conn: &Connection) -> Result<Vec<(i64, f64, f64, f64, f64)>> {
    let mut stmt = conn.prepare(
        "SELECT timestamp_ms, cpu, memory_mb, fps, leaks FROM samples ORDER BY timestamp_ms",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
        ))
    })?;

    let mut samples = Vec::new();
    for row in rows {
        samples.push(row?);
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leak::{Entity, LeakMonitor, Liveness};
    use std::sync::Arc;
    use std::thread;

    fn snapshot(cpu: f64, memory_mb: f64, fps: f64) -> SampleSnapshot {
        SampleSnapshot {
            cpu,
            memory_mb,
            fps,
            ..Default::default()
        }
    }

    #[test]
    fn samples_round_trip_through_flush() {
        let mut storage = Storage::in_memory("test", 1).unwrap();
        storage.record_sample(&snapshot(10.0, 100.0, 60.0));
        storage.record_sample(&snapshot(20.0, 200.0, 0.0));
        storage.record_sample(&snapshot(30.0, 150.0, 30.0));
        storage.flush().unwrap();

        let rows = query_samples(storage.connection()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].1, 10.0);
        assert_eq!(rows[2].3, 30.0);

        let summary = session_summary(storage.connection()).unwrap();
        assert_eq!(summary.samples, 3);
        assert_eq!(summary.max_cpu, 30.0);
        assert_eq!(summary.avg_cpu, 20.0);
        assert_eq!(summary.max_memory_mb, 200.0);
        // The zero reading is excluded from the minimum.
        assert_eq!(summary.min_fps, Some(30.0));
        assert_eq!(summary.max_fps, 60.0);
    }

    #[test]
    fn flush_with_nothing_pending_is_a_no_op() {
        let mut storage = Storage::in_memory("test", 1).unwrap();
        storage.flush().unwrap();
        assert_eq!(query_samples(storage.connection()).unwrap().len(), 0);
    }

    #[test]
    fn empty_session_summarizes_to_zeroes() {
        let storage = Storage::in_memory("test", 7).unwrap();
        let summary = session_summary(storage.connection()).unwrap();
        assert_eq!(summary.pid, 7);
        assert_eq!(summary.samples, 0);
        assert_eq!(summary.min_fps, None);
        assert_eq!(summary.leaks_detected, 0);
    }

    #[test]
    fn leak_rows_upsert_on_resolution() {
        // Drive a real monitor to get genuine records.
        let monitor = LeakMonitor::with_grace_period(std::time::Duration::from_millis(30));
        monitor.on_detach(Entity::new(
            9,
            "Widget",
            "Widget<9>",
            Arc::new(|| Ok(Liveness::Detached)),
        ));
        thread::sleep(std::time::Duration::from_millis(200));

        let record = monitor.records().pop().expect("record");
        let mut storage = Storage::in_memory("test", 1).unwrap();
        storage.record_leak(&record).unwrap();

        let rows = query_leaks(storage.connection()).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].resolved);
        assert_eq!(rows[0].kind, "Widget");

        monitor.on_destroyed(9, record.correlation);
        let resolved = monitor.records().pop().unwrap();
        storage.record_leak(&resolved).unwrap();

        let rows = query_leaks(storage.connection()).unwrap();
        assert_eq!(rows.len(), 1, "resolution upserts the same row");
        assert!(rows[0].resolved);
        assert!(rows[0].resolution_secs.is_some());

        let summary = session_summary(storage.connection()).unwrap();
        assert_eq!(summary.leaks_detected, 1);
        assert_eq!(summary.leaks_resolved, 1);
    }
}
