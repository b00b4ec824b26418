//! Durable, append-only storage of signal chunks.

use chrono::{DateTime, Duration, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::db::{Database, StoreResult};

/// Hard cap on rows returned by [`ChunkStore::query`]. This is a backpressure
/// control protecting callers from unbounded transfer sizes; requested limits
/// above it are clamped, never honored.
pub const MAX_QUERY_ROWS: usize = 200;

/// One contiguous, uniformly-sampled segment of one channel for one patient.
///
/// Chunks are immutable once stored. `t_end` is derived:
/// `t_start + values.len() / sampling_rate_hz` seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalChunk {
    pub id: Uuid,
    pub patient_id: String,
    pub channel: String,
    pub sampling_rate_hz: f64,
    pub t_start: DateTime<Utc>,
    pub t_end: DateTime<Utc>,
    pub values: Vec<f64>,
    pub created_at: DateTime<Utc>,
}

impl SignalChunk {
    /// Chunk duration in seconds, from sample count and rate.
    pub fn duration_secs(&self) -> f64 {
        self.values.len() as f64 / self.sampling_rate_hz
    }
}

/// A chunk as submitted for ingestion, before an id and `t_end` exist.
///
/// Field validity (positive rate, non-empty values) is checked once at the
/// pipeline boundary; the store trusts its caller.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub patient_id: String,
    pub channel: String,
    pub sampling_rate_hz: f64,
    pub t_start: DateTime<Utc>,
    pub values: Vec<f64>,
}

/// Derive a chunk's end timestamp at microsecond resolution.
pub fn chunk_end(t_start: DateTime<Utc>, sample_count: usize, sampling_rate_hz: f64) -> DateTime<Utc> {
    let micros = (sample_count as f64 / sampling_rate_hz * 1_000_000.0).round() as i64;
    t_start + Duration::microseconds(micros)
}

/// Append-only store of [`SignalChunk`] rows, keyed by (patient, channel,
/// time).
#[derive(Clone)]
pub struct ChunkStore {
    db: Database,
}

impl ChunkStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Write one chunk durably and return it with its generated id.
    ///
    /// No deduplication: two identical calls produce two distinct rows. The
    /// store does not order or validate chunks against each other; overlap
    /// handling is a product decision that has not been made.
    pub fn ingest(&self, new: NewChunk) -> StoreResult<SignalChunk> {
        let chunk = SignalChunk {
            id: Uuid::new_v4(),
            t_end: chunk_end(new.t_start, new.values.len(), new.sampling_rate_hz),
            patient_id: new.patient_id,
            channel: new.channel,
            sampling_rate_hz: new.sampling_rate_hz,
            t_start: new.t_start,
            values: new.values,
            created_at: Utc::now(),
        };

        let values_json = serde_json::to_string(&chunk.values)?;

        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO signal_chunks
             (id, patient_id, channel, sampling_rate_hz, t_start, t_end, values_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                chunk.id.to_string(),
                chunk.patient_id,
                chunk.channel,
                chunk.sampling_rate_hz,
                chunk.t_start.to_rfc3339(),
                chunk.t_end.to_rfc3339(),
                values_json,
                chunk.created_at.to_rfc3339(),
            ],
        )?;

        Ok(chunk)
    }

    /// Chunks with `t_start >= since` for one (patient, channel), ascending
    /// by `t_start`, capped at [`MAX_QUERY_ROWS`] regardless of `limit`.
    pub fn query(
        &self,
        patient_id: &str,
        channel: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<SignalChunk>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            "SELECT id, patient_id, channel, sampling_rate_hz, t_start, t_end, values_json, created_at
             FROM signal_chunks
             WHERE patient_id = ?1 AND channel = ?2 AND t_start >= ?3
             ORDER BY t_start ASC
             LIMIT ?4",
        )?;

        let chunks = stmt
            .query_map(
                params![
                    patient_id,
                    channel,
                    since.to_rfc3339(),
                    limit.min(MAX_QUERY_ROWS) as i64,
                ],
                row_to_chunk,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(chunks)
    }

    /// The single chunk with the greatest `t_start` for the pair, if any.
    pub fn latest(&self, patient_id: &str, channel: &str) -> StoreResult<Option<SignalChunk>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            "SELECT id, patient_id, channel, sampling_rate_hz, t_start, t_end, values_json, created_at
             FROM signal_chunks
             WHERE patient_id = ?1 AND channel = ?2
             ORDER BY t_start DESC
             LIMIT 1",
        )?;

        let result = stmt.query_row(params![patient_id, channel], row_to_chunk);

        match result {
            Ok(chunk) => Ok(Some(chunk)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Total number of stored chunks. Used by the stats surface.
    pub fn count(&self) -> StoreResult<u64> {
        let conn = self.db.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM signal_chunks", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<SignalChunk> {
    let values_json: String = row.get(6)?;
    Ok(SignalChunk {
        id: Uuid::parse_str(&row.get::<_, String>(0)?).unwrap(),
        patient_id: row.get(1)?,
        channel: row.get(2)?,
        sampling_rate_hz: row.get(3)?,
        t_start: row.get::<_, String>(4)?.parse().unwrap(),
        t_end: row.get::<_, String>(5)?.parse().unwrap(),
        values: serde_json::from_str(&values_json).unwrap(),
        created_at: row.get::<_, String>(7)?.parse().unwrap(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store() -> ChunkStore {
        ChunkStore::new(Database::open_in_memory().unwrap())
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn new_chunk(t_start: DateTime<Utc>, values: Vec<f64>) -> NewChunk {
        NewChunk {
            patient_id: "p-1".to_string(),
            channel: "ecg".to_string(),
            sampling_rate_hz: 4.0,
            t_start,
            values,
        }
    }

    #[test]
    fn test_t_end_derivation() {
        let store = store();
        let chunk = store
            .ingest(new_chunk(t0(), vec![1.0, 2.0, 3.0, 4.0]))
            .unwrap();

        // 4 samples at 4 Hz is exactly one second.
        assert_eq!(chunk.t_end, t0() + Duration::seconds(1));

        let expected_micros = (chunk.values.len() as f64 / chunk.sampling_rate_hz) * 1e6;
        let actual_micros = (chunk.t_end - chunk.t_start).num_microseconds().unwrap() as f64;
        assert!((actual_micros - expected_micros).abs() < 1.0);
    }

    #[test]
    fn test_ingest_round_trip() {
        let store = store();
        let stored = store.ingest(new_chunk(t0(), vec![0.5, -0.5])).unwrap();

        let fetched = store.latest("p-1", "ecg").unwrap().unwrap();
        assert_eq!(fetched.id, stored.id);
        assert_eq!(fetched.values, vec![0.5, -0.5]);
        assert_eq!(fetched.t_start, t0());
        assert_eq!(fetched.sampling_rate_hz, 4.0);
    }

    #[test]
    fn test_no_deduplication() {
        let store = store();
        let a = store.ingest(new_chunk(t0(), vec![1.0])).unwrap();
        let b = store.ingest(new_chunk(t0(), vec![1.0])).unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_query_ascending_and_since_filter() {
        let store = store();
        for offset in [30, 10, 20] {
            store
                .ingest(new_chunk(t0() + Duration::seconds(offset), vec![1.0]))
                .unwrap();
        }

        let chunks = store
            .query("p-1", "ecg", t0() + Duration::seconds(15), 100)
            .unwrap();

        let starts: Vec<_> = chunks.iter().map(|c| c.t_start).collect();
        assert_eq!(
            starts,
            vec![t0() + Duration::seconds(20), t0() + Duration::seconds(30)]
        );
    }

    #[test]
    fn test_query_cap() {
        let store = store();
        for i in 0..250 {
            store
                .ingest(new_chunk(t0() + Duration::seconds(i), vec![1.0]))
                .unwrap();
        }

        // A requested limit above the cap is clamped to it.
        let chunks = store.query("p-1", "ecg", t0(), 10_000).unwrap();
        assert_eq!(chunks.len(), MAX_QUERY_ROWS);

        let mut sorted = chunks.clone();
        sorted.sort_by_key(|c| c.t_start);
        assert_eq!(
            chunks.iter().map(|c| c.id).collect::<Vec<_>>(),
            sorted.iter().map(|c| c.id).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_latest_none_for_unknown_pair() {
        let store = store();
        store.ingest(new_chunk(t0(), vec![1.0])).unwrap();

        assert!(store.latest("p-1", "eeg").unwrap().is_none());
        assert!(store.latest("p-2", "ecg").unwrap().is_none());
    }

    #[test]
    fn test_latest_picks_greatest_t_start() {
        let store = store();
        store.ingest(new_chunk(t0(), vec![1.0])).unwrap();
        let newer = store
            .ingest(new_chunk(t0() + Duration::seconds(5), vec![2.0]))
            .unwrap();
        store
            .ingest(new_chunk(t0() - Duration::seconds(5), vec![3.0]))
            .unwrap();

        let latest = store.latest("p-1", "ecg").unwrap().unwrap();
        assert_eq!(latest.id, newer.id);
    }
}
