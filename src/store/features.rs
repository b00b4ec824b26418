//! Durable storage of computed features.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::db::{Database, StoreError, StoreResult};

/// One named scalar statistic computed over one time window for one patient.
///
/// Identity is `(patient_id, window_start, window_end, name, method)`.
/// Rows are append-only: recomputation with a different method, or at a
/// different time, adds rows rather than overwriting, so features stay
/// auditable and reproducible.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    pub id: Uuid,
    pub patient_id: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub name: String,
    pub value: f64,
    pub method: String,
    pub created_at: DateTime<Utc>,
}

impl Feature {
    pub fn new(
        patient_id: impl Into<String>,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        name: impl Into<String>,
        value: f64,
        method: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            patient_id: patient_id.into(),
            window_start,
            window_end,
            name: name.into(),
            value,
            method: method.into(),
            created_at: Utc::now(),
        }
    }
}

/// Append-only store of [`Feature`] rows.
#[derive(Clone)]
pub struct FeatureStore {
    db: Database,
}

impl FeatureStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Write a batch of features in one transaction.
    ///
    /// All-or-nothing: the statistics of one extraction pass are a single
    /// unit of work, so a failure on any row rolls back the whole batch.
    /// Each row's `window_end > window_start` invariant is checked inside
    /// the transaction.
    pub fn persist(&self, features: &[Feature]) -> StoreResult<()> {
        let mut conn = self.db.lock();
        let tx = conn.transaction()?;

        for feature in features {
            if feature.window_end <= feature.window_start {
                return Err(StoreError::InvalidFeature(format!(
                    "window_end {} is not after window_start {} for feature '{}'",
                    feature.window_end, feature.window_start, feature.name
                )));
            }

            tx.execute(
                "INSERT INTO features
                 (id, patient_id, window_start, window_end, name, value, method, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    feature.id.to_string(),
                    feature.patient_id,
                    feature.window_start.to_rfc3339(),
                    feature.window_end.to_rfc3339(),
                    feature.name,
                    feature.value,
                    feature.method,
                    feature.created_at.to_rfc3339(),
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Features recorded for one window, ascending by name.
    pub fn for_window(
        &self,
        patient_id: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> StoreResult<Vec<Feature>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            "SELECT id, patient_id, window_start, window_end, name, value, method, created_at
             FROM features
             WHERE patient_id = ?1 AND window_start = ?2 AND window_end = ?3
             ORDER BY name ASC",
        )?;

        let features = stmt
            .query_map(
                params![
                    patient_id,
                    window_start.to_rfc3339(),
                    window_end.to_rfc3339(),
                ],
                row_to_feature,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(features)
    }

    /// Total number of stored feature rows. Used by the stats surface.
    pub fn count(&self) -> StoreResult<u64> {
        let conn = self.db.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM features", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn row_to_feature(row: &rusqlite::Row<'_>) -> rusqlite::Result<Feature> {
    Ok(Feature {
        id: Uuid::parse_str(&row.get::<_, String>(0)?).unwrap(),
        patient_id: row.get(1)?,
        window_start: row.get::<_, String>(2)?.parse().unwrap(),
        window_end: row.get::<_, String>(3)?.parse().unwrap(),
        name: row.get(4)?,
        value: row.get(5)?,
        method: row.get(6)?,
        created_at: row.get::<_, String>(7)?.parse().unwrap(),
    })
}
