//! Persistence gateway for health observations and the predictions made from them.
//!
//! - [`PredictionStore`] — Operations the orchestrator needs from a record store
//! - [`SqliteStore`] — SQLite implementation behind a mutex-guarded connection
//! - [`StoreError`] — Storage failures, convertible into [`CardioError`]
//!
//! Observations are returned as raw [`ObservationInput`] rows so that a single
//! malformed record can be rejected by validation without failing the read of
//! its neighbours.

mod sqlite;

use cardio_core::{CardioError, HealthObservation, ObservationInput, PredictionRecord};
use chrono::{DateTime, Utc};

pub use sqlite::SqliteStore;

/// Errors raised by a record store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Failed to prepare database location: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stored record is corrupt: {0}")]
    Corrupt(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for CardioError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => CardioError::NotFound(msg),
            other => CardioError::Persistence(other.to_string()),
        }
    }
}

/// Durable log of health observations and predictions.
///
/// Writes are independent; no operation spans more than one record.
pub trait PredictionStore: Send + Sync {
    /// Stores a validated observation and returns its id.
    fn insert_observation(&self, observation: &HealthObservation) -> Result<i64, StoreError>;

    /// Returns the newest observation for a subject by timestamp.
    fn latest_observation(&self, subject_id: &str) -> Result<Option<ObservationInput>, StoreError>;

    /// Returns every observation with `timestamp >= since`, oldest first.
    ///
    /// Rows are decoded one at a time. A row that cannot be read comes back
    /// as an `Err` item and does not affect its neighbours; the outer error
    /// is reserved for a failed query.
    fn observations_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Result<ObservationInput, StoreError>>, StoreError>;

    /// Stores a prediction and returns its id.
    fn insert_prediction(&self, record: &PredictionRecord) -> Result<i64, StoreError>;

    fn get_prediction(&self, id: i64) -> Result<Option<PredictionRecord>, StoreError>;

    /// Returns up to `limit` predictions, newest first.
    fn recent_predictions(&self, limit: usize) -> Result<Vec<PredictionRecord>, StoreError>;

    fn count_predictions(&self) -> Result<usize, StoreError>;

    /// Appends advisory text to a stored prediction without touching its prediction fields.
    fn append_advisory(&self, id: i64, text: &str) -> Result<(), StoreError>;
}
