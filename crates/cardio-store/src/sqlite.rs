//! SQLite persistence layer for observations and predictions.
//!
//! Creates the schema on open and seeds demo observations on request.
//! Timestamps are stored as fixed-precision RFC 3339 UTC text, so lexical
//! order in SQL equals chronological order.

use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use cardio_core::{
    HealthObservation, Level, ObservationInput, PredictionRecord, RiskLabel, Sex,
};
use chrono::{DateTime, Duration, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{error, info, warn};

use crate::{PredictionStore, StoreError};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS observations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        subject_id TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        age REAL,
        gender INTEGER,
        height REAL,
        weight REAL,
        bmi REAL,
        ap_hi REAL,
        ap_lo REAL,
        cholesterol INTEGER,
        gluc INTEGER,
        smoke INTEGER,
        alco INTEGER,
        active INTEGER,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE INDEX IF NOT EXISTS idx_observations_subject
        ON observations(subject_id, timestamp DESC);
    CREATE INDEX IF NOT EXISTS idx_observations_timestamp
        ON observations(timestamp);

    CREATE TABLE IF NOT EXISTS predictions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        observation_id INTEGER,
        subject_id TEXT NOT NULL,
        observed_at TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        age REAL NOT NULL,
        gender INTEGER NOT NULL,
        height REAL NOT NULL,
        weight REAL NOT NULL,
        bmi REAL NOT NULL,
        ap_hi REAL NOT NULL,
        ap_lo REAL NOT NULL,
        cholesterol INTEGER NOT NULL,
        gluc INTEGER NOT NULL,
        smoke INTEGER NOT NULL,
        alco INTEGER NOT NULL,
        active INTEGER NOT NULL,
        prediction INTEGER NOT NULL,
        probability REAL,
        advisory TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_predictions_timestamp
        ON predictions(timestamp DESC);
";

const OBSERVATION_COLUMNS: &str = "id, subject_id, timestamp, age, gender, height, weight, bmi, \
     ap_hi, ap_lo, cholesterol, gluc, smoke, alco, active";

const PREDICTION_COLUMNS: &str = "id, observation_id, subject_id, observed_at, age, gender, \
     height, weight, bmi, ap_hi, ap_lo, cholesterol, gluc, smoke, alco, active, \
     timestamp, prediction, probability, advisory";

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Offset-less forms written by external intake scripts; read as UTC.
const NAIVE_TS_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NAIVE_TS_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| StoreError::Corrupt(format!("unreadable timestamp '{}'", raw)))
}

/// SQLite-backed [`PredictionStore`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) the database file, creating parent directories as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let store = Self::init(Connection::open(path)?)?;
        info!("Database initialized at {}", path.display());
        Ok(store)
    }

    /// Creates an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|e| {
            error!("DB lock poisoned: {}", e);
            StoreError::LockPoisoned
        })
    }

    /// Seeds demo observations if the observations table is empty.
    ///
    /// Returns the number of rows inserted.
    pub fn seed_examples(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .lock()?
            .query_row("SELECT COUNT(*) FROM observations", [], |r| r.get(0))?;
        if count > 0 {
            info!("Database already has {} observations, skipping seed", count);
            return Ok(0);
        }

        info!("Seeding example observations...");

        // (subject, age, gender, height, weight, ap_hi, ap_lo, cholesterol, gluc, smoke, alco, active)
        let examples = [
            ("user1", 34.0, Sex::Female, 162.0, 58.0, 112.0, 72.0, Level::Normal, Level::Normal, false, false, true),
            ("user2", 47.0, Sex::Male, 178.0, 86.0, 128.0, 84.0, Level::AboveNormal, Level::Normal, true, false, true),
            ("user3", 58.0, Sex::Female, 156.0, 79.0, 146.0, 92.0, Level::WellAboveNormal, Level::AboveNormal, false, false, false),
            ("user4", 63.0, Sex::Male, 171.0, 95.0, 162.0, 98.0, Level::WellAboveNormal, Level::WellAboveNormal, true, true, false),
            ("user5", 41.0, Sex::Female, 168.0, 64.0, 118.0, 76.0, Level::Normal, Level::Normal, false, true, true),
        ];

        let now = Utc::now();
        let mut inserted = 0;
        for (idx, (subject, age, sex, height, weight, ap_hi, ap_lo, cholesterol, glucose, smoker, alcohol, active)) in
            examples.into_iter().enumerate()
        {
            let observation = HealthObservation {
                id: None,
                subject_id: subject.to_string(),
                timestamp: now - Duration::minutes(idx as i64),
                age,
                sex,
                height,
                weight,
                bmi: cardio_core::compute_bmi(height, weight),
                ap_hi,
                ap_lo,
                cholesterol,
                glucose,
                smoker,
                alcohol,
                active,
            };
            self.insert_observation(&observation)?;
            info!("  Seeded: {}", subject);
            inserted += 1;
        }

        info!("Seeded {} example observations", inserted);
        Ok(inserted)
    }
}

fn observation_from_row(row: &Row<'_>) -> rusqlite::Result<(String, ObservationInput)> {
    let raw_ts: String = row.get(2)?;
    let input = ObservationInput {
        id: Some(row.get(0)?),
        subject_id: Some(row.get(1)?),
        timestamp: None,
        age: row.get(3)?,
        gender: row.get(4)?,
        height: row.get(5)?,
        weight: row.get(6)?,
        bmi: row.get(7)?,
        ap_hi: row.get(8)?,
        ap_lo: row.get(9)?,
        cholesterol: row.get(10)?,
        gluc: row.get(11)?,
        smoke: row.get(12)?,
        alco: row.get(13)?,
        active: row.get(14)?,
    };
    Ok((raw_ts, input))
}

fn with_timestamp((raw_ts, mut input): (String, ObservationInput)) -> Result<ObservationInput, StoreError> {
    input.timestamp = Some(parse_ts(&raw_ts)?);
    Ok(input)
}

/// Prediction row with undecoded codes and timestamps.
struct PredictionRow {
    id: i64,
    observation_id: Option<i64>,
    subject_id: String,
    observed_at: String,
    /// age, height, weight, bmi, ap_hi, ap_lo
    values: [f64; 6],
    /// gender, cholesterol, gluc, smoke, alco, active
    codes: [i64; 6],
    timestamp: String,
    prediction: i64,
    probability: Option<f64>,
    advisory: Option<String>,
}

fn prediction_from_row(row: &Row<'_>) -> rusqlite::Result<PredictionRow> {
    Ok(PredictionRow {
        id: row.get(0)?,
        observation_id: row.get(1)?,
        subject_id: row.get(2)?,
        observed_at: row.get(3)?,
        values: [row.get(4)?, row.get(6)?, row.get(7)?, row.get(8)?, row.get(9)?, row.get(10)?],
        codes: [row.get(5)?, row.get(11)?, row.get(12)?, row.get(13)?, row.get(14)?, row.get(15)?],
        timestamp: row.get(16)?,
        prediction: row.get(17)?,
        probability: row.get(18)?,
        advisory: row.get(19)?,
    })
}

fn stored_flag(name: &str, code: i64) -> Result<bool, StoreError> {
    match code {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(StoreError::Corrupt(format!("{} flag {}", name, other))),
    }
}

impl TryFrom<PredictionRow> for PredictionRecord {
    type Error = StoreError;

    fn try_from(row: PredictionRow) -> Result<Self, Self::Error> {
        let [age, height, weight, bmi, ap_hi, ap_lo] = row.values;
        let [gender, cholesterol, gluc, smoke, alco, active] = row.codes;
        let corrupt = |e: String| StoreError::Corrupt(format!("prediction {}: {}", row.id, e));

        let observation = HealthObservation {
            id: row.observation_id,
            subject_id: row.subject_id,
            timestamp: parse_ts(&row.observed_at)?,
            age,
            sex: Sex::try_from(gender).map_err(corrupt)?,
            height,
            weight,
            bmi,
            ap_hi,
            ap_lo,
            cholesterol: Level::try_from(cholesterol).map_err(corrupt)?,
            glucose: Level::try_from(gluc).map_err(corrupt)?,
            smoker: stored_flag("smoke", smoke)?,
            alcohol: stored_flag("alco", alco)?,
            active: stored_flag("active", active)?,
        };

        Ok(PredictionRecord {
            id: Some(row.id),
            observation,
            predicted_at: parse_ts(&row.timestamp)?,
            label: RiskLabel::try_from(row.prediction).map_err(corrupt)?,
            probability: row.probability,
            advisory: row.advisory,
        })
    }
}

impl PredictionStore for SqliteStore {
    fn insert_observation(&self, obs: &HealthObservation) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO observations
             (subject_id, timestamp, age, gender, height, weight, bmi, ap_hi, ap_lo,
              cholesterol, gluc, smoke, alco, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                obs.subject_id,
                format_ts(&obs.timestamp),
                obs.age,
                obs.sex.code(),
                obs.height,
                obs.weight,
                obs.bmi,
                obs.ap_hi,
                obs.ap_lo,
                obs.cholesterol.code(),
                obs.glucose.code(),
                i64::from(obs.smoker),
                i64::from(obs.alcohol),
                i64::from(obs.active),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn latest_observation(&self, subject_id: &str) -> Result<Option<ObservationInput>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM observations WHERE subject_id = ?1
                     ORDER BY timestamp DESC, id DESC LIMIT 1",
                    OBSERVATION_COLUMNS
                ),
                params![subject_id],
                observation_from_row,
            )
            .optional()?;
        row.map(with_timestamp).transpose()
    }

    fn observations_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Result<ObservationInput, StoreError>>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM observations WHERE timestamp >= ?1 ORDER BY timestamp ASC, id ASC",
            OBSERVATION_COLUMNS
        ))?;
        let rows = stmt.query_map(params![format_ts(&since)], observation_from_row)?;

        let observations = rows
            .map(|row| row.map_err(StoreError::from).and_then(with_timestamp))
            .collect();
        Ok(observations)
    }

    fn insert_prediction(&self, record: &PredictionRecord) -> Result<i64, StoreError> {
        let obs = &record.observation;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO predictions
             (observation_id, subject_id, observed_at, timestamp, age, gender, height, weight,
              bmi, ap_hi, ap_lo, cholesterol, gluc, smoke, alco, active, prediction,
              probability, advisory)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                     ?17, ?18, ?19)",
            params![
                obs.id,
                obs.subject_id,
                format_ts(&obs.timestamp),
                format_ts(&record.predicted_at),
                obs.age,
                obs.sex.code(),
                obs.height,
                obs.weight,
                obs.bmi,
                obs.ap_hi,
                obs.ap_lo,
                obs.cholesterol.code(),
                obs.glucose.code(),
                i64::from(obs.smoker),
                i64::from(obs.alcohol),
                i64::from(obs.active),
                record.label.code(),
                record.probability,
                record.advisory,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_prediction(&self, id: i64) -> Result<Option<PredictionRecord>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM predictions WHERE id = ?1", PREDICTION_COLUMNS),
                params![id],
                prediction_from_row,
            )
            .optional()?;
        row.map(PredictionRecord::try_from).transpose()
    }

    fn recent_predictions(&self, limit: usize) -> Result<Vec<PredictionRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM predictions ORDER BY timestamp DESC, id DESC LIMIT ?1",
            PREDICTION_COLUMNS
        ))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![limit], prediction_from_row)?;

        let mut records = Vec::new();
        for row in rows {
            match PredictionRecord::try_from(row?) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable prediction: {}", e),
            }
        }
        Ok(records)
    }

    fn count_predictions(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .lock()?
            .query_row("SELECT COUNT(*) FROM predictions", [], |r| r.get(0))?;
        Ok(count.max(0) as usize)
    }

    fn append_advisory(&self, id: i64, text: &str) -> Result<(), StoreError> {
        let updated = self.lock()?.execute(
            "UPDATE predictions
             SET advisory = CASE
                 WHEN advisory IS NULL OR advisory = '' THEN ?2
                 ELSE advisory || char(10) || char(10) || ?2
             END
             WHERE id = ?1",
            params![id, text],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("prediction {}", id)));
        }
        Ok(())
    }
}
