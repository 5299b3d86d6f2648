//! Prediction orchestration for the cardio risk service.
//!
//! - [`PredictionEngine`] — Runs observations through validation, vectorization,
//!   classification and persistence
//! - [`BatchScheduler`] — Background loop that re-predicts recent observations
//! - [`PredictionOutcome`] / [`BatchReport`] — Results handed back to callers
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cardio_engine::PredictionEngine;
//!
//! let engine = PredictionEngine::new(Arc::new(model), Arc::new(store))
//!     .with_policy(config.persistence_policy);
//!
//! let outcome = engine.predict_one(&input)?;
//! println!("label {:?} stored as {:?}", outcome.record.label, outcome.record.id);
//! ```
//!
//! # Pipeline
//!
//! Every prediction moves through the same stages:
//!
//! 1. **Received** — raw [`ObservationInput`] accepted
//! 2. **Validated** — ranges and codes checked, BMI filled in
//! 3. **Vectorized** — fixed-order [`FeatureVector`] built
//! 4. **Classified** — scaler and classifier applied
//! 5. **Persisted** — [`PredictionRecord`] written to the store
//! 6. **Responded** — outcome returned
//!
//! A failure at any step ends the run in **Errored**. How a failed write is
//! handled depends on the configured [`PersistencePolicy`].

mod scheduler;

use std::fmt;
use std::sync::Arc;

use cardio_config::PersistencePolicy;
use cardio_core::{
    CardioError, FeatureVector, HealthObservation, ObservationInput, PredictionRecord,
    ValidationRules,
};
use cardio_llm::{AdvisoryGenerator, AdvisoryProfile};
use cardio_model::RiskClassifier;
use cardio_store::PredictionStore;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

pub use scheduler::BatchScheduler;

/// Steps of a single prediction run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Validated,
    Vectorized,
    Classified,
    Persisted,
    Responded,
    Errored,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Received => "received",
            Self::Validated => "validated",
            Self::Vectorized => "vectorized",
            Self::Classified => "classified",
            Self::Persisted => "persisted",
            Self::Responded => "responded",
            Self::Errored => "errored",
        };
        write!(f, "{}", s)
    }
}

/// A computed prediction and, under the `warn` policy, why it was not saved.
#[derive(Debug, Clone)]
pub struct PredictionOutcome {
    pub record: PredictionRecord,
    pub warning: Option<String>,
}

impl PredictionOutcome {
    pub fn is_persisted(&self) -> bool {
        self.record.id.is_some()
    }
}

/// Result of one batch run over a lookback window.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub since: DateTime<Utc>,
    pub predictions: Vec<PredictionOutcome>,
    /// Observations that were skipped because their run errored.
    pub failures: usize,
}

/// A run that errored, with the step it was attempting.
struct StageFailure {
    stage: Stage,
    error: CardioError,
}

fn failed_at(stage: Stage) -> impl FnOnce(CardioError) -> StageFailure {
    move |error| StageFailure { stage, error }
}

/// Orchestrates predictions over an injected classifier and store.
pub struct PredictionEngine {
    classifier: Arc<dyn RiskClassifier>,
    store: Arc<dyn PredictionStore>,
    advisor: Option<Arc<dyn AdvisoryGenerator>>,
    rules: ValidationRules,
    policy: PersistencePolicy,
}

impl PredictionEngine {
    pub fn new(classifier: Arc<dyn RiskClassifier>, store: Arc<dyn PredictionStore>) -> Self {
        Self {
            classifier,
            store,
            advisor: None,
            rules: ValidationRules::default(),
            policy: PersistencePolicy::default(),
        }
    }

    pub fn with_rules(mut self, rules: ValidationRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_policy(mut self, policy: PersistencePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_advisor(mut self, advisor: Arc<dyn AdvisoryGenerator>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    /// Predicts risk for one observation and persists the result.
    pub fn predict_one(&self, input: &ObservationInput) -> Result<PredictionOutcome, CardioError> {
        self.run(input).map_err(|failure| {
            if failure.error.is_client_error() {
                info!("Prediction rejected at {} stage: {}", failure.stage, failure.error);
            } else {
                error!("Prediction failed at {} stage: {}", failure.stage, failure.error);
            }
            failure.error
        })
    }

    /// Predicts risk from the newest stored observation of a subject.
    pub fn predict_latest_for_subject(
        &self,
        subject_id: &str,
    ) -> Result<PredictionOutcome, CardioError> {
        let subject_id = subject_id.trim();
        let input = self
            .store
            .latest_observation(subject_id)
            .map_err(|e| {
                error!("Failed to fetch latest observation for {}: {}", subject_id, e);
                CardioError::from(e)
            })?
            .ok_or_else(|| {
                CardioError::NotFound(format!("no observations for subject '{}'", subject_id))
            })?;

        debug!("Latest observation for {} is {:?}", subject_id, input.id);
        self.predict_one(&input)
    }

    /// Predicts every observation with `timestamp >= since`.
    ///
    /// Items run independently: a failed item is logged, counted and left
    /// out of the report. Only a failure to read the batch fails the call.
    pub async fn predict_batch(&self, since: DateTime<Utc>) -> Result<BatchReport, CardioError> {
        let rows = self.store.observations_since(since).map_err(|e| {
            error!("Failed to fetch observations since {}: {}", since, e);
            CardioError::from(e)
        })?;

        info!("Batch predicting {} observations since {}", rows.len(), since);

        let mut report = BatchReport {
            since,
            predictions: Vec::with_capacity(rows.len()),
            failures: 0,
        };

        for row in rows {
            match row {
                Ok(input) => match self.run(&input) {
                    Ok(outcome) => report.predictions.push(outcome),
                    Err(failure) => {
                        report.failures += 1;
                        warn!(
                            "Skipping observation {:?} of {}: failed at {} stage: {}",
                            input.id,
                            input.subject_id.as_deref().unwrap_or("unknown"),
                            failure.stage,
                            failure.error
                        );
                    }
                },
                Err(e) => {
                    report.failures += 1;
                    warn!("Skipping unreadable observation at {} stage: {}", Stage::Received, e);
                }
            }
            tokio::task::yield_now().await;
        }

        info!(
            "Batch complete: {} predicted, {} failed",
            report.predictions.len(),
            report.failures
        );
        Ok(report)
    }

    /// Validates and stores an observation for later prediction.
    pub fn record_observation(
        &self,
        input: &ObservationInput,
    ) -> Result<HealthObservation, CardioError> {
        let mut observation = input.validate(&self.rules)?;
        let id = self.store.insert_observation(&observation).map_err(|e| {
            error!("Failed to store observation for {}: {}", observation.subject_id, e);
            CardioError::from(e)
        })?;
        observation.id = Some(id);
        info!("Recorded observation {} for {}", id, observation.subject_id);
        Ok(observation)
    }

    /// Generates advisory text for a stored prediction and appends it to the record.
    ///
    /// Returns the newly generated text.
    pub async fn attach_advisory(
        &self,
        prediction_id: i64,
        profile: &AdvisoryProfile,
    ) -> Result<String, CardioError> {
        let advisor = self.advisor.as_ref().ok_or(CardioError::AdvisoryDisabled)?;

        let record = self
            .store
            .get_prediction(prediction_id)?
            .ok_or_else(|| CardioError::NotFound(format!("prediction {} not found", prediction_id)))?;

        let text = advisor
            .generate_advisory(&record.observation, &record, profile)
            .await
            .map_err(|e| {
                error!("Advisory generation failed for prediction {}: {}", prediction_id, e);
                e
            })?;

        self.store.append_advisory(prediction_id, &text)?;
        info!("Attached advisory to prediction {}", prediction_id);
        Ok(text)
    }

    /// Lists up to `limit` stored predictions, newest first.
    pub fn recent_predictions(&self, limit: usize) -> Result<Vec<PredictionRecord>, CardioError> {
        Ok(self.store.recent_predictions(limit)?)
    }

    fn run(&self, input: &ObservationInput) -> Result<PredictionOutcome, StageFailure> {
        debug!("stage: {}", Stage::Received);

        let result = self.advance(input);
        match &result {
            Ok(outcome) => debug!(
                "stage: {} (subject {}, label {:?})",
                Stage::Responded,
                outcome.record.subject_id(),
                outcome.record.label
            ),
            Err(failure) => debug!("stage: {} after {}", Stage::Errored, failure.stage),
        }
        result
    }

    fn advance(&self, input: &ObservationInput) -> Result<PredictionOutcome, StageFailure> {
        let observation = input
            .validate(&self.rules)
            .map_err(failed_at(Stage::Validated))?;
        debug!("stage: {}", Stage::Validated);

        let features = FeatureVector::from_observation(&observation);
        debug!("stage: {}", Stage::Vectorized);

        let classification = self
            .classifier
            .classify(&features)
            .map_err(failed_at(Stage::Classified))?;
        debug!("stage: {}", Stage::Classified);

        let mut record = PredictionRecord::new(observation, classification);
        let warning = match self.store.insert_prediction(&record) {
            Ok(id) => {
                record.id = Some(id);
                debug!("stage: {} (prediction {})", Stage::Persisted, id);
                None
            }
            Err(e) => match self.policy {
                PersistencePolicy::Propagate => {
                    return Err(failed_at(Stage::Persisted)(e.into()));
                }
                PersistencePolicy::Warn => {
                    warn!("Prediction for {} not saved: {}", record.subject_id(), e);
                    Some(format!("prediction was not saved: {}", e))
                }
            },
        };

        Ok(PredictionOutcome { record, warning })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use cardio_core::{Classification, RiskLabel};
    use chrono::Duration;

    use super::*;

    /// Classifier double that counts calls and fails for one chosen age.
    #[derive(Default)]
    pub struct StubClassifier {
        pub calls: AtomicUsize,
        pub fail_for_age: Option<f64>,
    }

    impl StubClassifier {
        pub fn failing_for_age(age: f64) -> Self {
            Self { fail_for_age: Some(age), ..Default::default() }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl RiskClassifier for StubClassifier {
        fn classify(&self, features: &FeatureVector) -> Result<Classification, CardioError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let age = features.get("age").unwrap_or_default();
            if self.fail_for_age == Some(age) {
                return Err(CardioError::Inference("stub failure".into()));
            }
            let label = if age >= 55.0 { RiskLabel::AtRisk } else { RiskLabel::NoRisk };
            Ok(Classification { label, probability: Some(age / 100.0) })
        }
    }

    pub fn input(subject: &str, age: f64, hours_ago: i64) -> ObservationInput {
        ObservationInput {
            subject_id: Some(subject.into()),
            timestamp: Some(Utc::now() - Duration::hours(hours_ago)),
            age: Some(age),
            gender: Some(1),
            height: Some(170.0),
            weight: Some(70.0),
            ap_hi: Some(130.0),
            ap_lo: Some(85.0),
            cholesterol: Some(1),
            gluc: Some(1),
            smoke: Some(0),
            alco: Some(0),
            active: Some(1),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use cardio_core::RiskLabel;
    use cardio_model::RiskModel;
    use cardio_store::{SqliteStore, StoreError};
    use chrono::Duration;

    use super::testing::{input, StubClassifier};
    use super::*;

    /// Store double over SQLite with injectable faults.
    struct FaultyStore {
        inner: SqliteStore,
        fail_writes: bool,
        /// Unreadable rows appended to every batch fetch.
        corrupt_rows: usize,
    }

    impl FaultyStore {
        fn read_only() -> Self {
            Self { inner: SqliteStore::in_memory().unwrap(), fail_writes: true, corrupt_rows: 0 }
        }

        fn with_corrupt_rows(corrupt_rows: usize) -> Self {
            Self { inner: SqliteStore::in_memory().unwrap(), fail_writes: false, corrupt_rows }
        }
    }

    impl PredictionStore for FaultyStore {
        fn insert_observation(&self, observation: &HealthObservation) -> Result<i64, StoreError> {
            self.inner.insert_observation(observation)
        }
        fn latest_observation(&self, subject_id: &str) -> Result<Option<ObservationInput>, StoreError> {
            self.inner.latest_observation(subject_id)
        }
        fn observations_since(
            &self,
            since: DateTime<Utc>,
        ) -> Result<Vec<Result<ObservationInput, StoreError>>, StoreError> {
            let mut rows = self.inner.observations_since(since)?;
            for _ in 0..self.corrupt_rows {
                rows.push(Err(StoreError::Corrupt("unreadable timestamp 'garbage'".into())));
            }
            Ok(rows)
        }
        fn insert_prediction(&self, record: &PredictionRecord) -> Result<i64, StoreError> {
            if self.fail_writes {
                return Err(StoreError::Unavailable("disk full".into()));
            }
            self.inner.insert_prediction(record)
        }
        fn get_prediction(&self, id: i64) -> Result<Option<PredictionRecord>, StoreError> {
            self.inner.get_prediction(id)
        }
        fn recent_predictions(&self, limit: usize) -> Result<Vec<PredictionRecord>, StoreError> {
            self.inner.recent_predictions(limit)
        }
        fn count_predictions(&self) -> Result<usize, StoreError> {
            self.inner.count_predictions()
        }
        fn append_advisory(&self, id: i64, text: &str) -> Result<(), StoreError> {
            self.inner.append_advisory(id, text)
        }
    }

    struct EchoAdvisor;

    #[async_trait]
    impl AdvisoryGenerator for EchoAdvisor {
        async fn generate_advisory(
            &self,
            observation: &HealthObservation,
            _prediction: &PredictionRecord,
            profile: &AdvisoryProfile,
        ) -> Result<String, CardioError> {
            Ok(format!(
                "{}: walk daily, goals {}",
                observation.subject_id,
                profile.goals.join("/")
            ))
        }
    }

    fn setup() -> (Arc<StubClassifier>, Arc<SqliteStore>, PredictionEngine) {
        let classifier = Arc::new(StubClassifier::default());
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let engine = PredictionEngine::new(classifier.clone(), store.clone());
        (classifier, store, engine)
    }

    #[test]
    fn test_predict_one_persists_a_record_per_call() {
        let (_, store, engine) = setup();
        let obs = input("user1", 60.0, 0);

        for expected in 1..=3 {
            let outcome = engine.predict_one(&obs).unwrap();
            assert!(outcome.is_persisted());
            assert!(outcome.warning.is_none());
            assert_eq!(store.count_predictions().unwrap(), expected);
        }

        let stored = store.recent_predictions(10).unwrap();
        assert_eq!(stored.len(), 3);
        assert!(stored.iter().all(|r| r.label == RiskLabel::AtRisk));
    }

    #[test]
    fn test_invalid_input_rejected_before_classification() {
        let (classifier, store, engine) = setup();
        let mut obs = input("user1", 60.0, 0);
        obs.cholesterol = Some(5);

        let err = engine.predict_one(&obs).unwrap_err();
        assert!(matches!(err, CardioError::Validation(ref msgs) if msgs.iter().any(|m| m.contains("cholesterol"))));
        assert_eq!(classifier.calls(), 0);
        assert_eq!(store.count_predictions().unwrap(), 0);
    }

    #[test]
    fn test_pressure_order_rule_is_opt_in() {
        let (_, _, engine) = setup();
        let mut obs = input("user1", 40.0, 0);
        obs.ap_hi = Some(80.0);
        obs.ap_lo = Some(120.0);

        assert!(engine.predict_one(&obs).is_ok());

        let strict = engine.with_rules(ValidationRules { enforce_pressure_order: true });
        assert!(matches!(strict.predict_one(&obs), Err(CardioError::Validation(_))));
    }

    #[test]
    fn test_latest_for_subject_not_found_on_empty_store() {
        let (classifier, _, engine) = setup();
        let err = engine.predict_latest_for_subject("user1").unwrap_err();
        assert!(matches!(err, CardioError::NotFound(_)));
        assert_eq!(classifier.calls(), 0);
    }

    #[test]
    fn test_latest_for_subject_uses_newest_observation() {
        let (_, _, engine) = setup();
        engine.record_observation(&input("user1", 41.0, 30)).unwrap();
        let newest = engine.record_observation(&input("user1", 43.0, 1)).unwrap();
        engine.record_observation(&input("user1", 42.0, 10)).unwrap();
        engine.record_observation(&input("user2", 70.0, 0)).unwrap();

        let outcome = engine.predict_latest_for_subject("user1").unwrap();
        assert_eq!(outcome.record.observation.age, 43.0);
        assert_eq!(outcome.record.observation_id(), newest.id);
        assert_eq!(outcome.record.subject_id(), "user1");
    }

    #[tokio::test]
    async fn test_batch_skips_old_observations() {
        let (_, _, engine) = setup();
        for (i, hours_ago) in [1, 2, 3, 48, 72].into_iter().enumerate() {
            engine
                .record_observation(&input(&format!("user{}", i + 1), 50.0 + i as f64, hours_ago))
                .unwrap();
        }

        let report = engine
            .predict_batch(Utc::now() - Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(report.predictions.len(), 3);
        assert_eq!(report.failures, 0);
    }

    #[tokio::test]
    async fn test_batch_counts_item_failures() {
        let classifier = Arc::new(StubClassifier::failing_for_age(51.0));
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let engine = PredictionEngine::new(classifier.clone(), store.clone());
        for (i, hours_ago) in [1, 2, 3, 48, 72].into_iter().enumerate() {
            engine
                .record_observation(&input(&format!("user{}", i + 1), 50.0 + i as f64, hours_ago))
                .unwrap();
        }

        let report = engine
            .predict_batch(Utc::now() - Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(report.predictions.len(), 2);
        assert_eq!(report.failures, 1);
        assert_eq!(classifier.calls(), 3);
        assert_eq!(store.count_predictions().unwrap(), 2);
        assert!(report.predictions.iter().all(|p| p.record.subject_id() != "user2"));
    }

    #[tokio::test]
    async fn test_batch_counts_unreadable_rows() {
        let store = Arc::new(FaultyStore::with_corrupt_rows(1));
        let engine = PredictionEngine::new(Arc::new(StubClassifier::default()), store.clone());
        engine.record_observation(&input("user1", 50.0, 1)).unwrap();
        engine.record_observation(&input("user2", 60.0, 2)).unwrap();

        let report = engine
            .predict_batch(Utc::now() - Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(report.predictions.len(), 2);
        assert_eq!(report.failures, 1);
        assert_eq!(store.count_predictions().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_batch_over_empty_window() {
        let (classifier, _, engine) = setup();
        let report = engine.predict_batch(Utc::now()).await.unwrap();
        assert!(report.predictions.is_empty());
        assert_eq!(report.failures, 0);
        assert_eq!(classifier.calls(), 0);
    }

    #[test]
    fn test_propagate_policy_fails_unsaved_prediction() {
        let store = Arc::new(FaultyStore::read_only());
        let engine = PredictionEngine::new(Arc::new(StubClassifier::default()), store);

        let err = engine.predict_one(&input("user1", 60.0, 0)).unwrap_err();
        assert!(matches!(err, CardioError::Persistence(ref msg) if msg.contains("disk full")));
    }

    #[test]
    fn test_warn_policy_returns_prediction_with_warning() {
        let store = Arc::new(FaultyStore::read_only());
        let engine = PredictionEngine::new(Arc::new(StubClassifier::default()), store)
            .with_policy(PersistencePolicy::Warn);

        let outcome = engine.predict_one(&input("user1", 60.0, 0)).unwrap();
        assert!(!outcome.is_persisted());
        assert_eq!(outcome.record.label, RiskLabel::AtRisk);
        assert!(outcome.warning.unwrap().contains("disk full"));
    }

    #[tokio::test]
    async fn test_policy_applies_to_batches() {
        let store = Arc::new(FaultyStore::read_only());
        let propagate = PredictionEngine::new(Arc::new(StubClassifier::default()), store.clone());
        propagate.record_observation(&input("user1", 60.0, 1)).unwrap();
        propagate.record_observation(&input("user2", 45.0, 2)).unwrap();
        let since = Utc::now() - Duration::hours(24);

        let report = propagate.predict_batch(since).await.unwrap();
        assert_eq!(report.predictions.len(), 0);
        assert_eq!(report.failures, 2);

        let lenient = PredictionEngine::new(Arc::new(StubClassifier::default()), store)
            .with_policy(PersistencePolicy::Warn);
        let report = lenient.predict_batch(since).await.unwrap();
        assert_eq!(report.predictions.len(), 2);
        assert!(report.predictions.iter().all(|p| p.warning.is_some()));
    }

    #[test]
    fn test_with_shipped_model() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../models/cardio_model.json");
        let model = Arc::new(RiskModel::load(path).unwrap());
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let engine = PredictionEngine::new(model, store);

        let outcome = engine.predict_one(&input("user1", 52.0, 0)).unwrap();
        let p = outcome.record.probability.unwrap();
        assert!((0.0..=1.0).contains(&p));
        assert!(outcome.is_persisted());
    }

    #[tokio::test]
    async fn test_attach_advisory_requires_generator() {
        let (_, _, engine) = setup();
        let outcome = engine.predict_one(&input("user1", 60.0, 0)).unwrap();
        let id = outcome.record.id.unwrap();

        let err = engine
            .attach_advisory(id, &AdvisoryProfile::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CardioError::AdvisoryDisabled));
    }

    #[tokio::test]
    async fn test_attach_advisory_appends_text() {
        let (_, store, engine) = setup();
        let engine = engine.with_advisor(Arc::new(EchoAdvisor));
        let id = engine
            .predict_one(&input("user3", 60.0, 0))
            .unwrap()
            .record
            .id
            .unwrap();

        let profile = AdvisoryProfile { goals: vec!["sleep".into()], ..Default::default() };
        let text = engine.attach_advisory(id, &profile).await.unwrap();
        assert_eq!(text, "user3: walk daily, goals sleep");

        engine.attach_advisory(id, &profile).await.unwrap();
        let stored = store.get_prediction(id).unwrap().unwrap();
        assert_eq!(
            stored.advisory.as_deref(),
            Some("user3: walk daily, goals sleep\n\nuser3: walk daily, goals sleep")
        );
        assert_eq!(stored.label, RiskLabel::AtRisk);
    }

    #[tokio::test]
    async fn test_attach_advisory_missing_prediction() {
        let (_, _, engine) = setup();
        let engine = engine.with_advisor(Arc::new(EchoAdvisor));
        let err = engine
            .attach_advisory(404, &AdvisoryProfile::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CardioError::NotFound(_)));
    }

    #[test]
    fn test_recent_predictions_newest_first() {
        let (_, _, engine) = setup();
        engine.predict_one(&input("user1", 40.0, 0)).unwrap();
        engine.predict_one(&input("user2", 41.0, 0)).unwrap();

        let recent = engine.recent_predictions(1).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].subject_id(), "user2");
    }
}
