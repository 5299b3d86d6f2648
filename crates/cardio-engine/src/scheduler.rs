//! Periodic batch prediction over a trailing lookback window.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::watch;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::{BatchReport, PredictionEngine};

/// Runs [`PredictionEngine::predict_batch`] on a fixed delay.
///
/// Cycles never overlap: the delay starts once the previous cycle is done.
/// A failed or panicking cycle is logged and the loop carries on.
pub struct BatchScheduler {
    engine: Arc<PredictionEngine>,
    poll_interval: Duration,
    lookback: chrono::Duration,
}

impl BatchScheduler {
    pub fn new(
        engine: Arc<PredictionEngine>,
        poll_interval: Duration,
        lookback: chrono::Duration,
    ) -> Self {
        Self { engine, poll_interval, lookback }
    }

    /// Loops until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// A cycle already running when shutdown arrives is allowed to finish.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Batch scheduler started: every {}s over the last {}h",
            self.poll_interval.as_secs(),
            self.lookback.num_hours()
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.run_cycle().await;

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Batch scheduler stopped");
    }

    /// Runs a single batch cycle. Returns `None` if the cycle failed.
    pub async fn run_cycle(&self) -> Option<BatchReport> {
        let run_id = Uuid::new_v4();
        let since = Utc::now() - self.lookback;
        let span = info_span!("batch", %run_id);

        let cycle = self.engine.predict_batch(since).instrument(span);
        match AssertUnwindSafe(cycle).catch_unwind().await {
            Ok(Ok(report)) => {
                info!(
                    "Batch {} done: {} predictions, {} failures",
                    run_id,
                    report.predictions.len(),
                    report.failures
                );
                Some(report)
            }
            Ok(Err(e)) => {
                error!("Batch {} failed: {}", run_id, e);
                None
            }
            Err(_) => {
                error!("Batch {} panicked", run_id);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use cardio_core::{HealthObservation, ObservationInput, PredictionRecord};
    use cardio_store::{PredictionStore, SqliteStore, StoreError};
    use chrono::DateTime;

    use super::*;
    use crate::testing::{input, StubClassifier};

    /// Store whose first fetch errors and second fetch panics.
    struct FlakyStore {
        inner: SqliteStore,
        fetches: AtomicUsize,
    }

    impl FlakyStore {
        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    impl PredictionStore for FlakyStore {
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
            match self.fetches.fetch_add(1, Ordering::SeqCst) {
                0 => Err(StoreError::Unavailable("connection reset".into())),
                1 => panic!("driver crashed"),
                _ => self.inner.observations_since(since),
            }
        }
        fn insert_prediction(&self, record: &PredictionRecord) -> Result<i64, StoreError> {
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

    fn scheduler(store: Arc<dyn PredictionStore>) -> BatchScheduler {
        let engine = Arc::new(PredictionEngine::new(Arc::new(StubClassifier::default()), store));
        BatchScheduler::new(engine, Duration::from_secs(60), chrono::Duration::hours(24))
    }

    #[tokio::test]
    async fn test_cycle_predicts_within_lookback() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let sched = scheduler(store.clone());
        sched.engine.record_observation(&input("user1", 50.0, 2)).unwrap();
        sched.engine.record_observation(&input("user2", 60.0, 30)).unwrap();

        let report = sched.run_cycle().await.unwrap();
        assert_eq!(report.predictions.len(), 1);
        assert_eq!(store.count_predictions().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_survives_failed_cycles_and_stops_on_shutdown() {
        let store = Arc::new(FlakyStore {
            inner: SqliteStore::in_memory().unwrap(),
            fetches: AtomicUsize::new(0),
        });
        store
            .inner
            .insert_observation(&input("user1", 58.0, 1).validate(&Default::default()).unwrap())
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler(store.clone()).run(rx));

        // Cycles at 0s, 60s and 120s; the fourth would start at 180s.
        tokio::time::sleep(Duration::from_secs(150)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(store.fetches(), 3);
        assert_eq!(store.count_predictions().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_exits_when_sender_dropped() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler(store).run(rx));

        drop(tx);
        handle.await.unwrap();
    }
}
