//! Upload completion watcher.
//!
//! One watcher runs per registered upload, detached from the request that
//! spawned it. It polls the object store until the client's out-of-band
//! upload becomes visible, then hands the task to the analysis service
//! exactly once. Polling is bounded twice over: a wall-clock timeout and an
//! attempt cap, whichever fires first. Time is injected through [`Clock`]
//! so the bound interaction is testable without real sleeps.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{error, info, warn};
use uuid::Uuid;

use shared::storage::ObjectStore;

use crate::analysis::AnalysisClient;

#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub max_attempts: u32,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(300),
            max_attempts: 30,
        }
    }
}

/// How a watch run ended. `Found` covers the analysis hand-off regardless
/// of whether the analysis call itself succeeded; analysis errors are
/// logged, never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    Found,
    TimedOut,
    AttemptsExhausted,
}

pub struct UploadWatcher {
    store: Arc<dyn ObjectStore>,
    analysis: Arc<dyn AnalysisClient>,
    clock: Arc<dyn Clock>,
    config: WatcherConfig,
}

impl UploadWatcher {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        analysis: Arc<dyn AnalysisClient>,
        clock: Arc<dyn Clock>,
        config: WatcherConfig,
    ) -> Self {
        Self {
            store,
            analysis,
            clock,
            config,
        }
    }

    pub async fn run(self, task_id: Uuid, object_key: String) -> WatchOutcome {
        let started = self.clock.now();

        for attempt in 1..=self.config.max_attempts {
            if self.clock.now().duration_since(started) >= self.config.timeout {
                warn!(%task_id, object_key = %object_key, "timed out waiting for file upload");
                return WatchOutcome::TimedOut;
            }

            match self.store.object_exists(&object_key).await {
                Ok(true) => {
                    info!(%task_id, object_key = %object_key, attempt, "file uploaded, starting analysis");

                    match self.analysis.analyse_task(task_id, &object_key).await {
                        Ok(true) => info!(%task_id, "analysis completed"),
                        Ok(false) => warn!(%task_id, "analysis returned false status"),
                        Err(e) => error!(%task_id, %e, "failed to run analysis"),
                    }
                    return WatchOutcome::Found;
                }
                Ok(false) => {}
                Err(e) => {
                    // Transient store failures must not end the watch early.
                    warn!(%task_id, object_key = %object_key, attempt, %e, "failed to check file existence");
                }
            }

            self.clock.sleep(self.config.poll_interval).await;
        }

        warn!(
            %task_id,
            object_key = %object_key,
            max_attempts = self.config.max_attempts,
            "file not found after max attempts, skipping analysis"
        );
        WatchOutcome::AttemptsExhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::{ManualClock, RecordingClient, ScriptedStore, Step};

    fn watcher(
        store: Arc<ScriptedStore>,
        client: Arc<RecordingClient>,
        clock: Arc<ManualClock>,
        config: WatcherConfig,
    ) -> UploadWatcher {
        UploadWatcher::new(store, client, clock, config)
    }

    #[tokio::test]
    async fn object_on_third_poll_triggers_exactly_one_analysis() {
        let store = Arc::new(ScriptedStore::script(
            vec![Step::Missing, Step::Missing, Step::Present],
            Step::Missing,
        ));
        let client = Arc::new(RecordingClient::succeeding());
        let clock = Arc::new(ManualClock::new());
        let task_id = Uuid::new_v4();

        let outcome = watcher(
            store.clone(),
            client.clone(),
            clock,
            WatcherConfig::default(),
        )
        .run(task_id, "doc.txt".into())
        .await;

        assert_eq!(outcome, WatchOutcome::Found);
        assert_eq!(store.checks(), 3);
        assert_eq!(client.calls(), vec![(task_id, "doc.txt".to_string())]);
    }

    #[tokio::test]
    async fn missing_object_exhausts_the_attempt_cap() {
        let store = Arc::new(ScriptedStore::always(Step::Missing));
        let client = Arc::new(RecordingClient::succeeding());
        let clock = Arc::new(ManualClock::new());

        let outcome = watcher(
            store.clone(),
            client.clone(),
            clock,
            WatcherConfig::default(),
        )
        .run(Uuid::new_v4(), "doc.txt".into())
        .await;

        // 30 polls at 2 s never reach the 5 min timeout, so the cap fires.
        assert_eq!(outcome, WatchOutcome::AttemptsExhausted);
        assert_eq!(store.checks(), 30);
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn timeout_wins_when_it_fires_before_the_cap() {
        let store = Arc::new(ScriptedStore::always(Step::Missing));
        let client = Arc::new(RecordingClient::succeeding());
        let clock = Arc::new(ManualClock::new());
        let config = WatcherConfig {
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(5),
            max_attempts: 30,
        };

        let outcome = watcher(store.clone(), client.clone(), clock, config)
            .run(Uuid::new_v4(), "doc.txt".into())
            .await;

        // Checks at t=0, 2, 4; the tick at t=6 hits the 5 s bound first.
        assert_eq!(outcome, WatchOutcome::TimedOut);
        assert_eq!(store.checks(), 3);
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn transient_check_failures_keep_the_watch_alive() {
        let store = Arc::new(ScriptedStore::script(
            vec![Step::Error, Step::Error, Step::Present],
            Step::Missing,
        ));
        let client = Arc::new(RecordingClient::succeeding());
        let clock = Arc::new(ManualClock::new());
        let task_id = Uuid::new_v4();

        let outcome = watcher(
            store.clone(),
            client.clone(),
            clock,
            WatcherConfig::default(),
        )
        .run(task_id, "doc.txt".into())
        .await;

        assert_eq!(outcome, WatchOutcome::Found);
        assert_eq!(client.calls().len(), 1);
    }

    #[tokio::test]
    async fn analysis_failure_terminates_without_retry() {
        let store = Arc::new(ScriptedStore::always(Step::Present));
        let client = Arc::new(RecordingClient::failing());
        let clock = Arc::new(ManualClock::new());

        let outcome = watcher(
            store.clone(),
            client.clone(),
            clock,
            WatcherConfig::default(),
        )
        .run(Uuid::new_v4(), "doc.txt".into())
        .await;

        assert_eq!(outcome, WatchOutcome::Found);
        assert_eq!(client.calls().len(), 1);
    }

    #[tokio::test]
    async fn false_analysis_status_still_ends_the_watch() {
        let store = Arc::new(ScriptedStore::always(Step::Present));
        let client = Arc::new(RecordingClient::returning(false));
        let clock = Arc::new(ManualClock::new());

        let outcome = watcher(
            store.clone(),
            client.clone(),
            clock,
            WatcherConfig::default(),
        )
        .run(Uuid::new_v4(), "doc.txt".into())
        .await;

        assert_eq!(outcome, WatchOutcome::Found);
        assert_eq!(client.calls().len(), 1);
    }
}
