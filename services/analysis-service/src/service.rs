//! Cross-document similarity analysis.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared::error::Result;
use shared::storage::ObjectStore;

use crate::comparator::TextComparator;
use crate::repo::{Report, ReportRepository};

/// Orchestrates one analysis run: fetch the target, score it against every
/// other stored document, classify against the threshold and persist the
/// verdict.
pub struct AnalysisService {
    repo: Arc<dyn ReportRepository>,
    store: Arc<dyn ObjectStore>,
    comparator: TextComparator,
    plagiarism_threshold: f64,
}

impl AnalysisService {
    pub fn new(
        repo: Arc<dyn ReportRepository>,
        store: Arc<dyn ObjectStore>,
        comparator: TextComparator,
        plagiarism_threshold: f64,
    ) -> Self {
        Self {
            repo,
            store,
            comparator,
            plagiarism_threshold,
        }
    }

    /// Runs the full analysis for `task_id` over the object at
    /// `object_key`. Returns `true` once the report is persisted; listing,
    /// target-fetch and persist failures propagate to the caller.
    pub async fn analyse_task(&self, task_id: Uuid, object_key: &str) -> Result<bool> {
        info!(%task_id, object_key, "starting task analysis");

        let all_keys = self.store.list_keys().await?;
        let candidates: Vec<String> = all_keys
            .into_iter()
            .filter(|key| key != object_key)
            .collect();
        debug!(candidate_count = candidates.len(), "corpus keys filtered");

        let target = self.store.get_object(object_key).await?;
        debug!(object_key, target_size = target.len(), "target fetched");

        let max_plagiarism = self.scan_corpus(&target, &candidates).await;
        let is_plagiarism = max_plagiarism >= self.plagiarism_threshold;

        info!(
            %task_id,
            max_plagiarism,
            is_plagiarism,
            threshold = self.plagiarism_threshold,
            "analysis completed"
        );

        let report = Report {
            task_id,
            is_plagiarism,
            plagiarism_percentage: max_plagiarism,
            created_at: Utc::now(),
        };
        self.repo.create_report(&report).await?;

        info!(%task_id, "report saved");
        Ok(true)
    }

    pub async fn get_report(&self, task_id: Uuid) -> Result<Report> {
        info!(%task_id, "getting report");
        self.repo.get_report(task_id).await
    }

    /// Maximum pairwise similarity between `target` and the candidate keys.
    /// A candidate that cannot be fetched is skipped; an empty or fully
    /// failed corpus scores 0.
    async fn scan_corpus(&self, target: &[u8], candidates: &[String]) -> f64 {
        let mut max_plagiarism: f64 = 0.0;

        for key in candidates {
            let other = match self.store.get_object(key).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(key = %key, %e, "skipping candidate, fetch failed");
                    continue;
                }
            };

            let percentage = self.comparator.compare(target, &other);
            debug!(key = %key, percentage, "comparison result");

            if percentage > max_plagiarism {
                max_plagiarism = percentage;
            }
        }

        max_plagiarism
    }
}
