use crate::lifecycle::controller::ExperimentService;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use uuid::Uuid;

struct FailureState {
    attempts: u32,
    next_attempt_at: DateTime<Utc>,
}

/// Periodically refreshes every running or paused ad test. Failures back
/// off exponentially per experiment; after the retry cap the failure is
/// recorded on the experiment and the counter resets, the status is never
/// touched.
pub struct RefreshScheduler {
    pub service: ExperimentService,
    pub interval: std::time::Duration,
    pub max_retries: u32,
}

impl RefreshScheduler {
    pub async fn run(self) {
        let mut failures: HashMap<Uuid, FailureState> = HashMap::new();
        loop {
            if let Err(err) = self.tick(&mut failures).await {
                tracing::error!("refresh scheduler error: {}", err);
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    async fn tick(&self, failures: &mut HashMap<Uuid, FailureState>) -> anyhow::Result<()> {
        let due = self.service.experiments_repo.list_refreshable().await?;
        let now = Utc::now();

        for experiment in due {
            let id = experiment.experiment_id;
            if let Some(state) = failures.get(&id) {
                if now < state.next_attempt_at {
                    continue;
                }
            }

            match self.service.refresh(id).await {
                Ok(result) => {
                    failures.remove(&id);
                    tracing::debug!(
                        experiment_id = %id,
                        confident = result.confident,
                        "scheduled refresh complete"
                    );
                }
                Err(e) => {
                    let attempts = failures.get(&id).map(|s| s.attempts).unwrap_or(0) + 1;
                    let backoff = i64::min(300, 2_i64.pow(attempts.min(8)));
                    tracing::warn!(
                        experiment_id = %id,
                        attempts,
                        backoff_seconds = backoff,
                        "scheduled refresh failed: {e}"
                    );
                    if attempts >= self.max_retries {
                        self.service
                            .experiments_repo
                            .mark_refresh(id, Some(&e.to_string()))
                            .await?;
                        failures.remove(&id);
                    } else {
                        failures.insert(
                            id,
                            FailureState {
                                attempts,
                                next_attempt_at: now + Duration::seconds(backoff),
                            },
                        );
                    }
                }
            }
        }
        Ok(())
    }
}
