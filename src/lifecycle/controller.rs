use crate::allocation::planner::{plan_ad, plan_content, split_recipients};
use crate::domain::error::EngineError;
use crate::domain::experiment::{
    Experiment, ExperimentKind, ExperimentStatus, SampleAllocation, MAX_VARIANTS,
};
use crate::domain::variant::{Variant, VariantContent};
use crate::gateways::EngineGateways;
use crate::lifecycle::transitions::{next_status, start_requirements, winner_guard, LifecycleAction};
use crate::metrics::aggregator::{normalize, DedupWindow};
use crate::metrics::event::{EventKind, RawEvent};
use crate::repo::experiments_repo::{CreateExperimentInput, ExperimentsRepo};
use crate::repo::raw_events_repo::RawEventsRepo;
use crate::repo::variants_repo::VariantsRepo;
use crate::stats::cache::SignificanceCache;
use crate::stats::significance::{evaluate, EvaluatorConfig, SignificanceResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use uuid::Uuid;

/// Per-experiment mutation locks. Held for the read-validate and commit
/// phases of every mutating operation; released across external gateway
/// calls, whose results are committed only after re-checking status.
///
/// The map holds weak references so an experiment's entry lives only as
/// long as some caller holds its lock; stale entries are purged on the
/// next acquisition instead of accumulating over the process lifetime.
#[derive(Clone, Default)]
pub struct ExperimentLocks {
    inner: Arc<Mutex<HashMap<Uuid, Weak<tokio::sync::Mutex<()>>>>>,
}

impl ExperimentLocks {
    pub fn for_experiment(&self, experiment_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(lock) = map.get(&experiment_id).and_then(Weak::upgrade) {
            return lock;
        }
        map.retain(|_, weak| weak.strong_count() > 0);
        let lock = Arc::new(tokio::sync::Mutex::new(()));
        map.insert(experiment_id, Arc::downgrade(&lock));
        lock
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordEventInput {
    pub variant_id: Uuid,
    pub kind: EventKind,
    pub external_event_id: Option<String>,
    pub value_minor: Option<i64>,
    pub occurred_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    /// Counted against the variant.
    Recorded,
    /// Replay of an already-counted external event id.
    Duplicate,
    /// Outside the experiment's metric vocabulary.
    Dropped,
    /// Logged for audit after the experiment reached a terminal state.
    AuditOnly,
}

#[derive(Clone)]
pub struct ExperimentService {
    pub experiments_repo: ExperimentsRepo,
    pub variants_repo: VariantsRepo,
    pub raw_events_repo: RawEventsRepo,
    pub gateways: EngineGateways,
    pub significance_cache: SignificanceCache,
    pub evaluator_config: EvaluatorConfig,
    pub locks: ExperimentLocks,
    pub dedup: Arc<tokio::sync::Mutex<DedupWindow>>,
}

impl ExperimentService {
    async fn load(&self, experiment_id: Uuid) -> Result<Experiment, EngineError> {
        self.experiments_repo
            .get(experiment_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("experiment {experiment_id} does not exist")))
    }

    fn gateway_failure(experiment_id: Uuid, e: anyhow::Error) -> EngineError {
        EngineError::gateway(format!("experiment {experiment_id}: {e}"))
    }

    pub async fn create(
        &self,
        input: CreateExperimentInput,
        variant_contents: Vec<VariantContent>,
    ) -> Result<(Experiment, Vec<Variant>), EngineError> {
        if input.test_type.kind() != input.kind {
            return Err(EngineError::validation(format!(
                "test type {} does not apply to {} experiments",
                input.test_type.as_db(),
                input.kind.as_db()
            )));
        }
        if input.success_metric.kind() != input.kind {
            return Err(EngineError::validation(format!(
                "success metric {} does not apply to {} experiments",
                input.success_metric.as_db(),
                input.kind.as_db()
            )));
        }
        match (input.kind, input.sample_allocation) {
            (ExperimentKind::Content, SampleAllocation::Percentage { sample_pct }) => {
                if !(sample_pct > 0.0 && sample_pct <= 100.0) {
                    return Err(EngineError::validation(format!(
                        "sample percentage {sample_pct} is outside (0, 100]"
                    )));
                }
            }
            (
                ExperimentKind::Ad,
                SampleAllocation::DailyBudget {
                    daily_budget_minor,
                    duration_days,
                },
            ) => {
                plan_ad(daily_budget_minor, duration_days, 1)?;
            }
            _ => {
                return Err(EngineError::validation(
                    "allocation mode does not match experiment kind",
                ));
            }
        }
        if variant_contents.len() > MAX_VARIANTS {
            return Err(EngineError::validation(format!(
                "an experiment holds at most {MAX_VARIANTS} variants"
            )));
        }
        for content in &variant_contents {
            if content.kind() != input.kind {
                return Err(EngineError::validation(
                    "variant content payload does not match experiment kind",
                ));
            }
        }

        let experiment = self.experiments_repo.create(input).await?;
        let mut variants = Vec::with_capacity(variant_contents.len());
        for (position, content) in variant_contents.iter().enumerate() {
            variants.push(
                self.variants_repo
                    .add(experiment.experiment_id, position as i32, content)
                    .await?,
            );
        }
        Ok((experiment, variants))
    }

    pub async fn add_variant(
        &self,
        experiment_id: Uuid,
        content: VariantContent,
    ) -> Result<Variant, EngineError> {
        let lock = self.locks.for_experiment(experiment_id);
        let _guard = lock.lock().await;

        let experiment = self.load(experiment_id).await?;
        if experiment.status != ExperimentStatus::Draft {
            return Err(EngineError::conflict(format!(
                "variants of experiment {experiment_id} can only change while it is a draft"
            )));
        }
        if content.kind() != experiment.kind {
            return Err(EngineError::validation(
                "variant content payload does not match experiment kind",
            ));
        }
        let count = self.variants_repo.count_for_experiment(experiment_id).await?;
        if count as usize >= MAX_VARIANTS {
            return Err(EngineError::validation(format!(
                "experiment {experiment_id} already holds the maximum of {MAX_VARIANTS} variants"
            )));
        }
        Ok(self
            .variants_repo
            .add(experiment_id, count as i32, &content)
            .await?)
    }

    pub async fn start(&self, experiment_id: Uuid) -> Result<Experiment, EngineError> {
        let lock = self.locks.for_experiment(experiment_id);

        let (experiment, variants) = {
            let _guard = lock.lock().await;
            let experiment = self.load(experiment_id).await?;
            next_status(experiment.status, LifecycleAction::Start, experiment.kind)?;
            let variants = self.variants_repo.list_for_experiment(experiment_id).await?;
            start_requirements(&experiment, variants.len())?;
            (experiment, variants)
        };

        // Gateway phase, lock released. A cancel landing now wins: the
        // guarded commit below finds the row no longer DRAFT and aborts.
        match experiment.kind {
            ExperimentKind::Content => {
                let sample_pct = match experiment.sample_allocation {
                    SampleAllocation::Percentage { sample_pct } => sample_pct,
                    SampleAllocation::DailyBudget { .. } => {
                        return Err(EngineError::data_integrity(format!(
                            "content experiment {experiment_id} carries a budget allocation"
                        )));
                    }
                };
                let targeting = experiment.targeting.clone().unwrap_or(serde_json::Value::Null);
                let population = self
                    .gateways
                    .population
                    .resolve_eligible(&targeting)
                    .await
                    .map_err(|e| Self::gateway_failure(experiment_id, e))?;

                let plan = plan_content(population.count, sample_pct, &variants)?;
                if plan.is_empty() {
                    tracing::warn!(
                        %experiment_id,
                        "starting with an empty population; dispatch skipped, significance unreachable"
                    );
                }

                let (slices, holdback) = split_recipients(&population.recipient_ids, &plan);
                for (variant_id, slice) in &slices {
                    if slice.is_empty() {
                        continue;
                    }
                    let variant = variants
                        .iter()
                        .find(|v| v.variant_id == *variant_id)
                        .ok_or_else(|| {
                            EngineError::data_integrity(format!(
                                "allocation references unknown variant {variant_id}"
                            ))
                        })?;
                    let dispatch_id = self
                        .gateways
                        .delivery
                        .dispatch(variant, slice)
                        .await
                        .map_err(|e| Self::gateway_failure(experiment_id, e))?;
                    tracing::info!(%experiment_id, %variant_id, dispatch_id, recipients = slice.len(), "dispatched test slice");
                }

                let _guard = lock.lock().await;
                let committed = self
                    .experiments_repo
                    .commit_start_content(
                        experiment_id,
                        plan.population,
                        plan.holdback,
                        &serde_json::to_value(holdback).map_err(anyhow::Error::from)?,
                        &plan.shares,
                    )
                    .await?;
                if !committed {
                    return Err(EngineError::conflict(format!(
                        "experiment {experiment_id} left draft while starting"
                    )));
                }
            }
            ExperimentKind::Ad => {
                let account_id = experiment.ad_account_id.clone().ok_or_else(|| {
                    EngineError::validation(format!("experiment {experiment_id} has no ad account"))
                })?;
                let account_name = self
                    .gateways
                    .ads
                    .verify_account(&account_id)
                    .await
                    .map_err(|e| Self::gateway_failure(experiment_id, e))?;
                tracing::info!(%experiment_id, account_name, "ad account verified");

                let campaign_id = self
                    .gateways
                    .ads
                    .create_campaign(&experiment, &variants)
                    .await
                    .map_err(|e| Self::gateway_failure(experiment_id, e))?;

                let _guard = lock.lock().await;
                let committed = self
                    .experiments_repo
                    .commit_start_ad(experiment_id, &campaign_id)
                    .await?;
                if !committed {
                    // Cancel raced the start; stop the spend we just created.
                    if let Err(e) = self.gateways.ads.pause_campaign(&campaign_id).await {
                        tracing::error!(%experiment_id, campaign_id, "failed to pause orphaned campaign: {e}");
                    }
                    return Err(EngineError::conflict(format!(
                        "experiment {experiment_id} left draft while starting"
                    )));
                }
            }
        }

        self.load(experiment_id).await
    }

    pub async fn pause(&self, experiment_id: Uuid) -> Result<Experiment, EngineError> {
        self.spend_transition(experiment_id, LifecycleAction::Pause).await
    }

    pub async fn resume(&self, experiment_id: Uuid) -> Result<Experiment, EngineError> {
        self.spend_transition(experiment_id, LifecycleAction::Resume).await
    }

    /// Shared pause/resume path: both toggle external spend and then commit
    /// a guarded status move.
    async fn spend_transition(
        &self,
        experiment_id: Uuid,
        action: LifecycleAction,
    ) -> Result<Experiment, EngineError> {
        let lock = self.locks.for_experiment(experiment_id);

        let (from, to, campaign_id) = {
            let _guard = lock.lock().await;
            let experiment = self.load(experiment_id).await?;
            let to = next_status(experiment.status, action, experiment.kind)?;
            let campaign_id = experiment.external_campaign_id.clone().ok_or_else(|| {
                EngineError::data_integrity(format!(
                    "experiment {experiment_id} is active without an external campaign"
                ))
            })?;
            (experiment.status, to, campaign_id)
        };

        let call = match action {
            LifecycleAction::Pause => self.gateways.ads.pause_campaign(&campaign_id).await,
            LifecycleAction::Resume => self.gateways.ads.resume_campaign(&campaign_id).await,
            _ => unreachable!("spend_transition only handles pause and resume"),
        };
        call.map_err(|e| Self::gateway_failure(experiment_id, e))?;

        let _guard = lock.lock().await;
        let moved = self.experiments_repo.transition(experiment_id, &[from], to).await?;
        if !moved {
            return Err(EngineError::conflict(format!(
                "experiment {experiment_id} changed status during {}",
                action.as_str()
            )));
        }
        self.load(experiment_id).await
    }

    pub async fn cancel(&self, experiment_id: Uuid) -> Result<Experiment, EngineError> {
        let lock = self.locks.for_experiment(experiment_id);

        let (status, kind, campaign_id) = {
            let _guard = lock.lock().await;
            let experiment = self.load(experiment_id).await?;
            next_status(experiment.status, LifecycleAction::Cancel, experiment.kind)?;
            (experiment.status, experiment.kind, experiment.external_campaign_id.clone())
        };

        // Cancellation takes precedence: a spend-stop failure is logged and
        // retried out of band rather than blocking the cancel.
        if kind == ExperimentKind::Ad && status != ExperimentStatus::Draft {
            if let Some(campaign_id) = &campaign_id {
                if let Err(e) = self.gateways.ads.pause_campaign(campaign_id).await {
                    tracing::warn!(%experiment_id, campaign_id, "spend stop failed during cancel: {e}");
                }
            }
        }

        let _guard = lock.lock().await;
        let moved = self
            .experiments_repo
            .transition(
                experiment_id,
                &[ExperimentStatus::Draft, ExperimentStatus::Running, ExperimentStatus::Paused],
                ExperimentStatus::Cancelled,
            )
            .await?;
        if !moved {
            return Err(EngineError::conflict(format!(
                "experiment {experiment_id} is already in a terminal status"
            )));
        }
        self.load(experiment_id).await
    }

    /// Manual winner declaration. The named variant must belong to the
    /// experiment; it is accepted even when it is not statistically leading.
    pub async fn declare_winner(
        &self,
        experiment_id: Uuid,
        winner_variant_id: Uuid,
    ) -> Result<Experiment, EngineError> {
        let lock = self.locks.for_experiment(experiment_id);

        let (kind, campaign_id) = {
            let _guard = lock.lock().await;
            let experiment = self.load(experiment_id).await?;
            let variants = self.variants_repo.list_for_experiment(experiment_id).await?;
            winner_guard(&experiment, &variants, winner_variant_id)?;
            (experiment.kind, experiment.external_campaign_id.clone())
        };

        if kind == ExperimentKind::Ad {
            let campaign_id = campaign_id.ok_or_else(|| {
                EngineError::data_integrity(format!(
                    "experiment {experiment_id} is active without an external campaign"
                ))
            })?;
            self.gateways
                .ads
                .apply_winner(&campaign_id, winner_variant_id)
                .await
                .map_err(|e| Self::gateway_failure(experiment_id, e))?;
        }

        let _guard = lock.lock().await;
        let committed = self
            .experiments_repo
            .complete_with_winner(experiment_id, winner_variant_id)
            .await?;
        if !committed {
            return Err(EngineError::conflict(format!(
                "experiment {experiment_id} already has a declared winner or is no longer active"
            )));
        }
        self.load(experiment_id).await
    }

    /// One-shot winner send to the held-back remainder of a completed
    /// content test. The `remainder_sent` flag is claimed before dispatch
    /// and released on failure so the send can be retried.
    pub async fn send_remainder(&self, experiment_id: Uuid) -> Result<usize, EngineError> {
        let lock = self.locks.for_experiment(experiment_id);

        let (winner, recipients) = {
            let _guard = lock.lock().await;
            let experiment = self.load(experiment_id).await?;
            if experiment.kind != ExperimentKind::Content {
                return Err(EngineError::validation(format!(
                    "experiment {experiment_id} has no held-back remainder to send"
                )));
            }
            let winner_id = match (experiment.status, experiment.winner_variant_id) {
                (ExperimentStatus::Completed, Some(w)) => w,
                _ => {
                    return Err(EngineError::conflict(format!(
                        "experiment {experiment_id} has no declared winner yet"
                    )));
                }
            };
            if !self.experiments_repo.claim_remainder(experiment_id).await? {
                return Err(EngineError::conflict(format!(
                    "remainder of experiment {experiment_id} was already sent"
                )));
            }
            let winner = self
                .variants_repo
                .get(winner_id)
                .await?
                .ok_or_else(|| {
                    EngineError::data_integrity(format!(
                        "winner variant {winner_id} of experiment {experiment_id} is missing"
                    ))
                })?;
            let recipients = self.experiments_repo.holdback_recipients(experiment_id).await?;
            (winner, recipients)
        };

        if recipients.is_empty() {
            tracing::info!(%experiment_id, "no held-back recipients; remainder send is a no-op");
            return Ok(0);
        }

        match self.gateways.delivery.dispatch(&winner, &recipients).await {
            Ok(dispatch_id) => {
                tracing::info!(%experiment_id, dispatch_id, recipients = recipients.len(), "winner sent to remainder");
                Ok(recipients.len())
            }
            Err(e) => {
                let _guard = lock.lock().await;
                self.experiments_repo.release_remainder(experiment_id).await?;
                Err(Self::gateway_failure(experiment_id, e))
            }
        }
    }

    /// Pulls current metrics (ad tests), recomputes significance, caches the
    /// result, and — for auto-select experiments — attempts the completion
    /// transition under the same lock hold. Never changes status otherwise.
    pub async fn refresh(&self, experiment_id: Uuid) -> Result<SignificanceResult, EngineError> {
        let lock = self.locks.for_experiment(experiment_id);

        let experiment = {
            let _guard = lock.lock().await;
            let experiment = self.load(experiment_id).await?;
            if !matches!(
                experiment.status,
                ExperimentStatus::Running | ExperimentStatus::Paused | ExperimentStatus::Completed
            ) {
                return Err(EngineError::conflict(format!(
                    "experiment {experiment_id} in status {} cannot be refreshed",
                    experiment.status.as_db()
                )));
            }
            experiment
        };

        let pulled = if experiment.kind == ExperimentKind::Ad {
            let campaign_id = experiment.external_campaign_id.as_deref().ok_or_else(|| {
                EngineError::data_integrity(format!(
                    "experiment {experiment_id} is active without an external campaign"
                ))
            })?;
            Some(
                self.gateways
                    .ads
                    .pull_metrics(campaign_id)
                    .await
                    .map_err(|e| Self::gateway_failure(experiment_id, e))?,
            )
        } else {
            None
        };

        let (result, auto_winner) = {
            let _guard = lock.lock().await;
            let current = self.load(experiment_id).await?;
            if current.status == ExperimentStatus::Cancelled {
                return Err(EngineError::conflict(format!(
                    "experiment {experiment_id} was cancelled mid-refresh"
                )));
            }

            let variants = self.variants_repo.list_for_experiment(experiment_id).await?;
            if let Some(pulls) = pulled {
                for pull in pulls {
                    if variants.iter().any(|v| v.variant_id == pull.variant_id) {
                        if current.status.is_terminal() {
                            continue; // counters are frozen after completion
                        }
                        self.variants_repo
                            .replace_counters(pull.variant_id, &pull.counters)
                            .await?;
                    } else {
                        tracing::warn!(
                            %experiment_id,
                            variant_id = %pull.variant_id,
                            "platform reported counters for an unknown variant; dropped"
                        );
                    }
                }
            }

            let variants = self.variants_repo.list_for_experiment(experiment_id).await?;
            let result = evaluate(current.success_metric, &variants, &self.evaluator_config);
            if let Err(e) = self.significance_cache.write(experiment_id, &result).await {
                tracing::warn!(%experiment_id, "significance cache write failed: {e}");
            }
            self.experiments_repo.mark_refresh(experiment_id, None).await?;

            let auto_winner = if current.auto_select_winner
                && result.confident
                && matches!(current.status, ExperimentStatus::Running | ExperimentStatus::Paused)
            {
                match result.leading_variant_id {
                    Some(leader) => {
                        let committed = self
                            .experiments_repo
                            .complete_with_winner(experiment_id, leader)
                            .await?;
                        if committed {
                            tracing::info!(%experiment_id, winner = %leader, "winner auto-selected");
                            Some((leader, current.kind, current.external_campaign_id.clone()))
                        } else {
                            None
                        }
                    }
                    None => None,
                }
            } else {
                None
            };

            (result, auto_winner)
        };

        // Winner application on the platform happens outside the lock; a
        // failure here is retried by the operator, the decision itself is
        // already committed.
        if let Some((leader, ExperimentKind::Ad, Some(campaign_id))) = auto_winner {
            if let Err(e) = self.gateways.ads.apply_winner(&campaign_id, leader).await {
                tracing::error!(%experiment_id, campaign_id, "winner application failed: {e}");
                self.experiments_repo
                    .mark_refresh(experiment_id, Some(&format!("winner application failed: {e}")))
                    .await?;
            }
        }

        Ok(result)
    }

    /// Cached significance result, recomputed on a miss. Read-only.
    pub async fn significance(&self, experiment_id: Uuid) -> Result<SignificanceResult, EngineError> {
        match self.significance_cache.read(experiment_id).await {
            Ok(Some(cached)) => return Ok(cached),
            Ok(None) => {}
            Err(e) => tracing::warn!(%experiment_id, "significance cache read failed: {e}"),
        }
        let experiment = self.load(experiment_id).await?;
        let variants = self.variants_repo.list_for_experiment(experiment_id).await?;
        let result = evaluate(experiment.success_metric, &variants, &self.evaluator_config);
        if let Err(e) = self.significance_cache.write(experiment_id, &result).await {
            tracing::warn!(%experiment_id, "significance cache write failed: {e}");
        }
        Ok(result)
    }

    /// Event ingestion: dedup, vocabulary normalization, monotonic counter
    /// increment. Events arriving after completion stay in the audit log but
    /// never move counters or the winner.
    pub async fn record_event(&self, input: RecordEventInput) -> Result<RecordOutcome, EngineError> {
        let variant = self
            .variants_repo
            .get(input.variant_id)
            .await?
            .ok_or_else(|| {
                EngineError::not_found(format!("variant {} does not exist", input.variant_id))
            })?;
        let experiment = self.load(variant.experiment_id).await?;

        let external_event_id = match input.external_event_id {
            Some(id) if !id.is_empty() => id,
            _ => derive_event_id(&input)?,
        };

        let delta = match normalize(experiment.kind, input.kind, input.value_minor) {
            Some(delta) => delta,
            None => {
                tracing::warn!(
                    experiment_id = %experiment.experiment_id,
                    variant_id = %input.variant_id,
                    kind = input.kind.as_db(),
                    "event outside the experiment's metric vocabulary; dropped"
                );
                return Ok(RecordOutcome::Dropped);
            }
        };
        if !delta.is_monotonic() || !delta.applicable_to(experiment.kind) {
            return Err(EngineError::data_integrity(format!(
                "counter delta for variant {} violates experiment {} vocabulary",
                input.variant_id, experiment.experiment_id
            )));
        }

        // Fast-path replay check only; the id is remembered further down,
        // after the event is durably recorded, so a failed write never makes
        // the webhook's retry look like a replay.
        {
            let window = self.dedup.lock().await;
            if window.contains(&external_event_id) {
                return Ok(RecordOutcome::Duplicate);
            }
        }

        let lock = self.locks.for_experiment(experiment.experiment_id);
        let outcome = {
            let _guard = lock.lock().await;
            let event = RawEvent {
                variant_id: input.variant_id,
                kind: input.kind,
                external_event_id: external_event_id.clone(),
                value_minor: input.value_minor,
            };

            let current = self.load(experiment.experiment_id).await?;
            if current.status.is_terminal() {
                if self.raw_events_repo.insert_if_new(&event).await? {
                    RecordOutcome::AuditOnly
                } else {
                    RecordOutcome::Duplicate
                }
            } else if self.raw_events_repo.insert_and_apply(&event, &delta).await? {
                RecordOutcome::Recorded
            } else {
                RecordOutcome::Duplicate
            }
        };

        let mut window = self.dedup.lock().await;
        window.insert(&external_event_id);
        Ok(outcome)
    }
}

/// Deterministic fallback id for sources that do not supply one: the same
/// payload replayed hashes to the same id and deduplicates.
fn derive_event_id(input: &RecordEventInput) -> Result<String, EngineError> {
    let occurred_at = input.occurred_at.ok_or_else(|| {
        EngineError::validation(
            "events need an external_event_id or an occurred_at timestamp to deduplicate",
        )
    })?;
    let mut hasher = Sha256::new();
    hasher.update(input.variant_id.as_bytes());
    hasher.update(input.kind.as_db().as_bytes());
    hasher.update(input.value_minor.unwrap_or(0).to_be_bytes());
    hasher.update(occurred_at.timestamp_millis().to_be_bytes());
    Ok(format!("derived_{:x}", hasher.finalize()))
}
