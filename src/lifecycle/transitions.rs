use crate::domain::error::EngineError;
use crate::domain::experiment::{
    Experiment, ExperimentKind, ExperimentStatus, MAX_VARIANTS, MIN_VARIANTS,
};
use crate::domain::variant::Variant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    Start,
    Pause,
    Resume,
    Complete,
    Cancel,
}

impl LifecycleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleAction::Start => "start",
            LifecycleAction::Pause => "pause",
            LifecycleAction::Resume => "resume",
            LifecycleAction::Complete => "complete",
            LifecycleAction::Cancel => "cancel",
        }
    }
}

/// The full transition table. Completed and cancelled absorb everything;
/// pausing only exists for ad tests because a content send is one-shot.
pub fn next_status(
    current: ExperimentStatus,
    action: LifecycleAction,
    kind: ExperimentKind,
) -> Result<ExperimentStatus, EngineError> {
    use ExperimentStatus::*;
    use LifecycleAction::*;

    match (current, action) {
        (Draft, Start) => Ok(Running),
        (Running, Pause) if kind == ExperimentKind::Ad => Ok(Paused),
        (Running, Pause) => Err(EngineError::validation(
            "content test sends are one-shot and cannot be paused",
        )),
        (Paused, Resume) => Ok(Running),
        (Running, Complete) | (Paused, Complete) => Ok(Completed),
        (Draft, Cancel) | (Running, Cancel) | (Paused, Cancel) => Ok(Cancelled),
        (current, action) => Err(EngineError::conflict(format!(
            "cannot {} an experiment in status {}",
            action.as_str(),
            current.as_db()
        ))),
    }
}

/// Guards checked before an experiment may leave draft.
pub fn start_requirements(experiment: &Experiment, variant_count: usize) -> Result<(), EngineError> {
    if variant_count < MIN_VARIANTS {
        return Err(EngineError::validation(format!(
            "experiment {} needs at least {} variants to start, has {}",
            experiment.experiment_id, MIN_VARIANTS, variant_count
        )));
    }
    if variant_count > MAX_VARIANTS {
        return Err(EngineError::validation(format!(
            "experiment {} exceeds the maximum of {} variants",
            experiment.experiment_id, MAX_VARIANTS
        )));
    }
    if experiment.kind == ExperimentKind::Ad && experiment.ad_account_id.is_none() {
        return Err(EngineError::validation(format!(
            "experiment {} has no ad account to verify",
            experiment.experiment_id
        )));
    }
    Ok(())
}

/// Guards a winner declaration: the experiment must still be decidable, the
/// winner must not already be set, and the chosen variant must belong to the
/// experiment.
pub fn winner_guard(
    experiment: &Experiment,
    variants: &[Variant],
    winner: Uuid,
) -> Result<(), EngineError> {
    if experiment.winner_variant_id.is_some() {
        return Err(EngineError::conflict(format!(
            "experiment {} already has a declared winner",
            experiment.experiment_id
        )));
    }
    next_status(experiment.status, LifecycleAction::Complete, experiment.kind)?;
    if !variants.iter().any(|v| v.variant_id == winner) {
        return Err(EngineError::data_integrity(format!(
            "variant {} does not belong to experiment {}",
            winner, experiment.experiment_id
        )));
    }
    Ok(())
}
