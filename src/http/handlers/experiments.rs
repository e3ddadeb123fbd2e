use crate::domain::error::EngineError;
use crate::domain::experiment::{
    Experiment, ExperimentKind, SampleAllocation, SuccessMetric, TestType,
};
use crate::domain::variant::{Variant, VariantContent};
use crate::repo::experiments_repo::CreateExperimentInput;
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use uuid::Uuid;

#[derive(Debug, serde::Deserialize)]
pub struct CreateExperimentRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub kind: ExperimentKind,
    pub test_type: TestType,
    pub success_metric: SuccessMetric,
    pub sample_allocation: SampleAllocation,
    #[serde(default)]
    pub auto_select_winner: bool,
    pub ad_account_id: Option<String>,
    pub targeting: Option<serde_json::Value>,
    #[serde(default)]
    pub variants: Vec<VariantContent>,
}

#[derive(Debug, serde::Serialize)]
pub struct ExperimentResponse {
    #[serde(flatten)]
    pub experiment: Experiment,
    pub variants: Vec<Variant>,
}

pub async fn create_experiment(
    State(state): State<AppState>,
    Json(req): Json<CreateExperimentRequest>,
) -> Result<impl IntoResponse, EngineError> {
    let input = CreateExperimentInput {
        name: req.name,
        description: req.description,
        kind: req.kind,
        test_type: req.test_type,
        success_metric: req.success_metric,
        sample_allocation: req.sample_allocation,
        auto_select_winner: req.auto_select_winner,
        ad_account_id: req.ad_account_id,
        targeting: req.targeting,
    };
    let (experiment, variants) = state.service.create(input, req.variants).await?;
    Ok((
        StatusCode::CREATED,
        Json(ExperimentResponse { experiment, variants }),
    ))
}

pub async fn list_experiments(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, EngineError> {
    let experiments = state.service.experiments_repo.list().await?;
    Ok(Json(experiments))
}

pub async fn get_experiment(
    State(state): State<AppState>,
    Path(experiment_id): Path<Uuid>,
) -> Result<impl IntoResponse, EngineError> {
    let experiment = state
        .service
        .experiments_repo
        .get(experiment_id)
        .await?
        .ok_or_else(|| EngineError::not_found(format!("experiment {experiment_id} does not exist")))?;
    let variants = state
        .service
        .variants_repo
        .list_for_experiment(experiment_id)
        .await?;
    Ok(Json(ExperimentResponse { experiment, variants }))
}

pub async fn add_variant(
    State(state): State<AppState>,
    Path(experiment_id): Path<Uuid>,
    Json(content): Json<VariantContent>,
) -> Result<impl IntoResponse, EngineError> {
    let variant = state.service.add_variant(experiment_id, content).await?;
    Ok((StatusCode::CREATED, Json(variant)))
}

/// Drafts can be deleted outright; anything that ever ran is kept for audit.
pub async fn delete_experiment(
    State(state): State<AppState>,
    Path(experiment_id): Path<Uuid>,
) -> Result<impl IntoResponse, EngineError> {
    if !state.service.experiments_repo.delete(experiment_id).await? {
        return Err(EngineError::conflict(format!(
            "experiment {experiment_id} is not a draft and cannot be deleted"
        )));
    }
    Ok(StatusCode::NO_CONTENT)
}
