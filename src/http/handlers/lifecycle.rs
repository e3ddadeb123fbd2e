use crate::domain::error::EngineError;
use crate::AppState;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use uuid::Uuid;

pub async fn start_experiment(
    State(state): State<AppState>,
    Path(experiment_id): Path<Uuid>,
) -> Result<impl IntoResponse, EngineError> {
    let experiment = state.service.start(experiment_id).await?;
    Ok(Json(experiment))
}

pub async fn pause_experiment(
    State(state): State<AppState>,
    Path(experiment_id): Path<Uuid>,
) -> Result<impl IntoResponse, EngineError> {
    let experiment = state.service.pause(experiment_id).await?;
    Ok(Json(experiment))
}

pub async fn resume_experiment(
    State(state): State<AppState>,
    Path(experiment_id): Path<Uuid>,
) -> Result<impl IntoResponse, EngineError> {
    let experiment = state.service.resume(experiment_id).await?;
    Ok(Json(experiment))
}

pub async fn cancel_experiment(
    State(state): State<AppState>,
    Path(experiment_id): Path<Uuid>,
) -> Result<impl IntoResponse, EngineError> {
    let experiment = state.service.cancel(experiment_id).await?;
    Ok(Json(experiment))
}

#[derive(Debug, serde::Deserialize)]
pub struct DeclareWinnerRequest {
    pub winner_variant_id: Uuid,
}

pub async fn declare_winner(
    State(state): State<AppState>,
    Path(experiment_id): Path<Uuid>,
    Json(req): Json<DeclareWinnerRequest>,
) -> Result<impl IntoResponse, EngineError> {
    let experiment = state
        .service
        .declare_winner(experiment_id, req.winner_variant_id)
        .await?;
    Ok(Json(experiment))
}

pub async fn send_remainder(
    State(state): State<AppState>,
    Path(experiment_id): Path<Uuid>,
) -> Result<impl IntoResponse, EngineError> {
    let sent = state.service.send_remainder(experiment_id).await?;
    Ok(Json(serde_json::json!({ "recipients_sent": sent })))
}

pub async fn refresh_experiment(
    State(state): State<AppState>,
    Path(experiment_id): Path<Uuid>,
) -> Result<impl IntoResponse, EngineError> {
    let result = state.service.refresh(experiment_id).await?;
    Ok(Json(result))
}
