use crate::domain::error::EngineError;
use crate::lifecycle::controller::RecordEventInput;
use crate::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

/// Webhook-facing ingestion point. Callers parse provider payloads; the
/// engine only sees the normalized event shape.
pub async fn record_event(
    State(state): State<AppState>,
    Json(input): Json<RecordEventInput>,
) -> Result<impl IntoResponse, EngineError> {
    let outcome = state.service.record_event(input).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "outcome": outcome })),
    ))
}
