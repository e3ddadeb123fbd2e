use crate::domain::error::EngineError;
use crate::domain::experiment::ExperimentKind;
use crate::AppState;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use uuid::Uuid;

#[derive(Debug, serde::Serialize)]
pub struct VariantResultRow {
    pub variant_id: Uuid,
    pub position: i32,
    pub is_winner: bool,
    pub sent: i64,
    pub delivered: i64,
    pub opens: i64,
    pub clicks: i64,
    pub conversions: i64,
    pub impressions: i64,
    pub spend_minor: i64,
    pub conversion_value_minor: i64,
    pub open_rate: f64,
    pub click_rate: f64,
    pub conversion_rate: f64,
    pub ctr: f64,
    pub cpm: f64,
    pub cpc: f64,
    pub roas: f64,
}

/// Per-variant counters plus the rates derived from them on read.
pub async fn get_results(
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

    let rows: Vec<VariantResultRow> = variants
        .iter()
        .map(|v| {
            let c = &v.counters;
            VariantResultRow {
                variant_id: v.variant_id,
                position: v.position,
                is_winner: v.is_winner,
                sent: c.sent,
                delivered: c.delivered,
                opens: c.opens,
                clicks: c.clicks,
                conversions: c.conversions,
                impressions: c.impressions,
                spend_minor: c.spend_minor,
                conversion_value_minor: c.conversion_value_minor,
                open_rate: c.open_rate(),
                click_rate: c.click_rate(),
                conversion_rate: c.conversion_rate(),
                ctr: c.ctr(),
                cpm: c.cpm(),
                cpc: c.cpc(),
                roas: c.roas(),
            }
        })
        .collect();

    Ok(Json(serde_json::json!({
        "experiment_id": experiment.experiment_id,
        "kind": experiment.kind,
        "status": experiment.status,
        "success_metric": experiment.success_metric,
        "holdback_count": if experiment.kind == ExperimentKind::Content {
            experiment.holdback_count
        } else {
            None
        },
        "variants": rows,
    })))
}

pub async fn get_significance(
    State(state): State<AppState>,
    Path(experiment_id): Path<Uuid>,
) -> Result<impl IntoResponse, EngineError> {
    let result = state.service.significance(experiment_id).await?;
    Ok(Json(result))
}
