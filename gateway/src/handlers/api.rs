//! REST endpoints next to the voice socket.

use axum::{
    Json,
    extract::{Query, State},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::core::turn_detector::TurnDetectorConfig;
use crate::errors::{AppError, AppResult};
use crate::state::AppState;

/// Liveness probe
pub async fn health_check() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinutesQuery {
    #[serde(default)]
    pub company_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinutesResponse {
    pub remaining_minutes: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRequest {
    #[serde(default)]
    pub company_id: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub seconds_used: f64,
}

fn required_company(company_id: Option<&str>) -> AppResult<&str> {
    company_id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::BadRequest("companyId required".to_string()))
}

/// `GET /minutes?companyId=…`
pub async fn get_minutes(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MinutesQuery>,
) -> AppResult<Json<MinutesResponse>> {
    let company_id = required_company(query.company_id.as_deref())?;
    let remaining_minutes = state.providers.quota.remaining_minutes(company_id).await?;
    Ok(Json(MinutesResponse { remaining_minutes }))
}

/// `POST /minutes` charges a finished call and returns the new balance.
pub async fn record_minutes(
    State(state): State<Arc<AppState>>,
    Json(body): Json<UsageRequest>,
) -> AppResult<Json<MinutesResponse>> {
    let company_id = required_company(Some(&body.company_id))?;
    if !body.seconds_used.is_finite() || body.seconds_used <= 0.0 {
        return Err(AppError::BadRequest("Missing payload".to_string()));
    }
    let seconds = body.seconds_used.round() as u64;
    let conversation_id = body.conversation_id.as_deref().unwrap_or_default();

    let quota = &state.providers.quota;
    quota
        .record_usage(company_id, conversation_id, seconds)
        .await?;
    let remaining_minutes = quota.remaining_minutes(company_id).await?;

    info!(company_id, seconds, remaining_minutes, "Minutes recorded");
    Ok(Json(MinutesResponse { remaining_minutes }))
}

/// `GET /turn-detection`: thresholds clients should capture with
pub async fn turn_detection_config(State(state): State<Arc<AppState>>) -> Json<TurnDetectorConfig> {
    Json(state.config.turn_detection.clone())
}
