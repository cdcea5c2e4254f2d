// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use crate::errors::DetectorError;
use crate::recorder;
use crate::types::CapturedExchange;

use super::{created, ok, ApiResult, AppState};

pub async fn status(State(state): State<AppState>) -> ApiResult {
    Ok(ok(state.recorder.status()))
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct StartRequest {
    pub flow_id: Option<i64>,
}

/// Start a recording session against an explicit flow, or the flow
/// previously marked via /flows/{id}/select
pub async fn start(
    State(state): State<AppState>,
    body: Option<Json<StartRequest>>,
) -> ApiResult {
    let requested = body.and_then(|Json(b)| b.flow_id);
    let flow_id = match requested.or_else(|| *state.selected_flow.lock()) {
        Some(id) => id,
        None => {
            return Err(DetectorError::validation(
                "no flow selected; pass flowId or select a flow first",
            )
            .into())
        }
    };
    state.store.get_flow(flow_id).await?;
    Ok(ok(state.recorder.start(flow_id)?))
}

pub async fn stop(State(state): State<AppState>) -> ApiResult {
    Ok(ok(state.recorder.stop()?))
}

pub async fn add_request(
    State(state): State<AppState>,
    Json(exchange): Json<CapturedExchange>,
) -> ApiResult {
    let recorded = state.recorder.add_request(&state.store, &exchange).await?;
    Ok(created(recorded))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarImportRequest {
    pub flow_name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub har: serde_json::Value,
}

/// Bulk import: every HAR entry becomes a baseline request of a new flow
pub async fn import_har(
    State(state): State<AppState>,
    Json(body): Json<HarImportRequest>,
) -> ApiResult {
    if body.flow_name.trim().is_empty() {
        return Err(DetectorError::validation("flowName must not be empty").into());
    }
    let har_json = body.har.to_string();
    let (flow, imported) = recorder::import_har(
        &state.store,
        &body.flow_name,
        body.description.as_deref(),
        &har_json,
    )
    .await?;
    Ok(created(serde_json::json!({
        "flowId": flow.flow_id,
        "requestsImported": imported,
    })))
}
