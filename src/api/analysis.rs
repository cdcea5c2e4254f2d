// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::analyzer::{self, DetectionCatalog};
use crate::errors::DetectorError;
use crate::types::AnomalyStatus;

use super::{ok, ApiResult, AppState, ListQuery, Paginated};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisOutcome {
    flow_id: i64,
    anomalies_found: u64,
}

/// Re-run the diff engine over every replayed pair of a flow
pub async fn analyze_flow(State(state): State<AppState>, Path(flow_id): Path<i64>) -> ApiResult {
    let catalog = state.detection_catalog.read().clone();
    let threshold = *state.confidence_threshold.read();
    let anomalies_found =
        analyzer::analyze_flow(&state.store, &catalog, threshold, flow_id).await?;
    Ok(ok(AnalysisOutcome {
        flow_id,
        anomalies_found,
    }))
}

pub async fn list_anomalies(
    State(state): State<AppState>,
    Path(flow_id): Path<i64>,
    Query(query): Query<ListQuery>,
) -> ApiResult {
    let anomalies = state.store.list_anomalies(flow_id, query.page()).await?;
    Ok(ok(Paginated::from(anomalies)))
}

pub async fn fetch_anomaly(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    Ok(ok(state.store.get_anomaly(id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyUpdate {
    pub status: AnomalyStatus,
}

/// Triage an anomaly: confirmed or false_positive verdicts persist
/// across re-analysis
pub async fn update_anomaly(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(update): Json<AnomalyUpdate>,
) -> ApiResult {
    let anomaly = state.store.set_anomaly_status(id, update.status).await?;
    info!(
        anomaly_id = id,
        status = update.status.as_str(),
        "anomaly triaged"
    );
    Ok(ok(anomaly))
}

pub async fn get_rules(State(state): State<AppState>) -> ApiResult {
    Ok(ok(state.detection_catalog.read().clone()))
}

/// Replace the detection catalog; confidences and thresholds are data
pub async fn put_rules(
    State(state): State<AppState>,
    Json(catalog): Json<DetectionCatalog>,
) -> ApiResult {
    if catalog.version.trim().is_empty() {
        return Err(DetectorError::validation("catalog version must not be empty").into());
    }
    if catalog.detectors.is_empty() {
        return Err(DetectorError::validation("catalog must contain at least one detector").into());
    }
    info!(
        version = %catalog.version,
        detectors = catalog.detectors.len(),
        "detection catalog replaced"
    );
    *state.detection_catalog.write() = catalog.clone();
    Ok(ok(catalog))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThresholdView {
    threshold: f64,
}

pub async fn get_threshold(State(state): State<AppState>) -> ApiResult {
    Ok(ok(ThresholdView {
        threshold: *state.confidence_threshold.read(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdUpdate {
    pub threshold: f64,
}

pub async fn set_threshold(
    State(state): State<AppState>,
    Json(update): Json<ThresholdUpdate>,
) -> ApiResult {
    if !(0.0..=1.0).contains(&update.threshold) {
        return Err(DetectorError::validation("threshold must be within [0, 1]").into());
    }
    state.persist_threshold(update.threshold).await?;
    info!(threshold = update.threshold, "confidence threshold updated");
    Ok(ok(ThresholdView {
        threshold: update.threshold,
    }))
}
