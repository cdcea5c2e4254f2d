// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;

use crate::errors::DetectorError;
use crate::reporting;

use super::{ok, ApiResult, AppState};

pub async fn summary(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    Ok(ok(reporting::flow_report(&state.store, id).await?))
}

/// Standalone HTML report, served as an attachment
pub async fn html(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    let report = reporting::flow_report(&state.store, id).await?;
    let rendered = reporting::render_html(&report);
    let disposition = format!("attachment; filename=\"flow-{}-report.html\"", id);
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/html; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        rendered,
    )
        .into_response())
}

/// Raw report JSON, the documented contract for downstream pipelines.
/// Served unenveloped so consumers parse the report shape directly.
pub async fn json(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    let report = reporting::flow_report(&state.store, id).await?;
    let rendered = serde_json::to_string_pretty(&report)
        .map_err(|e| DetectorError::Internal(format!("report serialization failed: {}", e)))?;
    let disposition = format!("attachment; filename=\"flow-{}-report.json\"", id);
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        rendered,
    )
        .into_response())
}

pub async fn executive(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    Ok(ok(reporting::executive_summary(&state.store, id).await?))
}

pub async fn analytics(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    Ok(ok(reporting::flow_analytics(&state.store, id).await?))
}
