// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

use axum::extract::State;
use serde::Serialize;

use super::{ok, ApiResult, AppState};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SystemStatus {
    version: &'static str,
    uptime_seconds: u64,
    flows: i64,
    running_executions: usize,
    recording: bool,
}

pub async fn status(State(state): State<AppState>) -> ApiResult {
    Ok(ok(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        flows: state.store.count_flows().await?,
        running_executions: state.replayer.registry().running_count(),
        recording: state.recorder.status().recording,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigView {
    listen_addr: String,
    max_concurrent_requests: usize,
    default_rate_limit_rps: u32,
    request_timeout_s: u64,
    retry_attempts: u32,
    failure_threshold_pct: f64,
    confidence_threshold: f64,
    max_body_bytes: usize,
    report_retention_days: u32,
    request_delay_ms: u64,
    cors_allowed_origins: Vec<String>,
}

/// Effective configuration. The database DSN stays private; the tunable
/// threshold reflects its current runtime value.
pub async fn config(State(state): State<AppState>) -> ApiResult {
    let config = &state.config;
    Ok(ok(ConfigView {
        listen_addr: config.listen_addr.clone(),
        max_concurrent_requests: config.max_concurrent_requests,
        default_rate_limit_rps: config.default_rate_limit_rps,
        request_timeout_s: config.request_timeout_s,
        retry_attempts: config.retry_attempts,
        failure_threshold_pct: config.failure_threshold_pct,
        confidence_threshold: *state.confidence_threshold.read(),
        max_body_bytes: config.max_body_bytes,
        report_retention_days: config.report_retention_days,
        request_delay_ms: config.request_delay_ms,
        cors_allowed_origins: config.cors_allowed_origins.clone(),
    }))
}
