// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

use axum::extract::{Path, State};
use tracing::info;

use super::{ok, ApiResult, AppState};

/// Kick off a whole-flow execution and return its initial state; callers
/// poll /replay/status/{execution_id}
pub async fn replay_flow(State(state): State<AppState>, Path(flow_id): Path<i64>) -> ApiResult {
    let execution = state.replayer.replay_flow(flow_id).await?;
    info!(
        flow_id,
        execution_id = %execution.execution_id,
        total = execution.total,
        "flow replay started"
    );
    Ok(ok(execution))
}

pub async fn replay_test_case(
    State(state): State<AppState>,
    Path(test_case_id): Path<i64>,
) -> ApiResult {
    let execution = state.replayer.replay_test_case(test_case_id).await?;
    info!(
        test_case_id,
        execution_id = %execution.execution_id,
        "test case replay started"
    );
    Ok(ok(execution))
}

pub async fn status(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> ApiResult {
    Ok(ok(state.replayer.execution_status(&execution_id).await?))
}

pub async fn stop(State(state): State<AppState>, Path(execution_id): Path<String>) -> ApiResult {
    let execution = state.replayer.stop(&execution_id).await?;
    info!(execution_id = %execution.execution_id, "execution cancellation requested");
    Ok(ok(execution))
}
