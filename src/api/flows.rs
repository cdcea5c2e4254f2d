// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Serialize;
use tracing::info;

use crate::types::{CreateFlow, Identity, UpdateFlow};

use super::{ok, ApiResult, AppState, ListQuery, Paginated};

pub async fn list(State(state): State<AppState>, Query(query): Query<ListQuery>) -> ApiResult {
    let flows = state
        .store
        .list_flows(query.page(), query.search.as_deref(), query.sort.as_deref())
        .await?;
    Ok(ok(Paginated::from(flows)))
}

pub async fn create(State(state): State<AppState>, Json(input): Json<CreateFlow>) -> ApiResult {
    let flow = state.store.create_flow(&input).await?;
    info!(flow_id = flow.flow_id, name = %flow.name, "flow created");
    Ok(super::created(flow))
}

pub async fn fetch(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    Ok(ok(state.store.get_flow(id).await?))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<UpdateFlow>,
) -> ApiResult {
    Ok(ok(state.store.update_flow(id, &input).await?))
}

pub async fn remove(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    state.store.delete_flow(id).await?;
    // A deleted flow cannot stay selected for recording
    {
        let mut selected = state.selected_flow.lock();
        if *selected == Some(id) {
            *selected = None;
        }
    }
    Ok(ok(serde_json::json!({ "deleted": id })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SelectedFlow {
    flow_id: i64,
    selected: bool,
}

/// Mark the flow the next recording session attaches to
pub async fn select(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    state.store.get_flow(id).await?;
    *state.selected_flow.lock() = Some(id);
    Ok(ok(SelectedFlow {
        flow_id: id,
        selected: true,
    }))
}

pub async fn list_requests(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<ListQuery>,
) -> ApiResult {
    let requests = state.store.list_requests(id, query.page()).await?;
    Ok(ok(Paginated::from(requests)))
}

pub async fn list_test_cases(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<ListQuery>,
) -> ApiResult {
    let test_cases = state.store.list_test_cases(id, query.page()).await?;
    Ok(ok(Paginated::from(test_cases)))
}

pub async fn get_identities(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    let flow = state.store.get_flow(id).await?;
    Ok(ok(flow.identity_pool))
}

/// Replace the flow's identity pool used by privilege-substitution rules
pub async fn put_identities(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(pool): Json<Vec<Identity>>,
) -> ApiResult {
    for identity in &pool {
        if identity.name.trim().is_empty() {
            return Err(crate::errors::DetectorError::validation(
                "identity name must not be empty",
            )
            .into());
        }
    }
    let flow = state.store.set_identity_pool(id, &pool).await?;
    info!(
        flow_id = id,
        identities = flow.identity_pool.len(),
        "identity pool updated"
    );
    Ok(ok(flow.identity_pool))
}
