// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

use axum::extract::{Path, State};
use axum::Json;
use tracing::info;

use crate::errors::DetectorError;
use crate::mutator::{self, catalog::MutationCatalog};

use super::{ok, ApiResult, AppState};

pub async fn generate_for_request(
    State(state): State<AppState>,
    Path(request_id): Path<i64>,
) -> ApiResult {
    let catalog = state.mutation_catalog.read().clone();
    let outcome = mutator::generate_for_request_id(&state.store, &catalog, request_id).await?;
    Ok(ok(outcome))
}

pub async fn generate_for_flow(
    State(state): State<AppState>,
    Path(flow_id): Path<i64>,
) -> ApiResult {
    let catalog = state.mutation_catalog.read().clone();
    let outcome = mutator::generate_for_flow_id(&state.store, &catalog, flow_id).await?;
    Ok(ok(outcome))
}

pub async fn get_rules(State(state): State<AppState>) -> ApiResult {
    Ok(ok(state.mutation_catalog.read().clone()))
}

/// Replace the mutation catalog. The version travels with every generated
/// test case, so a bumped catalog never silently aliases an old one.
pub async fn put_rules(
    State(state): State<AppState>,
    Json(catalog): Json<MutationCatalog>,
) -> ApiResult {
    if catalog.version.trim().is_empty() {
        return Err(DetectorError::validation("catalog version must not be empty").into());
    }
    if catalog.rules.is_empty() {
        return Err(DetectorError::validation("catalog must contain at least one rule").into());
    }
    let mut ids: Vec<&str> = catalog.rules.iter().map(|r| r.id.as_str()).collect();
    ids.sort_unstable();
    let before = ids.len();
    ids.dedup();
    if ids.len() != before {
        return Err(DetectorError::validation("rule ids must be unique").into());
    }

    info!(
        version = %catalog.version,
        rules = catalog.rules.len(),
        "mutation catalog replaced"
    );
    *state.mutation_catalog.write() = catalog.clone();
    Ok(ok(catalog))
}
