// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Control Plane API
 * HTTP/JSON surface over the detector core; validation lives here
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

pub mod analysis;
pub mod flows;
pub mod payloads;
pub mod recording;
pub mod replay;
pub mod reports;
pub mod system;

use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;
use uuid::Uuid;

use crate::analyzer::DetectionCatalog;
use crate::config::AppConfig;
use crate::errors::{DetectorError, DetectorResult};
use crate::mutator::catalog::MutationCatalog;
use crate::recorder::Recorder;
use crate::replayer::{ReplaySettings, Replayer};
use crate::store::{Page, PagedResult, Store};

/// Key under which the tunable confidence threshold persists
const THRESHOLD_CONFIG_KEY: &str = "confidence_threshold";

/// Shared state behind every handler
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub config: Arc<AppConfig>,
    pub recorder: Arc<Recorder>,
    pub replayer: Replayer,
    pub mutation_catalog: Arc<RwLock<MutationCatalog>>,
    pub detection_catalog: Arc<RwLock<DetectionCatalog>>,
    pub confidence_threshold: Arc<RwLock<f64>>,
    pub selected_flow: Arc<Mutex<Option<i64>>>,
    pub started_at: Instant,
}

impl AppState {
    pub async fn new(config: AppConfig, store: Store) -> DetectorResult<Self> {
        // The tunable threshold survives restarts in the store's config table
        let threshold = match store.get_config_value(THRESHOLD_CONFIG_KEY).await? {
            Some(raw) => raw.parse::<f64>().unwrap_or_else(|_| {
                warn!(%raw, "stored confidence threshold unreadable, using default");
                config.confidence_threshold_default
            }),
            None => config.confidence_threshold_default,
        };

        let detection_catalog = Arc::new(RwLock::new(DetectionCatalog::default()));
        let confidence_threshold = Arc::new(RwLock::new(threshold));
        let replayer = Replayer::new(
            store.clone(),
            ReplaySettings::from_config(&config),
            Arc::clone(&detection_catalog),
            Arc::clone(&confidence_threshold),
        )?;

        Ok(Self {
            store,
            config: Arc::new(config),
            recorder: Arc::new(Recorder::new()),
            replayer,
            mutation_catalog: Arc::new(RwLock::new(MutationCatalog::default())),
            detection_catalog,
            confidence_threshold,
            selected_flow: Arc::new(Mutex::new(None)),
            started_at: Instant::now(),
        })
    }

    pub async fn persist_threshold(&self, threshold: f64) -> DetectorResult<()> {
        *self.confidence_threshold.write() = threshold;
        self.store
            .set_config_value(THRESHOLD_CONFIG_KEY, &threshold.to_string())
            .await
    }
}

// --- response envelope --------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEnvelope<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
}

fn envelope<T: Serialize>(status: StatusCode, data: T) -> Response {
    let body = ApiEnvelope {
        success: true,
        data: Some(data),
        error: None,
        code: None,
        details: None,
        timestamp: Utc::now(),
        request_id: Uuid::new_v4().to_string(),
    };
    (status, Json(body)).into_response()
}

pub fn ok<T: Serialize>(data: T) -> Response {
    envelope(StatusCode::OK, data)
}

pub fn created<T: Serialize>(data: T) -> Response {
    envelope(StatusCode::CREATED, data)
}

/// Error wrapper that maps the detector taxonomy onto status codes
pub struct ApiError(pub DetectorError);

impl From<DetectorError> for ApiError {
    fn from(err: DetectorError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = match kind {
            "validation" => StatusCode::UNPROCESSABLE_ENTITY,
            "not_found" => StatusCode::NOT_FOUND,
            "conflict" => StatusCode::CONFLICT,
            "rate_limited" => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let details = match &self.0 {
            DetectorError::RateLimited {
                retry_after: Some(after),
            } => Some(serde_json::json!({ "retryAfter": after.as_secs() })),
            DetectorError::Validation(message) => {
                Some(serde_json::json!({ "reason": message }))
            }
            _ => None,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!(code = kind, error = %self.0, "request failed");
        }

        let body: ApiEnvelope<()> = ApiEnvelope {
            success: false,
            data: None,
            error: Some(self.0.to_string()),
            code: Some(kind.to_string()),
            details,
            timestamp: Utc::now(),
            request_id: Uuid::new_v4().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult = Result<Response, ApiError>;

// --- pagination ---------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub search: Option<String>,
    pub sort: Option<String>,
}

impl ListQuery {
    pub fn page(&self) -> Page {
        Page::new(self.page.unwrap_or(1), self.per_page.unwrap_or(20))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Paginated<T: Serialize> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
    pub has_next: bool,
    pub has_prev: bool,
}

impl<T: Serialize> From<PagedResult<T>> for Paginated<T> {
    fn from(result: PagedResult<T>) -> Self {
        let has_next = (result.page as i64) * (result.per_page as i64) < result.total;
        Self {
            has_next,
            has_prev: result.page > 1,
            items: result.items,
            total: result.total,
            page: result.page,
            per_page: result.per_page,
        }
    }
}

// --- router -------------------------------------------------------------

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);
    if config.cors_allowed_origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        layer.allow_origin(origins)
    }
}

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/api/flows", get(flows::list).post(flows::create))
        .route(
            "/api/flows/:id",
            get(flows::fetch).put(flows::update).delete(flows::remove),
        )
        .route("/api/flows/:id/select", post(flows::select))
        .route("/api/flows/:id/requests", get(flows::list_requests))
        .route("/api/flows/:id/testcases", get(flows::list_test_cases))
        .route(
            "/api/flows/:id/identities",
            get(flows::get_identities).put(flows::put_identities),
        )
        .route("/api/recording/status", get(recording::status))
        .route("/api/recording/start", post(recording::start))
        .route("/api/recording/stop", post(recording::stop))
        .route("/api/recording/request", post(recording::add_request))
        .route("/api/recording/import/har", post(recording::import_har))
        .route(
            "/api/payloads/generate/request/:id",
            post(payloads::generate_for_request),
        )
        .route(
            "/api/payloads/generate/flow/:id",
            post(payloads::generate_for_flow),
        )
        .route(
            "/api/payloads/rules",
            get(payloads::get_rules).put(payloads::put_rules),
        )
        .route("/api/replay/flow/:id", post(replay::replay_flow))
        .route("/api/replay/testcase/:id", post(replay::replay_test_case))
        .route("/api/replay/status/:execution_id", get(replay::status))
        .route("/api/replay/stop/:execution_id", post(replay::stop))
        .route("/api/analysis/flow/:id", post(analysis::analyze_flow))
        .route(
            "/api/analysis/anomalies/:flow_id",
            get(analysis::list_anomalies),
        )
        .route(
            "/api/analysis/anomaly/:id",
            get(analysis::fetch_anomaly).put(analysis::update_anomaly),
        )
        .route(
            "/api/analysis/rules",
            get(analysis::get_rules).put(analysis::put_rules),
        )
        .route(
            "/api/analysis/threshold",
            get(analysis::get_threshold).post(analysis::set_threshold),
        )
        .route("/api/reports/summary/:id", get(reports::summary))
        .route("/api/reports/html/:id", get(reports::html))
        .route("/api/reports/json/:id", get(reports::json))
        .route("/api/reports/executive/:id", get(reports::executive))
        .route("/api/reports/analytics/:id", get(reports::analytics))
        .route("/api/system/status", get(system::status))
        .route("/api/system/config", get(system::config))
        .layer(cors)
        .with_state(state)
}
