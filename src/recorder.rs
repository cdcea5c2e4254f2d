// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Flow Recorder
 * Single-slot recording session and bulk HAR import
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::{DetectorError, DetectorResult};
use crate::store::Store;
use crate::types::{CapturedExchange, CreateFlow, Flow, RecordedRequest};

/// An active recording session. The recorder does not intercept traffic;
/// the capture front end presents parsed exchanges.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSession {
    pub session_id: String,
    pub flow_id: i64,
    pub started_at: DateTime<Utc>,
    pub requests_recorded: u64,
}

/// Summary returned when a session stops
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub flow_id: i64,
    pub duration_ms: i64,
    pub requests_recorded: u64,
}

/// Reported state of the recorder slot
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecorderStatus {
    pub recording: bool,
    pub session: Option<RecordingSession>,
}

/// Process-wide single-slot recorder. At most one session may be active;
/// start and stop swap the slot atomically.
pub struct Recorder {
    slot: Mutex<Option<RecordingSession>>,
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    pub fn status(&self) -> RecorderStatus {
        let slot = self.slot.lock();
        RecorderStatus {
            recording: slot.is_some(),
            session: slot.clone(),
        }
    }

    /// Start recording into a flow. Fails with kind=conflict when another
    /// session holds the slot.
    pub fn start(&self, flow_id: i64) -> DetectorResult<RecordingSession> {
        let mut slot = self.slot.lock();
        if let Some(active) = slot.as_ref() {
            return Err(DetectorError::Conflict(format!(
                "recording session {} already active for flow {}",
                active.session_id, active.flow_id
            )));
        }

        let session = RecordingSession {
            session_id: Uuid::new_v4().to_string(),
            flow_id,
            started_at: Utc::now(),
            requests_recorded: 0,
        };
        info!(
            session_id = %session.session_id,
            flow_id,
            "recording session started"
        );
        *slot = Some(session.clone());
        Ok(session)
    }

    /// Stop the active session and return its summary
    pub fn stop(&self) -> DetectorResult<SessionSummary> {
        let mut slot = self.slot.lock();
        let session = slot
            .take()
            .ok_or_else(|| DetectorError::Conflict("no active recording session".to_string()))?;

        let summary = SessionSummary {
            duration_ms: (Utc::now() - session.started_at).num_milliseconds(),
            session_id: session.session_id,
            flow_id: session.flow_id,
            requests_recorded: session.requests_recorded,
        };
        info!(
            session_id = %summary.session_id,
            requests = summary.requests_recorded,
            "recording session stopped"
        );
        Ok(summary)
    }

    /// Flow id of the active session, or kind=conflict outside `recording`
    pub fn active_flow(&self) -> DetectorResult<i64> {
        self.slot
            .lock()
            .as_ref()
            .map(|s| s.flow_id)
            .ok_or_else(|| DetectorError::Conflict("no active recording session".to_string()))
    }

    fn note_recorded(&self) {
        if let Some(session) = self.slot.lock().as_mut() {
            session.requests_recorded += 1;
        }
    }

    /// Append a captured exchange to the active session's flow
    pub async fn add_request(
        &self,
        store: &Store,
        exchange: &CapturedExchange,
    ) -> DetectorResult<RecordedRequest> {
        let flow_id = self.active_flow()?;
        let recorded = store.add_request(flow_id, exchange).await?;
        self.note_recorded();
        debug!(
            flow_id,
            ordinal = recorded.ordinal,
            method = %recorded.method,
            "request recorded"
        );
        Ok(recorded)
    }
}

// --- HAR import ---------------------------------------------------------

#[derive(Debug, Deserialize)]
struct HarDocument {
    log: HarLog,
}

#[derive(Debug, Deserialize)]
struct HarLog {
    #[serde(default)]
    entries: Vec<HarEntry>,
}

#[derive(Debug, Deserialize)]
struct HarEntry {
    request: HarRequest,
    response: HarResponse,
}

#[derive(Debug, Deserialize)]
struct HarRequest {
    method: String,
    url: String,
    #[serde(default)]
    headers: Vec<HarHeader>,
    #[serde(rename = "postData")]
    post_data: Option<HarPostData>,
}

#[derive(Debug, Deserialize)]
struct HarResponse {
    status: u16,
    #[serde(default)]
    headers: Vec<HarHeader>,
    content: Option<HarContent>,
}

#[derive(Debug, Deserialize)]
struct HarHeader {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct HarPostData {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct HarContent {
    #[serde(default)]
    text: String,
}

fn header_map(headers: &[HarHeader]) -> HashMap<String, String> {
    headers
        .iter()
        .map(|h| (h.name.clone(), h.value.clone()))
        .collect()
}

/// Import a HAR document as a new flow. The target domain is derived from
/// the first entry; every entry becomes a baseline request in order.
pub async fn import_har(
    store: &Store,
    flow_name: &str,
    description: Option<&str>,
    har_json: &str,
) -> DetectorResult<(Flow, u64)> {
    let document: HarDocument = serde_json::from_str(har_json)
        .map_err(|e| DetectorError::validation(format!("invalid HAR document: {}", e)))?;

    if document.log.entries.is_empty() {
        return Err(DetectorError::validation("HAR document has no entries"));
    }

    let target_domain = url::Url::parse(&document.log.entries[0].request.url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()));

    let flow = store
        .create_flow(&CreateFlow {
            name: flow_name.to_string(),
            description: description.map(|d| d.to_string()),
            target_domain,
            identity_pool: Vec::new(),
        })
        .await?;

    let mut imported = 0u64;
    for entry in &document.log.entries {
        let body = entry
            .request
            .post_data
            .as_ref()
            .filter(|p| !p.text.is_empty())
            .map(|p| p.text.as_bytes().to_vec());
        let captured_body = entry
            .response
            .content
            .as_ref()
            .filter(|c| !c.text.is_empty())
            .map(|c| c.text.as_bytes().to_vec());

        let exchange = CapturedExchange {
            method: entry.request.method.clone(),
            url: entry.request.url.clone(),
            headers: header_map(&entry.request.headers),
            body,
            captured_status: entry.response.status,
            captured_headers: header_map(&entry.response.headers),
            captured_body,
        };
        store.add_request(flow.flow_id, &exchange).await?;
        imported += 1;
    }

    info!(
        flow_id = flow.flow_id,
        entries = imported,
        "HAR import completed"
    );
    Ok((flow, imported))
}
