// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Detector Domain Types
 * Entities of the flow / request / test case / response / anomaly graph
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Severity levels for anomalies, ordered from most to least severe
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    /// Rank for ordering and threshold comparison (Critical = 0)
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Critical => 0,
            Severity::High => 1,
            Severity::Medium => 2,
            Severity::Low => 3,
            Severity::Info => 4,
        }
    }

    /// True when this severity is Medium or more severe
    pub fn at_least_medium(&self) -> bool {
        self.rank() <= Severity::Medium.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
            Severity::Info => "INFO",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutation categories supported by the rule catalog
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MutationCategory {
    String,
    Auth,
    Parameter,
    Sequence,
}

impl MutationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationCategory::String => "string",
            MutationCategory::Auth => "auth",
            MutationCategory::Parameter => "parameter",
            MutationCategory::Sequence => "sequence",
        }
    }
}

/// Whether a stored response belongs to a baseline request or a mutant
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OwnerKind {
    Baseline,
    Mutant,
}

impl OwnerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerKind::Baseline => "baseline",
            OwnerKind::Mutant => "mutant",
        }
    }
}

/// Transport failure classes recorded on responses; when set, status is null
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseErrorKind {
    Network,
    Timeout,
}

impl ResponseErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseErrorKind::Network => "network",
            ResponseErrorKind::Timeout => "timeout",
        }
    }
}

/// Anomaly triage status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyStatus {
    New,
    Confirmed,
    FalsePositive,
}

impl AnomalyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyStatus::New => "new",
            AnomalyStatus::Confirmed => "confirmed",
            AnomalyStatus::FalsePositive => "false_positive",
        }
    }
}

/// Terminal and non-terminal execution states
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Cancelled,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Succeeded => "succeeded",
            ExecutionStatus::Cancelled => "cancelled",
            ExecutionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

/// Vulnerability classes emitted by the diff engine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VulnerabilityType {
    UnauthorizedAccess,
    PrivilegeEscalation,
    ParameterTampering,
    InformationDisclosure,
    TimingAnomaly,
    SequenceManipulation,
}

impl VulnerabilityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VulnerabilityType::UnauthorizedAccess => "unauthorized_access",
            VulnerabilityType::PrivilegeEscalation => "privilege_escalation",
            VulnerabilityType::ParameterTampering => "parameter_tampering",
            VulnerabilityType::InformationDisclosure => "information_disclosure",
            VulnerabilityType::TimingAnomaly => "timing_anomaly",
            VulnerabilityType::SequenceManipulation => "sequence_manipulation",
        }
    }
}

impl std::fmt::Display for VulnerabilityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alternate identity configured on a flow for privilege-substitution tests.
/// Where alternate identities come from is deployment-specific; the flow
/// carries them out-of-band rather than the detector guessing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub name: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub cookies: HashMap<String, String>,
}

/// A named testing session and container for all derived artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    pub flow_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub target_domain: Option<String>,
    #[serde(default)]
    pub identity_pool: Vec<Identity>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An unmodified captured HTTP exchange, immutable once recorded
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedRequest {
    pub request_id: i64,
    pub flow_id: i64,
    /// 1-based per-flow capture order; anchors sequence mutations
    pub ordinal: i64,
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    #[serde(default, with = "base64_opt_bytes")]
    pub body: Option<Vec<u8>>,
    pub captured_status: u16,
    pub captured_headers: HashMap<String, String>,
    #[serde(default, with = "base64_opt_bytes")]
    pub captured_body: Option<Vec<u8>>,
    pub recorded_at: DateTime<Utc>,
}

impl RecordedRequest {
    /// Case-insensitive request header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Site within a request that a mutation targets
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetSite {
    /// 0-based index into the URL path segments
    PathSegment { index: usize },
    QueryParam { name: String },
    Header { name: String },
    /// Dotted path with [n] array indices, e.g. "items[0].price"
    JsonPath { path: String },
    FormField { name: String },
    /// The request as a whole (sequence operations)
    Envelope,
}

impl TargetSite {
    pub fn describe(&self) -> String {
        match self {
            TargetSite::PathSegment { index } => format!("path segment {}", index),
            TargetSite::QueryParam { name } => format!("query parameter '{}'", name),
            TargetSite::Header { name } => format!("header '{}'", name),
            TargetSite::JsonPath { path } => format!("body field '{}'", path),
            TargetSite::FormField { name } => format!("form field '{}'", name),
            TargetSite::Envelope => "request envelope".to_string(),
        }
    }
}

/// Coercion targets for type-confusion mutations
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CoerceTarget {
    String,
    Number,
    Bool,
    Null,
}

/// Flow-level sequence operations, resolved by the replayer against the
/// whole flow's replay context
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SequenceOp {
    /// Skip the request at `ordinal`; the next request is measured
    Skip { ordinal: i64 },
    /// Execute the request at `ordinal` `times` times; the last is measured
    Repeat { ordinal: i64, times: u32 },
    /// Execute `second` before `first`; `first` is measured
    Swap { first: i64, second: i64 },
}

impl SequenceOp {
    /// Ordinal whose response is compared against its baseline
    pub fn measured_ordinal(&self) -> i64 {
        match self {
            SequenceOp::Skip { ordinal } => ordinal + 1,
            SequenceOp::Repeat { ordinal, .. } => *ordinal,
            SequenceOp::Swap { first, .. } => *first,
        }
    }
}

/// Structured mutation record. A test case never stores a materialized
/// HTTP request; the request is produced deterministically from
/// (RecordedRequest + Mutation) at replay time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    SetValue {
        site: TargetSite,
        value: serde_json::Value,
    },
    Delete {
        site: TargetSite,
    },
    Duplicate {
        site: TargetSite,
    },
    TypeCoerce {
        site: TargetSite,
        target: CoerceTarget,
    },
    /// Decode a JWT-like token, rewrite one claim, re-encode without a
    /// valid signature
    TokenTamper {
        header: String,
        claim: String,
        value: serde_json::Value,
    },
    /// Substitute the request's authentication material with a named
    /// identity from the flow's identity pool
    SubstituteIdentity {
        identity: String,
    },
    Sequence {
        #[serde(flatten)]
        seq_op: SequenceOp,
    },
}

impl Mutation {
    /// Stable canonical encoding used for idempotent de-duplication
    pub fn canonical_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// A declarative mutation of a baseline request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub test_case_id: i64,
    pub flow_id: i64,
    pub request_id: i64,
    pub category: MutationCategory,
    pub rule_id: String,
    pub description: String,
    pub mutation: Mutation,
    pub catalog_version: String,
    pub created_at: DateTime<Utc>,
}

/// A response captured during replay, owned by a baseline request or a
/// test case. Multiple responses may exist per owner across executions;
/// the latest per (owner, execution) is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredResponse {
    pub response_id: i64,
    pub owner_kind: OwnerKind,
    pub owner_id: i64,
    pub execution_id: String,
    /// Null iff error_kind is set
    pub status: Option<u16>,
    pub headers: HashMap<String, String>,
    #[serde(with = "base64_bytes")]
    pub body: Vec<u8>,
    pub content_length: i64,
    pub response_time_ms: i64,
    pub error_kind: Option<ResponseErrorKind>,
    pub captured_at: DateTime<Utc>,
}

/// A scored, typed diff between a baseline and a mutant response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    pub anomaly_id: i64,
    pub flow_id: i64,
    pub test_case_id: i64,
    /// Signal category id of the detector that fired
    pub detector: String,
    pub severity: Severity,
    pub confidence: f64,
    pub is_potential_vulnerability: bool,
    pub vulnerability_type: VulnerabilityType,
    pub original_status: Option<u16>,
    pub replayed_status: Option<u16>,
    pub original_content_length: Option<i64>,
    pub replayed_content_length: Option<i64>,
    pub description: String,
    pub status: AnomalyStatus,
    pub catalog_version: String,
    pub created_at: DateTime<Utc>,
}

/// One end-to-end run of the replayer, tracked until a terminal status
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    pub execution_id: String,
    pub flow_id: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total: i64,
    pub done: i64,
    pub failed: i64,
    pub remaining: i64,
    pub status: ExecutionStatus,
}

impl ExecutionState {
    pub fn new(execution_id: String, flow_id: i64, total: i64) -> Self {
        Self {
            execution_id,
            flow_id,
            started_at: Utc::now(),
            finished_at: None,
            total,
            done: 0,
            failed: 0,
            remaining: total,
            status: ExecutionStatus::Running,
        }
    }

    pub fn record_done(&mut self) {
        self.done += 1;
        self.remaining = (self.total - self.done).max(0);
    }

    pub fn record_failed(&mut self) {
        self.failed += 1;
    }

    pub fn finish(&mut self, status: ExecutionStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    /// Fraction of processed pairs that failed, in [0,1]
    pub fn failure_ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.failed as f64 / self.total as f64
        }
    }
}

/// A request materialized from (RecordedRequest + Mutation), ready to send
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl PreparedRequest {
    /// Build the unmodified baseline request
    pub fn baseline(request: &RecordedRequest) -> Self {
        Self {
            method: request.method.clone(),
            url: request.url.clone(),
            headers: request
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            body: request.body.clone(),
        }
    }
}

// --- creation DTOs -----------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFlow {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub target_domain: Option<String>,
    #[serde(default)]
    pub identity_pool: Vec<Identity>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFlow {
    pub name: Option<String>,
    pub description: Option<String>,
    pub target_domain: Option<String>,
}

/// A recorded exchange as presented by the capture front end
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedExchange {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, with = "base64_opt_bytes")]
    pub body: Option<Vec<u8>>,
    pub captured_status: u16,
    #[serde(default)]
    pub captured_headers: HashMap<String, String>,
    #[serde(default, with = "base64_opt_bytes")]
    pub captured_body: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct NewTestCase {
    pub flow_id: i64,
    pub request_id: i64,
    pub category: MutationCategory,
    pub rule_id: String,
    pub description: String,
    pub mutation: Mutation,
    pub catalog_version: String,
}

#[derive(Debug, Clone)]
pub struct NewResponse {
    pub owner_kind: OwnerKind,
    pub owner_id: i64,
    pub execution_id: String,
    pub status: Option<u16>,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub response_time_ms: i64,
    pub error_kind: Option<ResponseErrorKind>,
}

#[derive(Debug, Clone)]
pub struct NewAnomaly {
    pub flow_id: i64,
    pub test_case_id: i64,
    pub detector: String,
    pub severity: Severity,
    pub confidence: f64,
    pub is_potential_vulnerability: bool,
    pub vulnerability_type: VulnerabilityType,
    pub original_status: Option<u16>,
    pub replayed_status: Option<u16>,
    pub original_content_length: Option<i64>,
    pub replayed_content_length: Option<i64>,
    pub description: String,
    pub catalog_version: String,
}

// --- body encoding helpers ---------------------------------------------

/// Bodies are opaque bytes; they cross the wire base64-encoded
pub mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

pub mod base64_opt_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_some(&STANDARD.encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        match encoded {
            Some(s) => STANDARD.decode(s).map(Some).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical.rank() < Severity::High.rank());
        assert!(Severity::High.at_least_medium());
        assert!(Severity::Medium.at_least_medium());
        assert!(!Severity::Low.at_least_medium());
    }

    #[test]
    fn test_mutation_canonical_json_round_trip() {
        let mutation = Mutation::SetValue {
            site: TargetSite::QueryParam {
                name: "price".to_string(),
            },
            value: serde_json::json!(-1),
        };
        let encoded = mutation.canonical_json();
        let decoded: Mutation = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, mutation);
        // Canonical encoding is stable across re-serialization
        assert_eq!(decoded.canonical_json(), encoded);
    }

    #[test]
    fn test_sequence_measured_ordinal() {
        assert_eq!(SequenceOp::Skip { ordinal: 2 }.measured_ordinal(), 3);
        assert_eq!(
            SequenceOp::Repeat {
                ordinal: 1,
                times: 2
            }
            .measured_ordinal(),
            1
        );
        assert_eq!(
            SequenceOp::Swap { first: 1, second: 2 }.measured_ordinal(),
            1
        );
    }

    #[test]
    fn test_execution_state_counters() {
        let mut state = ExecutionState::new("exec-1".to_string(), 1, 4);
        assert_eq!(state.remaining, 4);
        state.record_done();
        state.record_done();
        state.record_failed();
        assert_eq!(state.done, 2);
        assert_eq!(state.remaining, 2);
        assert!((state.failure_ratio() - 0.25).abs() < f64::EPSILON);
    }

}
