// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Response Diff Engine
 * Detectors as data: a versioned catalog dispatched over response pairs
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::errors::DetectorResult;
use crate::store::Store;
use crate::types::{
    Mutation, MutationCategory, NewAnomaly, OwnerKind, SequenceOp, Severity, StoredResponse,
    TestCase, VulnerabilityType,
};

/// Version stamped on anomalies produced by the shipped detector set
pub const DEFAULT_DETECTION_VERSION: &str = "2026.1";

/// Versioned detection catalog. Thresholds and confidences are data, not
/// code; the control plane can read and replace the whole document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionCatalog {
    pub version: String,
    pub detectors: Vec<DetectorRule>,
}

impl Default for DetectionCatalog {
    fn default() -> Self {
        Self {
            version: DEFAULT_DETECTION_VERSION.to_string(),
            detectors: vec![
                DetectorRule::StatusTransition { confidence: 0.9 },
                DetectorRule::StatusUpgrade { confidence: 0.75 },
                DetectorRule::TamperAcceptance { confidence: 0.8 },
                DetectorRule::ContentLengthDelta {
                    min_ratio: 0.3,
                    min_bytes: 128,
                    confidence_floor: 0.5,
                    confidence_ceiling: 0.85,
                },
                DetectorRule::BodyStructuralDrift {
                    min_new_keys: 1,
                    confidence: 0.6,
                },
                DetectorRule::TimingDelta {
                    factor: 5.0,
                    min_baseline_ms: 50,
                    confidence: 0.5,
                },
                DetectorRule::SequenceBypass { confidence: 0.85 },
            ],
        }
    }
}

/// One detector with its tunable parameters. Evaluation order is catalog
/// order; the first rule that fires wins for its signal category, while
/// rules of different categories may each fire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetectorRule {
    /// Baseline denied (401/403), mutant succeeded (2xx)
    StatusTransition { confidence: f64 },
    /// Baseline 4xx other than auth denial, mutant 2xx
    StatusUpgrade { confidence: f64 },
    /// Both 2xx and the tampered value is reflected as accepted in the
    /// mutant body
    TamperAcceptance { confidence: f64 },
    /// Both 2xx with a large body-size delta
    ContentLengthDelta {
        min_ratio: f64,
        min_bytes: i64,
        confidence_floor: f64,
        confidence_ceiling: f64,
    },
    /// Both 2xx JSON with new top-level keys on the mutant side
    BodyStructuralDrift { min_new_keys: usize, confidence: f64 },
    /// Status-identical outcome with a large response-time shift
    TimingDelta {
        factor: f64,
        min_baseline_ms: i64,
        confidence: f64,
    },
    /// Sequence test case succeeded despite a skipped prerequisite
    SequenceBypass { confidence: f64 },
}

impl DetectorRule {
    /// Stable signal category id, recorded on emitted anomalies
    pub fn signal_category(&self) -> &'static str {
        match self {
            DetectorRule::StatusTransition { .. } => "status_transition",
            DetectorRule::StatusUpgrade { .. } => "status_upgrade",
            DetectorRule::TamperAcceptance { .. } => "tamper_acceptance",
            DetectorRule::ContentLengthDelta { .. } => "content_length_delta",
            DetectorRule::BodyStructuralDrift { .. } => "body_structural_drift",
            DetectorRule::TimingDelta { .. } => "timing_delta",
            DetectorRule::SequenceBypass { .. } => "sequence_bypass",
        }
    }
}

fn is_2xx(status: Option<u16>) -> bool {
    matches!(status, Some(s) if (200..300).contains(&s))
}

fn is_auth_denial(status: Option<u16>) -> bool {
    matches!(status, Some(401) | Some(403))
}

fn length_ratio(baseline_len: i64, mutant_len: i64) -> f64 {
    (baseline_len - mutant_len).unsigned_abs() as f64 / baseline_len.max(1) as f64
}

/// Key name the mutation targeted, when it has one
fn mutated_key(mutation: &Mutation) -> Option<(String, Value)> {
    let (site, value) = match mutation {
        Mutation::SetValue { site, value } => (site, value.clone()),
        _ => return None,
    };
    let key = match site {
        crate::types::TargetSite::QueryParam { name } => name.clone(),
        crate::types::TargetSite::FormField { name } => name.clone(),
        crate::types::TargetSite::JsonPath { path } => {
            let last = path.rsplit('.').next().unwrap_or(path.as_str());
            last.split('[').next().unwrap_or(last).to_string()
        }
        _ => return None,
    };
    Some((key, value))
}

/// Reflection check borrowed from live business-logic probing: the
/// tampered value shows up in the response as if accepted
fn value_reflected(body: &[u8], key: &str, value: &Value) -> bool {
    let body = String::from_utf8_lossy(body).to_lowercase();
    let key = key.to_lowercase();
    let rendered = match value {
        Value::String(s) => s.to_lowercase(),
        other => other.to_string(),
    };
    body.contains(&format!("\"{}\":{}", key, rendered))
        || body.contains(&format!("\"{}\":\"{}\"", key, rendered))
        || body.contains(&format!("{}={}", key, rendered))
}

fn top_level_keys(body: &[u8]) -> Option<Vec<String>> {
    let parsed: Value = serde_json::from_slice(body).ok()?;
    match parsed {
        Value::Object(map) => Some(map.keys().cloned().collect()),
        _ => None,
    }
}

/// Severity is a pure function of (type, confidence, length-delta ratio)
pub fn severity_for(
    vulnerability_type: VulnerabilityType,
    confidence: f64,
    length_ratio: f64,
) -> Severity {
    match vulnerability_type {
        VulnerabilityType::UnauthorizedAccess | VulnerabilityType::PrivilegeEscalation => {
            if confidence >= 0.85 {
                Severity::Critical
            } else {
                Severity::High
            }
        }
        VulnerabilityType::SequenceManipulation | VulnerabilityType::ParameterTampering => {
            if confidence >= 0.8 {
                Severity::High
            } else {
                Severity::Medium
            }
        }
        VulnerabilityType::InformationDisclosure => {
            if length_ratio >= 2.0 {
                Severity::High
            } else if length_ratio >= 0.5 {
                Severity::Medium
            } else {
                Severity::Low
            }
        }
        VulnerabilityType::TimingAnomaly => {
            if confidence >= 0.5 {
                Severity::Medium
            } else {
                Severity::Low
            }
        }
    }
}

struct Verdict {
    vulnerability_type: VulnerabilityType,
    confidence: f64,
    description: String,
}

fn evaluate(
    rule: &DetectorRule,
    baseline: &StoredResponse,
    mutant: &StoredResponse,
    test_case: &TestCase,
) -> Option<Verdict> {
    match rule {
        DetectorRule::StatusTransition { confidence } => {
            if !is_2xx(mutant.status) {
                return None;
            }
            let denied_baseline = is_auth_denial(baseline.status);
            // A token whose signature no longer verifies must be rejected;
            // any success on one is a bypass even when the baseline passed
            let forged_token = matches!(test_case.mutation, Mutation::TokenTamper { .. });
            if !(denied_baseline || forged_token) {
                return None;
            }
            // A tampered claim means acting as someone else; other auth
            // mutations gaining access classify as unauthorized access
            let vulnerability_type = if forged_token {
                VulnerabilityType::PrivilegeEscalation
            } else {
                VulnerabilityType::UnauthorizedAccess
            };
            let description = if denied_baseline {
                format!(
                    "Baseline was denied with {} but the mutant succeeded with {}",
                    baseline.status.unwrap_or(0),
                    mutant.status.unwrap_or(0)
                )
            } else {
                format!(
                    "Token with an invalidated signature was accepted with {}",
                    mutant.status.unwrap_or(0)
                )
            };
            Some(Verdict {
                vulnerability_type,
                confidence: *confidence,
                description,
            })
        }
        DetectorRule::StatusUpgrade { confidence } => {
            let upgraded = matches!(baseline.status, Some(s) if (400..500).contains(&s))
                && !is_auth_denial(baseline.status)
                && is_2xx(mutant.status);
            if !upgraded {
                return None;
            }
            Some(Verdict {
                vulnerability_type: VulnerabilityType::ParameterTampering,
                confidence: *confidence,
                description: format!(
                    "Baseline {} upgraded to {} after mutation",
                    baseline.status.unwrap_or(0),
                    mutant.status.unwrap_or(0)
                ),
            })
        }
        DetectorRule::TamperAcceptance { confidence } => {
            if test_case.category != MutationCategory::Parameter {
                return None;
            }
            if !(is_2xx(baseline.status) && is_2xx(mutant.status)) {
                return None;
            }
            let (key, value) = mutated_key(&test_case.mutation)?;
            if !value_reflected(&mutant.body, &key, &value) {
                return None;
            }
            Some(Verdict {
                vulnerability_type: VulnerabilityType::ParameterTampering,
                confidence: *confidence,
                description: format!(
                    "Tampered value accepted: '{}' reflected as {} in the mutant response",
                    key,
                    match &value {
                        Value::String(s) => format!("'{}'", s),
                        other => other.to_string(),
                    }
                ),
            })
        }
        DetectorRule::ContentLengthDelta {
            min_ratio,
            min_bytes,
            confidence_floor,
            confidence_ceiling,
        } => {
            if !(is_2xx(baseline.status) && is_2xx(mutant.status)) {
                return None;
            }
            let delta = (baseline.content_length - mutant.content_length).abs();
            let ratio = length_ratio(baseline.content_length, mutant.content_length);
            if ratio < *min_ratio || delta < *min_bytes {
                return None;
            }
            // Confidence grows with the ratio, saturating at the ceiling
            let confidence = (confidence_floor
                + (confidence_ceiling - confidence_floor) * (ratio / 2.0).min(1.0))
            .clamp(*confidence_floor, *confidence_ceiling);
            Some(Verdict {
                vulnerability_type: VulnerabilityType::InformationDisclosure,
                confidence,
                description: format!(
                    "Response size changed {} -> {} bytes (ratio {:.2})",
                    baseline.content_length, mutant.content_length, ratio
                ),
            })
        }
        DetectorRule::BodyStructuralDrift {
            min_new_keys,
            confidence,
        } => {
            if !(is_2xx(baseline.status) && is_2xx(mutant.status)) {
                return None;
            }
            // Non-decodable bodies silently skip this detector
            let baseline_keys = top_level_keys(&baseline.body)?;
            let mutant_keys = top_level_keys(&mutant.body)?;
            let new_keys: Vec<String> = mutant_keys
                .into_iter()
                .filter(|k| !baseline_keys.contains(k))
                .collect();
            if new_keys.len() < *min_new_keys {
                return None;
            }
            Some(Verdict {
                vulnerability_type: VulnerabilityType::InformationDisclosure,
                confidence: *confidence,
                description: format!(
                    "Mutant response exposes {} new top-level field(s): {}",
                    new_keys.len(),
                    new_keys.join(", ")
                ),
            })
        }
        DetectorRule::TimingDelta {
            factor,
            min_baseline_ms,
            confidence,
        } => {
            if baseline.status.is_none() || baseline.status != mutant.status {
                return None;
            }
            let base = baseline.response_time_ms;
            let mutated = mutant.response_time_ms;
            if base < *min_baseline_ms {
                return None;
            }
            let shifted = mutated as f64 >= base as f64 * factor
                || base as f64 >= mutated as f64 * factor;
            if !shifted {
                return None;
            }
            Some(Verdict {
                vulnerability_type: VulnerabilityType::TimingAnomaly,
                confidence: *confidence,
                description: format!("Response time shifted {}ms -> {}ms", base, mutated),
            })
        }
        DetectorRule::SequenceBypass { confidence } => {
            if test_case.category != MutationCategory::Sequence {
                return None;
            }
            let skipped = matches!(
                &test_case.mutation,
                Mutation::Sequence {
                    seq_op: SequenceOp::Skip { .. }
                }
            );
            if !(skipped && is_2xx(mutant.status)) {
                return None;
            }
            Some(Verdict {
                vulnerability_type: VulnerabilityType::SequenceManipulation,
                confidence: *confidence,
                description: format!(
                    "Request succeeded with {} despite a skipped prerequisite step",
                    mutant.status.unwrap_or(0)
                ),
            })
        }
    }
}

/// Diff one baseline/mutant pair into anomalies. Pure and deterministic:
/// fixed inputs always yield the same output. At most one anomaly per
/// signal category; a detector that cannot compute its verdict is skipped.
pub fn analyze_pair(
    baseline: &StoredResponse,
    mutant: &StoredResponse,
    test_case: &TestCase,
    catalog: &DetectionCatalog,
    confidence_threshold: f64,
) -> Vec<NewAnomaly> {
    let mut anomalies = Vec::new();
    let mut fired: Vec<&'static str> = Vec::new();

    let ratio = length_ratio(baseline.content_length, mutant.content_length);

    for rule in &catalog.detectors {
        let category = rule.signal_category();
        if fired.contains(&category) {
            continue;
        }
        let Some(verdict) = evaluate(rule, baseline, mutant, test_case) else {
            continue;
        };
        fired.push(category);

        let confidence = verdict.confidence.clamp(0.0, 1.0);
        let severity = severity_for(verdict.vulnerability_type, confidence, ratio);
        let is_potential_vulnerability =
            severity.at_least_medium() && confidence >= confidence_threshold;

        debug!(
            detector = category,
            vulnerability_type = %verdict.vulnerability_type,
            %severity,
            confidence,
            "detector fired"
        );

        anomalies.push(NewAnomaly {
            flow_id: test_case.flow_id,
            test_case_id: test_case.test_case_id,
            detector: category.to_string(),
            severity,
            confidence,
            is_potential_vulnerability,
            vulnerability_type: verdict.vulnerability_type,
            original_status: baseline.status,
            replayed_status: mutant.status,
            original_content_length: Some(baseline.content_length),
            replayed_content_length: Some(mutant.content_length),
            description: verdict.description,
            catalog_version: catalog.version.clone(),
        });
    }

    anomalies
}

/// Re-analyze every replayed pair of a flow against the current catalog.
/// Untriaged anomalies are replaced; confirmed and false-positive verdicts
/// survive. Returns the number of anomalies produced.
pub async fn analyze_flow(
    store: &Store,
    catalog: &DetectionCatalog,
    confidence_threshold: f64,
    flow_id: i64,
) -> DetectorResult<u64> {
    store.get_flow(flow_id).await?;
    store.delete_new_anomalies(flow_id).await?;

    let test_cases = store.flow_test_cases(flow_id).await?;
    let mut produced = 0u64;

    for test_case in &test_cases {
        let Some(mutant) = store
            .latest_response(OwnerKind::Mutant, test_case.test_case_id)
            .await?
        else {
            continue;
        };
        let Some(baseline) = store
            .latest_response(OwnerKind::Baseline, test_case.request_id)
            .await?
        else {
            continue;
        };
        // Pairs must share an execution epoch; a baseline replayed under a
        // different target state is not comparable.
        if baseline.execution_id != mutant.execution_id {
            continue;
        }
        if baseline.error_kind.is_some() && mutant.error_kind.is_some() {
            continue;
        }

        let anomalies = analyze_pair(&baseline, &mutant, test_case, catalog, confidence_threshold);
        if !anomalies.is_empty() {
            produced += store.insert_anomalies(&anomalies).await?.len() as u64;
        }
    }

    info!(flow_id, anomalies = produced, "flow analysis completed");
    Ok(produced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TargetSite;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::HashMap;

    fn response(status: Option<u16>, body: &[u8], time_ms: i64) -> StoredResponse {
        StoredResponse {
            response_id: 0,
            owner_kind: OwnerKind::Mutant,
            owner_id: 1,
            execution_id: "exec-1".to_string(),
            status,
            headers: HashMap::new(),
            body: body.to_vec(),
            content_length: body.len() as i64,
            response_time_ms: time_ms,
            error_kind: None,
            captured_at: Utc::now(),
        }
    }

    fn sized_response(status: Option<u16>, content_length: i64, time_ms: i64) -> StoredResponse {
        let mut r = response(status, &[], time_ms);
        r.content_length = content_length;
        r
    }

    fn test_case(category: MutationCategory, mutation: Mutation) -> TestCase {
        TestCase {
            test_case_id: 7,
            flow_id: 1,
            request_id: 3,
            category,
            rule_id: "rule".to_string(),
            description: String::new(),
            mutation,
            catalog_version: "2026.1".to_string(),
            created_at: Utc::now(),
        }
    }

    fn auth_tamper_case() -> TestCase {
        test_case(
            MutationCategory::Auth,
            Mutation::TokenTamper {
                header: "Authorization".to_string(),
                claim: "sub".to_string(),
                value: json!("0"),
            },
        )
    }

    fn param_case() -> TestCase {
        test_case(
            MutationCategory::Parameter,
            Mutation::SetValue {
                site: TargetSite::JsonPath {
                    path: "price".to_string(),
                },
                value: json!(-1),
            },
        )
    }

    #[test]
    fn test_denied_to_allowed_is_critical_unauthorized_access() {
        let baseline = sized_response(Some(403), 45, 30);
        let mutant = sized_response(Some(200), 5000, 30);
        let tc = test_case(
            MutationCategory::Auth,
            Mutation::SubstituteIdentity {
                identity: "admin-candidate".to_string(),
            },
        );

        let anomalies = analyze_pair(&baseline, &mutant, &tc, &DetectionCatalog::default(), 0.7);
        let first = &anomalies[0];
        assert_eq!(
            first.vulnerability_type,
            VulnerabilityType::UnauthorizedAccess
        );
        assert_eq!(first.severity, Severity::Critical);
        assert!(first.confidence >= 0.85);
        assert!(first.is_potential_vulnerability);
    }

    #[test]
    fn test_forged_token_accepted_on_passing_baseline() {
        // Baseline and mutant both 200 with equal sizes; the tampered
        // token being honored at all is the signal
        let baseline = sized_response(Some(200), 1250, 40);
        let mutant = sized_response(Some(200), 1250, 40);

        let anomalies = analyze_pair(
            &baseline,
            &mutant,
            &auth_tamper_case(),
            &DetectionCatalog::default(),
            0.7,
        );
        let transition = anomalies
            .iter()
            .find(|a| a.detector == "status_transition")
            .expect("forged token acceptance should fire");
        assert_eq!(
            transition.vulnerability_type,
            VulnerabilityType::PrivilegeEscalation
        );
        assert_eq!(transition.severity, Severity::Critical);
        assert!(transition.confidence >= 0.85);
        assert!(transition.is_potential_vulnerability);
    }

    #[test]
    fn test_token_tamper_privilege_escalation() {
        let baseline = sized_response(Some(401), 120, 40);
        let mutant = sized_response(Some(200), 1250, 40);

        let anomalies = analyze_pair(
            &baseline,
            &mutant,
            &auth_tamper_case(),
            &DetectionCatalog::default(),
            0.7,
        );
        assert_eq!(anomalies.len(), 1);
        assert_eq!(
            anomalies[0].vulnerability_type,
            VulnerabilityType::PrivilegeEscalation
        );
        assert_eq!(anomalies[0].severity, Severity::Critical);
        assert!(anomalies[0].is_potential_vulnerability);
    }

    #[test]
    fn test_status_upgrade_is_parameter_tampering() {
        let baseline = sized_response(Some(422), 80, 20);
        let mutant = sized_response(Some(200), 90, 20);

        let anomalies = analyze_pair(
            &baseline,
            &mutant,
            &param_case(),
            &DetectionCatalog::default(),
            0.7,
        );
        assert_eq!(anomalies.len(), 1);
        assert_eq!(
            anomalies[0].vulnerability_type,
            VulnerabilityType::ParameterTampering
        );
        assert_eq!(anomalies[0].severity, Severity::Medium);
        assert!((anomalies[0].confidence - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_accepted_price_tampering_is_high() {
        // Both sides 200; the mutant response echoes the negative price
        let baseline = response(Some(200), br#"{"cart":{"price":19.99,"qty":1}}"#, 30);
        let mutant = response(Some(200), br#"{"cart":{"price":-1,"qty":1}}"#, 30);

        let anomalies = analyze_pair(
            &baseline,
            &mutant,
            &param_case(),
            &DetectionCatalog::default(),
            0.7,
        );
        let tamper = anomalies
            .iter()
            .find(|a| a.detector == "tamper_acceptance")
            .expect("acceptance detector should fire");
        assert_eq!(
            tamper.vulnerability_type,
            VulnerabilityType::ParameterTampering
        );
        assert_eq!(tamper.severity, Severity::High);
        assert!(tamper.confidence >= 0.75);
        assert!(tamper.is_potential_vulnerability);
    }

    #[test]
    fn test_benign_length_diff_below_thresholds_is_silent() {
        // 1000 -> 1020 bytes: 2% ratio and 20-byte delta, both below gates
        let baseline = sized_response(Some(200), 1000, 30);
        let mutant = sized_response(Some(200), 1020, 30);

        let anomalies = analyze_pair(
            &baseline,
            &mutant,
            &param_case(),
            &DetectionCatalog::default(),
            0.7,
        );
        assert!(anomalies.is_empty());
    }

    #[test]
    fn test_large_length_delta_fires_with_scaled_confidence() {
        let baseline = sized_response(Some(200), 1000, 30);
        let mutant = sized_response(Some(200), 4000, 30);

        let anomalies = analyze_pair(
            &baseline,
            &mutant,
            &param_case(),
            &DetectionCatalog::default(),
            0.7,
        );
        assert_eq!(anomalies.len(), 1);
        let anomaly = &anomalies[0];
        assert_eq!(
            anomaly.vulnerability_type,
            VulnerabilityType::InformationDisclosure
        );
        // ratio 3.0 saturates confidence at the ceiling and severity High
        assert!((anomaly.confidence - 0.85).abs() < 1e-9);
        assert_eq!(anomaly.severity, Severity::High);
    }

    #[test]
    fn test_structural_drift_detects_new_keys() {
        let baseline = response(Some(200), br#"{"name":"a"}"#, 30);
        let mutant = response(Some(200), br#"{"name":"a","ssn":"123-45-6789"}"#, 30);

        let anomalies = analyze_pair(
            &baseline,
            &mutant,
            &param_case(),
            &DetectionCatalog::default(),
            0.7,
        );
        let drift = anomalies
            .iter()
            .find(|a| a.detector == "body_structural_drift")
            .expect("drift detector should fire");
        assert_eq!(
            drift.vulnerability_type,
            VulnerabilityType::InformationDisclosure
        );
        assert!(drift.description.contains("ssn"));
    }

    #[test]
    fn test_non_json_bodies_skip_drift_detector() {
        let baseline = response(Some(200), b"<html>hello</html>", 30);
        let mutant = response(Some(200), b"<html>world!</html>", 30);

        let anomalies = analyze_pair(
            &baseline,
            &mutant,
            &param_case(),
            &DetectionCatalog::default(),
            0.7,
        );
        assert!(anomalies
            .iter()
            .all(|a| a.detector != "body_structural_drift"));
    }

    #[test]
    fn test_timing_delta_requires_slow_baseline() {
        // Baseline below 50ms never fires
        let baseline = sized_response(Some(200), 100, 40);
        let mutant = sized_response(Some(200), 100, 400);
        let anomalies = analyze_pair(
            &baseline,
            &mutant,
            &param_case(),
            &DetectionCatalog::default(),
            0.7,
        );
        assert!(anomalies.iter().all(|a| a.detector != "timing_delta"));

        // 60ms -> 350ms crosses the 5x factor
        let baseline = sized_response(Some(200), 100, 60);
        let mutant = sized_response(Some(200), 100, 350);
        let anomalies = analyze_pair(
            &baseline,
            &mutant,
            &param_case(),
            &DetectionCatalog::default(),
            0.7,
        );
        let timing = anomalies
            .iter()
            .find(|a| a.detector == "timing_delta")
            .expect("timing detector should fire");
        assert_eq!(timing.severity, Severity::Medium);
        // Below the default 0.7 threshold: anomaly recorded, not flagged
        assert!(!timing.is_potential_vulnerability);
    }

    #[test]
    fn test_sequence_skip_bypass() {
        let baseline = sized_response(Some(200), 300, 30);
        let mutant = sized_response(Some(200), 300, 30);
        let tc = test_case(
            MutationCategory::Sequence,
            Mutation::Sequence {
                seq_op: SequenceOp::Skip { ordinal: 2 },
            },
        );

        let anomalies = analyze_pair(&baseline, &mutant, &tc, &DetectionCatalog::default(), 0.7);
        let bypass = anomalies
            .iter()
            .find(|a| a.detector == "sequence_bypass")
            .expect("sequence bypass should fire");
        assert_eq!(
            bypass.vulnerability_type,
            VulnerabilityType::SequenceManipulation
        );
        assert_eq!(bypass.severity, Severity::High);
        assert!(bypass.is_potential_vulnerability);
    }

    #[test]
    fn test_repeat_sequence_does_not_trip_bypass() {
        let baseline = sized_response(Some(200), 300, 30);
        let mutant = sized_response(Some(200), 300, 30);
        let tc = test_case(
            MutationCategory::Sequence,
            Mutation::Sequence {
                seq_op: SequenceOp::Repeat {
                    ordinal: 1,
                    times: 2,
                },
            },
        );

        let anomalies = analyze_pair(&baseline, &mutant, &tc, &DetectionCatalog::default(), 0.7);
        assert!(anomalies.iter().all(|a| a.detector != "sequence_bypass"));
    }

    #[test]
    fn test_error_statuses_produce_nothing() {
        let baseline = sized_response(None, 0, 0);
        let mutant = sized_response(None, 0, 0);
        let anomalies = analyze_pair(
            &baseline,
            &mutant,
            &auth_tamper_case(),
            &DetectionCatalog::default(),
            0.7,
        );
        assert!(anomalies.is_empty());
    }

    #[test]
    fn test_analysis_is_deterministic() {
        let baseline = sized_response(Some(403), 45, 30);
        let mutant = sized_response(Some(200), 5000, 30);
        let tc = auth_tamper_case();
        let catalog = DetectionCatalog::default();

        let first = analyze_pair(&baseline, &mutant, &tc, &catalog, 0.7);
        let second = analyze_pair(&baseline, &mutant, &tc, &catalog, 0.7);
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.detector, b.detector);
            assert_eq!(a.severity, b.severity);
            assert!((a.confidence - b.confidence).abs() < f64::EPSILON);
            assert_eq!(a.description, b.description);
        }
    }

    #[test]
    fn test_confidence_always_bounded() {
        let catalog = DetectionCatalog {
            version: "test".to_string(),
            detectors: vec![DetectorRule::StatusTransition { confidence: 7.5 }],
        };
        let baseline = sized_response(Some(403), 45, 30);
        let mutant = sized_response(Some(200), 5000, 30);
        let anomalies = analyze_pair(&baseline, &mutant, &auth_tamper_case(), &catalog, 0.7);
        assert!((0.0..=1.0).contains(&anomalies[0].confidence));
    }
}
