// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Risk Scorer & Aggregator
 * Pure flow-level rollups of anomalies; the risk score is a derived view
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{Anomaly, Severity, VulnerabilityType};

/// Weights of the flow risk formula, per severity count
const WEIGHT_CRITICAL: f64 = 0.30;
const WEIGHT_HIGH: f64 = 0.18;
const WEIGHT_MEDIUM: f64 = 0.08;
const WEIGHT_LOW: f64 = 0.02;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskCategory {
    Critical,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SeverityBreakdown {
    pub critical: u64,
    pub high: u64,
    pub medium: u64,
    pub low: u64,
    pub info: u64,
}

impl SeverityBreakdown {
    fn count(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
            Severity::Info => self.info += 1,
        }
    }
}

/// Confidence statistics with distribution buckets at 0.33 / 0.66
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceStats {
    pub min: f64,
    pub avg: f64,
    pub max: f64,
    pub low_bucket: u64,
    pub medium_bucket: u64,
    pub high_bucket: u64,
}

/// Aggregated risk view of one flow. Never stored; recomputed from the
/// current anomalies on every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowRiskSummary {
    pub risk_score: f64,
    pub risk_category: RiskCategory,
    pub total_anomalies: u64,
    pub potential_vulnerabilities: u64,
    pub severity_counts: SeverityBreakdown,
    pub type_counts: BTreeMap<String, u64>,
    pub confidence: ConfidenceStats,
    pub recommendations: Vec<String>,
}

fn risk_score(counts: &SeverityBreakdown) -> f64 {
    let weighted = WEIGHT_CRITICAL * counts.critical as f64
        + WEIGHT_HIGH * counts.high as f64
        + WEIGHT_MEDIUM * counts.medium as f64
        + WEIGHT_LOW * counts.low as f64;
    10.0 * weighted.min(1.0)
}

fn risk_category(score: f64) -> RiskCategory {
    if score >= 8.0 {
        RiskCategory::Critical
    } else if score >= 6.0 {
        RiskCategory::High
    } else if score >= 3.0 {
        RiskCategory::Medium
    } else {
        RiskCategory::Low
    }
}

fn confidence_stats(anomalies: &[Anomaly]) -> ConfidenceStats {
    if anomalies.is_empty() {
        return ConfidenceStats::default();
    }
    let mut stats = ConfidenceStats {
        min: f64::MAX,
        ..ConfidenceStats::default()
    };
    let mut sum = 0.0;
    for anomaly in anomalies {
        let c = anomaly.confidence;
        sum += c;
        stats.min = stats.min.min(c);
        stats.max = stats.max.max(c);
        if c < 0.33 {
            stats.low_bucket += 1;
        } else if c < 0.66 {
            stats.medium_bucket += 1;
        } else {
            stats.high_bucket += 1;
        }
    }
    stats.avg = sum / anomalies.len() as f64;
    stats
}

/// Fixed phrase per vulnerability class; recommendations are a
/// deterministic mapping, never free text
fn phrase_for(vulnerability_type: VulnerabilityType) -> &'static str {
    match vulnerability_type {
        VulnerabilityType::UnauthorizedAccess => {
            "Enforce server-side authorization on every endpoint; token presence alone is not authorization."
        }
        VulnerabilityType::PrivilegeEscalation => {
            "Verify token signatures and subject claims on every request; reject tokens that fail verification."
        }
        VulnerabilityType::ParameterTampering => {
            "Re-validate business parameters server-side and recompute totals from trusted data."
        }
        VulnerabilityType::InformationDisclosure => {
            "Review response payloads and strip fields the client does not require."
        }
        VulnerabilityType::TimingAnomaly => {
            "Investigate data-dependent processing paths behind otherwise stable endpoints."
        }
        VulnerabilityType::SequenceManipulation => {
            "Enforce workflow state transitions server-side; every step must verify its prerequisites."
        }
    }
}

const PHRASE_CRITICAL_PRESENT: &str =
    "Prioritize the Critical findings; they indicate authentication or privilege boundaries that do not hold.";
const PHRASE_NO_FINDINGS: &str =
    "No anomalies detected; consider broadening the mutation catalog or recording additional flows.";

fn recommendations(
    counts: &SeverityBreakdown,
    type_counts: &BTreeMap<String, u64>,
    anomalies: &[Anomaly],
) -> Vec<String> {
    if anomalies.is_empty() {
        return vec![PHRASE_NO_FINDINGS.to_string()];
    }

    let mut phrases = Vec::new();
    if counts.critical > 0 {
        phrases.push(PHRASE_CRITICAL_PRESENT.to_string());
    }

    // Top three types by count, name as the deterministic tie-breaker
    let mut ranked: Vec<(&String, &u64)> = type_counts.iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

    for (type_name, _) in ranked.into_iter().take(3) {
        if let Some(anomaly) = anomalies
            .iter()
            .find(|a| a.vulnerability_type.as_str() == type_name)
        {
            let phrase = phrase_for(anomaly.vulnerability_type).to_string();
            if !phrases.contains(&phrase) {
                phrases.push(phrase);
            }
        }
    }

    phrases
}

/// Roll a flow's anomalies into the derived risk view. Pure and
/// idempotent; callers may invoke it at any time.
pub fn aggregate(anomalies: &[Anomaly]) -> FlowRiskSummary {
    let mut severity_counts = SeverityBreakdown::default();
    let mut type_counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut potential_vulnerabilities = 0u64;

    for anomaly in anomalies {
        severity_counts.count(anomaly.severity);
        *type_counts
            .entry(anomaly.vulnerability_type.as_str().to_string())
            .or_insert(0) += 1;
        if anomaly.is_potential_vulnerability {
            potential_vulnerabilities += 1;
        }
    }

    let score = risk_score(&severity_counts);
    FlowRiskSummary {
        risk_score: score,
        risk_category: risk_category(score),
        total_anomalies: anomalies.len() as u64,
        potential_vulnerabilities,
        recommendations: recommendations(&severity_counts, &type_counts, anomalies),
        severity_counts,
        type_counts,
        confidence: confidence_stats(anomalies),
    }
}
