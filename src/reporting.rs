// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Report Assembly
 * Flow reports, executive summaries and analytics views
 *
 * The JSON report shape is the documented integration contract for
 * downstream pipelines.
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::errors::DetectorResult;
use crate::scoring::{self, ConfidenceStats, FlowRiskSummary, RiskCategory, SeverityBreakdown};
use crate::store::Store;
use crate::types::{Anomaly, AnomalyStatus, Severity, VulnerabilityType};

/// Version of the JSON report contract
pub const REPORT_FORMAT_VERSION: &str = "1";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowReport {
    pub report_version: String,
    pub flow: FlowHeader,
    pub statistics: ReportStatistics,
    pub risk: FlowRiskSummary,
    pub requests: Vec<RequestReport>,
    pub anomalies: Vec<AnomalyReport>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowHeader {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub target_domain: Option<String>,
    pub created_at: DateTime<Utc>,
    pub request_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportStatistics {
    pub total_requests: i64,
    pub total_test_cases: i64,
    pub total_anomalies: i64,
    pub critical_anomalies: u64,
    pub high_severity_anomalies: u64,
    pub potential_vulnerabilities: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestReport {
    pub id: i64,
    pub ordinal: i64,
    pub method: String,
    pub url: String,
    pub captured_status: u16,
    pub test_cases: Vec<TestCaseReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseReport {
    pub id: i64,
    pub rule_id: String,
    pub category: String,
    pub description: String,
    pub anomalies: Vec<AnomalyReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyReport {
    pub id: i64,
    pub test_case_id: i64,
    pub detector: String,
    #[serde(rename = "type")]
    pub vulnerability_type: VulnerabilityType,
    pub severity: Severity,
    pub confidence: f64,
    pub is_potential_vulnerability: bool,
    pub description: String,
    pub original_status: Option<u16>,
    pub replayed_status: Option<u16>,
    pub original_content_length: Option<i64>,
    pub replayed_content_length: Option<i64>,
    pub status: AnomalyStatus,
    pub created_at: DateTime<Utc>,
}

impl AnomalyReport {
    fn from_anomaly(anomaly: &Anomaly) -> Self {
        Self {
            id: anomaly.anomaly_id,
            test_case_id: anomaly.test_case_id,
            detector: anomaly.detector.clone(),
            vulnerability_type: anomaly.vulnerability_type,
            severity: anomaly.severity,
            confidence: anomaly.confidence,
            is_potential_vulnerability: anomaly.is_potential_vulnerability,
            description: anomaly.description.clone(),
            original_status: anomaly.original_status,
            replayed_status: anomaly.replayed_status,
            original_content_length: anomaly.original_content_length,
            replayed_content_length: anomaly.replayed_content_length,
            status: anomaly.status,
            created_at: anomaly.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutiveSummary {
    pub flow_id: i64,
    pub flow_name: String,
    pub target_domain: Option<String>,
    pub risk_score: f64,
    pub risk_category: RiskCategory,
    pub total_anomalies: u64,
    pub potential_vulnerabilities: u64,
    pub severity_counts: SeverityBreakdown,
    pub recommendations: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowAnalytics {
    pub flow_id: i64,
    pub severity_counts: SeverityBreakdown,
    pub severity_percentages: BTreeMap<String, f64>,
    pub type_counts: BTreeMap<String, u64>,
    pub most_common_type: Option<String>,
    pub confidence: ConfidenceStats,
    pub risk_score: f64,
    pub risk_category: RiskCategory,
    pub generated_at: DateTime<Utc>,
}

/// Assemble the full report for a flow: requests with their test cases,
/// anomalies nested per test case, and the severity-sorted flat list.
pub async fn flow_report(store: &Store, flow_id: i64) -> DetectorResult<FlowReport> {
    let flow = store.get_flow(flow_id).await?;
    let requests = store.flow_requests_in_order(flow_id).await?;
    let test_cases = store.flow_test_cases(flow_id).await?;
    let anomalies = store.flow_anomalies(flow_id).await?;

    let risk = scoring::aggregate(&anomalies);

    let mut anomalies_by_test_case: HashMap<i64, Vec<AnomalyReport>> = HashMap::new();
    for anomaly in &anomalies {
        anomalies_by_test_case
            .entry(anomaly.test_case_id)
            .or_default()
            .push(AnomalyReport::from_anomaly(anomaly));
    }

    let mut test_cases_by_request: HashMap<i64, Vec<TestCaseReport>> = HashMap::new();
    for test_case in &test_cases {
        test_cases_by_request
            .entry(test_case.request_id)
            .or_default()
            .push(TestCaseReport {
                id: test_case.test_case_id,
                rule_id: test_case.rule_id.clone(),
                category: test_case.category.as_str().to_string(),
                description: test_case.description.clone(),
                anomalies: anomalies_by_test_case
                    .get(&test_case.test_case_id)
                    .cloned()
                    .unwrap_or_default(),
            });
    }

    let request_reports: Vec<RequestReport> = requests
        .iter()
        .map(|request| RequestReport {
            id: request.request_id,
            ordinal: request.ordinal,
            method: request.method.clone(),
            url: request.url.clone(),
            captured_status: request.captured_status,
            test_cases: test_cases_by_request
                .get(&request.request_id)
                .cloned()
                .unwrap_or_default(),
        })
        .collect();

    // Flat anomaly list, most severe first, confidence as tie-breaker
    let mut sorted: Vec<&Anomaly> = anomalies.iter().collect();
    sorted.sort_by(|a, b| {
        a.severity
            .rank()
            .cmp(&b.severity.rank())
            .then_with(|| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| a.anomaly_id.cmp(&b.anomaly_id))
    });

    let statistics = ReportStatistics {
        total_requests: requests.len() as i64,
        total_test_cases: test_cases.len() as i64,
        total_anomalies: anomalies.len() as i64,
        critical_anomalies: risk.severity_counts.critical,
        high_severity_anomalies: risk.severity_counts.high,
        potential_vulnerabilities: risk.potential_vulnerabilities,
    };

    Ok(FlowReport {
        report_version: REPORT_FORMAT_VERSION.to_string(),
        flow: FlowHeader {
            id: flow.flow_id,
            name: flow.name,
            description: flow.description,
            target_domain: flow.target_domain,
            created_at: flow.created_at,
            request_count: requests.len() as i64,
        },
        statistics,
        risk,
        requests: request_reports,
        anomalies: sorted.into_iter().map(AnomalyReport::from_anomaly).collect(),
        generated_at: Utc::now(),
    })
}

pub async fn executive_summary(store: &Store, flow_id: i64) -> DetectorResult<ExecutiveSummary> {
    let flow = store.get_flow(flow_id).await?;
    let anomalies = store.flow_anomalies(flow_id).await?;
    let risk = scoring::aggregate(&anomalies);

    Ok(ExecutiveSummary {
        flow_id: flow.flow_id,
        flow_name: flow.name,
        target_domain: flow.target_domain,
        risk_score: risk.risk_score,
        risk_category: risk.risk_category,
        total_anomalies: risk.total_anomalies,
        potential_vulnerabilities: risk.potential_vulnerabilities,
        severity_counts: risk.severity_counts,
        recommendations: risk.recommendations,
        generated_at: Utc::now(),
    })
}

pub async fn flow_analytics(store: &Store, flow_id: i64) -> DetectorResult<FlowAnalytics> {
    store.get_flow(flow_id).await?;
    let anomalies = store.flow_anomalies(flow_id).await?;
    let risk = scoring::aggregate(&anomalies);

    let total = anomalies.len() as f64;
    let percentage = |count: u64| {
        if total > 0.0 {
            count as f64 / total * 100.0
        } else {
            0.0
        }
    };
    let severity_percentages: BTreeMap<String, f64> = [
        ("CRITICAL", risk.severity_counts.critical),
        ("HIGH", risk.severity_counts.high),
        ("MEDIUM", risk.severity_counts.medium),
        ("LOW", risk.severity_counts.low),
        ("INFO", risk.severity_counts.info),
    ]
    .into_iter()
    .map(|(name, count)| (name.to_string(), percentage(count)))
    .collect();

    let most_common_type = risk
        .type_counts
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(name, _)| name.clone());

    Ok(FlowAnalytics {
        flow_id,
        severity_counts: risk.severity_counts,
        severity_percentages,
        type_counts: risk.type_counts,
        most_common_type,
        confidence: risk.confidence,
        risk_score: risk.risk_score,
        risk_category: risk.risk_category,
        generated_at: Utc::now(),
    })
}

/// Render the standalone HTML report
pub fn render_html(report: &FlowReport) -> String {
    let mut anomaly_sections = String::new();
    if report.anomalies.is_empty() {
        anomaly_sections.push_str("    <p>No anomalies detected in this flow.</p>\n");
    } else {
        for anomaly in &report.anomalies {
            let severity_class = anomaly.severity.as_str().to_lowercase();
            let vuln_class = if anomaly.is_potential_vulnerability {
                " vulnerability"
            } else {
                ""
            };
            let status_change = match (anomaly.original_status, anomaly.replayed_status) {
                (Some(original), Some(replayed)) => format!(
                    "        <p><strong>Status Change:</strong> {} &rarr; {}</p>\n",
                    original, replayed
                ),
                _ => String::new(),
            };
            anomaly_sections.push_str(&format!(
                r#"    <div class="anomaly {severity_class}{vuln_class}">
        <h3>{vuln_type} - {severity}</h3>
        <p><strong>Description:</strong> {description}</p>
        <p><strong>Confidence:</strong> {confidence:.2}</p>
        <p><strong>Detector:</strong> {detector}</p>
        <p><strong>Test Case:</strong> #{test_case_id}</p>
{status_change}    </div>
"#,
                severity_class = severity_class,
                vuln_class = vuln_class,
                vuln_type = anomaly.vulnerability_type,
                severity = anomaly.severity,
                description = anomaly.description,
                confidence = anomaly.confidence,
                detector = anomaly.detector,
                test_case_id = anomaly.test_case_id,
                status_change = status_change,
            ));
        }
    }

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Anomaly Detection Report - {flow_name}</title>
    <style>
        body {{ font-family: Arial, sans-serif; margin: 20px; }}
        .header {{ background-color: #f4f4f4; padding: 20px; border-radius: 5px; }}
        .stats {{ display: flex; flex-wrap: wrap; gap: 20px; margin: 20px 0; }}
        .stat-box {{ background-color: #e9ecef; padding: 15px; border-radius: 5px; min-width: 150px; }}
        .anomaly {{ border: 1px solid #ddd; margin: 10px 0; padding: 15px; border-radius: 5px; }}
        .critical {{ border-left: 5px solid #dc3545; }}
        .high {{ border-left: 5px solid #fd7e14; }}
        .medium {{ border-left: 5px solid #ffc107; }}
        .low {{ border-left: 5px solid #28a745; }}
        .info {{ border-left: 5px solid #17a2b8; }}
        .vulnerability {{ background-color: #fff3cd; }}
    </style>
</head>
<body>
    <div class="header">
        <h1>Business Logic Anomaly Detection Report</h1>
        <h2>Flow: {flow_name}</h2>
        <p><strong>Target Domain:</strong> {target_domain}</p>
        <p><strong>Risk Score:</strong> {risk_score:.1} / 10 ({risk_category:?})</p>
        <p><strong>Generated:</strong> {generated_at}</p>
    </div>
    <div class="stats">
        <div class="stat-box"><h3>Requests</h3><p>{total_requests}</p></div>
        <div class="stat-box"><h3>Test Cases</h3><p>{total_test_cases}</p></div>
        <div class="stat-box"><h3>Anomalies</h3><p>{total_anomalies}</p></div>
        <div class="stat-box"><h3>Critical</h3><p>{critical}</p></div>
        <div class="stat-box"><h3>High</h3><p>{high}</p></div>
        <div class="stat-box"><h3>Potential Vulnerabilities</h3><p>{potential}</p></div>
    </div>
    <h2>Anomalies Detected</h2>
{anomaly_sections}</body>
</html>
"#,
        flow_name = report.flow.name,
        target_domain = report.flow.target_domain.as_deref().unwrap_or("N/A"),
        risk_score = report.risk.risk_score,
        risk_category = report.risk.risk_category,
        generated_at = report.generated_at.to_rfc3339(),
        total_requests = report.statistics.total_requests,
        total_test_cases = report.statistics.total_test_cases,
        total_anomalies = report.statistics.total_anomalies,
        critical = report.statistics.critical_anomalies,
        high = report.statistics.high_severity_anomalies,
        potential = report.statistics.potential_vulnerabilities,
        anomaly_sections = anomaly_sections,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_report() -> FlowReport {
        FlowReport {
            report_version: REPORT_FORMAT_VERSION.to_string(),
            flow: FlowHeader {
                id: 1,
                name: "checkout".to_string(),
                description: None,
                target_domain: Some("shop.example.com".to_string()),
                created_at: Utc::now(),
                request_count: 0,
            },
            statistics: ReportStatistics {
                total_requests: 0,
                total_test_cases: 0,
                total_anomalies: 0,
                critical_anomalies: 0,
                high_severity_anomalies: 0,
                potential_vulnerabilities: 0,
            },
            risk: scoring::aggregate(&[]),
            requests: Vec::new(),
            anomalies: Vec::new(),
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn test_empty_report_is_well_formed() {
        let report = empty_report();
        let encoded = serde_json::to_value(&report).unwrap();
        assert_eq!(encoded["reportVersion"], "1");
        assert!(encoded["requests"].as_array().unwrap().is_empty());
        assert!(encoded["anomalies"].as_array().unwrap().is_empty());
        assert_eq!(encoded["risk"]["riskScore"], 0.0);
    }

    #[test]
    fn test_report_json_round_trip_preserves_ids() {
        let mut report = empty_report();
        report.anomalies.push(AnomalyReport {
            id: 42,
            test_case_id: 7,
            detector: "status_transition".to_string(),
            vulnerability_type: VulnerabilityType::UnauthorizedAccess,
            severity: Severity::Critical,
            confidence: 0.9,
            is_potential_vulnerability: true,
            description: "Baseline was denied with 403 but the mutant succeeded with 200"
                .to_string(),
            original_status: Some(403),
            replayed_status: Some(200),
            original_content_length: Some(45),
            replayed_content_length: Some(5000),
            status: AnomalyStatus::New,
            created_at: Utc::now(),
        });

        let encoded = serde_json::to_string(&report).unwrap();
        let decoded: FlowReport = serde_json::from_str(&encoded).unwrap();
        let re_encoded = serde_json::to_string(&decoded).unwrap();
        assert_eq!(encoded, re_encoded);
        assert_eq!(decoded.anomalies[0].id, 42);
    }

    #[test]
    fn test_html_renders_severity_classes() {
        let mut report = empty_report();
        report.anomalies.push(AnomalyReport {
            id: 1,
            test_case_id: 1,
            detector: "status_transition".to_string(),
            vulnerability_type: VulnerabilityType::PrivilegeEscalation,
            severity: Severity::Critical,
            confidence: 0.9,
            is_potential_vulnerability: true,
            description: "token accepted".to_string(),
            original_status: Some(403),
            replayed_status: Some(200),
            original_content_length: None,
            replayed_content_length: None,
            status: AnomalyStatus::New,
            created_at: Utc::now(),
        });
        report.statistics.total_anomalies = 1;
        report.statistics.critical_anomalies = 1;

        let html = render_html(&report);
        assert!(html.contains("class=\"anomaly critical vulnerability\""));
        assert!(html.contains("privilege_escalation"));
        assert!(html.contains("403 &rarr; 200"));
    }

    #[test]
    fn test_empty_html_mentions_no_anomalies() {
        let html = render_html(&empty_report());
        assert!(html.contains("No anomalies detected"));
    }
}
