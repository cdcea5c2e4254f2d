// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Mutation Engine
 * Derives deterministic test cases from baseline requests via the catalog
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

pub mod catalog;
pub mod sites;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::errors::DetectorResult;
use crate::store::Store;
use crate::types::{
    Flow, Mutation, MutationCategory, NewTestCase, RecordedRequest, SequenceOp, TargetSite,
};
use catalog::{MutationCatalog, MutationRule, Transform};
use sites::{classify, coerced, enumerate_sites, Site};

/// A mutation derived from a rule, anchored to one baseline request
#[derive(Debug, Clone)]
pub struct GeneratedCase {
    pub request_id: i64,
    pub rule_id: String,
    pub category: MutationCategory,
    pub description: String,
    pub mutation: Mutation,
}

/// Counters returned by a generation pass
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOutcome {
    pub generated: u64,
    pub deduplicated: u64,
}

fn has_auth_material(request: &RecordedRequest) -> bool {
    request.header("Authorization").is_some() || request.header("Cookie").is_some()
}

fn looks_like_jwt(request: &RecordedRequest) -> bool {
    request
        .header("Authorization")
        .map(|raw| {
            let token = raw
                .split_once(' ')
                .map(|(_, rest)| rest)
                .unwrap_or(raw);
            token.split('.').count() == 3
        })
        .unwrap_or(false)
}

fn rule_applies(
    rule: &MutationRule,
    flow: &Flow,
    flow_request_count: usize,
    request: &RecordedRequest,
) -> bool {
    let applies = &rule.applies;
    if applies.requires_auth && !has_auth_material(request) {
        return false;
    }
    if applies.requires_jwt && !looks_like_jwt(request) {
        return false;
    }
    if applies.requires_identity_pool && flow.identity_pool.is_empty() {
        return false;
    }
    if flow_request_count < applies.min_flow_requests {
        return false;
    }
    true
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) if s.len() > 48 => {
            let head: String = s.chars().take(16).collect();
            format!("{} ({} bytes)", head, s.len())
        }
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn expand_transform(rule: &MutationRule, flow: &Flow, site: &Site) -> Vec<(String, Mutation)> {
    let mut out = Vec::new();
    let place = site.target.describe();

    match &rule.transform {
        Transform::SetValue { value } => {
            out.push((
                format!("Set {} to '{}'", place, render_value(value)),
                Mutation::SetValue {
                    site: site.target.clone(),
                    value: value.clone(),
                },
            ));
        }
        Transform::Delete => {
            out.push((
                format!("Remove {}", place),
                Mutation::Delete {
                    site: site.target.clone(),
                },
            ));
        }
        Transform::Duplicate => {
            out.push((
                format!("Duplicate {}", place),
                Mutation::Duplicate {
                    site: site.target.clone(),
                },
            ));
        }
        Transform::TypeCoerce { targets } => {
            for target in targets {
                // Skip coercions that would leave the value unchanged
                if coerced(&site.value, *target) == site.value {
                    continue;
                }
                out.push((
                    format!("Coerce {} to {:?}", place, target),
                    Mutation::TypeCoerce {
                        site: site.target.clone(),
                        target: *target,
                    },
                ));
            }
        }
        Transform::NumericExtreme { values } => {
            let current = render_value(&site.value);
            for value in values {
                if render_value(value) == current {
                    continue;
                }
                out.push((
                    format!("{}: {} -> {}", place, current, render_value(value)),
                    Mutation::SetValue {
                        site: site.target.clone(),
                        value: value.clone(),
                    },
                ));
            }
        }
        Transform::StringBoundary { values } => {
            for value in values {
                out.push((
                    format!(
                        "{}: boundary string '{}'",
                        place,
                        render_value(&Value::String(value.clone()))
                    ),
                    Mutation::SetValue {
                        site: site.target.clone(),
                        value: Value::String(value.clone()),
                    },
                ));
            }
        }
        Transform::TokenTamper { claim, value } => {
            if let TargetSite::Header { name } = &site.target {
                out.push((
                    format!("Tamper token claim '{}' in {} header", claim, name),
                    Mutation::TokenTamper {
                        header: name.clone(),
                        claim: claim.clone(),
                        value: value.clone(),
                    },
                ));
            }
        }
        Transform::SubstituteIdentity => {
            for identity in &flow.identity_pool {
                out.push((
                    format!("Substitute caller identity with '{}'", identity.name),
                    Mutation::SubstituteIdentity {
                        identity: identity.name.clone(),
                    },
                ));
            }
        }
        // Sequence transforms are expanded at flow level
        Transform::SequenceSkip
        | Transform::SequenceRepeat { .. }
        | Transform::SequenceSwapAdjacent => {}
    }

    out
}

/// Generate point mutations for one request. Deterministic for a given
/// request and catalog version: sites are enumerated in stable order and
/// transforms expand in rule order.
pub fn generate_for_request(
    catalog: &MutationCatalog,
    flow: &Flow,
    flow_request_count: usize,
    request: &RecordedRequest,
) -> Vec<GeneratedCase> {
    let mut cases = Vec::new();

    for rule in catalog.enabled_rules() {
        if rule.category == MutationCategory::Sequence {
            continue;
        }
        if !rule_applies(rule, flow, flow_request_count, request) {
            continue;
        }

        for site in enumerate_sites(request, &rule.selector) {
            if let Some(class) = rule.applies.value_class {
                if classify(&site.value) != class {
                    continue;
                }
            }
            for (description, mutation) in expand_transform(rule, flow, &site) {
                cases.push(GeneratedCase {
                    request_id: request.request_id,
                    rule_id: rule.id.clone(),
                    category: rule.category,
                    description,
                    mutation,
                });
            }
        }
    }

    cases
}

fn describe_request(request: &RecordedRequest) -> String {
    let path = url::Url::parse(&request.url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| request.url.clone());
    format!("{} {}", request.method, path)
}

/// Generate flow-level sequence mutations. Each case anchors to the
/// request whose response will be measured, so the baseline pairing is
/// direct at analysis time.
pub fn generate_sequence_cases(
    catalog: &MutationCatalog,
    flow: &Flow,
    requests: &[RecordedRequest],
) -> Vec<GeneratedCase> {
    let mut cases = Vec::new();
    if requests.is_empty() {
        return cases;
    }

    for rule in catalog.enabled_rules() {
        if rule.category != MutationCategory::Sequence {
            continue;
        }
        if requests.len() < rule.applies.min_flow_requests.max(2) {
            continue;
        }

        match &rule.transform {
            Transform::SequenceSkip => {
                // Skipping the final request leaves nothing downstream to
                // measure
                for window in requests.windows(2) {
                    let (skipped, measured) = (&window[0], &window[1]);
                    cases.push(GeneratedCase {
                        request_id: measured.request_id,
                        rule_id: rule.id.clone(),
                        category: rule.category,
                        description: format!(
                            "Skip prerequisite '{}' before '{}'",
                            describe_request(skipped),
                            describe_request(measured)
                        ),
                        mutation: Mutation::Sequence {
                            seq_op: SequenceOp::Skip {
                                ordinal: skipped.ordinal,
                            },
                        },
                    });
                }
            }
            Transform::SequenceRepeat { times } => {
                for request in requests {
                    cases.push(GeneratedCase {
                        request_id: request.request_id,
                        rule_id: rule.id.clone(),
                        category: rule.category,
                        description: format!(
                            "Repeat '{}' {} times",
                            describe_request(request),
                            times
                        ),
                        mutation: Mutation::Sequence {
                            seq_op: SequenceOp::Repeat {
                                ordinal: request.ordinal,
                                times: *times,
                            },
                        },
                    });
                }
            }
            Transform::SequenceSwapAdjacent => {
                for window in requests.windows(2) {
                    let (first, second) = (&window[0], &window[1]);
                    cases.push(GeneratedCase {
                        request_id: first.request_id,
                        rule_id: rule.id.clone(),
                        category: rule.category,
                        description: format!(
                            "Execute '{}' before '{}'",
                            describe_request(second),
                            describe_request(first)
                        ),
                        mutation: Mutation::Sequence {
                            seq_op: SequenceOp::Swap {
                                first: first.ordinal,
                                second: second.ordinal,
                            },
                        },
                    });
                }
            }
            _ => {}
        }
    }

    cases
}

async fn persist_cases(
    store: &Store,
    flow_id: i64,
    catalog_version: &str,
    cases: Vec<GeneratedCase>,
) -> DetectorResult<GenerationOutcome> {
    let mut outcome = GenerationOutcome::default();
    for case in cases {
        let inserted = store
            .insert_test_case(&NewTestCase {
                flow_id,
                request_id: case.request_id,
                category: case.category,
                rule_id: case.rule_id,
                description: case.description,
                mutation: case.mutation,
                catalog_version: catalog_version.to_string(),
            })
            .await?;
        match inserted {
            Some(_) => outcome.generated += 1,
            None => outcome.deduplicated += 1,
        }
    }
    Ok(outcome)
}

/// Generate and persist test cases for a single request
pub async fn generate_for_request_id(
    store: &Store,
    catalog: &MutationCatalog,
    request_id: i64,
) -> DetectorResult<GenerationOutcome> {
    let request = store.get_request(request_id).await?;
    let flow = store.get_flow(request.flow_id).await?;
    let flow_request_count = store.count_requests(flow.flow_id).await? as usize;

    let cases = generate_for_request(catalog, &flow, flow_request_count, &request);
    debug!(
        request_id,
        candidates = cases.len(),
        "generated mutation candidates"
    );
    persist_cases(store, flow.flow_id, &catalog.version, cases).await
}

/// Generate and persist test cases for a whole flow, including flow-level
/// sequence mutations
pub async fn generate_for_flow_id(
    store: &Store,
    catalog: &MutationCatalog,
    flow_id: i64,
) -> DetectorResult<GenerationOutcome> {
    let flow = store.get_flow(flow_id).await?;
    let requests = store.flow_requests_in_order(flow_id).await?;

    let mut cases = Vec::new();
    for request in &requests {
        cases.extend(generate_for_request(
            catalog,
            &flow,
            requests.len(),
            request,
        ));
    }
    cases.extend(generate_sequence_cases(catalog, &flow, &requests));

    let outcome = persist_cases(store, flow_id, &catalog.version, cases).await?;
    info!(
        flow_id,
        generated = outcome.generated,
        deduplicated = outcome.deduplicated,
        catalog_version = %catalog.version,
        "payload generation completed"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Identity;
    use chrono::Utc;
    use std::collections::HashMap;

    fn flow_with_pool(pool: Vec<Identity>) -> Flow {
        Flow {
            flow_id: 1,
            name: "checkout".to_string(),
            description: None,
            target_domain: Some("shop.example.com".to_string()),
            identity_pool: pool,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn request(url: &str, headers: Vec<(&str, &str)>, body: Option<&str>) -> RecordedRequest {
        request_at(1, 1, url, headers, body)
    }

    fn request_at(
        id: i64,
        ordinal: i64,
        url: &str,
        headers: Vec<(&str, &str)>,
        body: Option<&str>,
    ) -> RecordedRequest {
        RecordedRequest {
            request_id: id,
            flow_id: 1,
            ordinal,
            method: "POST".to_string(),
            url: url.to_string(),
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: body.map(|b| b.as_bytes().to_vec()),
            captured_status: 200,
            captured_headers: HashMap::new(),
            captured_body: None,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_generation_is_deterministic() {
        let catalog = catalog::default_catalog();
        let flow = flow_with_pool(vec![]);
        let request = request(
            "https://shop.example.com/cart?price=19.99&qty=1",
            vec![("Content-Type", "application/json")],
            Some(r#"{"price":19.99,"qty":1}"#),
        );

        let first: Vec<String> = generate_for_request(&catalog, &flow, 1, &request)
            .into_iter()
            .map(|c| c.mutation.canonical_json())
            .collect();
        let second: Vec<String> = generate_for_request(&catalog, &flow, 1, &request)
            .into_iter()
            .map(|c| c.mutation.canonical_json())
            .collect();

        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn test_auth_rules_gated_on_auth_material() {
        let catalog = catalog::default_catalog();
        let flow = flow_with_pool(vec![]);

        let anonymous = request("https://shop.example.com/catalog?q=shoes", vec![], None);
        let cases = generate_for_request(&catalog, &flow, 1, &anonymous);
        assert!(cases.iter().all(|c| c.category != MutationCategory::Auth));

        let authed = request(
            "https://shop.example.com/catalog?q=shoes",
            vec![("Authorization", "Bearer opaque-token")],
            None,
        );
        let cases = generate_for_request(&catalog, &flow, 1, &authed);
        assert!(cases.iter().any(|c| c.rule_id == "auth-invalid-token"));
        assert!(cases.iter().any(|c| c.rule_id == "auth-strip-token"));
        // Opaque token: no tamper case without three JWT parts
        assert!(cases.iter().all(|c| c.rule_id != "auth-token-tamper"));
    }

    #[test]
    fn test_jwt_gates_token_tamper() {
        let catalog = catalog::default_catalog();
        let flow = flow_with_pool(vec![]);
        let authed = request(
            "https://api.example.com/user/profile",
            vec![("Authorization", "Bearer aaa.bbb.ccc")],
            None,
        );
        let cases = generate_for_request(&catalog, &flow, 1, &authed);
        assert!(cases.iter().any(|c| c.rule_id == "auth-token-tamper"));
    }

    #[test]
    fn test_identity_pool_expands_privilege_cases() {
        let catalog = catalog::default_catalog();
        let pool = vec![
            Identity {
                name: "admin-candidate".to_string(),
                headers: HashMap::new(),
                cookies: HashMap::new(),
            },
            Identity {
                name: "other-user".to_string(),
                headers: HashMap::new(),
                cookies: HashMap::new(),
            },
        ];
        let flow = flow_with_pool(pool);
        let authed = request(
            "https://api.example.com/admin/users",
            vec![("Authorization", "Bearer user-token")],
            None,
        );

        let cases = generate_for_request(&catalog, &flow, 1, &authed);
        let substitutions: Vec<_> = cases
            .iter()
            .filter(|c| c.rule_id == "auth-privilege-substitution")
            .collect();
        assert_eq!(substitutions.len(), 2);
    }

    #[test]
    fn test_sequence_cases_anchor_measured_request() {
        let catalog = catalog::default_catalog();
        let flow = flow_with_pool(vec![]);
        let requests = vec![
            request_at(10, 1, "https://shop.example.com/checkout/start", vec![], None),
            request_at(11, 2, "https://shop.example.com/checkout/pay", vec![], None),
            request_at(12, 3, "https://shop.example.com/checkout/confirm", vec![], None),
        ];

        let cases = generate_sequence_cases(&catalog, &flow, &requests);

        let skips: Vec<_> = cases
            .iter()
            .filter(|c| c.rule_id == "sequence-skip")
            .collect();
        assert_eq!(skips.len(), 2);
        // Skipping ordinal 2 measures the request at ordinal 3
        let skip_two = skips
            .iter()
            .find(|c| {
                matches!(
                    &c.mutation,
                    Mutation::Sequence {
                        seq_op: SequenceOp::Skip { ordinal: 2 }
                    }
                )
            })
            .unwrap();
        assert_eq!(skip_two.request_id, 12);
    }

    #[test]
    fn test_sequence_needs_two_requests() {
        let catalog = catalog::default_catalog();
        let flow = flow_with_pool(vec![]);
        let requests = vec![request_at(
            10,
            1,
            "https://shop.example.com/checkout/start",
            vec![],
            None,
        )];
        assert!(generate_sequence_cases(&catalog, &flow, &requests).is_empty());
    }

    #[test]
    fn test_numeric_extreme_covers_price_scenario() {
        let catalog = catalog::default_catalog();
        let flow = flow_with_pool(vec![]);
        let request = request(
            "https://shop.example.com/cart/add",
            vec![("Content-Type", "application/json")],
            Some(r#"{"price":19.99,"qty":1}"#),
        );

        let cases = generate_for_request(&catalog, &flow, 1, &request);
        let negative_price = cases.iter().find(|c| {
            matches!(
                &c.mutation,
                Mutation::SetValue {
                    site: TargetSite::JsonPath { path },
                    value,
                } if path == "price" && *value == serde_json::json!(-1)
            )
        });
        assert!(negative_price.is_some(), "price=-1 case expected");
    }
}
