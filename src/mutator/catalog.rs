// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Mutation Rule Catalog
 * Versioned, declarative rules; the catalog is the extension point
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::types::{CoerceTarget, MutationCategory};

/// Version stamped on every test case generated from the shipped catalog
pub const DEFAULT_CATALOG_VERSION: &str = "2026.1";

/// Versioned mutation rule catalog. Replaceable at runtime through the
/// control plane; the version travels with every generated test case so
/// historical results stay interpretable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationCatalog {
    pub version: String,
    pub rules: Vec<MutationRule>,
}

impl MutationCatalog {
    pub fn enabled_rules(&self) -> impl Iterator<Item = &MutationRule> {
        self.rules.iter().filter(|r| r.enabled)
    }
}

impl Default for MutationCatalog {
    fn default() -> Self {
        default_catalog()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationRule {
    pub id: String,
    pub category: MutationCategory,
    pub description: String,
    pub selector: Selector,
    pub transform: Transform,
    #[serde(default)]
    pub applies: Applies,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Class of sites in the request a rule targets
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Selector {
    /// Numeric URL path segments
    PathSegments,
    /// URL query parameters
    QueryParams,
    /// A specific request header
    Header { name: String },
    /// Scalar fields anywhere in a JSON body
    JsonBody,
    /// Fields of a urlencoded form body
    FormFields,
    /// The request as a whole
    Envelope,
}

/// Transformation applied at each matched site
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transform {
    SetValue { value: serde_json::Value },
    Delete,
    Duplicate,
    TypeCoerce { targets: Vec<CoerceTarget> },
    NumericExtreme { values: Vec<serde_json::Value> },
    StringBoundary { values: Vec<String> },
    /// Rewrite one claim of a JWT-like token, re-encoding without a valid
    /// signature
    TokenTamper {
        claim: String,
        value: serde_json::Value,
    },
    /// Substitute the caller's auth material with each pool identity
    SubstituteIdentity,
    SequenceSkip,
    SequenceRepeat { times: u32 },
    SequenceSwapAdjacent,
}

/// Predicate gating a rule on the request and flow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Applies {
    /// Request must carry an Authorization header or Cookie
    pub requires_auth: bool,
    /// Authorization value must look like a JWT (three dot-separated parts)
    pub requires_jwt: bool,
    /// Flow must have at least one alternate identity configured
    pub requires_identity_pool: bool,
    /// Minimum number of requests in the flow (sequence rules need 2)
    pub min_flow_requests: usize,
    /// Site's current value must belong to this class
    pub value_class: Option<ValueClass>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValueClass {
    Numeric,
    Boolean,
    Text,
}

/// The shipped rule set. Mirrors the production catalog: numeric extremes
/// on ids and amounts, string boundaries, auth-header tampering, identity
/// substitution and flow-level sequence manipulation.
pub fn default_catalog() -> MutationCatalog {
    let numeric_extremes = vec![json!(-1), json!(0), json!(i64::MAX)];
    let string_boundaries = vec![
        String::new(),
        "A".repeat(4096),
        "\u{FEFF}\u{202E}\u{2603}\u{10FFFF}".to_string(),
        "\u{0000}\u{0009}\u{001B}".to_string(),
    ];

    MutationCatalog {
        version: DEFAULT_CATALOG_VERSION.to_string(),
        rules: vec![
            // --- parameter tampering ------------------------------------
            MutationRule {
                id: "numeric-extreme-path".to_string(),
                category: MutationCategory::Parameter,
                description: "Replace numeric URL path segments with extreme values".to_string(),
                selector: Selector::PathSegments,
                transform: Transform::NumericExtreme {
                    values: numeric_extremes.clone(),
                },
                applies: Applies {
                    value_class: Some(ValueClass::Numeric),
                    ..Applies::default()
                },
                enabled: true,
            },
            MutationRule {
                id: "numeric-extreme-query".to_string(),
                category: MutationCategory::Parameter,
                description: "Replace numeric query parameters with extreme values".to_string(),
                selector: Selector::QueryParams,
                transform: Transform::NumericExtreme {
                    values: numeric_extremes.clone(),
                },
                applies: Applies {
                    value_class: Some(ValueClass::Numeric),
                    ..Applies::default()
                },
                enabled: true,
            },
            MutationRule {
                id: "numeric-extreme-body".to_string(),
                category: MutationCategory::Parameter,
                description: "Replace numeric JSON body fields with extreme values".to_string(),
                selector: Selector::JsonBody,
                transform: Transform::NumericExtreme {
                    values: numeric_extremes.clone(),
                },
                applies: Applies {
                    value_class: Some(ValueClass::Numeric),
                    ..Applies::default()
                },
                enabled: true,
            },
            MutationRule {
                id: "numeric-extreme-form".to_string(),
                category: MutationCategory::Parameter,
                description: "Replace numeric form fields with extreme values".to_string(),
                selector: Selector::FormFields,
                transform: Transform::NumericExtreme {
                    values: numeric_extremes,
                },
                applies: Applies {
                    value_class: Some(ValueClass::Numeric),
                    ..Applies::default()
                },
                enabled: true,
            },
            MutationRule {
                id: "type-coerce-body".to_string(),
                category: MutationCategory::Parameter,
                description: "Coerce JSON body fields across scalar types".to_string(),
                selector: Selector::JsonBody,
                transform: Transform::TypeCoerce {
                    targets: vec![
                        CoerceTarget::String,
                        CoerceTarget::Number,
                        CoerceTarget::Bool,
                        CoerceTarget::Null,
                    ],
                },
                applies: Applies::default(),
                enabled: true,
            },
            MutationRule {
                id: "query-param-delete".to_string(),
                category: MutationCategory::Parameter,
                description: "Drop each query parameter".to_string(),
                selector: Selector::QueryParams,
                transform: Transform::Delete,
                applies: Applies::default(),
                enabled: true,
            },
            MutationRule {
                id: "query-param-duplicate".to_string(),
                category: MutationCategory::Parameter,
                description: "Duplicate each query parameter".to_string(),
                selector: Selector::QueryParams,
                transform: Transform::Duplicate,
                applies: Applies::default(),
                enabled: true,
            },
            // --- string boundaries --------------------------------------
            MutationRule {
                id: "string-boundary-query".to_string(),
                category: MutationCategory::String,
                description: "Boundary strings in query parameters".to_string(),
                selector: Selector::QueryParams,
                transform: Transform::StringBoundary {
                    values: string_boundaries.clone(),
                },
                applies: Applies {
                    value_class: Some(ValueClass::Text),
                    ..Applies::default()
                },
                enabled: true,
            },
            MutationRule {
                id: "string-boundary-body".to_string(),
                category: MutationCategory::String,
                description: "Boundary strings in JSON body fields".to_string(),
                selector: Selector::JsonBody,
                transform: Transform::StringBoundary {
                    values: string_boundaries,
                },
                applies: Applies {
                    value_class: Some(ValueClass::Text),
                    ..Applies::default()
                },
                enabled: true,
            },
            // --- authentication -----------------------------------------
            MutationRule {
                id: "auth-invalid-token".to_string(),
                category: MutationCategory::Auth,
                description: "Replace the Authorization header with an invalid token".to_string(),
                selector: Selector::Header {
                    name: "Authorization".to_string(),
                },
                transform: Transform::SetValue {
                    value: json!("Bearer invalid"),
                },
                applies: Applies {
                    requires_auth: true,
                    ..Applies::default()
                },
                enabled: true,
            },
            MutationRule {
                id: "auth-strip-token".to_string(),
                category: MutationCategory::Auth,
                description: "Remove the Authorization header".to_string(),
                selector: Selector::Header {
                    name: "Authorization".to_string(),
                },
                transform: Transform::Delete,
                applies: Applies {
                    requires_auth: true,
                    ..Applies::default()
                },
                enabled: true,
            },
            MutationRule {
                id: "auth-token-tamper".to_string(),
                category: MutationCategory::Auth,
                description: "Rewrite the token subject claim without re-signing".to_string(),
                selector: Selector::Header {
                    name: "Authorization".to_string(),
                },
                transform: Transform::TokenTamper {
                    claim: "sub".to_string(),
                    value: json!("0"),
                },
                applies: Applies {
                    requires_auth: true,
                    requires_jwt: true,
                    ..Applies::default()
                },
                enabled: true,
            },
            MutationRule {
                id: "auth-session-fixation".to_string(),
                category: MutationCategory::Auth,
                description: "Pin the session cookie to a fixed value".to_string(),
                selector: Selector::Header {
                    name: "Cookie".to_string(),
                },
                transform: Transform::SetValue {
                    value: json!("JSESSIONID=fixed_session_id"),
                },
                applies: Applies {
                    requires_auth: true,
                    ..Applies::default()
                },
                enabled: true,
            },
            MutationRule {
                id: "auth-privilege-substitution".to_string(),
                category: MutationCategory::Auth,
                description: "Substitute the caller identity with each configured identity"
                    .to_string(),
                selector: Selector::Envelope,
                transform: Transform::SubstituteIdentity,
                applies: Applies {
                    requires_auth: true,
                    requires_identity_pool: true,
                    ..Applies::default()
                },
                enabled: true,
            },
            // --- sequence -----------------------------------------------
            MutationRule {
                id: "sequence-skip".to_string(),
                category: MutationCategory::Sequence,
                description: "Skip each prerequisite request in the flow".to_string(),
                selector: Selector::Envelope,
                transform: Transform::SequenceSkip,
                applies: Applies {
                    min_flow_requests: 2,
                    ..Applies::default()
                },
                enabled: true,
            },
            MutationRule {
                id: "sequence-repeat".to_string(),
                category: MutationCategory::Sequence,
                description: "Repeat each request within the flow".to_string(),
                selector: Selector::Envelope,
                transform: Transform::SequenceRepeat { times: 2 },
                applies: Applies {
                    min_flow_requests: 2,
                    ..Applies::default()
                },
                enabled: true,
            },
            MutationRule {
                id: "sequence-swap".to_string(),
                category: MutationCategory::Sequence,
                description: "Reorder adjacent requests within the flow".to_string(),
                selector: Selector::Envelope,
                transform: Transform::SequenceSwapAdjacent,
                applies: Applies {
                    min_flow_requests: 2,
                    ..Applies::default()
                },
                enabled: true,
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_round_trips_as_json() {
        let catalog = default_catalog();
        let encoded = serde_json::to_string(&catalog).unwrap();
        let decoded: MutationCatalog = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.version, DEFAULT_CATALOG_VERSION);
        assert_eq!(decoded.rules.len(), catalog.rules.len());
    }

    #[test]
    fn test_rule_ids_are_unique() {
        let catalog = default_catalog();
        let mut ids: Vec<_> = catalog.rules.iter().map(|r| r.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), catalog.rules.len());
    }

    #[test]
    fn test_sequence_rules_require_two_requests() {
        let catalog = default_catalog();
        for rule in &catalog.rules {
            if rule.category == MutationCategory::Sequence {
                assert!(rule.applies.min_flow_requests >= 2, "rule {}", rule.id);
            }
        }
    }
}
