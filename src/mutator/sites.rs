// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Mutation Sites
 * Site discovery within requests and mutation materialization
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde_json::Value;
use url::{form_urlencoded, Url};

use crate::errors::{DetectorError, DetectorResult};
use crate::mutator::catalog::{Selector, ValueClass};
use crate::types::{
    CoerceTarget, Identity, Mutation, PreparedRequest, RecordedRequest, TargetSite,
};

/// A concrete site discovered in a request, with its current value
#[derive(Debug, Clone)]
pub struct Site {
    pub target: TargetSite,
    pub value: Value,
}

fn content_type(request: &RecordedRequest) -> &str {
    request.header("Content-Type").unwrap_or("")
}

fn body_str(request: &RecordedRequest) -> Option<&str> {
    request
        .body
        .as_deref()
        .and_then(|b| std::str::from_utf8(b).ok())
}

/// Classify a site value for rule predicates
pub fn classify(value: &Value) -> ValueClass {
    match value {
        Value::Number(_) => ValueClass::Numeric,
        Value::Bool(_) => ValueClass::Boolean,
        Value::String(s) => {
            if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
                ValueClass::Numeric
            } else if matches!(s.to_ascii_lowercase().as_str(), "true" | "false") {
                ValueClass::Boolean
            } else {
                ValueClass::Text
            }
        }
        _ => ValueClass::Text,
    }
}

/// Enumerate the concrete sites a selector matches in a request. Order is
/// stable for a given request, which keeps generation deterministic.
pub fn enumerate_sites(request: &RecordedRequest, selector: &Selector) -> Vec<Site> {
    match selector {
        Selector::PathSegments => {
            let Ok(url) = Url::parse(&request.url) else {
                return Vec::new();
            };
            url.path_segments()
                .map(|segments| {
                    segments
                        .enumerate()
                        .filter(|(_, s)| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
                        .map(|(index, s)| Site {
                            target: TargetSite::PathSegment { index },
                            value: Value::String(s.to_string()),
                        })
                        .collect()
                })
                .unwrap_or_default()
        }
        Selector::QueryParams => {
            let Ok(url) = Url::parse(&request.url) else {
                return Vec::new();
            };
            let mut seen = Vec::new();
            let mut sites = Vec::new();
            for (name, value) in url.query_pairs() {
                if seen.contains(&name.to_string()) {
                    continue;
                }
                seen.push(name.to_string());
                sites.push(Site {
                    target: TargetSite::QueryParam {
                        name: name.to_string(),
                    },
                    value: Value::String(value.to_string()),
                });
            }
            sites
        }
        Selector::Header { name } => request
            .header(name)
            .map(|value| {
                vec![Site {
                    target: TargetSite::Header { name: name.clone() },
                    value: Value::String(value.to_string()),
                }]
            })
            .unwrap_or_default(),
        Selector::JsonBody => {
            if !content_type(request).contains("application/json") {
                return Vec::new();
            }
            let Some(parsed) = body_str(request).and_then(|b| serde_json::from_str(b).ok())
            else {
                return Vec::new();
            };
            let mut scalars = Vec::new();
            walk_scalars(&parsed, String::new(), &mut scalars);
            scalars
                .into_iter()
                .map(|(path, value)| Site {
                    target: TargetSite::JsonPath { path },
                    value,
                })
                .collect()
        }
        Selector::FormFields => {
            if !content_type(request).contains("application/x-www-form-urlencoded") {
                return Vec::new();
            }
            let Some(body) = body_str(request) else {
                return Vec::new();
            };
            form_urlencoded::parse(body.as_bytes())
                .map(|(name, value)| Site {
                    target: TargetSite::FormField {
                        name: name.to_string(),
                    },
                    value: Value::String(value.to_string()),
                })
                .collect()
        }
        Selector::Envelope => vec![Site {
            target: TargetSite::Envelope,
            value: Value::Null,
        }],
    }
}

// --- JSON path helpers --------------------------------------------------

#[derive(Debug, PartialEq)]
enum PathPart {
    Key(String),
    Index(usize),
}

fn parse_path(path: &str) -> Vec<PathPart> {
    let mut parts = Vec::new();
    for segment in path.split('.') {
        let mut rest = segment;
        if let Some(bracket) = rest.find('[') {
            if bracket > 0 {
                parts.push(PathPart::Key(rest[..bracket].to_string()));
            }
            rest = &rest[bracket..];
            while let Some(close) = rest.find(']') {
                if let Ok(index) = rest[1..close].parse::<usize>() {
                    parts.push(PathPart::Index(index));
                }
                rest = &rest[close + 1..];
                if !rest.starts_with('[') {
                    break;
                }
            }
        } else if !rest.is_empty() {
            parts.push(PathPart::Key(rest.to_string()));
        }
    }
    parts
}

/// Set the value at a dotted path; returns false when the path is absent
pub fn json_set(root: &mut Value, path: &str, new_value: Value) -> bool {
    let parts = parse_path(path);
    let mut current = root;
    for (i, part) in parts.iter().enumerate() {
        let last = i == parts.len() - 1;
        match part {
            PathPart::Key(key) => {
                let Value::Object(map) = current else {
                    return false;
                };
                if last {
                    if !map.contains_key(key) {
                        return false;
                    }
                    map.insert(key.clone(), new_value);
                    return true;
                }
                match map.get_mut(key) {
                    Some(next) => current = next,
                    None => return false,
                }
            }
            PathPart::Index(index) => {
                let Value::Array(items) = current else {
                    return false;
                };
                if *index >= items.len() {
                    return false;
                }
                if last {
                    items[*index] = new_value;
                    return true;
                }
                current = &mut items[*index];
            }
        }
    }
    false
}

/// Remove the value at a dotted path; returns false when absent
pub fn json_delete(root: &mut Value, path: &str) -> bool {
    let parts = parse_path(path);
    if parts.is_empty() {
        return false;
    }
    let mut current = root;
    for part in &parts[..parts.len() - 1] {
        match part {
            PathPart::Key(key) => {
                let Value::Object(map) = current else {
                    return false;
                };
                match map.get_mut(key) {
                    Some(next) => current = next,
                    None => return false,
                }
            }
            PathPart::Index(index) => {
                let Value::Array(items) = current else {
                    return false;
                };
                if *index >= items.len() {
                    return false;
                }
                current = &mut items[*index];
            }
        }
    }
    match (current, parts.last().unwrap()) {
        (Value::Object(map), PathPart::Key(key)) => map.remove(key).is_some(),
        (Value::Array(items), PathPart::Index(index)) => {
            if *index < items.len() {
                items.remove(*index);
                true
            } else {
                false
            }
        }
        _ => false,
    }
}

fn walk_scalars(value: &Value, prefix: String, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                walk_scalars(child, path, out);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                walk_scalars(child, format!("{}[{}]", prefix, index), out);
            }
        }
        scalar => {
            if !prefix.is_empty() {
                out.push((prefix, scalar.clone()));
            }
        }
    }
}

// --- materialization ----------------------------------------------------

fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn set_query_param(url: &str, name: &str, new_value: Option<&str>, duplicate: bool) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return url.to_string();
    };
    let pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let mut rebuilt = parsed.clone();
    {
        let mut query = rebuilt.query_pairs_mut();
        query.clear();
        for (k, v) in &pairs {
            if k == name {
                match new_value {
                    Some(replacement) => {
                        query.append_pair(k, replacement);
                        if duplicate {
                            query.append_pair(k, replacement);
                        }
                    }
                    // Delete: drop the pair entirely
                    None => continue,
                }
            } else {
                query.append_pair(k, v);
            }
        }
    }
    if rebuilt.query() == Some("") {
        rebuilt.set_query(None);
    }
    rebuilt.to_string()
}

fn set_path_segment(url: &str, index: usize, new_value: &str) -> DetectorResult<String> {
    let parsed = Url::parse(url)
        .map_err(|e| DetectorError::validation(format!("unparseable url {}: {}", url, e)))?;
    let segments: Vec<String> = parsed
        .path_segments()
        .map(|s| s.map(|p| p.to_string()).collect())
        .unwrap_or_default();
    if index >= segments.len() {
        return Err(DetectorError::validation(format!(
            "path segment {} out of range for {}",
            index, url
        )));
    }
    let mut rebuilt = parsed.clone();
    let new_path: Vec<&str> = segments
        .iter()
        .enumerate()
        .map(|(i, s)| if i == index { new_value } else { s.as_str() })
        .collect();
    rebuilt.set_path(&format!("/{}", new_path.join("/")));
    Ok(rebuilt.to_string())
}

fn rebuild_form_body(body: &str, name: &str, new_value: Option<&str>, duplicate: bool) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (k, v) in form_urlencoded::parse(body.as_bytes()) {
        if k == name {
            match new_value {
                Some(replacement) => {
                    serializer.append_pair(&k, replacement);
                    if duplicate {
                        serializer.append_pair(&k, replacement);
                    }
                }
                None => continue,
            }
        } else {
            serializer.append_pair(&k, &v);
        }
    }
    serializer.finish()
}

fn coerce_value(current: &Value, target: CoerceTarget) -> Value {
    match target {
        CoerceTarget::String => Value::String(value_as_string(current)),
        CoerceTarget::Number => match current {
            Value::Number(n) => Value::Number(n.clone()),
            Value::String(s) => s
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| Value::Number(0.into())),
            Value::Bool(b) => Value::Number(i64::from(*b).into()),
            _ => Value::Number(0.into()),
        },
        CoerceTarget::Bool => match current {
            Value::Bool(b) => Value::Bool(*b),
            Value::Number(n) => Value::Bool(n.as_f64().unwrap_or(0.0) != 0.0),
            Value::String(s) => Value::Bool(!s.is_empty() && s != "false" && s != "0"),
            _ => Value::Bool(false),
        },
        CoerceTarget::Null => Value::Null,
    }
}

/// Produce the coerced replacement for a type-coercion mutation
pub fn coerced(current: &Value, target: CoerceTarget) -> Value {
    coerce_value(current, target)
}

fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: String) {
    match headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
        Some((_, existing)) => *existing = value,
        None => headers.push((name.to_string(), value)),
    }
}

fn remove_header(headers: &mut Vec<(String, String)>, name: &str) {
    headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
}

/// Tamper a JWT-like token: decode the payload, rewrite one claim and
/// re-encode. The original signature is kept verbatim, so the token no
/// longer verifies.
fn tamper_token(raw: &str, claim: &str, value: &Value) -> DetectorResult<String> {
    let (prefix, token) = match raw.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => ("Bearer ", rest),
        _ => ("", raw),
    };

    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(DetectorError::validation(
            "authorization value is not a JWT-like token",
        ));
    }

    let payload = URL_SAFE_NO_PAD
        .decode(parts[1])
        .map_err(|e| DetectorError::validation(format!("token payload is not base64url: {}", e)))?;
    let mut claims: Value = serde_json::from_slice(&payload)
        .map_err(|e| DetectorError::validation(format!("token payload is not JSON: {}", e)))?;

    match &mut claims {
        Value::Object(map) => {
            map.insert(claim.to_string(), value.clone());
        }
        _ => {
            return Err(DetectorError::validation(
                "token payload is not a JSON object",
            ))
        }
    }

    let reencoded = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);
    Ok(format!(
        "{}{}.{}.{}",
        prefix, parts[0], reencoded, parts[2]
    ))
}

fn apply_to_site(
    prepared: &mut PreparedRequest,
    site: &TargetSite,
    new_value: Option<&Value>,
    duplicate: bool,
) -> DetectorResult<()> {
    match site {
        TargetSite::PathSegment { index } => {
            let value = new_value.ok_or_else(|| {
                DetectorError::validation("path segments cannot be deleted or duplicated")
            })?;
            prepared.url = set_path_segment(&prepared.url, *index, &value_as_string(value))?;
        }
        TargetSite::QueryParam { name } => {
            let replacement = new_value.map(value_as_string);
            prepared.url = set_query_param(&prepared.url, name, replacement.as_deref(), duplicate);
        }
        TargetSite::Header { name } => match new_value {
            Some(value) => {
                let rendered = value_as_string(value);
                set_header(&mut prepared.headers, name, rendered.clone());
                if duplicate {
                    prepared.headers.push((name.clone(), rendered));
                }
            }
            None => remove_header(&mut prepared.headers, name),
        },
        TargetSite::JsonPath { path } => {
            let body = prepared
                .body
                .as_deref()
                .and_then(|b| std::str::from_utf8(b).ok())
                .ok_or_else(|| DetectorError::validation("request has no JSON body"))?;
            let mut parsed: Value = serde_json::from_str(body)
                .map_err(|e| DetectorError::validation(format!("body is not JSON: {}", e)))?;
            let changed = match new_value {
                Some(value) => json_set(&mut parsed, path, value.clone()),
                None => json_delete(&mut parsed, path),
            };
            if !changed {
                return Err(DetectorError::validation(format!(
                    "body path '{}' not found",
                    path
                )));
            }
            prepared.body = Some(serde_json::to_vec(&parsed)?);
        }
        TargetSite::FormField { name } => {
            let body = prepared
                .body
                .as_deref()
                .and_then(|b| std::str::from_utf8(b).ok())
                .ok_or_else(|| DetectorError::validation("request has no form body"))?;
            let replacement = new_value.map(value_as_string);
            prepared.body = Some(
                rebuild_form_body(body, name, replacement.as_deref(), duplicate).into_bytes(),
            );
        }
        TargetSite::Envelope => {
            return Err(DetectorError::validation(
                "envelope sites have no point mutation",
            ))
        }
    }
    Ok(())
}

/// Materialize a mutated request from (baseline + mutation). Sequence
/// mutations are resolved by the replayer against the whole flow and are
/// rejected here.
pub fn materialize(
    request: &RecordedRequest,
    mutation: &Mutation,
    identity_pool: &[Identity],
) -> DetectorResult<PreparedRequest> {
    let mut prepared = PreparedRequest::baseline(request);

    match mutation {
        Mutation::SetValue { site, value } => {
            apply_to_site(&mut prepared, site, Some(value), false)?
        }
        Mutation::Delete { site } => apply_to_site(&mut prepared, site, None, false)?,
        Mutation::Duplicate { site } => {
            // Duplicate re-appends the current value
            let current = current_value(request, site).ok_or_else(|| {
                DetectorError::validation(format!("{} not present", site.describe()))
            })?;
            apply_to_site(&mut prepared, site, Some(&current), true)?
        }
        Mutation::TypeCoerce { site, target } => {
            let current = current_value(request, site).ok_or_else(|| {
                DetectorError::validation(format!("{} not present", site.describe()))
            })?;
            let coerced = coerce_value(&current, *target);
            apply_to_site(&mut prepared, site, Some(&coerced), false)?
        }
        Mutation::TokenTamper {
            header,
            claim,
            value,
        } => {
            let raw = request.header(header).ok_or_else(|| {
                DetectorError::validation(format!("header '{}' not present", header))
            })?;
            let tampered = tamper_token(raw, claim, value)?;
            set_header(&mut prepared.headers, header, tampered);
        }
        Mutation::SubstituteIdentity { identity } => {
            let found = identity_pool
                .iter()
                .find(|i| i.name == *identity)
                .ok_or_else(|| {
                    DetectorError::validation(format!(
                        "identity '{}' not in the flow's identity pool",
                        identity
                    ))
                })?;
            remove_header(&mut prepared.headers, "Authorization");
            remove_header(&mut prepared.headers, "Cookie");
            for (name, value) in &found.headers {
                set_header(&mut prepared.headers, name, value.clone());
            }
            if !found.cookies.is_empty() {
                let cookie = found
                    .cookies
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect::<Vec<_>>()
                    .join("; ");
                set_header(&mut prepared.headers, "Cookie", cookie);
            }
        }
        Mutation::Sequence { .. } => {
            return Err(DetectorError::validation(
                "sequence mutations require whole-flow replay context",
            ))
        }
    }

    Ok(prepared)
}

/// Current value at a site, used for duplication and coercion
pub fn current_value(request: &RecordedRequest, site: &TargetSite) -> Option<Value> {
    match site {
        TargetSite::PathSegment { index } => {
            let url = Url::parse(&request.url).ok()?;
            url.path_segments()?
                .nth(*index)
                .map(|s| Value::String(s.to_string()))
        }
        TargetSite::QueryParam { name } => {
            let url = Url::parse(&request.url).ok()?;
            url.query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| Value::String(v.to_string()))
        }
        TargetSite::Header { name } => request
            .header(name)
            .map(|v| Value::String(v.to_string())),
        TargetSite::JsonPath { path } => {
            let body = body_str(request)?;
            let parsed: Value = serde_json::from_str(body).ok()?;
            let mut scalars = Vec::new();
            walk_scalars(&parsed, String::new(), &mut scalars);
            scalars
                .into_iter()
                .find(|(p, _)| p == path)
                .map(|(_, v)| v)
        }
        TargetSite::FormField { name } => {
            let body = body_str(request)?;
            form_urlencoded::parse(body.as_bytes())
                .find(|(k, _)| k == name)
                .map(|(_, v)| Value::String(v.to_string()))
        }
        TargetSite::Envelope => None,
    }
}
