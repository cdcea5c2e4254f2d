// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Flow Replay Context
 * Snapshot-able cookie state threaded through a flow transcript
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use moka::future::Cache;
use std::collections::HashMap;
use std::time::Duration;

use crate::types::PreparedRequest;

/// Client state accumulated while replaying a flow prefix. Cookies are
/// tracked explicitly rather than in an opaque jar so the context can be
/// cloned and cached per prefix.
#[derive(Debug, Clone, Default)]
pub struct FlowContext {
    cookies: HashMap<String, String>,
}

impl FlowContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb Set-Cookie material from a response's headers
    pub fn absorb(&mut self, headers: &HashMap<String, String>) {
        for (name, value) in headers {
            if !name.eq_ignore_ascii_case("set-cookie") {
                continue;
            }
            // "name=value; Path=/; HttpOnly" -> first attribute is the pair
            let Some(pair) = value.split(';').next() else {
                continue;
            };
            if let Some((cookie_name, cookie_value)) = pair.split_once('=') {
                self.cookies.insert(
                    cookie_name.trim().to_string(),
                    cookie_value.trim().to_string(),
                );
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Merge the context's cookies into a prepared request. Context
    /// cookies win over recorded ones of the same name; recorded cookies
    /// the transcript never touched are preserved.
    pub fn apply(&self, prepared: &mut PreparedRequest) {
        if self.cookies.is_empty() {
            return;
        }

        let mut merged: Vec<(String, String)> = Vec::new();
        if let Some((_, existing)) = prepared
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("cookie"))
        {
            for pair in existing.split(';') {
                if let Some((name, value)) = pair.split_once('=') {
                    merged.push((name.trim().to_string(), value.trim().to_string()));
                }
            }
        }
        for (name, value) in &self.cookies {
            match merged.iter_mut().find(|(n, _)| n == name) {
                Some((_, existing)) => *existing = value.clone(),
                None => merged.push((name.clone(), value.clone())),
            }
        }

        let header = merged
            .iter()
            .map(|(n, v)| format!("{}={}", n, v))
            .collect::<Vec<_>>()
            .join("; ");

        prepared
            .headers
            .retain(|(k, _)| !k.eq_ignore_ascii_case("cookie"));
        prepared.headers.push(("Cookie".to_string(), header));
    }
}

/// Cache of prefix contexts. A hit replaces re-running the baseline
/// prefix under a mutant; a miss is always safe to rebuild.
pub type PrefixCache = Cache<String, FlowContext>;

pub fn new_prefix_cache() -> PrefixCache {
    Cache::builder()
        .max_capacity(4096)
        .time_to_live(Duration::from_secs(600))
        .build()
}

/// Cache key: the context captured immediately before `ordinal` ran,
/// under one flow and catalog version
pub fn prefix_key(flow_id: i64, ordinal: i64, catalog_version: &str) -> String {
    format!("{}:{}:{}", flow_id, ordinal, catalog_version)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_headers(set_cookie: &str) -> HashMap<String, String> {
        [("Set-Cookie".to_string(), set_cookie.to_string())]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_absorbs_set_cookie_attributes() {
        let mut context = FlowContext::new();
        context.absorb(&response_headers("session=abc123; Path=/; HttpOnly"));
        assert!(!context.is_empty());

        let mut prepared = PreparedRequest {
            method: "GET".to_string(),
            url: "https://shop.example.com/cart".to_string(),
            headers: vec![],
            body: None,
        };
        context.apply(&mut prepared);
        let cookie = prepared
            .headers
            .iter()
            .find(|(k, _)| k == "Cookie")
            .map(|(_, v)| v.clone())
            .unwrap();
        assert_eq!(cookie, "session=abc123");
    }

    #[test]
    fn test_context_cookies_override_recorded_ones() {
        let mut context = FlowContext::new();
        context.absorb(&response_headers("session=fresh"));

        let mut prepared = PreparedRequest {
            method: "GET".to_string(),
            url: "https://shop.example.com/cart".to_string(),
            headers: vec![("Cookie".to_string(), "session=stale; theme=dark".to_string())],
            body: None,
        };
        context.apply(&mut prepared);
        let cookie = prepared
            .headers
            .iter()
            .find(|(k, _)| k == "Cookie")
            .map(|(_, v)| v.clone())
            .unwrap();
        assert!(cookie.contains("session=fresh"));
        assert!(cookie.contains("theme=dark"));
        assert!(!cookie.contains("session=stale"));
    }

    #[test]
    fn test_empty_context_leaves_request_untouched() {
        let context = FlowContext::new();
        let mut prepared = PreparedRequest {
            method: "GET".to_string(),
            url: "https://shop.example.com/".to_string(),
            headers: vec![],
            body: None,
        };
        context.apply(&mut prepared);
        assert!(prepared.headers.is_empty());
    }

    #[test]
    fn test_prefix_key_includes_catalog_version() {
        assert_ne!(prefix_key(1, 2, "2026.1"), prefix_key(1, 2, "2026.2"));
        assert_ne!(prefix_key(1, 2, "2026.1"), prefix_key(1, 3, "2026.1"));
    }
}
