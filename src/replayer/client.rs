// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Replay HTTP Client
 * Sends materialized requests with replay-fidelity semantics
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use reqwest::Client;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::errors::{DetectorError, DetectorResult};
use crate::types::PreparedRequest;

/// Outcome of one replayed request. HTTP statuses of any class are data,
/// never errors.
#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub response_time_ms: i64,
}

/// Thin reqwest wrapper tuned for replay: redirects are not followed (a
/// 3xx is a measurement), each request carries its own deadline, and
/// bodies are captured as raw bytes.
#[derive(Clone)]
pub struct ReplayClient {
    client: Client,
    timeout: Duration,
    max_body_bytes: usize,
}

impl ReplayClient {
    pub fn new(timeout: Duration, max_body_bytes: usize) -> DetectorResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(8)
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| DetectorError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            timeout,
            max_body_bytes,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Execute a prepared request. Transport failures map to the detector
    /// taxonomy; timeouts carry the configured deadline.
    pub async fn execute(&self, prepared: &PreparedRequest) -> DetectorResult<ReplayOutcome> {
        let method = reqwest::Method::from_bytes(prepared.method.as_bytes())
            .map_err(|_| DetectorError::validation(format!("invalid method {}", prepared.method)))?;

        let mut builder = self.client.request(method, &prepared.url);
        for (name, value) in &prepared.headers {
            // Hop-by-hop and length headers are recomputed by the client
            if name.eq_ignore_ascii_case("host")
                || name.eq_ignore_ascii_case("content-length")
                || name.eq_ignore_ascii_case("connection")
            {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &prepared.body {
            builder = builder.body(body.clone());
        }

        let start = Instant::now();
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                DetectorError::Timeout {
                    duration: self.timeout,
                }
            } else {
                DetectorError::Network {
                    url: prepared.url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|value| (k.as_str().to_string(), value.to_string()))
            })
            .collect();

        let mut body = response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .unwrap_or_default();
        if body.len() > self.max_body_bytes {
            body.truncate(self.max_body_bytes);
        }

        let response_time_ms = start.elapsed().as_millis() as i64;
        debug!(
            url = %prepared.url,
            status,
            response_time_ms,
            bytes = body.len(),
            "request replayed"
        );

        Ok(ReplayOutcome {
            status,
            headers,
            body,
            response_time_ms,
        })
    }
}
