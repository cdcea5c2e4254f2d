// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Detector Configuration
 * Process-wide configuration with validation and environment overrides
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AppConfig {
    /// host:port the control plane listens on
    pub listen_addr: String,

    /// Driver + DSN, e.g. "sqlite://ansa.db" or "postgres://..."
    pub database_url: String,

    /// Replay worker pool size
    #[validate(range(min = 1, max = 100))]
    pub max_concurrent_requests: usize,

    /// Token-bucket refill rate per execution
    #[validate(range(min = 1, max = 1000))]
    pub default_rate_limit_rps: u32,

    /// Per-request deadline
    #[validate(range(min = 1, max = 300))]
    pub request_timeout_s: u64,

    /// Transport-error retries per request (statuses are never retried)
    #[validate(range(min = 0, max = 10))]
    pub retry_attempts: u32,

    /// Execution aborts when failed/total exceeds this percentage
    #[validate(range(min = 0.0, max = 100.0))]
    pub failure_threshold_pct: f64,

    /// Default confidence gate for is_potential_vulnerability
    #[validate(range(min = 0.0, max = 1.0))]
    pub confidence_threshold_default: f64,

    /// Captured and replayed bodies are truncated beyond this size
    #[validate(range(min = 1024))]
    pub max_body_bytes: usize,

    #[validate(range(min = 1, max = 365))]
    pub report_retention_days: u32,

    /// Exact origins allowed by CORS; empty list allows any origin
    pub cors_allowed_origins: Vec<String>,

    /// Fixed delay between consecutive replayed requests
    #[validate(range(max = 10_000))]
    pub request_delay_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:5002".to_string(),
            database_url: "sqlite://ansa.db".to_string(),
            max_concurrent_requests: 5,
            default_rate_limit_rps: 10,
            request_timeout_s: 30,
            retry_attempts: 2,
            failure_threshold_pct: 10.0,
            confidence_threshold_default: 0.7,
            max_body_bytes: 1024 * 1024,
            report_retention_days: 30,
            cors_allowed_origins: Vec::new(),
            request_delay_ms: 100,
        }
    }
}

impl AppConfig {
    /// Load configuration: defaults, then optional YAML file, then
    /// environment overrides, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("failed to read config file {}", p.display()))?;
                serde_yaml::from_str(&raw)
                    .with_context(|| format!("failed to parse config file {}", p.display()))?
            }
            None => AppConfig::default(),
        };

        config.apply_env_overrides();
        config
            .validate()
            .context("configuration failed validation")?;

        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("ANSA_LISTEN_ADDR") {
            self.listen_addr = addr;
        }
        if let Ok(url) = std::env::var("ANSA_DATABASE_URL") {
            self.database_url = url;
        }
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_s)
    }

    pub fn request_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.request_delay_ms)
    }

    /// Failure threshold as a ratio in [0,1]
    pub fn failure_threshold(&self) -> f64 {
        self.failure_threshold_pct / 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_concurrent_requests, 5);
        assert!((config.failure_threshold() - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let config = AppConfig {
            confidence_threshold_default: 1.5,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());

        let config = AppConfig {
            max_concurrent_requests: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: AppConfig =
            serde_yaml::from_str("max_concurrent_requests: 8\nrequest_timeout_s: 10\n").unwrap();
        assert_eq!(config.max_concurrent_requests, 8);
        assert_eq!(config.request_timeout_s, 10);
        assert_eq!(config.default_rate_limit_rps, 10);
        assert_eq!(config.listen_addr, "127.0.0.1:5002");
    }
}
