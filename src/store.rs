// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Relational Store
 * Canonical graph of flows, requests, test cases, responses and anomalies
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::future::Future;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::errors::{DetectorError, DetectorResult};
use crate::types::{
    Anomaly, AnomalyStatus, CapturedExchange, CreateFlow, ExecutionState, Flow, Identity,
    Mutation, MutationCategory, NewAnomaly, NewResponse, NewTestCase, OwnerKind, RecordedRequest,
    ResponseErrorKind, Severity, StoredResponse, TestCase, UpdateFlow, VulnerabilityType,
};

/// Hard cap on page size for list endpoints
pub const MAX_PER_PAGE: u32 = 100;

/// Pagination input, sanitized before use
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub page: u32,
    pub per_page: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 20,
        }
    }
}

impl Page {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self { page, per_page }
    }

    /// Clamped (limit, offset) for SQL
    pub fn limits(&self) -> (i64, i64) {
        let per_page = self.per_page.clamp(1, MAX_PER_PAGE) as i64;
        let page = self.page.max(1) as i64;
        (per_page, (page - 1) * per_page)
    }
}

/// One page of results plus the unfiltered total
#[derive(Debug, Clone)]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}

/// Relational store over a single pool. SQLite is the default driver; the
/// query shapes ($n placeholders, no driver-specific SQL) stay portable to
/// a PostgreSQL-compatible backend.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    max_body_bytes: usize,
}

/// Retry a failed write once before surfacing kind=storage
async fn retry_once<T, F, Fut>(operation: &'static str, mut op: F) -> DetectorResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(first) => {
            debug!(operation, error = %first, "store write failed, retrying once");
            op().await.map_err(|second| {
                warn!(operation, error = %second, "store write failed after retry");
                DetectorError::Storage(second.to_string())
            })
        }
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

fn decode_timestamp(raw: &str, column: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: Box::new(e),
        })
}

fn decode_json<T: DeserializeOwned>(raw: &str, column: &str) -> Result<T, sqlx::Error> {
    serde_json::from_str(raw).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

/// Decode a serde-renamed enum stored as its string form
fn decode_enum<T: DeserializeOwned>(raw: &str, column: &str) -> Result<T, sqlx::Error> {
    serde_json::from_value(serde_json::Value::String(raw.to_string())).map_err(|e| {
        sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: Box::new(e),
        }
    })
}

fn enum_str<T: serde::Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        _ => String::new(),
    }
}

impl sqlx::FromRow<'_, SqliteRow> for Flow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let identity_pool: String = row.try_get("identity_pool")?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;
        Ok(Flow {
            flow_id: row.try_get("flow_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            target_domain: row.try_get("target_domain")?,
            identity_pool: decode_json(&identity_pool, "identity_pool")?,
            created_at: decode_timestamp(&created_at, "created_at")?,
            updated_at: decode_timestamp(&updated_at, "updated_at")?,
        })
    }
}

impl sqlx::FromRow<'_, SqliteRow> for RecordedRequest {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let headers: String = row.try_get("headers")?;
        let captured_headers: String = row.try_get("captured_headers")?;
        let recorded_at: String = row.try_get("recorded_at")?;
        let captured_status: i64 = row.try_get("captured_status")?;
        Ok(RecordedRequest {
            request_id: row.try_get("request_id")?,
            flow_id: row.try_get("flow_id")?,
            ordinal: row.try_get("ordinal")?,
            method: row.try_get("method")?,
            url: row.try_get("url")?,
            headers: decode_json(&headers, "headers")?,
            body: row.try_get("body")?,
            captured_status: captured_status as u16,
            captured_headers: decode_json(&captured_headers, "captured_headers")?,
            captured_body: row.try_get("captured_body")?,
            recorded_at: decode_timestamp(&recorded_at, "recorded_at")?,
        })
    }
}

impl sqlx::FromRow<'_, SqliteRow> for TestCase {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let category: String = row.try_get("category")?;
        let mutation: String = row.try_get("mutation")?;
        let created_at: String = row.try_get("created_at")?;
        Ok(TestCase {
            test_case_id: row.try_get("test_case_id")?,
            flow_id: row.try_get("flow_id")?,
            request_id: row.try_get("request_id")?,
            category: decode_enum::<MutationCategory>(&category, "category")?,
            rule_id: row.try_get("rule_id")?,
            description: row.try_get("description")?,
            mutation: decode_json::<Mutation>(&mutation, "mutation")?,
            catalog_version: row.try_get("catalog_version")?,
            created_at: decode_timestamp(&created_at, "created_at")?,
        })
    }
}

impl sqlx::FromRow<'_, SqliteRow> for StoredResponse {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let owner_kind: String = row.try_get("owner_kind")?;
        let headers: String = row.try_get("headers")?;
        let captured_at: String = row.try_get("captured_at")?;
        let status: Option<i64> = row.try_get("status")?;
        let error_kind: Option<String> = row.try_get("error_kind")?;
        Ok(StoredResponse {
            response_id: row.try_get("response_id")?,
            owner_kind: decode_enum::<OwnerKind>(&owner_kind, "owner_kind")?,
            owner_id: row.try_get("owner_id")?,
            execution_id: row.try_get("execution_id")?,
            status: status.map(|s| s as u16),
            headers: decode_json(&headers, "headers")?,
            body: row.try_get("body")?,
            content_length: row.try_get("content_length")?,
            response_time_ms: row.try_get("response_time_ms")?,
            error_kind: error_kind
                .map(|k| decode_enum::<ResponseErrorKind>(&k, "error_kind"))
                .transpose()?,
            captured_at: decode_timestamp(&captured_at, "captured_at")?,
        })
    }
}

impl sqlx::FromRow<'_, SqliteRow> for Anomaly {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let severity: String = row.try_get("severity")?;
        let vulnerability_type: String = row.try_get("vulnerability_type")?;
        let status: String = row.try_get("status")?;
        let created_at: String = row.try_get("created_at")?;
        let original_status: Option<i64> = row.try_get("original_status")?;
        let replayed_status: Option<i64> = row.try_get("replayed_status")?;
        let is_vuln: i64 = row.try_get("is_potential_vulnerability")?;
        Ok(Anomaly {
            anomaly_id: row.try_get("anomaly_id")?,
            flow_id: row.try_get("flow_id")?,
            test_case_id: row.try_get("test_case_id")?,
            detector: row.try_get("detector")?,
            severity: decode_enum::<Severity>(&severity, "severity")?,
            confidence: row.try_get("confidence")?,
            is_potential_vulnerability: is_vuln != 0,
            vulnerability_type: decode_enum::<VulnerabilityType>(
                &vulnerability_type,
                "vulnerability_type",
            )?,
            original_status: original_status.map(|s| s as u16),
            replayed_status: replayed_status.map(|s| s as u16),
            original_content_length: row.try_get("original_content_length")?,
            replayed_content_length: row.try_get("replayed_content_length")?,
            description: row.try_get("description")?,
            status: decode_enum::<AnomalyStatus>(&status, "status")?,
            catalog_version: row.try_get("catalog_version")?,
            created_at: decode_timestamp(&created_at, "created_at")?,
        })
    }
}

impl sqlx::FromRow<'_, SqliteRow> for ExecutionState {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        let started_at: String = row.try_get("started_at")?;
        let finished_at: Option<String> = row.try_get("finished_at")?;
        let total: i64 = row.try_get("total")?;
        let done: i64 = row.try_get("done")?;
        Ok(ExecutionState {
            execution_id: row.try_get("execution_id")?,
            flow_id: row.try_get("flow_id")?,
            started_at: decode_timestamp(&started_at, "started_at")?,
            finished_at: finished_at
                .map(|ts| decode_timestamp(&ts, "finished_at"))
                .transpose()?,
            total,
            done,
            failed: row.try_get("failed")?,
            remaining: (total - done).max(0),
            status: decode_enum::<crate::types::ExecutionStatus>(&status, "status")?,
        })
    }
}

impl Store {
    /// Open the pool. In-memory SQLite is clamped to one connection so
    /// every handle sees the same database.
    pub async fn connect(database_url: &str, max_body_bytes: usize) -> DetectorResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| DetectorError::Storage(format!("invalid database url: {}", e)))?
            .create_if_missing(true)
            .foreign_keys(true);

        let max_connections = if database_url.contains(":memory:") {
            1
        } else {
            5
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| DetectorError::Storage(format!("failed to open database: {}", e)))?;

        info!(database_url, "store connected");

        Ok(Self {
            pool,
            max_body_bytes,
        })
    }

    pub async fn init_schema(&self) -> DetectorResult<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS flows (
                flow_id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                description TEXT,
                target_domain TEXT,
                identity_pool TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS requests (
                request_id INTEGER PRIMARY KEY AUTOINCREMENT,
                flow_id INTEGER NOT NULL REFERENCES flows(flow_id) ON DELETE CASCADE,
                ordinal INTEGER NOT NULL,
                method TEXT NOT NULL,
                url TEXT NOT NULL,
                headers TEXT NOT NULL,
                body BLOB,
                captured_status INTEGER NOT NULL,
                captured_headers TEXT NOT NULL,
                captured_body BLOB,
                recorded_at TEXT NOT NULL,
                UNIQUE (flow_id, ordinal)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS test_cases (
                test_case_id INTEGER PRIMARY KEY AUTOINCREMENT,
                flow_id INTEGER NOT NULL REFERENCES flows(flow_id) ON DELETE CASCADE,
                request_id INTEGER NOT NULL REFERENCES requests(request_id) ON DELETE CASCADE,
                category TEXT NOT NULL,
                rule_id TEXT NOT NULL,
                description TEXT NOT NULL,
                mutation TEXT NOT NULL,
                catalog_version TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (request_id, mutation)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS responses (
                response_id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_kind TEXT NOT NULL,
                owner_id INTEGER NOT NULL,
                execution_id TEXT NOT NULL,
                status INTEGER,
                headers TEXT NOT NULL,
                body BLOB NOT NULL,
                content_length INTEGER NOT NULL,
                response_time_ms INTEGER NOT NULL,
                error_kind TEXT,
                captured_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS anomalies (
                anomaly_id INTEGER PRIMARY KEY AUTOINCREMENT,
                flow_id INTEGER NOT NULL REFERENCES flows(flow_id) ON DELETE CASCADE,
                test_case_id INTEGER NOT NULL REFERENCES test_cases(test_case_id) ON DELETE CASCADE,
                detector TEXT NOT NULL,
                severity TEXT NOT NULL,
                confidence REAL NOT NULL,
                is_potential_vulnerability INTEGER NOT NULL,
                vulnerability_type TEXT NOT NULL,
                original_status INTEGER,
                replayed_status INTEGER,
                original_content_length INTEGER,
                replayed_content_length INTEGER,
                description TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'new',
                catalog_version TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                execution_id TEXT PRIMARY KEY,
                flow_id INTEGER NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                total INTEGER NOT NULL,
                done INTEGER NOT NULL,
                failed INTEGER NOT NULL,
                status TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_requests_flow ON requests(flow_id)",
            "CREATE INDEX IF NOT EXISTS idx_test_cases_flow ON test_cases(flow_id)",
            "CREATE INDEX IF NOT EXISTS idx_test_cases_request ON test_cases(request_id)",
            "CREATE INDEX IF NOT EXISTS idx_responses_owner ON responses(owner_kind, owner_id)",
            "CREATE INDEX IF NOT EXISTS idx_responses_execution ON responses(execution_id)",
            "CREATE INDEX IF NOT EXISTS idx_anomalies_flow ON anomalies(flow_id)",
            "CREATE INDEX IF NOT EXISTS idx_anomalies_test_case ON anomalies(test_case_id)",
            "CREATE INDEX IF NOT EXISTS idx_executions_flow ON executions(flow_id)",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        info!("store schema initialized");
        Ok(())
    }

    fn truncate(&self, body: Option<Vec<u8>>) -> Option<Vec<u8>> {
        body.map(|mut b| {
            if b.len() > self.max_body_bytes {
                b.truncate(self.max_body_bytes);
            }
            b
        })
    }

    // --- flows ----------------------------------------------------------

    pub async fn create_flow(&self, input: &CreateFlow) -> DetectorResult<Flow> {
        if input.name.trim().is_empty() {
            return Err(DetectorError::validation("flow name must not be empty"));
        }
        let identity_pool = serde_json::to_string(&input.identity_pool)?;
        let now = now_rfc3339();
        let (identity_pool, now) = (identity_pool.as_str(), now.as_str());

        let flow_id = retry_once("create_flow", || async move {
            let result = sqlx::query(
                "INSERT INTO flows (name, description, target_domain, identity_pool, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(&input.name)
            .bind(&input.description)
            .bind(&input.target_domain)
            .bind(identity_pool)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;
            Ok(result.last_insert_rowid())
        })
        .await?;

        self.get_flow(flow_id).await
    }

    pub async fn get_flow(&self, flow_id: i64) -> DetectorResult<Flow> {
        sqlx::query_as::<_, Flow>("SELECT * FROM flows WHERE flow_id = $1")
            .bind(flow_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DetectorError::not_found("flow", flow_id))
    }

    pub async fn list_flows(
        &self,
        page: Page,
        search: Option<&str>,
        sort: Option<&str>,
    ) -> DetectorResult<PagedResult<Flow>> {
        let (limit, offset) = page.limits();
        let pattern = search.map(|s| format!("%{}%", s));
        // Sort keys are whitelisted, never interpolated from raw input
        let order = match sort {
            Some("name") => "name ASC",
            Some("created_at") | None => "created_at DESC",
            Some(other) => {
                return Err(DetectorError::validation(format!(
                    "unsupported sort key: {}",
                    other
                )))
            }
        };

        let (items, total) = match &pattern {
            Some(p) => {
                let items = sqlx::query_as::<_, Flow>(&format!(
                    "SELECT * FROM flows WHERE name LIKE $1 OR target_domain LIKE $1 \
                     ORDER BY {} LIMIT $2 OFFSET $3",
                    order
                ))
                .bind(p)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?;
                let total: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM flows WHERE name LIKE $1 OR target_domain LIKE $1",
                )
                .bind(p)
                .fetch_one(&self.pool)
                .await?;
                (items, total)
            }
            None => {
                let items = sqlx::query_as::<_, Flow>(&format!(
                    "SELECT * FROM flows ORDER BY {} LIMIT $1 OFFSET $2",
                    order
                ))
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?;
                let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM flows")
                    .fetch_one(&self.pool)
                    .await?;
                (items, total)
            }
        };

        Ok(PagedResult {
            items,
            total,
            page: page.page.max(1),
            per_page: page.per_page.clamp(1, MAX_PER_PAGE),
        })
    }

    pub async fn update_flow(&self, flow_id: i64, update: &UpdateFlow) -> DetectorResult<Flow> {
        let current = self.get_flow(flow_id).await?;
        let name = update.name.clone().unwrap_or(current.name);
        if name.trim().is_empty() {
            return Err(DetectorError::validation("flow name must not be empty"));
        }
        let description = update.description.clone().or(current.description);
        let target_domain = update.target_domain.clone().or(current.target_domain);
        let now = now_rfc3339();
        let (name, description, target_domain, now) =
            (name.as_str(), &description, &target_domain, now.as_str());

        retry_once("update_flow", || async move {
            sqlx::query(
                "UPDATE flows SET name = $1, description = $2, target_domain = $3, updated_at = $4 \
                 WHERE flow_id = $5",
            )
            .bind(name)
            .bind(description)
            .bind(target_domain)
            .bind(now)
            .bind(flow_id)
            .execute(&self.pool)
            .await
        })
        .await?;

        self.get_flow(flow_id).await
    }

    pub async fn set_identity_pool(
        &self,
        flow_id: i64,
        pool: &[Identity],
    ) -> DetectorResult<Flow> {
        self.get_flow(flow_id).await?;
        let encoded = serde_json::to_string(pool)?;
        let now = now_rfc3339();
        let (encoded, now) = (encoded.as_str(), now.as_str());

        retry_once("set_identity_pool", || async move {
            sqlx::query("UPDATE flows SET identity_pool = $1, updated_at = $2 WHERE flow_id = $3")
                .bind(encoded)
                .bind(now)
                .bind(flow_id)
                .execute(&self.pool)
                .await
        })
        .await?;

        self.get_flow(flow_id).await
    }

    /// Delete a flow and every owned entity. Responses reference their
    /// owners polymorphically, so they are removed explicitly in the same
    /// transaction the FK cascade runs in.
    pub async fn delete_flow(&self, flow_id: i64) -> DetectorResult<()> {
        self.get_flow(flow_id).await?;

        retry_once("delete_flow", || async move {
            let mut tx = self.pool.begin().await?;
            sqlx::query(
                "DELETE FROM responses WHERE \
                 (owner_kind = 'baseline' AND owner_id IN \
                    (SELECT request_id FROM requests WHERE flow_id = $1)) OR \
                 (owner_kind = 'mutant' AND owner_id IN \
                    (SELECT test_case_id FROM test_cases WHERE flow_id = $1))",
            )
            .bind(flow_id)
            .execute(&mut *tx)
            .await?;
            sqlx::query("DELETE FROM executions WHERE flow_id = $1")
                .bind(flow_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM flows WHERE flow_id = $1")
                .bind(flow_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await
        })
        .await?;

        info!(flow_id, "flow deleted with cascade");
        Ok(())
    }

    // --- requests -------------------------------------------------------

    pub async fn add_request(
        &self,
        flow_id: i64,
        exchange: &CapturedExchange,
    ) -> DetectorResult<RecordedRequest> {
        if !(100..=599).contains(&exchange.captured_status) {
            return Err(DetectorError::validation(format!(
                "captured_status {} outside [100, 599]",
                exchange.captured_status
            )));
        }
        if exchange.method.trim().is_empty() || exchange.url.trim().is_empty() {
            return Err(DetectorError::validation("method and url are required"));
        }
        self.get_flow(flow_id).await?;

        let headers = serde_json::to_string(&exchange.headers)?;
        let captured_headers = serde_json::to_string(&exchange.captured_headers)?;
        let body = self.truncate(exchange.body.clone());
        let captured_body = self.truncate(exchange.captured_body.clone());
        let now = now_rfc3339();
        let (headers, captured_headers, now) =
            (headers.as_str(), captured_headers.as_str(), now.as_str());
        let (body, captured_body) = (&body, &captured_body);

        let request_id = retry_once("add_request", || async move {
            // Ordinal assignment and insert share one transaction; the
            // per-flow write serialization makes the max() read safe.
            let mut tx = self.pool.begin().await?;
            let next_ordinal: i64 = sqlx::query_scalar(
                "SELECT COALESCE(MAX(ordinal), 0) + 1 FROM requests WHERE flow_id = $1",
            )
            .bind(flow_id)
            .fetch_one(&mut *tx)
            .await?;

            let result = sqlx::query(
                "INSERT INTO requests (flow_id, ordinal, method, url, headers, body, \
                 captured_status, captured_headers, captured_body, recorded_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(flow_id)
            .bind(next_ordinal)
            .bind(&exchange.method)
            .bind(&exchange.url)
            .bind(headers)
            .bind(body)
            .bind(exchange.captured_status as i64)
            .bind(captured_headers)
            .bind(captured_body)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            let id = result.last_insert_rowid();
            tx.commit().await?;
            Ok(id)
        })
        .await?;

        self.get_request(request_id).await
    }

    pub async fn get_request(&self, request_id: i64) -> DetectorResult<RecordedRequest> {
        sqlx::query_as::<_, RecordedRequest>("SELECT * FROM requests WHERE request_id = $1")
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DetectorError::not_found("request", request_id))
    }

    pub async fn list_requests(
        &self,
        flow_id: i64,
        page: Page,
    ) -> DetectorResult<PagedResult<RecordedRequest>> {
        self.get_flow(flow_id).await?;
        let (limit, offset) = page.limits();
        let items = sqlx::query_as::<_, RecordedRequest>(
            "SELECT * FROM requests WHERE flow_id = $1 ORDER BY ordinal ASC LIMIT $2 OFFSET $3",
        )
        .bind(flow_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let total = self.count_requests(flow_id).await?;
        Ok(PagedResult {
            items,
            total,
            page: page.page.max(1),
            per_page: page.per_page.clamp(1, MAX_PER_PAGE),
        })
    }

    /// All baseline requests in capture order
    pub async fn flow_requests_in_order(
        &self,
        flow_id: i64,
    ) -> DetectorResult<Vec<RecordedRequest>> {
        Ok(sqlx::query_as::<_, RecordedRequest>(
            "SELECT * FROM requests WHERE flow_id = $1 ORDER BY ordinal ASC",
        )
        .bind(flow_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn count_requests(&self, flow_id: i64) -> DetectorResult<i64> {
        Ok(
            sqlx::query_scalar("SELECT COUNT(*) FROM requests WHERE flow_id = $1")
                .bind(flow_id)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    // --- test cases -----------------------------------------------------

    /// Insert a generated test case. Returns None when an identical
    /// mutation already exists for the request (idempotent re-generation).
    pub async fn insert_test_case(&self, new: &NewTestCase) -> DetectorResult<Option<TestCase>> {
        let mutation = new.mutation.canonical_json();
        let category = new.category.as_str();
        let now = now_rfc3339();
        let (mutation, now) = (mutation.as_str(), now.as_str());

        let inserted = retry_once("insert_test_case", || async move {
            let result = sqlx::query(
                "INSERT INTO test_cases (flow_id, request_id, category, rule_id, description, \
                 mutation, catalog_version, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
                 ON CONFLICT (request_id, mutation) DO NOTHING",
            )
            .bind(new.flow_id)
            .bind(new.request_id)
            .bind(category)
            .bind(&new.rule_id)
            .bind(&new.description)
            .bind(mutation)
            .bind(&new.catalog_version)
            .bind(now)
            .execute(&self.pool)
            .await?;
            Ok((result.rows_affected(), result.last_insert_rowid()))
        })
        .await?;

        match inserted {
            (0, _) => Ok(None),
            (_, id) => Ok(Some(self.get_test_case(id).await?)),
        }
    }

    pub async fn get_test_case(&self, test_case_id: i64) -> DetectorResult<TestCase> {
        sqlx::query_as::<_, TestCase>("SELECT * FROM test_cases WHERE test_case_id = $1")
            .bind(test_case_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DetectorError::not_found("test case", test_case_id))
    }

    pub async fn list_test_cases(
        &self,
        flow_id: i64,
        page: Page,
    ) -> DetectorResult<PagedResult<TestCase>> {
        self.get_flow(flow_id).await?;
        let (limit, offset) = page.limits();
        let items = sqlx::query_as::<_, TestCase>(
            "SELECT * FROM test_cases WHERE flow_id = $1 ORDER BY test_case_id ASC \
             LIMIT $2 OFFSET $3",
        )
        .bind(flow_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let total = self.count_test_cases(flow_id).await?;
        Ok(PagedResult {
            items,
            total,
            page: page.page.max(1),
            per_page: page.per_page.clamp(1, MAX_PER_PAGE),
        })
    }

    pub async fn flow_test_cases(&self, flow_id: i64) -> DetectorResult<Vec<TestCase>> {
        Ok(sqlx::query_as::<_, TestCase>(
            "SELECT * FROM test_cases WHERE flow_id = $1 ORDER BY test_case_id ASC",
        )
        .bind(flow_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn count_test_cases(&self, flow_id: i64) -> DetectorResult<i64> {
        Ok(
            sqlx::query_scalar("SELECT COUNT(*) FROM test_cases WHERE flow_id = $1")
                .bind(flow_id)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    // --- responses ------------------------------------------------------

    pub async fn insert_response(&self, new: &NewResponse) -> DetectorResult<StoredResponse> {
        let headers = serde_json::to_string(&new.headers)?;
        let body = self.truncate(Some(new.body.clone())).unwrap_or_default();
        let content_length = new.body.len() as i64;
        let now = now_rfc3339();
        let (headers, body, now) = (headers.as_str(), body.as_slice(), now.as_str());

        let response_id = retry_once("insert_response", || async move {
            let result = self
                .bind_response_insert(new, headers, body, content_length, now)
                .execute(&self.pool)
                .await?;
            Ok(result.last_insert_rowid())
        })
        .await?;

        self.get_response(response_id).await
    }

    fn bind_response_insert<'q>(
        &self,
        new: &'q NewResponse,
        headers: &'q str,
        body: &'q [u8],
        content_length: i64,
        now: &'q str,
    ) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
        sqlx::query(
            "INSERT INTO responses (owner_kind, owner_id, execution_id, status, headers, body, \
             content_length, response_time_ms, error_kind, captured_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(new.owner_kind.as_str())
        .bind(new.owner_id)
        .bind(&new.execution_id)
        .bind(new.status.map(|s| s as i64))
        .bind(headers)
        .bind(body)
        .bind(content_length)
        .bind(new.response_time_ms)
        .bind(new.error_kind.map(|k| k.as_str()))
        .bind(now)
    }

    pub async fn get_response(&self, response_id: i64) -> DetectorResult<StoredResponse> {
        sqlx::query_as::<_, StoredResponse>("SELECT * FROM responses WHERE response_id = $1")
            .bind(response_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DetectorError::not_found("response", response_id))
    }

    /// Latest response for an owner regardless of execution
    pub async fn latest_response(
        &self,
        owner_kind: OwnerKind,
        owner_id: i64,
    ) -> DetectorResult<Option<StoredResponse>> {
        Ok(sqlx::query_as::<_, StoredResponse>(
            "SELECT * FROM responses WHERE owner_kind = $1 AND owner_id = $2 \
             ORDER BY response_id DESC LIMIT 1",
        )
        .bind(owner_kind.as_str())
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Commit a mutant response together with its anomalies in one
    /// transaction; readers observing the response also observe the
    /// anomalies.
    pub async fn commit_mutant_result(
        &self,
        response: &NewResponse,
        anomalies: &[NewAnomaly],
    ) -> DetectorResult<(StoredResponse, Vec<Anomaly>)> {
        let headers = serde_json::to_string(&response.headers)?;
        let body = self
            .truncate(Some(response.body.clone()))
            .unwrap_or_default();
        let content_length = response.body.len() as i64;
        let now = now_rfc3339();
        let (headers, body, now) = (headers.as_str(), body.as_slice(), now.as_str());

        let (response_id, anomaly_ids) = retry_once("commit_mutant_result", || async move {
            let mut tx = self.pool.begin().await?;
            let result = self
                .bind_response_insert(response, headers, body, content_length, now)
                .execute(&mut *tx)
                .await?;
            let response_id = result.last_insert_rowid();

            let mut anomaly_ids = Vec::with_capacity(anomalies.len());
            for anomaly in anomalies {
                let result = sqlx::query(
                    "INSERT INTO anomalies (flow_id, test_case_id, detector, severity, confidence, \
                     is_potential_vulnerability, vulnerability_type, original_status, replayed_status, \
                     original_content_length, replayed_content_length, description, status, \
                     catalog_version, created_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 'new', $13, $14)",
                )
                .bind(anomaly.flow_id)
                .bind(anomaly.test_case_id)
                .bind(&anomaly.detector)
                .bind(enum_str(&anomaly.severity))
                .bind(anomaly.confidence)
                .bind(anomaly.is_potential_vulnerability as i64)
                .bind(enum_str(&anomaly.vulnerability_type))
                .bind(anomaly.original_status.map(|s| s as i64))
                .bind(anomaly.replayed_status.map(|s| s as i64))
                .bind(anomaly.original_content_length)
                .bind(anomaly.replayed_content_length)
                .bind(&anomaly.description)
                .bind(&anomaly.catalog_version)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                anomaly_ids.push(result.last_insert_rowid());
            }

            tx.commit().await?;
            Ok((response_id, anomaly_ids))
        })
        .await?;

        let stored = self.get_response(response_id).await?;
        let mut stored_anomalies = Vec::with_capacity(anomaly_ids.len());
        for id in anomaly_ids {
            stored_anomalies.push(self.get_anomaly(id).await?);
        }
        Ok((stored, stored_anomalies))
    }

    // --- anomalies ------------------------------------------------------

    pub async fn insert_anomalies(&self, items: &[NewAnomaly]) -> DetectorResult<Vec<Anomaly>> {
        let mut stored = Vec::with_capacity(items.len());
        for anomaly in items {
            let now = now_rfc3339();
            let now = now.as_str();
            let id = retry_once("insert_anomaly", || async move {
                let result = sqlx::query(
                    "INSERT INTO anomalies (flow_id, test_case_id, detector, severity, confidence, \
                     is_potential_vulnerability, vulnerability_type, original_status, replayed_status, \
                     original_content_length, replayed_content_length, description, status, \
                     catalog_version, created_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 'new', $13, $14)",
                )
                .bind(anomaly.flow_id)
                .bind(anomaly.test_case_id)
                .bind(&anomaly.detector)
                .bind(enum_str(&anomaly.severity))
                .bind(anomaly.confidence)
                .bind(anomaly.is_potential_vulnerability as i64)
                .bind(enum_str(&anomaly.vulnerability_type))
                .bind(anomaly.original_status.map(|s| s as i64))
                .bind(anomaly.replayed_status.map(|s| s as i64))
                .bind(anomaly.original_content_length)
                .bind(anomaly.replayed_content_length)
                .bind(&anomaly.description)
                .bind(&anomaly.catalog_version)
                .bind(now)
                .execute(&self.pool)
                .await?;
                Ok(result.last_insert_rowid())
            })
            .await?;
            stored.push(self.get_anomaly(id).await?);
        }
        Ok(stored)
    }

    pub async fn get_anomaly(&self, anomaly_id: i64) -> DetectorResult<Anomaly> {
        sqlx::query_as::<_, Anomaly>("SELECT * FROM anomalies WHERE anomaly_id = $1")
            .bind(anomaly_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DetectorError::not_found("anomaly", anomaly_id))
    }

    /// Anomalies ordered most severe first, ties broken by confidence
    pub async fn list_anomalies(
        &self,
        flow_id: i64,
        page: Page,
    ) -> DetectorResult<PagedResult<Anomaly>> {
        self.get_flow(flow_id).await?;
        let (limit, offset) = page.limits();
        let items = sqlx::query_as::<_, Anomaly>(
            "SELECT * FROM anomalies WHERE flow_id = $1 ORDER BY \
             CASE severity \
               WHEN 'CRITICAL' THEN 0 WHEN 'HIGH' THEN 1 WHEN 'MEDIUM' THEN 2 \
               WHEN 'LOW' THEN 3 ELSE 4 END ASC, \
             confidence DESC, anomaly_id ASC LIMIT $2 OFFSET $3",
        )
        .bind(flow_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let total = self.count_anomalies(flow_id).await?;
        Ok(PagedResult {
            items,
            total,
            page: page.page.max(1),
            per_page: page.per_page.clamp(1, MAX_PER_PAGE),
        })
    }

    pub async fn flow_anomalies(&self, flow_id: i64) -> DetectorResult<Vec<Anomaly>> {
        Ok(sqlx::query_as::<_, Anomaly>(
            "SELECT * FROM anomalies WHERE flow_id = $1 ORDER BY anomaly_id ASC",
        )
        .bind(flow_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn count_anomalies(&self, flow_id: i64) -> DetectorResult<i64> {
        Ok(
            sqlx::query_scalar("SELECT COUNT(*) FROM anomalies WHERE flow_id = $1")
                .bind(flow_id)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    pub async fn set_anomaly_status(
        &self,
        anomaly_id: i64,
        status: AnomalyStatus,
    ) -> DetectorResult<Anomaly> {
        self.get_anomaly(anomaly_id).await?;
        retry_once("set_anomaly_status", || async move {
            sqlx::query("UPDATE anomalies SET status = $1 WHERE anomaly_id = $2")
                .bind(status.as_str())
                .bind(anomaly_id)
                .execute(&self.pool)
                .await
        })
        .await?;
        self.get_anomaly(anomaly_id).await
    }

    /// Remove untriaged anomalies before a re-analysis pass; confirmed and
    /// false-positive verdicts survive.
    pub async fn delete_new_anomalies(&self, flow_id: i64) -> DetectorResult<u64> {
        let result = retry_once("delete_new_anomalies", || async move {
            sqlx::query("DELETE FROM anomalies WHERE flow_id = $1 AND status = 'new'")
                .bind(flow_id)
                .execute(&self.pool)
                .await
        })
        .await?;
        Ok(result.rows_affected())
    }

    // --- executions -----------------------------------------------------

    pub async fn upsert_execution(&self, state: &ExecutionState) -> DetectorResult<()> {
        let started_at = state.started_at.to_rfc3339();
        let finished_at = state.finished_at.map(|ts| ts.to_rfc3339());
        let (started_at, finished_at) = (started_at.as_str(), &finished_at);
        retry_once("upsert_execution", || async move {
            sqlx::query(
                "INSERT INTO executions (execution_id, flow_id, started_at, finished_at, total, \
                 done, failed, status) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
                 ON CONFLICT (execution_id) DO UPDATE SET \
                 finished_at = excluded.finished_at, total = excluded.total, \
                 done = excluded.done, failed = excluded.failed, status = excluded.status",
            )
            .bind(&state.execution_id)
            .bind(state.flow_id)
            .bind(started_at)
            .bind(finished_at)
            .bind(state.total)
            .bind(state.done)
            .bind(state.failed)
            .bind(state.status.as_str())
            .execute(&self.pool)
            .await
        })
        .await?;
        Ok(())
    }

    pub async fn get_execution(
        &self,
        execution_id: &str,
    ) -> DetectorResult<Option<ExecutionState>> {
        Ok(
            sqlx::query_as::<_, ExecutionState>(
                "SELECT * FROM executions WHERE execution_id = $1",
            )
            .bind(execution_id)
            .fetch_optional(&self.pool)
            .await?,
        )
    }

    pub async fn count_running_executions(&self) -> DetectorResult<i64> {
        Ok(
            sqlx::query_scalar("SELECT COUNT(*) FROM executions WHERE status = 'running'")
                .fetch_one(&self.pool)
                .await?,
        )
    }

    /// Executions left `running` by a previous process cannot make
    /// progress; mark them failed at boot.
    pub async fn reconcile_stale_executions(&self) -> DetectorResult<u64> {
        let now = now_rfc3339();
        let now = now.as_str();
        let result = retry_once("reconcile_stale_executions", || async move {
            sqlx::query(
                "UPDATE executions SET status = 'failed', finished_at = $1 WHERE status = 'running'",
            )
            .bind(now)
            .execute(&self.pool)
            .await
        })
        .await?;
        if result.rows_affected() > 0 {
            warn!(
                count = result.rows_affected(),
                "reconciled stale running executions to failed"
            );
        }
        Ok(result.rows_affected())
    }

    // --- runtime config -------------------------------------------------

    pub async fn get_config_value(&self, key: &str) -> DetectorResult<Option<String>> {
        Ok(
            sqlx::query_scalar("SELECT value FROM config WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    pub async fn set_config_value(&self, key: &str, value: &str) -> DetectorResult<()> {
        retry_once("set_config_value", || async move {
            sqlx::query(
                "INSERT INTO config (key, value) VALUES ($1, $2) \
                 ON CONFLICT (key) DO UPDATE SET value = excluded.value",
            )
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await
        })
        .await?;
        Ok(())
    }

    pub async fn count_flows(&self) -> DetectorResult<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM flows")
            .fetch_one(&self.pool)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_limits_clamped() {
        let (limit, offset) = Page::new(0, 0).limits();
        assert_eq!(limit, 1);
        assert_eq!(offset, 0);

        let (limit, offset) = Page::new(3, 500).limits();
        assert_eq!(limit, MAX_PER_PAGE as i64);
        assert_eq!(offset, 2 * MAX_PER_PAGE as i64);
    }

    #[test]
    fn test_enum_str_uses_serde_names() {
        assert_eq!(enum_str(&Severity::Critical), "CRITICAL");
        assert_eq!(
            enum_str(&VulnerabilityType::PrivilegeEscalation),
            "privilege_escalation"
        );
    }
}
