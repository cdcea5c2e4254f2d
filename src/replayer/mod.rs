// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Replay Engine
 * Baseline + mutant execution under concurrency, rate and failure limits
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

pub mod client;
pub mod context;

use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analyzer::{self, DetectionCatalog};
use crate::config::AppConfig;
use crate::errors::{DetectorError, DetectorResult};
use crate::mutator::sites;
use crate::rate_limiter::ExecutionRateLimiter;
use crate::retry::{retry_transport, RetryConfig};
use crate::store::Store;
use crate::types::{
    ExecutionState, ExecutionStatus, Flow, Mutation, NewResponse, OwnerKind, PreparedRequest,
    RecordedRequest, ResponseErrorKind, SequenceOp, StoredResponse, TestCase,
};
use client::{ReplayClient, ReplayOutcome};
use context::{new_prefix_cache, prefix_key, FlowContext, PrefixCache};

/// Replay tunables, resolved from the process configuration at startup
#[derive(Debug, Clone)]
pub struct ReplaySettings {
    pub concurrent_requests: usize,
    pub rate_limit_rps: u32,
    pub request_timeout: Duration,
    pub retry_attempts: u32,
    /// Abort ratio in [0,1]; exceeded means the execution fails
    pub failure_threshold: f64,
    pub request_delay: Duration,
    pub max_body_bytes: usize,
}

impl ReplaySettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            concurrent_requests: config.max_concurrent_requests,
            rate_limit_rps: config.default_rate_limit_rps,
            request_timeout: config.request_timeout(),
            retry_attempts: config.retry_attempts,
            failure_threshold: config.failure_threshold(),
            request_delay: config.request_delay(),
            max_body_bytes: config.max_body_bytes,
        }
    }
}

/// Live handle to one execution: shared counters plus the cooperative
/// cancellation flag workers observe at request boundaries
#[derive(Clone)]
struct ExecutionHandle {
    state: Arc<Mutex<ExecutionState>>,
    cancel: Arc<AtomicBool>,
}

/// In-memory registry of executions started by this process. Completed
/// executions are also persisted; the store answers for them across
/// restarts.
#[derive(Default)]
pub struct ExecutionRegistry {
    inner: Mutex<HashMap<String, ExecutionHandle>>,
}

impl ExecutionRegistry {
    fn register(&self, state: ExecutionState) -> ExecutionHandle {
        let handle = ExecutionHandle {
            state: Arc::new(Mutex::new(state.clone())),
            cancel: Arc::new(AtomicBool::new(false)),
        };
        self.inner.lock().insert(state.execution_id, handle.clone());
        handle
    }

    pub fn snapshot(&self, execution_id: &str) -> Option<ExecutionState> {
        self.inner
            .lock()
            .get(execution_id)
            .map(|h| h.state.lock().clone())
    }

    /// Set the cancel flag for a running execution. Returns the current
    /// snapshot, or None when the execution is unknown to this process.
    fn request_cancel(&self, execution_id: &str) -> Option<DetectorResult<ExecutionState>> {
        let inner = self.inner.lock();
        let handle = inner.get(execution_id)?;
        let state = handle.state.lock().clone();
        if state.status.is_terminal() {
            return Some(Err(DetectorError::Conflict(format!(
                "execution {} already {}",
                execution_id,
                state.status.as_str()
            ))));
        }
        handle.cancel.store(true, Ordering::SeqCst);
        Some(Ok(state))
    }

    pub fn running_count(&self) -> usize {
        self.inner
            .lock()
            .values()
            .filter(|h| !h.state.lock().status.is_terminal())
            .count()
    }
}

/// The replay engine. Cheap to clone; all heavy state is shared.
#[derive(Clone)]
pub struct Replayer {
    store: Store,
    client: ReplayClient,
    settings: ReplaySettings,
    registry: Arc<ExecutionRegistry>,
    prefix_cache: PrefixCache,
    detection: Arc<RwLock<DetectionCatalog>>,
    confidence_threshold: Arc<RwLock<f64>>,
}

impl Replayer {
    pub fn new(
        store: Store,
        settings: ReplaySettings,
        detection: Arc<RwLock<DetectionCatalog>>,
        confidence_threshold: Arc<RwLock<f64>>,
    ) -> DetectorResult<Self> {
        let client = ReplayClient::new(settings.request_timeout, settings.max_body_bytes)?;
        Ok(Self {
            store,
            client,
            settings,
            registry: Arc::new(ExecutionRegistry::default()),
            prefix_cache: new_prefix_cache(),
            detection,
            confidence_threshold,
        })
    }

    pub fn registry(&self) -> &ExecutionRegistry {
        &self.registry
    }

    /// Current state of an execution: live registry first, then the store
    pub async fn execution_status(&self, execution_id: &str) -> DetectorResult<ExecutionState> {
        if let Some(state) = self.registry.snapshot(execution_id) {
            return Ok(state);
        }
        self.store
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| DetectorError::not_found("execution", execution_id))
    }

    /// Request cooperative cancellation. In-flight requests finish or
    /// time out; the state transitions to cancelled once workers drain.
    pub async fn stop(&self, execution_id: &str) -> DetectorResult<ExecutionState> {
        if let Some(result) = self.registry.request_cancel(execution_id) {
            return result;
        }
        // Not running in this process: only stale rows can remain
        match self.store.get_execution(execution_id).await? {
            Some(state) if state.status.is_terminal() => Err(DetectorError::Conflict(format!(
                "execution {} already {}",
                execution_id,
                state.status.as_str()
            ))),
            Some(mut state) => {
                state.finish(ExecutionStatus::Cancelled);
                self.store.upsert_execution(&state).await?;
                Ok(state)
            }
            None => Err(DetectorError::not_found("execution", execution_id)),
        }
    }

    /// Replay one test case: baseline once, then the mutant, strictly
    /// paired under the same fresh client state.
    pub async fn replay_test_case(&self, test_case_id: i64) -> DetectorResult<ExecutionState> {
        let test_case = self.store.get_test_case(test_case_id).await?;
        if matches!(test_case.mutation, Mutation::Sequence { .. }) {
            return Err(DetectorError::validation(
                "sequence test cases need whole-flow replay context; use /replay/flow",
            ));
        }
        let request = self.store.get_request(test_case.request_id).await?;
        let flow = self.store.get_flow(test_case.flow_id).await?;

        let state = ExecutionState::new(Uuid::new_v4().to_string(), flow.flow_id, 1);
        self.store.upsert_execution(&state).await?;
        let handle = self.registry.register(state.clone());

        let this = self.clone();
        tokio::spawn(async move {
            this.run_single_execution(flow, request, test_case, handle)
                .await;
        });
        Ok(state)
    }

    /// Replay a whole flow: baseline transcript in ordinal order, then
    /// every test case spliced against its baseline prefix.
    pub async fn replay_flow(&self, flow_id: i64) -> DetectorResult<ExecutionState> {
        let flow = self.store.get_flow(flow_id).await?;
        let requests = self.store.flow_requests_in_order(flow_id).await?;
        let test_cases = self.store.flow_test_cases(flow_id).await?;

        let mut state = ExecutionState::new(
            Uuid::new_v4().to_string(),
            flow_id,
            test_cases.len() as i64,
        );

        // An empty flow replays as a no-op
        if requests.is_empty() {
            state.finish(ExecutionStatus::Succeeded);
            self.store.upsert_execution(&state).await?;
            info!(flow_id, "flow has no requests; replay is a no-op");
            return Ok(state);
        }

        self.store.upsert_execution(&state).await?;
        let handle = self.registry.register(state.clone());

        let this = self.clone();
        tokio::spawn(async move {
            this.run_flow_execution(Arc::new(flow), Arc::new(requests), test_cases, handle)
                .await;
        });
        Ok(state)
    }

    // --- internals ------------------------------------------------------

    /// Rate limit, pace and retry one request. Only transport errors
    /// retry; statuses and timeouts are data.
    async fn throttled(
        &self,
        limiter: &ExecutionRateLimiter,
        prepared: &PreparedRequest,
    ) -> DetectorResult<ReplayOutcome> {
        limiter.wait_for_slot().await;
        if !self.settings.request_delay.is_zero() {
            tokio::time::sleep(self.settings.request_delay).await;
        }
        let retry_config = RetryConfig::default().with_retry_attempts(self.settings.retry_attempts);
        retry_transport(&retry_config, "replay_request", || {
            self.client.execute(prepared)
        })
        .await
    }

    /// Map an execution result onto a response row. Non-transport errors
    /// (materialization, internal) produce no row.
    fn build_response(
        &self,
        owner_kind: OwnerKind,
        owner_id: i64,
        execution_id: &str,
        result: &DetectorResult<ReplayOutcome>,
    ) -> Option<NewResponse> {
        match result {
            Ok(outcome) => Some(NewResponse {
                owner_kind,
                owner_id,
                execution_id: execution_id.to_string(),
                status: Some(outcome.status),
                headers: outcome.headers.clone(),
                body: outcome.body.clone(),
                response_time_ms: outcome.response_time_ms,
                error_kind: None,
            }),
            Err(DetectorError::Timeout { duration }) => Some(NewResponse {
                owner_kind,
                owner_id,
                execution_id: execution_id.to_string(),
                status: None,
                headers: HashMap::new(),
                body: Vec::new(),
                response_time_ms: duration.as_millis() as i64,
                error_kind: Some(ResponseErrorKind::Timeout),
            }),
            Err(DetectorError::Network { reason, .. }) => Some(NewResponse {
                owner_kind,
                owner_id,
                execution_id: execution_id.to_string(),
                status: None,
                headers: HashMap::new(),
                body: reason.as_bytes().to_vec(),
                response_time_ms: 0,
                error_kind: Some(ResponseErrorKind::Network),
            }),
            Err(_) => None,
        }
    }

    /// Context accumulated by the baseline prefix before `ordinal`.
    /// Cache hit replaces the re-run; a miss rebuilds without recording.
    async fn prefix_context(
        &self,
        flow_id: i64,
        before_ordinal: i64,
        catalog_version: &str,
        requests: &[RecordedRequest],
        limiter: &ExecutionRateLimiter,
    ) -> FlowContext {
        let key = prefix_key(flow_id, before_ordinal, catalog_version);
        if let Some(cached) = self.prefix_cache.get(&key).await {
            return cached;
        }
        debug!(flow_id, before_ordinal, "prefix context miss, re-running baseline prefix");
        let mut context = FlowContext::new();
        for request in requests.iter().filter(|r| r.ordinal < before_ordinal) {
            let mut prepared = PreparedRequest::baseline(request);
            context.apply(&mut prepared);
            if let Ok(outcome) = self.throttled(limiter, &prepared).await {
                context.absorb(&outcome.headers);
            }
        }
        self.prefix_cache.insert(key, context.clone()).await;
        context
    }

    /// Execute a sequence mutation against the flow transcript and return
    /// the measured request's outcome. Intermediate requests establish
    /// target state and are not recorded.
    async fn run_sequence_case(
        &self,
        flow: &Flow,
        requests: &[RecordedRequest],
        op: &SequenceOp,
        measured: &RecordedRequest,
        catalog_version: &str,
        limiter: &ExecutionRateLimiter,
    ) -> DetectorResult<ReplayOutcome> {
        let anchor = match op {
            SequenceOp::Skip { ordinal } => *ordinal,
            SequenceOp::Repeat { ordinal, .. } => *ordinal,
            SequenceOp::Swap { first, .. } => *first,
        };
        let mut context = self
            .prefix_context(flow.flow_id, anchor, catalog_version, requests, limiter)
            .await;

        match op {
            // Skip: the prerequisite simply never runs
            SequenceOp::Skip { .. } => {}
            SequenceOp::Repeat { ordinal, times } => {
                let request = requests
                    .iter()
                    .find(|r| r.ordinal == *ordinal)
                    .ok_or_else(|| DetectorError::not_found("request ordinal", ordinal))?;
                for _ in 1..(*times).max(1) {
                    let mut prepared = PreparedRequest::baseline(request);
                    context.apply(&mut prepared);
                    if let Ok(outcome) = self.throttled(limiter, &prepared).await {
                        context.absorb(&outcome.headers);
                    }
                }
            }
            SequenceOp::Swap { second, .. } => {
                let request = requests
                    .iter()
                    .find(|r| r.ordinal == *second)
                    .ok_or_else(|| DetectorError::not_found("request ordinal", second))?;
                let mut prepared = PreparedRequest::baseline(request);
                context.apply(&mut prepared);
                if let Ok(outcome) = self.throttled(limiter, &prepared).await {
                    context.absorb(&outcome.headers);
                }
            }
        }

        let mut prepared = PreparedRequest::baseline(measured);
        context.apply(&mut prepared);
        self.throttled(limiter, &prepared).await
    }

    /// Analyze a completed pair and commit the mutant response plus its
    /// anomalies atomically. Returns true when the pair counts as failed.
    async fn commit_pair(
        &self,
        test_case: &TestCase,
        baseline: Option<&StoredResponse>,
        result: DetectorResult<ReplayOutcome>,
        execution_id: &str,
        detection: &DetectionCatalog,
        threshold: f64,
    ) -> bool {
        let Some(new_response) = self.build_response(
            OwnerKind::Mutant,
            test_case.test_case_id,
            execution_id,
            &result,
        ) else {
            if let Err(err) = result {
                warn!(
                    test_case_id = test_case.test_case_id,
                    error = %err,
                    "test case could not be materialized or executed"
                );
            }
            return true;
        };
        let failed = new_response.error_kind.is_some();

        let anomalies = match baseline {
            Some(baseline) if !(baseline.error_kind.is_some() && failed) => {
                let mutant_view = StoredResponse {
                    response_id: 0,
                    owner_kind: OwnerKind::Mutant,
                    owner_id: test_case.test_case_id,
                    execution_id: execution_id.to_string(),
                    status: new_response.status,
                    headers: new_response.headers.clone(),
                    body: new_response.body.clone(),
                    content_length: new_response.body.len() as i64,
                    response_time_ms: new_response.response_time_ms,
                    error_kind: new_response.error_kind,
                    captured_at: chrono::Utc::now(),
                };
                analyzer::analyze_pair(baseline, &mutant_view, test_case, detection, threshold)
            }
            _ => Vec::new(),
        };

        match self.store.commit_mutant_result(&new_response, &anomalies).await {
            Ok((_, stored_anomalies)) => {
                if !stored_anomalies.is_empty() {
                    debug!(
                        test_case_id = test_case.test_case_id,
                        anomalies = stored_anomalies.len(),
                        "pair committed with anomalies"
                    );
                }
                failed
            }
            Err(err) => {
                warn!(
                    test_case_id = test_case.test_case_id,
                    error = %err,
                    "failed to commit pair"
                );
                true
            }
        }
    }

    async fn finish_execution(&self, handle: &ExecutionHandle, status: ExecutionStatus) {
        let snapshot = {
            let mut state = handle.state.lock();
            if !state.status.is_terminal() {
                state.finish(status);
            }
            state.clone()
        };
        if let Err(err) = self.store.upsert_execution(&snapshot).await {
            warn!(
                execution_id = %snapshot.execution_id,
                error = %err,
                "failed to persist terminal execution state"
            );
        }
        info!(
            execution_id = %snapshot.execution_id,
            status = snapshot.status.as_str(),
            done = snapshot.done,
            failed = snapshot.failed,
            "execution finished"
        );
    }

    async fn run_single_execution(
        self,
        flow: Flow,
        request: RecordedRequest,
        test_case: TestCase,
        handle: ExecutionHandle,
    ) {
        let execution_id = handle.state.lock().execution_id.clone();
        let limiter = ExecutionRateLimiter::new(self.settings.rate_limit_rps);
        let detection = self.detection.read().clone();
        let threshold = *self.confidence_threshold.read();

        if handle.cancel.load(Ordering::SeqCst) {
            self.finish_execution(&handle, ExecutionStatus::Cancelled)
                .await;
            return;
        }

        // Baseline leg
        let mut context = FlowContext::new();
        let prepared = PreparedRequest::baseline(&request);
        let baseline_result = self.throttled(&limiter, &prepared).await;
        if let Ok(outcome) = &baseline_result {
            context.absorb(&outcome.headers);
        }
        let baseline_stored = match self.build_response(
            OwnerKind::Baseline,
            request.request_id,
            &execution_id,
            &baseline_result,
        ) {
            Some(new_response) => self.store.insert_response(&new_response).await.ok(),
            None => None,
        };

        if handle.cancel.load(Ordering::SeqCst) {
            self.finish_execution(&handle, ExecutionStatus::Cancelled)
                .await;
            return;
        }

        // Mutant leg under the same client state
        let mutant_result = match sites::materialize(
            &request,
            &test_case.mutation,
            &flow.identity_pool,
        ) {
            Ok(mut prepared) => {
                // An identity substitution replaces the client state; the
                // original session's cookies must not leak back in
                if !matches!(test_case.mutation, Mutation::SubstituteIdentity { .. }) {
                    context.apply(&mut prepared);
                }
                self.throttled(&limiter, &prepared).await
            }
            Err(err) => Err(err),
        };

        let failed = self
            .commit_pair(
                &test_case,
                baseline_stored.as_ref(),
                mutant_result,
                &execution_id,
                &detection,
                threshold,
            )
            .await;

        let status = {
            let mut state = handle.state.lock();
            state.record_done();
            if failed {
                state.record_failed();
            }
            if state.failure_ratio() > self.settings.failure_threshold && state.failed > 0 {
                ExecutionStatus::Failed
            } else {
                ExecutionStatus::Succeeded
            }
        };
        self.finish_execution(&handle, status).await;
    }

    async fn run_flow_execution(
        self,
        flow: Arc<Flow>,
        requests: Arc<Vec<RecordedRequest>>,
        test_cases: Vec<TestCase>,
        handle: ExecutionHandle,
    ) {
        let execution_id = handle.state.lock().execution_id.clone();
        let limiter = Arc::new(ExecutionRateLimiter::new(self.settings.rate_limit_rps));
        let detection = Arc::new(self.detection.read().clone());
        let threshold = *self.confidence_threshold.read();

        // Catalog versions present in this run, for prefix cache keys
        let mut versions: Vec<String> = test_cases
            .iter()
            .map(|t| t.catalog_version.clone())
            .collect();
        versions.sort();
        versions.dedup();

        // --- baseline transcript, strictly in ordinal order ------------
        let mut baselines: HashMap<i64, StoredResponse> = HashMap::new();
        let mut context = FlowContext::new();
        for request in requests.iter() {
            if handle.cancel.load(Ordering::SeqCst) {
                self.finish_execution(&handle, ExecutionStatus::Cancelled)
                    .await;
                return;
            }
            // Snapshot the context as it stood before this ordinal
            for version in &versions {
                self.prefix_cache
                    .insert(
                        prefix_key(flow.flow_id, request.ordinal, version),
                        context.clone(),
                    )
                    .await;
            }

            let mut prepared = PreparedRequest::baseline(request);
            context.apply(&mut prepared);
            let result = self.throttled(&limiter, &prepared).await;
            if let Ok(outcome) = &result {
                context.absorb(&outcome.headers);
            }
            if let Some(new_response) = self.build_response(
                OwnerKind::Baseline,
                request.request_id,
                &execution_id,
                &result,
            ) {
                match self.store.insert_response(&new_response).await {
                    Ok(stored) => {
                        baselines.insert(request.ordinal, stored);
                    }
                    Err(err) => warn!(
                        request_id = request.request_id,
                        error = %err,
                        "failed to record baseline response"
                    ),
                }
            }
        }
        if let Some(last) = requests.last() {
            for version in &versions {
                self.prefix_cache
                    .insert(
                        prefix_key(flow.flow_id, last.ordinal + 1, version),
                        context.clone(),
                    )
                    .await;
            }
        }

        // --- mutants, grouped by measured ordinal -----------------------
        // Same-ordinal cases are serialized within a group; groups run in
        // parallel up to the worker pool size.
        let mut groups: BTreeMap<i64, Vec<(TestCase, RecordedRequest)>> = BTreeMap::new();
        for test_case in test_cases {
            match requests.iter().find(|r| r.request_id == test_case.request_id) {
                Some(request) => groups
                    .entry(request.ordinal)
                    .or_default()
                    .push((test_case, request.clone())),
                None => warn!(
                    test_case_id = test_case.test_case_id,
                    "test case references a missing request; skipped"
                ),
            }
        }

        let baselines = Arc::new(baselines);
        let group_futures = groups.into_iter().map(|(ordinal, cases)| {
            let this = self.clone();
            let flow = Arc::clone(&flow);
            let requests = Arc::clone(&requests);
            let baselines = Arc::clone(&baselines);
            let limiter = Arc::clone(&limiter);
            let detection = Arc::clone(&detection);
            let handle = handle.clone();
            let execution_id = execution_id.clone();

            async move {
                for (test_case, request) in cases {
                    if handle.cancel.load(Ordering::SeqCst) {
                        return;
                    }

                    let result = match &test_case.mutation {
                        Mutation::Sequence { seq_op } => {
                            this.run_sequence_case(
                                &flow,
                                &requests,
                                seq_op,
                                &request,
                                &test_case.catalog_version,
                                &limiter,
                            )
                            .await
                        }
                        point_mutation => {
                            let prefix = this
                                .prefix_context(
                                    flow.flow_id,
                                    ordinal,
                                    &test_case.catalog_version,
                                    &requests,
                                    &limiter,
                                )
                                .await;
                            match sites::materialize(&request, point_mutation, &flow.identity_pool)
                            {
                                Ok(mut prepared) => {
                                    if !matches!(
                                        point_mutation,
                                        Mutation::SubstituteIdentity { .. }
                                    ) {
                                        prefix.apply(&mut prepared);
                                    }
                                    this.throttled(&limiter, &prepared).await
                                }
                                Err(err) => Err(err),
                            }
                        }
                    };

                    let failed = this
                        .commit_pair(
                            &test_case,
                            baselines.get(&ordinal),
                            result,
                            &execution_id,
                            &detection,
                            threshold,
                        )
                        .await;

                    let (snapshot, tripped) = {
                        let mut state = handle.state.lock();
                        state.record_done();
                        if failed {
                            state.record_failed();
                        }
                        let tripped = state.failed > 0
                            && state.failure_ratio() > this.settings.failure_threshold;
                        (state.clone(), tripped)
                    };
                    let _ = this.store.upsert_execution(&snapshot).await;

                    if tripped {
                        warn!(
                            execution_id = %execution_id,
                            failed = snapshot.failed,
                            total = snapshot.total,
                            "failure threshold exceeded, stopping execution"
                        );
                        {
                            let mut state = handle.state.lock();
                            if !state.status.is_terminal() {
                                state.finish(ExecutionStatus::Failed);
                            }
                        }
                        handle.cancel.store(true, Ordering::SeqCst);
                        return;
                    }
                }
            }
        });

        futures::stream::iter(group_futures)
            .buffer_unordered(self.settings.concurrent_requests.max(1))
            .collect::<Vec<()>>()
            .await;

        // --- terminal state --------------------------------------------
        let status = {
            let state = handle.state.lock();
            if state.status.is_terminal() {
                state.status
            } else if handle.cancel.load(Ordering::SeqCst) {
                ExecutionStatus::Cancelled
            } else {
                ExecutionStatus::Succeeded
            }
        };
        self.finish_execution(&handle, status).await;
    }
}
