// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Replayer Tests
 * End-to-end replay behavior against a mock target
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ansa_detector::analyzer::DetectionCatalog;
use ansa_detector::replayer::{ReplaySettings, Replayer};
use ansa_detector::store::Store;
use ansa_detector::types::{
    CapturedExchange, CreateFlow, ExecutionState, ExecutionStatus, Identity, Mutation,
    MutationCategory, NewTestCase, OwnerKind, SequenceOp, Severity, TargetSite,
    VulnerabilityType,
};

async fn test_store() -> Store {
    let store = Store::connect("sqlite::memory:", 1024 * 1024).await.unwrap();
    store.init_schema().await.unwrap();
    store
}

fn fast_settings() -> ReplaySettings {
    ReplaySettings {
        concurrent_requests: 5,
        rate_limit_rps: 200,
        request_timeout: Duration::from_secs(2),
        retry_attempts: 0,
        failure_threshold: 0.1,
        request_delay: Duration::ZERO,
        max_body_bytes: 1024 * 1024,
    }
}

fn replayer_with(store: Store, settings: ReplaySettings) -> Replayer {
    Replayer::new(
        store,
        settings,
        Arc::new(RwLock::new(DetectionCatalog::default())),
        Arc::new(RwLock::new(0.7)),
    )
    .unwrap()
}

fn exchange(
    method: &str,
    url: &str,
    headers: Vec<(&str, &str)>,
    status: u16,
    body_len: usize,
) -> CapturedExchange {
    CapturedExchange {
        method: method.to_string(),
        url: url.to_string(),
        headers: headers
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        body: None,
        captured_status: status,
        captured_headers: HashMap::new(),
        captured_body: Some(vec![b'x'; body_len]),
    }
}

async fn wait_terminal(replayer: &Replayer, execution_id: &str) -> ExecutionState {
    for _ in 0..200 {
        let state = replayer.execution_status(execution_id).await.unwrap();
        if state.status.is_terminal() {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("execution {} did not reach a terminal state", execution_id);
}

#[tokio::test]
async fn test_identity_substitution_detects_unauthorized_access() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/admin/users"))
        .and(header("Authorization", "Bearer admin-token"))
        .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(5000)))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/admin/users"))
        .respond_with(ResponseTemplate::new(403).set_body_string("x".repeat(45)))
        .with_priority(5)
        .mount(&server)
        .await;

    let store = test_store().await;
    let flow = store
        .create_flow(&CreateFlow {
            name: "admin-access".to_string(),
            description: None,
            target_domain: None,
            identity_pool: vec![Identity {
                name: "admin-candidate".to_string(),
                headers: [("Authorization".to_string(), "Bearer admin-token".to_string())]
                    .into_iter()
                    .collect(),
                cookies: HashMap::new(),
            }],
        })
        .await
        .unwrap();
    let request = store
        .add_request(
            flow.flow_id,
            &exchange(
                "GET",
                &format!("{}/admin/users", server.uri()),
                vec![("Authorization", "Bearer user-token")],
                403,
                45,
            ),
        )
        .await
        .unwrap();
    let test_case = store
        .insert_test_case(&NewTestCase {
            flow_id: flow.flow_id,
            request_id: request.request_id,
            category: MutationCategory::Auth,
            rule_id: "auth-privilege-substitution".to_string(),
            description: "Substitute caller identity with 'admin-candidate'".to_string(),
            mutation: Mutation::SubstituteIdentity {
                identity: "admin-candidate".to_string(),
            },
            catalog_version: "2026.1".to_string(),
        })
        .await
        .unwrap()
        .unwrap();

    let replayer = replayer_with(store.clone(), fast_settings());
    let execution = replayer.replay_test_case(test_case.test_case_id).await.unwrap();
    let finished = wait_terminal(&replayer, &execution.execution_id).await;

    assert_eq!(finished.status, ExecutionStatus::Succeeded);
    assert_eq!(finished.done, 1);
    assert_eq!(finished.failed, 0);

    let baseline = store
        .latest_response(OwnerKind::Baseline, request.request_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(baseline.status, Some(403));

    let mutant = store
        .latest_response(OwnerKind::Mutant, test_case.test_case_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(mutant.status, Some(200));
    assert_eq!(mutant.execution_id, baseline.execution_id);

    let anomalies = store.flow_anomalies(flow.flow_id).await.unwrap();
    let transition = anomalies
        .iter()
        .find(|a| a.detector == "status_transition")
        .expect("denied-to-allowed anomaly expected");
    assert_eq!(
        transition.vulnerability_type,
        VulnerabilityType::UnauthorizedAccess
    );
    assert_eq!(transition.severity, Severity::Critical);
    assert!(transition.is_potential_vulnerability);
}

#[tokio::test]
async fn test_timeout_recorded_as_error_response_without_anomaly() {
    let server = MockServer::start().await;
    // The mutant carries a marker header that routes it to the slow mock
    Mock::given(method("GET"))
        .and(path("/user/profile"))
        .and(header("X-Probe", "1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("slow")
                .set_delay(Duration::from_millis(1500)),
        )
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/user/profile"))
        .respond_with(ResponseTemplate::new(200).set_body_string("fast"))
        .with_priority(5)
        .mount(&server)
        .await;

    let store = test_store().await;
    let flow = store
        .create_flow(&CreateFlow {
            name: "timeouts".to_string(),
            description: None,
            target_domain: None,
            identity_pool: Vec::new(),
        })
        .await
        .unwrap();
    let request = store
        .add_request(
            flow.flow_id,
            &exchange(
                "GET",
                &format!("{}/user/profile", server.uri()),
                vec![],
                200,
                100,
            ),
        )
        .await
        .unwrap();
    let test_case = store
        .insert_test_case(&NewTestCase {
            flow_id: flow.flow_id,
            request_id: request.request_id,
            category: MutationCategory::Parameter,
            rule_id: "probe-header".to_string(),
            description: "Set header 'X-Probe' to '1'".to_string(),
            mutation: Mutation::SetValue {
                site: TargetSite::Header {
                    name: "X-Probe".to_string(),
                },
                value: serde_json::json!("1"),
            },
            catalog_version: "2026.1".to_string(),
        })
        .await
        .unwrap()
        .unwrap();

    let settings = ReplaySettings {
        request_timeout: Duration::from_millis(300),
        ..fast_settings()
    };
    let replayer = replayer_with(store.clone(), settings);
    let execution = replayer.replay_test_case(test_case.test_case_id).await.unwrap();
    let finished = wait_terminal(&replayer, &execution.execution_id).await;

    // The lone pair failed, which breaches the 10% threshold
    assert_eq!(finished.status, ExecutionStatus::Failed);
    assert_eq!(finished.failed, 1);

    let mutant = store
        .latest_response(OwnerKind::Mutant, test_case.test_case_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(mutant.status, None);
    assert_eq!(
        mutant.error_kind,
        Some(ansa_detector::types::ResponseErrorKind::Timeout)
    );

    // No detector requiring a status can fire on a timed-out mutant
    assert!(store.flow_anomalies(flow.flow_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_zero_failure_threshold_fails_on_first_transport_error() {
    let store = test_store().await;
    let flow = store
        .create_flow(&CreateFlow {
            name: "unreachable".to_string(),
            description: None,
            target_domain: None,
            identity_pool: Vec::new(),
        })
        .await
        .unwrap();
    // Nothing listens on port 9; the connection is refused
    let request = store
        .add_request(
            flow.flow_id,
            &exchange("GET", "http://127.0.0.1:9/ping", vec![], 200, 10),
        )
        .await
        .unwrap();
    let test_case = store
        .insert_test_case(&NewTestCase {
            flow_id: flow.flow_id,
            request_id: request.request_id,
            category: MutationCategory::Parameter,
            rule_id: "probe-header".to_string(),
            description: "Set header 'X-Probe' to '1'".to_string(),
            mutation: Mutation::SetValue {
                site: TargetSite::Header {
                    name: "X-Probe".to_string(),
                },
                value: serde_json::json!("1"),
            },
            catalog_version: "2026.1".to_string(),
        })
        .await
        .unwrap()
        .unwrap();

    let settings = ReplaySettings {
        failure_threshold: 0.0,
        ..fast_settings()
    };
    let replayer = replayer_with(store.clone(), settings);
    let execution = replayer.replay_test_case(test_case.test_case_id).await.unwrap();
    let finished = wait_terminal(&replayer, &execution.execution_id).await;

    assert_eq!(finished.status, ExecutionStatus::Failed);
    let mutant = store
        .latest_response(OwnerKind::Mutant, test_case.test_case_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        mutant.error_kind,
        Some(ansa_detector::types::ResponseErrorKind::Network)
    );
}

#[tokio::test]
async fn test_cancellation_stops_at_request_boundary() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("ok")
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let store = test_store().await;
    let flow = store
        .create_flow(&CreateFlow {
            name: "cancelled".to_string(),
            description: None,
            target_domain: None,
            identity_pool: Vec::new(),
        })
        .await
        .unwrap();
    for step in ["one", "two", "three"] {
        store
            .add_request(
                flow.flow_id,
                &exchange(
                    "GET",
                    &format!("{}/{}", server.uri(), step),
                    vec![],
                    200,
                    10,
                ),
            )
            .await
            .unwrap();
    }

    let replayer = replayer_with(store.clone(), fast_settings());
    let execution = replayer.replay_flow(flow.flow_id).await.unwrap();
    let stopped = replayer.stop(&execution.execution_id).await.unwrap();
    assert_eq!(stopped.flow_id, flow.flow_id);

    let finished = wait_terminal(&replayer, &execution.execution_id).await;
    assert_eq!(finished.status, ExecutionStatus::Cancelled);

    // Workers observe the flag at request boundaries: at most the request
    // already in flight completed
    assert!(server.received_requests().await.unwrap().len() <= 1);

    // Stopping a terminal execution conflicts
    let err = replayer.stop(&execution.execution_id).await.unwrap_err();
    assert_eq!(err.kind(), "conflict");
}

#[tokio::test]
async fn test_whole_flow_sequence_skip_detects_bypass() {
    let server = MockServer::start().await;
    for step in ["start", "pay", "confirm"] {
        Mock::given(method("POST"))
            .and(path(format!("/checkout/{}", step)))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!("{} ok", step)))
            .mount(&server)
            .await;
    }

    let store = test_store().await;
    let flow = store
        .create_flow(&CreateFlow {
            name: "checkout".to_string(),
            description: None,
            target_domain: None,
            identity_pool: Vec::new(),
        })
        .await
        .unwrap();
    let mut requests = Vec::new();
    for step in ["start", "pay", "confirm"] {
        requests.push(
            store
                .add_request(
                    flow.flow_id,
                    &exchange(
                        "POST",
                        &format!("{}/checkout/{}", server.uri(), step),
                        vec![],
                        200,
                        20,
                    ),
                )
                .await
                .unwrap(),
        );
    }

    // Skip the payment step; the confirm request is measured
    let test_case = store
        .insert_test_case(&NewTestCase {
            flow_id: flow.flow_id,
            request_id: requests[2].request_id,
            category: MutationCategory::Sequence,
            rule_id: "sequence-skip".to_string(),
            description: "Skip prerequisite 'POST /checkout/pay'".to_string(),
            mutation: Mutation::Sequence {
                seq_op: SequenceOp::Skip { ordinal: 2 },
            },
            catalog_version: "2026.1".to_string(),
        })
        .await
        .unwrap()
        .unwrap();

    let replayer = replayer_with(store.clone(), fast_settings());
    let execution = replayer.replay_flow(flow.flow_id).await.unwrap();
    let finished = wait_terminal(&replayer, &execution.execution_id).await;

    assert_eq!(finished.status, ExecutionStatus::Succeeded);
    assert_eq!(finished.done, 1);

    // Every baseline committed before the mutant at its ordinal
    let mutant = store
        .latest_response(OwnerKind::Mutant, test_case.test_case_id)
        .await
        .unwrap()
        .unwrap();
    for request in &requests {
        let baseline = store
            .latest_response(OwnerKind::Baseline, request.request_id)
            .await
            .unwrap()
            .unwrap();
        assert!(baseline.response_id < mutant.response_id);
        assert_eq!(baseline.status, Some(200));
    }

    // The skipped step ran only during the baseline transcript
    let pay_hits = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/checkout/pay")
        .count();
    assert_eq!(pay_hits, 1);

    let anomalies = store.flow_anomalies(flow.flow_id).await.unwrap();
    let bypass = anomalies
        .iter()
        .find(|a| a.detector == "sequence_bypass")
        .expect("sequence bypass anomaly expected");
    assert_eq!(
        bypass.vulnerability_type,
        VulnerabilityType::SequenceManipulation
    );
    assert_eq!(bypass.severity, Severity::High);
    assert_eq!(bypass.test_case_id, test_case.test_case_id);
}

#[tokio::test]
async fn test_empty_flow_replay_is_noop() {
    let store = test_store().await;
    let flow = store
        .create_flow(&CreateFlow {
            name: "empty".to_string(),
            description: None,
            target_domain: None,
            identity_pool: Vec::new(),
        })
        .await
        .unwrap();

    let replayer = replayer_with(store.clone(), fast_settings());
    let execution = replayer.replay_flow(flow.flow_id).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Succeeded);
    assert_eq!(execution.total, 0);
    assert!(store.flow_anomalies(flow.flow_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sequence_case_rejected_in_single_mode() {
    let store = test_store().await;
    let flow = store
        .create_flow(&CreateFlow {
            name: "single-sequence".to_string(),
            description: None,
            target_domain: None,
            identity_pool: Vec::new(),
        })
        .await
        .unwrap();
    let request = store
        .add_request(
            flow.flow_id,
            &exchange("POST", "https://shop.example.com/checkout/confirm", vec![], 200, 10),
        )
        .await
        .unwrap();
    let test_case = store
        .insert_test_case(&NewTestCase {
            flow_id: flow.flow_id,
            request_id: request.request_id,
            category: MutationCategory::Sequence,
            rule_id: "sequence-skip".to_string(),
            description: "Skip prerequisite".to_string(),
            mutation: Mutation::Sequence {
                seq_op: SequenceOp::Skip { ordinal: 1 },
            },
            catalog_version: "2026.1".to_string(),
        })
        .await
        .unwrap()
        .unwrap();

    let replayer = replayer_with(store.clone(), fast_settings());
    let err = replayer
        .replay_test_case(test_case.test_case_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
}
