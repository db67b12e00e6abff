mod common;

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::{config, default_docs, gateway_with, MockBackend, API_KEY, PASSPHRASE};
use pretty_assertions::assert_eq;
use wazira_gateway::collaborators::{
    AnswerExtractor, Collaborators, RankedDoc, RerankError, Reranker, ANSWER_UNAVAILABLE,
};
use wazira_gateway::hvc::{decrypt_results, encrypt_text, HvcConfig};
use wazira_gateway::privacy::{DpNoiser, TelemetryPayload, ZeroNoise};
use wazira_gateway::protocol::{
    DotRequest, EncryptedQuery, FactCheckRequest, SearchQuery, SummarizeRequest,
};
use wazira_gateway::telemetry;
use wazira_gateway::{
    CiphertextBundle, ErrorKind, Gateway, GatewayError, RequestContext, SchemeContext,
};

fn ctx() -> RequestContext {
    RequestContext::new(Some(API_KEY.into()), "10.1.2.3")
}

fn plaintext_query(text: &str, answer: bool) -> EncryptedQuery {
    EncryptedQuery {
        ciphertext: String::new(),
        query: Some(text.into()),
        answer: Some(answer),
    }
}

fn client_scheme() -> SchemeContext {
    let scheme = SchemeContext::new(HvcConfig {
        dimension: 16,
        key_seed: Some(PASSPHRASE.into()),
        ..HvcConfig::default()
    })
    .unwrap();
    scheme.init().unwrap();
    scheme
}

#[tokio::test]
async fn plaintext_query_returns_results_and_answer() {
    let backend = default_docs();
    let gateway = gateway_with(backend.clone(), config());

    let result = gateway
        .submit_query(&ctx(), plaintext_query("capital of france", true))
        .await
        .unwrap();

    assert_eq!(backend.calls(), 1);
    assert_eq!(result.ciphertext, "");
    assert_eq!(
        result.results,
        vec![
            "Paris is the capital and most populous city of France, for example.".to_string(),
            "France is a country in Western Europe.".to_string(),
            "Paris".to_string(),
        ]
    );
    assert_eq!(result.answer.as_deref(), Some(ANSWER_UNAVAILABLE));
    assert_eq!(gateway.telemetry().counter(telemetry::SEARCH_QUERIES), 1);
    assert_eq!(gateway.health().counters[telemetry::SEARCH_QUERIES], 1);
}

#[tokio::test]
async fn answer_is_omitted_unless_requested() {
    let gateway = gateway_with(default_docs(), config());
    let result = gateway
        .submit_query(&ctx(), plaintext_query("capital of france", false))
        .await
        .unwrap();
    assert_eq!(result.answer, None);
}

#[tokio::test]
async fn invalid_credential_never_reaches_backend() {
    let backend = default_docs();
    let gateway = gateway_with(backend.clone(), config());
    let intruder = RequestContext::new(Some("wrong".into()), "10.1.2.3");

    let err = gateway
        .submit_query(&intruder, plaintext_query("capital of france", true))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    assert_eq!(backend.calls(), 0);
    assert_eq!(gateway.telemetry().counter(telemetry::AUTH_REJECTED), 1);

    let anonymous = RequestContext::new(None, "10.1.2.3");
    let err = gateway
        .submit_query(&anonymous, plaintext_query("capital of france", true))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Unauthorized));
}

#[tokio::test]
async fn hundred_and_first_request_in_an_hour_is_rate_limited() {
    let backend = default_docs();
    let gateway = gateway_with(backend.clone(), config());
    let hour_start = UNIX_EPOCH + Duration::from_secs(480_000 * 3_600);

    for i in 0..100u64 {
        let at = hour_start + Duration::from_secs(i * 30);
        gateway
            .submit_query(&ctx().at(at), plaintext_query("q", false))
            .await
            .unwrap();
    }
    let err = gateway
        .submit_query(
            &ctx().at(hour_start + Duration::from_secs(3_599)),
            plaintext_query("q", false),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::RateLimited { .. }));
    assert_eq!(backend.calls(), 100);

    // A different caller and the next hour are unaffected.
    let other = RequestContext::new(Some(API_KEY.into()), "10.9.9.9").at(hour_start);
    gateway
        .submit_query(&other, plaintext_query("q", false))
        .await
        .unwrap();
    let next_hour = ctx().at(hour_start + Duration::from_secs(3_600));
    gateway
        .submit_query(&next_hour, plaintext_query("q", false))
        .await
        .unwrap();
}

#[tokio::test]
async fn unauthorized_requests_do_not_consume_quota() {
    let mut config = config();
    config.rate_limit.requests_per_hour = 1;
    let gateway = gateway_with(default_docs(), config);
    let now = SystemTime::now();

    let intruder = RequestContext::new(Some("nope".into()), "10.1.2.3").at(now);
    for _ in 0..5 {
        let _ = gateway.submit_query(&intruder, plaintext_query("q", false)).await;
    }
    gateway
        .submit_query(&ctx().at(now), plaintext_query("q", false))
        .await
        .unwrap();
}

#[tokio::test]
async fn encrypted_query_round_trips_under_shared_key() {
    let backend = default_docs();
    let gateway = gateway_with(backend.clone(), config());
    let client = client_scheme();

    let sealed = encrypt_text(&client, "capital of france").unwrap().to_base64();
    let result = gateway
        .submit_query(
            &ctx(),
            EncryptedQuery {
                ciphertext: sealed.clone(),
                query: None,
                answer: Some(true),
            },
        )
        .await
        .unwrap();

    assert!(result.results.is_empty());
    assert_ne!(result.ciphertext, sealed);
    assert_eq!(result.answer.as_deref(), Some(ANSWER_UNAVAILABLE));

    let bundle = CiphertextBundle::from_base64(&result.ciphertext).unwrap();
    let docs = decrypt_results(&client, &bundle).unwrap();
    assert_eq!(docs.len(), 3);
    assert_eq!(docs[2], "Paris");
    assert_eq!(gateway.telemetry().counter(telemetry::SEARCH_ENCRYPTED), 1);
}

#[tokio::test]
async fn oversized_encrypted_results_fail_instead_of_sealing_an_undecodable_bundle() {
    let big: Vec<String> = (0..10)
        .map(|i| format!("doc {i} {}", "x".repeat(10_000)))
        .collect();
    let refs: Vec<&str> = big.iter().map(String::as_str).collect();
    let gateway = gateway_with(MockBackend::with_docs(&refs), config());
    let client = client_scheme();

    let sealed = encrypt_text(&client, "capital of france").unwrap().to_base64();
    let err = gateway
        .submit_query(
            &ctx(),
            EncryptedQuery {
                ciphertext: sealed,
                query: None,
                answer: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PayloadTooLarge);
}

#[tokio::test]
async fn garbage_ciphertext_is_rejected_before_backend() {
    let backend = default_docs();
    let gateway = gateway_with(backend.clone(), config());
    let err = gateway
        .submit_query(
            &ctx(),
            EncryptedQuery {
                ciphertext: "bm90IGEgYnVuZGxl".into(),
                query: None,
                answer: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidCiphertext);
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn empty_request_is_malformed() {
    let gateway = gateway_with(default_docs(), config());
    let err = gateway
        .submit_query(
            &ctx(),
            EncryptedQuery {
                ciphertext: String::new(),
                query: None,
                answer: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedInput);
}

#[tokio::test]
async fn backend_failure_surfaces_as_unavailable() {
    let backend = MockBackend::failing();
    let gateway = gateway_with(backend.clone(), config());
    let err = gateway
        .submit_query(&ctx(), plaintext_query("q", true))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
    assert_eq!(backend.calls(), 1);
    assert_eq!(gateway.telemetry().counter(telemetry::BACKEND_FAILURES), 1);
}

#[tokio::test]
async fn stalled_backend_times_out() {
    let backend = MockBackend::stalling(Duration::from_secs(30));
    let gateway = gateway_with(backend, config());
    let started = std::time::Instant::now();
    let err = gateway
        .submit_query(&ctx(), plaintext_query("q", false))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
    assert!(started.elapsed() < Duration::from_secs(5));
}

struct BrokenReranker;

impl Reranker for BrokenReranker {
    fn rerank(&self, _: &str, _: &[String], _: usize) -> Result<Vec<RankedDoc>, RerankError> {
        Err(RerankError("model unavailable".into()))
    }
}

struct EchoAnswers;

impl AnswerExtractor for EchoAnswers {
    fn extract(&self, _query: &str, doc: &str) -> String {
        format!("from: {doc}")
    }
}

#[tokio::test]
async fn reranker_failure_degrades_to_unscored_top_k() {
    let mut config = config();
    config.rerank.top_k = 2;
    let gateway = Gateway::builder(config)
        .backend(default_docs())
        .noiser(DpNoiser::with_source(ZeroNoise, 1.0))
        .collaborators(Collaborators {
            reranker: Arc::new(BrokenReranker),
            answers: Arc::new(EchoAnswers),
            ..Collaborators::default()
        })
        .build()
        .unwrap();

    let result = gateway
        .search(
            &ctx(),
            SearchQuery {
                query: "capital".into(),
                answer: Some(true),
            },
        )
        .await
        .unwrap();
    assert_eq!(
        result.results,
        vec![
            "Paris".to_string(),
            "Paris is the capital and most populous city of France, for example.".to_string(),
        ]
    );
    assert_eq!(result.answer.as_deref(), Some("from: Paris"));
}

#[tokio::test]
async fn uninitialized_scheme_fails_encrypted_paths_only() {
    let scheme = Arc::new(SchemeContext::new(config().hvc).unwrap());
    let gateway = Gateway::builder(config())
        .backend(default_docs())
        .scheme(scheme.clone())
        .build()
        .unwrap();
    assert!(!gateway.health().scheme_initialized);

    let err = gateway
        .encrypted_dot(
            &ctx(),
            DotRequest {
                vec1: vec![1.0; 16],
                vec2: vec![1.0; 16],
            },
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SchemeUninitialized);

    gateway
        .submit_query(&ctx(), plaintext_query("q", false))
        .await
        .unwrap();

    scheme.init().unwrap();
    assert!(gateway.health().scheme_initialized);
}

#[test]
fn encrypted_dot_returns_broadcast_product() {
    let gateway = gateway_with(default_docs(), config());
    let vec1: Vec<f64> = (1..=16).map(f64::from).collect();
    let vec2 = vec![0.5; 16];
    let response = gateway
        .encrypted_dot(&ctx(), DotRequest { vec1, vec2 })
        .unwrap();
    assert_eq!(response.dot_product.len(), 16);
    for slot in response.dot_product {
        approx::assert_abs_diff_eq!(slot, 68.0, epsilon = 1e-6);
    }

    let err = gateway
        .encrypted_dot(
            &ctx(),
            DotRequest {
                vec1: vec![1.0; 3],
                vec2: vec![1.0; 16],
            },
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedInput);
}

#[test]
fn encrypted_dot_overflow_is_malformed_input() {
    let gateway = gateway_with(default_docs(), config());
    let err = gateway
        .encrypted_dot(
            &ctx(),
            DotRequest {
                vec1: vec![1e200; 16],
                vec2: vec![1e200; 16],
            },
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedInput);
}

#[test]
fn federated_updates_feed_the_aggregate() {
    let gateway = gateway_with(default_docs(), config());
    gateway
        .federated_update(&ctx(), TelemetryPayload::new(30.0, 2))
        .unwrap();
    let ack = gateway
        .federated_update(&ctx(), TelemetryPayload::new(10.0, 2))
        .unwrap();
    assert_eq!(ack.num_updates, 2);
    let snapshot = gateway.aggregate();
    assert_eq!(snapshot.total_count, 4);
    assert_eq!(snapshot.mean_noisy_dwell, 10.0);

    let err = gateway
        .federated_update(&ctx(), TelemetryPayload::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedInput);
    assert_eq!(gateway.aggregate().update_count, 2);
}

#[test]
fn auxiliary_endpoints_use_default_strategies() {
    let gateway = gateway_with(default_docs(), config());

    let verdict = gateway
        .fact_check(
            &ctx(),
            FactCheckRequest {
                claim: Some("this is an example claim".into()),
                url: None,
            },
        )
        .unwrap();
    assert_eq!(verdict.result, "Likely True");

    let verdict = gateway
        .fact_check(&ctx(), FactCheckRequest::default())
        .unwrap();
    assert_eq!(verdict.badge, "❓");

    let verdict = gateway
        .fact_check(
            &ctx(),
            FactCheckRequest {
                claim: None,
                url: Some("https://example.com/a".into()),
            },
        )
        .unwrap();
    assert_eq!(verdict.result, "Likely True");

    let verdict = gateway
        .fact_check(
            &ctx(),
            FactCheckRequest {
                claim: Some(String::new()),
                url: Some("https://news.test/story".into()),
            },
        )
        .unwrap();
    assert_eq!(verdict.result, "Unverified");

    let summary = gateway
        .summarize(
            &ctx(),
            SummarizeRequest {
                url: None,
                text: Some("short text".into()),
            },
        )
        .unwrap();
    assert_eq!(summary.summary, "[Summary] short text...");

    let receipt = gateway
        .zkp_proof(&ctx(), serde_json::json!({"profile": "p"}))
        .unwrap();
    assert_eq!(receipt.zkp, "dummy-proof");
}
