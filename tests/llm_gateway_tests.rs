//! Self-hosted LLM gateway tests: health-gated endpoint selection and the
//! single-failover contract, against in-process stub endpoints.

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use iats::adapters::llm::{LlmError, LlmGateway, OllamaGateway};
use iats::config::Settings;
use serde_json::Value;

const MODEL: &str = "qwen2.5:7b-instruct";

fn minimal_report() -> Value {
    serde_json::json!({
        "summary": "Upstream timeouts drove the error spike.",
        "mode": "normal",
        "facts": [],
        "hypotheses": [],
        "next_checks": [],
        "mitigations": [],
        "claims": [],
    })
}

/// Stub Ollama endpoint. `generate_ok = false` answers /api/generate with a
/// 500, which is a mid-generation transport failure from the client's view.
async fn spawn_endpoint(model: &str, generate_ok: bool) -> String {
    let model = model.to_string();
    let tags = get(move || {
        let model = model.clone();
        async move { Json(serde_json::json!({"models": [{"name": model}]})) }
    });
    let generate = post(move |Json(_body): Json<Value>| async move {
        if generate_ok {
            let text = minimal_report().to_string();
            Ok(Json(serde_json::json!({"response": text})))
        } else {
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    });
    let app = Router::new()
        .route("/api/tags", tags)
        .route("/api/generate", generate);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub endpoint");
    let addr = listener.local_addr().expect("stub addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

fn gateway_for(endpoints: Vec<String>) -> OllamaGateway {
    let mut settings = Settings::default();
    settings.local_llm_model = MODEL.to_string();
    settings.ollama_endpoints = endpoints;
    settings.ollama_endpoint_cache_ttl_seconds = 60;
    settings.ollama_healthcheck_timeout_seconds = 2;
    settings.local_llm_timeout_seconds = 5;
    OllamaGateway::new(&settings)
}

#[tokio::test]
async fn test_generation_on_first_healthy_endpoint() {
    let endpoint = spawn_endpoint(MODEL, true).await;
    let gateway = gateway_for(vec![endpoint.clone()]);

    let reply = gateway
        .generate(&serde_json::json!({"alert_summary": "x"}), &serde_json::json!({}))
        .await
        .expect("generation succeeds");
    assert_eq!(reply.payload["mode"], "normal");
    assert_eq!(reply.metadata.llm_provider, "local");
    assert_eq!(reply.metadata.llm_endpoint_used.as_deref(), Some(endpoint.as_str()));
    assert_eq!(reply.metadata.endpoint_failover_count, Some(0));
}

#[tokio::test]
async fn test_single_failover_to_next_healthy_endpoint() {
    let failing = spawn_endpoint(MODEL, false).await;
    let healthy = spawn_endpoint(MODEL, true).await;
    let gateway = gateway_for(vec![failing.clone(), healthy.clone()]);

    let reply = gateway
        .generate(&serde_json::json!({}), &serde_json::json!({}))
        .await
        .expect("failover succeeds");
    assert_eq!(reply.metadata.endpoint_failover_count, Some(1));
    assert_eq!(reply.metadata.llm_endpoint_used.as_deref(), Some(healthy.as_str()));
}

#[tokio::test]
async fn test_no_failover_candidate_bubbles_transport_error() {
    // Healthy for the health check, failing for generation, and nothing
    // after it in the list.
    let failing = spawn_endpoint(MODEL, false).await;
    let gateway = gateway_for(vec![failing]);

    let error = gateway
        .generate(&serde_json::json!({}), &serde_json::json!({}))
        .await
        .expect_err("generation fails");
    assert!(matches!(error, LlmError::Transport(_)));
}

#[tokio::test]
async fn test_all_endpoints_unreachable_is_configuration_error() {
    let gateway = gateway_for(vec![
        "http://127.0.0.1:1".to_string(),
        "http://127.0.0.1:2".to_string(),
    ]);

    let error = gateway
        .generate(&serde_json::json!({}), &serde_json::json!({}))
        .await
        .expect_err("no endpoint reachable");
    match error {
        LlmError::Configuration(inner) => {
            assert!(inner.to_string().contains("failed to reach any"));
        }
        other => panic!("expected configuration error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unhealthy_model_list_skips_endpoint() {
    let wrong_model = spawn_endpoint("some-other-model:3b", true).await;
    let healthy = spawn_endpoint(MODEL, true).await;
    let gateway = gateway_for(vec![wrong_model, healthy.clone()]);

    let reply = gateway
        .generate(&serde_json::json!({}), &serde_json::json!({}))
        .await
        .expect("second endpoint selected");
    assert_eq!(reply.metadata.llm_endpoint_used.as_deref(), Some(healthy.as_str()));
    assert_eq!(reply.metadata.endpoint_failover_count, Some(0));
}

#[tokio::test]
async fn test_invalid_json_response_is_not_a_transport_error() {
    let model = MODEL.to_string();
    let tags = get(move || {
        let model = model.clone();
        async move { Json(serde_json::json!({"models": [{"name": model}]})) }
    });
    let generate = post(|Json(_body): Json<Value>| async {
        Json(serde_json::json!({"response": "not json at all"}))
    });
    let app = Router::new()
        .route("/api/tags", tags)
        .route("/api/generate", generate);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let gateway = gateway_for(vec![format!("http://{addr}")]);
    let error = gateway
        .generate(&serde_json::json!({}), &serde_json::json!({}))
        .await
        .expect_err("invalid JSON rejected");
    assert!(matches!(error, LlmError::InvalidResponse(_)));
}
