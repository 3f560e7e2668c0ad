//! HTTP-level adapter tests against a local mock server

use std::time::Duration;

use genrelay::ai::{AnthropicAdapter, OllamaAdapter, OpenAiAdapter};
use genrelay::{
    AdapterKind, Dispatcher, ErrorKind, GenerationRequest, HealthState, Message, ServiceAdapter,
    ServiceConfig,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn openai(server: &MockServer) -> OpenAiAdapter {
    let config = ServiceConfig::new(AdapterKind::OpenAi)
        .with_api_key("sk-test")
        .with_api_base(server.uri())
        .with_model("gpt-test")
        .with_timeout_secs(5);
    OpenAiAdapter::new("openai", &config).unwrap()
}

fn anthropic(server: &MockServer) -> AnthropicAdapter {
    let config = ServiceConfig::new(AdapterKind::Anthropic)
        .with_api_key("sk-ant-test")
        .with_api_base(server.uri())
        .with_timeout_secs(5);
    AnthropicAdapter::new("anthropic", &config).unwrap()
}

fn ollama(server: &MockServer) -> OllamaAdapter {
    let config = ServiceConfig::new(AdapterKind::Ollama)
        .with_api_base(server.uri())
        .with_model("llama3:latest")
        .with_timeout_secs(5);
    OllamaAdapter::new("ollama", &config).unwrap()
}

fn openai_success(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "model": "gpt-test",
        "choices": [{"message": {"role": "assistant", "content": content}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 12, "completion_tokens": 4, "total_tokens": 16}
    })
}

// =============================================================================
// OpenAI
// =============================================================================

#[tokio::test]
async fn openai_success_populates_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-test",
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hi"}
            ],
            "max_tokens": 64
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_success("hello")))
        .expect(1)
        .mount(&server)
        .await;

    let request = GenerationRequest::new(vec![Message::system("be brief"), Message::user("hi")])
        .with_max_tokens(64);
    let envelope = openai(&server).generate(&request).await.unwrap();

    assert_eq!(envelope.content, "hello");
    assert_eq!(envelope.service, "openai");
    assert_eq!(envelope.model, "gpt-test");
    assert_eq!(envelope.usage.total_tokens, 16);
    assert!(!envelope.cached);
    assert_eq!(envelope.metadata["finish_reason"], "stop");
    assert_eq!(envelope.metadata["response_id"], "chatcmpl-1");
}

#[tokio::test]
async fn openai_structured_output_requests_json_mode() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"response_format": {"type": "json_object"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_success("{\"ok\": true}")))
        .expect(1)
        .mount(&server)
        .await;

    let request = GenerationRequest::from_prompt("json please").with_structured_output(true);
    let envelope = openai(&server).generate(&request).await.unwrap();
    assert_eq!(envelope.parse_structured().unwrap()["ok"], true);
}

#[tokio::test]
async fn openai_status_mapping() {
    let cases = [
        (401, ErrorKind::Authentication, false),
        (403, ErrorKind::Authentication, false),
        (500, ErrorKind::ServerError, true),
        (503, ErrorKind::ServerError, true),
        (504, ErrorKind::Timeout, true),
        (400, ErrorKind::Unknown, false),
        (418, ErrorKind::Unknown, true),
    ];

    for (status, kind, retryable) in cases {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
            .mount(&server)
            .await;

        let err = openai(&server)
            .generate(&GenerationRequest::from_prompt("hi"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, kind, "status {}", status);
        assert_eq!(err.retryable, retryable, "status {}", status);
        assert_eq!(err.status, Some(status));
        assert_eq!(err.service, "openai");
    }
}

#[tokio::test]
async fn openai_rate_limit_carries_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "7")
                .set_body_string("slow down"),
        )
        .mount(&server)
        .await;

    let err = openai(&server)
        .generate(&GenerationRequest::from_prompt("hi"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::RateLimited);
    assert!(err.retryable);
    assert_eq!(err.retry_after, Some(Duration::from_secs(7)));
}

#[tokio::test]
async fn openai_empty_and_malformed_bodies_are_invalid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_success("")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
        .mount(&server)
        .await;

    let adapter = openai(&server);
    let request = GenerationRequest::from_prompt("hi");

    let empty = adapter.generate(&request).await.unwrap_err();
    assert_eq!(empty.kind, ErrorKind::InvalidResponse);
    assert!(empty.retryable);

    let malformed = adapter.generate(&request).await.unwrap_err();
    assert_eq!(malformed.kind, ErrorKind::InvalidResponse);
}

#[tokio::test]
async fn openai_probe_maps_to_health() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"max_tokens": 1})))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_success("p")))
        .expect(1)
        .mount(&server)
        .await;

    let status = openai(&server).health_check().await;
    assert_eq!(status.state, HealthState::Healthy);
    assert!(status.latency_ms.is_some());
}

#[tokio::test]
async fn openai_unreachable_is_retryable_unknown() {
    let config = ServiceConfig::new(AdapterKind::OpenAi)
        .with_api_key("sk-test")
        .with_api_base("http://127.0.0.1:1")
        .with_timeout_secs(2);
    let adapter = OpenAiAdapter::new("openai", &config).unwrap();

    let err = adapter
        .generate(&GenerationRequest::from_prompt("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Unknown | ErrorKind::Timeout));
    assert!(err.retryable);
}

// =============================================================================
// Anthropic
// =============================================================================

#[tokio::test]
async fn anthropic_success_lifts_system_prompt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(header("x-api-key", "sk-ant-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({
            "system": "be brief",
            "messages": [{"role": "user", "content": "hi"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_1",
            "model": "claude-test",
            "content": [{"type": "text", "text": "hel"}, {"type": "text", "text": "lo"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 9, "output_tokens": 2}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let request = GenerationRequest::new(vec![Message::system("be brief"), Message::user("hi")]);
    let envelope = anthropic(&server).generate(&request).await.unwrap();

    assert_eq!(envelope.content, "hello");
    assert_eq!(envelope.model, "claude-test");
    assert_eq!(envelope.usage.prompt_tokens, 9);
    assert_eq!(envelope.usage.total_tokens, 11);
    assert_eq!(envelope.metadata["stop_reason"], "end_turn");
}

#[tokio::test]
async fn anthropic_overloaded_is_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(529).set_body_json(json!({
            "type": "error",
            "error": {"type": "overloaded_error", "message": "Overloaded"}
        })))
        .mount(&server)
        .await;

    let err = anthropic(&server)
        .generate(&GenerationRequest::from_prompt("hi"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ServerError);
    assert!(err.retryable);
    assert_eq!(err.status, Some(529));
}

#[tokio::test]
async fn anthropic_error_types() {
    let cases = [
        (401, "authentication_error", ErrorKind::Authentication),
        (429, "rate_limit_error", ErrorKind::RateLimited),
        (400, "invalid_request_error", ErrorKind::Unknown),
        (500, "api_error", ErrorKind::ServerError),
    ];

    for (status, error_type, kind) in cases {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "type": "error",
                "error": {"type": error_type, "message": "details"}
            })))
            .mount(&server)
            .await;

        let err = anthropic(&server)
            .generate(&GenerationRequest::from_prompt("hi"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, kind, "{}", error_type);
    }
}

#[tokio::test]
async fn anthropic_no_text_blocks_is_invalid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [],
            "usage": {"input_tokens": 1, "output_tokens": 0}
        })))
        .mount(&server)
        .await;

    let err = anthropic(&server)
        .generate(&GenerationRequest::from_prompt("hi"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidResponse);
}

// =============================================================================
// Ollama
// =============================================================================

#[tokio::test]
async fn ollama_chat_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({
            "stream": false,
            "format": "json",
            "options": {"num_predict": 32}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "llama3:latest",
            "message": {"role": "assistant", "content": "{\"a\": 1}"},
            "done": true,
            "done_reason": "stop",
            "prompt_eval_count": 20,
            "eval_count": 6
        })))
        .expect(1)
        .mount(&server)
        .await;

    let request = GenerationRequest::from_prompt("hi")
        .with_max_tokens(32)
        .with_structured_output(true);
    let envelope = ollama(&server).generate(&request).await.unwrap();

    assert_eq!(envelope.usage.total_tokens, 26);
    assert_eq!(envelope.metadata["done_reason"], "stop");
    assert_eq!(envelope.parse_structured().unwrap()["a"], 1);
}

#[tokio::test]
async fn ollama_health_uses_model_list() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{"name": "mistral:latest"}]
        })))
        .mount(&server)
        .await;

    let status = ollama(&server).health_check().await;
    assert_eq!(status.state, HealthState::Degraded);
    assert!(status.error.unwrap().contains("ollama pull"));
}

#[tokio::test]
async fn ollama_health_rejects_unreadable_model_list() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy error</html>"))
        .mount(&server)
        .await;

    let status = ollama(&server).health_check().await;
    assert_eq!(status.state, HealthState::Unhealthy);
    assert!(status.error.unwrap().contains("unreadable model list"));
}

#[tokio::test]
async fn ollama_huge_token_counts_do_not_panic() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": {"role": "assistant", "content": "ok"},
            "done_reason": "stop",
            "prompt_eval_count": u32::MAX,
            "eval_count": 1
        })))
        .mount(&server)
        .await;

    let envelope = ollama(&server)
        .generate(&GenerationRequest::from_prompt("hi"))
        .await
        .unwrap();
    assert_eq!(envelope.usage.prompt_tokens, u32::MAX);
    assert_eq!(envelope.usage.total_tokens, u32::MAX);
}

// =============================================================================
// Dispatcher over HTTP
// =============================================================================

#[tokio::test]
async fn dispatcher_falls_back_across_backends() {
    let failing = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .expect(2)
        .mount(&failing)
        .await;

    let local = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": {"role": "assistant", "content": "from local"},
            "done_reason": "stop"
        })))
        .expect(1)
        .mount(&local)
        .await;

    let dispatcher = Dispatcher::builder()
        .add_adapter(openai(&failing))
        .add_adapter(ollama(&local))
        .fallback_chain(["openai", "ollama"])
        .base_delay(Duration::from_millis(10))
        .max_retries(2)
        .build();

    let envelope = dispatcher
        .generate(&GenerationRequest::from_prompt("hi"), Some("openai"))
        .await
        .unwrap();
    assert_eq!(envelope.service, "ollama");
    assert_eq!(envelope.content, "from local");
}
