//! HTTP adapter tests against a local mock of the upstream endpoint.

use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tokengate::{
    ChatMessage, CompletionRequest, CompletionService, OpenAiCompletionService, OpenAiConfig,
    UpstreamError,
};

fn request() -> CompletionRequest {
    CompletionRequest {
        model: "gpt-3.5-turbo-16k".into(),
        messages: vec![
            ChatMessage::system("You are a helpful assistant."),
            ChatMessage::user("Hello"),
        ],
        temperature: 0.7,
        max_tokens: Some(256),
        user: Some("user-1".into()),
    }
}

async fn service_for(server: &MockServer) -> OpenAiCompletionService {
    OpenAiCompletionService::new(
        OpenAiConfig::new("test-key")
            .with_endpoint(format!("{}/v1/chat/completions", server.uri()))
            .with_timeout(Duration::from_secs(5)),
    )
}

#[tokio::test]
async fn test_success_decodes_content_and_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "gpt-3.5-turbo-16k",
            "max_tokens": 256,
            "messages": [{"role": "system"}, {"role": "user", "content": "Hello"}],
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hi!"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 21, "completion_tokens": 2, "total_tokens": 23}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = service_for(&server)
        .await
        .complete(&request(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.content, "Hi!");
    assert_eq!(outcome.usage.prompt_tokens, 21);
    assert_eq!(outcome.usage.completion_tokens, 2);
}

#[tokio::test]
async fn test_429_classified_as_rate_limited() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "2"))
        .mount(&server)
        .await;

    let err = service_for(&server)
        .await
        .complete(&request(), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        UpstreamError::RateLimited { retry_after } => {
            assert_eq!(retry_after, Some(Duration::from_secs(2)));
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }
}

#[tokio::test]
async fn test_context_length_error_classified_for_trimming() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "message": "This model's maximum context length is 16385 tokens.",
                "type": "invalid_request_error",
                "param": "messages",
                "code": "context_length_exceeded"
            }
        })))
        .mount(&server)
        .await;

    let err = service_for(&server)
        .await
        .complete(&request(), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        UpstreamError::ContextLengthExceeded { message } => {
            assert!(message.contains("16385"));
        }
        other => panic!("expected ContextLengthExceeded, got {other:?}"),
    }
}

#[tokio::test]
async fn test_structured_error_keeps_upstream_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "message": "Invalid value for temperature.",
                "type": "invalid_request_error",
                "code": null
            }
        })))
        .mount(&server)
        .await;

    let err = service_for(&server)
        .await
        .complete(&request(), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        UpstreamError::Api { message, code } => {
            assert_eq!(message, "Invalid value for temperature.");
            assert_eq!(code.as_deref(), Some("invalid_request_error"));
        }
        other => panic!("expected Api, got {other:?}"),
    }
}

#[tokio::test]
async fn test_undecodable_body_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = service_for(&server)
        .await
        .complete(&request(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, UpstreamError::Malformed(_)));
}

#[tokio::test]
async fn test_missing_choices_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [],
            "usage": {"prompt_tokens": 1, "completion_tokens": 0, "total_tokens": 1}
        })))
        .mount(&server)
        .await;

    let err = service_for(&server)
        .await
        .complete(&request(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, UpstreamError::Malformed(_)));
}

#[tokio::test]
async fn test_cancellation_abandons_slow_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(30))
                .set_body_json(json!({"choices": [], "usage": {}})),
        )
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let service = service_for(&server).await;
    let outbound = request();
    let call = service.complete(&outbound, &cancel);
    cancel.cancel();

    let err = call.await.unwrap_err();
    assert!(matches!(err, UpstreamError::Cancelled));
}
