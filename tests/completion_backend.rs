//! Integration tests for the llama.cpp-style completion backend, against a
//! wiremock server.

use std::time::Duration;

use installer_llm::inference::{CompletionServer, GenerationParams, TextGenerator};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn params() -> GenerationParams {
    GenerationParams {
        max_tokens: 64,
        temperature: 0.3,
        top_p: 0.9,
        stop: vec!["<|im_end|>".into()],
    }
}

#[tokio::test]
async fn sends_token_prompt_and_reads_tokens() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/completion"))
        .and(body_partial_json(json!({
            "prompt": [10, 20, 30],
            "n_predict": 64,
            "return_tokens": true,
            "stop": ["<|im_end|>"],
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": "lsblk",
            "tokens": [7, 8, 9],
            "stop": true,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = CompletionServer::new(&format!("{}/", server.uri()), Duration::from_secs(5)).unwrap();
    let ids = backend.generate(&[10, 20, 30], &params()).await.unwrap();
    assert_eq!(ids, vec![7, 8, 9]);
}

#[tokio::test]
async fn error_status_is_reported() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/completion"))
        .respond_with(ResponseTemplate::new(503).set_body_string("loading model"))
        .mount(&server)
        .await;

    let backend = CompletionServer::new(&server.uri(), Duration::from_secs(5)).unwrap();
    let err = backend.generate(&[1], &params()).await.unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("503"), "{msg}");
    assert!(msg.contains("loading model"), "{msg}");
}

#[tokio::test]
async fn missing_tokens_is_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/completion"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"content": "lsblk"})))
        .mount(&server)
        .await;

    let backend = CompletionServer::new(&server.uri(), Duration::from_secs(5)).unwrap();
    let err = backend.generate(&[1], &params()).await.unwrap_err();
    assert!(err.to_string().contains("did not return tokens"));
}
