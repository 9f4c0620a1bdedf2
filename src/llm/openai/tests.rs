use super::*;
use crate::config::LlmProviderKind;
use futures::StreamExt;
use serde_json::json;
use serial_test::serial;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, method, path},
};

fn config_for(server: &MockServer) -> LlmConfig {
    LlmConfig {
        provider: LlmProviderKind::OpenAi,
        model: "gpt-4o-mini".to_string(),
        openai_base_url: server.uri(),
        api_key_env: "NOTES_RAG_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
        timeout_secs: 5,
        ..LlmConfig::default()
    }
}

#[test]
fn missing_key_leaves_provider_unavailable() {
    let config = LlmConfig {
        api_key_env: "NOTES_RAG_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
        ..LlmConfig::default()
    };
    let provider = OpenAiProvider::new(&config).expect("should build provider");
    assert!(!provider.is_available());
    assert!(provider.with_api_key("sk-test").is_available());
}

#[test]
#[serial]
fn key_is_read_from_environment() {
    const VAR: &str = "NOTES_RAG_TEST_OPENAI_KEY";
    let config = LlmConfig {
        api_key_env: VAR.to_string(),
        ..LlmConfig::default()
    };

    // SAFETY: serialized with every other environment-touching test
    unsafe { std::env::set_var(VAR, "sk-from-env") };
    let with_key = OpenAiProvider::new(&config).expect("should build provider");
    // SAFETY: as above
    unsafe { std::env::set_var(VAR, "   ") };
    let blank = OpenAiProvider::new(&config).expect("should build provider");
    // SAFETY: as above
    unsafe { std::env::remove_var(VAR) };

    assert!(with_key.is_available());
    assert!(!blank.is_available());
}

#[tokio::test]
async fn initialize_requires_key() {
    let config = LlmConfig {
        api_key_env: "NOTES_RAG_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
        ..LlmConfig::default()
    };
    let provider = OpenAiProvider::new(&config).expect("should build provider");
    let error = provider.initialize().await.expect_err("should fail");
    assert!(matches!(error, RagError::Initialization(_)));
    assert!(error.to_string().contains("NOTES_RAG_TEST_KEY_THAT_IS_NEVER_SET"));
}

#[test]
fn base_url_keeps_path_prefix() {
    let config = LlmConfig {
        openai_base_url: "http://localhost:8080/proxy".to_string(),
        ..LlmConfig::default()
    };
    let provider = OpenAiProvider::new(&config)
        .expect("should build provider")
        .with_api_key("sk-test");
    let (url, _, _) = provider
        .prepare("hi", &GenerationOptions::default(), false)
        .expect("should prepare request");
    assert_eq!(url.as_str(), "http://localhost:8080/proxy/v1/chat/completions");
}

#[tokio::test(flavor = "multi_thread")]
async fn generate_sends_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "stream": false,
            "messages": [{"role": "user", "content": "What is borrowing?"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Temporary access."}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(&config_for(&server))
        .expect("should build provider")
        .with_api_key("sk-test");
    let generation = provider
        .generate("What is borrowing?", &GenerationOptions::default())
        .await
        .expect("should generate");

    assert_eq!(generation.text, "Temporary access.");
}

#[tokio::test(flavor = "multi_thread")]
async fn stream_parses_server_sent_events() {
    let server = MockServer::start().await;
    let body = [
        ": keep-alive".to_string(),
        format!(
            "data: {}",
            json!({"choices": [{"delta": {"role": "assistant"}}]})
        ),
        format!("data: {}", json!({"choices": [{"delta": {"content": "Temp"}}]})),
        String::new(),
        format!("data: {}", json!({"choices": [{"delta": {"content": "orary."}}]})),
        "data: [DONE]".to_string(),
        format!("data: {}", json!({"choices": [{"delta": {"content": "ignored"}}]})),
    ]
    .join("\n");

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(&config_for(&server))
        .expect("should build provider")
        .with_api_key("sk-test");
    let fragments: Vec<String> = provider
        .generate_stream("prompt", &GenerationOptions::default())
        .await
        .expect("should open stream")
        .map(|fragment| fragment.expect("fragment should be ok"))
        .collect()
        .await;

    assert_eq!(fragments, vec!["Temp", "orary."]);
}

#[tokio::test(flavor = "multi_thread")]
async fn unauthorized_is_a_generation_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(&config_for(&server))
        .expect("should build provider")
        .with_api_key("sk-wrong");
    let error = provider
        .generate("prompt", &GenerationOptions::default())
        .await
        .expect_err("should fail");
    assert!(matches!(error, RagError::Generation(_)));
}

#[tokio::test]
async fn generate_without_key_fails_fast() {
    let config = LlmConfig {
        api_key_env: "NOTES_RAG_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
        ..LlmConfig::default()
    };
    let provider = OpenAiProvider::new(&config).expect("should build provider");
    let error = provider
        .generate("prompt", &GenerationOptions::default())
        .await
        .expect_err("should fail");
    assert!(matches!(error, RagError::Generation(_)));
}
