use super::*;
use crate::config::OllamaConfig;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

fn config_for(server: &MockServer) -> EmbeddingConfig {
    let address = server.address();
    EmbeddingConfig {
        backend: crate::config::EmbeddingBackend::Ollama,
        model: "nomic-embed-text".to_string(),
        batch_size: 2,
        ollama: OllamaConfig {
            protocol: "http".to_string(),
            host: address.ip().to_string(),
            port: address.port(),
        },
        ..EmbeddingConfig::default()
    }
}

async fn mount_tags(server: &MockServer, model: &str) {
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "models": [{"name": model, "size": 274302450, "digest": "abc"}]
        })))
        .mount(server)
        .await;
}

async fn mount_embed(server: &MockServer, embeddings: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "nomic-embed-text",
                "embeddings": embeddings
            })),
        )
        .mount(server)
        .await;
}

#[test]
fn client_configuration() {
    let config = EmbeddingConfig {
        model: "test-model".to_string(),
        batch_size: 128,
        ollama: OllamaConfig {
            protocol: "http".to_string(),
            host: "test-host".to_string(),
            port: 1234,
        },
        ..EmbeddingConfig::default()
    };
    let client = OllamaEmbedder::new(&config).expect("Failed to create client");

    assert_eq!(client.model, "test-model");
    assert_eq!(client.batch_size, 128);
    assert_eq!(client.dimension(), 0);
    assert_eq!(client.base_url.host_str(), Some("test-host"));
    assert_eq!(client.base_url.port(), Some(1234));
}

#[tokio::test(flavor = "multi_thread")]
async fn connect_probes_dimension() {
    let server = MockServer::start().await;
    mount_tags(&server, "nomic-embed-text:latest").await;
    mount_embed(&server, serde_json::json!([[0.1, 0.2, 0.3]])).await;

    let config = config_for(&server);
    let embedder = tokio::task::spawn_blocking(move || OllamaEmbedder::connect(&config))
        .await
        .expect("task should join")
        .expect("should connect");

    assert_eq!(embedder.dimension(), 3);
    assert_eq!(embedder.name(), "nomic-embed-text");
}

#[tokio::test(flavor = "multi_thread")]
async fn connect_fails_for_missing_model() {
    let server = MockServer::start().await;
    mount_tags(&server, "llama3.2:3b").await;

    let config = config_for(&server);
    let result = tokio::task::spawn_blocking(move || OllamaEmbedder::connect(&config))
        .await
        .expect("task should join");

    assert!(result.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn embed_normalizes_vector() {
    let server = MockServer::start().await;
    mount_embed(&server, serde_json::json!([[3.0, 4.0]])).await;

    let config = config_for(&server);
    let vector = tokio::task::spawn_blocking(move || {
        let mut embedder = OllamaEmbedder::new(&config)?;
        embedder.embed("hello")
    })
    .await
    .expect("task should join")
    .expect("should embed");

    assert!((vector[0] - 0.6).abs() < 1e-6);
    assert!((vector[1] - 0.8).abs() < 1e-6);
}

#[tokio::test(flavor = "multi_thread")]
async fn batch_mismatch_falls_back_to_single_requests() {
    let server = MockServer::start().await;
    // Always one vector back, so a two-item batch is rejected
    mount_embed(&server, serde_json::json!([[1.0, 0.0]])).await;

    let config = config_for(&server);
    let results = tokio::task::spawn_blocking(move || {
        let mut embedder = OllamaEmbedder::new(&config)?;
        anyhow::Ok(embedder.embed_batch(&["a".to_string(), "b".to_string()]))
    })
    .await
    .expect("task should join")
    .expect("should build client");

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(Result::is_ok));
}

#[tokio::test(flavor = "multi_thread")]
async fn server_error_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let config = config_for(&server);
    let result = tokio::task::spawn_blocking(move || {
        let mut embedder = OllamaEmbedder::new(&config)?;
        embedder.embed("hello")
    })
    .await
    .expect("task should join");

    assert!(result.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_vector_is_rejected() {
    let server = MockServer::start().await;
    mount_embed(&server, serde_json::json!([[]])).await;

    let config = config_for(&server);
    let result = tokio::task::spawn_blocking(move || {
        let mut embedder = OllamaEmbedder::new(&config)?;
        embedder.embed("hello")
    })
    .await
    .expect("task should join");

    assert!(result.is_err());
}
