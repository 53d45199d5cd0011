//! Served model categories.
//!
//! Every model category the platform serves is one [`ModelKind`] variant.
//! The variant decides the endpoint, the request payload and what a healthy
//! answer looks like; [`ServedModel`] carries out the three operations the
//! harness needs on any model (`check`, `run`, `create_replica`).

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::auth::{Session, SessionError};

/// 1x1 transparent PNG, enough for a vision model to accept the request.
const PROBE_IMAGE: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

/// Model errors
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("{url} returned {status}: {body}")]
    Status {
        url: String,
        status: StatusCode,
        body: String,
    },

    #[error("Unexpected {kind} response: {detail}")]
    UnexpectedResponse { kind: ModelKind, detail: String },

    #[error("Unknown model kind: {0}")]
    UnknownKind(String),
}

/// Model categories served by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Llm,
    Vlm,
    Embedding,
    Rerank,
    Parser,
    Audio,
}

impl ModelKind {
    pub const ALL: [ModelKind; 6] = [
        ModelKind::Llm,
        ModelKind::Vlm,
        ModelKind::Embedding,
        ModelKind::Rerank,
        ModelKind::Parser,
        ModelKind::Audio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Llm => "llm",
            ModelKind::Vlm => "vlm",
            ModelKind::Embedding => "embedding",
            ModelKind::Rerank => "rerank",
            ModelKind::Parser => "parser",
            ModelKind::Audio => "audio",
        }
    }

    /// Serving path, relative to the model's base URL.
    pub fn endpoint(&self) -> &'static str {
        match self {
            ModelKind::Llm | ModelKind::Vlm => "/v1/chat/completions",
            ModelKind::Embedding => "/v1/embeddings",
            ModelKind::Rerank => "/v1/rerank",
            ModelKind::Parser => "/v1/parse",
            ModelKind::Audio => "/v1/audio/speech",
        }
    }

    /// Input used by `check`.
    pub fn probe_input(&self) -> &'static str {
        match self {
            ModelKind::Llm => "Say hello in one word.",
            ModelKind::Vlm => "Describe this image in one word.",
            ModelKind::Embedding | ModelKind::Rerank => "What is the capital of France?",
            ModelKind::Parser => "# Title\n\nA short paragraph.",
            ModelKind::Audio => "Hello.",
        }
    }

    /// Request body for `input`.
    pub fn request_body(&self, model: &str, input: &str) -> Value {
        match self {
            ModelKind::Llm => json!({
                "model": model,
                "messages": [{"role": "user", "content": input}],
                "max_tokens": 64,
            }),
            ModelKind::Vlm => json!({
                "model": model,
                "messages": [{
                    "role": "user",
                    "content": [
                        {"type": "text", "text": input},
                        {"type": "image_url", "image_url": {"url": PROBE_IMAGE}},
                    ],
                }],
                "max_tokens": 64,
            }),
            ModelKind::Embedding => json!({"model": model, "input": [input]}),
            ModelKind::Rerank => json!({
                "model": model,
                "query": input,
                "documents": [
                    "Paris is the capital of France.",
                    "Berlin is the capital of Germany.",
                ],
            }),
            ModelKind::Parser => json!({"model": model, "content": input}),
            ModelKind::Audio => json!({"model": model, "input": input, "voice": "default"}),
        }
    }

    /// Whether a JSON answer has the shape this kind promises.
    ///
    /// Audio answers are raw bytes and are checked separately.
    pub fn validate(&self, body: &Value) -> Result<(), String> {
        let ok = match self {
            ModelKind::Llm | ModelKind::Vlm => body
                .pointer("/choices/0/message")
                .is_some(),
            ModelKind::Embedding => body
                .pointer("/data/0/embedding")
                .and_then(Value::as_array)
                .is_some_and(|v| !v.is_empty()),
            ModelKind::Rerank => body
                .get("results")
                .and_then(Value::as_array)
                .is_some_and(|v| !v.is_empty()),
            ModelKind::Parser => body.get("content").is_some() || body.get("result").is_some(),
            ModelKind::Audio => true,
        };
        if ok {
            Ok(())
        } else {
            Err(body.to_string().chars().take(200).collect())
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ModelError::UnknownKind(s.to_string()))
    }
}

/// Operations available on every served model
#[async_trait]
pub trait ModelOps: Send + Sync {
    /// Send the kind's probe request and validate the answer.
    async fn check(&self) -> Result<(), ModelError>;

    /// Send `input` and return the answer.
    async fn run(&self, input: &str) -> Result<Value, ModelError>;

    /// Ask the platform to scale the model to `replicas` instances.
    async fn create_replica(&self, session: &Session, replicas: u32) -> Result<Value, ModelError>;
}

/// A model reachable on an OpenAI-compatible serving endpoint
pub struct ServedModel {
    pub kind: ModelKind,
    pub name: String,
    serving_url: String,
    api_key: Option<String>,
    client: Client,
}

impl ServedModel {
    pub fn new(
        kind: ModelKind,
        name: impl Into<String>,
        serving_url: impl Into<String>,
    ) -> Result<Self, ModelError> {
        let client = Client::builder().timeout(Duration::from_secs(120)).build()?;
        Ok(Self {
            kind,
            name: name.into(),
            serving_url: serving_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            client,
        })
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn url(&self) -> String {
        format!("{}{}", self.serving_url, self.kind.endpoint())
    }

    async fn post(&self, input: &str) -> Result<reqwest::Response, ModelError> {
        let url = self.url();
        let mut req = self
            .client
            .post(&url)
            .json(&self.kind.request_body(&self.name, input));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ModelError::Status { url, status, body });
        }
        Ok(resp)
    }
}

#[async_trait]
impl ModelOps for ServedModel {
    async fn check(&self) -> Result<(), ModelError> {
        let answer = self.run(self.kind.probe_input()).await?;
        self.kind
            .validate(&answer)
            .map_err(|detail| ModelError::UnexpectedResponse {
                kind: self.kind,
                detail,
            })?;
        info!("{} model {} answered correctly", self.kind, self.name);
        Ok(())
    }

    async fn run(&self, input: &str) -> Result<Value, ModelError> {
        let resp = self.post(input).await?;
        if self.kind == ModelKind::Audio {
            let content_type = resp
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let bytes = resp.bytes().await?;
            if bytes.is_empty() {
                return Err(ModelError::UnexpectedResponse {
                    kind: self.kind,
                    detail: "empty audio body".to_string(),
                });
            }
            return Ok(json!({"bytes": bytes.len(), "content_type": content_type}));
        }
        let body: Value = resp.json().await?;
        debug!("{} answer: {}", self.name, body);
        Ok(body)
    }

    async fn create_replica(&self, session: &Session, replicas: u32) -> Result<Value, ModelError> {
        let url = session.url(&format!("/v1/models/{}/replicas", self.name));
        info!("Scaling {} to {} replicas", self.name, replicas);
        let resp = session
            .send(|c| c.post(&url).json(&json!({"replicas": replicas})))
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ModelError::Status { url, status, body });
        }
        Ok(resp.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::PlatformConfig;
    use httpmock::prelude::*;

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in ModelKind::ALL {
            assert_eq!(kind.as_str().parse::<ModelKind>().unwrap(), kind);
        }
        assert_eq!("LLM".parse::<ModelKind>().unwrap(), ModelKind::Llm);
        assert!("tts".parse::<ModelKind>().is_err());
    }

    #[test]
    fn test_endpoints() {
        assert_eq!(ModelKind::Vlm.endpoint(), "/v1/chat/completions");
        assert_eq!(ModelKind::Embedding.endpoint(), "/v1/embeddings");
        assert_eq!(ModelKind::Rerank.endpoint(), "/v1/rerank");
    }

    #[test]
    fn test_vlm_body_carries_image() {
        let body = ModelKind::Vlm.request_body("qwen-vl", "hi");
        assert_eq!(
            body.pointer("/messages/0/content/1/type").and_then(Value::as_str),
            Some("image_url")
        );
    }

    #[test]
    fn test_validate_shapes() {
        assert!(ModelKind::Llm
            .validate(&json!({"choices": [{"message": {"content": "hi"}}]}))
            .is_ok());
        assert!(ModelKind::Llm.validate(&json!({"choices": []})).is_err());
        assert!(ModelKind::Embedding
            .validate(&json!({"data": [{"embedding": [0.1, 0.2]}]}))
            .is_ok());
        assert!(ModelKind::Embedding
            .validate(&json!({"data": [{"embedding": []}]}))
            .is_err());
        assert!(ModelKind::Rerank
            .validate(&json!({"results": [{"index": 0, "relevance_score": 0.9}]}))
            .is_ok());
        assert!(ModelKind::Parser.validate(&json!({"content": "# Title"})).is_ok());
        assert!(ModelKind::Parser.validate(&json!({"error": "x"})).is_err());
    }

    #[tokio::test]
    async fn test_check_llm() {
        let server = MockServer::start_async().await;
        let chat = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .header("Authorization", "Bearer sk-test")
                    .json_body_partial(r#"{"model": "qwen"}"#);
                then.status(200)
                    .json_body(json!({"choices": [{"message": {"role": "assistant", "content": "Hello"}}]}));
            })
            .await;

        let model = ServedModel::new(ModelKind::Llm, "qwen", server.base_url())
            .unwrap()
            .with_api_key("sk-test");
        model.check().await.unwrap();
        chat.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_check_rejects_wrong_shape() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embeddings");
                then.status(200).json_body(json!({"object": "list", "data": []}));
            })
            .await;

        let model = ServedModel::new(ModelKind::Embedding, "bge", server.base_url()).unwrap();
        let err = model.check().await.unwrap_err();
        assert!(matches!(
            err,
            ModelError::UnexpectedResponse {
                kind: ModelKind::Embedding,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/rerank");
                then.status(503).body("model is loading");
            })
            .await;

        let model = ServedModel::new(ModelKind::Rerank, "bge-reranker", server.base_url()).unwrap();
        match model.run("q").await.unwrap_err() {
            ModelError::Status { status, body, .. } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(body, "model is loading");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_audio_run_reports_bytes() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/audio/speech");
                then.status(200)
                    .header("content-type", "audio/wav")
                    .body(vec![1u8; 128]);
            })
            .await;

        let model = ServedModel::new(ModelKind::Audio, "cosyvoice", server.base_url()).unwrap();
        let answer = model.run("Hello.").await.unwrap();
        assert_eq!(answer["bytes"], 128);
        assert_eq!(answer["content_type"], "audio/wav");
        model.check().await.unwrap();
    }

    #[tokio::test]
    async fn test_create_replica_goes_through_session() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/auth/login");
                then.status(200).json_body(json!({"access_token": "tok"}));
            })
            .await;
        let scale = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/models/qwen/replicas")
                    .header("Authorization", "Bearer tok")
                    .json_body(json!({"replicas": 2}));
                then.status(200).json_body(json!({"name": "qwen", "replicas": 2}));
            })
            .await;

        let session = Session::new(PlatformConfig {
            base_url: server.base_url(),
            ..Default::default()
        })
        .unwrap();
        let model = ServedModel::new(ModelKind::Llm, "qwen", "http://unused:8000").unwrap();

        let answer = model.create_replica(&session, 2).await.unwrap();
        assert_eq!(answer["replicas"], 2);
        scale.assert_hits_async(1).await;
    }
}
