//! Client for the locally hosted, OpenAI-compatible inference server
//! (LM Studio by default on `localhost:1234`).

use crate::config::{ApiEndpoints, Config, ModelSettings};
use crate::error::JarvisError;
use crate::health::{ModelProbe, ProbeOutcome};
use crate::protocol::{CompletionRequest, CompletionResponse, ModelList};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, StatusCode};
use tracing::debug;

/// Raw body chunks of a streamed completion.
pub type ChunkStream = BoxStream<'static, Result<Bytes>>;

/// A completion, shaped by the `stream` setting at request time.
pub enum CompletionResult {
    /// The whole message content of a non-streamed response.
    Single(String),
    Stream(ChunkStream),
}

pub struct LlmClient {
    client: Client,
    api: ApiEndpoints,
    model: ModelSettings,
}

impl LlmClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            api: config.api.clone(),
            model: config.model.clone(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model.name
    }

    /// Send `history\nprompt` to the completion endpoint.
    ///
    /// No timeout is applied: generation can take as long as the model needs.
    pub async fn complete(&self, history: &str, prompt: &str) -> Result<CompletionResult> {
        let request = CompletionRequest::new(&self.model, history, prompt);
        debug!(
            "Sending completion request to {} (model: {}, stream: {})",
            self.api.completion, request.model, request.stream
        );

        let response = self
            .client
            .post(&self.api.completion)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to connect to {}", self.api.completion))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Completion request failed with status {}: {}",
                status,
                body
            ));
        }

        if request.stream {
            let chunks = response.bytes_stream().map_err(anyhow::Error::from).boxed();
            return Ok(CompletionResult::Stream(chunks));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .context("Failed to parse completion response")?;
        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or(JarvisError::EmptyCompletion)?;
        Ok(CompletionResult::Single(
            choice.message.content.unwrap_or_default(),
        ))
    }
}

#[async_trait]
impl ModelProbe for LlmClient {
    async fn probe(&self) -> Result<ProbeOutcome> {
        let response = match self.client.get(&self.api.models).send().await {
            Ok(response) => response,
            Err(e) => return Ok(ProbeOutcome::Unreachable(e.to_string())),
        };

        if response.status() != StatusCode::OK {
            return Ok(ProbeOutcome::UnexpectedStatus(response.status().as_u16()));
        }

        match response.json::<ModelList>().await {
            Ok(models) => Ok(loaded_models(&models)),
            Err(e) => Ok(ProbeOutcome::InvalidResponse(e.to_string())),
        }
    }
}

fn loaded_models(models: &ModelList) -> ProbeOutcome {
    match models.data.len() {
        0 => ProbeOutcome::NoModelLoaded,
        n => ProbeOutcome::Ready { models: n },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode_chunk, StreamEvent};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answer exactly one HTTP request with `status` and `body`, return the base URL.
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        format!("http://{}", addr)
    }

    /// Consume headers and body so closing the socket doesn't reset the connection.
    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&request);
            if let Some(end) = text.find("\r\n\r\n") {
                let content_length = text[..end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if request.len() >= end + 4 + content_length {
                    return;
                }
            }
        }
    }

    fn client_for(base: &str, stream: bool) -> LlmClient {
        let mut config = crate::config::tests::sample_config();
        config.api.models = format!("{}/v1/models", base);
        config.api.completion = format!("{}/v1/chat/completions", base);
        config.model.stream = stream;
        LlmClient {
            client: Client::builder().no_proxy().build().unwrap(),
            api: config.api,
            model: config.model,
        }
    }

    async fn closed_port() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_complete_single() {
        let base = serve_once("200 OK", r#"{"choices":[{"message":{"content":"Hello"}}]}"#).await;
        let result = client_for(&base, false).complete("", "hi").await.unwrap();
        match result {
            CompletionResult::Single(text) => assert_eq!(text, "Hello"),
            CompletionResult::Stream(_) => panic!("expected a single completion"),
        }
    }

    #[tokio::test]
    async fn test_complete_without_choices() {
        let base = serve_once("200 OK", r#"{"choices":[]}"#).await;
        let err = client_for(&base, false).complete("", "hi").await.err().unwrap();
        assert!(matches!(
            err.downcast_ref::<JarvisError>(),
            Some(JarvisError::EmptyCompletion)
        ));
    }

    #[tokio::test]
    async fn test_complete_error_status_carries_body() {
        let base = serve_once("500 Internal Server Error", r#"{"error":"model crashed"}"#).await;
        let err = client_for(&base, false).complete("", "hi").await.err().unwrap();
        let message = err.to_string();
        assert!(message.contains("500"), "{}", message);
        assert!(message.contains("model crashed"), "{}", message);
    }

    #[tokio::test]
    async fn test_complete_stream() {
        let base = serve_once(
            "200 OK",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\ndata: [DONE]\n\n",
        )
        .await;
        let result = client_for(&base, true).complete("", "hi").await.unwrap();
        let CompletionResult::Stream(mut chunks) = result else {
            panic!("expected a streamed completion");
        };

        let mut body = Vec::new();
        while let Some(chunk) = chunks.next().await {
            body.extend_from_slice(&chunk.unwrap());
        }
        let events = decode_chunk(&body);
        assert_eq!(events, vec![StreamEvent::Delta("Hi".into()), StreamEvent::Done]);
    }

    #[tokio::test]
    async fn test_model_query_ready() {
        let base = serve_once("200 OK", r#"{"data":[{"id":"llama"}]}"#).await;
        let outcome = client_for(&base, true).probe().await.unwrap();
        assert_eq!(outcome, ProbeOutcome::Ready { models: 1 });
    }

    #[tokio::test]
    async fn test_model_query_empty_list() {
        let base = serve_once("200 OK", r#"{"data":[]}"#).await;
        let outcome = client_for(&base, true).probe().await.unwrap();
        assert_eq!(outcome, ProbeOutcome::NoModelLoaded);
    }

    #[tokio::test]
    async fn test_model_query_unexpected_status() {
        let base = serve_once("503 Service Unavailable", "{}").await;
        let outcome = client_for(&base, true).probe().await.unwrap();
        assert_eq!(outcome, ProbeOutcome::UnexpectedStatus(503));
    }

    #[tokio::test]
    async fn test_model_query_without_model_list_is_offline() {
        let base = serve_once("200 OK", r#"{"object":"list"}"#).await;
        let outcome = client_for(&base, true).probe().await.unwrap();
        assert!(matches!(outcome, ProbeOutcome::InvalidResponse(_)));
        assert!(!outcome.is_online());
    }

    #[tokio::test]
    async fn test_model_query_refused_port_is_unreachable() {
        let base = closed_port().await;
        let outcome = client_for(&base, true).probe().await.unwrap();
        assert!(matches!(outcome, ProbeOutcome::Unreachable(_)));
    }

    #[tokio::test]
    async fn test_invalid_model_list_fails_health_check() {
        let base = serve_once("200 OK", r#"{"object":"list"}"#).await;
        let client = client_for(&base, true);
        let mut config = crate::config::tests::sample_config();
        config.last_health_check = "2000-01-01T00:00:00".to_string();
        let dir = std::env::temp_dir().join(format!("jarvis-llm-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(crate::config::CONFIG_FILE_NAME);
        std::fs::write(&path, serde_json::to_string(&config).unwrap()).unwrap();
        let mut file = crate::config::ConfigFile::load(&path).unwrap();

        let now = chrono::Local::now().naive_local();
        let online = crate::health::is_llm_online(&mut file, &client, now).await.unwrap();
        assert!(!online);
    }

    #[test]
    fn test_loaded_models() {
        let list: ModelList =
            serde_json::from_str(r#"{"data":[{"id":"llama-3-8b-instruct","object":"model"}]}"#)
                .unwrap();
        assert_eq!(loaded_models(&list), ProbeOutcome::Ready { models: 1 });
    }

    #[test]
    fn test_empty_model_list() {
        let list: ModelList = serde_json::from_str(r#"{"data":[]}"#).unwrap();
        assert_eq!(loaded_models(&list), ProbeOutcome::NoModelLoaded);
    }
}
