//! OpenAI-compatible HTTP client.
//!
//! Serves both the captioning backend (vision-language model) and the text
//! backend (summarization model). The client is not ready until model
//! discovery has succeeded; callers gate dispatch on [`OpenAiClient::is_ready`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use tracing::{debug, info, warn};

use vsum_models::ModelInfo;

use crate::backend::{CaptionBackend, TextBackend, TokenStream};
use crate::config::OpenAiConfig;
use crate::error::{InferenceError, InferenceResult};
use crate::types::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ModelList};

const CHAT_COMPLETIONS_PATH: &str = "v1/chat/completions";

/// Client for an OpenAI-compatible chat completion server.
pub struct OpenAiClient {
    http: Client,
    config: OpenAiConfig,
    model: RwLock<Option<String>>,
    ready: AtomicBool,
}

impl OpenAiClient {
    /// Create a new client. No request is sent until [`OpenAiClient::discover_model`].
    pub fn new(config: OpenAiConfig) -> InferenceResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(InferenceError::Network)?;

        Ok(Self {
            http,
            config,
            model: RwLock::new(None),
            ready: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    /// Model currently in use.
    pub fn model(&self) -> Option<String> {
        self.model
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Whether the last model discovery succeeded.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Query the model listing endpoint and select a model.
    ///
    /// The configured model is used when the server lists it, otherwise the
    /// first listed model. Marks the client ready on success and not ready on
    /// any failure.
    pub async fn discover_model(&self) -> InferenceResult<String> {
        let result = self.fetch_model().await;

        match &result {
            Ok(model) => {
                *self
                    .model
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(model.clone());
                self.ready.store(true, Ordering::SeqCst);
                info!(backend = %self.config.name, model = %model, "Inference backend ready");
            }
            Err(e) => {
                self.ready.store(false, Ordering::SeqCst);
                warn!(backend = %self.config.name, "Model discovery failed: {}", e);
            }
        }

        result
    }

    async fn fetch_model(&self) -> InferenceResult<String> {
        let url = self.config.url(&self.config.models_path);
        debug!("Fetching models from {}", url);

        let response = self
            .authorized(self.http.get(&url))
            .send()
            .await
            .map_err(|e| InferenceError::ServiceUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(InferenceError::ServiceUnavailable(format!(
                "model listing returned {}",
                response.status()
            )));
        }

        let models: ModelList = response.json().await?;

        if let Some(wanted) = &self.config.model {
            if models.data.iter().any(|m| &m.id == wanted) {
                return Ok(wanted.clone());
            }
            warn!(
                backend = %self.config.name,
                model = %wanted,
                "Configured model not listed by server, using first available"
            );
        }

        models
            .data
            .into_iter()
            .next()
            .map(|m| m.id)
            .ok_or_else(|| InferenceError::ServiceUnavailable("no models available".to_string()))
    }

    fn require_model(&self) -> InferenceResult<String> {
        if !self.ready.load(Ordering::SeqCst) {
            return Err(InferenceError::not_ready(format!(
                "{} backend has no discovered model",
                self.config.name
            )));
        }
        self.model()
            .ok_or_else(|| InferenceError::not_ready(format!("{} backend has no model", self.config.name)))
    }

    async fn send_chat(&self, messages: Vec<ChatMessage>, stream: bool) -> InferenceResult<reqwest::Response> {
        let model = self.require_model()?;
        let request = ChatCompletionRequest {
            model: &model,
            messages,
            stream,
            defaults: &self.config.defaults,
        };

        let url = self.config.url(CHAT_COMPLETIONS_PATH);
        let response = self
            .authorized(self.http.post(&url))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Timeout(self.config.timeout.as_secs())
                } else {
                    InferenceError::Network(e)
                }
            })?;

        let status = response.status();
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::ServiceUnavailable(format!("{}: {}", status, body)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::request_failed(format!(
                "{} returned {}: {}",
                self.config.name, status, body
            )));
        }

        Ok(response)
    }

    async fn chat(&self, messages: Vec<ChatMessage>) -> InferenceResult<String> {
        let response: ChatCompletionResponse = self.send_chat(messages, false).await?.json().await?;
        response
            .into_content()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| InferenceError::invalid_response("completion had no content"))
    }

    fn info(&self) -> Option<ModelInfo> {
        self.model().map(|model| ModelInfo {
            model,
            device: self.config.device.clone(),
            pipeline: None,
        })
    }
}

#[async_trait]
impl CaptionBackend for OpenAiClient {
    fn is_ready(&self) -> bool {
        OpenAiClient::is_ready(self)
    }

    fn model_info(&self) -> Option<ModelInfo> {
        self.info()
    }

    async fn caption(&self, prompt: &str, image_urls: &[String]) -> InferenceResult<String> {
        self.chat(vec![ChatMessage::user_with_images(prompt, image_urls)]).await
    }
}

#[async_trait]
impl TextBackend for OpenAiClient {
    fn is_ready(&self) -> bool {
        OpenAiClient::is_ready(self)
    }

    fn model_info(&self) -> Option<ModelInfo> {
        self.info()
    }

    async fn complete(&self, prompt: &str) -> InferenceResult<String> {
        self.chat(vec![ChatMessage::user_text(prompt)]).await
    }

    async fn stream(&self, prompt: &str) -> InferenceResult<TokenStream> {
        let response = self.send_chat(vec![ChatMessage::user_text(prompt)], true).await?;
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(InferenceError::Network))
            .boxed();
        Ok(sse_tokens(body))
    }
}

/// Decoder state for a server-sent event body.
struct SseState {
    body: BoxStream<'static, InferenceResult<Vec<u8>>>,
    buffer: Vec<u8>,
    pending: VecDeque<InferenceResult<String>>,
    done: bool,
}

impl SseState {
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            self.handle_line(&line);
        }
    }

    fn handle_line(&mut self, line: &str) {
        if self.done {
            return;
        }
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.trim();
        if data == "[DONE]" {
            self.done = true;
            return;
        }
        match serde_json::from_str::<ChatCompletionChunk>(data) {
            Ok(chunk) => {
                let content = chunk
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.delta.content)
                    .filter(|c| !c.is_empty());
                if let Some(content) = content {
                    self.pending.push_back(Ok(content));
                }
            }
            Err(e) => self.pending.push_back(Err(InferenceError::Json(e))),
        }
    }
}

/// Turn a streaming completion body into a stream of content fragments.
fn sse_tokens(body: BoxStream<'static, InferenceResult<Vec<u8>>>) -> TokenStream {
    let state = SseState {
        body,
        buffer: Vec::new(),
        pending: VecDeque::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(&chunk);
                    state.drain_lines();
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(e), state));
                }
                None => {
                    // Body ended without a trailing newline or [DONE]
                    state.buffer.push(b'\n');
                    state.drain_lines();
                    state.done = true;
                }
            }
        }
    })
    .boxed()
}
