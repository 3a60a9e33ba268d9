use std::time::Duration;

use reqwest::Client;

use serde::{Deserialize, Serialize};

use tracing::{debug, error};

use crate::error::{Error, ErrorKind, Result};

// Default sampling temperature: greedy decoding.
const DEFAULT_TEMPERATURE: f32 = 0.0;
// Default maximum number of generated tokens.
const DEFAULT_MAX_NEW_TOKENS: u32 = 128;
// Default repetition penalty.
const DEFAULT_REPETITION_PENALTY: f32 = 1.1;
// A completion may take far longer than a registry request.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

fn generation_error(e: impl std::fmt::Display) -> Error {
    Error::new(ErrorKind::Generation, e.to_string())
}

/// Options controlling a text completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum number of generated tokens.
    pub max_new_tokens: u32,
    /// Penalty applied to repeated tokens.
    pub repetition_penalty: f32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            repetition_penalty: DEFAULT_REPETITION_PENALTY,
        }
    }
}

impl GenerationOptions {
    /// Sets the sampling temperature.
    ///
    /// A temperature of `0.0` makes the completion deterministic.
    #[must_use]
    #[inline]
    pub const fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Sets the maximum number of generated tokens.
    #[must_use]
    #[inline]
    pub const fn max_new_tokens(mut self, max_new_tokens: u32) -> Self {
        self.max_new_tokens = max_new_tokens;
        self
    }

    /// Sets the penalty applied to repeated tokens.
    #[must_use]
    #[inline]
    pub const fn repetition_penalty(mut self, repetition_penalty: f32) -> Self {
        self.repetition_penalty = repetition_penalty;
        self
    }
}

/// A text-generation channel.
///
/// It completes a text prompt. The completion is free text and must never
/// be trusted as a structured document.
pub trait TextGenerator {
    /// Completes the given prompt.
    ///
    /// # Errors
    ///
    /// An error is returned when the channel is unreachable, times out, or
    /// cannot produce a completion.
    fn complete(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> impl Future<Output = Result<String>> + Send;
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    temperature: f32,
    n_predict: u32,
    repeat_penalty: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    content: String,
}

/// A [`TextGenerator`] backed by a `llama.cpp` compatible completion server.
///
/// Each completion is a single `POST /completion` request, it is never
/// retried.
#[derive(Debug, Clone)]
pub struct LlamaServer {
    url: String,
    timeout: Duration,
    client: Client,
}

impl LlamaServer {
    /// Creates a [`LlamaServer`] for the server at the given base address.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into().trim_end_matches('/').to_owned();
        Self {
            url,
            timeout: DEFAULT_TIMEOUT,
            client: Client::new(),
        }
    }

    /// Sets the timeout of a completion request.
    #[must_use]
    #[inline]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl TextGenerator for LlamaServer {
    async fn complete(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        let url = format!("{}/completion", self.url);
        debug!("Requesting a completion to `{url}`");

        let request = CompletionRequest {
            prompt,
            temperature: options.temperature,
            n_predict: options.max_new_tokens,
            repeat_penalty: options.repetition_penalty,
            stream: false,
        };

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| {
                error!("Completion request to `{url}` failed: {e}");
                generation_error(e)
            })?;

        let completion = response
            .json::<CompletionResponse>()
            .await
            .map_err(generation_error)?;

        Ok(completion.content)
    }
}

#[cfg(test)]
mod tests {
    use axum::{Json, Router, routing::post};

    use serde_json::{Value, json};

    use crate::error::ErrorKind;
    use crate::tests::serve;

    use super::{GenerationOptions, LlamaServer, TextGenerator};

    #[test]
    fn default_options() {
        let options = GenerationOptions::default();
        assert_eq!(options.temperature, 0.0);
        assert_eq!(options.max_new_tokens, 128);
        assert_eq!(options.repetition_penalty, 1.1);

        let options = options.temperature(0.7).max_new_tokens(16).repetition_penalty(1.3);
        assert_eq!(options.temperature, 0.7);
        assert_eq!(options.max_new_tokens, 16);
        assert_eq!(options.repetition_penalty, 1.3);
    }

    #[tokio::test]
    async fn llama_completion() {
        // Echo the sampling options back inside the completion.
        let router = Router::new().route(
            "/completion",
            post(|Json(body): Json<Value>| async move {
                Json(json!({
                    "content": format!(
                        "{} {} {} {}",
                        body["prompt"], body["n_predict"], body["temperature"], body["stream"]
                    ),
                    "stop": true,
                }))
            }),
        );
        let url = serve(router).await;

        let server = LlamaServer::new(format!("{url}/"));
        let completion = server
            .complete("hello", &GenerationOptions::default().max_new_tokens(8))
            .await
            .unwrap();

        assert_eq!(completion, r#""hello" 8 0.0 false"#);
    }

    #[tokio::test]
    async fn llama_failure() {
        let router = Router::new().route(
            "/completion",
            post(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "loading model") }),
        );
        let url = serve(router).await;

        let error = LlamaServer::new(url)
            .complete("hello", &GenerationOptions::default())
            .await
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Generation);
    }
}
