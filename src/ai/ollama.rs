use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{AiServiceError, CompletionClient, CompletionRequest};

/// Connection establishment bound, separate from the per-request timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Ollama HTTP client for local LLM inference.
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::blocking::Client,
}

impl OllamaClient {
    /// Create a client for `model` on the Ollama instance at `base_url`.
    pub fn new(base_url: &str, model: &str) -> Result<Self, AiServiceError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| AiServiceError::Unavailable(format!("HTTP client init failed: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Request body for Ollama /api/generate
#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    num_predict: u32,
}

/// Response body from Ollama /api/generate
#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

impl CompletionClient for OllamaClient {
    fn complete(&self, request: &CompletionRequest) -> Result<String, AiServiceError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = OllamaGenerateRequest {
            model: &self.model,
            prompt: &request.prompt,
            system: &request.system,
            stream: false,
            options: OllamaOptions {
                num_predict: request.max_tokens,
            },
        };

        let response = self
            .client
            .post(&url)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    AiServiceError::Timeout(request.timeout)
                } else if e.is_connect() {
                    AiServiceError::Unavailable(self.base_url.clone())
                } else {
                    AiServiceError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let body = response.text().unwrap_or_default();
            return Err(classify_status(status, body, retry_after));
        }

        let parsed: OllamaGenerateResponse = response.json().map_err(|e| {
            if e.is_timeout() {
                AiServiceError::Timeout(request.timeout)
            } else {
                AiServiceError::MalformedResponse(e.to_string())
            }
        })?;

        Ok(parsed.response)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Map a non-success HTTP status to the error taxonomy.
pub fn classify_status(status: StatusCode, body: String, retry_after: Option<Duration>) -> AiServiceError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => AiServiceError::RateLimited { retry_after },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AiServiceError::Unauthorized,
        StatusCode::REQUEST_TIMEOUT => AiServiceError::Server {
            status: status.as_u16(),
            body,
        },
        s if s.is_server_error() => AiServiceError::Server {
            status: s.as_u16(),
            body,
        },
        s => AiServiceError::BadRequest(format!("status {}: {body}", s.as_u16())),
    }
}

/// Retry-After in delta-seconds form. HTTP-date values are ignored.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
