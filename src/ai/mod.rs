//! AI completion seam: the client trait, its error type, and the
//! cache/retry controller every model call goes through.

pub mod cache;
pub mod controller;
pub mod mock;
pub mod ollama;
pub mod retry;

pub use cache::*;
pub use controller::*;
pub use mock::*;
pub use ollama::*;
pub use retry::*;

use std::time::Duration;

use thiserror::Error;

/// One completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub system: String,
    pub max_tokens: u32,
    /// Per-attempt timeout, enforced by the client.
    pub timeout: Duration,
}

/// A text-completion backend.
pub trait CompletionClient: Send + Sync {
    fn complete(&self, request: &CompletionRequest) -> Result<String, AiServiceError>;

    /// Model identifier recorded on generated treatments.
    fn model_name(&self) -> &str;
}

/// Failures of the AI dependency.
///
/// `Clone` so one in-flight result can be handed to every waiting caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AiServiceError {
    #[error("AI request timed out after {0:?}")]
    Timeout(Duration),

    #[error("AI service rate limited the request")]
    RateLimited { retry_after: Option<Duration> },

    #[error("AI service is not reachable at {0}")]
    Unavailable(String),

    #[error("AI service returned error (status {status}): {body}")]
    Server { status: u16, body: String },

    #[error("AI service rejected the request: {0}")]
    BadRequest(String),

    #[error("AI service rejected the credentials")]
    Unauthorized,

    #[error("Malformed AI response: {0}")]
    MalformedResponse(String),

    #[error("AI request failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<AiServiceError>,
    },

    #[error("AI request exceeded its deadline of {deadline:?}{}", cause_suffix(.last))]
    DeadlineExceeded {
        deadline: Duration,
        /// Transient failure seen before giving up, if any attempt ran.
        last: Option<Box<AiServiceError>>,
    },

    #[error("AI request cancelled")]
    Cancelled,
}

fn cause_suffix(last: &Option<Box<AiServiceError>>) -> String {
    last.as_ref().map(|e| format!(" (last error: {e})")).unwrap_or_default()
}

impl AiServiceError {
    /// Failures expected to clear up on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AiServiceError::Timeout(_)
                | AiServiceError::RateLimited { .. }
                | AiServiceError::Unavailable(_)
                | AiServiceError::Server { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_message_names_last_cause() {
        let err = AiServiceError::DeadlineExceeded {
            deadline: Duration::from_millis(200),
            last: Some(Box::new(AiServiceError::Unauthorized)),
        };
        assert_eq!(
            err.to_string(),
            "AI request exceeded its deadline of 200ms (last error: AI service rejected the credentials)"
        );
        assert!(!err.is_transient());
    }

    #[test]
    fn transient_classification() {
        assert!(AiServiceError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(AiServiceError::RateLimited { retry_after: None }.is_transient());
        assert!(AiServiceError::Unavailable("http://localhost:11434".into()).is_transient());
        assert!(AiServiceError::Server {
            status: 503,
            body: String::new()
        }
        .is_transient());

        assert!(!AiServiceError::BadRequest("bad".into()).is_transient());
        assert!(!AiServiceError::Unauthorized.is_transient());
        assert!(!AiServiceError::MalformedResponse("x".into()).is_transient());
        assert!(!AiServiceError::Cancelled.is_transient());
    }

    #[test]
    fn exhausted_error_names_last_cause() {
        let e = AiServiceError::RetriesExhausted {
            attempts: 3,
            last: Box::new(AiServiceError::Server {
                status: 502,
                body: "bad gateway".into(),
            }),
        };
        let msg = e.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("502"));
    }
}
