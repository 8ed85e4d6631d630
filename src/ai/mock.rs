use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use super::{AiServiceError, CompletionClient, CompletionRequest};

/// Scripted completion client for tests and offline use.
///
/// Replays queued results in order, then falls back to a fixed result.
pub struct MockCompletionClient {
    script: Mutex<VecDeque<Result<String, AiServiceError>>>,
    fallback: Result<String, AiServiceError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockCompletionClient {
    /// Always answers with `response`.
    pub fn new(response: &str) -> Self {
        Self::with_fallback(Ok(response.to_string()))
    }

    /// Always fails with `error`.
    pub fn failing(error: AiServiceError) -> Self {
        Self::with_fallback(Err(error))
    }

    /// Replays `results`, then fails with a malformed-response error.
    pub fn scripted(results: Vec<Result<String, AiServiceError>>) -> Self {
        let mock = Self::with_fallback(Err(AiServiceError::MalformedResponse(
            "mock script exhausted".into(),
        )));
        *mock.script.lock().unwrap_or_else(PoisonError::into_inner) = results.into();
        mock
    }

    fn with_fallback(fallback: Result<String, AiServiceError>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            delay: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

impl CompletionClient for MockCompletionClient {
    fn complete(&self, request: &CompletionRequest) -> Result<String, AiServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CompletionRequest {
        CompletionRequest {
            prompt: "p".into(),
            system: "s".into(),
            max_tokens: 16,
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn script_replays_then_falls_back() {
        let mock = MockCompletionClient::scripted(vec![
            Err(AiServiceError::Timeout(Duration::from_secs(1))),
            Ok("second".into()),
        ]);
        assert!(mock.complete(&request()).is_err());
        assert_eq!(mock.complete(&request()).unwrap(), "second");
        assert!(matches!(
            mock.complete(&request()),
            Err(AiServiceError::MalformedResponse(_))
        ));
        assert_eq!(mock.call_count(), 3);
        assert_eq!(mock.last_request(), Some(request()));
    }

    #[test]
    fn fixed_response_repeats() {
        let mock = MockCompletionClient::new("same");
        assert_eq!(mock.complete(&request()).unwrap(), "same");
        assert_eq!(mock.complete(&request()).unwrap(), "same");
    }
}
