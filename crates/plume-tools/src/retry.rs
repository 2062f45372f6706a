//! Resilient call policy
//!
//! Wraps a single outbound call with bounded retry and exponential backoff.
//! Whether a failure is worth another attempt is decided by [`STATUS_RULES`],
//! a first-match table over HTTP status codes, so every client in this crate
//! shares one classification instead of hand-rolling its own loop.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Attempts per call unless configured otherwise
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Delay before the second attempt; doubles for every attempt after that
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);
/// Upper bound for a single attempt (connect + response)
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// What to do with a response or failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Success,
    Retryable,
    Fatal,
}

/// Inclusive status range mapped to a disposition
#[derive(Debug, Clone, Copy)]
pub struct StatusRule {
    pub from: u16,
    pub to: u16,
    pub disposition: Disposition,
}

impl StatusRule {
    const fn new(from: u16, to: u16, disposition: Disposition) -> Self {
        Self {
            from,
            to,
            disposition,
        }
    }

    fn matches(&self, status: u16) -> bool {
        (self.from..=self.to).contains(&status)
    }
}

/// Status classification, first match wins. Anything unlisted is fatal.
pub const STATUS_RULES: &[StatusRule] = &[
    StatusRule::new(200, 299, Disposition::Success),
    StatusRule::new(401, 401, Disposition::Fatal),
    StatusRule::new(403, 403, Disposition::Fatal),
    StatusRule::new(500, 599, Disposition::Retryable),
    StatusRule::new(400, 499, Disposition::Fatal),
];

/// Classify an HTTP status code using [`STATUS_RULES`]
pub fn classify_status(status: u16) -> Disposition {
    STATUS_RULES
        .iter()
        .find(|rule| rule.matches(status))
        .map(|rule| rule.disposition)
        .unwrap_or(Disposition::Fatal)
}

/// A single failed attempt
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("request failed: {0}")]
    Transport(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid response body: {0}")]
    Decode(String),
}

impl CallError {
    /// Network-level failures are transient; a body we cannot decode is not
    pub fn disposition(&self) -> Disposition {
        match self {
            CallError::Status { status, .. } => classify_status(*status),
            CallError::Transport(_) | CallError::Timeout(_) => Disposition::Retryable,
            CallError::Decode(_) => Disposition::Fatal,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            CallError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for CallError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            CallError::Decode(e.to_string())
        } else {
            CallError::Transport(e.to_string())
        }
    }
}

/// The call gave up: either a fatal failure or the attempt budget ran out
#[derive(Debug, thiserror::Error)]
#[error("{last} (after {attempts} attempt(s))")]
pub struct RetryError {
    pub attempts: u32,
    pub last: CallError,
}

impl RetryError {
    pub fn status(&self) -> Option<u16> {
        self.last.status()
    }
}

/// Bounded retry with exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Backoff slept after `attempt` (1-based) fails: `base_delay * 2^(attempt-1)`
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Run `op` until it succeeds, fails fatally, or the budget is spent.
    ///
    /// There is no delay before the first attempt. The returned error always
    /// carries the last failure observed.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let outcome = match tokio::time::timeout(self.timeout, op()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(CallError::Timeout(self.timeout)),
            };

            let err = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(call = label, attempt, "Call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if err.disposition() != Disposition::Retryable {
                warn!(call = label, attempt, error = %err, "Fatal call failure, not retrying");
                return Err(RetryError {
                    attempts: attempt,
                    last: err,
                });
            }

            if attempt >= max_attempts {
                warn!(call = label, attempt, error = %err, "Retry budget exhausted");
                return Err(RetryError {
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = self.delay(attempt);
            warn!(
                call = label,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retryable call failure, backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// POST a JSON body and decode a JSON response, retrying per policy.
    ///
    /// `authorization` is the full header value (`Bearer ...`, `Ghost ...`).
    pub async fn post_json<B, T>(
        &self,
        client: &reqwest::Client,
        url: &str,
        authorization: Option<&str>,
        body: &B,
    ) -> Result<T, RetryError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.run(url, || {
            let mut request = client
                .post(url)
                .header("Accept", "application/json")
                .json(body);
            if let Some(value) = authorization {
                request = request.header("Authorization", value);
            }
            send_json(request)
        })
        .await
    }
}

/// Send one request and turn non-2xx responses into [`CallError::Status`]
pub async fn send_json<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T, CallError> {
    let response = request.send().await?;
    let status = response.status();
    if classify_status(status.as_u16()) != Disposition::Success {
        let body = response.text().await.unwrap_or_default();
        return Err(CallError::Status {
            status: status.as_u16(),
            body,
        });
    }
    response
        .json::<T>()
        .await
        .map_err(|e| CallError::Decode(e.to_string()))
}
