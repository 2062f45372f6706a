//! Fan-out aggregation across interchangeable providers
//!
//! Every call is spawned on its own task and awaited to completion, so one
//! provider failing (or panicking) never cancels the others. Results are
//! merged in the order the calls were given, not the order they finished.

use futures::future::{join_all, BoxFuture};
use std::fmt::Display;
use tracing::{debug, warn};

/// One named provider call
pub type ProviderCall<T, E> = (String, BoxFuture<'static, Result<Vec<T>, E>>);

/// Merged successes plus one warning per failed provider
#[derive(Debug, Clone, PartialEq)]
pub struct FanOutResult<T> {
    pub items: Vec<T>,
    pub warnings: Vec<String>,
}

impl<T> Default for FanOutResult<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

impl<T> FanOutResult<T> {
    /// True when no provider failed
    pub fn is_complete(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Warning text recorded for a provider that did not deliver
pub fn unavailable_warning(provider: &str, reason: impl Display) -> String {
    format!("Provider {} unavailable: {}", provider, reason)
}

/// Issue all calls concurrently and wait for every one to settle.
///
/// Never fails: with every provider down the result is empty with one
/// warning per provider.
pub async fn fan_out<T, E>(calls: Vec<ProviderCall<T, E>>) -> FanOutResult<T>
where
    T: Send + 'static,
    E: Display + Send + 'static,
{
    let (names, handles): (Vec<String>, Vec<_>) = calls
        .into_iter()
        .map(|(name, call)| (name, tokio::spawn(call)))
        .unzip();

    let settled = join_all(handles).await;
    let mut result = FanOutResult::default();

    for (name, outcome) in names.into_iter().zip(settled) {
        match outcome {
            Ok(Ok(items)) => {
                debug!(provider = %name, count = items.len(), "Provider call succeeded");
                result.items.extend(items);
            }
            Ok(Err(e)) => {
                warn!(provider = %name, error = %e, "Provider call failed");
                result.warnings.push(unavailable_warning(&name, e));
            }
            Err(join_error) => {
                let reason = if join_error.is_panic() {
                    "provider task panicked"
                } else {
                    "provider task was cancelled"
                };
                warn!(provider = %name, reason, "Provider task did not complete");
                result.warnings.push(unavailable_warning(&name, reason));
            }
        }
    }

    result
}
