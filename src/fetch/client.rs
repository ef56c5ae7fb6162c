//! Fetch client: one logical fetch with bounded retries
//!
//! # Retry Logic
//!
//! | Condition | Action |
//! |-----------|--------|
//! | Malformed or non-HTTP URL | `Err(InvalidUrl)`, never retried |
//! | HTTP 5xx, 408, 429 | Retry up to `max_attempts`, policy delay |
//! | Timeout, connection error | Retry up to `max_attempts`, policy delay |
//! | Other non-2xx | Immediate `Failure` |
//! | Cancellation | Immediate `Failure` |

use crate::fetch::retry::RetryPolicy;
use crate::fetch::transport::{Transport, TransportError};
use crate::HarvestError;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Result of a fetch operation
#[derive(Debug)]
pub enum FetchResult {
    /// Successfully fetched the page
    Success {
        /// Page body content
        content: String,
        /// Final URL after redirects
        url: String,
        /// Attempts it took, including the successful one
        attempts: u32,
    },

    /// The page could not be fetched
    Failure {
        reason: FailureReason,
        attempts: u32,
    },
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Success { attempts, .. } | Self::Failure { attempts, .. } => *attempts,
        }
    }
}

/// Why a fetch gave up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Every attempt failed with a transient error; holds the last one
    Exhausted(TransportError),
    /// The transport reported a failure that retrying will not fix
    Permanent(TransportError),
    /// The fetch was cancelled
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted(e) => write!(f, "retries exhausted, last error: {}", e),
            Self::Permanent(e) => write!(f, "{}", e),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Fetches URLs through a transport under a retry policy
#[derive(Clone)]
pub struct FetchClient {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl FetchClient {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            cancel: CancellationToken::new(),
        }
    }

    /// Aborts pending fetches and backoff sleeps when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetches a URL, retrying transient failures
    ///
    /// Emits one warning per retry and one error when the attempt budget is
    /// exhausted.
    ///
    /// # Returns
    ///
    /// * `Ok(FetchResult)` - Success, or a definitive failure for this pass
    /// * `Err(HarvestError::InvalidUrl)` - The URL cannot be fetched at all
    pub async fn fetch(&self, url: &str) -> Result<FetchResult, HarvestError> {
        let parsed = parse_fetchable(url)?;
        let mut attempts = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(FetchResult::Failure {
                    reason: FailureReason::Cancelled,
                    attempts,
                });
            }

            attempts += 1;

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Ok(FetchResult::Failure {
                        reason: FailureReason::Cancelled,
                        attempts,
                    });
                }
                outcome = self.transport.get(&parsed) => outcome,
            };

            let error = match outcome {
                Ok(page) => {
                    return Ok(FetchResult::Success {
                        content: page.body,
                        url: page.url,
                        attempts,
                    });
                }
                Err(e) => e,
            };

            if !error.is_transient() {
                tracing::debug!("Fetch of {} failed permanently: {}", url, error);
                return Ok(FetchResult::Failure {
                    reason: FailureReason::Permanent(error),
                    attempts,
                });
            }

            if !self.policy.allows_retry(attempts) {
                tracing::error!(
                    "Giving up on {} after {} attempts: {}",
                    url,
                    attempts,
                    error
                );
                return Ok(FetchResult::Failure {
                    reason: FailureReason::Exhausted(error),
                    attempts,
                });
            }

            let delay = self.policy.delay_for(attempts);
            tracing::warn!(
                "Attempt {}/{} for {} failed ({}), retrying in {:?}",
                attempts,
                self.policy.max_attempts,
                url,
                error,
                delay
            );

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Ok(FetchResult::Failure {
                        reason: FailureReason::Cancelled,
                        attempts,
                    });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Parses a URL and rejects schemes the transport cannot fetch
fn parse_fetchable(url: &str) -> Result<Url, HarvestError> {
    let parsed = Url::parse(url).map_err(|e| HarvestError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(HarvestError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme '{}'", scheme),
        }),
    }
}
