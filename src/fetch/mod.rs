//! Fetching with retry semantics
//!
//! This module contains:
//! - The [`Transport`] seam and its `reqwest` implementation
//! - The explicit [`RetryPolicy`] applied to every fetch
//! - The [`FetchClient`] composing the two

mod client;
mod retry;
mod transport;

pub use client::{FailureReason, FetchClient, FetchResult};
pub use retry::{Backoff, RetryPolicy};
pub use transport::{build_http_client, FetchedPage, HttpTransport, Transport, TransportError};

#[cfg(test)]
pub(crate) use transport::stub;

use crate::config::FetchConfig;
use crate::HarvestError;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Builds an HTTP-backed fetch client from configuration
pub fn http_client(
    config: &FetchConfig,
    cancel: CancellationToken,
) -> Result<FetchClient, HarvestError> {
    let transport = HttpTransport::from_config(config)?;
    Ok(FetchClient::new(Arc::new(transport), RetryPolicy::from_config(config)).with_cancellation(cancel))
}
