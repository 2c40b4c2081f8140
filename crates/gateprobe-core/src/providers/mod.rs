use async_trait::async_trait;
use std::fmt;

use crate::model::ProbeResult;

/// Why a probe never produced a usable result.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The transport environment itself is missing (no webview, host shut
    /// down). Nothing reached the wire, so the step may be retried as-is.
    Unavailable,
    /// The request was attempted and failed: network error, timeout, or a
    /// response too broken to summarize.
    Failed(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Unavailable => write!(f, "probe transport unavailable"),
            TransportError::Failed(msg) => write!(f, "probe failed: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Delivery seam between the engine and whatever actually speaks HTTP. The
/// host hands the envelope to its embedded webview (or any other stack),
/// drains the stream and reports back one [`ProbeResult`].
///
/// The envelope's `x-probe-*` headers are directives for the transport and
/// must be stripped before anything goes upstream.
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    async fn probe(
        &self,
        provider_id: &str,
        base_url: &str,
        envelope: &serde_json::Value,
    ) -> Result<ProbeResult, TransportError>;

    fn transport_name(&self) -> &'static str;
}

pub mod fake;
