//! Per-request message context produced by the decrypt step.

use bytes::Bytes;

/// A decrypted message, scoped to one post request or one poll connection.
///
/// Built by [`MessagePipeline::decrypt`](crate::pipeline::MessagePipeline::decrypt)
/// and owned by the handler that requested it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageInfo {
    /// Agent identifier as claimed in the envelope.
    pub source: String,
    /// Whether the sender's signature verified against a known key.
    pub authenticated: bool,
    /// Best-effort remote address, empty when unknown.
    pub remote_addr: String,
    /// Decrypted inner payload, opaque at this layer.
    pub payload: Bytes,
}

impl MessageInfo {
    #[must_use]
    pub fn new(source: impl Into<String>, authenticated: bool, payload: Bytes) -> Self {
        Self {
            source: source.into(),
            authenticated,
            remote_addr: String::new(),
            payload,
        }
    }

    /// Attach the remote address the frontend observed for this request.
    #[must_use]
    pub fn with_remote_addr(mut self, remote_addr: impl Into<String>) -> Self {
        self.remote_addr = remote_addr.into();
        self
    }
}
