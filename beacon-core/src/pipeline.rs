//! Boundary to the decrypt and dispatch pipeline.
//!
//! The frontend never looks inside a message. It hands raw request bytes to
//! [`MessagePipeline::decrypt`], checks the authentication bit on the result,
//! and hands the context back to [`MessagePipeline::process`] to obtain the
//! encrypted reply. Cryptography, enrolment and the work queue all live
//! behind this trait.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::message::MessageInfo;

/// Errors surfaced by the pipeline.
///
/// The frontend maps these onto protocol statuses without leaking detail:
/// a decrypt failure is always a bare 403 whatever its cause.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The envelope could not be parsed or decrypted.
    #[error("decrypt failed: {0}")]
    Decrypt(String),

    /// An unauthenticated message was not a valid enrolment.
    #[error("enrolment rejected: {0}")]
    Enrolment(String),

    /// Dispatching the message or draining the queue failed.
    #[error("dispatch failed: {0}")]
    Dispatch(String),
}

/// Output of one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Encrypted reply envelope, ready to write to the wire.
    pub response: Bytes,
    /// Number of queued messages included in `response`.
    pub pending: usize,
}

/// The decrypt and dispatch pipeline consumed by both channels.
#[async_trait]
pub trait MessagePipeline: Send + Sync + 'static {
    /// Decrypt a request body into a message context.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Decrypt`] for anything that is not a valid
    /// envelope for this server.
    async fn decrypt(&self, body: Bytes) -> Result<MessageInfo, PipelineError>;

    /// Handle an unauthenticated message on the post channel.
    ///
    /// Enrolment requests are processed; anything else is ignored. Either
    /// way `Ok` means the agent is told to enrol.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Enrolment`] when an enrolment request could
    /// not be processed.
    async fn process_unauthenticated(&self, info: &MessageInfo) -> Result<(), PipelineError>;

    /// Dispatch an authenticated message and collect queued replies.
    ///
    /// With `drain` set, the incoming payload is ignored and only work already
    /// queued for `info.source` is collected; this is what the poll channel
    /// uses.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Dispatch`] when processing fails.
    async fn process(
        &self,
        info: &MessageInfo,
        drain: bool,
    ) -> Result<ProcessOutcome, PipelineError>;
}
