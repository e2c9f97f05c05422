//! Loopback pipeline for running a frontend without a crypto backend.
//!
//! Envelopes are taken at face value: nothing is decrypted and the
//! `payload` field is used as-is. An agent becomes authenticated once it
//! has posted an enrolment (any unauthenticated envelope with a non-empty
//! payload); other unauthenticated envelopes are ignored. Authenticated
//! posts are echoed back. Work queued with [`LoopbackPipeline::enqueue`] is
//! handed out one message per drain.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use prost::Message;
use tracing::{debug, info};

use crate::envelope::CommsEnvelope;
use crate::message::MessageInfo;
use crate::notifications::NotificationRegistry;
use crate::pipeline::{MessagePipeline, PipelineError, ProcessOutcome};

pub struct LoopbackPipeline {
    registry: Arc<NotificationRegistry>,
    enrolled: DashSet<String>,
    queues: DashMap<String, VecDeque<Vec<u8>>>,
}

impl LoopbackPipeline {
    #[must_use]
    pub fn new(registry: Arc<NotificationRegistry>) -> Self {
        Self {
            registry,
            enrolled: DashSet::new(),
            queues: DashMap::new(),
        }
    }

    #[must_use]
    pub fn is_enrolled(&self, source: &str) -> bool {
        self.enrolled.contains(source)
    }

    /// Queue `payload` for `source` and wake its poll connection.
    ///
    /// Returns whether a poll connection was woken.
    pub fn enqueue(&self, source: &str, payload: impl Into<Vec<u8>>) -> bool {
        self.queues
            .entry(source.to_string())
            .or_default()
            .push_back(payload.into());
        self.registry.notify(source)
    }

    /// Messages waiting for `source`.
    #[must_use]
    pub fn queued(&self, source: &str) -> usize {
        self.queues.get(source).map_or(0, |q| q.len())
    }

    fn reply(source: &str, payload: Vec<u8>) -> Bytes {
        Bytes::from(
            CommsEnvelope {
                source: source.to_string(),
                payload,
                ..Default::default()
            }
            .encode_to_vec(),
        )
    }
}

#[async_trait]
impl MessagePipeline for LoopbackPipeline {
    async fn decrypt(&self, body: Bytes) -> Result<MessageInfo, PipelineError> {
        let envelope = CommsEnvelope::decode_stream(&body)
            .map_err(|e| PipelineError::Decrypt(e.to_string()))?;
        if envelope.source.is_empty() {
            return Err(PipelineError::Decrypt("envelope has no source".into()));
        }
        let authenticated = self.is_enrolled(&envelope.source);
        Ok(MessageInfo::new(
            envelope.source,
            authenticated,
            Bytes::from(envelope.payload),
        ))
    }

    async fn process_unauthenticated(&self, info: &MessageInfo) -> Result<(), PipelineError> {
        if info.payload.is_empty() {
            debug!(source = %info.source, "Ignoring unauthenticated message without enrolment");
            return Ok(());
        }
        if self.enrolled.insert(info.source.clone()) {
            info!(source = %info.source, remote_addr = %info.remote_addr, "Agent enrolled");
        }
        Ok(())
    }

    async fn process(
        &self,
        info: &MessageInfo,
        drain: bool,
    ) -> Result<ProcessOutcome, PipelineError> {
        if !drain {
            debug!(source = %info.source, len = info.payload.len(), "Echoing post");
            return Ok(ProcessOutcome {
                response: Self::reply(&info.source, info.payload.to_vec()),
                pending: 1,
            });
        }

        let next = self
            .queues
            .get_mut(&info.source)
            .and_then(|mut queue| queue.pop_front());
        self.queues.remove_if(&info.source, |_, queue| queue.is_empty());
        Ok(match next {
            Some(payload) => ProcessOutcome {
                response: Self::reply(&info.source, payload),
                pending: 1,
            },
            None => ProcessOutcome::default(),
        })
    }
}
