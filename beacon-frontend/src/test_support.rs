//! Shared fixtures for handler unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use beacon_core::config::{
    AutocertConfig, Config, LimitsConfig, ListenConfig, TimingConfig, TlsConfig,
};
use beacon_core::{
    FrontendMetrics, HealthState, MessageInfo, MessagePipeline, NotificationRegistry,
    PipelineError, ProcessOutcome,
};

use crate::state::AppState;

/// Pipeline driven by plain-text bodies of the form `<source>:<auth|anon>:<payload>`.
///
/// Unauthenticated payload `enrol` is an enrolment and `bad-enrol` one that
/// fails; other unauthenticated payloads are ignored. Authenticated posts
/// with payload `fail` error in dispatch; anything else is echoed as
/// `reply-to-<source>`. Drains return whatever was queued with
/// [`queue`](Self::queue).
#[derive(Default)]
pub struct ScriptedPipeline {
    pub dispatch_delay: Duration,
    pub enrolments: AtomicUsize,
    pub dispatches: AtomicUsize,
    pub drains: AtomicUsize,
    queued: Mutex<HashMap<String, Vec<u8>>>,
}

impl ScriptedPipeline {
    pub fn with_delay(dispatch_delay: Duration) -> Self {
        Self {
            dispatch_delay,
            ..Self::default()
        }
    }

    pub fn queue(&self, source: &str, work: &[u8]) {
        self.queued
            .lock()
            .unwrap()
            .entry(source.to_string())
            .or_default()
            .extend_from_slice(work);
    }
}

#[async_trait]
impl MessagePipeline for ScriptedPipeline {
    async fn decrypt(&self, body: Bytes) -> Result<MessageInfo, PipelineError> {
        let text =
            std::str::from_utf8(&body).map_err(|e| PipelineError::Decrypt(e.to_string()))?;
        let mut parts = text.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(source), Some(auth), Some(payload)) => Ok(MessageInfo::new(
                source,
                auth == "auth",
                Bytes::copy_from_slice(payload.as_bytes()),
            )),
            _ => Err(PipelineError::Decrypt("not an envelope".into())),
        }
    }

    async fn process_unauthenticated(&self, info: &MessageInfo) -> Result<(), PipelineError> {
        match &info.payload[..] {
            b"enrol" => {
                self.enrolments.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            b"bad-enrol" => Err(PipelineError::Enrolment("malformed request".into())),
            _ => Ok(()),
        }
    }

    async fn process(
        &self,
        info: &MessageInfo,
        drain: bool,
    ) -> Result<ProcessOutcome, PipelineError> {
        if drain {
            self.drains.fetch_add(1, Ordering::SeqCst);
            let work = self.queued.lock().unwrap().remove(&info.source);
            return Ok(match work {
                Some(work) => ProcessOutcome {
                    response: Bytes::from(work),
                    pending: 1,
                },
                None => ProcessOutcome::default(),
            });
        }

        tokio::time::sleep(self.dispatch_delay).await;
        self.dispatches.fetch_add(1, Ordering::SeqCst);
        if &info.payload[..] == b"fail" {
            return Err(PipelineError::Dispatch("boom".into()));
        }
        Ok(ProcessOutcome {
            response: Bytes::from(format!("reply-to-{}", info.source)),
            pending: 1,
        })
    }
}

pub fn test_config() -> Config {
    Config {
        listen: ListenConfig::default(),
        tls: TlsConfig::Autocert(AutocertConfig {
            hostnames: vec!["frontend.example.com".into()],
            cache_dir: "/nonexistent".into(),
            challenge_port: 80,
        }),
        limits: LimitsConfig::default(),
        timing: TimingConfig::default(),
        proxy_header: None,
        redirect_url: None,
        public_dir: None,
        admin: None,
    }
}

pub fn test_state(pipeline: Arc<ScriptedPipeline>) -> AppState {
    AppState::new(
        &test_config(),
        pipeline,
        Arc::new(NotificationRegistry::new()),
        FrontendMetrics::unregistered(),
        Arc::new(HealthState::new()),
        CancellationToken::new(),
    )
}
