//! Shared harness for end-to-end frontend tests.
//!
//! Starts a real [`Frontend`] on `127.0.0.1:0` with a freshly minted CA and
//! leaf certificate, backed by the loopback pipeline, and hands back a
//! reqwest client that trusts the CA and resolves the leaf's name to the
//! bound address.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use prost::Message;
use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair};
use reqwest::Client;
use tempfile::TempDir;
use tokio::task::JoinHandle;

use beacon_core::config::{
    Config, LimitsConfig, ListenConfig, StaticTlsConfig, TimingConfig, TlsConfig,
};
use beacon_core::{
    CommsEnvelope, DrainResult, FrontendMetrics, LifecycleManager, LoopbackPipeline,
    MessagePipeline, NotificationRegistry,
};
use beacon_frontend::Frontend;

pub const HOSTNAME: &str = "beacon.test";

/// Certificate material written to a temp dir.
pub struct TestPki {
    pub dir: TempDir,
    pub ca_pem: String,
    pub leaf_pem: String,
    pub tls: StaticTlsConfig,
}

impl TestPki {
    pub fn generate() -> Self {
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let ca_key = KeyPair::generate().unwrap();
        let ca = ca_params.self_signed(&ca_key).unwrap();

        let leaf_params = CertificateParams::new(vec![HOSTNAME.to_string()]).unwrap();
        let leaf_key = KeyPair::generate().unwrap();
        let leaf = leaf_params.signed_by(&leaf_key, &ca, &ca_key).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let certificate = dir.path().join("frontend.crt");
        let private_key = dir.path().join("frontend.key");
        std::fs::write(&certificate, leaf.pem()).unwrap();
        std::fs::write(&private_key, leaf_key.serialize_pem()).unwrap();

        Self {
            dir,
            ca_pem: ca.pem(),
            leaf_pem: leaf.pem(),
            tls: StaticTlsConfig {
                certificate,
                private_key,
            },
        }
    }
}

/// Static-mode config on an ephemeral loopback port with short timers.
pub fn test_config(pki: &TestPki) -> Config {
    Config {
        listen: ListenConfig {
            bind_address: "127.0.0.1".parse().unwrap(),
            bind_port: 0,
            ..ListenConfig::default()
        },
        tls: TlsConfig::Static(pki.tls.clone()),
        limits: LimitsConfig::default(),
        timing: TimingConfig {
            max_poll: Duration::from_secs(30),
            poll_jitter: Duration::ZERO,
            post_padding_interval: Duration::from_millis(50),
            poll_keepalive_interval: Duration::from_millis(50),
            shutdown_grace: Duration::from_secs(5),
        },
        proxy_header: None,
        redirect_url: None,
        public_dir: None,
        admin: None,
    }
}

/// A running frontend and everything a test needs to drive it.
pub struct TestFrontend {
    pub addr: SocketAddr,
    pub client: Client,
    pub lifecycle: Arc<LifecycleManager>,
    pub registry: Arc<NotificationRegistry>,
    pub pipeline: Arc<LoopbackPipeline>,
    pub run: JoinHandle<DrainResult>,
    pub pki: TestPki,
}

impl TestFrontend {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    pub async fn start_with(customize: impl FnOnce(&mut Config)) -> Self {
        let pki = TestPki::generate();
        let mut config = test_config(&pki);
        customize(&mut config);

        let lifecycle = Arc::new(LifecycleManager::new(config.timing.shutdown_grace));
        let registry = Arc::new(NotificationRegistry::new());
        let pipeline = Arc::new(LoopbackPipeline::new(Arc::clone(&registry)));

        let backend: Arc<dyn MessagePipeline> = pipeline.clone();
        let frontend = Frontend::bind(
            &config,
            backend,
            Arc::clone(&lifecycle),
            Arc::clone(&registry),
            FrontendMetrics::unregistered(),
        )
        .await
        .unwrap();
        let addr = frontend.local_addr().unwrap();
        let run = tokio::spawn(frontend.run());

        let client = Client::builder()
            .add_root_certificate(reqwest::Certificate::from_pem(pki.ca_pem.as_bytes()).unwrap())
            .resolve(HOSTNAME, addr)
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap();

        let started = Self {
            addr,
            client,
            lifecycle,
            registry,
            pipeline,
            run,
            pki,
        };
        started.wait_until_serving().await;
        started
    }

    async fn wait_until_serving(&self) {
        for _ in 0..100 {
            if self.lifecycle.is_serving() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("frontend never started serving");
    }

    pub fn url(&self, path: &str) -> String {
        format!("https://{HOSTNAME}:{}{path}", self.addr.port())
    }

    pub async fn post(&self, path: &str, body: Bytes) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .body(body)
            .send()
            .await
            .unwrap()
    }

    /// Enrol `source` so later envelopes from it are authenticated.
    pub async fn enrol(&self, source: &str) {
        let response = self.post("/control", envelope(source, b"csr")).await;
        assert_eq!(response.status(), reqwest::StatusCode::NOT_ACCEPTABLE);
        assert!(self.pipeline.is_enrolled(source));
    }

    /// Wait for `source` to hold a poll connection.
    pub async fn wait_for_poll(&self, source: &str) {
        for _ in 0..200 {
            if self.registry.is_connected(source) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{source} never registered a poll connection");
    }
}

pub fn envelope(source: &str, payload: &[u8]) -> Bytes {
    Bytes::from(
        CommsEnvelope {
            source: source.to_string(),
            payload: payload.to_vec(),
            ..Default::default()
        }
        .encode_to_vec(),
    )
}

/// Number of padding frames merged into a response body.
pub fn padding_count(body: &[u8]) -> usize {
    CommsEnvelope::decode(body).unwrap().padding.len()
}
