//! Configuration schema type definitions.
//!
//! # Example
//! ```yaml
//! listen:
//!   bind_address: 0.0.0.0
//!   bind_port: 8000
//!
//! tls:
//!   mode: static
//!   certificate: /etc/beacon/frontend.crt
//!   private_key: /etc/beacon/frontend.key
//!
//! limits:
//!   concurrency: 20
//!   per_client_upload_rate: 1048576
//!
//! timing:
//!   max_poll: 60s
//!
//! proxy_header: X-Forwarded-For
//! ```

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use super::duration_format;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-Level Schema
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Listener address and connection timeouts.
    #[serde(default)]
    pub listen: ListenConfig,

    /// Certificate source.
    pub tls: TlsConfig,

    /// Body sizes, byte rates and admission pool size.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Padding, keep-alive, poll deadline and shutdown timing.
    #[serde(default)]
    pub timing: TimingConfig,

    /// Trusted header carrying the real client address.
    #[serde(default)]
    pub proxy_header: Option<String>,

    /// Alternate frontend advertised at startup.
    #[serde(default)]
    pub redirect_url: Option<String>,

    /// Directory backing `/public/*`.
    #[serde(default)]
    pub public_dir: Option<PathBuf>,

    /// Metrics listener. Disabled when absent.
    #[serde(default)]
    pub admin: Option<AdminConfig>,
}

impl Config {
    /// Address the agent-facing TLS listener binds.
    ///
    /// Autocert always binds 443.
    #[must_use]
    pub fn tls_listen_addr(&self) -> SocketAddr {
        let port = match self.tls {
            TlsConfig::Autocert(_) => 443,
            TlsConfig::Static(_) => self.listen.bind_port,
        };
        SocketAddr::new(self.listen.bind_address, port)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Listener
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Listener address and connection timeouts.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    /// Bound on reading one request body.
    #[serde(
        default = "default_read_timeout",
        deserialize_with = "duration_format::deserialize"
    )]
    pub read_timeout: Duration,

    /// Bound on the whole lifetime of one connection.
    #[serde(
        default = "default_write_timeout",
        deserialize_with = "duration_format::deserialize"
    )]
    pub write_timeout: Duration,

    /// Bound on waiting for request headers on a fresh or idle connection.
    #[serde(
        default = "default_idle_timeout",
        deserialize_with = "duration_format::deserialize"
    )]
    pub idle_timeout: Duration,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            bind_port: default_bind_port(),
            read_timeout: default_read_timeout(),
            write_timeout: default_write_timeout(),
            idle_timeout: default_idle_timeout(),
        }
    }
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_bind_port() -> u16 {
    8000
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(500)
}

fn default_write_timeout() -> Duration {
    Duration::from_secs(900)
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(15)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TLS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Certificate source for the agent-facing listener.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TlsConfig {
    /// A fixed certificate and key loaded at startup.
    Static(StaticTlsConfig),
    /// Certificates managed by an external ACME client through a cache dir.
    Autocert(AutocertConfig),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaticTlsConfig {
    /// PEM certificate chain. Also served on `/server.pem`.
    pub certificate: PathBuf,
    /// PEM private key (PKCS#8, PKCS#1 or SEC1).
    pub private_key: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AutocertConfig {
    /// SNI names the listener will present certificates for.
    pub hostnames: Vec<String>,

    /// Holds `<hostname>.crt`/`<hostname>.key` and `acme-challenge/<token>`.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Plaintext port answering HTTP-01 challenges.
    #[serde(default = "default_challenge_port")]
    pub challenge_port: u16,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("/tmp/beacon_cache")
}

fn default_challenge_port() -> u16 {
    80
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Limits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Body sizes, byte rates and admission pool size.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    /// Largest expected post. Bodies are read up to twice this.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,

    /// Bytes/s per post request. 0 disables.
    #[serde(default)]
    pub per_client_upload_rate: u64,

    /// Bytes/s across all post requests. 0 disables.
    #[serde(default)]
    pub global_upload_rate: u64,

    /// Token bucket burst for both upload limiters.
    #[serde(default = "default_upload_burst")]
    pub upload_burst: u64,

    /// Largest accepted poll body.
    #[serde(default = "default_max_poll_body_size")]
    pub max_poll_body_size: u64,

    /// Concurrent non-urgent post dispatches.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl LimitsConfig {
    /// Read bound applied to post bodies.
    #[must_use]
    pub fn post_body_limit(&self) -> u64 {
        self.max_upload_size.saturating_mul(2)
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_upload_size: default_max_upload_size(),
            per_client_upload_rate: 0,
            global_upload_rate: 0,
            upload_burst: default_upload_burst(),
            max_poll_body_size: default_max_poll_body_size(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_max_upload_size() -> u64 {
    5 * MIB
}

fn default_upload_burst() -> u64 {
    100 * KIB
}

fn default_max_poll_body_size() -> u64 {
    5 * MIB
}

fn default_concurrency() -> usize {
    10
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Timing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Padding, keep-alive, poll deadline and shutdown timing.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimingConfig {
    /// Base lifetime of a poll connection without work.
    #[serde(
        default = "default_max_poll",
        deserialize_with = "duration_format::deserialize"
    )]
    pub max_poll: Duration,

    /// Upper bound of the random extension added to `max_poll`.
    #[serde(
        default = "default_poll_jitter",
        deserialize_with = "duration_format::deserialize"
    )]
    pub poll_jitter: Duration,

    /// Padding cadence while a post dispatch is in flight.
    #[serde(
        default = "default_post_padding_interval",
        deserialize_with = "duration_format::deserialize"
    )]
    pub post_padding_interval: Duration,

    /// Padding cadence on an idle poll connection.
    #[serde(
        default = "default_poll_keepalive_interval",
        deserialize_with = "duration_format::deserialize"
    )]
    pub poll_keepalive_interval: Duration,

    /// Bound on draining connections at shutdown.
    #[serde(
        default = "default_shutdown_grace",
        deserialize_with = "duration_format::deserialize"
    )]
    pub shutdown_grace: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            max_poll: default_max_poll(),
            poll_jitter: default_poll_jitter(),
            post_padding_interval: default_post_padding_interval(),
            poll_keepalive_interval: default_poll_keepalive_interval(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

fn default_max_poll() -> Duration {
    Duration::from_secs(60)
}

fn default_poll_jitter() -> Duration {
    Duration::from_secs(30)
}

fn default_post_padding_interval() -> Duration {
    Duration::from_secs(3)
}

fn default_poll_keepalive_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(10)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Admin
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Metrics listener.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdminConfig {
    #[serde(default = "default_admin_address")]
    pub bind_address: IpAddr,

    #[serde(default = "default_admin_port")]
    pub port: u16,
}

impl AdminConfig {
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

fn default_admin_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_admin_port() -> u16 {
    9090
}
