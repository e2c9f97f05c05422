//! TLS configuration for the agent-facing listener.
//!
//! Two certificate sources:
//!
//! - **static**: one PEM certificate chain and key loaded at startup. The
//!   chain is also what `/server.pem` serves.
//! - **autocert**: certificates are looked up per SNI name in a cache
//!   directory kept current by an external ACME client. Only allowlisted
//!   names are answered. A plaintext router answers HTTP-01 challenges from
//!   the same directory.
//!
//! Both modes share one crypto provider: TLS 1.2 and 1.3 only, a fixed
//! cipher suite allowlist and NIST/X25519 key exchange.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::{Path as UrlPath, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, Uri, header};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use dashmap::DashMap;
use rustls::ServerConfig;
use rustls::crypto::{CryptoProvider, ring};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use thiserror::Error;
use tracing::{debug, info, warn};

use beacon_core::config::{AutocertConfig, StaticTlsConfig};

/// Cached autocert certificates are re-read from disk after this long so
/// renewals are picked up.
const AUTOCERT_RELOAD_INTERVAL: Duration = Duration::from_secs(3600);

/// Subdirectory of the cache dir holding HTTP-01 key authorizations.
pub const CHALLENGE_DIR: &str = "acme-challenge";

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path}: {message}")]
    Pem { path: PathBuf, message: String },

    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}

/// The ring provider restricted to the frontend's allowlist.
pub fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(CryptoProvider {
        cipher_suites: vec![
            ring::cipher_suite::TLS13_AES_128_GCM_SHA256,
            ring::cipher_suite::TLS13_AES_256_GCM_SHA384,
            ring::cipher_suite::TLS13_CHACHA20_POLY1305_SHA256,
            ring::cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
            ring::cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
            ring::cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
        ],
        kx_groups: vec![
            ring::kx_group::SECP384R1,
            ring::kx_group::SECP256R1,
            ring::kx_group::X25519,
        ],
        ..ring::default_provider()
    })
}

fn builder() -> Result<rustls::ConfigBuilder<ServerConfig, rustls::WantsVerifier>, TlsError> {
    Ok(ServerConfig::builder_with_provider(crypto_provider())
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])?)
}

fn with_alpn(mut config: ServerConfig) -> Arc<ServerConfig> {
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Arc::new(config)
}

/// Server config for a fixed certificate and key.
///
/// # Errors
///
/// Returns [`TlsError`] when either file is unreadable, the chain is empty,
/// or the key does not match a supported algorithm.
pub fn static_server_config(tls: &StaticTlsConfig) -> Result<Arc<ServerConfig>, TlsError> {
    let certs = load_certs(&tls.certificate)?;
    let key = load_key(&tls.private_key)?;
    let config = builder()?.with_no_client_auth().with_single_cert(certs, key)?;
    info!(certificate = %tls.certificate.display(), "Loaded static TLS certificate");
    Ok(with_alpn(config))
}

/// Server config resolving certificates from the autocert cache.
///
/// # Errors
///
/// Only fails if the protocol versions are rejected by the provider.
pub fn autocert_server_config(autocert: &AutocertConfig) -> Result<Arc<ServerConfig>, TlsError> {
    let resolver = AutocertResolver::new(autocert);
    let config = builder()?
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(resolver));
    info!(
        hostnames = ?autocert.hostnames,
        cache_dir = %autocert.cache_dir.display(),
        "Autocert enabled"
    );
    Ok(with_alpn(config))
}

/// Read the PEM certificate served on `/server.pem`.
///
/// # Errors
///
/// Returns [`TlsError::Io`] when the file cannot be read.
pub fn read_server_pem(path: &Path) -> Result<bytes::Bytes, TlsError> {
    std::fs::read(path)
        .map(bytes::Bytes::from)
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let pem_error = |e: rustls::pki_types::pem::Error| TlsError::Pem {
        path: path.to_path_buf(),
        message: e.to_string(),
    };
    let certs = CertificateDer::pem_file_iter(path)
        .map_err(pem_error)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(pem_error)?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    PrivateKeyDer::from_pem_file(path).map_err(|e| TlsError::Pem {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Autocert
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct CachedKey {
    key: Arc<CertifiedKey>,
    loaded_at: Instant,
}

/// SNI certificate resolver over `<cache_dir>/<host>.crt` and `<host>.key`.
#[derive(Debug)]
pub struct AutocertResolver {
    cache_dir: PathBuf,
    hostnames: HashSet<String>,
    provider: Arc<CryptoProvider>,
    loaded: DashMap<String, CachedKey>,
}

impl AutocertResolver {
    pub fn new(autocert: &AutocertConfig) -> Self {
        Self {
            cache_dir: autocert.cache_dir.clone(),
            hostnames: autocert
                .hostnames
                .iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
            provider: crypto_provider(),
            loaded: DashMap::new(),
        }
    }

    /// Certificate for `host`, reloading from disk when stale.
    ///
    /// A failed reload keeps serving the previously loaded certificate.
    pub fn certified_key(&self, host: &str) -> Option<Arc<CertifiedKey>> {
        let host = host.to_ascii_lowercase();
        if !self.hostnames.contains(&host) {
            debug!(sni = %host, "Refusing TLS for host outside autocert allowlist");
            return None;
        }

        let cached = self
            .loaded
            .get(&host)
            .map(|entry| (Arc::clone(&entry.key), entry.loaded_at));
        if let Some((key, loaded_at)) = &cached
            && loaded_at.elapsed() < AUTOCERT_RELOAD_INTERVAL
        {
            return Some(Arc::clone(key));
        }

        match self.load(&host) {
            Ok(key) => {
                self.loaded.insert(
                    host,
                    CachedKey {
                        key: Arc::clone(&key),
                        loaded_at: Instant::now(),
                    },
                );
                Some(key)
            }
            Err(e) => {
                warn!(sni = %host, error = %e, "Autocert certificate unavailable");
                cached.map(|(key, _)| key)
            }
        }
    }

    fn load(&self, host: &str) -> Result<Arc<CertifiedKey>, TlsError> {
        let certs = load_certs(&self.cache_dir.join(format!("{host}.crt")))?;
        let key = load_key(&self.cache_dir.join(format!("{host}.key")))?;
        let signing_key = self.provider.key_provider.load_private_key(key)?;
        Ok(Arc::new(CertifiedKey::new(certs, signing_key)))
    }
}

impl ResolvesServerCert for AutocertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.certified_key(client_hello.server_name()?)
    }
}

/// Plaintext router for the challenge port.
///
/// Serves `/.well-known/acme-challenge/{token}` from
/// `<cache_dir>/acme-challenge/<token>` and redirects everything else to
/// HTTPS on the same host.
pub fn challenge_router(cache_dir: PathBuf) -> Router {
    Router::new()
        .route(
            "/.well-known/acme-challenge/{token}",
            get(challenge_handler),
        )
        .fallback(https_redirect)
        .with_state(Arc::new(cache_dir))
}

async fn challenge_handler(
    State(cache_dir): State<Arc<PathBuf>>,
    UrlPath(token): UrlPath<String>,
) -> Response {
    let valid = !token.is_empty()
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if !valid {
        return StatusCode::NOT_FOUND.into_response();
    }

    match tokio::fs::read(cache_dir.join(CHALLENGE_DIR).join(&token)).await {
        Ok(body) => {
            debug!(token = %token, "Answered ACME challenge");
            (
                [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))],
                body,
            )
                .into_response()
        }
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn https_redirect(headers: HeaderMap, uri: Uri) -> Response {
    let Some(host) = headers.get(header::HOST).and_then(|h| h.to_str().ok()) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    // Drop any port; the TLS listener is always on 443 in this mode.
    let host = host.split(':').next().unwrap_or(host);
    let path = uri.path_and_query().map_or("/", |pq| pq.as_str());
    Redirect::permanent(&format!("https://{host}{path}")).into_response()
}
