//! Alternate-frontend redirection.
//!
//! A fleet operator can advertise another frontend URL at runtime; while one
//! is advertised, agents hitting this instance are bounced there with a 301.
//! Agents append an `r` query parameter after following a redirect, and a
//! request carrying it is always served locally so two frontends can never
//! bounce an agent back and forth.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use http::Uri;
use tracing::info;

/// Query parameter marking an already-redirected request.
pub const REDIRECT_MARKER: &str = "r";

/// Holds the currently advertised alternate frontend, if any.
#[derive(Debug, Default)]
pub struct FrontendRedirector {
    target: ArcSwapOption<String>,
}

impl FrontendRedirector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start redirecting agents to `url`.
    pub fn advertise(&self, url: impl Into<String>) {
        let url = url.into();
        info!(redirect_url = %url, "Advertising alternate frontend");
        self.target.store(Some(Arc::new(url)));
    }

    /// Stop redirecting.
    pub fn withdraw(&self) {
        if self.target.swap(None).is_some() {
            info!("Alternate frontend withdrawn");
        }
    }

    /// The advertised URL, if any.
    #[must_use]
    pub fn current(&self) -> Option<Arc<String>> {
        self.target.load_full()
    }

    /// Decide whether a request for `uri` should be redirected.
    ///
    /// Returns the target URL when an alternate frontend is advertised and
    /// the request does not carry the redirect marker.
    #[must_use]
    pub fn should_redirect(&self, uri: &Uri) -> Option<Arc<String>> {
        if has_redirect_marker(uri) {
            return None;
        }
        self.current()
    }
}

/// Presence of the marker is enough; its value is ignored.
fn has_redirect_marker(uri: &Uri) -> bool {
    uri.query()
        .map(|query| {
            query
                .split('&')
                .any(|pair| pair.split('=').next() == Some(REDIRECT_MARKER))
        })
        .unwrap_or(false)
}
