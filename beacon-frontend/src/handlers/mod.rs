//! HTTP handlers for the agent-facing router.
//!
//! - `control` - post channel (`POST /control`)
//! - `reader` - poll channel (`POST /reader`)
//! - `server_pem` - certificate download (`GET /server.pem`)
//! - `public` - static assets (`GET /public/*`)

pub mod control;
pub mod public;
pub mod reader;
pub mod server_pem;

use std::convert::Infallible;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::stream;
use http_body::Frame;
use http_body_util::StreamBody;
use tokio::sync::mpsc;

use crate::error::Rejection;
use crate::state::{AppState, PeerAddr};

/// Disables response buffering in nginx-style intermediaries.
pub const X_ACCEL_BUFFERING: &str = "x-accel-buffering";

/// Frames queued between a session task and the response body.
pub(crate) const STREAM_BUFFER: usize = 8;

/// 200 response whose body is fed by `rx`.
///
/// The body ends when every sender is dropped. Dropping the body (the agent
/// went away) closes the channel, which the sending task observes.
pub(crate) fn streaming_response(rx: mpsc::Receiver<Bytes>) -> Response {
    let frames = stream::unfold(rx, |mut rx| async move {
        let chunk = rx.recv().await?;
        Some((Ok::<_, Infallible>(Frame::data(chunk)), rx))
    });

    let mut response = Response::new(Body::new(StreamBody::new(frames)));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(
        HeaderName::from_static(X_ACCEL_BUFFERING),
        HeaderValue::from_static("no"),
    );
    response
}

/// Write a rejection and count it against `channel`.
pub(crate) fn reject(state: &AppState, channel: &str, rejection: Rejection) -> Response {
    state
        .metrics
        .record_request(channel, rejection.status().as_u16());
    rejection.into_response()
}

/// Best-effort client address.
///
/// The first entry of the trusted proxy header wins when configured and
/// present; otherwise the socket peer. Empty when neither is known.
pub(crate) fn remote_addr(
    headers: &HeaderMap,
    proxy_header: Option<&HeaderName>,
    peer: Option<PeerAddr>,
) -> String {
    if let Some(name) = proxy_header
        && let Some(value) = headers.get(name).and_then(|v| v.to_str().ok())
        && let Some(first) = value.split(',').map(str::trim).find(|s| !s.is_empty())
    {
        return first.to_string();
    }
    peer.map(|PeerAddr(addr)| addr.to_string())
        .unwrap_or_default()
}
