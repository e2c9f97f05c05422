//! Bounded, rate-limited request body reading.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use bytes::{Bytes, BytesMut};
use http_body_util::BodyExt;
use thiserror::Error;

use crate::rate_limiter::ByteRateLimiter;

/// Why a request body could not be read.
#[derive(Debug, Error)]
pub enum BodyError {
    #[error("body read failed: {0}")]
    Read(#[from] axum::Error),

    #[error("body exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("body read timed out after {0:?}")]
    Timeout(Duration),
}

/// Read a whole body, failing once more than `limit` bytes arrive.
///
/// Each frame waits on every limiter in `limiters` before it is accepted.
/// The whole read is bounded by `read_timeout`.
///
/// # Errors
///
/// Returns [`BodyError`] on transport failure, an oversized body or timeout.
/// Bytes read so far are discarded.
pub async fn read_body_limited(
    body: Body,
    limit: u64,
    limiters: &[Arc<ByteRateLimiter>],
    read_timeout: Duration,
) -> Result<Bytes, BodyError> {
    tokio::time::timeout(read_timeout, read_inner(body, limit, limiters))
        .await
        .map_err(|_| BodyError::Timeout(read_timeout))?
}

async fn read_inner(
    mut body: Body,
    limit: u64,
    limiters: &[Arc<ByteRateLimiter>],
) -> Result<Bytes, BodyError> {
    let mut buf = BytesMut::new();

    while let Some(frame) = body.frame().await {
        let Ok(data) = frame?.into_data() else {
            continue;
        };

        if (buf.len() + data.len()) as u64 > limit {
            return Err(BodyError::TooLarge { limit });
        }

        for limiter in limiters {
            limiter.consume(data.len()).await;
        }
        buf.extend_from_slice(&data);
    }

    Ok(buf.freeze())
}
