//! Post channel (`POST /control`).
//!
//! An agent uploads one message per request and reads one reply. Dispatch
//! can take a while, so once the message is accepted the 200 head goes out
//! straight away and padding frames trickle down the body until the reply
//! is ready; intermediaries never see an idle connection.
//!
//! ```text
//! redirect? ─► admission ─► body (rate limited) ─► decrypt ─► enrolled?
//!    301      wait / 503        503                  403       406 / 503
//!                                                              │
//!                                         200 ─► pad … pad ─► reply
//! ```

use std::sync::Arc;

use axum::Extension;
use axum::extract::{Request, State};
use axum::response::Response;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error};

use beacon_core::metrics::CHANNEL_CONTROL;
use beacon_core::{AdmissionPermit, MessageInfo, Priority, padding_frame};

use super::{STREAM_BUFFER, reject, remote_addr, streaming_response};
use crate::body::read_body_limited;
use crate::error::Rejection;
use crate::state::{AppState, PeerAddr};

pub async fn control_handler(
    State(state): State<AppState>,
    peer: Option<Extension<PeerAddr>>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();

    if let Some(target) = state.redirector.should_redirect(&parts.uri) {
        return reject(&state, CHANNEL_CONTROL, Rejection::Redirect(target));
    }

    let priority = Priority::from_headers(&parts.headers);
    let permit = {
        let _waiting = state.metrics.admission_wait_guard();
        match state.admission.acquire(priority).await {
            Ok(permit) => permit,
            Err(e) => {
                debug!(error = %e, "Admission refused");
                return reject(&state, CHANNEL_CONTROL, Rejection::Unavailable);
            }
        }
    };

    let limiters = state.upload_limits.for_request();
    let body = match read_body_limited(
        body,
        state.limits.post_body_limit(),
        &limiters,
        state.listen.read_timeout,
    )
    .await
    {
        Ok(body) => body,
        Err(e) => {
            debug!(error = %e, "Unable to read post body");
            return reject(&state, CHANNEL_CONTROL, Rejection::Unavailable);
        }
    };

    let info = match state.pipeline.decrypt(body).await {
        Ok(info) => info,
        Err(e) => {
            debug!(error = %e, "Unable to decrypt post body");
            return reject(&state, CHANNEL_CONTROL, Rejection::Forbidden);
        }
    };
    let info = info.with_remote_addr(remote_addr(
        &parts.headers,
        state.proxy_header.as_ref(),
        peer.map(|Extension(addr)| addr),
    ));

    if !info.authenticated {
        return match state.pipeline.process_unauthenticated(&info).await {
            Ok(()) => reject(&state, CHANNEL_CONTROL, Rejection::PleaseEnrol),
            Err(e) => {
                debug!(source = %info.source, error = %e, "Enrolment rejected");
                reject(&state, CHANNEL_CONTROL, Rejection::Unavailable)
            }
        };
    }

    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    tokio::spawn(dispatch_with_padding(state.clone(), info, permit, tx));

    state.metrics.record_request(CHANNEL_CONTROL, 200);
    streaming_response(rx)
}

/// Dispatch `info`, padding the stream until the reply is ready.
///
/// Dispatch runs in its own task and completes even if the agent stops
/// reading or disconnects. Padding frames that do not fit in the stream
/// buffer are dropped. The admission permit is released as soon as
/// dispatch returns.
async fn dispatch_with_padding(
    state: AppState,
    info: MessageInfo,
    permit: AdmissionPermit,
    tx: mpsc::Sender<Bytes>,
) {
    let period = state.timing.post_padding_interval;
    let mut padding = tokio::time::interval_at(Instant::now() + period, period);
    padding.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut dispatch = {
        let pipeline = Arc::clone(&state.pipeline);
        let info = info.clone();
        tokio::spawn(async move { pipeline.process(&info, false).await })
    };

    let mut agent_gone = false;
    let joined = loop {
        tokio::select! {
            joined = &mut dispatch => break joined,
            _ = padding.tick(), if !agent_gone => match tx.try_send(padding_frame()) {
                Ok(()) => state.metrics.record_padding(CHANNEL_CONTROL),
                Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Closed(_)) => {
                    debug!(source = %info.source, "Agent left while dispatch in flight");
                    agent_gone = true;
                }
            },
        }
    };
    drop(permit);

    match joined {
        Ok(Ok(outcome)) => {
            if tx.send(outcome.response).await.is_err() {
                debug!(source = %info.source, "Reply dropped, agent disconnected");
            }
        }
        Ok(Err(e)) => {
            error!(source = %info.source, error = %e, "Dispatch failed");
        }
        Err(e) => {
            error!(source = %info.source, error = %e, "Dispatch task failed");
        }
    }
}
