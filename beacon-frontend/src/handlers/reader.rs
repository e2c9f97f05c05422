//! Poll channel (`POST /reader`).
//!
//! Each enrolled agent holds at most one poll connection. The connection
//! stays open until work is signalled for the agent, the jittered deadline
//! passes, shutdown broadcasts a quit, or the agent goes away. Every exit
//! closes the connection after at most one batch of work; the agent then
//! reconnects.
//!
//! # Session loop
//!
//! After an initial drain finds nothing queued, the session waits on four
//! events. When several are ready together they are taken in this order:
//!
//! | Event | Action |
//! |-------|--------|
//! | agent disconnected / shutdown | exit |
//! | `Quit` notification | exit |
//! | `Work` notification | drain, write, exit |
//! | deadline | signal own slot with `Work` |
//! | keep-alive tick | write padding frame |

use std::time::Duration;

use axum::Extension;
use axum::extract::{Request, State};
use axum::response::Response;
use bytes::Bytes;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error};

use beacon_core::config::TimingConfig;
use beacon_core::metrics::{CHANNEL_READER, GaugeGuard};
use beacon_core::{ClientListener, MessageInfo, Notification, ProcessOutcome, padding_frame};

use super::{STREAM_BUFFER, reject, remote_addr, streaming_response};
use crate::body::read_body_limited;
use crate::error::Rejection;
use crate::state::{AppState, PeerAddr};

pub async fn reader_handler(
    State(state): State<AppState>,
    peer: Option<Extension<PeerAddr>>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();

    if let Some(target) = state.redirector.should_redirect(&parts.uri) {
        return reject(&state, CHANNEL_READER, Rejection::Redirect(target));
    }

    let connection = state.metrics.connection_guard();

    let body = match read_body_limited(
        body,
        state.limits.max_poll_body_size,
        &[],
        state.listen.read_timeout,
    )
    .await
    {
        Ok(body) => body,
        Err(e) => {
            debug!(error = %e, "Unable to read poll body");
            return reject(&state, CHANNEL_READER, Rejection::Unavailable);
        }
    };

    let info = match state.pipeline.decrypt(body).await {
        Ok(info) => info,
        Err(e) => {
            debug!(error = %e, "Unable to decrypt poll body");
            return reject(&state, CHANNEL_READER, Rejection::Forbidden);
        }
    };

    if !info.authenticated {
        return reject(&state, CHANNEL_READER, Rejection::PleaseEnrol);
    }

    // Socket peer only; the proxy header applies to the post channel.
    let info = info.with_remote_addr(remote_addr(
        &parts.headers,
        None,
        peer.map(|Extension(addr)| addr),
    ));

    let listener = match state.registry.register(&info.source) {
        Ok(listener) => listener,
        Err(e) => {
            debug!(remote_addr = %info.remote_addr, error = %e, "Poll connection refused");
            return reject(&state, CHANNEL_READER, Rejection::AlreadyConnected);
        }
    };

    let deadline = poll_deadline(&state.timing);
    debug!(
        source = %info.source,
        remote_addr = %info.remote_addr,
        deadline_ms = deadline.as_millis(),
        "Poll connection admitted"
    );

    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    tokio::spawn(poll_session(
        state.clone(),
        PollSession {
            info,
            listener,
            deadline,
            tx,
            _connection: connection,
        },
    ));

    state.metrics.record_request(CHANNEL_READER, 200);
    streaming_response(rx)
}

/// `max_poll` plus a uniform jitter in `[0, poll_jitter]`, at millisecond
/// resolution.
pub fn poll_deadline(timing: &TimingConfig) -> Duration {
    let jitter_ms = u64::try_from(timing.poll_jitter.as_millis()).unwrap_or(u64::MAX);
    let jitter = rand::rng().random_range(0..=jitter_ms);
    timing.max_poll + Duration::from_millis(jitter)
}

/// Everything an admitted poll connection owns.
///
/// Dropping it deregisters the agent and decrements the connection gauge.
struct PollSession {
    info: MessageInfo,
    listener: ClientListener,
    deadline: Duration,
    tx: mpsc::Sender<Bytes>,
    _connection: GaugeGuard,
}

async fn poll_session(state: AppState, mut session: PollSession) {
    match drain(&state, &session).await {
        Some(outcome) if outcome.pending > 0 => {
            write_batch(&session, outcome.response).await;
            return;
        }
        Some(_) => {}
        None => return,
    }

    let deadline = tokio::time::sleep(session.deadline);
    tokio::pin!(deadline);
    let mut deadline_fired = false;

    let period = state.timing.poll_keepalive_interval;
    let mut keepalive = tokio::time::interval_at(Instant::now() + period, period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            () = session.tx.closed() => {
                debug!(source = %session.info.source, "Agent closed poll connection");
                return;
            }
            () = state.shutdown.cancelled() => return,
            notification = session.listener.recv() => match notification {
                Notification::Quit => {
                    debug!(source = %session.info.source, "Poll connection told to quit");
                    return;
                }
                Notification::Work => {
                    if let Some(outcome) = drain(&state, &session).await {
                        write_batch(&session, outcome.response).await;
                    }
                    return;
                }
            },
            () = &mut deadline, if !deadline_fired => {
                deadline_fired = true;
                session.listener.notify_self(Notification::Work);
            }
            _ = keepalive.tick() => {
                if session.tx.send(padding_frame()).await.is_err() {
                    return;
                }
                state.metrics.record_padding(CHANNEL_READER);
            }
        }
    }
}

/// Collect whatever is queued for the session's agent. `None` on failure.
async fn drain(state: &AppState, session: &PollSession) -> Option<ProcessOutcome> {
    match state.pipeline.process(&session.info, true).await {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            error!(source = %session.info.source, error = %e, "Poll drain failed");
            None
        }
    }
}

async fn write_batch(session: &PollSession, response: Bytes) {
    if response.is_empty() {
        return;
    }
    if session.tx.send(response).await.is_err() {
        debug!(source = %session.info.source, "Work dropped, agent disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::build_router;
    use crate::test_support::{ScriptedPipeline, test_state};
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use tower::ServiceExt;

    fn poll(body: &'static str) -> HttpRequest<Body> {
        HttpRequest::post("/reader").body(Body::from(body)).unwrap()
    }

    fn short_timing(state: &mut AppState) {
        state.timing.max_poll = Duration::from_secs(5);
        state.timing.poll_jitter = Duration::from_secs(30);
        state.timing.poll_keepalive_interval = Duration::from_secs(10);
    }

    #[test]
    fn test_poll_deadline_within_bounds() {
        let timing = TimingConfig {
            max_poll: Duration::from_secs(5),
            poll_jitter: Duration::from_secs(30),
            ..TimingConfig::default()
        };
        for _ in 0..200 {
            let d = poll_deadline(&timing);
            assert!(d >= Duration::from_secs(5));
            assert!(d <= Duration::from_secs(35));
        }
    }

    #[test]
    fn test_zero_jitter_is_exact() {
        let timing = TimingConfig {
            max_poll: Duration::from_secs(5),
            poll_jitter: Duration::ZERO,
            ..TimingConfig::default()
        };
        assert_eq!(poll_deadline(&timing), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_queued_work_returned_immediately() {
        let pipeline = Arc::new(ScriptedPipeline::default());
        pipeline.queue("C.1", b"queued-work");
        let state = test_state(pipeline.clone());
        let registry = state.registry.clone();

        let response = build_router(state).oneshot(poll("C.1:auth:")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"queued-work");
        assert_eq!(pipeline.drains.load(Ordering::SeqCst), 1);
        assert!(!registry.is_connected("C.1"));
    }

    #[tokio::test]
    async fn test_unauthenticated_poll_rejected() {
        let state = test_state(Arc::new(ScriptedPipeline::default()));
        let registry = state.registry.clone();
        let response = build_router(state).oneshot(poll("C.1:anon:")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_undecryptable_poll_forbidden() {
        let state = test_state(Arc::new(ScriptedPipeline::default()));
        let response = build_router(state).oneshot(poll("nope")).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_oversized_poll_body_unavailable() {
        let mut state = test_state(Arc::new(ScriptedPipeline::default()));
        state.limits.max_poll_body_size = 4;
        let response = build_router(state).oneshot(poll("C.1:auth:")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_poll_conflicts() {
        let state = test_state(Arc::new(ScriptedPipeline::default()));
        let router = build_router(state);

        let first = router.clone().oneshot(poll("X:auth:")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = router.oneshot(poll("X:auth:")).await.unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        let body = second.into_body().collect().await.unwrap().to_bytes();
        assert!(body.starts_with(b"Another Client connection exists"));
        drop(first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_poll_ends_by_deadline() {
        let mut state = test_state(Arc::new(ScriptedPipeline::default()));
        short_timing(&mut state);
        let registry = state.registry.clone();
        let started = Instant::now();

        let response = build_router(state).oneshot(poll("C.1:auth:")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let mut body = response.into_body();
        let mut pads = 0;
        while let Some(frame) = body.frame().await {
            let data = frame.unwrap().into_data().unwrap();
            assert_eq!(data, padding_frame());
            pads += 1;
        }
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(5), "closed early: {elapsed:?}");
        assert!(elapsed <= Duration::from_secs(35), "closed late: {elapsed:?}");
        assert!(pads <= 3);

        tokio::task::yield_now().await;
        assert!(!registry.is_connected("C.1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_work_notification_delivers_batch() {
        let pipeline = Arc::new(ScriptedPipeline::default());
        let state = test_state(pipeline.clone());
        let registry = state.registry.clone();

        let response = build_router(state).oneshot(poll("C.9:auth:")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(registry.is_connected("C.9"));

        pipeline.queue("C.9", b"fresh-work");
        assert!(registry.notify("C.9"));

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"fresh-work");
    }

    #[tokio::test(start_paused = true)]
    async fn test_quit_broadcast_ends_poll() {
        let state = test_state(Arc::new(ScriptedPipeline::default()));
        let registry = state.registry.clone();

        let response = build_router(state).oneshot(poll("C.3:auth:")).await.unwrap();
        assert_eq!(registry.notify_all_quit(), 1);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_deregisters() {
        let state = test_state(Arc::new(ScriptedPipeline::default()));
        let registry = state.registry.clone();

        let response = build_router(state).oneshot(poll("C.4:auth:")).await.unwrap();
        assert!(registry.is_connected("C.4"));
        drop(response);

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!registry.is_connected("C.4"));
    }
}
