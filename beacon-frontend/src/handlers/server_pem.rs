//! `GET /server.pem`: the frontend certificate, for agents that pin it.

use axum::extract::State;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::state::AppState;

pub async fn server_pem_handler(State(state): State<AppState>) -> Response {
    let Some(pem) = state.server_pem.clone() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let mut response = pem.into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
