//! Request metrics middleware
//!
//! Records request count, latency and status code per endpoint for the
//! `/metrics` report.
//!
//! Author: hephaex@gmail.com

use crate::state::AppState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Instant;

pub async fn metrics_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let endpoint = normalize_endpoint(request.uri().path());

    let response = next.run(request).await;

    let latency_us = start.elapsed().as_micros() as u64;
    let status = response.status().as_u16();

    // Off the response path
    tokio::spawn(async move {
        state.record_request(endpoint, status, latency_us).await;
    });

    response
}

/// Replace id segments with `:id` so per-resource paths share one entry
fn normalize_endpoint(path: &str) -> String {
    path.split('/')
        .map(|seg| {
            if uuid::Uuid::try_parse(seg).is_ok() || is_numeric(seg) {
                ":id"
            } else {
                seg
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn is_numeric(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}
