//! # Prometheus module
//!
//! This module provides a handler to export telemetry using prometheus format

use axum::{
    body::Body,
    http::{header, HeaderValue, Request, Response, StatusCode},
};
use prometheus::{Encoder, TextEncoder};
use tracing::error;

use crate::svc::http::json;

// -----------------------------------------------------------------------------
// handler

#[tracing::instrument(skip_all)]
pub async fn handler(_req: Request<Body>) -> Response<Body> {
    let encoder = TextEncoder::new();
    let mut buf = vec![];

    if let Err(err) = encoder.encode(&prometheus::gather(), &mut buf) {
        error!(error = err.to_string(), "Could not encode metrics");
        return json(
            StatusCode::INTERNAL_SERVER_ERROR,
            &serde_json::json!({"description": err.to_string()}),
        );
    }

    let mut res = Response::new(Body::from(buf));
    if let Ok(value) = HeaderValue::from_str(mime::TEXT_PLAIN_UTF_8.as_ref()) {
        res.headers_mut().insert(header::CONTENT_TYPE, value);
    }

    res
}
