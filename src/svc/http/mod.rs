//! # HTTP module
//!
//! This module provides utilities to expose the broker using HTTP protocol

use axum::{
    body::Body,
    http::{header, HeaderValue, Request, Response, StatusCode},
};
use serde::Serialize;

pub mod layer;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod osb;
pub mod server;

// -----------------------------------------------------------------------------
// helpers

/// returns a json response with the given status, serialization failures
/// yield an empty internal server error
pub fn json<T>(status: StatusCode, payload: &T) -> Response<Body>
where
    T: Serialize + ?Sized,
{
    let mut res = Response::default();

    match serde_json::to_vec(payload) {
        Ok(buf) => {
            res.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );

            *res.status_mut() = status;
            *res.body_mut() = Body::from(buf);
        }
        Err(_) => {
            *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        }
    }

    res
}

// -----------------------------------------------------------------------------
// Not found

#[tracing::instrument(skip_all)]
pub async fn not_found(_req: Request<Body>) -> Response<Body> {
    json(
        StatusCode::NOT_FOUND,
        &serde_json::json!({"description": "resource not found"}),
    )
}

// -----------------------------------------------------------------------------
// Healthz

#[tracing::instrument(skip_all)]
pub async fn healthz(_req: Request<Body>) -> Response<Body> {
    json(
        StatusCode::OK,
        &serde_json::json!({"message": "Everything is fine!"}),
    )
}
