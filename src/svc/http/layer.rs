//! # Layer module
//!
//! This module provides middlewares to give to the server implementation.
//! It could be seen as an interceptor in h2.

#[cfg(feature = "metrics")]
use std::sync::LazyLock;
use std::{sync::Arc, time::Instant};

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use base64::{engine::general_purpose::STANDARD, Engine};
#[cfg(feature = "metrics")]
use prometheus::{register_int_counter_vec, IntCounterVec};
use tracing::{debug, info, info_span, Instrument};

use crate::svc::http::json;

// -----------------------------------------------------------------------------
// Constants

pub const BROKER_API_VERSION_HEADER: &str = "X-Broker-API-Version";
pub const BROKER_API_MAJOR_VERSION: &str = "2";
pub const REALM: &str = "Basic realm=\"rds-broker\"";

// -----------------------------------------------------------------------------
// Telemetry

#[cfg(feature = "metrics")]
static ACCESS_REQUEST: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "broker_http_requests_count",
        "Number of requests received by the broker",
        &["method", "status"]
    )
    .expect("'broker_http_requests_count' to not be already registered")
});

#[cfg(feature = "metrics")]
static ACCESS_REQUEST_DURATION: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "broker_http_requests_duration",
        "Duration of requests received by the broker in microseconds",
        &["method", "status"]
    )
    .expect("'broker_http_requests_duration' to not be already registered")
});

// -----------------------------------------------------------------------------
// Access

#[tracing::instrument(skip_all)]
pub async fn access(req: Request<Body>, next: Next) -> Response {
    let method = req.method().to_string();
    let uri = req.uri().path().to_string();
    let agent = header_or_none(req.headers(), header::USER_AGENT.as_str());
    let version = header_or_none(req.headers(), BROKER_API_VERSION_HEADER);
    let originating = header_or_none(req.headers(), "X-Broker-API-Originating-Identity");

    let begin = Instant::now();
    let res = next.run(req).instrument(info_span!("next.run")).await;
    let duration = begin.elapsed().as_micros();
    let status = res.status().as_u16();

    #[cfg(feature = "metrics")]
    ACCESS_REQUEST
        .with_label_values(&[&method, &status.to_string()])
        .inc();

    #[cfg(feature = "metrics")]
    ACCESS_REQUEST_DURATION
        .with_label_values(&[&method, &status.to_string()])
        .inc_by(u64::try_from(duration).unwrap_or(u64::MAX));

    info!(
        method = method,
        uri = uri,
        agent = agent,
        api_version = version,
        originating_identity = originating,
        duration = format!("{duration}us"),
        status = status,
        "Request received"
    );

    res
}

// -----------------------------------------------------------------------------
// Authentication

/// credentials the platform has to give on each request
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl BasicAuth {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_owned(),
            password: password.to_owned(),
        }
    }

    /// returns if the given authorization header value carries these
    /// credentials
    pub fn matches(&self, authorization: &str) -> bool {
        let Some(encoded) = authorization.strip_prefix("Basic ") else {
            return false;
        };

        let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
            return false;
        };

        match String::from_utf8(decoded) {
            Ok(decoded) => decoded
                .split_once(':')
                .is_some_and(|(username, password)| {
                    username == self.username && password == self.password
                }),
            Err(_) => false,
        }
    }
}

#[tracing::instrument(skip_all)]
pub async fn authenticate(
    State(credentials): State<Arc<BasicAuth>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let authorized = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| credentials.matches(value));

    if !authorized {
        debug!(uri = req.uri().path(), "Reject request with invalid credentials");
        let mut res = json(
            StatusCode::UNAUTHORIZED,
            &serde_json::json!({"description": "invalid credentials"}),
        );

        res.headers_mut()
            .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static(REALM));

        return res;
    }

    next.run(req).await
}

// -----------------------------------------------------------------------------
// Api version

#[tracing::instrument(skip_all)]
pub async fn api_version(req: Request<Body>, next: Next) -> Response {
    let version = req
        .headers()
        .get(BROKER_API_VERSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let major = version.split('.').next().unwrap_or_default().trim();
    if major != BROKER_API_MAJOR_VERSION {
        debug!(version = version, "Reject request with unsupported api version");
        return json(
            StatusCode::PRECONDITION_FAILED,
            &serde_json::json!({
                "description": format!(
                    "unsupported {BROKER_API_VERSION_HEADER} '{version}', expected major version {BROKER_API_MAJOR_VERSION}"
                )
            }),
        );
    }

    next.run(req).await
}

// -----------------------------------------------------------------------------
// helpers

fn header_or_none(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("<none>")
        .to_string()
}
