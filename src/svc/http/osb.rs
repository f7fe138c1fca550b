//! # Open service broker module
//!
//! This module provides the handlers of the open service broker api v2. They
//! decode requests, call the [`ServiceBroker`] and map its outcome on the
//! status codes expected by the platform.

#[cfg(feature = "metrics")]
use std::sync::LazyLock;
use std::{
    fmt::{self, Display, Formatter},
    sync::Arc,
};

use axum::{
    body::{Body, Bytes},
    extract::{rejection::QueryRejection, Path, Query, State},
    http::{Response, StatusCode},
};
#[cfg(feature = "metrics")]
use prometheus::{register_int_counter_vec, IntCounterVec};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{error, warn};

use crate::svc::{
    broker::{DeprovisionDetails, Error, PollDetails, ServiceBroker, UnbindDetails},
    http::json,
};

// -----------------------------------------------------------------------------
// Telemetry

#[cfg(feature = "metrics")]
static OPERATION: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "broker_operations_count",
        "Number of broker operations by outcome",
        &["operation", "status"]
    )
    .expect("'broker_operations_count' to not be already registered")
});

// -----------------------------------------------------------------------------
// Types

pub type SharedBroker = Arc<dyn ServiceBroker>;

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Operation {
    Catalog,
    Provision,
    Update,
    Deprovision,
    Bind,
    Unbind,
    LastOperation,
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Catalog => write!(f, "catalog"),
            Self::Provision => write!(f, "provision"),
            Self::Update => write!(f, "update"),
            Self::Deprovision => write!(f, "deprovision"),
            Self::Bind => write!(f, "bind"),
            Self::Unbind => write!(f, "unbind"),
            Self::LastOperation => write!(f, "last_operation"),
        }
    }
}

impl Operation {
    /// returns if a missing resource means that the platform goal is reached
    fn gone_when_missing(self) -> bool {
        matches!(self, Self::Deprovision | Self::Unbind | Self::LastOperation)
    }
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct ErrorResponse {
    #[serde(rename = "error", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "description")]
    pub description: String,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
#[serde(default)]
pub struct AsyncQuery {
    #[serde(rename = "accepts_incomplete")]
    pub accepts_incomplete: bool,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
#[serde(default)]
pub struct DeleteQuery {
    #[serde(rename = "accepts_incomplete")]
    pub accepts_incomplete: bool,
    #[serde(rename = "service_id")]
    pub service_id: String,
    #[serde(rename = "plan_id")]
    pub plan_id: String,
}

// -----------------------------------------------------------------------------
// helpers

/// returns the status code of the given broker error for the operation
pub fn status(operation: Operation, err: &Error) -> StatusCode {
    match err {
        Error::InstanceAlreadyExists | Error::BindingAlreadyExists => StatusCode::CONFLICT,
        Error::AsyncRequired | Error::PlanChangeNotSupported | Error::InstanceNotBindable => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        Error::InstanceDoesNotExist | Error::BindingDoesNotExist
            if operation.gone_when_missing() =>
        {
            StatusCode::GONE
        }
        Error::InstanceDoesNotExist | Error::BindingDoesNotExist => StatusCode::NOT_FOUND,
        Error::Parameters(_)
        | Error::InvalidDbName(_)
        | Error::ServiceNotFound(_)
        | Error::ServicePlanNotFound(_) => StatusCode::BAD_REQUEST,
        Error::Rds(_) | Error::Sql(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn failure(operation: Operation, err: Error) -> Response<Body> {
    let status = status(operation, &err);
    let code = match err {
        Error::AsyncRequired => Some("AsyncRequired".to_string()),
        _ => None,
    };

    if status.is_server_error() {
        error!(
            operation = operation.to_string(),
            error = err.to_string(),
            "Could not execute broker operation"
        );
    } else {
        warn!(
            operation = operation.to_string(),
            error = err.to_string(),
            status = status.as_u16(),
            "Reject broker operation"
        );
    }

    respond(
        operation,
        status,
        &ErrorResponse {
            error: code,
            description: err.to_string(),
        },
    )
}

fn bad_request(operation: Operation, description: String) -> Response<Body> {
    warn!(operation = operation.to_string(), error = &description, "Reject malformed request");
    respond(
        operation,
        StatusCode::BAD_REQUEST,
        &ErrorResponse {
            error: None,
            description,
        },
    )
}

fn respond<T>(operation: Operation, status: StatusCode, payload: &T) -> Response<Body>
where
    T: Serialize + ?Sized,
{
    #[cfg(feature = "metrics")]
    OPERATION
        .with_label_values(&[&operation.to_string(), &status.as_u16().to_string()])
        .inc();

    #[cfg(not(feature = "metrics"))]
    let _ = operation;

    json(status, payload)
}

fn decode<T>(body: &Bytes) -> Result<T, String>
where
    T: DeserializeOwned,
{
    serde_json::from_slice(body).map_err(|err| format!("failed to decode request body, {err}"))
}

fn accepted(is_async: bool, done: StatusCode) -> StatusCode {
    if is_async {
        StatusCode::ACCEPTED
    } else {
        done
    }
}

// -----------------------------------------------------------------------------
// handlers

#[tracing::instrument(skip_all)]
pub async fn catalog(State(broker): State<SharedBroker>) -> Response<Body> {
    respond(
        Operation::Catalog,
        StatusCode::OK,
        &serde_json::json!({"services": broker.services()}),
    )
}

#[tracing::instrument(skip_all)]
pub async fn provision(
    State(broker): State<SharedBroker>,
    Path(instance_id): Path<String>,
    query: Result<Query<AsyncQuery>, QueryRejection>,
    body: Bytes,
) -> Response<Body> {
    let operation = Operation::Provision;
    let Query(query) = match query {
        Ok(query) => query,
        Err(err) => return bad_request(operation, err.body_text()),
    };

    let details = match decode(&body) {
        Ok(details) => details,
        Err(description) => return bad_request(operation, description),
    };

    match broker
        .provision(&instance_id, details, query.accepts_incomplete)
        .await
    {
        Ok(spec) => respond(operation, accepted(spec.is_async, StatusCode::CREATED), &spec),
        Err(err) => failure(operation, err),
    }
}

#[tracing::instrument(skip_all)]
pub async fn update(
    State(broker): State<SharedBroker>,
    Path(instance_id): Path<String>,
    query: Result<Query<AsyncQuery>, QueryRejection>,
    body: Bytes,
) -> Response<Body> {
    let operation = Operation::Update;
    let Query(query) = match query {
        Ok(query) => query,
        Err(err) => return bad_request(operation, err.body_text()),
    };

    let details = match decode(&body) {
        Ok(details) => details,
        Err(description) => return bad_request(operation, description),
    };

    match broker
        .update(&instance_id, details, query.accepts_incomplete)
        .await
    {
        Ok(spec) => respond(operation, accepted(spec.is_async, StatusCode::OK), &spec),
        Err(err) => failure(operation, err),
    }
}

#[tracing::instrument(skip_all)]
pub async fn deprovision(
    State(broker): State<SharedBroker>,
    Path(instance_id): Path<String>,
    query: Result<Query<DeleteQuery>, QueryRejection>,
) -> Response<Body> {
    let operation = Operation::Deprovision;
    let Query(query) = match query {
        Ok(query) => query,
        Err(err) => return bad_request(operation, err.body_text()),
    };

    let details = DeprovisionDetails {
        service_id: query.service_id,
        plan_id: query.plan_id,
    };

    match broker
        .deprovision(&instance_id, details, query.accepts_incomplete)
        .await
    {
        Ok(spec) => respond(operation, accepted(spec.is_async, StatusCode::OK), &spec),
        Err(err) => failure(operation, err),
    }
}

#[tracing::instrument(skip_all)]
pub async fn bind(
    State(broker): State<SharedBroker>,
    Path((instance_id, binding_id)): Path<(String, String)>,
    body: Bytes,
) -> Response<Body> {
    let operation = Operation::Bind;
    let details = match decode(&body) {
        Ok(details) => details,
        Err(description) => return bad_request(operation, description),
    };

    match broker.bind(&instance_id, &binding_id, details).await {
        Ok(binding) => respond(operation, StatusCode::CREATED, &binding),
        Err(err) => failure(operation, err),
    }
}

#[tracing::instrument(skip_all)]
pub async fn unbind(
    State(broker): State<SharedBroker>,
    Path((instance_id, binding_id)): Path<(String, String)>,
    query: Result<Query<DeleteQuery>, QueryRejection>,
) -> Response<Body> {
    let operation = Operation::Unbind;
    let Query(query) = match query {
        Ok(query) => query,
        Err(err) => return bad_request(operation, err.body_text()),
    };

    let details = UnbindDetails {
        service_id: query.service_id,
        plan_id: query.plan_id,
    };

    match broker.unbind(&instance_id, &binding_id, details).await {
        Ok(()) => respond(operation, StatusCode::OK, &serde_json::json!({})),
        Err(err) => failure(operation, err),
    }
}

#[tracing::instrument(skip_all)]
pub async fn last_operation(
    State(broker): State<SharedBroker>,
    Path(instance_id): Path<String>,
    query: Result<Query<PollDetails>, QueryRejection>,
) -> Response<Body> {
    let operation = Operation::LastOperation;
    let Query(details) = match query {
        Ok(query) => query,
        Err(err) => return bad_request(operation, err.body_text()),
    };

    match broker.last_operation(&instance_id, details).await {
        Ok(last) => respond(operation, StatusCode::OK, &last),
        Err(err) => failure(operation, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::svc::{rds, sql};

    #[test]
    fn missing_resources_are_gone_on_removal() {
        for operation in [Operation::Deprovision, Operation::Unbind, Operation::LastOperation] {
            assert_eq!(status(operation, &Error::InstanceDoesNotExist), StatusCode::GONE);
            assert_eq!(status(operation, &Error::BindingDoesNotExist), StatusCode::GONE);
        }

        for operation in [Operation::Bind, Operation::Update] {
            assert_eq!(status(operation, &Error::InstanceDoesNotExist), StatusCode::NOT_FOUND);
        }
    }

    #[test]
    fn client_errors_are_mapped() {
        let op = Operation::Provision;

        assert_eq!(status(op, &Error::InstanceAlreadyExists), StatusCode::CONFLICT);
        assert_eq!(status(op, &Error::BindingAlreadyExists), StatusCode::CONFLICT);
        assert_eq!(status(op, &Error::AsyncRequired), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            status(op, &Error::PlanChangeNotSupported),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(status(op, &Error::InstanceNotBindable), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            status(op, &Error::ServicePlanNotFound("plan".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(op, &Error::InvalidDbName("orders;".into())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn upstream_errors_are_internal() {
        let op = Operation::Bind;

        assert_eq!(
            status(op, &Error::Rds(rds::Error::Provider("Throttling: slow down".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status(op, &Error::Sql(sql::Error::NotOpened)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
