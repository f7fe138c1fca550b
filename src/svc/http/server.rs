//! # Server module
//!
//! This module provides a server implementation with a router based on the
//! crate [`axum`].

use std::{net::SocketAddr, sync::Arc};

use axum::{
    middleware,
    routing::{any, get, put},
    Router,
};
use tokio::net::TcpListener;
use tracing::info;

#[cfg(feature = "metrics")]
use crate::svc::http::metrics;
use crate::svc::http::{
    healthz,
    layer::{self, BasicAuth},
    not_found,
    osb::{self, SharedBroker},
};

// -----------------------------------------------------------------------------
// Error

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to bind on socket '{0}', {1}")]
    Bind(SocketAddr, std::io::Error),
    #[error("failed to listen on socket '{0}', {1}")]
    Serve(SocketAddr, std::io::Error),
}

// -----------------------------------------------------------------------------
// router

/// returns the routes of the open service broker api, they require
/// authentication and a supported api version
pub fn broker(broker: SharedBroker, credentials: BasicAuth) -> Router {
    Router::new()
        .route("/v2/catalog", get(osb::catalog))
        .route(
            "/v2/service_instances/{instance_id}",
            put(osb::provision)
                .patch(osb::update)
                .delete(osb::deprovision),
        )
        .route(
            "/v2/service_instances/{instance_id}/last_operation",
            get(osb::last_operation),
        )
        .route(
            "/v2/service_instances/{instance_id}/service_bindings/{binding_id}",
            put(osb::bind).delete(osb::unbind),
        )
        .route_layer(middleware::from_fn(layer::api_version))
        .route_layer(middleware::from_fn_with_state(
            Arc::new(credentials),
            layer::authenticate,
        ))
        .with_state(broker)
}

#[cfg(feature = "metrics")]
#[tracing::instrument(skip_all)]
pub fn router(broker: SharedBroker, credentials: BasicAuth) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/livez", get(healthz))
        .route("/readyz", get(healthz))
        .route("/status", get(healthz))
        .route("/metrics", get(metrics::handler))
        .merge(self::broker(broker, credentials))
        .fallback(any(not_found))
        .layer(middleware::from_fn(layer::access))
}

#[cfg(not(feature = "metrics"))]
#[tracing::instrument(skip_all)]
pub fn router(broker: SharedBroker, credentials: BasicAuth) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/livez", get(healthz))
        .route("/readyz", get(healthz))
        .route("/status", get(healthz))
        .merge(self::broker(broker, credentials))
        .fallback(any(not_found))
        .layer(middleware::from_fn(layer::access))
}

// -----------------------------------------------------------------------------
// helpers

#[tracing::instrument(skip(router))]
pub async fn serve(router: Router, addr: SocketAddr) -> Result<(), Error> {
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|err| Error::Bind(addr.to_owned(), err))?;

    info!(addr = addr.to_string(), "Begin to listen on address");
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received termination signal, stop to listen");
            }
        })
        .await
        .map_err(|err| Error::Serve(addr, err))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
    };
    use base64::{engine::general_purpose::STANDARD, Engine};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::svc::{
        broker::RdsBroker,
        catalog::{Catalog, RdsProperties, Service, ServicePlan},
        cfg,
        rds::DbInstanceDetails,
        testing::{FakeDbCluster, FakeDbInstance, FakeSqlProvider},
    };

    fn app(instances: FakeDbInstance) -> Router {
        let config = cfg::Rds {
            region: "eu-west-1".into(),
            db_prefix: "cf".into(),
            allow_user_provision_parameters: false,
            allow_user_update_parameters: false,
            allow_user_bind_parameters: false,
            master_password_seed: None,
            catalog: Catalog {
                services: vec![Service {
                    id: "service-1".into(),
                    name: "rds".into(),
                    description: "managed databases".into(),
                    bindable: true,
                    plans: vec![ServicePlan {
                        id: "plan-1".into(),
                        name: "small".into(),
                        description: "a small database".into(),
                        rds_properties: RdsProperties {
                            db_instance_class: "db.t3.micro".into(),
                            engine: "mysql".into(),
                            ..Default::default()
                        },
                        ..Default::default()
                    }],
                    ..Default::default()
                }],
            },
        };

        let broker = RdsBroker::new(
            Arc::new(config),
            Arc::new(instances),
            Arc::new(FakeDbCluster::default()),
            Arc::new(FakeSqlProvider::default()),
        );

        router(Arc::new(broker), BasicAuth::new("broker", "secret"))
    }

    fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(
                header::AUTHORIZATION,
                format!("Basic {}", STANDARD.encode("broker:secret")),
            )
            .header(layer::BROKER_API_VERSION_HEADER, "2.17")
            .header(header::CONTENT_TYPE, "application/json");

        match body {
            Some(body) => builder.body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request to be valid")
    }

    async fn body(res: axum::response::Response) -> Value {
        let bytes = res
            .into_body()
            .collect()
            .await
            .expect("body to be readable")
            .to_bytes();

        serde_json::from_slice(&bytes).expect("body to be json")
    }

    #[tokio::test]
    async fn health_does_not_require_credentials() {
        let res = app(FakeDbInstance::default())
            .oneshot(Request::get("/healthz").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn catalog_requires_credentials() {
        let req = Request::get("/v2/catalog")
            .header(layer::BROKER_API_VERSION_HEADER, "2.17")
            .body(Body::empty())
            .expect("request");

        let res = app(FakeDbInstance::default())
            .oneshot(req)
            .await
            .expect("response");

        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert!(res.headers().contains_key(header::WWW_AUTHENTICATE));
    }

    #[tokio::test]
    async fn catalog_requires_api_version_2() {
        let mut req = request(Method::GET, "/v2/catalog", None);
        req.headers_mut()
            .insert(layer::BROKER_API_VERSION_HEADER, "1.13".parse().expect("header"));

        let res = app(FakeDbInstance::default())
            .oneshot(req)
            .await
            .expect("response");

        assert_eq!(res.status(), StatusCode::PRECONDITION_FAILED);
    }

    #[tokio::test]
    async fn catalog_hides_rds_properties() {
        let res = app(FakeDbInstance::default())
            .oneshot(request(Method::GET, "/v2/catalog", None))
            .await
            .expect("response");

        assert_eq!(res.status(), StatusCode::OK);
        let payload = body(res).await;
        assert_eq!(payload["services"][0]["id"], "service-1");
        assert!(payload["services"][0]["plans"][0].get("rds_properties").is_none());
    }

    #[tokio::test]
    async fn provision_without_accepts_incomplete_is_unprocessable() {
        let res = app(FakeDbInstance::default())
            .oneshot(request(
                Method::PUT,
                "/v2/service_instances/instance-1",
                Some(json!({"service_id": "service-1", "plan_id": "plan-1"})),
            ))
            .await
            .expect("response");

        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body(res).await["error"], "AsyncRequired");
    }

    #[tokio::test]
    async fn provision_is_accepted() {
        let res = app(FakeDbInstance::default())
            .oneshot(request(
                Method::PUT,
                "/v2/service_instances/instance-1?accepts_incomplete=true",
                Some(json!({
                    "service_id": "service-1",
                    "plan_id": "plan-1",
                    "organization_guid": "org-1",
                    "space_guid": "space-1"
                })),
            ))
            .await
            .expect("response");

        assert_eq!(res.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn malformed_body_is_a_bad_request() {
        let res = app(FakeDbInstance::default())
            .oneshot(request(
                Method::PUT,
                "/v2/service_instances/instance-1/service_bindings/binding-1",
                Some(json!({"service_id": 42})),
            ))
            .await
            .expect("response");

        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert!(body(res).await["description"].is_string());
    }

    #[tokio::test]
    async fn last_operation_of_missing_instance_is_gone() {
        let res = app(FakeDbInstance::default())
            .oneshot(request(
                Method::GET,
                "/v2/service_instances/instance-1/last_operation",
                None,
            ))
            .await
            .expect("response");

        assert_eq!(res.status(), StatusCode::GONE);
    }

    #[tokio::test]
    async fn last_operation_reports_state() {
        let instances = FakeDbInstance::with(DbInstanceDetails {
            status: "creating".into(),
            ..Default::default()
        });

        let res = app(instances)
            .oneshot(request(
                Method::GET,
                "/v2/service_instances/instance-1/last_operation?operation=provision",
                None,
            ))
            .await
            .expect("response");

        assert_eq!(res.status(), StatusCode::OK);
        let payload = body(res).await;
        assert_eq!(payload["state"], "in progress");
        assert_eq!(
            payload["description"],
            "DB Instance 'cf-instance-1' status is 'creating'"
        );
    }

    #[tokio::test]
    async fn deprovision_of_missing_instance_is_gone() {
        let res = app(FakeDbInstance::default())
            .oneshot(request(
                Method::DELETE,
                "/v2/service_instances/instance-1?accepts_incomplete=true&service_id=service-1&plan_id=plan-1",
                None,
            ))
            .await
            .expect("response");

        assert_eq!(res.status(), StatusCode::GONE);
    }

    #[tokio::test]
    async fn bind_is_created() {
        let instances = FakeDbInstance::with(DbInstanceDetails {
            status: "available".into(),
            address: "db.example.com".into(),
            port: 3306,
            db_name: "cf_instance_1".into(),
            master_username: "master".into(),
            ..Default::default()
        });

        let res = app(instances)
            .oneshot(request(
                Method::PUT,
                "/v2/service_instances/instance-1/service_bindings/binding-1",
                Some(json!({"service_id": "service-1", "plan_id": "plan-1"})),
            ))
            .await
            .expect("response");

        assert_eq!(res.status(), StatusCode::CREATED);
        let payload = body(res).await;
        assert_eq!(payload["credentials"]["host"], "db.example.com");
        assert_eq!(payload["credentials"]["port"], 3306);
        assert!(payload["credentials"]["jdbcUrl"].is_string());
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let res = app(FakeDbInstance::default())
            .oneshot(Request::get("/v3/catalog").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
