//! # Broker module
//!
//! This module provide the open service broker interface, the structures
//! exchanged through it and the rds implementation.

use std::fmt::{self, Display, Formatter};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::svc::{catalog::Service, rds, sql};

pub mod ident;
pub mod params;
pub mod rds_broker;

pub use rds_broker::RdsBroker;

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("instance does not exist")]
    InstanceDoesNotExist,
    #[error("instance already exists")]
    InstanceAlreadyExists,
    #[error("binding does not exist")]
    BindingDoesNotExist,
    #[error("binding already exists")]
    BindingAlreadyExists,
    #[error("instance is not bindable")]
    InstanceNotBindable,
    #[error("the service does not support plan changes")]
    PlanChangeNotSupported,
    #[error("this service plan requires client support for asynchronous service operations")]
    AsyncRequired,
    #[error("service '{0}' not found")]
    ServiceNotFound(String),
    #[error("service plan '{0}' not found")]
    ServicePlanNotFound(String),
    #[error("failed to decode parameters, {0}")]
    Parameters(serde_json::Error),
    #[error("database name '{0}' must start with a letter followed by at most 62 letters, digits or underscores")]
    InvalidDbName(String),
    #[error("failed to execute request on rds api, {0}")]
    Rds(rds::Error),
    #[error("failed to execute request on database server, {0}")]
    Sql(sql::Error),
}

impl From<rds::Error> for Error {
    fn from(err: rds::Error) -> Self {
        match err {
            rds::Error::DoesNotExist => Self::InstanceDoesNotExist,
            rds::Error::AlreadyExists(_) => Self::InstanceAlreadyExists,
            err => Self::Rds(err),
        }
    }
}

impl From<sql::Error> for Error {
    fn from(err: sql::Error) -> Self {
        Self::Sql(err)
    }
}

// -----------------------------------------------------------------------------
// Request structures

#[derive(Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct ProvisionDetails {
    #[serde(rename = "service_id")]
    pub service_id: String,
    #[serde(rename = "plan_id")]
    pub plan_id: String,
    #[serde(rename = "organization_guid", default)]
    pub organization_guid: String,
    #[serde(rename = "space_guid", default)]
    pub space_guid: String,
    #[serde(rename = "parameters", default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct PreviousValues {
    #[serde(rename = "plan_id", default)]
    pub plan_id: String,
    #[serde(rename = "service_id", default)]
    pub service_id: String,
    #[serde(rename = "organization_id", default)]
    pub organization_id: String,
    #[serde(rename = "space_id", default)]
    pub space_id: String,
}

#[derive(Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct UpdateDetails {
    #[serde(rename = "service_id")]
    pub service_id: String,
    #[serde(rename = "plan_id", default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(rename = "parameters", default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
    #[serde(rename = "previous_values", default, skip_serializing_if = "Option::is_none")]
    pub previous_values: Option<PreviousValues>,
}

impl UpdateDetails {
    /// returns the requested plan or the current one if the request does not
    /// change it
    pub fn plan_id(&self) -> Option<&str> {
        self.plan_id
            .as_deref()
            .or_else(|| self.previous_values.as_ref().map(|prev| prev.plan_id.as_str()))
            .filter(|id| !id.is_empty())
    }
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct DeprovisionDetails {
    #[serde(rename = "service_id")]
    pub service_id: String,
    #[serde(rename = "plan_id")]
    pub plan_id: String,
}

#[derive(Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct BindDetails {
    #[serde(rename = "service_id")]
    pub service_id: String,
    #[serde(rename = "plan_id")]
    pub plan_id: String,
    #[serde(rename = "app_guid", default, skip_serializing_if = "Option::is_none")]
    pub app_guid: Option<String>,
    #[serde(rename = "parameters", default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct UnbindDetails {
    #[serde(rename = "service_id")]
    pub service_id: String,
    #[serde(rename = "plan_id")]
    pub plan_id: String,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct PollDetails {
    #[serde(rename = "service_id", default)]
    pub service_id: Option<String>,
    #[serde(rename = "plan_id", default)]
    pub plan_id: Option<String>,
    #[serde(rename = "operation", default)]
    pub operation: Option<String>,
}

// -----------------------------------------------------------------------------
// Response structures

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct ProvisionedServiceSpec {
    #[serde(skip)]
    pub is_async: bool,
    #[serde(rename = "dashboard_url", default, skip_serializing_if = "Option::is_none")]
    pub dashboard_url: Option<String>,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct UpdateServiceSpec {
    #[serde(skip)]
    pub is_async: bool,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct DeprovisionServiceSpec {
    #[serde(skip)]
    pub is_async: bool,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Credentials {
    #[serde(rename = "host")]
    pub host: String,
    #[serde(rename = "port")]
    pub port: i64,
    #[serde(rename = "name")]
    pub name: String,
    #[serde(rename = "username")]
    pub username: String,
    #[serde(rename = "password")]
    pub password: String,
    #[serde(rename = "uri")]
    pub uri: String,
    #[serde(rename = "jdbcUrl")]
    pub jdbc_uri: String,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Binding {
    #[serde(rename = "credentials")]
    pub credentials: Credentials,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum LastOperationState {
    #[serde(rename = "in progress")]
    InProgress,
    #[serde(rename = "succeeded")]
    Succeeded,
    #[serde(rename = "failed")]
    Failed,
}

impl Display for LastOperationState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress => write!(f, "in progress"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct LastOperation {
    #[serde(rename = "state")]
    pub state: LastOperationState,
    #[serde(rename = "description", default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

// -----------------------------------------------------------------------------
// ServiceBroker trait

/// provides the operations of the open service broker api, each operation
/// is stateless
#[async_trait]
pub trait ServiceBroker: Send + Sync {
    fn services(&self) -> Vec<Service>;

    async fn provision(
        &self,
        instance_id: &str,
        details: ProvisionDetails,
        accepts_incomplete: bool,
    ) -> Result<ProvisionedServiceSpec, Error>;

    async fn update(
        &self,
        instance_id: &str,
        details: UpdateDetails,
        accepts_incomplete: bool,
    ) -> Result<UpdateServiceSpec, Error>;

    async fn deprovision(
        &self,
        instance_id: &str,
        details: DeprovisionDetails,
        accepts_incomplete: bool,
    ) -> Result<DeprovisionServiceSpec, Error>;

    async fn bind(
        &self,
        instance_id: &str,
        binding_id: &str,
        details: BindDetails,
    ) -> Result<Binding, Error>;

    async fn unbind(
        &self,
        instance_id: &str,
        binding_id: &str,
        details: UnbindDetails,
    ) -> Result<(), Error>;

    async fn last_operation(
        &self,
        instance_id: &str,
        details: PollDetails,
    ) -> Result<LastOperation, Error>;
}
