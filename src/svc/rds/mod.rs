//! # Rds module
//!
//! This module provide structures, traits and helpers related to amazon rds
//! and the `aws-sdk-rds` crate. Instances and clusters are described by
//! sparse value objects, zero values are never sent to the provider.

use std::{collections::BTreeMap, fmt::Debug};

use async_trait::async_trait;
use aws_sdk_rds::{
    config::http::HttpResponse,
    error::{ProvideErrorMetadata, SdkError},
    types::Tag,
};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

pub mod client;
pub mod cluster;
pub mod instance;

// -----------------------------------------------------------------------------
// Constants

pub const NOT_FOUND_CODES: [&str; 3] = [
    "DBInstanceNotFound",
    "DBClusterNotFoundFault",
    "DBSnapshotNotFound",
];

pub const ALREADY_EXISTS_CODES: [&str; 2] = ["DBInstanceAlreadyExists", "DBClusterAlreadyExistsFault"];

pub const FINAL_SNAPSHOT_FORMAT: &str = "%Y%m%d%H%M%S";

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, PartialEq, Eq, Clone, Debug)]
pub enum Error {
    #[error("resource does not exist")]
    DoesNotExist,
    #[error("resource already exists, {0}")]
    AlreadyExists(String),
    #[error("{0}")]
    Provider(String),
    #[error("migrating the engine from '{0}' to '{1}' is not supported")]
    EngineMigration(String, String),
    #[error("downgrading the engine version from '{0}' to '{1}' is not supported")]
    EngineDowngrade(String, String),
    #[error("value '{0}' does not fit in a 32 bits integer")]
    OutOfRange(i64),
}

impl<E> From<SdkError<E, HttpResponse>> for Error
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    fn from(err: SdkError<E, HttpResponse>) -> Self {
        let status = err.raw_response().map(|res| res.status().as_u16());
        let code = err.code().map(ToOwned::to_owned);
        let message = err.message().map(ToOwned::to_owned);

        classify(status, code, message, || {
            aws_sdk_rds::error::DisplayErrorContext(&err).to_string()
        })
    }
}

/// downgrades a provider error to either [`Error::DoesNotExist`] or an
/// opaque error formatted as `code: message`
pub fn classify<F>(
    status: Option<u16>,
    code: Option<String>,
    message: Option<String>,
    context: F,
) -> Error
where
    F: FnOnce() -> String,
{
    if status == Some(404) {
        return Error::DoesNotExist;
    }

    match (code, message) {
        (Some(code), _) if NOT_FOUND_CODES.contains(&code.as_str()) => Error::DoesNotExist,
        (Some(code), message) if ALREADY_EXISTS_CODES.contains(&code.as_str()) => {
            Error::AlreadyExists(message.unwrap_or(code))
        }
        (Some(code), Some(message)) => Error::Provider(format!("{code}: {message}")),
        (Some(code), None) => Error::Provider(code),
        (None, _) => Error::Provider(context()),
    }
}

// -----------------------------------------------------------------------------
// DbInstanceDetails structure

#[derive(PartialEq, Eq, Clone, Debug, Default)]
pub struct DbInstanceDetails {
    pub identifier: String,
    pub arn: String,
    pub status: String,
    pub db_instance_class: String,
    pub engine: String,
    pub engine_version: String,
    pub allocated_storage: i64,
    pub auto_minor_version_upgrade: bool,
    pub availability_zone: String,
    pub backup_retention_period: i64,
    pub character_set_name: String,
    pub db_cluster_identifier: String,
    pub db_name: String,
    pub db_parameter_group_name: String,
    pub db_security_groups: Vec<String>,
    pub db_subnet_group_name: String,
    pub license_model: String,
    pub master_username: String,
    pub master_user_password: String,
    pub multi_az: bool,
    pub option_group_name: String,
    pub port: i64,
    pub address: String,
    pub preferred_backup_window: String,
    pub preferred_maintenance_window: String,
    pub publicly_accessible: bool,
    pub storage_encrypted: bool,
    pub kms_key_id: String,
    pub storage_type: String,
    pub iops: i64,
    pub vpc_security_group_ids: Vec<String>,
    pub copy_tags_to_snapshot: bool,
    pub pending_modifications: bool,
    pub tags: BTreeMap<String, String>,
}

// -----------------------------------------------------------------------------
// DbClusterDetails structure

#[derive(PartialEq, Eq, Clone, Debug, Default)]
pub struct DbClusterDetails {
    pub identifier: String,
    pub arn: String,
    pub status: String,
    pub engine: String,
    pub engine_version: String,
    pub allocated_storage: i64,
    pub availability_zones: Vec<String>,
    pub backup_retention_period: i64,
    pub character_set_name: String,
    pub database_name: String,
    pub db_cluster_parameter_group_name: String,
    pub db_subnet_group_name: String,
    pub master_username: String,
    pub master_user_password: String,
    pub option_group_name: String,
    pub port: i64,
    pub endpoint: String,
    pub preferred_backup_window: String,
    pub preferred_maintenance_window: String,
    pub storage_encrypted: bool,
    pub kms_key_id: String,
    pub vpc_security_group_ids: Vec<String>,
    pub tags: BTreeMap<String, String>,
}

// -----------------------------------------------------------------------------
// DbInstance trait

#[async_trait]
pub trait DbInstance: Debug + Send + Sync {
    async fn describe(&self, id: &str) -> Result<DbInstanceDetails, Error>;

    async fn create(&self, id: &str, details: DbInstanceDetails) -> Result<(), Error>;

    async fn modify(
        &self,
        id: &str,
        details: DbInstanceDetails,
        apply_immediately: bool,
    ) -> Result<(), Error>;

    async fn delete(&self, id: &str, skip_final_snapshot: bool) -> Result<(), Error>;
}

// -----------------------------------------------------------------------------
// DbCluster trait

#[async_trait]
pub trait DbCluster: Debug + Send + Sync {
    async fn describe(&self, id: &str) -> Result<DbClusterDetails, Error>;

    async fn create(&self, id: &str, details: DbClusterDetails) -> Result<(), Error>;

    async fn modify(
        &self,
        id: &str,
        details: DbClusterDetails,
        apply_immediately: bool,
    ) -> Result<(), Error>;

    async fn delete(&self, id: &str, skip_final_snapshot: bool) -> Result<(), Error>;
}

// -----------------------------------------------------------------------------
// helpers

pub(crate) fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        return None;
    }

    Some(value.to_owned())
}

pub(crate) fn non_zero(value: i64) -> Result<Option<i32>, Error> {
    if value == 0 {
        return Ok(None);
    }

    i32::try_from(value)
        .map(Some)
        .map_err(|_| Error::OutOfRange(value))
}

pub(crate) fn non_empty_list(values: &[String]) -> Option<Vec<String>> {
    if values.is_empty() {
        return None;
    }

    Some(values.to_vec())
}

pub(crate) fn tags(tags: &BTreeMap<String, String>) -> Option<Vec<Tag>> {
    if tags.is_empty() {
        return None;
    }

    Some(
        tags.iter()
            .map(|(key, value)| Tag::builder().key(key).value(value).build())
            .collect(),
    )
}

/// returns the arn to tag, resources without a described arn are not tagged
pub(crate) fn tagging_arn<'a>(kind: &str, id: &str, arn: &'a str) -> Option<&'a str> {
    if arn.is_empty() {
        warn!(id = id, "Could not tag rds {kind}, no arn was described");
        return None;
    }

    Some(arn)
}

/// returns if the resource was tagged, failures are logged and never fail
/// the operation that tags
pub(crate) fn tagged(kind: &str, id: &str, arn: &str, result: Result<(), Error>) -> bool {
    match result {
        Ok(()) => {
            debug!(id = id, arn = arn, "Tagged rds {kind}");
            true
        }
        Err(err) => {
            warn!(
                id = id,
                arn = arn,
                error = err.to_string(),
                "Could not tag rds {kind}"
            );
            false
        }
    }
}

/// returns the name of the final snapshot taken before deleting a resource
pub fn final_snapshot_identifier(id: &str, now: DateTime<Utc>) -> String {
    format!("{}-final-snapshot-{}", id, now.format(FINAL_SNAPSHOT_FORMAT))
}
