//! # Catalog module
//!
//! This module provide the service catalog advertised by the broker, its
//! plans with their rds properties and the validation of the whole.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// -----------------------------------------------------------------------------
// Constants

pub const SUPPORTED_ENGINES: [&str; 6] = [
    "aurora",
    "aurora-mysql",
    "aurora-postgresql",
    "mariadb",
    "mysql",
    "postgres",
];

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, PartialEq, Eq, Clone, Debug)]
pub enum Error {
    #[error("must provide a non-empty '{0}'")]
    Empty(&'static str),
    #[error("engine '{0}' is not supported, available options are {1}")]
    UnsupportedEngine(String, String),
    #[error("failed to validate service '{0}', {1}")]
    Service(String, Box<Error>),
    #[error("failed to validate plan '{0}', {1}")]
    ServicePlan(String, Box<Error>),
    #[error("failed to validate rds properties, {0}")]
    RdsProperties(Box<Error>),
}

// -----------------------------------------------------------------------------
// Catalog structure

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct Catalog {
    #[serde(rename = "services", default)]
    pub services: Vec<Service>,
}

impl Catalog {
    pub fn validate(&self) -> Result<(), Error> {
        for service in &self.services {
            service
                .validate()
                .map_err(|err| Error::Service(service.id.to_owned(), Box::new(err)))?;
        }

        Ok(())
    }

    /// returns the service matching the given identifier, if any
    pub fn find_service(&self, id: &str) -> Option<&Service> {
        self.services.iter().find(|service| service.id == id)
    }

    /// returns the first plan matching the given identifier across all
    /// services, if any
    pub fn find_service_plan(&self, id: &str) -> Option<&ServicePlan> {
        self.services
            .iter()
            .flat_map(|service| service.plans.iter())
            .find(|plan| plan.id == id)
    }
}

// -----------------------------------------------------------------------------
// Service structure

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct Service {
    #[serde(rename = "id")]
    pub id: String,
    #[serde(rename = "name")]
    pub name: String,
    #[serde(rename = "description")]
    pub description: String,
    #[serde(rename = "bindable", default)]
    pub bindable: bool,
    #[serde(rename = "tags", default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(rename = "metadata", default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ServiceMetadata>,
    #[serde(rename = "requires", default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,
    #[serde(rename = "plan_updateable", default)]
    pub plan_updateable: bool,
    #[serde(rename = "plans", default)]
    pub plans: Vec<ServicePlan>,
    #[serde(
        rename = "dashboard_client",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub dashboard_client: Option<DashboardClient>,
}

impl Service {
    pub fn validate(&self) -> Result<(), Error> {
        if self.id.is_empty() {
            return Err(Error::Empty("id"));
        }

        if self.name.is_empty() {
            return Err(Error::Empty("name"));
        }

        if self.description.is_empty() {
            return Err(Error::Empty("description"));
        }

        for plan in &self.plans {
            plan.validate()
                .map_err(|err| Error::ServicePlan(plan.id.to_owned(), Box::new(err)))?;
        }

        Ok(())
    }
}

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct ServiceMetadata {
    #[serde(rename = "displayName", default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(rename = "imageUrl", default, skip_serializing_if = "String::is_empty")]
    pub image_url: String,
    #[serde(rename = "longDescription", default, skip_serializing_if = "String::is_empty")]
    pub long_description: String,
    #[serde(rename = "providerDisplayName", default, skip_serializing_if = "String::is_empty")]
    pub provider_display_name: String,
    #[serde(rename = "documentationUrl", default, skip_serializing_if = "String::is_empty")]
    pub documentation_url: String,
    #[serde(rename = "supportUrl", default, skip_serializing_if = "String::is_empty")]
    pub support_url: String,
}

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct DashboardClient {
    #[serde(rename = "id", default)]
    pub id: String,
    #[serde(rename = "secret", default)]
    pub secret: String,
    #[serde(rename = "redirect_uri", default)]
    pub redirect_uri: String,
}

// -----------------------------------------------------------------------------
// ServicePlan structure

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct ServicePlan {
    #[serde(rename = "id")]
    pub id: String,
    #[serde(rename = "name")]
    pub name: String,
    #[serde(rename = "description")]
    pub description: String,
    #[serde(rename = "free", default, skip_serializing_if = "Option::is_none")]
    pub free: Option<bool>,
    #[serde(rename = "metadata", default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ServicePlanMetadata>,
    /// never advertised through the catalog endpoint
    #[serde(rename = "rds_properties", default, skip_serializing)]
    pub rds_properties: RdsProperties,
}

impl ServicePlan {
    pub fn validate(&self) -> Result<(), Error> {
        if self.id.is_empty() {
            return Err(Error::Empty("id"));
        }

        if self.name.is_empty() {
            return Err(Error::Empty("name"));
        }

        if self.description.is_empty() {
            return Err(Error::Empty("description"));
        }

        self.rds_properties
            .validate()
            .map_err(|err| Error::RdsProperties(Box::new(err)))
    }
}

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct ServicePlanMetadata {
    #[serde(rename = "displayName", default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(rename = "bullets", default, skip_serializing_if = "Vec::is_empty")]
    pub bullets: Vec<String>,
    #[serde(rename = "costs", default, skip_serializing_if = "Vec::is_empty")]
    pub costs: Vec<Cost>,
}

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct Cost {
    #[serde(rename = "amount", default)]
    pub amount: BTreeMap<String, f64>,
    #[serde(rename = "unit", default)]
    pub unit: String,
}

// -----------------------------------------------------------------------------
// RdsProperties structure

/// provider specific properties of a plan, they are given as is to the rds
/// api, any zero value lets the provider apply its own default
#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
#[serde(default)]
pub struct RdsProperties {
    #[serde(rename = "db_instance_class")]
    pub db_instance_class: String,
    #[serde(rename = "engine")]
    pub engine: String,
    #[serde(rename = "engine_version")]
    pub engine_version: String,
    #[serde(rename = "allocated_storage")]
    pub allocated_storage: i64,
    #[serde(rename = "auto_minor_version_upgrade")]
    pub auto_minor_version_upgrade: bool,
    #[serde(rename = "availability_zone")]
    pub availability_zone: String,
    #[serde(rename = "backup_retention_period")]
    pub backup_retention_period: i64,
    #[serde(rename = "character_set_name")]
    pub character_set_name: String,
    #[serde(rename = "db_parameter_group_name")]
    pub db_parameter_group_name: String,
    #[serde(rename = "db_cluster_parameter_group_name")]
    pub db_cluster_parameter_group_name: String,
    #[serde(rename = "db_security_groups")]
    pub db_security_groups: Vec<String>,
    #[serde(rename = "db_subnet_group_name")]
    pub db_subnet_group_name: String,
    #[serde(rename = "license_model")]
    pub license_model: String,
    #[serde(rename = "multi_az")]
    pub multi_az: bool,
    #[serde(rename = "option_group_name")]
    pub option_group_name: String,
    #[serde(rename = "port")]
    pub port: i64,
    #[serde(rename = "preferred_backup_window")]
    pub preferred_backup_window: String,
    #[serde(rename = "preferred_maintenance_window")]
    pub preferred_maintenance_window: String,
    #[serde(rename = "publicly_accessible")]
    pub publicly_accessible: bool,
    #[serde(rename = "storage_encrypted")]
    pub storage_encrypted: bool,
    #[serde(rename = "kms_key_id")]
    pub kms_key_id: String,
    #[serde(rename = "storage_type")]
    pub storage_type: String,
    #[serde(rename = "iops")]
    pub iops: i64,
    #[serde(rename = "vpc_security_group_ids")]
    pub vpc_security_group_ids: Vec<String>,
    #[serde(rename = "copy_tags_to_snapshot")]
    pub copy_tags_to_snapshot: bool,
    #[serde(rename = "skip_final_snapshot")]
    pub skip_final_snapshot: bool,
}

impl RdsProperties {
    pub fn validate(&self) -> Result<(), Error> {
        if self.db_instance_class.is_empty() {
            return Err(Error::Empty("db_instance_class"));
        }

        if self.engine.is_empty() {
            return Err(Error::Empty("engine"));
        }

        if !SUPPORTED_ENGINES.contains(&self.engine.to_lowercase().as_str()) {
            return Err(Error::UnsupportedEngine(
                self.engine.to_owned(),
                SUPPORTED_ENGINES.join(", "),
            ));
        }

        Ok(())
    }

    /// returns if the engine is served by an aurora cluster
    pub fn clustered(&self) -> bool {
        self.engine.to_lowercase().starts_with("aurora")
    }
}
