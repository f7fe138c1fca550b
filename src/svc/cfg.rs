//! # Configuration module
//!
//! This module provide utilities and helpers to interact with the configuration

use std::{convert::TryFrom, net::SocketAddr, path::PathBuf};

use config::{Config, ConfigBuilder, ConfigError, Environment, File, builder::DefaultState};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::svc::catalog::{self, Catalog};

// -----------------------------------------------------------------------------
// Constants

pub const DEFAULT_LISTEN: &str = "0.0.0.0:3000";

// -----------------------------------------------------------------------------
// Broker structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Broker {
    #[serde(rename = "listen")]
    pub listen: SocketAddr,
    #[serde(rename = "username")]
    pub username: String,
    #[serde(rename = "password")]
    pub password: String,
}

// -----------------------------------------------------------------------------
// Rds structure

#[derive(Serialize, Deserialize, PartialEq, Clone, Debug)]
pub struct Rds {
    #[serde(rename = "region")]
    pub region: String,
    #[serde(rename = "db_prefix")]
    pub db_prefix: String,
    #[serde(rename = "allow_user_provision_parameters", default)]
    pub allow_user_provision_parameters: bool,
    #[serde(rename = "allow_user_update_parameters", default)]
    pub allow_user_update_parameters: bool,
    #[serde(rename = "allow_user_bind_parameters", default)]
    pub allow_user_bind_parameters: bool,
    #[serde(rename = "master_password_seed", default)]
    pub master_password_seed: Option<String>,
    #[serde(rename = "catalog", default)]
    pub catalog: Catalog,
}

impl Rds {
    pub fn validate(&self) -> Result<(), Error> {
        if self.region.is_empty() {
            return Err(Error::Empty("rds.region"));
        }

        if self.db_prefix.is_empty() {
            return Err(Error::Empty("rds.db_prefix"));
        }

        self.catalog.validate().map_err(Error::Catalog)
    }
}

// -----------------------------------------------------------------------------
// Error enum

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to load file '{0:?}', {1}")]
    File(PathBuf, ConfigError),
    #[error("failed to load configuration, {0}")]
    Cast(ConfigError),
    #[error("failed to set default for key '{0}', {1}")]
    Default(String, ConfigError),
    #[error("failed to build configuration, {0}")]
    Build(ConfigError),
    #[error("configuration must provide a non-empty '{0}'")]
    Empty(&'static str),
    #[error("failed to validate catalog, {0}")]
    Catalog(catalog::Error),
}

// -----------------------------------------------------------------------------
// Configuration structures

#[derive(Serialize, Deserialize, PartialEq, Clone, Debug)]
pub struct Configuration {
    #[serde(rename = "broker")]
    pub broker: Broker,
    #[serde(rename = "rds")]
    pub rds: Rds,
}

impl TryFrom<PathBuf> for Configuration {
    type Error = Error;

    fn try_from(path: PathBuf) -> Result<Self, Self::Error> {
        let builder = defaults()?
            .add_source(File::from(path.to_owned()).required(true))
            .add_source(environment());

        builder
            .build()
            .map_err(|err| Error::File(path, err))?
            .try_deserialize()
            .map_err(Error::Cast)
    }
}

impl Configuration {
    pub fn try_default() -> Result<Self, Error> {
        let mut builder = defaults()?;
        let mut paths = vec![
            PathBuf::from(format!("/usr/share/{}/config", env!("CARGO_PKG_NAME"))),
            PathBuf::from(format!("/etc/{}/config", env!("CARGO_PKG_NAME"))),
        ];

        if let Some(home) = std::env::var_os("HOME") {
            paths.push(PathBuf::from(home).join(format!(".config/{}/config", env!("CARGO_PKG_NAME"))));
        }

        paths.push(PathBuf::from("config"));
        for path in paths {
            builder = builder.add_source(File::from(path).required(false));
        }

        builder
            .add_source(environment())
            .build()
            .map_err(Error::Build)?
            .try_deserialize()
            .map_err(Error::Cast)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.broker.username.is_empty() {
            return Err(Error::Empty("broker.username"));
        }

        if self.broker.password.is_empty() {
            return Err(Error::Empty("broker.password"));
        }

        self.rds.validate()
    }

    pub fn help(&self) {
        info!(
            listen = self.broker.listen.to_string(),
            region = &self.rds.region,
            db_prefix = &self.rds.db_prefix,
            services = self.rds.catalog.services.len(),
            "Loaded configuration"
        );
    }
}

// -----------------------------------------------------------------------------
// helpers

fn defaults() -> Result<ConfigBuilder<DefaultState>, Error> {
    Config::builder()
        .set_default("broker.listen", DEFAULT_LISTEN)
        .map_err(|err| Error::Default("broker.listen".into(), err))
}

fn environment() -> Environment {
    Environment::with_prefix(&env!("CARGO_PKG_NAME").replace('-', "_"))
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const CONFIGURATION: &str = r#"{
        "broker": { "username": "admin", "password": "secret" },
        "rds": {
            "region": "eu-west-1",
            "db_prefix": "cf",
            "allow_user_bind_parameters": true,
            "catalog": {
                "services": [{
                    "id": "service-1",
                    "name": "rds-postgres",
                    "description": "postgres databases",
                    "bindable": true,
                    "plans": [{
                        "id": "plan-1",
                        "name": "micro",
                        "description": "micro instance",
                        "rds_properties": {
                            "db_instance_class": "db.t3.micro",
                            "engine": "postgres",
                            "allocated_storage": 10
                        }
                    }]
                }]
            }
        }
    }"#;

    fn write(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .expect("temporary file to be created");

        file.write_all(content.as_bytes())
            .expect("configuration to be written");
        file
    }

    #[test]
    fn load_from_file() {
        let file = write(CONFIGURATION);
        let config = Configuration::try_from(file.path().to_path_buf())
            .expect("configuration to be loaded");

        assert_eq!(config.broker.listen.to_string(), DEFAULT_LISTEN);
        assert_eq!(config.rds.region, "eu-west-1");
        assert!(config.rds.allow_user_bind_parameters);
        assert!(!config.rds.allow_user_provision_parameters);
        assert_eq!(config.rds.master_password_seed, None);

        let plan = config
            .rds
            .catalog
            .find_service_plan("plan-1")
            .expect("plan to be found");
        assert_eq!(plan.rds_properties.allocated_storage, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = Configuration::try_from(PathBuf::from("/nonexistent/rds-broker.json"));
        assert!(matches!(result, Err(Error::File(_, _))));
    }

    #[test]
    fn validation_requires_prefix() {
        let file = write(&CONFIGURATION.replace(r#""db_prefix": "cf","#, r#""db_prefix": "","#));
        let config = Configuration::try_from(file.path().to_path_buf())
            .expect("configuration to be loaded");

        assert!(matches!(config.validate(), Err(Error::Empty("rds.db_prefix"))));
    }
}
