//! # Catalog module
//!
//! This module provides catalog command line interface function
//! implementation

use std::sync::Arc;

use async_trait::async_trait;
use clap::Subcommand;

use crate::{
    cmd::Executor,
    svc::{catalog, cfg::Configuration},
};

// -----------------------------------------------------------------------------
// Error enum

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to serialize catalog, {0}")]
    Serialize(serde_yaml::Error),
    #[error("failed to serialize catalog json schema, {0}")]
    SerializeSchema(serde_json::Error),
}

// -----------------------------------------------------------------------------
// Catalog enum

#[derive(Subcommand, Clone, Debug)]
pub enum Catalog {
    /// View the catalog of services advertised to the platform
    #[clap(name = "view", aliases = &["v"])]
    View {
        /// Only print the service with this identifier
        #[clap(name = "service-id")]
        service_id: Option<String>,
    },
    /// Print the json schema of the catalog
    #[clap(name = "schema", aliases = &["s"])]
    Schema,
}

#[async_trait]
impl Executor for Catalog {
    type Error = Error;

    async fn execute(&self, config: Arc<Configuration>) -> Result<(), Self::Error> {
        match self {
            Self::View { service_id } => view(&config, service_id.as_deref()),
            Self::Schema => schema(),
        }
    }
}

// -----------------------------------------------------------------------------
// helpers

pub fn view(config: &Configuration, service_id: Option<&str>) -> Result<(), Error> {
    print!("{}", render(&config.rds.catalog, service_id)?);
    Ok(())
}

pub fn schema() -> Result<(), Error> {
    let schema = schemars::schema_for!(catalog::Catalog);

    println!(
        "{}",
        serde_json::to_string_pretty(&schema).map_err(Error::SerializeSchema)?
    );

    Ok(())
}

/// returns the yaml representation of the catalog, restricted to the given
/// service if any
pub fn render(catalog: &catalog::Catalog, service_id: Option<&str>) -> Result<String, Error> {
    let services = catalog
        .services
        .iter()
        .filter(|service| service_id.map_or(true, |id| service.id == id))
        .cloned()
        .collect();

    serde_yaml::to_string(&catalog::Catalog { services }).map_err(Error::Serialize)
}
