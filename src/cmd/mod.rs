//! # Command module
//!
//! This module provide command line interface structures and helpers
use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use clap::{ArgAction, Parser, Subcommand};
use tracing::info;

use crate::svc::{
    broker::RdsBroker,
    cfg::Configuration,
    http::{layer::BasicAuth, server},
    rds::{client, cluster::RdsDbCluster, instance::RdsDbInstance},
    sql,
};

pub mod catalog;

// -----------------------------------------------------------------------------
// Executor trait

#[async_trait]
pub trait Executor {
    type Error;

    async fn execute(&self, config: Arc<Configuration>) -> Result<(), Self::Error>;
}

// -----------------------------------------------------------------------------
// Error enum

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to execute command '{0}', {1}")]
    Execution(String, Arc<Error>),
    #[error("failed to execute catalog command, {0}")]
    Catalog(catalog::Error),
    #[error("failed to serve the broker, {0}")]
    Daemon(DaemonError),
}

impl From<DaemonError> for Error {
    fn from(err: DaemonError) -> Self {
        Self::Daemon(err)
    }
}

// -----------------------------------------------------------------------------
// Command enum

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Interact with the catalog of services
    #[clap(name = "catalog", aliases = &["c"], subcommand)]
    Catalog(catalog::Catalog),
}

#[async_trait]
impl Executor for Command {
    type Error = Error;

    async fn execute(&self, config: Arc<Configuration>) -> Result<(), Self::Error> {
        match self {
            Self::Catalog(catalog) => catalog
                .execute(config)
                .await
                .map_err(Error::Catalog)
                .map_err(|err| Error::Execution("catalog".into(), Arc::new(err))),
        }
    }
}

// -----------------------------------------------------------------------------
// Args struct

#[derive(Parser, Clone, Debug)]
#[clap(version, about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Args {
    /// Increase log verbosity
    #[clap(short = 'v', global = true, action = ArgAction::Count)]
    pub verbosity: u8,
    /// Specify location of configuration
    #[clap(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,
    /// Check if configuration is healthy
    #[clap(short = 't', long = "check", global = true)]
    pub check: bool,
    #[clap(subcommand)]
    pub command: Option<Command>,
}

// -----------------------------------------------------------------------------
// DaemonError enum

#[derive(thiserror::Error, Debug)]
pub enum DaemonError {
    #[error("failed to serve http requests, {0}")]
    Serve(server::Error),
}

// -----------------------------------------------------------------------------
// daemon function

pub async fn daemon(config: Arc<Configuration>) -> Result<(), DaemonError> {
    // -------------------------------------------------------------------------
    // Create a new rds client using the environment credentials chain
    let rds_client = client::new(&config.rds.region).await;

    // -------------------------------------------------------------------------
    // Create the broker, it only shares read-only configuration
    let broker = RdsBroker::new(
        Arc::new(config.rds.to_owned()),
        Arc::new(RdsDbInstance::from(rds_client.to_owned())),
        Arc::new(RdsDbCluster::from(rds_client)),
        Arc::new(sql::Provider),
    );

    let credentials = BasicAuth::new(&config.broker.username, &config.broker.password);
    let router = server::router(Arc::new(broker), credentials);

    // -------------------------------------------------------------------------
    // Serve requests until the termination signal
    info!(
        listen = config.broker.listen.to_string(),
        "Start to serve the open service broker api"
    );

    server::serve(router, config.broker.listen)
        .await
        .map_err(DaemonError::Serve)
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn arguments_are_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn verbosity_is_counted() {
        let args = Args::try_parse_from(["rds-broker", "-vvv", "--check"])
            .expect("arguments to be parsed");

        assert_eq!(args.verbosity, 3);
        assert!(args.check);
        assert!(args.command.is_none());
    }

    #[test]
    fn catalog_view_is_parsed() {
        let args = Args::try_parse_from(["rds-broker", "-c", "config.json", "catalog", "view"])
            .expect("arguments to be parsed");

        assert_eq!(args.config, Some(PathBuf::from("config.json")));
        assert!(matches!(
            args.command,
            Some(Command::Catalog(catalog::Catalog::View { .. }))
        ));
    }
}
