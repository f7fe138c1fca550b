//! # Client module
//!
//! This module provides helpers to create an amazon rds client

use aws_config::{BehaviorVersion, Region};
use tracing::debug;

// -----------------------------------------------------------------------------
// types

pub type Client = aws_sdk_rds::Client;

// -----------------------------------------------------------------------------
// helpers

/// returns a new rds client using the default credentials chain of the
/// environment (variables, profile, instance metadata, ...) in the given
/// region
#[tracing::instrument]
pub async fn new(region: &str) -> Client {
    debug!(region = region, "Load amazon web services configuration");
    let config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_owned()))
        .load()
        .await;

    Client::new(&config)
}

#[cfg(test)]
pub fn offline(region: &str) -> Client {
    let config = aws_sdk_rds::Config::builder()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new(region.to_owned()))
        .build();

    Client::from_conf(config)
}
