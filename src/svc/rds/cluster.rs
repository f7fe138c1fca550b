//! # Cluster module
//!
//! This module provide the aurora cluster client

use async_trait::async_trait;
use aws_sdk_rds::{
    operation::{
        create_db_cluster::builders::CreateDBClusterFluentBuilder,
        modify_db_cluster::builders::ModifyDBClusterFluentBuilder,
    },
    types::DbCluster as RdsCluster,
};
use chrono::Utc;
use tracing::{debug, info};

use crate::svc::rds::{
    client::Client, final_snapshot_identifier, non_empty, non_empty_list, non_zero, tagged,
    tagging_arn, tags, DbCluster, DbClusterDetails, Error,
};

// -----------------------------------------------------------------------------
// RdsDbCluster structure

#[derive(Clone, Debug)]
pub struct RdsDbCluster {
    client: Client,
}

impl From<Client> for RdsDbCluster {
    fn from(client: Client) -> Self {
        Self { client }
    }
}

impl RdsDbCluster {
    /// tags the cluster, failures are only logged
    async fn tag(&self, id: &str, details: &DbClusterDetails) {
        let current = match self.describe(id).await {
            Ok(current) => current,
            Err(err) => {
                tagged("cluster", id, "", Err(err));
                return;
            }
        };

        if let Some(arn) = tagging_arn("cluster", id, &current.arn) {
            let result = self
                .client
                .add_tags_to_resource()
                .resource_name(arn)
                .set_tags(tags(&details.tags))
                .send()
                .await
                .map(|_| ())
                .map_err(Error::from);

            tagged("cluster", id, arn, result);
        }
    }
}

#[async_trait]
impl DbCluster for RdsDbCluster {
    #[tracing::instrument(skip(self))]
    async fn describe(&self, id: &str) -> Result<DbClusterDetails, Error> {
        debug!(id = id, "Describe rds cluster");
        let output = self
            .client
            .describe_db_clusters()
            .db_cluster_identifier(id)
            .send()
            .await?;

        output
            .db_clusters()
            .first()
            .map(details)
            .ok_or(Error::DoesNotExist)
    }

    #[tracing::instrument(skip(self, details))]
    async fn create(&self, id: &str, details: DbClusterDetails) -> Result<(), Error> {
        info!(id = id, engine = &details.engine, "Create rds cluster");
        create_request(self.client.create_db_cluster(), id, &details)?
            .send()
            .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self, details))]
    async fn modify(
        &self,
        id: &str,
        details: DbClusterDetails,
        apply_immediately: bool,
    ) -> Result<(), Error> {
        info!(id = id, apply_immediately = apply_immediately, "Modify rds cluster");
        modify_request(self.client.modify_db_cluster(), id, &details, apply_immediately)?
            .send()
            .await?;

        if !details.tags.is_empty() {
            self.tag(id, &details).await;
        }

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, id: &str, skip_final_snapshot: bool) -> Result<(), Error> {
        info!(
            id = id,
            skip_final_snapshot = skip_final_snapshot,
            "Delete rds cluster"
        );

        let mut request = self
            .client
            .delete_db_cluster()
            .db_cluster_identifier(id)
            .skip_final_snapshot(skip_final_snapshot);

        if !skip_final_snapshot {
            request = request.final_db_snapshot_identifier(final_snapshot_identifier(id, Utc::now()));
        }

        request.send().await?;
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// helpers

pub(crate) fn create_request(
    request: CreateDBClusterFluentBuilder,
    id: &str,
    details: &DbClusterDetails,
) -> Result<CreateDBClusterFluentBuilder, Error> {
    Ok(request
        .db_cluster_identifier(id)
        .set_engine(non_empty(&details.engine))
        .set_engine_version(non_empty(&details.engine_version))
        .set_availability_zones(non_empty_list(&details.availability_zones))
        .set_backup_retention_period(non_zero(details.backup_retention_period)?)
        .set_character_set_name(non_empty(&details.character_set_name))
        .set_database_name(non_empty(&details.database_name))
        .set_db_cluster_parameter_group_name(non_empty(&details.db_cluster_parameter_group_name))
        .set_db_subnet_group_name(non_empty(&details.db_subnet_group_name))
        .set_kms_key_id(non_empty(&details.kms_key_id))
        .set_master_username(non_empty(&details.master_username))
        .set_master_user_password(non_empty(&details.master_user_password))
        .set_option_group_name(non_empty(&details.option_group_name))
        .set_port(non_zero(details.port)?)
        .set_preferred_backup_window(non_empty(&details.preferred_backup_window))
        .set_preferred_maintenance_window(non_empty(&details.preferred_maintenance_window))
        .storage_encrypted(details.storage_encrypted)
        .set_vpc_security_group_ids(non_empty_list(&details.vpc_security_group_ids))
        .set_tags(tags(&details.tags)))
}

pub(crate) fn modify_request(
    request: ModifyDBClusterFluentBuilder,
    id: &str,
    details: &DbClusterDetails,
    apply_immediately: bool,
) -> Result<ModifyDBClusterFluentBuilder, Error> {
    Ok(request
        .db_cluster_identifier(id)
        .apply_immediately(apply_immediately)
        .set_backup_retention_period(non_zero(details.backup_retention_period)?)
        .set_db_cluster_parameter_group_name(non_empty(&details.db_cluster_parameter_group_name))
        .set_master_user_password(non_empty(&details.master_user_password))
        .set_option_group_name(non_empty(&details.option_group_name))
        .set_port(non_zero(details.port)?)
        .set_preferred_backup_window(non_empty(&details.preferred_backup_window))
        .set_preferred_maintenance_window(non_empty(&details.preferred_maintenance_window))
        .set_vpc_security_group_ids(non_empty_list(&details.vpc_security_group_ids)))
}

fn details(cluster: &RdsCluster) -> DbClusterDetails {
    DbClusterDetails {
        identifier: cluster.db_cluster_identifier().unwrap_or_default().to_owned(),
        arn: cluster.db_cluster_arn().unwrap_or_default().to_owned(),
        status: cluster.status().unwrap_or_default().to_owned(),
        engine: cluster.engine().unwrap_or_default().to_owned(),
        engine_version: cluster.engine_version().unwrap_or_default().to_owned(),
        allocated_storage: cluster.allocated_storage().unwrap_or_default().into(),
        availability_zones: cluster.availability_zones().to_vec(),
        backup_retention_period: cluster.backup_retention_period().unwrap_or_default().into(),
        character_set_name: cluster.character_set_name().unwrap_or_default().to_owned(),
        database_name: cluster.database_name().unwrap_or_default().to_owned(),
        db_cluster_parameter_group_name: cluster
            .db_cluster_parameter_group()
            .unwrap_or_default()
            .to_owned(),
        db_subnet_group_name: cluster.db_subnet_group().unwrap_or_default().to_owned(),
        master_username: cluster.master_username().unwrap_or_default().to_owned(),
        master_user_password: String::new(),
        option_group_name: cluster
            .db_cluster_option_group_memberships()
            .first()
            .and_then(|group| group.db_cluster_option_group_name())
            .unwrap_or_default()
            .to_owned(),
        port: cluster.port().unwrap_or_default().into(),
        endpoint: cluster.endpoint().unwrap_or_default().to_owned(),
        preferred_backup_window: cluster.preferred_backup_window().unwrap_or_default().to_owned(),
        preferred_maintenance_window: cluster
            .preferred_maintenance_window()
            .unwrap_or_default()
            .to_owned(),
        storage_encrypted: cluster.storage_encrypted().unwrap_or_default(),
        kms_key_id: cluster.kms_key_id().unwrap_or_default().to_owned(),
        vpc_security_group_ids: cluster
            .vpc_security_groups()
            .iter()
            .filter_map(|group| group.vpc_security_group_id())
            .map(ToOwned::to_owned)
            .collect(),
        tags: cluster
            .tag_list()
            .iter()
            .filter_map(|tag| Some((tag.key()?.to_owned(), tag.value().unwrap_or_default().to_owned())))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::svc::rds::client;

    #[test]
    fn create_is_sparse() {
        let client = client::offline("us-east-1");
        let details = DbClusterDetails {
            engine: "aurora-postgresql".into(),
            master_username: "admin".into(),
            master_user_password: "secret".into(),
            ..Default::default()
        };

        let request = create_request(client.create_db_cluster(), "cf-cluster", &details)
            .expect("request to be built");
        let input = request.as_input();

        assert_eq!(input.get_db_cluster_identifier().as_deref(), Some("cf-cluster"));
        assert_eq!(input.get_master_username().as_deref(), Some("admin"));
        assert_eq!(input.get_port(), &None);
        assert_eq!(input.get_database_name(), &None);
        assert_eq!(input.get_availability_zones(), &None);
        assert_eq!(input.get_storage_encrypted(), &Some(false));

        let details = DbClusterDetails {
            port: 666,
            database_name: "cf_db".into(),
            ..details
        };

        let request = create_request(client.create_db_cluster(), "cf-cluster", &details)
            .expect("request to be built");
        assert_eq!(request.as_input().get_port(), &Some(666));
        assert_eq!(request.as_input().get_database_name().as_deref(), Some("cf_db"));
    }

    #[test]
    fn modify_is_sparse() {
        let client = client::offline("us-east-1");
        let details = DbClusterDetails {
            backup_retention_period: 7,
            ..Default::default()
        };

        let request = modify_request(client.modify_db_cluster(), "cf-cluster", &details, true)
            .expect("request to be built");
        let input = request.as_input();

        assert_eq!(input.get_backup_retention_period(), &Some(7));
        assert_eq!(input.get_preferred_backup_window(), &None);
        assert_eq!(input.get_apply_immediately(), &Some(true));
    }

    #[test]
    fn oversized_ports_are_rejected() {
        let client = client::offline("us-east-1");
        let details = DbClusterDetails {
            port: i64::MAX,
            ..Default::default()
        };

        let result = modify_request(client.modify_db_cluster(), "cf-cluster", &details, false);
        assert!(matches!(result, Err(Error::OutOfRange(i64::MAX))));
    }
}
