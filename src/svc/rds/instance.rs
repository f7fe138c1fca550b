//! # Instance module
//!
//! This module provide the rds instance client, it translates
//! [`DbInstanceDetails`] into sparse requests and provider responses back into
//! [`DbInstanceDetails`].

use std::cmp::Ordering;

use async_trait::async_trait;
use aws_sdk_rds::{
    operation::{
        create_db_instance::builders::CreateDBInstanceFluentBuilder,
        modify_db_instance::builders::ModifyDBInstanceFluentBuilder,
    },
    types::{DbInstance as RdsInstance, PendingModifiedValues},
};
use chrono::Utc;
use tracing::{debug, info};

use crate::svc::rds::{
    client::Client, final_snapshot_identifier, non_empty, non_empty_list, non_zero, tagged,
    tagging_arn, tags, DbInstance, DbInstanceDetails, Error,
};

// -----------------------------------------------------------------------------
// RdsDbInstance structure

#[derive(Clone, Debug)]
pub struct RdsDbInstance {
    client: Client,
}

impl From<Client> for RdsDbInstance {
    fn from(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DbInstance for RdsDbInstance {
    #[tracing::instrument(skip(self))]
    async fn describe(&self, id: &str) -> Result<DbInstanceDetails, Error> {
        debug!(id = id, "Describe rds instance");
        let output = self
            .client
            .describe_db_instances()
            .db_instance_identifier(id)
            .send()
            .await?;

        output
            .db_instances()
            .first()
            .map(details)
            .ok_or(Error::DoesNotExist)
    }

    #[tracing::instrument(skip(self, details))]
    async fn create(&self, id: &str, details: DbInstanceDetails) -> Result<(), Error> {
        info!(id = id, engine = &details.engine, "Create rds instance");
        create_request(self.client.create_db_instance(), id, &details)?
            .send()
            .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self, details))]
    async fn modify(
        &self,
        id: &str,
        details: DbInstanceDetails,
        apply_immediately: bool,
    ) -> Result<(), Error> {
        let current = self.describe(id).await?;

        info!(id = id, apply_immediately = apply_immediately, "Modify rds instance");
        modify_request(
            self.client.modify_db_instance(),
            id,
            &details,
            &current,
            apply_immediately,
        )?
        .send()
        .await?;

        if details.tags.is_empty() {
            return Ok(());
        }

        if let Some(arn) = tagging_arn("instance", id, &current.arn) {
            let result = self
                .client
                .add_tags_to_resource()
                .resource_name(arn)
                .set_tags(tags(&details.tags))
                .send()
                .await
                .map(|_| ())
                .map_err(Error::from);

            tagged("instance", id, arn, result);
        }

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, id: &str, skip_final_snapshot: bool) -> Result<(), Error> {
        info!(
            id = id,
            skip_final_snapshot = skip_final_snapshot,
            "Delete rds instance"
        );

        let mut request = self
            .client
            .delete_db_instance()
            .db_instance_identifier(id)
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

/// returns the given request filled with the non-zero fields of details,
/// booleans are always sent except those owned by the cluster for its members
pub(crate) fn create_request(
    request: CreateDBInstanceFluentBuilder,
    id: &str,
    details: &DbInstanceDetails,
) -> Result<CreateDBInstanceFluentBuilder, Error> {
    let member = !details.db_cluster_identifier.is_empty();
    let request = request
        .db_instance_identifier(id)
        .set_db_instance_class(non_empty(&details.db_instance_class))
        .set_engine(non_empty(&details.engine))
        .set_engine_version(non_empty(&details.engine_version))
        .set_allocated_storage(non_zero(details.allocated_storage)?)
        .auto_minor_version_upgrade(details.auto_minor_version_upgrade)
        .set_availability_zone(non_empty(&details.availability_zone))
        .set_backup_retention_period(non_zero(details.backup_retention_period)?)
        .set_character_set_name(non_empty(&details.character_set_name))
        .set_db_cluster_identifier(non_empty(&details.db_cluster_identifier))
        .set_db_name(non_empty(&details.db_name))
        .set_db_parameter_group_name(non_empty(&details.db_parameter_group_name))
        .set_db_security_groups(non_empty_list(&details.db_security_groups))
        .set_db_subnet_group_name(non_empty(&details.db_subnet_group_name))
        .set_license_model(non_empty(&details.license_model))
        .set_master_username(non_empty(&details.master_username))
        .set_master_user_password(non_empty(&details.master_user_password))
        .set_option_group_name(non_empty(&details.option_group_name))
        .set_port(non_zero(details.port)?)
        .set_preferred_backup_window(non_empty(&details.preferred_backup_window))
        .set_preferred_maintenance_window(non_empty(&details.preferred_maintenance_window))
        .publicly_accessible(details.publicly_accessible)
        .set_kms_key_id(non_empty(&details.kms_key_id))
        .set_storage_type(non_empty(&details.storage_type))
        .set_iops(non_zero(details.iops)?)
        .set_vpc_security_group_ids(non_empty_list(&details.vpc_security_group_ids))
        .copy_tags_to_snapshot(details.copy_tags_to_snapshot)
        .set_tags(tags(&details.tags));

    if member {
        return Ok(request);
    }

    Ok(request
        .multi_az(details.multi_az)
        .storage_encrypted(details.storage_encrypted))
}

/// returns the given request merged from the wanted details and the
/// currently described ones. The engine could not be changed, its version
/// could not be downgraded and the allocated storage never shrinks.
pub(crate) fn modify_request(
    request: ModifyDBInstanceFluentBuilder,
    id: &str,
    details: &DbInstanceDetails,
    current: &DbInstanceDetails,
    apply_immediately: bool,
) -> Result<ModifyDBInstanceFluentBuilder, Error> {
    if !details.engine.is_empty() && !details.engine.eq_ignore_ascii_case(&current.engine) {
        return Err(Error::EngineMigration(
            current.engine.to_owned(),
            details.engine.to_owned(),
        ));
    }

    let mut request = request
        .db_instance_identifier(id)
        .apply_immediately(apply_immediately)
        .auto_minor_version_upgrade(details.auto_minor_version_upgrade)
        .copy_tags_to_snapshot(details.copy_tags_to_snapshot)
        .publicly_accessible(details.publicly_accessible)
        .set_backup_retention_period(non_zero(details.backup_retention_period)?)
        .set_db_parameter_group_name(non_empty(&details.db_parameter_group_name))
        .set_db_security_groups(non_empty_list(&details.db_security_groups))
        .set_master_user_password(non_empty(&details.master_user_password))
        .set_option_group_name(non_empty(&details.option_group_name))
        .set_preferred_backup_window(non_empty(&details.preferred_backup_window))
        .set_preferred_maintenance_window(non_empty(&details.preferred_maintenance_window))
        .set_storage_type(non_empty(&details.storage_type))
        .set_iops(non_zero(details.iops)?)
        .set_vpc_security_group_ids(non_empty_list(&details.vpc_security_group_ids));

    if current.db_cluster_identifier.is_empty() {
        request = request.multi_az(details.multi_az);
    }

    if !details.db_instance_class.is_empty() && details.db_instance_class != current.db_instance_class
    {
        request = request.db_instance_class(&details.db_instance_class);
    }

    if !details.engine_version.is_empty() && details.engine_version != current.engine_version {
        if compare_versions(&details.engine_version, &current.engine_version) == Ordering::Less {
            return Err(Error::EngineDowngrade(
                current.engine_version.to_owned(),
                details.engine_version.to_owned(),
            ));
        }

        request = request
            .engine_version(&details.engine_version)
            .allow_major_version_upgrade(major_upgrade(
                &current.engine_version,
                &details.engine_version,
            ));
    }

    if details.allocated_storage > 0 {
        request = request.set_allocated_storage(non_zero(
            details.allocated_storage.max(current.allocated_storage),
        )?);
    }

    Ok(request)
}

fn components(version: &str) -> Vec<u64> {
    version
        .split('.')
        .map(|part| {
            part.chars()
                .take_while(char::is_ascii_digit)
                .collect::<String>()
                .parse()
                .unwrap_or(0)
        })
        .collect()
}

/// compares dotted engine versions component by component
pub(crate) fn compare_versions(left: &str, right: &str) -> Ordering {
    components(left).cmp(&components(right))
}

/// returns if going from one version to another crosses a major version, for
/// engines numbered below 10 (mysql 5.x, postgres 9.x) the major version
/// spans two components
pub(crate) fn major_upgrade(from: &str, to: &str) -> bool {
    let (from, to) = (components(from), components(to));
    let width = match from.first() {
        Some(major) if *major < 10 => 2,
        _ => 1,
    };

    from.iter().take(width).ne(to.iter().take(width))
}

fn details(instance: &RdsInstance) -> DbInstanceDetails {
    let endpoint = instance.endpoint();
    let pending_modifications = instance
        .pending_modified_values()
        .is_some_and(|pending| pending != &PendingModifiedValues::builder().build());

    DbInstanceDetails {
        identifier: instance.db_instance_identifier().unwrap_or_default().to_owned(),
        arn: instance.db_instance_arn().unwrap_or_default().to_owned(),
        status: instance.db_instance_status().unwrap_or_default().to_owned(),
        db_instance_class: instance.db_instance_class().unwrap_or_default().to_owned(),
        engine: instance.engine().unwrap_or_default().to_owned(),
        engine_version: instance.engine_version().unwrap_or_default().to_owned(),
        allocated_storage: instance.allocated_storage().unwrap_or_default().into(),
        auto_minor_version_upgrade: instance.auto_minor_version_upgrade().unwrap_or_default(),
        availability_zone: instance.availability_zone().unwrap_or_default().to_owned(),
        backup_retention_period: instance.backup_retention_period().unwrap_or_default().into(),
        character_set_name: instance.character_set_name().unwrap_or_default().to_owned(),
        db_cluster_identifier: instance.db_cluster_identifier().unwrap_or_default().to_owned(),
        db_name: instance.db_name().unwrap_or_default().to_owned(),
        db_parameter_group_name: instance
            .db_parameter_groups()
            .first()
            .and_then(|group| group.db_parameter_group_name())
            .unwrap_or_default()
            .to_owned(),
        db_security_groups: instance
            .db_security_groups()
            .iter()
            .filter_map(|group| group.db_security_group_name())
            .map(ToOwned::to_owned)
            .collect(),
        db_subnet_group_name: instance
            .db_subnet_group()
            .and_then(|group| group.db_subnet_group_name())
            .unwrap_or_default()
            .to_owned(),
        license_model: instance.license_model().unwrap_or_default().to_owned(),
        master_username: instance.master_username().unwrap_or_default().to_owned(),
        master_user_password: String::new(),
        multi_az: instance.multi_az().unwrap_or_default(),
        option_group_name: instance
            .option_group_memberships()
            .first()
            .and_then(|group| group.option_group_name())
            .unwrap_or_default()
            .to_owned(),
        port: endpoint
            .and_then(|endpoint| endpoint.port())
            .unwrap_or_default()
            .into(),
        address: endpoint
            .and_then(|endpoint| endpoint.address())
            .unwrap_or_default()
            .to_owned(),
        preferred_backup_window: instance.preferred_backup_window().unwrap_or_default().to_owned(),
        preferred_maintenance_window: instance
            .preferred_maintenance_window()
            .unwrap_or_default()
            .to_owned(),
        publicly_accessible: instance.publicly_accessible().unwrap_or_default(),
        storage_encrypted: instance.storage_encrypted().unwrap_or_default(),
        kms_key_id: instance.kms_key_id().unwrap_or_default().to_owned(),
        storage_type: instance.storage_type().unwrap_or_default().to_owned(),
        iops: instance.iops().unwrap_or_default().into(),
        vpc_security_group_ids: instance
            .vpc_security_groups()
            .iter()
            .filter_map(|group| group.vpc_security_group_id())
            .map(ToOwned::to_owned)
            .collect(),
        copy_tags_to_snapshot: instance.copy_tags_to_snapshot().unwrap_or_default(),
        pending_modifications,
        tags: instance
            .tag_list()
            .iter()
            .filter_map(|tag| Some((tag.key()?.to_owned(), tag.value().unwrap_or_default().to_owned())))
            .collect(),
    }
}
