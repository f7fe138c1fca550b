//! # Rds broker module
//!
//! This module provide the service broker backed by amazon rds. It combines
//! the catalog, the rds clients and the sql engines; nothing is stored
//! between two calls, everything is derived or described again.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::svc::{
    broker::{
        ident,
        params::{self, BindParameters, ProvisionParameters, UpdateParameters},
        BindDetails, Binding, Credentials, DeprovisionDetails, DeprovisionServiceSpec, Error,
        LastOperation, LastOperationState, PollDetails, ProvisionDetails, ProvisionedServiceSpec,
        ServiceBroker, UnbindDetails, UpdateDetails, UpdateServiceSpec,
    },
    catalog::{RdsProperties, Service, ServicePlan},
    cfg,
    rds::{DbCluster, DbClusterDetails, DbInstance, DbInstanceDetails},
    sql::{SqlEngine, SqlProvider},
};

// -----------------------------------------------------------------------------
// Constants

pub const TAG_OWNER: &str = "Owner";
pub const TAG_OWNER_VALUE: &str = "Cloud Foundry";
pub const TAG_BY_VALUE: &str = "AWS RDS Service Broker";
pub const TAG_TIME_FORMAT: &str = "%d %b %y %H:%M %z";

pub const ACTION_CREATED: &str = "Created";
pub const ACTION_UPDATED: &str = "Updated";

pub const IN_PROGRESS_STATUSES: [&str; 11] = [
    "backing-up",
    "configuring-enhanced-monitoring",
    "creating",
    "deleting",
    "maintenance",
    "modifying",
    "rebooting",
    "renaming",
    "resetting-master-credentials",
    "storage-optimization",
    "upgrading",
];

// -----------------------------------------------------------------------------
// Endpoint structure

/// connection information of the master session of an instance or cluster
#[derive(PartialEq, Eq, Clone, Debug)]
struct Endpoint {
    address: String,
    port: i64,
    db_name: String,
    master_username: String,
}

impl From<DbInstanceDetails> for Endpoint {
    fn from(details: DbInstanceDetails) -> Self {
        Self {
            address: details.address,
            port: details.port,
            db_name: details.db_name,
            master_username: details.master_username,
        }
    }
}

impl From<DbClusterDetails> for Endpoint {
    fn from(details: DbClusterDetails) -> Self {
        Self {
            address: details.endpoint,
            port: details.port,
            db_name: details.database_name,
            master_username: details.master_username,
        }
    }
}

// -----------------------------------------------------------------------------
// RdsBroker structure

#[derive(Clone, Debug)]
pub struct RdsBroker {
    config: Arc<cfg::Rds>,
    instances: Arc<dyn DbInstance>,
    clusters: Arc<dyn DbCluster>,
    sql: Arc<dyn SqlProvider>,
}

impl RdsBroker {
    pub fn new(
        config: Arc<cfg::Rds>,
        instances: Arc<dyn DbInstance>,
        clusters: Arc<dyn DbCluster>,
        sql: Arc<dyn SqlProvider>,
    ) -> Self {
        Self {
            config,
            instances,
            clusters,
            sql,
        }
    }

    fn service(&self, id: &str) -> Result<&Service, Error> {
        self.config
            .catalog
            .find_service(id)
            .ok_or_else(|| Error::ServiceNotFound(id.to_owned()))
    }

    fn plan(&self, id: &str) -> Result<&ServicePlan, Error> {
        self.config
            .catalog
            .find_service_plan(id)
            .ok_or_else(|| Error::ServicePlanNotFound(id.to_owned()))
    }

    fn identifier(&self, instance_id: &str) -> String {
        ident::db_identifier(&self.config.db_prefix, instance_id)
    }

    fn master_password(&self, instance_id: &str) -> String {
        ident::master_password(self.config.master_password_seed.as_deref(), instance_id)
    }

    /// describes the resource holding the databases of the instance
    async fn endpoint(&self, id: &str, properties: &RdsProperties) -> Result<Endpoint, Error> {
        if properties.clustered() {
            return Ok(self.clusters.describe(id).await?.into());
        }

        Ok(self.instances.describe(id).await?.into())
    }

    /// opens a master session on the instance, runs the given statements and
    /// closes the session whatever the outcome is
    async fn with_master_session<T, F>(
        &self,
        instance_id: &str,
        properties: &RdsProperties,
        f: F,
    ) -> Result<T, Error>
    where
        F: for<'a> FnOnce(
                &'a mut dyn SqlEngine,
                &'a Endpoint,
            ) -> futures::future::BoxFuture<'a, Result<T, Error>>
            + Send,
        T: Send,
    {
        let id = self.identifier(instance_id);
        let endpoint = self.endpoint(&id, properties).await?;
        let mut engine = self.sql.engine(&properties.engine)?;

        engine
            .open(
                &endpoint.address,
                endpoint.port,
                &endpoint.db_name,
                &endpoint.master_username,
                &self.master_password(instance_id),
            )
            .await?;

        let result = f(engine.as_mut(), &endpoint).await;
        engine.close().await;
        result
    }
}

#[async_trait]
impl ServiceBroker for RdsBroker {
    fn services(&self) -> Vec<Service> {
        self.config.catalog.services.to_owned()
    }

    #[tracing::instrument(skip(self, details))]
    async fn provision(
        &self,
        instance_id: &str,
        details: ProvisionDetails,
        accepts_incomplete: bool,
    ) -> Result<ProvisionedServiceSpec, Error> {
        if !accepts_incomplete {
            return Err(Error::AsyncRequired);
        }

        let parameters: ProvisionParameters = params::decode(
            details.parameters.as_ref(),
            self.config.allow_user_provision_parameters,
        )
        .and_then(ProvisionParameters::validate)?;

        self.service(&details.service_id)?;
        let properties = &self.plan(&details.plan_id)?.rds_properties;
        let id = self.identifier(instance_id);
        let tags = tags(
            ACTION_CREATED,
            Utc::now(),
            &details.service_id,
            &details.plan_id,
            &details.organization_guid,
            &details.space_guid,
        );

        let db_name = pick(
            &parameters.db_name,
            &ident::db_name(&self.config.db_prefix, instance_id),
        );

        if !properties.clustered() {
            let mut instance = instance_details(properties, tags);
            instance.master_username = ident::master_username();
            instance.master_user_password = self.master_password(instance_id);
            instance.db_name = db_name;
            instance.backup_retention_period = pick_number(
                parameters.backup_retention_period,
                instance.backup_retention_period,
            );
            instance.character_set_name =
                pick(&parameters.character_set_name, &instance.character_set_name);
            instance.preferred_backup_window = pick(
                &parameters.preferred_backup_window,
                &instance.preferred_backup_window,
            );
            instance.preferred_maintenance_window = pick(
                &parameters.preferred_maintenance_window,
                &instance.preferred_maintenance_window,
            );

            info!(id = &id, engine = &properties.engine, "Provision rds instance");
            self.instances.create(&id, instance).await?;

            return Ok(ProvisionedServiceSpec {
                is_async: true,
                ..Default::default()
            });
        }

        let mut cluster = cluster_details(properties, tags.to_owned());
        cluster.master_username = ident::master_username();
        cluster.master_user_password = self.master_password(instance_id);
        cluster.database_name = db_name;
        cluster.backup_retention_period = pick_number(
            parameters.backup_retention_period,
            cluster.backup_retention_period,
        );
        cluster.character_set_name =
            pick(&parameters.character_set_name, &cluster.character_set_name);
        cluster.preferred_backup_window = pick(
            &parameters.preferred_backup_window,
            &cluster.preferred_backup_window,
        );
        cluster.preferred_maintenance_window = pick(
            &parameters.preferred_maintenance_window,
            &cluster.preferred_maintenance_window,
        );

        info!(id = &id, engine = &properties.engine, "Provision rds cluster");
        self.clusters.create(&id, cluster).await?;

        let member = member_details(&id, properties, tags);
        if let Err(err) = self.instances.create(&id, member).await {
            warn!(
                id = &id,
                error = err.to_string(),
                "Could not create the cluster member, delete the cluster"
            );

            if let Err(err) = self.clusters.delete(&id, true).await {
                warn!(id = &id, error = err.to_string(), "Could not delete rds cluster");
            }

            return Err(err.into());
        }

        Ok(ProvisionedServiceSpec {
            is_async: true,
            ..Default::default()
        })
    }

    #[tracing::instrument(skip(self, details))]
    async fn update(
        &self,
        instance_id: &str,
        details: UpdateDetails,
        accepts_incomplete: bool,
    ) -> Result<UpdateServiceSpec, Error> {
        if !accepts_incomplete {
            return Err(Error::AsyncRequired);
        }

        let parameters: UpdateParameters = params::decode(
            details.parameters.as_ref(),
            self.config.allow_user_update_parameters,
        )?;

        if !self.service(&details.service_id)?.plan_updateable {
            return Err(Error::PlanChangeNotSupported);
        }

        let plan_id = details.plan_id().unwrap_or_default();
        let properties = &self.plan(plan_id)?.rds_properties;
        let id = self.identifier(instance_id);
        let previous = details.previous_values.to_owned().unwrap_or_default();
        let tags = tags(
            ACTION_UPDATED,
            Utc::now(),
            &details.service_id,
            plan_id,
            &previous.organization_id,
            &previous.space_id,
        );

        if properties.clustered() {
            let mut cluster = cluster_details(properties, tags.to_owned());
            cluster.backup_retention_period = pick_number(
                parameters.backup_retention_period,
                cluster.backup_retention_period,
            );
            cluster.preferred_backup_window = pick(
                &parameters.preferred_backup_window,
                &cluster.preferred_backup_window,
            );
            cluster.preferred_maintenance_window = pick(
                &parameters.preferred_maintenance_window,
                &cluster.preferred_maintenance_window,
            );

            info!(id = &id, "Update rds cluster");
            self.clusters
                .modify(&id, cluster, parameters.apply_immediately)
                .await?;

            info!(id = &id, "Update rds cluster member");
            self.instances
                .modify(
                    &id,
                    member_details(&id, properties, tags),
                    parameters.apply_immediately,
                )
                .await?;

            return Ok(UpdateServiceSpec { is_async: true });
        }

        let mut instance = instance_details(properties, tags);
        instance.backup_retention_period = pick_number(
            parameters.backup_retention_period,
            instance.backup_retention_period,
        );
        instance.preferred_backup_window = pick(
            &parameters.preferred_backup_window,
            &instance.preferred_backup_window,
        );
        instance.preferred_maintenance_window = pick(
            &parameters.preferred_maintenance_window,
            &instance.preferred_maintenance_window,
        );

        info!(id = &id, "Update rds instance");
        self.instances
            .modify(&id, instance, parameters.apply_immediately)
            .await?;

        Ok(UpdateServiceSpec { is_async: true })
    }

    #[tracing::instrument(skip(self, details))]
    async fn deprovision(
        &self,
        instance_id: &str,
        details: DeprovisionDetails,
        accepts_incomplete: bool,
    ) -> Result<DeprovisionServiceSpec, Error> {
        if !accepts_incomplete {
            return Err(Error::AsyncRequired);
        }

        let properties = &self.plan(&details.plan_id)?.rds_properties;
        let id = self.identifier(instance_id);
        let clustered = properties.clustered();

        // snapshots of cluster members are taken by the cluster
        info!(id = &id, "Deprovision rds instance");
        self.instances
            .delete(&id, clustered || properties.skip_final_snapshot)
            .await?;

        if clustered {
            info!(id = &id, "Deprovision rds cluster");
            if let Err(err) = self.clusters.delete(&id, properties.skip_final_snapshot).await {
                warn!(id = &id, error = err.to_string(), "Could not delete rds cluster");
            }
        }

        Ok(DeprovisionServiceSpec { is_async: true })
    }

    #[tracing::instrument(skip(self, details))]
    async fn bind(
        &self,
        instance_id: &str,
        binding_id: &str,
        details: BindDetails,
    ) -> Result<Binding, Error> {
        if !self.service(&details.service_id)?.bindable {
            return Err(Error::InstanceNotBindable);
        }

        let properties = &self.plan(&details.plan_id)?.rds_properties;
        let parameters: BindParameters = params::decode(
            details.parameters.as_ref(),
            self.config.allow_user_bind_parameters,
        )
        .and_then(BindParameters::validate)?;

        let username = ident::binding_username(binding_id);
        let password = ident::binding_password();

        self.with_master_session(instance_id, properties, |engine, endpoint| {
            Box::pin(async move {
                let create_db = !parameters.db_name.is_empty();
                let db_name = pick(&parameters.db_name, &endpoint.db_name);

                let privileges = engine.privileges().await?;
                if privileges.values().flatten().any(|user| user == &username) {
                    return Err(Error::BindingAlreadyExists);
                }

                if create_db {
                    debug!(db_name = &db_name, "Create database of the binding");
                    engine.create_db(&db_name).await?;
                }

                info!(username = &username, db_name = &db_name, "Create user of the binding");
                engine.create_user(&username, &password).await?;
                engine.grant_privileges(&db_name, &username).await?;

                let address = &endpoint.address;
                let port = endpoint.port;

                Ok(Binding {
                    credentials: Credentials {
                        uri: engine.uri(address, port, &db_name, &username, &password),
                        jdbc_uri: engine.jdbc_uri(address, port, &db_name, &username, &password),
                        host: address.to_owned(),
                        port,
                        name: db_name,
                        username,
                        password,
                    },
                })
            })
        })
        .await
    }

    #[tracing::instrument(skip(self, details))]
    async fn unbind(
        &self,
        instance_id: &str,
        binding_id: &str,
        details: UnbindDetails,
    ) -> Result<(), Error> {
        let properties = &self.plan(&details.plan_id)?.rds_properties;
        let username = ident::binding_username(binding_id);

        self.with_master_session(instance_id, properties, |engine, endpoint| {
            Box::pin(async move {
                let privileges = engine.privileges().await?;
                let granted: Vec<_> = privileges
                    .iter()
                    .filter(|(_, users)| users.contains(&username))
                    .collect();

                if granted.is_empty() {
                    return Err(Error::BindingDoesNotExist);
                }

                for (db_name, users) in granted {
                    info!(username = &username, db_name = db_name, "Revoke privileges of the binding");
                    engine.revoke_privileges(db_name, &username).await?;

                    if users.len() == 1 && db_name != &endpoint.db_name {
                        info!(db_name = db_name, "Drop database of the binding");
                        engine.drop_db(db_name).await?;
                    }
                }

                engine.drop_user(&username).await?;
                Ok(())
            })
        })
        .await
    }

    #[tracing::instrument(skip(self, _details))]
    async fn last_operation(
        &self,
        instance_id: &str,
        _details: PollDetails,
    ) -> Result<LastOperation, Error> {
        let id = self.identifier(instance_id);
        let instance = self.instances.describe(&id).await?;

        let mut state = state(&instance.status);
        if state == LastOperationState::Succeeded && instance.pending_modifications {
            state = LastOperationState::InProgress;
        }

        debug!(id = &id, status = &instance.status, state = state.to_string(), "Poll rds instance");
        Ok(LastOperation {
            state,
            description: format!("DB Instance '{}' status is '{}'", id, instance.status),
        })
    }
}

// -----------------------------------------------------------------------------
// helpers

/// returns the operation state of the given rds status
pub fn state(status: &str) -> LastOperationState {
    match status {
        "available" => LastOperationState::Succeeded,
        status if IN_PROGRESS_STATUSES.contains(&status) => LastOperationState::InProgress,
        _ => LastOperationState::Failed,
    }
}

/// returns the tags set on resources on the given action
pub fn tags(
    action: &str,
    now: DateTime<Utc>,
    service_id: &str,
    plan_id: &str,
    organization_id: &str,
    space_id: &str,
) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::from([
        (TAG_OWNER.to_string(), TAG_OWNER_VALUE.to_string()),
        (format!("{action} by"), TAG_BY_VALUE.to_string()),
        (format!("{action} at"), now.format(TAG_TIME_FORMAT).to_string()),
    ]);

    for (key, value) in [
        ("Service ID", service_id),
        ("Plan ID", plan_id),
        ("Organization ID", organization_id),
        ("Space ID", space_id),
    ] {
        if !value.is_empty() {
            tags.insert(key.to_string(), value.to_string());
        }
    }

    tags
}

fn pick(wanted: &str, fallback: &str) -> String {
    if wanted.is_empty() {
        return fallback.to_owned();
    }

    wanted.to_owned()
}

fn pick_number(wanted: i64, fallback: i64) -> i64 {
    if wanted > 0 {
        return wanted;
    }

    fallback
}

fn instance_details(properties: &RdsProperties, tags: BTreeMap<String, String>) -> DbInstanceDetails {
    DbInstanceDetails {
        db_instance_class: properties.db_instance_class.to_owned(),
        engine: properties.engine.to_owned(),
        engine_version: properties.engine_version.to_owned(),
        allocated_storage: properties.allocated_storage,
        auto_minor_version_upgrade: properties.auto_minor_version_upgrade,
        availability_zone: properties.availability_zone.to_owned(),
        backup_retention_period: properties.backup_retention_period,
        character_set_name: properties.character_set_name.to_owned(),
        db_parameter_group_name: properties.db_parameter_group_name.to_owned(),
        db_security_groups: properties.db_security_groups.to_owned(),
        db_subnet_group_name: properties.db_subnet_group_name.to_owned(),
        license_model: properties.license_model.to_owned(),
        multi_az: properties.multi_az,
        option_group_name: properties.option_group_name.to_owned(),
        port: properties.port,
        preferred_backup_window: properties.preferred_backup_window.to_owned(),
        preferred_maintenance_window: properties.preferred_maintenance_window.to_owned(),
        publicly_accessible: properties.publicly_accessible,
        storage_encrypted: properties.storage_encrypted,
        kms_key_id: properties.kms_key_id.to_owned(),
        storage_type: properties.storage_type.to_owned(),
        iops: properties.iops,
        vpc_security_group_ids: properties.vpc_security_group_ids.to_owned(),
        copy_tags_to_snapshot: properties.copy_tags_to_snapshot,
        tags,
        ..Default::default()
    }
}

/// returns the instance attached to the cluster, storage, credentials and
/// network are owned by the cluster
fn member_details(
    cluster_id: &str,
    properties: &RdsProperties,
    tags: BTreeMap<String, String>,
) -> DbInstanceDetails {
    DbInstanceDetails {
        db_cluster_identifier: cluster_id.to_owned(),
        db_instance_class: properties.db_instance_class.to_owned(),
        engine: properties.engine.to_owned(),
        auto_minor_version_upgrade: properties.auto_minor_version_upgrade,
        availability_zone: properties.availability_zone.to_owned(),
        db_parameter_group_name: properties.db_parameter_group_name.to_owned(),
        db_subnet_group_name: properties.db_subnet_group_name.to_owned(),
        license_model: properties.license_model.to_owned(),
        option_group_name: properties.option_group_name.to_owned(),
        preferred_maintenance_window: properties.preferred_maintenance_window.to_owned(),
        publicly_accessible: properties.publicly_accessible,
        copy_tags_to_snapshot: properties.copy_tags_to_snapshot,
        tags,
        ..Default::default()
    }
}

fn cluster_details(properties: &RdsProperties, tags: BTreeMap<String, String>) -> DbClusterDetails {
    let availability_zones = if properties.availability_zone.is_empty() {
        vec![]
    } else {
        vec![properties.availability_zone.to_owned()]
    };

    DbClusterDetails {
        engine: properties.engine.to_owned(),
        engine_version: properties.engine_version.to_owned(),
        availability_zones,
        backup_retention_period: properties.backup_retention_period,
        character_set_name: properties.character_set_name.to_owned(),
        db_cluster_parameter_group_name: properties.db_cluster_parameter_group_name.to_owned(),
        db_subnet_group_name: properties.db_subnet_group_name.to_owned(),
        option_group_name: properties.option_group_name.to_owned(),
        port: properties.port,
        preferred_backup_window: properties.preferred_backup_window.to_owned(),
        preferred_maintenance_window: properties.preferred_maintenance_window.to_owned(),
        storage_encrypted: properties.storage_encrypted,
        kms_key_id: properties.kms_key_id.to_owned(),
        vpc_security_group_ids: properties.vpc_security_group_ids.to_owned(),
        tags,
        ..Default::default()
    }
}
