//! # Parameters module
//!
//! This module provide the user parameters accepted by the broker operations

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::svc::broker::Error;

// -----------------------------------------------------------------------------
// Constants

/// database names accepted from users, they are embedded in sql statements
pub const DB_NAME_PATTERN: &str = r"^[A-Za-z][A-Za-z0-9_]{0,62}$";

static DB_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(DB_NAME_PATTERN).expect("valid regex"));

// -----------------------------------------------------------------------------
// ProvisionParameters structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
#[serde(default)]
pub struct ProvisionParameters {
    #[serde(rename = "backup_retention_period")]
    pub backup_retention_period: i64,
    #[serde(rename = "character_set_name")]
    pub character_set_name: String,
    #[serde(rename = "dbname")]
    pub db_name: String,
    #[serde(rename = "preferred_backup_window")]
    pub preferred_backup_window: String,
    #[serde(rename = "preferred_maintenance_window")]
    pub preferred_maintenance_window: String,
}

impl ProvisionParameters {
    pub fn validate(self) -> Result<Self, Error> {
        validate_db_name(&self.db_name)?;
        Ok(self)
    }
}

// -----------------------------------------------------------------------------
// UpdateParameters structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
#[serde(default)]
pub struct UpdateParameters {
    #[serde(rename = "apply_immediately")]
    pub apply_immediately: bool,
    #[serde(rename = "backup_retention_period")]
    pub backup_retention_period: i64,
    #[serde(rename = "preferred_backup_window")]
    pub preferred_backup_window: String,
    #[serde(rename = "preferred_maintenance_window")]
    pub preferred_maintenance_window: String,
}

// -----------------------------------------------------------------------------
// BindParameters structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
#[serde(default)]
pub struct BindParameters {
    #[serde(rename = "dbname")]
    pub db_name: String,
}

impl BindParameters {
    pub fn validate(self) -> Result<Self, Error> {
        validate_db_name(&self.db_name)?;
        Ok(self)
    }
}

// -----------------------------------------------------------------------------
// helpers

/// an empty name means the default database is used
pub fn validate_db_name(db_name: &str) -> Result<(), Error> {
    if db_name.is_empty() || DB_NAME.is_match(db_name) {
        return Ok(());
    }

    Err(Error::InvalidDbName(db_name.to_owned()))
}

/// decodes the raw parameters of a request, missing parameters and parameters
/// ignored by configuration both yield the default value
pub fn decode<T>(parameters: Option<&serde_json::Value>, allowed: bool) -> Result<T, Error>
where
    T: for<'de> Deserialize<'de> + Default,
{
    match parameters {
        Some(value) if allowed && !value.is_null() => {
            serde_json::from_value(value.to_owned()).map_err(Error::Parameters)
        }
        _ => Ok(T::default()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn provision_parameters_are_decoded() {
        let value = json!({"backup_retention_period": 7, "dbname": "orders"});
        let params: ProvisionParameters =
            decode(Some(&value), true).expect("parameters to be decoded");

        assert_eq!(params.backup_retention_period, 7);
        assert_eq!(params.db_name, "orders");
        assert!(params.character_set_name.is_empty());
    }

    #[test]
    fn disallowed_parameters_are_ignored() {
        let value = json!({"apply_immediately": true});
        let params: UpdateParameters =
            decode(Some(&value), false).expect("parameters to be ignored");

        assert_eq!(params, UpdateParameters::default());
    }

    #[test]
    fn malformed_parameters_are_rejected() {
        let value = json!({"dbname": 42});
        let result: Result<BindParameters, _> = decode(Some(&value), true);

        assert!(matches!(result, Err(Error::Parameters(_))));
    }

    #[test]
    fn db_names_are_restricted() {
        assert!(validate_db_name("").is_ok());
        assert!(validate_db_name("orders").is_ok());
        assert!(validate_db_name("Orders_2024").is_ok());
        assert!(validate_db_name(&format!("a{}", "b".repeat(62))).is_ok());

        for db_name in [
            "orders\"; DROP DATABASE \"cf_instance_1",
            "orders`; DROP DATABASE `cf_instance_1",
            "2024_orders",
            "_orders",
            "orders-eu",
            "orders db",
            format!("a{}", "b".repeat(63)).as_str(),
        ] {
            assert!(
                matches!(validate_db_name(db_name), Err(Error::InvalidDbName(_))),
                "'{db_name}' should be rejected"
            );
        }
    }

    #[test]
    fn bind_parameters_reject_injected_db_names() {
        let value = json!({"dbname": "orders\"; DROP DATABASE \"cf_instance_1"});
        let result = decode::<BindParameters>(Some(&value), true).and_then(BindParameters::validate);

        assert!(matches!(result, Err(Error::InvalidDbName(_))));
    }

    #[test]
    fn absent_parameters_are_defaulted() {
        let params: BindParameters = decode(None, true).expect("default parameters");
        assert!(params.db_name.is_empty());
    }
}
