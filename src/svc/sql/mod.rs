//! # Sql module
//!
//! This module provide sql engines used to manage databases, users and
//! grants on a provisioned database server.
//!
//! Statements are built by concatenating identifiers and literals, both are
//! escaped using [`quote_identifier`] and [`quote_literal`].

use std::{collections::BTreeMap, fmt::Debug};

use async_trait::async_trait;

pub mod mysql;
pub mod postgres;

// -----------------------------------------------------------------------------
// Types

/// database name to the users having privileges on it
pub type Privileges = BTreeMap<String, Vec<String>>;

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("engine '{0}' is not supported")]
    UnsupportedEngine(String),
    #[error("connection to the database server is not opened")]
    NotOpened,
    #[error("port '{0}' is out of range")]
    InvalidPort(i64),
    #[error("failed to connect to '{0}:{1}', {2}")]
    Connect(String, i64, sqlx::Error),
    #[error("failed to execute statement, {0}")]
    Execute(sqlx::Error),
}

// -----------------------------------------------------------------------------
// helpers

/// wraps the identifier in the given quote character, occurrences of the
/// quote character are doubled
pub fn quote_identifier(identifier: &str, quote: char) -> String {
    let mut quoted = String::with_capacity(identifier.len() + 2);

    quoted.push(quote);
    for c in identifier.chars() {
        if c == quote {
            quoted.push(quote);
        }
        quoted.push(c);
    }
    quoted.push(quote);

    quoted
}

/// wraps the value in single quotes, single quotes are doubled
pub fn quote_literal(value: &str) -> String {
    quote_identifier(value, '\'')
}

pub fn port(port: i64) -> Result<u16, Error> {
    u16::try_from(port).map_err(|_| Error::InvalidPort(port))
}

// -----------------------------------------------------------------------------
// SqlEngine trait

#[async_trait]
pub trait SqlEngine: Send + Sync {
    async fn open(
        &mut self,
        address: &str,
        port: i64,
        db_name: &str,
        username: &str,
        password: &str,
    ) -> Result<(), Error>;

    /// closes the connection if any, errors are logged
    async fn close(&mut self);

    async fn exists_db(&mut self, db_name: &str) -> Result<bool, Error>;

    async fn create_db(&mut self, db_name: &str) -> Result<(), Error>;

    async fn drop_db(&mut self, db_name: &str) -> Result<(), Error>;

    async fn create_user(&mut self, username: &str, password: &str) -> Result<(), Error>;

    async fn drop_user(&mut self, username: &str) -> Result<(), Error>;

    async fn privileges(&mut self) -> Result<Privileges, Error>;

    async fn grant_privileges(&mut self, db_name: &str, username: &str) -> Result<(), Error>;

    async fn revoke_privileges(&mut self, db_name: &str, username: &str) -> Result<(), Error>;

    fn uri(&self, address: &str, port: i64, db_name: &str, username: &str, password: &str)
        -> String;

    fn jdbc_uri(
        &self,
        address: &str,
        port: i64,
        db_name: &str,
        username: &str,
        password: &str,
    ) -> String;
}

// -----------------------------------------------------------------------------
// SqlProvider trait

pub trait SqlProvider: Debug + Send + Sync {
    /// returns a new, not yet opened, engine for the given rds engine name
    fn engine(&self, engine: &str) -> Result<Box<dyn SqlEngine>, Error>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Provider;

impl SqlProvider for Provider {
    fn engine(&self, engine: &str) -> Result<Box<dyn SqlEngine>, Error> {
        match Dialect::try_from(engine)? {
            Dialect::MySql => Ok(Box::<mysql::MySqlEngine>::default()),
            Dialect::Postgres => Ok(Box::<postgres::PostgresEngine>::default()),
        }
    }
}

// -----------------------------------------------------------------------------
// Dialect enumeration

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Dialect {
    MySql,
    Postgres,
}

impl TryFrom<&str> for Dialect {
    type Error = Error;

    fn try_from(engine: &str) -> Result<Self, Self::Error> {
        match engine.to_lowercase().as_str() {
            "aurora" | "aurora-mysql" | "mariadb" | "mysql" => Ok(Self::MySql),
            "aurora-postgresql" | "postgres" | "postgresql" => Ok(Self::Postgres),
            _ => Err(Error::UnsupportedEngine(engine.to_owned())),
        }
    }
}
