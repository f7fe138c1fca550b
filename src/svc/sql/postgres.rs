//! # Postgres module
//!
//! This module provide the postgresql flavoured sql engine

use async_trait::async_trait;
use sqlx::{
    postgres::{PgConnectOptions, PgConnection},
    ConnectOptions, Connection,
};
use tracing::{debug, warn};

use crate::svc::sql::{self, quote_identifier, quote_literal, Error, Privileges, SqlEngine};

// -----------------------------------------------------------------------------
// PostgresEngine structure

#[derive(Debug, Default)]
pub struct PostgresEngine {
    connection: Option<PgConnection>,
}

impl PostgresEngine {
    fn connection(&mut self) -> Result<&mut PgConnection, Error> {
        self.connection.as_mut().ok_or(Error::NotOpened)
    }

    async fn execute(&mut self, statement: &str) -> Result<(), Error> {
        let connection = self.connection()?;

        debug!(dialect = "postgres", "Execute statement on database server");
        sqlx::Executor::execute(&mut *connection, sqlx::raw_sql(statement))
            .await
            .map_err(Error::Execute)?;

        Ok(())
    }
}

#[async_trait]
impl SqlEngine for PostgresEngine {
    #[tracing::instrument(skip(self, password))]
    async fn open(
        &mut self,
        address: &str,
        port: i64,
        db_name: &str,
        username: &str,
        password: &str,
    ) -> Result<(), Error> {
        let options = PgConnectOptions::new()
            .host(address)
            .port(sql::port(port)?)
            .database(db_name)
            .username(username)
            .password(password);

        debug!(address = address, port = port, "Open connection to postgresql server");
        let connection = options
            .connect()
            .await
            .map_err(|err| Error::Connect(address.to_owned(), port, err))?;

        self.connection = Some(connection);
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            if let Err(err) = connection.close().await {
                warn!(error = err.to_string(), "Could not close connection to postgresql server");
            }
        }
    }

    async fn exists_db(&mut self, db_name: &str) -> Result<bool, Error> {
        let connection = self.connection()?;
        let row: Option<String> =
            sqlx::query_scalar("SELECT datname::text FROM pg_database WHERE datname = $1")
                .bind(db_name)
                .fetch_optional(connection)
                .await
                .map_err(Error::Execute)?;

        Ok(row.is_some())
    }

    async fn create_db(&mut self, db_name: &str) -> Result<(), Error> {
        if self.exists_db(db_name).await? {
            debug!(db_name = db_name, "Database already exists, skip creation");
            return Ok(());
        }

        self.execute(&create_db(db_name)).await
    }

    async fn drop_db(&mut self, db_name: &str) -> Result<(), Error> {
        self.execute(&terminate_backends(db_name)).await?;
        self.execute(&drop_db(db_name)).await
    }

    async fn create_user(&mut self, username: &str, password: &str) -> Result<(), Error> {
        self.execute(&create_user(username, password)).await
    }

    /// Dropping a role which still owns objects fails in postgresql, the
    /// objects created by the binding outlive it so the role is kept.
    async fn drop_user(&mut self, username: &str) -> Result<(), Error> {
        debug!(username = username, "Keep postgresql role, it may still own objects");
        Ok(())
    }

    async fn privileges(&mut self) -> Result<Privileges, Error> {
        let connection = self.connection()?;
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT d.datname::text, u.usename::text FROM pg_database d, pg_user u \
             WHERE u.usecreatedb = false AND has_database_privilege(u.usename, d.datname, 'create')",
        )
        .fetch_all(connection)
        .await
        .map_err(Error::Execute)?;

        let mut privileges = Privileges::new();
        for (db_name, username) in rows {
            privileges.entry(db_name).or_default().push(username);
        }

        Ok(privileges)
    }

    async fn grant_privileges(&mut self, db_name: &str, username: &str) -> Result<(), Error> {
        self.execute(&grant_privileges(db_name, username)).await
    }

    async fn revoke_privileges(&mut self, db_name: &str, username: &str) -> Result<(), Error> {
        self.execute(&revoke_privileges(db_name, username)).await
    }

    fn uri(
        &self,
        address: &str,
        port: i64,
        db_name: &str,
        username: &str,
        password: &str,
    ) -> String {
        format!("postgres://{username}:{password}@{address}:{port}/{db_name}?reconnect=true")
    }

    fn jdbc_uri(
        &self,
        address: &str,
        port: i64,
        db_name: &str,
        username: &str,
        password: &str,
    ) -> String {
        format!("jdbc:postgresql://{address}:{port}/{db_name}?user={username}&password={password}")
    }
}

// -----------------------------------------------------------------------------
// statements

fn identifier(name: &str) -> String {
    quote_identifier(name, '"')
}

fn create_db(db_name: &str) -> String {
    format!("CREATE DATABASE {}", identifier(db_name))
}

fn terminate_backends(db_name: &str) -> String {
    format!(
        "SELECT pg_terminate_backend(pg_stat_activity.pid) FROM pg_stat_activity \
         WHERE pg_stat_activity.datname = {} AND pid <> pg_backend_pid()",
        quote_literal(db_name)
    )
}

fn drop_db(db_name: &str) -> String {
    format!("DROP DATABASE IF EXISTS {}", identifier(db_name))
}

fn create_user(username: &str, password: &str) -> String {
    format!(
        "CREATE USER {} WITH PASSWORD {}",
        identifier(username),
        quote_literal(password)
    )
}

fn grant_privileges(db_name: &str, username: &str) -> String {
    format!(
        "GRANT ALL PRIVILEGES ON DATABASE {} TO {}",
        identifier(db_name),
        identifier(username)
    )
}

fn revoke_privileges(db_name: &str, username: &str) -> String {
    format!(
        "REVOKE ALL PRIVILEGES ON DATABASE {} FROM {}",
        identifier(db_name),
        identifier(username)
    )
}
