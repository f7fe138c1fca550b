//! # MySql module
//!
//! This module provide the mysql flavoured sql engine, it also serves
//! mariadb and aurora mysql compatible clusters.

use async_trait::async_trait;
use sqlx::{
    mysql::{MySqlConnectOptions, MySqlConnection},
    ConnectOptions, Connection,
};
use tracing::{debug, warn};

use crate::svc::sql::{self, quote_identifier, quote_literal, Error, Privileges, SqlEngine};

// -----------------------------------------------------------------------------
// MySqlEngine structure

#[derive(Debug, Default)]
pub struct MySqlEngine {
    connection: Option<MySqlConnection>,
}

impl MySqlEngine {
    fn connection(&mut self) -> Result<&mut MySqlConnection, Error> {
        self.connection.as_mut().ok_or(Error::NotOpened)
    }

    async fn execute(&mut self, statement: &str) -> Result<(), Error> {
        let connection = self.connection()?;

        debug!(dialect = "mysql", "Execute statement on database server");
        sqlx::Executor::execute(&mut *connection, sqlx::raw_sql(statement))
            .await
            .map_err(Error::Execute)?;

        Ok(())
    }
}

#[async_trait]
impl SqlEngine for MySqlEngine {
    #[tracing::instrument(skip(self, password))]
    async fn open(
        &mut self,
        address: &str,
        port: i64,
        db_name: &str,
        username: &str,
        password: &str,
    ) -> Result<(), Error> {
        let options = MySqlConnectOptions::new()
            .host(address)
            .port(sql::port(port)?)
            .database(db_name)
            .username(username)
            .password(password);

        debug!(address = address, port = port, "Open connection to mysql server");
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
                warn!(error = err.to_string(), "Could not close connection to mysql server");
            }
        }
    }

    async fn exists_db(&mut self, db_name: &str) -> Result<bool, Error> {
        let connection = self.connection()?;
        let row: Option<String> = sqlx::query_scalar(
            "SELECT CAST(SCHEMA_NAME AS CHAR) FROM INFORMATION_SCHEMA.SCHEMATA WHERE SCHEMA_NAME = ?",
        )
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
        self.execute(&drop_db(db_name)).await
    }

    async fn create_user(&mut self, username: &str, password: &str) -> Result<(), Error> {
        self.execute(&create_user(username, password)).await
    }

    async fn drop_user(&mut self, username: &str) -> Result<(), Error> {
        self.execute(&drop_user(username)).await
    }

    async fn privileges(&mut self) -> Result<Privileges, Error> {
        let connection = self.connection()?;
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT CAST(db AS CHAR), CAST(user AS CHAR) FROM mysql.db")
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
        format!("mysql://{username}:{password}@{address}:{port}/{db_name}?reconnect=true")
    }

    fn jdbc_uri(
        &self,
        address: &str,
        port: i64,
        db_name: &str,
        username: &str,
        password: &str,
    ) -> String {
        format!("jdbc:mysql://{address}:{port}/{db_name}?user={username}&password={password}")
    }
}

// -----------------------------------------------------------------------------
// statements

fn database(db_name: &str) -> String {
    quote_identifier(db_name, '`')
}

/// backslashes escape characters in mysql string literals
fn literal(value: &str) -> String {
    quote_literal(&value.replace('\\', "\\\\"))
}

fn account(username: &str) -> String {
    format!("{}@'%'", literal(username))
}

fn create_db(db_name: &str) -> String {
    format!("CREATE DATABASE IF NOT EXISTS {}", database(db_name))
}

fn drop_db(db_name: &str) -> String {
    format!("DROP DATABASE IF EXISTS {}", database(db_name))
}

fn create_user(username: &str, password: &str) -> String {
    format!(
        "CREATE USER {} IDENTIFIED BY {}",
        account(username),
        literal(password)
    )
}

fn drop_user(username: &str) -> String {
    format!("DROP USER {}", account(username))
}

fn grant_privileges(db_name: &str, username: &str) -> String {
    format!(
        "GRANT ALL PRIVILEGES ON {}.* TO {}",
        database(db_name),
        account(username)
    )
}

fn revoke_privileges(db_name: &str, username: &str) -> String {
    format!(
        "REVOKE ALL PRIVILEGES ON {}.* FROM {}",
        database(db_name),
        account(username)
    )
}
