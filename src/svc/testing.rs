//! # Testing module
//!
//! This module provide in-memory implementations of the rds and sql traits
//! which record the calls they receive.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::svc::{
    rds::{self, DbCluster, DbClusterDetails, DbInstance, DbInstanceDetails},
    sql::{self, Privileges, SqlEngine, SqlProvider},
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().expect("lock not to be poisoned")
}

// -----------------------------------------------------------------------------
// FakeDbInstance structure

#[derive(Debug, Default)]
pub struct FakeDbInstance {
    pub calls: Mutex<Vec<String>>,
    pub current: Mutex<Option<DbInstanceDetails>>,
    pub created: Mutex<Vec<DbInstanceDetails>>,
    pub modified: Mutex<Vec<(DbInstanceDetails, bool)>>,
    pub deleted: Mutex<Vec<(String, bool)>>,
    pub create_error: Mutex<Option<rds::Error>>,
}

impl FakeDbInstance {
    pub fn with(current: DbInstanceDetails) -> Self {
        Self {
            current: Mutex::new(Some(current)),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    fn existing(&self) -> Result<DbInstanceDetails, rds::Error> {
        lock(&self.current).clone().ok_or(rds::Error::DoesNotExist)
    }
}

#[async_trait]
impl DbInstance for FakeDbInstance {
    async fn describe(&self, id: &str) -> Result<DbInstanceDetails, rds::Error> {
        lock(&self.calls).push(format!("describe {id}"));
        self.existing()
    }

    async fn create(&self, id: &str, details: DbInstanceDetails) -> Result<(), rds::Error> {
        lock(&self.calls).push(format!("create {id}"));
        if let Some(err) = lock(&self.create_error).take() {
            return Err(err);
        }

        lock(&self.created).push(details);
        Ok(())
    }

    async fn modify(
        &self,
        id: &str,
        details: DbInstanceDetails,
        apply_immediately: bool,
    ) -> Result<(), rds::Error> {
        lock(&self.calls).push(format!("modify {id}"));
        self.existing()?;
        lock(&self.modified).push((details, apply_immediately));
        Ok(())
    }

    async fn delete(&self, id: &str, skip_final_snapshot: bool) -> Result<(), rds::Error> {
        lock(&self.calls).push(format!("delete {id}"));
        self.existing()?;
        lock(&self.deleted).push((id.to_owned(), skip_final_snapshot));
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// FakeDbCluster structure

#[derive(Debug, Default)]
pub struct FakeDbCluster {
    pub calls: Mutex<Vec<String>>,
    pub current: Mutex<Option<DbClusterDetails>>,
    pub created: Mutex<Vec<DbClusterDetails>>,
    pub modified: Mutex<Vec<(DbClusterDetails, bool)>>,
    pub deleted: Mutex<Vec<(String, bool)>>,
    pub delete_error: Mutex<Option<rds::Error>>,
}

impl FakeDbCluster {
    pub fn with(current: DbClusterDetails) -> Self {
        Self {
            current: Mutex::new(Some(current)),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl DbCluster for FakeDbCluster {
    async fn describe(&self, id: &str) -> Result<DbClusterDetails, rds::Error> {
        lock(&self.calls).push(format!("describe {id}"));
        lock(&self.current).clone().ok_or(rds::Error::DoesNotExist)
    }

    async fn create(&self, id: &str, details: DbClusterDetails) -> Result<(), rds::Error> {
        lock(&self.calls).push(format!("create {id}"));
        lock(&self.created).push(details);
        Ok(())
    }

    async fn modify(
        &self,
        id: &str,
        details: DbClusterDetails,
        apply_immediately: bool,
    ) -> Result<(), rds::Error> {
        lock(&self.calls).push(format!("modify {id}"));
        if lock(&self.current).is_none() {
            return Err(rds::Error::DoesNotExist);
        }

        lock(&self.modified).push((details, apply_immediately));
        Ok(())
    }

    async fn delete(&self, id: &str, skip_final_snapshot: bool) -> Result<(), rds::Error> {
        lock(&self.calls).push(format!("delete {id}"));
        if let Some(err) = lock(&self.delete_error).take() {
            return Err(err);
        }

        lock(&self.deleted).push((id.to_owned(), skip_final_snapshot));
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// FakeSql structures

#[derive(Debug, Default)]
pub struct SqlState {
    pub opened: Vec<(String, i64, String, String, String)>,
    pub closed: usize,
    pub databases: Vec<String>,
    pub users: Vec<(String, String)>,
    pub privileges: Privileges,
    pub dropped_databases: Vec<String>,
    pub dropped_users: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct FakeSqlProvider {
    pub state: Arc<Mutex<SqlState>>,
}

impl FakeSqlProvider {
    pub fn state(&self) -> MutexGuard<'_, SqlState> {
        lock(&self.state)
    }
}

impl SqlProvider for FakeSqlProvider {
    fn engine(&self, engine: &str) -> Result<Box<dyn SqlEngine>, sql::Error> {
        sql::Dialect::try_from(engine)?;

        Ok(Box::new(FakeSqlEngine {
            state: self.state.clone(),
        }))
    }
}

#[derive(Debug)]
pub struct FakeSqlEngine {
    state: Arc<Mutex<SqlState>>,
}

#[async_trait]
impl SqlEngine for FakeSqlEngine {
    async fn open(
        &mut self,
        address: &str,
        port: i64,
        db_name: &str,
        username: &str,
        password: &str,
    ) -> Result<(), sql::Error> {
        lock(&self.state).opened.push((
            address.to_owned(),
            port,
            db_name.to_owned(),
            username.to_owned(),
            password.to_owned(),
        ));

        Ok(())
    }

    async fn close(&mut self) {
        lock(&self.state).closed += 1;
    }

    async fn exists_db(&mut self, db_name: &str) -> Result<bool, sql::Error> {
        Ok(lock(&self.state).databases.iter().any(|db| db == db_name))
    }

    async fn create_db(&mut self, db_name: &str) -> Result<(), sql::Error> {
        if !self.exists_db(db_name).await? {
            lock(&self.state).databases.push(db_name.to_owned());
        }

        Ok(())
    }

    async fn drop_db(&mut self, db_name: &str) -> Result<(), sql::Error> {
        let mut state = lock(&self.state);

        state.databases.retain(|db| db != db_name);
        state.dropped_databases.push(db_name.to_owned());
        Ok(())
    }

    async fn create_user(&mut self, username: &str, password: &str) -> Result<(), sql::Error> {
        lock(&self.state)
            .users
            .push((username.to_owned(), password.to_owned()));

        Ok(())
    }

    async fn drop_user(&mut self, username: &str) -> Result<(), sql::Error> {
        let mut state = lock(&self.state);

        state.users.retain(|(user, _)| user != username);
        state.dropped_users.push(username.to_owned());
        Ok(())
    }

    async fn privileges(&mut self) -> Result<Privileges, sql::Error> {
        Ok(lock(&self.state).privileges.clone())
    }

    async fn grant_privileges(&mut self, db_name: &str, username: &str) -> Result<(), sql::Error> {
        lock(&self.state)
            .privileges
            .entry(db_name.to_owned())
            .or_default()
            .push(username.to_owned());

        Ok(())
    }

    async fn revoke_privileges(&mut self, db_name: &str, username: &str) -> Result<(), sql::Error> {
        let mut state = lock(&self.state);

        if let Some(users) = state.privileges.get_mut(db_name) {
            users.retain(|user| user != username);
            if users.is_empty() {
                state.privileges.remove(db_name);
            }
        }

        Ok(())
    }

    fn uri(
        &self,
        address: &str,
        port: i64,
        db_name: &str,
        username: &str,
        password: &str,
    ) -> String {
        format!("fake://{username}:{password}@{address}:{port}/{db_name}")
    }

    fn jdbc_uri(
        &self,
        address: &str,
        port: i64,
        db_name: &str,
        username: &str,
        password: &str,
    ) -> String {
        format!("jdbc:fake://{address}:{port}/{db_name}?user={username}&password={password}")
    }
}
