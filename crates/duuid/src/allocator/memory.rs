//! In-process backends for tests and local runs.

use std::{collections::HashMap, sync::Arc};

use futures::{
    FutureExt,
    future::{BoxFuture, ready},
};
use parking_lot::Mutex;
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::allocator::{
    BackendError, Credentials, LeaseStoreSettings, RelationalSettings, SqlConnection,
    SqlConnector, VersionedStore,
};

#[derive(Debug, Default)]
struct Versioned {
    version: u64,
    value: Vec<u8>,
}

/// A [`VersionedStore`] held in memory. Versions start at 1 on the first
/// write, so the first allocation returns 0.
#[derive(Debug, Default)]
pub struct MemoryLeaseStore {
    keys: Mutex<HashMap<String, Versioned>>,
    credentials: Option<Credentials>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects writes that do not present these credentials.
    pub fn with_credentials(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            keys: Mutex::default(),
            credentials: Some(Credentials {
                username: username.into(),
                password: password.into(),
            }),
        }
    }

    /// Current version of `key`, `0` if never written.
    pub fn version(&self, key: &str) -> u64 {
        self.keys.lock().get(key).map_or(0, |v| v.version)
    }

    pub fn value(&self, key: &str) -> Option<Vec<u8>> {
        self.keys.lock().get(key).map(|v| v.value.clone())
    }

    fn write(
        &self,
        settings: &LeaseStoreSettings,
        key: &str,
        value: &[u8],
    ) -> Result<u64, BackendError> {
        let authorized = self
            .credentials
            .as_ref()
            .is_none_or(|expected| settings.credentials.as_ref() == Some(expected));
        if !authorized {
            return Err(BackendError::Unauthorized {
                username: settings
                    .credentials
                    .as_ref()
                    .map_or_else(|| "anonymous".to_owned(), |c| c.username.clone()),
            });
        }
        let mut keys = self.keys.lock();
        let entry = keys.entry(key.to_owned()).or_default();
        let previous = entry.version;
        entry.version += 1;
        entry.value = value.to_vec();
        Ok(previous)
    }
}

impl VersionedStore for MemoryLeaseStore {
    fn put<'a>(
        &'a self,
        settings: &'a LeaseStoreSettings,
        key: &'a str,
        value: &'a [u8],
    ) -> BoxFuture<'a, Result<u64, BackendError>> {
        ready(self.write(settings, key, value)).boxed()
    }
}

#[derive(Debug, Default)]
struct Database {
    tables: Mutex<HashMap<String, Vec<(i64, String)>>>,
    open: AtomicUsize,
    closed: AtomicUsize,
    fail_inserts: AtomicBool,
}

/// A [`SqlConnector`] backed by in-memory tables.
///
/// Understands exactly the statements issued by
/// [`RelationalAllocator`](crate::allocator::RelationalAllocator) and counts
/// connections so tests can assert none leak.
#[derive(Clone, Debug, Default)]
pub struct MemoryDatabase {
    db: Arc<Database>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows of `table` as `(id, node_name)`.
    pub fn rows(&self, table: &str) -> Vec<(i64, String)> {
        self.db.tables.lock().get(table).cloned().unwrap_or_default()
    }

    /// Connections handed out and not yet dropped.
    pub fn open_connections(&self) -> usize {
        self.db.open.load(Ordering::Acquire)
    }

    /// Connections released through [`SqlConnection::close`].
    pub fn closed_connections(&self) -> usize {
        self.db.closed.load(Ordering::Acquire)
    }

    /// Makes every subsequent insert fail.
    pub fn fail_inserts(&self, fail: bool) {
        self.db.fail_inserts.store(fail, Ordering::Release);
    }
}

impl SqlConnector for MemoryDatabase {
    fn connect<'a>(
        &'a self,
        _settings: &'a RelationalSettings,
    ) -> BoxFuture<'a, Result<Box<dyn SqlConnection>, BackendError>> {
        self.db.open.fetch_add(1, Ordering::AcqRel);
        let conn: Box<dyn SqlConnection> = Box::new(MemoryConnection {
            db: Arc::clone(&self.db),
        });
        ready(Ok(conn)).boxed()
    }
}

struct MemoryConnection {
    db: Arc<Database>,
}

impl MemoryConnection {
    fn run(&self, statement: &str) -> Result<(), BackendError> {
        let table = statement
            .strip_prefix("CREATE TABLE IF NOT EXISTS ")
            .and_then(|rest| rest.split_whitespace().next())
            .ok_or_else(|| unsupported(statement))?;
        self.db
            .tables
            .lock()
            .entry(table.to_owned())
            .or_default();
        Ok(())
    }

    fn insert(&self, statement: &str, params: &[&str]) -> Result<i64, BackendError> {
        if self.db.fail_inserts.load(Ordering::Acquire) {
            return Err(BackendError::Request {
                reason: "insert rejected".to_owned(),
            });
        }
        let table = statement
            .strip_prefix("INSERT INTO ")
            .and_then(|rest| rest.split_whitespace().next())
            .ok_or_else(|| unsupported(statement))?;
        let node_name = params.first().ok_or_else(|| BackendError::Request {
            reason: "missing bind parameter $1".to_owned(),
        })?;

        let mut tables = self.db.tables.lock();
        let rows = tables.get_mut(table).ok_or_else(|| BackendError::Request {
            reason: format!("relation `{table}` does not exist"),
        })?;
        let id = i64::try_from(rows.len()).map_or(i64::MAX, |n| n + 1);
        rows.push((id, (*node_name).to_owned()));
        Ok(id)
    }
}

fn unsupported(statement: &str) -> BackendError {
    BackendError::Request {
        reason: format!("unsupported statement: {statement}"),
    }
}

impl SqlConnection for MemoryConnection {
    fn execute<'a>(&'a mut self, statement: &'a str) -> BoxFuture<'a, Result<(), BackendError>> {
        ready(self.run(statement)).boxed()
    }

    fn insert_returning_key<'a>(
        &'a mut self,
        statement: &'a str,
        params: &'a [&'a str],
    ) -> BoxFuture<'a, Result<i64, BackendError>> {
        ready(self.insert(statement, params)).boxed()
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<(), BackendError>> {
        self.db.closed.fetch_add(1, Ordering::AcqRel);
        ready(Ok(())).boxed()
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.db.open.fetch_sub(1, Ordering::AcqRel);
    }
}
