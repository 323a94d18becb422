use core::fmt;
use std::sync::Arc;

use futures::{FutureExt, future::BoxFuture};

use crate::{
    allocator::{
        AllocatorBackend, BackendError, Credentials, IdentityInfo, WorkerIdAllocator,
        WorkerIdentity, bounded, finish, params,
    },
    error::Result,
    layout::IdLayout,
};

/// Table used unless overridden with [`params::TABLE`].
pub const DEFAULT_TABLE: &str = "duuid_worker_node";

/// Connection settings for the relational backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationalSettings {
    pub url: String,
    pub credentials: Option<Credentials>,
    pub table: String,
}

impl RelationalSettings {
    /// # Errors
    ///
    /// Returns [`BackendError::Settings`] if the URL is missing or the table
    /// name is not a plain SQL identifier.
    pub fn from_identity(info: &IdentityInfo) -> Result<Self, BackendError> {
        let table = info.param(params::TABLE).unwrap_or(DEFAULT_TABLE);
        if !is_identifier(table) {
            return Err(BackendError::Settings {
                reason: format!("`{table}` is not a valid table name"),
            });
        }
        Ok(Self {
            url: info.require(params::URL)?.trim().to_owned(),
            credentials: Credentials::from_identity(info)?,
            table: table.to_owned(),
        })
    }

    pub fn create_table_statement(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             id BIGINT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY, \
             node_name VARCHAR(255) NOT NULL, \
             created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP)",
            self.table
        )
    }

    /// Insert of one row whose generated `id` is returned. Binds the node
    /// name as `$1`.
    pub fn insert_statement(&self) -> String {
        format!(
            "INSERT INTO {} (node_name) VALUES ($1) RETURNING id",
            self.table
        )
    }
}

/// ASCII letter or underscore, then letters, digits, or underscores.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.len() <= 63
}

/// Opens connections to a relational database.
pub trait SqlConnector: Send + Sync {
    fn connect<'a>(
        &'a self,
        settings: &'a RelationalSettings,
    ) -> BoxFuture<'a, Result<Box<dyn SqlConnection>, BackendError>>;
}

/// One open database connection.
pub trait SqlConnection: Send {
    fn execute<'a>(&'a mut self, statement: &'a str) -> BoxFuture<'a, Result<(), BackendError>>;

    /// Runs an insert and returns the key generated for the new row.
    fn insert_returning_key<'a>(
        &'a mut self,
        statement: &'a str,
        params: &'a [&'a str],
    ) -> BoxFuture<'a, Result<i64, BackendError>>;

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<(), BackendError>>;
}

/// Allocates the generated key of a freshly inserted row as worker id.
///
/// Each allocation opens one connection, ensures the table exists, inserts,
/// and closes the connection whether or not the insert succeeded.
pub struct RelationalAllocator {
    connector: Arc<dyn SqlConnector>,
    max_worker_id: u64,
}

impl RelationalAllocator {
    pub fn new(connector: Arc<dyn SqlConnector>, layout: &IdLayout) -> Self {
        Self {
            connector,
            max_worker_id: layout.max_worker_id(),
        }
    }

    async fn try_allocate(&self, info: &IdentityInfo) -> Result<WorkerIdentity, BackendError> {
        let settings = RelationalSettings::from_identity(info)?;
        let mut conn = self.connector.connect(&settings).await?;
        let inserted = register(&mut conn, &settings, info.node_name()).await;
        if let Err(e) = conn.close().await {
            #[cfg(feature = "tracing")]
            tracing::warn!(table = %settings.table, error = %e, "closing allocation connection failed");
            #[cfg(not(feature = "tracing"))]
            let _ = e;
        }

        let key = inserted?;
        let value = u64::try_from(key).map_err(|_| BackendError::Request {
            reason: format!("generated key {key} is negative"),
        })?;
        bounded(value, self.max_worker_id)
    }
}

async fn register(
    conn: &mut Box<dyn SqlConnection>,
    settings: &RelationalSettings,
    node_name: &str,
) -> Result<i64, BackendError> {
    conn.execute(&settings.create_table_statement()).await?;
    conn.insert_returning_key(&settings.insert_statement(), &[node_name])
        .await
}

impl WorkerIdAllocator for RelationalAllocator {
    fn backend(&self) -> AllocatorBackend {
        AllocatorBackend::Relational
    }

    fn allocate<'a>(&'a self, info: &'a IdentityInfo) -> BoxFuture<'a, Result<WorkerIdentity>> {
        async move {
            let outcome = self.try_allocate(info).await;
            finish(self.backend(), info.node_name(), outcome)
        }
        .boxed()
    }
}

impl fmt::Debug for RelationalAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationalAllocator")
            .field("max_worker_id", &self.max_worker_id)
            .finish_non_exhaustive()
    }
}
