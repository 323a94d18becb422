use core::{fmt, str::FromStr, time::Duration};
use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use crate::error::{Error, Result};

/// Well-known keys of the [`IdentityInfo`] parameter bag.
pub mod params {
    /// Comma-separated lease-store endpoints, e.g. `https://10.0.0.1:2379`.
    pub const ENDPOINTS: &str = "endpoints";
    pub const USERNAME: &str = "username";
    pub const PASSWORD: &str = "password";
    /// CA certificate (a path, or inline PEM) trusted for secure endpoints.
    pub const CA_CERT: &str = "ca_cert";
    /// Client certificate (a path, or inline PEM) for mutual TLS.
    pub const CLIENT_CERT: &str = "client_cert";
    /// Client private key (a path, or inline PEM) for mutual TLS.
    pub const CLIENT_KEY: &str = "client_key";
    /// Overrides the lease-store key whose version is used as worker id.
    pub const KEY: &str = "key";
    /// Connection URL of the relational backend.
    pub const URL: &str = "url";
    /// Overrides the relational table name.
    pub const TABLE: &str = "table";
    /// Worker id handed out by the static backend.
    pub const WORKER_ID: &str = "worker_id";
}

/// Which allocator variant a deployment uses.
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AllocatorBackend {
    LeaseStore,
    Relational,
    #[default]
    Static,
}

impl AllocatorBackend {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LeaseStore => "lease-store",
            Self::Relational => "relational",
            Self::Static => "static",
        }
    }
}

impl fmt::Display for AllocatorBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AllocatorBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lease-store" | "lease_store" | "etcd" => Ok(Self::LeaseStore),
            "relational" | "sql" | "jdbc" => Ok(Self::Relational),
            "static" => Ok(Self::Static),
            other => Err(Error::InvalidConfig {
                reason: format!("unknown allocator backend `{other}`"),
            }),
        }
    }
}

/// Failures reported by an allocator backend.
///
/// Always surfaced to callers wrapped in [`Error::AllocationFailed`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum BackendError {
    /// The parameter bag is missing a value or holds a malformed one.
    #[error("invalid backend settings: {reason}")]
    Settings { reason: String },

    /// No endpoint could be reached.
    #[error("cannot reach {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    /// The backend rejected the credentials.
    #[error("authentication rejected for `{username}`")]
    Unauthorized { username: String },

    /// Transport security could not be set up as configured.
    #[error("tls: {reason}")]
    Tls { reason: String },

    /// The backend accepted the connection but the request failed.
    #[error("request failed: {reason}")]
    Request { reason: String },

    /// The backend handed out a value beyond the layout's worker id range.
    #[error("worker id space exhausted: backend returned {value}, maximum is {max}")]
    Exhausted { value: u64, max: u64 },

    /// The caller-supplied time limit elapsed.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Who is asking for a worker id, plus backend-specific connection
/// parameters.
///
/// `Debug` output redacts the password and private key.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct IdentityInfo {
    node_name: String,
    params: BTreeMap<String, String>,
}

impl IdentityInfo {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            params: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.params.insert(key.into(), value.into());
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Returns a parameter, treating blank values as absent.
    ///
    /// Values are returned verbatim: secrets and PEM material are
    /// whitespace-sensitive.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Returns a parameter that must be present.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Settings`] if the parameter is missing.
    pub fn require(&self, key: &str) -> Result<&str, BackendError> {
        self.param(key).ok_or_else(|| BackendError::Settings {
            reason: format!("missing `{key}`"),
        })
    }

    pub fn params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Debug for IdentityInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted: BTreeMap<&str, &str> = self
            .params
            .iter()
            .map(|(k, v)| match k.as_str() {
                params::PASSWORD | params::CLIENT_KEY => (k.as_str(), "<redacted>"),
                _ => (k.as_str(), v.as_str()),
            })
            .collect();
        f.debug_struct("IdentityInfo")
            .field("node_name", &self.node_name)
            .field("params", &redacted)
            .finish()
    }
}

/// The worker id a process holds for its whole lifetime.
///
/// Never persisted: a restarted process allocates a fresh one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WorkerIdentity {
    worker_id: u64,
    acquired_at: DateTime<Utc>,
}

impl WorkerIdentity {
    /// Records `worker_id` as acquired now.
    pub fn new(worker_id: u64) -> Self {
        Self {
            worker_id,
            acquired_at: Utc::now(),
        }
    }

    pub const fn worker_id(&self) -> u64 {
        self.worker_id
    }

    pub const fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }
}

/// Obtains a cluster-unique worker id for the current process.
///
/// Implementations must never hand the same value to two live processes and
/// must report an exhausted id space instead of wrapping around.
pub trait WorkerIdAllocator: Send + Sync {
    /// The variant this allocator implements.
    fn backend(&self) -> AllocatorBackend;

    /// Performs one allocation round trip.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`] on any backend error.
    fn allocate<'a>(&'a self, info: &'a IdentityInfo) -> BoxFuture<'a, Result<WorkerIdentity>>;
}

impl<A: WorkerIdAllocator + ?Sized> WorkerIdAllocator for Arc<A> {
    fn backend(&self) -> AllocatorBackend {
        (**self).backend()
    }

    fn allocate<'a>(&'a self, info: &'a IdentityInfo) -> BoxFuture<'a, Result<WorkerIdentity>> {
        (**self).allocate(info)
    }
}

/// Runs `allocator.allocate(info)` bounded by `limit`.
///
/// Must be awaited inside a Tokio runtime with the timer enabled. A timeout
/// is reported as [`BackendError::Timeout`] and never retried here.
///
/// # Errors
///
/// Returns [`Error::AllocationFailed`] if the backend fails or the limit
/// elapses.
pub async fn allocate_with_timeout<A>(
    allocator: &A,
    info: &IdentityInfo,
    limit: Duration,
) -> Result<WorkerIdentity>
where
    A: WorkerIdAllocator + ?Sized,
{
    match tokio::time::timeout(limit, allocator.allocate(info)).await {
        Ok(result) => result,
        Err(_) => {
            #[cfg(feature = "tracing")]
            tracing::error!(backend = %allocator.backend(), ?limit, "worker id allocation timed out");
            Err(Error::AllocationFailed {
                backend: allocator.backend(),
                source: BackendError::Timeout(limit),
            })
        }
    }
}

/// Accepts `value` as a worker id if it fits below `max`.
pub(crate) fn bounded(value: u64, max: u64) -> Result<WorkerIdentity, BackendError> {
    if value > max {
        return Err(BackendError::Exhausted { value, max });
    }
    Ok(WorkerIdentity::new(value))
}

/// Wraps a backend outcome into the crate's error type and logs it.
pub(crate) fn finish(
    backend: AllocatorBackend,
    node_name: &str,
    outcome: Result<WorkerIdentity, BackendError>,
) -> Result<WorkerIdentity> {
    #[cfg(not(feature = "tracing"))]
    let _ = node_name;
    match outcome {
        Ok(identity) => {
            #[cfg(feature = "tracing")]
            tracing::info!(
                %backend,
                node_name,
                worker_id = identity.worker_id(),
                "worker id allocated"
            );
            Ok(identity)
        }
        Err(source) => {
            #[cfg(feature = "tracing")]
            tracing::error!(%backend, node_name, error = %source, "worker id allocation failed");
            Err(Error::AllocationFailed { backend, source })
        }
    }
}
