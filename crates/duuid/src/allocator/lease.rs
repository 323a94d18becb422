use core::fmt;
use std::sync::Arc;

use futures::{FutureExt, future::BoxFuture};

use crate::{
    allocator::{
        AllocatorBackend, BackendError, IdentityInfo, SettingsCache, TlsPolicy, WorkerIdAllocator,
        WorkerIdentity, bounded, finish, params,
    },
    error::Result,
    layout::IdLayout,
};

/// Key whose write version becomes the worker id, unless overridden with
/// [`params::KEY`].
pub const DEFAULT_WORKER_KEY: &str = "/duuid/worker-id";

/// Username and password for a backend. `Debug` hides the password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Reads [`params::USERNAME`] and [`params::PASSWORD`]. A username without
    /// a password is allowed; a password without a username is not.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Settings`] for a password without a username.
    pub fn from_identity(info: &IdentityInfo) -> Result<Option<Self>, BackendError> {
        match (info.param(params::USERNAME), info.param(params::PASSWORD)) {
            (Some(username), password) => Ok(Some(Self {
                username: username.to_owned(),
                password: password.unwrap_or_default().to_owned(),
            })),
            (None, None) => Ok(None),
            (None, Some(_)) => Err(BackendError::Settings {
                reason: format!("`{}` given without `{}`", params::PASSWORD, params::USERNAME),
            }),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything needed to talk to the lease store, resolved from an
/// [`IdentityInfo`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaseStoreSettings {
    pub endpoints: Vec<String>,
    pub credentials: Option<Credentials>,
    pub tls: TlsPolicy,
    pub key: String,
}

impl LeaseStoreSettings {
    /// # Errors
    ///
    /// Returns [`BackendError::Settings`] if no endpoint is given, plus any
    /// error from [`Credentials::from_identity`] and [`TlsPolicy::resolve`].
    pub fn from_identity(info: &IdentityInfo) -> Result<Self, BackendError> {
        let endpoints: Vec<String> = info
            .param(params::ENDPOINTS)
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_owned)
            .collect();
        if endpoints.is_empty() {
            return Err(BackendError::Settings {
                reason: format!("`{}` lists no endpoint", params::ENDPOINTS),
            });
        }
        let tls = TlsPolicy::resolve(&endpoints, info)?;
        Ok(Self {
            credentials: Credentials::from_identity(info)?,
            key: info
                .param(params::KEY)
                .unwrap_or(DEFAULT_WORKER_KEY)
                .to_owned(),
            endpoints,
            tls,
        })
    }
}

/// Client seam for a versioned key/value store.
///
/// Each write to a key bumps a per-key version that is strictly increasing
/// and never reused, even across store restarts.
pub trait VersionedStore: Send + Sync {
    /// Writes `value` under `key` and returns the version the key carried
    /// before this write, or `0` if the key did not exist.
    fn put<'a>(
        &'a self,
        settings: &'a LeaseStoreSettings,
        key: &'a str,
        value: &'a [u8],
    ) -> BoxFuture<'a, Result<u64, BackendError>>;
}

/// Allocates the pre-write version of [`LeaseStoreSettings::key`] as worker
/// id, writing the node name as the value.
pub struct LeaseStoreAllocator {
    store: Arc<dyn VersionedStore>,
    max_worker_id: u64,
    require_trust: bool,
    cache: Option<Arc<SettingsCache>>,
}

impl LeaseStoreAllocator {
    pub fn new(store: Arc<dyn VersionedStore>, layout: &IdLayout) -> Self {
        Self {
            store,
            max_worker_id: layout.max_worker_id(),
            require_trust: false,
            cache: None,
        }
    }

    /// Refuses https endpoints that would fall back to
    /// [`TlsPolicy::AcceptAnyCertificate`].
    #[must_use]
    pub const fn require_trust(mut self, require: bool) -> Self {
        self.require_trust = require;
        self
    }

    #[must_use]
    pub fn with_settings_cache(mut self, cache: Arc<SettingsCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    fn settings(&self, info: &IdentityInfo) -> Result<Arc<LeaseStoreSettings>, BackendError> {
        match &self.cache {
            Some(cache) => cache.get_or_try_insert_with(info.node_name(), || {
                LeaseStoreSettings::from_identity(info)
            }),
            None => LeaseStoreSettings::from_identity(info).map(Arc::new),
        }
    }

    async fn try_allocate(&self, info: &IdentityInfo) -> Result<WorkerIdentity, BackendError> {
        let settings = self.settings(info)?;
        if self.require_trust && !settings.tls.is_verified() {
            return Err(BackendError::Tls {
                reason: format!("https endpoints need `{}`", params::CA_CERT),
            });
        }
        let previous = self
            .store
            .put(&settings, &settings.key, info.node_name().as_bytes())
            .await?;
        bounded(previous, self.max_worker_id)
    }
}

impl WorkerIdAllocator for LeaseStoreAllocator {
    fn backend(&self) -> AllocatorBackend {
        AllocatorBackend::LeaseStore
    }

    fn allocate<'a>(&'a self, info: &'a IdentityInfo) -> BoxFuture<'a, Result<WorkerIdentity>> {
        async move {
            let outcome = self.try_allocate(info).await;
            finish(self.backend(), info.node_name(), outcome)
        }
        .boxed()
    }
}

impl fmt::Debug for LeaseStoreAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseStoreAllocator")
            .field("max_worker_id", &self.max_worker_id)
            .field("require_trust", &self.require_trust)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
