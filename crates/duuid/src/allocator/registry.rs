use core::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::{
    allocator::{
        AllocatorBackend, IdentityInfo, LeaseStoreAllocator, RelationalAllocator, SettingsCache,
        SqlConnector, StaticAllocator, VersionedStore, WorkerIdAllocator, WorkerIdentity,
    },
    error::{Error, Result},
    layout::IdLayout,
};

/// One of the allocator variants, chosen at startup.
#[derive(Debug)]
pub enum Allocator {
    LeaseStore(LeaseStoreAllocator),
    Relational(RelationalAllocator),
    Static(StaticAllocator),
}

impl WorkerIdAllocator for Allocator {
    fn backend(&self) -> AllocatorBackend {
        match self {
            Self::LeaseStore(a) => a.backend(),
            Self::Relational(a) => a.backend(),
            Self::Static(a) => a.backend(),
        }
    }

    fn allocate<'a>(&'a self, info: &'a IdentityInfo) -> BoxFuture<'a, Result<WorkerIdentity>> {
        match self {
            Self::LeaseStore(a) => a.allocate(info),
            Self::Relational(a) => a.allocate(info),
            Self::Static(a) => a.allocate(info),
        }
    }
}

impl From<LeaseStoreAllocator> for Allocator {
    fn from(allocator: LeaseStoreAllocator) -> Self {
        Self::LeaseStore(allocator)
    }
}

impl From<RelationalAllocator> for Allocator {
    fn from(allocator: RelationalAllocator) -> Self {
        Self::Relational(allocator)
    }
}

impl From<StaticAllocator> for Allocator {
    fn from(allocator: StaticAllocator) -> Self {
        Self::Static(allocator)
    }
}

/// Maps an [`AllocatorBackend`] name to a concrete [`Allocator`].
///
/// The static backend is always available. The lease-store and relational
/// backends need a client registered first.
///
/// ```
/// use std::sync::Arc;
/// use duuid::{AllocatorBackend, AllocatorRegistry, IdLayout, MemoryLeaseStore};
///
/// let registry = AllocatorRegistry::new().register_lease_store(Arc::new(MemoryLeaseStore::new()));
/// assert!(registry.build(AllocatorBackend::LeaseStore, &IdLayout::DEFAULT).is_ok());
/// assert!(registry.build(AllocatorBackend::Relational, &IdLayout::DEFAULT).is_err());
/// ```
#[derive(Clone, Default)]
pub struct AllocatorRegistry {
    lease_store: Option<Arc<dyn VersionedStore>>,
    sql: Option<Arc<dyn SqlConnector>>,
    static_worker_id: Option<u64>,
    settings_cache: Option<Arc<SettingsCache>>,
    require_trust: bool,
}

impl AllocatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn register_lease_store(mut self, store: Arc<dyn VersionedStore>) -> Self {
        self.lease_store = Some(store);
        self
    }

    #[must_use]
    pub fn register_sql(mut self, connector: Arc<dyn SqlConnector>) -> Self {
        self.sql = Some(connector);
        self
    }

    /// Fixes the id handed out by the static backend instead of reading it
    /// from the identity parameters.
    #[must_use]
    pub const fn static_worker_id(mut self, worker_id: u64) -> Self {
        self.static_worker_id = Some(worker_id);
        self
    }

    /// Shares resolved lease-store settings between allocators built here.
    #[must_use]
    pub fn settings_cache(mut self, cache: Arc<SettingsCache>) -> Self {
        self.settings_cache = Some(cache);
        self
    }

    /// See [`LeaseStoreAllocator::require_trust`].
    #[must_use]
    pub const fn require_trust(mut self, require: bool) -> Self {
        self.require_trust = require;
        self
    }

    pub const fn is_registered(&self, backend: AllocatorBackend) -> bool {
        match backend {
            AllocatorBackend::LeaseStore => self.lease_store.is_some(),
            AllocatorBackend::Relational => self.sql.is_some(),
            AllocatorBackend::Static => true,
        }
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if no client is registered for
    /// `backend`.
    pub fn build(&self, backend: AllocatorBackend, layout: &IdLayout) -> Result<Allocator> {
        let allocator = match backend {
            AllocatorBackend::LeaseStore => {
                let store = self.lease_store.clone().ok_or_else(|| unregistered(backend))?;
                let mut allocator =
                    LeaseStoreAllocator::new(store, layout).require_trust(self.require_trust);
                if let Some(cache) = &self.settings_cache {
                    allocator = allocator.with_settings_cache(Arc::clone(cache));
                }
                allocator.into()
            }
            AllocatorBackend::Relational => {
                let connector = self.sql.clone().ok_or_else(|| unregistered(backend))?;
                RelationalAllocator::new(connector, layout).into()
            }
            AllocatorBackend::Static => {
                let allocator = StaticAllocator::new(layout);
                match self.static_worker_id {
                    Some(id) => allocator.with_worker_id(id).into(),
                    None => allocator.into(),
                }
            }
        };
        Ok(allocator)
    }
}

fn unregistered(backend: AllocatorBackend) -> Error {
    Error::InvalidConfig {
        reason: format!("no client registered for the `{backend}` allocator"),
    }
}

impl fmt::Debug for AllocatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocatorRegistry")
            .field("lease_store", &self.lease_store.is_some())
            .field("sql", &self.sql.is_some())
            .field("static_worker_id", &self.static_worker_id)
            .field("settings_cache", &self.settings_cache)
            .field("require_trust", &self.require_trust)
            .finish()
    }
}
