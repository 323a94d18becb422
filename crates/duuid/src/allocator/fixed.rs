use futures::{
    FutureExt,
    future::{BoxFuture, ready},
};

use crate::{
    allocator::{
        AllocatorBackend, BackendError, IdentityInfo, WorkerIdAllocator, WorkerIdentity, bounded,
        finish, params,
    },
    error::Result,
    layout::IdLayout,
};

/// Hands out a worker id taken from configuration.
///
/// Uniqueness across processes is the operator's responsibility.
#[derive(Clone, Copy, Debug)]
pub struct StaticAllocator {
    worker_id: Option<u64>,
    max_worker_id: u64,
}

impl StaticAllocator {
    /// Reads the id from [`params::WORKER_ID`] at allocation time.
    pub const fn new(layout: &IdLayout) -> Self {
        Self {
            worker_id: None,
            max_worker_id: layout.max_worker_id(),
        }
    }

    /// Uses `worker_id` regardless of the identity's parameters.
    #[must_use]
    pub const fn with_worker_id(mut self, worker_id: u64) -> Self {
        self.worker_id = Some(worker_id);
        self
    }

    fn try_allocate(&self, info: &IdentityInfo) -> Result<WorkerIdentity, BackendError> {
        let worker_id = match self.worker_id {
            Some(id) => id,
            None => {
                let raw = info.require(params::WORKER_ID)?;
                raw.trim().parse::<u64>().map_err(|e| BackendError::Settings {
                    reason: format!("`{}` = `{raw}`: {e}", params::WORKER_ID),
                })?
            }
        };
        bounded(worker_id, self.max_worker_id)
    }
}

impl WorkerIdAllocator for StaticAllocator {
    fn backend(&self) -> AllocatorBackend {
        AllocatorBackend::Static
    }

    fn allocate<'a>(&'a self, info: &'a IdentityInfo) -> BoxFuture<'a, Result<WorkerIdentity>> {
        ready(finish(self.backend(), info.node_name(), self.try_allocate(info))).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[tokio::test]
    async fn reads_worker_id_param() {
        let allocator = StaticAllocator::new(&IdLayout::DEFAULT);
        let info = IdentityInfo::new("n").with_param(params::WORKER_ID, "42");
        assert_eq!(allocator.allocate(&info).await.unwrap().worker_id(), 42);

        let garbage = IdentityInfo::new("n").with_param(params::WORKER_ID, "forty-two");
        assert!(matches!(
            allocator.allocate(&garbage).await,
            Err(Error::AllocationFailed { source: BackendError::Settings { .. }, .. })
        ));
    }

    #[tokio::test]
    async fn explicit_id_wins_and_is_range_checked() {
        let layout = IdLayout::DEFAULT;
        let info = IdentityInfo::new("n").with_param(params::WORKER_ID, "1");
        let allocator = StaticAllocator::new(&layout).with_worker_id(7);
        assert_eq!(allocator.allocate(&info).await.unwrap().worker_id(), 7);

        let too_big = StaticAllocator::new(&layout).with_worker_id(layout.max_worker_id() + 1);
        assert!(matches!(
            too_big.allocate(&info).await,
            Err(Error::AllocationFailed {
                backend: AllocatorBackend::Static,
                source: BackendError::Exhausted { .. },
            })
        ));
    }
}
