//! Worker id allocation.
//!
//! A process must obtain a cluster-unique worker id before it may generate
//! IDs. The [`WorkerIdAllocator`] capability is implemented by three
//! interchangeable variants, selected by [`AllocatorBackend`] through an
//! [`AllocatorRegistry`]:
//!
//! - [`LeaseStoreAllocator`] - the pre-write version of a well-known key in a
//!   versioned key/value store ([`VersionedStore`]).
//! - [`RelationalAllocator`] - the generated primary key of a row inserted
//!   into an auto-increment table ([`SqlConnector`]).
//! - [`StaticAllocator`] - a fixed id from configuration, for tests and
//!   single-node deployments.
//!
//! Allocation happens once, at startup. Nothing here is on the per-ID hot
//! path.

mod cache;
mod fixed;
mod interface;
mod lease;
mod memory;
mod registry;
mod relational;
mod tls;

pub use cache::*;
pub use fixed::*;
pub use interface::*;
pub use lease::*;
pub use memory::*;
pub use registry::*;
pub use relational::*;
pub use tls::*;
