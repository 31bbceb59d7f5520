//! Object store implementations.
//!
//! The broker only depends on the [`ObjectStore`](crate::traits::ObjectStore)
//! trait; [`MemoryObjectStore`] is the in-process repository used as the
//! default instance provider and by tests.

pub mod memory;

pub use memory::MemoryObjectStore;
