//! # Infrastructure Adapters
//!
//! In-memory and filesystem implementations of the store and event fetcher
//! interfaces.

pub mod filesystem_store;
pub mod memory_dependencies;
pub mod memory_events;
pub mod memory_store;

pub use filesystem_store::{
    DependencyPoller, FilesystemDependencyStore, FilesystemStoreConfig, FilesystemWebhookStore,
};
pub use memory_dependencies::InMemoryDependencyStore;
pub use memory_events::{FetchWindow, InMemoryEventSource};
pub use memory_store::InMemoryWebhookStore;
