// Router cache engine
// Stores, the cache service, events and the observers wiring them together

//! # Router Cache Engine Module
//!
//! The engine is the layer between the plain-data models and the outside
//! world (key-value stores, the data layer, remote writers).
//!
//! ## Engine Components
//!
//! ### Storage (`store`, `nats_store`)
//! - [`store::KeyValueStore`] trait with an in-memory implementation
//! - NATS JetStream key-value implementation for shared deployments
//!
//! ### Cache (`cache`, `workflow_cache`)
//! - Key naming, TTLs, composite bundle, invalidate and refresh
//! - Short-lived workflow-scoped entries
//!
//! ### Read Path (`source`, `pre_generation`)
//! - [`source::ProjectDataSource`]: the data-layer contract
//! - [`pre_generation::PreGenerationService`]: one call per agent turn
//!
//! ### Write Path (`events`, `observers`, `relay`)
//! - [`events::EventBus`] with sync and async observers
//! - Cache invalidation observers for the four activity events
//! - NATS relay carrying events between processes
//!
//! ## Layering
//!
//! Nothing in here knows about concrete database rows. Code that does
//! implements [`source::ProjectDataSource`] and publishes [`crate::Event`]s;
//! the dependency only ever points into this module.

/// Key-value store abstraction
///
/// Contains:
/// - KeyValueStore trait definition
/// - In-memory implementation with lazy expiry
/// - Glob pattern matching for pattern deletion
pub mod store;

/// NATS JetStream key-value store
pub mod nats_store;

/// Project configuration cache service
///
/// Contains:
/// - CacheService get-or-create accessors per cache type
/// - Composite bundle population and repair
/// - Invalidate and refresh operations
/// - Cache statistics
pub mod cache;

/// Workflow-scoped cache
pub mod workflow_cache;

/// Data-layer contract and in-memory implementation
pub mod source;

/// Pre-generation read path
pub mod pre_generation;

/// Event bus with sync/async observers and a fallback worker pool
pub mod events;

/// Cache invalidation observers
pub mod observers;

/// NATS event relay between processes
pub mod relay;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(test)]
mod tests;

// Re-export main engine types so users can import from engine directly

pub use cache::{CacheService, CacheStats, CacheTtls};
pub use events::{AsyncObserver, EventBus, EventBusConfig, Observer};
pub use nats_store::{NatsKvStore, NatsKvStoreConfig};
pub use observers::register_cache_observers;
pub use pre_generation::{PreGenerationData, PreGenerationService};
pub use relay::NatsEventRelay;
pub use source::{InMemoryProjectSource, ProjectDataSource, ProjectRecord};
pub use store::{InMemoryStore, KeyValueStore};
pub use workflow_cache::WorkflowCache;
