// Router Cache - project configuration cache for the agent router
// Keeps per-project pre-generation data hot and refreshes it on write events

//! # Router Cache Library
//!
//! This is the library crate behind the router's project configuration cache.
//! Every conversational turn needs the same bundle of project configuration
//! (project settings, content base, instructions, team, guardrails and the
//! optional inline agent configuration) before generation can start. This
//! crate keeps that bundle in a networked key-value store and refreshes it
//! whenever the underlying data changes.
//!
//! ## Core Components
//!
//! ### Key-Value Store
//! - [`KeyValueStore`]: `get`/`set`/`delete`/`delete_pattern` over JSON values
//! - [`InMemoryStore`]: process-local implementation for development and tests
//! - [`NatsKvStore`]: NATS JetStream key-value bucket for shared deployments
//!
//! ### Cache Service
//! [`CacheService`] owns key naming, per-type TTLs and the composite bundle
//! stored next to the individual entries. Reads are get-or-create: a miss
//! calls the supplied fetch function and stores the result. Writes go through
//! `invalidate_*` (delete) or `refresh_*` (delete, then repopulate), and both
//! repair the composite bundle or drop it when it can no longer be rebuilt.
//!
//! ### Pre-Generation
//! [`PreGenerationService`] is the read path used once per agent turn.
//!
//! ### Events
//! [`EventBus`] dispatches named events to sync and async observers. The
//! cache invalidation observers in [`engine::observers`] subscribe to the
//! project and content base activity events and eagerly refresh the cache.
//!
//! ## Data Flow
//!
//! ```text
//! writer mutates a row
//!   ↓ publishes
//! Event("project_activity", {project, action_type})
//!   ↓ dispatched by
//! EventBus (spawned task or fallback worker pool)
//!   ↓ runs
//! ProjectCacheInvalidationObserver
//!   ↓ refetches from ProjectDataSource, then
//! CacheService::refresh → KeyValueStore
//! ```
//!
//! ## Router Startup
//!
//! Build the store and cache, register the observers before any event can
//! arrive, then start the relay. Shut the bus down last so in-flight
//! refreshes finish.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use router_cache::{
//!     register_cache_observers, CacheService, EventBus, InMemoryProjectSource, NatsEventRelay,
//!     PreGenerationService, ProjectDataSource, Settings,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let settings = Settings::load(Some("router-cache"))?;
//! let ttls = settings.cache.ttls();
//! let store = settings.store.connect(&ttls).await?;
//! let cache = Arc::new(CacheService::with_ttls(store, ttls));
//!
//! // Replace with the data-layer implementation
//! let source: Arc<dyn ProjectDataSource> = Arc::new(InMemoryProjectSource::new());
//!
//! let bus = EventBus::init(settings.events.bus_config())?;
//! register_cache_observers(&bus, cache.clone(), source.clone());
//!
//! let client = async_nats::connect(settings.store.nats_url.as_str()).await?;
//! let relay = NatsEventRelay::new(client, bus.clone())
//!     .with_subject_prefix(settings.events.subject_prefix.clone())
//!     .spawn();
//!
//! let pre_generation = PreGenerationService::new(cache, source)
//!     .with_slow_threshold(settings.pre_generation.slow_threshold());
//! let turn = pre_generation.fetch_pre_generation_data("project-uuid").await?;
//! println!("agents backend: {}", turn.agents_backend);
//!
//! relay.abort();
//! bus.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;

// Plain data: projections, cache types, events
pub mod models;

// Cache, events, pre-generation and store implementations
pub mod engine;

pub use config::Settings;

pub use models::{
    ActionType, AgentPersonality, CacheType, CachedValue, CompositeBundle, ContentBaseData,
    Event, GuardrailsData, InlineAgentConfig, ProjectData, ResolvedProject, TeamMember,
};

pub use engine::{
    cache::{CacheService, CacheStats, CacheTtls},
    events::{AsyncObserver, EventBus, EventBusConfig, Observer},
    nats_store::{NatsKvStore, NatsKvStoreConfig},
    observers::register_cache_observers,
    pre_generation::{PreGenerationData, PreGenerationService},
    relay::NatsEventRelay,
    source::{InMemoryProjectSource, ProjectDataSource},
    store::{InMemoryStore, KeyValueStore},
    workflow_cache::WorkflowCache,
};

use thiserror::Error;

/// Errors produced by the router cache.
///
/// Configuration errors are raised immediately and never retried. Store and
/// fetch errors propagate on the read path; observers catch and log them.
#[derive(Error, Debug)]
pub enum RouterCacheError {
    /// Missing or contradictory configuration, e.g. no agents backend
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Key-value store failures (connection, put, delete)
    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A data-layer fetch function failed
    #[error("Fetch error for {cache_type}: {message}")]
    Fetch { cache_type: String, message: String },

    /// A non-isolated observer failed while handling an event
    #[error("Observer for event '{event}' failed: {message}")]
    Observer { event: String, message: String },

    /// A blocking helper was called from inside an async runtime
    #[error("Cannot block on event dispatch from inside an async runtime")]
    InsideRuntime,

    /// Runtime construction or task failures unrelated to the calling context
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Settings could not be loaded
    #[error("Settings error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<std::io::Error> for RouterCacheError {
    fn from(err: std::io::Error) -> Self {
        RouterCacheError::Runtime(err.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RouterCacheError>;
