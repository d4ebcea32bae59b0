// Core data models for the router cache
// Plain serde data: projections of project configuration, cache types, events

//! # Domain Models Module
//!
//! The cache does not own persistent entities. It stores *projections* of
//! rows owned by the data layer, so everything in here is plain data:
//!
//! - [`projection`]: the seven cached projections of a project's configuration
//! - [`cache_type`]: the closed set of cache types, their TTLs and the
//!   composite bundle assembled from them
//! - [`event`]: transient pub/sub messages published by writers

pub mod cache_type;
pub mod event;
pub mod projection;

/// Re-export cache type definitions
/// - CacheType: one of the seven cached projections
/// - CachedValue: an already-fetched projection tagged with its type
/// - CompositeBundle: the union of all projections for one project
pub use cache_type::{CacheType, CachedValue, CompositeBundle};

/// Re-export event types
/// - Event: named event with a JSON payload
/// - ActionType: create/update/delete marker carried by activity events
pub use event::{ActionType, Event};

/// Re-export projection types
pub use projection::{
    AgentPersonality, ContentBaseData, GuardrailsData, InlineAgentConfig, ProjectData,
    ResolvedProject, TeamMember,
};
