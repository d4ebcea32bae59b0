//! Router Cache Admin CLI
//!
//! Administrative CLI for inspecting and flushing the shared project cache
//! and for publishing activity events to running routers.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use router_cache::config::StoreBackend;
use router_cache::engine::relay::NatsEventRelay;
use router_cache::{
    ActionType, CacheService, CacheType, Event, KeyValueStore, Settings, WorkflowCache,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "router-cache-admin")]
#[command(about = "Router Cache Admin CLI - Inspect, flush and refresh the project cache")]
#[command(version = "1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (TOML)
    #[arg(long, env = "ROUTER_CACHE_CONFIG")]
    config: Option<String>,

    /// NATS server URL, overrides the settings file
    #[arg(long, env = "NATS_URL")]
    nats_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the cached value of a key
    Get {
        /// Cache key, e.g. project:<uuid>:all
        key: String,
    },

    /// Invalidate one cache type of a project
    Invalidate {
        /// Project UUID
        project_uuid: String,

        /// Cache type (data, content_base, team, guardrails,
        /// inline_agent_config, instructions, agent)
        #[arg(long)]
        cache_type: CacheType,

        /// Agents backend; without it a team invalidation clears every backend
        #[arg(long)]
        backend: Option<String>,
    },

    /// Delete every cached entry of a project
    FlushProject {
        /// Project UUID
        project_uuid: String,

        /// Confirm the deletion
        #[arg(long)]
        confirm: bool,
    },

    /// Delete every cached entry of a workflow
    FlushWorkflow {
        /// Workflow ID
        workflow_id: String,
    },

    /// Publish an activity event for running routers to pick up
    Publish {
        /// Event name, e.g. project_activity
        event: String,

        /// JSON object merged into the event payload
        #[arg(long, default_value = "{}")]
        payload: String,

        /// Action code (C, U, D)
        #[arg(long, default_value = "U")]
        action: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(url) = &cli.nats_url {
        settings.store.nats_url = url.clone();
    }

    // Initialize logging
    let default_level = if cli.verbose {
        "debug".to_string()
    } else {
        settings.log_level.clone()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let ttls = settings.cache.ttls();

    match cli.command {
        Commands::Get { key } => {
            let store = connect_store(&settings).await?;
            match store.get(&key).await? {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => info!("Key {} is not cached", key),
            }
        }

        Commands::Invalidate {
            project_uuid,
            cache_type,
            backend,
        } => {
            let cache = CacheService::with_ttls(connect_store(&settings).await?, ttls);
            cache
                .invalidate(cache_type, &project_uuid, backend.as_deref())
                .await?;
            info!("✅ Invalidated {} cache for project {}", cache_type, project_uuid);
        }

        Commands::FlushProject {
            project_uuid,
            confirm,
        } => {
            if !confirm {
                error!("❌ Flush operation requires --confirm flag for safety");
                return Ok(());
            }
            let cache = CacheService::with_ttls(connect_store(&settings).await?, ttls);
            let removed = cache.invalidate_all_project_cache(&project_uuid).await?;
            info!("✅ Removed {} key(s) for project {}", removed, project_uuid);
        }

        Commands::FlushWorkflow { workflow_id } => {
            let store = connect_store(&settings).await?;
            let workflows = WorkflowCache::with_ttl(store, settings.cache.workflow_ttl());
            let removed = workflows.delete_workflow(&workflow_id).await?;
            info!("✅ Removed {} key(s) for workflow {}", removed, workflow_id);
        }

        Commands::Publish {
            event,
            payload,
            action,
        } => {
            let event = build_event(event, &payload, &action)?;

            let client = async_nats::connect(settings.store.nats_url.as_str())
                .await
                .context("Failed to connect to NATS")?;
            NatsEventRelay::publish_remote(&client, &settings.events.subject_prefix, &event)
                .await?;
            info!("✅ Published {} ({})", event.name, event.id);
        }
    }

    Ok(())
}

async fn connect_store(settings: &Settings) -> Result<Arc<dyn KeyValueStore>> {
    if settings.store.backend == StoreBackend::Memory {
        warn!("Using the in-memory store; nothing is shared with running routers");
    }
    let store = settings.store.connect(&settings.cache.ttls()).await?;
    Ok(store)
}

/// Build the event for `publish`. `--action` wins over an `action_type`
/// inside `--payload`.
fn build_event(name: String, payload: &str, action: &str) -> Result<Event> {
    let action = ActionType::from_code(action)
        .with_context(|| format!("Unknown action code: {}", action))?;
    let payload: serde_json::Value =
        serde_json::from_str(payload).context("Payload must be valid JSON")?;
    let serde_json::Value::Object(fields) = payload else {
        anyhow::bail!("Payload must be a JSON object");
    };

    let mut event = Event::new(name);
    event.payload.extend(fields);
    Ok(event.with_action(action))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_flag_overrides_payload() {
        let event = build_event(
            "project_activity".to_string(),
            r#"{"action_type": "D", "project": {"uuid": "proj-1"}}"#,
            "U",
        )
        .unwrap();

        assert_eq!(event.action_type(), Some(ActionType::Update));
        assert_eq!(event.payload["project"]["uuid"], "proj-1");
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(build_event("e".to_string(), "{}", "X").is_err());
        assert!(build_event("e".to_string(), "[1]", "U").is_err());
        assert!(build_event("e".to_string(), "not json", "U").is_err());
    }
}
