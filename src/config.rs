// Layered settings for the router cache
// Optional TOML file first, then ROUTER_CACHE__* environment variables

use std::sync::Arc;
use std::time::Duration;

use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::engine::cache::CacheTtls;
use crate::engine::events::EventBusConfig;
use crate::engine::nats_store::{NatsKvStore, NatsKvStoreConfig};
use crate::engine::store::{InMemoryStore, KeyValueStore};
use crate::engine::workflow_cache::WORKFLOW_DATA_TTL;
use crate::models::cache_type::{
    AGENT_DATA_TTL, CONTENT_BASE_DATA_TTL, GUARDRAILS_DATA_TTL, INLINE_AGENT_CONFIG_TTL,
    INSTRUCTIONS_DATA_TTL, MAX_TTL, PROJECT_DATA_TTL, TEAM_DATA_TTL,
};
use crate::{Result, RouterCacheError};

/// Environment prefix; `ROUTER_CACHE__STORE__BACKEND=nats` sets `store.backend`.
pub const ENV_PREFIX: &str = "ROUTER_CACHE";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub store: StoreSettings,
    pub cache: CacheSettings,
    pub events: EventSettings,
    pub pre_generation: PreGenerationSettings,
    /// Default tracing filter when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store: StoreSettings::default(),
            cache: CacheSettings::default(),
            events: EventSettings::default(),
            pre_generation: PreGenerationSettings::default(),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Nats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub nats_url: String,
    pub bucket: String,
    pub connection_timeout_secs: u64,
    pub reconnect_attempts: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        let nats = NatsKvStoreConfig::default();
        Self {
            backend: StoreBackend::Memory,
            nats_url: nats.url,
            bucket: nats.bucket,
            connection_timeout_secs: nats.connection_timeout.as_secs(),
            reconnect_attempts: nats.reconnect_attempts,
        }
    }
}

impl StoreSettings {
    pub fn nats_config(&self, max_age: Duration) -> NatsKvStoreConfig {
        NatsKvStoreConfig {
            url: self.nats_url.clone(),
            connection_timeout: Duration::from_secs(self.connection_timeout_secs),
            reconnect_attempts: self.reconnect_attempts,
            bucket: self.bucket.clone(),
            max_age,
            ..Default::default()
        }
    }

    /// Open the configured store. NATS buckets keep entries at most as long
    /// as the longest cache TTL.
    pub async fn connect(&self, ttls: &CacheTtls) -> Result<Arc<dyn KeyValueStore>> {
        match self.backend {
            StoreBackend::Memory => Ok(Arc::new(InMemoryStore::new())),
            StoreBackend::Nats => {
                let store = NatsKvStore::connect(self.nats_config(ttls.longest())).await?;
                Ok(Arc::new(store))
            }
        }
    }
}

/// TTLs in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub project_data_ttl_secs: u64,
    pub content_base_data_ttl_secs: u64,
    pub team_data_ttl_secs: u64,
    pub guardrails_data_ttl_secs: u64,
    pub inline_agent_config_ttl_secs: u64,
    pub instructions_data_ttl_secs: u64,
    pub agent_data_ttl_secs: u64,
    pub workflow_data_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            project_data_ttl_secs: PROJECT_DATA_TTL.as_secs(),
            content_base_data_ttl_secs: CONTENT_BASE_DATA_TTL.as_secs(),
            team_data_ttl_secs: TEAM_DATA_TTL.as_secs(),
            guardrails_data_ttl_secs: GUARDRAILS_DATA_TTL.as_secs(),
            inline_agent_config_ttl_secs: INLINE_AGENT_CONFIG_TTL.as_secs(),
            instructions_data_ttl_secs: INSTRUCTIONS_DATA_TTL.as_secs(),
            agent_data_ttl_secs: AGENT_DATA_TTL.as_secs(),
            workflow_data_ttl_secs: WORKFLOW_DATA_TTL.as_secs(),
        }
    }
}

impl CacheSettings {
    pub fn ttls(&self) -> CacheTtls {
        CacheTtls {
            data: Duration::from_secs(self.project_data_ttl_secs),
            content_base: Duration::from_secs(self.content_base_data_ttl_secs),
            team: Duration::from_secs(self.team_data_ttl_secs),
            guardrails: Duration::from_secs(self.guardrails_data_ttl_secs),
            inline_agent_config: Duration::from_secs(self.inline_agent_config_ttl_secs),
            instructions: Duration::from_secs(self.instructions_data_ttl_secs),
            agent: Duration::from_secs(self.agent_data_ttl_secs),
            composite: Duration::from_secs(self.project_data_ttl_secs),
        }
    }

    pub fn workflow_ttl(&self) -> Duration {
        Duration::from_secs(self.workflow_data_ttl_secs)
    }

    /// Reject TTLs above [`MAX_TTL`].
    pub fn validate(&self) -> Result<()> {
        let ttls = [
            ("project_data_ttl_secs", self.project_data_ttl_secs),
            ("content_base_data_ttl_secs", self.content_base_data_ttl_secs),
            ("team_data_ttl_secs", self.team_data_ttl_secs),
            ("guardrails_data_ttl_secs", self.guardrails_data_ttl_secs),
            ("inline_agent_config_ttl_secs", self.inline_agent_config_ttl_secs),
            ("instructions_data_ttl_secs", self.instructions_data_ttl_secs),
            ("agent_data_ttl_secs", self.agent_data_ttl_secs),
            ("workflow_data_ttl_secs", self.workflow_data_ttl_secs),
        ];

        for (name, secs) in ttls {
            if secs > MAX_TTL.as_secs() {
                return Err(RouterCacheError::Configuration(format!(
                    "cache.{} = {} exceeds the maximum of {} seconds",
                    name,
                    secs,
                    MAX_TTL.as_secs()
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventSettings {
    pub worker_threads: usize,
    pub shutdown_grace_secs: u64,
    /// Subject prefix of the NATS event relay
    pub subject_prefix: String,
}

impl Default for EventSettings {
    fn default() -> Self {
        let bus = EventBusConfig::default();
        Self {
            worker_threads: bus.worker_threads,
            shutdown_grace_secs: bus.shutdown_grace.as_secs(),
            subject_prefix: crate::engine::relay::EVENT_SUBJECT_PREFIX.to_string(),
        }
    }
}

impl EventSettings {
    pub fn bus_config(&self) -> EventBusConfig {
        EventBusConfig {
            worker_threads: self.worker_threads,
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreGenerationSettings {
    pub slow_threshold_ms: u64,
}

impl Default for PreGenerationSettings {
    fn default() -> Self {
        Self {
            slow_threshold_ms: crate::engine::pre_generation::DEFAULT_SLOW_THRESHOLD.as_millis()
                as u64,
        }
    }
}

impl PreGenerationSettings {
    pub fn slow_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_threshold_ms)
    }
}

impl Settings {
    /// Load settings from an optional file plus `ROUTER_CACHE__*` variables.
    pub fn load(path: Option<&str>) -> Result<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    fn load_with_prefix(path: Option<&str>, env_prefix: &str) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(false));
        }

        let settings = builder
            .add_source(Environment::with_prefix(env_prefix).separator("__"))
            .build()?
            .try_deserialize::<Settings>()?;
        settings.cache.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_constants() {
        let settings = Settings::default();
        assert_eq!(settings.store.backend, StoreBackend::Memory);
        assert_eq!(settings.cache.ttls(), CacheTtls::default());
        assert_eq!(settings.cache.workflow_ttl(), Duration::from_secs(600));
        assert_eq!(settings.events.worker_threads, 5);
        assert_eq!(settings.pre_generation.slow_threshold(), Duration::from_secs(5));
        assert_eq!(settings.log_level, "info");
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("router-cache-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            r#"
log_level = "debug"

[store]
backend = "nats"
bucket = "cache_test"

[cache]
team_data_ttl_secs = 60
"#,
        )
        .unwrap();

        let settings =
            Settings::load_with_prefix(path.to_str(), "ROUTER_CACHE_FILE_TEST").unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(settings.store.backend, StoreBackend::Nats);
        assert_eq!(settings.store.bucket, "cache_test");
        assert_eq!(settings.cache.ttls().team, Duration::from_secs(60));
        assert_eq!(settings.cache.ttls().data, PROJECT_DATA_TTL);
        assert_eq!(settings.log_level, "debug");
    }

    #[test]
    fn test_environment_overrides() {
        std::env::set_var("ROUTER_CACHE_ENV_TEST__EVENTS__WORKER_THREADS", "3");
        std::env::set_var("ROUTER_CACHE_ENV_TEST__STORE__NATS_URL", "nats://cache:4222");

        let settings = Settings::load_with_prefix(None, "ROUTER_CACHE_ENV_TEST").unwrap();
        assert_eq!(settings.events.worker_threads, 3);
        assert_eq!(settings.store.nats_url, "nats://cache:4222");

        std::env::remove_var("ROUTER_CACHE_ENV_TEST__EVENTS__WORKER_THREADS");
        std::env::remove_var("ROUTER_CACHE_ENV_TEST__STORE__NATS_URL");
    }

    #[test]
    fn test_out_of_range_ttl_is_rejected() {
        // Ten years
        std::env::set_var("ROUTER_CACHE_TTL_TEST__CACHE__TEAM_DATA_TTL_SECS", "315360000");

        let err = Settings::load_with_prefix(None, "ROUTER_CACHE_TTL_TEST").unwrap_err();
        std::env::remove_var("ROUTER_CACHE_TTL_TEST__CACHE__TEAM_DATA_TTL_SECS");

        assert!(matches!(err, RouterCacheError::Configuration(ref m) if m.contains("team_data_ttl_secs")));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let settings =
            Settings::load_with_prefix(Some("/nonexistent/router-cache"), "ROUTER_CACHE_NONE_TEST")
                .unwrap();
        assert_eq!(settings.store.backend, StoreBackend::Memory);
    }
}
