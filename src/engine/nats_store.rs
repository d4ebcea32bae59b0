// NATS key-value store implementation for the project cache
// This provides a shared, networked cache using a NATS JetStream KV bucket

//! # NATS Key-Value Store
//!
//! Stores cache entries in a JetStream key-value bucket so that every router
//! process reads and refreshes the same entries.
//!
//! ## Key Mapping
//!
//! NATS keys may only contain `[-/_=.a-zA-Z0-9]`, so the `:` separators of the
//! cache key space are stored as `.`: `project:p1:team:BedrockBackend` becomes
//! `project.p1.team.BedrockBackend`. Glob patterns are mapped the same way
//! before matching, so pattern deletion works on the original key space.
//!
//! ## Per-Key TTL
//!
//! A bucket only has one `max_age`. Each value is therefore wrapped in an
//! envelope carrying its own `expires_at`; reads treat an expired envelope as
//! a miss and purge it. The bucket `max_age` is set to the longest TTL in use
//! so that abandoned keys are eventually dropped by the server too.

use std::time::Duration;

use async_nats::jetstream::{self, kv};
use async_nats::Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::store::{glob_to_regex, KeyValueStore};
use crate::{Result, RouterCacheError};

/// Configuration for the NATS KV store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsKvStoreConfig {
    /// NATS server URL
    pub url: String,
    pub connection_timeout: Duration,
    pub reconnect_attempts: usize,
    pub client_name: Option<String>,

    /// Bucket holding the cache entries
    pub bucket: String,
    /// Upper bound for any entry's lifetime
    pub max_age: Duration,
    pub replicas: usize,
    pub max_bytes: Option<i64>,
}

impl Default for NatsKvStoreConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            connection_timeout: Duration::from_secs(10),
            reconnect_attempts: 5,
            client_name: Some("router-cache".to_string()),
            bucket: "router_cache".to_string(),
            max_age: Duration::from_secs(60 * 60 * 24), // 24 hours
            replicas: 1,
            max_bytes: Some(256 * 1024 * 1024), // 256MB
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    value: Value,
    expires_at: DateTime<Utc>,
}

/// Cache store backed by a NATS JetStream key-value bucket
pub struct NatsKvStore {
    client: Client,
    kv: kv::Store,
    config: NatsKvStoreConfig,
}

impl NatsKvStore {
    /// Connect to NATS and open (or create) the cache bucket
    pub async fn connect(config: NatsKvStoreConfig) -> Result<Self> {
        info!("Connecting to NATS server at {}", config.url);
        let client = Self::connect_with_retry(&config).await?;

        let js = jetstream::new(client.clone());
        let kv = Self::ensure_kv_bucket(&js, &config).await?;

        info!(bucket = %config.bucket, "NATS cache store initialized");
        Ok(Self { client, kv, config })
    }

    /// Underlying NATS client, shared with the event relay
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn config(&self) -> &NatsKvStoreConfig {
        &self.config
    }

    /// Connect with linear back-off between attempts
    pub(crate) async fn connect_with_retry(config: &NatsKvStoreConfig) -> Result<Client> {
        let attempts = config.reconnect_attempts.max(1);
        for attempt in 1..=attempts {
            let mut connect_options =
                async_nats::ConnectOptions::new().connection_timeout(config.connection_timeout);

            if let Some(client_name) = &config.client_name {
                connect_options = connect_options.name(client_name);
            }

            match connect_options.connect(&config.url).await {
                Ok(client) => {
                    info!("Connected to NATS server after {} attempt(s)", attempt);
                    return Ok(client);
                }
                Err(e) if attempt < attempts => {
                    warn!("NATS connection attempt {} failed: {}", attempt, e);
                    tokio::time::sleep(Duration::from_millis(500 * attempt as u64)).await;
                }
                Err(e) => {
                    error!("Failed to connect to NATS after {} attempts: {}", attempt, e);
                    return Err(RouterCacheError::Store(anyhow::anyhow!(
                        "Failed to connect to NATS: {}",
                        e
                    )));
                }
            }
        }

        Err(RouterCacheError::Store(anyhow::anyhow!(
            "Failed to connect to NATS server"
        )))
    }

    /// Ensure the KV bucket exists
    async fn ensure_kv_bucket(
        js: &jetstream::Context,
        config: &NatsKvStoreConfig,
    ) -> Result<kv::Store> {
        if let Ok(kv) = js.get_key_value(&config.bucket).await {
            debug!("Using existing KV bucket: {}", config.bucket);
            return Ok(kv);
        }

        info!("Creating new KV bucket: {}", config.bucket);
        let kv_config = kv::Config {
            bucket: config.bucket.clone(),
            history: 1,
            max_age: config.max_age,
            storage: jetstream::stream::StorageType::Memory,
            num_replicas: config.replicas,
            max_bytes: config.max_bytes.unwrap_or(-1),
            description: "Router project configuration cache".to_string(),
            ..Default::default()
        };

        js.create_key_value(kv_config).await.map_err(|e| {
            error!("Failed to create KV bucket {}: {}", config.bucket, e);
            RouterCacheError::Store(anyhow::anyhow!(
                "Failed to create KV bucket {}: {}",
                config.bucket,
                e
            ))
        })
    }

    /// Map a cache key (or glob) onto the NATS key alphabet
    pub fn encode_key(key: &str) -> Result<String> {
        let encoded = key.replace(':', ".");
        let valid = encoded
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '/' | '_' | '=' | '.'));
        if !valid || encoded.is_empty() || encoded.starts_with('.') || encoded.ends_with('.') {
            return Err(RouterCacheError::Configuration(format!(
                "Key cannot be stored in NATS KV: {}",
                key
            )));
        }
        Ok(encoded)
    }

    fn encode_pattern(pattern: &str) -> String {
        pattern.replace(':', ".")
    }

    async fn purge_expired(&self, nats_key: &str) {
        if let Err(e) = self.kv.purge(nats_key).await {
            debug!("Failed to purge expired key {}: {}", nats_key, e);
        }
    }
}

#[async_trait::async_trait]
impl KeyValueStore for NatsKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let nats_key = Self::encode_key(key)?;

        let bytes = self.kv.get(&nats_key).await.map_err(|e| {
            RouterCacheError::Store(anyhow::anyhow!("Failed to get key {}: {}", key, e))
        })?;

        let Some(bytes) = bytes else {
            return Ok(None);
        };

        let envelope: Envelope = serde_json::from_slice(&bytes)?;
        if envelope.expires_at <= Utc::now() {
            self.purge_expired(&nats_key).await;
            return Ok(None);
        }

        Ok(Some(envelope.value))
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        let nats_key = Self::encode_key(key)?;
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| {
            RouterCacheError::Configuration(format!("TTL out of range for {}: {}", key, e))
        })?;

        let envelope = Envelope {
            value,
            expires_at: Utc::now() + ttl,
        };
        let payload = serde_json::to_vec(&envelope)?;

        self.kv
            .put(&nats_key, Bytes::from(payload))
            .await
            .map_err(|e| {
                RouterCacheError::Store(anyhow::anyhow!("Failed to set key {}: {}", key, e))
            })?;

        debug!("Stored key {} as {}", key, nats_key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let existed = self.get(key).await?.is_some();
        let nats_key = Self::encode_key(key)?;

        self.kv.delete(&nats_key).await.map_err(|e| {
            RouterCacheError::Store(anyhow::anyhow!("Failed to delete key {}: {}", key, e))
        })?;

        Ok(existed)
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64> {
        let matcher = glob_to_regex(&Self::encode_pattern(pattern))?;

        let mut keys = self.kv.keys().await.map_err(|e| {
            RouterCacheError::Store(anyhow::anyhow!("Failed to list keys: {}", e))
        })?;

        let mut matched = Vec::new();
        while let Some(key) = keys.next().await {
            let key = key.map_err(|e| {
                RouterCacheError::Store(anyhow::anyhow!("Failed to read key listing: {}", e))
            })?;
            if matcher.is_match(&key) {
                matched.push(key);
            }
        }

        let mut removed = 0u64;
        for key in matched {
            self.kv.delete(&key).await.map_err(|e| {
                RouterCacheError::Store(anyhow::anyhow!("Failed to delete key {}: {}", key, e))
            })?;
            removed += 1;
        }

        debug!("Deleted {} key(s) matching {}", removed, pattern);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    // Helper function to check if NATS is available
    async fn create_test_store() -> Option<NatsKvStore> {
        if async_nats::connect("nats://localhost:4222").await.is_err() {
            println!("Skipping NATS test - no server available");
            return None;
        }

        let config = NatsKvStoreConfig {
            bucket: format!("test_router_cache_{}", Uuid::new_v4().simple()),
            reconnect_attempts: 1,
            ..Default::default()
        };

        match NatsKvStore::connect(config).await {
            Ok(store) => Some(store),
            Err(e) => {
                println!("Failed to create NATS store: {}", e);
                None
            }
        }
    }

    #[test]
    fn test_key_encoding() {
        assert_eq!(
            NatsKvStore::encode_key("project:p-1:team:BedrockBackend").unwrap(),
            "project.p-1.team.BedrockBackend"
        );
        assert!(NatsKvStore::encode_key("project:p 1:data").is_err());
        assert!(NatsKvStore::encode_key("").is_err());
        assert!(NatsKvStore::encode_key("project:").is_err());
    }

    #[tokio::test]
    async fn test_nats_basic_operations() {
        let store = match create_test_store().await {
            Some(s) => s,
            None => return,
        };

        store
            .set("project:p1:data", json!({"uuid": "p1"}), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            store.get("project:p1:data").await.unwrap(),
            Some(json!({"uuid": "p1"}))
        );

        assert!(store.delete("project:p1:data").await.unwrap());
        assert_eq!(store.get("project:p1:data").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_nats_pattern_delete() {
        let store = match create_test_store().await {
            Some(s) => s,
            None => return,
        };

        let ttl = Duration::from_secs(60);
        store.set("project:p1:team:A", json!([]), ttl).await.unwrap();
        store.set("project:p1:team:B", json!([]), ttl).await.unwrap();
        store.set("project:p1:data", json!({}), ttl).await.unwrap();

        let removed = store.delete_pattern("project:p1:team:*").await.unwrap();
        assert_eq!(removed, 2);
        assert!(store.get("project:p1:data").await.unwrap().is_some());
    }
}
