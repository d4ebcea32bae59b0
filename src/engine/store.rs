// Key-value store abstraction for the project cache
// This defines the interface the cache service uses to talk to Redis-like stores

//! # Key-Value Store Layer
//!
//! The cache service never talks to a concrete store. It goes through the
//! [`KeyValueStore`] trait, which is deliberately tiny:
//!
//! - `get(key)` returns the stored JSON document or `None`
//! - `set(key, value, ttl)` stores a document that expires after `ttl`
//! - `delete(key)` removes one key
//! - `delete_pattern(glob)` removes every key matching a glob and reports how many
//!
//! There are no transactions and no multi-key atomicity: writes are
//! last-write-wins per key. A store that cannot be reached returns an error;
//! the cache service does not hide that from its callers.
//!
//! ## Implementations
//!
//! - [`InMemoryStore`]: process-local, for development and tests
//! - [`crate::engine::nats_store::NatsKvStore`]: NATS JetStream key-value bucket
//!
//! ## Glob Patterns
//!
//! Pattern deletion understands the Redis glob subset used by the cache:
//! `*` (any run of characters), `?` (one character) and `[...]` classes.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use regex::Regex;
use serde_json::Value;

use crate::{Result, RouterCacheError};

/// Storage trait for cached JSON documents.
///
/// Implementations must be thread-safe; the cache service shares one store
/// between the read path and every observer task.
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get a value by key.
    ///
    /// - `Ok(Some(value))`: key present and not expired
    /// - `Ok(None)`: key absent or expired
    /// - `Err(error)`: the store could not be reached
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Store a value that expires after `ttl`.
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<()>;

    /// Delete a key. Returns whether a live key was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Delete every key matching a glob pattern. Returns the number removed.
    async fn delete_pattern(&self, pattern: &str) -> Result<u64>;
}

/// Compile a Redis-style glob into an anchored regex.
pub fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');

    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            '[' => {
                // Copy the class through, translating a leading `^`/`!` negation
                expr.push('[');
                if matches!(chars.peek(), Some('^') | Some('!')) {
                    chars.next();
                    expr.push('^');
                }
                let mut closed = false;
                for class_char in chars.by_ref() {
                    if class_char == ']' {
                        closed = true;
                        break;
                    }
                    if class_char == '\\' || class_char == '[' {
                        expr.push('\\');
                    }
                    expr.push(class_char);
                }
                if !closed {
                    return Err(RouterCacheError::Configuration(format!(
                        "Unterminated character class in pattern: {}",
                        pattern
                    )));
                }
                expr.push(']');
            }
            '\\' => {
                if let Some(escaped) = chars.next() {
                    expr.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }

    expr.push('$');
    Regex::new(&expr).map_err(|e| {
        RouterCacheError::Configuration(format!("Invalid glob pattern {}: {}", pattern, e))
    })
}

#[derive(Debug, Clone)]
struct StoredEntry {
    value: Value,
    expires_at: Instant,
}

impl StoredEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-memory store for development and testing.
///
/// Expiry is lazy: an expired entry is dropped the next time it is read or
/// matched by a pattern. Not shared across processes.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: DashMap<String, StoredEntry>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining time to live of a live key.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.expires_at.saturating_duration_since(now))
    }

    /// Live keys, sorted. Mostly useful in tests and the admin CLI.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries
                .remove_if(key, |_, entry| entry.is_expired(Instant::now()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        let expires_at = Instant::now().checked_add(ttl).ok_or_else(|| {
            RouterCacheError::Configuration(format!("TTL {:?} for {} is out of range", ttl, key))
        })?;
        self.entries
            .insert(key.to_string(), StoredEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .map_or(false, |(_, entry)| !entry.is_expired(now)))
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64> {
        let matcher = glob_to_regex(pattern)?;
        let now = Instant::now();
        let mut removed = 0u64;

        self.entries.retain(|key, entry| {
            if !matcher.is_match(key) {
                return true;
            }
            if !entry.is_expired(now) {
                removed += 1;
            }
            false
        });

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_glob_translation() {
        let star = glob_to_regex("project:p1:team:*").unwrap();
        assert!(star.is_match("project:p1:team:BedrockBackend"));
        assert!(star.is_match("project:p1:team:"));
        assert!(!star.is_match("project:p1:data"));
        assert!(!star.is_match("project:p11:team:OpenAIBackend"));

        let question = glob_to_regex("workflow:?:state").unwrap();
        assert!(question.is_match("workflow:7:state"));
        assert!(!question.is_match("workflow:77:state"));

        let class = glob_to_regex("key:[ab]").unwrap();
        assert!(class.is_match("key:a"));
        assert!(!class.is_match("key:c"));

        // Regex metacharacters in keys are literal
        let dotted = glob_to_regex("a.b*").unwrap();
        assert!(dotted.is_match("a.bc"));
        assert!(!dotted.is_match("axbc"));

        assert!(glob_to_regex("key:[ab").is_err());
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = InMemoryStore::new();
        store
            .set("k", json!({"a": 1}), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(store.get("k").await.unwrap(), Some(json!({"a": 1})));
        assert!(store.ttl("k").unwrap() <= Duration::from_secs(60));

        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_entries_are_misses() {
        let store = InMemoryStore::new();
        store.set("k", json!(1), Duration::ZERO).await.unwrap();

        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_ttl_is_rejected() {
        let store = InMemoryStore::new();
        let err = store
            .set("k", json!(1), Duration::from_secs(u64::MAX))
            .await
            .unwrap_err();

        assert!(matches!(err, RouterCacheError::Configuration(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_delete_pattern_counts_live_matches() {
        let store = InMemoryStore::new();
        let ttl = Duration::from_secs(60);
        store.set("project:p1:team:A", json!([]), ttl).await.unwrap();
        store.set("project:p1:team:B", json!([]), ttl).await.unwrap();
        store.set("project:p1:data", json!({}), ttl).await.unwrap();
        store.set("project:p2:team:A", json!([]), ttl).await.unwrap();

        let removed = store.delete_pattern("project:p1:team:*").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(
            store.keys(),
            vec!["project:p1:data".to_string(), "project:p2:team:A".to_string()]
        );
    }
}
