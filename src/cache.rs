//! Two-tier translation cache.
//!
//! Keys are blake3 fingerprints of the trimmed, lower-cased text plus the
//! language pair. The optional shared tier (Redis) is consulted first and
//! expires entries on its own; the local tier is a bounded FIFO map that is
//! filled by every successful store.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::error::{Result, SubtransError};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(text: &str, source_lang: &str, target_lang: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(normalize(text).as_bytes());
        hasher.update(b"|");
        hasher.update(source_lang.as_bytes());
        hasher.update(b"|");
        hasher.update(target_lang.as_bytes());
        Self(hasher.finalize().to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Remote key-value store used as the authoritative tier
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SharedCacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
}

/// Redis-backed shared tier. Keys are `prefix + fingerprint`.
pub struct RedisCacheStore {
    client: redis::Client,
    key_prefix: String,
    connection: OnceCell<redis::aio::MultiplexedConnection>,
}

impl RedisCacheStore {
    pub fn new(url: &str, key_prefix: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            key_prefix: key_prefix.to_string(),
            connection: OnceCell::new(),
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        let conn = self
            .connection
            .get_or_try_init(|| self.client.get_multiplexed_async_connection())
            .await?;
        Ok(conn.clone())
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

#[async_trait]
impl SharedCacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        let value: Option<String> = redis::cmd("GET")
            .arg(self.namespaced(key))
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = redis::cmd("SETEX")
            .arg(self.namespaced(key))
            .arg(ttl.as_secs().max(1))
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct LocalEntry {
    value: String,
    inserted_at: Instant,
}

/// Bounded map evicting in insertion order
#[derive(Debug)]
struct LocalCache {
    entries: HashMap<CacheKey, LocalEntry>,
    order: VecDeque<CacheKey>,
    capacity: usize,
}

impl LocalCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn get(&self, key: &CacheKey) -> Option<String> {
        self.entries.get(key).map(|e| e.value.clone())
    }

    fn insert(&mut self, key: CacheKey, value: String) {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.value = value;
            return;
        }

        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                if let Some(evicted) = self.entries.remove(&oldest) {
                    debug!(
                        "Evicted cache entry {} (age {:?})",
                        oldest.as_str(),
                        evicted.inserted_at.elapsed()
                    );
                }
            }
        }

        self.order.push_back(key.clone());
        self.entries.insert(
            key,
            LocalEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }
}

pub struct TranslationCache {
    local: Mutex<LocalCache>,
    shared: Option<Arc<dyn SharedCacheStore>>,
    ttl: Duration,
    shared_timeout: Duration,
    shared_cooldown: Duration,
    /// Shared tier is skipped until this instant after a failure
    shared_paused_until: Mutex<Option<tokio::time::Instant>>,
}

impl TranslationCache {
    pub fn new(capacity: usize, ttl: Duration, shared: Option<Arc<dyn SharedCacheStore>>) -> Self {
        let defaults = CacheConfig::default();
        Self {
            local: Mutex::new(LocalCache::new(capacity)),
            shared,
            ttl,
            shared_timeout: defaults.timeout(),
            shared_cooldown: defaults.cooldown(),
            shared_paused_until: Mutex::new(None),
        }
    }

    /// Per-call deadline for the shared tier and how long to skip it after a failure
    pub fn with_shared_limits(mut self, timeout: Duration, cooldown: Duration) -> Self {
        self.shared_timeout = timeout;
        self.shared_cooldown = cooldown;
        self
    }

    /// Local tier only
    pub fn in_memory(capacity: usize) -> Self {
        Self::new(capacity, Duration::ZERO, None)
    }

    /// Build from configuration, connecting the Redis tier when a URL is set
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        let shared = match &config.redis_url {
            Some(url) => {
                let store = RedisCacheStore::new(url, &config.key_prefix)?;
                Some(Arc::new(store) as Arc<dyn SharedCacheStore>)
            }
            None => None,
        };
        Ok(Self::new(config.max_entries, Duration::from_secs(config.ttl_secs), shared)
            .with_shared_limits(config.timeout(), config.cooldown()))
    }

    fn local(&self) -> MutexGuard<'_, LocalCache> {
        self.local.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Shared tier, unless it is cooling down after a failure
    fn available_shared(&self) -> Option<&Arc<dyn SharedCacheStore>> {
        let shared = self.shared.as_ref()?;
        let mut paused = self
            .shared_paused_until
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match *paused {
            Some(until) if tokio::time::Instant::now() < until => None,
            Some(_) => {
                *paused = None;
                Some(shared)
            }
            None => Some(shared),
        }
    }

    fn pause_shared(&self) {
        let until = tokio::time::Instant::now() + self.shared_cooldown;
        *self
            .shared_paused_until
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(until);
    }

    /// Run one shared tier call under the deadline
    async fn shared_call<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        let result = match tokio::time::timeout(self.shared_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(SubtransError::Cache(format!(
                "shared tier did not answer within {:?}",
                self.shared_timeout
            ))),
        };
        if result.is_err() {
            self.pause_shared();
        }
        result
    }

    pub async fn lookup(&self, text: &str, source_lang: &str, target_lang: &str) -> Option<String> {
        let key = CacheKey::new(text, source_lang, target_lang);

        if let Some(shared) = self.available_shared() {
            match self.shared_call(shared.get(key.as_str())).await {
                Ok(Some(value)) => {
                    self.local().insert(key, value.clone());
                    return Some(value);
                }
                Ok(None) => {}
                Err(e) => warn!("Shared cache lookup failed, skipping it for {:?}: {}", self.shared_cooldown, e),
            }
        }

        self.local().get(&key)
    }

    /// Store in both tiers. Never fails: tier errors are logged.
    pub async fn store(&self, text: &str, source_lang: &str, target_lang: &str, translation: &str) {
        let key = CacheKey::new(text, source_lang, target_lang);

        if let Some(shared) = self.available_shared() {
            if let Err(e) = self.shared_call(shared.set(key.as_str(), translation, self.ttl)).await {
                warn!("Failed to save translation to shared cache: {}", e);
            }
        }

        self.local().insert(key, translation.to_string());
    }

    /// Number of entries in the local tier
    pub fn len(&self) -> usize {
        self.local().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
