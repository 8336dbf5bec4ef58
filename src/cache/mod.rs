//! TTL cache keyed by semantic fingerprints
//!
//! The store is sharded so that writers to unrelated keys do not contend,
//! and each shard is an `RwLock` so readers never block each other.
//! `clear()` bumps a generation counter before touching any shard: every
//! entry written under an older generation is invisible from that instant
//! on, so a concurrent reader sees either the full pre-clear store or an
//! empty one, never a half-cleared mix.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

const SHARD_COUNT: usize = 16;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    generation: u64,
}

/// Process-wide cache. Cloned values are returned on hit.
pub struct CacheStore<V> {
    shards: Vec<RwLock<HashMap<String, CacheEntry<V>>>>,
    generation: AtomicU64,
    default_ttl: Duration,
}

impl<V: Clone + Send + Sync> CacheStore<V> {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
            generation: AtomicU64::new(0),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn shard(&self, key: &str) -> &RwLock<HashMap<String, CacheEntry<V>>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        let generation = self.generation.load(Ordering::Acquire);
        let shard = self.shard(key).read().await;
        shard
            .get(key)
            .filter(|entry| entry.generation == generation && entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone())
    }

    /// Insert with an explicit TTL, or the store default when `None`.
    pub async fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let key = key.into();
        let ttl = ttl.unwrap_or(self.default_ttl);
        let mut shard = self.shard(&key).write().await;
        let generation = self.generation.load(Ordering::Acquire);
        let now = Instant::now();

        // Opportunistic eviction of stale entries in this shard.
        shard.retain(|_, entry| entry.generation == generation && entry.expires_at > now);
        shard.insert(
            key,
            CacheEntry {
                value,
                expires_at: now + ttl,
                generation,
            },
        );
    }

    /// Drop every entry. Safe to call repeatedly.
    pub async fn clear(&self) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        for shard in &self.shards {
            shard.write().await.retain(|_, entry| entry.generation >= generation);
        }
        debug!(generation, "Cache cleared");
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let generation = self.generation.load(Ordering::Acquire);
        let now = Instant::now();
        let mut total = 0;
        for shard in &self.shards {
            total += shard
                .read()
                .await
                .values()
                .filter(|entry| entry.generation == generation && entry.expires_at > now)
                .count();
        }
        total
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Deterministic cache key for `(namespace, args)`.
///
/// Object keys are sorted, string values are lowercased with whitespace
/// collapsed, null-valued fields are dropped and integral floats are written
/// as integers, so semantically identical calls always collide.
pub fn fingerprint(namespace: &str, args: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_text(namespace).as_bytes());
    hasher.update([0u8]);

    if write_canonical(args, &mut HashWriter(&mut hasher)).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn write_canonical<W: Write>(value: &Value, out: &mut W) -> io::Result<()> {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, &Value)> = map
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (normalize_text(k), v))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));

            out.write_all(b"{")?;
            for (i, (key, v)) in entries.iter().enumerate() {
                if i > 0 {
                    out.write_all(b",")?;
                }
                serde_json::to_writer(&mut *out, key)?;
                out.write_all(b":")?;
                write_canonical(v, out)?;
            }
            out.write_all(b"}")
        }
        Value::Array(items) => {
            out.write_all(b"[")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.write_all(b",")?;
                }
                write_canonical(item, out)?;
            }
            out.write_all(b"]")
        }
        Value::String(s) => Ok(serde_json::to_writer(&mut *out, &normalize_text(s))?),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                write!(out, "{}", f as i64)
            }
            _ => Ok(serde_json::to_writer(&mut *out, n)?),
        },
        other => Ok(serde_json::to_writer(&mut *out, other)?),
    }
}

/// Adapter to allow writing into a digest via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_fingerprint_ignores_key_order_case_and_whitespace() {
        let a = fingerprint("fund_lookup", &json!({"name": "SBI  Bluechip", "limit": 5}));
        let b = fingerprint("Fund_Lookup", &json!({"limit": 5.0, "name": " sbi bluechip "}));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_distinguishes_tools_and_values() {
        let args = json!({"symbol": "TCS"});
        assert_ne!(fingerprint("stock_quote", &args), fingerprint("fund_lookup", &args));
        assert_ne!(
            fingerprint("stock_quote", &args),
            fingerprint("stock_quote", &json!({"symbol": "INFY"}))
        );
        assert_eq!(
            fingerprint("market_overview", &json!({"extra": null})),
            fingerprint("market_overview", &json!({}))
        );
    }

    #[test]
    fn test_explicit_ttl_overrides_default() {
        let cache: CacheStore<u32> = CacheStore::new(Duration::from_secs(60));
        assert_eq!(cache.default_ttl(), Duration::from_secs(60));
        tokio_test::block_on(async {
            cache.set("zero", 1, Some(Duration::ZERO)).await;
            assert!(cache.get("zero").await.is_none());
            cache.set("default", 2, None).await;
            assert_eq!(cache.get("default").await, Some(2));
        });
    }

    #[tokio::test]
    async fn test_get_set_and_miss() {
        let cache: CacheStore<String> = CacheStore::new(Duration::from_secs(60));
        assert!(cache.get("k").await.is_none());
        cache.set("k", "v".to_string(), None).await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache: CacheStore<u32> = CacheStore::new(Duration::from_secs(60));
        cache.set("short", 1, Some(Duration::from_secs(5))).await;
        cache.set("long", 2, None).await;

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cache.get("short").await.is_none());
        assert_eq!(cache.get("long").await, Some(2));
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let cache: CacheStore<u32> = CacheStore::new(Duration::from_secs(60));
        for i in 0..40 {
            cache.set(format!("key-{}", i), i, None).await;
        }
        cache.clear().await;
        assert!(cache.is_empty().await);
        cache.clear().await;
        assert!(cache.is_empty().await);

        cache.set("after", 7, None).await;
        assert_eq!(cache.get("after").await, Some(7));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_reader_never_sees_partial_clear() {
        let cache: Arc<CacheStore<u32>> = Arc::new(CacheStore::new(Duration::from_secs(60)));
        for i in 0..64 {
            cache.set(format!("key-{}", i), i, None).await;
        }

        let reader = {
            let cache = cache.clone();
            tokio::spawn(async move {
                // Once any key is gone, every key must be gone.
                let mut seen_empty = false;
                for _ in 0..200 {
                    for i in 0..64 {
                        let hit = cache.get(&format!("key-{}", i)).await.is_some();
                        if seen_empty {
                            assert!(!hit);
                        } else if !hit {
                            seen_empty = true;
                        }
                    }
                }
            })
        };

        cache.clear().await;
        reader.await.unwrap();
    }
}
