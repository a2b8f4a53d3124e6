// [citadel-core/src/datastore/memory.rs]
/*!
 * =================================================================
 * APARATO: IN-MEMORY DATASTORE (ESTRATO L1)
 * RESPONSABILIDAD: BACKEND DE REFERENCIA PARA PRUEBAS E INSTANCIA UNICA
 *
 * Mapa concurrente (`dashmap`) de claves escalares mas un segundo mapa
 * de sorted sets; cada entrada lleva su propio vencimiento perezoso.
 * La atomicidad de `burstiness_pipeline` se logra tomando el mutex
 * asociado a la clave del sorted-set mientras dura la secuencia de
 * cinco operaciones, de modo que llamadas concurrentes sobre la misma
 * huella se serializan sin bloquear huellas distintas.
 * =================================================================
 */

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;

use super::{BurstinessPipelineResult, DataStore, ScoreBound, Value};

struct ScalarEntry {
    value: Value,
    expires_at: Option<Instant>,
}

struct ZSetEntry {
    /// Kept sorted ascending by `(score, member)`; small (bounded by the
    /// sliding window), so linear insert/scan is fine.
    entries: Vec<(f64, String)>,
    expires_at: Option<Instant>,
}

impl ZSetEntry {
    fn new() -> Self {
        Self { entries: Vec::new(), expires_at: None }
    }

    fn upsert(&mut self, score: f64, member: &str) -> bool {
        let existed = if let Some(pos) = self.entries.iter().position(|(_, m)| m == member) {
            self.entries.remove(pos);
            true
        } else {
            false
        };
        let insert_at = self
            .entries
            .partition_point(|(s, m)| (*s, m.as_str()) < (score, member));
        self.entries.insert(insert_at, (score, member.to_string()));
        !existed
    }
}

fn is_expired(expires_at: Option<Instant>) -> bool {
    matches!(expires_at, Some(at) if Instant::now() >= at)
}

/// Resolves redis-style (possibly negative) start/stop indices against
/// `len`, returning an inclusive `[start, stop]` usize range, or `None`
/// if the resolved range is empty.
fn resolve_index_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let len_i = len as i64;
    let normalize = |i: i64| -> i64 { if i < 0 { len_i + i } else { i } };
    let start = normalize(start).max(0);
    let stop = normalize(stop).min(len_i - 1);
    if start > stop || start >= len_i {
        None
    } else {
        Some((start as usize, stop as usize))
    }
}

#[derive(Default)]
pub struct InMemoryDataStore {
    scalars: DashMap<String, ScalarEntry>,
    zsets: DashMap<String, ZSetEntry>,
    pipeline_locks: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl InMemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, key: &str) -> Arc<AsyncMutex<()>> {
        self.pipeline_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

#[async_trait]
impl DataStore for InMemoryDataStore {
    async fn get(&self, key: &str) -> Option<Value> {
        let entry = self.scalars.get(key)?;
        if is_expired(entry.expires_at) {
            drop(entry);
            self.scalars.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    async fn set(&self, key: &str, value: Value, ttl_secs: u64) -> bool {
        let expires_at = if ttl_secs > 0 {
            Some(Instant::now() + Duration::from_secs(ttl_secs))
        } else {
            self.scalars.get(key).and_then(|e| e.expires_at)
        };
        self.scalars.insert(key.to_string(), ScalarEntry { value, expires_at });
        true
    }

    async fn delete(&self, key: &str) -> bool {
        let scalar_removed = self.scalars.remove(key).is_some();
        let zset_removed = self.zsets.remove(key).is_some();
        scalar_removed || zset_removed
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> bool {
        let mut entry = self.zsets.entry(key.to_string()).or_insert_with(ZSetEntry::new);
        if is_expired(entry.expires_at) {
            *entry = ZSetEntry::new();
        }
        entry.upsert(score, member)
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Vec<String> {
        let Some(entry) = self.zsets.get(key) else { return Vec::new() };
        if is_expired(entry.expires_at) {
            return Vec::new();
        }
        match resolve_index_range(entry.entries.len(), start, stop) {
            Some((lo, hi)) => entry.entries[lo..=hi].iter().map(|(_, m)| m.clone()).collect(),
            None => Vec::new(),
        }
    }

    async fn zrangebyscore(&self, key: &str, min: ScoreBound, max: ScoreBound) -> Vec<String> {
        let Some(entry) = self.zsets.get(key) else { return Vec::new() };
        if is_expired(entry.expires_at) {
            return Vec::new();
        }
        entry
            .entries
            .iter()
            .filter(|(score, _)| min.matches_lower(*score) && max.matches_upper(*score))
            .map(|(_, m)| m.clone())
            .collect()
    }

    async fn zcard(&self, key: &str) -> i64 {
        match self.zsets.get(key) {
            Some(entry) if !is_expired(entry.expires_at) => entry.entries.len() as i64,
            _ => 0,
        }
    }

    async fn zremrangebyscore(&self, key: &str, min: ScoreBound, max: ScoreBound) -> i64 {
        let Some(mut entry) = self.zsets.get_mut(key) else { return 0 };
        if is_expired(entry.expires_at) {
            entry.entries.clear();
            return 0;
        }
        let before = entry.entries.len();
        entry
            .entries
            .retain(|(score, _)| !(min.matches_lower(*score) && max.matches_upper(*score)));
        (before - entry.entries.len()) as i64
    }

    async fn zremrangebyrank(&self, key: &str, start: i64, stop: i64) -> i64 {
        let Some(mut entry) = self.zsets.get_mut(key) else { return 0 };
        if is_expired(entry.expires_at) {
            entry.entries.clear();
            return 0;
        }
        match resolve_index_range(entry.entries.len(), start, stop) {
            Some((lo, hi)) => {
                let removed = hi - lo + 1;
                entry.entries.drain(lo..=hi);
                removed as i64
            }
            None => 0,
        }
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> bool {
        if ttl_secs == 0 {
            return self.scalars.contains_key(key) || self.zsets.contains_key(key);
        }
        let new_expiry = Some(Instant::now() + Duration::from_secs(ttl_secs));
        if let Some(mut entry) = self.scalars.get_mut(key) {
            entry.expires_at = new_expiry;
            return true;
        }
        if let Some(mut entry) = self.zsets.get_mut(key) {
            entry.expires_at = new_expiry;
            return true;
        }
        false
    }

    async fn burstiness_pipeline(
        &self,
        key: &str,
        now_ms: i64,
        cutoff_ms: i64,
        expire_secs: u64,
    ) -> BurstinessPipelineResult {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        self.zremrangebyscore(key, ScoreBound::NegInf, ScoreBound::Value(cutoff_ms as f64))
            .await;
        self.zadd(key, now_ms as f64, &now_ms.to_string()).await;
        self.expire(key, expire_secs).await;
        let count = self.zcard(key).await;
        let recent = self.zrange(key, -5, -1).await;

        BurstinessPipelineResult { count, recent }
    }
}
