// [citadel-core/src/datastore/remote.rs]
/*!
 * =================================================================
 * APARATO: REDIS-BACKED DATASTORE (ESTRATO L1)
 * RESPONSABILIDAD: MAPEAR EL CONTRATO DataStore A COMANDOS NATIVOS
 *
 * Cada operacion transitoria que falla se trata como "sin datos"
 * (spec.md §4.1, "Failure"): nunca se propaga el error al llamador, se
 * registra con `tracing::warn!` y se responde con el valor neutro
 * (`None`, `0`, lista vacia, `false`).
 * =================================================================
 */

use async_trait::async_trait;
use deadpool_redis::{redis::AsyncCommands, Config, Pool, Runtime};
use tracing::warn;

use super::{BurstinessPipelineResult, DataStore, ScoreBound, Value};

pub struct RedisDataStore {
    pool: Pool,
}

impl RedisDataStore {
    pub fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let config = Config::from_url(redis_url);
        let pool = config.create_pool(Some(Runtime::Tokio1))?;
        Ok(Self { pool })
    }

    async fn connection(&self) -> Option<deadpool_redis::Connection> {
        match self.pool.get().await {
            Ok(conn) => Some(conn),
            Err(error) => {
                warn!(%error, "citadel datastore: redis pool exhausted or unreachable");
                None
            }
        }
    }
}

fn score_bound_literal(bound: ScoreBound) -> String {
    match bound {
        ScoreBound::NegInf => "-inf".to_string(),
        ScoreBound::PosInf => "+inf".to_string(),
        ScoreBound::Value(v) => format!("{v}"),
    }
}

#[async_trait]
impl DataStore for RedisDataStore {
    async fn get(&self, key: &str) -> Option<Value> {
        let mut conn = self.connection().await?;
        match conn.get::<_, Option<String>>(key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).ok(),
            Ok(None) => None,
            Err(error) => {
                warn!(%error, key, "citadel datastore: GET failed");
                None
            }
        }
    }

    async fn set(&self, key: &str, value: Value, ttl_secs: u64) -> bool {
        let Some(mut conn) = self.connection().await else { return false };
        let Ok(serialized) = serde_json::to_string(&value) else { return false };

        let result: Result<(), _> = if ttl_secs > 0 {
            conn.set_ex(key, serialized, ttl_secs).await
        } else {
            deadpool_redis::redis::cmd("SET")
                .arg(key)
                .arg(serialized)
                .arg("KEEPTTL")
                .query_async(&mut conn)
                .await
        };

        if let Err(error) = result {
            warn!(%error, key, "citadel datastore: SET failed");
            return false;
        }
        true
    }

    async fn delete(&self, key: &str) -> bool {
        let Some(mut conn) = self.connection().await else { return false };
        match conn.del::<_, i64>(key).await {
            Ok(count) => count > 0,
            Err(error) => {
                warn!(%error, key, "citadel datastore: DEL failed");
                false
            }
        }
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> bool {
        let Some(mut conn) = self.connection().await else { return false };
        match conn.zadd::<_, _, _, i64>(key, member, score).await {
            Ok(added) => added > 0,
            Err(error) => {
                warn!(%error, key, "citadel datastore: ZADD failed");
                false
            }
        }
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Vec<String> {
        let Some(mut conn) = self.connection().await else { return Vec::new() };
        conn.zrange(key, start as isize, stop as isize).await.unwrap_or_else(|error| {
            warn!(%error, key, "citadel datastore: ZRANGE failed");
            Vec::new()
        })
    }

    async fn zrangebyscore(&self, key: &str, min: ScoreBound, max: ScoreBound) -> Vec<String> {
        let Some(mut conn) = self.connection().await else { return Vec::new() };
        conn.zrangebyscore(key, score_bound_literal(min), score_bound_literal(max))
            .await
            .unwrap_or_else(|error| {
                warn!(%error, key, "citadel datastore: ZRANGEBYSCORE failed");
                Vec::new()
            })
    }

    async fn zcard(&self, key: &str) -> i64 {
        let Some(mut conn) = self.connection().await else { return 0 };
        conn.zcard(key).await.unwrap_or_else(|error| {
            warn!(%error, key, "citadel datastore: ZCARD failed");
            0
        })
    }

    async fn zremrangebyscore(&self, key: &str, min: ScoreBound, max: ScoreBound) -> i64 {
        let Some(mut conn) = self.connection().await else { return 0 };
        conn.zrembyscore(key, score_bound_literal(min), score_bound_literal(max))
            .await
            .unwrap_or_else(|error| {
                warn!(%error, key, "citadel datastore: ZREMRANGEBYSCORE failed");
                0
            })
    }

    async fn zremrangebyrank(&self, key: &str, start: i64, stop: i64) -> i64 {
        let Some(mut conn) = self.connection().await else { return 0 };
        conn.zremrangebyrank(key, start as isize, stop as isize)
            .await
            .unwrap_or_else(|error| {
                warn!(%error, key, "citadel datastore: ZREMRANGEBYRANK failed");
                0
            })
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> bool {
        if ttl_secs == 0 {
            // Zero means "keep whatever expiry the key already has" -- a
            // no-op, but report presence so callers can tell the key exists.
            let Some(mut conn) = self.connection().await else { return false };
            return conn.exists(key).await.unwrap_or(false);
        }
        let Some(mut conn) = self.connection().await else { return false };
        conn.expire(key, ttl_secs as i64).await.unwrap_or_else(|error| {
            warn!(%error, key, "citadel datastore: EXPIRE failed");
            false
        })
    }

    async fn burstiness_pipeline(
        &self,
        key: &str,
        now_ms: i64,
        cutoff_ms: i64,
        expire_secs: u64,
    ) -> BurstinessPipelineResult {
        let Some(mut conn) = self.connection().await else {
            return BurstinessPipelineResult { count: 0, recent: Vec::new() };
        };

        // Redis MULTI/EXEC gives us exactly the atomicity spec.md §4.1
        // requires for this specific five-operation sequence, without
        // needing a generic closure-based pipeline API on the trait.
        let result: Result<(i64, i64, bool, i64, Vec<String>), _> =
            deadpool_redis::redis::pipe()
                .atomic()
                .zrembyscore(key, "-inf", cutoff_ms as f64)
                .zadd(key, now_ms.to_string(), now_ms as f64)
                .expire(key, expire_secs as i64)
                .zcard(key)
                .zrange(key, -5, -1)
                .query_async(&mut conn)
                .await;

        match result {
            Ok((_, _, _, count, recent)) => BurstinessPipelineResult { count, recent },
            Err(error) => {
                warn!(%error, key, "citadel datastore: burstiness pipeline failed");
                BurstinessPipelineResult { count: 0, recent: Vec::new() }
            }
        }
    }
}
