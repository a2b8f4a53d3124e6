// [citadel-core/src/datastore/mod.rs]
/*!
 * =================================================================
 * APARATO: DATASTORE CONTRACT (ESTRATO L1)
 * RESPONSABILIDAD: KV TIPADA + SORTED SETS + TTL, INDEPENDIENTE DEL BACKEND
 *
 * Dos implementaciones satisfacen este contrato de forma indistinguible
 * para el resto del nucleo: `memory::InMemoryDataStore` (para pruebas y
 * despliegues de instancia unica) y `remote::RedisDataStore` (mapea
 * cada operacion a su comando nativo de Redis).
 *
 * El contrato generico `pipeline(fn)` de spec.md §4.1 se expresa aqui
 * como un unico metodo dedicado, `burstiness_pipeline`, en vez de un
 * metodo generico sobre una clausura: un `dyn DataStore` objeto-seguro
 * no puede aceptar un parametro de tipo generico `FnOnce`, y esa es la
 * unica secuencia del nucleo que exige atomicidad de principio a fin
 * (spec.md §4.1 y §5).
 * =================================================================
 */

pub mod memory;
pub mod remote;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A value stored at a scalar key. Round-tripping `get(set(k, v)) == v`
/// must hold for every variant (`spec.md` §4.1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Double(f64),
    Integer(i64),
    Text(String),
    Map(HashMap<String, String>),
    Blob(Vec<u8>),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            Value::Integer(i) => Some(*i as f64),
            Value::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, String>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }
}

/// Literal `-inf`/`+inf` support for score-range queries (`spec.md` §4.1:
/// "zrangebyscore treats -inf/+inf literally; the range is inclusive at
/// both ends").
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreBound {
    NegInf,
    PosInf,
    Value(f64),
}

impl ScoreBound {
    fn matches_lower(self, score: f64) -> bool {
        match self {
            ScoreBound::NegInf => true,
            ScoreBound::PosInf => false,
            ScoreBound::Value(v) => score >= v,
        }
    }

    fn matches_upper(self, score: f64) -> bool {
        match self {
            ScoreBound::PosInf => true,
            ScoreBound::NegInf => false,
            ScoreBound::Value(v) => score <= v,
        }
    }
}

/// Result of the atomic burstiness sequence (`spec.md` §4.5 step 1-5).
#[derive(Debug, Clone)]
pub struct BurstinessPipelineResult {
    pub count: i64,
    pub recent: Vec<String>,
}

#[async_trait]
pub trait DataStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;
    /// `ttl_secs == 0` keeps any existing expiry untouched; a positive
    /// value resets it. Returns `true` on success.
    async fn set(&self, key: &str, value: Value, ttl_secs: u64) -> bool;
    async fn delete(&self, key: &str) -> bool;
    async fn zadd(&self, key: &str, score: f64, member: &str) -> bool;
    /// Negative indices count from the end, inclusive (`spec.md` §4.1).
    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Vec<String>;
    async fn zrangebyscore(&self, key: &str, min: ScoreBound, max: ScoreBound) -> Vec<String>;
    async fn zcard(&self, key: &str) -> i64;
    async fn zremrangebyscore(&self, key: &str, min: ScoreBound, max: ScoreBound) -> i64;
    async fn zremrangebyrank(&self, key: &str, start: i64, stop: i64) -> i64;
    async fn expire(&self, key: &str, ttl_secs: u64) -> bool;

    /// Atomically: prune scores <= `cutoff_ms`, add `(now_ms, now_ms)`,
    /// reset the key's expiry to `expire_secs`, then read back the
    /// cardinality and the five highest-scored members.
    async fn burstiness_pipeline(
        &self,
        key: &str,
        now_ms: i64,
        cutoff_ms: i64,
        expire_secs: u64,
    ) -> BurstinessPipelineResult;
}
