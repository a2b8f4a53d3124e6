// [citadel-core/src/analyzers/burstiness.rs]
/*!
 * =================================================================
 * APARATO: BURSTINESS ANALYZER (ESTRATO L3)
 * RESPONSABILIDAD: FRECUENCIA, RAFAGAS, REGULARIDAD E HISTORIAL
 *
 * Cuatro componentes se suman sin recortar (spec.md §4.5); el recorte
 * del agregado es responsabilidad del middleware. El pipeline de cinco
 * pasos (`DataStore::burstiness_pipeline`) es la unica secuencia del
 * nucleo que exige atomicidad de punta a punta.
 * =================================================================
 */

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use super::{AnalysisContext, Analyzer};
use crate::config::BurstinessConfig;
use crate::datastore::{DataStore, Value};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct HistoryRecord {
    first_violation: i64,
    last_violation: i64,
    violation_count: u64,
    max_excess: f64,
    total_excess: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PatternRecord {
    cv_history: Vec<f64>,
    detection_count: i64,
}

pub struct BurstinessAnalyzer {
    config: BurstinessConfig,
    store: Arc<dyn DataStore>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn window_ttl_secs(window_size_ms: i64) -> u64 {
    ((window_size_ms as f64) / 1000.0).ceil() as u64
}

/// `ceil(window_size_ms / 1000 * multiplier)`, per `spec.md` §4.5 step 3.
fn pipeline_expire_secs(window_size_ms: i64, multiplier: f64) -> u64 {
    (((window_size_ms as f64) / 1000.0) * multiplier).ceil().max(1.0) as u64
}

fn mean_and_stddev(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

impl BurstinessAnalyzer {
    pub fn new(config: BurstinessConfig, store: Arc<dyn DataStore>) -> Self {
        Self { config, store }
    }

    async fn load_history(&self, fingerprint: &str) -> HistoryRecord {
        let key = format!("fw:{fingerprint}:history");
        match self.store.get(&key).await {
            Some(Value::Map(map)) => HistoryRecord {
                first_violation: map.get("first_violation").and_then(|v| v.parse().ok()).unwrap_or(0),
                last_violation: map.get("last_violation").and_then(|v| v.parse().ok()).unwrap_or(0),
                violation_count: map.get("violation_count").and_then(|v| v.parse().ok()).unwrap_or(0),
                max_excess: map.get("max_excess").and_then(|v| v.parse().ok()).unwrap_or(0.0),
                total_excess: map.get("total_excess").and_then(|v| v.parse().ok()).unwrap_or(0.0),
            },
            _ => HistoryRecord::default(),
        }
    }

    async fn store_history(&self, fingerprint: &str, record: &HistoryRecord) {
        let key = format!("fw:{fingerprint}:history");
        let mut map = std::collections::HashMap::new();
        map.insert("first_violation".to_string(), record.first_violation.to_string());
        map.insert("last_violation".to_string(), record.last_violation.to_string());
        map.insert("violation_count".to_string(), record.violation_count.to_string());
        map.insert("max_excess".to_string(), record.max_excess.to_string());
        map.insert("total_excess".to_string(), record.total_excess.to_string());
        let ttl = pipeline_expire_secs(self.config.window_size_ms, self.config.history_ttl_multiplier);
        self.store.set(&key, Value::Map(map), ttl).await;
    }

    async fn load_pattern(&self, fingerprint: &str) -> PatternRecord {
        let key = format!("fw:{fingerprint}:pattern");
        match self.store.get(&key).await {
            Some(Value::Text(raw)) => serde_json::from_str(&raw).unwrap_or_default(),
            _ => PatternRecord::default(),
        }
    }

    async fn store_pattern(&self, fingerprint: &str, record: &PatternRecord) {
        let key = format!("fw:{fingerprint}:pattern");
        if let Ok(raw) = serde_json::to_string(record) {
            let ttl = window_ttl_secs(self.config.window_size_ms);
            self.store.set(&key, Value::Text(raw), ttl).await;
        }
    }
}

#[async_trait]
impl Analyzer for BurstinessAnalyzer {
    fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn requires_body(&self) -> bool {
        false
    }

    fn uses_external_resources(&self) -> bool {
        false
    }

    fn identifier(&self) -> &str {
        "burstiness"
    }

    async fn analyze(&self, ctx: &AnalysisContext<'_>) -> f64 {
        if !self.config.enabled {
            return 0.0;
        }
        let Some(fingerprint) = ctx.fingerprint else { return 0.0 };

        let now = now_ms();
        let cutoff = now - self.config.window_size_ms;
        let key = format!("fw:{fingerprint}:requests");
        let ttl = pipeline_expire_secs(self.config.window_size_ms, self.config.ttl_buffer_multiplier);

        let result = self.store.burstiness_pipeline(&key, now, cutoff, ttl).await;
        let count = result.count;
        let recent: Vec<i64> = result.recent.iter().filter_map(|s| s.parse().ok()).collect();

        let mut score = 0.0;

        // Frequency.
        if count as u32 > self.config.max_requests_per_window {
            let excess = (count - self.config.max_requests_per_window as i64) as f64;
            score += (self.config.excess_request_score * excess.powf(1.5)).min(self.config.max_frequency_score);

            let mut history = self.load_history(fingerprint).await;
            if history.violation_count == 0 {
                history.first_violation = now;
            }
            history.last_violation = now;
            history.violation_count += 1;
            history.max_excess = history.max_excess.max(excess);
            history.total_excess += excess;
            self.store_history(fingerprint, &history).await;
        }

        // Burst: any consecutive interval below min_interval.
        let mut sorted_recent = recent.clone();
        sorted_recent.sort_unstable();
        let has_burst = sorted_recent
            .windows(2)
            .any(|pair| (pair[1] - pair[0]) < self.config.min_interval_ms);
        if has_burst {
            score += self.config.burst_penalty_score;
        }

        // Pattern regularity.
        if sorted_recent.len() >= self.config.min_samples_for_pattern {
            let intervals: Vec<f64> = sorted_recent
                .windows(2)
                .map(|pair| (pair[1] - pair[0]) as f64)
                .collect();
            let (mean, stddev) = mean_and_stddev(&intervals);
            let cv = if mean == 0.0 { 0.0 } else { stddev / mean };

            let mut pattern = self.load_pattern(fingerprint).await;
            pattern.cv_history.push(cv);
            if pattern.cv_history.len() > self.config.pattern_history_size {
                let overflow = pattern.cv_history.len() - self.config.pattern_history_size;
                pattern.cv_history.drain(0..overflow);
            }
            let avg_cv = pattern.cv_history.iter().sum::<f64>() / pattern.cv_history.len() as f64;

            if avg_cv < self.config.very_regular_threshold {
                score += self.config.very_regular_score;
                pattern.detection_count += 1;
            } else if avg_cv < self.config.somewhat_regular_threshold {
                score += self.config.somewhat_regular_score;
                pattern.detection_count += 1;
            } else {
                pattern.detection_count = (pattern.detection_count - 1).max(0);
            }

            score += (pattern.detection_count as f64 * self.config.pattern_multiplier)
                .min(self.config.max_pattern_score);

            self.store_pattern(fingerprint, &pattern).await;
        }

        // Historical penalty.
        let history = self.load_history(fingerprint).await;
        if history.violation_count as u32 > self.config.min_violations_for_penalty {
            score += (history.violation_count as f64).powf(1.5).min(self.config.max_violation_score);
        }
        if history.max_excess > self.config.severe_excess_threshold {
            score += (history.max_excess * self.config.excess_multiplier).min(self.config.max_excess_score);
        }

        if score.is_nan() {
            warn!(fingerprint, "burstiness analyzer produced NaN, folding to 0");
            return 0.0;
        }
        score
    }
}
