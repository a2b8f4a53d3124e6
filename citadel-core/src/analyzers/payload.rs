// [citadel-core/src/analyzers/payload.rs]
/*!
 * =================================================================
 * APARATO: PAYLOAD ANALYZER (ESTRATO L3)
 * RESPONSABILIDAD: ESCANEAR EL CUERPO CRUDO CONTRA LA BASE DE PATRONES
 *
 * Cache por fingerprint+md5(body) evita re-escanear el mismo cuerpo
 * repetido dentro de la TTL del analizador (spec.md §4.7).
 * =================================================================
 */

use async_trait::async_trait;
use std::sync::Arc;

use super::{AnalysisContext, Analyzer};
use crate::config::PayloadConfig;
use crate::datastore::{DataStore, Value};
use crate::matcher::MultiPatternMatcher;

pub struct PayloadAnalyzer {
    config: PayloadConfig,
    store: Arc<dyn DataStore>,
    matcher: Arc<dyn MultiPatternMatcher>,
}

impl PayloadAnalyzer {
    pub fn new(config: PayloadConfig, store: Arc<dyn DataStore>, matcher: Arc<dyn MultiPatternMatcher>) -> Self {
        Self { config, store, matcher }
    }

    fn score_matches(&self, matches: &[crate::matcher::Match]) -> f64 {
        if self.config.pattern_impact.is_empty() {
            return matches.len() as f64;
        }
        matches
            .iter()
            .map(|m| self.config.pattern_impact.get(&m.id).copied().unwrap_or(1.0))
            .sum()
    }
}

#[async_trait]
impl Analyzer for PayloadAnalyzer {
    fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn requires_body(&self) -> bool {
        true
    }

    fn uses_external_resources(&self) -> bool {
        false
    }

    fn identifier(&self) -> &str {
        "payload"
    }

    async fn analyze(&self, ctx: &AnalysisContext<'_>) -> f64 {
        if !self.config.enabled {
            return 0.0;
        }
        let Some(body) = ctx.body else { return 0.0 };
        if body.is_empty() {
            return 0.0;
        }
        let Some(fingerprint) = ctx.fingerprint else { return 0.0 };

        let digest = format!("{:x}", md5::compute(body));
        let cache_key = format!("payload_analyzer:{fingerprint}:{digest}");

        if let Some(cached) = self.store.get(&cache_key).await {
            if let Some(score) = cached.as_f64() {
                return score;
            }
        }

        let matches = self.matcher.scan(body);
        let score = self.score_matches(&matches).min(self.config.max_score);

        self.store.set(&cache_key, Value::Double(score), self.config.ttl_secs).await;
        score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::memory::InMemoryDataStore;
    use crate::fingerprint::RequestView;
    use crate::matcher::fallback::RegexFallbackMatcher;

    fn request_view() -> RequestView<'static> {
        RequestView { header_fingerprint: None, cookie_fingerprint: None, remote_ip: None, user_agent: None }
    }

    fn matcher() -> Arc<dyn MultiPatternMatcher> {
        Arc::new(RegexFallbackMatcher::new(vec![r"SELECT\s+.*\s+FROM".to_string()], 32).unwrap())
    }

    #[tokio::test]
    async fn sql_injection_body_scores_above_zero() {
        let analyzer = PayloadAnalyzer::new(PayloadConfig::default(), Arc::new(InMemoryDataStore::new()), matcher());
        let request = request_view();
        let body = b"SELECT * FROM users";
        let ctx = AnalysisContext { fingerprint: Some("fp-1"), request: &request, body: Some(body) };
        assert!(analyzer.analyze(&ctx).await > 0.0);
    }

    #[tokio::test]
    async fn benign_body_scores_zero() {
        let analyzer = PayloadAnalyzer::new(PayloadConfig::default(), Arc::new(InMemoryDataStore::new()), matcher());
        let request = request_view();
        let body = b"hello world";
        let ctx = AnalysisContext { fingerprint: Some("fp-1"), request: &request, body: Some(body) };
        assert_eq!(analyzer.analyze(&ctx).await, 0.0);
    }

    #[tokio::test]
    async fn empty_body_scores_zero_even_when_enabled() {
        let analyzer = PayloadAnalyzer::new(PayloadConfig::default(), Arc::new(InMemoryDataStore::new()), matcher());
        let request = request_view();
        let ctx = AnalysisContext { fingerprint: Some("fp-1"), request: &request, body: Some(b"") };
        assert_eq!(analyzer.analyze(&ctx).await, 0.0);
    }

    #[tokio::test]
    async fn repeated_calls_within_ttl_return_cached_score() {
        let store = Arc::new(InMemoryDataStore::new());
        let analyzer = PayloadAnalyzer::new(PayloadConfig::default(), store, matcher());
        let request = request_view();
        let body: &[u8] = b"SELECT * FROM users";
        let ctx = AnalysisContext { fingerprint: Some("fp-1"), request: &request, body: Some(body) };
        let first = analyzer.analyze(&ctx).await;
        let second = analyzer.analyze(&ctx).await;
        assert_eq!(first, second);
    }
}
