// [citadel-core/src/analyzers/device.rs]
/*!
 * =================================================================
 * APARATO: DEVICE ANALYZER (ESTRATO L3)
 * RESPONSABILIDAD: CLASIFICAR EL USER-AGENT
 *
 * La clasificacion smartphone/tablet/desktop vive en proceso
 * (`classify_device`): el "device-detector library" del sistema
 * original esta fuera de alcance (spec.md §1), Citadel solo necesita
 * *un* clasificador detras de esa costura. El resultado se cachea por
 * `md5(user-agent)` con la TTL del analizador (spec.md §4.8).
 * =================================================================
 */

use async_trait::async_trait;
use std::sync::Arc;

use super::{AnalysisContext, Analyzer};
use crate::config::DeviceConfig;
use crate::datastore::{DataStore, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Smartphone,
    Tablet,
    Desktop,
}

/// Best-effort in-process UA classifier. Order matters: tablet markers
/// ("ipad", "tablet") are checked before the broader "mobi" smartphone
/// marker since some tablet UAs also contain "mobile".
pub fn classify_device(user_agent: &str) -> DeviceClass {
    let lower = user_agent.to_lowercase();
    if lower.contains("ipad") || lower.contains("tablet") || (lower.contains("android") && !lower.contains("mobile")) {
        DeviceClass::Tablet
    } else if lower.contains("mobi") || lower.contains("iphone") || lower.contains("android") {
        DeviceClass::Smartphone
    } else {
        DeviceClass::Desktop
    }
}

pub struct DeviceAnalyzer {
    config: DeviceConfig,
    store: Arc<dyn DataStore>,
}

impl DeviceAnalyzer {
    pub fn new(config: DeviceConfig, store: Arc<dyn DataStore>) -> Self {
        Self { config, store }
    }

    fn is_bot(&self, ua: &str) -> bool {
        let lower = ua.to_lowercase();
        let substring_hit = self.config.bot_substrings.iter().any(|needle| lower.contains(needle.as_str()));
        let short_mozilla = lower.starts_with("mozilla/5.0") && ua.len() < 40;
        substring_hit || short_mozilla
    }
}

#[async_trait]
impl Analyzer for DeviceAnalyzer {
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
        "device"
    }

    async fn analyze(&self, ctx: &AnalysisContext<'_>) -> f64 {
        if !self.config.enabled {
            return 0.0;
        }
        let Some(ua) = ctx.request.user_agent else { return self.config.unknown_score };
        if ua.is_empty() {
            return self.config.unknown_score;
        }

        let cache_key = format!("device:{:x}", md5::compute(ua));
        if let Some(cached) = self.store.get(&cache_key).await {
            if let Some(score) = cached.as_f64() {
                return score;
            }
        }

        let score = if self.is_bot(ua) {
            self.config.bot_score
        } else {
            match classify_device(ua) {
                DeviceClass::Smartphone => self.config.smartphone_score,
                DeviceClass::Tablet => self.config.tablet_score,
                DeviceClass::Desktop => self.config.desktop_score,
            }
        };

        self.store.set(&cache_key, Value::Double(score), self.config.ttl_secs).await;
        score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::memory::InMemoryDataStore;
    use crate::fingerprint::RequestView;

    fn analyzer() -> DeviceAnalyzer {
        DeviceAnalyzer::new(DeviceConfig::default(), Arc::new(InMemoryDataStore::new()))
    }

    fn ctx_with_ua(ua: Option<&'static str>) -> (RequestView<'static>, Option<&'static str>) {
        (
            RequestView { header_fingerprint: None, cookie_fingerprint: None, remote_ip: None, user_agent: ua },
            ua,
        )
    }

    #[tokio::test]
    async fn empty_user_agent_returns_unknown_score() {
        let analyzer = analyzer();
        let (request, _) = ctx_with_ua(Some(""));
        let ctx = AnalysisContext { fingerprint: Some("fp-1"), request: &request, body: None };
        assert_eq!(analyzer.analyze(&ctx).await, analyzer.config.unknown_score);
    }

    #[tokio::test]
    async fn absent_user_agent_returns_unknown_score() {
        let analyzer = analyzer();
        let (request, _) = ctx_with_ua(None);
        let ctx = AnalysisContext { fingerprint: Some("fp-1"), request: &request, body: None };
        assert_eq!(analyzer.analyze(&ctx).await, analyzer.config.unknown_score);
    }

    #[tokio::test]
    async fn curl_user_agent_is_classified_as_bot() {
        let analyzer = analyzer();
        let (request, _) = ctx_with_ua(Some("curl/8.1.0"));
        let ctx = AnalysisContext { fingerprint: Some("fp-1"), request: &request, body: None };
        assert_eq!(analyzer.analyze(&ctx).await, analyzer.config.bot_score);
    }

    #[tokio::test]
    async fn short_mozilla_ua_is_classified_as_bot() {
        let analyzer = analyzer();
        let (request, _) = ctx_with_ua(Some("Mozilla/5.0 zzz"));
        let ctx = AnalysisContext { fingerprint: Some("fp-1"), request: &request, body: None };
        assert_eq!(analyzer.analyze(&ctx).await, analyzer.config.bot_score);
    }

    #[tokio::test]
    async fn iphone_ua_is_classified_as_smartphone() {
        let analyzer = analyzer();
        let ua = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15";
        let (request, _) = ctx_with_ua(Some(ua));
        let ctx = AnalysisContext { fingerprint: Some("fp-1"), request: &request, body: None };
        assert_eq!(analyzer.analyze(&ctx).await, analyzer.config.smartphone_score);
    }

    #[tokio::test]
    async fn ipad_ua_is_classified_as_tablet() {
        let analyzer = analyzer();
        let ua = "Mozilla/5.0 (iPad; CPU OS 17_0 like Mac OS X) AppleWebKit/605.1.15";
        let (request, _) = ctx_with_ua(Some(ua));
        let ctx = AnalysisContext { fingerprint: Some("fp-1"), request: &request, body: None };
        assert_eq!(analyzer.analyze(&ctx).await, analyzer.config.tablet_score);
    }

    #[tokio::test]
    async fn ordinary_desktop_ua_is_classified_as_desktop() {
        let analyzer = analyzer();
        let ua = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";
        let (request, _) = ctx_with_ua(Some(ua));
        let ctx = AnalysisContext { fingerprint: Some("fp-1"), request: &request, body: None };
        assert_eq!(analyzer.analyze(&ctx).await, analyzer.config.desktop_score);
    }

    #[tokio::test]
    async fn repeated_calls_for_the_same_user_agent_return_cached_score() {
        let store = Arc::new(InMemoryDataStore::new());
        let analyzer = DeviceAnalyzer::new(DeviceConfig::default(), store.clone());
        let ua = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15";
        let (request, _) = ctx_with_ua(Some(ua));
        let ctx = AnalysisContext { fingerprint: Some("fp-1"), request: &request, body: None };

        let first = analyzer.analyze(&ctx).await;
        let cache_key = format!("device:{:x}", md5::compute(ua));
        assert!(store.get(&cache_key).await.is_some());
        let second = analyzer.analyze(&ctx).await;
        assert_eq!(first, second);
    }
}
