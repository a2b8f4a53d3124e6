// [citadel-core/src/analyzers/ip_reputation.rs]
/*!
 * =================================================================
 * APARATO: IP REPUTATION ANALYZER (ESTRATO L3)
 * RESPONSABILIDAD: CONSULTAR UN PROVEEDOR EXTERNO DE REPUTACION DE IP
 *
 * Unico analizador con `uses_external_resources=true` (spec.md §4.9).
 * Fallo de red o timeout es fail-open: 0.0, nunca se propaga.
 * =================================================================
 */

use async_trait::async_trait;
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::{AnalysisContext, Analyzer};
use crate::config::IpConfig;
use crate::datastore::{DataStore, Value};

#[derive(Debug, Deserialize)]
struct ReputationLocation {
    country: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ReputationResponse {
    #[serde(default)]
    is_bogon: bool,
    #[serde(default)]
    is_mobile: bool,
    #[serde(default)]
    is_satellite: bool,
    #[serde(default)]
    is_crawler: bool,
    #[serde(default)]
    is_datacenter: bool,
    #[serde(default)]
    is_tor: bool,
    #[serde(default)]
    is_proxy: bool,
    #[serde(default)]
    is_vpn: bool,
    #[serde(default)]
    is_abuser: bool,
    location: Option<ReputationLocation>,
}

pub struct IpAnalyzer {
    config: IpConfig,
    store: Arc<dyn DataStore>,
    client: reqwest::Client,
}

fn is_private_or_reserved(ip: &str) -> bool {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_broadcast(),
        Ok(IpAddr::V6(v6)) => v6.is_loopback() || v6.is_unspecified() || (v6.segments()[0] & 0xfe00) == 0xfc00,
        Err(_) => true,
    }
}

impl IpAnalyzer {
    pub fn new(config: IpConfig, store: Arc<dyn DataStore>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .unwrap_or_default();
        Self { config, store, client }
    }

    fn weigh(&self, reputation: &ReputationResponse) -> f64 {
        let weights = &self.config.weights;
        let mut score = 0.0;
        if reputation.is_datacenter {
            score += weights.datacenter;
        }
        if reputation.is_vpn {
            score += weights.vpn;
        }
        if reputation.is_proxy {
            score += weights.proxy;
        }
        if reputation.is_tor {
            score += weights.tor;
        }
        if reputation.is_bogon {
            score += weights.bogon;
        }
        if reputation.is_mobile {
            score += weights.mobile;
        }
        if reputation.is_satellite {
            score += weights.satellite;
        }
        if reputation.is_crawler {
            score += weights.crawler;
        }
        if reputation.is_abuser {
            score += weights.abuser;
        }

        if let Some(country) = reputation.location.as_ref().and_then(|l| l.country.as_ref()) {
            if self.config.high_risk_countries.iter().any(|c| c == country) {
                score += self.config.high_risk_adjustment;
            } else if self.config.trusted_countries.iter().any(|c| c == country) {
                score += self.config.trusted_adjustment;
            }
        }

        score.max(0.0)
    }

    async fn query_provider(&self, ip: &str) -> Option<ReputationResponse> {
        let base_url = self.config.provider_url.as_ref()?;
        let mut request = self.client.get(base_url).query(&[("ip", ip)]);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        for attempt in 0..2 {
            match request.try_clone()?.send().await {
                Ok(response) if response.status().is_success() => {
                    return response.json::<ReputationResponse>().await.ok();
                }
                Ok(response) => {
                    warn!(status = %response.status(), ip, "ip reputation provider returned non-2xx");
                    return None;
                }
                Err(error) if attempt == 0 => {
                    warn!(%error, ip, "ip reputation provider request failed, retrying once");
                    continue;
                }
                Err(error) => {
                    warn!(%error, ip, "ip reputation provider request failed");
                    return None;
                }
            }
        }
        None
    }
}

#[async_trait]
impl Analyzer for IpAnalyzer {
    fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn requires_body(&self) -> bool {
        false
    }

    fn uses_external_resources(&self) -> bool {
        true
    }

    fn identifier(&self) -> &str {
        "ip_reputation"
    }

    async fn analyze(&self, ctx: &AnalysisContext<'_>) -> f64 {
        if !self.config.enabled {
            return 0.0;
        }
        let Some(ip) = ctx.request.remote_ip else { return 0.0 };
        if is_private_or_reserved(ip) {
            return 0.0;
        }

        let cache_key = format!("ip_analysis:{ip}");
        if let Some(cached) = self.store.get(&cache_key).await {
            if let Some(score) = cached.as_f64() {
                return score;
            }
        }

        let score = match self.query_provider(ip).await {
            Some(reputation) => self.weigh(&reputation),
            None => 0.0,
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

    fn request_view(ip: Option<&'static str>) -> RequestView<'static> {
        RequestView { header_fingerprint: None, cookie_fingerprint: None, remote_ip: ip, user_agent: None }
    }

    #[tokio::test]
    async fn private_ipv4_short_circuits_without_calling_provider() {
        let analyzer = IpAnalyzer::new(IpConfig::default(), Arc::new(InMemoryDataStore::new()));
        let request = request_view(Some("192.168.1.5"));
        let ctx = AnalysisContext { fingerprint: Some("fp-1"), request: &request, body: None };
        assert_eq!(analyzer.analyze(&ctx).await, 0.0);
    }

    #[tokio::test]
    async fn loopback_ipv6_short_circuits() {
        let analyzer = IpAnalyzer::new(IpConfig::default(), Arc::new(InMemoryDataStore::new()));
        let request = request_view(Some("::1"));
        let ctx = AnalysisContext { fingerprint: Some("fp-1"), request: &request, body: None };
        assert_eq!(analyzer.analyze(&ctx).await, 0.0);
    }

    #[tokio::test]
    async fn missing_provider_url_fails_open_to_zero() {
        let mut config = IpConfig::default();
        config.provider_url = None;
        let analyzer = IpAnalyzer::new(config, Arc::new(InMemoryDataStore::new()));
        let request = request_view(Some("8.8.8.8"));
        let ctx = AnalysisContext { fingerprint: Some("fp-1"), request: &request, body: None };
        assert_eq!(analyzer.analyze(&ctx).await, 0.0);
    }

    #[tokio::test]
    async fn absent_remote_ip_scores_zero() {
        let analyzer = IpAnalyzer::new(IpConfig::default(), Arc::new(InMemoryDataStore::new()));
        let request = request_view(None);
        let ctx = AnalysisContext { fingerprint: Some("fp-1"), request: &request, body: None };
        assert_eq!(analyzer.analyze(&ctx).await, 0.0);
    }

    #[test]
    fn weighting_sums_flags_and_clamps_at_zero() {
        let mut config = IpConfig::default();
        config.high_risk_countries = vec!["XX".to_string()];
        let analyzer = IpAnalyzer::new(config, Arc::new(InMemoryDataStore::new()));
        let reputation = ReputationResponse {
            is_bogon: false,
            is_mobile: true,
            is_satellite: false,
            is_crawler: false,
            is_datacenter: true,
            is_tor: false,
            is_proxy: false,
            is_vpn: false,
            is_abuser: false,
            location: Some(ReputationLocation { country: Some("XX".to_string()) }),
        };
        // datacenter(10.0) + mobile(-2.0) + high_risk_adjustment(10.0) = 18.0
        assert_eq!(analyzer.weigh(&reputation), 18.0);
    }
}
