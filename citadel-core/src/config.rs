// [citadel-core/src/config.rs]
/*!
 * =================================================================
 * APARATO: CONFIGURATION SURFACE (ESTRATO L1)
 * RESPONSABILIDAD: TIPAR CADA PERILLA DEL NUCLEO, CON VALORES POR DEFECTO
 *
 * Cada analizador recibe una copia inmutable de las opciones que
 * necesita en construccion (ver `spec.md` §9, "Facade/global config
 * access inside analyzers"): nada lee variables de entorno fuera de
 * `CitadelConfig::from_env`.
 * =================================================================
 */

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;

use crate::errors::{CitadelError, Result};

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|raw| matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

/// Fingerprint extraction precedence (`spec.md` §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintConfig {
    pub header_name: Option<String>,
    pub cookie_name: Option<String>,
    pub collect_ip: bool,
    pub collect_ua: bool,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            header_name: Some("X-Citadel-Fingerprint".to_string()),
            cookie_name: Some("citadel_fp".to_string()),
            collect_ip: true,
            collect_ua: true,
        }
    }
}

/// Knobs for `BurstinessAnalyzer` (`spec.md` §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurstinessConfig {
    pub enabled: bool,
    pub window_size_ms: i64,
    pub min_interval_ms: i64,
    pub max_requests_per_window: u32,
    pub excess_request_score: f64,
    pub burst_penalty_score: f64,
    pub max_frequency_score: f64,
    pub very_regular_threshold: f64,
    pub somewhat_regular_threshold: f64,
    pub very_regular_score: f64,
    pub somewhat_regular_score: f64,
    pub pattern_multiplier: f64,
    pub max_pattern_score: f64,
    pub min_samples_for_pattern: usize,
    pub pattern_history_size: usize,
    pub history_ttl_multiplier: f64,
    pub min_violations_for_penalty: u32,
    pub max_violation_score: f64,
    pub severe_excess_threshold: f64,
    pub max_excess_score: f64,
    pub excess_multiplier: f64,
    pub ttl_buffer_multiplier: f64,
}

impl Default for BurstinessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_size_ms: 60_000,
            min_interval_ms: 1_000,
            max_requests_per_window: 30,
            excess_request_score: 2.0,
            burst_penalty_score: 20.0,
            max_frequency_score: 100.0,
            very_regular_threshold: 0.15,
            somewhat_regular_threshold: 0.35,
            very_regular_score: 15.0,
            somewhat_regular_score: 7.0,
            pattern_multiplier: 3.0,
            max_pattern_score: 30.0,
            min_samples_for_pattern: 4,
            pattern_history_size: 8,
            history_ttl_multiplier: 6.0,
            min_violations_for_penalty: 2,
            max_violation_score: 40.0,
            severe_excess_threshold: 20.0,
            max_excess_score: 30.0,
            excess_multiplier: 1.5,
            ttl_buffer_multiplier: 2.0,
        }
    }
}

/// Weight applied to each `SpamminessAnalyzer` component before summation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpamminessWeights {
    pub keyboard_pattern: f64,
    pub spam_pattern: f64,
    pub repetitive_content: f64,
    pub suspicious_entropy: f64,
    pub gibberish_text: f64,
}

impl Default for SpamminessWeights {
    fn default() -> Self {
        Self {
            keyboard_pattern: 1.0,
            spam_pattern: 1.2,
            repetitive_content: 1.0,
            suspicious_entropy: 0.8,
            gibberish_text: 0.8,
        }
    }
}

/// Knobs for `SpamminessAnalyzer` (`spec.md` §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpamminessConfig {
    pub enabled: bool,
    pub min_field_length: usize,
    pub max_repetition_ratio: f64,
    pub min_entropy_threshold: f64,
    pub max_entropy_threshold: f64,
    pub max_correlation_threshold: f64,
    pub max_score: f64,
    pub cache_capacity: usize,
    pub ttl_secs: u64,
    pub weights: SpamminessWeights,
}

impl Default for SpamminessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_field_length: 4,
            max_repetition_ratio: 0.4,
            min_entropy_threshold: 2.0,
            max_entropy_threshold: 4.5,
            max_correlation_threshold: 0.9,
            max_score: 50.0,
            cache_capacity: 4_096,
            ttl_secs: 300,
            weights: SpamminessWeights::default(),
        }
    }
}

/// Knobs for `PayloadAnalyzer` (`spec.md` §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadConfig {
    pub enabled: bool,
    pub max_score: f64,
    pub ttl_secs: u64,
    /// Optional per-pattern impact override; absent patterns count as 1.0 each.
    pub pattern_impact: HashMap<usize, f64>,
}

impl Default for PayloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_score: 40.0,
            ttl_secs: 300,
            pattern_impact: HashMap::new(),
        }
    }
}

/// Knobs for `DeviceAnalyzer` (`spec.md` §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub bot_substrings: Vec<String>,
    pub unknown_score: f64,
    pub bot_score: f64,
    pub smartphone_score: f64,
    pub tablet_score: f64,
    pub desktop_score: f64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 3_600,
            bot_substrings: vec![
                "bot".into(), "spider".into(), "crawl".into(), "curl".into(),
                "wget".into(), "python-requests".into(), "scrapy".into(), "httpclient".into(),
            ],
            unknown_score: 5.0,
            bot_score: 25.0,
            smartphone_score: 1.0,
            tablet_score: 2.0,
            desktop_score: 3.0,
        }
    }
}

/// Per-flag weight table applied by `IpAnalyzer` (`spec.md` §4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpFlagWeights {
    pub datacenter: f64,
    pub vpn: f64,
    pub proxy: f64,
    pub tor: f64,
    pub bogon: f64,
    pub mobile: f64,
    pub satellite: f64,
    pub crawler: f64,
    pub abuser: f64,
}

impl Default for IpFlagWeights {
    fn default() -> Self {
        Self {
            datacenter: 10.0,
            vpn: 12.0,
            proxy: 12.0,
            tor: 30.0,
            bogon: 5.0,
            mobile: -2.0,
            satellite: 2.0,
            crawler: 8.0,
            abuser: 40.0,
        }
    }
}

/// Knobs for `IpAnalyzer` (`spec.md` §4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub provider_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
    pub weights: IpFlagWeights,
    pub high_risk_countries: Vec<String>,
    pub trusted_countries: Vec<String>,
    pub high_risk_adjustment: f64,
    pub trusted_adjustment: f64,
}

impl Default for IpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 1_800,
            provider_url: None,
            api_key: None,
            timeout_ms: 800,
            weights: IpFlagWeights::default(),
            high_risk_countries: Vec::new(),
            trusted_countries: Vec::new(),
            high_risk_adjustment: 10.0,
            trusted_adjustment: -5.0,
        }
    }
}

/// Knobs for `MultiPatternMatcher` (`spec.md` §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfig {
    pub use_vectorized: bool,
    pub patterns_path: Option<String>,
    pub db_path: Option<String>,
    pub fallback_max_matches_per_pattern: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            use_vectorized: true,
            patterns_path: None,
            db_path: None,
            fallback_max_matches_per_pattern: 32,
        }
    }
}

/// Top-level `ProtectRoute` middleware knobs (`spec.md` §4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiddlewareConfig {
    pub enabled: bool,
    pub block_threshold: f64,
    pub warning_threshold: f64,
    pub max_score: f64,
    pub cache_ttl_secs: u64,
    pub auto_ban_enabled: bool,
    pub ban_duration_secs: u64,
    /// Open question resolved in DESIGN.md: toggle, default false.
    pub ban_by_ip: bool,
    pub external_resources_enabled: bool,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            block_threshold: 80.0,
            warning_threshold: 40.0,
            max_score: 100.0,
            cache_ttl_secs: 30,
            auto_ban_enabled: false,
            ban_duration_secs: 3_600,
            ban_by_ip: false,
            external_resources_enabled: true,
        }
    }
}

/// Root configuration object. Construct with `Default::default()` or
/// `CitadelConfig::from_env()`; analyzers and the middleware each hold
/// an owned clone of the slice they need.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CitadelConfig {
    pub fingerprint: FingerprintConfig,
    pub burstiness: BurstinessConfig,
    pub spamminess: SpamminessConfig,
    pub payload: PayloadConfig,
    pub device: DeviceConfig,
    pub ip: IpConfig,
    pub matcher: MatcherConfig,
    pub middleware: MiddlewareConfig,
}

impl CitadelConfig {
    /// Loads `.env` (if present, via `dotenvy`) then overlays environment
    /// variables onto the defaults above. Missing or unparsable variables
    /// silently fall back to their default rather than erroring -- only
    /// pattern compilation and startup-time contract violations are fatal
    /// per `spec.md` §7.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut config = Self::default();

        config.fingerprint.collect_ip = env_bool("CITADEL_COLLECT_IP", config.fingerprint.collect_ip);
        config.fingerprint.collect_ua = env_bool("CITADEL_COLLECT_UA", config.fingerprint.collect_ua);
        if let Ok(header) = env::var("CITADEL_FINGERPRINT_HEADER") {
            config.fingerprint.header_name = Some(header);
        }
        if let Ok(cookie) = env::var("CITADEL_FINGERPRINT_COOKIE") {
            config.fingerprint.cookie_name = Some(cookie);
        }

        config.middleware.enabled = env_bool("CITADEL_ENABLED", config.middleware.enabled);
        config.middleware.block_threshold = env_or("CITADEL_BLOCK_THRESHOLD", config.middleware.block_threshold);
        config.middleware.warning_threshold = env_or("CITADEL_WARNING_THRESHOLD", config.middleware.warning_threshold);
        config.middleware.max_score = env_or("CITADEL_MAX_SCORE", config.middleware.max_score);
        config.middleware.auto_ban_enabled = env_bool("CITADEL_AUTO_BAN", config.middleware.auto_ban_enabled);
        config.middleware.ban_by_ip = env_bool("CITADEL_BAN_BY_IP", config.middleware.ban_by_ip);

        config.matcher.patterns_path = env::var("CITADEL_PATTERNS_PATH").ok();
        config.matcher.db_path = env::var("CITADEL_PATTERNS_DB_PATH").ok();
        config.matcher.use_vectorized = env_bool("CITADEL_USE_VECTORIZED", config.matcher.use_vectorized);

        config.ip.provider_url = env::var("CITADEL_IP_PROVIDER_URL").ok();
        config.ip.api_key = env::var("CITADEL_IP_PROVIDER_KEY").ok();

        if config.middleware.block_threshold < config.middleware.warning_threshold {
            return Err(CitadelError::Configuration(
                "block_threshold must be >= warning_threshold".to_string(),
            ));
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let config = CitadelConfig::default();
        assert!(config.middleware.block_threshold >= config.middleware.warning_threshold);
        assert!(config.middleware.max_score >= config.middleware.block_threshold);
    }

    #[test]
    fn from_env_rejects_inverted_thresholds() {
        env::set_var("CITADEL_BLOCK_THRESHOLD", "10");
        env::set_var("CITADEL_WARNING_THRESHOLD", "50");
        let result = CitadelConfig::from_env();
        env::remove_var("CITADEL_BLOCK_THRESHOLD");
        env::remove_var("CITADEL_WARNING_THRESHOLD");
        assert!(result.is_err());
    }
}
