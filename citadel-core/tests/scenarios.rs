// [citadel-core/tests/scenarios.rs]
//! =================================================================
//! APARATO: END-TO-END SCORING SCENARIOS
//! RESPONSABILIDAD: CERTIFICAR EL PIPELINE COMPLETO, NO CADA PIEZA AISLADA
//!
//! Cada escenario usa configuración explícita, elegida y verificada a
//! mano en este archivo -- nunca los valores por defecto implícitos --
//! para que el resultado esperado sea determinista sin ejecutar la
//! suite contra el reloj de pared.
//! =================================================================

use citadel_core::analyzers::burstiness::BurstinessAnalyzer;
use citadel_core::analyzers::payload::PayloadAnalyzer;
use citadel_core::ban;
use citadel_core::config::{BurstinessConfig, CitadelConfig, MatcherConfig, MiddlewareConfig, PayloadConfig};
use citadel_core::datastore::memory::InMemoryDataStore;
use citadel_core::datastore::DataStore;
use citadel_core::fingerprint::RequestView;
use citadel_core::matcher::fallback::RegexFallbackMatcher;
use citadel_core::matcher::vectorized::VectorizedMatcher;
use citadel_core::matcher::MultiPatternMatcher;
use citadel_core::middleware::{Citadel, Verdict};
use std::sync::Arc;

fn request_view() -> RequestView<'static> {
    RequestView { header_fingerprint: None, cookie_fingerprint: None, remote_ip: None, user_agent: None }
}

#[tokio::test]
async fn sql_injection_body_drives_score_past_block_threshold() {
    let store: Arc<dyn DataStore> = Arc::new(InMemoryDataStore::new());
    let matcher: Arc<dyn MultiPatternMatcher> =
        Arc::new(RegexFallbackMatcher::new(vec![r"(?i)union\s+select".to_string()], 32).unwrap());

    let mut payload_config = PayloadConfig::default();
    payload_config.max_score = 90.0;

    let mut middleware_config = MiddlewareConfig::default();
    middleware_config.block_threshold = 50.0;
    middleware_config.warning_threshold = 10.0;

    let mut config = CitadelConfig::default();
    config.payload = payload_config.clone();
    config.middleware = middleware_config;

    let analyzer = Arc::new(PayloadAnalyzer::new(payload_config, store.clone(), matcher));
    let citadel = Citadel::new(vec![analyzer], store, config);

    let request = request_view();
    let body = b"1 UNION SELECT username, password FROM accounts";
    let (verdict, score) = citadel.evaluate(Some("fp-attacker"), &request, Some(body)).await;

    assert_eq!(verdict, Verdict::Block);
    assert!(score >= 50.0);
}

#[tokio::test]
async fn benign_body_never_crosses_warning_threshold() {
    let store: Arc<dyn DataStore> = Arc::new(InMemoryDataStore::new());
    let matcher: Arc<dyn MultiPatternMatcher> =
        Arc::new(RegexFallbackMatcher::new(vec![r"(?i)union\s+select".to_string()], 32).unwrap());

    let config = CitadelConfig::default();
    let analyzer = Arc::new(PayloadAnalyzer::new(config.payload.clone(), store.clone(), matcher));
    let citadel = Citadel::new(vec![analyzer], store, config);

    let request = request_view();
    let body = b"{\"comment\": \"looking forward to the release notes\"}";
    let (verdict, score) = citadel.evaluate(Some("fp-normal"), &request, Some(body)).await;

    assert_eq!(verdict, Verdict::Admit);
    assert_eq!(score, 0.0);
}

#[tokio::test]
async fn sustained_burst_triggers_auto_ban_and_subsequent_requests_are_blocked_on_ban_alone() {
    let store: Arc<dyn DataStore> = Arc::new(InMemoryDataStore::new());

    let mut burstiness_config = BurstinessConfig::default();
    burstiness_config.max_requests_per_window = 0;
    burstiness_config.excess_request_score = 100.0;
    burstiness_config.max_frequency_score = 100.0;
    burstiness_config.min_interval_ms = 0;
    burstiness_config.min_samples_for_pattern = 999;
    burstiness_config.severe_excess_threshold = f64::MAX;
    burstiness_config.min_violations_for_penalty = 999;

    let mut middleware_config = MiddlewareConfig::default();
    middleware_config.block_threshold = 10.0;
    middleware_config.warning_threshold = 5.0;
    middleware_config.auto_ban_enabled = true;
    middleware_config.ban_duration_secs = 60;
    let expected_ban_score = middleware_config.max_score;

    let mut config = CitadelConfig::default();
    config.burstiness = burstiness_config.clone();
    config.middleware = middleware_config;

    let analyzer = Arc::new(BurstinessAnalyzer::new(burstiness_config, store.clone()));
    let citadel = Citadel::new(vec![analyzer], store.clone(), config);

    let request = request_view();
    let (first_verdict, _) = citadel.evaluate(Some("fp-burst"), &request, None).await;
    assert_eq!(first_verdict, Verdict::Block);
    assert!(ban::is_banned(store.as_ref(), Some("fp-burst"), None, false).await);

    // A second request is blocked purely on the ban record, independent
    // of the cached score or another analyzer run.
    let (second_verdict, second_score) = citadel.evaluate(Some("fp-burst"), &request, None).await;
    assert_eq!(second_verdict, Verdict::Block);
    assert_eq!(second_score, expected_ban_score);
}

#[tokio::test]
async fn request_score_is_cached_and_not_recomputed_within_ttl() {
    let store: Arc<dyn DataStore> = Arc::new(InMemoryDataStore::new());
    let matcher: Arc<dyn MultiPatternMatcher> =
        Arc::new(RegexFallbackMatcher::new(vec![r"(?i)union\s+select".to_string()], 32).unwrap());

    let mut middleware_config = MiddlewareConfig::default();
    middleware_config.cache_ttl_secs = 3_600;

    let mut config = CitadelConfig::default();
    config.middleware = middleware_config;

    let analyzer = Arc::new(PayloadAnalyzer::new(config.payload.clone(), store.clone(), matcher));
    let citadel = Citadel::new(vec![analyzer], store.clone(), config);

    let request = request_view();
    let body = b"1 UNION SELECT secret FROM vault";
    let (_, first_score) = citadel.evaluate(Some("fp-cache"), &request, Some(body)).await;

    // Remove the fingerprint's ban eligibility path entirely and flip the
    // body to something benign -- if the cache were bypassed the second
    // score would drop to 0.0.
    let (_, second_score) = citadel.evaluate(Some("fp-cache"), &request, Some(b"benign now")).await;
    assert_eq!(first_score, second_score);
}

#[tokio::test]
async fn vectorized_pattern_database_round_trips_through_disk_and_still_blocks() {
    let temp_dir = tempfile::tempdir().unwrap();
    let patterns_path = temp_dir.path().join("patterns.txt");
    let db_path = temp_dir.path().join("patterns.db");
    std::fs::write(&patterns_path, "(?i)union\\s+select\n(?i)<script\n").unwrap();

    let patterns = citadel_core::matcher::read_patterns_file(&patterns_path).unwrap();
    let compiled = VectorizedMatcher::new(patterns).unwrap();
    compiled.serialize_with_hash(&db_path, &patterns_path).unwrap();
    assert!(VectorizedMatcher::is_database_valid(&db_path, &patterns_path));

    let reloaded: Arc<dyn MultiPatternMatcher> = Arc::new(VectorizedMatcher::load_from_serialized(&db_path).unwrap());

    let store: Arc<dyn DataStore> = Arc::new(InMemoryDataStore::new());
    let mut middleware_config = MiddlewareConfig::default();
    middleware_config.block_threshold = 1.0;
    middleware_config.warning_threshold = 0.5;

    let mut payload_config = PayloadConfig::default();
    payload_config.max_score = 10.0;

    let mut config = CitadelConfig::default();
    config.matcher = MatcherConfig { use_vectorized: true, ..MatcherConfig::default() };
    config.payload = payload_config.clone();
    config.middleware = middleware_config;

    let analyzer = Arc::new(PayloadAnalyzer::new(payload_config, store.clone(), reloaded));
    let citadel = Citadel::new(vec![analyzer], store, config);

    let request = request_view();
    let (verdict, _) = citadel.evaluate(Some("fp-1"), &request, Some(b"<script>alert(1)</script>")).await;
    assert_eq!(verdict, Verdict::Block);
}

#[tokio::test]
async fn disabled_middleware_bypasses_every_analyzer() {
    let store: Arc<dyn DataStore> = Arc::new(InMemoryDataStore::new());
    let matcher: Arc<dyn MultiPatternMatcher> =
        Arc::new(RegexFallbackMatcher::new(vec![r"(?i)union\s+select".to_string()], 32).unwrap());

    let mut config = CitadelConfig::default();
    config.middleware.enabled = false;

    let analyzer = Arc::new(PayloadAnalyzer::new(config.payload.clone(), store.clone(), matcher));
    let citadel = Citadel::new(vec![analyzer], store, config);

    let request = request_view();
    let (verdict, score) = citadel.evaluate(Some("fp-1"), &request, Some(b"1 UNION SELECT * FROM users")).await;
    assert_eq!(verdict, Verdict::Admit);
    assert_eq!(score, 0.0);
}
