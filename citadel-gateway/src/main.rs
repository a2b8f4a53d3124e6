// [citadel-gateway/src/main.rs]
/*!
 * =================================================================
 * APARATO: GATEWAY SHELL (ENTRY POINT)
 * CLASIFICACIÓN: APPLICATION SHELL (ESTRATO L4)
 * RESPONSABILIDAD: ENSAMBLAR EL PIPELINE Y ABRIR EL SOCKET TCP
 *
 * Monta `protect_route` delante de una aplicación de ejemplo: construye
 * el DataStore (memoria o Redis según CITADEL_REDIS_URL), el matcher
 * (base compilada si está presente, texto plano en su defecto, regex
 * individuales como último recurso) y el roster completo de analizadores
 * a partir de una única `CitadelConfig::from_env`.
 * =================================================================
 */

use axum::extract::ConnectInfo;
use axum::http::StatusCode;
use axum::middleware as axum_middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use citadel_core::analyzers::burstiness::BurstinessAnalyzer;
use citadel_core::analyzers::device::DeviceAnalyzer;
use citadel_core::analyzers::ip_reputation::IpAnalyzer;
use citadel_core::analyzers::payload::PayloadAnalyzer;
use citadel_core::analyzers::spamminess::SpamminessAnalyzer;
use citadel_core::config::CitadelConfig;
use citadel_core::datastore::memory::InMemoryDataStore;
use citadel_core::datastore::remote::RedisDataStore;
use citadel_core::matcher::fallback::RegexFallbackMatcher;
use citadel_core::matcher::vectorized::VectorizedMatcher;
use citadel_core::matcher::MultiPatternMatcher;
use citadel_core::middleware::{protect_route, Citadel};
use citadel_core::prelude::{Analyzer, DataStore};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Built-in pattern set used when no patterns file is configured; kept
/// tiny since this binary exists to demonstrate wiring, not to ship a
/// production pattern database.
const FALLBACK_PATTERNS: &[&str] = &[
    r"(?i)union\s+select",
    r"(?i)select\s+.*\s+from",
    r"(?i)<script",
    r"\.\./",
];

fn build_store(config: &CitadelConfig) -> Arc<dyn DataStore> {
    if let Ok(redis_url) = std::env::var("CITADEL_REDIS_URL") {
        match RedisDataStore::connect(&redis_url) {
            Ok(store) => return Arc::new(store),
            Err(error) => {
                error!(%error, "failed to connect to redis, falling back to in-memory store");
            }
        }
    }
    let _ = config;
    Arc::new(InMemoryDataStore::new())
}

fn build_matcher(config: &CitadelConfig) -> Arc<dyn MultiPatternMatcher> {
    if config.matcher.use_vectorized {
        if let (Some(db_path), Some(patterns_path)) = (&config.matcher.db_path, &config.matcher.patterns_path) {
            let db_path = Path::new(db_path);
            let patterns_path = Path::new(patterns_path);
            if VectorizedMatcher::is_database_valid(db_path, patterns_path) {
                match VectorizedMatcher::load_from_serialized(db_path) {
                    Ok(matcher) => return Arc::new(matcher),
                    Err(error) => warn!(%error, "failed to load compiled pattern database, recompiling in place"),
                }
            }
            if let Ok(patterns) = citadel_core::matcher::read_patterns_file(patterns_path) {
                match VectorizedMatcher::new(patterns) {
                    Ok(matcher) => return Arc::new(matcher),
                    Err(error) => warn!(%error, "configured patterns file failed to compile, using built-in fallback set"),
                }
            }
        }
    }

    let patterns = FALLBACK_PATTERNS.iter().map(|p| p.to_string()).collect();
    match RegexFallbackMatcher::new(patterns, config.matcher.fallback_max_matches_per_pattern) {
        Ok(matcher) => Arc::new(matcher),
        Err(error) => {
            panic!("built-in fallback pattern set failed to compile: {error}");
        }
    }
}

fn build_analyzers(config: &CitadelConfig, store: Arc<dyn DataStore>, matcher: Arc<dyn MultiPatternMatcher>) -> Vec<Arc<dyn Analyzer>> {
    vec![
        Arc::new(BurstinessAnalyzer::new(config.burstiness.clone(), store.clone())),
        Arc::new(SpamminessAnalyzer::new(config.spamminess.clone(), store.clone())),
        Arc::new(PayloadAnalyzer::new(config.payload.clone(), store.clone(), matcher)),
        Arc::new(DeviceAnalyzer::new(config.device.clone(), store.clone())),
        Arc::new(IpAnalyzer::new(config.ip.clone(), store)),
    ]
}

async fn upstream_echo(Json(body): Json<serde_json::Value>) -> Json<serde_json::Value> {
    Json(body)
}

async fn upstream_health() -> StatusCode {
    StatusCode::OK
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    citadel_core::telemetry::init("citadel_gateway");

    info!("🛡️  [CITADEL_GATEWAY]: Assembling scoring pipeline...");

    let config = CitadelConfig::from_env()?;
    let store = build_store(&config);
    let matcher = build_matcher(&config);
    let analyzers = build_analyzers(&config, store.clone(), matcher);

    let citadel = Arc::new(Citadel::new(analyzers, store, config));

    let app = Router::new()
        .route("/echo", post(upstream_echo))
        .route("/healthz", get(upstream_health))
        .layer(axum_middleware::from_fn_with_state(citadel.clone(), protect_route))
        .layer(TraceLayer::new_for_http())
        .with_state(citadel);

    let port: u16 = std::env::var("PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(8080);
    let address = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(address).await?;

    info!(%address, "🚀 [CITADEL_GATEWAY]: Listening");
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
