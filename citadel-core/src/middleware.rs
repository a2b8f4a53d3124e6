// [citadel-core/src/middleware.rs]
/*!
 * =================================================================
 * APARATO: PROTECT ROUTE MIDDLEWARE (ESTRATO L4)
 * RESPONSABILIDAD: ORQUESTAR ANALIZADORES, CACHE, VEREDICTO
 *
 * Sigue la misma forma `State<Arc<Citadel>>` + `Next` que las guardias
 * de `apps/orchestrator/src/middleware.rs`. Ningun fallo de analizador
 * o de store puede denegar una peticion por si solo: solo un registro
 * de baneo o un umbral superado lo hacen (spec.md §4.10, §7).
 * =================================================================
 */

use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::warn;

use crate::analyzers::{AnalysisContext, Analyzer};
use crate::ban;
use crate::config::CitadelConfig;
use crate::datastore::{DataStore, Value};
use crate::fingerprint::{self, RequestView};

/// Aggregate verdict produced by one pass through the analyzer pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    Admit,
    Warn,
    Block,
}

/// Shared orchestrator: holds the full analyzer roster plus the two
/// derived subsets (body-requiring, external-resource-using), the
/// DataStore used for the ban and request-score caches, and the
/// middleware's own configuration slice.
pub struct Citadel {
    all: Vec<Arc<dyn Analyzer>>,
    body_analyzers: Vec<usize>,
    external_resource_analyzers: Vec<usize>,
    store: Arc<dyn DataStore>,
    config: CitadelConfig,
}

impl Citadel {
    pub fn new(analyzers: Vec<Arc<dyn Analyzer>>, store: Arc<dyn DataStore>, config: CitadelConfig) -> Self {
        let body_analyzers = analyzers
            .iter()
            .enumerate()
            .filter(|(_, a)| a.requires_body())
            .map(|(i, _)| i)
            .collect();
        let external_resource_analyzers = analyzers
            .iter()
            .enumerate()
            .filter(|(_, a)| a.uses_external_resources())
            .map(|(i, _)| i)
            .collect();

        Self { all: analyzers, body_analyzers, external_resource_analyzers, store, config }
    }

    fn selected_indices(&self, has_body: bool, external_allowed: bool) -> Vec<usize> {
        (0..self.all.len())
            .filter(|i| has_body || !self.body_analyzers.contains(i))
            .filter(|i| external_allowed || !self.external_resource_analyzers.contains(i))
            .collect()
    }

    /// Runs the full scoring pipeline against an already-extracted
    /// fingerprint and request view, returning the verdict and the score
    /// that produced it. Kept independent of axum types so it can be unit
    /// tested directly; `protect_route` below is the axum adapter.
    pub async fn evaluate(
        &self,
        fingerprint: Option<&str>,
        request: &RequestView<'_>,
        body: Option<&[u8]>,
    ) -> (Verdict, f64) {
        if !self.config.middleware.enabled {
            return (Verdict::Admit, 0.0);
        }
        let Some(fingerprint) = fingerprint else { return (Verdict::Admit, 0.0) };

        let banned = ban::is_banned(
            self.store.as_ref(),
            Some(fingerprint),
            request.remote_ip,
            self.config.middleware.ban_by_ip,
        )
        .await;
        if banned {
            return (Verdict::Block, self.config.middleware.max_score);
        }

        let cache_key = format!("citadel:request_score:{fingerprint}");
        if let Some(cached) = self.store.get(&cache_key).await {
            if let Some(score) = cached.as_f64() {
                self.maybe_auto_ban(fingerprint, score).await;
                return (self.decide(score), score);
            }
        }

        let has_body = body.map(|b| !b.is_empty()).unwrap_or(false);
        let indices = self.selected_indices(has_body, self.config.middleware.external_resources_enabled);

        let ctx = AnalysisContext { fingerprint: Some(fingerprint), request, body };
        let mut total = 0.0;
        for &index in &indices {
            let analyzer = &self.all[index];
            if !analyzer.enabled() {
                continue;
            }
            let contribution = analyzer.analyze(&ctx).await;
            if contribution < 0.0 {
                warn!(analyzer = analyzer.identifier(), contribution, "analyzer returned a negative score, folding to 0");
                continue;
            }
            total += contribution;
        }

        let score = total.min(self.config.middleware.max_score);
        self.store.set(&cache_key, Value::Double(score), self.config.middleware.cache_ttl_secs).await;
        self.maybe_auto_ban(fingerprint, score).await;

        (self.decide(score), score)
    }

    /// Shared by both the cache-hit and freshly-computed paths (spec.md
    /// §4.10 step 3 routes cache hits into step 7's auto-ban check too).
    async fn maybe_auto_ban(&self, fingerprint: &str, score: f64) {
        if score >= self.config.middleware.block_threshold && self.config.middleware.auto_ban_enabled {
            ban::ban_fingerprint(&self.store, fingerprint, self.config.middleware.ban_duration_secs).await;
        }
    }

    fn decide(&self, score: f64) -> Verdict {
        if score >= self.config.middleware.block_threshold {
            Verdict::Block
        } else if score >= self.config.middleware.warning_threshold {
            Verdict::Warn
        } else {
            Verdict::Admit
        }
    }
}

/// Everything `RequestView` needs, captured as owned data before the
/// request is consumed by `into_parts`.
struct OwnedRequestFields {
    header_fingerprint: Option<String>,
    cookie_fingerprint: Option<String>,
    remote_ip: Option<String>,
    user_agent: Option<String>,
}

impl OwnedRequestFields {
    fn capture(request: &Request, header_name: Option<&str>, cookie_name: Option<&str>) -> Self {
        let header_fingerprint = header_name
            .and_then(|name| request.headers().get(name))
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let cookie_fingerprint = cookie_name.and_then(|name| extract_cookie(request, name));
        let remote_ip = request
            .extensions()
            .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
            .map(|ci| ci.0.ip().to_string());
        let user_agent = request
            .headers()
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Self { header_fingerprint, cookie_fingerprint, remote_ip, user_agent }
    }

    fn as_view(&self) -> RequestView<'_> {
        RequestView {
            header_fingerprint: self.header_fingerprint.as_deref(),
            cookie_fingerprint: self.cookie_fingerprint.as_deref(),
            remote_ip: self.remote_ip.as_deref(),
            user_agent: self.user_agent.as_deref(),
        }
    }
}

/// axum middleware adapter over `Citadel::evaluate`, matching the
/// `State<AppState>` + `Next` shape of the teacher's `auth_guard`. The
/// request body is buffered in full since several analyzers need it;
/// downstream handlers receive a freshly reconstructed request carrying
/// the same bytes.
pub async fn protect_route(State(citadel): State<Arc<Citadel>>, request: Request, next: Next) -> Response {
    let header_name = citadel.config.fingerprint.header_name.as_deref();
    let cookie_name = citadel.config.fingerprint.cookie_name.as_deref();

    let owned = OwnedRequestFields::capture(&request, header_name, cookie_name);
    let fingerprint = fingerprint::extract(&owned.as_view(), &citadel.config.fingerprint);

    let (parts, body) = request.into_parts();
    let body_bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(error) => {
            warn!(%error, "failed to buffer request body for scoring");
            axum::body::Bytes::new()
        }
    };

    let (verdict, _score) = citadel
        .evaluate(fingerprint.as_deref(), &owned.as_view(), Some(body_bytes.as_ref()))
        .await;

    let rebuilt = Request::from_parts(parts, axum::body::Body::from(body_bytes));

    match verdict {
        Verdict::Block => (StatusCode::FORBIDDEN, "request rejected").into_response(),
        Verdict::Warn => {
            let mut response = next.run(rebuilt).await;
            response
                .headers_mut()
                .insert("X-Threat-Detected", HeaderValue::from_static("true"));
            response
        }
        Verdict::Admit => next.run(rebuilt).await,
    }
}

fn extract_cookie<'a>(request: &'a Request, cookie_name: &str) -> Option<String> {
    let raw = request.headers().get(axum::http::header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == cookie_name).then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::burstiness::BurstinessAnalyzer;
    use crate::config::BurstinessConfig;
    use crate::datastore::memory::InMemoryDataStore;

    fn request_view() -> RequestView<'static> {
        RequestView { header_fingerprint: None, cookie_fingerprint: None, remote_ip: None, user_agent: None }
    }

    #[tokio::test]
    async fn disabled_middleware_always_admits() {
        let store: Arc<dyn DataStore> = Arc::new(InMemoryDataStore::new());
        let mut config = CitadelConfig::default();
        config.middleware.enabled = false;
        let citadel = Citadel::new(Vec::new(), store, config);
        let request = request_view();
        let (verdict, score) = citadel.evaluate(Some("fp-1"), &request, None).await;
        assert_eq!(verdict, Verdict::Admit);
        assert_eq!(score, 0.0);
    }

    #[tokio::test]
    async fn absent_fingerprint_always_admits() {
        let store: Arc<dyn DataStore> = Arc::new(InMemoryDataStore::new());
        let citadel = Citadel::new(Vec::new(), store, CitadelConfig::default());
        let request = request_view();
        let (verdict, _) = citadel.evaluate(None, &request, None).await;
        assert_eq!(verdict, Verdict::Admit);
    }

    #[tokio::test]
    async fn banned_fingerprint_is_blocked_without_running_analyzers() {
        let store: Arc<dyn DataStore> = Arc::new(InMemoryDataStore::new());
        ban::ban_fingerprint(&store, "fp-1", 60).await;
        let citadel = Citadel::new(Vec::new(), store, CitadelConfig::default());
        let request = request_view();
        let (verdict, _) = citadel.evaluate(Some("fp-1"), &request, None).await;
        assert_eq!(verdict, Verdict::Block);
    }

    #[tokio::test]
    async fn score_above_block_threshold_blocks_and_auto_bans_when_enabled() {
        let store: Arc<dyn DataStore> = Arc::new(InMemoryDataStore::new());
        let mut config = CitadelConfig::default();
        config.middleware.block_threshold = 10.0;
        config.middleware.warning_threshold = 5.0;
        config.middleware.auto_ban_enabled = true;

        let mut burstiness_config = BurstinessConfig::default();
        burstiness_config.max_requests_per_window = 0;
        burstiness_config.excess_request_score = 50.0;
        burstiness_config.max_frequency_score = 100.0;
        burstiness_config.min_interval_ms = 0;
        burstiness_config.min_samples_for_pattern = 999;
        burstiness_config.severe_excess_threshold = f64::MAX;
        burstiness_config.min_violations_for_penalty = 999;

        let analyzer: Arc<dyn Analyzer> = Arc::new(BurstinessAnalyzer::new(burstiness_config, store.clone()));
        let citadel = Citadel::new(vec![analyzer], store.clone(), config);

        let request = request_view();
        let (verdict, score) = citadel.evaluate(Some("fp-1"), &request, None).await;
        assert_eq!(verdict, Verdict::Block);
        assert!(score >= 10.0);
        assert!(ban::is_banned(store.as_ref(), Some("fp-1"), None, false).await);
    }

    #[tokio::test]
    async fn cached_score_is_reused_on_second_call() {
        let store: Arc<dyn DataStore> = Arc::new(InMemoryDataStore::new());
        let config = CitadelConfig::default();
        let citadel = Citadel::new(Vec::new(), store, config);
        let request = request_view();
        let (_, first) = citadel.evaluate(Some("fp-1"), &request, None).await;
        let (_, second) = citadel.evaluate(Some("fp-1"), &request, None).await;
        assert_eq!(first, second);
    }
}
