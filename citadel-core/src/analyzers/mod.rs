// [citadel-core/src/analyzers/mod.rs]
/*!
 * =================================================================
 * APARATO: ANALYZER FRAMEWORK (ESTRATO L3)
 * RESPONSABILIDAD: CONTRATO COMUN PARA LOS CINCO ANALIZADORES
 *
 * Reemplaza la herencia dinamica del sistema original (spec.md §9,
 * "Dynamic inheritance of analyzers") por un trait de objeto: el
 * middleware guarda `Vec<Arc<dyn Analyzer>>` y deriva de el los dos
 * subconjuntos de §4.4 por filtrado, sin clase base.
 * =================================================================
 */

pub mod burstiness;
pub mod device;
pub mod ip_reputation;
pub mod payload;
pub mod spamminess;

use async_trait::async_trait;

use crate::fingerprint::RequestView;

/// Everything an analyzer needs to score one request: the resolved
/// fingerprint, the request view, and the raw body when present.
pub struct AnalysisContext<'a> {
    pub fingerprint: Option<&'a str>,
    pub request: &'a RequestView<'a>,
    pub body: Option<&'a [u8]>,
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    fn enabled(&self) -> bool;
    fn requires_body(&self) -> bool;
    fn uses_external_resources(&self) -> bool;
    /// Stable identifier used for cache keys and log records.
    fn identifier(&self) -> &str;
    /// Must be pure with respect to DataStore contents: two consecutive
    /// calls against unchanged DataStore state return the same score.
    async fn analyze(&self, ctx: &AnalysisContext<'_>) -> f64;
}
