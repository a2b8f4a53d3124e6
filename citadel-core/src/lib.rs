// [citadel-core/src/lib.rs]

//! # APARATO: CITADEL CORE STRATUM ROOT
//! CLASIFICACIÓN: CORE INFRASTRUCTURE (ESTRATO L1)
//! RESPONSABILIDAD: ORQUESTACIÓN Y EXPOSICIÓN DEL MOTOR DE PUNTUACIÓN
//!
//! Reúne el contrato de errores, la superficie de configuración, la
//! telemetría, el extractor de huellas, el `DataStore` conectable, el
//! matcher multi-patrón, los cinco analizadores y el middleware que los
//! orquesta en un único veredicto por petición.

/// Tipo de error unificado para todos los estratos del núcleo.
pub mod errors;

/// Superficie de configuración tipada, con overlay desde variables de entorno.
pub mod config;

/// Inicialización de `tracing` y el panic hook global.
pub mod telemetry;

/// Derivación de la huella de cliente a partir de header/cookie/IP/UA.
pub mod fingerprint;

/// Contrato `DataStore` y sus dos implementaciones (memoria, Redis).
pub mod datastore;

/// Contrato `MultiPatternMatcher` y sus dos backends (vectorizado, fallback).
pub mod matcher;

/// Los cinco analizadores de puntuación y su contrato `Analyzer` común.
pub mod analyzers;

/// Lectura/escritura de registros de destierro.
pub mod ban;

/// El orquestador `Citadel` y el middleware `protect_route` de axum.
pub mod middleware;

/**
 * PRELUDIO
 *
 * Tipos de alta frecuencia para inyección directa en los binarios que
 * ensamblan el pipeline (ver `citadel-gateway`).
 */
pub mod prelude {
    pub use crate::analyzers::{AnalysisContext, Analyzer};
    pub use crate::config::CitadelConfig;
    pub use crate::datastore::{DataStore, Value};
    pub use crate::errors::{CitadelError, Result};
    pub use crate::fingerprint::RequestView;
    pub use crate::matcher::{Match, MultiPatternMatcher};
    pub use crate::middleware::{protect_route, Citadel, Verdict};
}
