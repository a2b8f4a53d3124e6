// [citadel-core/src/errors.rs]
/*!
 * =================================================================
 * APARATO: ERROR CATALOG (ESTRATO L1)
 * RESPONSABILIDAD: CATALOGACION SEMANTICA DE FALLOS DEL NUCLEO
 *
 * Solo dos rutas de llamada de la crate devuelven `CitadelError` a un
 * consumidor externo: la compilacion de patrones (`MultiPatternMatcher::new`)
 * y el arranque (`CitadelConfig::from_env`, el binario `compile-regex`).
 * Todo lo demas -- analizadores, middleware -- es infalible en su
 * frontera publica: los fallos se registran con `tracing::warn!` y se
 * convierten en una contribucion de puntaje 0.0.
 * =================================================================
 */

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CitadelError {
    /// A pattern at the given index failed to compile as a regular expression.
    #[error("[CITADEL_PATTERN_FAULT]: INVALID_PATTERN at index {index}: {message}")]
    InvalidPattern { index: usize, message: String },

    /// The patterns file was missing, empty, or unreadable.
    #[error("[CITADEL_PATTERN_FAULT]: PATTERNS_SOURCE_UNAVAILABLE -> {0}")]
    PatternsUnavailable(String),

    /// Serialization or filesystem failure while writing the compiled database.
    #[error("[CITADEL_PATTERN_FAULT]: DATABASE_WRITE_FAILED -> {0}")]
    DatabaseWriteFailed(String),

    /// The DataStore backend reported a transient failure.
    #[error("[CITADEL_DS_FAULT]: STORE_UNAVAILABLE -> {0}")]
    StoreUnavailable(String),

    /// Configuration could not be constructed from the environment.
    #[error("[CITADEL_CONFIG_FAULT]: {0}")]
    Configuration(String),

    /// An analyzer identifier was referenced that isn't registered.
    #[error("[CITADEL_PROGRAMMER_FAULT]: UNKNOWN_ANALYZER -> {0}")]
    UnknownAnalyzer(String),
}

pub type Result<T> = std::result::Result<T, CitadelError>;
