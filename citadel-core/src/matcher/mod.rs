// [citadel-core/src/matcher/mod.rs]
/*!
 * =================================================================
 * APARATO: MULTI-PATTERN MATCHER CONTRACT (ESTRATO L2)
 * RESPONSABILIDAD: ESCANEAR UN BUFFER CONTRA N PATRONES COMPILADOS
 *
 * Dos backends satisfacen el mismo contrato de salida (spec.md §4.3):
 * `vectorized::VectorizedMatcher` (un `RegexSet` mas extraccion de
 * posiciones por patron, con serializacion + validacion por hash) y
 * `fallback::RegexFallbackMatcher` (cada patron evaluado por separado,
 * con un tope configurable de coincidencias por patron).
 * =================================================================
 */

pub mod fallback;
pub mod vectorized;

use crate::errors::{CitadelError, Result};

/// A single match of pattern `id` (its index in the constructor's
/// pattern list) against the scanned buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub id: usize,
    pub from: usize,
    pub to: usize,
    pub original_pattern: String,
    pub matched_substring: String,
}

pub trait MultiPatternMatcher: Send + Sync {
    /// Scans `buffer`, returning matches ordered by ascending `from`,
    /// ties broken by ascending `id`. Empty input yields an empty result.
    fn scan(&self, buffer: &[u8]) -> Vec<Match>;
}

/// Reads and validates lines from a patterns file per `spec.md` §6:
/// UTF-8, one regex per line, blank lines and `#`-prefixed lines ignored
/// after trimming.
pub fn read_patterns_file(path: &std::path::Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| CitadelError::PatternsUnavailable(format!("{}: {e}", path.display())))?;

    let patterns: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect();

    if patterns.is_empty() {
        return Err(CitadelError::PatternsUnavailable(format!(
            "{} contains no usable patterns",
            path.display()
        )));
    }

    Ok(patterns)
}

fn sort_matches(mut matches: Vec<Match>) -> Vec<Match> {
    matches.sort_by(|a, b| a.from.cmp(&b.from).then(a.id.cmp(&b.id)));
    matches
}
