// [citadel-core/src/matcher/fallback.rs]
/*!
 * =================================================================
 * APARATO: FALLBACK MATCHER (ESTRATO L2)
 * RESPONSABILIDAD: ESCANEO PATRON POR PATRON SIN PREFILTRO DE BLOQUE
 *
 * Se activa cuando `MatcherConfig::use_vectorized` es falso o cuando la
 * base de datos serializada no pasa `VectorizedMatcher::is_database_valid`.
 * Cada patron se evalua de forma independiente contra el buffer completo;
 * `max_matches_per_pattern` (spec.md §4.3, "Non-goals" no lo excluye) evita
 * que un patron degenerado (p. ej. `.*`) produzca una cantidad ilimitada
 * de coincidencias contra una carga util grande.
 * =================================================================
 */

use regex::Regex;

use super::{sort_matches, Match, MultiPatternMatcher};
use crate::errors::{CitadelError, Result};

pub struct RegexFallbackMatcher {
    patterns: Vec<String>,
    compiled: Vec<Regex>,
    max_matches_per_pattern: usize,
}

impl RegexFallbackMatcher {
    pub fn new(patterns: Vec<String>, max_matches_per_pattern: usize) -> Result<Self> {
        let mut compiled = Vec::with_capacity(patterns.len());
        for (index, pattern) in patterns.iter().enumerate() {
            let regex = Regex::new(pattern).map_err(|e| CitadelError::InvalidPattern {
                index,
                message: e.to_string(),
            })?;
            compiled.push(regex);
        }
        Ok(Self { patterns, compiled, max_matches_per_pattern })
    }
}

impl MultiPatternMatcher for RegexFallbackMatcher {
    fn scan(&self, buffer: &[u8]) -> Vec<Match> {
        if buffer.is_empty() {
            return Vec::new();
        }
        let Ok(text) = std::str::from_utf8(buffer) else { return Vec::new() };

        let mut matches = Vec::new();
        for (id, regex) in self.compiled.iter().enumerate() {
            for found in regex.find_iter(text).take(self.max_matches_per_pattern) {
                matches.push(Match {
                    id,
                    from: found.start(),
                    to: found.end(),
                    original_pattern: self.patterns[id].clone(),
                    matched_substring: found.as_str().to_string(),
                });
            }
        }
        sort_matches(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_every_pattern_independently() {
        let matcher =
            RegexFallbackMatcher::new(vec!["foo".into(), "bar".into()], 32).unwrap();
        let matches = matcher.scan(b"foo bar foo");
        assert_eq!(matches.len(), 3);
    }

    #[test]
    fn caps_matches_per_pattern() {
        let matcher = RegexFallbackMatcher::new(vec!["a".into()], 3).unwrap();
        let matches = matcher.scan(b"aaaaaa");
        assert_eq!(matches.len(), 3);
    }

    #[test]
    fn invalid_pattern_reports_index() {
        let err = RegexFallbackMatcher::new(vec!["ok".into(), "[".into()], 10).unwrap_err();
        match err {
            CitadelError::InvalidPattern { index, .. } => assert_eq!(index, 1),
            other => panic!("expected InvalidPattern, got {other:?}"),
        }
    }

    #[test]
    fn empty_buffer_yields_no_matches() {
        let matcher = RegexFallbackMatcher::new(vec!["a".into()], 10).unwrap();
        assert!(matcher.scan(b"").is_empty());
    }
}
