// [citadel-core/src/matcher/vectorized.rs]
/*!
 * =================================================================
 * APARATO: VECTORIZED MATCHER (ESTRATO L2)
 * RESPONSABILIDAD: PREFILTRO EN BLOQUE + EXTRACCION DE POSICIONES,
 * CON BASE DE DATOS SERIALIZADA Y VALIDADA POR HASH
 *
 * Adaptado de `libs/core/probabilistic/src/filter_wrapper.rs`: el mismo
 * patron "serializar con bincode, validar por hash antes de confiar en
 * el artefacto en disco" se aplica aqui a la lista de patrones fuente en
 * vez de a un filtro de Bloom. El candado exclusivo de escritura usa
 * `fd-lock` (ver DESIGN.md) sobre el par `.db`/`.hash`; los lectores solo
 * toman un candado compartido para la validacion del hash -- el escaneo
 * en si opera sobre el automaton ya cargado en memoria y no bloquea.
 * =================================================================
 */

use fd_lock::{RwLock as FileRwLock};
use regex::{Regex, RegexSet};
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use super::{sort_matches, Match, MultiPatternMatcher};
use crate::errors::{CitadelError, Result};

/// Block-mode multi-pattern automaton: a `RegexSet` for a fast yes/no
/// prefilter plus one compiled `Regex` per pattern for span extraction.
pub struct VectorizedMatcher {
    patterns: Vec<String>,
    set: RegexSet,
    compiled: Vec<Regex>,
}

fn compile(patterns: &[String]) -> Result<(RegexSet, Vec<Regex>)> {
    let mut compiled = Vec::with_capacity(patterns.len());
    for (index, pattern) in patterns.iter().enumerate() {
        let regex = Regex::new(pattern).map_err(|e| CitadelError::InvalidPattern {
            index,
            message: e.to_string(),
        })?;
        compiled.push(regex);
    }

    // Every pattern already compiled individually above, so this can only
    // fail for reasons unrelated to a single pattern's syntax (e.g. the
    // combined automaton exceeding size limits); report it at index 0.
    let set = RegexSet::new(patterns.iter()).map_err(|e| CitadelError::InvalidPattern {
        index: 0,
        message: e.to_string(),
    })?;

    Ok((set, compiled))
}

fn sha256_hex_of_file(path: &Path) -> Option<String> {
    let mut file = File::open(path).ok()?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents).ok()?;
    let mut hasher = Sha256::new();
    hasher.update(&contents);
    Some(hex::encode(hasher.finalize()))
}

impl VectorizedMatcher {
    /// Compiles `patterns` in order; `id` in resulting matches is the
    /// index into this slice. Fails with `InvalidPattern(index, message)`
    /// on the first pattern that doesn't compile as a regex.
    pub fn new(patterns: Vec<String>) -> Result<Self> {
        let (set, compiled) = compile(&patterns)?;
        Ok(Self { patterns, set, compiled })
    }

    /// Rebuilds a matcher from a previously-serialized pattern list,
    /// bypassing the patterns-file read (load-from-serialized path,
    /// `spec.md` §4.3).
    pub fn load_from_serialized(db_path: &Path) -> Result<Self> {
        let mut lock = FileRwLock::new(
            File::open(db_path).map_err(|e| CitadelError::DatabaseWriteFailed(e.to_string()))?,
        );
        let guard = lock.read().map_err(|e| CitadelError::DatabaseWriteFailed(e.to_string()))?;
        let mut bytes = Vec::new();
        (&*guard).read_to_end(&mut bytes).map_err(|e| CitadelError::DatabaseWriteFailed(e.to_string()))?;
        drop(guard);

        let patterns: Vec<String> = bincode::deserialize(&bytes)
            .map_err(|e| CitadelError::DatabaseWriteFailed(format!("corrupt pattern database: {e}")))?;

        Self::new(patterns)
    }

    /// Writes the compiled pattern list to `db_path` and the SHA-256 of
    /// `patterns_path`'s contents to `db_path.hash`, under an exclusive
    /// advisory lock held for the whole write.
    pub fn serialize_with_hash(&self, db_path: &Path, patterns_path: &Path) -> Result<()> {
        let hash = sha256_hex_of_file(patterns_path)
            .ok_or_else(|| CitadelError::PatternsUnavailable(patterns_path.display().to_string()))?;

        let serialized = bincode::serialize(&self.patterns)
            .map_err(|e| CitadelError::DatabaseWriteFailed(e.to_string()))?;

        let db_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(db_path)
            .map_err(|e| CitadelError::DatabaseWriteFailed(e.to_string()))?;
        let mut lock = FileRwLock::new(db_file);
        let mut guard = lock.write().map_err(|e| CitadelError::DatabaseWriteFailed(e.to_string()))?;
        guard.write_all(&serialized).map_err(|e| CitadelError::DatabaseWriteFailed(e.to_string()))?;
        drop(guard);

        let hash_path = hash_sidecar_path(db_path);
        std::fs::write(&hash_path, hash).map_err(|e| CitadelError::DatabaseWriteFailed(e.to_string()))?;

        Ok(())
    }

    /// `true` iff both files exist, the patterns file is non-empty, and
    /// the stored hash equals the freshly computed one.
    pub fn is_database_valid(db_path: &Path, patterns_path: &Path) -> bool {
        let hash_path = hash_sidecar_path(db_path);
        if !db_path.exists() || !hash_path.exists() {
            return false;
        }

        let Ok(patterns_metadata) = std::fs::metadata(patterns_path) else { return false };
        if patterns_metadata.len() == 0 {
            return false;
        }

        let Ok(hash_file) = File::open(&hash_path) else { return false };
        let mut lock = FileRwLock::new(hash_file);
        let Ok(guard) = lock.read() else { return false };
        let mut stored_hash = String::new();
        if (&*guard).read_to_string(&mut stored_hash).is_err() {
            return false;
        }
        drop(guard);

        match sha256_hex_of_file(patterns_path) {
            Some(fresh_hash) => fresh_hash == stored_hash.trim(),
            None => false,
        }
    }
}

fn hash_sidecar_path(db_path: &Path) -> std::path::PathBuf {
    let mut os_string = db_path.as_os_str().to_os_string();
    os_string.push(".hash");
    std::path::PathBuf::from(os_string)
}

impl MultiPatternMatcher for VectorizedMatcher {
    fn scan(&self, buffer: &[u8]) -> Vec<Match> {
        if buffer.is_empty() {
            return Vec::new();
        }
        let Ok(text) = std::str::from_utf8(buffer) else { return Vec::new() };

        let mut matches = Vec::new();
        for id in self.set.matches(text).into_iter() {
            let regex = &self.compiled[id];
            for found in regex.find_iter(text) {
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
    use tempfile::tempdir;

    #[test]
    fn invalid_pattern_reports_index_and_message() {
        let err = VectorizedMatcher::new(vec!["ok".into(), "(unclosed".into()]).unwrap_err();
        match err {
            CitadelError::InvalidPattern { index, .. } => assert_eq!(index, 1),
            other => panic!("expected InvalidPattern, got {other:?}"),
        }
    }

    #[test]
    fn empty_buffer_yields_empty_result() {
        let matcher = VectorizedMatcher::new(vec!["a+".into()]).unwrap();
        assert!(matcher.scan(b"").is_empty());
    }

    #[test]
    fn matches_are_ordered_by_from_then_id() {
        let matcher = VectorizedMatcher::new(vec![r"b".into(), r"a".into()]).unwrap();
        let matches = matcher.scan(b"ab");
        assert_eq!(matches[0].from, 0);
        assert_eq!(matches[0].id, 1); // pattern "a" at position 0
        assert_eq!(matches[1].from, 1);
        assert_eq!(matches[1].id, 0); // pattern "b" at position 1
    }

    #[test]
    fn serialize_then_validate_round_trips_and_detects_mutation() {
        let dir = tempdir().unwrap();
        let patterns_path = dir.path().join("patterns.txt");
        let db_path = dir.path().join("patterns.db");

        std::fs::write(&patterns_path, "SELECT\\s+.*\\s+FROM\n# comment\n\nhello\n").unwrap();

        let matcher = VectorizedMatcher::new(vec![
            r"SELECT\s+.*\s+FROM".to_string(),
            "hello".to_string(),
        ])
        .unwrap();

        matcher.serialize_with_hash(&db_path, &patterns_path).unwrap();
        assert!(VectorizedMatcher::is_database_valid(&db_path, &patterns_path));

        let first_hash = std::fs::read_to_string(format!("{}.hash", db_path.display())).unwrap();
        matcher.serialize_with_hash(&db_path, &patterns_path).unwrap();
        let second_hash = std::fs::read_to_string(format!("{}.hash", db_path.display())).unwrap();
        assert_eq!(first_hash, second_hash, "re-serializing unchanged patterns is byte-identical");

        let mut contents = std::fs::read_to_string(&patterns_path).unwrap();
        contents.push('x');
        std::fs::write(&patterns_path, contents).unwrap();
        assert!(!VectorizedMatcher::is_database_valid(&db_path, &patterns_path));

        matcher.serialize_with_hash(&db_path, &patterns_path).unwrap();
        assert!(VectorizedMatcher::is_database_valid(&db_path, &patterns_path));
    }

    #[test]
    fn load_from_serialized_reproduces_scan_semantics() {
        let dir = tempdir().unwrap();
        let patterns_path = dir.path().join("patterns.txt");
        let db_path = dir.path().join("patterns.db");
        std::fs::write(&patterns_path, "foo\nbar\n").unwrap();

        let matcher = VectorizedMatcher::new(vec!["foo".into(), "bar".into()]).unwrap();
        matcher.serialize_with_hash(&db_path, &patterns_path).unwrap();

        let loaded = VectorizedMatcher::load_from_serialized(&db_path).unwrap();
        assert_eq!(loaded.scan(b"foo bar"), matcher.scan(b"foo bar"));
    }
}
