// [citadel-core/src/analyzers/spamminess.rs]
/*!
 * =================================================================
 * APARATO: SPAMMINESS ANALYZER (ESTRATO L3)
 * RESPONSABILIDAD: ENTROPIA, PATRONES DE TECLADO/SPAM, REPETICION, ZIPF
 *
 * Cinco componentes por cadena de texto, cada uno pesado y sumado
 * (spec.md §4.6). El cache hash->score es un `DashMap` acotado con
 * evict-on-insert de la entrada mas antigua (spec.md §9, "Eviction
 * choice... the implementer may choose any O(1) bounded policy"). Un
 * cuerpo que no parsea como JSON se reintenta como
 * `application/x-www-form-urlencoded` antes de puntuar en 0.0.
 * =================================================================
 */

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex as SyncMutex;

use super::{AnalysisContext, Analyzer};
use crate::config::{SpamminessConfig, SpamminessWeights};
use crate::datastore::{DataStore, Value};

const KEYBOARD_RUNS: &[&str] = &["qwert", "asdf", "zxcv", "12345", "qwerty", "asdfgh"];
const ALPHABET: &str = "abcdefghijklmnopqrstuvwxyz";
const DIGITS: &str = "0123456789";

pub struct SpamminessAnalyzer {
    config: SpamminessConfig,
    store: Arc<dyn DataStore>,
    cache: DashMap<u64, f64>,
    cache_order: SyncMutex<VecDeque<u64>>,
}

fn hash_text(text: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

fn shannon_entropy(text: &str) -> f64 {
    if text.is_empty() {
        return 0.0;
    }
    let mut counts = std::collections::HashMap::new();
    for byte in text.bytes() {
        *counts.entry(byte).or_insert(0u32) += 1;
    }
    let len = text.len() as f64;
    -counts
        .values()
        .map(|&count| {
            let p = count as f64 / len;
            p * p.log2()
        })
        .sum::<f64>()
}

fn keyboard_pattern_score(text: &str) -> f64 {
    let lower = text.to_lowercase();
    let has_keyboard_hit = KEYBOARD_RUNS.iter().any(|run| lower.contains(run));

    let has_consecutive_run = |alphabet: &str| -> bool {
        let bytes = alphabet.as_bytes();
        for window in bytes.windows(4) {
            let needle: String = window.iter().map(|&b| b as char).collect();
            if lower.contains(&needle) {
                return true;
            }
        }
        false
    };
    let has_run = has_consecutive_run(ALPHABET) || has_consecutive_run(DIGITS);

    if has_keyboard_hit {
        1.0
    } else if has_run {
        0.8
    } else {
        0.0
    }
}

fn spam_pattern_score(text: &str) -> f64 {
    let mut score = 0.0_f64;

    let currency_digits = regex_currency().is_match(text);
    if currency_digits {
        score += 0.25;
    }

    let punctuation_run = regex_punctuation().is_match(text);
    if punctuation_run {
        score += 0.3;
    }

    let caps_run = text.chars().filter(|c| c.is_ascii_uppercase()).count() >= 4;
    if caps_run {
        score += 0.25;
    }

    if has_repeated_substring(text) {
        score += 0.4;
    }

    score.min(1.0)
}

fn regex_currency() -> &'static regex::Regex {
    static RE: once_cell::sync::Lazy<regex::Regex> =
        once_cell::sync::Lazy::new(|| regex::Regex::new(r"[$€£¥]\s?\d").unwrap());
    &RE
}

fn regex_punctuation() -> &'static regex::Regex {
    static RE: once_cell::sync::Lazy<regex::Regex> =
        once_cell::sync::Lazy::new(|| regex::Regex::new(r"[!?]{3,}").unwrap());
    &RE
}

fn has_repeated_substring(text: &str) -> bool {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() < 6 {
        return false;
    }
    for len in 2..=4 {
        for start in 0..chars.len().saturating_sub(len * 2) {
            let a: String = chars[start..start + len].iter().collect();
            let b: String = chars[start + len..start + 2 * len].iter().collect();
            if a == b {
                return true;
            }
        }
    }
    false
}

fn repetitive_content_score(text: &str, max_repetition_ratio: f64) -> f64 {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return 0.0;
    }

    let mut max_run = 1usize;
    let mut current_run = 1usize;
    for window in chars.windows(2) {
        if window[0] == window[1] {
            current_run += 1;
            max_run = max_run.max(current_run);
        } else {
            current_run = 1;
        }
    }
    let consecutive_ratio = max_run as f64 / chars.len() as f64;

    let words: Vec<&str> = text.split_whitespace().collect();
    let unique_ratio = if words.is_empty() {
        1.0
    } else {
        let unique: std::collections::HashSet<&str> = words.iter().copied().collect();
        unique.len() as f64 / words.len() as f64
    };
    let uniqueness_penalty = 1.0 - unique_ratio;

    let compression_ratio = estimate_compression_ratio(text);

    let mut score: f64 = 0.0;
    if consecutive_ratio > max_repetition_ratio {
        score = score.max(consecutive_ratio);
    }
    score = score.max(uniqueness_penalty);
    if compression_ratio >= max_repetition_ratio {
        score = score.max(compression_ratio);
    }
    score.clamp(0.0, 1.0)
}

/// Cheap run-length proxy for a real compressor: ratio of bytes saved by
/// collapsing consecutive duplicate characters, as a stand-in signal for
/// highly repetitive text (spec.md §4.6, "compression ratio").
fn estimate_compression_ratio(text: &str) -> f64 {
    if text.is_empty() {
        return 0.0;
    }
    let chars: Vec<char> = text.chars().collect();
    let mut collapsed = 0usize;
    let mut i = 0;
    while i < chars.len() {
        let mut j = i + 1;
        while j < chars.len() && chars[j] == chars[i] {
            j += 1;
        }
        collapsed += 1;
        i = j;
    }
    1.0 - (collapsed as f64 / chars.len() as f64)
}

fn suspicious_entropy_score(text: &str, min_threshold: f64, max_threshold: f64) -> f64 {
    let entropy = shannon_entropy(text);
    if entropy < min_threshold {
        ((min_threshold - entropy) / min_threshold).clamp(0.0, 1.0)
    } else if entropy > max_threshold {
        ((entropy - max_threshold) / max_threshold).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn vowel_ratio_score(text: &str) -> Option<f64> {
    let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.is_empty() {
        return None;
    }
    let vowels = letters.iter().filter(|c| "aeiouAEIOU".contains(**c)).count();
    let ratio = vowels as f64 / letters.len() as f64;
    // Natural-language text sits roughly in [0.3, 0.5]; deviation signals gibberish.
    Some((0.4 - ratio).abs().min(0.4) / 0.4)
}

fn consonant_run_score(text: &str) -> Option<f64> {
    let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.is_empty() {
        return None;
    }
    let is_vowel = |c: &char| "aeiouAEIOU".contains(*c);
    let mut max_run = 0usize;
    let mut current = 0usize;
    for c in &letters {
        if !is_vowel(c) {
            current += 1;
            max_run = max_run.max(current);
        } else {
            current = 0;
        }
    }
    Some((max_run as f64 / 6.0).min(1.0))
}

fn char_distribution_cv_score(text: &str) -> Option<f64> {
    let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() < 4 {
        return None;
    }
    let mut counts = std::collections::HashMap::new();
    for c in &letters {
        *counts.entry(c.to_ascii_lowercase()).or_insert(0u32) += 1;
    }
    let values: Vec<f64> = counts.values().map(|&v| v as f64).collect();
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    if mean == 0.0 {
        return Some(0.0);
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    let cv = variance.sqrt() / mean;
    Some((cv / 2.0).min(1.0))
}

fn bigram_entropy_score(text: &str) -> Option<f64> {
    let letters: Vec<char> = text.to_lowercase().chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() < 3 {
        return None;
    }
    let mut counts = std::collections::HashMap::new();
    for window in letters.windows(2) {
        *counts.entry((window[0], window[1])).or_insert(0u32) += 1;
    }
    let total = letters.len() as f64 - 1.0;
    let entropy = -counts
        .values()
        .map(|&c| {
            let p = c as f64 / total;
            p * p.log2()
        })
        .sum::<f64>();
    // Max bigram entropy for 26-letter alphabet is log2(26*26)=9.4; low entropy
    // (too repetitive) or entropy near the ceiling (too random) both signal gibberish.
    let max_entropy = 9.4_f64;
    let normalized = entropy / max_entropy;
    Some((normalized - 0.5).abs() * 2.0)
}

fn zipf_deviation_score(text: &str, max_correlation_threshold: f64) -> Option<f64> {
    let letters: Vec<char> = text.to_lowercase().chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() < 5 {
        return None;
    }
    let mut counts = std::collections::HashMap::new();
    for c in &letters {
        *counts.entry(*c).or_insert(0u32) += 1;
    }
    let mut frequencies: Vec<f64> = counts.values().map(|&v| v as f64).collect();
    frequencies.sort_by(|a, b| b.partial_cmp(a).unwrap());

    if frequencies.is_empty() {
        return None;
    }
    let top = frequencies[0];
    let expected: Vec<f64> = (1..=frequencies.len()).map(|rank| top / rank as f64).collect();

    let correlation = pearson_correlation(&frequencies, &expected);
    if correlation > max_correlation_threshold {
        Some(0.0)
    } else {
        Some((1.0 - correlation / max_correlation_threshold).clamp(0.0, 1.0))
    }
}

fn pearson_correlation(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    if n == 0.0 {
        return 0.0;
    }
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..a.len() {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a == 0.0 || var_b == 0.0 {
        return 0.0;
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}

fn gibberish_score(text: &str, max_correlation_threshold: f64) -> f64 {
    let components = [
        vowel_ratio_score(text),
        consonant_run_score(text),
        char_distribution_cv_score(text),
        bigram_entropy_score(text),
        zipf_deviation_score(text, max_correlation_threshold),
    ];
    let present: Vec<f64> = components.into_iter().flatten().collect();
    if present.is_empty() {
        0.0
    } else {
        present.iter().sum::<f64>() / present.len() as f64
    }
}

fn truncate_for_scoring(text: &str) -> std::borrow::Cow<'_, str> {
    if text.chars().count() <= 10_000 {
        return std::borrow::Cow::Borrowed(text);
    }
    let chars: Vec<char> = text.chars().collect();
    let head: String = chars[..5000].iter().collect();
    let tail: String = chars[chars.len() - 5000..].iter().collect();
    std::borrow::Cow::Owned(format!("{head}{tail}"))
}

fn score_one_string(text: &str, config: &SpamminessConfig) -> f64 {
    if text.chars().count() < config.min_field_length {
        return 0.0;
    }
    let text = truncate_for_scoring(text);
    let weights: &SpamminessWeights = &config.weights;

    let keyboard = keyboard_pattern_score(&text) * weights.keyboard_pattern;
    let spam = spam_pattern_score(&text) * weights.spam_pattern;
    let repetitive = repetitive_content_score(&text, config.max_repetition_ratio) * weights.repetitive_content;
    let entropy =
        suspicious_entropy_score(&text, config.min_entropy_threshold, config.max_entropy_threshold) * weights.suspicious_entropy;
    let gibberish = gibberish_score(&text, config.max_correlation_threshold) * weights.gibberish_text;

    keyboard + spam + repetitive + entropy + gibberish
}

/// Recursively walks a JSON value, collecting leaf strings long enough to
/// score. Arrays are sampled at at most 50 items; long strings are
/// truncated by `score_one_string` itself.
fn collect_leaf_strings(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::String(s) => out.push(s.clone()),
        serde_json::Value::Array(items) => {
            for item in items.iter().take(50) {
                collect_leaf_strings(item, out);
            }
        }
        serde_json::Value::Object(map) => {
            for (_, v) in map {
                collect_leaf_strings(v, out);
            }
        }
        _ => {}
    }
}

/// Decodes `application/x-www-form-urlencoded` bodies into their value
/// strings, used as a fallback when a body isn't JSON (spec.md §4.6).
fn form_urlencoded_values(text: &str) -> Vec<String> {
    url::form_urlencoded::parse(text.as_bytes())
        .take(50)
        .map(|(_, value)| value.into_owned())
        .collect()
}

impl SpamminessAnalyzer {
    pub fn new(config: SpamminessConfig, store: Arc<dyn DataStore>) -> Self {
        let capacity = config.cache_capacity;
        Self {
            config,
            store,
            cache: DashMap::with_capacity(capacity),
            cache_order: SyncMutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    fn cached_or_compute(&self, text: &str) -> f64 {
        let key = hash_text(text);
        if let Some(score) = self.cache.get(&key) {
            return *score;
        }
        let score = score_one_string(text, &self.config);
        self.insert_cache(key, score);
        score
    }

    fn insert_cache(&self, key: u64, score: f64) {
        if self.cache.len() >= self.config.cache_capacity {
            let mut order = self.cache_order.lock().unwrap();
            if let Some(oldest) = order.pop_front() {
                self.cache.remove(&oldest);
            }
        }
        self.cache.insert(key, score);
        self.cache_order.lock().unwrap().push_back(key);
    }
}

#[async_trait]
impl Analyzer for SpamminessAnalyzer {
    fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn requires_body(&self) -> bool {
        true
    }

    fn uses_external_resources(&self) -> bool {
        false
    }

    fn identifier(&self) -> &str {
        "spamminess"
    }

    async fn analyze(&self, ctx: &AnalysisContext<'_>) -> f64 {
        if !self.config.enabled {
            return 0.0;
        }
        let Some(body) = ctx.body else { return 0.0 };
        if body.is_empty() {
            return 0.0;
        }
        let Ok(text) = std::str::from_utf8(body) else { return 0.0 };

        let mut leaves = Vec::new();
        match serde_json::from_str::<serde_json::Value>(text) {
            Ok(parsed) => collect_leaf_strings(&parsed, &mut leaves),
            Err(_) => leaves.extend(form_urlencoded_values(text)),
        }
        if leaves.is_empty() {
            return 0.0;
        }

        let total: f64 = leaves.iter().map(|leaf| self.cached_or_compute(leaf)).sum();
        let score = total.min(self.config.max_score);

        if let Some(fingerprint) = ctx.fingerprint {
            let key = format!("spamminess:{fingerprint}");
            self.store.set(&key, Value::Double(score), self.config.ttl_secs).await;
        }

        score
    }
}
