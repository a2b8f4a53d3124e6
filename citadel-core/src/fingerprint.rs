// [citadel-core/src/fingerprint.rs]
/*!
 * =================================================================
 * APARATO: FINGERPRINT EXTRACTOR (ESTRATO L2)
 * RESPONSABILIDAD: DERIVAR UNA IDENTIDAD DE CLIENTE ESTABLE
 *
 * Precedencia (spec.md §4.2): header configurado, luego cookie
 * configurada, luego SHA-256 de IP+UA segun las features habilitadas.
 * Si ninguna fuente produce una cadena no vacia, la huella esta
 * ausente y los analizadores dependientes deben cortocircuitar a 0.0.
 * =================================================================
 */

use sha2::{Digest, Sha256};

use crate::config::FingerprintConfig;

/// Borrowed view over the parts of an inbound request the extractor
/// needs. Framework glue (`citadel-gateway`) builds this from whatever
/// request type axum hands it; the core never depends on axum's request
/// type directly here.
#[derive(Debug, Clone, Copy)]
pub struct RequestView<'a> {
    pub header_fingerprint: Option<&'a str>,
    pub cookie_fingerprint: Option<&'a str>,
    pub remote_ip: Option<&'a str>,
    pub user_agent: Option<&'a str>,
}

/// Extracts a stable fingerprint for `request` under `config`, per the
/// precedence rule in `spec.md` §4.2. Returns `None` when no source
/// yields a usable identity.
pub fn extract(request: &RequestView<'_>, config: &FingerprintConfig) -> Option<String> {
    if config.header_name.is_some() {
        if let Some(value) = request.header_fingerprint {
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }

    if config.cookie_name.is_some() {
        if let Some(value) = request.cookie_fingerprint {
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }

    let mut canonical = String::new();
    if config.collect_ip {
        if let Some(ip) = request.remote_ip {
            canonical.push_str(ip);
        }
    }
    if config.collect_ua {
        if let Some(ua) = request.user_agent {
            canonical.push('|');
            canonical.push_str(ua);
        }
    }

    if canonical.trim_matches('|').is_empty() {
        return None;
    }

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Some(hex::encode(hasher.finalize()))
}
