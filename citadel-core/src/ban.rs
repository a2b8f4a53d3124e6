// [citadel-core/src/ban.rs]
/*!
 * =================================================================
 * APARATO: BAN RECORDS (ESTRATO L3)
 * RESPONSABILIDAD: LECTURA/ESCRITURA DE VEREDICTOS DE DESTIERRO
 *
 * Claves namespaced per spec.md §6: `citadel:ban:fingerprint:<fp>` y
 * `citadel:ban:ip:<ip>`. La presencia del registro, no su contenido, es
 * la señal: `is_banned` trata cualquier fallo del store como "no
 * baneado" (fail-open, spec.md §4.10 "Ban-store failures are fail-open").
 * =================================================================
 */

use std::sync::Arc;
use tracing::warn;

use crate::datastore::{DataStore, Value};

fn fingerprint_key(fingerprint: &str) -> String {
    format!("citadel:ban:fingerprint:{fingerprint}")
}

fn ip_key(ip: &str) -> String {
    format!("citadel:ban:ip:{ip}")
}

/// `true` iff a ban record exists for `fingerprint`, or for `ip` when
/// `check_ip` is set. Any DataStore failure reads as "not banned".
pub async fn is_banned(store: &dyn DataStore, fingerprint: Option<&str>, ip: Option<&str>, check_ip: bool) -> bool {
    if let Some(fingerprint) = fingerprint {
        if store.get(&fingerprint_key(fingerprint)).await.is_some() {
            return true;
        }
    }
    if check_ip {
        if let Some(ip) = ip {
            if store.get(&ip_key(ip)).await.is_some() {
                return true;
            }
        }
    }
    false
}

/// Sets a ban record for `fingerprint` with `duration_secs` TTL. Logs a
/// WARN and otherwise ignores failure -- a failed ban write never denies
/// the *current* request, it just means a future one won't be caught.
pub async fn ban_fingerprint(store: &Arc<dyn DataStore>, fingerprint: &str, duration_secs: u64) {
    let key = fingerprint_key(fingerprint);
    if !store.set(&key, Value::Integer(1), duration_secs).await {
        warn!(fingerprint, "failed to write ban record");
    }
}

pub async fn ban_ip(store: &Arc<dyn DataStore>, ip: &str, duration_secs: u64) {
    let key = ip_key(ip);
    if !store.set(&key, Value::Integer(1), duration_secs).await {
        warn!(ip, "failed to write ban record");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::memory::InMemoryDataStore;

    #[tokio::test]
    async fn unbanned_fingerprint_is_not_banned() {
        let store: Arc<dyn DataStore> = Arc::new(InMemoryDataStore::new());
        assert!(!is_banned(store.as_ref(), Some("fp-1"), None, false).await);
    }

    #[tokio::test]
    async fn banning_a_fingerprint_is_observed_immediately() {
        let store: Arc<dyn DataStore> = Arc::new(InMemoryDataStore::new());
        ban_fingerprint(&store, "fp-1", 60).await;
        assert!(is_banned(store.as_ref(), Some("fp-1"), None, false).await);
    }

    #[tokio::test]
    async fn ip_ban_is_ignored_unless_check_ip_is_set() {
        let store: Arc<dyn DataStore> = Arc::new(InMemoryDataStore::new());
        ban_ip(&store, "1.2.3.4", 60).await;
        assert!(!is_banned(store.as_ref(), Some("fp-1"), Some("1.2.3.4"), false).await);
        assert!(is_banned(store.as_ref(), Some("fp-1"), Some("1.2.3.4"), true).await);
    }
}
