// [citadel-core/src/telemetry.rs]
/*!
 * =================================================================
 * APARATO: OBSERVABILITY INIT (ESTRATO L1)
 * RESPONSABILIDAD: TRAZADO ESTRUCTURADO Y CAPTURA DE PANICOS
 *
 * Adaptado de `prospector-shared-heimdall::init_tracing`: mismo modo
 * dual (compacto en desarrollo, JSON aplanado en produccion) y el
 * mismo hook de panico, sin el envio a un dashboard externo ya que
 * Citadel no posee un bus de eventos propio.
 * =================================================================
 */

use std::panic;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs a global `tracing` subscriber scoped to `service_name` and a
/// panic hook that logs the panic location/payload via `tracing::error!`
/// before the default hook runs. Safe to call once per process; a second
/// call panics (mirrors `tracing_subscriber`'s own global-subscriber
/// contract).
pub fn init(service_name: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "{service_name}={level},tower_http=warn,hyper=warn",
            level = if cfg!(debug_assertions) { "debug" } else { "info" }
        )
        .into()
    });

    if cfg!(debug_assertions) {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_target(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().flatten_event(true))
            .init();
    }

    panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let payload = panic_info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| panic_info.payload().downcast_ref::<String>().map(String::as_str))
            .unwrap_or("non-string panic payload");

        tracing::error!(location = %location, payload = %payload, "citadel panicked");
    }));
}
