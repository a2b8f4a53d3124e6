// [citadel-core/src/bin/compile_regex.rs]
/*!
 * =================================================================
 * APARATO: PATTERN DATABASE COMPILER SHELL
 * CLASIFICACIÓN: APPLICATION LAYER (ENTRY POINT)
 * RESPONSABILIDAD: PRE-COMPILAR Y SERIALIZAR LA BASE DE PATRONES
 *
 * Lee el archivo de patrones de texto plano (`spec.md` §6), los compila
 * con `VectorizedMatcher::new` para detectar patrones inválidos antes de
 * desplegar, y serializa el resultado con su sidecar de hash SHA-256.
 * Sale con código 1 en cualquier fallo, 0 en éxito.
 * =================================================================
 */

use clap::Parser;
use citadel_core::matcher::vectorized::VectorizedMatcher;
use citadel_core::matcher::read_patterns_file;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

/// Compila un archivo de patrones de texto en una base de datos binaria.
#[derive(Parser, Debug)]
#[command(
    author = "Citadel Security Engineering",
    version,
    about = "Compila y valida la base de patrones regex usada por PayloadAnalyzer."
)]
struct CommandArguments {
    /// Ruta del archivo de patrones de texto plano, uno por línea.
    #[arg(short, long, value_name = "FILE_PATH")]
    patterns: PathBuf,

    /// Ruta de destino para la base de datos binaria compilada.
    #[arg(short = 'o', long, value_name = "FILE_PATH")]
    path: PathBuf,

    /// Recompila incluso si la base de datos existente ya es válida.
    #[arg(short, long, default_value_t = false)]
    force: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let cli_configuration = CommandArguments::parse();

    if !cli_configuration.force && VectorizedMatcher::is_database_valid(&cli_configuration.path, &cli_configuration.patterns) {
        info!(db_path = %cli_configuration.path.display(), "database already up to date, pass --force to recompile");
        return ExitCode::SUCCESS;
    }

    let patterns = match read_patterns_file(&cli_configuration.patterns) {
        Ok(patterns) => patterns,
        Err(error) => {
            error!(%error, "failed to read patterns file");
            return ExitCode::FAILURE;
        }
    };

    let matcher = match VectorizedMatcher::new(patterns) {
        Ok(matcher) => matcher,
        Err(error) => {
            error!(%error, "one or more patterns failed to compile");
            return ExitCode::FAILURE;
        }
    };

    match matcher.serialize_with_hash(&cli_configuration.path, &cli_configuration.patterns) {
        Ok(()) => {
            info!(db_path = %cli_configuration.path.display(), "pattern database compiled and validated");
            ExitCode::SUCCESS
        }
        Err(error) => {
            error!(%error, "failed to serialize pattern database");
            ExitCode::FAILURE
        }
    }
}
