//! Tracing setup for the `kiln` binary.
//!
//! Logs go to stderr; stdout is reserved for the run summary or the JSON
//! run report.

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` if set, otherwise `level` for everything.
fn filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// Install the global subscriber. Only the first call has an effect.
///
/// With `json`, every event is one JSON object per line.
pub fn init_tracing(json: bool, level: Level) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_target(false)
        .with_writer(std::io::stderr);

    let installed = if json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    };

    if installed {
        tracing::debug!(json, level = %level, "Tracing initialised");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing(false, Level::INFO);
        init_tracing(true, Level::DEBUG);
    }
}
