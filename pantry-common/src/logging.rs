//! Tracing initialisation shared by every Pantry host process

use crate::{Error, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` is used
/// (e.g. `"pantry_session=debug"`). Installing twice returns an error
/// instead of panicking, so tests can call this freely and ignore the result.
pub fn init_tracing(default_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| Error::Config(format!("Invalid log filter '{}': {}", default_filter, e)))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| Error::Internal(format!("Tracing already initialised: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_second_call_is_an_error_not_a_panic() {
        let _ = init_tracing("pantry_common=debug");
        assert!(init_tracing("pantry_common=debug").is_err());
    }

    #[test]
    fn test_init_tracing_rejects_bad_filter() {
        std::env::remove_var("RUST_LOG");
        let result = init_tracing("pantry_common=[");
        assert!(result.is_err());
    }
}
