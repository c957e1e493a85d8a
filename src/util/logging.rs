//! Tracing subscriber setup for hosts embedding the data layer.

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "agri_sync=info";

/// Install a fmt subscriber. Safe to call more than once; later calls are no-ops.
pub fn init_logging(filter: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter.unwrap_or(DEFAULT_FILTER)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_logging(Some("agri_sync=debug"));
        init_logging(None);
        tracing::debug!("logging initialised twice without panicking");
    }
}
