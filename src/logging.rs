//! Logging initialization.
//!
//! Events go to stderr so that `fill` can keep stdout for the page itself.
//! `RUST_LOG` always wins; otherwise the config filter is used, otherwise
//! `info`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info";

/// Pick the filter directive to use when `RUST_LOG` is not set.
fn fallback_filter(config_filter: Option<&str>) -> &str {
    config_filter.unwrap_or(DEFAULT_FILTER)
}

pub fn init_logging(config_filter: Option<&str>) {
    let env_filter = match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => EnvFilter::new(fallback_filter(config_filter)),
    };

    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_ansi(std::env::var_os("NO_COLOR").is_none()),
        )
        .with(env_filter)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_prefers_config_filter() {
        assert_eq!(fallback_filter(Some("mdregions=debug")), "mdregions=debug");
        assert_eq!(fallback_filter(None), "info");
    }
}
