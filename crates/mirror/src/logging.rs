//! `tracing` subscriber setup

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

/// Filter used when neither `--log-level` nor `RUST_LOG` is set.
pub const DEFAULT_FILTER: &str = "info";

/// Build the filter: explicit directive first, then `RUST_LOG`, then
/// [`DEFAULT_FILTER`].
pub fn filter(directive: Option<&str>) -> Result<EnvFilter> {
    match directive {
        Some(directive) => EnvFilter::try_new(directive).with_context(|| format!("bad log filter `{directive}`")),
        None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))),
    }
}

/// Install the global subscriber writing to stderr.
pub fn init(directive: Option<&str>) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(filter(directive)?)
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .try_init()
        .map_err(anyhow::Error::msg)
        .context("failed to install the log subscriber")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn explicit_directive_wins() {
        let filter = filter(Some("spibus=trace,warn")).unwrap();
        assert!(filter.to_string().contains("spibus=trace"));
    }

    #[test]
    fn malformed_directive_is_an_error() {
        assert!(filter(Some("spibus=loud")).is_err());
    }
}
