//! Configuration loading
//!
//! Defaults, then the TOML file (if any), then command line overrides. The
//! result is validated once; nothing changes after startup.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use platform::MirrorConfig;

use crate::cli::Cli;

/// Parse a TOML document. Missing sections and fields keep their defaults.
pub fn parse(text: &str) -> Result<MirrorConfig> {
    toml::from_str(text).context("invalid configuration")
}

/// Read and parse a configuration file.
pub fn load_file(path: &Path) -> Result<MirrorConfig> {
    let text = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    parse(&text).with_context(|| format!("in {}", path.display()))
}

/// Build the effective configuration for `cli`.
pub fn resolve(cli: &Cli) -> Result<MirrorConfig> {
    let mut config = match &cli.config {
        Some(path) => load_file(path)?,
        None => MirrorConfig::default(),
    };
    cli.apply(&mut config);
    config.validate().context("configuration rejected")?;
    Ok(config)
}

/// Render `config` back to TOML.
pub fn render(config: &MirrorConfig) -> Result<String> {
    toml::to_string_pretty(config).context("failed to serialize configuration")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use clap::Parser;
    use platform::DiffMode;
    use std::io::Write;

    #[test]
    fn empty_document_is_the_default() {
        assert_eq!(parse("").unwrap(), MirrorConfig::default());
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let config = parse(
            r#"
            [display]
            width = 320
            height = 240
            row_order_swap = false

            [diff]
            mode = "none"
            "#,
        )
        .unwrap();
        assert_eq!(config.display.width, 320);
        assert_eq!(config.display.dc_pin, 25);
        assert_eq!(config.diff.mode, DiffMode::Full);
        assert_eq!(config.pacing.target_fps, 60);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(parse("[display]\ncolour = 1\n").is_err());
    }

    #[test]
    fn file_then_flags_then_validation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[display]\nwidth = 100\nheight = 50\n\n[pacing]\ntarget_fps = 25").unwrap();
        let path = file.path().to_str().unwrap();

        let cli = Cli::try_parse_from(["fbmirror", "--config", path, "--height", "60"]).unwrap();
        let config = resolve(&cli).unwrap();
        assert_eq!((config.display.width, config.display.height), (100, 60));
        assert_eq!(config.pacing.target_fps, 25);

        let cli = Cli::try_parse_from(["fbmirror", "--config", path, "--fps", "0"]).unwrap();
        let err = resolve(&cli).unwrap_err();
        assert!(format!("{err:#}").contains("frame rate"));
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = load_file(Path::new("/nonexistent/fbmirror.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/fbmirror.toml"));
    }

    #[test]
    fn rendered_config_parses_back() {
        let mut config = MirrorConfig::default();
        config.bus.queue_bytes = Some(1 << 20);
        let text = render(&config).unwrap();
        assert_eq!(parse(&text).unwrap(), config);
    }
}
