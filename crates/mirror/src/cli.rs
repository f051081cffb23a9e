//! Command line interface
//!
//! Every flag except `--config`, `--log-level` and the run controls overrides
//! one field of the loaded [`MirrorConfig`]; unset flags leave the file (or
//! default) value alone.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use platform::{DiffMode, MirrorConfig};

/// `fbmirror` command line.
#[derive(Debug, Parser)]
#[command(name = "fbmirror")]
#[command(about = "Mirror an RGB565 framebuffer to an ST7789 panel over SPI0", long_about = None)]
#[command(version)]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Drive the in-memory SPI0 and virtual panel instead of /dev/mem
    #[arg(long)]
    pub simulate: bool,

    /// Log filter (overrides RUST_LOG), e.g. `debug` or `spibus=trace`
    #[arg(long)]
    pub log_level: Option<String>,

    /// Frame source: `pattern` or a path to raw RGB565 frames (e.g. /dev/fb1)
    #[arg(short, long, default_value = "pattern")]
    pub source: String,

    /// Stop after this many frames (default: run until signalled)
    #[arg(long)]
    pub frames: Option<u64>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    pub print_config: bool,

    /// Visible width in pixels
    #[arg(long)]
    pub width: Option<u16>,

    /// Visible height in pixels
    #[arg(long)]
    pub height: Option<u16>,

    /// Source scanline stride in bytes
    #[arg(long)]
    pub stride: Option<usize>,

    /// Frame differencing algorithm
    #[arg(long, value_enum)]
    pub diff: Option<DiffArg>,

    /// Unchanged pixels a span may absorb
    #[arg(long)]
    pub merge_threshold: Option<usize>,

    /// Never fall back to interlaced updates
    #[arg(long)]
    pub no_interlace: bool,

    /// Frame rate budget for pacing and interlacing
    #[arg(long)]
    pub fps: Option<u32>,

    /// Runtime SPI0 clock divider
    #[arg(long)]
    pub clock_divider: Option<u16>,
}

/// `--diff` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DiffArg {
    /// Coarse when the geometry allows it, exact otherwise
    Auto,
    /// Pixel-exact diff
    Exact,
    /// Four pixels per word
    Coarse,
    /// Resend the whole frame
    None,
}

impl From<DiffArg> for DiffMode {
    fn from(arg: DiffArg) -> Self {
        match arg {
            DiffArg::Auto => Self::Auto,
            DiffArg::Exact => Self::Exact,
            DiffArg::Coarse => Self::Coarse,
            DiffArg::None => Self::Full,
        }
    }
}

impl Cli {
    /// Apply the command line overrides on top of `config`.
    pub fn apply(&self, config: &mut MirrorConfig) {
        if let Some(width) = self.width {
            config.display.width = width;
        }
        if let Some(height) = self.height {
            config.display.height = height;
        }
        if let Some(stride) = self.stride {
            config.display.stride_bytes = stride;
        }
        if let Some(mode) = self.diff {
            config.diff.mode = mode.into();
        }
        if let Some(threshold) = self.merge_threshold {
            config.diff.span_merge_threshold = threshold;
        }
        if self.no_interlace {
            config.diff.interlace = false;
        }
        if let Some(fps) = self.fps {
            config.pacing.target_fps = fps;
        }
        if let Some(divider) = self.clock_divider {
            config.bus.clock_divider = divider;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn no_flags_leave_config_alone() {
        let cli = Cli::try_parse_from(["fbmirror"]).unwrap();
        let mut config = MirrorConfig::default();
        cli.apply(&mut config);
        assert_eq!(config, MirrorConfig::default());
        assert_eq!(cli.source, "pattern");
        assert!(!cli.simulate);
    }

    #[test]
    fn overrides_land_in_their_sections() {
        let cli = Cli::try_parse_from([
            "fbmirror",
            "--width",
            "128",
            "--height",
            "64",
            "--diff",
            "none",
            "--no-interlace",
            "--fps",
            "30",
            "--clock-divider",
            "16",
        ])
        .unwrap();
        let mut config = MirrorConfig::default();
        cli.apply(&mut config);
        assert_eq!((config.display.width, config.display.height), (128, 64));
        assert_eq!(config.diff.mode, DiffMode::Full);
        assert!(!config.diff.interlace);
        assert_eq!(config.pacing.target_fps, 30);
        assert_eq!(config.bus.clock_divider, 16);
    }

    #[test]
    fn unknown_diff_mode_is_rejected() {
        assert!(Cli::try_parse_from(["fbmirror", "--diff", "fast"]).is_err());
    }
}
