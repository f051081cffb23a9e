//! Mirror configuration and constants
//!
//! All geometry, bus and diffing parameters are fixed at startup. The binary
//! loads them from a TOML file and command-line overrides, then calls
//! [`MirrorConfig::validate`] once; everything downstream assumes a validated
//! configuration.

use serde::{Deserialize, Serialize};

use crate::display::{BYTES_PER_PIXEL, CONTROLLER_COLUMNS, CONTROLLER_ROWS, MADCTL_ROW_ADDRESS_ORDER_SWAP};
use crate::gpio::{MAX_PIN, SPI0_CE0, SPI0_CE1, SPI0_CLK, SPI0_MISO, SPI0_MOSI};
use crate::peripheral::{SpiConfig, DEFAULT_CLOCK_DIVIDER};

/// Application version (synchronized with Cargo.toml)
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Largest payload of a single bus task after span coalescing.
pub const DEFAULT_MAX_TASK_SIZE: usize = 65_528;

/// Unchanged pixels tolerated inside one span / wasted by one merge.
pub const DEFAULT_SPAN_MERGE_THRESHOLD: usize = 4;

/// Slack the task queue needs beyond its largest task (headers + wrap marker).
pub const QUEUE_SLACK_BYTES: usize = 64;

/// Physical base of the BCM2837 (Pi 2/3/Zero 2) peripheral window.
pub const DEFAULT_PERIPHERAL_BASE: u64 = 0x3F00_0000;

/// Size of the peripheral window.
pub const DEFAULT_PERIPHERAL_SIZE: usize = 0x0100_0000;

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Panel geometry and control lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DisplayConfig {
    /// Visible width in pixels.
    pub width: u16,
    /// Visible height in pixels.
    pub height: u16,
    /// Source scanline stride in bytes (0 = tightly packed).
    pub stride_bytes: usize,
    /// Bytes per pixel; only RGB565 (2) is supported.
    pub bytes_per_pixel: usize,
    /// Column offset of the visible area inside controller RAM.
    pub x_offset: u16,
    /// Row offset of the visible area inside controller RAM.
    pub y_offset: u16,
    /// Program MADCTL with the row address order swapped.
    pub row_order_swap: bool,
    /// GPIO driving the D/C line.
    pub dc_pin: u8,
    /// GPIO driving RESET, if wired.
    pub reset_pin: Option<u8>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 240,
            height: 320,
            stride_bytes: 0,
            bytes_per_pixel: BYTES_PER_PIXEL,
            x_offset: 0,
            y_offset: 0,
            row_order_swap: true,
            dc_pin: 25,
            reset_pin: Some(27),
        }
    }
}

/// SPI bus and task queue settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BusConfig {
    /// SPI0 CDIV value at runtime.
    pub clock_divider: u16,
    /// Core clock feeding the SPI divider, used for pacing estimates.
    pub core_clock_hz: u32,
    /// Largest payload of one task after coalescing.
    pub max_task_size: usize,
    /// Task queue capacity in bytes (default: three frames).
    pub queue_bytes: Option<usize>,
    /// Physical address of the peripheral window mapped from `/dev/mem`.
    pub peripheral_base: u64,
    /// Size of the mapped peripheral window.
    pub peripheral_size: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            clock_divider: DEFAULT_CLOCK_DIVIDER,
            core_clock_hz: SpiConfig::DEFAULT.core_clock_hz,
            max_task_size: DEFAULT_MAX_TASK_SIZE,
            queue_bytes: None,
            peripheral_base: DEFAULT_PERIPHERAL_BASE,
            peripheral_size: DEFAULT_PERIPHERAL_SIZE,
        }
    }
}

/// Which frame differencing algorithm to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffMode {
    /// Coarse when the geometry allows it, exact otherwise.
    #[default]
    Auto,
    /// Pixel-exact diff with gap merging.
    Exact,
    /// Four pixels per 64-bit word.
    Coarse,
    /// No diffing: resend the whole frame.
    #[serde(alias = "none")]
    Full,
}

impl DiffMode {
    /// Name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Exact => "exact",
            Self::Coarse => "coarse",
            Self::Full => "full",
        }
    }
}

/// Differencing and coalescing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiffConfig {
    /// Algorithm selection.
    pub mode: DiffMode,
    /// Unchanged pixels tolerated inside a span and wasted per merge.
    pub span_merge_threshold: usize,
    /// Allow dropping to interlaced (half-field) updates under load.
    pub interlace: bool,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            mode: DiffMode::Auto,
            span_merge_threshold: DEFAULT_SPAN_MERGE_THRESHOLD,
            interlace: true,
        }
    }
}

/// Frame pacing and statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PacingConfig {
    /// Frame rate the interlace heuristic budgets for.
    pub target_fps: u32,
    /// Seconds between statistics log lines (0 disables).
    pub stats_interval_secs: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            target_fps: 60,
            stats_interval_secs: 5,
        }
    }
}

/// Complete mirror configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MirrorConfig {
    /// Panel geometry and control lines.
    pub display: DisplayConfig,
    /// SPI bus and task queue.
    pub bus: BusConfig,
    /// Differencing and coalescing.
    pub diff: DiffConfig,
    /// Pacing and statistics.
    pub pacing: PacingConfig,
}

// ---------------------------------------------------------------------------
// Derived values and validation
// ---------------------------------------------------------------------------

#[allow(clippy::arithmetic_side_effects)] // Safety: all products use u16 geometry widened to usize
impl MirrorConfig {
    /// Bytes in one visible row on the wire.
    pub fn row_bytes(&self) -> usize {
        usize::from(self.display.width) * self.display.bytes_per_pixel
    }

    /// Source stride in bytes (packed rows when unset).
    pub fn stride_bytes(&self) -> usize {
        if self.display.stride_bytes == 0 {
            self.row_bytes()
        } else {
            self.display.stride_bytes
        }
    }

    /// Bytes of one full frame on the wire.
    pub fn frame_bytes(&self) -> usize {
        self.row_bytes() * usize::from(self.display.height)
    }

    /// Largest single task payload the configured diff mode can produce.
    pub fn largest_task(&self) -> usize {
        if self.diff.mode == DiffMode::Full {
            self.frame_bytes()
        } else {
            self.bus.max_task_size.min(self.frame_bytes())
        }
    }

    /// Effective task queue capacity (default: three frames).
    pub fn queue_bytes(&self) -> usize {
        self.bus.queue_bytes.unwrap_or_else(|| {
            (self.frame_bytes() * 3).max(self.largest_task() + QUEUE_SLACK_BYTES)
        })
    }

    /// Runtime SPI clock configuration.
    pub fn spi(&self) -> SpiConfig {
        SpiConfig {
            clock_divider: self.bus.clock_divider,
            core_clock_hz: self.bus.core_clock_hz,
        }
    }

    /// MADCTL byte programmed during init.
    pub fn madctl(&self) -> u8 {
        if self.display.row_order_swap {
            MADCTL_ROW_ADDRESS_ORDER_SWAP
        } else {
            0
        }
    }

    /// Check every cross-field constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.display;
        if d.width == 0 || d.height == 0 {
            return Err(ConfigError::ZeroSize);
        }
        if d.bytes_per_pixel != BYTES_PER_PIXEL {
            return Err(ConfigError::UnsupportedPixelFormat(d.bytes_per_pixel));
        }
        let stride = self.stride_bytes();
        if stride % 2 != 0 || stride < self.row_bytes() {
            return Err(ConfigError::BadStride {
                stride_bytes: stride,
                row_bytes: self.row_bytes(),
            });
        }
        let fits = |offset: u16, extent: u16, limit: u16| u32::from(offset) + u32::from(extent) <= u32::from(limit);
        if !fits(d.x_offset, d.width, CONTROLLER_COLUMNS) || !fits(d.y_offset, d.height, CONTROLLER_ROWS) {
            return Err(ConfigError::OutsideControllerRam);
        }
        for pin in core::iter::once(d.dc_pin).chain(d.reset_pin) {
            if pin > MAX_PIN || [SPI0_CE1, SPI0_CE0, SPI0_MISO, SPI0_MOSI, SPI0_CLK].contains(&pin) {
                return Err(ConfigError::BadPin(pin));
            }
        }
        if d.reset_pin == Some(d.dc_pin) {
            return Err(ConfigError::BadPin(d.dc_pin));
        }
        if self.bus.clock_divider < 2 || self.bus.clock_divider % 2 != 0 {
            return Err(ConfigError::BadClockDivider(self.bus.clock_divider));
        }
        if self.bus.core_clock_hz == 0 {
            return Err(ConfigError::ZeroCoreClock);
        }
        if self.bus.max_task_size < self.row_bytes() || u32::try_from(self.bus.max_task_size).is_err() {
            return Err(ConfigError::TaskSizeTooSmall {
                max_task_size: self.bus.max_task_size,
                row_bytes: self.row_bytes(),
            });
        }
        let largest_task = self.largest_task();
        let queue = self.queue_bytes();
        if queue < largest_task + QUEUE_SLACK_BYTES || u32::try_from(queue).is_err() {
            return Err(ConfigError::QueueTooSmall {
                queue_bytes: queue,
                largest_task,
            });
        }
        if self.pacing.target_fps == 0 {
            return Err(ConfigError::ZeroFrameRate);
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Width or height is zero.
    ZeroSize,
    /// Anything but 2 bytes per pixel.
    UnsupportedPixelFormat(usize),
    /// Stride odd or shorter than a row.
    BadStride {
        /// Effective stride.
        stride_bytes: usize,
        /// Bytes in one visible row.
        row_bytes: usize,
    },
    /// Offset + extent exceeds the controller frame memory.
    OutsideControllerRam,
    /// Control pin does not exist or collides with SPI0.
    BadPin(u8),
    /// Clock divider must be even and at least 2.
    BadClockDivider(u16),
    /// Core clock of zero.
    ZeroCoreClock,
    /// Task cap below one row.
    TaskSizeTooSmall {
        /// Configured cap.
        max_task_size: usize,
        /// Bytes in one visible row.
        row_bytes: usize,
    },
    /// Queue cannot hold the largest task.
    QueueTooSmall {
        /// Effective queue capacity.
        queue_bytes: usize,
        /// Largest task the mode can produce.
        largest_task: usize,
    },
    /// Target frame rate of zero.
    ZeroFrameRate,
}

#[cfg(feature = "std")]
impl std::error::Error for ConfigError {}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::ZeroSize => write!(f, "display width and height must be non-zero"),
            Self::UnsupportedPixelFormat(bpp) => {
                write!(f, "{bpp} bytes per pixel is unsupported, only RGB565 (2)")
            }
            Self::BadStride {
                stride_bytes,
                row_bytes,
            } => write!(
                f,
                "stride of {stride_bytes} bytes must be even and at least {row_bytes}"
            ),
            Self::OutsideControllerRam => {
                write!(f, "display offset plus size exceeds controller RAM")
            }
            Self::BadPin(pin) => write!(f, "GPIO{pin} cannot be used as a control line"),
            Self::BadClockDivider(div) => {
                write!(f, "SPI clock divider {div} must be even and at least 2")
            }
            Self::ZeroCoreClock => write!(f, "core clock must be non-zero"),
            Self::TaskSizeTooSmall {
                max_task_size,
                row_bytes,
            } => write!(
                f,
                "max task size {max_task_size} is below one row ({row_bytes} bytes)"
            ),
            Self::QueueTooSmall {
                queue_bytes,
                largest_task,
            } => write!(
                f,
                "queue of {queue_bytes} bytes cannot hold a {largest_task} byte task"
            ),
            Self::ZeroFrameRate => write!(f, "target frame rate must be non-zero"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = MirrorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.stride_bytes(), 480);
        assert_eq!(config.queue_bytes(), 240 * 320 * 2 * 3);
        assert_eq!(config.madctl(), 0x80);
    }

    #[test]
    fn rejects_wrong_pixel_format() {
        let mut config = MirrorConfig::default();
        config.display.bytes_per_pixel = 3;
        assert_eq!(config.validate(), Err(ConfigError::UnsupportedPixelFormat(3)));
    }

    #[test]
    fn rejects_short_stride() {
        let mut config = MirrorConfig::default();
        config.display.stride_bytes = 400;
        assert!(matches!(config.validate(), Err(ConfigError::BadStride { .. })));
    }

    #[test]
    fn columns_and_rows_have_their_own_limits() {
        let mut config = MirrorConfig::default();
        config.display.width = 320;
        config.display.height = 240;
        assert_eq!(config.validate(), Err(ConfigError::OutsideControllerRam));

        config.display.width = 240;
        config.display.x_offset = 1;
        assert_eq!(config.validate(), Err(ConfigError::OutsideControllerRam));

        config.display.x_offset = 0;
        config.display.y_offset = 80;
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn rejects_spi_pin_as_dc() {
        let mut config = MirrorConfig::default();
        config.display.dc_pin = SPI0_CLK;
        assert_eq!(config.validate(), Err(ConfigError::BadPin(SPI0_CLK)));
    }

    #[test]
    fn full_mode_needs_queue_for_whole_frame() {
        let mut config = MirrorConfig::default();
        config.diff.mode = DiffMode::Full;
        config.bus.queue_bytes = Some(100_000);
        assert!(matches!(config.validate(), Err(ConfigError::QueueTooSmall { .. })));
        config.bus.queue_bytes = None;
        config.validate().unwrap();
    }

    #[test]
    fn task_cap_below_row_is_rejected() {
        let mut config = MirrorConfig::default();
        config.bus.max_task_size = 100;
        assert!(matches!(config.validate(), Err(ConfigError::TaskSizeTooSmall { .. })));
    }

    #[test]
    fn odd_clock_divider_is_rejected() {
        let mut config = MirrorConfig::default();
        config.bus.clock_divider = 7;
        assert_eq!(config.validate(), Err(ConfigError::BadClockDivider(7)));
    }

    #[test]
    fn serde_round_trip_keeps_sections() {
        let mut config = MirrorConfig::default();
        config.diff.mode = DiffMode::Exact;
        config.display.reset_pin = None;
        let json = serde_json::to_string(&config).unwrap();
        let back: MirrorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn diff_mode_accepts_none_alias() {
        let mode: DiffMode = serde_json::from_str("\"none\"").unwrap();
        assert_eq!(mode, DiffMode::Full);
    }
}
