//! Frame sources
//!
//! [`TestPattern`] draws an animated scene with `embedded-graphics`: static
//! colour bars, a bouncing block and a frame counter, so most of the screen
//! stays unchanged between frames the way a desktop does. [`RawSource`]
//! reads little-endian RGB565 snapshots from a file or a framebuffer device.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::os::unix::fs::FileTypeExt;
use std::path::Path;

use anyhow::{Context, Result};
use embedded_graphics::mono_font::ascii::FONT_6X10;
use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{PrimitiveStyle, Rectangle};
use embedded_graphics::text::{Baseline, Text};
use platform::{Framebuffer, PixelSource};

/// `--source` value selecting the test pattern.
pub const PATTERN: &str = "pattern";

const BARS: [Rgb565; 8] = [
    Rgb565::WHITE,
    Rgb565::YELLOW,
    Rgb565::CYAN,
    Rgb565::GREEN,
    Rgb565::MAGENTA,
    Rgb565::RED,
    Rgb565::BLUE,
    Rgb565::BLACK,
];

/// Edge of the bouncing block in pixels.
const BLOCK: u32 = 24;

// ---------------------------------------------------------------------------
// Test pattern
// ---------------------------------------------------------------------------

/// Animated test scene.
#[derive(Debug, Default)]
pub struct TestPattern {
    frame: u64,
    limit: Option<u64>,
}

impl TestPattern {
    /// An endless pattern.
    pub fn new() -> Self {
        Self::default()
    }

    /// A pattern that ends after `frames` frames.
    pub fn with_limit(frames: u64) -> Self {
        Self {
            frame: 0,
            limit: Some(frames),
        }
    }

    /// Frames drawn so far.
    pub fn frames(&self) -> u64 {
        self.frame
    }

    /// Top-left corner of the block, bouncing below the bars.
    #[allow(clippy::arithmetic_side_effects)] // Safety: operands are bounded by the u16 frame geometry
    fn block_origin(&self, size: Size, top: u32) -> Point {
        let span_x = u64::from(size.width.saturating_sub(BLOCK).max(1));
        let span_y = u64::from(size.height.saturating_sub(BLOCK).saturating_sub(top).max(1));
        let bounce = |t: u64, span: u64| {
            let phase = t % (2 * span);
            if phase < span {
                phase
            } else {
                2 * span - phase
            }
        };
        let x = bounce(self.frame.wrapping_mul(3), span_x);
        let y = bounce(self.frame.wrapping_mul(2), span_y) + u64::from(top);
        Point::new(i32::try_from(x).unwrap_or(0), i32::try_from(y).unwrap_or(0))
    }

    #[allow(clippy::arithmetic_side_effects)] // Safety: bar geometry derives from a u16 frame size
    fn draw(&self, frame: &mut Framebuffer) -> Result<(), core::convert::Infallible> {
        let size = frame.size();
        frame.clear(Rgb565::new(2, 4, 2))?;

        // bars across the top third
        let bar_height = size.height / 3;
        let bar_width = (size.width / 8).max(1);
        for (i, color) in (0i32..).zip(BARS) {
            let left = i * i32::try_from(bar_width).unwrap_or(i32::MAX);
            Rectangle::new(Point::new(left, 0), Size::new(bar_width, bar_height))
                .into_styled(PrimitiveStyle::with_fill(color))
                .draw(frame)?;
        }

        let origin = self.block_origin(size, bar_height);
        Rectangle::new(origin, Size::new(BLOCK, BLOCK))
            .into_styled(PrimitiveStyle::with_fill(Rgb565::new(31, 32, 0)))
            .draw(frame)?;

        let style = MonoTextStyle::new(&FONT_6X10, Rgb565::WHITE);
        let label = format!("frame {}", self.frame);
        let baseline_y = i32::try_from(size.height).unwrap_or(i32::MAX).saturating_sub(12);
        Text::with_baseline(&label, Point::new(2, baseline_y), style, Baseline::Top).draw(frame)?;
        Ok(())
    }
}

impl PixelSource for TestPattern {
    type Error = core::convert::Infallible;

    fn provide_frame(&mut self, frame: &mut Framebuffer) -> Result<bool, Self::Error> {
        if self.limit.is_some_and(|limit| self.frame >= limit) {
            return Ok(false);
        }
        self.draw(frame)?;
        self.frame = self.frame.wrapping_add(1);
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Raw RGB565 input
// ---------------------------------------------------------------------------

/// Little-endian RGB565 snapshots from a file or a framebuffer device.
///
/// A character device (`/dev/fbN`) is re-read from offset 0 every frame. A
/// regular file is read as consecutive frames and ends at end of file.
#[derive(Debug)]
pub struct RawSource {
    file: File,
    rewind: bool,
    scratch: Vec<u8>,
}

impl RawSource {
    /// Open `path` for frames of `frame_bytes` bytes.
    pub fn open(path: &Path, frame_bytes: usize) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("failed to open frame source {}", path.display()))?;
        let rewind = file
            .metadata()
            .with_context(|| format!("failed to stat {}", path.display()))?
            .file_type()
            .is_char_device();
        tracing::info!(path = %path.display(), frame_bytes, rewind, "raw frame source opened");
        Ok(Self {
            file,
            rewind,
            scratch: vec![0; frame_bytes],
        })
    }
}

impl PixelSource for RawSource {
    type Error = io::Error;

    fn provide_frame(&mut self, frame: &mut Framebuffer) -> Result<bool, Self::Error> {
        if self.rewind {
            self.file.seek(SeekFrom::Start(0))?;
        }
        match self.file.read_exact(&mut self.scratch) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(false),
            Err(err) => return Err(err),
        }
        frame
            .copy_from_le_bytes(&self.scratch)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// A source picked on the command line.
#[derive(Debug)]
pub enum Source {
    /// Built-in animation.
    Pattern(TestPattern),
    /// Raw frames from a path.
    Raw(RawSource),
}

impl Source {
    /// Resolve a `--source` argument. `frames` bounds the test pattern.
    pub fn open(arg: &str, frame_bytes: usize, frames: Option<u64>) -> Result<Self> {
        if arg == PATTERN {
            return Ok(Self::Pattern(frames.map_or_else(TestPattern::new, TestPattern::with_limit)));
        }
        RawSource::open(Path::new(arg), frame_bytes).map(Self::Raw)
    }
}

impl PixelSource for Source {
    type Error = io::Error;

    fn provide_frame(&mut self, frame: &mut Framebuffer) -> Result<bool, Self::Error> {
        match self {
            Self::Pattern(pattern) => match pattern.provide_frame(frame) {
                Ok(more) => Ok(more),
                Err(never) => match never {},
            },
            Self::Raw(raw) => raw.provide_frame(frame),
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use super::*;
    use embedded_graphics::pixelcolor::raw::RawU16;
    use std::io::Write;

    fn raw(color: Rgb565) -> u16 {
        RawU16::from(color).into_inner()
    }

    #[test]
    fn pattern_draws_bars_and_moves_the_block() {
        let mut source = TestPattern::with_limit(2);
        let mut first = Framebuffer::new(64, 48, 128).unwrap();
        assert!(source.provide_frame(&mut first).unwrap());
        assert_eq!(first.row(0).unwrap()[0], raw(Rgb565::WHITE));
        assert_eq!(first.row(0).unwrap()[63], raw(Rgb565::BLACK));

        let mut second = first.clone();
        assert!(source.provide_frame(&mut second).unwrap());
        assert_ne!(first, second);
        // the bars do not animate
        assert_eq!(first.row(1), second.row(1));

        assert!(!source.provide_frame(&mut second).unwrap());
        assert_eq!(source.frames(), 2);
    }

    #[test]
    fn raw_file_yields_consecutive_frames_then_ends() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for value in [0x1234u16, 0xABCD] {
            for _ in 0..8 {
                file.write_all(&value.to_le_bytes()).unwrap();
            }
        }
        file.flush().unwrap();

        let mut frame = Framebuffer::new(4, 2, 8).unwrap();
        let mut source = Source::open(file.path().to_str().unwrap(), frame.size_bytes(), None).unwrap();
        assert!(source.provide_frame(&mut frame).unwrap());
        assert_eq!(frame.row(1).unwrap(), &[0x1234; 4]);
        assert!(source.provide_frame(&mut frame).unwrap());
        assert_eq!(frame.row(0).unwrap(), &[0xABCD; 4]);
        assert!(!source.provide_frame(&mut frame).unwrap());
    }

    #[test]
    fn missing_path_is_an_error() {
        assert!(Source::open("/nonexistent/fb9", 16, None).is_err());
    }
}
