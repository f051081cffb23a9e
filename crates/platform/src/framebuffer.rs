//! RGB565 framebuffer storage and the pixel source seam
//!
//! Pixels are stored row-major with a scanline stride that may exceed the
//! visible width. The backing store is a `Vec<u64>` so the 2-pixel and
//! 4-pixel word views used by the frame differs are always aligned.

use alloc::vec;
use alloc::vec::Vec;
use core::convert::Infallible;

use embedded_graphics::pixelcolor::raw::RawU16;
use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::prelude::*;

/// Framebuffer construction errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramebufferError {
    /// Width or height is zero.
    Empty,
    /// Stride is odd or shorter than one visible row.
    BadStride {
        /// Configured stride in bytes.
        stride_bytes: usize,
        /// Visible width in pixels.
        width: usize,
    },
    /// Raw input does not match the framebuffer size.
    SizeMismatch {
        /// Bytes expected.
        expected: usize,
        /// Bytes supplied.
        actual: usize,
    },
}

#[cfg(feature = "std")]
impl std::error::Error for FramebufferError {}

impl core::fmt::Display for FramebufferError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Empty => write!(f, "framebuffer has zero width or height"),
            Self::BadStride {
                stride_bytes,
                width,
            } => write!(
                f,
                "scanline stride of {stride_bytes} bytes cannot hold {width} RGB565 pixels"
            ),
            Self::SizeMismatch { expected, actual } => {
                write!(f, "raw frame is {actual} bytes, expected {expected}")
            }
        }
    }
}

/// A 16bpp framebuffer.
#[derive(Clone, PartialEq, Eq)]
pub struct Framebuffer {
    words: Vec<u64>,
    width: usize,
    height: usize,
    stride_pixels: usize,
}

impl core::fmt::Debug for Framebuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Framebuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride_pixels", &self.stride_pixels)
            .finish_non_exhaustive()
    }
}

impl Framebuffer {
    /// Allocate a zeroed (black) framebuffer.
    #[allow(clippy::arithmetic_side_effects)] // Safety: stride >= width*2 checked; sizes come from validated config
    pub fn new(width: usize, height: usize, stride_bytes: usize) -> Result<Self, FramebufferError> {
        if width == 0 || height == 0 {
            return Err(FramebufferError::Empty);
        }
        if stride_bytes % 2 != 0 || stride_bytes < width * 2 {
            return Err(FramebufferError::BadStride {
                stride_bytes,
                width,
            });
        }
        let stride_pixels = stride_bytes / 2;
        let total_pixels = stride_pixels * height;
        let words = vec![0u64; total_pixels.div_ceil(4)];
        Ok(Self {
            words,
            width,
            height,
            stride_pixels,
        })
    }

    /// Visible width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in scanlines.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Scanline stride in pixels.
    pub fn stride_pixels(&self) -> usize {
        self.stride_pixels
    }

    /// Scanline stride in bytes.
    #[allow(clippy::arithmetic_side_effects)] // Safety: stride_pixels was derived from a usize byte count
    pub fn stride_bytes(&self) -> usize {
        self.stride_pixels * 2
    }

    /// Total bytes covered by `height` scanlines.
    #[allow(clippy::arithmetic_side_effects)] // Safety: fits, the buffer was allocated with this size
    pub fn size_bytes(&self) -> usize {
        self.stride_bytes() * self.height
    }

    /// `true` when every row starts on a 64-bit boundary and holds a whole
    /// number of 4-pixel words.
    pub fn supports_word_view(&self) -> bool {
        self.width % 4 == 0 && self.stride_pixels % 4 == 0
    }

    /// All pixels including stride padding.
    #[allow(clippy::arithmetic_side_effects)] // Safety: see size_bytes
    pub fn pixels(&self) -> &[u16] {
        let all: &[u16] = bytemuck::cast_slice(&self.words);
        all.get(..self.stride_pixels * self.height).unwrap_or(all)
    }

    /// All pixels including stride padding, mutable.
    #[allow(clippy::arithmetic_side_effects)] // Safety: see size_bytes
    pub fn pixels_mut(&mut self) -> &mut [u16] {
        let len = self.stride_pixels * self.height;
        let all: &mut [u16] = bytemuck::cast_slice_mut(&mut self.words);
        let total = all.len();
        match all.get_mut(..len) {
            Some(visible) => visible,
            None => {
                tracing::warn!(len, total, "framebuffer shorter than its geometry");
                &mut []
            }
        }
    }

    /// The visible pixels of scanline `y`.
    #[allow(clippy::arithmetic_side_effects)] // Safety: y < height so start + width <= len
    pub fn row(&self, y: usize) -> Option<&[u16]> {
        if y >= self.height {
            return None;
        }
        let start = y * self.stride_pixels;
        self.pixels().get(start..start + self.width)
    }

    /// The visible pixels of scanline `y`, mutable.
    #[allow(clippy::arithmetic_side_effects)] // Safety: y < height so start + width <= len
    pub fn row_mut(&mut self, y: usize) -> Option<&mut [u16]> {
        if y >= self.height {
            return None;
        }
        let start = y * self.stride_pixels;
        let width = self.width;
        self.pixels_mut().get_mut(start..start + width)
    }

    /// Scanline `y` as native-endian 4-pixel words. Only available when
    /// [`supports_word_view`](Self::supports_word_view) holds.
    #[allow(clippy::arithmetic_side_effects)] // Safety: y < height, stride and width are multiples of 4
    pub fn row_words(&self, y: usize) -> Option<&[u64]> {
        if y >= self.height || !self.supports_word_view() {
            return None;
        }
        let start = y * (self.stride_pixels / 4);
        self.words.get(start..start + self.width / 4)
    }

    /// Fill every pixel, padding included.
    pub fn fill(&mut self, value: u16) {
        self.pixels_mut().fill(value);
    }

    /// Replace the contents with a raw little-endian RGB565 image laid out
    /// with this framebuffer's stride.
    pub fn copy_from_le_bytes(&mut self, raw: &[u8]) -> Result<(), FramebufferError> {
        let expected = self.size_bytes();
        if raw.len() != expected {
            return Err(FramebufferError::SizeMismatch {
                expected,
                actual: raw.len(),
            });
        }
        for (pixel, bytes) in self.pixels_mut().iter_mut().zip(raw.chunks_exact(2)) {
            if let [lo, hi] = *bytes {
                *pixel = u16::from_le_bytes([lo, hi]);
            }
        }
        Ok(())
    }
}

impl OriginDimensions for Framebuffer {
    #[allow(clippy::cast_possible_truncation)] // geometry is validated to fit u16
    fn size(&self) -> Size {
        Size::new(self.width as u32, self.height as u32)
    }
}

impl DrawTarget for Framebuffer {
    type Color = Rgb565;
    type Error = Infallible;

    #[allow(clippy::cast_sign_loss)] // negative coordinates are filtered out first
    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            if point.x < 0 || point.y < 0 {
                continue;
            }
            let (x, y) = (point.x as usize, point.y as usize);
            if x >= self.width {
                continue;
            }
            if let Some(slot) = self.row_mut(y).and_then(|row| row.get_mut(x)) {
                *slot = RawU16::from(color).into_inner();
            }
        }
        Ok(())
    }

    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        self.fill(RawU16::from(color).into_inner());
        Ok(())
    }
}

/// Producer of full framebuffer snapshots, one per render cycle.
pub trait PixelSource {
    /// Error type
    type Error;

    /// Overwrite `frame` with the next snapshot. Returns `Ok(false)` once the
    /// source has no more frames.
    fn provide_frame(&mut self, frame: &mut Framebuffer) -> Result<bool, Self::Error>;
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
    use embedded_graphics::primitives::{PrimitiveStyle, Rectangle};

    #[test]
    fn rejects_bad_geometry() {
        assert_eq!(Framebuffer::new(0, 4, 8), Err(FramebufferError::Empty));
        assert!(matches!(
            Framebuffer::new(4, 4, 6),
            Err(FramebufferError::BadStride { .. })
        ));
        assert!(matches!(
            Framebuffer::new(4, 4, 9),
            Err(FramebufferError::BadStride { .. })
        ));
    }

    #[test]
    fn rows_skip_stride_padding() {
        let mut fb = Framebuffer::new(3, 2, 8).unwrap();
        fb.fill(0xAAAA);
        fb.row_mut(1).unwrap().copy_from_slice(&[1, 2, 3]);
        assert_eq!(fb.row(1).unwrap(), &[1, 2, 3]);
        assert_eq!(fb.pixels()[4..8], [1, 2, 3, 0xAAAA]);
        assert!(fb.row(2).is_none());
    }

    #[test]
    fn word_view_requires_aligned_geometry() {
        let fb = Framebuffer::new(8, 2, 16).unwrap();
        assert!(fb.supports_word_view());
        assert_eq!(fb.row_words(1).unwrap().len(), 2);

        let odd = Framebuffer::new(6, 2, 12).unwrap();
        assert!(!odd.supports_word_view());
        assert!(odd.row_words(0).is_none());
    }

    #[test]
    fn le_bytes_fill_pixels() {
        let mut fb = Framebuffer::new(2, 1, 4).unwrap();
        fb.copy_from_le_bytes(&[0x34, 0x12, 0xCD, 0xAB]).unwrap();
        assert_eq!(fb.row(0).unwrap(), &[0x1234, 0xABCD]);
        assert!(fb.copy_from_le_bytes(&[0; 3]).is_err());
    }

    #[test]
    fn draw_target_writes_rgb565() {
        let mut fb = Framebuffer::new(4, 4, 8).unwrap();
        Rectangle::new(Point::new(1, 1), Size::new(2, 2))
            .into_styled(PrimitiveStyle::with_fill(Rgb565::RED))
            .draw(&mut fb)
            .unwrap();
        assert_eq!(fb.row(0).unwrap(), &[0, 0, 0, 0]);
        assert_eq!(fb.row(1).unwrap(), &[0, 0xF800, 0xF800, 0]);
        assert_eq!(fb.row(2).unwrap(), &[0, 0xF800, 0xF800, 0]);
    }

    #[test]
    fn out_of_bounds_pixels_are_ignored() {
        let mut fb = Framebuffer::new(2, 2, 4).unwrap();
        fb.draw_iter([
            Pixel(Point::new(-1, 0), Rgb565::WHITE),
            Pixel(Point::new(2, 0), Rgb565::WHITE),
            Pixel(Point::new(0, 5), Rgb565::WHITE),
        ])
        .unwrap();
        assert!(fb.pixels().iter().all(|&p| p == 0));
    }
}
