//! Memory-mapped register window abstraction
//!
//! The BCM283x peripherals (GPIO bank, SPI0 master) are reached through a
//! single window of 32-bit registers. Everything above this layer talks to
//! registers through [`RegisterBlock`] so the same driver code runs against
//! `/dev/mem` on a Pi and against the simulated peripherals on a desktop.

/// Byte offset of the GPIO register file inside the peripheral window.
pub const GPIO_OFFSET: usize = 0x20_0000;

/// Byte offset of the SPI0 register file inside the peripheral window.
pub const SPI0_OFFSET: usize = 0x20_4000;

/// Smallest window that covers both register files used by this crate.
pub const MIN_WINDOW_BYTES: usize = SPI0_OFFSET + 0x18;

/// A window of 32-bit peripheral registers addressed by byte offset.
///
/// Accesses take `&self`: a window is shared by the GPIO bank, the D/C line
/// and the SPI master, each touching disjoint registers. Implementations must
/// perform every access as a single volatile 32-bit load or store.
pub trait RegisterBlock {
    /// Size of the window in bytes.
    fn len(&self) -> usize;

    /// `true` when the window maps no registers at all.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the register at `offset`.
    fn read(&self, offset: usize) -> u32;

    /// Write `value` to the register at `offset`.
    fn write(&self, offset: usize, value: u32);

    /// Read-modify-write helper: clears `mask` then sets `bits`.
    fn modify(&self, offset: usize, mask: u32, bits: u32) {
        let current = self.read(offset);
        self.write(offset, (current & !mask) | (bits & mask));
    }
}

impl<R: RegisterBlock + ?Sized> RegisterBlock for &R {
    fn len(&self) -> usize {
        (**self).len()
    }

    fn read(&self, offset: usize) -> u32 {
        (**self).read(offset)
    }

    fn write(&self, offset: usize, value: u32) {
        (**self).write(offset, value);
    }
}

/// Check that `block` is large enough to host the GPIO and SPI0 register files.
pub fn check_window<R: RegisterBlock>(block: &R) -> Result<(), RegisterError> {
    if block.len() < MIN_WINDOW_BYTES {
        return Err(RegisterError::WindowTooSmall {
            needed: MIN_WINDOW_BYTES,
            actual: block.len(),
        });
    }
    Ok(())
}

/// Check that a 32-bit access at `offset` is aligned and lies inside a
/// window of `len` bytes.
pub fn check_offset(offset: usize, len: usize) -> Result<(), RegisterError> {
    if offset % 4 != 0 {
        return Err(RegisterError::Misaligned(offset));
    }
    match offset.checked_add(4) {
        Some(end) if end <= len => Ok(()),
        _ => Err(RegisterError::OutOfWindow { offset, len }),
    }
}

/// Register window errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterError {
    /// The mapped window does not reach the registers we drive.
    WindowTooSmall {
        /// Bytes required.
        needed: usize,
        /// Bytes mapped.
        actual: usize,
    },
    /// A register offset is not 32-bit aligned.
    Misaligned(usize),
    /// A register offset lies past the end of the window.
    OutOfWindow {
        /// Byte offset of the access.
        offset: usize,
        /// Window size.
        len: usize,
    },
}

#[cfg(feature = "std")]
impl std::error::Error for RegisterError {}

impl core::fmt::Display for RegisterError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::WindowTooSmall { needed, actual } => write!(
                f,
                "register window too small: need {needed:#x} bytes, mapped {actual:#x}"
            ),
            Self::Misaligned(offset) => write!(f, "register offset {offset:#x} is not 4-byte aligned"),
            Self::OutOfWindow { offset, len } => {
                write!(f, "register offset {offset:#x} is outside the {len:#x}-byte window")
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use core::cell::Cell;

    struct Scratch {
        regs: [Cell<u32>; 4],
        len: usize,
    }

    impl RegisterBlock for Scratch {
        fn len(&self) -> usize {
            self.len
        }

        fn read(&self, offset: usize) -> u32 {
            self.regs.get(offset / 4).map_or(0, Cell::get)
        }

        fn write(&self, offset: usize, value: u32) {
            if let Some(reg) = self.regs.get(offset / 4) {
                reg.set(value);
            }
        }
    }

    fn scratch(len: usize) -> Scratch {
        Scratch {
            regs: Default::default(),
            len,
        }
    }

    #[test]
    fn modify_only_touches_masked_bits() {
        let block = scratch(16);
        block.write(4, 0xFFFF_0000);
        block.modify(4, 0x0000_FF00, 0x0000_1234);
        assert_eq!(block.read(4), 0xFFFF_1200);
    }

    #[test]
    fn small_window_is_rejected() {
        let block = scratch(0x1000);
        assert_eq!(
            check_window(&block),
            Err(RegisterError::WindowTooSmall {
                needed: MIN_WINDOW_BYTES,
                actual: 0x1000
            })
        );
        assert!(check_window(&scratch(MIN_WINDOW_BYTES)).is_ok());
    }

    #[test]
    fn offsets_must_be_aligned_and_inside_the_window() {
        assert_eq!(check_offset(0, 4), Ok(()));
        assert_eq!(check_offset(12, 16), Ok(()));
        assert_eq!(check_offset(6, 16), Err(RegisterError::Misaligned(6)));
        assert_eq!(check_offset(16, 16), Err(RegisterError::OutOfWindow { offset: 16, len: 16 }));
        assert_eq!(
            check_offset(usize::MAX & !3, usize::MAX),
            Err(RegisterError::OutOfWindow {
                offset: usize::MAX & !3,
                len: usize::MAX
            })
        );
    }

    #[test]
    fn reference_forwards_to_block() {
        let block = scratch(16);
        let by_ref = &block;
        by_ref.write(0, 7);
        assert_eq!(block.read(0), 7);
        assert_eq!(by_ref.len(), 16);
    }
}
