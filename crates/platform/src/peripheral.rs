//! SPI0 master register file
//!
//! Typed accessors over the BCM283x SPI0 control/status, FIFO, clock divider
//! and DLEN registers, plus the bus clock configuration. Transfers themselves
//! are polled by the bus driver; this module only names bits and registers.

use crate::register::{RegisterBlock, SPI0_OFFSET};

/// SPI0 register offsets, relative to [`SPI0_OFFSET`].
pub mod regs {
    /// Control and status.
    pub const CS: usize = 0x00;
    /// TX and RX FIFOs.
    pub const FIFO: usize = 0x04;
    /// Clock divider.
    pub const CLK: usize = 0x08;
    /// Data length.
    pub const DLEN: usize = 0x0C;
}

/// Control/status register bits.
pub mod cs {
    /// RX FIFO is full.
    pub const RXF: u32 = 0x0010_0000;
    /// RX FIFO needs reading (at least 3/4 full).
    pub const RXR: u32 = 0x0008_0000;
    /// TX FIFO can accept data.
    pub const TXD: u32 = 0x0004_0000;
    /// RX FIFO contains data.
    pub const RXD: u32 = 0x0002_0000;
    /// Transfer done.
    pub const DONE: u32 = 0x0001_0000;
    /// Transfer active.
    pub const TA: u32 = 0x0000_0080;
    /// Clear both FIFOs.
    pub const CLEAR: u32 = 0x0000_0030;
    /// Clear the RX FIFO.
    pub const CLEAR_RX: u32 = 0x0000_0020;
    /// Clear the TX FIFO.
    pub const CLEAR_TX: u32 = 0x0000_0010;
}

/// Clock divider used while running the panel init script.
pub const INIT_CLOCK_DIVIDER: u16 = 34;

/// Default runtime divider: 400 MHz core / 8 = 50 MHz on a Pi 3.
pub const DEFAULT_CLOCK_DIVIDER: u16 = 8;

/// SPI bus clock configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiConfig {
    /// CDIV value; SCLK = core clock / divider. Must be even, 0 means 65536.
    pub clock_divider: u16,
    /// Core clock the divider is applied to.
    pub core_clock_hz: u32,
}

impl SpiConfig {
    /// Configuration with the default divider on a 400 MHz core.
    pub const DEFAULT: Self = Self {
        clock_divider: DEFAULT_CLOCK_DIVIDER,
        core_clock_hz: 400_000_000,
    };

    /// Bus clock frequency in Hz.
    pub fn frequency_hz(&self) -> f64 {
        f64::from(self.core_clock_hz) / f64::from(self.effective_divider())
    }

    /// Estimated microseconds to clock one byte onto the bus (8 clocks per byte
    /// with the DLEN errata unlock applied).
    pub fn usecs_per_byte(&self) -> f64 {
        1_000_000.0 * 8.0 * f64::from(self.effective_divider()) / f64::from(self.core_clock_hz.max(1))
    }

    fn effective_divider(&self) -> u32 {
        if self.clock_divider == 0 {
            65_536
        } else {
            u32::from(self.clock_divider)
        }
    }
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Typed view of the SPI0 register file inside a peripheral window.
#[derive(Clone)]
pub struct SpiRegisters<R> {
    regs: R,
}

#[allow(clippy::arithmetic_side_effects)] // Safety: constant offsets well inside the checked window
impl<R: RegisterBlock> SpiRegisters<R> {
    /// Wrap a peripheral window.
    pub fn new(regs: R) -> Self {
        Self { regs }
    }

    /// Read the control/status register.
    #[inline]
    pub fn status(&self) -> u32 {
        self.regs.read(SPI0_OFFSET + regs::CS)
    }

    /// Write the control/status register.
    #[inline]
    pub fn set_control(&self, value: u32) {
        self.regs.write(SPI0_OFFSET + regs::CS, value);
    }

    /// Push one byte into the TX FIFO.
    #[inline]
    pub fn write_fifo(&self, byte: u8) {
        self.regs.write(SPI0_OFFSET + regs::FIFO, u32::from(byte));
    }

    /// Program the clock divider.
    pub fn set_clock_divider(&self, divider: u16) {
        self.regs.write(SPI0_OFFSET + regs::CLK, u32::from(divider));
    }

    /// Currently programmed clock divider.
    #[allow(clippy::cast_possible_truncation)] // CDIV is a 16-bit field
    pub fn clock_divider(&self) -> u16 {
        self.regs.read(SPI0_OFFSET + regs::CLK) as u16
    }

    /// Set DLEN=2. Outside DMA this removes the idle ninth clock per byte.
    pub fn unlock_fast_8_clocks(&self) {
        self.regs.write(SPI0_OFFSET + regs::DLEN, 2);
    }

    /// Reset control/status to defaults (CS0, mode 0, TA=0) and clear both FIFOs.
    pub fn reset(&self) {
        self.set_control(cs::CLEAR);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn usecs_per_byte_matches_divider() {
        let config = SpiConfig {
            clock_divider: 8,
            core_clock_hz: 400_000_000,
        };
        // 50 MHz bus -> 8 bits take 0.16 us
        assert!((config.usecs_per_byte() - 0.16).abs() < 1e-9);
        assert_eq!(config.frequency_hz(), 50_000_000.0);
    }

    #[test]
    fn zero_divider_means_65536() {
        let config = SpiConfig {
            clock_divider: 0,
            core_clock_hz: 65_536,
        };
        assert_eq!(config.frequency_hz(), 1.0);
    }

    #[test]
    fn status_bits_are_distinct() {
        let bits = [cs::RXF, cs::RXR, cs::TXD, cs::RXD, cs::DONE, cs::TA, cs::CLEAR_RX, cs::CLEAR_TX];
        let mut seen = 0u32;
        for bit in bits {
            assert_eq!(seen & bit, 0);
            seen |= bit;
        }
        assert_eq!(cs::CLEAR, cs::CLEAR_RX | cs::CLEAR_TX);
    }
}
