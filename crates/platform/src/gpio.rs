//! GPIO bank and output line abstraction
//!
//! Drives the BCM283x GPIO register file: 3-bit function select fields,
//! write-one-to-set / write-one-to-clear output registers and the level
//! register. [`OutputLine`] implements the `embedded-hal` 1.0 digital traits
//! so the display D/C and RESET lines plug into generic driver code.

use core::convert::Infallible;

use embedded_hal::digital::{ErrorType, OutputPin, StatefulOutputPin};

use crate::register::{RegisterBlock, GPIO_OFFSET};

// ---------------------------------------------------------------------------
// Register map
// ---------------------------------------------------------------------------

/// GPFSEL0..5: function select, 10 pins per register, 3 bits per pin.
pub const GPFSEL: usize = 0x00;
/// GPSET0..1: write 1 to drive a pin high.
pub const GPSET: usize = 0x1C;
/// GPCLR0..1: write 1 to drive a pin low.
pub const GPCLR: usize = 0x28;
/// GPLEV0..1: current pin levels.
pub const GPLEV: usize = 0x34;

/// Highest GPIO number on the BCM283x.
pub const MAX_PIN: u8 = 53;

/// SPI0 MOSI (header pin 19).
pub const SPI0_MOSI: u8 = 10;
/// SPI0 MISO (header pin 21).
pub const SPI0_MISO: u8 = 9;
/// SPI0 SCLK (header pin 23).
pub const SPI0_CLK: u8 = 11;
/// SPI0 CE0 (header pin 24).
pub const SPI0_CE0: u8 = 8;
/// SPI0 CE1 (header pin 26).
pub const SPI0_CE1: u8 = 7;

/// Pin function select values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Function {
    /// Digital input (reset default).
    Input = 0b000,
    /// Digital output.
    Output = 0b001,
    /// Alternate function 0 (SPI0 on pins 7..=11).
    Alt0 = 0b100,
}

/// GPIO errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioError {
    /// Pin number above [`MAX_PIN`].
    InvalidPin(u8),
}

#[cfg(feature = "std")]
impl std::error::Error for GpioError {}

impl core::fmt::Display for GpioError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidPin(pin) => write!(f, "GPIO{pin} does not exist (max GPIO{MAX_PIN})"),
        }
    }
}

fn check_pin(pin: u8) -> Result<u8, GpioError> {
    if pin > MAX_PIN {
        Err(GpioError::InvalidPin(pin))
    } else {
        Ok(pin)
    }
}

/// Offset of the 32-bit bank register holding `pin` in a SET/CLR/LEV group.
#[allow(clippy::arithmetic_side_effects)] // Safety: pin <= 53, offsets stay far below usize::MAX
fn bank_offset(group: usize, pin: u8) -> usize {
    GPIO_OFFSET + group + usize::from(pin / 32) * 4
}

fn bank_bit(pin: u8) -> u32 {
    1u32 << (pin % 32)
}

// ---------------------------------------------------------------------------
// Bank
// ---------------------------------------------------------------------------

/// The GPIO register file of one peripheral window.
#[derive(Clone)]
pub struct GpioBank<R> {
    regs: R,
}

impl<R: RegisterBlock> GpioBank<R> {
    /// Wrap a register window.
    pub fn new(regs: R) -> Self {
        Self { regs }
    }

    /// Select the function of `pin`.
    #[allow(clippy::arithmetic_side_effects)] // Safety: pin <= 53 so pin / 10 <= 5 and shift <= 27
    pub fn set_function(&self, pin: u8, function: Function) -> Result<(), GpioError> {
        let pin = check_pin(pin)?;
        let offset = GPIO_OFFSET + GPFSEL + usize::from(pin / 10) * 4;
        let shift = u32::from(pin % 10) * 3;
        self.regs
            .modify(offset, 0b111 << shift, u32::from(function as u8) << shift);
        tracing::trace!(pin, function = function as u8, "gpio function select");
        Ok(())
    }

    /// Raw 3-bit function select value currently programmed for `pin`.
    #[allow(clippy::arithmetic_side_effects)] // Safety: pin <= 53 so pin / 10 <= 5 and shift <= 27
    pub fn function_bits(&self, pin: u8) -> Result<u8, GpioError> {
        let pin = check_pin(pin)?;
        let offset = GPIO_OFFSET + GPFSEL + usize::from(pin / 10) * 4;
        let shift = u32::from(pin % 10) * 3;
        #[allow(clippy::cast_possible_truncation)] // masked to 3 bits
        Ok(((self.regs.read(offset) >> shift) & 0b111) as u8)
    }

    /// Drive `pin` high.
    pub fn set(&self, pin: u8) -> Result<(), GpioError> {
        let pin = check_pin(pin)?;
        self.regs.write(bank_offset(GPSET, pin), bank_bit(pin));
        Ok(())
    }

    /// Drive `pin` low.
    pub fn clear(&self, pin: u8) -> Result<(), GpioError> {
        let pin = check_pin(pin)?;
        self.regs.write(bank_offset(GPCLR, pin), bank_bit(pin));
        Ok(())
    }

    /// Current level of `pin`.
    pub fn level(&self, pin: u8) -> Result<bool, GpioError> {
        let pin = check_pin(pin)?;
        Ok(self.regs.read(bank_offset(GPLEV, pin)) & bank_bit(pin) != 0)
    }

    /// Route the SPI0 signals (MOSI, MISO, SCLK, CE0) to the master.
    pub fn claim_spi0(&self) -> Result<(), GpioError> {
        for pin in [SPI0_MISO, SPI0_MOSI, SPI0_CLK, SPI0_CE0] {
            self.set_function(pin, Function::Alt0)?;
        }
        Ok(())
    }

    /// Return the SPI0 signals to plain inputs.
    pub fn release_spi0(&self) -> Result<(), GpioError> {
        for pin in [SPI0_CE1, SPI0_CE0, SPI0_MISO, SPI0_MOSI, SPI0_CLK] {
            self.set_function(pin, Function::Input)?;
        }
        Ok(())
    }
}

impl<R: RegisterBlock + Clone> GpioBank<R> {
    /// Configure `pin` as an output and hand out a line driving it.
    pub fn output(&self, pin: u8) -> Result<OutputLine<R>, GpioError> {
        self.set_function(pin, Function::Output)?;
        Ok(OutputLine {
            regs: self.regs.clone(),
            pin,
        })
    }
}

// ---------------------------------------------------------------------------
// Output line
// ---------------------------------------------------------------------------

/// A single push-pull output pin (display D/C or RESET).
#[derive(Clone)]
pub struct OutputLine<R> {
    regs: R,
    pin: u8,
}

impl<R> OutputLine<R> {
    /// GPIO number driven by this line.
    pub fn pin(&self) -> u8 {
        self.pin
    }
}

impl<R> ErrorType for OutputLine<R> {
    type Error = Infallible;
}

impl<R: RegisterBlock> OutputPin for OutputLine<R> {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.regs.write(bank_offset(GPCLR, self.pin), bank_bit(self.pin));
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.regs.write(bank_offset(GPSET, self.pin), bank_bit(self.pin));
        Ok(())
    }
}

impl<R: RegisterBlock> StatefulOutputPin for OutputLine<R> {
    fn is_set_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.regs.read(bank_offset(GPLEV, self.pin)) & bank_bit(self.pin) != 0)
    }

    fn is_set_low(&mut self) -> Result<bool, Self::Error> {
        self.is_set_high().map(|high| !high)
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
    use core::cell::RefCell;
    use std::collections::BTreeMap;
    use std::rc::Rc;

    /// Register file that latches SET/CLR writes into LEV like the real bank.
    #[derive(Clone, Default)]
    struct FakeGpio(Rc<RefCell<BTreeMap<usize, u32>>>);

    impl RegisterBlock for FakeGpio {
        fn len(&self) -> usize {
            crate::register::MIN_WINDOW_BYTES
        }

        fn read(&self, offset: usize) -> u32 {
            self.0.borrow().get(&offset).copied().unwrap_or(0)
        }

        fn write(&self, offset: usize, value: u32) {
            let mut regs = self.0.borrow_mut();
            let rel = offset - GPIO_OFFSET;
            if (GPSET..GPSET + 8).contains(&rel) {
                *regs.entry(offset - GPSET + GPLEV).or_default() |= value;
            } else if (GPCLR..GPCLR + 8).contains(&rel) {
                *regs.entry(offset - GPCLR + GPLEV).or_default() &= !value;
            } else {
                regs.insert(offset, value);
            }
        }
    }

    #[test]
    fn function_select_packs_three_bits_per_pin() {
        let bank = GpioBank::new(FakeGpio::default());
        bank.set_function(25, Function::Output).unwrap();
        bank.set_function(27, Function::Output).unwrap();
        bank.set_function(29, Function::Alt0).unwrap();
        // GPFSEL2 holds pins 20..=29
        let raw = bank.regs.read(GPIO_OFFSET + 8);
        assert_eq!(raw, (0b001 << 15) | (0b001 << 21) | (0b100 << 27));
        assert_eq!(bank.function_bits(25).unwrap(), Function::Output as u8);
        assert_eq!(bank.function_bits(26).unwrap(), Function::Input as u8);
    }

    #[test]
    fn output_line_drives_level() {
        let bank = GpioBank::new(FakeGpio::default());
        let mut dc = bank.output(25).unwrap();
        dc.set_high().unwrap();
        assert!(bank.level(25).unwrap());
        assert!(dc.is_set_high().unwrap());
        dc.set_low().unwrap();
        assert!(!bank.level(25).unwrap());
        assert!(dc.is_set_low().unwrap());
    }

    #[test]
    fn high_bank_pins_use_second_register() {
        let bank = GpioBank::new(FakeGpio::default());
        bank.set(40).unwrap();
        assert_eq!(bank.regs.read(GPIO_OFFSET + GPLEV + 4), 1 << 8);
        assert_eq!(bank.regs.read(GPIO_OFFSET + GPLEV), 0);
    }

    #[test]
    fn out_of_range_pin_is_rejected() {
        let bank = GpioBank::new(FakeGpio::default());
        assert_eq!(bank.set(54), Err(GpioError::InvalidPin(54)));
        assert!(bank.output(60).is_err());
    }

    #[test]
    fn spi0_claim_and_release() {
        let bank = GpioBank::new(FakeGpio::default());
        bank.claim_spi0().unwrap();
        for pin in [SPI0_MISO, SPI0_MOSI, SPI0_CLK, SPI0_CE0] {
            assert_eq!(bank.function_bits(pin).unwrap(), Function::Alt0 as u8);
        }
        bank.release_spi0().unwrap();
        for pin in [SPI0_MISO, SPI0_MOSI, SPI0_CLK, SPI0_CE0, SPI0_CE1] {
            assert_eq!(bank.function_bits(pin).unwrap(), Function::Input as u8);
        }
    }
}
