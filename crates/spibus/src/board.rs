//! Pin and SPI0 setup around one register window
//!
//! Attaching routes the SPI0 signals to the master, turns the display's
//! D/C (and optional reset) line into an output and resets the SPI0 control
//! register. Releasing undoes it: SPI0 back to defaults with both FIFOs
//! cleared, every pin the mirror touched back to an input.

use platform::gpio::Function;
use platform::register::check_window;
use platform::{DisplayConfig, GpioBank, GpioError, OutputLine, RegisterBlock, RegisterError, SpiRegisters};

use crate::transport::SpiTransport;

/// Board setup errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BoardError {
    /// The register window is unusable.
    #[error(transparent)]
    Register(#[from] RegisterError),
    /// A configured pin does not exist.
    #[error(transparent)]
    Gpio(#[from] GpioError),
}

/// A claimed SPI0 master plus the display control lines.
pub struct Board<R> {
    regs: R,
    gpio: GpioBank<R>,
    dc_pin: u8,
    reset_pin: Option<u8>,
}

impl<R: RegisterBlock + Clone> Board<R> {
    /// Claim SPI0 and the display lines described by `display`.
    pub fn attach(regs: R, display: &DisplayConfig) -> Result<Self, BoardError> {
        check_window(&regs)?;
        let gpio = GpioBank::new(regs.clone());
        gpio.claim_spi0()?;
        gpio.set_function(display.dc_pin, Function::Output)?;
        if let Some(pin) = display.reset_pin {
            gpio.set_function(pin, Function::Output)?;
        }
        SpiRegisters::new(regs.clone()).reset();
        let (dc_pin, reset_pin) = (display.dc_pin, display.reset_pin);
        tracing::debug!(dc_pin, reset_pin = ?reset_pin, "spi0 claimed");
        Ok(Self {
            regs,
            gpio,
            dc_pin: display.dc_pin,
            reset_pin: display.reset_pin,
        })
    }

    /// A transport driving SPI0 and the D/C line.
    pub fn transport(&self) -> Result<SpiTransport<R, OutputLine<R>>, BoardError> {
        let dc = self.gpio.output(self.dc_pin)?;
        Ok(SpiTransport::new(self.regs.clone(), dc))
    }

    /// The reset line, when one is wired.
    pub fn reset_line(&self) -> Result<Option<OutputLine<R>>, BoardError> {
        self.reset_pin
            .map(|pin| self.gpio.output(pin))
            .transpose()
            .map_err(BoardError::from)
    }

    /// Reset SPI0 and return every claimed pin to an input.
    pub fn release(self) -> Result<(), BoardError> {
        SpiRegisters::new(self.regs.clone()).reset();
        self.gpio.set_function(self.dc_pin, Function::Input)?;
        if let Some(pin) = self.reset_pin {
            self.gpio.set_function(pin, Function::Input)?;
        }
        self.gpio.release_spi0()?;
        tracing::debug!("spi0 released");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::sim::SimulatedPeripherals;
    use platform::gpio::{SPI0_CE0, SPI0_CE1, SPI0_CLK, SPI0_MOSI};
    use platform::peripheral::cs;

    fn display() -> DisplayConfig {
        DisplayConfig {
            dc_pin: 25,
            reset_pin: Some(27),
            ..DisplayConfig::default()
        }
    }

    #[test]
    fn attach_claims_pins_and_release_restores_them() {
        let sim = SimulatedPeripherals::new(25);
        let gpio = GpioBank::new(sim.clone());
        let board = Board::attach(sim.clone(), &display()).unwrap();

        for pin in [SPI0_CE0, SPI0_CLK, SPI0_MOSI] {
            assert_eq!(gpio.function_bits(pin).unwrap(), Function::Alt0 as u8);
        }
        assert_eq!(gpio.function_bits(25).unwrap(), Function::Output as u8);
        assert_eq!(gpio.function_bits(27).unwrap(), Function::Output as u8);
        assert_eq!(sim.control(), cs::CLEAR);
        assert!(board.reset_line().unwrap().is_some());

        board.release().unwrap();
        for pin in [SPI0_CE1, SPI0_CE0, SPI0_CLK, SPI0_MOSI, 25, 27] {
            assert_eq!(gpio.function_bits(pin).unwrap(), Function::Input as u8);
        }
    }

    #[test]
    fn bad_pin_is_rejected() {
        let sim = SimulatedPeripherals::new(25);
        let config = DisplayConfig {
            dc_pin: 60,
            ..DisplayConfig::default()
        };
        assert_eq!(
            Board::attach(sim, &config).err(),
            Some(BoardError::Gpio(GpioError::InvalidPin(60)))
        );
    }

    #[test]
    fn no_reset_line_when_unwired() {
        let sim = SimulatedPeripherals::new(25);
        let config = DisplayConfig {
            reset_pin: None,
            ..display()
        };
        let board = Board::attach(sim, &config).unwrap();
        assert!(board.reset_line().unwrap().is_none());
    }
}
