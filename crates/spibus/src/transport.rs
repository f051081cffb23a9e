//! Polled SPI0 transport
//!
//! Shifts one task at a time onto the bus: the command byte with D/C low,
//! then the payload with D/C high. There is no DMA or interrupt path, so the
//! driver polls CS and keeps the RX FIFO drained (received bytes are
//! discarded) while feeding TX. The polling loops have no timeout: a bus that
//! never reports progress hangs the bus thread.

use embedded_hal::digital::OutputPin;
use platform::peripheral::cs;
use platform::{RegisterBlock, SpiConfig, SpiRegisters};

/// Payload bytes pushed into the TX FIFO before polling starts. The FIFO is
/// 16 entries deep and the command byte may still be in flight.
pub const PREFILL_BYTES: usize = 15;

/// Transport errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The D/C line refused to change level.
    #[error("D/C line could not be driven")]
    Gpio,
}

/// SPI0 master plus the display's D/C line.
pub struct SpiTransport<R, DC> {
    spi: SpiRegisters<R>,
    dc: DC,
}

impl<R: RegisterBlock, DC: OutputPin> SpiTransport<R, DC> {
    /// Drive SPI0 in `regs`, toggling `dc` around each command byte.
    pub fn new(regs: R, dc: DC) -> Self {
        Self {
            spi: SpiRegisters::new(regs),
            dc,
        }
    }

    /// Program the runtime clock and remove the idle ninth clock per byte.
    pub fn configure(&self, config: SpiConfig) {
        self.spi.set_clock_divider(config.clock_divider);
        self.spi.unlock_fast_8_clocks();
        tracing::debug!(
            divider = config.clock_divider,
            hz = config.frequency_hz(),
            "spi clock configured"
        );
    }

    /// Change only the clock divider.
    pub fn set_clock_divider(&self, divider: u16) {
        self.spi.set_clock_divider(divider);
    }

    /// Open a transfer window (TA=1) for a burst of tasks.
    pub fn begin(&self) {
        self.spi.set_control(cs::TA);
    }

    /// Wait for the last byte to leave and close the transfer window.
    pub fn end(&self) {
        self.wait_transfer_done();
        self.spi.set_control(cs::CLEAR_RX);
    }

    /// Transmit one task. Must be called inside [`begin`](Self::begin) /
    /// [`end`](Self::end).
    pub fn run_task(&mut self, command: u8, payload: &[u8]) -> Result<(), TransportError> {
        let status = self.wait_transfer_done();
        if status & cs::RXD != 0 {
            self.spi.set_control(cs::CLEAR_RX | cs::TA);
        }

        self.dc.set_low().map_err(|_| TransportError::Gpio)?;
        self.spi.write_fifo(command);
        while self.spi.status() & (cs::RXD | cs::DONE) == 0 {
            core::hint::spin_loop();
        }
        self.dc.set_high().map_err(|_| TransportError::Gpio)?;

        let (prefill, rest) = payload.split_at(payload.len().min(PREFILL_BYTES));
        for &byte in prefill {
            self.spi.write_fifo(byte);
        }
        let mut rest = rest.iter();
        let mut pending = rest.next();
        while let Some(&byte) = pending {
            let status = self.spi.status();
            if status & cs::TXD != 0 {
                self.spi.write_fifo(byte);
                pending = rest.next();
            }
            if status & (cs::RXR | cs::RXF) != 0 {
                self.spi.set_control(cs::CLEAR_RX | cs::TA);
            }
        }
        Ok(())
    }

    /// Give back the D/C line.
    pub fn into_dc(self) -> DC {
        self.dc
    }

    /// Spin while TA=1 and DONE=0, draining RX as it fills. Returns the last
    /// status read.
    fn wait_transfer_done(&self) -> u32 {
        loop {
            let status = self.spi.status();
            if (status ^ cs::TA) & (cs::DONE | cs::TA) != 0 {
                return status;
            }
            if status & (cs::RXR | cs::RXF) != 0 {
                self.spi.set_control(cs::CLEAR_RX | cs::TA);
            }
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
    use std::cell::RefCell;
    use std::rc::Rc;

    use embedded_hal_mock::eh1::digital::{Mock as PinMock, State, Transaction as PinTransaction};
    use platform::peripheral::regs;
    use platform::register::{MIN_WINDOW_BYTES, SPI0_OFFSET};

    /// SPI0 that completes every byte at once and logs what it sees.
    #[derive(Clone, Default)]
    struct InstantSpi {
        log: Rc<RefCell<Vec<(usize, u32)>>>,
        busy_polls: Rc<RefCell<u32>>,
    }

    impl InstantSpi {
        fn fifo(&self) -> Vec<u8> {
            self.log
                .borrow()
                .iter()
                .filter(|(offset, _)| *offset == SPI0_OFFSET + regs::FIFO)
                .map(|(_, value)| *value as u8)
                .collect()
        }

        fn control_writes(&self) -> Vec<u32> {
            self.log
                .borrow()
                .iter()
                .filter(|(offset, _)| *offset == SPI0_OFFSET + regs::CS)
                .map(|(_, value)| *value)
                .collect()
        }
    }

    impl RegisterBlock for InstantSpi {
        fn len(&self) -> usize {
            MIN_WINDOW_BYTES
        }

        fn read(&self, offset: usize) -> u32 {
            if offset != SPI0_OFFSET + regs::CS {
                return 0;
            }
            // Report "busy" for a few polls to exercise the wait loop.
            let mut busy = self.busy_polls.borrow_mut();
            if *busy > 0 {
                *busy -= 1;
                return cs::TA | cs::RXR;
            }
            cs::TA | cs::DONE | cs::TXD | cs::RXD
        }

        fn write(&self, offset: usize, value: u32) {
            self.log.borrow_mut().push((offset, value));
        }
    }

    #[test]
    fn command_then_payload_with_dc_toggle() {
        let spi = InstantSpi::default();
        let dc = PinMock::new(&[PinTransaction::set(State::Low), PinTransaction::set(State::High)]);
        let mut transport = SpiTransport::new(spi.clone(), dc);

        let payload: Vec<u8> = (1..=40).collect();
        transport.run_task(0x2C, &payload).unwrap();

        let mut expected = vec![0x2C];
        expected.extend_from_slice(&payload);
        assert_eq!(spi.fifo(), expected);
        transport.into_dc().done();
    }

    #[test]
    fn command_only_task() {
        let spi = InstantSpi::default();
        let dc = PinMock::new(&[PinTransaction::set(State::Low), PinTransaction::set(State::High)]);
        let mut transport = SpiTransport::new(spi.clone(), dc);
        transport.run_task(0x29, &[]).unwrap();
        assert_eq!(spi.fifo(), vec![0x29]);
        transport.into_dc().done();
    }

    #[test]
    fn drains_rx_while_waiting() {
        let spi = InstantSpi::default();
        *spi.busy_polls.borrow_mut() = 3;
        let dc = PinMock::new(&[PinTransaction::set(State::Low), PinTransaction::set(State::High)]);
        let mut transport = SpiTransport::new(spi.clone(), dc);
        transport.run_task(0x11, &[]).unwrap();

        let clears = spi
            .control_writes()
            .iter()
            .filter(|v| **v == cs::CLEAR_RX | cs::TA)
            .count();
        // three busy polls plus the RXD left over once idle
        assert_eq!(clears, 4);
        transport.into_dc().done();
    }

    #[test]
    fn bracket_and_clock_setup() {
        let spi = InstantSpi::default();
        let transport = SpiTransport::new(spi.clone(), PinMock::new(&[]));
        transport.configure(SpiConfig::DEFAULT);
        transport.begin();
        transport.end();

        let log = spi.log.borrow().clone();
        assert!(log.contains(&(SPI0_OFFSET + regs::CLK, 8)));
        assert!(log.contains(&(SPI0_OFFSET + regs::DLEN, 2)));
        assert_eq!(spi.control_writes(), vec![cs::TA, cs::CLEAR_RX]);
        transport.into_dc().done();
    }
}
