//! ST7789 bring-up
//!
//! Runs once, before the bus thread starts, directly on the transport. The
//! whole script runs at [`INIT_CLOCK_DIVIDER`] so a panel that cannot keep up
//! with the runtime clock still comes up; the runtime divider is restored at
//! the end.
//!
//! | Step | Bytes | Wait |
//! |------|-------|------|
//! | RESET high, low, high | - | 120 ms each |
//! | SLPOUT | `11` | 120 ms |
//! | COLMOD | `3A 05` | 20 ms |
//! | MADCTL | `36 mm` | 20 ms |
//! | INVON | `21` | 20 ms |
//! | NORON | `13` | 20 ms |
//! | VSCSAD (row swap only) | `37 00 nn` | 20 ms |
//! | DISPON | `29` | 120 ms |
//! | VSCSAD (no row swap) | `37 00 00` | 20 ms |
//! | clear | CASET/RASET/RAMWR per row | 120 ms |

use std::thread;
use std::time::Duration;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use platform::display::{position_bytes, window_bytes, BYTES_PER_PIXEL, COLMOD_16BPP, CONTROLLER_ROWS};
use platform::peripheral::INIT_CLOCK_DIVIDER;
use platform::{Command, MirrorConfig, RegisterBlock, SpiConfig};

use crate::transport::{SpiTransport, TransportError};

const RESET_MS: u32 = 120;
const WAKE_MS: u32 = 120;
const SETTLE_MS: u32 = 20;

/// [`DelayNs`] backed by `thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadDelay;

impl DelayNs for ThreadDelay {
    fn delay_ns(&mut self, ns: u32) {
        thread::sleep(Duration::from_nanos(u64::from(ns)));
    }
}

/// Everything the init script needs from the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitParams {
    /// Visible width in pixels.
    pub width: u16,
    /// Visible height in pixels.
    pub height: u16,
    /// Column offset of the visible area in controller RAM.
    pub x_offset: u16,
    /// Row offset of the visible area in controller RAM.
    pub y_offset: u16,
    /// MADCTL value.
    pub madctl: u8,
    /// Clock restored once the script is done.
    pub runtime: SpiConfig,
}

impl InitParams {
    /// Extract init parameters from a validated configuration.
    pub fn from_config(config: &MirrorConfig) -> Self {
        Self {
            width: config.display.width,
            height: config.display.height,
            x_offset: config.display.x_offset,
            y_offset: config.display.y_offset,
            madctl: config.madctl(),
            runtime: config.spi(),
        }
    }

    fn row_order_swapped(&self) -> bool {
        self.madctl & platform::display::MADCTL_ROW_ADDRESS_ORDER_SWAP != 0
    }
}

/// Reset the panel (when a reset line is wired), run the init script and
/// clear the visible area to black.
///
/// Leaves the column window spanning the visible width and the row window
/// spanning the visible height.
pub fn initialize<R, DC, RST, D>(
    transport: &mut SpiTransport<R, DC>,
    reset: Option<&mut RST>,
    delay: &mut D,
    params: &InitParams,
) -> Result<(), TransportError>
where
    R: RegisterBlock,
    DC: OutputPin,
    RST: OutputPin,
    D: DelayNs,
{
    if let Some(reset) = reset {
        hardware_reset(reset, delay)?;
    }

    transport.set_clock_divider(INIT_CLOCK_DIVIDER);
    transport.begin();
    delay.delay_ms(WAKE_MS);

    transport.run_task(Command::SleepOut.into(), &[])?;
    delay.delay_ms(WAKE_MS);
    transport.run_task(Command::PixelFormat.into(), &[COLMOD_16BPP])?;
    delay.delay_ms(SETTLE_MS);
    transport.run_task(Command::MemoryAccessControl.into(), &[params.madctl])?;
    delay.delay_ms(SETTLE_MS);
    transport.run_task(Command::InversionOn.into(), &[])?;
    delay.delay_ms(SETTLE_MS);
    transport.run_task(Command::NormalModeOn.into(), &[])?;
    delay.delay_ms(SETTLE_MS);

    // With rows swapped, row y lands at CONTROLLER_ROWS - 1 - y; scroll the
    // visible area onto that range.
    if params.row_order_swapped() {
        let scroll = CONTROLLER_ROWS.saturating_sub(params.height);
        transport.run_task(Command::VerticalScrollStart.into(), &position_bytes(scroll))?;
        delay.delay_ms(SETTLE_MS);
    }

    transport.run_task(Command::DisplayOn.into(), &[])?;
    delay.delay_ms(WAKE_MS);

    if !params.row_order_swapped() {
        transport.run_task(Command::VerticalScrollStart.into(), &position_bytes(0))?;
        delay.delay_ms(SETTLE_MS);
    }

    clear_screen(transport, params)?;
    delay.delay_ms(WAKE_MS);

    transport.end();
    delay.delay_ms(WAKE_MS);
    transport.configure(params.runtime);
    tracing::info!(
        width = params.width,
        height = params.height,
        madctl = params.madctl,
        "display initialized"
    );
    Ok(())
}

fn hardware_reset<RST: OutputPin, D: DelayNs>(reset: &mut RST, delay: &mut D) -> Result<(), TransportError> {
    reset.set_high().map_err(|_| TransportError::Gpio)?;
    delay.delay_ms(RESET_MS);
    reset.set_low().map_err(|_| TransportError::Gpio)?;
    delay.delay_ms(RESET_MS);
    reset.set_high().map_err(|_| TransportError::Gpio)?;
    delay.delay_ms(RESET_MS);
    tracing::debug!("display reset pulse sent");
    Ok(())
}

/// Zero every visible row, then leave full-area windows behind.
#[allow(clippy::arithmetic_side_effects)] // Safety: validated geometry fits the controller's 320x320 address space
fn clear_screen<R: RegisterBlock, DC: OutputPin>(
    transport: &mut SpiTransport<R, DC>,
    params: &InitParams,
) -> Result<(), TransportError> {
    let columns = window_bytes(params.x_offset, params.x_offset + params.width - 1);
    let last_row = params.y_offset + params.height - 1;
    let zeros = vec![0u8; usize::from(params.width) * BYTES_PER_PIXEL];

    for y in 0..params.height {
        transport.run_task(Command::ColumnAddressSet.into(), &columns)?;
        transport.run_task(
            Command::RowAddressSet.into(),
            &window_bytes(params.y_offset + y, last_row),
        )?;
        transport.run_task(Command::MemoryWrite.into(), &zeros)?;
    }

    transport.run_task(Command::ColumnAddressSet.into(), &columns)?;
    transport.run_task(
        Command::RowAddressSet.into(),
        &window_bytes(params.y_offset, last_row),
    )?;
    tracing::debug!(rows = params.height, "screen cleared");
    Ok(())
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
    use crate::sim::{SimulatedPeripherals, VirtualPanel, Window};
    use embedded_hal_mock::eh1::delay::NoopDelay;
    use embedded_hal_mock::eh1::digital::{Mock as PinMock, State, Transaction as PinTransaction};
    use platform::display::MADCTL_ROW_ADDRESS_ORDER_SWAP;
    use platform::GpioBank;

    const DC_PIN: u8 = 25;

    fn params(madctl: u8) -> InitParams {
        InitParams {
            width: 16,
            height: 8,
            x_offset: 0,
            y_offset: 0,
            madctl,
            runtime: SpiConfig::DEFAULT,
        }
    }

    fn transport(sim: &SimulatedPeripherals) -> SpiTransport<SimulatedPeripherals, platform::OutputLine<SimulatedPeripherals>> {
        let dc = GpioBank::new(sim.clone()).output(DC_PIN).unwrap();
        SpiTransport::new(sim.clone(), dc)
    }

    #[test]
    fn script_wakes_panel_and_restores_clock() {
        let sim = SimulatedPeripherals::new(DC_PIN);
        let mut transport = transport(&sim);
        let mut reset = PinMock::new(&[
            PinTransaction::set(State::High),
            PinTransaction::set(State::Low),
            PinTransaction::set(State::High),
        ]);

        initialize(&mut transport, Some(&mut reset), &mut NoopDelay::new(), &params(0)).unwrap();

        sim.with_panel(|panel| {
            assert!(panel.is_running());
            assert!(panel.is_inverted());
            assert_eq!(panel.colmod(), COLMOD_16BPP);
            assert_eq!(panel.madctl(), 0);
            assert_eq!(panel.count(0x37), 1);
            assert_eq!(panel.count(0x2C), 8);
            assert_eq!(panel.columns(), Window { start: 0, end: 15 });
            assert_eq!(panel.rows(), Window { start: 0, end: 7 });
        });
        assert_eq!(sim.clock_divider(), u32::from(SpiConfig::DEFAULT.clock_divider));
        assert_eq!(sim.dlen(), 2);
        assert_eq!(sim.control() & platform::peripheral::cs::TA, 0);
        reset.done();
    }

    #[test]
    fn clear_zeroes_visible_area_only() {
        let sim = SimulatedPeripherals::new(DC_PIN);
        let mut transport = transport(&sim);
        let mut p = params(0);
        p.x_offset = 2;
        p.y_offset = 3;

        initialize::<_, _, PinMock, _>(&mut transport, None, &mut NoopDelay::new(), &p).unwrap();

        sim.with_panel(|panel: &VirtualPanel| {
            assert_eq!(panel.columns(), Window { start: 2, end: 17 });
            assert_eq!(panel.rows(), Window { start: 3, end: 10 });
            assert_eq!(panel.count(0x2B), 9);
        });
        // 8 rows of 16 pixels plus command and address bytes
        assert!(sim.fifo_bytes() > 8 * 16 * 2);
    }

    #[test]
    fn row_swap_scrolls_visible_rows_into_view() {
        let sim = SimulatedPeripherals::new(DC_PIN);
        let mut transport = transport(&sim);
        initialize::<_, _, PinMock, _>(
            &mut transport,
            None,
            &mut NoopDelay::new(),
            &params(MADCTL_ROW_ADDRESS_ORDER_SWAP),
        )
        .unwrap();
        sim.with_panel(|panel| {
            assert_eq!(panel.madctl(), MADCTL_ROW_ADDRESS_ORDER_SWAP);
            assert_eq!(panel.count(0x37), 1);
        });
    }
}
