//! Simulated peripherals and a virtual ST7789 panel
//!
//! [`SimulatedPeripherals`] implements [`RegisterBlock`] for the GPIO and
//! SPI0 register files. The SPI master completes every byte instantly: DONE
//! and TXD always read as set, and RXD is set after each FIFO write until RX
//! is cleared. Bytes written to the FIFO are decoded by a [`VirtualPanel`],
//! using the level of the configured D/C pin to tell commands from data.
//!
//! This lets the real transport, protocol and init script run unchanged on a
//! development host and gives tests a panel to compare against.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use platform::display::{Command, CONTROLLER_ROWS};
use platform::gpio::{GPCLR, GPFSEL, GPLEV, GPSET};
use platform::peripheral::{cs, regs};
use platform::register::{GPIO_OFFSET, MIN_WINDOW_BYTES, SPI0_OFFSET};
use platform::RegisterBlock;

// ---------------------------------------------------------------------------
// Virtual panel
// ---------------------------------------------------------------------------

/// Inclusive address window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// First address.
    pub start: u16,
    /// Last address (inclusive).
    pub end: u16,
}

/// Controller model: frame memory plus the address windows and mode
/// registers the driver touches.
#[derive(Debug, Clone)]
pub struct VirtualPanel {
    side: usize,
    memory: Vec<u16>,
    command: Option<u8>,
    params: Vec<u8>,
    columns: Window,
    rows: Window,
    cursor: (u16, u16),
    pixel_high: Option<u8>,
    madctl: u8,
    colmod: u8,
    awake: bool,
    display_on: bool,
    inverted: bool,
    counts: BTreeMap<u8, usize>,
}

impl Default for VirtualPanel {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualPanel {
    /// A blank panel with square frame memory covering every addressable row
    /// and column.
    #[allow(clippy::arithmetic_side_effects)] // Safety: 320 * 320
    pub fn new() -> Self {
        let side = usize::from(CONTROLLER_ROWS);
        let last = CONTROLLER_ROWS.saturating_sub(1);
        Self {
            side,
            memory: vec![0; side * side],
            command: None,
            params: Vec::new(),
            columns: Window { start: 0, end: last },
            rows: Window { start: 0, end: last },
            cursor: (0, 0),
            pixel_high: None,
            madctl: 0,
            colmod: 0,
            awake: false,
            display_on: false,
            inverted: false,
            counts: BTreeMap::new(),
        }
    }

    /// Feed one byte from the bus; `data` is the D/C level.
    pub fn feed(&mut self, data: bool, byte: u8) {
        if data {
            self.data(byte);
        } else {
            self.begin_command(byte);
        }
    }

    fn begin_command(&mut self, byte: u8) {
        let seen = self.count(byte).saturating_add(1);
        self.counts.insert(byte, seen);
        self.command = Some(byte);
        self.params.clear();
        self.pixel_high = None;
        match Command::from_byte(byte) {
            Some(Command::SleepOut) => self.awake = true,
            Some(Command::DisplayOn) => self.display_on = true,
            Some(Command::InversionOn) => self.inverted = true,
            Some(Command::MemoryWrite) => self.cursor = (self.columns.start, self.rows.start),
            _ => {}
        }
    }

    fn data(&mut self, byte: u8) {
        let Some(command) = self.command.and_then(Command::from_byte) else {
            return;
        };
        match command {
            Command::ColumnAddressSet => {
                self.params.push(byte);
                Self::apply_window(&mut self.columns, &self.params);
            }
            Command::RowAddressSet => {
                self.params.push(byte);
                Self::apply_window(&mut self.rows, &self.params);
            }
            Command::MemoryWrite => match self.pixel_high.take() {
                None => self.pixel_high = Some(byte),
                Some(high) => self.write_pixel(u16::from_be_bytes([high, byte])),
            },
            Command::MemoryAccessControl => self.madctl = byte,
            Command::PixelFormat => self.colmod = byte,
            _ => self.params.push(byte),
        }
    }

    /// Two bytes move the start address, four bytes set start and end.
    fn apply_window(window: &mut Window, params: &[u8]) {
        match *params {
            [s0, s1] => window.start = u16::from_be_bytes([s0, s1]),
            [_, _, e0, e1] => window.end = u16::from_be_bytes([e0, e1]),
            _ => {}
        }
    }

    #[allow(clippy::arithmetic_side_effects)] // Safety: cursor < side after wrap checks
    fn write_pixel(&mut self, value: u16) {
        let (x, y) = self.cursor;
        let index = usize::from(y) * self.side + usize::from(x);
        if usize::from(x) < self.side {
            if let Some(slot) = self.memory.get_mut(index) {
                *slot = value;
            }
        }
        let (mut x, mut y) = (x.saturating_add(1), y);
        if x > self.columns.end {
            x = self.columns.start;
            y = y.saturating_add(1);
            if y > self.rows.end {
                y = self.rows.start;
            }
        }
        self.cursor = (x, y);
    }

    /// Pixel stored at controller address `(x, y)`.
    #[allow(clippy::arithmetic_side_effects)] // Safety: bounds checked by get
    pub fn pixel(&self, x: u16, y: u16) -> Option<u16> {
        if usize::from(x) >= self.side {
            return None;
        }
        self.memory
            .get(usize::from(y) * self.side + usize::from(x))
            .copied()
    }

    /// Current column window.
    pub fn columns(&self) -> Window {
        self.columns
    }

    /// Current row window.
    pub fn rows(&self) -> Window {
        self.rows
    }

    /// Last MADCTL value.
    pub fn madctl(&self) -> u8 {
        self.madctl
    }

    /// Last COLMOD value.
    pub fn colmod(&self) -> u8 {
        self.colmod
    }

    /// `true` after SLPOUT and DISPON.
    pub fn is_running(&self) -> bool {
        self.awake && self.display_on
    }

    /// `true` after INVON.
    pub fn is_inverted(&self) -> bool {
        self.inverted
    }

    /// Times `command` was received.
    pub fn count(&self, command: u8) -> usize {
        self.counts.get(&command).copied().unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Register file
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SimState {
    fsel: [u32; 6],
    levels: u64,
    control: u32,
    clock: u32,
    dlen: u32,
    rx_pending: bool,
    fifo_bytes: u64,
    panel: VirtualPanel,
}

impl SimState {
    fn level(&self, pin: u8) -> bool {
        self.levels
            .checked_shr(u32::from(pin))
            .is_some_and(|bits| bits & 1 != 0)
    }
}

/// In-memory GPIO + SPI0 register window driving a [`VirtualPanel`].
#[derive(Debug, Clone)]
pub struct SimulatedPeripherals {
    state: Arc<Mutex<SimState>>,
    dc_pin: u8,
}

impl SimulatedPeripherals {
    /// Peripherals whose panel samples GPIO `dc_pin` as its D/C input.
    pub fn new(dc_pin: u8) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::default())),
            dc_pin,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the panel.
    pub fn with_panel<T>(&self, f: impl FnOnce(&VirtualPanel) -> T) -> T {
        f(&self.lock().panel)
    }

    /// Bytes written to the SPI FIFO so far.
    pub fn fifo_bytes(&self) -> u64 {
        self.lock().fifo_bytes
    }

    /// Programmed SPI clock divider.
    pub fn clock_divider(&self) -> u32 {
        self.lock().clock
    }

    /// Programmed DLEN.
    pub fn dlen(&self) -> u32 {
        self.lock().dlen
    }

    /// Last value written to the SPI control register.
    pub fn control(&self) -> u32 {
        self.lock().control
    }
}

#[allow(clippy::arithmetic_side_effects)] // Safety: offsets are compared against constant ranges first
impl RegisterBlock for SimulatedPeripherals {
    fn len(&self) -> usize {
        MIN_WINDOW_BYTES
    }

    fn read(&self, offset: usize) -> u32 {
        let state = self.lock();
        match offset {
            o if (GPIO_OFFSET + GPFSEL..GPIO_OFFSET + GPFSEL + 24).contains(&o) => {
                let index = (o - GPIO_OFFSET - GPFSEL) / 4;
                state.fsel.get(index).copied().unwrap_or(0)
            }
            #[allow(clippy::cast_possible_truncation)] // low word
            o if o == GPIO_OFFSET + GPLEV => state.levels as u32,
            o if o == GPIO_OFFSET + GPLEV + 4 => (state.levels >> 32) as u32,
            o if o == SPI0_OFFSET + regs::CS => {
                let rx = if state.rx_pending { cs::RXD } else { 0 };
                (state.control & cs::TA) | cs::DONE | cs::TXD | rx
            }
            o if o == SPI0_OFFSET + regs::CLK => state.clock,
            o if o == SPI0_OFFSET + regs::DLEN => state.dlen,
            _ => 0,
        }
    }

    fn write(&self, offset: usize, value: u32) {
        let mut state = self.lock();
        match offset {
            o if (GPIO_OFFSET + GPFSEL..GPIO_OFFSET + GPFSEL + 24).contains(&o) => {
                let index = (o - GPIO_OFFSET - GPFSEL) / 4;
                if let Some(slot) = state.fsel.get_mut(index) {
                    *slot = value;
                }
            }
            o if o == GPIO_OFFSET + GPSET => state.levels |= u64::from(value),
            o if o == GPIO_OFFSET + GPSET + 4 => state.levels |= u64::from(value) << 32,
            o if o == GPIO_OFFSET + GPCLR => state.levels &= !u64::from(value),
            o if o == GPIO_OFFSET + GPCLR + 4 => state.levels &= !(u64::from(value) << 32),
            o if o == SPI0_OFFSET + regs::CS => {
                if value & cs::CLEAR_RX != 0 {
                    state.rx_pending = false;
                }
                state.control = value;
            }
            o if o == SPI0_OFFSET + regs::FIFO => {
                let data = state.level(self.dc_pin);
                #[allow(clippy::cast_possible_truncation)] // the FIFO takes the low byte
                let byte = value as u8;
                state.panel.feed(data, byte);
                state.rx_pending = true;
                state.fifo_bytes += 1;
            }
            o if o == SPI0_OFFSET + regs::CLK => state.clock = value,
            o if o == SPI0_OFFSET + regs::DLEN => state.dlen = value,
            _ => {}
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use platform::GpioBank;

    #[test]
    fn window_commands_and_pixel_stream() {
        let mut panel = VirtualPanel::new();
        panel.feed(false, 0x2A);
        for b in [0, 2, 0, 3] {
            panel.feed(true, b);
        }
        panel.feed(false, 0x2B);
        for b in [0, 5, 0, 6] {
            panel.feed(true, b);
        }
        panel.feed(false, 0x2C);
        for px in [0x1111u16, 0x2222, 0x3333, 0x4444] {
            let [hi, lo] = px.to_be_bytes();
            panel.feed(true, hi);
            panel.feed(true, lo);
        }
        assert_eq!(panel.pixel(2, 5), Some(0x1111));
        assert_eq!(panel.pixel(3, 5), Some(0x2222));
        assert_eq!(panel.pixel(2, 6), Some(0x3333));
        assert_eq!(panel.pixel(3, 6), Some(0x4444));
        assert_eq!(panel.count(0x2C), 1);
    }

    #[test]
    fn two_byte_address_moves_start_only() {
        let mut panel = VirtualPanel::new();
        panel.feed(false, 0x2A);
        for b in [0, 0, 0, 9] {
            panel.feed(true, b);
        }
        panel.feed(false, 0x2A);
        panel.feed(true, 0);
        panel.feed(true, 4);
        assert_eq!(panel.columns(), Window { start: 4, end: 9 });
    }

    #[test]
    fn fifo_bytes_follow_dc_level() {
        let sim = SimulatedPeripherals::new(25);
        let gpio = GpioBank::new(sim.clone());
        gpio.clear(25).unwrap();
        sim.write(SPI0_OFFSET + regs::FIFO, 0x36);
        gpio.set(25).unwrap();
        sim.write(SPI0_OFFSET + regs::FIFO, 0x80);
        assert_eq!(sim.with_panel(VirtualPanel::madctl), 0x80);
        assert_eq!(sim.fifo_bytes(), 2);

        assert_ne!(sim.read(SPI0_OFFSET + regs::CS) & cs::RXD, 0);
        sim.write(SPI0_OFFSET + regs::CS, cs::CLEAR_RX);
        assert_eq!(sim.read(SPI0_OFFSET + regs::CS) & cs::RXD, 0);
    }
}
