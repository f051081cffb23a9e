//! ST7789-class display controller command set
//!
//! Every bus transaction is one command byte sent with D/C low, followed by
//! zero or more parameter/pixel bytes sent with D/C high.

/// Controller RAM rows (the ST7789V frame memory is 240x320).
pub const CONTROLLER_ROWS: u16 = 320;

/// Controller RAM columns.
pub const CONTROLLER_COLUMNS: u16 = 240;

/// Bytes per pixel on the wire in 16bpp RGB565 mode.
pub const BYTES_PER_PIXEL: usize = 2;

/// Command byte reserved by the task queue as its wrap marker. No
/// controller command uses it.
pub const RESERVED_COMMAND: u8 = 0x00;

/// ST7789 command codes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Sleep out, 0 data bytes; wait 120 ms before the next command.
    SleepOut = 0x11,
    /// Normal display mode on (partial mode off), 0 data bytes.
    NormalModeOn = 0x13,
    /// Display inversion on, 0 data bytes.
    InversionOn = 0x21,
    /// Display on, 0 data bytes.
    DisplayOn = 0x29,
    /// Column address set (CASET): 2 bytes move the start, 4 bytes set a window.
    ColumnAddressSet = 0x2A,
    /// Row address set (RASET): 2 bytes move the start, 4 bytes set a window.
    RowAddressSet = 0x2B,
    /// Memory write (RAMWR), N x 2 bytes of big-endian RGB565.
    MemoryWrite = 0x2C,
    /// Memory data access control (MADCTL), 1 data byte.
    MemoryAccessControl = 0x36,
    /// Vertical scroll start address of RAM (VSCSAD), 2 data bytes.
    VerticalScrollStart = 0x37,
    /// Interface pixel format (COLMOD), 1 data byte.
    PixelFormat = 0x3A,
}

impl Command {
    /// Decode a raw command byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0x11 => Self::SleepOut,
            0x13 => Self::NormalModeOn,
            0x21 => Self::InversionOn,
            0x29 => Self::DisplayOn,
            0x2A => Self::ColumnAddressSet,
            0x2B => Self::RowAddressSet,
            0x2C => Self::MemoryWrite,
            0x36 => Self::MemoryAccessControl,
            0x37 => Self::VerticalScrollStart,
            0x3A => Self::PixelFormat,
            _ => return None,
        })
    }

    /// Mnemonic used in log output.
    pub fn name(self) -> &'static str {
        match self {
            Self::SleepOut => "SLPOUT",
            Self::NormalModeOn => "NORON",
            Self::InversionOn => "INVON",
            Self::DisplayOn => "DISPON",
            Self::ColumnAddressSet => "CASET",
            Self::RowAddressSet => "RASET",
            Self::MemoryWrite => "RAMWR",
            Self::MemoryAccessControl => "MADCTL",
            Self::VerticalScrollStart => "VSCSAD",
            Self::PixelFormat => "COLMOD",
        }
    }
}

impl From<Command> for u8 {
    fn from(command: Command) -> Self {
        command as u8
    }
}

/// COLMOD value selecting 16 bits per pixel.
pub const COLMOD_16BPP: u8 = 0x05;

/// MADCTL bit: row address order swap (MY).
pub const MADCTL_ROW_ADDRESS_ORDER_SWAP: u8 = 1 << 7;

/// Encode a 2-byte cursor position parameter.
pub fn position_bytes(position: u16) -> [u8; 2] {
    position.to_be_bytes()
}

/// Encode a 4-byte `[start, end]` window parameter (both inclusive).
pub fn window_bytes(start: u16, end: u16) -> [u8; 4] {
    let [s0, s1] = start.to_be_bytes();
    let [e0, e1] = end.to_be_bytes();
    [s0, s1, e0, e1]
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn command_bytes_round_trip() {
        for command in [
            Command::SleepOut,
            Command::NormalModeOn,
            Command::InversionOn,
            Command::DisplayOn,
            Command::ColumnAddressSet,
            Command::RowAddressSet,
            Command::MemoryWrite,
            Command::MemoryAccessControl,
            Command::VerticalScrollStart,
            Command::PixelFormat,
        ] {
            assert_eq!(Command::from_byte(command.into()), Some(command));
            assert_ne!(u8::from(command), RESERVED_COMMAND);
        }
        assert_eq!(Command::from_byte(0x00), None);
    }

    #[test]
    fn window_is_big_endian() {
        assert_eq!(window_bytes(0x0102, 0x00EF), [0x01, 0x02, 0x00, 0xEF]);
        assert_eq!(position_bytes(300), [0x01, 0x2C]);
    }
}
