//! Wire-level constants and the command table.

/// Version of the transmission protocol, reported by [`Command::ReadVersion`]
pub const VERSION_STRING: &str = "0.1";

/// Marks the start of a frame, never escaped
pub const START_OF_FRAME: u8 = 0xF7;

/// Marks the end of a frame, never escaped
pub const END_OF_FRAME: u8 = 0x7F;

/// Escape byte, the following byte on the wire is XORed with [`ESC_XOR`]
pub const ESC: u8 = 0xF6;

/// Value escaped bytes are XORed with
pub const ESC_XOR: u8 = 0x20;

/// Opcode of the `GOTO` instruction written at address 0 so that a reset
/// always lands in the bootloader
pub const GOTO: u32 = 0x04_0000;

/// Offset of the first argument byte in a received payload
/// (`[len_lo, len_hi, command, args...]`)
pub const ARGS_OFFSET: usize = 3;

/// Offset of the first data word in a write payload (after the 32-bit address)
pub const DATA_OFFSET: usize = ARGS_OFFSET + 4;

/// Receive buffer capacity required for a given maximum write size (in words)
pub const fn frame_capacity(max_prog_size: usize) -> usize {
    max_prog_size * 4 + 0x10
}

/// Returns true for byte values that must be escaped inside a frame
pub const fn needs_escape(byte: u8) -> bool {
    byte == START_OF_FRAME || byte == END_OF_FRAME || byte == ESC
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Read the platform identifier string
    ReadPlatform = 0x00,
    /// Read the protocol version string
    ReadVersion = 0x01,
    /// Read the flash row length (words)
    ReadRowLen = 0x02,
    /// Read the flash page length
    ReadPageLen = 0x03,
    /// Read the total program memory length
    ReadProgLen = 0x04,
    /// Read the maximum number of words per write transaction
    ReadMaxProgSize = 0x05,
    /// Read the application entry address
    ReadAppStartAddr = 0x06,
    /// Read the bootloader base address
    ReadBootStartAddr = 0x07,

    /// Erase the page containing an address
    ErasePage = 0x10,

    /// Read a single word
    ReadAddr = 0x20,
    /// Read `max_prog_size` words
    ReadMax = 0x21,

    /// Write a single flash row
    WriteRow = 0x30,
    /// Write `max_prog_size` words, one row at a time
    WriteMaxProgSize = 0x31,

    /// Jump to the application
    StartApp = 0x40,
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x00 => Self::ReadPlatform,
            0x01 => Self::ReadVersion,
            0x02 => Self::ReadRowLen,
            0x03 => Self::ReadPageLen,
            0x04 => Self::ReadProgLen,
            0x05 => Self::ReadMaxProgSize,
            0x06 => Self::ReadAppStartAddr,
            0x07 => Self::ReadBootStartAddr,
            0x10 => Self::ErasePage,
            0x20 => Self::ReadAddr,
            0x21 => Self::ReadMax,
            0x30 => Self::WriteRow,
            0x31 => Self::WriteMaxProgSize,
            0x40 => Self::StartApp,
            other => return Err(other),
        })
    }
}

impl From<Command> for u8 {
    fn from(c: Command) -> u8 {
        c as u8
    }
}
