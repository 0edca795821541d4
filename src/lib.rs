//! UART Flash Bootloader.
//!
//! Receives byte-stuffed, Fletcher-16 checked frames over a serial port and
//! performs flash erase / read / write operations on behalf of a host, while
//! refusing to touch the bootloader's own code region or the reset vector.
//!
//! ```txt
//! | 0xF7 | len_lo len_hi | command | payload... | sum1 sum2 | 0x7F |
//! ```
//!
//! Hardware is reached through the [`embedded_hal::serial`] traits, and the
//! [`Flash`] and [`Supervisor`] traits defined here.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

use core::fmt::Debug;

#[macro_use]
extern crate log;

#[macro_use(block)]
extern crate nb;

extern crate embedded_hal;
use embedded_hal::serial::{Read, Write};

#[cfg(feature = "structopt")]
extern crate structopt;

#[cfg(feature = "linux")]
extern crate linux_embedded_hal;

pub mod checksum;
pub mod dispatch;
pub mod protocol;
pub mod receive;
pub mod session;
pub mod transmit;

#[cfg(any(test, feature = "std"))]
pub mod sim;

#[cfg(feature = "linux")]
pub mod linux;

#[cfg(test)]
mod mock;

pub use checksum::{fletcher16, Fletcher16};
pub use dispatch::{Dispatcher, Outcome, Rejected};
pub use protocol::{frame_capacity, Command};
pub use receive::{Feed, Receiver};
pub use session::{Bootloader, Step};
pub use transmit::SendError;

/// Serial port used by the bootloader, non-blocking reads and writes
pub trait SerialPort<E>: Write<u8, Error = E> + Read<u8, Error = E> {}

impl<T, E> SerialPort<E> for T where T: Write<u8, Error = E> + Read<u8, Error = E> {}

/// Flash driver primitives
pub trait Flash {
    type Error: Debug;

    /// Erase the page containing `address`
    fn erase_page(&mut self, address: u32) -> Result<(), Self::Error>;

    /// Read one program word
    fn read_word(&mut self, address: u32) -> Result<u32, Self::Error>;

    /// Program one row starting at `address`
    fn write_row(&mut self, address: u32, words: Words<'_>) -> Result<(), Self::Error>;

    /// Program two consecutive words starting at `address`
    fn write_double_word(&mut self, address: u32, words: [u32; 2]) -> Result<(), Self::Error>;
}

/// Boot policy and control transfer, supplied by the board
pub trait Supervisor {
    /// Evaluated once at startup, `false` jumps straight to the application
    fn should_enter_bootloader(&mut self) -> bool;

    /// Polled on every iteration, typically a stall timer expiry
    fn should_abort_boot(&mut self) -> bool;

    fn service_watchdog(&mut self);

    /// Called for every frame with a valid checksum
    fn reset_stall_timer(&mut self);

    /// Transfer control to application code
    fn jump_to_application(&mut self, address: u32) -> !;
}

/// Little-endian 32-bit program words borrowed from a received payload
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Words<'a>(&'a [u8]);

impl<'a> Words<'a> {
    /// Wrap a byte slice, trailing bytes that do not form a whole word are ignored
    pub fn new(bytes: &'a [u8]) -> Self {
        Self(&bytes[..bytes.len() / 4 * 4])
    }

    pub fn len(&self) -> usize {
        self.0.len() / 4
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<u32> {
        let b = self.0.get(index * 4..index * 4 + 4)?;
        Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + 'a {
        self.0
            .chunks_exact(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.0
    }
}

#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum Error<SerialError: Debug, FlashError: Debug> {
    #[error("serial error: {0:?}")]
    Serial(SerialError),
    #[error("flash error: {0:?}")]
    Flash(FlashError),
    #[error("receive buffer of {capacity} bytes is smaller than the {required} bytes required")]
    Capacity { capacity: usize, required: usize },
    #[error("invalid geometry: {0}")]
    Geometry(&'static str),
    #[error("reply of {0} bytes exceeds the frame length field")]
    FrameLength(usize),
}

impl<SerialError: Debug, FlashError: Debug> From<SendError<SerialError>> for Error<SerialError, FlashError> {
    fn from(e: SendError<SerialError>) -> Self {
        match e {
            SendError::Serial(e) => Error::Serial(e),
            SendError::TooLong(len) => Error::FrameLength(len),
        }
    }
}

#[cfg(feature = "structopt")]
fn parse_u32(s: &str) -> Result<u32, core::num::ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

#[cfg(feature = "structopt")]
fn parse_u16(s: &str) -> Result<u16, core::num::ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

#[cfg(feature = "structopt")]
fn parse_platform(s: &str) -> Result<Platform, &'static str> {
    let mut p = Platform::new();
    p.push_str(s).map_err(|_| "platform string too long")?;
    Ok(p)
}

/// Platform identifier string
pub type Platform = heapless::String<20>;

/// Flash address boundaries, normally provided by the linker script
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Layout {
    /// First address of the bootloader
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "0x400", parse(try_from_str = parse_u32)))]
    pub boot_base: u32,

    /// First address after the bootloader
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "0x1000", parse(try_from_str = parse_u32)))]
    pub boot_end: u32,

    /// First address of the application region
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "0x1000", parse(try_from_str = parse_u32)))]
    pub app_base: u32,

    /// First address after the application region
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "0x15800", parse(try_from_str = parse_u32)))]
    pub app_end: u32,

    /// Interrupt vector table base, rows below this are never written
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "0x4", parse(try_from_str = parse_u32)))]
    pub ivt_base: u32,

    /// Application entry address used by the start application command
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "0x1000", parse(try_from_str = parse_u32)))]
    pub app_entry: u32,
}

impl Layout {
    /// Whether `address` lies in `[boot_base, boot_end)`
    pub fn is_boot(&self, address: u32) -> bool {
        self.boot_base <= address && address < self.boot_end
    }

    /// Whether the half-open span `[start, end)` touches the boot region
    pub fn overlaps_boot(&self, start: u32, end: u32) -> bool {
        start < self.boot_end && self.boot_base < end
    }

    /// `GOTO boot_base` instruction pair, kept at address 0
    pub fn reset_vector(&self) -> [u32; 2] {
        [protocol::GOTO | self.boot_base, 0x000000]
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.boot_base > self.boot_end {
            return Err("boot region ends before it starts");
        }
        if self.app_base > self.app_end {
            return Err("application region ends before it starts");
        }
        Ok(())
    }
}

/// Build-time constants of the target part
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct DeviceInfo {
    /// Platform identifier reported to the host
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "PIC24FJ64GB004", parse(try_from_str = parse_platform)))]
    pub platform: Platform,

    /// Flash row length in words
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "64", parse(try_from_str = parse_u16)))]
    pub row_len: u16,

    /// Flash page length in words
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "512", parse(try_from_str = parse_u16)))]
    pub page_len: u16,

    /// Total program memory length
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "0x15800", parse(try_from_str = parse_u32)))]
    pub prog_len: u32,

    /// Words per bulk write transaction, a multiple of the row length
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "128", parse(try_from_str = parse_u16)))]
    pub max_prog_size: u16,

    /// Program address units per word
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "2", parse(try_from_str = parse_u32)))]
    pub address_stride: u32,
}

impl DeviceInfo {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.row_len == 0 || self.max_prog_size == 0 || self.address_stride == 0 {
            return Err("row length, max program size and address stride must be non-zero");
        }
        if self.page_len == 0 {
            return Err("page length must be non-zero");
        }
        if self.max_prog_size % self.row_len != 0 {
            return Err("max program size must be a multiple of the row length");
        }
        // a bulk write at address 0 carries the reset vector pair
        if self.max_prog_size < 2 {
            return Err("max program size must hold at least two words");
        }
        Ok(())
    }

    /// Address span covered by `words` program words
    pub fn span(&self, words: u16) -> u32 {
        u32::from(words).wrapping_mul(self.address_stride)
    }
}
