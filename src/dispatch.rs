//! Command dispatch.
//!
//! A verified payload is `[len_lo, len_hi, command, args...]`. Informational
//! and read commands reply with a frame carrying the same command byte,
//! erase and write commands never reply, and anything refused by the
//! address checks is silently dropped.

use core::fmt::Debug;

use embedded_hal::serial::Write;

use crate::protocol::{Command, ARGS_OFFSET, DATA_OFFSET, VERSION_STRING};
use crate::transmit::{self, FrameWriter};
use crate::{DeviceInfo, Error, Flash, Layout, Words};

/// What a dispatched command did
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// A reply frame was sent
    Replied,
    /// Flash was modified, nothing sent
    Applied,
    /// Command refused, nothing modified or sent
    Ignored(Rejected),
    /// Control should be handed to the application at this address
    StartApplication(u32),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Rejected {
    /// Payload too short to carry a command byte
    Malformed(usize),
    UnknownCommand(u8),
    /// Payload shorter than the command's arguments
    Truncated { command: Command, len: usize },
    /// Target touches the bootloader region
    BootRegion(u32),
    /// Row write below the interrupt vector table base
    VectorTable(u32),
}

pub struct Dispatcher<'a, W, F> {
    port: &'a mut W,
    flash: &'a mut F,
    layout: &'a Layout,
    info: &'a DeviceInfo,
}

impl<'a, W, F, E> Dispatcher<'a, W, F>
where
    W: Write<u8, Error = E>,
    F: Flash,
    E: Debug,
{
    pub fn new(port: &'a mut W, flash: &'a mut F, layout: &'a Layout, info: &'a DeviceInfo) -> Self {
        Self {
            port,
            flash,
            layout,
            info,
        }
    }

    /// Execute the command contained in a verified payload.
    ///
    /// The payload is mutable so that bulk writes to address 0 can patch the
    /// reset vector in place.
    pub fn dispatch(&mut self, payload: &mut [u8]) -> Result<Outcome, Error<E, F::Error>> {
        let code = match payload.get(2) {
            Some(c) => *c,
            None => return Ok(Outcome::Ignored(Rejected::Malformed(payload.len()))),
        };

        let command = match Command::try_from(code) {
            Ok(c) => c,
            Err(c) => return Ok(Outcome::Ignored(Rejected::UnknownCommand(c))),
        };

        trace!("dispatching {:?} ({} byte payload)", command, payload.len());

        let i = self.info;
        let l = self.layout;

        match command {
            Command::ReadPlatform => self.reply_str(command, &i.platform),
            Command::ReadVersion => self.reply_str(command, VERSION_STRING),
            Command::ReadRowLen => self.reply_u16(command, i.row_len),
            Command::ReadPageLen => self.reply_u16(command, i.page_len),
            Command::ReadProgLen => {
                transmit::send_u32s(self.port, command.into(), &[i.prog_len])?;
                Ok(Outcome::Replied)
            }
            Command::ReadMaxProgSize => self.reply_u16(command, i.max_prog_size),
            Command::ReadAppStartAddr => self.reply_u16(command, l.app_entry as u16),
            Command::ReadBootStartAddr => self.reply_u16(command, l.boot_base as u16),

            Command::ErasePage => {
                let address = match arg_address(payload) {
                    Some(a) => a,
                    None => return Ok(truncated(command, payload)),
                };
                self.erase_page(address)
            }

            Command::ReadAddr => {
                let address = match arg_address(payload) {
                    Some(a) => a,
                    None => return Ok(truncated(command, payload)),
                };
                let word = self.flash.read_word(address).map_err(Error::Flash)?;
                transmit::send_u32s(self.port, command.into(), &[address, word])?;
                Ok(Outcome::Replied)
            }

            Command::ReadMax => {
                let address = match arg_address(payload) {
                    Some(a) => a,
                    None => return Ok(truncated(command, payload)),
                };
                self.read_max(command, address)
            }

            Command::WriteRow => {
                let (address, words) = match arg_words(payload, i.row_len) {
                    Some(v) => v,
                    None => return Ok(truncated(command, payload)),
                };
                self.write_row(address, words)
            }

            Command::WriteMaxProgSize => {
                let address = match arg_address(payload) {
                    Some(a) => a,
                    None => return Ok(truncated(command, payload)),
                };
                let end = DATA_OFFSET + usize::from(i.max_prog_size) * 4;
                if payload.len() < end {
                    return Ok(truncated(command, payload));
                }
                self.write_max(address, &mut payload[DATA_OFFSET..end])
            }

            Command::StartApp => Ok(Outcome::StartApplication(l.app_entry)),
        }
    }

    fn reply_u16(&mut self, command: Command, value: u16) -> Result<Outcome, Error<E, F::Error>> {
        transmit::send_u16s(self.port, command.into(), &[value])?;
        Ok(Outcome::Replied)
    }

    fn reply_str(&mut self, command: Command, s: &str) -> Result<Outcome, Error<E, F::Error>> {
        transmit::send_str(self.port, command.into(), s)?;
        Ok(Outcome::Replied)
    }

    fn erase_page(&mut self, address: u32) -> Result<Outcome, Error<E, F::Error>> {
        let page_span = self.info.span(self.info.page_len).max(1);
        let start = address - address % page_span;

        // do not allow any part of the bootloader to be erased
        if self.layout.overlaps_boot(start, start.saturating_add(page_span)) {
            return Ok(Outcome::Ignored(Rejected::BootRegion(address)));
        }

        self.flash.erase_page(address).map_err(Error::Flash)?;

        // keep the reset vector pointing at the bootloader
        if address == 0 {
            self.flash
                .write_double_word(0, self.layout.reset_vector())
                .map_err(Error::Flash)?;
        }

        Ok(Outcome::Applied)
    }

    /// Stream `max_prog_size` words straight from flash into the reply
    fn read_max(&mut self, command: Command, address: u32) -> Result<Outcome, Error<E, F::Error>> {
        let count = self.info.max_prog_size;
        let stride = self.info.address_stride;

        // address followed by the words
        let len = transmit::frame_len::<E>((usize::from(count) + 1) * 4)?;

        let mut f = FrameWriter::start(&mut *self.port).map_err(Error::Serial)?;
        f.header(command.into(), len).map_err(Error::Serial)?;
        f.write_u32(address).map_err(Error::Serial)?;

        for n in 0..u32::from(count) {
            let word = self
                .flash
                .read_word(address.wrapping_add(n.wrapping_mul(stride)))
                .map_err(Error::Flash)?;
            f.write_u32(word).map_err(Error::Serial)?;
        }

        f.finish().map_err(Error::Serial)?;

        Ok(Outcome::Replied)
    }

    fn write_row(&mut self, address: u32, words: Words<'_>) -> Result<Outcome, Error<E, F::Error>> {
        let end = address.saturating_add(self.info.span(self.info.row_len));

        // do not allow the bootloader to be overwritten
        if self.layout.overlaps_boot(address, end) {
            return Ok(Outcome::Ignored(Rejected::BootRegion(address)));
        }

        // do not allow the reset vector to be changed by the application
        if address < self.layout.ivt_base {
            return Ok(Outcome::Ignored(Rejected::VectorTable(address)));
        }

        self.flash.write_row(address, words).map_err(Error::Flash)?;

        Ok(Outcome::Applied)
    }

    fn write_max(&mut self, address: u32, data: &mut [u8]) -> Result<Outcome, Error<E, F::Error>> {
        let end = address.saturating_add(self.info.span(self.info.max_prog_size));

        if self.layout.overlaps_boot(address, end) {
            return Ok(Outcome::Ignored(Rejected::BootRegion(address)));
        }

        // the zero address always jumps to the bootloader
        if address == 0 {
            data.chunks_exact_mut(4)
                .zip(self.layout.reset_vector())
                .for_each(|(b, w)| b.copy_from_slice(&w.to_le_bytes()));
        }

        let row_bytes = usize::from(self.info.row_len) * 4;
        let row_span = self.info.span(self.info.row_len);

        for (n, row) in data.chunks_exact(row_bytes).enumerate() {
            let row_address = address.wrapping_add(row_span.wrapping_mul(n as u32));
            self.flash
                .write_row(row_address, Words::new(row))
                .map_err(Error::Flash)?;
        }

        Ok(Outcome::Applied)
    }
}

fn truncated(command: Command, payload: &[u8]) -> Outcome {
    Outcome::Ignored(Rejected::Truncated {
        command,
        len: payload.len(),
    })
}

/// Little-endian 32-bit address following the command byte
fn arg_address(payload: &[u8]) -> Option<u32> {
    let b = payload.get(ARGS_OFFSET..ARGS_OFFSET + 4)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Address followed by `count` words
fn arg_words(payload: &[u8], count: u16) -> Option<(u32, Words<'_>)> {
    let address = arg_address(payload)?;
    let data = payload.get(DATA_OFFSET..DATA_OFFSET + usize::from(count) * 4)?;
    Some((address, Words::new(data)))
}
