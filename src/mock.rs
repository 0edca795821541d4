//! In-memory serial port for tests.

use std::collections::VecDeque;

use embedded_hal::serial::{Read, Write};

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MockError;

/// Serial port backed by an input queue and an output log
#[derive(Debug, Default)]
pub struct MockSerial {
    pub rx: VecDeque<Result<u8, MockError>>,
    pub tx: Vec<u8>,
    pub flushes: usize,
}

impl MockSerial {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes to be received
    pub fn push(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes.iter().map(|b| Ok(*b)));
    }

    /// Queue a receive error
    pub fn push_error(&mut self) {
        self.rx.push_back(Err(MockError));
    }

    /// Take everything transmitted so far
    pub fn take_tx(&mut self) -> Vec<u8> {
        core::mem::take(&mut self.tx)
    }
}

impl Read<u8> for MockSerial {
    type Error = MockError;

    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        match self.rx.pop_front() {
            Some(Ok(b)) => Ok(b),
            Some(Err(e)) => Err(nb::Error::Other(e)),
            None => Err(nb::Error::WouldBlock),
        }
    }
}

impl Write<u8> for MockSerial {
    type Error = MockError;

    fn write(&mut self, word: u8) -> nb::Result<(), Self::Error> {
        self.tx.push(word);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        self.flushes += 1;
        Ok(())
    }
}

/// Small part used throughout the tests: 8 word rows, 32 word pages,
/// 16 words per bulk write and a bootloader at `[0x400, 0x800)`.
pub fn device_info() -> crate::DeviceInfo {
    let mut platform = crate::Platform::new();
    platform.push_str("TEST24FJ").unwrap();

    crate::DeviceInfo {
        platform,
        row_len: 8,
        page_len: 32,
        prog_len: 0x1000,
        max_prog_size: 16,
        address_stride: 2,
    }
}

pub fn layout() -> crate::Layout {
    crate::Layout {
        boot_base: 0x400,
        boot_end: 0x800,
        app_base: 0x800,
        app_end: 0x1000,
        ivt_base: 0x4,
        app_entry: 0x800,
    }
}
