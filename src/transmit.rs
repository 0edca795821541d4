//! Frame transmission.
//!
//! ```txt
//! | START | len_lo len_hi | command | payload... | sum1 sum2 | END |
//!         |<------------- escaped, checksummed ->|<-escaped->|
//! ```

use core::fmt::Debug;

use embedded_hal::serial::Write;

use crate::checksum::Fletcher16;
use crate::protocol::{needs_escape, END_OF_FRAME, ESC, ESC_XOR, START_OF_FRAME};

/// Writes a single frame to a serial port, escaping marker bytes and
/// accumulating the checksum over the unescaped values.
///
/// Every byte is written with a blocking write.
pub struct FrameWriter<'a, W> {
    port: &'a mut W,
    checksum: Fletcher16,
}

impl<'a, W> FrameWriter<'a, W>
where
    W: Write<u8>,
{
    /// Send the start marker and reset the checksum accumulator
    pub fn start(port: &'a mut W) -> Result<Self, W::Error> {
        block!(port.write(START_OF_FRAME))?;

        Ok(Self {
            port,
            checksum: Fletcher16::new(),
        })
    }

    /// Send the frame header, `len` being the payload length (excluding the command)
    pub fn header(&mut self, command: u8, len: u16) -> Result<(), W::Error> {
        let [lo, hi] = len.to_le_bytes();
        self.write_u8(lo)?;
        self.write_u8(hi)?;
        self.write_u8(command)
    }

    /// Send one logical byte
    pub fn write_u8(&mut self, byte: u8) -> Result<(), W::Error> {
        if needs_escape(byte) {
            block!(self.port.write(ESC))?;
            block!(self.port.write(byte ^ ESC_XOR))?;
        } else {
            block!(self.port.write(byte))?;
        }

        self.checksum.accumulate(byte);

        Ok(())
    }

    pub fn write_all(&mut self, bytes: &[u8]) -> Result<(), W::Error> {
        bytes.iter().try_for_each(|b| self.write_u8(*b))
    }

    pub fn write_u16(&mut self, value: u16) -> Result<(), W::Error> {
        self.write_all(&value.to_le_bytes())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<(), W::Error> {
        self.write_all(&value.to_le_bytes())
    }

    /// Running checksum of everything written so far
    pub fn checksum(&self) -> u16 {
        self.checksum.value()
    }

    /// Append the checksum and the end marker
    pub fn finish(mut self) -> Result<(), W::Error> {
        let [sum1, sum2] = self.checksum.to_le_bytes();
        self.write_u8(sum1)?;
        self.write_u8(sum2)?;

        block!(self.port.write(END_OF_FRAME))?;
        block!(self.port.flush())
    }
}

/// Failure to send a complete frame
#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum SendError<E: Debug> {
    #[error("serial error: {0:?}")]
    Serial(E),
    /// Payload does not fit the 16-bit length field, nothing was sent
    #[error("payload of {0} bytes exceeds the frame length field")]
    TooLong(usize),
}

impl<E: Debug> From<E> for SendError<E> {
    fn from(e: E) -> Self {
        SendError::Serial(e)
    }
}

/// Length field for a payload of `len` bytes
pub fn frame_len<E: Debug>(len: usize) -> Result<u16, SendError<E>> {
    u16::try_from(len).map_err(|_| SendError::TooLong(len))
}

/// Send a complete frame with a byte payload
pub fn send_bytes<W>(port: &mut W, command: u8, data: &[u8]) -> Result<(), SendError<W::Error>>
where
    W: Write<u8>,
    W::Error: Debug,
{
    let len = frame_len(data.len())?;

    let mut f = FrameWriter::start(port)?;
    f.header(command, len)?;
    f.write_all(data)?;
    Ok(f.finish()?)
}

/// Send a frame of little-endian 16-bit words
pub fn send_u16s<W>(port: &mut W, command: u8, words: &[u16]) -> Result<(), SendError<W::Error>>
where
    W: Write<u8>,
    W::Error: Debug,
{
    let len = frame_len(words.len().saturating_mul(2))?;

    let mut f = FrameWriter::start(port)?;
    f.header(command, len)?;
    words.iter().try_for_each(|w| f.write_u16(*w))?;
    Ok(f.finish()?)
}

/// Send a frame of little-endian 32-bit words
pub fn send_u32s<W>(port: &mut W, command: u8, words: &[u32]) -> Result<(), SendError<W::Error>>
where
    W: Write<u8>,
    W::Error: Debug,
{
    let len = frame_len(words.len().saturating_mul(4))?;

    let mut f = FrameWriter::start(port)?;
    f.header(command, len)?;
    words.iter().try_for_each(|w| f.write_u32(*w))?;
    Ok(f.finish()?)
}

/// Send a string, including a trailing NUL terminator
pub fn send_str<W>(port: &mut W, command: u8, s: &str) -> Result<(), SendError<W::Error>>
where
    W: Write<u8>,
    W::Error: Debug,
{
    let len = frame_len(s.len().saturating_add(1))?;

    let mut f = FrameWriter::start(port)?;
    f.header(command, len)?;
    f.write_all(s.as_bytes())?;
    f.write_u8(0)?;
    Ok(f.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::fletcher16;
    use crate::mock::MockSerial;

    #[test]
    fn plain_frame_layout() {
        let mut port = MockSerial::new();
        send_bytes(&mut port, 0x02, &[0x40, 0x00]).unwrap();

        let logical = [0x02, 0x00, 0x02, 0x40, 0x00];
        let [lo, hi] = fletcher16(&logical).to_le_bytes();

        let mut expected = vec![START_OF_FRAME];
        expected.extend_from_slice(&logical);
        expected.extend_from_slice(&[lo, hi, END_OF_FRAME]);

        assert_eq!(port.tx, expected);
        assert_eq!(port.flushes, 1);
    }

    #[test]
    fn markers_are_escaped() {
        let mut port = MockSerial::new();
        send_bytes(&mut port, 0x20, &[START_OF_FRAME, END_OF_FRAME, ESC]).unwrap();

        let body = &port.tx[1..port.tx.len() - 1];
        assert_eq!(port.tx[0], START_OF_FRAME);
        assert_eq!(*port.tx.last().unwrap(), END_OF_FRAME);
        assert!(!body.contains(&START_OF_FRAME));
        assert!(!body.contains(&END_OF_FRAME));

        let data = &body[3..9];
        assert_eq!(
            data,
            &[ESC, START_OF_FRAME ^ ESC_XOR, ESC, END_OF_FRAME ^ ESC_XOR, ESC, ESC ^ ESC_XOR]
        );
    }

    #[test]
    fn checksum_covers_logical_bytes() {
        let mut port = MockSerial::new();
        let mut f = FrameWriter::start(&mut port).unwrap();
        f.header(0x31, 3).unwrap();
        f.write_all(&[ESC, 0x01, END_OF_FRAME]).unwrap();
        assert_eq!(f.checksum(), fletcher16(&[0x03, 0x00, 0x31, ESC, 0x01, END_OF_FRAME]));
    }

    #[test]
    fn each_frame_starts_a_fresh_checksum() {
        let mut a = MockSerial::new();
        send_bytes(&mut a, 0x00, &[1, 2, 3]).unwrap();
        send_bytes(&mut a, 0x00, &[1, 2, 3]).unwrap();

        let half = a.tx.len() / 2;
        assert_eq!(a.tx[..half], a.tx[half..]);
    }

    #[test]
    fn strings_are_nul_terminated() {
        let mut port = MockSerial::new();
        send_str(&mut port, 0x01, "0.1").unwrap();
        assert_eq!(&port.tx[1..8], &[0x04, 0x00, 0x01, b'0', b'.', b'1', 0x00]);
    }

    #[test]
    fn oversized_payload_is_refused() {
        let mut port = MockSerial::new();
        let data = vec![0u8; 0x1_0000];

        assert_eq!(send_bytes(&mut port, 0x31, &data), Err(SendError::TooLong(0x1_0000)));
        assert_eq!(send_u32s(&mut port, 0x21, &[0u32; 0x4000]), Err(SendError::TooLong(0x1_0000)));
        assert!(port.tx.is_empty());

        send_bytes(&mut port, 0x31, &data[..0xffff]).unwrap();
        assert_eq!(&port.tx[1..3], &[0xff, 0xff]);
    }

    #[test]
    fn word_helpers_are_little_endian() {
        let mut port = MockSerial::new();
        send_u16s(&mut port, 0x02, &[0x1234]).unwrap();
        assert_eq!(&port.tx[1..6], &[0x02, 0x00, 0x02, 0x34, 0x12]);

        let mut port = MockSerial::new();
        send_u32s(&mut port, 0x04, &[0x0001_5800]).unwrap();
        assert_eq!(&port.tx[1..8], &[0x04, 0x00, 0x04, 0x00, 0x58, 0x01, 0x00]);
    }
}
