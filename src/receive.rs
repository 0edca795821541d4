//! Frame reception.
//!
//! Raw bytes are fed one at a time into a [`Receiver`], which strips the
//! byte-stuffing into a fixed capacity buffer and checks the trailing
//! checksum once the end marker arrives.

use heapless::Vec;

use crate::checksum::fletcher16;
use crate::protocol::{END_OF_FRAME, ESC, ESC_XOR, START_OF_FRAME};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    /// Have not yet received a start byte
    WaitForStart,
    /// Next byte is read as-is
    ReadVerbatim,
    /// Have received an escape byte, next byte must be decoded
    ReadEscaped,
    /// End marker received. A verified payload stays borrowable until the
    /// next [`Receiver::feed`] clears it; callers that hold on to the
    /// receiver between frames should [`Receiver::reset`] after dispatch.
    EndOfMessage,
}

/// Result of feeding one byte to the [`Receiver`]
#[derive(Debug, PartialEq, Eq)]
pub enum Feed<'a> {
    /// Frame incomplete, or no frame started
    Pending,
    /// Checksum verified, payload is `[len_lo, len_hi, command, args...]`.
    /// The receiver is left in [`State::EndOfMessage`] until reset or fed again.
    Frame(&'a mut [u8]),
    /// Checksum mismatch, frame discarded
    Corrupt { computed: u16, received: u16 },
    /// End marker arrived before the two checksum bytes, frame discarded
    Runt,
    /// Buffer filled before the end marker, frame discarded
    Overflow,
}

/// Streaming frame parser with a capacity of `N` bytes.
///
/// A frame (including its checksum) must be strictly smaller than `N` bytes,
/// anything reaching the capacity is dropped.
#[derive(Debug)]
pub struct Receiver<const N: usize> {
    buf: Vec<u8, N>,
    state: State,
}

impl<const N: usize> Default for Receiver<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Receiver<N> {
    pub const fn new() -> Self {
        Self {
            buf: Vec::new(),
            state: State::WaitForStart,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Number of unescaped bytes currently buffered
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Wipe the buffer and wait for the next start marker
    pub fn reset(&mut self) {
        self.buf.iter_mut().for_each(|b| *b = 0);
        self.buf.clear();
        self.state = State::WaitForStart;
    }

    /// Consume a single raw byte
    pub fn feed(&mut self, byte: u8) -> Feed<'_> {
        if self.state == State::EndOfMessage {
            self.reset();
        }

        match self.state {
            State::WaitForStart => {
                if byte == START_OF_FRAME {
                    self.state = State::ReadVerbatim;
                }
                Feed::Pending
            }
            State::ReadVerbatim if byte == ESC => {
                self.state = State::ReadEscaped;
                Feed::Pending
            }
            State::ReadVerbatim if byte == END_OF_FRAME => self.end_of_message(),
            State::ReadVerbatim => self.append(byte),
            State::ReadEscaped => {
                self.state = State::ReadVerbatim;
                self.append(byte ^ ESC_XOR)
            }
            State::EndOfMessage => unreachable!(),
        }
    }

    fn append(&mut self, byte: u8) -> Feed<'_> {
        if self.buf.push(byte).is_err() || self.buf.is_full() {
            trace!("receive buffer full at {} bytes, dropping frame", self.buf.len());
            self.reset();
            return Feed::Overflow;
        }
        Feed::Pending
    }

    fn end_of_message(&mut self) -> Feed<'_> {
        self.state = State::EndOfMessage;

        let len = self.buf.len();
        if len < 2 {
            self.reset();
            return Feed::Runt;
        }

        let received = u16::from_le_bytes([self.buf[len - 2], self.buf[len - 1]]);
        let computed = fletcher16(&self.buf[..len - 2]);

        if computed != received {
            self.reset();
            return Feed::Corrupt { computed, received };
        }

        Feed::Frame(&mut self.buf[..len - 2])
    }
}
