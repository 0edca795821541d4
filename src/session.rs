//! Bootloader session.
//!
//! Decides once whether to stay in the bootloader, then feeds received bytes
//! through the [`Receiver`] and [`Dispatcher`] until the [`Supervisor`] asks
//! to abort or the host starts the application.

use core::fmt::Debug;
use core::marker::PhantomData;

use crate::dispatch::{Dispatcher, Outcome};
use crate::protocol::frame_capacity;
use crate::receive::{Feed, Receiver};
use crate::{DeviceInfo, Error, Flash, Layout, SerialPort, Supervisor};

#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Step {
    /// Keep waiting for frames
    Continue,
    /// Leave the bootloader, jumping to this address
    Exit(u32),
}

/// Bootloader over serial port `P`, flash `F` and supervisor `S`, with a
/// receive buffer of `N` bytes (see [`frame_capacity`]).
pub struct Bootloader<P, F, S, E, const N: usize> {
    port: P,
    flash: F,
    supervisor: S,
    layout: Layout,
    info: DeviceInfo,
    receiver: Receiver<N>,
    _err: PhantomData<E>,
}

impl<P, F, S, E, const N: usize> Bootloader<P, F, S, E, N>
where
    P: SerialPort<E>,
    F: Flash,
    S: Supervisor,
    E: Debug,
{
    /// Create a new bootloader instance
    pub fn new(port: P, flash: F, supervisor: S, layout: Layout, info: DeviceInfo) -> Result<Self, Error<E, F::Error>> {
        layout.validate().map_err(Error::Geometry)?;
        info.validate().map_err(Error::Geometry)?;

        let required = frame_capacity(usize::from(info.max_prog_size));
        if N < required {
            return Err(Error::Capacity { capacity: N, required });
        }

        Ok(Self {
            port,
            flash,
            supervisor,
            layout,
            info,
            receiver: Receiver::new(),
            _err: PhantomData,
        })
    }

    /// Execute the bootloader, never returns
    pub fn run(mut self) -> ! {
        if !self.supervisor.should_enter_bootloader() {
            info!("Starting application at {:#x}", self.layout.app_base);
            self.supervisor.jump_to_application(self.layout.app_base);
        }

        info!("Entering bootloader");

        loop {
            match self.poll() {
                Ok(Step::Continue) => (),
                Ok(Step::Exit(address)) => {
                    info!("Starting application at {:#x}", address);
                    self.supervisor.jump_to_application(address);
                }
                Err(e) => warn!("Bootloader error: {:?}", e),
            }
        }
    }

    /// One iteration of the wait loop: service the watchdog, check for an
    /// abort, then drain available bytes
    pub fn poll(&mut self) -> Result<Step, Error<E, F::Error>> {
        self.supervisor.service_watchdog();

        if self.supervisor.should_abort_boot() {
            debug!("Boot aborted");
            return Ok(Step::Exit(self.layout.app_base));
        }

        self.receive()
    }

    /// Read bytes until none are available or a frame completes
    pub fn receive(&mut self) -> Result<Step, Error<E, F::Error>> {
        loop {
            let byte = match self.port.read() {
                Ok(b) => b,
                Err(nb::Error::WouldBlock) => return Ok(Step::Continue),
                Err(nb::Error::Other(e)) => {
                    debug!("Receive error: {:?}, dropping partial frame", e);
                    self.receiver.reset();
                    return Ok(Step::Continue);
                }
            };

            match self.receiver.feed(byte) {
                Feed::Pending => continue,
                Feed::Frame(payload) => {
                    let outcome = Dispatcher::new(&mut self.port, &mut self.flash, &self.layout, &self.info)
                        .dispatch(payload);

                    self.receiver.reset();

                    // we got a valid message, reset the stall timer
                    self.supervisor.reset_stall_timer();

                    return match outcome? {
                        Outcome::StartApplication(address) => Ok(Step::Exit(address)),
                        Outcome::Ignored(reason) => {
                            debug!("Command ignored: {:?}", reason);
                            Ok(Step::Continue)
                        }
                        o => {
                            trace!("Command complete: {:?}", o);
                            Ok(Step::Continue)
                        }
                    };
                }
                Feed::Corrupt { computed, received } => {
                    debug!("Checksum mismatch (computed {:#06x}, received {:#06x})", computed, received);
                }
                Feed::Runt => debug!("Frame too short"),
                Feed::Overflow => debug!("Receive buffer overflow"),
            }

            return Ok(Step::Continue);
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn port(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn flash(&mut self) -> &mut F {
        &mut self.flash
    }

    pub fn supervisor(&mut self) -> &mut S {
        &mut self.supervisor
    }

    /// Release the underlying hardware
    pub fn release(self) -> (P, F, S) {
        (self.port, self.flash, self.supervisor)
    }
}
