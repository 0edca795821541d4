use std::io::ErrorKind as IoErrorKind;
use std::path::Path;
use std::process;
use std::time::{Duration, Instant};

use linux_embedded_hal::Serial;
use serial_core::{
    BaudRate, CharSize, Error as SerialError, FlowControl, Parity, SerialDevice as _,
    SerialPortSettings as _, StopBits,
};

use crate::{Bootloader, DeviceInfo, Flash, Layout, Supervisor};

/// Open and configure a serial port, 8N1 without flow control.
///
/// Reads time out after a millisecond so that polling the port never stalls
/// the bootloader loop.
pub fn open_serial<P: AsRef<Path>>(port: P, baud: usize) -> Result<Serial, SerialError> {
    // Open port
    let mut port = Serial::open(port.as_ref())?;

    // Apply settings
    let mut settings = port.0.read_settings()?;

    settings.set_char_size(CharSize::Bits8);
    settings.set_stop_bits(StopBits::Stop1);
    settings.set_baud_rate(BaudRate::from_speed(baud))?;
    settings.set_flow_control(FlowControl::FlowNone);
    settings.set_parity(Parity::ParityNone);

    port.0.write_settings(&settings)?;
    port.0.set_timeout(Duration::from_millis(1))?;

    Ok(port)
}

/// Host-side supervisor: always enters the bootloader and leaves after a
/// period without valid frames. Jumping to the application ends the process.
#[derive(Debug)]
pub struct HostSupervisor {
    timeout: Option<Duration>,
    last_frame: Instant,
}

impl HostSupervisor {
    /// A `timeout` of `None` waits forever
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            last_frame: Instant::now(),
        }
    }
}

impl Supervisor for HostSupervisor {
    fn should_enter_bootloader(&mut self) -> bool {
        self.last_frame = Instant::now();
        true
    }

    fn should_abort_boot(&mut self) -> bool {
        match self.timeout {
            Some(t) => self.last_frame.elapsed() > t,
            None => false,
        }
    }

    fn service_watchdog(&mut self) {}

    fn reset_stall_timer(&mut self) {
        self.last_frame = Instant::now();
    }

    fn jump_to_application(&mut self, address: u32) -> ! {
        info!("Jump to application at {:#x}, exiting", address);
        process::exit(0)
    }
}

impl<F, const N: usize> Bootloader<Serial, F, HostSupervisor, IoErrorKind, N>
where
    F: Flash,
{
    /// Create a new bootloader instance on a linux serial port
    pub fn linux<P: AsRef<Path>>(
        port: P,
        baud: usize,
        flash: F,
        timeout: Option<Duration>,
        layout: Layout,
        info: DeviceInfo,
    ) -> Result<Self, anyhow::Error> {
        let port = open_serial(port, baud)?;

        Self::new(port, flash, HostSupervisor::new(timeout), layout, info)
            .map_err(|e| anyhow::anyhow!("{}", e))
    }
}
