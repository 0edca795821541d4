#[macro_use]
extern crate log;

extern crate structopt;
use structopt::StructOpt;

extern crate simplelog;
use simplelog::{Config, LevelFilter, SimpleLogger};

use std::io::ErrorKind as IoErrorKind;
use std::path::PathBuf;
use std::time::Duration;

use linux_embedded_hal::Serial;

use uart_bootloader::linux::HostSupervisor;
use uart_bootloader::sim::MemFlash;
use uart_bootloader::{frame_capacity, Bootloader, DeviceInfo, Layout};

/// Receive buffer size, enough for up to 1024 words per write transaction
const RX_BUF_LEN: usize = frame_capacity(1024);

type SimBootloader = Bootloader<Serial, MemFlash, HostSupervisor, IoErrorKind, RX_BUF_LEN>;

/// Serve the bootloader protocol on a serial port against a flash image file
#[derive(Clone, Debug, StructOpt)]
pub struct Args {
    /// Serial port to listen on
    #[structopt(long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Serial port baud rate
    #[structopt(long, default_value = "115200")]
    baud: usize,

    /// Raw little-endian flash image, created if missing
    #[structopt(long, default_value = "flash.bin")]
    image: PathBuf,

    /// Leave the bootloader after this long without a valid frame (0 waits forever)
    #[structopt(long, default_value = "0")]
    timeout_ms: u64,

    #[structopt(flatten)]
    layout: Layout,

    #[structopt(flatten)]
    info: DeviceInfo,

    /// Log level for console output
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,
}

fn setup(o: Args) -> Result<SimBootloader, anyhow::Error> {
    let flash = MemFlash::open(&o.image, &o.info)?;

    let image = flash.image();
    info!(
        "Flash image {} ({})",
        o.image.display(),
        bytefmt::format(image.len() as u64)
    );
    debug!("Reset vector: {}", hex::encode(&image[..image.len().min(8)]));

    let timeout = match o.timeout_ms {
        0 => None,
        t => Some(Duration::from_millis(t)),
    };

    Bootloader::linux(&o.port, o.baud, flash, timeout, o.layout, o.info)
}

fn main() {
    // Parse out arguments
    let o = Args::from_args();

    // Configure logger
    let _ = SimpleLogger::init(o.log_level, Config::default());

    info!("Opening serial port {}", o.port);

    let b = match setup(o) {
        Ok(b) => b,
        Err(e) => {
            error!("Error starting bootloader: {:?}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Platform {}, boot region {:#x}..{:#x}",
        b.info().platform,
        b.layout().boot_base,
        b.layout().boot_end
    );

    b.run()
}
