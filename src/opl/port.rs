//! Raw I/O port access to real OPL3 hardware

use super::RegisterSink;
use crate::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::time::{Duration, Instant};

/// Minimum wait after writing the register-select port
const SELECT_DELAY: Duration = Duration::from_nanos(3_300);

/// Minimum wait after writing the data port
const DATA_DELAY: Duration = Duration::from_nanos(23_000);

const DEV_PORT: &str = "/dev/port";

/// Register sink writing to I/O ports through `/dev/port`
///
/// Each write selects the register on `port` and writes the value to
/// `port + 1`, waiting out the chip's settle times in between. Writes after
/// the first failure are dropped; the failure is kept for `take_error`.
pub struct PortSink {
    device: File,
    error: Option<std::io::Error>,
}

impl PortSink {
    /// Open `/dev/port` (needs root or CAP_SYS_RAWIO)
    pub fn open() -> Result<Self> {
        Self::open_path(Path::new(DEV_PORT))
    }

    pub fn open_path(path: &Path) -> Result<Self> {
        let device = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| Error::Device(format!("{}: {}", path.display(), e)))?;
        log::info!("Opened {} for OPL register access", path.display());
        Ok(Self {
            device,
            error: None,
        })
    }

    /// First I/O error seen since the last call
    pub fn take_error(&mut self) -> Option<Error> {
        self.error
            .take()
            .map(|e| Error::Device(format!("port write failed: {e}")))
    }

    fn out(&mut self, port: u16, value: u8) -> std::io::Result<()> {
        self.device.seek(SeekFrom::Start(port as u64))?;
        self.device.write_all(&[value])
    }
}

/// Busy-wait for at least `delay`, measured against the clock
fn settle(delay: Duration) {
    let start = Instant::now();
    while start.elapsed() < delay {
        std::hint::spin_loop();
    }
}

impl RegisterSink for PortSink {
    fn write(&mut self, port: u16, register: u8, value: u8) {
        if self.error.is_some() {
            return;
        }
        let result = self
            .out(port, register)
            .map(|()| settle(SELECT_DELAY))
            .and_then(|()| self.out(port + 1, value))
            .map(|()| settle(DATA_DELAY));
        if let Err(e) = result {
            log::warn!("OPL write to port {port:#x} failed: {e}");
            self.error = Some(e);
        }
    }
}
