use crate::{PitayaError, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};
use std::{
    io::{self, Read, Write},
    thread,
    time::Duration,
};

/// Serial timeouts of zero are rejected by some drivers, so every timed
/// read waits at least this long.
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Largest chunk pulled off the port in one read.
const READ_CHUNK: usize = 256;

/// The read-with-deadline primitive every link in the field station is
/// built on. Implementations must never block longer than the timeout
/// they are handed, so a wedged peer can only ever cost one bounded wait.
pub trait SerialChannel: Send {
    /// Write every byte and flush.
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Wait up to `timeout` for data and append whatever arrived to `buf`.
    /// Returns the number of bytes appended, zero when the timeout elapsed.
    fn read_available(&mut self, buf: &mut Vec<u8>, timeout: Duration) -> io::Result<usize>;

    /// Discard anything pending in either direction.
    fn clear(&mut self) -> io::Result<()>;
}

fn default_read_timeout_ms() -> u64 {
    1000
}

/// Port settings for one serial link. Both links in the station run 8N1.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyUSB0`.
    pub port: String,
    /// Line speed of the peer.
    pub baud_rate: u32,
    /// Default timeout applied to the port when it is opened.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Time to wait after opening before the peer is usable. Arduino
    /// style controllers reset when the port opens.
    #[serde(default)]
    pub settle_ms: u64,
}

impl SerialConfig {
    /// Create a new serial config with a one second read timeout and
    /// no settle time.
    ///
    /// * `port`: device path.
    /// * `baud_rate`: line speed.
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            read_timeout_ms: default_read_timeout_ms(),
            settle_ms: 0,
        }
    }

    /// Set the settle time waited after the port is opened.
    pub fn with_settle_ms(mut self, settle_ms: u64) -> Self {
        self.settle_ms = settle_ms;
        self
    }
}

/// A serial port opened through the `serialport` driver.
pub struct SerialLink {
    /// Underlying port handle.
    port: Box<dyn SerialPort>,
    /// Device path, kept for log messages.
    name: String,
}

impl SerialLink {
    /// Open the port described by the config and wait out its settle time.
    /// Failing to open a port is fatal for the station, so the error names
    /// the device.
    ///
    /// * `config`: port settings.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        info!("Opening serial port {} @ {}", config.port, config.baud_rate);
        let port = serialport::new(&config.port, config.baud_rate)
            .timeout(Duration::from_millis(config.read_timeout_ms))
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .open()
            .map_err(|source| PitayaError::SerialOpen {
                port: config.port.clone(),
                source,
            })?;

        if config.settle_ms > 0 {
            debug!("Waiting {}ms for {} to settle", config.settle_ms, config.port);
            thread::sleep(Duration::from_millis(config.settle_ms));
        }

        Ok(Self {
            port,
            name: config.port.clone(),
        })
    }

    /// Device path of the link.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl SerialChannel for SerialLink {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }

    fn read_available(&mut self, buf: &mut Vec<u8>, timeout: Duration) -> io::Result<usize> {
        self.port.set_timeout(timeout.max(MIN_READ_TIMEOUT))?;
        let mut chunk = [0u8; READ_CHUNK];
        match self.port.read(&mut chunk) {
            Ok(read) => {
                buf.extend_from_slice(&chunk[..read]);
                Ok(read)
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn clear(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::All)?;
        Ok(())
    }
}
