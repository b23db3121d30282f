//! Byte-stream access to the satellite board
//!
//! The board shows up either as a FIFO device node or as a serial port. Both
//! are opened so that reads never block indefinitely: "no data right now" is
//! reported as [`DeviceError::EmptyBuffer`] and the reader thread polls again.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ControllerConfig, Transport};
use crate::protocol::FrameAssembler;

/// Bytes requested from the device per read call
const READ_CHUNK: usize = 64;

/// Device errors
#[derive(Debug, Error)]
pub enum DeviceError {
    /// No complete frame is available yet; not an error condition
    #[error("no data available")]
    EmptyBuffer,

    #[error("couldn't open FIFO device '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("couldn't open serial port '{path}': {source}")]
    Serial {
        path: String,
        #[source]
        source: serialport::Error,
    },

    #[error("device I/O error: {0}")]
    Io(#[from] io::Error),
}

impl DeviceError {
    pub fn is_empty_buffer(&self) -> bool {
        matches!(self, DeviceError::EmptyBuffer)
    }
}

/// Inbound side: yields one complete frame per call
pub trait FrameSource: Send {
    fn read_frame(&mut self) -> Result<Vec<u8>, DeviceError>;
}

/// Outbound side: accepts arbitrary byte sequences
pub trait ByteSink: Send {
    /// Write as much of `data` as the device takes right now and return how
    /// many bytes went out.
    ///
    /// A full device yields a short count, never an error. An error means
    /// nothing was written.
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, DeviceError>;
}

impl<W: Write + Send> ByteSink for W {
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, DeviceError> {
        let mut written = 0;
        while written < data.len() {
            match self.write(&data[written..]) {
                Ok(0) if written > 0 => break,
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                // Report progress now; a persistent error shows up on the next call
                Err(e) if is_transient(&e) || written > 0 => break,
                Err(e) => return Err(e.into()),
            }
        }

        match self.flush() {
            Err(e) if written == 0 && !is_transient(&e) => Err(e.into()),
            _ => Ok(written),
        }
    }
}

/// Frames a raw byte reader using the tag-implied frame lengths
pub struct FramedReader<R> {
    reader: R,
    assembler: FrameAssembler,
    buf: [u8; READ_CHUNK],
}

impl<R: Read> FramedReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            assembler: FrameAssembler::new(),
            buf: [0; READ_CHUNK],
        }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: Read + Send> FrameSource for FramedReader<R> {
    fn read_frame(&mut self) -> Result<Vec<u8>, DeviceError> {
        loop {
            if let Some(frame) = self.assembler.next_frame() {
                return Ok(frame);
            }

            match self.reader.read(&mut self.buf) {
                Ok(0) => return Err(DeviceError::EmptyBuffer),
                Ok(n) => self.assembler.push(&self.buf[..n]),
                Err(e) if is_transient(&e) => return Err(DeviceError::EmptyBuffer),
                Err(e) => return Err(DeviceError::Io(e)),
            }
        }
    }
}

/// Errors that only mean "nothing to read right now"
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// Both halves of an opened device
pub struct DeviceLink {
    pub source: Box<dyn FrameSource>,
    pub sink: Box<dyn ByteSink>,
}

/// Open the device described by the controller configuration
pub fn open(config: &ControllerConfig) -> Result<DeviceLink, DeviceError> {
    match config.transport {
        Transport::Fifo => open_fifo(&config.device, config.output_device.as_deref()),
        Transport::Serial => open_serial(
            &config.device,
            config.baud_rate,
            Duration::from_millis(config.read_timeout_ms),
        ),
    }
}

/// Open a FIFO device node, and optionally a separate node for output.
///
/// Without `output`, `path` must be a bidirectional character device: on a
/// plain named pipe our own LED frames would be read back as input.
///
/// Nodes are opened non-blocking so an idle board never pins the reader
/// thread inside `read`, and a board that stops draining turns into short
/// writes instead of a stuck flush.
pub fn open_fifo(path: impl AsRef<Path>, output: Option<&Path>) -> Result<DeviceLink, DeviceError> {
    let path = path.as_ref();
    let reader = open_nonblocking(path)?;
    let writer = match output {
        Some(output) => open_nonblocking(output)?,
        None => reader.try_clone().map_err(|source| DeviceError::Open {
            path: path.display().to_string(),
            source,
        })?,
    };

    match output {
        Some(output) => info!(
            "Opened FIFO devices {} (in) and {} (out)",
            path.display(),
            output.display()
        ),
        None => info!("Opened FIFO device {}", path.display()),
    }

    Ok(DeviceLink {
        source: Box::new(FramedReader::new(reader)),
        sink: Box::new(writer),
    })
}

/// Read-write so opening a named pipe never waits for the other end
fn open_nonblocking(path: &Path) -> Result<File, DeviceError> {
    let mut options = OpenOptions::new();
    options.read(true).write(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.custom_flags(libc::O_NONBLOCK);
    }

    options.open(path).map_err(|source| DeviceError::Open {
        path: path.display().to_string(),
        source,
    })
}

/// Open a serial port; reads time out after `timeout`
pub fn open_serial(
    path: impl AsRef<Path>,
    baud_rate: u32,
    timeout: Duration,
) -> Result<DeviceLink, DeviceError> {
    let path = path.as_ref().display().to_string();
    let serial_err = |source| DeviceError::Serial {
        path: path.clone(),
        source,
    };

    let port = serialport::new(path.as_str(), baud_rate)
        .timeout(timeout)
        .open()
        .map_err(serial_err)?;
    let writer = port.try_clone().map_err(serial_err)?;
    debug!("Serial read timeout {:?}", timeout);
    info!("Opened serial device {} @ {} baud", path, baud_rate);

    Ok(DeviceLink {
        source: Box::new(FramedReader::new(port)),
        sink: Box::new(writer),
    })
}
