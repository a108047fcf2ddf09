//! Serial port device manipulation.
//!
//! The upload protocol does not talk to [`serialport`] directly but to a
//! [`Channel`], opened by a [`Connector`]. This keeps the protocol usable
//! with anything that can push bytes and read them back one at a time.

use std::{
    io::{self, Read, Write},
    time::Duration,
};

use log::{debug, info};
use serialport::{ClearBuffer, SerialPort};

use crate::{Settings, UploadError};

//==============================================================================
// Public Interface
//==============================================================================

/// A byte link to the bootloader, exclusively owned by one upload and closed
/// when dropped.
pub trait Channel: Write {
    /// Drop anything received and not read yet.
    fn discard_input(&mut self) -> io::Result<()>;

    /// Blocks until one byte is received or `wait` has elapsed, whichever
    /// comes first. Returns `None` when nothing arrived in time.
    fn read_byte(&mut self, wait: Duration) -> io::Result<Option<u8>>;
}

/// Opens the [`Channel`] described by the settings of an upload.
pub trait Connector {
    fn connect(&mut self, settings: &Settings) -> Result<Box<dyn Channel>, UploadError>;
}

/// A [`Channel`] over a local serial port.
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

/// Opens a [`SerialChannel`], once. A port that cannot be opened is reported
/// right away.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialConnector;

impl SerialChannel {
    pub fn open(settings: &Settings) -> Result<Self, serialport::Error> {
        debug!("Opening {}", settings.path);
        let port = serialport::new(&settings.path, settings.baud_rate)
            .data_bits(settings.data_bits)
            .stop_bits(settings.stop_bits)
            .parity(settings.parity)
            .flow_control(settings.flow_control)
            .open()?;

        info!(
            "Connected to {} at {} baud",
            port.name().unwrap_or_else(|| settings.path.clone()),
            port.baud_rate()?
        );
        debug!("data_bits    : {:#?}", port.data_bits()?);
        debug!("stop_bits    : {:#?}", port.stop_bits()?);
        debug!("parity       : {:#?}", port.parity()?);
        debug!("flow control : {:#?}", port.flow_control()?);

        // Some drivers silently fall back to another rate when the requested
        // one is not supported.
        let actual = port.baud_rate()?;
        if actual != settings.baud_rate {
            return Err(serialport::Error::new(
                serialport::ErrorKind::InvalidInput,
                format!(
                    "baud rate {} is not supported by the port (got {})",
                    settings.baud_rate, actual
                ),
            ));
        }

        Ok(SerialChannel { port })
    }
}

impl Connector for SerialConnector {
    fn connect(&mut self, settings: &Settings) -> Result<Box<dyn Channel>, UploadError> {
        match SerialChannel::open(settings) {
            Ok(channel) => Ok(Box::new(channel)),
            Err(source) => {
                info!("Failed to open {}: {}", settings.path, source);
                Err(UploadError::ChannelOpen {
                    path: settings.path.clone(),
                    baud_rate: settings.baud_rate,
                    source,
                })
            }
        }
    }
}

impl Channel for SerialChannel {
    fn discard_input(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn read_byte(&mut self, wait: Duration) -> io::Result<Option<u8>> {
        self.port.set_timeout(wait)?;
        let mut byte = [0u8; 1];
        let result = self.port.read(&mut byte);
        single_byte(result, byte[0])
    }
}

/// Maps the outcome of a one byte read. Timeouts and interrupted reads yield
/// `None` so that the caller simply tries again until its own deadline.
fn single_byte(result: io::Result<usize>, byte: u8) -> io::Result<Option<u8>> {
    match result {
        Ok(1) => Ok(Some(byte)),
        Ok(_) => Ok(None),
        Err(ref e)
            if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::Interrupted =>
        {
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

impl Write for SerialChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl Drop for SerialChannel {
    fn drop(&mut self) {
        debug!(
            "Closing {}",
            self.port.name().unwrap_or_else(|| "serial port".into())
        );
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn unknown_device_is_an_open_error() {
    let settings = crate::SettingsBuilder::new("prog.bin", "/dev/rvboot-no-such-tty")
        .baud_rate(57_600)
        .finalize();
    match SerialConnector.connect(&settings) {
        Err(UploadError::ChannelOpen {
            path, baud_rate, ..
        }) => {
            assert_eq!(path, "/dev/rvboot-no-such-tty");
            assert_eq!(baud_rate, 57_600);
        }
        Err(other) => panic!("unexpected error {:?}", other),
        Ok(_) => panic!("opened a port that does not exist"),
    }
}

#[test]
fn read_outcomes() {
    assert_eq!(single_byte(Ok(1), b'.').unwrap(), Some(b'.'));
    assert_eq!(single_byte(Ok(0), b'.').unwrap(), None);

    let timed_out = io::Error::new(io::ErrorKind::TimedOut, "timed out");
    assert_eq!(single_byte(Err(timed_out), 0).unwrap(), None);

    let interrupted = io::Error::new(io::ErrorKind::Interrupted, "signal");
    assert_eq!(single_byte(Err(interrupted), 0).unwrap(), None);

    let gone = io::Error::new(io::ErrorKind::BrokenPipe, "unplugged");
    assert_eq!(
        single_byte(Err(gone), 0).unwrap_err().kind(),
        io::ErrorKind::BrokenPipe
    );
}
