//! Protocol profile of the device bootloader.
//!
//! The bootloader expects a fixed-size memory image pushed in fixed-size
//! chunks, each one acknowledged with a single byte. These values depend on
//! the device build and are grouped here so the upload protocol never uses
//! literals directly.

use std::time::Duration;

// =============================================================================
// Public Interface
// =============================================================================

/// Immutable description of how a device bootloader receives an image.
///
/// The default profile matches the 16 KiB program memory bootloader:
///
/// ```
/// use std::time::Duration;
/// use rvboot::DeviceProfile;
///
/// let profile = DeviceProfile::default();
/// assert_eq!(profile.chunk_size(), 1024);
/// assert_eq!(profile.target_size(), 16 * 1024);
/// assert_eq!(profile.ack_timeout(), Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct DeviceProfile {
    chunk_size: usize,
    target_size: usize,
    ack_timeout: Duration,
    poll_interval: Duration,
    ack_byte: u8,
    trigger_byte: u8,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        DeviceProfile {
            chunk_size: 1024,
            target_size: 16 * 1024,
            ack_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
            ack_byte: b'.',
            trigger_byte: b'R',
        }
    }
}

impl DeviceProfile {
    /// Number of bytes pushed before waiting for an acknowledgment.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Size of the device program memory. Shorter images are zero padded up
    /// to this size.
    pub fn target_size(&self) -> usize {
        self.target_size
    }

    /// How long to wait for the acknowledgment of a chunk before giving up
    /// on the whole transfer.
    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    /// Upper bound of a single blocking read while waiting for an
    /// acknowledgment.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Byte sent back by the device after consuming a chunk.
    pub fn ack_byte(&self) -> u8 {
        self.ack_byte
    }

    /// Byte sent once to put the bootloader in receive mode.
    pub fn trigger_byte(&self) -> u8 {
        self.trigger_byte
    }

    /// A zero chunk size would never make progress, so it is clamped to 1.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_target_size(mut self, target_size: usize) -> Self {
        self.target_size = target_size;
        self
    }

    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }

    /// A zero interval is clamped to 1ms.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_ack_byte(mut self, ack_byte: u8) -> Self {
        self.ack_byte = ack_byte;
        self
    }

    pub fn with_trigger_byte(mut self, trigger_byte: u8) -> Self {
        self.trigger_byte = trigger_byte;
        self
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn observed_deployment_defaults() {
    let profile = DeviceProfile::default();
    assert_eq!(profile.chunk_size(), 1024);
    assert_eq!(profile.target_size(), 16384);
    assert_eq!(profile.ack_timeout(), Duration::from_secs(5));
    assert_eq!(profile.poll_interval(), Duration::from_millis(10));
    assert_eq!(profile.ack_byte(), 0x2e);
    assert_eq!(profile.trigger_byte(), 0x52);
}

#[test]
fn overrides() {
    let profile = DeviceProfile::default()
        .with_chunk_size(256)
        .with_target_size(4096)
        .with_ack_timeout(Duration::from_millis(200))
        .with_poll_interval(Duration::from_millis(2))
        .with_ack_byte(b'#')
        .with_trigger_byte(b'U');
    assert_eq!(profile.chunk_size(), 256);
    assert_eq!(profile.target_size(), 4096);
    assert_eq!(profile.ack_timeout(), Duration::from_millis(200));
    assert_eq!(profile.poll_interval(), Duration::from_millis(2));
    assert_eq!(profile.ack_byte(), b'#');
    assert_eq!(profile.trigger_byte(), b'U');
}

#[test]
fn degenerate_values_are_clamped() {
    let profile = DeviceProfile::default()
        .with_chunk_size(0)
        .with_poll_interval(Duration::from_millis(0));
    assert_eq!(profile.chunk_size(), 1);
    assert_eq!(profile.poll_interval(), Duration::from_millis(1));
}
