//! Errors terminating an upload.

use std::io;

use thiserror::Error;

/// Every error is terminal for the upload it occurs in. There is no retry at
/// any level since the bootloader has no way to ask for a chunk again.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The image could not be read.
    #[error("cannot read image `{path}`: {source}")]
    SourceNotFound { path: String, source: io::Error },

    /// The serial port could not be opened or configured.
    #[error("cannot open serial port {path} at {baud_rate} baud: {source}")]
    ChannelOpen {
        path: String,
        baud_rate: u32,
        source: serialport::Error,
    },

    /// No acknowledgment was received for a chunk in time. `offset` is the
    /// number of bytes sent so far, including the unacknowledged chunk.
    #[error("timeout waiting for acknowledgment of chunk {chunk} after {offset} bytes")]
    ChunkTimeout { offset: usize, chunk: usize },

    /// Reading from or writing to the already open serial port failed.
    #[error("serial port i/o error: {0}")]
    Channel(#[from] io::Error),
}

impl UploadError {
    /// The byte offset reached when the transfer was aborted, if it was
    /// aborted while pushing chunks.
    pub fn offset(&self) -> Option<usize> {
        match self {
            UploadError::ChunkTimeout { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn timeout_message_names_offset() {
    let err = UploadError::ChunkTimeout {
        offset: 3072,
        chunk: 2,
    };
    assert_eq!(err.offset(), Some(3072));
    assert_eq!(
        err.to_string(),
        "timeout waiting for acknowledgment of chunk 2 after 3072 bytes"
    );
}

#[test]
fn io_errors_convert() {
    let err: UploadError = io::Error::new(io::ErrorKind::BrokenPipe, "gone").into();
    assert!(matches!(err, UploadError::Channel(_)));
    assert_eq!(err.offset(), None);
}
