//! Events for the upload protocol state machine.
//!
//! This module is private and restricted to the
//! [`upload_protocol`](crate::upload_protocol) scope. The public interface of
//! the state machine is provided by [`upload_protocol`](crate::upload_protocol).
//!
//! Refer to the [`state_machine`](super::state_machine) module for an overview
//! of states, events and transitions.

use std::fmt;

use log::debug;

use crate::{utils::Channel, UploadError};

use super::UploadReport;

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// The live part of an upload, moved from state to state along with the
/// events. Owning the channel here means dropping the transfer closes the
/// port.
pub(crate) struct Transfer {
    pub channel: Box<dyn Channel>,
    /// The image as it goes on the wire, padding included.
    pub payload: Vec<u8>,
    /// Number of bytes acknowledged by the device.
    pub cursor: usize,
    /// Index of the chunk being pushed.
    pub chunk: usize,
    pub report: UploadReport,
}
impl Transfer {
    /// Releases the channel and returns what was achieved.
    pub fn close(self) -> UploadReport {
        debug!("closing channel after {} bytes", self.cursor);
        let Transfer {
            channel, report, ..
        } = self;
        drop(channel);
        report
    }
}
impl fmt::Debug for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transfer")
            .field("len", &self.payload.len())
            .field("cursor", &self.cursor)
            .field("chunk", &self.chunk)
            .finish()
    }
}

// ChannelOpenedEvent ==========================================================

/// Event fired from the `Idle` state once the image is in memory and the
/// serial port is open. Triggers a transition to `ChannelOpen`.
#[derive(Debug)]
pub(crate) struct ChannelOpenedEvent {
    pub transfer: Transfer,
}

// TriggerSentEvent ============================================================

/// Event fired after the trigger byte was written to a clean channel.
#[derive(Debug)]
pub(crate) struct TriggerSentEvent {
    pub transfer: Transfer,
}

// SendChunkEvent ==============================================================

/// Event fired to push the next chunk, or to finish if there is none left.
///
/// This event can happen under one of the following circumstances:
///
///  1. While at the `TriggerSent` state, to push the first chunk.
///  2. While at the `AwaitingAck` state, when the acknowledgment byte for the
///     previous chunk was received.
#[derive(Debug)]
pub(crate) struct SendChunkEvent {
    pub transfer: Transfer,
}

// ChunkSentEvent ==============================================================

/// Event fired once a chunk has been written and flushed. `end` is the offset
/// reached in the payload if the device acknowledges it.
#[derive(Debug)]
pub(crate) struct ChunkSentEvent {
    pub transfer: Transfer,
    pub end: usize,
}

// DoneEvent ===================================================================

/// Every chunk was acknowledged. The channel is already closed.
#[derive(Debug)]
pub(crate) struct DoneEvent {
    pub report: UploadReport,
}

// AbortEvent ==================================================================

/// The upload failed. This can be fired from any state; when a channel was
/// open, it is closed before the event is fired.
#[derive(Debug)]
pub(crate) struct AbortEvent {
    pub error: UploadError,
}

// Events enum ==================================================================

/// Events that can be triggered within the upload protocol state machine.
///
/// Each possible value holds an `event`, which in turn holds the data the
/// target state starts from.
#[derive(Debug)]
pub(crate) enum Event {
    ChannelOpened(ChannelOpenedEvent),
    TriggerSent(TriggerSentEvent),
    SendChunk(SendChunkEvent),
    ChunkSent(ChunkSentEvent),
    Done(DoneEvent),
    Abort(AbortEvent),
}
impl Event {
    /// Closes the channel of `transfer`, if still open, and aborts with
    /// `error`.
    pub fn abort(transfer: Option<Transfer>, error: UploadError) -> Self {
        if let Some(transfer) = transfer {
            transfer.close();
        }
        Event::Abort(AbortEvent { error })
    }
}
