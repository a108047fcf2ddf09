//! States for the upload protocol state machine.
//!
//! This module is private and restricted to the
//! [`upload_protocol`](crate::upload_protocol) scope. The public interface of
//! the upload protocol state machine is provided by
//! [`upload_protocol`](crate::upload_protocol).
//!
//! Refer to the [`state_machine`](super::state_machine) module for an overview
//! of states, events and transitions.

use std::{
    io::{self, Write},
    time::Instant,
};

use hexplay::HexViewBuilder;
use log::{debug, info, log_enabled, trace, Level::Debug};

use super::events::*;
use super::{Context, UploadReport};

use crate::utils::{chunks, load_image, pad_image, Channel};
use crate::UploadError;

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Trait adding the ability for a state to be `run` after a transition into it.
pub(crate) trait Runnable {
    /// A state implements this method so it can be `run` after the state
    /// machine transitions into it.
    ///
    /// During this call, the state can do any work that needs to be done and
    /// when finished, requests a transition to a `new state` by returning the
    /// appropriate `event`. The `event` is consumed to create the `new state`
    /// using the corresponding [`From`] trait implementation (provided such
    /// implementation exists).
    fn run(&mut self, ctx: &mut Context) -> Event;
}

// Idle State ==================================================================

/// The initial state of the upload protocol state machine.
///
/// Reads and pads the image, then opens the channel:
///
///  * **[`ChannelOpenedEvent`] => [`ChannelOpenState`]** when the port is
///    open,
///  * **[`AbortEvent`] => [`AbortedState`]** when the image cannot be read
///    or the port cannot be opened.
#[derive(Debug)]
pub(crate) struct IdleState {}
impl Runnable for IdleState {
    fn run(&mut self, ctx: &mut Context) -> Event {
        info!("=> Idle");

        let mut payload = match load_image(&ctx.settings.image) {
            Ok(data) => data,
            Err(e) => return Event::abort(None, e),
        };
        let source_size = payload.len();
        ctx.observer.image_loaded(source_size);

        let padding = pad_image(&mut payload, ctx.profile.target_size());
        if padding > 0 {
            ctx.observer.image_padded(padding, payload.len());
        }

        let channel = match ctx.connector.connect(&ctx.settings) {
            Ok(channel) => channel,
            Err(e) => return Event::abort(None, e),
        };
        ctx.observer
            .channel_opened(&ctx.settings.path, ctx.settings.baud_rate);

        Event::ChannelOpened(ChannelOpenedEvent {
            transfer: Transfer {
                channel,
                payload,
                cursor: 0,
                chunk: 0,
                report: UploadReport {
                    source_size,
                    padding,
                    bytes_sent: 0,
                    chunks: 0,
                },
            },
        })
    }
}

// ChannelOpen State ===========================================================

/// The port is open. Anything left in its input buffer belongs to a previous
/// session and is dropped before the trigger byte is written, so that a stale
/// acknowledgment cannot be taken for the first one of this session.
///
///  * **[`TriggerSentEvent`] => [`TriggerSentState`]** once the trigger is
///    on the wire,
///  * **[`AbortEvent`] => [`AbortedState`]** on a port error.
#[derive(Debug)]
pub(crate) struct ChannelOpenState {
    pub transfer: Option<Transfer>,
}
impl Runnable for ChannelOpenState {
    fn run(&mut self, ctx: &mut Context) -> Event {
        info!("=> ChannelOpen");

        if let Some(mut transfer) = self.transfer.take() {
            let trigger = ctx.profile.trigger_byte();
            return match send_trigger(&mut *transfer.channel, trigger) {
                Ok(()) => {
                    debug!("trigger {:#04x} sent", trigger);
                    ctx.observer.trigger_sent();
                    Event::TriggerSent(TriggerSentEvent { transfer })
                }
                Err(e) => Event::abort(Some(transfer), e.into()),
            };
        }

        // We should never reach here!
        unreachable!()
    }
}

fn send_trigger(channel: &mut dyn Channel, trigger: u8) -> io::Result<()> {
    channel.discard_input()?;
    channel.write_all(&[trigger])?;
    channel.flush()
}

// TriggerSent State ===========================================================

/// The bootloader is in receive mode; nothing is expected back for the
/// trigger itself.
///
///  * **[`SendChunkEvent`] => [`SendingChunkState`]** always.
#[derive(Debug)]
pub(crate) struct TriggerSentState {
    pub transfer: Option<Transfer>,
}
impl Runnable for TriggerSentState {
    fn run(&mut self, ctx: &mut Context) -> Event {
        info!("=> TriggerSent");

        if let Some(transfer) = self.transfer.take() {
            let total = transfer.payload.len();
            let count = chunks(&transfer.payload, ctx.profile.chunk_size()).len();
            ctx.observer.upload_started(total, count);
            return Event::SendChunk(SendChunkEvent { transfer });
        }

        // We should never reach here!
        unreachable!()
    }
}

// SendingChunk State ==========================================================

/// Pushes the chunk starting at the transfer cursor and flushes it so that it
/// is physically on the line before waiting for the acknowledgment.
///
///  * **[`ChunkSentEvent`] => [`AwaitingAckState`]** once the chunk is
///    flushed,
///  * **[`DoneEvent`] => [`DoneState`]** when the last chunk was already
///    acknowledged,
///  * **[`AbortEvent`] => [`AbortedState`]** on a port error.
#[derive(Debug)]
pub(crate) struct SendingChunkState {
    pub transfer: Option<Transfer>,
}
impl Runnable for SendingChunkState {
    fn run(&mut self, ctx: &mut Context) -> Event {
        trace!("=> SendingChunk");

        if let Some(mut transfer) = self.transfer.take() {
            let start = transfer.cursor;
            if start >= transfer.payload.len() {
                return Event::Done(DoneEvent {
                    report: transfer.close(),
                });
            }

            let end = std::cmp::min(start + ctx.profile.chunk_size(), transfer.payload.len());
            let result = transfer
                .channel
                .write_all(&transfer.payload[start..end])
                .and_then(|_| transfer.channel.flush());

            return match result {
                Ok(()) => {
                    debug!(
                        "chunk {} written ({} bytes at {:#06x})",
                        transfer.chunk,
                        end - start,
                        start
                    );
                    transfer.report.bytes_sent = end;
                    Event::ChunkSent(ChunkSentEvent { transfer, end })
                }
                Err(e) => Event::abort(Some(transfer), e.into()),
            };
        }

        // We should never reach here!
        unreachable!()
    }
}

// AwaitingAck State ===========================================================

/// Waits for the device to acknowledge the chunk just sent. The channel is
/// read in blocking attempts of at most the poll interval; any byte that is
/// not the acknowledgment byte is dropped and the wait goes on, measured from
/// the moment the chunk was flushed.
///
///  * **[`SendChunkEvent`] => [`SendingChunkState`]** on acknowledgment,
///  * **[`AbortEvent`] => [`AbortedState`]** when the timeout expires, or on
///    a port error. The failed chunk is never sent again.
#[derive(Debug)]
pub(crate) struct AwaitingAckState {
    pub transfer: Option<Transfer>,
    /// Payload offset reached once this chunk is acknowledged.
    pub end: usize,
    pub since: Instant,
}
impl AwaitingAckState {
    fn wait_for_ack(&self, transfer: &mut Transfer, ctx: &Context) -> io::Result<bool> {
        let timeout = ctx.profile.ack_timeout();
        let ack = ctx.profile.ack_byte();
        let mut stray: Vec<u8> = Vec::new();

        let acknowledged = loop {
            let elapsed = self.since.elapsed();
            if elapsed >= timeout {
                break false;
            }
            let wait = std::cmp::min(ctx.profile.poll_interval(), timeout - elapsed);
            match transfer.channel.read_byte(wait)? {
                Some(byte) if byte == ack => break true,
                Some(byte) => {
                    trace!("discarding {:#04x}", byte);
                    stray.push(byte);
                }
                None => {}
            }
        };

        // Dump what the device sent besides the acknowledgment, for debugging
        if !stray.is_empty() && log_enabled!(Debug) {
            let view = HexViewBuilder::new(&stray)
                .address_offset(0)
                .row_width(16)
                .finish();
            debug!(
                "{} stray bytes for chunk {}:\n{}",
                stray.len(),
                transfer.chunk,
                view
            );
        }

        Ok(acknowledged)
    }
}
impl Runnable for AwaitingAckState {
    fn run(&mut self, ctx: &mut Context) -> Event {
        trace!("=> AwaitingAck");

        if let Some(mut transfer) = self.transfer.take() {
            return match self.wait_for_ack(&mut transfer, ctx) {
                Ok(true) => {
                    trace!(
                        "chunk {} acknowledged after {:?}",
                        transfer.chunk,
                        self.since.elapsed()
                    );
                    transfer.cursor = self.end;
                    transfer.report.chunks += 1;
                    ctx.observer
                        .chunk_acknowledged(transfer.chunk, transfer.cursor);
                    transfer.chunk += 1;
                    Event::SendChunk(SendChunkEvent { transfer })
                }
                Ok(false) => {
                    info!(
                        "no acknowledgment for chunk {} after {:?}",
                        transfer.chunk,
                        self.since.elapsed()
                    );
                    let error = UploadError::ChunkTimeout {
                        offset: self.end,
                        chunk: transfer.chunk,
                    };
                    Event::abort(Some(transfer), error)
                }
                Err(e) => Event::abort(Some(transfer), e.into()),
            };
        }

        // We should never reach here!
        unreachable!()
    }
}

// Done State ==================================================================

/// Reached when every chunk has been acknowledged. The channel is closed.
#[derive(Debug)]
pub(crate) struct DoneState {
    pub report: UploadReport,
}

// Aborted State ===============================================================

/// Reached when the upload failed. The channel, if it was ever opened, is
/// closed.
#[derive(Debug)]
pub(crate) struct AbortedState {
    pub error: UploadError,
}
