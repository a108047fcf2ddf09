//! Upload protocol state machine.
//!
//! An upload is a single pass through the states below. The device never
//! asks for anything: the host triggers the bootloader, then pushes the image
//! chunk by chunk, waiting for one acknowledgment byte after each chunk. The
//! first chunk that is not acknowledged in time aborts the whole upload.
//!
//! ```text
//!                 START
//!                   |
//!                   v
//!              .---------.   no image / no port
//!              |  Idle   |---------------------------.
//!              '---------'                           |
//!                   | channel opened                 |
//!                   v                                |
//!           .-------------.     port error           |
//!           | ChannelOpen |------------------------->|
//!           '-------------'                          |
//!                   | trigger sent                   |
//!                   v                                |
//!           .-------------.                          |
//!           | TriggerSent |                          |
//!           '-------------'                          |
//!                   | send chunk                     |
//!                   v                                v
//!          .--------------.  port error       .-----------.
//!    .---->| SendingChunk |------------------>|  Aborted  |
//!    |     '--------------'                   '-----------'
//!    |        |         | all chunks acked          ^
//!   ack       | chunk   v                           |
//!    |        | sent  .------.                      |
//!    |        |       | Done |                      |
//!    |        v       '------'                      |
//!    |     .-------------.    timeout / port error  |
//!    '-----| AwaitingAck |--------------------------'
//!          '-------------'
//! ```
//!
//! The channel travels with the events from `ChannelOpen` onward and is
//! closed on the way into `Done` or `Aborted`.

use std::time::Instant;

use super::events::*;
use super::states::*;
use super::Context;

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Drives the state machine from `Idle` until it reaches `Done` or `Aborted`
/// and hands back the terminal state.
pub(crate) fn run_to_completion(ctx: Context) -> Terminal {
    let mut states = ProtocolStates::Idle(ProtocolSM::new(ctx));
    loop {
        states = match states.step() {
            ProtocolStates::Done(sm) => return Terminal::Done(sm),
            ProtocolStates::Aborted(sm) => return Terminal::Aborted(sm),
            other => other,
        };
    }
}

/// The two ways an upload ends.
pub(crate) enum Terminal {
    Done(ProtocolSM<DoneState>),
    Aborted(ProtocolSM<AbortedState>),
}

/// The raw state machine implementing the upload protocol.
///
/// Note that using a generic type that holds the current state serves two
/// purposes. It allows for also having shared data by all states that is not
/// really part of state data (the settings, the device profile, the observer).
/// Additionally, it's nicer when debugging to see the state machine and the
/// current state it is holding at any time.
#[derive(Debug)]
pub(crate) struct ProtocolSM<S> {
    pub ctx: Context,
    pub state: S,
}

// =============================================================================
// Private stuff
// =============================================================================

impl<S: Runnable> ProtocolSM<S> {
    fn run(&mut self) -> Event {
        self.state.run(&mut self.ctx)
    }
}

impl<S> ProtocolSM<S> {
    /// Moves the shared data to the state created from `event`.
    fn transition<T, E>(self, event: E) -> ProtocolSM<T>
    where
        T: From<E>,
    {
        ProtocolSM {
            ctx: self.ctx,
            state: event.into(),
        }
    }
}

/// The state machine starts in the `IdleState`.
impl ProtocolSM<IdleState> {
    fn new(ctx: Context) -> Self {
        ProtocolSM {
            ctx,
            state: IdleState {},
        }
    }
}

/// An enum wrapper around the states of the upload protocol state machine. It
/// provides a simpler and more intuitive model for manipulating states and
/// their transitions.
enum ProtocolStates {
    Idle(ProtocolSM<IdleState>),
    ChannelOpen(ProtocolSM<ChannelOpenState>),
    TriggerSent(ProtocolSM<TriggerSentState>),
    SendingChunk(ProtocolSM<SendingChunkState>),
    AwaitingAck(ProtocolSM<AwaitingAckState>),
    Done(ProtocolSM<DoneState>),
    Aborted(ProtocolSM<AbortedState>),
}
impl ProtocolStates {
    /// The unit of work in the state machine event loop. It runs the current
    /// state and decides the next transition from the event it returns. State
    /// transitions from events are implemented using the rust `From`/`Into`
    /// pattern, so a transition that is not explicitly defined does not
    /// compile.
    fn step(self) -> Self {
        match self {
            ProtocolStates::Idle(mut sm) => match sm.run() {
                Event::ChannelOpened(ev) => ProtocolStates::ChannelOpen(sm.transition(ev)),
                Event::Abort(ev) => ProtocolStates::Aborted(sm.transition(ev)),
                event => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
            },
            ProtocolStates::ChannelOpen(mut sm) => match sm.run() {
                Event::TriggerSent(ev) => ProtocolStates::TriggerSent(sm.transition(ev)),
                Event::Abort(ev) => ProtocolStates::Aborted(sm.transition(ev)),
                event => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
            },
            ProtocolStates::TriggerSent(mut sm) => match sm.run() {
                Event::SendChunk(ev) => ProtocolStates::SendingChunk(sm.transition(ev)),
                event => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
            },
            ProtocolStates::SendingChunk(mut sm) => match sm.run() {
                Event::ChunkSent(ev) => ProtocolStates::AwaitingAck(sm.transition(ev)),
                Event::Done(ev) => ProtocolStates::Done(sm.transition(ev)),
                Event::Abort(ev) => ProtocolStates::Aborted(sm.transition(ev)),
                event => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
            },
            ProtocolStates::AwaitingAck(mut sm) => match sm.run() {
                Event::SendChunk(ev) => ProtocolStates::SendingChunk(sm.transition(ev)),
                Event::Abort(ev) => ProtocolStates::Aborted(sm.transition(ev)),
                event => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
            },
            // Terminal states
            done @ ProtocolStates::Done(_) => done,
            aborted @ ProtocolStates::Aborted(_) => aborted,
        }
    }
}

// -----------------------------------------------------------------------------
// State from Event transitions
// -----------------------------------------------------------------------------

impl From<ChannelOpenedEvent> for ChannelOpenState {
    fn from(event: ChannelOpenedEvent) -> ChannelOpenState {
        ChannelOpenState {
            transfer: Some(event.transfer),
        }
    }
}

impl From<TriggerSentEvent> for TriggerSentState {
    fn from(event: TriggerSentEvent) -> TriggerSentState {
        TriggerSentState {
            transfer: Some(event.transfer),
        }
    }
}

impl From<SendChunkEvent> for SendingChunkState {
    fn from(event: SendChunkEvent) -> SendingChunkState {
        SendingChunkState {
            transfer: Some(event.transfer),
        }
    }
}

impl From<ChunkSentEvent> for AwaitingAckState {
    fn from(event: ChunkSentEvent) -> AwaitingAckState {
        // The acknowledgment timeout runs from the moment the chunk is out.
        AwaitingAckState {
            transfer: Some(event.transfer),
            end: event.end,
            since: Instant::now(),
        }
    }
}

impl From<DoneEvent> for DoneState {
    fn from(event: DoneEvent) -> DoneState {
        DoneState {
            report: event.report,
        }
    }
}

impl From<AbortEvent> for AbortedState {
    fn from(event: AbortEvent) -> AbortedState {
        AbortedState { error: event.error }
    }
}
