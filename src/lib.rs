//! `rvboot` gets programs onto a small RISC-V soft core over its UART.
//!
//! Two workflows are supported:
//!
//! * **Memory initialization.** [`hex_image`] turns a raw binary into the
//!   one-word-per-line hex format read by the synthesis tools to initialize
//!   the program memory, so that the program is part of the bitstream.
//! * **Serial upload.** [`UploadSession`] pushes a raw binary to the UART
//!   bootloader already running on the device, without resynthesis.
//!
//! The bootloader protocol is deliberately minimal. The host sends a trigger
//! byte (`'R'`), then the image padded to the size of the program memory, in
//! chunks of 1 KiB. After each chunk the device answers with a single `'.'`
//! once it has stored it. A chunk that is not acknowledged within 5 seconds
//! aborts the upload; there is no way to resend a chunk. All of these values
//! are carried by a [`DeviceProfile`].
//!
//! The upload is implemented as a state machine in terms of **states** and
//! **transitions** between them with the following characteristics:
//!
//! * Can only be in one state at any time.
//! * Each state has its own associated data, and all states share the
//!   settings, the device profile and the progress observer.
//! * Transitions between states are triggered via typed **events** and follow
//!   defined semantics.
//! * Only explicitly defined transitions are permitted, which is checked at
//!   **compile-time**.
//! * Transitioning from one state to another consumes the original state and
//!   renders it unusable. The serial port moves along with the transitions
//!   and is closed when the upload ends, whatever the outcome.
//!
//! The implementation of state transitions leverages `rust`'s `From` and `Into`
//! pattern. The `From` trait allows for a type to define how to create itself
//! from another type, hence providing us an intuitive and simple mechanism for
//! converting `events` into new `states`.

mod error;
pub mod hex_image;
mod profile;
mod settings;
mod upload_protocol;
mod utils;

pub use error::UploadError;
pub use profile::DeviceProfile;
pub use settings::{Settings, SettingsBuilder, DEFAULT_BAUD_RATE};
pub use upload_protocol::{upload, ProgressObserver, Silent, UploadReport, UploadSession};
pub use utils::{Channel, Connector, SerialChannel, SerialConnector};
