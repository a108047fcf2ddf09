//! Helper functions to deal with the image file and the serial port.

mod image;
mod ports;

pub(crate) use image::{chunks, load_image, pad_image};
pub use ports::{Channel, Connector, SerialChannel, SerialConnector};
