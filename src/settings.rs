//! Settings for the serial link used to reach the bootloader.
//!
//! Use the [builder](https://doc.rust-lang.org/1.0.0/style/ownership/builders.html)
//! pattern to set the configurable values.

pub use serialport::{DataBits, FlowControl, Parity, StopBits};

// =============================================================================
// Public Interface
// =============================================================================

/// Default baud rate of the bootloader UART.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Groups all settings of an upload: where the image comes from and how the
/// serial port is to be configured.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Settings {
    /// Path to the binary image to upload.
    pub image: String,
    /// The port name, usually the device path.
    pub path: String,
    /// The baud rate in symbols-per-second.
    pub baud_rate: u32,
    /// Number of bits used to represent a character sent on the line.
    pub data_bits: DataBits,
    /// The type of signalling to use for controlling data transfer.
    pub flow_control: FlowControl,
    /// The type of parity to use for error checking.
    pub parity: Parity,
    /// Number of bits to use to signal the end of a character.
    pub stop_bits: StopBits,

    /// Restrict creation of `Settings` instances unless through the
    /// `SettingsBuilder`.
    #[doc(hidden)]
    _private_use_builder: (),
}

/// The builder for the `Settings` values.
///
/// The image and device paths are mandatory, everything else defaults to
/// `115200 8N1` without flow control.
///
/// **Example**
///
/// ```
/// use rvboot::SettingsBuilder;
///
/// let settings = SettingsBuilder::new("firmware.bin", "/dev/ttyUSB0")
///     .baud_rate(921_600)
///     .finalize();
/// assert_eq!(settings.baud_rate, 921_600);
/// ```
pub struct SettingsBuilder {
    settings: Settings,
}
impl SettingsBuilder {
    /// Start building the settings for uploading `image` over the serial
    /// port at `path`.
    pub fn new<'a, 'b>(
        image: impl Into<std::borrow::Cow<'a, str>>,
        path: impl Into<std::borrow::Cow<'b, str>>,
    ) -> Self {
        SettingsBuilder {
            settings: Settings {
                image: image.into().into_owned(),
                path: path.into().into_owned(),
                baud_rate: DEFAULT_BAUD_RATE,
                data_bits: DataBits::Eight,
                flow_control: FlowControl::None,
                parity: Parity::None,
                stop_bits: StopBits::One,
                _private_use_builder: (),
            },
        }
    }

    /// Set the baud rate in symbols-per-second
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.settings.baud_rate = baud_rate;
        self
    }

    /// Set the number of bits used to represent a character sent on the line
    pub fn data_bits(mut self, data_bits: DataBits) -> Self {
        self.settings.data_bits = data_bits;
        self
    }

    /// Set the type of signalling to use for controlling data transfer
    pub fn flow_control(mut self, flow_control: FlowControl) -> Self {
        self.settings.flow_control = flow_control;
        self
    }

    /// Set the type of parity to use for error checking
    pub fn parity(mut self, parity: Parity) -> Self {
        self.settings.parity = parity;
        self
    }

    /// Set the number of bits to use to signal the end of a character
    pub fn stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.settings.stop_bits = stop_bits;
        self
    }

    pub fn finalize(self) -> Settings {
        self.settings
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn all_default() {
    let settings = SettingsBuilder::new("prog.bin", "/dev/ttyUSB0").finalize();
    assert_eq!(
        settings,
        Settings {
            image: "prog.bin".into(),
            path: "/dev/ttyUSB0".into(),
            baud_rate: 115_200,
            data_bits: DataBits::Eight,
            flow_control: FlowControl::None,
            parity: Parity::None,
            stop_bits: StopBits::One,
            _private_use_builder: (),
        }
    )
}

#[test]
fn owned_paths() {
    let image = String::from("build/app.bin");
    let settings = SettingsBuilder::new(image, String::from("COM4")).finalize();
    assert_eq!(settings.image, "build/app.bin");
    assert_eq!(settings.path, "COM4");
}

#[test]
fn baud_rate() {
    let baud_rate = 96_000;
    let settings = SettingsBuilder::new("a.bin", "/dev/ttyS0")
        .baud_rate(baud_rate)
        .finalize();
    assert_eq!(settings.baud_rate, baud_rate);
}

#[test]
fn data_bits() {
    let data_bits = DataBits::Seven;
    let settings = SettingsBuilder::new("a.bin", "/dev/ttyS0")
        .data_bits(data_bits)
        .finalize();
    assert_eq!(settings.data_bits, data_bits);
}

#[test]
fn flow_control() {
    let flow_control = FlowControl::Hardware;
    let settings = SettingsBuilder::new("a.bin", "/dev/ttyS0")
        .flow_control(flow_control)
        .finalize();
    assert_eq!(settings.flow_control, flow_control);
}

#[test]
fn stop_bits() {
    let stop_bits = StopBits::Two;
    let settings = SettingsBuilder::new("a.bin", "/dev/ttyS0")
        .stop_bits(stop_bits)
        .finalize();
    assert_eq!(settings.stop_bits, stop_bits);
}

#[test]
fn parity() {
    let parity = Parity::Even;
    let settings = SettingsBuilder::new("a.bin", "/dev/ttyS0")
        .parity(parity)
        .finalize();
    assert_eq!(settings.parity, parity);
}
