//! Uploads a program image to the UART bootloader.

use std::{
    io::{self, Write},
    process,
};

use clap::{crate_authors, crate_version, value_t, App, AppSettings::*, Arg};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, trace, warn, LevelFilter};
use serialport::{DataBits, FlowControl, Parity, StopBits};
use simplelog::*;

use rvboot::{self as rb, DeviceProfile, ProgressObserver, UploadError, UploadReport};

// =============================================================================
// Console progress
// =============================================================================

/// Prints what goes on, with one dot per chunk acknowledged by the device or
/// a progress bar.
struct Console {
    trigger: u8,
    bar: bool,
    pb: Option<ProgressBar>,
    started: bool,
}
impl Console {
    fn new(trigger: u8, bar: bool) -> Self {
        Console {
            trigger,
            bar,
            pb: None,
            started: false,
        }
    }
}
impl ProgressObserver for Console {
    fn image_loaded(&mut self, size: usize) {
        println!("File size: {} bytes", size);
    }

    fn image_padded(&mut self, padding: usize, total: usize) {
        println!("Padded with {} zero bytes to {} bytes", padding, total);
    }

    fn channel_opened(&mut self, path: &str, baud_rate: u32) {
        println!("Opened {} at {} baud", style(path).cyan(), baud_rate);
    }

    fn trigger_sent(&mut self) {
        println!("Sent '{}' trigger", self.trigger as char);
    }

    fn upload_started(&mut self, total: usize, _chunks: usize) {
        println!("Uploading program...");
        if self.bar {
            let pb = ProgressBar::new(total as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("⏩ Progress [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                    .progress_chars("=>-"),
            );
            self.pb = Some(pb);
        } else {
            print!("Progress: ");
            let _ = io::stdout().flush();
        }
        self.started = true;
    }

    fn chunk_acknowledged(&mut self, _index: usize, offset: usize) {
        match &self.pb {
            Some(pb) => pb.set_position(offset as u64),
            None => {
                print!(".");
                let _ = io::stdout().flush();
            }
        }
    }

    fn upload_finished(&mut self, _report: &UploadReport) {
        match self.pb.take() {
            Some(pb) => pb.finish(),
            None => println!(),
        }
        println!(
            "{}",
            style("Upload complete! Program should now be executing...").green()
        );
    }

    fn upload_failed(&mut self, _error: &UploadError) {
        match self.pb.take() {
            Some(pb) => pb.abandon(),
            None if self.started => println!(),
            None => {}
        }
    }
}

// =============================================================================
// Main
// =============================================================================

fn main() {
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("🛑 received Ctrl+C!");
        process::exit(130);
    }) {
        eprintln!("cannot install the Ctrl+C handler: {}", e);
    }

    let matches = App::new("rvboot-upload")
        .version(format!("v{}", crate_version!()).as_str())
        .author(crate_authors!())
        .about("Upload a binary to the RISC-V bootloader via UART")
        .long_about(
            "\n\
            Pushes a program image to the bootloader waiting on the UART of \
            the device:\n\
               \t* the image is zero padded to the 16 KiB of program memory \n\
               \t* the 'R' trigger byte is sent \n\
               \t* the image is sent in 1 KiB chunks, waiting for a '.' from \
                   the bootloader after each chunk \n\
            \n\
            A chunk that is not acknowledged within 5 seconds aborts the \
            upload. Reset the device and try again.",
        )
        .max_term_width(80)
        .setting(ColoredHelp)
        .setting(NextLineHelp)
        .arg(
            Arg::with_name("FILE")
                .help("binary file to upload")
                .short("f")
                .long("file")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::with_name("DEVICE")
                .help("serial device (e.g., /dev/ttyUSB0)")
                .short("d")
                .long("device")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::with_name("BAUD_RATE")
                .help("serial port baud rate")
                .short("b")
                .long("baud")
                .takes_value(true)
                .default_value("115200"),
        )
        .arg(
            Arg::with_name("DATA_BITS")
                .help("number of bits per character")
                .long("data-bits")
                .takes_value(true)
                .possible_values(&["5", "6", "7", "8"])
                .default_value("8"),
        )
        .arg(
            Arg::with_name("STOP_BITS")
                .help("number of stop bits per byte")
                .long("stop-bits")
                .takes_value(true)
                .possible_values(&["1", "2"])
                .default_value("1"),
        )
        .arg(
            Arg::with_name("PARITY")
                .help("parity checking protocol")
                .long("parity")
                .takes_value(true)
                .possible_values(&["none", "odd", "even"])
                .default_value("none"),
        )
        .arg(
            Arg::with_name("FLOW_CONTROL")
                .help("flow control mode")
                .long("flow-control")
                .takes_value(true)
                .possible_values(&["none", "soft", "hard"])
                .default_value("none"),
        )
        .arg(
            Arg::with_name("BAR")
                .help("show a progress bar instead of dots")
                .long("bar"),
        )
        .arg(Arg::with_name("v").short("v").multiple(true).help(
            "Sets the logging level of verbosity, repeat several times for \
                higher verbosity",
        ))
        .get_matches();

    // Vary the output based on how many times the user used the "verbose" flag
    // (i.e. 'rvboot-upload -v -v -v' or 'rvboot-upload -vvv' vs 'rvboot-upload -v'
    let log_level = match matches.occurrences_of("v") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    if let Err(e) = TermLogger::init(
        log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    ) {
        eprintln!("cannot initialize logging: {}", e);
    }

    trace!("{:#?}", matches);

    // Arguments with default values or possible values are checked by clap,
    // anything else in the `match` arms below cannot happen.

    let baud_rate = value_t!(matches.value_of("BAUD_RATE"), u32).unwrap_or_else(|_| {
        println!(
            "{}: `{}` needs to be a numeric value",
            style("error").red(),
            style("baud").cyan()
        );
        println!(
            "   {} `{}` is not a valid value",
            style("-->").cyan(),
            style(matches.value_of("BAUD_RATE").unwrap_or_default()).on_red()
        );
        process::exit(1);
    });

    let data_bits = match matches.value_of("DATA_BITS") {
        Some("5") => DataBits::Five,
        Some("6") => DataBits::Six,
        Some("7") => DataBits::Seven,
        _ => DataBits::Eight,
    };

    let stop_bits = match matches.value_of("STOP_BITS") {
        Some("2") => StopBits::Two,
        _ => StopBits::One,
    };

    let parity = match matches.value_of("PARITY") {
        Some("even") => Parity::Even,
        Some("odd") => Parity::Odd,
        _ => Parity::None,
    };

    let flow_control = match matches.value_of("FLOW_CONTROL") {
        Some("soft") => FlowControl::Software,
        Some("hard") => FlowControl::Hardware,
        _ => FlowControl::None,
    };

    // Required arguments, clap exits before we get here without them
    let file = matches.value_of("FILE").unwrap_or_default();
    let device = matches.value_of("DEVICE").unwrap_or_default();

    let settings = rb::SettingsBuilder::new(file, device)
        .baud_rate(baud_rate)
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(parity)
        .flow_control(flow_control)
        .finalize();

    // Run the upload ==========================================================

    let profile = DeviceProfile::default();
    let trigger = profile.trigger_byte();
    let session = rb::UploadSession::new(settings).profile(profile);
    let session = session.observer(Console::new(trigger, matches.is_present("BAR")));

    let exit_code = match session.run() {
        Ok(report) => {
            debug!("{:?}", report);
            0
        }
        Err(e) => {
            report_error(&e);
            1
        }
    };
    debug!("exit code: {}", exit_code);
    process::exit(exit_code);
}

fn report_error(error: &UploadError) {
    match error {
        UploadError::SourceNotFound { path, source } => println!(
            "{}: File `{}` not found ({})",
            style("Error").red(),
            style(path).cyan(),
            source
        ),
        UploadError::ChannelOpen { source, .. } => println!(
            "{}: cannot open serial port: {}",
            style("Error").red(),
            source
        ),
        UploadError::ChunkTimeout { offset, .. } => println!(
            "{}: Timeout waiting for progress indicator after {} bytes",
            style("Error").red(),
            offset
        ),
        UploadError::Channel(e) => {
            warn!("serial port failure: {:?}", e);
            println!("{}: {}", style("Error").red(), error);
        }
    }
}
