//! Converts a binary image to memory initialization hex words.

use std::{fs, io, process};

use clap::{crate_authors, crate_version, App, AppSettings::*, Arg};
use console::style;
use log::{debug, LevelFilter};
use simplelog::*;

use rvboot::hex_image;

fn main() {
    let matches = App::new("rvboot-makehex")
        .version(format!("v{}", crate_version!()).as_str())
        .author(crate_authors!())
        .about("Convert a binary image to 32-bit hex words for memory initialization")
        .long_about(
            "\n\
            Reads a raw binary image and prints it as one 32-bit little \
            endian word per line, 8 lowercase hex digits each, on the \
            standard output. The last word is zero padded when the image \
            size is not a multiple of 4.\n\
            \n\
            The output can be loaded with `$readmemh` to initialize the \
            program memory of the core.",
        )
        .max_term_width(80)
        .setting(ColoredHelp)
        .setting(NextLineHelp)
        .arg(
            Arg::with_name("BINARY")
                .help("path to the binary image")
                .required(true)
                .index(1),
        )
        .arg(Arg::with_name("v").short("v").multiple(true).help(
            "Sets the logging level of verbosity, repeat several times for \
                higher verbosity",
        ))
        .get_matches();

    let log_level = match matches.occurrences_of("v") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    // Logs go to stderr, stdout is for the hex words only.
    if let Err(e) = TermLogger::init(
        log_level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    ) {
        eprintln!("cannot initialize logging: {}", e);
    }

    // BINARY is required, clap exits before we get here without it
    let path = matches.value_of("BINARY").unwrap_or_default();

    let data = fs::read(path).unwrap_or_else(|e| {
        eprintln!(
            "{}: cannot read `{}`: {}",
            style("error").red(),
            style(path).cyan(),
            e
        );
        process::exit(1);
    });
    debug!("{} bytes read from `{}`", data.len(), path);

    let stdout = io::stdout();
    if let Err(e) = hex_image::write_words(&data, io::BufWriter::new(stdout.lock())) {
        // A closed pipe (e.g. `| head`) is not worth a message.
        if e.kind() != io::ErrorKind::BrokenPipe {
            eprintln!("{}: {}", style("error").red(), e);
        }
        process::exit(1);
    }
}
