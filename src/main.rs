//! Command-line driver: load a compiled specification, stream a trace
//! through the monitor, and print verdicts.

use std::fs;
use std::io;
use std::process;

use clap::{App, Arg};
use log::{debug, error, LevelFilter};
use simple_logger::SimpleLogger;

use mltl_sentinel::trace::CsvTrace;
use mltl_sentinel::{Monitor, MonitorOptions, Status};

fn main() {
    process::exit(run());
}

fn run() -> i32 {
    let matches = App::new("mltl-sentinel")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Streaming runtime verification monitor for mission-time LTL")
        .arg(
            Arg::with_name("spec")
                .help("Compiled specification binary")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("trace")
                .help("CSV trace of signals (or atomics, for signal-free specs)")
                .required(true)
                .index(2),
        )
        .arg(
            Arg::with_name("prob-trace")
                .long("prob-trace")
                .takes_value(true)
                .help("CSV of per-atomic probabilities feeding prediction"),
        )
        .arg(
            Arg::with_name("output")
                .short("o")
                .long("output")
                .takes_value(true)
                .help("Write verdicts to a file instead of stdout"),
        )
        .arg(
            Arg::with_name("arena-words")
                .long("arena-words")
                .takes_value(true)
                .help("Queue arena capacity in verdict words"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .multiple(true)
                .help("Increase log verbosity (repeat for more)"),
        )
        .get_matches();

    let level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    SimpleLogger::new().with_level(level).init().unwrap();

    let mut options = MonitorOptions::default();
    if let Some(words) = matches.value_of("arena-words") {
        match words.parse() {
            Ok(n) => options.arena_words = n,
            Err(_) => {
                error!("--arena-words takes a word count");
                return 1;
            }
        }
    }

    let blob = match fs::read(matches.value_of("spec").unwrap()) {
        Ok(bytes) => bytes,
        Err(err) => {
            error!("cannot read specification: {}", err);
            return 2;
        }
    };
    let mut monitor = match Monitor::load(&blob, options) {
        Ok(monitor) => monitor,
        Err(err) => {
            error!("cannot load specification: {}", err);
            return 2;
        }
    };
    debug!("spec: {}", monitor.spec_note());

    // With no arithmetic loads the trace columns are the atomics.
    let as_atomics = monitor.num_signals() == 0;
    let mut reader = match CsvTrace::open(
        matches.value_of("trace").unwrap(),
        matches.value_of("prob-trace"),
        as_atomics,
    ) {
        Ok(reader) => reader,
        Err(err) => {
            error!("cannot open trace: {}", err);
            return 1;
        }
    };

    match matches.value_of("output") {
        Some(path) => match fs::File::create(path) {
            Ok(file) => monitor.set_output(Box::new(io::BufWriter::new(file))),
            Err(err) => {
                error!("cannot create output file: {}", err);
                return 1;
            }
        },
        None => monitor.set_output(Box::new(io::stdout())),
    }

    let mut invalid_inst = false;
    loop {
        match reader.load_next(&mut monitor) {
            Ok(Status::EndOfTrace) => {
                if invalid_inst {
                    error!("trace processed, but some instructions could not be dispatched");
                    return 3;
                }
                return 0;
            }
            Ok(_) => {}
            Err(err) => {
                error!("trace error: {}", err);
                return 1;
            }
        }
        // An invalid instruction never aborts a step; finish the trace and
        // report it through the exit code.
        if monitor.step() == Status::InvalidInst {
            invalid_inst = true;
        }
    }
}
