//! read-value - read a single sample and print it
//!
//! ```text
//! read-value <reader> [--debug] [--reader-init-args JSON] [--read-args JSON]
//! ```
//!
//! Logs go to stderr. A reader that cannot be built or connected exits 1;
//! a failed read is logged and prints nothing.

use clap::Parser;
use tracing::{error, info_span};

use readersender::cli::parse_json_map;
use readersender::config::EndpointConfig;
use readersender::driver::read_once;
use readersender::endpoint::Args;
use readersender::error::DriverError;
use readersender::logging;
use readersender::registry::Registry;

/// Read one sample from a reader backend and print it to stdout.
#[derive(Debug, Parser)]
#[command(name = "read-value", version)]
struct ReadValueArgs {
    /// Reader backend (foo, random, scheme, sensor, pump, serial)
    reader: String,

    /// Log at debug level
    #[arg(long)]
    debug: bool,

    /// JSON object passed to the reader constructor
    #[arg(long, alias = "reader_init_args", value_name = "JSON", value_parser = parse_json_map)]
    reader_init_args: Option<Args>,

    /// JSON object passed to the read
    #[arg(long, alias = "read_args", value_name = "JSON", value_parser = parse_json_map)]
    read_args: Option<Args>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = ReadValueArgs::parse();

    if let Err(e) = logging::init_stderr(args.debug) {
        eprintln!("Failed to set up logging: {:#}", e);
        std::process::exit(1);
    }

    let reader = EndpointConfig {
        backend: args.reader,
        init_args: args.reader_init_args.unwrap_or_default(),
        op_args: args.read_args.unwrap_or_default(),
    };

    let span = info_span!("read_value");
    match read_once(&Registry::builtin(), &reader, &span).await {
        Ok(sample) => println!("{}", sample),
        Err(e @ DriverError::Cycle { .. }) => {
            error!(parent: &span, error = %e, "Failed to read value");
        }
        Err(e) => {
            error!(parent: &span, error = %e, "Failed to open reader");
            std::process::exit(1);
        }
    }
}
