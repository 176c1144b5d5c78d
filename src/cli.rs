//! Command line interface of the `readersender` binary.

use std::path::PathBuf;

use clap::Parser;

use crate::endpoint::Args;

/// Relay samples from a reader backend to a sender backend on a fixed
/// interval.
#[derive(Debug, Clone, Parser)]
#[command(name = "readersender", version)]
pub struct Cli {
    /// Reader backend (foo, random, scheme, sensor, pump, serial)
    pub reader: String,

    /// Sender backend (stdout, foo, http)
    pub sender: String,

    /// Seconds between the starts of consecutive cycles
    #[arg(value_parser = clap::value_parser!(u64).range(1..))]
    pub interval: u64,

    /// Log at debug level
    #[arg(long)]
    pub debug: bool,

    /// Log to stdout instead of the rotating log file
    #[arg(long)]
    pub stdout: bool,

    /// JSON object passed to the reader constructor
    #[arg(long, alias = "reader_init_args", value_name = "JSON", value_parser = parse_json_map)]
    pub reader_init_args: Option<Args>,

    /// JSON object passed to every read
    #[arg(long, alias = "read_args", value_name = "JSON", value_parser = parse_json_map)]
    pub read_args: Option<Args>,

    /// JSON object passed to the sender constructor
    #[arg(long, alias = "sender_init_args", value_name = "JSON", value_parser = parse_json_map)]
    pub sender_init_args: Option<Args>,

    /// JSON object passed to every send
    #[arg(long, alias = "send_args", value_name = "JSON", value_parser = parse_json_map)]
    pub send_args: Option<Args>,

    /// Disconnect the reader after every read
    #[arg(long, alias = "disconnect_after_read")]
    pub disconnect_after_read: bool,

    /// Disconnect the sender after every send
    #[arg(long, alias = "disconnect_after_send")]
    pub disconnect_after_send: bool,

    /// Restarts allowed before giving up [env: READERSENDER_MAX_RESTARTS]
    #[arg(long, value_name = "N")]
    pub max_restarts: Option<u32>,

    /// Seconds to wait before a restart [env: READERSENDER_RESTART_DELAY_SECS]
    #[arg(long, value_name = "SECS")]
    pub restart_delay: Option<u64>,

    /// Directory for log files [env: READERSENDER_LOG_DIR]
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,
}

/// Parse a JSON object argument.
pub fn parse_json_map(value: &str) -> Result<Args, String> {
    match serde_json::from_str(value) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, got {}", other)),
        Err(e) => Err(format!("invalid JSON: {}", e)),
    }
}
