//! readersender - relay samples from a reader to a sender on a fixed interval
//!
//! ```text
//! readersender <reader> <sender> <interval> [--debug] [--stdout]
//!     [--reader-init-args JSON] [--read-args JSON]
//!     [--sender-init-args JSON] [--send-args JSON]
//!     [--disconnect-after-read] [--disconnect-after-send]
//!     [--max-restarts N] [--restart-delay SECS] [--log-dir DIR]
//! ```
//!
//! Exits 0 on SIGINT/SIGTERM and 1 when the configuration is invalid, a
//! backend cannot be built or the restart budget runs out.

use clap::Parser;
use tracing::{debug, info, info_span};

use readersender::cli::Cli;
use readersender::config::Config;
use readersender::driver::DriverLoop;
use readersender::logging;
use readersender::registry::Registry;
use readersender::shutdown::shutdown_signal;
use readersender::supervisor::Supervisor;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::from_cli(cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let log_guard = match logging::init(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to set up logging: {:#}", e);
            std::process::exit(1);
        }
    };

    if config.logging.debug {
        debug!("Enabled debug mode");
    }
    info!(
        reader = %config.relay.reader.backend,
        sender = %config.relay.sender.backend,
        interval_secs = config.relay.interval.as_secs(),
        max_restarts = config.supervisor.max_restarts,
        restart_delay_secs = config.supervisor.restart_delay.as_secs(),
        "Configuration loaded"
    );

    let registry = Registry::builtin();
    let relay = config.relay;
    let supervisor_span = info_span!("supervisor");
    let mut supervisor = Supervisor::new(config.supervisor, supervisor_span.clone());

    let exit = supervisor
        .run(
            |attempt| {
                let span = info_span!(parent: &supervisor_span, "driver", attempt);
                DriverLoop::launch(&registry, &relay, span)
            },
            shutdown_signal(),
        )
        .await;

    let code = exit.exit_code();
    info!(code, outcome = ?exit, "readersender stopped");
    drop(log_guard);
    std::process::exit(code);
}
