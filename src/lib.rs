//! readersender - supervised interval relay from a reader to a sender
//!
//! A **reader** produces one sample per call from some source, a **sender**
//! forwards it to some sink. The driver loop connects a reader/sender pair
//! and relays one sample every interval; the supervisor restarts the loop
//! a bounded number of times when it fails.
//!
//! - **guard**: connection-state preconditions and violation policies
//! - **endpoint**: the `Reader`/`Sender` contracts and the `Sample` type
//! - **readers**, **senders**: built-in backends
//! - **registry**: backend lookup by name
//! - **driver**: the read/send cycle loop
//! - **supervisor**: bounded delayed restarts
//! - **config**, **cli**, **logging**, **shutdown**: binary plumbing
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use readersender::config::{EndpointConfig, RelayConfig, SupervisorConfig};
//! use readersender::driver::DriverLoop;
//! use readersender::registry::Registry;
//! use readersender::supervisor::Supervisor;
//! use tracing::Span;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let registry = Registry::builtin();
//!     let relay = RelayConfig {
//!         reader: EndpointConfig::new("random"),
//!         sender: EndpointConfig::new("stdout"),
//!         interval: Duration::from_secs(2),
//!         disconnect_after_read: false,
//!         disconnect_after_send: false,
//!     };
//!
//!     let mut supervisor = Supervisor::new(SupervisorConfig::default(), Span::none());
//!     let exit = supervisor
//!         .run(
//!             |_| DriverLoop::launch(&registry, &relay, Span::none()),
//!             readersender::shutdown::shutdown_signal(),
//!         )
//!         .await;
//!     std::process::exit(exit.exit_code());
//! }
//! ```

pub mod cli;
pub mod config;
pub mod driver;
pub mod endpoint;
pub mod error;
pub mod guard;
pub mod logging;
pub mod readers;
pub mod registry;
pub mod senders;
pub mod shutdown;
pub mod supervisor;

// Re-export commonly used types at crate root for convenience
pub use config::{Config, ConfigError, EndpointConfig, LogConfig, RelayConfig, SupervisorConfig};
pub use driver::{read_once, CycleSettings, DriverLoop, DriverState};
pub use endpoint::{Args, Endpoint, Link, Operation, Reader, Sample, Sender};
pub use error::{ConstructionError, DriverError, EndpointError, PreconditionError, Requirement};
pub use guard::{Admission, ConnectionGuard, OnViolation, PolicyKind};
pub use registry::Registry;
pub use supervisor::{Supervisor, SupervisorExit};
