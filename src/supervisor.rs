//! Bounded restarts of the driver loop.
//!
//! Every time the driver loop ends the supervisor counts a restart. Once the
//! count exceeds `max_restarts` it gives up; until then it waits a fixed
//! `restart_delay` and launches a fresh loop. A shutdown signal ends
//! supervision at any point, including mid-cycle and mid-delay.

use std::future::Future;

use tracing::{error, info, warn, Span};

use crate::config::SupervisorConfig;
use crate::error::DriverError;

/// Why supervision ended.
#[derive(Debug)]
pub enum SupervisorExit {
    /// A shutdown signal arrived
    Shutdown,

    /// The restart budget ran out
    Exhausted { restarts: u32 },

    /// The driver loop failed in a way restarts cannot fix
    Fatal(DriverError),
}

impl SupervisorExit {
    /// Process exit status for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            SupervisorExit::Shutdown => 0,
            SupervisorExit::Exhausted { .. } | SupervisorExit::Fatal(_) => 1,
        }
    }
}

pub struct Supervisor {
    config: SupervisorConfig,
    restarts: u32,
    span: Span,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, span: Span) -> Self {
        Self {
            config,
            restarts: 0,
            span,
        }
    }

    /// Restarts counted so far.
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    /// Launch driver loops until `shutdown` resolves, a fatal error occurs
    /// or the restart budget is exceeded.
    ///
    /// `launch` receives the attempt number, starting at 0, and resolves
    /// when that loop ends.
    pub async fn run<F, Fut, S>(&mut self, launch: F, shutdown: S) -> SupervisorExit
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = DriverError>,
        S: Future<Output = ()>,
    {
        let span = self.span.clone();
        tokio::select! {
            biased;

            _ = shutdown => {
                info!(parent: &span, "Exiting...");
                SupervisorExit::Shutdown
            }
            exit = self.supervise(launch) => exit,
        }
    }

    async fn supervise<F, Fut>(&mut self, mut launch: F) -> SupervisorExit
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = DriverError>,
    {
        loop {
            info!(parent: &self.span, attempt = self.restarts, "Starting main loop");
            let err = launch(self.restarts).await;

            if err.is_fatal() {
                error!(parent: &self.span, error = %err, "Unrecoverable error, not restarting");
                return SupervisorExit::Fatal(err);
            }

            self.restarts += 1;
            if self.restarts > self.config.max_restarts {
                error!(
                    parent: &self.span,
                    restarts = self.restarts,
                    max_restarts = self.config.max_restarts,
                    "Too many restarts, giving up"
                );
                return SupervisorExit::Exhausted {
                    restarts: self.restarts,
                };
            }

            warn!(
                parent: &self.span,
                restarts = self.restarts,
                max_restarts = self.config.max_restarts,
                delay_secs = self.config.restart_delay.as_secs(),
                "Main loop ended, restarting after delay"
            );
            tokio::time::sleep(self.config.restart_delay).await;
        }
    }
}
