//! Simulated pump with delayed state transitions.
//!
//! Starting or stopping a pump does not take effect at once: the pump moves
//! to `Starting`/`Stopping` and a [`ScheduledTransition`] records the state it
//! settles into and when. The record is applied lazily, on the next status
//! query after it falls due.

use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, info, warn, Span};

use crate::endpoint::{parse_init, Args, Endpoint, Link, Operation, Reader, Sample};
use crate::error::{ConstructionError, EndpointError, Role};
use crate::guard::PolicyKind;

/// Transition delays in seconds, one picked at random per start/stop.
const DEFAULT_DELAYS_SECS: [u64; 5] = [1, 3, 5, 10, 20];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PumpStatus {
    Running,
    Stopped,
    Starting,
    Stopping,
    Error,
}

/// A state change that takes effect once `due` has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledTransition {
    pub due: Instant,
    pub status: PumpStatus,
}

/// Pump state machine.
#[derive(Debug, Clone)]
pub struct Pump {
    status: PumpStatus,
    pending: Option<ScheduledTransition>,
    delays: Vec<Duration>,
}

impl Pump {
    /// A stopped pump picking transition delays from `delays`.
    ///
    /// An empty list makes transitions immediate on the next query.
    pub fn new(delays: Vec<Duration>) -> Self {
        Self {
            status: PumpStatus::Stopped,
            pending: None,
            delays,
        }
    }

    /// Current status, applying a pending transition that has fallen due.
    pub fn status(&mut self) -> PumpStatus {
        self.settle(Instant::now());
        self.status
    }

    /// Force a status, discarding any pending transition.
    pub fn set_status(&mut self, status: PumpStatus) {
        self.status = status;
        self.pending = None;
    }

    pub fn pending(&self) -> Option<ScheduledTransition> {
        self.pending
    }

    pub fn running(&mut self) -> bool {
        self.status() == PumpStatus::Running
    }

    pub fn stopped(&mut self) -> bool {
        self.status() == PumpStatus::Stopped
    }

    /// Begin starting. Refused while a transition is pending or unless the
    /// pump is stopped or in error.
    pub fn start(&mut self) -> bool {
        self.settle(Instant::now());
        if self.pending.is_some()
            || !matches!(self.status, PumpStatus::Stopped | PumpStatus::Error)
        {
            return false;
        }
        self.status = PumpStatus::Starting;
        self.schedule(PumpStatus::Running);
        true
    }

    /// Begin stopping. Refused while a transition is pending or unless the
    /// pump is running or in error.
    pub fn stop(&mut self) -> bool {
        self.settle(Instant::now());
        if self.pending.is_some()
            || !matches!(self.status, PumpStatus::Running | PumpStatus::Error)
        {
            return false;
        }
        self.status = PumpStatus::Stopping;
        self.schedule(PumpStatus::Stopped);
        true
    }

    /// Turn a pending stop back into a start. The new start transition gets
    /// a fresh delay.
    pub fn resume(&mut self) -> bool {
        self.settle(Instant::now());
        if self.status != PumpStatus::Stopping {
            return false;
        }
        self.status = PumpStatus::Starting;
        self.schedule(PumpStatus::Running);
        true
    }

    fn schedule(&mut self, status: PumpStatus) {
        let delay = self
            .delays
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(Duration::ZERO);
        self.pending = Some(ScheduledTransition {
            due: Instant::now() + delay,
            status,
        });
    }

    fn settle(&mut self, now: Instant) {
        if let Some(transition) = self.pending {
            if now >= transition.due {
                self.status = transition.status;
                self.pending = None;
            }
        }
    }
}

impl Default for Pump {
    fn default() -> Self {
        Self::new(
            DEFAULT_DELAYS_SECS
                .iter()
                .map(|secs| Duration::from_secs(*secs))
                .collect(),
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PumpSettings {
    /// Candidate transition delays in seconds
    #[serde(default)]
    delays_secs: Option<Vec<u64>>,

    #[serde(default)]
    guard_policy: PolicyKind,
}

/// Reader reporting the status of a simulated pump.
///
/// Connecting starts the pump and disconnecting stops it. A pump that is
/// already starting or running counts as connected at once, and a pump that
/// is still stopping is turned around.
pub struct PumpReader {
    link: Link,
    pump: Pump,
}

impl PumpReader {
    pub const BACKEND: &'static str = "pump";

    pub fn new(pump: Pump, span: Span) -> Self {
        Self {
            link: Link::new("PumpReader", span),
            pump,
        }
    }

    pub fn from_args(args: &Args, span: Span) -> Result<Self, ConstructionError> {
        let settings: PumpSettings = parse_init(Role::Reader, Self::BACKEND, args)?;
        let pump = match settings.delays_secs {
            Some(delays) => Pump::new(delays.into_iter().map(Duration::from_secs).collect()),
            None => Pump::default(),
        };
        Ok(Self {
            link: Link::new("PumpReader", span).with_policy(settings.guard_policy.into()),
            pump,
        })
    }

    pub fn pump(&mut self) -> &mut Pump {
        &mut self.pump
    }
}

#[async_trait]
impl Endpoint for PumpReader {
    fn name(&self) -> &str {
        self.link.name()
    }

    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    async fn connect(&mut self) -> Result<(), EndpointError> {
        if !self.link.admit(Operation::Connect)?.is_proceed() {
            return Ok(());
        }
        match self.pump.status() {
            PumpStatus::Starting | PumpStatus::Running => {
                debug!(parent: self.link.span(), "Pump already powered");
            }
            PumpStatus::Stopping => {
                self.pump.resume();
                info!(parent: self.link.span(), "Pump stop reversed, starting again");
            }
            PumpStatus::Stopped | PumpStatus::Error => {
                self.pump.start();
                info!(parent: self.link.span(), "Pump starting");
            }
        }
        self.link.mark_connected();
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), EndpointError> {
        if !self.link.admit(Operation::Disconnect)?.is_proceed() {
            return Ok(());
        }
        if self.pump.stop() {
            info!(parent: self.link.span(), "Pump stopping");
        } else {
            let status = self.pump.status();
            warn!(
                parent: self.link.span(),
                ?status,
                "Pump cannot stop yet, releasing it as is"
            );
        }
        self.link.mark_disconnected();
        Ok(())
    }
}

#[async_trait]
impl Reader for PumpReader {
    async fn read(&mut self, _args: &Args) -> Result<Sample, EndpointError> {
        if !self.link.admit(Operation::Read)?.is_proceed() {
            return Ok(Sample::Empty);
        }
        let status = self.pump.status();
        let pending = self.pump.pending().map(|transition| transition.status);
        debug!(parent: self.link.span(), ?status, "Read pump status");
        Ok(Sample::Record(json!({
            "status": status,
            "running": status == PumpStatus::Running,
            "pending": pending,
        })))
    }
}
