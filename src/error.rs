//! Error types shared by the guard, the endpoints, the driver loop and the
//! supervisor.
//!
//! The taxonomy follows how far a failure travels:
//!
//! - [`PreconditionError`]: wrong connection state, handled where it occurs
//! - [`EndpointError`]: a single backend call failed
//! - [`ConstructionError`]: a backend could not be built, always fatal
//! - [`DriverError`]: why a driver loop invocation ended

use std::fmt;

use thiserror::Error;

/// Connection state an operation requires before it may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Operation is only valid while connected.
    Connected,
    /// Operation is only valid while disconnected.
    Disconnected,
}

impl Requirement {
    /// Whether the given connection state satisfies this requirement.
    pub fn is_met(self, connected: bool) -> bool {
        match self {
            Requirement::Connected => connected,
            Requirement::Disconnected => !connected,
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Connected => write!(f, "not connected"),
            Requirement::Disconnected => write!(f, "not disconnected"),
        }
    }
}

/// An operation was attempted in the wrong connection state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Failed assertion: {requirement}. ({component}::{operation})")]
pub struct PreconditionError {
    /// Name of the endpoint the operation was called on
    pub component: String,

    /// Name of the guarded operation
    pub operation: &'static str,

    /// The requirement that was not met
    pub requirement: Requirement,
}

impl PreconditionError {
    /// True when the operation needed a live connection.
    pub fn is_not_connected(&self) -> bool {
        self.requirement == Requirement::Connected
    }
}

/// Failure of a single endpoint call.
#[derive(Debug, Error)]
pub enum EndpointError {
    /// Guard policy is `raise` and the connection precondition failed
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    /// The backend refused or failed to establish its connection
    #[error("connection failed: {0}")]
    Connection(String),

    /// The source could not produce a sample
    #[error("read failed: {0}")]
    Read(String),

    /// The transport rejected the payload
    #[error("transport rejected payload: {0}")]
    Transport(String),

    /// Read or send arguments did not match what the backend accepts
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which side of the relay a backend plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Reader,
    Sender,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Reader => write!(f, "reader"),
            Role::Sender => write!(f, "sender"),
        }
    }
}

/// A backend could not be constructed. Never retried.
#[derive(Debug, Error)]
pub enum ConstructionError {
    /// No backend is registered under the requested name
    #[error("unknown {role} backend '{name}'")]
    UnknownBackend { role: Role, name: String },

    /// The backend rejected its init arguments
    #[error("invalid init arguments for {role} '{backend}': {message}")]
    InvalidArguments {
        role: Role,
        backend: String,
        message: String,
    },
}

/// Step of a cycle that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStage {
    ReconnectReader,
    Read,
    DisconnectReader,
    ReconnectSender,
    Send,
    DisconnectSender,
}

impl fmt::Display for CycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleStage::ReconnectReader => "reconnect reader",
            CycleStage::Read => "read",
            CycleStage::DisconnectReader => "disconnect reader",
            CycleStage::ReconnectSender => "reconnect sender",
            CycleStage::Send => "send",
            CycleStage::DisconnectSender => "disconnect sender",
        };
        f.write_str(name)
    }
}

/// Reason a driver loop invocation ended.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Reader or sender could not be built
    #[error(transparent)]
    Construction(#[from] ConstructionError),

    /// Initial connection of the reader or sender failed
    #[error("connection to {role} failed: {source}")]
    Connection {
        role: Role,
        #[source]
        source: EndpointError,
    },

    /// A cycle failed part way through
    #[error("cycle {cycle} failed during {stage}: {source}")]
    Cycle {
        cycle: u64,
        stage: CycleStage,
        #[source]
        source: EndpointError,
    },
}

impl DriverError {
    /// Construction errors cannot fix themselves, so they are not restarted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DriverError::Construction(_))
    }
}
