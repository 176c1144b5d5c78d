//! The capability contract shared by every reader and sender.
//!
//! Backends embed a [`Link`], which owns the private `connected` flag, the
//! violation policy and the logging span handed in at construction. Every
//! trait method starts with a guard check through the link:
//!
//! | operation    | requires      |
//! |--------------|---------------|
//! | `connect`    | disconnected  |
//! | `disconnect` | connected     |
//! | `read`       | connected     |
//! | `send`       | connected     |

use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::Span;

use crate::error::{ConstructionError, EndpointError, PreconditionError, Role};
use crate::guard::{Admission, ConnectionGuard, OnViolation};

/// Key-value arguments for backend construction, `read` and `send`.
pub type Args = serde_json::Map<String, serde_json::Value>;

/// One opaque unit of data produced by a reader and consumed by a sender.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(untagged)]
pub enum Sample {
    /// Nothing was read (a guard skipped the call, or the source had no data)
    #[default]
    Empty,

    Text(String),

    Bytes(Vec<u8>),

    /// Structured record
    Record(serde_json::Value),
}

impl Sample {
    pub fn is_empty(&self) -> bool {
        matches!(self, Sample::Empty)
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sample::Empty => Ok(()),
            Sample::Text(text) => f.write_str(text),
            Sample::Bytes(bytes) => f.write_str(&String::from_utf8_lossy(bytes)),
            Sample::Record(value) => write!(f, "{}", value),
        }
    }
}

impl From<serde_json::Value> for Sample {
    fn from(value: serde_json::Value) -> Self {
        Sample::Record(value)
    }
}

/// Guarded operations of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Connect,
    Disconnect,
    Read,
    Send,
}

impl Operation {
    pub fn name(self) -> &'static str {
        match self {
            Operation::Connect => "connect",
            Operation::Disconnect => "disconnect",
            Operation::Read => "read",
            Operation::Send => "send",
        }
    }

    fn guard(self) -> ConnectionGuard {
        let guard = match self {
            Operation::Connect => ConnectionGuard::only_disconnected(),
            Operation::Disconnect | Operation::Read | Operation::Send => {
                ConnectionGuard::only_connected()
            }
        };
        guard.operation(self.name())
    }
}

/// Connection state of one endpoint.
///
/// The flag starts out `false` and only changes through
/// [`Link::mark_connected`] and [`Link::mark_disconnected`], which backends
/// call once their resource has actually been opened or released.
#[derive(Debug, Clone)]
pub struct Link {
    name: String,
    connected: bool,
    policy: OnViolation,
    span: Span,
}

impl Link {
    /// Create a disconnected link with the default `Warn` policy.
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Self {
            name: name.into(),
            connected: false,
            policy: OnViolation::default(),
            span,
        }
    }

    pub fn with_policy(mut self, policy: OnViolation) -> Self {
        self.policy = policy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Logging handle of the owning endpoint.
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn policy(&self) -> &OnViolation {
        &self.policy
    }

    /// Apply the guard for `operation` to the current state.
    pub fn admit(&self, operation: Operation) -> Result<Admission, PreconditionError> {
        operation
            .guard()
            .component(self.name.clone())
            .policy(self.policy.clone())
            .span(self.span.clone())
            .check(self.connected)
    }

    pub fn mark_connected(&mut self) {
        self.connected = true;
    }

    pub fn mark_disconnected(&mut self) {
        self.connected = false;
    }
}

/// Connection lifecycle shared by readers and senders.
#[async_trait]
pub trait Endpoint: Send {
    /// Human-readable backend name, used in logs.
    fn name(&self) -> &str;

    fn is_connected(&self) -> bool;

    /// Establish whatever resource the backend needs.
    async fn connect(&mut self) -> Result<(), EndpointError>;

    /// Release the resource.
    async fn disconnect(&mut self) -> Result<(), EndpointError>;

    /// Disconnect if connected. Never trips the disconnect guard.
    async fn close(&mut self) -> Result<(), EndpointError> {
        if self.is_connected() {
            self.disconnect().await?;
        }
        Ok(())
    }
}

/// A source of samples.
#[async_trait]
pub trait Reader: Endpoint {
    async fn read(&mut self, args: &Args) -> Result<Sample, EndpointError>;
}

/// A sink for samples.
#[async_trait]
pub trait Sender: Endpoint {
    /// Forward `sample`. Transport-level rejection is an error the guard
    /// never hides.
    async fn send(&mut self, sample: &Sample, args: &Args) -> Result<(), EndpointError>;
}

/// Deserialize init arguments into a backend's typed settings.
pub fn parse_init<T: DeserializeOwned>(
    role: Role,
    backend: &str,
    args: &Args,
) -> Result<T, ConstructionError> {
    serde_json::from_value(serde_json::Value::Object(args.clone())).map_err(|e| {
        ConstructionError::InvalidArguments {
            role,
            backend: backend.to_string(),
            message: e.to_string(),
        }
    })
}

/// Deserialize `read`/`send` arguments into typed options.
pub fn parse_op_args<T: DeserializeOwned>(args: &Args) -> Result<T, EndpointError> {
    serde_json::from_value(serde_json::Value::Object(args.clone()))
        .map_err(|e| EndpointError::InvalidArguments(e.to_string()))
}
