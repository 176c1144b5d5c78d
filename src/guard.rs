//! Connection-state preconditions for endpoint operations.
//!
//! A [`ConnectionGuard`] is built once per operation with the state it
//! requires and what to do when that state is not met. Endpoints call
//! [`ConnectionGuard::check`] at the top of a method, or wrap a closure with
//! [`ConnectionGuard::run`].
//!
//! ```
//! use readersender::guard::{Admission, ConnectionGuard, OnViolation};
//!
//! let guard = ConnectionGuard::only_connected()
//!     .component("FooReader")
//!     .operation("read")
//!     .policy(OnViolation::Pass);
//!
//! assert_eq!(guard.check(false).unwrap(), Admission::Skip);
//! assert_eq!(guard.check(true).unwrap(), Admission::Proceed);
//! ```

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, warn, Span};

use crate::error::{PreconditionError, Requirement};

/// Callback invoked by [`OnViolation::Custom`].
pub type ViolationHandler = Arc<dyn Fn(&PreconditionError) + Send + Sync>;

/// What a guard does when its precondition is not met.
#[derive(Clone, Default)]
pub enum OnViolation {
    /// Skip the operation silently
    Pass,

    /// Skip the operation and log a warning
    #[default]
    Warn,

    /// Fail with a [`PreconditionError`]
    Raise,

    /// Skip the operation and hand the violation to a callback
    Custom(ViolationHandler),
}

impl OnViolation {
    /// Build a custom policy from a closure.
    pub fn custom<F>(handler: F) -> Self
    where
        F: Fn(&PreconditionError) + Send + Sync + 'static,
    {
        OnViolation::Custom(Arc::new(handler))
    }
}

impl fmt::Debug for OnViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OnViolation::Pass => write!(f, "Pass"),
            OnViolation::Warn => write!(f, "Warn"),
            OnViolation::Raise => write!(f, "Raise"),
            OnViolation::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Serializable subset of [`OnViolation`], accepted as the `guard_policy`
/// init argument of every built-in backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    Pass,
    #[default]
    Warn,
    Raise,
}

impl From<PolicyKind> for OnViolation {
    fn from(kind: PolicyKind) -> Self {
        match kind {
            PolicyKind::Pass => OnViolation::Pass,
            PolicyKind::Warn => OnViolation::Warn,
            PolicyKind::Raise => OnViolation::Raise,
        }
    }
}

/// Outcome of a guard check that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Precondition holds, run the operation
    Proceed,

    /// Precondition failed and the policy absorbed it, do not run
    Skip,
}

impl Admission {
    pub fn is_proceed(self) -> bool {
        self == Admission::Proceed
    }
}

/// Precondition on a component's connection state.
#[derive(Debug, Clone)]
pub struct ConnectionGuard {
    requirement: Requirement,
    component: String,
    operation: &'static str,
    policy: OnViolation,
    span: Span,
}

impl ConnectionGuard {
    /// Create a guard for the given requirement with the default `Warn` policy.
    pub fn new(requirement: Requirement) -> Self {
        Self {
            requirement,
            component: "endpoint".to_string(),
            operation: "operation",
            policy: OnViolation::default(),
            span: Span::none(),
        }
    }

    /// Guard an operation that needs a live connection.
    pub fn only_connected() -> Self {
        Self::new(Requirement::Connected)
    }

    /// Guard an operation that must not run on a live connection.
    pub fn only_disconnected() -> Self {
        Self::new(Requirement::Disconnected)
    }

    /// Name of the component, used in logs and errors.
    pub fn component(mut self, component: impl Into<String>) -> Self {
        self.component = component.into();
        self
    }

    /// Name of the guarded operation.
    pub fn operation(mut self, operation: &'static str) -> Self {
        self.operation = operation;
        self
    }

    pub fn policy(mut self, policy: OnViolation) -> Self {
        self.policy = policy;
        self
    }

    /// Span that warnings are recorded under.
    pub fn span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn requirement(&self) -> Requirement {
        self.requirement
    }

    /// Check the precondition against the current connection state.
    ///
    /// Returns `Ok(Admission::Proceed)` when the requirement holds. Otherwise
    /// the policy is applied: only `Raise` turns the violation into an error,
    /// every other policy yields `Ok(Admission::Skip)`.
    pub fn check(&self, connected: bool) -> Result<Admission, PreconditionError> {
        if self.requirement.is_met(connected) {
            return Ok(Admission::Proceed);
        }

        let violation = PreconditionError {
            component: self.component.clone(),
            operation: self.operation,
            requirement: self.requirement,
        };

        match &self.policy {
            OnViolation::Pass => {}
            OnViolation::Warn => {
                warn!(
                    parent: &self.span,
                    component = %self.component,
                    operation = self.operation,
                    "Failed assertion: {}.",
                    self.requirement
                );
            }
            OnViolation::Raise => return Err(violation),
            OnViolation::Custom(handler) => {
                // A handler must not take the caller down with it.
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(&violation)));
                if outcome.is_err() {
                    error!(
                        parent: &self.span,
                        component = %self.component,
                        operation = self.operation,
                        "Violation handler panicked"
                    );
                }
            }
        }

        Ok(Admission::Skip)
    }

    /// Run `op` if the precondition holds.
    ///
    /// When the precondition fails and the policy absorbs it, `op` is never
    /// invoked and `T::default()` is returned. Errors from `op` itself are
    /// passed through untouched.
    pub async fn run<T, E, F, Fut>(&self, connected: bool, op: F) -> Result<T, E>
    where
        T: Default,
        E: From<PreconditionError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.check(connected)? {
            Admission::Proceed => op().await,
            Admission::Skip => Ok(T::default()),
        }
    }
}
