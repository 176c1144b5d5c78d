//! A reader that always returns `"foo"`.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, Span};

use crate::endpoint::{parse_init, Args, Endpoint, Link, Operation, Reader, Sample};
use crate::error::{ConstructionError, EndpointError, Role};
use crate::guard::PolicyKind;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FooSettings {
    #[serde(default)]
    guard_policy: PolicyKind,
}

/// Reader with no real source behind it.
pub struct FooReader {
    link: Link,
}

impl FooReader {
    pub const BACKEND: &'static str = "foo";

    pub fn new(span: Span) -> Self {
        Self {
            link: Link::new("FooReader", span),
        }
    }

    pub fn from_args(args: &Args, span: Span) -> Result<Self, ConstructionError> {
        let settings: FooSettings = parse_init(Role::Reader, Self::BACKEND, args)?;
        let mut reader = Self::new(span);
        reader.link = reader.link.with_policy(settings.guard_policy.into());
        Ok(reader)
    }
}

#[async_trait]
impl Endpoint for FooReader {
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
        info!(parent: self.link.span(), "Connecting to foo");
        self.link.mark_connected();
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), EndpointError> {
        if !self.link.admit(Operation::Disconnect)?.is_proceed() {
            return Ok(());
        }
        info!(parent: self.link.span(), "Disconnecting from foo");
        self.link.mark_disconnected();
        Ok(())
    }
}

#[async_trait]
impl Reader for FooReader {
    async fn read(&mut self, _args: &Args) -> Result<Sample, EndpointError> {
        if !self.link.admit(Operation::Read)?.is_proceed() {
            return Ok(Sample::Empty);
        }
        debug!(parent: self.link.span(), "Pretending to read data: foo");
        Ok(Sample::Text("foo".to_string()))
    }
}
