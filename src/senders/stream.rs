//! Sender writing each sample as a line to an async writer.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncWrite, AsyncWriteExt, Stdout};
use tracing::{debug, info, Span};

use crate::endpoint::{parse_init, Args, Endpoint, Link, Operation, Sample, Sender};
use crate::error::{ConstructionError, EndpointError, Role};
use crate::guard::PolicyKind;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StreamSettings {
    #[serde(default)]
    guard_policy: PolicyKind,
}

/// Sender that prints samples to a writer, one per line.
pub struct StreamSender<W> {
    link: Link,
    out: W,
}

/// The `stdout` backend.
pub type StdoutSender = StreamSender<Stdout>;

impl StdoutSender {
    pub const BACKEND: &'static str = "stdout";
    pub const ALIAS: &'static str = "foo";

    pub fn stdout(span: Span) -> Self {
        StreamSender::new(tokio::io::stdout(), span)
    }

    pub fn from_args(args: &Args, span: Span) -> Result<Self, ConstructionError> {
        let settings: StreamSettings = parse_init(Role::Sender, Self::BACKEND, args)?;
        let mut sender = Self::stdout(span);
        sender.link = sender.link.with_policy(settings.guard_policy.into());
        Ok(sender)
    }
}

impl<W> StreamSender<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(out: W, span: Span) -> Self {
        Self {
            link: Link::new("StdoutSender", span),
            out,
        }
    }

    /// Consume the sender and return the writer.
    pub fn into_inner(self) -> W {
        self.out
    }
}

#[async_trait]
impl<W> Endpoint for StreamSender<W>
where
    W: AsyncWrite + Unpin + Send,
{
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
        info!(parent: self.link.span(), "Connecting {}.", self.link.name());
        self.link.mark_connected();
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), EndpointError> {
        if !self.link.admit(Operation::Disconnect)?.is_proceed() {
            return Ok(());
        }
        self.out.flush().await?;
        info!(parent: self.link.span(), "Disconnecting {}.", self.link.name());
        self.link.mark_disconnected();
        Ok(())
    }
}

#[async_trait]
impl<W> Sender for StreamSender<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, sample: &Sample, _args: &Args) -> Result<(), EndpointError> {
        if !self.link.admit(Operation::Send)?.is_proceed() {
            return Ok(());
        }
        debug!(parent: self.link.span(), "{} sending data.", self.link.name());
        let line = format!("{}\n", sample);
        self.out
            .write_all(line.as_bytes())
            .await
            .map_err(|e| EndpointError::Transport(e.to_string()))?;
        self.out
            .flush()
            .await
            .map_err(|e| EndpointError::Transport(e.to_string()))?;
        Ok(())
    }
}
