//! Sender POSTing each sample to an HTTP ingest endpoint.
//!
//! Every sample is wrapped in an [`Envelope`] and sent as JSON in a single
//! request. There is no retry: a failed request surfaces as a transport
//! error and the driver loop ends.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn, Span};
use uuid::Uuid;

use crate::endpoint::{parse_init, Args, Endpoint, Link, Operation, Sample, Sender};
use crate::error::{ConstructionError, EndpointError, Role};
use crate::guard::PolicyKind;

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_source() -> String {
    "readersender".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HttpSettings {
    url: String,

    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,

    /// Reported as `source` in every envelope
    #[serde(default = "default_source")]
    source: String,

    #[serde(default)]
    guard_policy: PolicyKind,
}

/// JSON body of one request.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope<'a> {
    pub id: Uuid,
    pub sent_at: DateTime<Utc>,
    pub source: &'a str,
    pub sample: &'a Sample,
}

impl<'a> Envelope<'a> {
    pub fn new(source: &'a str, sample: &'a Sample) -> Self {
        Self {
            id: Uuid::new_v4(),
            sent_at: Utc::now(),
            source,
            sample,
        }
    }
}

/// Counters kept across the sender's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendStats {
    /// Requests answered with a success status
    pub samples_sent: u64,

    /// Requests that failed or were rejected
    pub samples_failed: u64,
}

/// Sender for an HTTP ingest endpoint.
///
/// The underlying client (and its connection pool) lives from `connect` to
/// `disconnect`.
pub struct HttpSender {
    link: Link,
    url: Url,
    timeout: Duration,
    source: String,
    client: Option<Client>,
    stats: SendStats,
}

impl HttpSender {
    pub const BACKEND: &'static str = "http";

    pub fn new(url: Url, span: Span) -> Self {
        Self {
            link: Link::new("HttpSender", span),
            url,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            source: default_source(),
            client: None,
            stats: SendStats::default(),
        }
    }

    pub fn from_args(args: &Args, span: Span) -> Result<Self, ConstructionError> {
        let settings: HttpSettings = parse_init(Role::Sender, Self::BACKEND, args)?;
        let invalid = |message: String| ConstructionError::InvalidArguments {
            role: Role::Sender,
            backend: Self::BACKEND.to_string(),
            message,
        };

        let url = Url::parse(&settings.url)
            .map_err(|e| invalid(format!("invalid url '{}': {}", settings.url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported url scheme '{}'", url.scheme())));
        }
        if settings.timeout_secs == 0 {
            return Err(invalid("timeout_secs must be at least 1".to_string()));
        }

        Ok(Self {
            link: Link::new("HttpSender", span).with_policy(settings.guard_policy.into()),
            url,
            timeout: Duration::from_secs(settings.timeout_secs),
            source: settings.source,
            client: None,
            stats: SendStats::default(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn stats(&self) -> &SendStats {
        &self.stats
    }

    async fn post(&self, client: &Client, sample: &Sample) -> Result<(), EndpointError> {
        let envelope = Envelope::new(&self.source, sample);
        debug!(parent: self.link.span(), id = %envelope.id, url = %self.url, "Sending sample");

        let response = client
            .post(self.url.clone())
            .timeout(self.timeout)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EndpointError::Transport("request timed out".to_string())
                } else {
                    EndpointError::Transport(format!("request failed: {}", e))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(EndpointError::Transport(format!(
            "server error ({}): {}",
            status.as_u16(),
            message
        )))
    }
}

#[async_trait]
impl Endpoint for HttpSender {
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
        let client = Client::builder()
            .timeout(self.timeout)
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| EndpointError::Connection(e.to_string()))?;

        info!(parent: self.link.span(), url = %self.url, "HTTP sender ready");
        self.client = Some(client);
        self.link.mark_connected();
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), EndpointError> {
        if !self.link.admit(Operation::Disconnect)?.is_proceed() {
            return Ok(());
        }
        self.client = None;
        info!(
            parent: self.link.span(),
            sent = self.stats.samples_sent,
            failed = self.stats.samples_failed,
            "HTTP sender released"
        );
        self.link.mark_disconnected();
        Ok(())
    }
}

#[async_trait]
impl Sender for HttpSender {
    async fn send(&mut self, sample: &Sample, _args: &Args) -> Result<(), EndpointError> {
        if !self.link.admit(Operation::Send)?.is_proceed() {
            return Ok(());
        }
        let client = self
            .client
            .clone()
            .ok_or_else(|| EndpointError::Transport("HTTP client is not open".to_string()))?;

        match self.post(&client, sample).await {
            Ok(()) => {
                self.stats.samples_sent += 1;
                Ok(())
            }
            Err(e) => {
                self.stats.samples_failed += 1;
                warn!(parent: self.link.span(), error = %e, "Sample was not delivered");
                Err(e)
            }
        }
    }
}
