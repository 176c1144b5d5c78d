//! The interval-driven read/send loop.
//!
//! A [`DriverLoop`] owns one reader and one sender. It connects both, then
//! runs cycles of read followed by send, starting a cycle every `interval`.
//! A cycle that takes longer than the interval is followed by the next one
//! at once; missed starts are not made up.
//!
//! The first failure ends the loop. The loop closes both endpoints and hands
//! the error back to its caller, usually the [`Supervisor`](crate::supervisor::Supervisor).

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn, Span};

use crate::config::{EndpointConfig, RelayConfig};
use crate::endpoint::{Args, Reader, Sample, Sender};
use crate::error::{ConstructionError, CycleStage, DriverError, EndpointError, Role};
use crate::registry::Registry;

/// Per-cycle behaviour of a driver loop.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleSettings {
    /// Time between the starts of consecutive cycles
    pub interval: Duration,
    pub read_args: Args,
    pub send_args: Args,
    pub disconnect_after_read: bool,
    pub disconnect_after_send: bool,
}

impl CycleSettings {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            read_args: Args::new(),
            send_args: Args::new(),
            disconnect_after_read: false,
            disconnect_after_send: false,
        }
    }
}

impl From<&RelayConfig> for CycleSettings {
    fn from(relay: &RelayConfig) -> Self {
        Self {
            interval: relay.interval,
            read_args: relay.reader.op_args.clone(),
            send_args: relay.sender.op_args.clone(),
            disconnect_after_read: relay.disconnect_after_read,
            disconnect_after_send: relay.disconnect_after_send,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Init,
    ConnectingReader,
    ConnectingSender,
    Cycling,
    Terminated,
}

/// One supervised run of the relay.
pub struct DriverLoop {
    reader: Box<dyn Reader>,
    sender: Box<dyn Sender>,
    settings: CycleSettings,
    state: DriverState,
    cycles: u64,
    last_cycle_start: Option<Instant>,
    span: Span,
}

impl DriverLoop {
    pub fn new(
        reader: Box<dyn Reader>,
        sender: Box<dyn Sender>,
        settings: CycleSettings,
        span: Span,
    ) -> Self {
        Self {
            reader,
            sender,
            settings,
            state: DriverState::Init,
            cycles: 0,
            last_cycle_start: None,
            span,
        }
    }

    /// Build the reader and sender named in `relay`.
    pub fn build(
        registry: &Registry,
        relay: &RelayConfig,
        span: Span,
    ) -> Result<Self, ConstructionError> {
        let reader =
            registry.create_reader(&relay.reader.backend, &relay.reader.init_args, &span)?;
        let sender =
            registry.create_sender(&relay.sender.backend, &relay.sender.init_args, &span)?;
        Ok(Self::new(reader, sender, CycleSettings::from(relay), span))
    }

    /// Build a loop from `relay` and run it until it fails.
    pub async fn launch(registry: &Registry, relay: &RelayConfig, span: Span) -> DriverError {
        match Self::build(registry, relay, span.clone()) {
            Ok(mut driver) => driver.run().await,
            Err(e) => {
                error!(parent: &span, error = %e, "Failed to build reader/sender");
                DriverError::from(e)
            }
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Cycles completed so far.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn reader(&self) -> &dyn Reader {
        self.reader.as_ref()
    }

    pub fn sender(&self) -> &dyn Sender {
        self.sender.as_ref()
    }

    /// Connect the reader, then the sender.
    pub async fn start(&mut self) -> Result<(), DriverError> {
        self.state = DriverState::ConnectingReader;
        self.reader
            .connect()
            .await
            .map_err(|source| DriverError::Connection {
                role: Role::Reader,
                source,
            })?;

        self.state = DriverState::ConnectingSender;
        self.sender
            .connect()
            .await
            .map_err(|source| DriverError::Connection {
                role: Role::Sender,
                source,
            })?;

        self.state = DriverState::Cycling;
        info!(
            parent: &self.span,
            reader = self.reader.name(),
            sender = self.sender.name(),
            interval_secs = self.settings.interval.as_secs_f64(),
            "Relay connected"
        );
        Ok(())
    }

    /// Run one read/send cycle without pacing.
    pub async fn cycle(&mut self) -> Result<(), DriverError> {
        let cycle = self.cycles + 1;
        let failed = |stage: CycleStage| move |source: EndpointError| DriverError::Cycle {
            cycle,
            stage,
            source,
        };

        if !self.reader.is_connected() {
            self.reader
                .connect()
                .await
                .map_err(failed(CycleStage::ReconnectReader))?;
        }
        let sample = self
            .reader
            .read(&self.settings.read_args)
            .await
            .map_err(failed(CycleStage::Read))?;
        if self.settings.disconnect_after_read {
            self.reader
                .disconnect()
                .await
                .map_err(failed(CycleStage::DisconnectReader))?;
        }

        if !self.sender.is_connected() {
            self.sender
                .connect()
                .await
                .map_err(failed(CycleStage::ReconnectSender))?;
        }
        self.sender
            .send(&sample, &self.settings.send_args)
            .await
            .map_err(failed(CycleStage::Send))?;
        if self.settings.disconnect_after_send {
            self.sender
                .disconnect()
                .await
                .map_err(failed(CycleStage::DisconnectSender))?;
        }

        self.cycles = cycle;
        debug!(parent: &self.span, cycle, empty = sample.is_empty(), "Cycle complete");
        Ok(())
    }

    /// Run one cycle, then sleep out the rest of the interval.
    async fn paced_cycle(&mut self) -> Result<(), DriverError> {
        let cycle_start = Instant::now();
        self.last_cycle_start = Some(cycle_start);
        self.cycle().await?;

        let elapsed = cycle_start.elapsed();
        match self.settings.interval.checked_sub(elapsed) {
            Some(delay) if !delay.is_zero() => tokio::time::sleep(delay).await,
            _ => warn!(
                parent: &self.span,
                cycle = self.cycles,
                elapsed_ms = elapsed.as_millis() as u64,
                interval_ms = self.settings.interval.as_millis() as u64,
                "Cycle overran the interval, starting the next one now"
            ),
        }
        Ok(())
    }

    /// Connect and cycle until something fails, then close both endpoints.
    pub async fn run(&mut self) -> DriverError {
        let err = match self.start().await {
            Ok(()) => loop {
                if let Err(e) = self.paced_cycle().await {
                    break e;
                }
            },
            Err(e) => e,
        };
        self.terminate(&err).await;
        err
    }

    /// Connect if needed and run `count` paced cycles.
    #[cfg(test)]
    async fn run_cycles(&mut self, count: u64) -> Result<(), DriverError> {
        if self.state == DriverState::Init {
            self.start().await?;
        }
        for _ in 0..count {
            self.paced_cycle().await?;
        }
        Ok(())
    }

    async fn terminate(&mut self, err: &DriverError) {
        let since_cycle_start_ms = self
            .last_cycle_start
            .map(|start| start.elapsed().as_millis() as u64);
        error!(parent: &self.span, cycles = self.cycles, ?since_cycle_start_ms, "{}", err);
        debug!(parent: &self.span, error = ?err, "Driver loop failure details");

        if let Err(e) = self.reader.close().await {
            warn!(parent: &self.span, error = %e, "Failed to close reader");
        }
        if let Err(e) = self.sender.close().await {
            warn!(parent: &self.span, error = %e, "Failed to close sender");
        }
        self.state = DriverState::Terminated;
    }
}

/// Build a reader, connect it, read once and close it.
///
/// A failed read is reported as a failure of cycle 1 at the read stage.
pub async fn read_once(
    registry: &Registry,
    reader: &EndpointConfig,
    span: &Span,
) -> Result<Sample, DriverError> {
    let mut endpoint = registry.create_reader(&reader.backend, &reader.init_args, span)?;
    endpoint
        .connect()
        .await
        .map_err(|source| DriverError::Connection {
            role: Role::Reader,
            source,
        })?;

    let sample = endpoint.read(&reader.op_args).await;
    if let Err(e) = endpoint.close().await {
        warn!(parent: span, error = %e, "Failed to close reader");
    }

    sample.map_err(|source| DriverError::Cycle {
        cycle: 1,
        stage: CycleStage::Read,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{Endpoint, Link, Operation};
    use crate::readers::{Pump, PumpReader};
    use crate::senders::StreamSender;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Returns the same sample every read, recording when each read began.
    struct FixedReader {
        link: Link,
        sample: Sample,
        body: Duration,
        fail_on_read: Option<u64>,
        refuse_connect: bool,
        reads: u64,
        connects: Arc<AtomicUsize>,
        starts: Arc<Mutex<Vec<Instant>>>,
    }

    impl FixedReader {
        fn new(sample: Sample) -> Self {
            Self {
                link: Link::new("FixedReader", Span::none()),
                sample,
                body: Duration::ZERO,
                fail_on_read: None,
                refuse_connect: false,
                reads: 0,
                connects: Arc::new(AtomicUsize::new(0)),
                starts: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl Endpoint for FixedReader {
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
            if self.refuse_connect {
                return Err(EndpointError::Connection("device offline".into()));
            }
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.link.mark_connected();
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<(), EndpointError> {
            if !self.link.admit(Operation::Disconnect)?.is_proceed() {
                return Ok(());
            }
            self.link.mark_disconnected();
            Ok(())
        }
    }

    #[async_trait]
    impl Reader for FixedReader {
        async fn read(&mut self, _args: &Args) -> Result<Sample, EndpointError> {
            if !self.link.admit(Operation::Read)?.is_proceed() {
                return Ok(Sample::Empty);
            }
            self.starts.lock().unwrap().push(Instant::now());
            self.reads += 1;
            if self.fail_on_read == Some(self.reads) {
                return Err(EndpointError::Read("sensor unplugged".into()));
            }
            tokio::time::sleep(self.body).await;
            Ok(self.sample.clone())
        }
    }

    /// Keeps every sample it is sent.
    struct RecordingSender {
        link: Link,
        received: Arc<Mutex<Vec<Sample>>>,
        reject: bool,
    }

    impl RecordingSender {
        fn new() -> Self {
            Self {
                link: Link::new("RecordingSender", Span::none()),
                received: Arc::new(Mutex::new(Vec::new())),
                reject: false,
            }
        }
    }

    #[async_trait]
    impl Endpoint for RecordingSender {
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
            self.link.mark_connected();
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<(), EndpointError> {
            if !self.link.admit(Operation::Disconnect)?.is_proceed() {
                return Ok(());
            }
            self.link.mark_disconnected();
            Ok(())
        }
    }

    #[async_trait]
    impl Sender for RecordingSender {
        async fn send(&mut self, sample: &Sample, _args: &Args) -> Result<(), EndpointError> {
            if !self.link.admit(Operation::Send)?.is_proceed() {
                return Ok(());
            }
            if self.reject {
                return Err(EndpointError::Transport("503".into()));
            }
            self.received.lock().unwrap().push(sample.clone());
            Ok(())
        }
    }

    fn driver(reader: FixedReader, sender: RecordingSender, interval_secs: u64) -> DriverLoop {
        DriverLoop::new(
            Box::new(reader),
            Box::new(sender),
            CycleSettings::new(Duration::from_secs(interval_secs)),
            Span::none(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_n_cycles_deliver_n_samples_in_order() {
        let reader = FixedReader::new(Sample::Text("foo".into()));
        let sender = RecordingSender::new();
        let received = sender.received.clone();
        let mut driver = driver(reader, sender, 1);
        assert_eq!(driver.state(), DriverState::Init);

        driver.run_cycles(5).await.unwrap();

        assert_eq!(driver.state(), DriverState::Cycling);
        assert_eq!(driver.cycles(), 5);
        let received = received.lock().unwrap();
        assert_eq!(received.len(), 5);
        assert!(received.iter().all(|s| *s == Sample::Text("foo".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycles_start_on_the_interval() {
        let mut reader = FixedReader::new(Sample::Text("x".into()));
        reader.body = Duration::from_millis(100);
        let starts = reader.starts.clone();
        let mut driver = driver(reader, RecordingSender::new(), 2);

        driver.run_cycles(3).await.unwrap();

        let starts = starts.lock().unwrap();
        for pair in starts.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_millis(1900), "gap {:?}", gap);
            assert!(gap <= Duration::from_millis(2100), "gap {:?}", gap);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrunning_cycle_starts_next_immediately() {
        let mut reader = FixedReader::new(Sample::Text("x".into()));
        reader.body = Duration::from_secs(3);
        let starts = reader.starts.clone();
        let mut driver = driver(reader, RecordingSender::new(), 2);

        driver.run_cycles(3).await.unwrap();

        let starts = starts.lock().unwrap();
        assert_eq!(starts.len(), 3);
        for pair in starts.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_secs(3));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_failure_ends_loop_with_cycle_error() {
        let mut reader = FixedReader::new(Sample::Text("x".into()));
        reader.fail_on_read = Some(3);
        let sender = RecordingSender::new();
        let received = sender.received.clone();
        let mut driver = driver(reader, sender, 1);

        let err = driver.run().await;

        assert!(matches!(
            err,
            DriverError::Cycle {
                cycle: 3,
                stage: CycleStage::Read,
                ..
            }
        ));
        assert!(!err.is_fatal());
        assert_eq!(driver.state(), DriverState::Terminated);
        assert_eq!(driver.cycles(), 2);
        assert_eq!(received.lock().unwrap().len(), 2);
        assert!(!driver.reader().is_connected());
        assert!(!driver.sender().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_is_reported() {
        let mut sender = RecordingSender::new();
        sender.reject = true;
        let mut driver = driver(FixedReader::new(Sample::Empty), sender, 1);

        let err = driver.run().await;
        assert!(matches!(
            err,
            DriverError::Cycle {
                cycle: 1,
                stage: CycleStage::Send,
                source: EndpointError::Transport(_),
            }
        ));
        assert_eq!(
            err.to_string(),
            "cycle 1 failed during send: transport rejected payload: 503"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_failure_is_reported() {
        let mut reader = FixedReader::new(Sample::Empty);
        reader.refuse_connect = true;
        let mut driver = driver(reader, RecordingSender::new(), 1);

        let err = driver.run().await;
        assert!(matches!(
            err,
            DriverError::Connection {
                role: Role::Reader,
                ..
            }
        ));
        assert_eq!(driver.state(), DriverState::Terminated);
        assert!(!driver.sender().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_after_read_reconnects_every_cycle() {
        let reader = FixedReader::new(Sample::Text("x".into()));
        let connects = reader.connects.clone();
        let sender = RecordingSender::new();
        let received = sender.received.clone();

        let mut settings = CycleSettings::new(Duration::from_secs(1));
        settings.disconnect_after_read = true;
        settings.disconnect_after_send = true;
        let mut driver = DriverLoop::new(Box::new(reader), Box::new(sender), settings, Span::none());

        driver.run_cycles(3).await.unwrap();

        assert_eq!(connects.load(Ordering::SeqCst), 3);
        assert_eq!(received.lock().unwrap().len(), 3);
        assert!(!driver.reader().is_connected());
        assert!(!driver.sender().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pump_survives_disconnect_after_read() {
        // Start transition outlasts the interval
        let reader = PumpReader::new(Pump::new(vec![Duration::from_secs(5)]), Span::none());
        let mut settings = CycleSettings::new(Duration::from_secs(2));
        settings.disconnect_after_read = true;
        let mut driver = DriverLoop::new(
            Box::new(reader),
            Box::new(StreamSender::new(Vec::new(), Span::none())),
            settings,
            Span::none(),
        );

        driver.run_cycles(6).await.unwrap();

        assert_eq!(driver.cycles(), 6);
        assert!(!driver.reader().is_connected());
    }

    #[tokio::test]
    async fn test_launch_with_unknown_backend_is_fatal() {
        let relay = RelayConfig {
            reader: EndpointConfig::new("nonexistent"),
            sender: EndpointConfig::new("stdout"),
            interval: Duration::from_secs(1),
            disconnect_after_read: false,
            disconnect_after_send: false,
        };

        let err = DriverLoop::launch(&Registry::builtin(), &relay, Span::none()).await;
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            DriverError::Construction(ConstructionError::UnknownBackend { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_once() {
        let registry = Registry::builtin();
        let sample = read_once(&registry, &EndpointConfig::new("foo"), &Span::none())
            .await
            .unwrap();
        assert_eq!(sample, Sample::Text("foo".into()));

        let mut serial = EndpointConfig::new("serial");
        serial
            .init_args
            .insert("port".into(), serde_json::json!("/nonexistent/ttyFAKE0"));
        let err = read_once(&registry, &serial, &Span::none()).await.unwrap_err();
        assert!(matches!(err, DriverError::Connection { .. }));
    }
}
