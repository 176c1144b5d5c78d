//! Reader for serial ports and other character devices.
//!
//! The device is opened on `connect` and closed on `disconnect`. Line
//! settings such as baud rate are left to the platform (`stty` or udev
//! rules); this reader only moves bytes.
//!
//! A read waits at most `timeout_secs` for its data. Whatever arrived by
//! then is returned, possibly nothing.

use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, Span};

use crate::endpoint::{parse_init, parse_op_args, Args, Endpoint, Link, Operation, Reader, Sample};
use crate::error::{ConstructionError, EndpointError, Role};
use crate::guard::PolicyKind;

/// How much to read per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadMode {
    /// Up to and including the next newline
    #[default]
    Line,

    /// At most `max_bytes` bytes
    Bytes,

    /// Up to and including the next `end_mark`
    Until,
}

fn default_max_bytes() -> usize {
    1
}

fn default_end_mark() -> String {
    "\n".to_string()
}

fn default_timeout_secs() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SerialSettings {
    port: PathBuf,

    #[serde(default)]
    read_mode: ReadMode,

    #[serde(default = "default_max_bytes")]
    max_bytes: usize,

    #[serde(default = "default_end_mark")]
    end_mark: String,

    /// Written to the device before every read to trigger a response
    #[serde(default)]
    read_command: Option<String>,

    /// Longest a read waits for data
    #[serde(default = "default_timeout_secs")]
    timeout_secs: f64,

    #[serde(default)]
    guard_policy: PolicyKind,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SerialReadArgs {
    /// Discard input this reader has buffered but not returned yet. Bytes
    /// still queued in the device driver are kept.
    #[serde(default)]
    flush: bool,
}

/// Reader for a character device such as `/dev/ttyUSB0`.
pub struct SerialReader {
    link: Link,
    port: PathBuf,
    read_mode: ReadMode,
    max_bytes: usize,
    end_mark: Vec<u8>,
    read_command: Option<String>,
    timeout: Duration,
    device: Option<BufReader<File>>,
}

impl SerialReader {
    pub const BACKEND: &'static str = "serial";

    /// Line reader on `port`.
    pub fn new(port: impl Into<PathBuf>, span: Span) -> Self {
        Self {
            link: Link::new("SerialReader", span),
            port: port.into(),
            read_mode: ReadMode::default(),
            max_bytes: default_max_bytes(),
            end_mark: default_end_mark().into_bytes(),
            read_command: None,
            timeout: Duration::from_secs_f64(default_timeout_secs()),
            device: None,
        }
    }

    pub fn from_args(args: &Args, span: Span) -> Result<Self, ConstructionError> {
        let settings: SerialSettings = parse_init(Role::Reader, Self::BACKEND, args)?;
        let invalid = |message: &str| ConstructionError::InvalidArguments {
            role: Role::Reader,
            backend: Self::BACKEND.to_string(),
            message: message.to_string(),
        };
        if settings.end_mark.is_empty() {
            return Err(invalid("end_mark must not be empty"));
        }
        if !settings.timeout_secs.is_finite() || settings.timeout_secs <= 0.0 {
            return Err(invalid("timeout_secs must be a positive number"));
        }

        Ok(Self {
            link: Link::new("SerialReader", span).with_policy(settings.guard_policy.into()),
            port: settings.port,
            read_mode: settings.read_mode,
            max_bytes: settings.max_bytes.max(1),
            end_mark: settings.end_mark.into_bytes(),
            read_command: settings.read_command,
            timeout: Duration::from_secs_f64(settings.timeout_secs),
            device: None,
        })
    }

    /// Append one unit of input to `data` following `mode`.
    ///
    /// Bytes land in `data` as they arrive, so a cancelled call leaves the
    /// partial input behind.
    async fn read_into(
        device: &mut BufReader<File>,
        mode: ReadMode,
        max_bytes: usize,
        end_mark: &[u8],
        data: &mut Vec<u8>,
    ) -> std::io::Result<()> {
        match mode {
            ReadMode::Line => {
                device.read_until(b'\n', data).await?;
            }
            ReadMode::Bytes => {
                let mut buf = vec![0u8; max_bytes];
                let n = device.read(&mut buf).await?;
                data.extend_from_slice(&buf[..n]);
            }
            ReadMode::Until => {
                let last = end_mark[end_mark.len() - 1];
                loop {
                    let n = device.read_until(last, data).await?;
                    if n == 0 || data.ends_with(end_mark) {
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Endpoint for SerialReader {
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
        let file = OpenOptions::new()
            .read(true)
            .write(self.read_command.is_some())
            .open(&self.port)
            .await
            .map_err(|e| {
                EndpointError::Connection(format!("cannot open {}: {}", self.port.display(), e))
            })?;

        info!(parent: self.link.span(), port = %self.port.display(), "Serial port opened");
        self.device = Some(BufReader::new(file));
        self.link.mark_connected();
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), EndpointError> {
        if !self.link.admit(Operation::Disconnect)?.is_proceed() {
            return Ok(());
        }
        self.device = None;
        info!(parent: self.link.span(), port = %self.port.display(), "Serial port closed");
        self.link.mark_disconnected();
        Ok(())
    }
}

#[async_trait]
impl Reader for SerialReader {
    async fn read(&mut self, args: &Args) -> Result<Sample, EndpointError> {
        if !self.link.admit(Operation::Read)?.is_proceed() {
            return Ok(Sample::Empty);
        }
        let options: SerialReadArgs = parse_op_args(args)?;
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| EndpointError::Read("serial device is not open".to_string()))?;

        if options.flush {
            let buffered = device.buffer().len();
            AsyncBufRead::consume(Pin::new(&mut *device), buffered);
        }

        if let Some(command) = &self.read_command {
            let port = device.get_mut();
            port.write_all(command.as_bytes()).await?;
            port.flush().await?;
        }

        let mut data = Vec::new();
        let read = Self::read_into(
            device,
            self.read_mode,
            self.max_bytes,
            &self.end_mark,
            &mut data,
        );
        let outcome = tokio::time::timeout(self.timeout, read).await;
        match outcome {
            Ok(result) => result?,
            Err(_) => debug!(
                parent: self.link.span(),
                timeout_ms = self.timeout.as_millis() as u64,
                received = data.len(),
                "Read timed out"
            ),
        }

        if data.is_empty() {
            debug!(parent: self.link.span(), "No data available");
            return Ok(Sample::Empty);
        }
        Ok(Sample::Text(String::from_utf8_lossy(&data).into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn device_with(content: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    fn args_for(file: &NamedTempFile, extra: serde_json::Value) -> Args {
        let mut args = Args::new();
        args.insert("port".into(), json!(file.path()));
        if let serde_json::Value::Object(map) = extra {
            args.extend(map);
        }
        args
    }

    #[tokio::test]
    async fn test_line_mode_reads_lines_until_eof() {
        let file = device_with(b"21.5\n22.0\n");
        let mut reader = SerialReader::new(file.path(), Span::none());
        assert!(!reader.is_connected());

        reader.connect().await.unwrap();
        assert!(reader.is_connected());

        let args = Args::new();
        assert_eq!(reader.read(&args).await.unwrap(), Sample::Text("21.5\n".into()));
        assert_eq!(reader.read(&args).await.unwrap(), Sample::Text("22.0\n".into()));
        assert!(reader.read(&args).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bytes_mode_respects_max_bytes() {
        let file = device_with(b"abcdef");
        let args = args_for(&file, json!({"read_mode": "bytes", "max_bytes": 4}));
        let mut reader = SerialReader::from_args(&args, Span::none()).unwrap();
        reader.connect().await.unwrap();

        assert_eq!(reader.read(&Args::new()).await.unwrap(), Sample::Text("abcd".into()));
        assert_eq!(reader.read(&Args::new()).await.unwrap(), Sample::Text("ef".into()));
    }

    #[tokio::test]
    async fn test_until_mode_multi_byte_mark() {
        let file = device_with(b"a;b;;c;;");
        let args = args_for(&file, json!({"read_mode": "until", "end_mark": ";;"}));
        let mut reader = SerialReader::from_args(&args, Span::none()).unwrap();
        reader.connect().await.unwrap();

        assert_eq!(reader.read(&Args::new()).await.unwrap(), Sample::Text("a;b;;".into()));
        assert_eq!(reader.read(&Args::new()).await.unwrap(), Sample::Text("c;;".into()));
    }

    #[tokio::test]
    async fn test_flush_discards_buffered_input() {
        let file = device_with(b"stale\nfresh\n");
        let mut reader = SerialReader::new(file.path(), Span::none());
        reader.connect().await.unwrap();

        // The first read pulls the whole file into the buffer
        assert_eq!(reader.read(&Args::new()).await.unwrap(), Sample::Text("stale\n".into()));

        let mut flush = Args::new();
        flush.insert("flush".into(), json!(true));
        assert!(reader.read(&flush).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_device_is_connection_error() {
        let mut reader = SerialReader::new("/nonexistent/ttyFAKE0", Span::none());
        let err = reader.connect().await.unwrap_err();
        assert!(matches!(err, EndpointError::Connection(_)));
        assert!(!reader.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_twice_is_absorbed() {
        let file = device_with(b"x\n");
        let mut reader = SerialReader::new(file.path(), Span::none());
        reader.connect().await.unwrap();
        reader.disconnect().await.unwrap();
        reader.disconnect().await.unwrap();
        assert!(!reader.is_connected());
    }

    #[test]
    fn test_settings_validation() {
        let file = device_with(b"");
        let args = args_for(&file, json!({"end_mark": ""}));
        assert!(SerialReader::from_args(&args, Span::none()).is_err());

        let args = args_for(&file, json!({"read_mode": "words"}));
        assert!(SerialReader::from_args(&args, Span::none()).is_err());

        let args = args_for(&file, json!({"max_bytes": 0}));
        let reader = SerialReader::from_args(&args, Span::none()).unwrap();
        assert_eq!(reader.max_bytes, 1);
        assert_eq!(reader.timeout, Duration::from_secs(1));

        for bad in [json!(0), json!(-1.5)] {
            let args = args_for(&file, json!({"timeout_secs": bad}));
            assert!(SerialReader::from_args(&args, Span::none()).is_err());
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_silent_device_times_out_then_delivers() {
        use std::sync::mpsc;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tty");
        let status = std::process::Command::new("mkfifo").arg(&path).status().unwrap();
        assert!(status.success());

        // Opening a fifo blocks until both ends are present, so the writer
        // lives on its own thread and is fed over a channel.
        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        let writer_path = path.clone();
        let writer = std::thread::spawn(move || {
            let mut fifo = std::fs::OpenOptions::new().write(true).open(writer_path).unwrap();
            for chunk in rx {
                fifo.write_all(&chunk).unwrap();
                fifo.flush().unwrap();
            }
        });

        let mut args = Args::new();
        args.insert("port".into(), json!(path));
        args.insert("timeout_secs".into(), json!(0.2));
        let mut reader = SerialReader::from_args(&args, Span::none()).unwrap();
        reader.connect().await.unwrap();

        let silent = tokio::time::timeout(Duration::from_secs(5), reader.read(&Args::new()))
            .await
            .expect("read must give up on its own");
        assert!(silent.unwrap().is_empty());

        tx.send(b"late\n".to_vec()).unwrap();
        drop(tx);
        writer.join().unwrap();

        let sample = reader.read(&Args::new()).await.unwrap();
        assert_eq!(sample, Sample::Text("late\n".into()));
        reader.disconnect().await.unwrap();
    }
}
