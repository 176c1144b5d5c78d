//! Runtime configuration.
//!
//! Built from the parsed command line, with supervisor and logging settings
//! falling back to environment variables and then to defaults:
//!
//! - `READERSENDER_MAX_RESTARTS`: restarts before giving up (default: 20)
//! - `READERSENDER_RESTART_DELAY_SECS`: seconds between restarts (default: 60)
//! - `READERSENDER_LOG_DIR`: directory for log files (default: current directory)
//!
//! Command line flags win over the environment.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::cli::Cli;
use crate::endpoint::Args;

const DEFAULT_MAX_RESTARTS: u32 = 20;

/// Upper bound on the restart budget
const MAX_MAX_RESTARTS: u32 = 10_000;

const DEFAULT_RESTART_DELAY_SECS: u64 = 60;

const MIN_RESTART_DELAY_SECS: u64 = 1;

/// One day
const MAX_RESTART_DELAY_SECS: u64 = 86_400;

/// Rotated log files kept on disk, including the current one
const DEFAULT_MAX_LOG_FILES: usize = 4;

const ENV_MAX_RESTARTS: &str = "READERSENDER_MAX_RESTARTS";
const ENV_RESTART_DELAY_SECS: &str = "READERSENDER_RESTART_DELAY_SECS";
const ENV_LOG_DIR: &str = "READERSENDER_LOG_DIR";

/// Backend name plus its construction and per-call arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EndpointConfig {
    pub backend: String,
    pub init_args: Args,
    pub op_args: Args,
}

impl EndpointConfig {
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            ..Self::default()
        }
    }
}

/// What the driver loop relays and how often.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    pub reader: EndpointConfig,
    pub sender: EndpointConfig,
    pub interval: Duration,
    pub disconnect_after_read: bool,
    pub disconnect_after_send: bool,
}

/// Restart budget of the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub max_restarts: u32,
    pub restart_delay: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_restarts: DEFAULT_MAX_RESTARTS,
            restart_delay: Duration::from_secs(DEFAULT_RESTART_DELAY_SECS),
        }
    }
}

/// Log destination and verbosity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Force the `debug` level, ignoring `RUST_LOG`
    pub debug: bool,

    /// Log to stdout instead of files
    pub stdout: bool,

    pub directory: PathBuf,

    /// Log file name prefix, `<prefix>.<date>.log` on disk
    pub file_prefix: String,

    pub max_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            stdout: false,
            directory: PathBuf::from("."),
            file_prefix: "readersender".to_string(),
            max_files: DEFAULT_MAX_LOG_FILES,
        }
    }
}

/// Complete configuration of the `readersender` binary.
#[derive(Debug, Clone)]
pub struct Config {
    pub relay: RelayConfig,
    pub supervisor: SupervisorConfig,
    pub logging: LogConfig,
}

/// Error type for configuration loading failures
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub env_var: Option<String>,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.env_var {
            Some(var) => write!(f, "Configuration error for {}: {}", var, self.message),
            None => write!(f, "Configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Combine the command line with the environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the interval is zero or an environment
    /// variable does not parse or falls outside its allowed range.
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        if cli.interval == 0 {
            return Err(ConfigError {
                message: "interval must be at least 1 second".to_string(),
                env_var: None,
            });
        }

        let max_restarts = match cli.max_restarts {
            Some(value) => check_max_restarts(value, None)?,
            None => parse_max_restarts()?,
        };
        let restart_delay_secs = match cli.restart_delay {
            Some(value) => check_restart_delay(value, None)?,
            None => parse_restart_delay()?,
        };
        let directory = cli
            .log_dir
            .or_else(|| env::var_os(ENV_LOG_DIR).map(PathBuf::from))
            .unwrap_or_else(|| LogConfig::default().directory);

        Ok(Self {
            relay: RelayConfig {
                reader: EndpointConfig {
                    backend: cli.reader,
                    init_args: cli.reader_init_args.unwrap_or_default(),
                    op_args: cli.read_args.unwrap_or_default(),
                },
                sender: EndpointConfig {
                    backend: cli.sender,
                    init_args: cli.sender_init_args.unwrap_or_default(),
                    op_args: cli.send_args.unwrap_or_default(),
                },
                interval: Duration::from_secs(cli.interval),
                disconnect_after_read: cli.disconnect_after_read,
                disconnect_after_send: cli.disconnect_after_send,
            },
            supervisor: SupervisorConfig {
                max_restarts,
                restart_delay: Duration::from_secs(restart_delay_secs),
            },
            logging: LogConfig {
                debug: cli.debug,
                stdout: cli.stdout,
                directory,
                ..LogConfig::default()
            },
        })
    }
}

fn parse_max_restarts() -> Result<u32, ConfigError> {
    match env::var(ENV_MAX_RESTARTS) {
        Ok(value) => {
            let restarts: u32 = value.parse().map_err(|_| ConfigError {
                message: format!("'{}' is not a valid number", value),
                env_var: Some(ENV_MAX_RESTARTS.to_string()),
            })?;
            check_max_restarts(restarts, Some(ENV_MAX_RESTARTS))
        }
        Err(_) => Ok(DEFAULT_MAX_RESTARTS),
    }
}

fn check_max_restarts(restarts: u32, env_var: Option<&str>) -> Result<u32, ConfigError> {
    if restarts > MAX_MAX_RESTARTS {
        return Err(ConfigError {
            message: format!(
                "max restarts {} exceeds maximum allowed ({})",
                restarts, MAX_MAX_RESTARTS
            ),
            env_var: env_var.map(str::to_string),
        });
    }
    Ok(restarts)
}

fn parse_restart_delay() -> Result<u64, ConfigError> {
    match env::var(ENV_RESTART_DELAY_SECS) {
        Ok(value) => {
            let delay: u64 = value.parse().map_err(|_| ConfigError {
                message: format!("'{}' is not a valid number", value),
                env_var: Some(ENV_RESTART_DELAY_SECS.to_string()),
            })?;
            check_restart_delay(delay, Some(ENV_RESTART_DELAY_SECS))
        }
        Err(_) => Ok(DEFAULT_RESTART_DELAY_SECS),
    }
}

fn check_restart_delay(delay: u64, env_var: Option<&str>) -> Result<u64, ConfigError> {
    if delay < MIN_RESTART_DELAY_SECS {
        return Err(ConfigError {
            message: format!(
                "restart delay {} is below minimum ({}s)",
                delay, MIN_RESTART_DELAY_SECS
            ),
            env_var: env_var.map(str::to_string),
        });
    }
    if delay > MAX_RESTART_DELAY_SECS {
        return Err(ConfigError {
            message: format!(
                "restart delay {} exceeds maximum ({}s)",
                delay, MAX_RESTART_DELAY_SECS
            ),
            env_var: env_var.map(str::to_string),
        });
    }
    Ok(delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use serde_json::json;
    use std::sync::Mutex;

    /// Tests touching the process environment run one at a time.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // Helper to temporarily set environment variables for testing
    struct EnvGuard {
        key: String,
        original: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &str, value: &str) -> Self {
            let original = env::var(key).ok();
            env::set_var(key, value);
            Self {
                key: key.to_string(),
                original,
            }
        }

        fn remove(key: &str) -> Self {
            let original = env::var(key).ok();
            env::remove_var(key);
            Self {
                key: key.to_string(),
                original,
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.original {
                Some(val) => env::set_var(&self.key, val),
                None => env::remove_var(&self.key),
            }
        }
    }

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["readersender"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    fn clean_env() -> [EnvGuard; 3] {
        [
            EnvGuard::remove(ENV_MAX_RESTARTS),
            EnvGuard::remove(ENV_RESTART_DELAY_SECS),
            EnvGuard::remove(ENV_LOG_DIR),
        ]
    }

    #[test]
    fn test_defaults() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _env = clean_env();

        let config = Config::from_cli(cli(&["random", "stdout", "2"])).unwrap();
        assert_eq!(config.relay.reader, EndpointConfig::new("random"));
        assert_eq!(config.relay.sender, EndpointConfig::new("stdout"));
        assert_eq!(config.relay.interval, Duration::from_secs(2));
        assert!(!config.relay.disconnect_after_read);
        assert_eq!(config.supervisor, SupervisorConfig::default());
        assert_eq!(config.supervisor.max_restarts, 20);
        assert_eq!(config.supervisor.restart_delay, Duration::from_secs(60));
        assert_eq!(config.logging, LogConfig::default());
        assert_eq!(config.logging.max_files, 4);
    }

    #[test]
    fn test_cli_arguments_flow_into_relay() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _env = clean_env();

        let config = Config::from_cli(cli(&[
            "serial",
            "http",
            "1",
            "--reader-init-args",
            r#"{"port": "/dev/ttyS0"}"#,
            "--read-args",
            r#"{"flush": true}"#,
            "--sender-init-args",
            r#"{"url": "http://localhost:8000/ingest"}"#,
            "--disconnect-after-read",
            "--stdout",
            "--debug",
        ]))
        .unwrap();

        assert_eq!(config.relay.reader.init_args["port"], json!("/dev/ttyS0"));
        assert_eq!(config.relay.reader.op_args["flush"], json!(true));
        assert!(config.relay.sender.op_args.is_empty());
        assert!(config.relay.disconnect_after_read);
        assert!(config.logging.stdout);
        assert!(config.logging.debug);
    }

    #[test]
    fn test_env_values() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _env = clean_env();
        let _restarts = EnvGuard::set(ENV_MAX_RESTARTS, "5");
        let _delay = EnvGuard::set(ENV_RESTART_DELAY_SECS, "10");
        let _dir = EnvGuard::set(ENV_LOG_DIR, "/var/log/readersender");

        let config = Config::from_cli(cli(&["foo", "foo", "1"])).unwrap();
        assert_eq!(config.supervisor.max_restarts, 5);
        assert_eq!(config.supervisor.restart_delay, Duration::from_secs(10));
        assert_eq!(
            config.logging.directory,
            PathBuf::from("/var/log/readersender")
        );
    }

    #[test]
    fn test_cli_overrides_env() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _env = clean_env();
        let _restarts = EnvGuard::set(ENV_MAX_RESTARTS, "not_a_number");
        let _delay = EnvGuard::set(ENV_RESTART_DELAY_SECS, "10");

        let config = Config::from_cli(cli(&[
            "foo",
            "foo",
            "1",
            "--max-restarts",
            "0",
            "--restart-delay",
            "3",
            "--log-dir",
            "/tmp/logs",
        ]))
        .unwrap();
        assert_eq!(config.supervisor.max_restarts, 0);
        assert_eq!(config.supervisor.restart_delay, Duration::from_secs(3));
        assert_eq!(config.logging.directory, PathBuf::from("/tmp/logs"));
    }

    #[test]
    fn test_invalid_max_restarts() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _env = clean_env();
        let _guard = EnvGuard::set(ENV_MAX_RESTARTS, "not_a_number");

        let err = Config::from_cli(cli(&["foo", "foo", "1"])).unwrap_err();
        assert!(err.message.contains("not a valid number"));
        assert_eq!(err.env_var.as_deref(), Some(ENV_MAX_RESTARTS));
    }

    #[test]
    fn test_max_restarts_exceeds_max() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _env = clean_env();
        let _guard = EnvGuard::set(ENV_MAX_RESTARTS, "99999");

        let err = Config::from_cli(cli(&["foo", "foo", "1"])).unwrap_err();
        assert!(err.message.contains("exceeds maximum"));
    }

    #[test]
    fn test_restart_delay_bounds() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _env = clean_env();

        {
            let _guard = EnvGuard::set(ENV_RESTART_DELAY_SECS, "0");
            let err = Config::from_cli(cli(&["foo", "foo", "1"])).unwrap_err();
            assert!(err.message.contains("below minimum"));
        }

        let err = Config::from_cli(cli(&["foo", "foo", "1", "--restart-delay", "100000"]))
            .unwrap_err();
        assert!(err.message.contains("exceeds maximum"));
        assert!(err.env_var.is_none());
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError {
            message: "test error".to_string(),
            env_var: Some("TEST_VAR".to_string()),
        };
        assert_eq!(
            format!("{}", error),
            "Configuration error for TEST_VAR: test error"
        );

        let error_no_var = ConfigError {
            message: "general error".to_string(),
            env_var: None,
        };
        assert_eq!(
            format!("{}", error_no_var),
            "Configuration error: general error"
        );
    }
}
