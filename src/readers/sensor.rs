//! Simulated edge sensor reader.
//!
//! Each read produces one reading record for a sensor type, with a severity
//! picked from a weighted distribution (mostly normal, occasional warning or
//! critical) and a value drawn from the range that matches that severity.

use async_trait::async_trait;
use chrono::Utc;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, Span};
use uuid::Uuid;

use crate::endpoint::{parse_init, Args, Endpoint, Link, Operation, Reader, Sample};
use crate::error::{ConstructionError, EndpointError, Role};
use crate::guard::PolicyKind;

/// Severity of a simulated reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Normal,
    Warning,
    Critical,
}

impl Severity {
    pub fn all() -> &'static [Severity] {
        &[Severity::Normal, Severity::Warning, Severity::Critical]
    }
}

/// Kinds of simulated sensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    Temperature,
    Humidity,
    Pressure,
    Motion,
    Light,
    Vibration,
    AirQuality,
    Power,
}

impl SensorType {
    pub fn all() -> &'static [SensorType] {
        &[
            SensorType::Temperature,
            SensorType::Humidity,
            SensorType::Pressure,
            SensorType::Motion,
            SensorType::Light,
            SensorType::Vibration,
            SensorType::AirQuality,
            SensorType::Power,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            SensorType::Temperature => "temperature",
            SensorType::Humidity => "humidity",
            SensorType::Pressure => "pressure",
            SensorType::Motion => "motion",
            SensorType::Light => "light",
            SensorType::Vibration => "vibration",
            SensorType::AirQuality => "air_quality",
            SensorType::Power => "power",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            SensorType::Temperature => "celsius",
            SensorType::Humidity => "percent",
            SensorType::Pressure => "hpa",
            SensorType::Motion => "detected",
            SensorType::Light => "lux",
            SensorType::Vibration => "g",
            SensorType::AirQuality => "aqi",
            SensorType::Power => "watts",
        }
    }

    /// Draw a value in the band that belongs to `severity`.
    ///
    /// Warning and critical bands lie on both sides of the normal band where
    /// the quantity can go wrong in either direction.
    pub fn sample_value(&self, rng: &mut impl Rng, severity: Severity) -> f64 {
        let either = |rng: &mut dyn rand::RngCore, low: (f64, f64), high: (f64, f64)| {
            let (a, b) = if rng.gen_bool(0.5) { low } else { high };
            rng.gen_range(a..b)
        };

        match (self, severity) {
            (SensorType::Temperature, Severity::Normal) => rng.gen_range(18.0..26.0),
            (SensorType::Temperature, Severity::Warning) => either(rng, (10.0, 18.0), (26.0, 35.0)),
            (SensorType::Temperature, Severity::Critical) => {
                either(rng, (-10.0, 10.0), (35.0, 50.0))
            }
            (SensorType::Humidity, Severity::Normal) => rng.gen_range(30.0..70.0),
            (SensorType::Humidity, Severity::Warning) => either(rng, (15.0, 30.0), (70.0, 85.0)),
            (SensorType::Humidity, Severity::Critical) => either(rng, (0.0, 15.0), (85.0, 100.0)),
            (SensorType::Pressure, Severity::Normal) => rng.gen_range(1000.0..1025.0),
            (SensorType::Pressure, Severity::Warning) => {
                either(rng, (980.0, 1000.0), (1025.0, 1040.0))
            }
            (SensorType::Pressure, Severity::Critical) => {
                either(rng, (950.0, 980.0), (1040.0, 1060.0))
            }
            (SensorType::Motion, _) => {
                if rng.gen_bool(0.3) {
                    1.0
                } else {
                    0.0
                }
            }
            (SensorType::Light, Severity::Normal) => rng.gen_range(300.0..700.0),
            (SensorType::Light, Severity::Warning) => either(rng, (10.0, 100.0), (1000.0, 2000.0)),
            (SensorType::Light, Severity::Critical) => rng.gen_range(0.0..10.0),
            (SensorType::Vibration, Severity::Normal) => rng.gen_range(0.0..0.5),
            (SensorType::Vibration, Severity::Warning) => rng.gen_range(0.5..2.0),
            (SensorType::Vibration, Severity::Critical) => rng.gen_range(2.0..5.0),
            (SensorType::AirQuality, Severity::Normal) => rng.gen_range(0..50) as f64,
            (SensorType::AirQuality, Severity::Warning) => rng.gen_range(100..200) as f64,
            (SensorType::AirQuality, Severity::Critical) => rng.gen_range(200..500) as f64,
            (SensorType::Power, Severity::Normal) => rng.gen_range(50.0..500.0),
            (SensorType::Power, Severity::Warning) => rng.gen_range(500.0..1000.0),
            (SensorType::Power, Severity::Critical) => rng.gen_range(1000.0..2000.0),
        }
    }
}

fn default_sensors_per_type() -> usize {
    3
}

fn default_weights() -> [u32; 3] {
    // Normal: 80%, Warning: 15%, Critical: 5%
    [80, 15, 5]
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SensorSettings {
    /// Fixed sensor type; a random type per read when absent
    #[serde(default)]
    sensor_type: Option<SensorType>,

    #[serde(default = "default_sensors_per_type")]
    sensors_per_type: usize,

    /// Relative weights of normal, warning and critical readings
    #[serde(default = "default_weights")]
    severity_weights: [u32; 3],

    #[serde(default)]
    guard_policy: PolicyKind,
}

/// Reader producing simulated sensor reading records.
pub struct SensorReader {
    link: Link,
    sensor_type: Option<SensorType>,
    sensors_per_type: usize,
    severity_weights: WeightedIndex<u32>,
}

impl SensorReader {
    pub const BACKEND: &'static str = "sensor";

    /// Empty `args` give random sensor types, three sensors per type and
    /// mostly normal readings.
    pub fn from_args(args: &Args, span: Span) -> Result<Self, ConstructionError> {
        let settings: SensorSettings = parse_init(Role::Reader, Self::BACKEND, args)?;
        Self::from_settings(settings, span).map_err(|message| {
            ConstructionError::InvalidArguments {
                role: Role::Reader,
                backend: Self::BACKEND.to_string(),
                message,
            }
        })
    }

    fn from_settings(settings: SensorSettings, span: Span) -> Result<Self, String> {
        if settings.sensors_per_type == 0 {
            return Err("sensors_per_type must be greater than 0".to_string());
        }
        let severity_weights = WeightedIndex::new(settings.severity_weights)
            .map_err(|e| format!("invalid severity weights: {}", e))?;

        Ok(Self {
            link: Link::new("SensorReader", span).with_policy(settings.guard_policy.into()),
            sensor_type: settings.sensor_type,
            sensors_per_type: settings.sensors_per_type,
            severity_weights,
        })
    }

    /// Generate one reading record.
    pub fn generate(&self, rng: &mut impl Rng) -> serde_json::Value {
        let sensor_type = self.sensor_type.unwrap_or_else(|| {
            let types = SensorType::all();
            types[rng.gen_range(0..types.len())]
        });
        let instance = rng.gen_range(1..=self.sensors_per_type);
        let severity = Severity::all()[self.severity_weights.sample(rng)];
        let value = sensor_type.sample_value(rng, severity);

        json!({
            "id": Uuid::new_v4(),
            "timestamp": Utc::now(),
            "source_id": format!("edge-{}-{:03}", sensor_type.name(), instance),
            "sensor_type": sensor_type,
            "unit": sensor_type.unit(),
            "value": value,
            "severity": severity,
        })
    }
}

#[async_trait]
impl Endpoint for SensorReader {
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
        info!(parent: self.link.span(), sensor_type = ?self.sensor_type, "Connecting to simulated sensors");
        self.link.mark_connected();
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), EndpointError> {
        if !self.link.admit(Operation::Disconnect)?.is_proceed() {
            return Ok(());
        }
        info!(parent: self.link.span(), "Disconnecting from simulated sensors");
        self.link.mark_disconnected();
        Ok(())
    }
}

#[async_trait]
impl Reader for SensorReader {
    async fn read(&mut self, _args: &Args) -> Result<Sample, EndpointError> {
        if !self.link.admit(Operation::Read)?.is_proceed() {
            return Ok(Sample::Empty);
        }
        let record = self.generate(&mut rand::thread_rng());
        debug!(parent: self.link.span(), source_id = %record["source_id"], "Generated sensor reading");
        Ok(Sample::Record(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_type_names_and_units() {
        assert_eq!(SensorType::AirQuality.name(), "air_quality");
        assert_eq!(SensorType::Humidity.name(), "humidity");
        assert_eq!(SensorType::Temperature.unit(), "celsius");
        assert_eq!(SensorType::Light.unit(), "lux");
        assert_eq!(
            serde_json::to_string(&SensorType::AirQuality).unwrap(),
            r#""air_quality""#
        );
    }

    #[test]
    fn test_values_stay_in_severity_band() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let normal = SensorType::Temperature.sample_value(&mut rng, Severity::Normal);
            assert!((18.0..26.0).contains(&normal));

            let critical = SensorType::Vibration.sample_value(&mut rng, Severity::Critical);
            assert!((2.0..5.0).contains(&critical));

            let warning = SensorType::Humidity.sample_value(&mut rng, Severity::Warning);
            assert!((15.0..30.0).contains(&warning) || (70.0..85.0).contains(&warning));
        }
    }

    #[test]
    fn test_generated_record_fields() {
        let reader = SensorReader::from_args(&Args::new(), Span::none()).unwrap();
        let record = reader.generate(&mut rand::thread_rng());

        assert!(record["id"].is_string());
        assert!(record["value"].is_number());
        let source_id = record["source_id"].as_str().unwrap();
        assert!(source_id.starts_with("edge-"));
        let suffix = source_id.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 3);
        assert!(suffix.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_fixed_sensor_type_from_args() {
        let mut args = Args::new();
        args.insert("sensor_type".into(), json!("power"));
        args.insert("severity_weights".into(), json!([0, 0, 1]));
        let reader = SensorReader::from_args(&args, Span::none()).unwrap();

        let record = reader.generate(&mut rand::thread_rng());
        assert_eq!(record["sensor_type"], json!("power"));
        assert_eq!(record["unit"], json!("watts"));
        assert_eq!(record["severity"], json!("critical"));
        assert!(record["value"].as_f64().unwrap() >= 1000.0);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let mut args = Args::new();
        args.insert("sensors_per_type".into(), json!(0));
        assert!(SensorReader::from_args(&args, Span::none()).is_err());

        let mut args = Args::new();
        args.insert("severity_weights".into(), json!([0, 0, 0]));
        assert!(SensorReader::from_args(&args, Span::none()).is_err());
    }

    #[tokio::test]
    async fn test_read_requires_connection() {
        let mut reader = SensorReader::from_args(&Args::new(), Span::none()).unwrap();
        assert!(!reader.is_connected());
        assert!(reader.read(&Args::new()).await.unwrap().is_empty());

        reader.connect().await.unwrap();
        let sample = reader.read(&Args::new()).await.unwrap();
        assert!(matches!(sample, Sample::Record(_)));
    }
}
