//! Readers that build their sample from a generator scheme.
//!
//! A scheme is written as JSON. Objects and arrays keep their shape, string
//! leaves name a generator, and any other leaf is copied as a constant:
//!
//! ```json
//! { "ts": "timestamp", "d": { "rnd": "random", "n": "int:0:10" }, "unit": "=lux", "v": 2 }
//! ```
//!
//! | leaf            | produces                                |
//! |-----------------|-----------------------------------------|
//! | `timestamp`     | RFC 3339 UTC time of the read           |
//! | `random`        | float in `[0, 1)`                       |
//! | `uuid`          | random v4 UUID                          |
//! | `sequence`      | read counter starting at 1              |
//! | `int:<lo>:<hi>` | integer in `[lo, hi]`                   |
//! | `=<text>`       | the literal string `<text>`             |

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, Span};
use uuid::Uuid;

use crate::endpoint::{parse_init, Args, Endpoint, Link, Operation, Reader, Sample};
use crate::error::{ConstructionError, EndpointError, Role};
use crate::guard::{OnViolation, PolicyKind};

/// Value generator at a scheme leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generator {
    Timestamp,
    Random,
    Uuid,
    Sequence,
    IntRange { low: i64, high: i64 },
}

impl Generator {
    fn parse(name: &str) -> Result<Self, String> {
        match name {
            "timestamp" => Ok(Generator::Timestamp),
            "random" => Ok(Generator::Random),
            "uuid" => Ok(Generator::Uuid),
            "sequence" => Ok(Generator::Sequence),
            other => {
                let bounds = other
                    .strip_prefix("int:")
                    .ok_or_else(|| format!("unknown generator '{}'", other))?;
                let (low, high) = bounds
                    .split_once(':')
                    .ok_or_else(|| format!("generator '{}' needs int:<lo>:<hi>", other))?;
                let low: i64 = low
                    .parse()
                    .map_err(|_| format!("'{}' is not a valid lower bound", low))?;
                let high: i64 = high
                    .parse()
                    .map_err(|_| format!("'{}' is not a valid upper bound", high))?;
                if low > high {
                    return Err(format!("empty range {}..={}", low, high));
                }
                Ok(Generator::IntRange { low, high })
            }
        }
    }

    fn generate(&self, rng: &mut impl Rng, sequence: u64) -> Value {
        match self {
            Generator::Timestamp => {
                Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
            }
            Generator::Random => json!(rng.gen::<f64>()),
            Generator::Uuid => Value::String(Uuid::new_v4().to_string()),
            Generator::Sequence => json!(sequence),
            Generator::IntRange { low, high } => json!(rng.gen_range(*low..=*high)),
        }
    }
}

/// Parsed generator scheme.
#[derive(Debug, Clone, PartialEq)]
pub enum Scheme {
    Object(Vec<(String, Scheme)>),
    List(Vec<Scheme>),
    Generate(Generator),
    Constant(Value),
}

impl Scheme {
    /// Parse a JSON scheme, rejecting unknown generator names.
    pub fn parse(value: &Value) -> Result<Self, String> {
        match value {
            Value::Object(map) => map
                .iter()
                .map(|(key, child)| Ok((key.clone(), Scheme::parse(child)?)))
                .collect::<Result<Vec<_>, String>>()
                .map(Scheme::Object),
            Value::Array(items) => items
                .iter()
                .map(Scheme::parse)
                .collect::<Result<Vec<_>, String>>()
                .map(Scheme::List),
            Value::String(text) => match text.strip_prefix('=') {
                Some(literal) => Ok(Scheme::Constant(Value::String(literal.to_string()))),
                None => Generator::parse(text).map(Scheme::Generate),
            },
            other => Ok(Scheme::Constant(other.clone())),
        }
    }

    /// `{"ts": timestamp, "d": {"rnd": random}}`
    pub fn random() -> Self {
        Scheme::Object(vec![
            ("ts".to_string(), Scheme::Generate(Generator::Timestamp)),
            (
                "d".to_string(),
                Scheme::Object(vec![(
                    "rnd".to_string(),
                    Scheme::Generate(Generator::Random),
                )]),
            ),
        ])
    }

    /// Produce one value following the scheme.
    pub fn evaluate(&self, rng: &mut impl Rng, sequence: u64) -> Value {
        match self {
            Scheme::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(key, child)| (key.clone(), child.evaluate(rng, sequence)))
                    .collect(),
            ),
            Scheme::List(items) => {
                Value::Array(items.iter().map(|item| item.evaluate(rng, sequence)).collect())
            }
            Scheme::Generate(generator) => generator.generate(rng, sequence),
            Scheme::Constant(value) => value.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SchemeSettings {
    scheme: Value,
    #[serde(default)]
    guard_policy: PolicyKind,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RandomSettings {
    #[serde(default)]
    guard_policy: PolicyKind,
}

/// Reader returning the output of a [`Scheme`] on every read.
pub struct SchemeReader {
    link: Link,
    scheme: Scheme,
    reads: u64,
}

impl SchemeReader {
    pub const BACKEND: &'static str = "scheme";
    pub const RANDOM_BACKEND: &'static str = "random";

    pub fn new(scheme: Scheme, span: Span) -> Self {
        Self::named("SchemeReader", scheme, span, OnViolation::default())
    }

    /// The `random` backend: a timestamped random number.
    pub fn random(span: Span) -> Self {
        Self::named("RandomReader", Scheme::random(), span, OnViolation::default())
    }

    fn named(name: &str, scheme: Scheme, span: Span, policy: OnViolation) -> Self {
        Self {
            link: Link::new(name, span).with_policy(policy),
            scheme,
            reads: 0,
        }
    }

    pub fn from_args(args: &Args, span: Span) -> Result<Self, ConstructionError> {
        let settings: SchemeSettings = parse_init(Role::Reader, Self::BACKEND, args)?;
        let scheme =
            Scheme::parse(&settings.scheme).map_err(|message| ConstructionError::InvalidArguments {
                role: Role::Reader,
                backend: Self::BACKEND.to_string(),
                message,
            })?;
        Ok(Self::named(
            "SchemeReader",
            scheme,
            span,
            settings.guard_policy.into(),
        ))
    }

    pub fn random_from_args(args: &Args, span: Span) -> Result<Self, ConstructionError> {
        let settings: RandomSettings = parse_init(Role::Reader, Self::RANDOM_BACKEND, args)?;
        Ok(Self::named(
            "RandomReader",
            Scheme::random(),
            span,
            settings.guard_policy.into(),
        ))
    }
}

#[async_trait]
impl Endpoint for SchemeReader {
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
        info!(parent: self.link.span(), "Connecting to {}.", self.link.name());
        self.link.mark_connected();
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), EndpointError> {
        if !self.link.admit(Operation::Disconnect)?.is_proceed() {
            return Ok(());
        }
        info!(parent: self.link.span(), "Disconnecting from {}.", self.link.name());
        self.link.mark_disconnected();
        Ok(())
    }
}

#[async_trait]
impl Reader for SchemeReader {
    async fn read(&mut self, _args: &Args) -> Result<Sample, EndpointError> {
        if !self.link.admit(Operation::Read)?.is_proceed() {
            return Ok(Sample::Empty);
        }
        self.reads += 1;
        let value = self.scheme.evaluate(&mut rand::thread_rng(), self.reads);
        debug!(parent: self.link.span(), data = %value, "{} read data", self.link.name());
        Ok(Sample::Record(value))
    }
}
