//! Name to factory map for reader and sender backends.
//!
//! Names are matched case-insensitively. Each factory receives the init
//! arguments and a span already scoped to the component it builds.

use std::collections::BTreeMap;

use tracing::{debug, info_span, Span};

use crate::endpoint::{Args, Reader, Sender};
use crate::error::{ConstructionError, Role};
use crate::readers::{FooReader, PumpReader, SchemeReader, SensorReader, SerialReader};
use crate::senders::{HttpSender, StdoutSender};

pub type ReaderFactory =
    Box<dyn Fn(&Args, Span) -> Result<Box<dyn Reader>, ConstructionError> + Send + Sync>;

pub type SenderFactory =
    Box<dyn Fn(&Args, Span) -> Result<Box<dyn Sender>, ConstructionError> + Send + Sync>;

/// Registered backends.
pub struct Registry {
    readers: BTreeMap<String, ReaderFactory>,
    senders: BTreeMap<String, SenderFactory>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            readers: BTreeMap::new(),
            senders: BTreeMap::new(),
        }
    }

    /// Registry with every built-in backend.
    pub fn builtin() -> Self {
        let mut registry = Self::new();

        registry.register_reader(FooReader::BACKEND, |args, span| {
            Ok(Box::new(FooReader::from_args(args, span)?))
        });
        registry.register_reader(SchemeReader::BACKEND, |args, span| {
            Ok(Box::new(SchemeReader::from_args(args, span)?))
        });
        registry.register_reader(SchemeReader::RANDOM_BACKEND, |args, span| {
            Ok(Box::new(SchemeReader::random_from_args(args, span)?))
        });
        registry.register_reader(SensorReader::BACKEND, |args, span| {
            Ok(Box::new(SensorReader::from_args(args, span)?))
        });
        registry.register_reader(PumpReader::BACKEND, |args, span| {
            Ok(Box::new(PumpReader::from_args(args, span)?))
        });
        registry.register_reader(SerialReader::BACKEND, |args, span| {
            Ok(Box::new(SerialReader::from_args(args, span)?))
        });

        for name in [StdoutSender::BACKEND, StdoutSender::ALIAS] {
            registry.register_sender(name, |args, span| {
                Ok(Box::new(StdoutSender::from_args(args, span)?))
            });
        }
        registry.register_sender(HttpSender::BACKEND, |args, span| {
            Ok(Box::new(HttpSender::from_args(args, span)?))
        });

        registry
    }

    /// Add or replace a reader backend.
    pub fn register_reader<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&Args, Span) -> Result<Box<dyn Reader>, ConstructionError> + Send + Sync + 'static,
    {
        self.readers.insert(name.to_lowercase(), Box::new(factory));
    }

    /// Add or replace a sender backend.
    pub fn register_sender<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&Args, Span) -> Result<Box<dyn Sender>, ConstructionError> + Send + Sync + 'static,
    {
        self.senders.insert(name.to_lowercase(), Box::new(factory));
    }

    pub fn reader_names(&self) -> impl Iterator<Item = &str> {
        self.readers.keys().map(String::as_str)
    }

    pub fn sender_names(&self) -> impl Iterator<Item = &str> {
        self.senders.keys().map(String::as_str)
    }

    /// Build the reader registered as `name`.
    pub fn create_reader(
        &self,
        name: &str,
        args: &Args,
        parent: &Span,
    ) -> Result<Box<dyn Reader>, ConstructionError> {
        let key = name.to_lowercase();
        let factory = self
            .readers
            .get(&key)
            .ok_or_else(|| ConstructionError::UnknownBackend {
                role: Role::Reader,
                name: name.to_string(),
            })?;

        let span = info_span!(parent: parent, "reader", backend = %key);
        debug!(parent: &span, ?args, "Creating reader");
        factory(args, span)
    }

    /// Build the sender registered as `name`.
    pub fn create_sender(
        &self,
        name: &str,
        args: &Args,
        parent: &Span,
    ) -> Result<Box<dyn Sender>, ConstructionError> {
        let key = name.to_lowercase();
        let factory = self
            .senders
            .get(&key)
            .ok_or_else(|| ConstructionError::UnknownBackend {
                role: Role::Sender,
                name: name.to_string(),
            })?;

        let span = info_span!(parent: parent, "sender", backend = %key);
        debug!(parent: &span, ?args, "Creating sender");
        factory(args, span)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}
