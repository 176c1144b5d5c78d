//! Built-in reader backends.
//!
//! - **foo**: constant text, for wiring tests
//! - **scheme**: values produced from a JSON generator scheme
//! - **random**: timestamped random number (a fixed scheme)
//! - **sensor**: simulated edge sensor readings
//! - **pump**: simulated pump with delayed state transitions
//! - **serial**: lines or bytes from a character device

pub mod foo;
pub mod pump;
pub mod scheme;
pub mod sensor;
pub mod serial;

pub use foo::FooReader;
pub use pump::{Pump, PumpReader, PumpStatus};
pub use scheme::{Generator, Scheme, SchemeReader};
pub use sensor::{SensorReader, SensorType, Severity};
pub use serial::{ReadMode, SerialReader};
