//! Built-in sender backends.
//!
//! - **stdout** (alias **foo**): one line per sample on standard output
//! - **http**: JSON envelope POSTed to an ingest endpoint

pub mod http;
pub mod stream;

pub use http::{Envelope, HttpSender, SendStats};
pub use stream::{StdoutSender, StreamSender};
