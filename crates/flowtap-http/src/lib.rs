//! Streaming HTTP/1.x parsing and FIFO request/response pairing.
//!
//! Sits directly on top of [`flowtap_reassembly::ReassemblyEvent::Payload`]
//! bytes: one [`pairing::ExchangePairer`] per pipeline turns those bytes
//! into [`flowtap_types::Exchange`]s ready for the collector chain.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod pairing;
pub mod parser;

pub use pairing::ExchangePairer;
pub use parser::{MessageKind, MessageParser};
