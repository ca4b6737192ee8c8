//! Shared data model and error definitions for the flowtap capture pipeline.
//!
//! Every other flowtap crate depends on this one for the handful of types
//! that need to agree across process boundaries: flow identity, exchange
//! records, packet-count summaries, and the run-wide configuration that the
//! CLI assembles and the supervisor consumes.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod counts;
pub mod error;
pub mod exchange;
pub mod flow;
pub mod interface;
pub mod run_options;
pub mod tags;

pub use config::CaptureConfig;
pub use error::{Error, Result};
pub use exchange::{Exchange, HttpMessage, TlsClassification};
pub use flow::{Direction, FlowKey};
pub use interface::InterfaceDescriptor;
pub use run_options::RunOptions;
pub use tags::TraceTags;
