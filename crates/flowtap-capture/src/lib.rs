//! BPF packet capture and TCP segment extraction.
//!
//! Opens a libpcap device, compiles and applies a BPF filter, and streams
//! individual TCP segments to the reassembly stage. Everything downstream
//! of this crate works in terms of [`link::TcpSegment`] values, not raw
//! frames.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod devices;
mod error;
mod filter;
mod link;
mod source;

pub use devices::{default_device, enumerate, list_devices};
pub use error::{CaptureError, CaptureResult};
pub use filter::{compile, CaptureFilter, CompiledFilters, SelfTraffic};
pub use link::{slice_tcp_segment, TcpFlags, TcpSegment};
pub use source::{CaptureHandle, PacketSource, SourceConfig};
