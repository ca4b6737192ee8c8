//! Terminal sinks: the end of every collector chain.

pub mod discard;
pub mod local;
pub mod remote;
pub mod tee;

pub use discard::DiscardSink;
pub use local::LocalArchiveSink;
pub use remote::RemoteIngestSink;
pub use tee::TeeSink;
