//! Capture interface description.

use serde::{Deserialize, Serialize};

/// A network interface eligible for packet capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceDescriptor {
    /// Interface name as libpcap knows it (e.g. "en0", "eth0").
    pub name: String,
    /// Human-readable description, if the platform provides one.
    pub description: Option<String>,
    /// Whether the interface is currently up.
    pub is_up: bool,
    /// Whether the interface is a loopback device.
    pub is_loopback: bool,
}

impl InterfaceDescriptor {
    /// Returns true if this interface is a plausible default capture target:
    /// up, not loopback.
    #[must_use]
    pub fn is_capture_candidate(&self) -> bool {
        self.is_up && !self.is_loopback
    }
}
