//! The packet source: opens a pcap capture, applies a compiled BPF filter,
//! and streams TCP segments to the reassembler over a bounded channel.

use crate::error::{CaptureError, CaptureResult};
use crate::filter::CaptureFilter;
use crate::link::{slice_tcp_segment, TcpSegment};
use chrono::Utc;
use flowtap_types::counts::PipelineCounts;
use pcap::{Active, Capture, Device};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Source-level capture settings. Distinct from [`flowtap_types::CaptureConfig`],
/// which is the user-facing run configuration; this is the subset pcap
/// itself needs to open a device.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Device name to capture on.
    pub device: String,
    /// Compiled BPF filter to push into the kernel.
    pub filter: CaptureFilter,
    /// Promiscuous mode.
    pub promiscuous: bool,
    /// Snapshot length (max bytes captured per packet).
    pub snaplen: i32,
    /// Kernel capture buffer size, in bytes.
    pub buffer_size: i32,
    /// Read timeout, in milliseconds, between stop-flag checks.
    pub timeout_ms: i32,
}

impl SourceConfig {
    /// Settings for `device`, with every other field at its default.
    #[must_use]
    pub fn for_device(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            filter: CaptureFilter::all(),
            promiscuous: true,
            snaplen: 65535,
            buffer_size: 1024 * 1024,
            timeout_ms: 1000,
        }
    }

    /// Attaches a compiled BPF filter.
    #[must_use]
    pub fn with_filter(mut self, filter: CaptureFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// A handle used to stop a running [`PacketSource`] from another task.
#[derive(Clone)]
pub struct CaptureHandle {
    stop_flag: Arc<AtomicBool>,
}

impl CaptureHandle {
    fn new(stop_flag: Arc<AtomicBool>) -> Self {
        Self { stop_flag }
    }

    /// Signals the capture loop to exit at its next stop-flag check.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    /// Returns whether `stop` has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop_flag.load(Ordering::SeqCst)
    }
}

/// Opens a device and streams its TCP segments.
pub struct PacketSource {
    config: SourceConfig,
}

impl PacketSource {
    /// Creates a source from `config`. The device is not opened until
    /// [`PacketSource::start`] is called.
    #[must_use]
    pub fn new(config: SourceConfig) -> Self {
        Self { config }
    }

    fn open_capture(&self) -> CaptureResult<Capture<Active>> {
        let device = Device::list()
            .map_err(|e| CaptureError::PcapError(e.to_string()))?
            .into_iter()
            .find(|d| d.name == self.config.device)
            .ok_or_else(|| CaptureError::DeviceNotFound(self.config.device.clone()))?;

        debug!(device = %device.name, "opening capture device");

        let mut cap = Capture::from_device(device)
            .map_err(|e| open_error(&e))?
            .promisc(self.config.promiscuous)
            .snaplen(self.config.snaplen)
            .buffer_size(self.config.buffer_size)
            .timeout(self.config.timeout_ms)
            .open()
            .map_err(|e| open_error(&e))?;

        if !self.config.filter.is_empty() {
            debug!(filter = %self.config.filter, "applying BPF filter");
            cap.filter(self.config.filter.as_str(), true)
                .map_err(|e| CaptureError::InvalidFilter(e.to_string()))?;
        }

        Ok(cap)
    }

    /// Starts the capture loop on a dedicated OS thread (libpcap's blocking
    /// read does not play well with an async executor) and streams decoded
    /// TCP segments back over a bounded channel.
    pub fn start(
        &self,
        counts: PipelineCounts,
    ) -> CaptureResult<(mpsc::Receiver<TcpSegment>, CaptureHandle)> {
        let (tx, rx) = mpsc::channel(4096);
        let stop_flag = Arc::new(AtomicBool::new(false));
        let handle = CaptureHandle::new(stop_flag.clone());

        let mut cap = self.open_capture()?;
        let device = self.config.device.clone();

        std::thread::spawn(move || {
            let mut packet_count: u64 = 0;

            loop {
                if stop_flag.load(Ordering::SeqCst) {
                    debug!(device = %device, "capture stopped");
                    break;
                }

                match cap.next_packet() {
                    Ok(packet) => {
                        let len = packet.data.len() as u64;
                        counts.record_packets(1, len);
                        packet_count += 1;

                        if let Some(segment) = slice_tcp_segment(packet.data, Utc::now()) {
                            if tx.blocking_send(segment).is_err() {
                                debug!(device = %device, "reassembler receiver dropped");
                                break;
                            }
                        }
                    }
                    Err(pcap::Error::TimeoutExpired) => continue,
                    Err(e) => {
                        warn!(device = %device, error = %e, "capture error");
                        break;
                    }
                }
            }

            if let Ok(pcap_stats) = cap.stats() {
                counts.record_kernel_drops(u64::from(pcap_stats.dropped));
            }

            info!(device = %device, packets = packet_count, "capture loop finished");
        });

        Ok((rx, handle))
    }
}

fn open_error(e: &pcap::Error) -> CaptureError {
    if e.to_string().contains("permission") {
        CaptureError::PermissionDenied
    } else {
        CaptureError::PcapError(e.to_string())
    }
}
