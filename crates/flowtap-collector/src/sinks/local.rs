//! Local HAR-shaped archive sink: one newline-delimited JSON file per
//! interface under the configured output directory.

use crate::error::{CollectorError, Result};
use crate::stage::Stage;
use async_trait::async_trait;
use flowtap_types::counts::PipelineCounts;
use flowtap_types::exchange::Exchange;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Serialize)]
struct HarEntry<'a> {
    interface: &'a str,
    flow: String,
    started_at: chrono::DateTime<chrono::Utc>,
    request: HarMessage<'a>,
    response: Option<HarMessage<'a>>,
    tags: std::collections::BTreeMap<&'a str, &'a str>,
}

#[derive(Serialize)]
struct HarMessage<'a> {
    start_line: &'a str,
    headers: &'a [(String, String)],
    body_size: usize,
    body_truncated: bool,
}

fn to_har_message(message: &flowtap_types::exchange::HttpMessage) -> HarMessage<'_> {
    HarMessage {
        start_line: &message.start_line,
        headers: &message.headers,
        body_size: message.body.len(),
        body_truncated: message.body_truncated,
    }
}

/// Writes one append-only, newline-delimited-JSON archive file per
/// interface. Constructed per-interface (never shared across pipelines),
/// matching spec.md §5's "the local archive writer is created per
/// interface and is not shared".
pub struct LocalArchiveSink {
    interface: String,
    file: Mutex<std::fs::File>,
    counts: PipelineCounts,
}

impl LocalArchiveSink {
    /// Opens (creating if absent) `directory/<interface>.har.jsonl` for
    /// appending. Probes writability by creating and removing a sentinel
    /// file first, per spec.md §4.9.
    pub fn open(directory: &Path, interface: &str, counts: PipelineCounts) -> Result<Self> {
        std::fs::create_dir_all(directory).map_err(|e| CollectorError::LocalArchive {
            path: directory.to_path_buf(),
            message: e.to_string(),
        })?;
        probe_writable(directory)?;

        let path = archive_path(directory, interface);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| CollectorError::LocalArchive {
                path: path.clone(),
                message: e.to_string(),
            })?;

        tracing::debug!(interface, path = %path.display(), "opened local archive sink");

        Ok(Self {
            interface: interface.to_string(),
            file: Mutex::new(file),
            counts,
        })
    }

    fn write_entry(&self, exchange: &Exchange) -> Result<()> {
        let entry = HarEntry {
            interface: &self.interface,
            flow: exchange.flow.connection_id(),
            started_at: exchange.request.observed_at,
            request: to_har_message(&exchange.request),
            response: exchange.response.as_ref().map(to_har_message),
            tags: exchange.tags.iter().collect(),
        };
        let line = serde_json::to_string(&entry)?;
        let mut file = self.file.lock().expect("archive file mutex poisoned");
        writeln!(file, "{line}")?;
        Ok(())
    }
}

fn archive_path(directory: &Path, interface: &str) -> PathBuf {
    let safe_name: String = interface
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    directory.join(format!("{safe_name}.har.jsonl"))
}

fn probe_writable(directory: &Path) -> Result<()> {
    let sentinel = directory.join(".flowtap-write-probe");
    std::fs::write(&sentinel, b"").map_err(|e| CollectorError::LocalArchive {
        path: directory.to_path_buf(),
        message: e.to_string(),
    })?;
    let _ = std::fs::remove_file(&sentinel);
    Ok(())
}

#[async_trait]
impl Stage for LocalArchiveSink {
    async fn process(&self, exchange: Exchange) -> Option<Exchange> {
        match self.write_entry(&exchange) {
            Ok(()) => self.counts.record_sunk(),
            Err(error) => {
                self.counts.record_sink_failed();
                tracing::warn!(interface = %self.interface, %error, "local archive sink write failed");
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowtap_types::exchange::HttpMessage;
    use flowtap_types::flow::FlowKey;
    use flowtap_types::tags::TraceTags;
    use std::net::{IpAddr, Ipv4Addr};

    fn exchange() -> Exchange {
        let (flow, _) = FlowKey::from_endpoints(
            "eth0",
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            54321,
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            80,
        );
        Exchange {
            flow,
            request: HttpMessage {
                start_line: "GET / HTTP/1.1".to_string(),
                headers: vec![("Host".to_string(), "example.com".to_string())],
                body: vec![],
                body_truncated: false,
                observed_at: chrono::Utc::now(),
            },
            response: Some(HttpMessage {
                start_line: "HTTP/1.1 200 OK".to_string(),
                headers: vec![],
                body: b"ok".to_vec(),
                body_truncated: false,
                observed_at: chrono::Utc::now(),
            }),
            tags: TraceTags::new(),
            metadata: std::collections::BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn writes_one_jsonl_line_per_exchange() {
        let dir = tempfile::tempdir().unwrap();
        let counts = PipelineCounts::new();
        let sink = LocalArchiveSink::open(dir.path(), "eth0", counts.clone()).unwrap();
        sink.process(exchange()).await;
        sink.process(exchange()).await;

        let contents = std::fs::read_to_string(dir.path().join("eth0.har.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert_eq!(counts.snapshot().exchanges_sunk, 2);
    }

    #[test]
    fn interface_names_are_sanitized_for_the_filesystem() {
        let path = archive_path(Path::new("/tmp"), "eth0:1");
        assert_eq!(path.file_name().unwrap(), "eth0_1.har.jsonl");
    }
}
