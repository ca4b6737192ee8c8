//! CLI surface: a single capture run, configured by flags, optionally
//! bounded by a trailing subcommand.

use clap::Parser;
use std::path::PathBuf;

/// flowtap - passive HTTP exchange capture
#[derive(Parser, Debug)]
#[command(
    name = "flowtap",
    author,
    version,
    about = "Passive HTTP exchange capture",
    long_about = "Captures HTTP exchanges off the wire without terminating TLS or running \
                  as a proxy: sniffs packets with a BPF filter, reassembles TCP streams, \
                  parses HTTP/1.x, and forwards matching exchanges to a sink."
)]
pub struct Cli {
    /// Network interface to capture on. Repeatable. Default: every
    /// non-loopback interface that is up.
    #[arg(short = 'i', long = "interface")]
    pub interfaces: Vec<String>,

    /// Raw BPF filter expression applied on top of the TCP capture.
    #[arg(short = 'f', long = "filter")]
    pub bpf_filter: Option<String>,

    /// Keep an exchange only if its request path matches one of these
    /// regexes. Repeatable.
    #[arg(long = "path-allow")]
    pub path_allow: Vec<String>,

    /// Keep an exchange only if its Host header matches one of these
    /// regexes. Repeatable.
    #[arg(long = "host-allow")]
    pub host_allow: Vec<String>,

    /// Drop an exchange if its request path matches one of these regexes.
    /// Repeatable.
    #[arg(long = "path-exclude")]
    pub path_exclude: Vec<String>,

    /// Drop an exchange if its Host header matches one of these regexes.
    /// Repeatable.
    #[arg(long = "host-exclude")]
    pub host_exclude: Vec<String>,

    /// Keep only this fraction of exchanges, chosen independently per
    /// exchange. Mutually exclusive with `--witnesses-per-minute`.
    #[arg(long = "sample-rate")]
    pub sample_rate: Option<f64>,

    /// Cap the number of exchanges (witnesses) that may reach a sink to
    /// this many per minute, process-wide. Mutually exclusive with
    /// `--sample-rate`.
    #[arg(long = "witnesses-per-minute")]
    pub witnesses_per_minute: Option<u32>,

    /// Write newline-delimited records under this directory.
    #[arg(long = "output-dir")]
    pub output_dir: Option<PathBuf>,

    /// POST each exchange to this ingest endpoint.
    #[arg(long = "ingest-url")]
    pub ingest_url: Option<String>,

    /// Human-readable name used to resolve or create the remote trace.
    /// Ignored unless `--ingest-url` is set.
    #[arg(long = "trace-name", default_value = "flowtap")]
    pub trace_name: String,

    /// Attach a `key=value` tag to every exchange. Repeatable.
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// How long a flow may sit idle before its half-streams are torn down,
    /// in seconds.
    #[arg(long = "idle-timeout-secs", default_value = "60")]
    pub idle_timeout_secs: u64,

    /// How long the reassembler waits for an out-of-order segment before
    /// declaring a gap and resyncing, in seconds.
    #[arg(long = "gap-timeout-secs", default_value = "10")]
    pub gap_timeout_secs: u64,

    /// Maximum bytes buffered per message body before truncation.
    #[arg(long = "body-cap-bytes", default_value = "1048576")]
    pub body_cap_bytes: usize,

    /// Also run a parallel negation pipeline counting everything the main
    /// filter excludes, and log collector-stage decisions at debug level.
    #[arg(long)]
    pub debug: bool,

    /// Disable self-traffic suppression, so the tool's own exchanges with
    /// its configured remote sink are captured instead of filtered.
    #[arg(long)]
    pub dogfood: bool,

    /// Run this command as the bounded lifetime of the capture instead of
    /// waiting for SIGINT/SIGTERM. Everything after `--` is passed through
    /// verbatim.
    #[arg(long = "user")]
    pub subcommand_user: Option<String>,

    /// Increase logging verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors.
    #[arg(short, long)]
    pub quiet: bool,

    /// Command (and arguments) that bounds the capture's lifetime. Pass
    /// after `--`.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub subcommand: Vec<String>,
}
