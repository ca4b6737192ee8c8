//! Final shutdown diagnosis: the five user-visible outcomes from
//! spec.md §7, reduced to a typed value so [`crate::run`] can map it to an
//! exit code without re-deriving the logic at the call site.

use flowtap_types::counts::CountSummary;

/// What the supervisor tells the operator (and the process exit code)
/// once every pipeline has drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnosis {
    /// At least one full exchange was captured and reached a sink. Exit 0.
    Success,
    /// No TCP traffic was seen on either the matched or negation pipeline.
    /// Exit non-zero: "trace empty".
    NoTcpCaptured,
    /// TCP was seen but nothing parsed as HTTP and some segments were
    /// unparsed — likely the traffic was all TLS. Exit non-zero.
    LikelyHttps,
    /// Requests were seen before filtering but none survived it. Exit
    /// non-zero: "trace empty".
    AllTrafficFiltered,
    /// Requests and responses were both seen, but in asymmetric numbers
    /// (e.g. a response with no matching request because the request
    /// arrived before capture started). Warned, but still exit 0.
    AsymmetricButSuccess,
}

impl Diagnosis {
    /// Evaluates the five-branch outcome spec.md §7 describes against the
    /// merged counters across every pipeline in the run.
    #[must_use]
    pub fn evaluate(matched: &CountSummary, negation: Option<&CountSummary>) -> Self {
        let negation_packets = negation.map_or(0, |n| n.packets_captured);

        if matched.packets_captured == 0 && negation_packets == 0 {
            return Self::NoTcpCaptured;
        }

        if matched.packets_captured > 0
            && matched.exchanges_pre_filter == 0
            && (matched.parse_errors > 0 || matched.reassembly_gaps > 0)
            && !has_any_http(matched)
        {
            return Self::LikelyHttps;
        }

        if matched.exchanges_pre_filter > 0 && matched.exchanges_post_filter == 0 {
            return Self::AllTrafficFiltered;
        }

        if matched.unmatched_requests > 0 || matched.unmatched_responses > 0 {
            return Self::AsymmetricButSuccess;
        }

        Self::Success
    }

    /// Logs this diagnosis at the appropriate level, matching spec.md §7's
    /// wording closely enough that the message is recognizable in an
    /// operator's terminal scrollback.
    pub fn log(self) {
        match self {
            Self::Success => tracing::info!("capture completed successfully"),
            Self::NoTcpCaptured => {
                tracing::warn!("no TCP captured; check interface");
            }
            Self::LikelyHttps => {
                tracing::warn!(
                    "TCP traffic observed but no HTTP requests or responses parsed; \
                     likely HTTPS, consider a decrypting proxy or HAR generation"
                );
            }
            Self::AllTrafficFiltered => {
                tracing::warn!("requests were observed but all traffic was filtered");
            }
            Self::AsymmetricButSuccess => {
                tracing::warn!("responses observed without matching requests, or vice versa");
            }
        }
    }

    /// Whether this outcome should make the process exit non-zero absent
    /// any subprocess/configuration error already setting one.
    #[must_use]
    pub fn is_trace_empty(self) -> bool {
        matches!(self, Self::NoTcpCaptured | Self::LikelyHttps | Self::AllTrafficFiltered)
    }
}

fn has_any_http(summary: &CountSummary) -> bool {
    summary.exchanges_pre_filter > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(packets: u64, pre_filter: u64, post_filter: u64) -> CountSummary {
        CountSummary {
            packets_captured: packets,
            exchanges_pre_filter: pre_filter,
            exchanges_post_filter: post_filter,
            ..CountSummary::default()
        }
    }

    #[test]
    fn no_packets_on_either_pipeline_warns() {
        let matched = summary(0, 0, 0);
        assert_eq!(Diagnosis::evaluate(&matched, None), Diagnosis::NoTcpCaptured);
    }

    #[test]
    fn packets_with_no_http_and_unparsed_segments_suggests_https() {
        let mut matched = summary(10, 0, 0);
        matched.parse_errors = 1;
        assert_eq!(Diagnosis::evaluate(&matched, None), Diagnosis::LikelyHttps);
    }

    #[test]
    fn requests_seen_before_filters_but_none_after_warns_filtered() {
        let matched = summary(10, 3, 0);
        assert_eq!(Diagnosis::evaluate(&matched, None), Diagnosis::AllTrafficFiltered);
    }

    #[test]
    fn clean_capture_is_success() {
        let matched = summary(10, 3, 3);
        assert_eq!(Diagnosis::evaluate(&matched, None), Diagnosis::Success);
    }

    #[test]
    fn negation_packets_count_toward_no_tcp_check() {
        let matched = summary(0, 0, 0);
        let negation = summary(5, 0, 0);
        assert_eq!(Diagnosis::evaluate(&matched, Some(&negation)), Diagnosis::Success);
    }
}
