//! BPF filter support.

use crate::error::{CaptureError, CaptureResult};
use flowtap_types::InterfaceDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Capture filter using BPF syntax.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureFilter {
    /// Raw BPF filter string.
    filter: String,
}

impl CaptureFilter {
    /// Create a filter from a raw BPF string.
    pub fn new(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
        }
    }

    /// Create an empty filter (capture all).
    pub fn all() -> Self {
        Self {
            filter: String::new(),
        }
    }

    /// Filter by host IP address.
    pub fn host(addr: IpAddr) -> Self {
        Self {
            filter: format!("host {}", addr),
        }
    }

    /// Filter by source IP address.
    pub fn src_host(addr: IpAddr) -> Self {
        Self {
            filter: format!("src host {}", addr),
        }
    }

    /// Filter by destination IP address.
    pub fn dst_host(addr: IpAddr) -> Self {
        Self {
            filter: format!("dst host {}", addr),
        }
    }

    /// Filter by port.
    pub fn port(port: u16) -> Self {
        Self {
            filter: format!("port {}", port),
        }
    }

    /// Filter by source port.
    pub fn src_port(port: u16) -> Self {
        Self {
            filter: format!("src port {}", port),
        }
    }

    /// Filter by destination port.
    pub fn dst_port(port: u16) -> Self {
        Self {
            filter: format!("dst port {}", port),
        }
    }

    /// Filter by protocol.
    pub fn protocol(proto: &str) -> Self {
        Self {
            filter: proto.to_lowercase(),
        }
    }

    /// Filter TCP traffic.
    pub fn tcp() -> Self {
        Self::protocol("tcp")
    }

    /// Filter UDP traffic.
    pub fn udp() -> Self {
        Self::protocol("udp")
    }

    /// Filter ICMP traffic.
    pub fn icmp() -> Self {
        Self::protocol("icmp")
    }

    /// Filter DNS traffic.
    pub fn dns() -> Self {
        Self {
            filter: "port 53".to_string(),
        }
    }

    /// Filter HTTP traffic.
    pub fn http() -> Self {
        Self {
            filter: "port 80 or port 443".to_string(),
        }
    }

    /// Combine with AND.
    pub fn and(self, other: CaptureFilter) -> Self {
        if self.filter.is_empty() {
            other
        } else if other.filter.is_empty() {
            self
        } else {
            Self {
                filter: format!("({}) and ({})", self.filter, other.filter),
            }
        }
    }

    /// Combine with OR.
    pub fn or(self, other: CaptureFilter) -> Self {
        if self.filter.is_empty() {
            other
        } else if other.filter.is_empty() {
            self
        } else {
            Self {
                filter: format!("({}) or ({})", self.filter, other.filter),
            }
        }
    }

    /// Negate the filter.
    pub fn not(self) -> Self {
        if self.filter.is_empty() {
            self
        } else {
            Self {
                filter: format!("not ({})", self.filter),
            }
        }
    }

    /// Get the BPF filter string.
    pub fn as_str(&self) -> &str {
        &self.filter
    }

    /// Check if filter is empty.
    pub fn is_empty(&self) -> bool {
        self.filter.is_empty()
    }
}

/// The process's own outbound traffic to the remote ingest endpoint, used to
/// build the self-traffic exclusion clause. Resolving the ingest host name
/// to an address is the caller's job; this just carries the already-resolved
/// address.
#[derive(Debug, Clone, Copy)]
pub struct SelfTraffic {
    /// Address of the configured remote ingest endpoint.
    pub ingest_addr: IpAddr,
}

/// Per-interface compiled filter strings: one capturing traffic that
/// matches the user's filter, and optionally its negation for diagnostic
/// counting.
#[derive(Debug, Clone)]
pub struct CompiledFilters {
    /// Interface name -> filter matching the user's configured traffic.
    pub user: BTreeMap<String, CaptureFilter>,
    /// Interface name -> filter matching everything the self/interface
    /// constraints admit but the user filter does not. `None` unless
    /// negation capture was requested.
    pub negation: Option<BTreeMap<String, CaptureFilter>>,
}

/// Builds the per-interface user and (optional) negation filters.
///
/// `self_traffic` is omitted entirely in dogfood mode: the self-exclusion
/// clause is simply not added, rather than added-and-always-false.
///
/// # Errors
///
/// Returns [`CaptureError::FilterCompile`] if `user_filter` fails a BPF
/// syntax check on any interface.
pub fn compile(
    interfaces: &std::collections::BTreeMap<String, InterfaceDescriptor>,
    user_filter: &str,
    self_traffic: Option<SelfTraffic>,
    include_negation: bool,
) -> CaptureResult<CompiledFilters> {
    let base = if user_filter.trim().is_empty() {
        CaptureFilter::all()
    } else {
        CaptureFilter::new(user_filter)
    };

    let self_exclusion = self_traffic.map(|st| CaptureFilter::host(st.ingest_addr).not());

    let mut user = BTreeMap::new();
    let mut negation = include_negation.then(BTreeMap::new);

    for name in interfaces.keys() {
        let constrained = match &self_exclusion {
            Some(clause) => base.clone().and(clause.clone()),
            None => base.clone(),
        };
        syntax_check(name, &constrained)?;
        user.insert(name.clone(), constrained.clone());

        if let Some(neg_map) = negation.as_mut() {
            let neg = match &self_exclusion {
                Some(clause) => clause.clone().and(base.clone().not()),
                None => base.clone().not(),
            };
            syntax_check(name, &neg)?;
            neg_map.insert(name.clone(), neg);
        }
    }

    Ok(CompiledFilters { user, negation })
}

fn syntax_check(interface: &str, filter: &CaptureFilter) -> CaptureResult<()> {
    if filter.is_empty() {
        return Ok(());
    }
    let dead = pcap::Capture::dead(pcap::Linktype::ETHERNET)
        .map_err(|e| CaptureError::FilterCompile {
            interface: interface.to_string(),
            message: e.to_string(),
        })?;
    dead.compile(filter.as_str(), true)
        .map_err(|e| CaptureError::FilterCompile {
            interface: interface.to_string(),
            message: e.to_string(),
        })?;
    Ok(())
}

impl Default for CaptureFilter {
    fn default() -> Self {
        Self::all()
    }
}

impl std::fmt::Display for CaptureFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.filter.is_empty() {
            write!(f, "(all)")
        } else {
            write!(f, "{}", self.filter)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_filter_host() {
        let filter = CaptureFilter::host(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(filter.as_str(), "host 192.168.1.1");
    }

    #[test]
    fn test_filter_port() {
        let filter = CaptureFilter::port(80);
        assert_eq!(filter.as_str(), "port 80");
    }

    #[test]
    fn test_filter_and() {
        let filter = CaptureFilter::tcp().and(CaptureFilter::port(80));
        assert_eq!(filter.as_str(), "(tcp) and (port 80)");
    }

    #[test]
    fn test_filter_or() {
        let filter = CaptureFilter::port(80).or(CaptureFilter::port(443));
        assert_eq!(filter.as_str(), "(port 80) or (port 443)");
    }

    fn ifaces(names: &[&str]) -> BTreeMap<String, InterfaceDescriptor> {
        names
            .iter()
            .map(|n| {
                (
                    (*n).to_string(),
                    InterfaceDescriptor {
                        name: (*n).to_string(),
                        description: None,
                        is_up: true,
                        is_loopback: false,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn compile_adds_self_exclusion_clause_by_default() {
        let compiled = compile(
            &ifaces(&["eth0"]),
            "tcp",
            Some(SelfTraffic {
                ingest_addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)),
            }),
            false,
        )
        .unwrap();
        let f = compiled.user.get("eth0").unwrap();
        assert!(f.as_str().contains("not (host 10.0.0.9)"));
        assert!(compiled.negation.is_none());
    }

    #[test]
    fn compile_without_self_traffic_omits_exclusion() {
        let compiled = compile(&ifaces(&["eth0"]), "tcp", None, false).unwrap();
        let f = compiled.user.get("eth0").unwrap();
        assert_eq!(f.as_str(), "tcp");
    }

    #[test]
    fn negation_filter_is_built_when_requested() {
        let compiled = compile(&ifaces(&["eth0", "eth1"]), "port 80", None, true).unwrap();
        let negation = compiled.negation.unwrap();
        assert_eq!(negation.len(), 2);
        assert!(negation.get("eth0").unwrap().as_str().contains("not (port 80)"));
    }

    #[test]
    fn invalid_user_filter_is_rejected_per_interface() {
        let err = compile(&ifaces(&["eth0"]), "this is not bpf (((", None, false).unwrap_err();
        assert!(matches!(err, CaptureError::FilterCompile { interface, .. } if interface == "eth0"));
    }
}
