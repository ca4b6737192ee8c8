//! Ethernet/IP/TCP slicing. We only care about TCP segments; everything
//! else observed on the wire is dropped before it leaves this module.

use chrono::{DateTime, Utc};
use etherparse::SlicedPacket;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// TCP control flags, decoded from the raw flags octet.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpFlags {
    /// FIN flag.
    pub fin: bool,
    /// SYN flag.
    pub syn: bool,
    /// RST flag.
    pub rst: bool,
    /// PSH flag.
    pub psh: bool,
    /// ACK flag.
    pub ack: bool,
}

/// A single TCP segment lifted off the wire, with just enough context for
/// the reassembler to place it in a flow's byte stream.
#[derive(Debug, Clone)]
pub struct TcpSegment {
    /// Capture timestamp.
    pub timestamp: DateTime<Utc>,
    /// Source address.
    pub src_addr: IpAddr,
    /// Source port.
    pub src_port: u16,
    /// Destination address.
    pub dst_addr: IpAddr,
    /// Destination port.
    pub dst_port: u16,
    /// Control flags.
    pub flags: TcpFlags,
    /// Sequence number of the first payload byte.
    pub seq: u32,
    /// Segment payload. Empty for pure ACKs/control segments.
    pub payload: Vec<u8>,
}

/// Slices a raw captured frame and returns the TCP segment it carries, if
/// any. Non-TCP traffic (ARP, UDP, ICMP, ...) and frames etherparse cannot
/// decode are silently dropped — the capture filter should already be
/// restricting the kernel to TCP traffic, so this is a defensive fallback,
/// not the primary filter.
#[must_use]
pub fn slice_tcp_segment(data: &[u8], timestamp: DateTime<Utc>) -> Option<TcpSegment> {
    let sliced = SlicedPacket::from_ethernet(data).ok()?;

    let (src_addr, dst_addr) = match sliced.net? {
        etherparse::NetSlice::Ipv4(ipv4) => {
            let header = ipv4.header();
            (
                IpAddr::V4(Ipv4Addr::from(header.source())),
                IpAddr::V4(Ipv4Addr::from(header.destination())),
            )
        }
        etherparse::NetSlice::Ipv6(ipv6) => {
            let header = ipv6.header();
            (
                IpAddr::V6(Ipv6Addr::from(header.source())),
                IpAddr::V6(Ipv6Addr::from(header.destination())),
            )
        }
    };

    let etherparse::TransportSlice::Tcp(tcp) = sliced.transport? else {
        return None;
    };

    Some(TcpSegment {
        timestamp,
        src_addr,
        src_port: tcp.source_port(),
        dst_addr,
        dst_port: tcp.destination_port(),
        flags: TcpFlags {
            fin: tcp.fin(),
            syn: tcp.syn(),
            rst: tcp.rst(),
            psh: tcp.psh(),
            ack: tcp.ack(),
        },
        seq: tcp.sequence_number(),
        payload: tcp.payload().to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_bytes_decode_to_nothing() {
        assert!(slice_tcp_segment(&[0u8; 4], Utc::now()).is_none());
    }
}
