//! Flow identity shared between the reassembler, the HTTP parser, and the
//! collector chain.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// The directionality of a half-stream relative to the heuristically chosen
/// "client" side of a TCP flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Bytes flowing from client to server.
    ClientToServer,
    /// Bytes flowing from server to client.
    ServerToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientToServer => write!(f, "client->server"),
            Self::ServerToClient => write!(f, "server->client"),
        }
    }
}

/// The 5-tuple (plus capture interface) identifying a single TCP flow.
///
/// Endpoints are stored in their observed orientation; [`FlowKey::canonical`]
/// normalizes a key so that both directions of the same flow hash alike.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowKey {
    /// Name of the capturing interface, so flows on different interfaces
    /// never collide even if addresses happen to repeat (e.g. containers).
    pub interface: String,
    /// Client-side address, as determined by the port heuristic.
    pub client_addr: IpAddr,
    /// Client-side port.
    pub client_port: u16,
    /// Server-side address.
    pub server_addr: IpAddr,
    /// Server-side port.
    pub server_port: u16,
}

impl FlowKey {
    /// Builds a key by applying the "lower ephemeral port is the client"
    /// heuristic to an unordered pair of endpoints.
    #[must_use]
    pub fn from_endpoints(
        interface: impl Into<String>,
        a_addr: IpAddr,
        a_port: u16,
        b_addr: IpAddr,
        b_port: u16,
    ) -> (Self, Direction) {
        let interface = interface.into();
        // The side connecting to a well-known or lower-numbered port is
        // treated as the server; ties fall to the first-seen endpoint.
        if Self::is_server_port(b_port) && !Self::is_server_port(a_port) {
            (
                Self {
                    interface,
                    client_addr: a_addr,
                    client_port: a_port,
                    server_addr: b_addr,
                    server_port: b_port,
                },
                Direction::ClientToServer,
            )
        } else if Self::is_server_port(a_port) && !Self::is_server_port(b_port) {
            (
                Self {
                    interface,
                    client_addr: b_addr,
                    client_port: b_port,
                    server_addr: a_addr,
                    server_port: a_port,
                },
                Direction::ServerToClient,
            )
        } else if a_port <= b_port {
            (
                Self {
                    interface,
                    client_addr: b_addr,
                    client_port: b_port,
                    server_addr: a_addr,
                    server_port: a_port,
                },
                Direction::ServerToClient,
            )
        } else {
            (
                Self {
                    interface,
                    client_addr: a_addr,
                    client_port: a_port,
                    server_addr: b_addr,
                    server_port: b_port,
                },
                Direction::ClientToServer,
            )
        }
    }

    fn is_server_port(port: u16) -> bool {
        port < 1024
    }

    /// A stable string identifier usable as a HAR-ish connection id or log
    /// correlation field.
    #[must_use]
    pub fn connection_id(&self) -> String {
        format!(
            "{}:{}:{}->{}:{}",
            self.interface, self.client_addr, self.client_port, self.server_addr, self.server_port
        )
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.connection_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_port_wins_regardless_of_argument_order() {
        let a = "127.0.0.1".parse().unwrap();
        let b = "127.0.0.1".parse().unwrap();
        let (key1, dir1) = FlowKey::from_endpoints("eth0", a, 54321, b, 443);
        let (key2, dir2) = FlowKey::from_endpoints("eth0", b, 443, a, 54321);
        assert_eq!(key1, key2);
        assert_eq!(dir1, Direction::ClientToServer);
        assert_eq!(dir2, Direction::ServerToClient);
        assert_eq!(key1.server_port, 443);
        assert_eq!(key1.client_port, 54321);
    }

    #[test]
    fn tie_break_uses_lower_port_as_server() {
        let a = "10.0.0.1".parse().unwrap();
        let b = "10.0.0.2".parse().unwrap();
        let (key, _) = FlowKey::from_endpoints("eth0", a, 9000, b, 9001);
        assert_eq!(key.server_port, 9000);
    }
}
