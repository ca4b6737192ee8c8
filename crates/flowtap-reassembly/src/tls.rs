//! Opportunistic TLS detection on a flow's first bytes.
//!
//! Mirrors the peek-and-classify shape of a TLS-terminating proxy's
//! connection sniffer: read a little, decide, stop reading once the
//! answer is known, generalized from "is this HTTP" to "is this TLS or
//! HTTP".

/// Minimum bytes needed before a TLS record header can be distinguished
/// from an HTTP request line.
pub const MIN_SNIFF_BYTES: usize = 9;

/// The outcome of inspecting a client-to-server sniff buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sniff {
    /// Not enough bytes yet to decide either way.
    Pending,
    /// The buffer opens with a TLS record header.
    Tls {
        /// Server name, if a complete-enough ClientHello was present to
        /// extract one. Best-effort; absence does not imply non-TLS.
        sni: Option<String>,
    },
    /// The buffer opens with a plausible HTTP/1.x request line.
    PlainText,
}

const HTTP_METHODS: &[&str] = &[
    "GET ", "POST ", "PUT ", "DELETE ", "HEAD ", "OPTIONS ", "PATCH ", "CONNECT ", "TRACE ",
];

/// Classifies a client-to-server sniff buffer. Call again as more bytes
/// arrive while the result is [`Sniff::Pending`].
#[must_use]
pub fn classify(buffer: &[u8]) -> Sniff {
    if buffer.len() >= 3 && buffer[0] == 0x16 && buffer[1] == 0x03 {
        return Sniff::Tls {
            sni: extract_sni(buffer),
        };
    }

    if looks_like_request_line(buffer) {
        return Sniff::PlainText;
    }

    if buffer.len() >= MIN_SNIFF_BYTES {
        // Neither signature matched with enough bytes to have seen either
        // one fully form: treat conservatively as plaintext per spec.md §4.5
        // rather than hold the flow open indefinitely.
        return Sniff::PlainText;
    }

    Sniff::Pending
}

/// Same fallback used when a flow goes idle before [`classify`] ever
/// returns a definite answer.
#[must_use]
pub fn classify_on_idle(buffer: &[u8]) -> Sniff {
    match classify(buffer) {
        Sniff::Pending => Sniff::PlainText,
        decided => decided,
    }
}

fn looks_like_request_line(buffer: &[u8]) -> bool {
    HTTP_METHODS
        .iter()
        .any(|m| buffer.len() >= m.len() && buffer.starts_with(m.as_bytes()))
}

/// Best-effort SNI extraction from a buffered ClientHello. Returns `None`
/// for anything short of a complete, well-formed extension block rather
/// than attempt to handle fragmented records — this is a diagnostic
/// nicety, not a TLS parser.
fn extract_sni(buffer: &[u8]) -> Option<String> {
    // TLS record header (5) + handshake header (4) + client version (2) +
    // random (32) + session id length (1) is the minimum before variable
    // fields start.
    const MIN_CLIENT_HELLO: usize = 5 + 4 + 2 + 32 + 1;
    if buffer.len() < MIN_CLIENT_HELLO || buffer[5] != 0x01 {
        return None;
    }

    let mut pos = 5 + 4 + 2 + 32;
    let session_id_len = *buffer.get(pos)? as usize;
    pos += 1 + session_id_len;

    let cipher_suites_len = u16::from_be_bytes([*buffer.get(pos)?, *buffer.get(pos + 1)?]) as usize;
    pos += 2 + cipher_suites_len;

    let compression_len = *buffer.get(pos)? as usize;
    pos += 1 + compression_len;

    let extensions_len = u16::from_be_bytes([*buffer.get(pos)?, *buffer.get(pos + 1)?]) as usize;
    pos += 2;
    let extensions_end = (pos + extensions_len).min(buffer.len());

    while pos + 4 <= extensions_end {
        let ext_type = u16::from_be_bytes([buffer[pos], buffer[pos + 1]]);
        let ext_len = u16::from_be_bytes([buffer[pos + 2], buffer[pos + 3]]) as usize;
        let ext_start = pos + 4;
        if ext_start + ext_len > buffer.len() {
            return None;
        }
        if ext_type == 0x0000 {
            return parse_server_name_extension(&buffer[ext_start..ext_start + ext_len]);
        }
        pos = ext_start + ext_len;
    }

    None
}

fn parse_server_name_extension(ext: &[u8]) -> Option<String> {
    // server_name_list length (2) + entry type (1, 0 = host_name) + name
    // length (2) + name bytes.
    if ext.len() < 5 || ext[2] != 0x00 {
        return None;
    }
    let name_len = u16::from_be_bytes([ext[3], ext[4]]) as usize;
    let name_start = 5;
    let name = ext.get(name_start..name_start + name_len)?;
    std::str::from_utf8(name).ok().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_tls_record_header() {
        let buf = [0x16, 0x03, 0x01, 0x00, 0x05, 0x01, 0x00, 0x00, 0x01];
        assert!(matches!(classify(&buf), Sniff::Tls { .. }));
    }

    #[test]
    fn recognizes_http_get() {
        assert_eq!(classify(b"GET /foo HTTP/1.1\r\n"), Sniff::PlainText);
    }

    #[test]
    fn pending_until_enough_bytes() {
        assert_eq!(classify(b"GE"), Sniff::Pending);
    }

    #[test]
    fn ambiguous_bytes_default_to_plaintext_once_enough_arrive() {
        assert_eq!(classify(b"???????????"), Sniff::PlainText);
    }

    #[test]
    fn idle_fallback_resolves_pending_to_plaintext() {
        assert_eq!(classify_on_idle(b"GE"), Sniff::PlainText);
    }
}
