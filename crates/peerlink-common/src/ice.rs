//! ICE server configuration shared by client and tooling.

use serde::{Deserialize, Serialize};

/// Default public STUN servers used when a client does not configure any.
pub fn default_stun_servers() -> Vec<String> {
    vec![
        "stun:stun.l.google.com:19302".to_string(),
        "stun:stun1.l.google.com:19302".to_string(),
    ]
}

/// A TURN relay entry in the client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServer {
    /// `turn:host[:port]` or `turns:host[:port]`
    pub url: String,
    pub username: String,
    pub credential: String,
}

/// A parsed TURN URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTurnUrl {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

/// Parse `turn:host[:port]` / `turns:host[:port]`.
///
/// Default ports are 3478 (plain) and 5349 (TLS). Returns `None` for an
/// unknown scheme or empty host; a malformed port falls back to the
/// scheme default.
pub fn parse_turn_url(url: &str) -> Option<ParsedTurnUrl> {
    let (tls, rest) = if let Some(rest) = url.strip_prefix("turns:") {
        (true, rest)
    } else if let Some(rest) = url.strip_prefix("turn:") {
        (false, rest)
    } else {
        return None;
    };

    let default_port = if tls { 5349 } else { 3478 };
    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().unwrap_or(default_port)),
        None => (rest, default_port),
    };

    if host.is_empty() {
        return None;
    }

    Some(ParsedTurnUrl {
        host: host.to_string(),
        port,
        tls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_turn_with_port() {
        let parsed = parse_turn_url("turn:turn.example.com:3479").unwrap();
        assert_eq!(parsed.host, "turn.example.com");
        assert_eq!(parsed.port, 3479);
        assert!(!parsed.tls);
    }

    #[test]
    fn default_ports() {
        assert_eq!(parse_turn_url("turn:turn.example.com").unwrap().port, 3478);
        assert_eq!(parse_turn_url("turns:turn.example.com").unwrap().port, 5349);
    }

    #[test]
    fn tls_scheme() {
        let parsed = parse_turn_url("turns:secure.example.com:443").unwrap();
        assert!(parsed.tls);
        assert_eq!(parsed.port, 443);
    }

    #[test]
    fn malformed_port_falls_back() {
        assert_eq!(parse_turn_url("turn:host:notaport").unwrap().port, 3478);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_turn_url("stun:host").is_none());
        assert!(parse_turn_url("turn:").is_none());
        assert!(parse_turn_url("").is_none());
    }

    #[test]
    fn stun_defaults_present() {
        let servers = default_stun_servers();
        assert_eq!(servers.len(), 2);
        assert!(servers.iter().all(|s| s.starts_with("stun:")));
    }
}
