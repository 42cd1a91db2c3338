//! Wire-format decoding for history and roster records.
//!
//! Both record kinds arrive as pipe-delimited notification lines and are
//! decoded positionally. Parsers return `None` for anything malformed — the
//! fetchers skip such records rather than failing the whole fetch.

use serde::Serialize;

/// Whether a history entry left this node or arrived at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Sent,
    Received,
}

/// One decoded message-history entry.
#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    pub index: u32,
    pub direction: Direction,
    /// Peer node id, uppercase hex.
    pub peer: String,
    pub msg_id: u32,
    /// Flagged by the upstream classifier as requiring priority handling.
    pub vital: bool,
    pub intent: String,
    pub urgency: u8,
    /// Hex-decoded body text; empty when the hex was invalid.
    pub body: String,
}

/// One decoded mesh-member roster entry.
#[derive(Debug, Clone, Serialize)]
pub struct MemberRecord {
    pub index: u32,
    /// Node id, uppercase hex.
    pub node_id: String,
    pub name: String,
    /// Milliseconds since this member was last heard.
    pub age_ms: u64,
    pub heartbeat_seq: u64,
    /// Hop-schedule seed the member reported, uppercase hex.
    pub seed: String,
    /// Mesh distance; the field is absent in some node firmware revisions,
    /// in which case a direct neighbor (1 hop) is assumed.
    pub hops_away: u8,
}

/// Decode a hex-encoded message body, substituting empty text for invalid
/// hex. Non-UTF-8 bytes degrade to replacement characters rather than
/// dropping the record.
fn decode_hex_body(hex_body: &str) -> String {
    match hex::decode(hex_body) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => String::new(),
    }
}

/// Parse `OK|HIST|<idx>|<dir>|<peer>|<msgId>|<vital>|<intent>|<urgency>|<hexBody>`.
pub fn parse_history(text: &str) -> Option<MessageRecord> {
    let parts: Vec<&str> = text.split('|').collect();
    if parts.len() < 10 || parts[0] != "OK" || parts[1] != "HIST" {
        return None;
    }
    let direction = match parts[3] {
        "S" => Direction::Sent,
        "R" => Direction::Received,
        _ => return None,
    };
    Some(MessageRecord {
        index: parts[2].parse().ok()?,
        direction,
        peer: parts[4].to_uppercase(),
        msg_id: parts[5].parse().ok()?,
        vital: parts[6] == "1",
        intent: parts[7].to_string(),
        urgency: parts[8].parse().ok()?,
        body: decode_hex_body(parts[9]),
    })
}

/// Parse `OK|MEM|<idx>|<nodeId>|<name>|<ageMs>|<hbSeq>|<seed>[|<hopsAway>]`.
pub fn parse_member(text: &str) -> Option<MemberRecord> {
    let parts: Vec<&str> = text.split('|').collect();
    if parts.len() < 8 || parts[0] != "OK" || parts[1] != "MEM" {
        return None;
    }
    Some(MemberRecord {
        index: parts[2].parse().ok()?,
        node_id: parts[3].to_uppercase(),
        name: parts[4].to_string(),
        age_ms: parts[5].parse().ok()?,
        heartbeat_seq: parts[6].parse().ok()?,
        seed: parts[7].to_uppercase(),
        hops_away: parts.get(8).and_then(|s| s.parse().ok()).unwrap_or(1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_history_hex_body() {
        let rec = parse_history("OK|HIST|0|R|c3d4|17|1|SOS|3|68656c6c6f").unwrap();
        assert_eq!(rec.index, 0);
        assert_eq!(rec.direction, Direction::Received);
        assert_eq!(rec.peer, "C3D4");
        assert_eq!(rec.msg_id, 17);
        assert!(rec.vital);
        assert_eq!(rec.intent, "SOS");
        assert_eq!(rec.urgency, 3);
        assert_eq!(rec.body, "hello");
    }

    #[test]
    fn test_parse_history_sent_direction() {
        let rec = parse_history("OK|HIST|2|S|A1B2|9|0|CHAT|1|6869").unwrap();
        assert_eq!(rec.direction, Direction::Sent);
        assert!(!rec.vital);
        assert_eq!(rec.body, "hi");
    }

    #[test]
    fn test_parse_history_invalid_hex_yields_empty_body() {
        let rec = parse_history("OK|HIST|1|R|C3D4|5|0|CHAT|1|zzzz").unwrap();
        assert_eq!(rec.body, "");
    }

    #[test]
    fn test_parse_history_rejects_malformed() {
        assert!(parse_history("OK|HIST|1|R|C3D4|5|0|CHAT").is_none());
        assert!(parse_history("OK|HIST|x|R|C3D4|5|0|CHAT|1|6869").is_none());
        assert!(parse_history("OK|HIST|1|Q|C3D4|5|0|CHAT|1|6869").is_none());
        assert!(parse_history("ERR|HIST|range").is_none());
    }

    #[test]
    fn test_parse_member_full() {
        let rec = parse_member("OK|MEM|0|a1b2|Alpha|5230|88|00abcdef|2").unwrap();
        assert_eq!(rec.node_id, "A1B2");
        assert_eq!(rec.name, "Alpha");
        assert_eq!(rec.age_ms, 5230);
        assert_eq!(rec.heartbeat_seq, 88);
        assert_eq!(rec.seed, "00ABCDEF");
        assert_eq!(rec.hops_away, 2);
    }

    #[test]
    fn test_parse_member_missing_hops_defaults_to_one() {
        let rec = parse_member("OK|MEM|1|C3D4|Bravo|100|5|12345678").unwrap();
        assert_eq!(rec.hops_away, 1);
    }

    #[test]
    fn test_parse_member_rejects_malformed() {
        assert!(parse_member("OK|MEM|1|C3D4|Bravo|100|5").is_none());
        assert!(parse_member("OK|MEM|1|C3D4|Bravo|notanum|5|SEED").is_none());
    }
}
