//! Gateway-visible node state and the shared application state.
//!
//! [`NodeState`] mirrors what the browser UI renders: connection flag, the
//! BLE identity of the link, the node's own identity and hop-link
//! descriptors, and the last raw response line. It is mutated in exactly two
//! places — the notification fold ([`NodeState::apply_response`]) and the
//! disconnect reset — so every field can be trusted to go back to its
//! default the moment the link drops.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::config::Config;
use crate::gateway::Gateway;

/// Everything the gateway knows about the connected node. Serialized as-is
/// into `/state`, `/health` and `/connect` responses.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct NodeState {
    pub connected: bool,
    /// Transport-layer address of the connected device.
    pub ble_address: String,
    /// Advertised display name of the connected device.
    pub ble_name: String,
    /// Signal strength observed when the link was established.
    pub link_rssi: Option<i16>,
    /// 16-bit node id, uppercase hex.
    pub node_id: String,
    pub node_name: String,
    /// Current hop-schedule leader id, uppercase hex.
    pub hop_leader: String,
    /// Hop-schedule seed, uppercase hex.
    pub hop_seed: String,
    pub hop_seq: u32,
    pub hop_channel: u16,
    pub hop_frequency_mhz: f64,
    /// Most recent raw notification text, matched or not.
    pub last_response: String,
}

impl NodeState {
    /// Fold one inbound notification into the state.
    ///
    /// Runs for every notification regardless of whether a correlator call
    /// is waiting. Recognized shapes are parsed positionally on `|`;
    /// anything else only updates `last_response`. Malformed numeric fields
    /// in a STATUS reply are skipped individually — the rest of the shape is
    /// still applied.
    pub fn apply_response(&mut self, text: &str) {
        self.last_response = text.to_string();

        if text.starts_with("OK|WHOAMI|") {
            let parts: Vec<&str> = text.split('|').collect();
            if parts.len() >= 4 {
                self.node_id = parts[2].to_uppercase();
                self.node_name = parts[3].to_string();
            }
        } else if text.starts_with("OK|NAME|") {
            let parts: Vec<&str> = text.split('|').collect();
            if parts.len() >= 3 {
                self.node_name = parts[2].to_string();
            }
        } else if text.starts_with("OK|STATUS|") {
            // OK|STATUS|id|name|leader|seed|seq|channel|freq
            let parts: Vec<&str> = text.split('|').collect();
            if parts.len() >= 9 {
                self.node_id = parts[2].to_uppercase();
                self.node_name = parts[3].to_string();
                self.hop_leader = parts[4].to_uppercase();
                self.hop_seed = parts[5].to_uppercase();
                if let Ok(seq) = parts[6].parse() {
                    self.hop_seq = seq;
                }
                if let Ok(channel) = parts[7].parse() {
                    self.hop_channel = channel;
                }
                if let Ok(freq) = parts[8].parse() {
                    self.hop_frequency_mhz = freq;
                }
            }
        }
    }
}

/// Shared application state passed to every handler via Axum's `State`
/// extractor.
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// Monotonic instant when the server started (for uptime calculation).
    pub start_time: Instant,
    /// The gateway engine: discovery, link lifecycle, command correlation.
    pub gateway: Arc<Gateway>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_whoami() {
        let mut state = NodeState::default();
        state.apply_response("OK|WHOAMI|a1b2|Alpha");
        assert_eq!(state.node_id, "A1B2");
        assert_eq!(state.node_name, "Alpha");
        assert_eq!(state.last_response, "OK|WHOAMI|a1b2|Alpha");
    }

    #[test]
    fn test_apply_name_ack() {
        let mut state = NodeState::default();
        state.apply_response("OK|NAME|Basecamp");
        assert_eq!(state.node_name, "Basecamp");
    }

    #[test]
    fn test_apply_status_full() {
        let mut state = NodeState::default();
        state.apply_response("OK|STATUS|A1B2|Alpha|C3D4|00ABCDEF|42|3|904.5");
        assert_eq!(state.node_id, "A1B2");
        assert_eq!(state.hop_leader, "C3D4");
        assert_eq!(state.hop_seed, "00ABCDEF");
        assert_eq!(state.hop_seq, 42);
        assert_eq!(state.hop_channel, 3);
        assert!((state.hop_frequency_mhz - 904.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_apply_status_bad_seq_keeps_rest() {
        let mut state = NodeState {
            hop_seq: 7,
            ..NodeState::default()
        };
        state.apply_response("OK|STATUS|N1|Node1|N2|SEEDX|abc|3|915.0");
        // Textual fields always apply
        assert_eq!(state.node_id, "N1");
        assert_eq!(state.node_name, "Node1");
        assert_eq!(state.hop_leader, "N2");
        assert_eq!(state.hop_seed, "SEEDX");
        // Bad seq is skipped, good channel/frequency still land
        assert_eq!(state.hop_seq, 7);
        assert_eq!(state.hop_channel, 3);
        assert!((state.hop_frequency_mhz - 915.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_apply_status_too_short_ignored() {
        let mut state = NodeState::default();
        state.apply_response("OK|STATUS|A1B2|Alpha");
        assert_eq!(state.node_id, "");
        assert_eq!(state.last_response, "OK|STATUS|A1B2|Alpha");
    }

    #[test]
    fn test_unrecognized_only_updates_last_response() {
        let mut state = NodeState::default();
        state.apply_response("ERR|CMD|unknown");
        assert_eq!(state.last_response, "ERR|CMD|unknown");
        assert_eq!(state, NodeState {
            last_response: "ERR|CMD|unknown".to_string(),
            ..NodeState::default()
        });
    }
}
