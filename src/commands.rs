//! Per-command correlation profiles.
//!
//! Every known command head maps to the response prefixes that satisfy it, a
//! wait deadline, and an attempt budget. Identity/status queries get longer
//! timeouts and more attempts — the first exchange after connecting eats the
//! radio's warm-up latency — while the paginated `*GET` lookups run on a
//! tight budget because the fetchers issue dozens of them back to back and
//! skip failures per record.

use std::time::Duration;

/// What the correlator expects back for one command.
#[derive(Debug, Clone)]
pub struct CommandProfile {
    /// Accepted response prefixes. Empty means fire-and-forget: the write
    /// completes the call.
    pub prefixes: Vec<&'static str>,
    /// How long to wait for a matching notification per attempt.
    pub timeout: Duration,
    /// Total attempts before Timeout/Mismatch surfaces.
    pub attempts: u32,
}

impl CommandProfile {
    fn new(prefixes: Vec<&'static str>, timeout_ms: u64, attempts: u32) -> Self {
        Self {
            prefixes,
            timeout: Duration::from_millis(timeout_ms),
            attempts,
        }
    }

    /// Profile for an unrecognized command: write it and return.
    pub fn fire_and_forget() -> Self {
        Self::new(vec![], 0, 1)
    }
}

/// Warm-up profile for the post-connect WHOAMI/STATUS exchange.
pub fn warmup(command: &str) -> CommandProfile {
    match command {
        "WHOAMI" => CommandProfile::new(vec!["OK|WHOAMI|"], 2000, 4),
        _ => CommandProfile::new(vec!["OK|STATUS|"], 2000, 4),
    }
}

/// Resolve the profile for a raw command line.
pub fn profile_for(command: &str) -> CommandProfile {
    if command == "WHOAMI" {
        CommandProfile::new(vec!["OK|WHOAMI|"], 2500, 3)
    } else if command == "STATUS" {
        CommandProfile::new(vec!["OK|STATUS|"], 2500, 3)
    } else if command.starts_with("NAME|") {
        CommandProfile::new(vec!["OK|NAME|"], 2500, 3)
    } else if command.starts_with("SEND|") {
        // The node answers ERR|SEND|... for format/queue problems; that is a
        // definitive reply, not something to retry against.
        CommandProfile::new(vec!["OK|SEND|", "ERR|SEND|"], 2500, 3)
    } else if command == "HISTCOUNT" {
        CommandProfile::new(vec!["OK|HISTCOUNT|"], 2500, 3)
    } else if command.starts_with("HISTGET|") {
        CommandProfile::new(vec!["OK|HIST|"], 1500, 2)
    } else if command == "MEMCOUNT" {
        CommandProfile::new(vec!["OK|MEMCOUNT|"], 2500, 3)
    } else if command.starts_with("MEMGET|") {
        CommandProfile::new(vec!["OK|MEM|"], 1500, 2)
    } else {
        CommandProfile::fire_and_forget()
    }
}
