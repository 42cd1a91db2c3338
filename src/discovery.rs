//! Discovery cache: recently sighted candidate devices with a TTL.
//!
//! Scan bursts feed sightings in through [`DiscoveryCache::observe`];
//! listings come out of [`DiscoveryCache::snapshot`], which prunes stale
//! entries, pins the currently connected device (an active link often
//! suppresses advertising, so the node would otherwise vanish from the UI),
//! and sorts by descending signal strength.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::ScanConfig;
use crate::transport::Advertisement;

/// One listed device, as returned by `GET /devices`.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateDevice {
    pub address: String,
    pub name: String,
    pub rssi: i16,
    #[serde(skip)]
    last_seen: Instant,
}

/// The connected device, synthesized into listings regardless of TTL.
#[derive(Debug, Clone)]
pub struct PinnedDevice {
    pub address: String,
    pub name: String,
    pub rssi: Option<i16>,
}

/// Default RSSI for sightings and pinned devices with no reading.
const RSSI_UNKNOWN: i16 = -127;

pub struct DiscoveryCache {
    entries: HashMap<String, CandidateDevice>,
    ttl: Duration,
    name_prefix: String,
    service_uuid: String,
    vendor_prefixes: Vec<String>,
}

impl DiscoveryCache {
    pub fn new(scan: &ScanConfig, service_uuid: &str) -> Self {
        Self {
            entries: HashMap::new(),
            ttl: Duration::from_secs(scan.ttl_secs),
            name_prefix: scan.name_prefix.clone(),
            service_uuid: service_uuid.to_lowercase(),
            vendor_prefixes: scan
                .vendor_prefixes
                .iter()
                .map(|p| p.to_uppercase())
                .collect(),
        }
    }

    /// Whether an advertisement looks like one of our nodes: it carries the
    /// UART service, its name matches the naming convention, or its address
    /// has a known vendor prefix (fallback for devices not currently
    /// advertising the service).
    fn is_candidate(&self, adv: &Advertisement) -> bool {
        if adv
            .services
            .iter()
            .any(|s| s.eq_ignore_ascii_case(&self.service_uuid))
        {
            return true;
        }
        if adv
            .name
            .as_deref()
            .is_some_and(|n| n.starts_with(&self.name_prefix))
        {
            return true;
        }
        let addr = adv.address.to_uppercase();
        self.vendor_prefixes.iter().any(|p| addr.starts_with(p))
    }

    /// Record or refresh a sighting. Non-candidates are ignored.
    pub fn observe(&mut self, adv: &Advertisement, now: Instant) {
        if !self.is_candidate(adv) {
            return;
        }
        let name = adv
            .name
            .clone()
            .unwrap_or_else(|| self.name_prefix.clone());
        let entry = self
            .entries
            .entry(adv.address.clone())
            .or_insert_with(|| CandidateDevice {
                address: adv.address.clone(),
                name: name.clone(),
                rssi: RSSI_UNKNOWN,
                last_seen: now,
            });
        entry.name = name;
        if let Some(rssi) = adv.rssi {
            entry.rssi = rssi;
        }
        entry.last_seen = now;
    }

    /// Current listing: fresh entries only, connected device pinned in,
    /// strongest signal first.
    pub fn snapshot(&mut self, now: Instant, pinned: Option<&PinnedDevice>) -> Vec<CandidateDevice> {
        self.entries
            .retain(|_, e| now.duration_since(e.last_seen) <= self.ttl);

        let mut devices: Vec<CandidateDevice> = self.entries.values().cloned().collect();

        if let Some(pin) = pinned {
            if !devices.iter().any(|d| d.address == pin.address) {
                devices.push(CandidateDevice {
                    address: pin.address.clone(),
                    name: pin.name.clone(),
                    rssi: pin.rssi.unwrap_or(RSSI_UNKNOWN),
                    last_seen: now,
                });
            }
        }

        devices.sort_by(|a, b| b.rssi.cmp(&a.rssi));
        devices
    }
}
