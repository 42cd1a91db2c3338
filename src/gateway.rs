//! The gateway engine: discovery, link lifecycle, command correlation and
//! paginated fetches.
//!
//! One [`Gateway`] exists per process, owned by the HTTP state. Every
//! transport-touching operation — connect, disconnect, each
//! [`Gateway::send_and_wait`] cycle — serializes behind the session mutex,
//! so the radio never sees two commands or a command racing a teardown.
//! Scanning deliberately does not take that gate: it only touches the
//! discovery cache and the adapter's scan capability, which is reentrant
//! with respect to an open link.
//!
//! Inbound notifications are pumped through [`Shared::on_notification`]
//! unconditionally: the text is folded into [`NodeState`] and the log ring
//! first, then waiters are signalled. A response that arrives after its
//! correlator call already timed out is therefore still recorded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use crate::commands::{self, CommandProfile};
use crate::config::Config;
use crate::discovery::{CandidateDevice, DiscoveryCache, PinnedDevice};
use crate::error::GatewayError;
use crate::logring::LogRing;
use crate::records::{self, MemberRecord, MessageRecord};
use crate::state::NodeState;
use crate::transport::{Link, LinkEvent, LinkHandle, Transport};

/// Timing knobs lifted out of the config at construction.
struct Tuning {
    connect_timeout: Duration,
    write_timeout: Duration,
    retry_delay: Duration,
    settle_delay: Duration,
    scan_round: Duration,
}

/// State reachable from the notification pump: everything that must update
/// even while a correlator call holds the session gate.
struct Shared {
    state: Mutex<NodeState>,
    logs: Mutex<LogRing>,
    messages: Mutex<Vec<MessageRecord>>,
    members: Mutex<Vec<MemberRecord>>,
    /// Bumped once per inbound notification; correlator calls subscribe
    /// before writing and wait for the next bump.
    response_tx: watch::Sender<u64>,
    /// Identifies the session the shared state currently belongs to. Bumped
    /// on every connect and teardown; each notification pump captures the
    /// value at spawn and drops events once a newer session owns the state.
    /// Detached teardowns can deliver a stream-end disconnect long after a
    /// reconnect, which must not wipe the new session.
    generation: AtomicU64,
}

impl Shared {
    async fn log(&self, line: &str) {
        self.logs.lock().await.push(line);
    }

    /// Fold one notification: record first, signal second, so nothing is
    /// lost when no request is pending.
    async fn on_notification(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.state.lock().await.apply_response(text);
        self.log(&format!("RX: {text}")).await;
        self.response_tx.send_modify(|seq| *seq += 1);
    }

    /// Reset every piece of link-scoped state to defaults. Safe to invoke
    /// twice — resetting an already-default state is a no-op.
    async fn reset(&self, reason: &str) {
        *self.state.lock().await = NodeState::default();
        self.messages.lock().await.clear();
        self.members.lock().await.clear();
        self.log(reason).await;
    }
}

/// The single active link. Lives inside the session mutex.
struct Session {
    link: Box<dyn Link>,
    address: String,
}

pub struct Gateway {
    transport: Arc<dyn Transport>,
    tuning: Tuning,
    discovery: Mutex<DiscoveryCache>,
    /// Shared with each session's pump so an unsolicited disconnect can
    /// release the dead link promptly.
    session: Arc<Mutex<Option<Session>>>,
    shared: Arc<Shared>,
}

impl Gateway {
    pub fn new(transport: Arc<dyn Transport>, config: &Config) -> Self {
        let (response_tx, _) = watch::channel(0u64);
        Self {
            transport,
            tuning: Tuning {
                connect_timeout: Duration::from_secs(config.transport.connect_timeout_secs),
                write_timeout: Duration::from_millis(config.transport.write_timeout_ms),
                retry_delay: Duration::from_millis(config.transport.retry_delay_ms),
                settle_delay: Duration::from_millis(config.transport.settle_delay_ms),
                scan_round: Duration::from_secs(config.scan.round_secs),
            },
            discovery: Mutex::new(DiscoveryCache::new(
                &config.scan,
                &config.transport.service_uuid,
            )),
            session: Arc::new(Mutex::new(None)),
            shared: Arc::new(Shared {
                state: Mutex::new(NodeState::default()),
                logs: Mutex::new(LogRing::new(config.server.log_capacity)),
                messages: Mutex::new(Vec::new()),
                members: Mutex::new(Vec::new()),
                response_tx,
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Whether the session gate is currently held by some operation.
    pub fn is_busy(&self) -> bool {
        self.session.try_lock().is_err()
    }

    pub async fn state_snapshot(&self) -> NodeState {
        self.shared.state.lock().await.clone()
    }

    pub async fn logs_snapshot(&self) -> Vec<String> {
        self.shared.logs.lock().await.snapshot()
    }

    // ── Discovery ────────────────────────────────────────────────────────

    /// Run discovery bursts for roughly `timeout`, then return the cache
    /// listing: fresh candidates plus the connected device (pinned in even
    /// when an active link suppresses its advertising), strongest first.
    /// Never fails; an empty list is a valid result.
    pub async fn scan(&self, timeout: Duration) -> Vec<CandidateDevice> {
        // Apportion the budget into bursts; at least one full round runs
        // even for tiny timeouts.
        let round = self.tuning.scan_round;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let rounds = (timeout.as_secs_f64() / round.as_secs_f64().max(1.0))
            .ceil()
            .clamp(1.0, 16.0) as u32;
        for _ in 0..rounds {
            match self.transport.scan(round).await {
                Ok(sightings) => {
                    let now = Instant::now();
                    let mut cache = self.discovery.lock().await;
                    for adv in &sightings {
                        cache.observe(adv, now);
                    }
                }
                Err(e) => {
                    warn!("scan burst failed: {e}");
                    self.shared.log(&format!("Scan failed: {e}")).await;
                    break;
                }
            }
        }

        let pinned = {
            let state = self.shared.state.lock().await;
            state.connected.then(|| PinnedDevice {
                address: state.ble_address.clone(),
                name: if state.node_name.is_empty() {
                    state.ble_name.clone()
                } else {
                    state.node_name.clone()
                },
                rssi: state.link_rssi,
            })
        };
        self.discovery
            .lock()
            .await
            .snapshot(Instant::now(), pinned.as_ref())
    }

    // ── Connect state machine ────────────────────────────────────────────

    /// Connect to `address`. A repeat connect to the already-connected
    /// address is a write-free no-op; connecting elsewhere runs a full
    /// disconnect and a settle delay first. Entering Connected triggers a
    /// best-effort WHOAMI/STATUS warm-up that may fail silently.
    pub async fn connect(&self, address: &str) -> Result<(), GatewayError> {
        let mut session = self.session.lock().await;

        let same_address = {
            let state = self.shared.state.lock().await;
            state.connected && state.ble_address.eq_ignore_ascii_case(address)
        };
        if same_address && session.is_some() {
            debug!("already connected to {address}");
            return Ok(());
        }

        if session.is_some() {
            self.teardown(&mut session).await;
            // The radio stack can reject a fresh connection while the old
            // one is still releasing.
            tokio::time::sleep(self.tuning.settle_delay).await;
        }

        self.shared.log(&format!("Connecting to {address}...")).await;
        let handle = match self.transport.connect(address).await {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.log(&format!("Connect failed: {e}")).await;
                return Err(e);
            }
        };
        let LinkHandle {
            link,
            events,
            name,
            rssi,
        } = handle;

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        spawn_pump(
            Arc::clone(&self.shared),
            Arc::clone(&self.session),
            events,
            generation,
        );
        {
            let mut state = self.shared.state.lock().await;
            state.connected = true;
            state.ble_address = address.to_string();
            state.ble_name = name.unwrap_or_default();
            state.link_rssi = rssi;
            state.last_response.clear();
        }
        *session = Some(Session {
            link,
            address: address.to_string(),
        });
        info!("connected to {address}");
        self.shared.log("BLE connected.").await;

        // Identity warm-up. The user-visible "connected" transition must not
        // block on radio chatter; failures fill in on a later exchange.
        for cmd in ["WHOAMI", "STATUS"] {
            if let Err(e) = self
                .send_and_wait_on(&session, cmd, &commands::warmup(cmd))
                .await
            {
                debug!("warm-up {cmd} failed: {e}");
                self.shared.log(&format!("Warm-up {cmd} failed: {e}")).await;
            }
        }
        Ok(())
    }

    /// Close the active link, if any. State resets synchronously; the
    /// physical teardown completes in the background and its outcome is
    /// discarded since the link is being abandoned anyway.
    pub async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        self.teardown(&mut session).await;
    }

    async fn teardown(&self, session: &mut Option<Session>) {
        // Invalidate the current pump; any event it still delivers belongs
        // to a session that no longer owns the shared state.
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        let Some(old) = session.take() else {
            self.shared.state.lock().await.connected = false;
            return;
        };
        debug!("tearing down link to {}", old.address);
        self.shared.reset("BLE disconnected (manual).").await;
        tokio::spawn(async move {
            old.link.close().await;
        });
    }

    // ── Command correlator ───────────────────────────────────────────────

    /// Send a raw command using its purpose-tuned profile.
    pub async fn send_command(&self, command: &str) -> Result<String, GatewayError> {
        self.send_and_wait(command, &commands::profile_for(command))
            .await
    }

    /// Acquire the session gate and run one full send/retry cycle.
    pub async fn send_and_wait(
        &self,
        command: &str,
        profile: &CommandProfile,
    ) -> Result<String, GatewayError> {
        let session = self.session.lock().await;
        self.send_and_wait_on(&session, command, profile).await
    }

    /// The correlator proper. Caller holds the session gate.
    ///
    /// Per attempt: subscribe to the response signal, write the command
    /// (write itself bounded by a short timeout), then wait for the next
    /// notification and check it against the expected prefixes. Timeouts and
    /// mismatches retry after a short backoff until attempts run out. With
    /// no expected prefixes the write alone completes the call.
    async fn send_and_wait_on(
        &self,
        session: &Option<Session>,
        command: &str,
        profile: &CommandProfile,
    ) -> Result<String, GatewayError> {
        let Some(session) = session.as_ref() else {
            return Err(GatewayError::TransportUnavailable);
        };
        if !self.shared.state.lock().await.connected {
            // The link dropped under us; the pump already reset the state.
            return Err(GatewayError::TransportUnavailable);
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            // Subscribe before writing so a fast reply cannot slip past.
            let mut response_rx = self.shared.response_tx.subscribe();

            self.shared.log(&format!("TX: {command}")).await;
            match tokio::time::timeout(self.tuning.write_timeout, session.link.write(command.as_bytes()))
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Err(GatewayError::Transport(format!(
                        "write of '{command}' timed out"
                    )))
                }
            }

            if profile.prefixes.is_empty() {
                return Ok(String::new());
            }

            match tokio::time::timeout(profile.timeout, response_rx.changed()).await {
                Err(_) => {
                    if attempt >= profile.attempts {
                        return Err(GatewayError::Timeout {
                            command: command.to_string(),
                            attempts: profile.attempts,
                        });
                    }
                }
                Ok(Err(_)) => return Err(GatewayError::TransportUnavailable),
                Ok(Ok(())) => {
                    let response = self.shared.state.lock().await.last_response.clone();
                    if profile.prefixes.iter().any(|p| response.starts_with(p)) {
                        return Ok(response);
                    }
                    if attempt >= profile.attempts {
                        return Err(GatewayError::Mismatch {
                            command: command.to_string(),
                            response,
                        });
                    }
                }
            }
            tokio::time::sleep(self.tuning.retry_delay).await;
        }
    }

    // ── Paginated fetchers ───────────────────────────────────────────────

    /// Fetch message history: `HISTCOUNT`, then one `HISTGET` per index.
    /// A count failure returns the previous cache unchanged; per-record
    /// failures skip that record; the decoded set replaces the cache. The
    /// result is the most recent `limit` entries.
    pub async fn fetch_messages(&self, limit: usize) -> Vec<MessageRecord> {
        let count = match self.send_command("HISTCOUNT").await {
            Ok(resp) => parse_count(&resp),
            Err(e) => {
                debug!("HISTCOUNT failed: {e}");
                None
            }
        };
        let Some(count) = count else {
            return tail(self.shared.messages.lock().await.clone(), limit);
        };

        let mut fetched = Vec::with_capacity(count);
        for idx in 0..count {
            let cmd = format!("HISTGET|{idx}");
            match self.send_command(&cmd).await {
                Ok(resp) => match records::parse_history(&resp) {
                    Some(rec) => fetched.push(rec),
                    None => debug!("skipping malformed history record {idx}: {resp}"),
                },
                Err(e) => debug!("skipping history record {idx}: {e}"),
            }
        }
        *self.shared.messages.lock().await = fetched.clone();
        tail(fetched, limit)
    }

    /// Fetch the member roster: `MEMCOUNT`, then one `MEMGET` per index.
    /// Same caching discipline as [`Gateway::fetch_messages`]; the result is
    /// the highest `limit` entries by index.
    pub async fn fetch_members(&self, limit: usize) -> Vec<MemberRecord> {
        let count = match self.send_command("MEMCOUNT").await {
            Ok(resp) => parse_count(&resp),
            Err(e) => {
                debug!("MEMCOUNT failed: {e}");
                None
            }
        };
        let Some(count) = count else {
            return tail(self.shared.members.lock().await.clone(), limit);
        };

        let mut fetched = Vec::with_capacity(count);
        for idx in 0..count {
            let cmd = format!("MEMGET|{idx}");
            match self.send_command(&cmd).await {
                Ok(resp) => match records::parse_member(&resp) {
                    Some(rec) => fetched.push(rec),
                    None => debug!("skipping malformed member record {idx}: {resp}"),
                },
                Err(e) => debug!("skipping member record {idx}: {e}"),
            }
        }
        *self.shared.members.lock().await = fetched.clone();
        tail(fetched, limit)
    }
}

/// Forward link events into the shared state until the link is gone or a
/// newer session takes over.
///
/// Every event is gated on the session generation: a detached teardown can
/// deliver a stream-end disconnect (or a straggler notification) after a
/// reconnect, and those must not touch the new session. An unsolicited
/// disconnect from the current session clears the slot so the dead link's
/// close runs promptly, then resets the shared state.
fn spawn_pump(
    shared: Arc<Shared>,
    slot: Arc<Mutex<Option<Session>>>,
    mut events: mpsc::Receiver<LinkEvent>,
    generation: u64,
) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if shared.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            match event {
                LinkEvent::Notification(text) => shared.on_notification(text.trim()).await,
                LinkEvent::Disconnected => {
                    let mut slot = slot.lock().await;
                    // Re-check under the lock: a reconnect may have raced in.
                    if shared.generation.load(Ordering::SeqCst) != generation {
                        return;
                    }
                    shared.generation.fetch_add(1, Ordering::SeqCst);
                    if let Some(dead) = slot.take() {
                        tokio::spawn(async move {
                            dead.link.close().await;
                        });
                    }
                    drop(slot);
                    warn!("unsolicited BLE disconnect");
                    shared.reset("BLE disconnected.").await;
                    return;
                }
            }
        }
    });
}

/// Extract `n` from `OK|*COUNT|<n>`.
fn parse_count(response: &str) -> Option<usize> {
    response.split('|').nth(2)?.parse().ok()
}

/// Keep the last `limit` elements (highest indices) in order.
fn tail<T>(mut records: Vec<T>, limit: usize) -> Vec<T> {
    let len = records.len();
    if len > limit {
        records.drain(0..len - limit);
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    use crate::transport::Advertisement;

    type Responder = dyn Fn(&str, u32) -> Option<String> + Send + Sync;

    /// Scripted transport: replies to each write according to the current
    /// responder function, which receives the command and how many times
    /// that command has been written so far (0-based).
    struct MockTransport {
        writes: Arc<StdMutex<Vec<String>>>,
        counts: Arc<StdMutex<HashMap<String, u32>>>,
        responder: Arc<StdMutex<Arc<Responder>>>,
        connects: Arc<StdMutex<u32>>,
        closes: Arc<StdMutex<u32>>,
        /// One event sender per successful connect, in connection order.
        event_txs: Arc<StdMutex<Vec<mpsc::Sender<LinkEvent>>>>,
        advertisements: StdMutex<Vec<Advertisement>>,
    }

    impl MockTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                writes: Arc::new(StdMutex::new(Vec::new())),
                counts: Arc::new(StdMutex::new(HashMap::new())),
                responder: Arc::new(StdMutex::new(Arc::new(default_replies))),
                connects: Arc::new(StdMutex::new(0)),
                closes: Arc::new(StdMutex::new(0)),
                event_txs: Arc::new(StdMutex::new(Vec::new())),
                advertisements: StdMutex::new(Vec::new()),
            })
        }

        fn set_responder<F>(&self, f: F)
        where
            F: Fn(&str, u32) -> Option<String> + Send + Sync + 'static,
        {
            *self.responder.lock().unwrap() = Arc::new(f);
            self.counts.lock().unwrap().clear();
        }

        fn writes(&self) -> Vec<String> {
            self.writes.lock().unwrap().clone()
        }

        fn clear_writes(&self) {
            self.writes.lock().unwrap().clear();
        }

        fn connects(&self) -> u32 {
            *self.connects.lock().unwrap()
        }

        fn closes(&self) -> u32 {
            *self.closes.lock().unwrap()
        }

        fn set_advertisements(&self, advs: Vec<Advertisement>) {
            *self.advertisements.lock().unwrap() = advs;
        }

        /// Deliver an event on the most recent connection's channel.
        async fn push_event(&self, event: LinkEvent) {
            let tx = self.event_txs.lock().unwrap().last().cloned().unwrap();
            tx.send(event).await.unwrap();
        }

        /// Deliver an event on the `nth` (0-based) connection's channel.
        async fn push_event_on(&self, nth: usize, event: LinkEvent) {
            let tx = self.event_txs.lock().unwrap()[nth].clone();
            tx.send(event).await.unwrap();
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn scan(&self, _duration: Duration) -> Result<Vec<Advertisement>, GatewayError> {
            Ok(self.advertisements.lock().unwrap().clone())
        }

        async fn connect(&self, address: &str) -> Result<LinkHandle, GatewayError> {
            if address == "missing" {
                return Err(GatewayError::DeviceNotFound(address.to_string()));
            }
            *self.connects.lock().unwrap() += 1;
            let (tx, rx) = mpsc::channel(16);
            self.event_txs.lock().unwrap().push(tx.clone());
            Ok(LinkHandle {
                link: Box::new(MockLink {
                    writes: Arc::clone(&self.writes),
                    counts: Arc::clone(&self.counts),
                    responder: Arc::clone(&self.responder),
                    closes: Arc::clone(&self.closes),
                    events: tx,
                }),
                events: rx,
                name: Some("LifeLink-1".to_string()),
                rssi: Some(-50),
            })
        }
    }

    struct MockLink {
        writes: Arc<StdMutex<Vec<String>>>,
        counts: Arc<StdMutex<HashMap<String, u32>>>,
        responder: Arc<StdMutex<Arc<Responder>>>,
        closes: Arc<StdMutex<u32>>,
        events: mpsc::Sender<LinkEvent>,
    }

    #[async_trait]
    impl Link for MockLink {
        async fn write(&self, data: &[u8]) -> Result<(), GatewayError> {
            let command = String::from_utf8_lossy(data).to_string();
            self.writes.lock().unwrap().push(command.clone());
            let reply = {
                let mut counts = self.counts.lock().unwrap();
                let nth = counts.entry(command.clone()).or_insert(0);
                let responder = Arc::clone(&self.responder.lock().unwrap());
                let reply = responder(&command, *nth);
                *nth += 1;
                reply
            };
            if let Some(text) = reply {
                let _ = self.events.send(LinkEvent::Notification(text)).await;
            }
            Ok(())
        }

        async fn close(self: Box<Self>) {
            *self.closes.lock().unwrap() += 1;
        }
    }

    fn default_replies(command: &str, _nth: u32) -> Option<String> {
        if command == "WHOAMI" {
            Some("OK|WHOAMI|A1B2|Alpha".to_string())
        } else if command == "STATUS" {
            Some("OK|STATUS|A1B2|Alpha|C3D4|00ABCDEF|42|3|904.5".to_string())
        } else {
            None
        }
    }

    fn profile(prefixes: Vec<&'static str>, timeout_ms: u64, attempts: u32) -> CommandProfile {
        CommandProfile {
            prefixes,
            timeout: Duration::from_millis(timeout_ms),
            attempts,
        }
    }

    fn gateway(mock: Arc<MockTransport>) -> Gateway {
        let mut config = Config::default();
        // Keep the simulated clock cheap to advance.
        config.transport.settle_delay_ms = 10;
        config.transport.retry_delay_ms = 10;
        Gateway::new(mock, &config)
    }

    async fn connected_gateway(mock: &Arc<MockTransport>) -> Gateway {
        let gw = gateway(Arc::clone(mock));
        gw.connect("AA:01").await.unwrap();
        mock.clear_writes();
        gw
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_and_wait_succeeds_on_second_attempt() {
        let mock = MockTransport::new();
        let gw = connected_gateway(&mock).await;

        mock.set_responder(|cmd, nth| {
            if cmd == "WHOAMI" && nth == 1 {
                Some("OK|WHOAMI|A1B2|Alpha".to_string())
            } else {
                None
            }
        });

        let resp = gw
            .send_and_wait("WHOAMI", &profile(vec!["OK|WHOAMI|"], 100, 3))
            .await
            .unwrap();
        assert_eq!(resp, "OK|WHOAMI|A1B2|Alpha");
        assert_eq!(mock.writes(), vec!["WHOAMI", "WHOAMI"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_and_wait_exhausts_attempts_on_silence() {
        let mock = MockTransport::new();
        let gw = connected_gateway(&mock).await;

        mock.set_responder(|_, _| None);
        let err = gw
            .send_and_wait("WHOAMI", &profile(vec!["OK|WHOAMI|"], 100, 3))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Timeout { attempts: 3, .. }));
        assert_eq!(mock.writes().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_and_wait_mismatch_on_final_attempt() {
        let mock = MockTransport::new();
        let gw = connected_gateway(&mock).await;

        mock.set_responder(|cmd, _| {
            if cmd == "WHOAMI" {
                Some("ERR|CMD|unknown".to_string())
            } else {
                None
            }
        });
        let err = gw
            .send_and_wait("WHOAMI", &profile(vec!["OK|WHOAMI|"], 100, 2))
            .await
            .unwrap_err();
        match err {
            GatewayError::Mismatch { response, .. } => assert_eq!(response, "ERR|CMD|unknown"),
            other => panic!("expected Mismatch, got {other:?}"),
        }
        assert_eq!(mock.writes().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fire_and_forget_returns_after_write() {
        let mock = MockTransport::new();
        let gw = connected_gateway(&mock).await;

        mock.set_responder(|_, _| None);
        let resp = gw.send_command("BEACON|on").await.unwrap();
        assert_eq!(resp, "");
        assert_eq!(mock.writes(), vec!["BEACON|on"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_without_connection_is_unavailable() {
        let mock = MockTransport::new();
        let gw = gateway(mock);
        let err = gw.send_command("WHOAMI").await.unwrap_err();
        assert!(matches!(err, GatewayError::TransportUnavailable));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_warm_up_populates_identity() {
        let mock = MockTransport::new();
        let gw = connected_gateway(&mock).await;

        let state = gw.state_snapshot().await;
        assert!(state.connected);
        assert_eq!(state.ble_address, "AA:01");
        assert_eq!(state.node_id, "A1B2");
        assert_eq!(state.hop_leader, "C3D4");
        assert_eq!(state.hop_channel, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_survives_silent_warm_up() {
        let mock = MockTransport::new();
        mock.set_responder(|_, _| None);
        let gw = gateway(Arc::clone(&mock));

        gw.connect("AA:01").await.unwrap();
        let state = gw.state_snapshot().await;
        assert!(state.connected);
        assert_eq!(state.node_id, "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_same_address_is_noop() {
        let mock = MockTransport::new();
        let gw = connected_gateway(&mock).await;

        gw.connect("AA:01").await.unwrap();
        assert_eq!(mock.connects(), 1);
        assert!(mock.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_different_address_reconnects() {
        let mock = MockTransport::new();
        let gw = connected_gateway(&mock).await;

        gw.connect("AA:02").await.unwrap();
        assert_eq!(mock.connects(), 2);
        let state = gw.state_snapshot().await;
        assert_eq!(state.ble_address, "AA:02");
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_unknown_device_fails_clean() {
        let mock = MockTransport::new();
        let gw = gateway(Arc::clone(&mock));

        let err = gw.connect("missing").await.unwrap_err();
        assert!(matches!(err, GatewayError::DeviceNotFound(_)));
        assert!(!gw.state_snapshot().await.connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_then_unsolicited_event_is_idempotent() {
        let mock = MockTransport::new();
        let gw = connected_gateway(&mock).await;

        gw.disconnect().await;
        mock.push_event(LinkEvent::Disconnected).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(gw.state_snapshot().await, NodeState::default());
        assert!(!gw.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsolicited_disconnect_blocks_further_sends() {
        let mock = MockTransport::new();
        let gw = connected_gateway(&mock).await;

        mock.push_event(LinkEvent::Disconnected).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = gw.send_command("WHOAMI").await.unwrap_err();
        assert!(matches!(err, GatewayError::TransportUnavailable));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_disconnect_does_not_reset_new_session() {
        let mock = MockTransport::new();
        let gw = connected_gateway(&mock).await;

        gw.connect("AA:02").await.unwrap();

        // The old link's stream finally ends and emits its events.
        mock.push_event_on(0, LinkEvent::Disconnected).await;
        mock.push_event_on(0, LinkEvent::Notification("OK|WHOAMI|DEAD|Stale".to_string()))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let state = gw.state_snapshot().await;
        assert!(state.connected, "stale disconnect reset the new session");
        assert_eq!(state.ble_address, "AA:02");
        assert_eq!(state.node_id, "A1B2");

        mock.clear_writes();
        let resp = gw.send_command("WHOAMI").await.unwrap();
        assert!(resp.starts_with("OK|WHOAMI|"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsolicited_disconnect_releases_dead_link() {
        let mock = MockTransport::new();
        let gw = connected_gateway(&mock).await;

        mock.push_event(LinkEvent::Disconnected).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(mock.closes(), 1);
        assert_eq!(gw.state_snapshot().await, NodeState::default());

        // The slot is free again; the same address connects from scratch.
        gw.connect("AA:01").await.unwrap();
        assert_eq!(mock.connects(), 2);
        assert!(gw.state_snapshot().await.connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_response_still_recorded() {
        let mock = MockTransport::new();
        let gw = connected_gateway(&mock).await;

        mock.set_responder(|_, _| None);
        let _ = gw
            .send_and_wait("WHOAMI", &profile(vec!["OK|WHOAMI|"], 50, 1))
            .await
            .unwrap_err();

        // The reply shows up after the correlator already failed.
        mock.push_event(LinkEvent::Notification("OK|WHOAMI|BEEF|Late".to_string()))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let state = gw.state_snapshot().await;
        assert_eq!(state.node_id, "BEEF");
        assert!(gw
            .logs_snapshot()
            .await
            .iter()
            .any(|l| l.contains("RX: OK|WHOAMI|BEEF|Late")));
    }

    // ── Fetchers ─────────────────────────────────────────────────────────

    fn history_replies(command: &str, _nth: u32) -> Option<String> {
        match command {
            "HISTCOUNT" => Some("OK|HISTCOUNT|3".to_string()),
            "HISTGET|0" => Some("OK|HIST|0|R|C3D4|10|0|CHAT|1|68656c6c6f".to_string()),
            "HISTGET|1" => Some("OK|HIST|1|S|C3D4|11|1|SOS|3|6e656564207761746572".to_string()),
            "HISTGET|2" => Some("OK|HIST|2|R|C3D4|12|0|CHAT|1|6f6b".to_string()),
            _ => None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_messages_decodes_in_index_order() {
        let mock = MockTransport::new();
        let gw = connected_gateway(&mock).await;
        mock.set_responder(history_replies);

        let messages = gw.fetch_messages(10).await;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].body, "hello");
        assert_eq!(messages[1].body, "need water");
        assert!(messages[1].vital);
        assert_eq!(messages[2].body, "ok");
        let indices: Vec<u32> = messages.iter().map(|m| m.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_messages_skips_timed_out_record() {
        let mock = MockTransport::new();
        let gw = connected_gateway(&mock).await;
        mock.set_responder(|cmd, nth| {
            if cmd == "HISTGET|1" {
                None
            } else {
                history_replies(cmd, nth)
            }
        });

        let messages = gw.fetch_messages(10).await;
        let indices: Vec<u32> = messages.iter().map(|m| m.index).collect();
        assert_eq!(indices, vec![0, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_messages_count_failure_returns_cache() {
        let mock = MockTransport::new();
        let gw = connected_gateway(&mock).await;

        mock.set_responder(history_replies);
        assert_eq!(gw.fetch_messages(10).await.len(), 3);

        // Node goes quiet: last good cache stands.
        mock.set_responder(|_, _| None);
        let messages = gw.fetch_messages(10).await;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].body, "hello");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_messages_zero_count_clears_cache() {
        let mock = MockTransport::new();
        let gw = connected_gateway(&mock).await;

        mock.set_responder(history_replies);
        assert_eq!(gw.fetch_messages(10).await.len(), 3);

        mock.set_responder(|cmd, _| {
            (cmd == "HISTCOUNT").then(|| "OK|HISTCOUNT|0".to_string())
        });
        mock.clear_writes();
        assert!(gw.fetch_messages(10).await.is_empty());
        // No GETs were issued for an empty history.
        assert_eq!(mock.writes(), vec!["HISTCOUNT"]);
        // The cache really was cleared, not just filtered.
        mock.set_responder(|_, _| None);
        assert!(gw.fetch_messages(10).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_messages_limit_keeps_most_recent() {
        let mock = MockTransport::new();
        let gw = connected_gateway(&mock).await;
        mock.set_responder(history_replies);

        let messages = gw.fetch_messages(2).await;
        let indices: Vec<u32> = messages.iter().map(|m| m.index).collect();
        assert_eq!(indices, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_members_defaults_missing_hops() {
        let mock = MockTransport::new();
        let gw = connected_gateway(&mock).await;
        mock.set_responder(|cmd, _| match cmd {
            "MEMCOUNT" => Some("OK|MEMCOUNT|2".to_string()),
            "MEMGET|0" => Some("OK|MEM|0|A1B2|Alpha|5230|88|00ABCDEF|2".to_string()),
            "MEMGET|1" => Some("OK|MEM|1|C3D4|Bravo|100|5|00ABCDEF".to_string()),
            _ => None,
        });

        let members = gw.fetch_members(10).await;
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].hops_away, 2);
        assert_eq!(members[1].hops_away, 1);

        let top = gw.fetch_members(1).await;
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].node_id, "C3D4");
    }

    // ── Discovery ────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_scan_sorts_and_lists_candidates() {
        let mock = MockTransport::new();
        mock.set_advertisements(vec![
            Advertisement {
                address: "AA:01".to_string(),
                name: Some("LifeLink-1".to_string()),
                rssi: Some(-70),
                services: vec![],
            },
            Advertisement {
                address: "AA:02".to_string(),
                name: Some("LifeLink-2".to_string()),
                rssi: Some(-40),
                services: vec![],
            },
        ]);
        let gw = gateway(mock);

        let devices = gw.scan(Duration::from_secs(1)).await;
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].address, "AA:02");
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_pins_connected_device_with_no_sightings() {
        let mock = MockTransport::new();
        let gw = connected_gateway(&mock).await;

        let devices = gw.scan(Duration::from_secs(1)).await;
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].address, "AA:01");
        assert_eq!(devices[0].rssi, -50);
        // Warm-up learned the node's name; the pinned entry uses it.
        assert_eq!(devices[0].name, "Alpha");
    }
}
