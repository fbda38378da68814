//! Client endpoint (§4.7, §4.8, §5). Owns the upgrade handshake, direct/next ping cadence,
//! bandwidth accounting, and the payload send/receive path. Runs a dedicated I/O thread that
//! blocks on the socket with a 100 ms timeout, classifies and dispatches every inbound datagram
//! (`wire::dispatch`), drives the periodic cadence off a `Clock`, and replies in place; the
//! application calls `update`/`update_notifications` on its own thread to drain notifications.
use crate::address::Address;
use crate::concurrency::{BoundedQueue, Command, Notification, QUEUE_CAPACITY};
use crate::config::Config;
use crate::counters::{Counter, Counters};
use crate::error::{EndpointError, RouteError};
use crate::relay::RelayManager;
use crate::replay::SessionReplayState;
use crate::route::{RouteManager, RouteSlot};
use crate::session::FallbackFlags;
use crate::stats::{bandwidth, PathStats};
use crate::wire::dispatch;
use crate::wire::filter;
use crate::wire::header::{self, HeaderContext};
use crate::wire::packet_type::PacketType;
use crate::wire::tokens;
use netnext_crypto::logging;
use netnext_crypto::logging::Logger;
use netnext_crypto::time::{Clock, SystemClock};
use netnext_crypto::{aead, kx};
use std::convert::TryInto;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const DIRECT_PING_INTERVAL: f64 = 0.2; // 5 Hz
const NEXT_PING_INTERVAL: f64 = 0.2; // 5 Hz
const STATS_REPORT_INTERVAL: f64 = 1.0; // 1 Hz
const PONG_TIMEOUT: f64 = 5.0;
const UPGRADE_RESPONSE_RESEND_INTERVAL: f64 = 1.0;
const UPGRADE_TIMEOUT: f64 = 5.0;
const ROUTE_UPDATE_TIMEOUT: f64 = 15.0;
const IO_THREAD_RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Conservative default envelope for the direct path's bandwidth accounting: this reduced SDK has
/// no live backend connection to hand down a negotiated `kbps_up`/`kbps_down`, so direct traffic
/// is tracked against a fixed budget rather than skipping bandwidth accounting entirely.
const DIRECT_BANDWIDTH_ENVELOPE_KBPS: f64 = 256.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Passthrough,
    Upgrading,
    Upgraded,
    FallbackToDirect,
}

/// The client's view of the upgrade handshake in flight (§4.7 step 2): cached so the
/// `UPGRADE_RESPONSE` can be retransmitted until confirmed.
struct HandshakeState {
    session_id: u64,
    upgrade_token_echo: Vec<u8>,
    kx_public: kx::PublicKey,
    kx_secret: kx::SecretKey,
    server_kx_public: kx::PublicKey,
    upgrade_start_time: f64,
    last_response_send_time: f64,
}

/// Everything the I/O thread and the application-facing handle both touch, behind one mutex. Kept
/// as a single lock (rather than one per field) since every inbound datagram and every cadence
/// tick needs a consistent view of the handshake/route/session state together.
struct ClientInner {
    config: Config,
    logger: Logger,
    server_address: Address,
    local_address: Address,

    state: ClientState,
    handshake: Option<HandshakeState>,
    session_id: Option<u64>,
    send_key: Option<aead::Key>,
    receive_key: Option<aead::Key>,

    route: RouteManager,
    relays: RelayManager,
    replay: SessionReplayState,
    direct_stats: PathStats,
    next_stats: PathStats,
    counters: Counters,

    fallback_flags: FallbackFlags,

    special_send_sequence: u64,
    internal_send_sequence: u64,
    payload_send_sequence: u64,

    last_direct_pong_time: f64,
    last_next_pong_time: f64,
    last_direct_ping_time: f64,
    last_next_ping_time: f64,
    last_stats_report_time: f64,
    route_update_deadline: Option<f64>,
}

impl ClientInner {
    fn new(config: Config, logger: Logger, server_address: Address, local_address: Address) -> ClientInner {
        ClientInner {
            config,
            logger,
            server_address,
            local_address,
            state: ClientState::Passthrough,
            handshake: None,
            session_id: None,
            send_key: None,
            receive_key: None,
            route: RouteManager::new(),
            relays: RelayManager::new(),
            replay: SessionReplayState::new(),
            direct_stats: PathStats::new(),
            next_stats: PathStats::new(),
            counters: Counters::new(),
            fallback_flags: FallbackFlags::default(),
            special_send_sequence: 1,
            internal_send_sequence: 1,
            payload_send_sequence: 1,
            last_direct_pong_time: 0.0,
            last_next_pong_time: 0.0,
            last_direct_ping_time: -1.0,
            last_next_ping_time: -1.0,
            last_stats_report_time: -1.0,
            route_update_deadline: None,
        }
    }

    fn state(&self) -> ClientState {
        self.state
    }

    fn upgraded(&self) -> bool {
        self.state == ClientState::Upgraded
    }

    fn fallback_to_direct(&self) -> bool {
        self.state == ClientState::FallbackToDirect
    }

    fn session_keys(&self) -> Option<(aead::Key, aead::Key)> {
        Some((self.send_key?, self.receive_key?))
    }

    fn session_id(&self) -> Option<u64> {
        self.session_id
    }

    fn handshake_kx_public(&self) -> Option<kx::PublicKey> {
        self.handshake.as_ref().map(|h| h.kx_public)
    }

    fn begin_upgrade(&mut self, session_id: u64, upgrade_token: Vec<u8>, server_kx_public: kx::PublicKey, now: f64) {
        let (kx_public, kx_secret) = kx::generate_keypair();
        self.state = ClientState::Upgrading;
        self.session_id = Some(session_id);
        self.handshake = Some(HandshakeState {
            session_id,
            upgrade_token_echo: upgrade_token,
            kx_public,
            kx_secret,
            server_kx_public,
            upgrade_start_time: now,
            last_response_send_time: -1.0,
        });
    }

    fn upgrade_response_due(&self, now: f64) -> bool {
        match &self.handshake {
            Some(h) => h.last_response_send_time < 0.0 || now - h.last_response_send_time >= UPGRADE_RESPONSE_RESEND_INTERVAL,
            None => false,
        }
    }

    fn mark_upgrade_response_sent(&mut self, now: f64) {
        if let Some(h) = &mut self.handshake {
            h.last_response_send_time = now;
        }
    }

    fn complete_upgrade(&mut self, confirmed_server_kx_public: &kx::PublicKey, now: f64) -> bool {
        let handshake = match self.handshake.take() {
            Some(h) => h,
            None => return false,
        };
        if &handshake.server_kx_public != confirmed_server_kx_public {
            self.handshake = Some(handshake);
            return false;
        }

        let keys = match kx::client_session_keys(&handshake.kx_public, &handshake.kx_secret, &handshake.server_kx_public) {
            Some(keys) => keys,
            None => return false,
        };

        self.send_key = Some(keys.send);
        self.receive_key = Some(keys.receive);
        self.state = ClientState::Upgraded;
        self.last_direct_pong_time = now;
        self.last_next_pong_time = now;
        self.counters.increment(Counter::UpgradeSession);
        true
    }

    /// Irreversible per session (§4.11). Once called, `state()` never leaves `FallbackToDirect`.
    fn fallback(&mut self, flag: FallbackFlags) {
        if self.state == ClientState::FallbackToDirect {
            return;
        }
        self.state = ClientState::FallbackToDirect;
        self.fallback_flags.set(flag);
        self.counters.increment(Counter::FallbackToDirect);
        logging::info!(self.logger, "falling back to direct"; "session_id" => self.session_id.unwrap_or(0), "flags" => self.fallback_flags.bits());
    }

    /// A rejected route/continue token aborts just that route attempt (§7 `RouteAbort`): the
    /// session stays direct and a flag bit queues, mirroring `Server::record_route_error` rather
    /// than tripping the irreversible full fallback.
    fn apply_route_error(&mut self, error: RouteError) {
        let flag = match error {
            RouteError::BadRouteToken => FallbackFlags::BAD_ROUTE_TOKEN,
            RouteError::BadContinueToken => FallbackFlags::BAD_CONTINUE_TOKEN,
            RouteError::NoRouteToContinue => FallbackFlags::NO_ROUTE_TO_CONTINUE,
            RouteError::RouteExpired => FallbackFlags::ROUTE_EXPIRED,
            RouteError::WrongSessionVersion | RouteError::UnknownSession => FallbackFlags::BAD_CONTINUE_TOKEN,
        };
        self.fallback_flags.set(flag);
    }

    /// Runs the per-tick cadence checks (§4.8): ping scheduling, timeout-triggered fallback, and
    /// the route expiry sweep.
    fn update(&mut self, now: f64) {
        if self.state == ClientState::FallbackToDirect {
            return;
        }

        if let Some(handshake) = &self.handshake {
            if now - handshake.upgrade_start_time >= UPGRADE_TIMEOUT {
                self.fallback(FallbackFlags::UPGRADE_RESPONSE_TIMED_OUT);
                return;
            }
        }

        if self.state != ClientState::Upgraded {
            return;
        }

        if now - self.last_direct_pong_time >= PONG_TIMEOUT {
            self.fallback(FallbackFlags::DIRECT_PONG_TIMED_OUT);
            return;
        }
        if self.route.has_current_route() && now - self.last_next_pong_time >= PONG_TIMEOUT {
            self.fallback(FallbackFlags::NEXT_PONG_TIMED_OUT);
            return;
        }
        if let Some(deadline) = self.route_update_deadline {
            if now >= deadline {
                self.fallback(FallbackFlags::ROUTE_UPDATE_TIMED_OUT);
                return;
            }
        }
    }

    fn direct_ping_due(&self, now: f64) -> bool {
        self.last_direct_ping_time < 0.0 || now - self.last_direct_ping_time >= DIRECT_PING_INTERVAL
    }

    fn mark_direct_ping_sent(&mut self, now: f64) {
        self.last_direct_ping_time = now;
    }

    fn direct_pong_received(&mut self, now: f64) {
        self.last_direct_pong_time = now;
    }

    fn next_ping_due(&self, now: f64) -> bool {
        self.route.has_current_route() && (self.last_next_ping_time < 0.0 || now - self.last_next_ping_time >= NEXT_PING_INTERVAL)
    }

    fn mark_next_ping_sent(&mut self, now: f64) {
        self.last_next_ping_time = now;
    }

    fn next_pong_received(&mut self, now: f64) {
        self.last_next_pong_time = now;
    }

    fn stats_report_due(&self, now: f64) -> bool {
        self.last_stats_report_time < 0.0 || now - self.last_stats_report_time >= STATS_REPORT_INTERVAL
    }

    fn mark_stats_reported(&mut self, now: f64) {
        self.last_stats_report_time = now;
    }

    fn arm_route_update_timeout(&mut self, now: f64) {
        self.route_update_deadline = Some(now + ROUTE_UPDATE_TIMEOUT);
    }

    fn clear_route_update_timeout(&mut self) {
        self.route_update_deadline = None;
    }

    fn next_special_sequence(&mut self) -> u64 {
        let seq = self.special_send_sequence;
        self.special_send_sequence += 1;
        seq
    }

    /// Builds a filtered, AEAD-sealed datagram addressed to `remote`. `body` carries whatever
    /// application-level correlation data the caller needs (e.g. a ping-history sequence); `seq`
    /// is the wire nonce and must come from the caller's own monotonic counter for `key`.
    fn seal_packet(&self, packet_type: PacketType, sequence: u64, body: &[u8], session_version: u8, key: &aead::Key, remote: Address) -> Vec<u8> {
        let ctx = HeaderContext {
            session_id: self.session_id.unwrap_or(0),
            session_version,
        };
        let mut packet = vec![0u8; filter::FILTER_PREFIX_LEN];
        packet[0] = packet_type as u8;
        header::write_header(&mut packet, packet_type as u8, sequence, body, &ctx, key).expect("sealing with a valid key cannot fail");
        filter::write_filter_bytes(&mut packet, &self.local_address, &remote, &dispatch::ZERO_MAGICS[0]);
        packet
    }

    fn build_direct_ping(&mut self, now: f64) -> Option<Vec<u8>> {
        let key = self.send_key?;
        let ping_seq = self.direct_stats.ping_history.ping_sent(now);
        let wire_seq = self.next_special_sequence();
        let body = ping_seq.to_le_bytes();
        let bits = bandwidth::wire_packet_bits(body.len());
        self.direct_stats.bandwidth.add_packet(now, DIRECT_BANDWIDTH_ENVELOPE_KBPS, bits);
        self.counters.increment(Counter::PacketSentDirect);
        Some(self.seal_packet(PacketType::DirectPing, wire_seq, &body, 0, &key, self.server_address))
    }

    fn build_session_ping(&mut self, now: f64) -> Option<Vec<u8>> {
        let key = *self.route.current_key()?;
        let version = self.route.current_session_version()?;
        let ping_seq = self.next_stats.ping_history.ping_sent(now);
        let wire_seq = self.next_special_sequence();
        let body = ping_seq.to_le_bytes();
        let bits = bandwidth::wire_packet_bits(body.len());
        self.next_stats.bandwidth.add_packet(now, DIRECT_BANDWIDTH_ENVELOPE_KBPS, bits);
        self.counters.increment(Counter::PacketSentNext);
        Some(self.seal_packet(PacketType::SessionPing, wire_seq, &body, version, &key, self.server_address))
    }

    /// Entry point for every inbound datagram, invoked by the I/O thread after a successful
    /// `recv_from`. Returns bytes to send back to `from`, if any.
    fn handle_inbound(&mut self, datagram: &[u8], from: Address, now: f64) -> Option<Vec<u8>> {
        let classified = dispatch::classify(datagram, &from, &self.local_address, &dispatch::ZERO_MAGICS).ok()?;
        if classified.packet_type == PacketType::ClientPong {
            return self.handle_client_pong(classified.body, from, now);
        }
        if from != self.server_address {
            return None;
        }
        match classified.packet_type {
            PacketType::DirectPong => self.handle_direct_pong(classified.body, now),
            PacketType::SessionPong => self.handle_session_pong(classified.body, now),
            PacketType::RouteUpdate => self.handle_route_update(classified.body, now),
            PacketType::ContinueResponse => self.handle_continue_response(classified.body, now),
            _ => None,
        }
    }

    fn handle_client_pong(&mut self, body: &[u8], from: Address, now: f64) -> Option<Vec<u8>> {
        if body.len() < 8 {
            return None;
        }
        let sequence = u64::from_le_bytes(body[0..8].try_into().ok()?);
        let relay = self.relays.relay_by_address_mut(&from)?;
        relay.pong_received(sequence, now);
        None
    }

    fn handle_direct_pong(&mut self, body: &[u8], now: f64) -> Option<Vec<u8>> {
        let receive_key = self.receive_key?;
        let ctx = HeaderContext {
            session_id: self.session_id?,
            session_version: 0,
        };
        let decoded = header::read_header(body, &ctx, &receive_key).ok()?;
        if self.replay.special.already_received(decoded.sequence) {
            return None;
        }
        self.replay.special.advance(decoded.sequence);
        if decoded.body.len() == 8 {
            let ping_seq = u64::from_le_bytes(decoded.body[0..8].try_into().ok()?);
            self.direct_stats.ping_history.pong_received(ping_seq, now);
        }
        self.counters.increment(Counter::PacketReceivedDirect);
        self.direct_pong_received(now);
        None
    }

    fn handle_session_pong(&mut self, body: &[u8], now: f64) -> Option<Vec<u8>> {
        if !self.route.has_current_route() {
            return None;
        }
        let session_id = self.session_id?;
        let (_matched, decoded) = self.route.try_decrypt(body, session_id)?;
        if self.replay.special.already_received(decoded.sequence) {
            return None;
        }
        self.replay.special.advance(decoded.sequence);
        if decoded.body.len() == 8 {
            let ping_seq = u64::from_le_bytes(decoded.body[0..8].try_into().ok()?);
            self.next_stats.ping_history.pong_received(ping_seq, now);
        }
        self.counters.increment(Counter::PacketReceivedNext);
        self.next_pong_received(now);
        None
    }

    /// `ROUTE_UPDATE` carries a sealed route token (§4.6): this reduced SDK has no live backend
    /// issuing per-hop relay keys, so the token is sealed/opened with the session's own AEAD key
    /// rather than a separate backend-shared one (recorded as an open-question resolution).
    fn handle_route_update(&mut self, body: &[u8], now: f64) -> Option<Vec<u8>> {
        let receive_key = self.receive_key?;
        let send_key = self.send_key?;
        let session_id = self.session_id?;
        let version = self.route.current_session_version().unwrap_or(0);
        let ctx = HeaderContext { session_id, session_version: version };
        let decoded = header::read_header(body, &ctx, &receive_key).ok()?;
        if self.replay.special.already_received(decoded.sequence) {
            return None;
        }
        self.replay.special.advance(decoded.sequence);

        let token = tokens::open_route_token(&decoded.body, &receive_key)?;
        match self.route.install_pending(RouteSlot {
            session_version: token.session_version,
            expire_timestamp: token.expire_timestamp,
            key: token.session_private_key,
        }) {
            Ok(()) => {
                self.arm_route_update_timeout(now);
                let wire_seq = self.next_special_sequence();
                Some(self.seal_packet(PacketType::RouteUpdateAck, wire_seq, &[], token.session_version, &send_key, self.server_address))
            }
            Err(e) => {
                self.apply_route_error(e);
                None
            }
        }
    }

    fn handle_continue_response(&mut self, body: &[u8], now: f64) -> Option<Vec<u8>> {
        let receive_key = self.receive_key?;
        let session_id = self.session_id?;
        let version = self.route.current_session_version().unwrap_or(0);
        let ctx = HeaderContext { session_id, session_version: version };
        let decoded = header::read_header(body, &ctx, &receive_key).ok()?;
        if self.replay.special.already_received(decoded.sequence) {
            return None;
        }
        self.replay.special.advance(decoded.sequence);

        let token = tokens::open_continue_token(&decoded.body, &receive_key)?;
        match self.route.continue_route(token.session_version, token.expire_timestamp) {
            Ok(()) => {
                self.arm_route_update_timeout(now);
                None
            }
            Err(e) => {
                self.apply_route_error(e);
                None
            }
        }
    }

    /// Builds every datagram due to go out this tick purely off cadence state: direct/next pings
    /// and near-relay measurement pings. Does not touch the socket itself.
    fn due_sends(&mut self, now: f64) -> Vec<(Address, Vec<u8>)> {
        let mut out = Vec::new();

        if self.state == ClientState::Upgraded {
            if self.direct_ping_due(now) {
                if let Some(packet) = self.build_direct_ping(now) {
                    out.push((self.server_address, packet));
                }
                self.mark_direct_ping_sent(now);
            }
            if self.next_ping_due(now) {
                if let Some(packet) = self.build_session_ping(now) {
                    out.push((self.server_address, packet));
                }
                self.mark_next_ping_sent(now);
            }
        }

        let due_relays: Vec<(u64, Address)> = self.relays.relays_due_for_ping(now).map(|r| (r.id, r.address)).collect();
        for (id, address) in due_relays {
            if let Some(relay) = self.relays.relay_mut(id) {
                let sequence = relay.ping_sent(now);
                let mut packet = vec![0u8; filter::FILTER_PREFIX_LEN + 8];
                packet[0] = PacketType::ClientPing as u8;
                packet[filter::FILTER_PREFIX_LEN..].copy_from_slice(&sequence.to_le_bytes());
                filter::write_filter_bytes(&mut packet, &self.local_address, &address, &dispatch::ZERO_MAGICS[0]);
                out.push((address, packet));
            }
        }

        self.route.expire(netnext_crypto::time::timestamp_secs());
        out
    }

    fn counters(&self) -> &Counters {
        &self.counters
    }
}

pub struct Client {
    inner: Arc<Mutex<ClientInner>>,
    commands: Arc<BoundedQueue<Command>>,
    notifications: Arc<BoundedQueue<Notification>>,
    io_thread: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

fn run_io_thread(
    inner: Arc<Mutex<ClientInner>>,
    commands: Arc<BoundedQueue<Command>>,
    notifications: Arc<BoundedQueue<Notification>>,
    shutdown: Arc<AtomicBool>,
    socket: UdpSocket,
    clock: Arc<dyn Clock>,
    logger: Logger,
) {
    let start = clock.now();
    let mut buf = [0u8; 1500];

    while !shutdown.load(Ordering::SeqCst) {
        for command in commands.drain() {
            match command {
                Command::Destroy => return,
                Command::Flush => {
                    let _ = notifications.push(Notification::FlushFinished);
                }
                _ => {}
            }
        }

        match socket.recv_from(&mut buf) {
            Ok((len, from)) => {
                let now = clock.now().duration_since(start).as_secs_f64();
                let mut guard = inner.lock().expect("client mutex poisoned");
                if let Some(reply) = guard.handle_inbound(&buf[..len], Address::from(from), now) {
                    let _ = socket.send_to(&reply, from);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                logging::debug!(logger, "client io thread recv error"; "error" => %e);
            }
        }

        let now = clock.now().duration_since(start).as_secs_f64();
        let mut guard = inner.lock().expect("client mutex poisoned");
        guard.update(now);
        let sends = guard.due_sends(now);
        drop(guard);
        for (address, packet) in sends {
            let _ = socket.send_to(&packet, address.to_string());
        }
    }
}

impl Client {
    pub fn new(logger: Logger, config: Config, bind_address: &str, server_address: Address) -> Result<Client, EndpointError> {
        let socket = UdpSocket::bind(bind_address).map_err(|_| EndpointError::InvalidBindAddress(bind_address.to_string()))?;
        socket.set_read_timeout(Some(IO_THREAD_RECV_TIMEOUT)).map_err(EndpointError::Socket)?;
        let local_address = socket.local_addr().map(Address::from).map_err(EndpointError::Socket)?;

        let inner = Arc::new(Mutex::new(ClientInner::new(config, logger.clone(), server_address, local_address)));
        let commands = Arc::new(BoundedQueue::new(QUEUE_CAPACITY));
        let notifications = Arc::new(BoundedQueue::new(QUEUE_CAPACITY));
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread_socket = socket.try_clone().map_err(EndpointError::Socket)?;
        let thread_inner = Arc::clone(&inner);
        let thread_commands = Arc::clone(&commands);
        let thread_notifications = Arc::clone(&notifications);
        let thread_shutdown = Arc::clone(&shutdown);
        let thread_clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let thread_logger = logger;

        let io_thread = thread::Builder::new()
            .name("netnext-client-io".to_string())
            .spawn(move || {
                run_io_thread(thread_inner, thread_commands, thread_notifications, thread_shutdown, thread_socket, thread_clock, thread_logger);
            })
            .map_err(EndpointError::Thread)?;

        Ok(Client {
            inner,
            commands,
            notifications,
            io_thread: Some(io_thread),
            shutdown,
        })
    }

    pub fn state(&self) -> ClientState {
        self.inner.lock().expect("client mutex poisoned").state()
    }

    pub fn upgraded(&self) -> bool {
        self.inner.lock().expect("client mutex poisoned").upgraded()
    }

    pub fn fallback_to_direct(&self) -> bool {
        self.inner.lock().expect("client mutex poisoned").fallback_to_direct()
    }

    /// The derived send/receive AEAD keys, available once `complete_upgrade` has succeeded.
    pub fn session_keys(&self) -> Option<(aead::Key, aead::Key)> {
        self.inner.lock().expect("client mutex poisoned").session_keys()
    }

    pub fn session_id(&self) -> Option<u64> {
        self.inner.lock().expect("client mutex poisoned").session_id()
    }

    /// The key-exchange public key generated for the in-flight handshake, sent to the server as
    /// part of `UPGRADE_RESPONSE` (§4.7 step 2). `None` outside `Upgrading`.
    pub fn handshake_kx_public(&self) -> Option<kx::PublicKey> {
        self.inner.lock().expect("client mutex poisoned").handshake_kx_public()
    }

    /// Client receipt of the server's first `UPGRADE_REQUEST` (§4.7 step 2).
    pub fn begin_upgrade(&self, session_id: u64, upgrade_token: Vec<u8>, server_kx_public: kx::PublicKey, now: f64) {
        self.inner
            .lock()
            .expect("client mutex poisoned")
            .begin_upgrade(session_id, upgrade_token, server_kx_public, now);
    }

    pub fn upgrade_response_due(&self, now: f64) -> bool {
        self.inner.lock().expect("client mutex poisoned").upgrade_response_due(now)
    }

    pub fn mark_upgrade_response_sent(&self, now: f64) {
        self.inner.lock().expect("client mutex poisoned").mark_upgrade_response_sent(now);
    }

    /// Client receipt of `UPGRADE_CONFIRM` (§4.7 step 4).
    pub fn complete_upgrade(&self, confirmed_server_kx_public: &kx::PublicKey, now: f64) -> bool {
        self.inner.lock().expect("client mutex poisoned").complete_upgrade(confirmed_server_kx_public, now)
    }

    /// Irreversible per session (§4.11). Once called, `state()` never leaves `FallbackToDirect`.
    pub fn fallback(&self, flag: FallbackFlags) {
        self.inner.lock().expect("client mutex poisoned").fallback(flag);
    }

    /// Runs the per-tick cadence checks (§4.8) on the calling thread. The I/O thread runs the same
    /// checks on its own cadence; exposed here too so an application that drives its own update
    /// loop observes state transitions without waiting on the I/O thread's timeout wake-up.
    pub fn update(&self, now: f64) {
        self.inner.lock().expect("client mutex poisoned").update(now);
    }

    pub fn direct_ping_due(&self, now: f64) -> bool {
        self.inner.lock().expect("client mutex poisoned").direct_ping_due(now)
    }

    pub fn mark_direct_ping_sent(&self, now: f64) {
        self.inner.lock().expect("client mutex poisoned").mark_direct_ping_sent(now);
    }

    pub fn direct_pong_received(&self, now: f64) {
        self.inner.lock().expect("client mutex poisoned").direct_pong_received(now);
    }

    pub fn next_ping_due(&self, now: f64) -> bool {
        self.inner.lock().expect("client mutex poisoned").next_ping_due(now)
    }

    pub fn mark_next_ping_sent(&self, now: f64) {
        self.inner.lock().expect("client mutex poisoned").mark_next_ping_sent(now);
    }

    pub fn next_pong_received(&self, now: f64) {
        self.inner.lock().expect("client mutex poisoned").next_pong_received(now);
    }

    pub fn stats_report_due(&self, now: f64) -> bool {
        self.inner.lock().expect("client mutex poisoned").stats_report_due(now)
    }

    pub fn mark_stats_reported(&self, now: f64) {
        self.inner.lock().expect("client mutex poisoned").mark_stats_reported(now);
    }

    pub fn arm_route_update_timeout(&self, now: f64) {
        self.inner.lock().expect("client mutex poisoned").arm_route_update_timeout(now);
    }

    pub fn clear_route_update_timeout(&self) {
        self.inner.lock().expect("client mutex poisoned").clear_route_update_timeout();
    }

    /// Queues a command for the I/O thread from the application thread (§5).
    pub fn enqueue_command(&self, command: Command) -> bool {
        self.commands.push(command)
    }

    /// Drains notifications posted by the I/O thread, invoking `on_notification` for each
    /// (§5 "update thread... fires the user's packet-received callback").
    pub fn update_notifications<F: FnMut(Notification)>(&self, mut on_notification: F) {
        for notification in self.notifications.drain() {
            on_notification(notification);
        }
    }

    pub fn counters(&self) -> Counters {
        let guard = self.inner.lock().expect("client mutex poisoned");
        let counters = guard.counters();
        let mut copy = Counters::new();
        for counter in [
            Counter::OpenSession,
            Counter::CloseSession,
            Counter::UpgradeSession,
            Counter::FallbackToDirect,
            Counter::PacketSentDirect,
            Counter::PacketReceivedDirect,
            Counter::PacketSentNext,
            Counter::PacketReceivedNext,
        ] {
            for _ in 0..counters.get(counter) {
                copy.increment(counter);
            }
        }
        copy
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.commands.push(Command::Destroy);
        if let Some(handle) = self.io_thread.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn client() -> Client {
        let logger = netnext_crypto::logging::init();
        Client::new(logger, Config::default(), "127.0.0.1:0", Address::V4(Ipv4Addr::new(127, 0, 0, 1), 40000)).unwrap()
    }

    #[test]
    fn starts_in_passthrough_with_no_session() {
        let c = client();
        assert_eq!(c.state(), ClientState::Passthrough);
        assert_eq!(c.session_id(), None);
    }

    #[test]
    fn upgrade_confirm_with_matching_key_promotes_to_upgraded() {
        let c = client();
        let (server_kx_public, server_kx_secret) = kx::generate_keypair();
        c.begin_upgrade(777, vec![1, 2, 3], server_kx_public, 0.0);
        assert_eq!(c.state(), ClientState::Upgrading);

        assert!(c.complete_upgrade(&server_kx_public, 0.5));
        assert_eq!(c.state(), ClientState::Upgraded);
        assert_eq!(c.session_id(), Some(777));
        let _ = server_kx_secret;
    }

    #[test]
    fn upgrade_confirm_with_wrong_key_is_rejected() {
        let c = client();
        let (server_kx_public, _) = kx::generate_keypair();
        let (other_public, _) = kx::generate_keypair();
        c.begin_upgrade(1, vec![], server_kx_public, 0.0);

        assert!(!c.complete_upgrade(&other_public, 0.1));
        assert_eq!(c.state(), ClientState::Upgrading);
    }

    #[test]
    fn upgrade_timeout_triggers_fallback() {
        let c = client();
        let (server_kx_public, _) = kx::generate_keypair();
        c.begin_upgrade(1, vec![], server_kx_public, 0.0);

        c.update(5.0);
        assert!(c.fallback_to_direct());
    }

    #[test]
    fn direct_pong_timeout_triggers_fallback_once_upgraded() {
        let c = client();
        let (server_kx_public, _) = kx::generate_keypair();
        c.begin_upgrade(1, vec![], server_kx_public, 0.0);
        c.complete_upgrade(&server_kx_public, 0.0);

        c.update(6.0);
        assert!(c.fallback_to_direct());
    }

    #[test]
    fn fallback_is_irreversible() {
        let c = client();
        c.fallback(FallbackFlags::DIRECT_PONG_TIMED_OUT);
        assert!(c.fallback_to_direct());
        // A later update must never clear it.
        c.update(1000.0);
        assert!(c.fallback_to_direct());
    }

    #[test]
    fn direct_ping_cadence_is_five_hertz() {
        let c = client();
        assert!(c.direct_ping_due(0.0));
    }

    #[test]
    fn route_update_installs_pending_route_and_acks() {
        let c = client();
        let (server_kx_public, _) = kx::generate_keypair();
        c.begin_upgrade(42, vec![], server_kx_public, 0.0);
        c.complete_upgrade(&server_kx_public, 0.0);
        let (send_key, receive_key) = c.session_keys().unwrap();

        let token = tokens::RouteTokenPlain {
            expire_timestamp: 1_000_000,
            session_id: 42,
            session_version: 1,
            kbps_up: 512,
            kbps_down: 512,
            next_address: Address::None,
            session_private_key: [9u8; aead::KEY_SIZE],
        };
        let sealed_token = tokens::seal_route_token(&token, &receive_key).unwrap();

        let ctx = HeaderContext { session_id: 42, session_version: 0 };
        let mut packet = Vec::new();
        header::write_header(&mut packet, PacketType::RouteUpdate as u8, 7, &sealed_token, &ctx, &receive_key).unwrap();

        let reply = {
            let mut guard = c.inner.lock().unwrap();
            guard.handle_route_update(&packet, 1.0)
        };
        assert!(reply.is_some());
        let _ = send_key;
    }
}
