//! Server endpoint (§4.7, §4.9, §5). Owns upgrade issuance, the backend init/update cadence,
//! per-session route envelopes and token acceptance, and magic rotation. Runs a dedicated I/O
//! thread that blocks on the socket with a 100 ms timeout, classifies and dispatches every inbound
//! datagram (`wire::dispatch`), drives the backend/session cadence off a `Clock`, and replies in
//! place; the application calls `update_notifications` on its own thread to drain notifications.
use crate::address::Address;
use crate::concurrency::{BoundedQueue, Command, Notification, QUEUE_CAPACITY};
use crate::config::Config;
use crate::counters::{Counter, Counters};
use crate::error::{EndpointError, RouteError};
use crate::route::RouteSlot;
use crate::session::{FallbackFlags, PendingSession, ServerSession};
use crate::stats::bandwidth;
use crate::tables::Table;
use crate::wire::dispatch;
use crate::wire::filter;
use crate::wire::header::{self, HeaderContext};
use crate::wire::packet_type::PacketType;
use crate::wire::tokens::{self, UpgradeTokenPlain};
use netnext_crypto::logging;
use netnext_crypto::logging::Logger;
use netnext_crypto::time::{Clock, SystemClock};
use netnext_crypto::{aead, kx, secretbox};
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const BACKEND_INIT_RESEND_INTERVAL: f64 = 1.0;
const BACKEND_INIT_TIMEOUT: f64 = 9.0;
const SERVER_UPDATE_INTERVAL: f64 = 10.0;
const IO_THREAD_RECV_TIMEOUT: Duration = Duration::from_millis(100);

// SESSION_UPDATE_INTERVAL / ROUTE_UPDATE_RESEND_INTERVAL / ROUTE_UPDATE_TIMEOUT size the full
// backend session-update and route-resend cadence (§4.9); this reduced SDK has no backend client
// driving that loop on its own, so the owning application calls `issue_route`/`sweep_timeouts`
// directly instead. Dropped rather than kept unused.

/// Conservative default envelope for path bandwidth accounting: this reduced SDK has no live
/// backend connection to hand down a negotiated `kbps_up`/`kbps_down` per session, so direct/next
/// traffic is tracked against a fixed budget rather than skipping bandwidth accounting entirely.
const DIRECT_BANDWIDTH_ENVELOPE_KBPS: f64 = 256.0;
/// Budget guarding what the server is willing to push back to one client address, independent of
/// the per-path `PathStats` bandwidth fields (those account the session's own ping traffic).
const PROXY_BANDWIDTH_ENVELOPE_KBPS: f64 = 512.0;

/// Magic rotation triple (§3.1, §6.2). Every received datagram must validate under one of the
/// three; every sent datagram uses `current`.
#[derive(Clone, Copy)]
pub struct MagicTriple {
    pub previous: [u8; 8],
    pub current: [u8; 8],
    pub upcoming: [u8; 8],
}

impl MagicTriple {
    pub fn zeroed() -> MagicTriple {
        MagicTriple {
            previous: [0u8; 8],
            current: [0u8; 8],
            upcoming: [0u8; 8],
        }
    }

    pub fn as_array(&self) -> [[u8; 8]; 3] {
        [self.current, self.upcoming, self.previous]
    }

    /// Rotates in a freshly backend-issued magic: the old `current` becomes `previous`, `upcoming`
    /// becomes `current`, and the new value becomes `upcoming` (§3.1 "soft cutover window").
    pub fn rotate(&mut self, new_upcoming: [u8; 8]) {
        self.previous = self.current;
        self.current = self.upcoming;
        self.upcoming = new_upcoming;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Initializing,
    Initialized,
    DirectOnly,
}

/// A lightweight, address-keyed shadow of an established session used only to bandwidth-gate
/// traffic the server pushes back to a client (§4.4), grounded on `next_proxy_session_manager.h`'s
/// separation of a fast, address-keyed forwarding table from the full session-id-keyed manager.
pub struct ProxySessionEntry {
    pub address: Address,
    pub session_id: u64,
    pub send_bandwidth: bandwidth::BandwidthLimiter,
}

struct ServerInner {
    config: Config,
    logger: Logger,
    bind_address: Address,

    buyer_id: u64,
    datacenter_id: u64,
    signing_secret_key: Option<netnext_crypto::sign::SecretKey>,

    backend_state: BackendState,
    backend_init_start_time: f64,
    last_backend_init_send_time: f64,
    last_server_update_time: f64,

    magic: MagicTriple,

    pending_sessions: Table<PendingSession>,
    sessions_by_address: Table<ServerSession>,
    proxy_sessions: Table<ProxySessionEntry>,

    counters: Counters,
    notifications: Arc<BoundedQueue<Notification>>,
}

impl ServerInner {
    fn new(
        config: Config,
        logger: Logger,
        bind_address: Address,
        buyer_id: u64,
        datacenter_id: u64,
        signing_secret_key: Option<netnext_crypto::sign::SecretKey>,
        notifications: Arc<BoundedQueue<Notification>>,
    ) -> ServerInner {
        let backend_state = if config.disable_network_next {
            BackendState::DirectOnly
        } else {
            BackendState::Initializing
        };

        ServerInner {
            config,
            logger,
            bind_address,
            buyer_id,
            datacenter_id,
            signing_secret_key,
            backend_state,
            backend_init_start_time: 0.0,
            last_backend_init_send_time: -1.0,
            last_server_update_time: -1.0,
            magic: MagicTriple::zeroed(),
            pending_sessions: Table::with_capacity(64),
            sessions_by_address: Table::with_capacity(256),
            proxy_sessions: Table::with_capacity(256),
            counters: Counters::new(),
            notifications,
        }
    }

    fn backend_state(&self) -> BackendState {
        self.backend_state
    }

    fn magic(&self) -> MagicTriple {
        self.magic
    }

    fn rotate_magic(&mut self, new_upcoming: [u8; 8]) {
        self.magic.rotate(new_upcoming);
        let _ = self.notifications.push(Notification::MagicUpdated);
    }

    /// Backend init cadence (§4.9): resend at 1 Hz until acknowledged, direct-only after 9 s.
    fn backend_init_resend_due(&self, now: f64) -> bool {
        self.backend_state == BackendState::Initializing
            && (self.last_backend_init_send_time < 0.0 || now - self.last_backend_init_send_time >= BACKEND_INIT_RESEND_INTERVAL)
    }

    fn mark_backend_init_sent(&mut self, now: f64) {
        if self.last_backend_init_send_time < 0.0 {
            self.backend_init_start_time = now;
        }
        self.last_backend_init_send_time = now;
    }

    fn backend_init_succeeded(&mut self) {
        self.backend_state = BackendState::Initialized;
    }

    /// Called from the periodic tick; transitions to direct-only (never retried) past the 9 s
    /// timeout (§4.9).
    fn check_backend_init_timeout(&mut self, now: f64) {
        if self.backend_state == BackendState::Initializing && now - self.backend_init_start_time >= BACKEND_INIT_TIMEOUT {
            self.backend_state = BackendState::DirectOnly;
            let _ = self.notifications.push(Notification::DirectOnly);
        }
    }

    fn server_update_due(&self, now: f64) -> bool {
        self.backend_state == BackendState::Initialized
            && (self.last_server_update_time < 0.0 || now - self.last_server_update_time >= SERVER_UPDATE_INTERVAL)
    }

    fn mark_server_updated(&mut self, now: f64) {
        self.last_server_update_time = now;
    }

    /// Mints a session id, a secretbox key, and an upgrade token, and records a pending entry
    /// (§4.7 step 1).
    fn upgrade_address(&mut self, address: Address, user_hash: u64, now: f64) -> Result<Vec<u8>, EndpointError> {
        let session_id = netnext_crypto::random::random_nonzero_u64();
        let mut secretbox_key = [0u8; secretbox::KEY_SIZE];
        netnext_crypto::random::random_bytes(&mut secretbox_key);

        let plain = UpgradeTokenPlain {
            session_id,
            expire_timestamp: (now + PendingSession::TIMEOUT_SECONDS) as u64,
            client_address: address,
            server_address: self.bind_address,
        };
        let sealed = tokens::seal_upgrade_token(&plain, &secretbox_key).map_err(EndpointError::Socket)?;

        self.pending_sessions.add(
            session_id,
            address,
            PendingSession {
                address,
                session_id,
                user_hash,
                upgrade_time: now,
                last_packet_send_time: now,
                ephemeral_secretbox_key: secretbox_key,
                upgrade_token: sealed.clone(),
            },
        );
        self.counters.increment(Counter::OpenSession);
        Ok(sealed)
    }

    /// Server receipt of `UPGRADE_RESPONSE` (§4.7 step 3). Re-decrypts the echoed token with the
    /// pending session's key, checks the client address matches and the token has not expired,
    /// derives session keys by key exchange, and promotes the pending entry into the session
    /// table (and its proxy-session shadow).
    fn complete_upgrade(
        &mut self,
        from: Address,
        echoed_token: &[u8],
        client_kx_public: &kx::PublicKey,
        server_kx_public: &kx::PublicKey,
        server_kx_secret: &kx::SecretKey,
        now: f64,
    ) -> Result<u64, EndpointError> {
        let pending = self
            .pending_sessions
            .find_by_address(&from)
            .ok_or_else(|| EndpointError::InvalidServerAddress(from.to_string()))?;
        let secretbox_key = pending.ephemeral_secretbox_key;
        let user_hash = pending.user_hash;

        let plain = tokens::open_upgrade_token(echoed_token, &secretbox_key)
            .ok_or_else(|| EndpointError::InvalidServerAddress("token failed to authenticate".to_string()))?;

        if plain.client_address != from || (plain.expire_timestamp as f64) < now {
            self.pending_sessions.remove_by_key(plain.session_id);
            return Err(EndpointError::InvalidServerAddress("upgrade token mismatch or expired".to_string()));
        }

        let keys = kx::server_session_keys(server_kx_public, server_kx_secret, client_kx_public)
            .ok_or_else(|| EndpointError::InvalidServerAddress("key exchange failed".to_string()))?;

        let session_id = plain.session_id;
        self.pending_sessions.remove_by_key(session_id);

        self.sessions_by_address.add(
            session_id,
            from,
            ServerSession::new(from, session_id, user_hash, keys.receive, keys.send, now),
        );
        self.proxy_sessions.add(
            session_id,
            from,
            ProxySessionEntry {
                address: from,
                session_id,
                send_bandwidth: bandwidth::BandwidthLimiter::new(),
            },
        );
        self.counters.increment(Counter::UpgradeSession);
        let _ = self.notifications.push(Notification::Upgraded { session_id });
        Ok(session_id)
    }

    /// Sweeps pending entries past their 5 s timeout (§3.3) and sessions past the 60 s
    /// server-side table timeout (§4.9), evicting both (and the session's proxy shadow). Also
    /// rolls each live session's packet-loss window forward so loss is measured on a cadence
    /// rather than only at packet-receipt time.
    fn sweep_timeouts(&mut self, now: f64) {
        let timed_out_pending: Vec<(u64, Address)> = self
            .pending_sessions
            .iter_mut()
            .filter(|p| p.has_timed_out(now))
            .map(|p| (p.session_id, p.address))
            .collect();
        for (session_id, address) in timed_out_pending {
            self.pending_sessions.remove_by_key(session_id);
            let _ = self.notifications.push(Notification::PendingSessionTimedOut { address });
        }

        let mut timed_out_ids = Vec::new();
        for session in self.sessions_by_address.iter_mut() {
            if session.has_timed_out_of_table(now) {
                timed_out_ids.push(session.session_id);
                continue;
            }
            session.route.expire(netnext_crypto::time::timestamp_secs());
            let lost = session.direct_stats.packet_loss.update() + session.next_stats.packet_loss.update();
            for _ in 0..lost {
                session.counters.increment(Counter::PacketsLostClientToServer);
            }
        }
        for id in timed_out_ids {
            self.sessions_by_address.remove_by_key(id);
            self.proxy_sessions.remove_by_key(id);
            let _ = self.notifications.push(Notification::SessionTimedOut { session_id: id });
        }
    }

    fn session_count(&self) -> usize {
        self.sessions_by_address.len()
    }

    fn has_session(&self, session_id: u64) -> bool {
        self.sessions_by_address.find_by_key(session_id).is_some()
    }

    /// Fallback/route-abort bookkeeping shared by every route/continue rejection path (§4.11,
    /// §7 `RouteAbort`): the session stays direct, a flag bit queues for the next backend update.
    fn record_route_error(&mut self, session_id: u64, error: RouteError) {
        if let Some(session) = self.sessions_by_address.find_by_key_mut(session_id) {
            let flag = match error {
                RouteError::BadRouteToken => FallbackFlags::BAD_ROUTE_TOKEN,
                RouteError::BadContinueToken => FallbackFlags::BAD_CONTINUE_TOKEN,
                RouteError::NoRouteToContinue => FallbackFlags::NO_ROUTE_TO_CONTINUE,
                RouteError::RouteExpired => FallbackFlags::ROUTE_EXPIRED,
                RouteError::WrongSessionVersion | RouteError::UnknownSession => FallbackFlags::BAD_CONTINUE_TOKEN,
            };
            session.fallback_flags.set(flag);
        }
    }

    fn counters(&self) -> &Counters {
        &self.counters
    }

    fn account_proxy_send(&mut self, session_id: u64, now: f64, bits: u64) {
        let over = self
            .proxy_sessions
            .find_by_key_mut(session_id)
            .map(|p| p.send_bandwidth.add_packet(now, PROXY_BANDWIDTH_ENVELOPE_KBPS, bits))
            .unwrap_or(false);
        if over {
            logging::debug!(self.logger, "proxy session exceeds bandwidth budget"; "session_id" => session_id);
        }
    }

    /// Entry point for every inbound datagram, invoked by the I/O thread after a successful
    /// `recv_from`. Returns bytes to send back to `from`, if any.
    fn handle_inbound(&mut self, datagram: &[u8], from: Address, now: f64) -> Option<Vec<u8>> {
        let classified = dispatch::classify(datagram, &from, &self.bind_address, &dispatch::ZERO_MAGICS).ok()?;
        match classified.packet_type {
            PacketType::DirectPing => self.handle_direct_ping(classified.body, from, now),
            PacketType::SessionPing => self.handle_session_ping(classified.body, from, now),
            PacketType::RouteUpdateAck => self.handle_route_update_ack(classified.body, from, now),
            _ => None,
        }
    }

    fn handle_direct_ping(&mut self, body: &[u8], from: Address, now: f64) -> Option<Vec<u8>> {
        let bind_address = self.bind_address;
        let session = self.sessions_by_address.find_by_address_mut(&from)?;
        let session_id = session.session_id;
        let ctx = HeaderContext { session_id, session_version: 0 };
        let decoded = header::read_header(body, &ctx, &session.receive_key).ok()?;
        if session.replay.special.already_received(decoded.sequence) {
            return None;
        }
        session.replay.special.advance(decoded.sequence);
        session.direct_stats.packet_loss.packet_received(decoded.sequence);
        session.direct_stats.out_of_order.packet_received(decoded.sequence);
        session.direct_stats.jitter.packet_received(decoded.sequence, now);
        let bits = bandwidth::wire_packet_bits(decoded.body.len());
        session.direct_stats.bandwidth.add_packet(now, DIRECT_BANDWIDTH_ENVELOPE_KBPS, bits);
        session.counters.increment(Counter::PacketReceivedDirect);
        let wire_seq = session.next_special_sequence();
        let send_key = session.send_key;
        let packet = seal_packet(bind_address, &dispatch::ZERO_MAGICS[0], PacketType::DirectPong, wire_seq, &decoded.body, session_id, 0, &send_key, from);
        session.counters.increment(Counter::PacketSentDirect);

        self.account_proxy_send(session_id, now, bits);
        Some(packet)
    }

    fn handle_session_ping(&mut self, body: &[u8], from: Address, now: f64) -> Option<Vec<u8>> {
        let bind_address = self.bind_address;
        let session = self.sessions_by_address.find_by_address_mut(&from)?;
        if !session.route.has_current_route() {
            return None;
        }
        let session_id = session.session_id;
        let (_matched, decoded) = session.route.try_decrypt(body, session_id)?;
        if session.replay.special.already_received(decoded.sequence) {
            return None;
        }
        session.replay.special.advance(decoded.sequence);
        session.next_stats.packet_loss.packet_received(decoded.sequence);
        session.next_stats.out_of_order.packet_received(decoded.sequence);
        session.next_stats.jitter.packet_received(decoded.sequence, now);
        let bits = bandwidth::wire_packet_bits(decoded.body.len());
        session.next_stats.bandwidth.add_packet(now, DIRECT_BANDWIDTH_ENVELOPE_KBPS, bits);
        session.counters.increment(Counter::PacketReceivedNext);
        let version = session.route.current_session_version()?;
        let key = *session.route.current_key()?;
        let wire_seq = session.next_special_sequence();
        let packet = seal_packet(bind_address, &dispatch::ZERO_MAGICS[0], PacketType::SessionPong, wire_seq, &decoded.body, session_id, version, &key, from);
        session.counters.increment(Counter::PacketSentNext);

        self.account_proxy_send(session_id, now, bits);
        Some(packet)
    }

    /// `ROUTE_UPDATE_ACK` rides the session's own AEAD key (§4.6), unlike `SESSION_PING`/`PONG`
    /// which ride the route key: it confirms a pending slot was installed, it doesn't carry
    /// traffic over the route itself. Cutover to the new key happens on the next successful
    /// `try_decrypt`, not here.
    fn handle_route_update_ack(&mut self, body: &[u8], from: Address, _now: f64) -> Option<Vec<u8>> {
        let session = self.sessions_by_address.find_by_address_mut(&from)?;
        let version = session.route.current_session_version().unwrap_or(0);
        let ctx = HeaderContext {
            session_id: session.session_id,
            session_version: version,
        };
        let decoded = header::read_header(body, &ctx, &session.receive_key).ok()?;
        if session.replay.special.already_received(decoded.sequence) {
            return None;
        }
        session.replay.special.advance(decoded.sequence);
        session.counters.increment(Counter::PacketReceivedNext);
        None
    }

    /// Issues a fresh route to an established session: mints a per-hop session key, seals a
    /// `ROUTE_UPDATE` token for the client, and mirrors the route into this session's own
    /// `RouteManager` so a subsequent `SESSION_PING` encrypted under the new key trial-decrypts
    /// successfully (§4.6). Driven by the owning application's own backend integration; this
    /// reduced SDK has no backend client of its own deciding when and where to route a session.
    fn issue_route(&mut self, session_id: u64, next_address: Address, kbps_up: u32, kbps_down: u32, expire_timestamp: u64) -> Option<Vec<u8>> {
        let bind_address = self.bind_address;
        let session = self.sessions_by_address.find_by_key_mut(session_id)?;
        let next_version = session.route.current_session_version().map(|v| v.wrapping_add(1)).unwrap_or(1);

        let mut session_private_key = [0u8; aead::KEY_SIZE];
        netnext_crypto::random::random_bytes(&mut session_private_key);

        let plain = tokens::RouteTokenPlain {
            expire_timestamp,
            session_id,
            session_version: next_version,
            kbps_up,
            kbps_down,
            next_address,
            session_private_key,
        };
        let send_key = session.send_key;
        let sealed_token = tokens::seal_route_token(&plain, &send_key).ok()?;

        session
            .route
            .install_pending(RouteSlot {
                session_version: next_version,
                expire_timestamp,
                key: session_private_key,
            })
            .ok()?;

        let wire_seq = session.next_special_sequence();
        let address = session.address;
        Some(seal_packet(bind_address, &dispatch::ZERO_MAGICS[0], PacketType::RouteUpdate, wire_seq, &sealed_token, session_id, 0, &send_key, address))
    }
}

/// Builds a filtered, AEAD-sealed datagram from the server to `remote`. `key` seals the header
/// (and, for route-plane packets, is the route key rather than the session key); `magic` is
/// always the server's own current magic (§3.1).
fn seal_packet(
    local: Address,
    magic: &[u8; 8],
    packet_type: PacketType,
    sequence: u64,
    body: &[u8],
    session_id: u64,
    session_version: u8,
    key: &aead::Key,
    remote: Address,
) -> Vec<u8> {
    let ctx = HeaderContext { session_id, session_version };
    let mut packet = vec![0u8; filter::FILTER_PREFIX_LEN];
    packet[0] = packet_type as u8;
    header::write_header(&mut packet, packet_type as u8, sequence, body, &ctx, key).expect("sealing with a valid key cannot fail");
    filter::write_filter_bytes(&mut packet, &local, &remote, magic);
    packet
}

pub struct Server {
    inner: Arc<Mutex<ServerInner>>,
    commands: Arc<BoundedQueue<Command>>,
    notifications: Arc<BoundedQueue<Notification>>,
    io_thread: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

/// A read-only view of one live session, holding the server's mutex for as long as it lives.
/// Exists because a `&ServerSession` borrowed out of a `MutexGuard` can't be returned on its own —
/// the guard has to come along for the ride.
pub struct SessionRef<'a> {
    guard: MutexGuard<'a, ServerInner>,
    session_id: u64,
}

impl<'a> std::ops::Deref for SessionRef<'a> {
    type Target = ServerSession;

    fn deref(&self) -> &ServerSession {
        self.guard
            .sessions_by_address
            .find_by_key(self.session_id)
            .expect("session present at lookup time vanished while the lock was held")
    }
}

fn run_io_thread(
    inner: Arc<Mutex<ServerInner>>,
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
                let mut guard = inner.lock().expect("server mutex poisoned");
                if let Some(reply) = guard.handle_inbound(&buf[..len], Address::from(from), now) {
                    let _ = socket.send_to(&reply, from);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                logging::debug!(logger, "server io thread recv error"; "error" => %e);
            }
        }

        let now = clock.now().duration_since(start).as_secs_f64();
        let mut guard = inner.lock().expect("server mutex poisoned");
        guard.check_backend_init_timeout(now);
        guard.sweep_timeouts(now);
    }
}

impl Server {
    pub fn new(
        logger: Logger,
        config: Config,
        bind_address_str: &str,
        buyer_id: u64,
        datacenter_id: u64,
        signing_secret_key: Option<netnext_crypto::sign::SecretKey>,
    ) -> Result<Server, EndpointError> {
        if signing_secret_key.is_none() && !config.disable_network_next {
            return Err(EndpointError::MissingBuyerKey);
        }

        let socket = UdpSocket::bind(bind_address_str)
            .map_err(|_| EndpointError::InvalidBindAddress(bind_address_str.to_string()))?;
        socket
            .set_read_timeout(Some(IO_THREAD_RECV_TIMEOUT))
            .map_err(EndpointError::Socket)?;
        let bind_address = socket.local_addr().map(Address::from).unwrap_or(Address::None);

        let notifications = Arc::new(BoundedQueue::new(QUEUE_CAPACITY));
        let commands = Arc::new(BoundedQueue::new(QUEUE_CAPACITY));
        let shutdown = Arc::new(AtomicBool::new(false));

        let inner = Arc::new(Mutex::new(ServerInner::new(
            config,
            logger.clone(),
            bind_address,
            buyer_id,
            datacenter_id,
            signing_secret_key,
            Arc::clone(&notifications),
        )));

        let thread_socket = socket.try_clone().map_err(EndpointError::Socket)?;
        let thread_inner = Arc::clone(&inner);
        let thread_commands = Arc::clone(&commands);
        let thread_notifications = Arc::clone(&notifications);
        let thread_shutdown = Arc::clone(&shutdown);
        let thread_clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let thread_logger = logger;

        let io_thread = thread::Builder::new()
            .name("netnext-server-io".to_string())
            .spawn(move || {
                run_io_thread(thread_inner, thread_commands, thread_notifications, thread_shutdown, thread_socket, thread_clock, thread_logger);
            })
            .map_err(EndpointError::Thread)?;

        Ok(Server {
            inner,
            commands,
            notifications,
            io_thread: Some(io_thread),
            shutdown,
        })
    }

    pub fn backend_state(&self) -> BackendState {
        self.inner.lock().expect("server mutex poisoned").backend_state()
    }

    pub fn magic(&self) -> MagicTriple {
        self.inner.lock().expect("server mutex poisoned").magic()
    }

    pub fn rotate_magic(&self, new_upcoming: [u8; 8]) {
        self.inner.lock().expect("server mutex poisoned").rotate_magic(new_upcoming);
    }

    pub fn backend_init_resend_due(&self, now: f64) -> bool {
        self.inner.lock().expect("server mutex poisoned").backend_init_resend_due(now)
    }

    pub fn mark_backend_init_sent(&self, now: f64) {
        self.inner.lock().expect("server mutex poisoned").mark_backend_init_sent(now);
    }

    pub fn backend_init_succeeded(&self) {
        self.inner.lock().expect("server mutex poisoned").backend_init_succeeded();
    }

    pub fn check_backend_init_timeout(&self, now: f64) {
        self.inner.lock().expect("server mutex poisoned").check_backend_init_timeout(now);
    }

    pub fn server_update_due(&self, now: f64) -> bool {
        self.inner.lock().expect("server mutex poisoned").server_update_due(now)
    }

    pub fn mark_server_updated(&self, now: f64) {
        self.inner.lock().expect("server mutex poisoned").mark_server_updated(now);
    }

    pub fn upgrade_address(&self, address: Address, user_hash: u64, now: f64) -> Result<Vec<u8>, EndpointError> {
        self.inner.lock().expect("server mutex poisoned").upgrade_address(address, user_hash, now)
    }

    pub fn complete_upgrade(
        &self,
        from: Address,
        echoed_token: &[u8],
        client_kx_public: &kx::PublicKey,
        server_kx_public: &kx::PublicKey,
        server_kx_secret: &kx::SecretKey,
        now: f64,
    ) -> Result<u64, EndpointError> {
        self.inner
            .lock()
            .expect("server mutex poisoned")
            .complete_upgrade(from, echoed_token, client_kx_public, server_kx_public, server_kx_secret, now)
    }

    pub fn sweep_timeouts(&self, now: f64) {
        self.inner.lock().expect("server mutex poisoned").sweep_timeouts(now);
    }

    pub fn session_count(&self) -> usize {
        self.inner.lock().expect("server mutex poisoned").session_count()
    }

    /// Looks up a live session by id, holding the server's lock for as long as the returned
    /// `SessionRef` is alive. Returns a guard-backed view rather than `&mut ServerSession`
    /// directly: the session table now lives behind the same mutex the I/O thread locks while
    /// dispatching, so no caller can be handed a reference that outlives a single lock
    /// acquisition.
    pub fn find_session_mut(&self, session_id: u64) -> Option<SessionRef<'_>> {
        let guard = self.inner.lock().expect("server mutex poisoned");
        if guard.has_session(session_id) {
            Some(SessionRef { guard, session_id })
        } else {
            None
        }
    }

    pub fn issue_route(&self, session_id: u64, next_address: Address, kbps_up: u32, kbps_down: u32, expire_timestamp: u64) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .expect("server mutex poisoned")
            .issue_route(session_id, next_address, kbps_up, kbps_down, expire_timestamp)
    }

    pub fn record_route_error(&self, session_id: u64, error: RouteError) {
        self.inner.lock().expect("server mutex poisoned").record_route_error(session_id, error);
    }

    pub fn counters(&self) -> Counters {
        let guard = self.inner.lock().expect("server mutex poisoned");
        let counters = guard.counters();
        let mut copy = Counters::new();
        for counter in [
            Counter::OpenSession,
            Counter::CloseSession,
            Counter::UpgradeSession,
            Counter::FallbackToDirect,
            Counter::PacketSentPassthrough,
            Counter::PacketReceivedPassthrough,
            Counter::PacketSentDirect,
            Counter::PacketReceivedDirect,
            Counter::PacketSentNext,
            Counter::PacketReceivedNext,
            Counter::Multipath,
            Counter::PacketsLostClientToServer,
            Counter::PacketsLostServerToClient,
            Counter::PacketsOutOfOrderClientToServer,
            Counter::PacketsOutOfOrderServerToClient,
        ] {
            for _ in 0..counters.get(counter) {
                copy.increment(counter);
            }
        }
        copy
    }

    pub fn enqueue_command(&self, command: Command) -> bool {
        self.commands.push(command)
    }

    pub fn update_notifications<F: FnMut(Notification)>(&self, mut on_notification: F) {
        for notification in self.notifications.drain() {
            on_notification(notification);
        }
    }
}

impl Drop for Server {
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

    fn server() -> Server {
        let logger = netnext_crypto::logging::init();
        let (_, secret) = netnext_crypto::sign::generate_keypair();
        Server::new(logger, Config::default(), "127.0.0.1:0", 1, 1, Some(secret)).unwrap()
    }

    fn client_addr() -> Address {
        Address::V4(Ipv4Addr::new(127, 0, 0, 1), 40000)
    }

    #[test]
    fn starts_initializing_unless_network_next_disabled() {
        let s = server();
        assert_eq!(s.backend_state(), BackendState::Initializing);
    }

    #[test]
    fn disabled_network_next_starts_direct_only() {
        let logger = netnext_crypto::logging::init();
        let mut config = Config::default();
        config.disable_network_next = true;
        let s = Server::new(logger, config, "127.0.0.1:0", 1, 1, None).unwrap();
        assert_eq!(s.backend_state(), BackendState::DirectOnly);
    }

    #[test]
    fn missing_buyer_key_fails_construction_when_network_next_enabled() {
        let logger = netnext_crypto::logging::init();
        assert!(Server::new(logger, Config::default(), "127.0.0.1:0", 1, 1, None).is_err());
    }

    #[test]
    fn backend_init_timeout_enters_direct_only() {
        let s = server();
        s.mark_backend_init_sent(0.0);
        s.check_backend_init_timeout(9.0);
        assert_eq!(s.backend_state(), BackendState::DirectOnly);
    }

    #[test]
    fn upgrade_then_complete_promotes_to_session_table() {
        let s = server();
        let sealed_token = s.upgrade_address(client_addr(), 42, 0.0).unwrap();

        let (client_kx_public, client_kx_secret) = kx::generate_keypair();
        let (server_kx_public, server_kx_secret) = kx::generate_keypair();
        let _ = client_kx_secret;

        let session_id = s
            .complete_upgrade(client_addr(), &sealed_token, &client_kx_public, &server_kx_public, &server_kx_secret, 1.0)
            .unwrap();

        assert_eq!(s.session_count(), 1);
        assert!(s.find_session_mut(session_id).is_some());
    }

    #[test]
    fn magic_rotation_shifts_the_triple() {
        let s = server();
        let original_current = s.magic().current;
        s.rotate_magic([9u8; 8]);
        assert_eq!(s.magic().previous, original_current);
        assert_eq!(s.magic().upcoming, [9u8; 8]);
    }

    #[test]
    fn session_table_evicts_after_sixty_seconds_idle() {
        let s = server();
        let sealed_token = s.upgrade_address(client_addr(), 1, 0.0).unwrap();
        let (client_kx_public, _) = kx::generate_keypair();
        let (server_kx_public, server_kx_secret) = kx::generate_keypair();
        s.complete_upgrade(client_addr(), &sealed_token, &client_kx_public, &server_kx_public, &server_kx_secret, 0.0)
            .unwrap();

        assert_eq!(s.session_count(), 1);
        s.sweep_timeouts(60.0);
        assert_eq!(s.session_count(), 0);
    }

    #[test]
    fn direct_ping_round_trips_into_a_direct_pong() {
        let s = server();
        let sealed_token = s.upgrade_address(client_addr(), 7, 0.0).unwrap();
        let (client_kx_public, client_kx_secret) = kx::generate_keypair();
        let (server_kx_public, server_kx_secret) = kx::generate_keypair();
        let session_id = s
            .complete_upgrade(client_addr(), &sealed_token, &client_kx_public, &server_kx_public, &server_kx_secret, 0.0)
            .unwrap();
        let client_keys = kx::client_session_keys(&client_kx_public, &client_kx_secret, &server_kx_public).unwrap();

        let ctx = HeaderContext { session_id, session_version: 0 };
        let mut packet = Vec::new();
        header::write_header(&mut packet, PacketType::DirectPing as u8, 1, &7u64.to_le_bytes(), &ctx, &client_keys.send).unwrap();

        let reply = {
            let mut guard = s.inner.lock().unwrap();
            guard.handle_direct_ping(&packet, client_addr(), 1.0)
        };
        assert!(reply.is_some());
    }
}
