//! Per-session state (§3.2, §3.3). The server view is a superset of the client view: both track
//! sequence counters, replay windows, and a route manager, but only the server owns the identity
//! fields used to authenticate a client across port reuse.
use crate::address::Address;
use crate::counters::Counters;
use crate::replay::SessionReplayState;
use crate::route::RouteManager;
use crate::stats::PathStats;
use netnext_crypto::aead;

/// Fallback/flag bitset surfaced to the backend on the next session update (§1 supplement,
/// grounded on `NEXT_FLAGS_*`). Irreversible once `fallback_to_direct` is set for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FallbackFlags(u16);

impl FallbackFlags {
    pub const BAD_ROUTE_TOKEN: FallbackFlags = FallbackFlags(1 << 0);
    pub const NO_ROUTE_TO_CONTINUE: FallbackFlags = FallbackFlags(1 << 1);
    pub const PREVIOUS_UPDATE_STILL_PENDING: FallbackFlags = FallbackFlags(1 << 2);
    pub const BAD_CONTINUE_TOKEN: FallbackFlags = FallbackFlags(1 << 3);
    pub const ROUTE_EXPIRED: FallbackFlags = FallbackFlags(1 << 4);
    pub const ROUTE_REQUEST_TIMED_OUT: FallbackFlags = FallbackFlags(1 << 5);
    pub const CONTINUE_REQUEST_TIMED_OUT: FallbackFlags = FallbackFlags(1 << 6);
    pub const ROUTE_TIMED_OUT: FallbackFlags = FallbackFlags(1 << 7);
    pub const UPGRADE_RESPONSE_TIMED_OUT: FallbackFlags = FallbackFlags(1 << 8);
    pub const ROUTE_UPDATE_TIMED_OUT: FallbackFlags = FallbackFlags(1 << 9);
    pub const DIRECT_PONG_TIMED_OUT: FallbackFlags = FallbackFlags(1 << 10);
    pub const NEXT_PONG_TIMED_OUT: FallbackFlags = FallbackFlags(1 << 11);

    pub fn set(&mut self, flag: FallbackFlags) {
        self.0 |= flag.0;
    }

    pub fn contains(&self, flag: FallbackFlags) -> bool {
        self.0 & flag.0 != 0
    }

    pub fn bits(&self) -> u16 {
        self.0
    }
}

/// Compares two 8-bit session-version generation counters with wraparound (§3.1): `a` is newer
/// than `b` iff `(a - b) mod 256` falls in `[1, 128]`. A delta of exactly 128 is the antipodal
/// point of the ring and can't satisfy antisymmetry under an inclusive bound (it would make both
/// `a>b` and `b>a` true) so it's treated as not-newer in either direction.
pub fn session_version_is_newer(a: u8, b: u8) -> bool {
    let delta = a.wrapping_sub(b);
    (1..128).contains(&delta)
}

/// `{address, session_id, user_hash, upgrade_time, last_packet_send_time, ephemeral_private_key,
/// upgrade_token}` — a client that has been sent an `UPGRADE_REQUEST` but has not yet completed
/// the handshake (§3.3). Times out after 5 s.
pub struct PendingSession {
    pub address: Address,
    pub session_id: u64,
    pub user_hash: u64,
    pub upgrade_time: f64,
    pub last_packet_send_time: f64,
    pub ephemeral_secretbox_key: [u8; netnext_crypto::secretbox::KEY_SIZE],
    pub upgrade_token: Vec<u8>,
}

impl PendingSession {
    pub const TIMEOUT_SECONDS: f64 = 5.0;

    pub fn has_timed_out(&self, now: f64) -> bool {
        now - self.upgrade_time >= Self::TIMEOUT_SECONDS
    }
}

/// Server-side per-session state (§3.2). The client holds an analogous but smaller structure
/// (no identity fields, no proxy-session bookkeeping); this is the superset.
pub struct ServerSession {
    // Identity
    pub address: Address,
    pub session_id: u64,
    pub user_hash: u64,
    pub client_open_session_sequence: u8,

    // Sequences, strictly increasing, start at 1.
    pub special_send_sequence: u64,
    pub internal_send_sequence: u64,
    pub payload_send_sequence: u64,

    pub replay: SessionReplayState,
    pub route: RouteManager,

    pub receive_key: aead::Key,
    pub send_key: aead::Key,

    pub direct_stats: PathStats,
    pub next_stats: PathStats,
    pub multipath: bool,
    pub fallback_to_direct: bool,
    pub fallback_flags: FallbackFlags,
    pub counters: Counters,

    pub update_sequence: u64,
    pub next_session_update_time: f64,
    pub waiting_for_update_response: bool,
    pub session_update_flush: bool,

    pub last_update_response_time: f64,
}

impl ServerSession {
    pub const SERVER_SESSION_TIMEOUT_SECONDS: f64 = 60.0;

    pub fn new(address: Address, session_id: u64, user_hash: u64, receive_key: aead::Key, send_key: aead::Key, now: f64) -> ServerSession {
        ServerSession {
            address,
            session_id,
            user_hash,
            client_open_session_sequence: 0,
            special_send_sequence: 1,
            internal_send_sequence: 1,
            payload_send_sequence: 1,
            replay: SessionReplayState::new(),
            route: RouteManager::new(),
            receive_key,
            send_key,
            direct_stats: PathStats::new(),
            next_stats: PathStats::new(),
            multipath: false,
            fallback_to_direct: false,
            fallback_flags: FallbackFlags::default(),
            counters: Counters::new(),
            update_sequence: 0,
            next_session_update_time: now,
            waiting_for_update_response: false,
            session_update_flush: false,
            last_update_response_time: now,
        }
    }

    /// Marks the session as irreversibly direct-only (§4.11). Once set, the server stops
    /// scheduling session updates for it.
    pub fn fallback(&mut self, flag: FallbackFlags) {
        self.fallback_to_direct = true;
        self.fallback_flags.set(flag);
    }

    /// Server-side table eviction (§4.9): distinct from the client-visible fallback flag. Dropped
    /// from the session table entirely after 60 s with no successful update response.
    pub fn has_timed_out_of_table(&self, now: f64) -> bool {
        now - self.last_update_response_time >= Self::SERVER_SESSION_TIMEOUT_SECONDS
    }

    /// The next wire nonce for a packet sealed under `send_key`, shared across every special-plane
    /// packet type (direct/session pings, route acks) so no two packets under the same key ever
    /// repeat a nonce.
    pub fn next_special_sequence(&mut self) -> u64 {
        let seq = self.special_send_sequence;
        self.special_send_sequence += 1;
        seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn session() -> ServerSession {
        ServerSession::new(
            Address::V4(Ipv4Addr::new(127, 0, 0, 1), 40000),
            42,
            7,
            [0u8; aead::KEY_SIZE],
            [0u8; aead::KEY_SIZE],
            0.0,
        )
    }

    #[test]
    fn fallback_is_irreversible_and_records_flag() {
        let mut s = session();
        assert!(!s.fallback_to_direct);
        s.fallback(FallbackFlags::ROUTE_TIMED_OUT);
        assert!(s.fallback_to_direct);
        assert!(s.fallback_flags.contains(FallbackFlags::ROUTE_TIMED_OUT));
        assert!(!s.fallback_flags.contains(FallbackFlags::BAD_ROUTE_TOKEN));
    }

    #[test]
    fn sequences_start_at_one() {
        let s = session();
        assert_eq!(s.special_send_sequence, 1);
        assert_eq!(s.internal_send_sequence, 1);
        assert_eq!(s.payload_send_sequence, 1);
    }

    #[test]
    fn table_timeout_after_sixty_seconds_idle() {
        let mut s = session();
        s.last_update_response_time = 0.0;
        assert!(!s.has_timed_out_of_table(59.0));
        assert!(s.has_timed_out_of_table(60.0));
    }

    #[test]
    fn pending_session_times_out_after_five_seconds() {
        let pending = PendingSession {
            address: Address::None,
            session_id: 1,
            user_hash: 0,
            upgrade_time: 0.0,
            last_packet_send_time: 0.0,
            ephemeral_secretbox_key: [0u8; netnext_crypto::secretbox::KEY_SIZE],
            upgrade_token: vec![],
        };
        assert!(!pending.has_timed_out(4.9));
        assert!(pending.has_timed_out(5.0));
    }

    #[test]
    fn session_version_wraparound_threshold() {
        assert!(session_version_is_newer(1, 0));
        assert!(session_version_is_newer(0, 255));
        assert!(!session_version_is_newer(0, 0));
        // delta == 128 is the antipodal point; neither direction counts as newer.
        assert!(!session_version_is_newer(128, 0));
        assert!(!session_version_is_newer(0, 128));
    }
}
