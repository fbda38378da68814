//! Near-relay ping/measurement engine (§4.8). The client measures up to 16 candidate relays at
//! 2 Hz regardless of whether it is currently routed through any of them; the backend uses these
//! measurements to pick routes on the next session update.
use crate::address::Address;
use crate::stats::ping_history::{PingHistory, RouteStats};

pub const MAX_NEAR_RELAYS: usize = 16;
const PING_INTERVAL_SECONDS: f64 = 0.5; // 2 Hz

pub struct NearRelay {
    pub id: u64,
    pub address: Address,
    history: PingHistory,
    last_ping_time: f64,
}

impl NearRelay {
    pub fn new(id: u64, address: Address) -> NearRelay {
        NearRelay {
            id,
            address,
            history: PingHistory::new(),
            last_ping_time: -1.0,
        }
    }

    pub fn due_for_ping(&self, now: f64) -> bool {
        self.last_ping_time < 0.0 || now - self.last_ping_time >= PING_INTERVAL_SECONDS
    }

    pub fn ping_sent(&mut self, now: f64) -> u64 {
        self.last_ping_time = now;
        self.history.ping_sent(now)
    }

    pub fn pong_received(&mut self, sequence: u64, now: f64) {
        self.history.pong_received(sequence, now);
    }

    pub fn stats(&self, t0: f64, t1: f64) -> RouteStats {
        self.history.route_stats(t0, t1)
    }
}

/// Tracks the set of near relays the backend has told the client to measure.
pub struct RelayManager {
    relays: Vec<NearRelay>,
}

impl RelayManager {
    pub fn new() -> RelayManager {
        RelayManager { relays: Vec::new() }
    }

    /// Replaces the measured relay set, as delivered by a `CLIENT_RELAY_UPDATE` packet. Caps at
    /// `MAX_NEAR_RELAYS`, dropping any beyond the cap (logged by the caller, not silently).
    pub fn set_relays(&mut self, relays: Vec<(u64, Address)>) {
        self.relays = relays
            .into_iter()
            .take(MAX_NEAR_RELAYS)
            .map(|(id, addr)| NearRelay::new(id, addr))
            .collect();
    }

    pub fn relays_due_for_ping(&self, now: f64) -> impl Iterator<Item = &NearRelay> {
        self.relays.iter().filter(move |r| r.due_for_ping(now))
    }

    pub fn relay_mut(&mut self, id: u64) -> Option<&mut NearRelay> {
        self.relays.iter_mut().find(|r| r.id == id)
    }

    /// Looks up a measured relay by the address a datagram arrived from, for matching an inbound
    /// `CLIENT_PONG` back to the relay that sent it.
    pub fn relay_by_address_mut(&mut self, address: &Address) -> Option<&mut NearRelay> {
        self.relays.iter_mut().find(|r| r.address == *address)
    }

    pub fn len(&self) -> usize {
        self.relays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }
}

impl Default for RelayManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr(port: u16) -> Address {
        Address::V4(Ipv4Addr::new(127, 0, 0, 1), port)
    }

    #[test]
    fn set_relays_caps_at_sixteen() {
        let mut manager = RelayManager::new();
        let relays = (0..20u64).map(|id| (id, addr(1000 + id as u16))).collect();
        manager.set_relays(relays);
        assert_eq!(manager.len(), MAX_NEAR_RELAYS);
    }

    #[test]
    fn fresh_relay_is_due_for_ping() {
        let relay = NearRelay::new(1, addr(1000));
        assert!(relay.due_for_ping(0.0));
    }

    #[test]
    fn relay_not_due_immediately_after_ping() {
        let mut relay = NearRelay::new(1, addr(1000));
        relay.ping_sent(0.0);
        assert!(!relay.due_for_ping(0.1));
        assert!(relay.due_for_ping(0.6));
    }

    #[test]
    fn relay_stats_reflect_pong_receipt() {
        let mut relay = NearRelay::new(1, addr(1000));
        let seq = relay.ping_sent(0.0);
        relay.pong_received(seq, 0.05);
        let stats = relay.stats(0.0, 1.0);
        assert!((stats.rtt - 0.05).abs() < 1e-9);
    }
}
