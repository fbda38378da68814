//! Route state machine (§4.6, §9 "trial-decrypt with up to three keys"). A tagged union of
//! `current`/`pending`/`previous` route slots, probed in that order on every inbound routed
//! packet. The asymmetry between continue (drops `previous`) and promotion (demotes `current`
//! into `previous`) is intentional and preserved verbatim: continue avoids introducing reorder
//! windows mid-slice, while a full promotion expects one.
use crate::error::RouteError;
use crate::wire::header::{self, DecodedHeader, HeaderContext};
use netnext_crypto::aead;

#[derive(Clone)]
pub struct RouteSlot {
    pub session_version: u8,
    pub expire_timestamp: u64,
    pub key: aead::Key,
}

/// Which slot an inbound packet authenticated under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedSlot {
    Pending,
    Current,
    Previous,
}

pub struct RouteManager {
    current: Option<RouteSlot>,
    pending: Option<RouteSlot>,
    previous: Option<RouteSlot>,
}

impl RouteManager {
    pub fn new() -> RouteManager {
        RouteManager {
            current: None,
            pending: None,
            previous: None,
        }
    }

    pub fn has_current_route(&self) -> bool {
        self.current.is_some()
    }

    pub fn current_session_version(&self) -> Option<u8> {
        self.current.as_ref().map(|s| s.session_version)
    }

    /// The current slot's key, for sealing outbound packets that ride the active route (session
    /// pings, payload). `None` outside a live route.
    pub fn current_key(&self) -> Option<&aead::Key> {
        self.current.as_ref().map(|s| &s.key)
    }

    /// A route request installs a pending slot if its `(session_version, expire_timestamp)` is
    /// newer than what's current (§4.6).
    pub fn install_pending(&mut self, slot: RouteSlot) -> Result<(), RouteError> {
        if let Some(current) = &self.current {
            if slot.session_version <= current.session_version {
                return Err(RouteError::WrongSessionVersion);
            }
        }
        self.pending = Some(slot);
        Ok(())
    }

    /// Trial-decrypts `packet` against pending, current, then previous, in that order (§4.2,
    /// §4.6). On a pending match, performs the promotion transition before returning.
    pub fn try_decrypt(
        &mut self,
        packet: &[u8],
        session_id: u64,
    ) -> Option<(MatchedSlot, DecodedHeader)> {
        if let Some(pending) = self.pending.clone() {
            let ctx = HeaderContext {
                session_id,
                session_version: pending.session_version,
            };
            if let Ok(decoded) = header::read_header(packet, &ctx, &pending.key) {
                self.promote_pending();
                return Some((MatchedSlot::Pending, decoded));
            }
        }

        if let Some(current) = &self.current {
            let ctx = HeaderContext {
                session_id,
                session_version: current.session_version,
            };
            if let Ok(decoded) = header::read_header(packet, &ctx, &current.key) {
                return Some((MatchedSlot::Current, decoded));
            }
        }

        if let Some(previous) = &self.previous {
            let ctx = HeaderContext {
                session_id,
                session_version: previous.session_version,
            };
            if let Ok(decoded) = header::read_header(packet, &ctx, &previous.key) {
                return Some((MatchedSlot::Previous, decoded));
            }
        }

        None
    }

    /// A pending decrypt succeeded: if there's no current, pending simply becomes current. If a
    /// current already exists, it is demoted to previous first. Either way pending is cleared.
    fn promote_pending(&mut self) {
        let pending = self.pending.take().expect("promote_pending called without a pending slot");
        if self.current.is_some() {
            self.previous = self.current.take();
        }
        self.current = Some(pending);
    }

    /// A continue request extends `current`'s expiry and discards `previous` (§4.6, §9): unlike
    /// promotion, continue must not leave a stale previous route around to race against the
    /// just-extended current one. A token whose expiry is older than the current route's is
    /// rejected outright rather than silently advancing it.
    pub fn continue_route(&mut self, session_version: u8, new_expire_timestamp: u64) -> Result<(), RouteError> {
        let current = self.current.as_mut().ok_or(RouteError::NoRouteToContinue)?;
        if current.session_version != session_version {
            return Err(RouteError::WrongSessionVersion);
        }
        if new_expire_timestamp < current.expire_timestamp {
            return Err(RouteError::RouteExpired);
        }
        current.expire_timestamp = new_expire_timestamp;
        self.previous = None;
        Ok(())
    }

    /// Drops both current and previous once `current.expire_timestamp` has passed, returning to
    /// `no_route` (§4.6).
    pub fn expire(&mut self, now: u64) {
        if let Some(current) = &self.current {
            if now >= current.expire_timestamp {
                self.current = None;
                self.previous = None;
            }
        }
    }
}

impl Default for RouteManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(version: u8, expiry: u64, key_byte: u8) -> RouteSlot {
        RouteSlot {
            session_version: version,
            expire_timestamp: expiry,
            key: [key_byte; aead::KEY_SIZE],
        }
    }

    fn sealed_header(slot: &RouteSlot, session_id: u64) -> Vec<u8> {
        let ctx = HeaderContext {
            session_id,
            session_version: slot.session_version,
        };
        let mut packet = Vec::new();
        header::write_header(&mut packet, 3, 1, &[], &ctx, &slot.key).unwrap();
        packet
    }

    #[test]
    fn pending_promotes_to_current_when_no_current_exists() {
        let mut manager = RouteManager::new();
        manager.install_pending(slot(1, 1000, 7)).unwrap();

        let packet = sealed_header(&slot(1, 1000, 7), 99);
        let (matched, decoded) = manager.try_decrypt(&packet, 99).unwrap();

        assert_eq!(matched, MatchedSlot::Pending);
        assert_eq!(decoded.session_version, 1);
        assert!(manager.has_current_route());
        assert_eq!(manager.current_session_version(), Some(1));
    }

    #[test]
    fn pending_promotion_demotes_existing_current_to_previous() {
        let mut manager = RouteManager::new();
        manager.install_pending(slot(1, 1000, 1)).unwrap();
        let p1 = sealed_header(&slot(1, 1000, 1), 5);
        manager.try_decrypt(&p1, 5).unwrap();

        manager.install_pending(slot(2, 2000, 2)).unwrap();
        let p2 = sealed_header(&slot(2, 2000, 2), 5);
        let (matched, _) = manager.try_decrypt(&p2, 5).unwrap();
        assert_eq!(matched, MatchedSlot::Pending);
        assert_eq!(manager.current_session_version(), Some(2));

        // The old current (version 1) should still authenticate via `previous`.
        let old = sealed_header(&slot(1, 1000, 1), 5);
        let (matched_old, _) = manager.try_decrypt(&old, 5).unwrap();
        assert_eq!(matched_old, MatchedSlot::Previous);
    }

    #[test]
    fn continue_extends_current_and_drops_previous() {
        let mut manager = RouteManager::new();
        manager.install_pending(slot(1, 1000, 1)).unwrap();
        manager.try_decrypt(&sealed_header(&slot(1, 1000, 1), 5), 5).unwrap();

        manager.install_pending(slot(2, 2000, 2)).unwrap();
        manager.try_decrypt(&sealed_header(&slot(2, 2000, 2), 5), 5).unwrap();
        assert!(manager.previous.is_some());

        manager.continue_route(2, 2010).unwrap();
        assert!(manager.previous.is_none());
        assert_eq!(manager.current.as_ref().unwrap().expire_timestamp, 2010);
    }

    #[test]
    fn continue_with_wrong_session_version_is_rejected() {
        let mut manager = RouteManager::new();
        manager.install_pending(slot(1, 1000, 1)).unwrap();
        manager.try_decrypt(&sealed_header(&slot(1, 1000, 1), 5), 5).unwrap();

        assert_eq!(manager.continue_route(9, 2000), Err(RouteError::WrongSessionVersion));
    }

    #[test]
    fn continue_with_older_expiry_is_rejected() {
        let mut manager = RouteManager::new();
        manager.install_pending(slot(1, 1000, 1)).unwrap();
        manager.try_decrypt(&sealed_header(&slot(1, 1000, 1), 5), 5).unwrap();

        assert_eq!(manager.continue_route(1, 500), Err(RouteError::RouteExpired));
        assert_eq!(manager.current.as_ref().unwrap().expire_timestamp, 1000);
    }

    #[test]
    fn continue_with_no_current_is_rejected() {
        let mut manager = RouteManager::new();
        assert_eq!(manager.continue_route(1, 2000), Err(RouteError::NoRouteToContinue));
    }

    #[test]
    fn expiry_drops_current_and_previous() {
        let mut manager = RouteManager::new();
        manager.install_pending(slot(1, 100, 1)).unwrap();
        manager.try_decrypt(&sealed_header(&slot(1, 100, 1), 5), 5).unwrap();

        manager.expire(100);
        assert!(!manager.has_current_route());
    }

    #[test]
    fn stale_pending_version_is_rejected() {
        let mut manager = RouteManager::new();
        manager.install_pending(slot(5, 1000, 1)).unwrap();
        manager.try_decrypt(&sealed_header(&slot(5, 1000, 1), 5), 5).unwrap();

        assert_eq!(manager.install_pending(slot(5, 2000, 2)), Err(RouteError::WrongSessionVersion));
    }
}
