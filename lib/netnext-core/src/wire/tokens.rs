//! Token formats (§6.3). Upgrade tokens are sealed with XSalsa20-Poly1305 secretbox (the
//! session's own key, known only to the two upgrading endpoints). Route and continue tokens are
//! sealed with the per-hop AEAD key shared out of band with the backend; the SDK only ever needs
//! to consume the last hop's token, so no intermediate-hop logic lives here.
use crate::address::Address;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use netnext_crypto::{aead, secretbox};
use std::io::{self, Read, Write};

/// `{session_id, expiry, client_addr, server_addr}`, sealed for both endpoints of an upgrading
/// session to later confirm against one another (§4.7).
pub struct UpgradeTokenPlain {
    pub session_id: u64,
    pub expire_timestamp: u64,
    pub client_address: Address,
    pub server_address: Address,
}

impl UpgradeTokenPlain {
    fn write<W: Write>(&self, mut stream: W) -> io::Result<()> {
        stream.write_u64::<LittleEndian>(self.session_id)?;
        stream.write_u64::<LittleEndian>(self.expire_timestamp)?;
        self.client_address.write(&mut stream)?;
        self.server_address.write(&mut stream)
    }

    fn read<R: Read>(mut stream: R) -> io::Result<UpgradeTokenPlain> {
        let session_id = stream.read_u64::<LittleEndian>()?;
        let expire_timestamp = stream.read_u64::<LittleEndian>()?;
        let client_address = Address::read(&mut stream)?;
        let server_address = Address::read(&mut stream)?;
        Ok(UpgradeTokenPlain {
            session_id,
            expire_timestamp,
            client_address,
            server_address,
        })
    }
}

/// Seals an upgrade token. `key` is the per-session secretbox key minted alongside the session id.
pub fn seal_upgrade_token(plain: &UpgradeTokenPlain, key: &[u8; secretbox::KEY_SIZE]) -> io::Result<Vec<u8>> {
    let mut body = Vec::new();
    plain.write(&mut body)?;

    let mut nonce = [0u8; secretbox::NONCE_SIZE];
    netnext_crypto::random::random_bytes(&mut nonce);

    let mut cipher = vec![0u8; body.len() + secretbox::MAC_SIZE];
    if !secretbox::seal(&mut cipher, &body, &nonce, key) {
        return Err(io::Error::new(io::ErrorKind::Other, "upgrade token seal failed"));
    }

    let mut out = Vec::with_capacity(secretbox::NONCE_SIZE + cipher.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&cipher);
    Ok(out)
}

/// Opens a sealed upgrade token, returning `None` on any authentication failure.
pub fn open_upgrade_token(sealed: &[u8], key: &[u8; secretbox::KEY_SIZE]) -> Option<UpgradeTokenPlain> {
    if sealed.len() < secretbox::NONCE_SIZE + secretbox::MAC_SIZE {
        return None;
    }
    let (nonce_bytes, cipher) = sealed.split_at(secretbox::NONCE_SIZE);
    let mut nonce = [0u8; secretbox::NONCE_SIZE];
    nonce.copy_from_slice(nonce_bytes);

    let mut plain = vec![0u8; cipher.len() - secretbox::MAC_SIZE];
    if !secretbox::open(&mut plain, cipher, &nonce, key) {
        return None;
    }
    UpgradeTokenPlain::read(&plain[..]).ok()
}

/// `{expiry, session_id, session_version, kbps_up, kbps_down, next_address, session_private_key}`
/// — the route token the server forwards to the client inside `ROUTE_UPDATE`, one per hop, with
/// the last hop addressed to the server itself (§4.6, §6.3).
pub struct RouteTokenPlain {
    pub expire_timestamp: u64,
    pub session_id: u64,
    pub session_version: u8,
    pub kbps_up: u32,
    pub kbps_down: u32,
    pub next_address: Address,
    pub session_private_key: aead::Key,
}

impl RouteTokenPlain {
    fn write<W: Write>(&self, mut stream: W) -> io::Result<()> {
        stream.write_u64::<LittleEndian>(self.expire_timestamp)?;
        stream.write_u64::<LittleEndian>(self.session_id)?;
        stream.write_u8(self.session_version)?;
        stream.write_u32::<LittleEndian>(self.kbps_up)?;
        stream.write_u32::<LittleEndian>(self.kbps_down)?;
        self.next_address.write(&mut stream)?;
        stream.write_all(&self.session_private_key)
    }

    fn read<R: Read>(mut stream: R) -> io::Result<RouteTokenPlain> {
        let expire_timestamp = stream.read_u64::<LittleEndian>()?;
        let session_id = stream.read_u64::<LittleEndian>()?;
        let session_version = stream.read_u8()?;
        let kbps_up = stream.read_u32::<LittleEndian>()?;
        let kbps_down = stream.read_u32::<LittleEndian>()?;
        let next_address = Address::read(&mut stream)?;
        let mut session_private_key = [0u8; aead::KEY_SIZE];
        stream.read_exact(&mut session_private_key)?;
        Ok(RouteTokenPlain {
            expire_timestamp,
            session_id,
            session_version,
            kbps_up,
            kbps_down,
            next_address,
            session_private_key,
        })
    }
}

/// `{expiry, session_id, session_version}` — extends the current route past a slice boundary
/// without changing hops (§4.6).
pub struct ContinueTokenPlain {
    pub expire_timestamp: u64,
    pub session_id: u64,
    pub session_version: u8,
}

impl ContinueTokenPlain {
    fn write<W: Write>(&self, mut stream: W) -> io::Result<()> {
        stream.write_u64::<LittleEndian>(self.expire_timestamp)?;
        stream.write_u64::<LittleEndian>(self.session_id)?;
        stream.write_u8(self.session_version)
    }

    fn read<R: Read>(mut stream: R) -> io::Result<ContinueTokenPlain> {
        let expire_timestamp = stream.read_u64::<LittleEndian>()?;
        let session_id = stream.read_u64::<LittleEndian>()?;
        let session_version = stream.read_u8()?;
        Ok(ContinueTokenPlain {
            expire_timestamp,
            session_id,
            session_version,
        })
    }
}

/// Both route and continue tokens are sealed the same way: a random sequence number doubles as
/// the AEAD nonce input, tag appended at the end (`aead::seal`, not the detached header variant).
fn seal_token(plain_bytes: &[u8], key: &aead::Key) -> Vec<u8> {
    let sequence = netnext_crypto::random::random_nonzero_u64();
    let mut cipher = vec![0u8; plain_bytes.len() + aead::TAG_SIZE];
    let ok = aead::seal(&mut cipher, plain_bytes, &[], sequence, key);
    debug_assert!(ok, "sealing with a freshly generated key cannot fail");
    let mut out = Vec::with_capacity(8 + cipher.len());
    out.extend_from_slice(&sequence.to_le_bytes());
    out.extend_from_slice(&cipher);
    out
}

fn open_token(sealed: &[u8], key: &aead::Key) -> Option<Vec<u8>> {
    if sealed.len() < 8 + aead::TAG_SIZE {
        return None;
    }
    let sequence = u64::from_le_bytes(sealed[0..8].try_into().ok()?);
    let cipher = &sealed[8..];
    let mut plain = vec![0u8; cipher.len() - aead::TAG_SIZE];
    if aead::open(&mut plain, cipher, &[], sequence, key) {
        Some(plain)
    } else {
        None
    }
}

pub fn seal_route_token(plain: &RouteTokenPlain, key: &aead::Key) -> io::Result<Vec<u8>> {
    let mut body = Vec::new();
    plain.write(&mut body)?;
    Ok(seal_token(&body, key))
}

pub fn open_route_token(sealed: &[u8], key: &aead::Key) -> Option<RouteTokenPlain> {
    let body = open_token(sealed, key)?;
    RouteTokenPlain::read(&body[..]).ok()
}

pub fn seal_continue_token(plain: &ContinueTokenPlain, key: &aead::Key) -> io::Result<Vec<u8>> {
    let mut body = Vec::new();
    plain.write(&mut body)?;
    Ok(seal_token(&body, key))
}

pub fn open_continue_token(sealed: &[u8], key: &aead::Key) -> Option<ContinueTokenPlain> {
    let body = open_token(sealed, key)?;
    ContinueTokenPlain::read(&body[..]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn client_addr() -> Address {
        Address::V4(Ipv4Addr::new(127, 0, 0, 1), 30000)
    }
    fn server_addr() -> Address {
        Address::V4(Ipv4Addr::new(127, 0, 0, 1), 40000)
    }

    #[test]
    fn upgrade_token_roundtrips() {
        let mut key = [0u8; secretbox::KEY_SIZE];
        netnext_crypto::random::random_bytes(&mut key);

        let plain = UpgradeTokenPlain {
            session_id: 0x1122_3344_5566_7788,
            expire_timestamp: 1_800_000_000,
            client_address: client_addr(),
            server_address: server_addr(),
        };
        let sealed = seal_upgrade_token(&plain, &key).unwrap();
        let restored = open_upgrade_token(&sealed, &key).unwrap();

        assert_eq!(restored.session_id, plain.session_id);
        assert_eq!(restored.expire_timestamp, plain.expire_timestamp);
        assert_eq!(restored.client_address, plain.client_address);
        assert_eq!(restored.server_address, plain.server_address);
    }

    #[test]
    fn upgrade_token_wrong_key_fails() {
        let mut key = [0u8; secretbox::KEY_SIZE];
        netnext_crypto::random::random_bytes(&mut key);
        let mut wrong_key = [0u8; secretbox::KEY_SIZE];
        netnext_crypto::random::random_bytes(&mut wrong_key);

        let plain = UpgradeTokenPlain {
            session_id: 7,
            expire_timestamp: 1,
            client_address: client_addr(),
            server_address: server_addr(),
        };
        let sealed = seal_upgrade_token(&plain, &key).unwrap();
        assert!(open_upgrade_token(&sealed, &wrong_key).is_none());
    }

    #[test]
    fn route_token_roundtrips() {
        let mut key = [0u8; aead::KEY_SIZE];
        netnext_crypto::random::random_bytes(&mut key);
        let mut session_private_key = [0u8; aead::KEY_SIZE];
        netnext_crypto::random::random_bytes(&mut session_private_key);

        let plain = RouteTokenPlain {
            expire_timestamp: 123,
            session_id: 456,
            session_version: 9,
            kbps_up: 1000,
            kbps_down: 2000,
            next_address: server_addr(),
            session_private_key,
        };
        let sealed = seal_route_token(&plain, &key).unwrap();
        let restored = open_route_token(&sealed, &key).unwrap();

        assert_eq!(restored.session_id, plain.session_id);
        assert_eq!(restored.session_version, plain.session_version);
        assert_eq!(restored.kbps_up, plain.kbps_up);
        assert_eq!(restored.session_private_key, plain.session_private_key);
    }

    #[test]
    fn continue_token_roundtrips() {
        let mut key = [0u8; aead::KEY_SIZE];
        netnext_crypto::random::random_bytes(&mut key);

        let plain = ContinueTokenPlain {
            expire_timestamp: 999,
            session_id: 42,
            session_version: 2,
        };
        let sealed = seal_continue_token(&plain, &key).unwrap();
        let restored = open_continue_token(&sealed, &key).unwrap();
        assert_eq!(restored.expire_timestamp, plain.expire_timestamp);
        assert_eq!(restored.session_id, plain.session_id);
        assert_eq!(restored.session_version, plain.session_version);
    }
}
