//! XSalsa20-Poly1305 secretbox, used to seal the upgrade token envelope (§6.3) with a key shared
//! only between the server that minted it and the server that later re-validates the echo.
pub const KEY_SIZE: usize = libsodium_sys::crypto_secretbox_KEYBYTES as usize;
pub const NONCE_SIZE: usize = libsodium_sys::crypto_secretbox_NONCEBYTES as usize;
pub const MAC_SIZE: usize = libsodium_sys::crypto_secretbox_MACBYTES as usize;

pub type Key = [u8; KEY_SIZE];
pub type Nonce = [u8; NONCE_SIZE];

/// Seals `plain` into `cipher` (exactly `plain.len() + MAC_SIZE` bytes) under `key` and `nonce`.
/// The nonce must be supplied by the caller (random, per the upgrade token layout: nonce ∥
/// ciphertext) since secretbox has no associated-data slot to authenticate a sequence instead.
#[inline]
pub fn seal(cipher: &mut [u8], plain: &[u8], nonce: &Nonce, key: &Key) -> bool {
    assert_eq!(cipher.len(), plain.len() + MAC_SIZE, "cipher must be plain + mac sized");
    unsafe {
        let result = libsodium_sys::crypto_secretbox_easy(
            cipher.as_mut_ptr(),
            plain.as_ptr(),
            plain.len() as u64,
            nonce.as_ptr(),
            key.as_ptr(),
        );
        result == 0
    }
}

#[inline]
pub fn open(plain: &mut [u8], cipher: &[u8], nonce: &Nonce, key: &Key) -> bool {
    assert_eq!(cipher.len(), plain.len() + MAC_SIZE, "cipher must be plain + mac sized");
    unsafe {
        let result = libsodium_sys::crypto_secretbox_open_easy(
            plain.as_mut_ptr(),
            cipher.as_ptr(),
            cipher.len() as u64,
            nonce.as_ptr(),
            key.as_ptr(),
        );
        result == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::random_bytes;

    #[test]
    fn roundtrip() {
        let mut key = [0u8; KEY_SIZE];
        let mut nonce = [0u8; NONCE_SIZE];
        random_bytes(&mut key);
        random_bytes(&mut nonce);

        let plain = b"session_id|expiry|client_addr|server_addr";
        let mut cipher = vec![0u8; plain.len() + MAC_SIZE];
        assert!(seal(&mut cipher, plain, &nonce, &key));

        let mut opened = vec![0u8; plain.len()];
        assert!(open(&mut opened, &cipher, &nonce, &key));
        assert_eq!(&opened[..], &plain[..]);
    }

    #[test]
    fn wrong_key_fails() {
        let mut key = [0u8; KEY_SIZE];
        let mut other_key = [0u8; KEY_SIZE];
        let mut nonce = [0u8; NONCE_SIZE];
        random_bytes(&mut key);
        random_bytes(&mut other_key);
        random_bytes(&mut nonce);

        let plain = b"upgrade token body";
        let mut cipher = vec![0u8; plain.len() + MAC_SIZE];
        assert!(seal(&mut cipher, plain, &nonce, &key));

        let mut opened = vec![0u8; plain.len()];
        assert!(!open(&mut opened, &cipher, &nonce, &other_key));
    }
}
