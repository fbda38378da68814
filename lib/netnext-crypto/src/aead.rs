//! ChaCha20-Poly1305 (IETF) AEAD, used to seal packet headers, route/continue tokens and the
//! per-packet payload. Composes libsodium; this module does not implement any cipher itself.
use byteorder::{LittleEndian, WriteBytesExt};

pub const KEY_SIZE: usize = libsodium_sys::crypto_aead_chacha20poly1305_IETF_KEYBYTES as usize;
pub const NONCE_SIZE: usize = libsodium_sys::crypto_aead_chacha20poly1305_IETF_NPUBBYTES as usize;
pub const TAG_SIZE: usize = libsodium_sys::crypto_aead_chacha20poly1305_IETF_ABYTES as usize;

pub type Key = [u8; KEY_SIZE];

const NONCE_OFFSET: usize = NONCE_SIZE - 8;

/// Packs a 64-bit sequence number into the low-order bytes of an IETF nonce. Sequences are
/// strictly increasing per key, so this never repeats a nonce under a live key.
#[inline]
fn nonce_from_sequence(sequence: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    (&mut nonce[NONCE_OFFSET..])
        .write_u64::<LittleEndian>(sequence)
        .expect("nonce buffer is exactly 8 bytes past the offset");
    nonce
}

/// Seals `plain` into `cipher` with the authentication tag written separately into `tag`. Used
/// by the packet header codec, where the tag sits at a fixed offset in the wire layout.
///
/// `cipher` must be exactly `plain.len()` bytes. Returns `false` on libsodium failure (never
/// expected to happen given valid inputs, but checked rather than assumed).
#[inline]
pub fn seal_detached(
    cipher: &mut [u8],
    tag: &mut [u8; TAG_SIZE],
    plain: &[u8],
    associated_data: &[u8],
    sequence: u64,
    key: &Key,
) -> bool {
    assert_eq!(cipher.len(), plain.len(), "cipher/plain length mismatch");

    let nonce = nonce_from_sequence(sequence);

    unsafe {
        let result = libsodium_sys::crypto_aead_chacha20poly1305_ietf_encrypt_detached(
            cipher.as_mut_ptr(),
            tag.as_mut_ptr(),
            std::ptr::null_mut(),
            plain.as_ptr(),
            plain.len() as u64,
            associated_data.as_ptr(),
            associated_data.len() as u64,
            std::ptr::null(),
            nonce.as_ptr(),
            key.as_ptr(),
        );
        result == 0
    }
}

/// Opens a detached-tag sealed message. Returns `false` on authentication failure; `plain` is
/// left unmodified-but-not-trustworthy in that case and must not be used by the caller.
#[inline]
pub fn open_detached(
    plain: &mut [u8],
    cipher: &[u8],
    tag: &[u8; TAG_SIZE],
    associated_data: &[u8],
    sequence: u64,
    key: &Key,
) -> bool {
    assert_eq!(cipher.len(), plain.len(), "cipher/plain length mismatch");

    let nonce = nonce_from_sequence(sequence);

    unsafe {
        let result = libsodium_sys::crypto_aead_chacha20poly1305_ietf_decrypt_detached(
            plain.as_mut_ptr(),
            std::ptr::null_mut(),
            cipher.as_ptr(),
            cipher.len() as u64,
            tag.as_ptr(),
            associated_data.as_ptr(),
            associated_data.len() as u64,
            nonce.as_ptr(),
            key.as_ptr(),
        );
        result == 0
    }
}

/// Seals `plain` into `cipher` with the tag appended at the end. `cipher` must be exactly
/// `plain.len() + TAG_SIZE`. Used for route/continue tokens, where the tag travels with the
/// ciphertext rather than at a fixed header offset.
#[inline]
pub fn seal(cipher: &mut [u8], plain: &[u8], associated_data: &[u8], sequence: u64, key: &Key) -> bool {
    assert_eq!(cipher.len(), plain.len() + TAG_SIZE, "cipher must be plain + tag sized");

    let (body, tag_slot) = cipher.split_at_mut(plain.len());
    let mut tag = [0u8; TAG_SIZE];
    let ok = seal_detached(body, &mut tag, plain, associated_data, sequence, key);
    tag_slot.copy_from_slice(&tag);
    ok
}

/// Opens a tag-appended sealed message. `cipher` must be exactly `plain.len() + TAG_SIZE`.
#[inline]
pub fn open(plain: &mut [u8], cipher: &[u8], associated_data: &[u8], sequence: u64, key: &Key) -> bool {
    assert_eq!(cipher.len(), plain.len() + TAG_SIZE, "cipher must be plain + tag sized");

    let (body, tag_slot) = cipher.split_at(plain.len());
    let mut tag = [0u8; TAG_SIZE];
    tag.copy_from_slice(tag_slot);
    open_detached(plain, body, &tag, associated_data, sequence, key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::random_bytes;

    fn random_key() -> Key {
        let mut key = [0u8; KEY_SIZE];
        random_bytes(&mut key);
        key
    }

    #[test]
    fn seal_open_roundtrip() {
        let key = random_key();
        let plain = b"session payload bytes";
        let mut cipher = vec![0u8; plain.len() + TAG_SIZE];
        assert!(seal(&mut cipher, plain, b"ad", 7, &key));

        let mut opened = vec![0u8; plain.len()];
        assert!(open(&mut opened, &cipher, b"ad", 7, &key));
        assert_eq!(&opened[..], &plain[..]);
    }

    #[test]
    fn tampered_tag_fails() {
        let key = random_key();
        let plain = b"route token bytes 12345";
        let mut cipher = vec![0u8; plain.len() + TAG_SIZE];
        assert!(seal(&mut cipher, plain, b"ad", 1, &key));

        let last = cipher.len() - 1;
        cipher[last] ^= 0xff;

        let mut opened = vec![0u8; plain.len()];
        assert!(!open(&mut opened, &cipher, b"ad", 1, &key));
    }

    #[test]
    fn wrong_associated_data_fails() {
        let key = random_key();
        let plain = b"hello";
        let mut cipher = vec![0u8; plain.len() + TAG_SIZE];
        assert!(seal(&mut cipher, plain, b"correct-ad", 3, &key));

        let mut opened = vec![0u8; plain.len()];
        assert!(!open(&mut opened, &cipher, b"wrong-ad", 3, &key));
    }

    #[test]
    fn detached_empty_plaintext_authenticates_associated_data_only() {
        let key = random_key();
        let mut tag = [0u8; TAG_SIZE];
        assert!(seal_detached(&mut [], &mut tag, &[], b"header-ad", 42, &key));

        let mut empty = [];
        assert!(open_detached(&mut empty, &[], &tag, b"header-ad", 42, &key));
        assert!(!open_detached(&mut empty, &[], &tag, b"wrong-ad", 42, &key));
    }
}
