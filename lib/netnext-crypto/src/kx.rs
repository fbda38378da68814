//! X25519 key exchange, used during the upgrade handshake (§4.7) to derive the per-session AEAD
//! send/receive keys shared between client and server.
use crate::aead;

pub const PUBLIC_KEY_SIZE: usize = libsodium_sys::crypto_kx_PUBLICKEYBYTES as usize;
pub const SECRET_KEY_SIZE: usize = libsodium_sys::crypto_kx_SECRETKEYBYTES as usize;

pub type PublicKey = [u8; PUBLIC_KEY_SIZE];
pub type SecretKey = [u8; SECRET_KEY_SIZE];

/// A derived pair of AEAD keys: one for sending, one for receiving. Client and server each end up
/// with the other's view swapped (the client's `send` key is the server's `receive` key).
pub struct SessionKeys {
    pub send: aead::Key,
    pub receive: aead::Key,
}

pub fn generate_keypair() -> (PublicKey, SecretKey) {
    let mut public_key = [0u8; PUBLIC_KEY_SIZE];
    let mut secret_key = [0u8; SECRET_KEY_SIZE];
    unsafe {
        libsodium_sys::crypto_kx_keypair(public_key.as_mut_ptr(), secret_key.as_mut_ptr());
    }
    (public_key, secret_key)
}

/// Derives session keys as the client side of the exchange.
pub fn client_session_keys(
    client_public: &PublicKey,
    client_secret: &SecretKey,
    server_public: &PublicKey,
) -> Option<SessionKeys> {
    let mut receive = [0u8; aead::KEY_SIZE];
    let mut send = [0u8; aead::KEY_SIZE];
    let ok = unsafe {
        libsodium_sys::crypto_kx_client_session_keys(
            receive.as_mut_ptr(),
            send.as_mut_ptr(),
            client_public.as_ptr(),
            client_secret.as_ptr(),
            server_public.as_ptr(),
        ) == 0
    };
    if ok {
        Some(SessionKeys { send, receive })
    } else {
        None
    }
}

/// Derives session keys as the server side of the exchange.
pub fn server_session_keys(
    server_public: &PublicKey,
    server_secret: &SecretKey,
    client_public: &PublicKey,
) -> Option<SessionKeys> {
    let mut receive = [0u8; aead::KEY_SIZE];
    let mut send = [0u8; aead::KEY_SIZE];
    let ok = unsafe {
        libsodium_sys::crypto_kx_server_session_keys(
            receive.as_mut_ptr(),
            send.as_mut_ptr(),
            server_public.as_ptr(),
            server_secret.as_ptr(),
            client_public.as_ptr(),
        ) == 0
    };
    if ok {
        Some(SessionKeys { send, receive })
    } else {
        None
    }
}
