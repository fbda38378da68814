//! Ed25519 signatures, used for the backend-facing control plane (§6.2): upgrade request/confirm
//! and the `BACKEND_*` packets are signed with the buyer's private key and verified with the
//! matching public key.
pub const PUBLIC_KEY_SIZE: usize = libsodium_sys::crypto_sign_PUBLICKEYBYTES as usize;
pub const SECRET_KEY_SIZE: usize = libsodium_sys::crypto_sign_SECRETKEYBYTES as usize;
pub const SIGNATURE_SIZE: usize = libsodium_sys::crypto_sign_BYTES as usize;

pub type PublicKey = [u8; PUBLIC_KEY_SIZE];
pub type SecretKey = [u8; SECRET_KEY_SIZE];
pub type Signature = [u8; SIGNATURE_SIZE];

/// Generates a fresh signing keypair.
pub fn generate_keypair() -> (PublicKey, SecretKey) {
    let mut public_key = [0u8; PUBLIC_KEY_SIZE];
    let mut secret_key = [0u8; SECRET_KEY_SIZE];
    unsafe {
        libsodium_sys::crypto_sign_keypair(public_key.as_mut_ptr(), secret_key.as_mut_ptr());
    }
    (public_key, secret_key)
}

/// Signs `message`, producing a detached signature (the message itself is not modified or
/// wrapped, matching how the original SDK signs fixed packet bodies in place).
pub fn sign(message: &[u8], secret_key: &SecretKey) -> Signature {
    let mut signature = [0u8; SIGNATURE_SIZE];
    let mut signature_len: u64 = 0;
    unsafe {
        libsodium_sys::crypto_sign_detached(
            signature.as_mut_ptr(),
            &mut signature_len,
            message.as_ptr(),
            message.len() as u64,
            secret_key.as_ptr(),
        );
    }
    signature
}

/// Verifies a detached signature. Returns `false` on any mismatch.
pub fn verify(message: &[u8], signature: &Signature, public_key: &PublicKey) -> bool {
    unsafe {
        libsodium_sys::crypto_sign_verify_detached(
            signature.as_ptr(),
            message.as_ptr(),
            message.len() as u64,
            public_key.as_ptr(),
        ) == 0
    }
}
