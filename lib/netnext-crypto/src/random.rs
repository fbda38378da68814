use ctor::ctor;

/// Initialize the sodium infrastructure. Every process linking this crate gets exactly one call,
/// before `main` runs.
#[ctor]
fn init_sodium() {
    unsafe {
        if libsodium_sys::sodium_init() < 0 {
            panic!("cryptography initialization failed");
        }
    }
}

/// Fills the provided buffer with cryptographically secure random bytes.
#[inline]
pub fn random_bytes(out: &mut [u8]) {
    unsafe {
        libsodium_sys::randombytes_buf(out.as_mut_ptr() as *mut std::ffi::c_void, out.len());
    }
}

/// A random 64-bit value, resampled until nonzero. Used to mint session ids: zero is reserved as
/// the tombstone marker in the session tables.
#[inline]
pub fn random_nonzero_u64() -> u64 {
    loop {
        let mut bytes = [0u8; 8];
        random_bytes(&mut bytes);
        let value = u64::from_le_bytes(bytes);
        if value != 0 {
            return value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_bytes_fills_buffer() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        random_bytes(&mut a);
        random_bytes(&mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn random_nonzero_u64_is_never_zero() {
        for _ in 0..1000 {
            assert_ne!(random_nonzero_u64(), 0);
        }
    }
}
