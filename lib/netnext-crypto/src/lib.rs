#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

pub mod aead;
pub mod encoding;
pub mod kx;
pub mod logging;
pub mod random;
pub mod secretbox;
pub mod sign;
pub mod time;
pub mod util;
