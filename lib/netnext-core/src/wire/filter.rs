//! Two-stage packet filter (§4.1). Cheaply rejects scan/amplification traffic before the AEAD
//! header codec ever runs. Both stages hash `(from, to, length)` — and, for the advanced stage,
//! a rotating `magic` token — with FNV-1a, the same non-cryptographic hash the original SDK uses
//! for `next_relay_id`/`next_datacenter_id` (`next_hash.cpp`). The filter is not the security
//! boundary; AEAD is. It only needs to be cheap and to suppress noise.
use crate::address::Address;
use crate::error::FilterError;

const FNV_OFFSET_BASIS: u64 = 0xCBF29CE484222325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;

const MIN_PACKET_BYTES: usize = 18;
const PASSTHROUGH_SENTINEL: u8 = 0xFF;

/// Fixed, non-secret key for the basic filter. Unlike the advanced filter's rotating magic, this
/// never changes: its purpose is structural (reject obviously-malformed datagrams), not
/// per-connection authentication.
const BASIC_FILTER_KEY: [u8; 8] = *b"nnbasic\0";

fn fnv1a(chunks: &[&[u8]]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for chunk in chunks {
        for &byte in *chunk {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
    }
    hash
}

fn address_bytes(addr: &Address) -> Vec<u8> {
    let mut buf = Vec::with_capacity(18);
    addr.write(&mut buf).expect("writing to a Vec never fails");
    buf
}

fn pittle(from: &Address, to: &Address, length: usize, key: &[u8]) -> [u8; 4] {
    let from_bytes = address_bytes(from);
    let to_bytes = address_bytes(to);
    let length_bytes = (length as u32).to_le_bytes();
    let hash = fnv1a(&[key, &from_bytes, &to_bytes, &length_bytes]);
    let mut out = [0u8; 4];
    out.copy_from_slice(&hash.to_le_bytes()[0..4]);
    out
}

fn chonkle(from: &Address, to: &Address, length: usize, magic: &[u8; 8]) -> [u8; 8] {
    let from_bytes = address_bytes(from);
    let to_bytes = address_bytes(to);
    let length_bytes = (length as u32).to_le_bytes();
    let hash = fnv1a(&[magic, &from_bytes, &to_bytes, &length_bytes]);
    hash.to_le_bytes()
}

/// Offsets within the filtered region of a datagram, per the §6.1 wire layout.
mod offsets {
    pub const TYPE: usize = 0;
    pub const PITTLE: std::ops::Range<usize> = 1..3;
    pub const CHONKLE: std::ops::Range<usize> = 3..11;
    pub const PITTLE_CONTINUATION: std::ops::Range<usize> = 15..17;
}

/// Length of the filtered prefix (`type` through `pittle_continuation`), per §6.1. A packet
/// dispatcher strips this many bytes before handing the remainder to the header codec.
pub const FILTER_PREFIX_LEN: usize = offsets::PITTLE_CONTINUATION.end;

/// Stamps the pittle/chonkle bytes into a freshly written datagram before sending. Called by the
/// packet writer, mirrored by `basic_filter`/`advanced_filter` on receive.
pub fn write_filter_bytes(packet: &mut [u8], from: &Address, to: &Address, magic: &[u8; 8]) {
    let length = packet.len();
    let p = pittle(from, to, length, &BASIC_FILTER_KEY);
    packet[offsets::PITTLE].copy_from_slice(&p[0..2]);
    packet[offsets::PITTLE_CONTINUATION].copy_from_slice(&p[2..4]);
    let c = chonkle(from, to, length, magic);
    packet[offsets::CHONKLE].copy_from_slice(&c);
}

/// Cheap structural check: length, known type byte, not a passthrough sentinel, and a pittle that
/// matches the fixed basic-filter key. Does not require knowledge of any per-connection magic.
pub fn basic_filter(packet: &[u8], from: &Address, to: &Address) -> Result<(), FilterError> {
    if packet.len() < MIN_PACKET_BYTES {
        return Err(FilterError::TooShort);
    }
    if packet[offsets::TYPE] == PASSTHROUGH_SENTINEL {
        return Err(FilterError::Passthrough);
    }
    if super::packet_type::PacketType::from_u8(packet[offsets::TYPE]).is_none() {
        return Err(FilterError::UnknownType);
    }

    let expected = pittle(from, to, packet.len(), &BASIC_FILTER_KEY);
    if packet[offsets::PITTLE] != expected[0..2] || packet[offsets::PITTLE_CONTINUATION] != expected[2..4] {
        return Err(FilterError::PittleMismatch);
    }
    Ok(())
}

/// Recomputes the chonkle under each of the three known magics in turn (current, upcoming,
/// previous). Upgrade-request packets arrive before the client has learned any magic; callers
/// pass an all-zero magic and a zeroed destination address for that case (§4.1).
pub fn advanced_filter(
    packet: &[u8],
    from: &Address,
    to: &Address,
    magics: &[[u8; 8]; 3],
) -> Result<(), FilterError> {
    basic_filter(packet, from, to)?;

    let length = packet.len();
    for magic in magics {
        let expected = chonkle(from, to, length, magic);
        if packet[offsets::CHONKLE] == expected {
            return Ok(());
        }
    }
    Err(FilterError::ChonkleMismatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addrs() -> (Address, Address) {
        (
            Address::V4(Ipv4Addr::new(127, 0, 0, 1), 40000),
            Address::V4(Ipv4Addr::new(127, 0, 0, 1), 50000),
        )
    }

    fn stamped_packet(magic: &[u8; 8]) -> (Vec<u8>, Address, Address) {
        let (from, to) = addrs();
        let mut packet = vec![0u8; 32];
        packet[0] = super::super::packet_type::PacketType::SessionPing as u8;
        write_filter_bytes(&mut packet, &from, &to, magic);
        (packet, from, to)
    }

    #[test]
    fn basic_filter_accepts_well_formed_packet() {
        let (packet, from, to) = stamped_packet(&[0u8; 8]);
        assert!(basic_filter(&packet, &from, &to).is_ok());
    }

    #[test]
    fn basic_filter_rejects_short_packet() {
        let (from, to) = addrs();
        let packet = vec![0u8; 10];
        assert_eq!(basic_filter(&packet, &from, &to), Err(FilterError::TooShort));
    }

    #[test]
    fn basic_filter_rejects_passthrough_sentinel() {
        let (from, to) = addrs();
        let mut packet = vec![0u8; 32];
        packet[0] = PASSTHROUGH_SENTINEL;
        assert_eq!(basic_filter(&packet, &from, &to), Err(FilterError::Passthrough));
    }

    #[test]
    fn basic_filter_rejects_wrong_addresses() {
        let (packet, _, to) = stamped_packet(&[0u8; 8]);
        let wrong_from = Address::V4(Ipv4Addr::new(8, 8, 8, 8), 1);
        assert_eq!(
            basic_filter(&packet, &wrong_from, &to),
            Err(FilterError::PittleMismatch)
        );
    }

    #[test]
    fn advanced_filter_tries_all_three_magics() {
        let current = [1u8; 8];
        let upcoming = [2u8; 8];
        let previous = [3u8; 8];
        let (packet, from, to) = stamped_packet(&previous);

        assert_eq!(
            advanced_filter(&packet, &from, &to, &[current, upcoming, previous]),
            Ok(())
        );
    }

    #[test]
    fn advanced_filter_rejects_unrelated_magic() {
        let (packet, from, to) = stamped_packet(&[9u8; 8]);
        let magics = [[1u8; 8], [2u8; 8], [3u8; 8]];
        assert_eq!(
            advanced_filter(&packet, &from, &to, &magics),
            Err(FilterError::ChonkleMismatch)
        );
    }

    #[test]
    fn filter_soundness_random_noise_rarely_passes() {
        use rand::RngCore;
        let (from, to) = addrs();
        let mut rng = rand::thread_rng();
        let mut passes = 0;
        let trials = 2000;
        for _ in 0..trials {
            let mut packet = [0u8; 32];
            rng.fill_bytes(&mut packet);
            if basic_filter(&packet, &from, &to).is_ok() {
                passes += 1;
            }
        }
        // Expect roughly 0 passes out of 2000 random trials (probability < 2^-16 per §8).
        assert!(passes < 2);
    }
}
