//! Packet header codec (§4.2). Sealed with ChaCha20-Poly1305 over an empty-or-small plaintext
//! body; `type` and `seq` ride in the clear (the latter doubling as the AEAD nonce), while
//! `session_id`/`session_version` are supplied out of band as associated data rather than
//! transmitted, per the §4.2 "Wire resolution" note. Total wire size is `1 + 8 + body.len() + 16`.
use crate::error::HeaderError;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use netnext_crypto::aead;
use std::io::{self, Read, Write};

pub const TYPE_SIZE: usize = 1;
pub const SEQUENCE_SIZE: usize = 8;
pub const TAG_SIZE: usize = aead::TAG_SIZE;
pub const MIN_HEADER_SIZE: usize = TYPE_SIZE + SEQUENCE_SIZE + TAG_SIZE;

/// The caller-supplied context that is authenticated but never placed on the wire.
pub struct HeaderContext {
    pub session_id: u64,
    pub session_version: u8,
}

fn associated_data(packet_type: u8, sequence: u64, ctx: &HeaderContext) -> io::Result<Vec<u8>> {
    let mut ad = Vec::with_capacity(18);
    ad.write_u8(packet_type)?;
    ad.write_u64::<LittleEndian>(sequence)?;
    ad.write_u64::<LittleEndian>(ctx.session_id)?;
    ad.write_u8(ctx.session_version)?;
    Ok(ad)
}

/// Writes `type`, `seq`, the sealed `body`, and the tag into `out`. `out` must have room for
/// `MIN_HEADER_SIZE + body.len()` bytes.
pub fn write_header(
    out: &mut Vec<u8>,
    packet_type: u8,
    sequence: u64,
    body: &[u8],
    ctx: &HeaderContext,
    key: &aead::Key,
) -> io::Result<()> {
    out.write_u8(packet_type)?;
    out.write_u64::<LittleEndian>(sequence)?;

    let ad = associated_data(packet_type, sequence, ctx)?;
    let mut cipher = vec![0u8; body.len()];
    let mut tag = [0u8; TAG_SIZE];
    if !aead::seal_detached(&mut cipher, &mut tag, body, &ad, sequence, key) {
        return Err(io::Error::new(io::ErrorKind::Other, "header seal failed"));
    }

    out.write_all(&cipher)?;
    out.write_all(&tag)?;
    Ok(())
}

/// The decoded, authenticated header: the echoed `(session_id, session_version)` plus the
/// recovered body.
pub struct DecodedHeader {
    pub packet_type: u8,
    pub sequence: u64,
    pub session_id: u64,
    pub session_version: u8,
    pub body: Vec<u8>,
}

/// Attempts to authenticate `packet` under a single candidate `key`. The caller is responsible
/// for trying pending/current/previous keys in order (§4.2, §4.6); this function only tries one.
pub fn read_header(packet: &[u8], ctx: &HeaderContext, key: &aead::Key) -> Result<DecodedHeader, HeaderError> {
    if packet.len() < MIN_HEADER_SIZE {
        return Err(HeaderError::TooShort);
    }

    let packet_type = packet[0];
    let mut cursor = &packet[1..9];
    let sequence = cursor
        .read_u64::<LittleEndian>()
        .map_err(|_| HeaderError::TooShort)?;

    let body_len = packet.len() - MIN_HEADER_SIZE;
    let cipher = &packet[9..9 + body_len];
    let tag_bytes = &packet[9 + body_len..9 + body_len + TAG_SIZE];
    let mut tag = [0u8; TAG_SIZE];
    tag.copy_from_slice(tag_bytes);

    let ad = associated_data(packet_type, sequence, ctx).map_err(|_| HeaderError::TooShort)?;
    let mut body = vec![0u8; body_len];
    if !aead::open_detached(&mut body, cipher, &tag, &ad, sequence, key) {
        return Err(HeaderError::AuthenticationFailed);
    }

    Ok(DecodedHeader {
        packet_type,
        sequence,
        session_id: ctx.session_id,
        session_version: ctx.session_version,
        body,
    })
}
