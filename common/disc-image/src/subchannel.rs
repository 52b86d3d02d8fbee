//! Subchannel helpers: P-W bit interleaving, Q CRC, and MCN/ISRC Q payloads
//!
//! Interleaved ("PW96") data stores one bit of each of the eight subchannels per byte, P in bit 7
//! through W in bit 0. Deinterleaved data stores each channel as 12 consecutive bytes.

use crate::cdtime::{from_bcd, to_bcd};
use crc::Crc;

pub const SUBCHANNEL_SIZE: usize = 96;
pub const CHANNEL_SIZE: usize = 12;
pub const PQ16_SIZE: usize = 16;

pub const P_CHANNEL: usize = 0;
pub const Q_CHANNEL: usize = 1;

pub const Q_MODE_POSITION: u8 = 1;
pub const Q_MODE_MCN: u8 = 2;
pub const Q_MODE_ISRC: u8 = 3;

const Q_CRC: Crc<u16> = Crc::<u16>::new(&crc::CRC_16_GSM);

/// Convert eight deinterleaved 12-byte channels (P first) into interleaved PW96 data.
#[must_use]
pub fn interleave(linear: &[u8; SUBCHANNEL_SIZE]) -> [u8; SUBCHANNEL_SIZE] {
    let mut out = [0; SUBCHANNEL_SIZE];
    for (channel, bytes) in linear.chunks_exact(CHANNEL_SIZE).enumerate() {
        let mask = 0x80 >> channel;
        for (i, out_byte) in out.iter_mut().enumerate() {
            if bytes[i / 8] & (0x80 >> (i % 8)) != 0 {
                *out_byte |= mask;
            }
        }
    }
    out
}

/// Inverse of [`interleave`].
#[must_use]
pub fn deinterleave(interleaved: &[u8; SUBCHANNEL_SIZE]) -> [u8; SUBCHANNEL_SIZE] {
    let mut out = [0; SUBCHANNEL_SIZE];
    for (channel, bytes) in out.chunks_exact_mut(CHANNEL_SIZE).enumerate() {
        bytes.copy_from_slice(&deinterleave_channel(interleaved, channel));
    }
    out
}

/// Extract a single channel (0 = P, 7 = W) from interleaved PW96 data.
#[must_use]
pub fn deinterleave_channel(
    interleaved: &[u8; SUBCHANNEL_SIZE],
    channel: usize,
) -> [u8; CHANNEL_SIZE] {
    let mask = 0x80 >> channel;
    let mut out = [0; CHANNEL_SIZE];
    for (i, &byte) in interleaved.iter().enumerate() {
        if byte & mask != 0 {
            out[i / 8] |= 0x80 >> (i % 8);
        }
    }
    out
}

/// Build interleaved PW96 data from a P flag and a Q block; R-W are zero.
#[must_use]
pub fn interleave_pq(p: bool, q: &[u8; CHANNEL_SIZE]) -> [u8; SUBCHANNEL_SIZE] {
    let mut linear = [0; SUBCHANNEL_SIZE];
    if p {
        linear[..CHANNEL_SIZE].fill(0xFF);
    }
    linear[CHANNEL_SIZE..2 * CHANNEL_SIZE].copy_from_slice(q);
    interleave(&linear)
}

/// Convert PQ16 data (12 bytes of Q, 3 reserved bytes, P flag in bit 7 of the last byte) to PW96.
#[must_use]
pub fn pq16_to_pw96(pq16: &[u8; PQ16_SIZE]) -> [u8; SUBCHANNEL_SIZE] {
    let mut q = [0; CHANNEL_SIZE];
    q.copy_from_slice(&pq16[..CHANNEL_SIZE]);
    interleave_pq(pq16[15] & 0x80 != 0, &q)
}

/// Convert PW96 data to PQ16.
#[must_use]
pub fn pw96_to_pq16(interleaved: &[u8; SUBCHANNEL_SIZE]) -> [u8; PQ16_SIZE] {
    let mut out = [0; PQ16_SIZE];
    out[..CHANNEL_SIZE].copy_from_slice(&deinterleave_channel(interleaved, Q_CHANNEL));
    if deinterleave_channel(interleaved, P_CHANNEL)[0] & 0x80 != 0 {
        out[15] = 0x80;
    }
    out
}

/// CRC-16 (polynomial 0x1021, inverted) over the first 10 bytes of a Q block.
#[must_use]
pub fn q_crc(q: &[u8; CHANNEL_SIZE]) -> u16 {
    Q_CRC.checksum(&q[..10])
}

pub fn write_q_crc(q: &mut [u8; CHANNEL_SIZE]) {
    let crc = q_crc(q);
    q[10..12].copy_from_slice(&crc.to_be_bytes());
}

#[must_use]
pub fn q_crc_valid(q: &[u8; CHANNEL_SIZE]) -> bool {
    q_crc(q) == u16::from_be_bytes([q[10], q[11]])
}

#[must_use]
pub fn q_mode(q: &[u8; CHANNEL_SIZE]) -> u8 {
    q[0] & 0x0F
}

#[must_use]
pub fn is_valid_mcn(mcn: &str) -> bool {
    mcn.len() == 13 && mcn.bytes().all(|b| b.is_ascii_digit())
}

#[must_use]
pub fn is_valid_isrc(isrc: &str) -> bool {
    let bytes = isrc.as_bytes();
    bytes.len() == 12
        && bytes[..5].iter().all(|b| b.is_ascii_digit() || b.is_ascii_uppercase())
        && bytes[5..].iter().all(u8::is_ascii_digit)
}

/// Encode a mode-2 (MCN) Q block, CRC included. Returns `None` if `mcn` is not 13 digits.
#[must_use]
pub fn encode_mcn(mcn: &str, ctl: u8, aframe: u8) -> Option<[u8; CHANNEL_SIZE]> {
    if !is_valid_mcn(mcn) {
        return None;
    }

    let mut nibbles = [0_u8; 14];
    for (nibble, digit) in nibbles.iter_mut().zip(mcn.bytes()) {
        *nibble = digit - b'0';
    }

    let mut q = [0; CHANNEL_SIZE];
    q[0] = (ctl << 4) | Q_MODE_MCN;
    for (i, pair) in nibbles.chunks_exact(2).enumerate() {
        q[1 + i] = (pair[0] << 4) | pair[1];
    }
    q[9] = to_bcd(aframe);
    write_q_crc(&mut q);

    Some(q)
}

#[must_use]
pub fn decode_mcn(q: &[u8; CHANNEL_SIZE]) -> Option<String> {
    if q_mode(q) != Q_MODE_MCN {
        return None;
    }

    q[1..8]
        .iter()
        .flat_map(|&byte| [byte >> 4, byte & 0x0F])
        .take(13)
        .map(|nibble| (nibble < 10).then_some(char::from(b'0' + nibble)))
        .collect()
}

fn isrc_char_to_code(c: u8) -> u8 {
    if c.is_ascii_digit() { c - b'0' } else { c - b'A' + 17 }
}

fn isrc_code_to_char(code: u8) -> Option<char> {
    match code {
        0..=9 => Some(char::from(b'0' + code)),
        17..=42 => Some(char::from(b'A' + code - 17)),
        _ => None,
    }
}

/// Encode a mode-3 (ISRC) Q block, CRC included. The five leading characters are packed as 6-bit
/// codes and the seven trailing digits as BCD.
#[must_use]
pub fn encode_isrc(isrc: &str, ctl: u8, aframe: u8) -> Option<[u8; CHANNEL_SIZE]> {
    if !is_valid_isrc(isrc) {
        return None;
    }

    let bytes = isrc.as_bytes();
    let c: [u8; 5] = std::array::from_fn(|i| isrc_char_to_code(bytes[i]));

    let mut q = [0; CHANNEL_SIZE];
    q[0] = (ctl << 4) | Q_MODE_ISRC;
    q[1] = (c[0] << 2) | (c[1] >> 4);
    q[2] = (c[1] << 4) | (c[2] >> 2);
    q[3] = (c[2] << 6) | c[3];
    q[4] = c[4] << 2;

    let mut digits = [0_u8; 8];
    for (digit, &b) in digits.iter_mut().zip(&bytes[5..]) {
        *digit = b - b'0';
    }
    for (i, pair) in digits.chunks_exact(2).enumerate() {
        q[5 + i] = (pair[0] << 4) | pair[1];
    }

    q[9] = to_bcd(aframe);
    write_q_crc(&mut q);

    Some(q)
}

#[must_use]
pub fn decode_isrc(q: &[u8; CHANNEL_SIZE]) -> Option<String> {
    if q_mode(q) != Q_MODE_ISRC {
        return None;
    }

    let codes = [
        q[1] >> 2,
        ((q[1] & 0x03) << 4) | (q[2] >> 4),
        ((q[2] & 0x0F) << 2) | (q[3] >> 6),
        q[3] & 0x3F,
        q[4] >> 2,
    ];

    let mut isrc = String::with_capacity(12);
    for code in codes {
        isrc.push(isrc_code_to_char(code)?);
    }
    for nibble in q[5..9].iter().flat_map(|&byte| [byte >> 4, byte & 0x0F]).take(7) {
        if nibble >= 10 {
            return None;
        }
        isrc.push(char::from(b'0' + nibble));
    }

    Some(isrc)
}

/// Absolute frame number stored in byte 9 of MCN/ISRC blocks, decoded from BCD.
#[must_use]
pub fn q_aframe(q: &[u8; CHANNEL_SIZE]) -> Option<u8> {
    from_bcd(q[9])
}
