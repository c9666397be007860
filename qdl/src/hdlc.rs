// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.
//! Spreadtrum's HDLC byte-stuffed framing: `0x7E | escaped(payload ‖
//! crc16_be) | 0x7E`, escaping 0x7E -> 0x7D 0x5E and 0x7D -> 0x7D 0x5D.
//!
//! After a `DISABLE_TRANSCODE` command the FDL2 agent stops escaping;
//! `fdl.rs` simply stops calling into this module once that happens.

use crate::crc::crc16_sprd;

const FLAG: u8 = 0x7E;
const ESCAPE: u8 = 0x7D;

pub fn encode(payload: &[u8]) -> Vec<u8> {
    let crc = crc16_sprd(payload);
    let mut with_crc = Vec::with_capacity(payload.len() + 2);
    with_crc.extend_from_slice(payload);
    with_crc.extend_from_slice(&crc.to_be_bytes());

    let mut out = Vec::with_capacity(with_crc.len() + 2);
    out.push(FLAG);
    for &b in &with_crc {
        match b {
            FLAG => {
                out.push(ESCAPE);
                out.push(0x5E);
            }
            ESCAPE => {
                out.push(ESCAPE);
                out.push(0x5D);
            }
            _ => out.push(b),
        }
    }
    out.push(FLAG);
    out
}

#[derive(Debug, thiserror::Error)]
pub enum HdlcError {
    #[error("frame missing trailing 0x7E flag")]
    Unterminated,
    #[error("frame shorter than its own CRC-16 trailer")]
    TooShort,
    #[error("CRC-16 mismatch: computed {computed:#06x}, frame carried {carried:#06x}")]
    BadCrc { computed: u16, carried: u16 },
}

/// Decode one HDLC frame out of `framed`, which must begin with the
/// leading `0x7E` and contain at least one complete frame; any bytes past
/// the closing `0x7E` are returned alongside for a caller that's replaying
/// a byte stream with a trailing partial frame.
pub fn decode(framed: &[u8]) -> Result<(Vec<u8>, &[u8]), HdlcError> {
    let body_start = if framed.first() == Some(&FLAG) { 1 } else { 0 };
    let Some(rel_end) = framed[body_start..].iter().position(|&b| b == FLAG) else {
        return Err(HdlcError::Unterminated);
    };
    let body = &framed[body_start..body_start + rel_end];
    let remainder = &framed[body_start + rel_end + 1..];

    let mut unescaped = Vec::with_capacity(body.len());
    let mut it = body.iter().copied();
    while let Some(b) = it.next() {
        if b == ESCAPE {
            match it.next() {
                Some(0x5E) => unescaped.push(FLAG),
                Some(0x5D) => unescaped.push(ESCAPE),
                Some(other) => unescaped.push(other),
                None => break,
            }
        } else {
            unescaped.push(b);
        }
    }

    if unescaped.len() < 2 {
        return Err(HdlcError::TooShort);
    }
    let split = unescaped.len() - 2;
    let (payload, crc_bytes) = unescaped.split_at(split);
    let carried = u16::from_be_bytes([crc_bytes[0], crc_bytes[1]]);
    let computed = crc16_sprd(payload);
    if computed != carried {
        return Err(HdlcError::BadCrc { computed, carried });
    }
    Ok((payload.to_vec(), remainder))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_payloads_including_flag_and_escape_bytes() {
        for payload in [&b""[..], b"hello", &[0x7E, 0x7D, 0x7E, 0x00, 0xFF][..]] {
            let framed = encode(payload);
            let (decoded, rest) = decode(&framed).unwrap();
            assert_eq!(decoded, payload);
            assert!(rest.is_empty());
        }
    }

    #[test]
    fn leaves_trailing_partial_frame_for_the_caller() {
        let mut framed = encode(b"abc");
        framed.extend_from_slice(&[FLAG, 0x01, 0x02]);
        let (decoded, rest) = decode(&framed).unwrap();
        assert_eq!(decoded, b"abc");
        assert_eq!(rest, &[0x01, 0x02]);
    }

    #[test]
    fn detects_crc_mismatch() {
        let mut framed = encode(b"abc");
        let last = framed.len() - 2;
        framed[last] ^= 0xFF;
        assert!(matches!(decode(&framed), Err(HdlcError::BadCrc { .. })));
    }
}
