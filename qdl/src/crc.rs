// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.
//! CRC algorithms used by the binary formats and framings this crate
//! parses: GPT's CRC-32 (IEEE) and Spreadtrum's CRC-16 (poly 0x1021).

use crc::{CRC_32_ISO_HDLC, Crc};

static CRC32_IEEE: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub fn crc32_ieee(data: &[u8]) -> u32 {
    CRC32_IEEE.checksum(data)
}

/// Spreadtrum's CRC-16: initial value 0, polynomial 0x1021, MSB-first,
/// no input/output reflection. Not one of the `crc` crate's named
/// catalog profiles, so it's hand-rolled the way `qdl::vip` hand-rolls
/// the MBN hash-table chaining rather than contorting a generic fit.
pub fn crc16_sprd(data: &[u8]) -> u16 {
    const POLY: u16 = 0x1021;
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc16_of_empty_input_is_zero() {
        assert_eq!(crc16_sprd(&[]), 0);
    }

    #[test]
    fn crc32_matches_known_ieee_vector() {
        assert_eq!(crc32_ieee(b"123456789"), 0xCBF4_3926);
    }
}
