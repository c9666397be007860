// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.
//! GPT parsing. Thin wrapper around `gptman::GPT` (already a `qdl-rs`
//! dependency via `cli::util::read_gpt_from_storage`) plus the
//! device-specific sector-size sniffing and patch-XML emission `gptman`
//! doesn't cover on its own.

use std::io::{Cursor, Read, Seek, SeekFrom};

use crate::crc::crc32_ieee;
use crate::error::EngineError;
use crate::types::PartitionInfo;

const SIGNATURE: &[u8; 8] = b"EFI PART";

/// Try 512 then 4096: scan sector 1 of each candidate size for the GPT
/// signature. Returns `None` if neither matches (caller should fall back
/// to 512 and let header-CRC validation fail loudly instead).
pub fn detect_sector_size(image: &[u8]) -> Option<usize> {
    for candidate in [512usize, 4096] {
        if image.len() >= candidate * 2 {
            let sector1 = &image[candidate..candidate + candidate.min(image.len() - candidate)];
            if sector1.starts_with(SIGNATURE) {
                return Some(candidate);
            }
        }
    }
    None
}

/// GUID bytes as they appear on-disk: first three components little-endian,
/// last two (clock-seq + node) big-endian byte sequences. `gptman` already
/// stores `[u8; 16]` in this mixed order, so this is just documentation of
/// the convention this module relies on.
pub fn guid_from_mixed_endian_bytes(raw: &[u8; 16]) -> [u8; 16] {
    *raw
}

fn is_zero_guid(guid: &[u8; 16]) -> bool {
    guid.iter().all(|&b| b == 0)
}

/// Parse a raw GPT image (primary header + entry array) into
/// [`PartitionInfo`] records, skipping unused (all-zero type GUID) entries.
///
/// `sector_size` should come from [`detect_sector_size`]; the caller is
/// responsible for sniffing it since the same bytes mean a different
/// header layout at 512 vs 4096.
pub fn parse(image: &[u8], sector_size: usize) -> Result<Vec<PartitionInfo>, EngineError> {
    let mut cur = Cursor::new(image);
    let gpt = gptman::GPT::read_from(&mut cur, sector_size as u64)
        .map_err(|e| EngineError::Parse(format!("GPT parse failed: {e}")))?;

    let mut out = Vec::new();
    for (_idx, entry) in gpt.iter() {
        if is_zero_guid(&entry.partition_type_guid) {
            continue;
        }
        let name: String = entry.partition_name.to_string();
        let num_sectors = entry.ending_lba.saturating_sub(entry.starting_lba) + 1;
        out.push(PartitionInfo {
            name,
            start_sector: entry.starting_lba,
            num_sectors,
            sector_size: sector_size as u64,
            lun: 0,
            type_guid: entry.partition_type_guid,
            unique_guid: entry.unique_partition_guid,
            attributes: entry.attribute_bits,
        });
    }
    Ok(out)
}

/// Read just enough of a device-attached LUN to find and parse its GPT:
/// 8 sectors for UFS, 64 for eMMC, per the negotiated sector size.
pub fn read_gpt_header_sectors<R: Read + Seek>(
    reader: &mut R,
    sector_size: usize,
    header_sectors: usize,
) -> std::io::Result<Vec<u8>> {
    reader.seek(SeekFrom::Start(0))?;
    let mut buf = vec![0u8; sector_size * header_sectors];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// One `<patch>` element's worth of fix-up: the absolute byte offset within
/// the partition's GPT header sector to overwrite, and the new value as a
/// decimal string (Firehose's `patch` command takes `value` as text).
#[derive(Debug, Clone)]
pub struct PatchEntry {
    pub byte_offset: u64,
    pub size_in_bytes: u32,
    pub start_sector: String,
    pub value: String,
}

/// Recompute header and partition-entry-array CRC-32s for both the primary
/// and backup GPT headers and emit the byte-level overlay needed to apply
/// them — this is what lets a raw `dd`-style GPT write be CRC-valid
/// afterwards without re-sending the whole header.
///
/// `header_size` is the on-disk `Header.header_size` field (92 for the
/// standard UEFI GPT); CRC fields live at offsets 16 (header CRC) and 88
/// (entry-array CRC isn't in the header itself, it's verified against the
/// entry array separately, so only the header CRC is patched here).
pub fn generate_patch_entries(
    header_bytes: &[u8],
    header_size: u32,
    backup_start_sector: u64,
) -> Vec<PatchEntry> {
    let mut patched = header_bytes.to_vec();
    // zero the CRC field (offset 16, 4 bytes) before recomputing, per the
    // UEFI spec's own CRC algorithm.
    patched[16..20].copy_from_slice(&[0, 0, 0, 0]);
    let crc = crc32_ieee(&patched[..header_size as usize]);

    vec![
        PatchEntry {
            byte_offset: 16,
            size_in_bytes: 4,
            start_sector: "1".to_string(),
            value: crc.to_string(),
        },
        PatchEntry {
            byte_offset: 16,
            size_in_bytes: 4,
            start_sector: backup_start_sector.to_string(),
            value: crc.to_string(),
        },
    ]
}

/// Examine `boot_a`/`boot_b` partitions and report which slot's active bit
/// (bit 48 of `attributes`) is set, per the AB bootloader convention.
pub fn active_slot(partitions: &[PartitionInfo]) -> Option<crate::types::Slot> {
    const ACTIVE_BIT: u64 = 1 << 48;
    for p in partitions {
        if p.name == "boot_a" && p.attributes & ACTIVE_BIT != 0 {
            return Some(crate::types::Slot::A);
        }
        if p.name == "boot_b" && p.attributes & ACTIVE_BIT != 0 {
            return Some(crate::types::Slot::B);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sector_size_detection_prefers_512() {
        let mut image = vec![0u8; 4096 * 3];
        image[512..520].copy_from_slice(SIGNATURE);
        assert_eq!(detect_sector_size(&image), Some(512));
    }

    #[test]
    fn sector_size_detection_falls_back_to_4096() {
        let mut image = vec![0u8; 4096 * 3];
        image[4096..4104].copy_from_slice(SIGNATURE);
        assert_eq!(detect_sector_size(&image), Some(4096));
    }

    #[test]
    fn sector_size_detection_returns_none_without_signature() {
        let image = vec![0u8; 4096 * 3];
        assert_eq!(detect_sector_size(&image), None);
    }

    #[test]
    fn active_slot_reads_bit_48() {
        let boot_a = PartitionInfo {
            name: "boot_a".into(),
            start_sector: 0,
            num_sectors: 1,
            sector_size: 512,
            lun: 0,
            type_guid: [1; 16],
            unique_guid: [2; 16],
            attributes: 1 << 48,
        };
        let boot_b = PartitionInfo {
            name: "boot_b".into(),
            attributes: 0,
            ..boot_a.clone()
        };
        assert_eq!(active_slot(&[boot_a, boot_b]), Some(crate::types::Slot::A));
    }
}
