// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.
//! `super` partition (logical-partition, "LP") metadata: the geometry
//! block at a fixed offset, followed by a header + table set describing
//! each logical partition's extents within the super image.

use crate::crc::crc32_ieee;
use crate::error::EngineError;

const GEOMETRY_MAGIC: u32 = 0x6467_616c; // "gDla" as a little-endian u32 read at offset 4096
const METADATA_HEADER_MAGIC: u32 = 0x414c_5030; // "0PLA"
const LP_PARTITION_RESERVED_BYTES: u64 = 4096;
const LP_METADATA_GEOMETRY_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy)]
pub struct Geometry {
    pub metadata_max_size: u32,
    pub metadata_slot_count: u32,
    pub logical_block_size: u32,
}

#[derive(Debug, Clone)]
pub struct LpPartition {
    pub name: String,
    pub attributes: u32,
    pub extents: Vec<LpExtent>,
}

#[derive(Debug, Clone, Copy)]
pub struct LpExtent {
    pub num_sectors: u64,
    /// Target data sector within the super partition (LINEAR target).
    pub target_data: u64,
}

#[derive(Debug, Clone)]
pub struct LpMetadata {
    pub geometry: Geometry,
    pub partitions: Vec<LpPartition>,
}

fn u32_at(d: &[u8], o: usize) -> Result<u32, EngineError> {
    d.get(o..o + 4)
        .map(|b| u32::from_le_bytes(b.try_into().unwrap()))
        .ok_or_else(|| EngineError::Parse("LP metadata truncated".into()))
}

fn u64_at(d: &[u8], o: usize) -> Result<u64, EngineError> {
    d.get(o..o + 8)
        .map(|b| u64::from_le_bytes(b.try_into().unwrap()))
        .ok_or_else(|| EngineError::Parse("LP metadata truncated".into()))
}

/// Parse the geometry block. Present at a fixed offset (4096 bytes into
/// the super image) regardless of which metadata slot is active, so a
/// caller can sniff the image before deciding which slot to read.
pub fn parse_geometry(super_image: &[u8]) -> Result<Geometry, EngineError> {
    let block = super_image
        .get(4096..4096 + LP_METADATA_GEOMETRY_SIZE)
        .ok_or_else(|| EngineError::Parse("super image too small for LP geometry block".into()))?;

    let magic = u32_at(block, 0)?;
    if magic != GEOMETRY_MAGIC {
        return Err(EngineError::Parse(format!(
            "bad LP geometry magic {magic:#x} (expected \"gDla\")"
        )));
    }
    Ok(Geometry {
        metadata_max_size: u32_at(block, 8)?,
        metadata_slot_count: u32_at(block, 12)?,
        logical_block_size: u32_at(block, 16)?,
    })
}

/// Parse the metadata header + tables for one slot. Slot `n`'s metadata
/// starts at `12288 + n * geometry.metadata_max_size` (two copies per slot
/// back to back — primary then backup — this reads the primary copy).
pub fn parse_metadata(super_image: &[u8], geometry: &Geometry, slot: u32) -> Result<LpMetadata, EngineError> {
    let slot_offset = 12288 + (slot as u64 * geometry.metadata_max_size as u64 * 2) as usize;
    let header = super_image
        .get(slot_offset..slot_offset + 128)
        .ok_or_else(|| EngineError::Parse("super image too small for LP metadata header".into()))?;

    let magic = u32_at(header, 0)?;
    if magic != METADATA_HEADER_MAGIC {
        return Err(EngineError::Parse(format!(
            "bad LP metadata magic {magic:#x} (expected \"0PLA\")"
        )));
    }
    let header_size = u32_at(header, 8)? as usize;
    let tables_size = u32_at(header, 16)? as usize;
    let partitions_entry_size = u32_at(header, 28)? as usize;
    let partitions_num_entries = u32_at(header, 24)?;
    let extents_offset = u32_at(header, 32)? as usize;
    let extents_entry_size = u32_at(header, 40)? as usize;
    let extents_num_entries = u32_at(header, 36)?;
    let partitions_offset = u32_at(header, 20)? as usize;

    let tables = super_image
        .get(slot_offset + header_size..slot_offset + header_size + tables_size)
        .ok_or_else(|| EngineError::Parse("LP metadata tables run past super image end".into()))?;

    let mut extents = Vec::with_capacity(extents_num_entries as usize);
    for i in 0..extents_num_entries as usize {
        let off = extents_offset + i * extents_entry_size;
        let e = tables
            .get(off..off + extents_entry_size)
            .ok_or_else(|| EngineError::Parse("LP extent table entry out of bounds".into()))?;
        extents.push(LpExtent {
            num_sectors: u64_at(e, 0)?,
            target_data: u64_at(e, 12)?,
        });
    }

    let mut partitions = Vec::with_capacity(partitions_num_entries as usize);
    for i in 0..partitions_num_entries as usize {
        let off = partitions_offset + i * partitions_entry_size;
        let p = tables
            .get(off..off + partitions_entry_size)
            .ok_or_else(|| EngineError::Parse("LP partition table entry out of bounds".into()))?;
        let name_bytes = &p[0..36];
        let nul = name_bytes.iter().position(|&b| b == 0).unwrap_or(36);
        let name = String::from_utf8_lossy(&name_bytes[..nul]).into_owned();
        let attributes = u32_at(p, 36)?;
        let first_extent_index = u32_at(p, 40)?;
        let num_extents = u32_at(p, 44)?;

        let my_extents = extents
            .get(first_extent_index as usize..(first_extent_index + num_extents) as usize)
            .map(|s| s.to_vec())
            .unwrap_or_default();

        partitions.push(LpPartition {
            name,
            attributes,
            extents: my_extents,
        });
    }

    Ok(LpMetadata {
        geometry: *geometry,
        partitions,
    })
}

/// Total sector span covered by a logical partition's extents — the
/// value `size_bytes()` on [`crate::types::PartitionInfo`] has no
/// equivalent for here since a logical partition can be split across
/// many non-contiguous extents.
pub fn partition_size_bytes(p: &LpPartition, sector_size: u64) -> u64 {
    p.extents.iter().map(|e| e.num_sectors * sector_size).sum()
}

pub fn reserved_bytes() -> u64 {
    LP_PARTITION_RESERVED_BYTES
}

/// CRC-32 over the header+tables blob, matching how the geometry/metadata
/// blocks are self-checksummed on real devices (field not modeled above
/// since this engine only reads super images, never writes metadata).
pub fn checksum(blob: &[u8]) -> u32 {
    crc32_ieee(blob)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_geometry_block() -> Vec<u8> {
        let mut block = vec![0u8; LP_METADATA_GEOMETRY_SIZE];
        block[0..4].copy_from_slice(&GEOMETRY_MAGIC.to_le_bytes());
        block[8..12].copy_from_slice(&65536u32.to_le_bytes());
        block[12..16].copy_from_slice(&2u32.to_le_bytes());
        block[16..20].copy_from_slice(&4096u32.to_le_bytes());
        block
    }

    #[test]
    fn parses_geometry_block() {
        let mut image = vec![0u8; 4096 + LP_METADATA_GEOMETRY_SIZE];
        image[4096..].copy_from_slice(&build_geometry_block());
        let geom = parse_geometry(&image).unwrap();
        assert_eq!(geom.metadata_max_size, 65536);
        assert_eq!(geom.metadata_slot_count, 2);
        assert_eq!(geom.logical_block_size, 4096);
    }

    #[test]
    fn rejects_bad_geometry_magic() {
        let image = vec![0u8; 4096 + LP_METADATA_GEOMETRY_SIZE];
        assert!(parse_geometry(&image).is_err());
    }
}
