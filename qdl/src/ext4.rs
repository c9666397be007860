// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.
//! Minimal read-only ext4 reader: superblock, group descriptors, inode
//! table lookups, and file data resolution via extent trees or the
//! legacy triple-indirect block scheme. Used to pull individual files
//! (e.g. build.prop, a vbmeta blob) out of a partition image without
//! shelling out to a loopback mount.

use crate::error::EngineError;

const EXT4_MAGIC: u16 = 0xEF53;
const SB_OFFSET: usize = 1024;
const EXT4_EXTENTS_FL: u32 = 0x0008_0000;
/// Caps extent-tree and indirect-block recursion. ext4 only ever nests
/// a few levels deep in practice (tree depth is stored in the header and
/// bounded by the filesystem's own geometry); this is a hard backstop
/// against a corrupt image driving unbounded recursion.
const MAX_RESOLVE_DEPTH: u32 = 8;

#[derive(Debug, Clone, Copy)]
pub struct Superblock {
    pub inodes_count: u32,
    pub blocks_count: u64,
    pub log_block_size: u32,
    pub inodes_per_group: u32,
    pub inode_size: u16,
    pub blocks_per_group: u32,
    pub first_data_block: u32,
    pub desc_size: u16,
    pub feature_incompat: u32,
}

impl Superblock {
    pub fn block_size(&self) -> u64 {
        1024u64 << self.log_block_size
    }

    fn uses_64bit_desc(&self) -> bool {
        self.feature_incompat & 0x80 != 0 // INCOMPAT_64BIT
    }

    fn group_desc_size(&self) -> usize {
        if self.uses_64bit_desc() && self.desc_size >= 64 {
            self.desc_size as usize
        } else {
            32
        }
    }
}

fn u16_at(d: &[u8], o: usize) -> u16 {
    u16::from_le_bytes(d[o..o + 2].try_into().unwrap())
}
fn u32_at(d: &[u8], o: usize) -> u32 {
    u32::from_le_bytes(d[o..o + 4].try_into().unwrap())
}
fn u64_at(d: &[u8], o: usize) -> u64 {
    u64::from_le_bytes(d[o..o + 8].try_into().unwrap())
}

pub fn parse_superblock(image: &[u8]) -> Result<Superblock, EngineError> {
    let sb = image
        .get(SB_OFFSET..SB_OFFSET + 1024)
        .ok_or_else(|| EngineError::Parse("image too small for ext4 superblock".into()))?;

    let magic = u16_at(sb, 56);
    if magic != EXT4_MAGIC {
        return Err(EngineError::Parse(format!(
            "bad ext4 superblock magic {magic:#x}"
        )));
    }

    Ok(Superblock {
        inodes_count: u32_at(sb, 0),
        blocks_count: u32_at(sb, 4) as u64 | ((u32_at(sb, 0x150) as u64) << 32),
        log_block_size: u32_at(sb, 24),
        blocks_per_group: u32_at(sb, 32),
        inodes_per_group: u32_at(sb, 40),
        inode_size: u16_at(sb, 88),
        desc_size: u16_at(sb, 0xFE),
        feature_incompat: u32_at(sb, 0x60),
        first_data_block: u32_at(sb, 20),
    })
}

struct GroupDesc {
    inode_table: u64,
}

fn read_group_desc(image: &[u8], sb: &Superblock, group: u32) -> Result<GroupDesc, EngineError> {
    let gdt_block = sb.first_data_block as u64 + 1;
    let desc_size = sb.group_desc_size();
    let off = (gdt_block * sb.block_size()) as usize + group as usize * desc_size;
    let d = image
        .get(off..off + desc_size)
        .ok_or_else(|| EngineError::Parse("group descriptor table out of bounds".into()))?;

    let lo = u32_at(d, 8) as u64;
    let hi = if desc_size >= 64 { u32_at(d, 40) as u64 } else { 0 };
    Ok(GroupDesc {
        inode_table: lo | (hi << 32),
    })
}

/// Read one inode's raw on-disk record.
pub fn read_inode(image: &[u8], sb: &Superblock, inode_num: u32) -> Result<Vec<u8>, EngineError> {
    if inode_num == 0 {
        return Err(EngineError::Parse("inode 0 does not exist".into()));
    }
    let index = inode_num - 1;
    let group = index / sb.inodes_per_group;
    let index_in_group = index % sb.inodes_per_group;

    let gd = read_group_desc(image, sb, group)?;
    let off = (gd.inode_table * sb.block_size()) as usize + index_in_group as usize * sb.inode_size as usize;
    image
        .get(off..off + sb.inode_size as usize)
        .map(|s| s.to_vec())
        .ok_or_else(|| EngineError::Parse("inode table entry out of bounds".into()))
}

pub struct Inode {
    pub mode: u16,
    pub size: u64,
    pub flags: u32,
    /// First 60 bytes of `i_block`: either 15 legacy direct/indirect
    /// block pointers, or (when EXTENTS_FL is set) the inline extent
    /// tree header + root node entries.
    pub i_block: [u8; 60],
}

pub fn parse_inode(raw: &[u8]) -> Result<Inode, EngineError> {
    if raw.len() < 160 {
        return Err(EngineError::Parse("inode record truncated".into()));
    }
    let size_lo = u32_at(raw, 4) as u64;
    let size_hi = u32_at(raw, 108) as u64;
    let mut i_block = [0u8; 60];
    i_block.copy_from_slice(&raw[40..100]);
    Ok(Inode {
        mode: u16_at(raw, 0),
        size: size_lo | (size_hi << 32),
        flags: u32_at(raw, 32),
        i_block,
    })
}

/// Resolve an inode's data into a flat byte vector by walking either its
/// extent tree or its legacy direct/indirect/double-indirect/triple-indirect
/// block list, whichever `EXT4_EXTENTS_FL` selects.
pub fn read_file_data(image: &[u8], sb: &Superblock, inode: &Inode) -> Result<Vec<u8>, EngineError> {
    let mut out = Vec::with_capacity(inode.size as usize);
    if inode.flags & EXT4_EXTENTS_FL != 0 {
        walk_extent_node(image, sb, &inode.i_block, 0, &mut out)?;
    } else {
        walk_indirect_blocks(image, sb, &inode.i_block, &mut out)?;
    }
    out.truncate(inode.size as usize);
    Ok(out)
}

const EXT4_EXTENT_MAGIC: u16 = 0xF30A;

fn walk_extent_node(
    image: &[u8],
    sb: &Superblock,
    node: &[u8],
    depth: u32,
    out: &mut Vec<u8>,
) -> Result<(), EngineError> {
    if depth > MAX_RESOLVE_DEPTH {
        return Err(EngineError::Parse("ext4 extent tree exceeds max depth".into()));
    }
    if node.len() < 12 || u16_at(node, 0) != EXT4_EXTENT_MAGIC {
        return Err(EngineError::Parse("bad extent header magic".into()));
    }
    let entries = u16_at(node, 2);
    let depth_field = u16_at(node, 6);

    for i in 0..entries as usize {
        let e = &node[12 + i * 12..12 + (i + 1) * 12];
        if depth_field == 0 {
            // leaf: ext4_extent {ee_block, ee_len, ee_start_hi, ee_start_lo}
            let len = u16_at(e, 4) & 0x7FFF; // top bit marks an uninitialized extent
            let start_hi = u16_at(e, 6) as u64;
            let start_lo = u32_at(e, 8) as u64;
            let start_block = (start_hi << 32) | start_lo;
            for b in 0..len as u64 {
                append_block(image, sb, start_block + b, out)?;
            }
        } else {
            // index: ext4_extent_idx {ei_block, ei_leaf_lo, ei_leaf_hi}
            let leaf_lo = u32_at(e, 4) as u64;
            let leaf_hi = u16_at(e, 8) as u64;
            let child_block = (leaf_hi << 32) | leaf_lo;
            let child = read_block(image, sb, child_block)?;
            walk_extent_node(image, sb, child, depth + 1, out)?;
        }
    }
    Ok(())
}

fn walk_indirect_blocks(
    image: &[u8],
    sb: &Superblock,
    i_block: &[u8; 60],
    out: &mut Vec<u8>,
) -> Result<(), EngineError> {
    for i in 0..12 {
        let b = u32_at(i_block, i * 4) as u64;
        if b != 0 {
            append_block(image, sb, b, out)?;
        }
    }
    let singly = u32_at(i_block, 48) as u64;
    if singly != 0 {
        walk_indirect_level(image, sb, singly, 1, out)?;
    }
    let doubly = u32_at(i_block, 52) as u64;
    if doubly != 0 {
        walk_indirect_level(image, sb, doubly, 2, out)?;
    }
    let triply = u32_at(i_block, 56) as u64;
    if triply != 0 {
        walk_indirect_level(image, sb, triply, 3, out)?;
    }
    Ok(())
}

fn walk_indirect_level(
    image: &[u8],
    sb: &Superblock,
    block_num: u64,
    depth: u32,
    out: &mut Vec<u8>,
) -> Result<(), EngineError> {
    if depth > MAX_RESOLVE_DEPTH {
        return Err(EngineError::Parse("ext4 indirect block exceeds max depth".into()));
    }
    let block = read_block(image, sb, block_num)?;
    let pointers_per_block = sb.block_size() as usize / 4;
    for i in 0..pointers_per_block {
        let ptr = u32_at(block, i * 4) as u64;
        if ptr == 0 {
            continue;
        }
        if depth == 1 {
            append_block(image, sb, ptr, out)?;
        } else {
            walk_indirect_level(image, sb, ptr, depth - 1, out)?;
        }
    }
    Ok(())
}

fn read_block<'a>(image: &'a [u8], sb: &Superblock, block_num: u64) -> Result<&'a [u8], EngineError> {
    let off = (block_num * sb.block_size()) as usize;
    image
        .get(off..off + sb.block_size() as usize)
        .ok_or_else(|| EngineError::Parse("ext4 block number out of bounds".into()))
}

fn append_block(image: &[u8], sb: &Superblock, block_num: u64, out: &mut Vec<u8>) -> Result<(), EngineError> {
    out.extend_from_slice(read_block(image, sb, block_num)?);
    Ok(())
}

/// One entry from a directory's linear entry list.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub inode: u32,
    pub name: String,
}

/// Walk a directory's (already-resolved) data blocks and return its
/// entries. Does not recurse into subdirectories.
pub fn list_dir(dir_data: &[u8]) -> Vec<DirEntry> {
    let mut entries = Vec::new();
    let mut off = 0usize;
    while off + 8 <= dir_data.len() {
        let inode = u32_at(dir_data, off);
        let rec_len = u16_at(dir_data, off + 4) as usize;
        if rec_len < 8 {
            break;
        }
        let name_len = dir_data[off + 6] as usize;
        if inode != 0 && off + 8 + name_len <= dir_data.len() {
            let name = String::from_utf8_lossy(&dir_data[off + 8..off + 8 + name_len]).into_owned();
            entries.push(DirEntry { inode, name });
        }
        off += rec_len;
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_superblock_image(block_size_log: u32) -> Vec<u8> {
        let mut img = vec![0u8; SB_OFFSET + 1024];
        let sb = &mut img[SB_OFFSET..SB_OFFSET + 1024];
        sb[0..4].copy_from_slice(&128u32.to_le_bytes()); // inodes_count
        sb[4..8].copy_from_slice(&1024u32.to_le_bytes()); // blocks_count
        sb[24..28].copy_from_slice(&block_size_log.to_le_bytes());
        sb[32..36].copy_from_slice(&8192u32.to_le_bytes()); // blocks_per_group
        sb[40..44].copy_from_slice(&128u32.to_le_bytes()); // inodes_per_group
        sb[56..58].copy_from_slice(&EXT4_MAGIC.to_le_bytes());
        sb[88..90].copy_from_slice(&256u16.to_le_bytes()); // inode_size
        img
    }

    #[test]
    fn parses_superblock_fields() {
        let img = build_superblock_image(2); // block_size = 1024 << 2 = 4096
        let sb = parse_superblock(&img).unwrap();
        assert_eq!(sb.block_size(), 4096);
        assert_eq!(sb.inodes_per_group, 128);
        assert_eq!(sb.inode_size, 256);
    }

    #[test]
    fn rejects_bad_magic() {
        let img = vec![0u8; SB_OFFSET + 1024];
        assert!(parse_superblock(&img).is_err());
    }

    #[test]
    fn extent_tree_depth_cap_rejects_runaway_recursion() {
        let sb = Superblock {
            inodes_count: 1,
            blocks_count: 1,
            log_block_size: 2,
            inodes_per_group: 1,
            inode_size: 256,
            blocks_per_group: 1,
            first_data_block: 0,
            desc_size: 32,
            feature_incompat: 0,
        };
        let mut node = vec![0u8; 12];
        node[0..2].copy_from_slice(&EXT4_EXTENT_MAGIC.to_le_bytes());
        let mut out = Vec::new();
        let result = walk_extent_node(&[], &sb, &node, MAX_RESOLVE_DEPTH + 1, &mut out);
        assert!(result.is_err());
    }

    #[test]
    fn list_dir_parses_linear_entries() {
        let mut data = vec![0u8; 24];
        data[0..4].copy_from_slice(&2u32.to_le_bytes());
        data[4..6].copy_from_slice(&12u16.to_le_bytes());
        data[6] = 1; // name_len
        data[8] = b'a';
        data[12..16].copy_from_slice(&5u32.to_le_bytes());
        data[16..18].copy_from_slice(&12u16.to_le_bytes());
        data[18] = 2;
        data[20] = b'b';
        data[21] = b'c';
        let entries = list_dir(&data);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a");
        assert_eq!(entries[1].name, "bc");
    }
}
