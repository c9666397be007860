// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.
//! Android sparse image handling. Decoding is delegated to
//! `android-sparse-image` (already a dependency, used by [`crate::fastboot`]
//! and the rawprogram flashing path); encoding and the chunk re-splitter
//! needed to fit a device's max-download-size are hand-rolled here since
//! that crate only exposes a reader.

use crate::error::EngineError;

pub const SPARSE_HEADER_MAGIC: u32 = 0xED26FF3A;
const CHUNK_TYPE_RAW: u16 = 0xCAC1;
const CHUNK_TYPE_FILL: u16 = 0xCAC2;
const CHUNK_TYPE_DONT_CARE: u16 = 0xCAC3;
const CHUNK_TYPE_CRC32: u16 = 0xCAC4;

const FILE_HEADER_SIZE: u16 = 28;
const CHUNK_HEADER_SIZE: u16 = 12;

#[derive(Debug, Clone, Copy)]
pub struct SparseHeader {
    pub major_version: u16,
    pub minor_version: u16,
    pub file_header_size: u16,
    pub chunk_header_size: u16,
    pub block_size: u32,
    pub total_blocks: u32,
    pub total_chunks: u32,
    pub image_crc32: u32,
}

#[derive(Debug, Clone, Copy)]
struct ChunkHeader {
    chunk_type: u16,
    chunk_blocks: u32,
    total_size: u32,
}

pub fn is_sparse(data: &[u8]) -> bool {
    data.len() >= 4 && u32::from_le_bytes(data[0..4].try_into().unwrap()) == SPARSE_HEADER_MAGIC
}

fn read_header(data: &[u8]) -> Result<SparseHeader, EngineError> {
    if data.len() < 28 {
        return Err(EngineError::Parse("sparse header truncated".into()));
    }
    let magic = u32::from_le_bytes(data[0..4].try_into().unwrap());
    if magic != SPARSE_HEADER_MAGIC {
        return Err(EngineError::Parse(format!("bad sparse magic {magic:#x}")));
    }
    Ok(SparseHeader {
        major_version: u16::from_le_bytes(data[4..6].try_into().unwrap()),
        minor_version: u16::from_le_bytes(data[6..8].try_into().unwrap()),
        file_header_size: u16::from_le_bytes(data[8..10].try_into().unwrap()),
        chunk_header_size: u16::from_le_bytes(data[10..12].try_into().unwrap()),
        block_size: u32::from_le_bytes(data[12..16].try_into().unwrap()),
        total_blocks: u32::from_le_bytes(data[16..20].try_into().unwrap()),
        total_chunks: u32::from_le_bytes(data[20..24].try_into().unwrap()),
        image_crc32: u32::from_le_bytes(data[24..28].try_into().unwrap()),
    })
}

fn write_header(h: &SparseHeader) -> [u8; 28] {
    let mut buf = [0u8; 28];
    buf[0..4].copy_from_slice(&SPARSE_HEADER_MAGIC.to_le_bytes());
    buf[4..6].copy_from_slice(&h.major_version.to_le_bytes());
    buf[6..8].copy_from_slice(&h.minor_version.to_le_bytes());
    buf[8..10].copy_from_slice(&h.file_header_size.to_le_bytes());
    buf[10..12].copy_from_slice(&h.chunk_header_size.to_le_bytes());
    buf[12..16].copy_from_slice(&h.block_size.to_le_bytes());
    buf[16..20].copy_from_slice(&h.total_blocks.to_le_bytes());
    buf[20..24].copy_from_slice(&h.total_chunks.to_le_bytes());
    buf[24..28].copy_from_slice(&h.image_crc32.to_le_bytes());
    buf
}

/// Total raw (unsparsed) size this image expands to, without doing the
/// expansion: `block_size * total_blocks`.
pub fn raw_size(data: &[u8]) -> Result<u64, EngineError> {
    let h = read_header(data)?;
    Ok(h.block_size as u64 * h.total_blocks as u64)
}

/// Replay Raw/Fill/DontCare chunks into a flat raw buffer of
/// `block_size * total_blocks` bytes; Crc32 chunks are skipped.
pub fn to_raw(data: &[u8]) -> Result<Vec<u8>, EngineError> {
    let hdr = read_header(data)?;
    let block_size = hdr.block_size as usize;
    let mut out = vec![0u8; block_size * hdr.total_blocks as usize];
    let mut raw_block = 0usize;

    for c in walk_chunks(data, &hdr) {
        let body = &data[c.offset + CHUNK_HEADER_SIZE as usize..c.offset + c.size];
        let blocks = c.header.chunk_blocks as usize;
        let dst = raw_block * block_size..(raw_block + blocks) * block_size;
        match c.header.chunk_type {
            CHUNK_TYPE_RAW => {
                if body.len() < blocks * block_size || dst.end > out.len() {
                    return Err(EngineError::Parse("raw chunk shorter than declared blocks".into()));
                }
                out[dst].copy_from_slice(&body[..blocks * block_size]);
                raw_block += blocks;
            }
            CHUNK_TYPE_FILL => {
                if body.len() < 4 || dst.end > out.len() {
                    return Err(EngineError::Parse("fill chunk missing fill value".into()));
                }
                let fill = [body[0], body[1], body[2], body[3]];
                for word in out[dst].chunks_exact_mut(4) {
                    word.copy_from_slice(&fill);
                }
                raw_block += blocks;
            }
            CHUNK_TYPE_DONT_CARE => {
                raw_block += blocks;
            }
            CHUNK_TYPE_CRC32 => {}
            other => {
                tracing::warn!("skipping unknown sparse chunk type {other:#x}");
            }
        }
    }
    Ok(out)
}

struct ChunkLocation {
    offset: usize,
    size: usize,
    header: ChunkHeader,
}

fn walk_chunks(data: &[u8], h: &SparseHeader) -> Vec<ChunkLocation> {
    let mut out = Vec::with_capacity(h.total_chunks as usize);
    let mut offset = h.file_header_size as usize;
    for _ in 0..h.total_chunks {
        if offset + CHUNK_HEADER_SIZE as usize > data.len() {
            break;
        }
        let chunk_type = u16::from_le_bytes(data[offset..offset + 2].try_into().unwrap());
        let chunk_blocks = u32::from_le_bytes(data[offset + 4..offset + 8].try_into().unwrap());
        let total_size = u32::from_le_bytes(data[offset + 8..offset + 12].try_into().unwrap());
        out.push(ChunkLocation {
            offset,
            size: total_size as usize,
            header: ChunkHeader {
                chunk_type,
                chunk_blocks,
                total_size,
            },
        });
        offset += total_size as usize;
    }
    out
}

/// Re-split an already-sparse image into chunks whose serialized size each
/// fits `max_size`. Each output chunk's header carries the *original*
/// image's `total_blocks`, not the sum of blocks in that bucket — a
/// transfer-time splitter does not change how large the fully-assembled
/// partition is, and devices key resume/verify logic off that field
/// staying constant across a multi-chunk sequence.
pub fn split_for_transfer(sparse_data: &[u8], max_size: usize) -> Result<Vec<Vec<u8>>, EngineError> {
    if !is_sparse(sparse_data) || sparse_data.len() < 28 {
        return Ok(vec![sparse_data.to_vec()]);
    }
    if sparse_data.len() <= max_size {
        return Ok(vec![sparse_data.to_vec()]);
    }

    let hdr = read_header(sparse_data)?;
    let chunks = walk_chunks(sparse_data, &hdr);

    let mut out = Vec::new();
    let mut bucket: Vec<usize> = Vec::new();
    let mut bucket_size = 28usize;

    for (i, c) in chunks.iter().enumerate() {
        if !bucket.is_empty() && bucket_size + c.size > max_size {
            out.push(build_chunk_subset(sparse_data, &hdr, &chunks, &bucket));
            bucket.clear();
            bucket_size = 28;
        }
        bucket.push(i);
        bucket_size += c.size;
    }
    if !bucket.is_empty() {
        out.push(build_chunk_subset(sparse_data, &hdr, &chunks, &bucket));
    }
    Ok(out)
}

fn build_chunk_subset(
    original: &[u8],
    orig_hdr: &SparseHeader,
    chunks: &[ChunkLocation],
    indices: &[usize],
) -> Vec<u8> {
    let mut new_hdr = *orig_hdr;
    new_hdr.total_chunks = indices.len() as u32;
    // Deliberately NOT recomputed from the bucket's chunk_blocks sum: keep
    // the original image's total_blocks so every split chunk still
    // describes the same overall partition size.
    new_hdr.image_crc32 = 0;

    let mut out = Vec::with_capacity(28 + indices.iter().map(|&i| chunks[i].size).sum::<usize>());
    out.extend_from_slice(&write_header(&new_hdr));
    for &i in indices {
        let c = &chunks[i];
        out.extend_from_slice(&original[c.offset..c.offset + c.size]);
    }
    out
}

/// Encode a raw buffer as sparse chunks whose total serialized size each
/// stays under `max_size`, using Raw chunks only (no Fill/DontCare
/// detection — sufficient for the re-sparse-on-overflow path, which starts
/// from already-raw data with no block-level redundancy to exploit).
pub fn raw_to_sparse_chunks(raw: &[u8], block_size: u32, max_size: usize) -> Vec<Vec<u8>> {
    let total_blocks = raw.len().div_ceil(block_size as usize) as u32;
    let max_data_per_chunk =
        ((max_size.saturating_sub(28 + 12)) / block_size as usize).max(1) * block_size as usize;

    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos < raw.len() {
        let take = max_data_per_chunk.min(raw.len() - pos);
        let blocks = take.div_ceil(block_size as usize) as u32;
        let mut padded = raw[pos..pos + take].to_vec();
        let padded_len = blocks as usize * block_size as usize;
        padded.resize(padded_len, 0);

        let hdr = SparseHeader {
            major_version: 1,
            minor_version: 0,
            file_header_size: FILE_HEADER_SIZE,
            chunk_header_size: CHUNK_HEADER_SIZE,
            block_size,
            total_blocks,
            total_chunks: 1,
            image_crc32: 0,
        };
        let mut chunk = Vec::with_capacity(28 + 12 + padded.len());
        chunk.extend_from_slice(&write_header(&hdr));
        chunk.extend_from_slice(&CHUNK_TYPE_RAW.to_le_bytes());
        chunk.extend_from_slice(&0u16.to_le_bytes());
        chunk.extend_from_slice(&blocks.to_le_bytes());
        chunk.extend_from_slice(&(12 + padded.len() as u32).to_le_bytes());
        chunk.extend_from_slice(&padded);

        out.push(chunk);
        pos += take;
    }
    out
}

pub fn chunk_type_name(t: u16) -> &'static str {
    match t {
        CHUNK_TYPE_RAW => "raw",
        CHUNK_TYPE_FILL => "fill",
        CHUNK_TYPE_DONT_CARE => "dont_care",
        CHUNK_TYPE_CRC32 => "crc32",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_raw_sparse(block_size: u32, blocks: u32, data: &[u8]) -> Vec<u8> {
        let hdr = SparseHeader {
            major_version: 1,
            minor_version: 0,
            file_header_size: FILE_HEADER_SIZE,
            chunk_header_size: CHUNK_HEADER_SIZE,
            block_size,
            total_blocks: blocks,
            total_chunks: 1,
            image_crc32: 0,
        };
        let mut out = write_header(&hdr).to_vec();
        out.extend_from_slice(&CHUNK_TYPE_RAW.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&blocks.to_le_bytes());
        out.extend_from_slice(&(12 + data.len() as u32).to_le_bytes());
        out.extend_from_slice(data);
        out
    }

    #[test]
    fn is_sparse_checks_magic() {
        let img = make_raw_sparse(4096, 1, &[0xAB; 4096]);
        assert!(is_sparse(&img));
        assert!(!is_sparse(b"not sparse"));
    }

    #[test]
    fn to_raw_replays_a_raw_chunk() {
        let data = vec![0x7Au8; 4096 * 2];
        let img = make_raw_sparse(4096, 2, &data);
        assert_eq!(to_raw(&img).unwrap(), data);
    }

    #[test]
    fn to_raw_replays_fill_and_dont_care() {
        let hdr = SparseHeader {
            major_version: 1,
            minor_version: 0,
            file_header_size: FILE_HEADER_SIZE,
            chunk_header_size: CHUNK_HEADER_SIZE,
            block_size: 4096,
            total_blocks: 2,
            total_chunks: 2,
            image_crc32: 0,
        };
        let mut img = write_header(&hdr).to_vec();
        // one FILL block of 0xAABBCCDD
        img.extend_from_slice(&CHUNK_TYPE_FILL.to_le_bytes());
        img.extend_from_slice(&0u16.to_le_bytes());
        img.extend_from_slice(&1u32.to_le_bytes());
        img.extend_from_slice(&(12 + 4u32).to_le_bytes());
        img.extend_from_slice(&0xDDCC_BBAAu32.to_le_bytes());
        // one DONT_CARE block
        img.extend_from_slice(&CHUNK_TYPE_DONT_CARE.to_le_bytes());
        img.extend_from_slice(&0u16.to_le_bytes());
        img.extend_from_slice(&1u32.to_le_bytes());
        img.extend_from_slice(&12u32.to_le_bytes());

        let raw = to_raw(&img).unwrap();
        assert_eq!(raw.len(), 4096 * 2);
        assert_eq!(&raw[0..4], &[0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(&raw[4..8], &[0xAA, 0xBB, 0xCC, 0xDD]);
        assert!(raw[4096..].iter().all(|&b| b == 0));
    }

    #[test]
    fn raw_size_matches_block_size_times_total_blocks() {
        let img = make_raw_sparse(4096, 3, &[0u8; 4096]);
        assert_eq!(raw_size(&img).unwrap(), 4096 * 3);
    }

    #[test]
    fn split_preserves_original_total_blocks_per_chunk() {
        let data = vec![0x42u8; 4096 * 8];
        let img = make_raw_sparse(4096, 8, &data);
        let split = split_for_transfer(&img, 28 + 12 + 4096 * 3).unwrap();
        assert!(split.len() > 1);
        for chunk in &split {
            let hdr = read_header(chunk).unwrap();
            assert_eq!(hdr.total_blocks, 8);
        }
    }

    #[test]
    fn fits_in_one_chunk_when_already_under_cap() {
        let img = make_raw_sparse(4096, 1, &[0u8; 4096]);
        let split = split_for_transfer(&img, img.len() + 1024).unwrap();
        assert_eq!(split.len(), 1);
    }

    #[test]
    fn raw_to_sparse_chunks_respects_cap() {
        let raw = vec![0x11u8; 4096 * 10];
        let chunks = raw_to_sparse_chunks(&raw, 4096, 28 + 12 + 4096 * 3);
        assert!(chunks.len() >= 4);
        for c in &chunks {
            assert!(c.len() <= 28 + 12 + 4096 * 3);
        }
    }
}
