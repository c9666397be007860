// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.
//! Android OTA `payload.bin` extraction. The manifest is protobuf-encoded
//! (`update_metadata.proto`); rather than pull in a protobuf codegen
//! dependency for the handful of fields this needs, the wire format is
//! decoded directly — the same trade-off the original implementation
//! makes to avoid a protobuf library at build time.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::EngineError;

const PAYLOAD_MAGIC: &[u8; 4] = b"CrAU";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadOpType {
    Replace,
    ReplaceBz,
    Move,
    Bsdiff,
    SourceCopy,
    SourceBsdiff,
    Zero,
    Discard,
    ReplaceXz,
    Puffdiff,
    Brotli,
    Zucchini,
    Lz4Diff,
    Unknown(u32),
}

impl From<u64> for PayloadOpType {
    fn from(v: u64) -> Self {
        match v {
            0 => PayloadOpType::Replace,
            1 => PayloadOpType::ReplaceBz,
            2 => PayloadOpType::Move,
            3 => PayloadOpType::Bsdiff,
            4 => PayloadOpType::SourceCopy,
            5 => PayloadOpType::SourceBsdiff,
            6 => PayloadOpType::Zero,
            7 => PayloadOpType::Discard,
            8 => PayloadOpType::ReplaceXz,
            9 => PayloadOpType::Puffdiff,
            10 => PayloadOpType::Brotli,
            11 => PayloadOpType::Zucchini,
            12 => PayloadOpType::Lz4Diff,
            other => PayloadOpType::Unknown(other as u32),
        }
    }
}

impl PayloadOpType {
    /// Operations this extractor can apply without a source partition.
    fn is_supported(&self) -> bool {
        matches!(
            self,
            PayloadOpType::Replace | PayloadOpType::ReplaceXz | PayloadOpType::Zero | PayloadOpType::Discard
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadExtent {
    pub start_block: u64,
    pub num_blocks: u64,
}

#[derive(Debug, Clone)]
pub struct PayloadOperation {
    pub op_type: PayloadOpType,
    pub data_offset: u64,
    pub data_length: u64,
    pub src_extents: Vec<PayloadExtent>,
    pub dst_extents: Vec<PayloadExtent>,
}

#[derive(Debug, Clone, Default)]
pub struct PayloadPartition {
    pub name: String,
    pub operations: Vec<PayloadOperation>,
    pub size: u64,
}

pub struct Payload {
    file: File,
    pub format_version: u64,
    pub block_size: u32,
    pub partitions: Vec<PayloadPartition>,
    data_offset: u64,
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Reader { data, pos: 0 }
    }

    fn varint(&mut self) -> Result<u64, EngineError> {
        let mut value = 0u64;
        let mut shift = 0;
        loop {
            let byte = *self
                .data
                .get(self.pos)
                .ok_or_else(|| EngineError::Parse("truncated varint".into()))?;
            self.pos += 1;
            value |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift >= 64 {
                return Err(EngineError::Parse("varint too long".into()));
            }
        }
    }

    fn tag(&mut self) -> Option<(u32, u32)> {
        if self.pos >= self.data.len() {
            return None;
        }
        let tag = self.varint().ok()?;
        Some(((tag >> 3) as u32, (tag & 0x7) as u32))
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], EngineError> {
        if self.pos + len > self.data.len() {
            return Err(EngineError::Parse("length-delimited field runs past message end".into()));
        }
        let out = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    fn skip(&mut self, wire_type: u32) -> Result<(), EngineError> {
        match wire_type {
            0 => {
                self.varint()?;
            }
            1 => {
                self.bytes(8)?;
            }
            2 => {
                let len = self.varint()? as usize;
                self.bytes(len)?;
            }
            5 => {
                self.bytes(4)?;
            }
            other => return Err(EngineError::Parse(format!("unknown protobuf wire type {other}"))),
        }
        Ok(())
    }
}

fn parse_extent(data: &[u8]) -> PayloadExtent {
    let mut r = Reader::new(data);
    let mut ext = PayloadExtent::default();
    while let Some((field, wire)) = r.tag() {
        match (field, wire) {
            (1, 0) => ext.start_block = r.varint().unwrap_or(0),
            (2, 0) => ext.num_blocks = r.varint().unwrap_or(0),
            _ => {
                if r.skip(wire).is_err() {
                    break;
                }
            }
        }
    }
    ext
}

fn parse_operation(data: &[u8]) -> PayloadOperation {
    let mut r = Reader::new(data);
    let mut op = PayloadOperation {
        op_type: PayloadOpType::Replace,
        data_offset: 0,
        data_length: 0,
        src_extents: Vec::new(),
        dst_extents: Vec::new(),
    };
    while let Some((field, wire)) = r.tag() {
        match (field, wire) {
            (1, 0) => op.op_type = r.varint().unwrap_or(0).into(),
            (2, 0) => op.data_offset = r.varint().unwrap_or(0),
            (3, 0) => op.data_length = r.varint().unwrap_or(0),
            (4, 2) => {
                let len = r.varint().unwrap_or(0) as usize;
                if let Ok(b) = r.bytes(len) {
                    op.src_extents.push(parse_extent(b));
                }
            }
            (6, 2) => {
                let len = r.varint().unwrap_or(0) as usize;
                if let Ok(b) = r.bytes(len) {
                    op.dst_extents.push(parse_extent(b));
                }
            }
            _ => {
                if r.skip(wire).is_err() {
                    break;
                }
            }
        }
    }
    op
}

fn parse_partition_update(data: &[u8]) -> PayloadPartition {
    let mut r = Reader::new(data);
    let mut part = PayloadPartition::default();
    while let Some((field, wire)) = r.tag() {
        match (field, wire) {
            (1, 2) => {
                let len = r.varint().unwrap_or(0) as usize;
                if let Ok(b) = r.bytes(len) {
                    part.name = String::from_utf8_lossy(b).into_owned();
                }
            }
            (2, 2) => {
                let len = r.varint().unwrap_or(0) as usize;
                if let Ok(b) = r.bytes(len) {
                    part.operations.push(parse_operation(b));
                }
            }
            (5, 2) => {
                let len = r.varint().unwrap_or(0) as usize;
                if let Ok(b) = r.bytes(len) {
                    let mut sub = Reader::new(b);
                    while let Some((sf, sw)) = sub.tag() {
                        match (sf, sw) {
                            (1, 0) => part.size = sub.varint().unwrap_or(0),
                            _ => {
                                if sub.skip(sw).is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            _ => {
                if r.skip(wire).is_err() {
                    break;
                }
            }
        }
    }
    part
}

fn parse_manifest(data: &[u8]) -> (u32, Vec<PayloadPartition>) {
    let mut r = Reader::new(data);
    let mut block_size = 4096u32;
    let mut partitions = Vec::new();
    while let Some((field, wire)) = r.tag() {
        match (field, wire) {
            (3, 0) => block_size = r.varint().unwrap_or(4096) as u32,
            (13, 2) => {
                let len = r.varint().unwrap_or(0) as usize;
                if let Ok(b) = r.bytes(len) {
                    partitions.push(parse_partition_update(b));
                }
            }
            _ => {
                if r.skip(wire).is_err() {
                    break;
                }
            }
        }
    }
    (block_size, partitions)
}

impl Payload {
    pub fn open(path: &Path) -> Result<Payload, EngineError> {
        let mut file = File::open(path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != PAYLOAD_MAGIC {
            return Err(EngineError::Parse("not an OTA payload (bad CrAU magic)".into()));
        }

        let mut buf8 = [0u8; 8];
        file.read_exact(&mut buf8)?;
        let format_version = u64::from_be_bytes(buf8);

        file.read_exact(&mut buf8)?;
        let manifest_size = u64::from_be_bytes(buf8);

        let mut meta_sig_size = 0u32;
        if format_version >= 2 {
            let mut buf4 = [0u8; 4];
            file.read_exact(&mut buf4)?;
            meta_sig_size = u32::from_be_bytes(buf4);
        }

        if manifest_size == 0 || manifest_size > 100 * 1024 * 1024 {
            return Err(EngineError::Parse(format!(
                "unreasonable manifest size {manifest_size}"
            )));
        }
        let mut manifest = vec![0u8; manifest_size as usize];
        file.read_exact(&mut manifest)?;

        if meta_sig_size > 0 {
            file.seek(SeekFrom::Current(meta_sig_size as i64))?;
        }
        let data_offset = file.stream_position()?;

        let (block_size, partitions) = parse_manifest(&manifest);
        if partitions.is_empty() {
            return Err(EngineError::Parse("payload manifest has no partitions".into()));
        }

        Ok(Payload {
            file,
            format_version,
            block_size,
            partitions,
            data_offset,
        })
    }

    pub fn partition_names(&self) -> Vec<&str> {
        self.partitions.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn partition(&self, name: &str) -> Option<&PayloadPartition> {
        self.partitions.iter().find(|p| p.name == name)
    }

    fn read_operation_data(&mut self, offset: u64, length: u64) -> std::io::Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(self.data_offset + offset))?;
        let mut buf = vec![0u8; length as usize];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn decompress(&self, compressed: Vec<u8>, op_type: PayloadOpType) -> Result<Vec<u8>, EngineError> {
        match op_type {
            PayloadOpType::Replace => Ok(compressed),
            PayloadOpType::ReplaceXz => {
                let mut out = Vec::new();
                xz2::read::XzDecoder::new(&compressed[..])
                    .read_to_end(&mut out)
                    .map_err(|e| EngineError::Parse(format!("xz decompression failed: {e}")))?;
                Ok(out)
            }
            other => Err(EngineError::Parse(format!("unsupported compression for {other:?}"))),
        }
    }

    /// Extract `name` to `out_path`, applying every supported operation in
    /// order. Unsupported operation types (source-delta variants) are
    /// logged and skipped — this is specified behavior, not a bug: the
    /// affected partitions simply can't be reconstructed without the
    /// device's current contents as a source.
    pub fn extract_partition(
        &mut self,
        name: &str,
        out_path: &Path,
        mut progress: impl FnMut(u64, u64),
    ) -> Result<(), EngineError> {
        let part = self
            .partition(name)
            .ok_or_else(|| EngineError::Resource(format!("partition '{name}' not found in payload")))?
            .clone();
        let block_size = self.block_size as u64;

        let mut out = File::create(out_path)?;
        if part.size > 0 {
            out.set_len(part.size)?;
        }

        let total = part.operations.len() as u64;
        for (i, op) in part.operations.iter().enumerate() {
            if !op.op_type.is_supported() {
                tracing::warn!(
                    "skipping unsupported payload op {:?} in partition {name}",
                    op.op_type
                );
                progress(i as u64 + 1, total);
                continue;
            }

            match op.op_type {
                PayloadOpType::Zero | PayloadOpType::Discard => {
                    let zeros = vec![0u8; 1024 * 1024];
                    for ext in &op.dst_extents {
                        let mut remaining = ext.num_blocks * block_size;
                        out.seek(SeekFrom::Start(ext.start_block * block_size))?;
                        while remaining > 0 {
                            let chunk = remaining.min(zeros.len() as u64) as usize;
                            out.write_all(&zeros[..chunk])?;
                            remaining -= chunk as u64;
                        }
                    }
                }
                _ => {
                    let compressed = self.read_operation_data(op.data_offset, op.data_length)?;
                    let raw = self.decompress(compressed, op.op_type)?;
                    let mut raw_offset = 0usize;
                    for ext in &op.dst_extents {
                        let write_offset = ext.start_block * block_size;
                        let want = (ext.num_blocks * block_size) as usize;
                        let avail = raw.len().saturating_sub(raw_offset);
                        let write_size = want.min(avail);
                        if write_size == 0 {
                            break;
                        }
                        out.seek(SeekFrom::Start(write_offset))?;
                        out.write_all(&raw[raw_offset..raw_offset + write_size])?;
                        raw_offset += write_size;
                    }
                }
            }
            progress(i as u64 + 1, total);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn varint(v: u64) -> Vec<u8> {
        let mut out = Vec::new();
        let mut v = v;
        loop {
            let mut b = (v & 0x7F) as u8;
            v >>= 7;
            if v != 0 {
                b |= 0x80;
            }
            out.push(b);
            if v == 0 {
                break;
            }
        }
        out
    }

    fn field_tag(field: u32, wire: u32) -> Vec<u8> {
        varint(((field as u64) << 3) | wire as u64)
    }

    #[test]
    fn parses_extent_fields() {
        let mut buf = Vec::new();
        buf.extend(field_tag(1, 0));
        buf.extend(varint(42));
        buf.extend(field_tag(2, 0));
        buf.extend(varint(7));
        let ext = parse_extent(&buf);
        assert_eq!(ext.start_block, 42);
        assert_eq!(ext.num_blocks, 7);
    }

    #[test]
    fn op_type_maps_known_values() {
        assert_eq!(PayloadOpType::from(0), PayloadOpType::Replace);
        assert_eq!(PayloadOpType::from(8), PayloadOpType::ReplaceXz);
        assert!(matches!(PayloadOpType::from(99), PayloadOpType::Unknown(99)));
    }

    #[test]
    fn unsupported_ops_are_flagged() {
        assert!(!PayloadOpType::Bsdiff.is_supported());
        assert!(PayloadOpType::ReplaceXz.is_supported());
    }
}
