// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.
//! Download-agent file parsing and post-`jump_da` negotiation: sync byte
//! exchange, auto-detection of the XFlash-vs-XML-DA-V6 framing the running
//! DA speaks, and the SLA secure-boot challenge/response.

use std::io::{Read, Write};

use crate::error::EngineError;
use crate::types::QdlChan;

const SYNC_BYTE: u8 = 0xC0;
const SYNC_REPLY: u8 = 0x69;

/// One entry from a DA file's entry table: which hw_code/hw_subcode this
/// blob targets, where it loads, and where execution begins.
#[derive(Debug, Clone)]
pub struct DaEntry {
    pub name: String,
    pub hw_code: u32,
    pub hw_subcode: u32,
    pub load_addr: u32,
    pub entry_addr: u32,
    pub data: Vec<u8>,
    pub sig_len: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaProtocol {
    XFlash,
    XmlDaV6,
}

/// Entry-table layout: name (64 bytes NUL-padded), hw_code/hw_subcode (u32
/// LE each), load_addr/entry_addr (u32 LE each), data_offset/data_size
/// (u32 LE each), sig_len (u32 LE). Fixed 92-byte stride per entry,
/// entry count at a 4-byte field preceding the table.
pub fn parse_da_file(file: &[u8]) -> Result<Vec<DaEntry>, EngineError> {
    if file.len() < 4 {
        return Err(EngineError::Parse("DA file too short".into()));
    }
    let count = u32::from_le_bytes(file[0..4].try_into().unwrap()) as usize;
    const ENTRY_STRIDE: usize = 92;
    let mut entries = Vec::with_capacity(count);

    for i in 0..count {
        let off = 4 + i * ENTRY_STRIDE;
        let e = file
            .get(off..off + ENTRY_STRIDE)
            .ok_or_else(|| EngineError::Parse("DA entry table truncated".into()))?;
        let name_bytes = &e[0..64];
        let nul = name_bytes.iter().position(|&b| b == 0).unwrap_or(64);
        let name = String::from_utf8_lossy(&name_bytes[..nul]).into_owned();
        let hw_code = u32::from_le_bytes(e[64..68].try_into().unwrap());
        let hw_subcode = u32::from_le_bytes(e[68..72].try_into().unwrap());
        let load_addr = u32::from_le_bytes(e[72..76].try_into().unwrap());
        let entry_addr = u32::from_le_bytes(e[76..80].try_into().unwrap());
        let data_offset = u32::from_le_bytes(e[80..84].try_into().unwrap()) as usize;
        let data_size = u32::from_le_bytes(e[84..88].try_into().unwrap()) as usize;
        let sig_len = u32::from_le_bytes(e[88..92].try_into().unwrap());

        let data = file
            .get(data_offset..data_offset + data_size)
            .ok_or_else(|| EngineError::Parse("DA entry payload out of bounds".into()))?
            .to_vec();

        entries.push(DaEntry {
            name,
            hw_code,
            hw_subcode,
            load_addr,
            entry_addr,
            data,
            sig_len,
        });
    }
    Ok(entries)
}

/// Exact `hw_code`/`hw_subcode` match wins; an entry with `hw_code == 0`
/// is a wildcard (MTK "AllInOne" DA files bundle every chip behind one
/// entry) and matches any device only once no exact match exists.
pub fn find_entry_for_chip(entries: &[DaEntry], hw_code: u32, hw_subcode: u32) -> Option<&DaEntry> {
    entries
        .iter()
        .find(|e| e.hw_code == hw_code && e.hw_subcode == hw_subcode)
        .or_else(|| entries.iter().find(|e| e.hw_code == 0))
}

/// Exchange the post-`jump_da` sync byte: device sends 0xC0, host must
/// reply 0x69.
pub fn sync<T: QdlChan>(channel: &mut T) -> Result<(), EngineError> {
    let mut b = [0u8; 1];
    channel.read_exact(&mut b)?;
    if b[0] != SYNC_BYTE {
        return Err(EngineError::Framing(format!(
            "expected DA sync byte {SYNC_BYTE:#04x}, got {:#04x}",
            b[0]
        )));
    }
    channel.write_all(&[SYNC_REPLY])?;
    Ok(())
}

/// Read the 12-byte transport header + payload the running DA emits right
/// after sync, and decide whether it's speaking XFlash or XML DA V6 by
/// sniffing the payload's first bytes. If `forced` is `Some`, that choice
/// is used instead of sniffing (the `Auto` selector commits to whatever
/// sniffing picks; a caller that already knows better can force it).
pub fn negotiate<T: QdlChan>(
    channel: &mut T,
    forced: Option<DaProtocol>,
) -> Result<(DaProtocol, Vec<u8>), EngineError> {
    let mut hdr = [0u8; 12];
    channel.read_exact(&mut hdr)?;
    let magic = u32::from_le_bytes(hdr[0..4].try_into().unwrap());
    if magic != crate::mtk::TRANSPORT_MAGIC {
        return Err(EngineError::Framing(format!(
            "bad DA init frame magic {magic:#x}"
        )));
    }
    let length = u32::from_le_bytes(hdr[8..12].try_into().unwrap()) as usize;
    let mut payload = vec![0u8; length];
    channel.read_exact(&mut payload)?;

    let protocol = forced.unwrap_or_else(|| sniff_protocol(&payload));
    Ok((protocol, payload))
}

fn sniff_protocol(payload: &[u8]) -> DaProtocol {
    let prefix = &payload[..payload.len().min(16)];
    let text = String::from_utf8_lossy(prefix);
    if text.trim_start().starts_with("<?xml") || text.trim_start().starts_with("<da") {
        DaProtocol::XmlDaV6
    } else {
        DaProtocol::XFlash
    }
}

/// Sign an SLA challenge with the RSA key bundled alongside the matched
/// DA entry (the key material itself is out of this crate's scope — the
/// caller supplies a signing closure, which in practice is backed by
/// either a local key file or `crate::cloud::DaSigningService`).
pub fn answer_sla_challenge(
    challenge: &[u8],
    sign: impl FnOnce(&[u8]) -> Result<Vec<u8>, EngineError>,
) -> Result<Vec<u8>, EngineError> {
    sign(challenge)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_da_file(entries: &[(&str, u32, u32, &[u8])]) -> Vec<u8> {
        let mut file = Vec::new();
        file.extend_from_slice(&(entries.len() as u32).to_le_bytes());
        let table_end = 4 + entries.len() * 92;
        let mut data_blob = Vec::new();
        let mut table = Vec::new();
        let mut offset = table_end;
        for (name, hw_code, hw_subcode, data) in entries {
            let mut name_field = [0u8; 64];
            name_field[..name.len()].copy_from_slice(name.as_bytes());
            table.extend_from_slice(&name_field);
            table.extend_from_slice(&hw_code.to_le_bytes());
            table.extend_from_slice(&hw_subcode.to_le_bytes());
            table.extend_from_slice(&0u32.to_le_bytes()); // load_addr
            table.extend_from_slice(&0u32.to_le_bytes()); // entry_addr
            table.extend_from_slice(&(offset as u32).to_le_bytes());
            table.extend_from_slice(&(data.len() as u32).to_le_bytes());
            table.extend_from_slice(&0u32.to_le_bytes()); // sig_len
            data_blob.extend_from_slice(data);
            offset += data.len();
        }
        file.extend_from_slice(&table);
        file.extend_from_slice(&data_blob);
        file
    }

    #[test]
    fn parses_entries_and_finds_by_chip() {
        let file = build_da_file(&[("DA1", 0x0717, 0x8A00, b"hello"), ("DA2", 0x0788, 0x0000, b"world")]);
        let entries = parse_da_file(&file).unwrap();
        assert_eq!(entries.len(), 2);
        let found = find_entry_for_chip(&entries, 0x0788, 0x0000).unwrap();
        assert_eq!(found.name, "DA2");
        assert_eq!(found.data, b"world");
    }

    #[test]
    fn wildcard_hw_code_zero_matches_any_device() {
        let file = build_da_file(&[("ALLINONE", 0x0000, 0x0000, b"payload")]);
        let entries = parse_da_file(&file).unwrap();
        let found = find_entry_for_chip(&entries, 0x0699, 0x0000).unwrap();
        assert_eq!(found.name, "ALLINONE");
    }

    #[test]
    fn exact_match_preferred_over_wildcard() {
        let file = build_da_file(&[
            ("ALLINONE", 0x0000, 0x0000, b"generic"),
            ("SPECIFIC", 0x0699, 0x0000, b"specific"),
        ]);
        let entries = parse_da_file(&file).unwrap();
        let found = find_entry_for_chip(&entries, 0x0699, 0x0000).unwrap();
        assert_eq!(found.name, "SPECIFIC");
    }

    #[test]
    fn sniffs_xml_da_v6_by_leading_tag() {
        assert_eq!(sniff_protocol(b"<da><version>1.0</version>"), DaProtocol::XmlDaV6);
        assert_eq!(sniff_protocol(b"<?xml version=\"1.0\"?>"), DaProtocol::XmlDaV6);
    }

    #[test]
    fn sniffs_xflash_when_not_xml() {
        assert_eq!(sniff_protocol(&[0x01, 0x02, 0x03, 0x04]), DaProtocol::XFlash);
    }
}
