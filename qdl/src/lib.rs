// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.
//! Multi-vendor bootloader flashing engine.
//!
//! This crate speaks four boot-ROM/bootloader protocol families
//! (Qualcomm Sahara+Firehose, MediaTek BROM+XFlash/XML-DA, Spreadtrum
//! FDL, Android Fastboot) over a shared transport abstraction, and
//! carries the binary-format parsers (GPT, sparse, OTA payload, boot
//! image, LP metadata, ext4) those protocols hand data to and from.
//!
//! The Qualcomm stack (this module) is the oldest and most complete;
//! [`mtk`], [`sprd`] and [`fastboot`] follow the same shape: a thin
//! client struct borrowing a [`transport::Transport`], built on top of
//! the framing helpers in [`crc`] / [`hdlc`].

use anyhow::{Result, bail};
use indexmap::IndexMap;
use owo_colors::OwoColorize;
use std::io::{Read, Write};
use xmltree::{Element, XMLNode};

pub mod auth;
pub mod bootimg;
pub mod cloud;
pub mod config;
pub mod crc;
pub mod error;
pub mod event;
pub mod ext4;
pub mod fastboot;
pub mod gpt;
pub mod hdlc;
pub mod lp_metadata;
pub mod mtk;
pub mod orchestrator;
pub mod parsers;
pub mod payload;
pub mod port_detect;
pub mod sahara;
pub mod sparse;
pub mod sprd;
pub mod types;
pub mod vip;

#[cfg(feature = "serial")]
pub mod serial;
#[cfg(feature = "usb")]
pub mod usb;

pub mod transport;

pub use error::{EngineError, FirehoseError, FirehoseStatus, NakError};
pub use types::{FirehoseResetMode, QdlChan, QdlReadWrite};

/// The highest Firehose XML request schema currently emitted by this crate.
pub(crate) const FH_PROTO_VERSION_EMITTED: u32 = 1;

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Build a `<data><tag attr="..."/></data>` Firehose command document.
///
/// Hand-built rather than routed through `xmltree`'s emitter: device
/// firmware is occasionally picky about exact byte layout (no XML
/// declaration, no extraneous whitespace), so outgoing commands are
/// formatted directly while incoming ones are still parsed with
/// `xmltree` for robustness.
pub fn firehose_xml_setup(tag: &str, attrs: &[(&str, &str)]) -> Result<Vec<u8>, FirehoseError> {
    let mut s = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\" ?><data>\n<");
    s.push_str(tag);
    for (k, v) in attrs {
        s.push(' ');
        s.push_str(k);
        s.push_str("=\"");
        s.push_str(&xml_escape(v));
        s.push('"');
    }
    s.push_str(" />\n</data>\n");
    Ok(s.into_bytes())
}

fn firehose_send_command<T: QdlChan>(
    channel: &mut T,
    tag: &str,
    attrs: &[(&str, &str)],
) -> Result<(), FirehoseError> {
    let packet = firehose_xml_setup(tag, attrs)?;
    channel.write_all(&packet)?;
    Ok(())
}

/// Read Firehose response frames until one carries a `<response>` element,
/// forwarding every preceding `<log>` line, then return that element's
/// attributes.
///
/// Devices are free to interleave any number of `<log>` frames before the
/// final `<response>`; this loop keeps re-parsing the accumulated buffer
/// (bounded by `xml_buf_size`) until that happens.
pub fn firehose_read_attrs<T: QdlChan>(channel: &mut T) -> Result<IndexMap<String, String>, FirehoseError> {
    let cap = channel.fh_config().xml_buf_size.max(4096);
    let skip_log = channel.fh_config().skip_firehose_log;
    let verbose = channel.fh_config().verbose_firehose;
    let mut buf = vec![0u8; cap];
    let mut filled = 0usize;

    loop {
        if filled >= buf.len() {
            return Err(FirehoseError::MalformedData(IndexMap::new()));
        }
        let n = channel.read(&mut buf[filled..])?;
        if n == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
        filled += n;

        let root = match Element::parse(&buf[..filled]) {
            Ok(root) => root,
            Err(_) => continue,
        };

        let mut response = None;
        for node in root.children.iter() {
            let XMLNode::Element(e) = node else { continue };
            match e.name.as_str() {
                "log" => {
                    if !skip_log || verbose {
                        if let Some(v) = e.attributes.get("value") {
                            tracing::debug!(target: "firehose", "{v}");
                        }
                    }
                }
                "response" => response = Some(e.attributes.clone()),
                _ => {}
            }
        }
        if let Some(attrs) = response {
            return Ok(attrs);
        }
    }
}

/// As [`firehose_read_attrs`], but hands the response's attributes to a
/// canned parser (e.g. [`parsers::firehose_parser_ack_nak`]) that may also
/// update the session's negotiated configuration.
pub fn firehose_read<T: QdlChan>(
    channel: &mut T,
    parser: fn(&mut T, &IndexMap<String, String>) -> Result<FirehoseStatus, FirehoseError>,
) -> Result<FirehoseStatus, FirehoseError> {
    let attrs = firehose_read_attrs(channel)?;
    parser(channel, &attrs)
}

/// Send the `<configure>` handshake advertising host capabilities.
/// Does not wait for the response — callers read it separately with
/// [`firehose_read`] and [`parsers::firehose_parser_configure_response`].
pub fn firehose_configure<T: QdlChan>(
    channel: &mut T,
    skip_storage_init: bool,
) -> Result<(), FirehoseError> {
    let cfg = channel.fh_config().clone();
    let memory_name = cfg.storage_type.to_string();
    let max_payload = cfg.send_buffer_size.to_string();
    let skip_storage_init = (skip_storage_init as u8).to_string();
    let verbose = (cfg.verbose_firehose as u8).to_string();

    firehose_send_command(
        channel,
        "configure",
        &[
            ("MemoryName", memory_name.as_str()),
            ("MaxPayloadSizeToTargetInBytes", max_payload.as_str()),
            ("SkipStorageInit", skip_storage_init.as_str()),
            ("SkipWrite", "0"),
            ("ZlpAwareHost", "1"),
            ("AlwaysValidate", "0"),
            ("Verbose", verbose.as_str()),
        ],
    )
}

/// Send the device-specific auth challenge response immediately after a
/// successful `configure`, per the engine's pluggable `AuthStrategy`.
pub fn firehose_authenticate<T: QdlChan>(channel: &mut T) -> Result<(), FirehoseError> {
    let strategy = channel.fh_config().auth.clone();
    auth::authenticate(&strategy, channel)
}

pub fn firehose_nop<T: QdlChan>(channel: &mut T) -> Result<(), FirehoseError> {
    firehose_send_command(channel, "nop", &[("value", "ping")])?;
    match firehose_read(channel, parsers::firehose_parser_ack_nak)? {
        FirehoseStatus::Ack => Ok(()),
        FirehoseStatus::Nak => Err(FirehoseError::Nak(NakError::Nop)),
    }
}

pub fn firehose_peek<T: QdlChan>(channel: &mut T, base: u64, len: u64) -> Result<(), FirehoseError> {
    let addr = format!("{base:#x}");
    let size = len.to_string();
    firehose_send_command(
        channel,
        "peek",
        &[("address64", addr.as_str()), ("SizeInBytes", size.as_str())],
    )?;
    match firehose_read(channel, parsers::firehose_parser_ack_nak)? {
        FirehoseStatus::Ack => Ok(()),
        FirehoseStatus::Nak => Err(FirehoseError::Nak(NakError::Peek)),
    }
}

pub fn firehose_poke<T: QdlChan>(
    channel: &mut T,
    base: u64,
    len: u64,
    value: u64,
) -> Result<(), FirehoseError> {
    let addr = format!("{base:#x}");
    let size = len.to_string();
    let val = value.to_string();
    firehose_send_command(
        channel,
        "poke",
        &[
            ("address64", addr.as_str()),
            ("SizeInBytes", size.as_str()),
            ("value", val.as_str()),
        ],
    )?;
    match firehose_read(channel, parsers::firehose_parser_ack_nak)? {
        FirehoseStatus::Ack => Ok(()),
        FirehoseStatus::Nak => Err(FirehoseError::Nak(NakError::Poke)),
    }
}

pub fn firehose_set_bootable<T: QdlChan>(channel: &mut T, idx: u8) -> Result<(), FirehoseError> {
    let val = idx.to_string();
    firehose_send_command(channel, "setbootablestoragedrive", &[("value", val.as_str())])?;
    match firehose_read(channel, parsers::firehose_parser_ack_nak)? {
        FirehoseStatus::Ack => Ok(()),
        FirehoseStatus::Nak => Err(FirehoseError::Nak(NakError::SetBootable)),
    }
}

pub fn firehose_set_active_slot<T: QdlChan>(channel: &mut T, slot: char) -> Result<(), FirehoseError> {
    let val = slot.to_string();
    firehose_send_command(channel, "setactiveslot", &[("slot", val.as_str())])?;
    match firehose_read(channel, parsers::firehose_parser_ack_nak)? {
        FirehoseStatus::Ack => Ok(()),
        FirehoseStatus::Nak => Err(FirehoseError::Nak(NakError::SetActiveSlot)),
    }
}

/// Reset the device. A timeout/disconnect while waiting for the ack is not
/// an error here — the device is, by design, about to go away.
pub fn firehose_reset<T: QdlChan>(
    channel: &mut T,
    mode: &FirehoseResetMode,
    delay_ms: u64,
) -> Result<(), FirehoseError> {
    let value = match mode {
        FirehoseResetMode::ResetToEdl => "reset_to_edl",
        FirehoseResetMode::Off => "off",
        FirehoseResetMode::System => "reset",
    };
    firehose_send_command(channel, "power", &[("value", value)])?;
    if delay_ms > 0 {
        std::thread::sleep(std::time::Duration::from_millis(delay_ms));
    }
    let _ = firehose_read(channel, parsers::firehose_parser_ack_nak);
    Ok(())
}

pub fn firehose_get_default_sector_size(storage_type: &str) -> Option<usize> {
    match storage_type.to_ascii_lowercase().as_str() {
        "ufs" => Some(4096),
        "emmc" => Some(512),
        "nand" => Some(2048),
        "nvme" => Some(512),
        _ => None,
    }
}

/// Read `num_sectors` sectors starting at `start_sector` on LUN
/// `phys_part_idx` of physical storage device `slot` into `out`.
pub fn firehose_read_storage<T: QdlChan>(
    channel: &mut T,
    out: &mut impl Write,
    num_sectors: usize,
    slot: u8,
    phys_part_idx: u8,
    start_sector: u32,
) -> Result<(), FirehoseError> {
    let cfg = channel.fh_config().clone();
    let sector_size = cfg.storage_sector_size;
    let num_sectors_s = num_sectors.to_string();
    let sector_size_s = sector_size.to_string();
    let slot_s = slot.to_string();
    let phys_s = phys_part_idx.to_string();
    let start_s = start_sector.to_string();

    firehose_send_command(
        channel,
        "read",
        &[
            ("SECTOR_SIZE_IN_BYTES", sector_size_s.as_str()),
            ("num_partition_sectors", num_sectors_s.as_str()),
            ("physical_partition_number", phys_s.as_str()),
            ("start_sector", start_s.as_str()),
            ("slot", slot_s.as_str()),
        ],
    )?;

    let total_bytes = num_sectors * sector_size;
    let mut remaining = total_bytes;
    let mut chunk = vec![0u8; cfg.send_buffer_size.max(sector_size)];
    while remaining > 0 {
        let want = remaining.min(chunk.len());
        channel.read_exact(&mut chunk[..want])?;
        out.write_all(&chunk[..want])?;
        remaining -= want;
    }

    match firehose_read(channel, parsers::firehose_parser_ack_nak)? {
        FirehoseStatus::Ack => Ok(()),
        FirehoseStatus::Nak => Err(FirehoseError::Nak(NakError::Read)),
    }
}

/// Checksum (`getsha256digest`) a storage region without transferring its
/// contents to the host.
pub fn firehose_checksum_storage<T: QdlChan>(
    channel: &mut T,
    num_sectors: usize,
    phys_part_idx: u8,
    start_sector: u32,
) -> Result<(), FirehoseError> {
    let cfg = channel.fh_config().clone();
    let num_sectors_s = num_sectors.to_string();
    let sector_size_s = cfg.storage_sector_size.to_string();
    let phys_s = phys_part_idx.to_string();
    let start_s = start_sector.to_string();

    firehose_send_command(
        channel,
        "getsha256digest",
        &[
            ("SECTOR_SIZE_IN_BYTES", sector_size_s.as_str()),
            ("num_partition_sectors", num_sectors_s.as_str()),
            ("physical_partition_number", phys_s.as_str()),
            ("start_sector", start_s.as_str()),
        ],
    )?;
    match firehose_read(channel, parsers::firehose_parser_ack_nak)? {
        FirehoseStatus::Ack => Ok(()),
        FirehoseStatus::Nak => Err(FirehoseError::Nak(NakError::Read)),
    }
}

/// Write `num_sectors` sectors of `data` to LUN `phys_part_idx` of
/// physical storage device `slot`, starting at `start_sector`.
///
/// `start_sector` is taken as a string (rather than a numeric type)
/// because rawprogram XML sometimes carries symbolic values such as
/// `"NUM_DISK_SECTORS-33."` that are only meaningful to the device.
pub fn firehose_program_storage<T: QdlChan>(
    channel: &mut T,
    data: &mut impl Read,
    label: &str,
    num_sectors: usize,
    slot: u8,
    phys_part_idx: u8,
    start_sector: &str,
) -> Result<(), FirehoseError> {
    let cfg = channel.fh_config().clone();
    let sector_size = cfg.storage_sector_size;
    let num_sectors_s = num_sectors.to_string();
    let sector_size_s = sector_size.to_string();
    let slot_s = slot.to_string();
    let phys_s = phys_part_idx.to_string();

    firehose_send_command(
        channel,
        "program",
        &[
            ("SECTOR_SIZE_IN_BYTES", sector_size_s.as_str()),
            ("num_partition_sectors", num_sectors_s.as_str()),
            ("physical_partition_number", phys_s.as_str()),
            ("start_sector", start_sector),
            ("slot", slot_s.as_str()),
            ("label", label),
        ],
    )?;

    let total_bytes = num_sectors * sector_size;
    let chunk_size = cfg.send_buffer_size.max(sector_size) / sector_size * sector_size;
    let chunk_size = chunk_size.max(sector_size);
    let mut remaining = total_bytes;
    let mut buf = vec![0u8; chunk_size];

    while remaining > 0 {
        let want = remaining.min(chunk_size);
        let mut got = 0;
        while got < want {
            let n = data.read(&mut buf[got..want])?;
            if n == 0 {
                // Short read: pad the rest of this sector-aligned chunk with
                // zeroes so the device always receives whole sectors.
                for b in &mut buf[got..want] {
                    *b = 0;
                }
                break;
            }
            got += n;
        }
        channel.write_all(&buf[..want])?;
        remaining -= want;
    }

    match firehose_read(channel, parsers::firehose_parser_ack_nak)? {
        FirehoseStatus::Ack => Ok(()),
        FirehoseStatus::Nak => Err(FirehoseError::Nak(NakError::Program)),
    }
}

pub fn firehose_erase_storage<T: QdlChan>(
    channel: &mut T,
    num_sectors: usize,
    slot: u8,
    phys_part_idx: u8,
    start_sector: &str,
) -> Result<(), FirehoseError> {
    let cfg = channel.fh_config().clone();
    let num_sectors_s = num_sectors.to_string();
    let sector_size_s = cfg.storage_sector_size.to_string();
    let slot_s = slot.to_string();
    let phys_s = phys_part_idx.to_string();

    firehose_send_command(
        channel,
        "erase",
        &[
            ("SECTOR_SIZE_IN_BYTES", sector_size_s.as_str()),
            ("num_partition_sectors", num_sectors_s.as_str()),
            ("physical_partition_number", phys_s.as_str()),
            ("start_sector", start_sector),
            ("slot", slot_s.as_str()),
        ],
    )?;
    match firehose_read(channel, parsers::firehose_parser_ack_nak)? {
        FirehoseStatus::Ack => Ok(()),
        FirehoseStatus::Nak => Err(FirehoseError::Nak(NakError::Erase)),
    }
}

/// Byte-level overlay used to fix up GPT header/entry-array CRCs after a
/// raw partition table write (see `gpt::generate_patch_entries`).
pub fn firehose_patch<T: QdlChan>(
    channel: &mut T,
    byte_offset: u64,
    slot: u8,
    phys_part_idx: u8,
    size_in_bytes: u64,
    start_sector: &str,
    value: &str,
) -> Result<(), FirehoseError> {
    let byte_off_s = byte_offset.to_string();
    let slot_s = slot.to_string();
    let phys_s = phys_part_idx.to_string();
    let size_s = size_in_bytes.to_string();
    let sector_size_s = channel.fh_config().storage_sector_size.to_string();

    firehose_send_command(
        channel,
        "patch",
        &[
            ("SECTOR_SIZE_IN_BYTES", sector_size_s.as_str()),
            ("byte_offset", byte_off_s.as_str()),
            ("physical_partition_number", phys_s.as_str()),
            ("size_in_bytes", size_s.as_str()),
            ("start_sector", start_sector),
            ("slot", slot_s.as_str()),
            ("value", value),
            ("filename", "DISK"),
        ],
    )?;
    match firehose_read(channel, parsers::firehose_parser_ack_nak)? {
        FirehoseStatus::Ack => Ok(()),
        FirehoseStatus::Nak => Err(FirehoseError::Nak(NakError::Patch)),
    }
}

/// Open the transport named by `backend`/`serial_no`/`dev_path` and hand
/// back a boxed byte pipe. The caller builds a [`types::QdlDevice`] around
/// it (owned, via the box, or borrowed via `.as_mut()`).
pub fn setup_target_device(
    backend: types::QdlBackend,
    serial_no: Option<String>,
    dev_path: Option<String>,
) -> Result<Box<dyn QdlReadWrite>> {
    setup_transport(backend, usb::QUALCOMM_VID_PID, serial_no, dev_path)
}

/// As [`setup_target_device`], but for a caller-supplied `(vid, pids)`
/// table entry rather than the hard-coded Qualcomm EDL one — lets the
/// reference CLI open the same USB/serial backends for MTK BROM,
/// Spreadtrum BSL, and Fastboot targets.
pub fn setup_transport(
    backend: types::QdlBackend,
    #[allow(unused_variables)] vid_pid: (u16, &[u16]),
    #[allow(unused_variables)] serial_no: Option<String>,
    #[allow(unused_variables)] dev_path: Option<String>,
) -> Result<Box<dyn QdlReadWrite>> {
    match backend {
        #[cfg(feature = "usb")]
        types::QdlBackend::Usb => Ok(Box::new(usb::setup_usb_device(vid_pid, serial_no)?)),
        #[cfg(not(feature = "usb"))]
        types::QdlBackend::Usb => bail!("This build was compiled without USB transport support"),

        #[cfg(feature = "serial")]
        types::QdlBackend::Serial => Ok(Box::new(serial::setup_serial_device(dev_path)?)),
        #[cfg(not(feature = "serial"))]
        types::QdlBackend::Serial => {
            bail!("This build was compiled without serial transport support")
        }
    }
}
