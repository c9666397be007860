// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.
use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// Marker for any concrete byte pipe a [`QdlDevice`] can be built around
/// (serial port, USB bulk endpoints, or a test loopback).
pub trait QdlReadWrite: Read + Write {}

/// A Firehose-speaking channel: the underlying byte pipe plus the
/// negotiated session configuration that every `firehose_*` free function
/// needs to read.
pub trait QdlChan: Read + Write {
    fn fh_config(&self) -> &FirehoseConfiguration;
    fn mut_fh_config(&mut self) -> &mut FirehoseConfiguration;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QdlBackend {
    #[default]
    Usb,
    Serial,
}

impl FromStr for QdlBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "usb" => Ok(QdlBackend::Usb),
            "serial" => Ok(QdlBackend::Serial),
            other => bail!("Unknown backend '{}', expected usb/serial", other),
        }
    }
}

impl fmt::Display for QdlBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QdlBackend::Usb => "usb",
            QdlBackend::Serial => "serial",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FirehoseStorageType {
    Emmc,
    Ufs,
    Nvme,
    Nand,
}

impl FromStr for FirehoseStorageType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "emmc" => Ok(FirehoseStorageType::Emmc),
            "ufs" => Ok(FirehoseStorageType::Ufs),
            "nvme" => Ok(FirehoseStorageType::Nvme),
            "nand" => Ok(FirehoseStorageType::Nand),
            other => bail!("Unknown storage type '{}'", other),
        }
    }
}

impl fmt::Display for FirehoseStorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FirehoseStorageType::Emmc => "emmc",
            FirehoseStorageType::Ufs => "ufs",
            FirehoseStorageType::Nvme => "nvme",
            FirehoseStorageType::Nand => "nand",
        })
    }
}

impl Default for FirehoseStorageType {
    fn default() -> Self {
        FirehoseStorageType::Ufs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirehoseResetMode {
    ResetToEdl,
    Off,
    System,
}

impl FromStr for FirehoseResetMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "edl" => Ok(FirehoseResetMode::ResetToEdl),
            "off" => Ok(FirehoseResetMode::Off),
            "system" => Ok(FirehoseResetMode::System),
            other => bail!("Unknown reset mode '{}', expected edl/off/system", other),
        }
    }
}

impl fmt::Display for FirehoseResetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FirehoseResetMode::ResetToEdl => "edl",
            FirehoseResetMode::Off => "off",
            FirehoseResetMode::System => "system",
        })
    }
}

/// Session state negotiated (mostly) through the `<configure>` handshake.
#[derive(Debug, Clone)]
pub struct FirehoseConfiguration {
    pub hash_packets: bool,
    pub read_back_verify: bool,
    pub storage_type: FirehoseStorageType,
    pub storage_sector_size: usize,
    pub storage_slot: u8,
    pub bypass_storage: bool,
    pub backend: QdlBackend,
    pub skip_firehose_log: bool,
    pub verbose_firehose: bool,
    pub xml_buf_size: usize,
    pub send_buffer_size: usize,
    pub auth: crate::auth::AuthStrategy,
}

impl Default for FirehoseConfiguration {
    fn default() -> Self {
        FirehoseConfiguration {
            hash_packets: false,
            read_back_verify: false,
            storage_type: FirehoseStorageType::default(),
            storage_sector_size: 4096,
            storage_slot: 0,
            bypass_storage: false,
            backend: QdlBackend::default(),
            skip_firehose_log: true,
            verbose_firehose: false,
            xml_buf_size: 4096,
            send_buffer_size: 1024 * 1024,
            auth: crate::auth::AuthStrategy::None,
        }
    }
}

/// A Firehose (or XFlash/FDL/fastboot) session: the raw channel plus its
/// negotiated configuration. Generic over the concrete byte pipe so the
/// reference CLI can hold either an owned `Box<dyn QdlReadWrite>` or a
/// borrowed `&mut dyn QdlReadWrite`.
pub struct QdlDevice<T> {
    pub rw: T,
    pub fh_cfg: FirehoseConfiguration,
    pub reset_on_drop: bool,
}

impl<T: Read + Write> Read for QdlDevice<T> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.rw.read(buf)
    }
}

impl<T: Read + Write> Write for QdlDevice<T> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.rw.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.rw.flush()
    }
}

impl<T: Read + Write> QdlChan for QdlDevice<T> {
    fn fh_config(&self) -> &FirehoseConfiguration {
        &self.fh_cfg
    }

    fn mut_fh_config(&mut self) -> &mut FirehoseConfiguration {
        &mut self.fh_cfg
    }
}

impl<T> Drop for QdlDevice<T> {
    fn drop(&mut self) {
        if self.reset_on_drop {
            tracing::warn!("QdlDevice dropped without an explicit reset; device may be left in an inconsistent state");
        }
    }
}

/// Which boot-mode protocol a detected port speaks, inferred from its
/// (VID, PID) pair by a static lookup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortKind {
    QualcommEdl,
    QualcommDload,
    QualcommDiag,
    MtkBrom,
    MtkPreloader,
    MtkDa,
    SpreadtrumDownload,
    Fastboot,
    Unknown,
}

/// A single enumerated device, merged across whatever OS device classes
/// exposed it.
#[derive(Debug, Clone)]
pub struct DetectedPort {
    pub port_name: Option<String>,
    pub vid: u16,
    pub pid: u16,
    pub description: String,
    pub friendly_name: Option<String>,
    pub instance_id: String,
    pub has_com_port: bool,
    pub is_usb: bool,
    pub classified_kind: PortKind,
}

/// A GPT (or scatter/PAC-derived) partition location on the target device.
#[derive(Debug, Clone)]
pub struct PartitionInfo {
    pub name: String,
    pub start_sector: u64,
    pub num_sectors: u64,
    pub sector_size: u64,
    pub lun: u8,
    pub type_guid: [u8; 16],
    pub unique_guid: [u8; 16],
    pub attributes: u64,
}

impl PartitionInfo {
    pub fn size_bytes(&self) -> u64 {
        self.num_sectors * self.sector_size
    }

    /// "boot_a" -> Some(("boot", Slot::A))
    pub fn slot(&self) -> Option<(&str, Slot)> {
        if let Some(base) = self.name.strip_suffix("_a") {
            Some((base, Slot::A))
        } else if let Some(base) = self.name.strip_suffix("_b") {
            Some((base, Slot::B))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    A,
    B,
}

/// One entry in a firmware selection set: a file on disk bound to a target
/// partition, regardless of which source format (GPT image, rawprogram
/// XML, scatter file, PAC, OTA payload) it was derived from.
#[derive(Debug, Clone)]
pub struct FirmwareEntry {
    pub partition_name: String,
    pub image_path: std::path::PathBuf,
    pub checked: bool,
    pub lun: Option<u8>,
    pub start_sector: Option<u64>,
    pub num_sectors: Option<u64>,
}

/// Per-phase transport timeouts, per §5.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub handshake: Duration,
    pub xml_response: Duration,
    pub bulk_chunk: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            handshake: Duration::from_secs(3),
            xml_response: Duration::from_secs(10),
            bulk_chunk: Duration::from_secs(60),
        }
    }
}
