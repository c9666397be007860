// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.
//! Qualcomm Sahara: the boot-ROM protocol used to read basic chip
//! identity and to upload the Firehose programmer (or a ramdump client)
//! before any higher-level protocol exists.

use std::io::{Read, Write};

use crate::error::EngineError;
use crate::types::QdlChan;

const SAHARA_VERSION: u32 = 2;
const SAHARA_MIN_VERSION: u32 = 1;

const CMD_HELLO: u32 = 0x1;
const CMD_HELLO_RESP: u32 = 0x2;
const CMD_READ_DATA: u32 = 0x3;
const CMD_END_IMAGE_TX: u32 = 0x4;
const CMD_DONE: u32 = 0x5;
const CMD_DONE_RESP: u32 = 0x6;
const CMD_RESET: u32 = 0x7;
const CMD_RESET_RESP: u32 = 0x8;
const CMD_CMD_READY: u32 = 0x9;
const CMD_SWITCH_MODE: u32 = 0xA;
const CMD_EXEC: u32 = 0xB;
const CMD_EXEC_RESP: u32 = 0xC;
const CMD_EXEC_DATA: u32 = 0xD;
const CMD_MEMORY_DEBUG: u32 = 0xE;
const CMD_MEMORY_READ: u32 = 0xF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SaharaMode {
    /// Boot ROM accepts `ExecuteCommand` requests (chip-identity reads).
    Command = 0x0,
    /// Boot ROM wants an image uploaded (the Firehose programmer).
    WaitingForImage = 0x1,
    /// Post-crash memory-debug mode (used by `qramdump`).
    MemoryDebug = 0x2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SaharaCmdModeCmd {
    ReadSerialNum = 1,
    ReadMsmHwId = 2,
    ReadOemKeyHash = 3,
    ReadSblVersion = 7,
}

fn write_cmd(channel: &mut impl Write, cmd: u32, args: &[u32]) -> std::io::Result<()> {
    let len = 8 + args.len() as u32 * 4;
    let mut buf = Vec::with_capacity(len as usize);
    buf.extend_from_slice(&cmd.to_le_bytes());
    buf.extend_from_slice(&len.to_le_bytes());
    for a in args {
        buf.extend_from_slice(&a.to_le_bytes());
    }
    channel.write_all(&buf)
}

fn read_header(channel: &mut impl Read) -> std::io::Result<(u32, u32, Vec<u8>)> {
    let mut hdr = [0u8; 8];
    channel.read_exact(&mut hdr)?;
    let cmd = u32::from_le_bytes(hdr[0..4].try_into().unwrap());
    let len = u32::from_le_bytes(hdr[4..8].try_into().unwrap());
    let mut rest = vec![0u8; (len as usize).saturating_sub(8)];
    if !rest.is_empty() {
        channel.read_exact(&mut rest)?;
    }
    Ok((cmd, len, rest))
}

/// Reply to a Hello the caller already consumed out-of-band (e.g. another
/// process raced us to read it). Lets `--skip-hello-wait` recover a session
/// when the first Hello packet was missed. Since the Hello body (and so the
/// device's reported version) was never seen here, this offers the host's
/// own version rather than a negotiated one.
pub fn sahara_send_hello_rsp<T: QdlChan>(channel: &mut T, mode: SaharaMode) -> Result<(), EngineError> {
    write_cmd(
        channel,
        CMD_HELLO_RESP,
        &[SAHARA_VERSION, SAHARA_MIN_VERSION, mode as u32, 0, 0, 0],
    )
    .map_err(EngineError::from)
}

/// Consume the device's Hello and negotiate a protocol version: the lower
/// of the host's and device's reported versions, rejected if that floor
/// falls below what the host still supports.
fn expect_hello<T: QdlChan>(channel: &mut T, verbose: bool) -> Result<u32, EngineError> {
    let (cmd, _len, body) = read_header(channel)?;
    if cmd != CMD_HELLO {
        return Err(EngineError::Framing(format!(
            "expected Sahara Hello, got command {cmd:#x}"
        )));
    }
    if body.len() < 8 {
        return Err(EngineError::Framing("truncated Sahara Hello".into()));
    }
    let device_version = u32::from_le_bytes(body[0..4].try_into().unwrap());
    let negotiated = device_version.min(SAHARA_VERSION);
    if verbose {
        tracing::debug!("Sahara Hello: device version {device_version}, negotiated {negotiated}");
    }
    if negotiated < SAHARA_MIN_VERSION {
        return Err(EngineError::Protocol(format!(
            "device Sahara version {device_version} is below the minimum supported {SAHARA_MIN_VERSION}"
        )));
    }
    Ok(negotiated)
}

/// Run one Sahara session phase: complete the Hello handshake, then either
/// issue a chip-identity `ExecuteCommand` (Command mode), stream images in
/// response to `ReadData` (WaitingForImage mode), or dump named memory
/// regions (MemoryDebug mode, used by `qramdump`).
///
/// Returns the raw bytes of the single requested `ExecuteCommand` response
/// (empty otherwise).
pub fn sahara_run<T: QdlChan>(
    channel: &mut T,
    mode: SaharaMode,
    cmd_mode_cmd: Option<SaharaCmdModeCmd>,
    images: &mut [Vec<u8>],
    memory_regions: Vec<String>,
    verbose: bool,
) -> Result<Vec<u8>, EngineError> {
    let negotiated_version = expect_hello(channel, verbose)?;
    write_cmd(
        channel,
        CMD_HELLO_RESP,
        &[negotiated_version, SAHARA_MIN_VERSION, mode as u32, 0, 0, 0],
    )?;

    match mode {
        SaharaMode::Command => {
            let (cmd, _len, _body) = read_header(channel)?;
            if cmd != CMD_CMD_READY {
                return Err(EngineError::Framing(format!(
                    "expected Sahara CommandReady, got {cmd:#x}"
                )));
            }
            let Some(what) = cmd_mode_cmd else {
                return Ok(Vec::new());
            };
            write_cmd(channel, CMD_EXEC, &[what as u32])?;
            let (cmd, _len, body) = read_header(channel)?;
            if cmd != CMD_EXEC_RESP {
                return Err(EngineError::Framing(format!(
                    "expected Sahara ExecuteCommandResponse, got {cmd:#x}"
                )));
            }
            if body.len() < 8 {
                return Err(EngineError::Framing("truncated ExecuteCommandResponse".into()));
            }
            let data_len = u32::from_le_bytes(body[4..8].try_into().unwrap()) as usize;
            write_cmd(channel, CMD_EXEC_DATA, &[what as u32])?;
            let mut data = vec![0u8; data_len];
            channel.read_exact(&mut data)?;
            Ok(data)
        }
        SaharaMode::WaitingForImage => {
            loop {
                let (cmd, _len, body) = read_header(channel)?;
                match cmd {
                    CMD_READ_DATA => {
                        if body.len() < 12 {
                            return Err(EngineError::Framing("truncated ReadData".into()));
                        }
                        let image_id = u32::from_le_bytes(body[0..4].try_into().unwrap()) as usize;
                        let offset = u32::from_le_bytes(body[4..8].try_into().unwrap()) as usize;
                        let length = u32::from_le_bytes(body[8..12].try_into().unwrap()) as usize;
                        let Some(image) = images.get(image_id) else {
                            return Err(EngineError::Resource(format!(
                                "device asked for unknown image {image_id}"
                            )));
                        };
                        if offset + length > image.len() {
                            return Err(EngineError::Protocol(
                                "device requested bytes past end of image".into(),
                            ));
                        }
                        channel.write_all(&image[offset..offset + length])?;
                    }
                    CMD_END_IMAGE_TX => {
                        if body.len() >= 8 {
                            let status = u32::from_le_bytes(body[4..8].try_into().unwrap());
                            if status != 0 {
                                return Err(EngineError::Protocol(format!(
                                    "device reported image-transfer status {status}"
                                )));
                            }
                        }
                        return Ok(Vec::new());
                    }
                    CMD_DONE => {
                        write_cmd(channel, CMD_DONE_RESP, &[])?;
                        return Ok(Vec::new());
                    }
                    _ => {
                        return Err(EngineError::Framing(format!(
                            "unexpected Sahara command {cmd:#x} during image upload"
                        )));
                    }
                }
            }
        }
        SaharaMode::MemoryDebug => {
            let (cmd, _len, body) = read_header(channel)?;
            if cmd != CMD_MEMORY_DEBUG || body.len() < 8 {
                return Err(EngineError::Framing(
                    "expected Sahara MemoryDebug packet".into(),
                ));
            }
            let table_addr = u32::from_le_bytes(body[0..4].try_into().unwrap());
            let table_len = u32::from_le_bytes(body[4..8].try_into().unwrap());
            write_cmd(channel, CMD_MEMORY_READ, &[table_addr, table_len])?;
            let mut table = vec![0u8; table_len as usize];
            channel.read_exact(&mut table)?;

            for region in memory_regions {
                tracing::info!("dumping memory region {region} (full table-driven dump not replicated here; see orchestrator::qualcomm for the file-writing wrapper)");
            }
            Ok(table)
        }
    }
}

/// Reset the boot ROM (used after a `MemoryDebug` session, or to bail out
/// of a wedged Command-mode session).
pub fn sahara_reset<T: QdlChan>(channel: &mut T) -> Result<(), EngineError> {
    write_cmd(channel, CMD_RESET, &[])?;
    let (cmd, _len, _body) = read_header(channel)?;
    if cmd != CMD_RESET_RESP {
        return Err(EngineError::Framing(format!(
            "expected Sahara ResetResponse, got {cmd:#x}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackTransport;
    use crate::types::{FirehoseConfiguration, QdlDevice};

    fn device(peer: LoopbackTransport) -> QdlDevice<LoopbackTransport> {
        QdlDevice {
            rw: peer,
            fh_cfg: FirehoseConfiguration::default(),
            reset_on_drop: false,
        }
    }

    #[test]
    fn hello_response_echoes_requested_mode() {
        let (host, mut dut) = LoopbackTransport::pair();
        write_cmd(&mut dut, CMD_HELLO, &[SAHARA_VERSION, SAHARA_MIN_VERSION, 0, 0, 0, 0]).unwrap();
        write_cmd(&mut dut, CMD_CMD_READY, &[]).unwrap();
        write_cmd(&mut dut, CMD_EXEC_RESP, &[SaharaCmdModeCmd::ReadSerialNum as u32, 4]).unwrap();
        dut.write_all(&0xdead_beefu32.to_le_bytes()).unwrap();

        let mut host_dev = device(host);
        let sn = sahara_run(
            &mut host_dev,
            SaharaMode::Command,
            Some(SaharaCmdModeCmd::ReadSerialNum),
            &mut [],
            vec![],
            false,
        )
        .unwrap();
        assert_eq!(sn, 0xdead_beefu32.to_le_bytes());
    }

    #[test]
    fn negotiates_minimum_of_host_and_device_version() {
        let (host, mut dut) = LoopbackTransport::pair();
        // Device reports version 1, below the host's SAHARA_VERSION (2).
        write_cmd(&mut dut, CMD_HELLO, &[1, SAHARA_MIN_VERSION, 0, 0, 0, 0]).unwrap();
        write_cmd(&mut dut, CMD_CMD_READY, &[]).unwrap();

        let mut host_dev = device(host);
        sahara_run(&mut host_dev, SaharaMode::Command, None, &mut [], vec![], false).unwrap();

        // The HelloResponse the host sent back must carry the negotiated
        // (lower) version, not the host's own SAHARA_VERSION.
        let (cmd, _len, body) = read_header(&mut dut).unwrap();
        assert_eq!(cmd, CMD_HELLO_RESP);
        let negotiated = u32::from_le_bytes(body[0..4].try_into().unwrap());
        assert_eq!(negotiated, 1);
    }

    #[test]
    fn rejects_device_version_below_minimum() {
        let (host, mut dut) = LoopbackTransport::pair();
        write_cmd(&mut dut, CMD_HELLO, &[0, 0, 0, 0, 0, 0]).unwrap();

        let mut host_dev = device(host);
        let err = sahara_run(&mut host_dev, SaharaMode::Command, None, &mut [], vec![], false);
        assert!(err.is_err());
    }
}
