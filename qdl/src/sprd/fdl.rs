// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.
//! Spreadtrum BSL/FDL protocol: HDLC-framed command/response pairs used
//! to bring up FDL1, then FDL2, then drive partition operations. Mirrors
//! the `BslCommand`/`BslResponse` enums and method surface of the
//! original `fdl_client`.

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::EngineError;
use crate::hdlc;
use crate::types::QdlChan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum BslCommand {
    Connect = 0x0000,
    StartData = 0x0001,
    MidstData = 0x0002,
    EndData = 0x0003,
    ExecData = 0x0004,
    NormalReset = 0x0005,
    ReadFlash = 0x0006,
    ReadChip = 0x0007,
    ChangeBaudRate = 0x0009,
    ErasePartition = 0x000a,
    RepartitionStart = 0x000b,
    RepartitionMidst = 0x000c,
    RepartitionEnd = 0x000d,
    ReadImei = 0x0020,
    WriteImei = 0x0021,
    GetVersion = 0x0022,
    ReadUid = 0x0023,
    PowerOff = 0x0024,
    DisableTranscode = 0x0025,
    WritePartition = 0x0026,
    ReadPartitionStart = 0x0027,
    ReadPartitionMidst = 0x0028,
    ReadPartitionEnd = 0x0029,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum BslResponse {
    Ack = 0x0080,
    Nak = 0x0000,
    RepVer = 0x0081,
    RepData = 0x0082,
    RepReadFlash = 0x0083,
}

impl BslResponse {
    fn from_u16(v: u16) -> Option<Self> {
        match v {
            0x0080 => Some(BslResponse::Ack),
            0x0000 => Some(BslResponse::Nak),
            0x0081 => Some(BslResponse::RepVer),
            0x0082 => Some(BslResponse::RepData),
            0x0083 => Some(BslResponse::RepReadFlash),
            _ => None,
        }
    }
}

const PARTITION_NAME_FIELD: usize = 72;

fn pad_name(name: &str) -> Vec<u8> {
    let mut field = vec![0u8; PARTITION_NAME_FIELD];
    let bytes = name.as_bytes();
    let n = bytes.len().min(PARTITION_NAME_FIELD);
    field[..n].copy_from_slice(&bytes[..n]);
    field
}

/// Wraps the transport and tracks whether `DISABLE_TRANSCODE` has
/// switched it out of HDLC escaping, since every frame send/recv after
/// that point must skip `hdlc::encode`/`decode`.
pub struct FdlClient<'a, T: QdlChan> {
    channel: &'a mut T,
    raw_mode: bool,
}

impl<'a, T: QdlChan> FdlClient<'a, T> {
    pub fn new(channel: &'a mut T) -> Self {
        FdlClient {
            channel,
            raw_mode: false,
        }
    }

    /// Send 0x7E repeatedly (up to 100 attempts, 20ms apart) until the
    /// device echoes 0x7E, establishing byte-level sync before any
    /// framed command is sent.
    pub fn handshake(&mut self) -> Result<(), EngineError> {
        for _ in 0..100 {
            self.channel.write_all(&[0x7E])?;
            let mut echo = [0u8; 1];
            match self.channel.read_exact(&mut echo) {
                Ok(()) if echo[0] == 0x7E => return Ok(()),
                _ => std::thread::sleep(Duration::from_millis(20)),
            }
        }
        Err(EngineError::Transport(
            "Spreadtrum BSL sync handshake timed out".into(),
        ))
    }

    fn send_frame(&mut self, command: BslCommand, payload: &[u8]) -> Result<(), EngineError> {
        let mut body = (command as u16).to_be_bytes().to_vec();
        body.extend_from_slice(payload);
        if self.raw_mode {
            self.channel.write_all(&body)?;
        } else {
            self.channel.write_all(&hdlc::encode(&body))?;
        }
        Ok(())
    }

    fn recv_frame(&mut self) -> Result<(BslResponse, Vec<u8>), EngineError> {
        if self.raw_mode {
            let mut hdr = [0u8; 2];
            self.channel.read_exact(&mut hdr)?;
            let code = u16::from_be_bytes(hdr);
            let resp = BslResponse::from_u16(code)
                .ok_or_else(|| EngineError::Framing(format!("unknown BSL response code {code:#06x}")))?;
            return Ok((resp, Vec::new()));
        }

        let mut framed = vec![0x7Eu8];
        loop {
            let mut b = [0u8; 1];
            self.channel.read_exact(&mut b)?;
            framed.push(b[0]);
            if framed.len() > 1 && b[0] == 0x7E {
                break;
            }
        }
        let (body, _rest) = hdlc::decode(&framed).map_err(|e| EngineError::Framing(e.to_string()))?;
        if body.len() < 2 {
            return Err(EngineError::Framing("BSL frame shorter than its response code".into()));
        }
        let code = u16::from_be_bytes([body[0], body[1]]);
        let resp = BslResponse::from_u16(code)
            .ok_or_else(|| EngineError::Framing(format!("unknown BSL response code {code:#06x}")))?;
        Ok((resp, body[2..].to_vec()))
    }

    fn expect_ack(&mut self) -> Result<Vec<u8>, EngineError> {
        let (resp, payload) = self.recv_frame()?;
        if resp != BslResponse::Ack {
            return Err(EngineError::Protocol(format!("device NAK'd BSL command (got {resp:?})")));
        }
        Ok(payload)
    }

    pub fn connect(&mut self) -> Result<(), EngineError> {
        self.send_frame(BslCommand::Connect, &[])?;
        self.expect_ack().map(|_| ())
    }

    fn download(&mut self, start: BslCommand, addr: u32, data: &[u8]) -> Result<(), EngineError> {
        let mut start_payload = addr.to_be_bytes().to_vec();
        start_payload.extend_from_slice(&(data.len() as u32).to_be_bytes());
        self.send_frame(start, &start_payload)?;
        self.expect_ack()?;

        for chunk in data.chunks(4096) {
            self.send_frame(BslCommand::MidstData, chunk)?;
            self.expect_ack()?;
        }

        self.send_frame(BslCommand::EndData, &[])?;
        self.expect_ack()?;

        self.send_frame(BslCommand::ExecData, &addr.to_be_bytes())?;
        self.expect_ack().map(|_| ())
    }

    /// Upload FDL1 (or FDL2, carried out by FDL1 once it's live) to
    /// `addr` and start executing it.
    pub fn download_fdl(&mut self, addr: u32, data: &[u8]) -> Result<(), EngineError> {
        self.download(BslCommand::StartData, addr, data)
    }

    /// Switches the transport to raw binary: subsequent frames are not
    /// HDLC-escaped. Irreversible for the rest of this session.
    pub fn disable_transcode(&mut self) -> Result<(), EngineError> {
        self.send_frame(BslCommand::DisableTranscode, &[])?;
        self.expect_ack()?;
        self.raw_mode = true;
        Ok(())
    }

    pub fn write_partition(
        &mut self,
        name: &str,
        data: &[u8],
        mut progress: impl FnMut(u64, u64),
    ) -> Result<(), EngineError> {
        let mut payload = pad_name(name);
        payload.extend_from_slice(&(data.len() as u32).to_be_bytes());
        self.send_frame(BslCommand::WritePartition, &payload)?;
        self.expect_ack()?;

        let total = data.len() as u64;
        let mut done = 0u64;
        for chunk in data.chunks(4096) {
            self.send_frame(BslCommand::MidstData, chunk)?;
            self.expect_ack()?;
            done += chunk.len() as u64;
            progress(done, total);
        }
        Ok(())
    }

    /// Read a partition. Note the vendor quirk: inside `READ_MIDST`
    /// payloads the length and offset fields are little-endian, unlike
    /// every other multi-byte field in this protocol.
    pub fn read_partition(
        &mut self,
        name: &str,
        total_len: u32,
        mut progress: impl FnMut(u64, u64),
    ) -> Result<Vec<u8>, EngineError> {
        let mut start_payload = pad_name(name);
        start_payload.extend_from_slice(&total_len.to_le_bytes());
        self.send_frame(BslCommand::ReadPartitionStart, &start_payload)?;
        self.expect_ack()?;

        let mut out = Vec::with_capacity(total_len as usize);
        let mut offset = 0u32;
        while offset < total_len {
            let chunk_size = 4096u32.min(total_len - offset);
            let mut midst_payload = chunk_size.to_le_bytes().to_vec();
            midst_payload.extend_from_slice(&offset.to_le_bytes());
            self.send_frame(BslCommand::ReadPartitionMidst, &midst_payload)?;
            let (resp, payload) = self.recv_frame()?;
            if resp != BslResponse::RepReadFlash {
                return Err(EngineError::Protocol(format!(
                    "expected RepReadFlash, got {resp:?}"
                )));
            }
            out.extend_from_slice(&payload);
            offset += chunk_size;
            progress(offset as u64, total_len as u64);
        }

        self.send_frame(BslCommand::ReadPartitionEnd, &[])?;
        self.expect_ack()?;
        Ok(out)
    }

    pub fn erase_partition(&mut self, name: &str) -> Result<(), EngineError> {
        self.send_frame(BslCommand::ErasePartition, &pad_name(name))?;
        self.expect_ack().map(|_| ())
    }

    pub fn repartition(&mut self, xml: &[u8]) -> Result<(), EngineError> {
        self.send_frame(BslCommand::RepartitionStart, &(xml.len() as u32).to_be_bytes())?;
        self.expect_ack()?;
        for chunk in xml.chunks(4096) {
            self.send_frame(BslCommand::RepartitionMidst, chunk)?;
            self.expect_ack()?;
        }
        self.send_frame(BslCommand::RepartitionEnd, &[])?;
        self.expect_ack().map(|_| ())
    }

    pub fn read_imei(&mut self) -> Result<String, EngineError> {
        self.send_frame(BslCommand::ReadImei, &[])?;
        let payload = self.expect_ack()?;
        Ok(String::from_utf8_lossy(&payload).trim_end_matches('\0').to_string())
    }

    pub fn write_imei(&mut self, imei: &str) -> Result<(), EngineError> {
        self.send_frame(BslCommand::WriteImei, imei.as_bytes())?;
        self.expect_ack().map(|_| ())
    }

    pub fn get_version(&mut self) -> Result<String, EngineError> {
        self.send_frame(BslCommand::GetVersion, &[])?;
        let (resp, payload) = self.recv_frame()?;
        if resp != BslResponse::RepVer {
            return Err(EngineError::Protocol(format!("expected RepVer, got {resp:?}")));
        }
        Ok(String::from_utf8_lossy(&payload).trim_end_matches('\0').to_string())
    }

    pub fn read_uid(&mut self) -> Result<Vec<u8>, EngineError> {
        self.send_frame(BslCommand::ReadUid, &[])?;
        self.expect_ack()
    }

    pub fn power_off(&mut self) -> Result<(), EngineError> {
        self.send_frame(BslCommand::PowerOff, &[])?;
        self.expect_ack().map(|_| ())
    }

    pub fn normal_reset(&mut self) -> Result<(), EngineError> {
        self.send_frame(BslCommand::NormalReset, &[])?;
        self.expect_ack().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackTransport;
    use crate::types::{FirehoseConfiguration, QdlDevice};

    fn dev(peer: LoopbackTransport) -> QdlDevice<LoopbackTransport> {
        QdlDevice {
            rw: peer,
            fh_cfg: FirehoseConfiguration::default(),
            reset_on_drop: false,
        }
    }

    fn write_ack(dut: &mut LoopbackTransport) {
        let body = (BslResponse::Ack as u16).to_be_bytes().to_vec();
        dut.write_all(&hdlc::encode(&body)).unwrap();
    }

    #[test]
    fn handshake_succeeds_on_first_echo() {
        let (host, mut dut) = LoopbackTransport::pair();
        std::thread::spawn(move || {
            let mut b = [0u8; 1];
            dut.read_exact(&mut b).unwrap();
            dut.write_all(&[0x7E]).unwrap();
        });
        let mut host_dev = dev(host);
        let mut client = FdlClient::new(&mut host_dev);
        client.handshake().unwrap();
    }

    #[test]
    fn connect_succeeds_on_ack() {
        let (host, mut dut) = LoopbackTransport::pair();
        write_ack(&mut dut);
        let mut host_dev = dev(host);
        let mut client = FdlClient::new(&mut host_dev);
        client.connect().unwrap();
    }

    #[test]
    fn disable_transcode_switches_to_raw_frame_parsing() {
        let (host, mut dut) = LoopbackTransport::pair();
        write_ack(&mut dut); // response to DisableTranscode itself
        dut.write_all(&(BslResponse::Ack as u16).to_be_bytes()).unwrap(); // raw-mode frame for connect()
        let mut host_dev = dev(host);
        let mut client = FdlClient::new(&mut host_dev);
        client.disable_transcode().unwrap();
        assert!(client.raw_mode);
        client.connect().unwrap();
    }
}
