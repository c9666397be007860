// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.
//! Binary post-DA protocol. Every packet shares the 12-byte transport
//! header `[magic=0xFEEEEEEF | data_type | length]`; `data_type` carries
//! the command for request packets and a result code for status packets.

use std::io::{Read, Write};

use crate::error::EngineError;
use crate::mtk::TRANSPORT_MAGIC;
use crate::types::QdlChan;

const STATUS_OK: u32 = 0;
const STATUS_ERROR: u32 = 0xFFFF;

const WRITE_BLOCK_SIZE: usize = 256 * 1024;

#[derive(Debug, Clone, Copy)]
#[repr(u32)]
pub enum XFlashCommand {
    ReadPartition = 0x1,
    WritePartition = 0x2,
    ErasePartition = 0x3,
    FormatPartition = 0x4,
    GetGpt = 0x5,
    ReadFlash = 0x6,
    WriteFlash = 0x7,
    GetDaInfo = 0x80,
    Shutdown = 0xA,
    Reboot = 0xB,
}

fn write_packet<T: QdlChan>(channel: &mut T, data_type: u32, payload: &[u8]) -> Result<(), EngineError> {
    let mut hdr = Vec::with_capacity(12 + payload.len());
    hdr.extend_from_slice(&TRANSPORT_MAGIC.to_le_bytes());
    hdr.extend_from_slice(&data_type.to_le_bytes());
    hdr.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    hdr.extend_from_slice(payload);
    channel.write_all(&hdr)?;
    Ok(())
}

fn read_header<T: QdlChan>(channel: &mut T) -> Result<(u32, u32), EngineError> {
    let mut hdr = [0u8; 12];
    channel.read_exact(&mut hdr)?;
    let magic = u32::from_le_bytes(hdr[0..4].try_into().unwrap());
    if magic != TRANSPORT_MAGIC {
        return Err(EngineError::Framing(format!("bad XFlash frame magic {magic:#x}")));
    }
    let data_type = u32::from_le_bytes(hdr[4..8].try_into().unwrap());
    let length = u32::from_le_bytes(hdr[8..12].try_into().unwrap());
    Ok((data_type, length))
}

fn read_payload<T: QdlChan>(channel: &mut T, length: u32) -> Result<Vec<u8>, EngineError> {
    let mut payload = vec![0u8; length as usize];
    channel.read_exact(&mut payload)?;
    Ok(payload)
}

fn check_status(status: u32) -> Result<(), EngineError> {
    if status != STATUS_OK {
        return Err(EngineError::Protocol(format!(
            "XFlash command returned status {status:#x}"
        )));
    }
    Ok(())
}

fn recv_status<T: QdlChan>(channel: &mut T) -> Result<(), EngineError> {
    let (command, length) = read_header(channel)?;
    let _ = read_payload(channel, length)?;
    check_status(command)
}

pub struct XFlashClient<'a, T: QdlChan> {
    channel: &'a mut T,
}

impl<'a, T: QdlChan> XFlashClient<'a, T> {
    pub fn new(channel: &'a mut T) -> Self {
        XFlashClient { channel }
    }

    pub fn get_gpt(&mut self) -> Result<Vec<u8>, EngineError> {
        write_packet(self.channel, XFlashCommand::GetGpt as u32, &[])?;
        let (data_type, length) = read_header(self.channel)?;
        if data_type == STATUS_ERROR {
            return Err(EngineError::Protocol("device rejected GetGpt".into()));
        }
        let payload = read_payload(self.channel, length)?;
        recv_status(self.channel)?;
        Ok(payload)
    }

    pub fn write_partition(
        &mut self,
        name: &str,
        data: &[u8],
        mut progress: impl FnMut(u64, u64),
    ) -> Result<(), EngineError> {
        let mut args = name.as_bytes().to_vec();
        args.push(0);
        args.extend_from_slice(&(data.len() as u64).to_le_bytes());
        write_packet(self.channel, XFlashCommand::WritePartition as u32, &args)?;

        let total = data.len() as u64;
        let mut done = 0u64;
        for block in data.chunks(WRITE_BLOCK_SIZE) {
            self.channel.write_all(block)?;
            done += block.len() as u64;
            progress(done, total);
        }
        recv_status(self.channel)
    }

    pub fn read_partition(
        &mut self,
        name: &str,
        offset: u64,
        length: u64,
        mut progress: impl FnMut(u64, u64),
    ) -> Result<Vec<u8>, EngineError> {
        let mut args = name.as_bytes().to_vec();
        args.push(0);
        args.extend_from_slice(&offset.to_le_bytes());
        args.extend_from_slice(&length.to_le_bytes());
        write_packet(self.channel, XFlashCommand::ReadPartition as u32, &args)?;

        let mut out = Vec::with_capacity(length as usize);
        let mut remaining = length;
        while remaining > 0 {
            let chunk = WRITE_BLOCK_SIZE.min(remaining as usize);
            let mut buf = vec![0u8; chunk];
            self.channel.read_exact(&mut buf)?;
            out.extend_from_slice(&buf);
            remaining -= chunk as u64;
            progress(length - remaining, length);
        }
        recv_status(self.channel)?;
        Ok(out)
    }

    pub fn erase_partition(&mut self, name: &str) -> Result<(), EngineError> {
        let mut args = name.as_bytes().to_vec();
        args.push(0);
        write_packet(self.channel, XFlashCommand::ErasePartition as u32, &args)?;
        recv_status(self.channel)
    }

    pub fn format_partition(&mut self, name: &str) -> Result<(), EngineError> {
        let mut args = name.as_bytes().to_vec();
        args.push(0);
        write_packet(self.channel, XFlashCommand::FormatPartition as u32, &args)?;
        recv_status(self.channel)
    }

    pub fn get_da_info(&mut self) -> Result<Vec<u8>, EngineError> {
        write_packet(self.channel, XFlashCommand::GetDaInfo as u32, &[])?;
        let (data_type, length) = read_header(self.channel)?;
        if data_type == STATUS_ERROR {
            return Err(EngineError::Protocol("device rejected GetDaInfo".into()));
        }
        let payload = read_payload(self.channel, length)?;
        recv_status(self.channel)?;
        Ok(payload)
    }

    pub fn reboot(&mut self) -> Result<(), EngineError> {
        write_packet(self.channel, XFlashCommand::Reboot as u32, &[])?;
        recv_status(self.channel)
    }

    pub fn shutdown(&mut self) -> Result<(), EngineError> {
        write_packet(self.channel, XFlashCommand::Shutdown as u32, &[])?;
        recv_status(self.channel)
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

    fn write_status_packet(dut: &mut LoopbackTransport, status: u32) {
        dut.write_all(&TRANSPORT_MAGIC.to_le_bytes()).unwrap();
        dut.write_all(&status.to_le_bytes()).unwrap();
        dut.write_all(&0u32.to_le_bytes()).unwrap();
    }

    #[test]
    fn get_gpt_reads_payload_then_status() {
        let (host, mut dut) = LoopbackTransport::pair();
        dut.write_all(&TRANSPORT_MAGIC.to_le_bytes()).unwrap();
        dut.write_all(&STATUS_OK.to_le_bytes()).unwrap();
        dut.write_all(&4u32.to_le_bytes()).unwrap();
        dut.write_all(&[0xAA, 0xBB, 0xCC, 0xDD]).unwrap();
        write_status_packet(&mut dut, STATUS_OK);

        let mut host_dev = dev(host);
        let mut client = XFlashClient::new(&mut host_dev);
        let gpt = client.get_gpt().unwrap();
        assert_eq!(gpt, vec![0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn erase_partition_propagates_error_status() {
        let (host, mut dut) = LoopbackTransport::pair();
        write_status_packet(&mut dut, STATUS_ERROR);

        let mut host_dev = dev(host);
        let mut client = XFlashClient::new(&mut host_dev);
        assert!(client.erase_partition("boot").is_err());
    }
}
