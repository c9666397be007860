// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.
//! MediaTek boot-ROM handshake and low-level command set. Everything
//! here runs before a DA is uploaded; once `jump_da` succeeds the BROM
//! protocol no longer applies and control passes to `super::da`.

use std::io::{Read, Write};

use crate::error::EngineError;
use crate::types::QdlChan;

const HANDSHAKE_BYTES: [u8; 4] = [0xA0, 0x0A, 0x50, 0x05];

const OP_GET_HW_CODE: u8 = 0xFD;
const OP_GET_HW_SW_VER: u8 = 0xFC;
const OP_GET_ME_ID: u8 = 0xE1;
const OP_GET_SOC_ID: u8 = 0xE7;
const OP_GET_TARGET_CONFIG: u8 = 0xD8;
const OP_SEND_DA: u8 = 0xD7;
const OP_JUMP_DA: u8 = 0xD5;

#[derive(Debug, Clone, Copy)]
pub struct TargetConfig {
    pub sla_enabled: bool,
    pub daa_enabled: bool,
    pub sbc_enabled: bool,
}

/// Borrows the transport for the duration of the BROM handshake, same
/// shape as `sahara`'s free functions but wrapped in a struct so the four
/// vendor clients (`SaharaClient`-equivalent, `BromClient`, `FdlClient`,
/// `FastbootClient`) share one calling convention.
pub struct BromClient<'a, T: QdlChan> {
    channel: &'a mut T,
}

impl<'a, T: QdlChan> BromClient<'a, T> {
    pub fn new(channel: &'a mut T) -> Self {
        BromClient { channel }
    }

    /// Write each handshake byte and require the device to echo its
    /// bitwise NOT before sending the next one. Mismatch aborts.
    pub fn handshake(&mut self) -> Result<(), EngineError> {
        for &b in &HANDSHAKE_BYTES {
            self.channel.write_all(&[b])?;
            let mut echo = [0u8; 1];
            self.channel.read_exact(&mut echo)?;
            if echo[0] != !b {
                return Err(EngineError::Framing(format!(
                    "BROM handshake mismatch: sent {b:#04x}, expected echo {:#04x}, got {:#04x}",
                    !b, echo[0]
                )));
            }
        }
        Ok(())
    }

    fn send_opcode(&mut self, opcode: u8) -> Result<(), EngineError> {
        self.channel.write_all(&[opcode])?;
        let mut echo = [0u8; 1];
        self.channel.read_exact(&mut echo)?;
        if echo[0] != opcode {
            return Err(EngineError::Framing(format!(
                "BROM opcode echo mismatch: sent {opcode:#04x}, got {:#04x}",
                echo[0]
            )));
        }
        Ok(())
    }

    fn read_status(&mut self) -> Result<u16, EngineError> {
        let mut raw = [0u8; 2];
        self.channel.read_exact(&mut raw)?;
        Ok(u16::from_be_bytes(raw))
    }

    fn check_status(&mut self) -> Result<(), EngineError> {
        let status = self.read_status()?;
        if status != 0 {
            return Err(EngineError::Protocol(format!(
                "BROM command returned status {status:#06x}"
            )));
        }
        Ok(())
    }

    pub fn get_hw_code(&mut self) -> Result<u32, EngineError> {
        self.send_opcode(OP_GET_HW_CODE)?;
        let mut raw = [0u8; 4];
        self.channel.read_exact(&mut raw)?;
        Ok(u32::from_be_bytes(raw))
    }

    pub fn get_hw_sw_version(&mut self) -> Result<(u16, u16), EngineError> {
        self.send_opcode(OP_GET_HW_SW_VER)?;
        let mut raw = [0u8; 4];
        self.channel.read_exact(&mut raw)?;
        Ok((
            u16::from_be_bytes(raw[0..2].try_into().unwrap()),
            u16::from_be_bytes(raw[2..4].try_into().unwrap()),
        ))
    }

    pub fn get_me_id(&mut self) -> Result<Vec<u8>, EngineError> {
        self.send_opcode(OP_GET_ME_ID)?;
        let mut len_raw = [0u8; 4];
        self.channel.read_exact(&mut len_raw)?;
        let len = u32::from_be_bytes(len_raw) as usize;
        let mut data = vec![0u8; len];
        self.channel.read_exact(&mut data)?;
        self.check_status()?;
        Ok(data)
    }

    pub fn get_soc_id(&mut self) -> Result<Vec<u8>, EngineError> {
        self.send_opcode(OP_GET_SOC_ID)?;
        let mut len_raw = [0u8; 4];
        self.channel.read_exact(&mut len_raw)?;
        let len = u32::from_be_bytes(len_raw) as usize;
        let mut data = vec![0u8; len];
        self.channel.read_exact(&mut data)?;
        self.check_status()?;
        Ok(data)
    }

    pub fn get_target_config(&mut self) -> Result<TargetConfig, EngineError> {
        self.send_opcode(OP_GET_TARGET_CONFIG)?;
        let mut raw = [0u8; 4];
        self.channel.read_exact(&mut raw)?;
        let bits = u32::from_be_bytes(raw);
        self.check_status()?;
        Ok(TargetConfig {
            sla_enabled: bits & 0x1 != 0,
            daa_enabled: bits & 0x2 != 0,
            sbc_enabled: bits & 0x4 != 0,
        })
    }

    /// Stream `data` to `addr`, preceded by the SendDa header and followed
    /// by a 16-bit checksum the BROM verifies before acking.
    pub fn send_da(&mut self, addr: u32, data: &[u8], sig_len: u32) -> Result<(), EngineError> {
        self.send_opcode(OP_SEND_DA)?;
        let mut hdr = Vec::with_capacity(16);
        hdr.extend_from_slice(&addr.to_be_bytes());
        hdr.extend_from_slice(&(data.len() as u32).to_be_bytes());
        hdr.extend_from_slice(&sig_len.to_be_bytes());
        self.channel.write_all(&hdr)?;
        let mut ack = [0u8; 2];
        self.channel.read_exact(&mut ack)?;
        if u16::from_be_bytes(ack) != 0 {
            return Err(EngineError::Protocol("BROM rejected SendDa header".into()));
        }

        self.channel.write_all(data)?;
        let checksum = data
            .chunks(2)
            .fold(0u16, |acc, c| acc ^ u16::from_be_bytes([c[0], *c.get(1).unwrap_or(&0)]));
        self.channel.write_all(&checksum.to_be_bytes())?;
        self.check_status()
    }

    /// Transfer execution to the just-uploaded DA. After this call the
    /// BROM protocol is no longer in effect; `da::negotiate` takes over.
    pub fn jump_da(&mut self, addr: u32) -> Result<(), EngineError> {
        self.send_opcode(OP_JUMP_DA)?;
        self.channel.write_all(&addr.to_be_bytes())?;
        self.check_status()
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

    #[test]
    fn handshake_succeeds_when_device_echoes_bitwise_not() {
        let (host, mut dut) = LoopbackTransport::pair();
        std::thread::spawn(move || {
            use std::io::{Read, Write};
            for _ in 0..4 {
                let mut b = [0u8; 1];
                dut.read_exact(&mut b).unwrap();
                dut.write_all(&[!b[0]]).unwrap();
            }
        });
        let mut host_dev = dev(host);
        let mut client = BromClient::new(&mut host_dev);
        client.handshake().unwrap();
    }

    #[test]
    fn handshake_fails_on_bad_echo() {
        let (host, mut dut) = LoopbackTransport::pair();
        std::thread::spawn(move || {
            use std::io::{Read, Write};
            let mut b = [0u8; 1];
            dut.read_exact(&mut b).unwrap();
            dut.write_all(&[0x00]).unwrap(); // wrong echo
        });
        let mut host_dev = dev(host);
        let mut client = BromClient::new(&mut host_dev);
        assert!(client.handshake().is_err());
    }

    #[test]
    fn get_hw_code_parses_big_endian_response() {
        let (host, mut dut) = LoopbackTransport::pair();
        std::thread::spawn(move || {
            use std::io::{Read, Write};
            let mut op = [0u8; 1];
            dut.read_exact(&mut op).unwrap();
            dut.write_all(&op).unwrap();
            dut.write_all(&0x0717_u32.to_be_bytes()).unwrap();
        });
        let mut host_dev = dev(host);
        let mut client = BromClient::new(&mut host_dev);
        assert_eq!(client.get_hw_code().unwrap(), 0x0717);
    }
}
