// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.
//! XML DA V6: the same 12-byte transport header as XFlash, wrapping a
//! `<da>...</da>` command document and a `<da_response>...</da_response>`
//! reply. Reuses `xmltree` the same way `crate::lib` builds Firehose XML,
//! since both are XML-over-framed-transport protocols.

use std::io::{Read, Write};

use xmltree::{Element, XMLNode};

use crate::error::EngineError;
use crate::mtk::TRANSPORT_MAGIC;
use crate::types::QdlChan;

const WRITE_BLOCK_SIZE: usize = 256 * 1024;

fn write_frame<T: QdlChan>(channel: &mut T, data_type: u32, payload: &[u8]) -> Result<(), EngineError> {
    let mut hdr = Vec::with_capacity(12 + payload.len());
    hdr.extend_from_slice(&TRANSPORT_MAGIC.to_le_bytes());
    hdr.extend_from_slice(&data_type.to_le_bytes());
    hdr.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    hdr.extend_from_slice(payload);
    channel.write_all(&hdr)?;
    Ok(())
}

fn read_frame<T: QdlChan>(channel: &mut T) -> Result<Vec<u8>, EngineError> {
    let mut hdr = [0u8; 12];
    channel.read_exact(&mut hdr)?;
    let magic = u32::from_le_bytes(hdr[0..4].try_into().unwrap());
    if magic != TRANSPORT_MAGIC {
        return Err(EngineError::Framing(format!("bad DA V6 frame magic {magic:#x}")));
    }
    let length = u32::from_le_bytes(hdr[8..12].try_into().unwrap()) as usize;
    let mut payload = vec![0u8; length];
    channel.read_exact(&mut payload)?;
    Ok(payload)
}

fn build_command(command: &str, params: &[(&str, &str)]) -> String {
    let mut body = format!("<da><version>1.0</version><command>{command}</command>");
    for (k, v) in params {
        body.push_str(&format!("<{k}>{v}</{k}>"));
    }
    body.push_str("</da>");
    body
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaResult {
    Ok,
    Fail(String),
}

fn parse_response(xml: &[u8]) -> Result<(DaResult, Element), EngineError> {
    let root = Element::parse(xml).map_err(|e| EngineError::Parse(e.to_string()))?;
    let result_text = root
        .get_child("result")
        .and_then(|e| e.get_text())
        .map(|t| t.into_owned())
        .unwrap_or_default();
    let result = if result_text == "OK" {
        DaResult::Ok
    } else {
        let message = root
            .get_child("message")
            .and_then(|e| e.get_text())
            .map(|t| t.into_owned())
            .unwrap_or_else(|| result_text.clone());
        DaResult::Fail(message)
    };
    Ok((result, root))
}

pub struct DaXmlClient<'a, T: QdlChan> {
    channel: &'a mut T,
}

impl<'a, T: QdlChan> DaXmlClient<'a, T> {
    pub fn new(channel: &'a mut T) -> Self {
        DaXmlClient { channel }
    }

    fn send_command(&mut self, command: &str, params: &[(&str, &str)]) -> Result<(), EngineError> {
        let doc = build_command(command, params);
        write_frame(self.channel, 0, doc.as_bytes())
    }

    fn recv_status(&mut self) -> Result<Element, EngineError> {
        let frame = read_frame(self.channel)?;
        let (result, root) = parse_response(&frame)?;
        match result {
            DaResult::Ok => Ok(root),
            DaResult::Fail(msg) => Err(EngineError::Protocol(format!("DA V6 command failed: {msg}"))),
        }
    }

    pub fn notify_init(&mut self) -> Result<(), EngineError> {
        self.send_command("CMD:NOTIFY-INIT", &[])?;
        self.recv_status().map(|_| ())
    }

    pub fn security_set_flash_policy(&mut self, policy: &str) -> Result<(), EngineError> {
        self.send_command("CMD:SECURITY-SET-FLASH-POLICY", &[("policy", policy)])?;
        self.recv_status().map(|_| ())
    }

    pub fn get_gpt(&mut self) -> Result<Vec<u8>, EngineError> {
        self.send_command("CMD:GET-GPT", &[])?;
        let root = self.recv_status()?;
        let length: usize = root
            .attributes
            .get("length")
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| EngineError::Framing("GET-GPT response missing length attr".into()))?;
        let mut buf = vec![0u8; length];
        self.channel.read_exact(&mut buf)?;
        self.recv_status()?;
        Ok(buf)
    }

    pub fn read_partition(
        &mut self,
        name: &str,
        offset: u64,
        length: u64,
        mut progress: impl FnMut(u64, u64),
    ) -> Result<Vec<u8>, EngineError> {
        self.send_command(
            "CMD:READ-PARTITION",
            &[("name", name), ("offset", &offset.to_string()), ("length", &length.to_string())],
        )?;
        let root = self.recv_status()?;
        let reported: u64 = root
            .attributes
            .get("length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(length);

        let mut out = Vec::with_capacity(reported as usize);
        let mut remaining = reported;
        while remaining > 0 {
            let chunk = WRITE_BLOCK_SIZE.min(remaining as usize);
            let mut buf = vec![0u8; chunk];
            self.channel.read_exact(&mut buf)?;
            out.extend_from_slice(&buf);
            remaining -= chunk as u64;
            progress(reported - remaining, reported);
        }
        self.recv_status()?;
        Ok(out)
    }

    pub fn write_partition(
        &mut self,
        name: &str,
        data: &[u8],
        mut progress: impl FnMut(u64, u64),
    ) -> Result<(), EngineError> {
        self.send_command("CMD:WRITE-PARTITION", &[("name", name), ("length", &data.len().to_string())])?;
        let total = data.len() as u64;
        let mut done = 0u64;
        for block in data.chunks(WRITE_BLOCK_SIZE) {
            self.channel.write_all(block)?;
            done += block.len() as u64;
            progress(done, total);
        }
        self.recv_status().map(|_| ())
    }

    pub fn erase_partition(&mut self, name: &str) -> Result<(), EngineError> {
        self.send_command("CMD:ERASE-PARTITION", &[("name", name)])?;
        self.recv_status().map(|_| ())
    }

    pub fn format_partition(&mut self, name: &str) -> Result<(), EngineError> {
        self.send_command("CMD:FORMAT-PARTITION", &[("name", name)])?;
        self.recv_status().map(|_| ())
    }

    pub fn get_da_info(&mut self) -> Result<String, EngineError> {
        self.send_command("CMD:GET-DA-INFO", &[])?;
        let root = self.recv_status()?;
        Ok(root
            .get_child("info")
            .and_then(|e| e.get_text())
            .map(|t| t.into_owned())
            .unwrap_or_default())
    }

    pub fn reboot(&mut self) -> Result<(), EngineError> {
        self.send_command("CMD:REBOOT", &[])?;
        self.recv_status().map(|_| ())
    }

    pub fn shutdown(&mut self) -> Result<(), EngineError> {
        self.send_command("CMD:SHUTDOWN", &[])?;
        self.recv_status().map(|_| ())
    }

    /// Upload a second-stage DA at `at_address`, then jump to `jmp_address`.
    /// The binary payload follows the XML handshake directly.
    pub fn boot_to(&mut self, at_address: u32, jmp_address: u32, da2: &[u8]) -> Result<(), EngineError> {
        self.send_command(
            "CMD:BOOT-TO",
            &[
                ("at_address", &format!("{at_address:#x}")),
                ("jmp_address", &format!("{jmp_address:#x}")),
                ("length", &da2.len().to_string()),
            ],
        )?;
        self.channel.write_all(da2)?;
        self.recv_status().map(|_| ())
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

    fn write_response(dut: &mut LoopbackTransport, xml: &str) {
        write_frame(dut, 0, xml.as_bytes()).unwrap();
    }

    #[test]
    fn parse_response_recognizes_ok_and_fail() {
        let (ok, _) = parse_response(b"<da_response><result>OK</result></da_response>").unwrap();
        assert_eq!(ok, DaResult::Ok);
        let (fail, _) =
            parse_response(b"<da_response><result>FAIL</result><message>bad</message></da_response>").unwrap();
        assert_eq!(fail, DaResult::Fail("bad".to_string()));
    }

    #[test]
    fn notify_init_succeeds_on_ok_response() {
        let (host, mut dut) = LoopbackTransport::pair();
        write_response(&mut dut, "<da_response><result>OK</result></da_response>");
        let mut host_dev = dev(host);
        let mut client = DaXmlClient::new(&mut host_dev);
        client.notify_init().unwrap();
    }

    #[test]
    fn notify_init_fails_on_fail_response() {
        let (host, mut dut) = LoopbackTransport::pair();
        write_response(&mut dut, "<da_response><result>FAIL</result><message>nope</message></da_response>");
        let mut host_dev = dev(host);
        let mut client = DaXmlClient::new(&mut host_dev);
        assert!(client.notify_init().is_err());
    }
}
