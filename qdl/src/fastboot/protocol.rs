// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.
//! Fastboot's text-command-over-USB-bulk protocol: ≤64-byte commands,
//! 4-byte response prefixes (OKAY/FAIL/DATA/INFO), and the chunked
//! sparse-image download/flash flow that respects a device's
//! `max-download-size`.

use std::io::{Read, Write};

use crate::error::EngineError;
use crate::sparse;
use crate::types::QdlChan;

const MAX_COMMAND_LEN: usize = 64;
/// A misbehaving device that never stops sending INFO frames must not
/// hang the caller forever.
const MAX_INFO_FRAMES: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Okay(String),
    Fail(String),
    /// Device wants exactly this many bytes next (from a `download:` command).
    Data(u32),
}

fn send_command<T: QdlChan>(channel: &mut T, command: &str) -> Result<(), EngineError> {
    if command.len() > MAX_COMMAND_LEN {
        return Err(EngineError::Protocol(format!(
            "fastboot command exceeds {MAX_COMMAND_LEN} bytes: {command}"
        )));
    }
    channel.write_all(command.as_bytes())?;
    Ok(())
}

fn read_response<T: QdlChan>(channel: &mut T) -> Result<Response, EngineError> {
    for _ in 0..MAX_INFO_FRAMES {
        let mut prefix = [0u8; 4];
        channel.read_exact(&mut prefix)?;
        let mut rest = Vec::new();
        // Fastboot frames are single USB packets in practice; this reference
        // implementation reads up to a newline-free fixed cap since the
        // underlying transport here doesn't expose packet boundaries.
        let mut byte = [0u8; 1];
        loop {
            match channel.read(&mut byte) {
                Ok(0) => break,
                Ok(_) => rest.push(byte[0]),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(EngineError::Io(e)),
            }
            if rest.len() >= 252 {
                break;
            }
        }
        let message = String::from_utf8_lossy(&rest).into_owned();
        match &prefix {
            b"OKAY" => return Ok(Response::Okay(message)),
            b"FAIL" => return Ok(Response::Fail(message)),
            b"DATA" => {
                let size = u32::from_str_radix(&message, 16)
                    .map_err(|_| EngineError::Framing(format!("bad DATA size field {message:?}")))?;
                return Ok(Response::Data(size));
            }
            b"INFO" => continue,
            other => {
                return Err(EngineError::Framing(format!(
                    "unrecognised fastboot response prefix {other:?}"
                )));
            }
        }
    }
    Err(EngineError::Protocol(
        "device sent more than 256 INFO frames without a final response".into(),
    ))
}

pub struct FastbootClient<'a, T: QdlChan> {
    channel: &'a mut T,
    max_download_size: u32,
}

impl<'a, T: QdlChan> FastbootClient<'a, T> {
    pub fn new(channel: &'a mut T) -> Self {
        FastbootClient {
            channel,
            max_download_size: u32::MAX,
        }
    }

    fn command(&mut self, cmd: &str) -> Result<Response, EngineError> {
        send_command(self.channel, cmd)?;
        read_response(self.channel)
    }

    fn expect_okay(&mut self, cmd: &str) -> Result<String, EngineError> {
        match self.command(cmd)? {
            Response::Okay(msg) => Ok(msg),
            Response::Fail(msg) => Err(EngineError::Protocol(format!("fastboot FAIL: {msg}"))),
            Response::Data(_) => Err(EngineError::Framing(format!(
                "unexpected DATA response to {cmd}"
            ))),
        }
    }

    pub fn getvar(&mut self, name: &str) -> Result<String, EngineError> {
        self.expect_okay(&format!("getvar:{name}"))
    }

    /// Queries `max-download-size` and caches it for subsequent
    /// `download_and_flash`/`download_and_split` calls.
    pub fn refresh_max_download_size(&mut self) -> Result<u32, EngineError> {
        let raw = self.getvar("max-download-size")?;
        let trimmed = raw.trim_start_matches("0x");
        let size = u32::from_str_radix(trimmed, 16)
            .or_else(|_| raw.parse::<u32>())
            .map_err(|_| EngineError::Parse(format!("unparseable max-download-size {raw:?}")))?;
        self.max_download_size = size;
        Ok(size)
    }

    fn download_blob(&mut self, data: &[u8]) -> Result<(), EngineError> {
        send_command(self.channel, &format!("download:{:08x}", data.len()))?;
        match read_response(self.channel)? {
            Response::Data(expected) if expected as usize == data.len() => {}
            Response::Data(expected) => {
                return Err(EngineError::Protocol(format!(
                    "device asked for {expected} bytes, we offered {}",
                    data.len()
                )));
            }
            Response::Fail(msg) => return Err(EngineError::Protocol(format!("download rejected: {msg}"))),
            Response::Okay(_) => {
                return Err(EngineError::Framing("expected DATA, got OKAY".into()));
            }
        }
        self.channel.write_all(data)?;
        match read_response(self.channel)? {
            Response::Okay(_) => Ok(()),
            Response::Fail(msg) => Err(EngineError::Protocol(format!("download failed: {msg}"))),
            Response::Data(_) => Err(EngineError::Framing("unexpected second DATA response".into())),
        }
    }

    pub fn flash(&mut self, partition: &str) -> Result<(), EngineError> {
        self.expect_okay(&format!("flash:{partition}")).map(|_| ())
    }

    pub fn erase(&mut self, partition: &str) -> Result<(), EngineError> {
        self.expect_okay(&format!("erase:{partition}")).map(|_| ())
    }

    pub fn reboot(&mut self) -> Result<(), EngineError> {
        self.expect_okay("reboot").map(|_| ())
    }

    pub fn reboot_bootloader(&mut self) -> Result<(), EngineError> {
        self.expect_okay("reboot-bootloader").map(|_| ())
    }

    pub fn reboot_recovery(&mut self) -> Result<(), EngineError> {
        self.expect_okay("reboot-recovery").map(|_| ())
    }

    pub fn reboot_fastboot(&mut self) -> Result<(), EngineError> {
        self.expect_okay("reboot-fastboot").map(|_| ())
    }

    pub fn oem(&mut self, subcommand: &str) -> Result<String, EngineError> {
        self.expect_okay(&format!("oem {subcommand}"))
    }

    pub fn set_active(&mut self, slot: char) -> Result<(), EngineError> {
        self.expect_okay(&format!("set_active:{slot}")).map(|_| ())
    }

    /// Download and flash an image, splitting it into `max_download_size`
    /// -capped sparse chunks if it doesn't already fit in one download.
    /// A raw image that's too large is re-sparsed first (§4.12); an
    /// already-sparse image that's too large is re-split preserving its
    /// original `total_blocks` per chunk.
    pub fn flash_image(
        &mut self,
        partition: &str,
        image: &[u8],
        mut progress: impl FnMut(u64, u64),
    ) -> Result<(), EngineError> {
        let cap = self.max_download_size.max(1) as usize;
        if image.len() <= cap {
            self.download_blob(image)?;
            self.flash(partition)?;
            progress(image.len() as u64, image.len() as u64);
            return Ok(());
        }

        let chunks = if sparse::is_sparse(image) {
            sparse::split_for_transfer(image, cap)?
        } else {
            sparse::raw_to_sparse_chunks(image, 4096, cap)
        };

        let total = chunks.iter().map(|c| c.len() as u64).sum::<u64>();
        let mut done = 0u64;
        for chunk in &chunks {
            self.download_blob(chunk)?;
            self.flash(partition)?;
            done += chunk.len() as u64;
            progress(done, total);
        }
        Ok(())
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
    fn getvar_parses_okay_response() {
        let (host, mut dut) = LoopbackTransport::pair();
        dut.write_all(b"OKAY0.5").unwrap();
        let mut host_dev = dev(host);
        let mut client = FastbootClient::new(&mut host_dev);
        assert_eq!(client.getvar("version").unwrap(), "0.5");
    }

    #[test]
    fn getvar_propagates_fail() {
        let (host, mut dut) = LoopbackTransport::pair();
        dut.write_all(b"FAILunknown variable").unwrap();
        let mut host_dev = dev(host);
        let mut client = FastbootClient::new(&mut host_dev);
        assert!(client.getvar("bogus").is_err());
    }

    #[test]
    fn info_frames_are_skipped_before_final_response() {
        let (host, mut dut) = LoopbackTransport::pair();
        dut.write_all(b"INFOstep one").unwrap();
        dut.write_all(b"INFOstep two").unwrap();
        dut.write_all(b"OKAY").unwrap();
        let mut host_dev = dev(host);
        let mut client = FastbootClient::new(&mut host_dev);
        client.reboot().unwrap();
    }
}
