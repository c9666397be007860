// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.
//! MediaTek session FSM: BROM handshake + DA upload, DA protocol
//! negotiation, then partition ops dispatched to whichever of
//! XFlash/XML-DA-V6 the running DA turned out to speak.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::error::EngineError;
use crate::event::EventSink;
use crate::mtk::brom::{BromClient, TargetConfig};
use crate::mtk::da::{self, DaEntry, DaProtocol};
use crate::mtk::da_xml::DaXmlClient;
use crate::mtk::xflash::XFlashClient;
use crate::types::QdlChan;

use super::OrchestratorCore;

pub struct ChipIdentity {
    pub hw_code: u32,
    pub hw_sw_version: (u16, u16),
    pub target_config: TargetConfig,
}

pub struct MtkOrchestrator<T: QdlChan> {
    channel: T,
    core: OrchestratorCore,
    da_protocol: Option<DaProtocol>,
}

impl<T: QdlChan> MtkOrchestrator<T> {
    pub fn new(channel: T, events: EventSink) -> Self {
        MtkOrchestrator {
            channel,
            core: OrchestratorCore::new(events),
            da_protocol: None,
        }
    }

    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.core.cancel_handle()
    }

    pub fn state(&self) -> crate::event::OrchestratorState {
        self.core.state()
    }

    /// BROM handshake, then read back enough to pick the matching DA
    /// entry out of a DA file.
    pub fn identify(&mut self) -> Result<ChipIdentity, EngineError> {
        self.core.run_exclusive("brom identify", |core| {
            let mut brom = BromClient::new(&mut self.channel);
            brom.handshake()?;
            let hw_code = brom.get_hw_code()?;
            let hw_sw_version = brom.get_hw_sw_version()?;
            let target_config = brom.get_target_config()?;
            core.log(format!("BROM reports hw_code {hw_code:#06x}"));
            Ok(ChipIdentity {
                hw_code,
                hw_sw_version,
                target_config,
            })
        })
    }

    /// Upload the matched DA entry, jump to it, then negotiate which
    /// protocol the running DA speaks. Leaves `self.da_protocol` set so
    /// subsequent partition ops know which client to build.
    pub fn upload_da(&mut self, entry: &DaEntry) -> Result<(), EngineError> {
        self.core.run_exclusive("upload da", |core| {
            let total = entry.data.len() as u64;
            {
                let mut brom = BromClient::new(&mut self.channel);
                brom.send_da(entry.load_addr, &entry.data, entry.sig_len)?;
                core.progress(total, total, "upload da");
                brom.jump_da(entry.entry_addr)?;
            }
            da::sync(&mut self.channel)?;
            let (protocol, _hello) = da::negotiate(&mut self.channel, None)?;
            core.log(format!("DA negotiated protocol {protocol:?}"));
            self.da_protocol = Some(protocol);
            Ok(())
        })
    }

    fn protocol(&self) -> Result<DaProtocol, EngineError> {
        self.da_protocol
            .ok_or_else(|| EngineError::Protocol("DA protocol not negotiated yet".into()))
    }

    pub fn write_partition(
        &mut self,
        name: &str,
        data: &[u8],
    ) -> Result<(), EngineError> {
        let protocol = self.protocol()?;
        self.core.run_exclusive("write partition", |core| match protocol {
            DaProtocol::XFlash => XFlashClient::new(&mut self.channel)
                .write_partition(name, data, |done, total| core.progress(done, total, "write partition"))
                .map_err(EngineError::from),
            DaProtocol::XmlDaV6 => DaXmlClient::new(&mut self.channel)
                .write_partition(name, data, |done, total| core.progress(done, total, "write partition"))
                .map_err(EngineError::from),
        })
    }

    pub fn read_partition(
        &mut self,
        name: &str,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>, EngineError> {
        let protocol = self.protocol()?;
        self.core.run_exclusive("read partition", |core| match protocol {
            DaProtocol::XFlash => XFlashClient::new(&mut self.channel)
                .read_partition(name, offset, length, |done, total| core.progress(done, total, "read partition"))
                .map_err(EngineError::from),
            DaProtocol::XmlDaV6 => DaXmlClient::new(&mut self.channel)
                .read_partition(name, offset, length, |done, total| core.progress(done, total, "read partition"))
                .map_err(EngineError::from),
        })
    }

    pub fn erase_partition(&mut self, name: &str) -> Result<(), EngineError> {
        let protocol = self.protocol()?;
        self.core.run_exclusive("erase partition", |_core| match protocol {
            DaProtocol::XFlash => XFlashClient::new(&mut self.channel).erase_partition(name),
            DaProtocol::XmlDaV6 => DaXmlClient::new(&mut self.channel).erase_partition(name),
        })
    }

    pub fn format_partition(&mut self, name: &str) -> Result<(), EngineError> {
        let protocol = self.protocol()?;
        self.core.run_exclusive("format partition", |_core| match protocol {
            DaProtocol::XFlash => XFlashClient::new(&mut self.channel).format_partition(name),
            DaProtocol::XmlDaV6 => DaXmlClient::new(&mut self.channel).format_partition(name),
        })
    }

    pub fn get_gpt(&mut self) -> Result<Vec<u8>, EngineError> {
        let protocol = self.protocol()?;
        self.core.run_exclusive("get gpt", |_core| match protocol {
            DaProtocol::XFlash => XFlashClient::new(&mut self.channel).get_gpt(),
            DaProtocol::XmlDaV6 => DaXmlClient::new(&mut self.channel).get_gpt(),
        })
    }

    pub fn reboot(&mut self) -> Result<(), EngineError> {
        let protocol = self.protocol()?;
        let result = self.core.run_exclusive("reboot", |_core| match protocol {
            DaProtocol::XFlash => XFlashClient::new(&mut self.channel).reboot(),
            DaProtocol::XmlDaV6 => DaXmlClient::new(&mut self.channel).reboot(),
        });
        self.core.disconnect();
        result
    }

    pub fn shutdown(&mut self) -> Result<(), EngineError> {
        let protocol = self.protocol()?;
        let result = self.core.run_exclusive("shutdown", |_core| match protocol {
            DaProtocol::XFlash => XFlashClient::new(&mut self.channel).shutdown(),
            DaProtocol::XmlDaV6 => DaXmlClient::new(&mut self.channel).shutdown(),
        });
        self.core.disconnect();
        result
    }

    pub fn stop(&self) {
        self.core.cancel_handle().store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackTransport;
    use crate::types::{FirehoseConfiguration, QdlDevice};
    use std::sync::mpsc;

    fn dev(peer: LoopbackTransport) -> QdlDevice<LoopbackTransport> {
        QdlDevice {
            rw: peer,
            fh_cfg: FirehoseConfiguration::default(),
            reset_on_drop: false,
        }
    }

    #[test]
    fn rejects_partition_ops_before_da_negotiated() {
        let (host, _dut) = LoopbackTransport::pair();
        let (tx, _rx) = mpsc::channel();
        let mut orch = MtkOrchestrator::new(dev(host), tx);
        assert!(orch.write_partition("boot", b"x").is_err());
    }
}
