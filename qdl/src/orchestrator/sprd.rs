// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.
//! Spreadtrum session FSM: BSL sync, FDL1/FDL2 bring-up, then the
//! partition/IMEI/version operations FDL2 exposes.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::error::EngineError;
use crate::event::EventSink;
use crate::sprd::fdl::FdlClient;
use crate::types::QdlChan;

use super::OrchestratorCore;

pub struct SprdOrchestrator<T: QdlChan> {
    channel: T,
    core: OrchestratorCore,
}

impl<T: QdlChan> SprdOrchestrator<T> {
    pub fn new(channel: T, events: EventSink) -> Self {
        SprdOrchestrator {
            channel,
            core: OrchestratorCore::new(events),
        }
    }

    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.core.cancel_handle()
    }

    pub fn state(&self) -> crate::event::OrchestratorState {
        self.core.state()
    }

    /// Sync, CONNECT, then download and run FDL1.
    pub fn bring_up_fdl1(&mut self, addr: u32, fdl1: &[u8]) -> Result<(), EngineError> {
        self.core.run_exclusive("bring up fdl1", |core| {
            let mut client = FdlClient::new(&mut self.channel);
            client.handshake()?;
            client.connect()?;
            core.log("FDL1 sync established, downloading");
            client.download_fdl(addr, fdl1)
        })
    }

    /// FDL1 is already running HDLC-framed; download FDL2 through it the
    /// same way, then switch to raw binary mode for the rest of the
    /// session.
    pub fn bring_up_fdl2(&mut self, addr: u32, fdl2: &[u8]) -> Result<(), EngineError> {
        self.core.run_exclusive("bring up fdl2", |core| {
            let mut client = FdlClient::new(&mut self.channel);
            client.download_fdl(addr, fdl2)?;
            client.disable_transcode()?;
            core.log("FDL2 live, transport switched to raw mode");
            Ok(())
        })
    }

    pub fn write_partition(
        &mut self,
        name: &str,
        data: &[u8],
    ) -> Result<(), EngineError> {
        self.core.run_exclusive("write partition", |core| {
            FdlClient::new(&mut self.channel).write_partition(name, data, |done, total| {
                core.progress(done, total, "write partition")
            })
        })
    }

    pub fn read_partition(&mut self, name: &str, total_len: u32) -> Result<Vec<u8>, EngineError> {
        self.core.run_exclusive("read partition", |core| {
            FdlClient::new(&mut self.channel).read_partition(name, total_len, |done, total| {
                core.progress(done, total, "read partition")
            })
        })
    }

    pub fn erase_partition(&mut self, name: &str) -> Result<(), EngineError> {
        self.core
            .run_exclusive("erase partition", |_core| FdlClient::new(&mut self.channel).erase_partition(name))
    }

    pub fn repartition(&mut self, xml: &[u8]) -> Result<(), EngineError> {
        self.core
            .run_exclusive("repartition", |_core| FdlClient::new(&mut self.channel).repartition(xml))
    }

    pub fn read_imei(&mut self) -> Result<String, EngineError> {
        self.core
            .run_exclusive("read imei", |_core| FdlClient::new(&mut self.channel).read_imei())
    }

    pub fn write_imei(&mut self, imei: &str) -> Result<(), EngineError> {
        self.core
            .run_exclusive("write imei", |_core| FdlClient::new(&mut self.channel).write_imei(imei))
    }

    pub fn get_version(&mut self) -> Result<String, EngineError> {
        self.core
            .run_exclusive("get version", |_core| FdlClient::new(&mut self.channel).get_version())
    }

    pub fn read_uid(&mut self) -> Result<Vec<u8>, EngineError> {
        self.core
            .run_exclusive("read uid", |_core| FdlClient::new(&mut self.channel).read_uid())
    }

    pub fn power_off(&mut self) -> Result<(), EngineError> {
        let result = self
            .core
            .run_exclusive("power off", |_core| FdlClient::new(&mut self.channel).power_off());
        self.core.disconnect();
        result
    }

    pub fn normal_reset(&mut self) -> Result<(), EngineError> {
        let result = self
            .core
            .run_exclusive("normal reset", |_core| FdlClient::new(&mut self.channel).normal_reset());
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
    fn busy_flag_starts_idle() {
        let (host, _dut) = LoopbackTransport::pair();
        let (tx, _rx) = mpsc::channel();
        let orch = SprdOrchestrator::new(dev(host), tx);
        assert_eq!(orch.state(), crate::event::OrchestratorState::Idle);
    }
}
