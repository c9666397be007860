// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.
//! Fastboot session FSM: query `max-download-size` once, then drive
//! flash/erase/reboot/oem commands, splitting oversized images into
//! chunks the device's stated download cap can accept.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::error::EngineError;
use crate::event::EventSink;
use crate::fastboot::protocol::FastbootClient;
use crate::types::QdlChan;

use super::OrchestratorCore;

pub struct FastbootOrchestrator<T: QdlChan> {
    channel: T,
    core: OrchestratorCore,
}

impl<T: QdlChan> FastbootOrchestrator<T> {
    pub fn new(channel: T, events: EventSink) -> Self {
        FastbootOrchestrator {
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

    pub fn getvar(&mut self, name: &str) -> Result<String, EngineError> {
        self.core
            .run_exclusive("getvar", |_core| FastbootClient::new(&mut self.channel).getvar(name))
    }

    pub fn flash_image(&mut self, partition: &str, image: &[u8]) -> Result<(), EngineError> {
        self.core.run_exclusive("flash image", |core| {
            let mut client = FastbootClient::new(&mut self.channel);
            client.refresh_max_download_size()?;
            client.flash_image(partition, image, |done, total| {
                core.progress(done, total, "flash image")
            })
        })
    }

    pub fn erase(&mut self, partition: &str) -> Result<(), EngineError> {
        self.core
            .run_exclusive("erase", |_core| FastbootClient::new(&mut self.channel).erase(partition))
    }

    pub fn oem(&mut self, subcommand: &str) -> Result<String, EngineError> {
        self.core
            .run_exclusive("oem", |_core| FastbootClient::new(&mut self.channel).oem(subcommand))
    }

    pub fn set_active(&mut self, slot: char) -> Result<(), EngineError> {
        self.core
            .run_exclusive("set active", |_core| FastbootClient::new(&mut self.channel).set_active(slot))
    }

    pub fn reboot(&mut self) -> Result<(), EngineError> {
        let result = self
            .core
            .run_exclusive("reboot", |_core| FastbootClient::new(&mut self.channel).reboot());
        self.core.disconnect();
        result
    }

    pub fn reboot_bootloader(&mut self) -> Result<(), EngineError> {
        self.core
            .run_exclusive("reboot bootloader", |_core| FastbootClient::new(&mut self.channel).reboot_bootloader())
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
    use std::io::Write;
    use std::sync::mpsc;

    fn dev(peer: LoopbackTransport) -> QdlDevice<LoopbackTransport> {
        QdlDevice {
            rw: peer,
            fh_cfg: FirehoseConfiguration::default(),
            reset_on_drop: false,
        }
    }

    #[test]
    fn getvar_round_trips_through_orchestrator() {
        let (host, mut dut) = LoopbackTransport::pair();
        dut.write_all(b"OKAY0.4").unwrap();
        let (tx, _rx) = mpsc::channel();
        let mut orch = FastbootOrchestrator::new(dev(host), tx);
        assert_eq!(orch.getvar("version").unwrap(), "0.4");
    }
}
