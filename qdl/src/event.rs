// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.
//! Orchestrators observe nothing and are observed by everything: rather
//! than wiring controllers back into protocol clients, every orchestrator
//! owns a broadcast channel of these events and callers subscribe.

use std::sync::mpsc::Sender;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Connecting,
    Busy,
    Error,
    Disconnected,
}

#[derive(Debug, Clone)]
pub enum Event {
    StateChanged(OrchestratorState),
    Progress {
        bytes_done: u64,
        bytes_total: u64,
        label: String,
    },
    Completion {
        success: bool,
        message: String,
    },
    Log(String),
}

pub type EventSink = Sender<Event>;

/// Emit an event, silently dropping it if nobody's listening anymore (the
/// CLI's progress bar subscriber may have already exited).
pub fn emit(sink: &EventSink, event: Event) {
    let _ = sink.send(event);
}
