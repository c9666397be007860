// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.
//! Per-vendor session state machines. Each orchestrator owns its
//! transport exclusively, serializes commands against it (one protocol
//! operation in flight at a time via a busy flag), and reports state
//! changes/progress/completion over an `mpsc` channel rather than taking
//! a callback — callers (the reference CLI, a GUI, a test) subscribe
//! instead of being wired into the protocol clients directly.

pub mod fastboot;
pub mod mtk;
pub mod qualcomm;
pub mod sprd;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::EngineError;
use crate::event::{emit, Event, EventSink, OrchestratorState};

/// Shared busy-flag/cancellation/event-sink plumbing every vendor
/// orchestrator embeds. Not public API by itself — vendor orchestrators
/// expose their own typed operations and delegate bookkeeping here.
pub(crate) struct OrchestratorCore {
    busy: AtomicBool,
    cancel: Arc<AtomicBool>,
    events: EventSink,
    state: std::sync::Mutex<OrchestratorState>,
}

impl OrchestratorCore {
    pub(crate) fn new(events: EventSink) -> Self {
        OrchestratorCore {
            busy: AtomicBool::new(false),
            cancel: Arc::new(AtomicBool::new(false)),
            events,
            state: std::sync::Mutex::new(OrchestratorState::Idle),
        }
    }

    pub(crate) fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: OrchestratorState) {
        *self.state.lock().unwrap() = state;
        emit(&self.events, Event::StateChanged(state));
    }

    pub(crate) fn state(&self) -> OrchestratorState {
        *self.state.lock().unwrap()
    }

    /// Run `op` with the busy flag held. Returns an error without
    /// running `op` if another operation is already in flight (the
    /// orchestrator enforces one operation at a time, never queues).
    pub(crate) fn run_exclusive<R>(
        &self,
        label: &str,
        op: impl FnOnce(&Self) -> Result<R, EngineError>,
    ) -> Result<R, EngineError> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(EngineError::Protocol(format!(
                "orchestrator already busy, rejecting {label}"
            )));
        }
        self.set_state(OrchestratorState::Busy);
        let result = op(self);
        self.busy.store(false, Ordering::SeqCst);

        match &result {
            Ok(_) => {
                self.set_state(OrchestratorState::Idle);
                emit(&self.events, Event::Completion { success: true, message: label.to_string() });
            }
            Err(e) => {
                self.set_state(OrchestratorState::Error);
                emit(
                    &self.events,
                    Event::Completion {
                        success: false,
                        message: format!("{label} failed: {e}"),
                    },
                );
            }
        }
        result
    }

    pub(crate) fn progress(&self, bytes_done: u64, bytes_total: u64, label: &str) {
        emit(
            &self.events,
            Event::Progress {
                bytes_done,
                bytes_total,
                label: label.to_string(),
            },
        );
    }

    pub(crate) fn log(&self, message: impl Into<String>) {
        emit(&self.events, Event::Log(message.into()));
    }

    /// Called once the transport is known gone (cancellation, or a fatal
    /// transport error already surfaced through `run_exclusive`).
    pub(crate) fn disconnect(&self) {
        self.set_state(OrchestratorState::Disconnected);
    }
}
