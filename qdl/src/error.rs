// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.
use indexmap::IndexMap;

/// Which request a NAK was received in response to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NakError {
    Configure,
    Read,
    Program,
    Erase,
    Patch,
    SetBootable,
    SetActiveSlot,
    Reset,
    Peek,
    Poke,
    Nop,
    GetStorageInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirehoseStatus {
    Ack,
    Nak,
}

/// Errors raised while speaking the Firehose XML protocol.
#[derive(Debug, thiserror::Error)]
pub enum FirehoseError {
    #[error("malformed firehose response: {0:?}")]
    MalformedData(IndexMap<String, String>),
    #[error("device NAK'd a {0:?} request")]
    Nak(NakError),
    #[error("device firehose protocol too old (min version {device_min_version})")]
    ProtocolVersionIncompatibility { device_min_version: u32 },
    #[error("device authentication failed: {0}")]
    AuthRejected(String),
    #[error(transparent)]
    Xml(#[from] xmltree::ParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The engine-wide error taxonomy used by every protocol stack and parser
/// that isn't directly wired into the Firehose ack/nak plumbing above.
///
/// Transport clients bubble this up with `?`; the reference CLI wraps it in
/// `anyhow::Result` at the call site.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("framing error: {0}")]
    Framing(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("authentication error: {0}")]
    Auth(String),
    #[error("resource error: {0}")]
    Resource(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<FirehoseError> for EngineError {
    fn from(e: FirehoseError) -> Self {
        match e {
            FirehoseError::MalformedData(attrs) => {
                EngineError::Framing(format!("malformed response: {attrs:?}"))
            }
            FirehoseError::Nak(which) => EngineError::Protocol(format!("device NAK'd {which:?}")),
            FirehoseError::ProtocolVersionIncompatibility { device_min_version } => {
                EngineError::Protocol(format!(
                    "incompatible firehose version (device requires >= {device_min_version})"
                ))
            }
            FirehoseError::AuthRejected(msg) => EngineError::Auth(msg),
            FirehoseError::Xml(e) => EngineError::Parse(e.to_string()),
            FirehoseError::Io(e) => EngineError::Io(e),
        }
    }
}
