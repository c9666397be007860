// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.
//! The byte-pipe contract every protocol stack is built on top of, plus an
//! in-memory loopback double used across the test suites of all four
//! protocol stacks.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A serial port or USB bulk pipe. `read`/`write` come from [`Read`]/
/// [`Write`]; this trait adds the exact-length, timeout-bounded read every
/// protocol handshake depends on, plus buffer-discard and a human
/// description for logging.
pub trait Transport: Read + Write {
    fn description(&self) -> String {
        "transport".to_string()
    }

    /// Two-phase timeout: wait up to `timeout` for the first byte, then a
    /// short inter-byte gap for the rest, until `buf` is full or the total
    /// deadline passes.
    fn read_exact_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<()> {
        let deadline = Instant::now() + timeout;
        let mut filled = 0;
        while filled < buf.len() {
            if Instant::now() > deadline {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "read_exact_timeout: deadline exceeded",
                ));
            }
            match self.read(&mut buf[filled..]) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Drop any bytes currently buffered on the read side. A no-op by
    /// default: some devices (Qualcomm EDL in particular) start
    /// transmitting before the host has decided it wants to listen, so
    /// discarding must be an explicit caller decision, never done on open.
    fn discard_input(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn discard_output(&mut self) -> io::Result<()> {
        self.flush()
    }
}

/// An in-memory duplex byte pipe. `pair()` returns two ends; writes to one
/// are readable from the other. Used by every protocol stack's unit tests
/// in place of a real serial port or USB endpoint.
pub struct LoopbackTransport {
    inbound: Arc<Mutex<VecDeque<u8>>>,
    outbound: Arc<Mutex<VecDeque<u8>>>,
}

impl LoopbackTransport {
    pub fn pair() -> (LoopbackTransport, LoopbackTransport) {
        let a = Arc::new(Mutex::new(VecDeque::new()));
        let b = Arc::new(Mutex::new(VecDeque::new()));
        (
            LoopbackTransport {
                inbound: a.clone(),
                outbound: b.clone(),
            },
            LoopbackTransport {
                inbound: b,
                outbound: a,
            },
        )
    }
}

impl Read for LoopbackTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut q = self.inbound.lock().unwrap();
        if q.is_empty() {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "no data buffered"));
        }
        let n = buf.len().min(q.len());
        for slot in buf.iter_mut().take(n) {
            *slot = q.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for LoopbackTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outbound.lock().unwrap().extend(buf.iter().copied());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl crate::types::QdlReadWrite for LoopbackTransport {}

impl Transport for LoopbackTransport {
    fn description(&self) -> String {
        "loopback".to_string()
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.inbound.lock().unwrap().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_on_one_end_are_readable_on_the_other() {
        let (mut a, mut b) = LoopbackTransport::pair();
        a.write_all(b"hello").unwrap();
        let mut buf = [0u8; 5];
        b.read_exact_timeout(&mut buf, Duration::from_millis(200)).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn read_exact_timeout_fails_when_data_never_arrives() {
        let (_a, mut b) = LoopbackTransport::pair();
        let mut buf = [0u8; 1];
        let err = b.read_exact_timeout(&mut buf, Duration::from_millis(20)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
