//! Internal wake channel for the selector worker.
//!
//! Non-descriptor stimuli (posted messages, listener-table changes,
//! shutdown requests) must be able to preempt the worker's `poll`
//! wait. Each request writes one byte to an internal pipe whose read
//! end sits in the descriptor set; the worker drains every pending
//! byte on wake, so coalesced requests cost a single loop iteration.

use crate::sys::{sys_close, sys_pipe, sys_read, sys_write};

use log::warn;
use std::io;
use std::os::fd::RawFd;

/// A unidirectional byte channel used to preempt the worker's wait.
pub(crate) struct WakeChannel {
    /// Read end, registered with the worker's descriptor set.
    reader: RawFd,

    /// Write end, shared by every thread that needs to wake the worker.
    writer: RawFd,
}

impl WakeChannel {
    pub(crate) fn new() -> io::Result<WakeChannel> {
        let (reader, writer) = sys_pipe()?;
        Ok(WakeChannel { reader, writer })
    }

    pub(crate) fn read_fd(&self) -> RawFd {
        self.reader
    }

    /// Queues one wake byte.
    ///
    /// Interrupted writes retry. A full pipe already holds a pending
    /// wake, so "would block" counts as success.
    pub(crate) fn wake(&self) {
        let buf = [1u8];
        loop {
            if sys_write(self.writer, &buf) >= 0 {
                return;
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => return,
                _ => {
                    warn!("wake write failed: {err}");
                    return;
                }
            }
        }
    }

    /// Drains every pending byte.
    pub(crate) fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            let n = sys_read(self.reader, &mut buf);
            if n > 0 {
                continue;
            }
            if n == 0 {
                return;
            }
            if io::Error::last_os_error().kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return;
        }
    }
}

impl Drop for WakeChannel {
    fn drop(&mut self) {
        let _ = sys_close(self.reader);
        let _ = sys_close(self.writer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wake_then_drain_empties_the_pipe() {
        let channel = WakeChannel::new().expect("Failed to create wake channel");
        channel.wake();
        channel.drain();

        let mut buf = [0u8; 1];
        assert!(sys_read(channel.read_fd(), &mut buf) < 0, "pipe not empty");
    }

    #[test]
    fn coalesced_wakes_drain_in_one_pass() {
        let channel = WakeChannel::new().expect("Failed to create wake channel");
        for _ in 0..100 {
            channel.wake();
        }
        channel.drain();

        let mut buf = [0u8; 1];
        assert!(sys_read(channel.read_fd(), &mut buf) < 0, "pipe not empty");
    }
}
