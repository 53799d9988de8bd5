use crate::error::Result;
use crate::events::EventMask;
use crate::selector::{Selector, SelectorListener};
use crate::sys::{sys_close, sys_read, sys_write};

use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;

/// Forwards reads and writes to a caller-owned descriptor and binds
/// its readiness to a [`Selector`].
///
/// The helper performs no buffering; it exists so code holding a bare
/// descriptor can join a selector loop without writing registration
/// plumbing.
pub struct FdReaderWriter {
    fd: RawFd,
    selector: Option<Arc<Selector>>,
}

impl FdReaderWriter {
    /// Wraps `fd`. The descriptor stays owned by the caller.
    pub fn new(fd: RawFd) -> FdReaderWriter {
        FdReaderWriter { fd, selector: None }
    }

    /// Re-homes readiness delivery for the descriptor.
    ///
    /// Removes any previous binding of `listener`, then registers it
    /// on `selector` for `mask` (pass [`EventMask::READABLE`] for the
    /// usual read-side setup). Passing `None` just unbinds.
    pub fn set_selector(
        &mut self,
        listener: &Arc<dyn SelectorListener>,
        selector: Option<Arc<Selector>>,
        mask: EventMask,
    ) -> Result<()> {
        if self.fd < 0 {
            return Ok(());
        }

        if let Some(previous) = self.selector.take() {
            previous.remove_listener(self.fd, listener)?;
        }
        if let Some(next) = selector {
            next.add_listener(self.fd, mask, listener, 0)?;
            self.selector = Some(next);
        }
        Ok(())
    }

    /// Reads from the descriptor into `buffer`.
    pub fn read(&self, buffer: &mut [u8]) -> io::Result<usize> {
        let n = sys_read(self.fd, buffer);
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }

    /// Writes `buffer` to the descriptor.
    pub fn write(&self, buffer: &[u8]) -> io::Result<usize> {
        let n = sys_write(self.fd, buffer);
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }

    /// Closes the descriptor.
    ///
    /// Any listener should be unbound first; a registered descriptor
    /// that gets closed produces `INVALID` events.
    pub fn close(&mut self) -> Result<()> {
        if self.fd < 0 {
            return Ok(());
        }
        let fd = self.fd;
        self.fd = -1;
        sys_close(fd)?;
        Ok(())
    }
}
