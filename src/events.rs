use bitflags::bitflags;
use libc::c_short;

bitflags! {
    /// Readiness classes reported for a registered descriptor.
    ///
    /// The bit values are the platform `poll(2)` bits, so a mask
    /// converts to and from `pollfd` events without translation.
    ///
    /// `ERROR`, `HANGUP` and `INVALID` are delivered to a listener
    /// whether or not they were registered for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventMask: c_short {
        /// Data may be read without blocking.
        const READABLE = libc::POLLIN;

        /// Data may be written without blocking.
        const WRITABLE = libc::POLLOUT;

        /// Priority data may be read.
        const PRIORITY = libc::POLLPRI;

        /// An error condition was raised on the descriptor.
        const ERROR = libc::POLLERR;

        /// The peer hung up.
        const HANGUP = libc::POLLHUP;

        /// The descriptor is not open.
        const INVALID = libc::POLLNVAL;

        /// The classes that are always reported.
        const ALWAYS_REPORTED = Self::ERROR.bits() | Self::HANGUP.bits() | Self::INVALID.bits();
    }
}

impl EventMask {
    /// Builds a mask from raw `revents` bits, keeping any bits the
    /// platform reports beyond the named classes.
    pub(crate) fn from_poll(revents: c_short) -> EventMask {
        EventMask::from_bits_retain(revents)
    }
}
