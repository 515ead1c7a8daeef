// socketcan-replay/src/socket.rs
//
// Implements the bus transport, and a SocketCAN raw socket for it.
//
// This file is part of the Rust 'socketcan-replay' utility.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! The bus transport used by the replay, and its SocketCAN implementation.
//!
//! The [`Bus`] trait is the whole of what the scheduler and the responder
//! need from a CAN interface. All of its methods take `&self` so that a
//! single bus can be shared through an `Arc` by every replay thread:
//! any number of threads may send at the same time, but only one of them
//! (the responder) ever receives.
//!
//! [`CanSocket`] is the implementation for a raw socket on a Linux CAN
//! interface, such as "can0" or "vcan0".

use crate::{
    as_bytes_mut,
    frame::{can_frame_default, AsPtr},
    CanAddr, CanFrame, SendError,
};
use libc::{c_int, c_void, socklen_t, AF_CAN, EINPROGRESS};
use log::trace;
use socket2::SockAddr;
use std::{
    fmt,
    io::{self, ErrorKind, Read, Write},
    mem,
    os::unix::io::{AsRawFd, RawFd},
    sync::{PoisonError, RwLock, RwLockReadGuard},
    time::Duration,
};

pub use libc::{CAN_RAW, CAN_RAW_LOOPBACK, CAN_RAW_RECV_OWN_MSGS, SOL_CAN_RAW};

/// Check an error return value for timeouts.
///
/// Due to the fact that timeouts are reported as errors, calling `receive`
/// on a bus with a timeout that does not receive a frame in time will
/// result in an error being returned. This trait adds a `should_retry` method
/// to `Error` and `Result` to check for this condition.
pub trait ShouldRetry {
    /// Check for timeout
    ///
    /// If `true`, the error is probably due to a timeout.
    fn should_retry(&self) -> bool;
}

impl ShouldRetry for io::Error {
    fn should_retry(&self) -> bool {
        match self.kind() {
            // EAGAIN, EINPROGRESS and EWOULDBLOCK are the three possible codes
            // returned when a timeout occurs. the stdlib already maps EAGAIN
            // and EWOULDBLOCK os WouldBlock
            ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted => true,
            // however, EINPROGRESS is also valid
            _ => matches!(self.raw_os_error(), Some(errno) if errno == EINPROGRESS),
        }
    }
}

impl<E: fmt::Debug> ShouldRetry for io::Result<E> {
    fn should_retry(&self) -> bool {
        match *self {
            Err(ref e) => e.should_retry(),
            _ => false,
        }
    }
}

// ===== Bus trait =====

/// The CAN bus as seen by the replay engine.
pub trait Bus: Send + Sync {
    /// Writes a single frame to the bus.
    ///
    /// This is best-effort: a failure is returned to the caller, which
    /// decides whether to skip the frame. It is never retried here.
    fn send(&self, frame: &CanFrame) -> Result<(), SendError>;

    /// Blocking read of the next frame on the bus.
    fn receive(&self) -> io::Result<CanFrame>;

    /// Blocking read of the next frame, giving up after `timeout`.
    ///
    /// On timeout an error of kind `TimedOut` is returned, which can be
    /// checked with [`ShouldRetry::should_retry`].
    fn receive_timeout(&self, timeout: Duration) -> io::Result<CanFrame>;

    /// Closes the bus, releasing the underlying channel.
    ///
    /// This can be called any number of times. Only the first call has any
    /// effect; afterwards every send and receive fails.
    fn close(&self) -> io::Result<()>;
}

impl<B: Bus + ?Sized> Bus for std::sync::Arc<B> {
    fn send(&self, frame: &CanFrame) -> Result<(), SendError> {
        (**self).send(frame)
    }

    fn receive(&self) -> io::Result<CanFrame> {
        (**self).receive()
    }

    fn receive_timeout(&self, timeout: Duration) -> io::Result<CanFrame> {
        (**self).receive_timeout(timeout)
    }

    fn close(&self) -> io::Result<()> {
        (**self).close()
    }
}

// ===== Private local helper functions =====

/// Tries to open the CAN socket by the interface number.
fn raw_open_socket(addr: &CanAddr) -> io::Result<socket2::Socket> {
    let af_can = socket2::Domain::from(AF_CAN);
    let can_raw = socket2::Protocol::from(CAN_RAW);

    let sock = socket2::Socket::new_raw(af_can, socket2::Type::RAW, Some(can_raw))?;
    sock.bind(&SockAddr::from(*addr))?;
    Ok(sock)
}

/// The error for any operation on a closed socket.
fn closed_error() -> io::Error {
    io::Error::new(ErrorKind::NotConnected, "the CAN socket is closed")
}

// The kernel treats a zero timeout as "block forever".
const MIN_READ_TIMEOUT: Duration = Duration::from_micros(1);

// The longest a blocking receive holds on to the socket at a time.
const RECEIVE_SLICE: Duration = Duration::from_millis(100);

// ===== CanSocket =====

/// A raw socket for classic CAN 2.0 devices.
///
/// This reads and writes CAN 2.0 frames with extended IDs. Frames with
/// standard IDs, as well as remote and error frames, are never part of the
/// J1939 traffic being replayed, so they are skipped on receive.
///
/// The socket is closed by [`Bus::close`] or, failing that, when the object
/// is dropped.
pub struct CanSocket {
    sock: RwLock<Option<socket2::Socket>>,
}

impl CanSocket {
    /// Open a named CAN device.
    ///
    /// Usually the more common case, opens a socket can device by name, such
    /// as "can0", "vcan0", or "socan0".
    pub fn open(ifname: &str) -> io::Result<Self> {
        let addr = CanAddr::from_iface(ifname)?;
        Self::open_addr(&addr)
    }

    /// Open a CAN socket by address.
    pub fn open_addr(addr: &CanAddr) -> io::Result<Self> {
        let sock = raw_open_socket(addr)?;
        Ok(Self {
            sock: RwLock::new(Some(sock)),
        })
    }

    // Gets the live socket, or an error if it was closed.
    fn with_socket<T>(&self, f: impl FnOnce(&socket2::Socket) -> io::Result<T>) -> io::Result<T> {
        let guard: RwLockReadGuard<'_, _> =
            self.sock.read().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(sock) => f(sock),
            None => Err(closed_error()),
        }
    }

    /// Determines if the socket was closed.
    pub fn is_closed(&self) -> bool {
        self.sock
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Change socket to non-blocking mode or back to blocking mode.
    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.with_socket(|sock| sock.set_nonblocking(nonblocking))
    }

    /// Sets the read timeout on the socket
    ///
    /// For convenience, the result value can be checked using
    /// `ShouldRetry::should_retry` when a timeout is set.
    ///
    /// If the duration is set to `None` then read calls will block
    /// indefinitely.
    pub fn set_read_timeout<D>(&self, duration: D) -> io::Result<()>
    where
        D: Into<Option<Duration>>,
    {
        let duration = duration.into().map(|d| d.max(MIN_READ_TIMEOUT));
        self.with_socket(|sock| sock.set_read_timeout(duration))
    }

    /// Sets an option on the socket.
    ///
    /// Note that the `val` parameter must be specified correctly; if an option
    /// expects an integer, it is advisable to pass in a `c_int`, not the default
    /// of `i32`.
    pub fn set_socket_option<T>(&self, level: c_int, name: c_int, val: &T) -> io::Result<()> {
        self.with_socket(|sock| {
            let ret = unsafe {
                libc::setsockopt(
                    sock.as_raw_fd(),
                    level,
                    name,
                    val as *const _ as *const c_void,
                    mem::size_of::<T>() as socklen_t,
                )
            };

            match ret {
                0 => Ok(()),
                _ => Err(io::Error::last_os_error()),
            }
        })
    }

    /// Enable or disable loopback.
    ///
    /// By default, loopback is enabled, causing other applications that open
    /// the same CAN bus to see frames emitted by different applications on
    /// the same system.
    pub fn set_loopback(&self, enabled: bool) -> io::Result<()> {
        let loopback = c_int::from(enabled);
        self.set_socket_option(SOL_CAN_RAW, CAN_RAW_LOOPBACK, &loopback)
    }

    /// Enable or disable receiving of own frames.
    ///
    /// When loopback is enabled, this settings controls if CAN frames sent
    /// are received back immediately by sender. Default is off.
    pub fn set_recv_own_msgs(&self, enabled: bool) -> io::Result<()> {
        let recv_own_msgs = c_int::from(enabled);
        self.set_socket_option(SOL_CAN_RAW, CAN_RAW_RECV_OWN_MSGS, &recv_own_msgs)
    }

    /// Writes a frame to the socket.
    pub fn write_frame(&self, frame: &CanFrame) -> io::Result<()> {
        self.with_socket(|mut sock| sock.write_all(frame.as_bytes()))
    }

    /// Reads a low-level libc `can_frame` from the socket.
    pub fn read_raw_frame(&self) -> io::Result<libc::can_frame> {
        let mut frame = can_frame_default();
        self.with_socket(|mut sock| sock.read_exact(as_bytes_mut(&mut frame)))?;
        Ok(frame)
    }

    /// Blocking read of the next extended data frame.
    ///
    /// Frames that can not be replayed (standard IDs, remote or error
    /// frames) are discarded.
    pub fn read_frame(&self) -> io::Result<CanFrame> {
        loop {
            let raw = self.read_raw_frame()?;
            match CanFrame::try_from(raw) {
                Ok(frame) => return Ok(frame),
                Err(_) => trace!("Skipping non-J1939 frame with ID word {:X}", raw.can_id),
            }
        }
    }
}

impl Bus for CanSocket {
    fn send(&self, frame: &CanFrame) -> Result<(), SendError> {
        match self.write_frame(frame) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotConnected && self.is_closed() => {
                Err(SendError::Closed)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn receive(&self) -> io::Result<CanFrame> {
        // A read in progress keeps `close` out, so wait in slices.
        loop {
            match self.receive_timeout(RECEIVE_SLICE) {
                Err(err) if err.kind() == ErrorKind::TimedOut => continue,
                res => return res,
            }
        }
    }

    fn receive_timeout(&self, timeout: Duration) -> io::Result<CanFrame> {
        self.set_read_timeout(timeout)?;
        self.read_frame().map_err(|err| match err.kind() {
            ErrorKind::WouldBlock => ErrorKind::TimedOut.into(),
            _ => err,
        })
    }

    /// Closes the socket.
    ///
    /// A receive blocked in another thread sees the close within one
    /// receive slice, and fails with `NotConnected`.
    fn close(&self) -> io::Result<()> {
        let sock = self
            .sock
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        // Dropping the socket releases the descriptor
        drop(sock);
        Ok(())
    }
}

impl AsRawFd for CanSocket {
    /// The descriptor of the socket, or -1 once it is closed.
    fn as_raw_fd(&self) -> RawFd {
        self.with_socket(|sock| Ok(sock.as_raw_fd())).unwrap_or(-1)
    }
}

impl fmt::Debug for CanSocket {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CanSocket")
            .field("fd", &self.as_raw_fd())
            .finish()
    }
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonexistant_device() {
        assert!(CanSocket::open("invalid").is_err());
    }

    #[test]
    fn test_should_retry() {
        let err = io::Error::from(ErrorKind::TimedOut);
        assert!(err.should_retry());

        let err = io::Error::from(ErrorKind::WouldBlock);
        assert!(err.should_retry());

        let err = closed_error();
        assert!(!err.should_retry());

        let res: io::Result<()> = Err(io::Error::from_raw_os_error(EINPROGRESS));
        assert!(res.should_retry());

        let res: io::Result<()> = Ok(());
        assert!(!res.should_retry());
    }
}
