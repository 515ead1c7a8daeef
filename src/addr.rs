// socketcan-replay/src/addr.rs
//
// Implements the address a replay socket is bound to.
//
// This file is part of the Rust 'socketcan-replay' utility.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! The bind address of a raw CAN socket.

use crate::{as_bytes, as_bytes_mut};
use libc::{sa_family_t, sockaddr_can, sockaddr_storage, socklen_t, AF_CAN};
use nix::net::if_::if_nametoindex;
use socket2::SockAddr;
use std::{fmt, io, mem, os::raw::c_int};

/// A CAN interface, by its kernel index, as a `sockaddr_can`.
#[derive(Clone, Copy)]
pub struct CanAddr(sockaddr_can);

impl CanAddr {
    /// Creates the address of the interface with the kernel index.
    ///
    /// Index zero binds to every CAN interface at once.
    pub fn new(ifindex: u32) -> Self {
        let mut addr: sockaddr_can = unsafe { mem::zeroed() };
        addr.can_family = AF_CAN as sa_family_t;
        addr.can_ifindex = ifindex as c_int;
        Self(addr)
    }

    /// Looks up an interface, like "can0" or "vcan0", by name.
    pub fn from_iface(ifname: &str) -> io::Result<Self> {
        Ok(Self::new(if_nametoindex(ifname)?))
    }

    /// The kernel index of the interface
    pub fn ifindex(&self) -> u32 {
        self.0.can_ifindex as u32
    }
}

impl fmt::Debug for CanAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CanAddr")
            .field("ifindex", &self.ifindex())
            .finish()
    }
}

impl From<CanAddr> for SockAddr {
    fn from(addr: CanAddr) -> Self {
        let can_addr = as_bytes(&addr.0);
        let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
        as_bytes_mut(&mut storage)[..can_addr.len()].copy_from_slice(can_addr);

        // The storage holds a complete sockaddr_can of that length
        unsafe { SockAddr::new(storage, can_addr.len() as socklen_t) }
    }
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn test_ifindex() {
        assert_eq!(CanAddr::new(42).ifindex(), 42);
        assert_eq!(CanAddr::new(0).ifindex(), 0);
    }

    #[test]
    fn test_into_sock_addr() {
        let sock_addr = SockAddr::from(CanAddr::new(7));

        assert_eq!(sock_addr.len() as usize, size_of::<sockaddr_can>());
        assert_eq!(sock_addr.family(), AF_CAN as sa_family_t);
    }

    #[test]
    fn test_unknown_iface() {
        assert!(CanAddr::from_iface("nosuchcan99").is_err());
    }
}
