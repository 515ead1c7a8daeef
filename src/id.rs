// socketcan-replay/src/id.rs
//
// Implements CANbus and J1939 identifiers.
//
// This file is part of the Rust 'socketcan-replay' utility.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! CANbus identifiers and their J1939 decomposition.
//!
//! A J1939 message always uses a 29-bit extended identifier, laid out as:
//!
//! ```text
//!  28   26 25  24 23         16 15          8 7           0
//! +-------+------+-------------+-------------+-------------+
//! |  prio | EDP  |     PF      |   PS / DA   |     SA      |
//! |       |  DP  |             |             |             |
//! +-------+------+-------------+-------------+-------------+
//! ```
//!
//! For the peer-to-peer (PDU1) messages handled by the transport protocol,
//! the PDU Specific byte is the destination address.

use crate::ConstructionError;
use bitflags::bitflags;
use embedded_can::{ExtendedId, Id, StandardId};
use libc::canid_t;
use std::fmt;

pub use libc::{CAN_EFF_FLAG, CAN_EFF_MASK, CAN_ERR_FLAG, CAN_RTR_FLAG, CAN_SFF_MASK};

/// PDU Format of a J1939 request (PGN 59904).
pub const PF_REQUEST: u8 = 0xEA;

/// PDU Format of a Transport Protocol data transfer packet (PGN 60160).
pub const PF_TP_DT: u8 = 0xEB;

/// PDU Format of a Transport Protocol connection management frame
/// (PGN 60416), which carries RTS and CTS.
pub const PF_TP_CM: u8 = 0xEC;

/// The high bits (priority 7, data page 0) of the recorded Transport
/// Protocol identifiers, as in `1CEC<SA><DA>` and `1CEB<SA><DA>`.
pub const TP_HIGH_BITS: u8 = 0x1C;

/// Control byte of a TP.CM Clear-To-Send.
pub const TP_CM_CTS: u8 = 0x11;

bitflags! {
    /// Bit flags in the composite SocketCAN ID word.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct IdFlags: canid_t {
        /// Indicates frame uses a 29-bit extended ID
        const EFF = CAN_EFF_FLAG;
        /// Indicates a remote request frame.
        const RTR = CAN_RTR_FLAG;
        /// Indicates an error frame.
        const ERR = CAN_ERR_FLAG;
    }
}

/// Gets the canid_t value from an Id
/// If it's an extended ID, the CAN_EFF_FLAG bit is also set.
pub fn id_to_canid_t(id: impl Into<Id>) -> canid_t {
    use Id::*;
    match id.into() {
        Standard(id) => id.as_raw() as canid_t,
        Extended(id) => id.as_raw() | CAN_EFF_FLAG,
    }
}

/// Creates a CAN ID from a raw integer value.
///
/// If the `id` is <= 0x7FF, it's assumed to be a standard ID, otherwise
/// it is created as an Extened ID. If you require an Extended ID <= 0x7FF,
/// create it explicitly.
pub fn id_from_raw(id: u32) -> Option<Id> {
    let id = match id {
        n if n <= CAN_SFF_MASK => StandardId::new(n as u16)?.into(),
        n => ExtendedId::new(n)?.into(),
    };
    Some(id)
}

/////////////////////////////////////////////////////////////////////////////
/// A 29-bit extended identifier, viewed through its J1939 fields.
///
/// The decomposition is lossless: the priority and data page bits are kept
/// together as the "high bits", so any 29-bit value can be split into
/// `(high, PF, DA, SA)` and put back together unchanged.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct J1939Id(u32);

impl J1939Id {
    /// Creates an identifier from a raw 29-bit value.
    ///
    /// Returns `None` if the value does not fit in 29 bits.
    pub const fn from_raw(id: u32) -> Option<Self> {
        if id > CAN_EFF_MASK {
            None
        } else {
            Some(Self(id))
        }
    }

    /// Assembles an identifier from its parts.
    ///
    /// `high` holds bits 24-28 of the identifier (priority, extended data
    /// page, data page). Bits above those are discarded.
    pub const fn from_parts(high: u8, pf: u8, da: u8, sa: u8) -> Self {
        Self(
            ((high as u32 & 0x1F) << 24) | ((pf as u32) << 16) | ((da as u32) << 8) | sa as u32,
        )
    }

    /// Gets the raw 29-bit numeric value of the ID
    #[inline]
    pub const fn as_raw(&self) -> u32 {
        self.0
    }

    /// The bits above the PGN: priority, extended data page and data page.
    #[inline]
    pub const fn high_bits(&self) -> u8 {
        ((self.0 >> 24) & 0x1F) as u8
    }

    /// The PDU Format byte
    #[inline]
    pub const fn pf(&self) -> u8 {
        (self.0 >> 16) as u8
    }

    /// The PDU Specific byte, which is the destination address for PDU1
    /// messages.
    #[inline]
    pub const fn da(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// The source address
    #[inline]
    pub const fn sa(&self) -> u8 {
        self.0 as u8
    }

    /// Gets a copy of this ID with the PDU Format replaced, keeping the
    /// priority, data page and both addresses.
    #[inline]
    pub const fn with_pf(&self, pf: u8) -> Self {
        Self((self.0 & !0x00FF_0000) | ((pf as u32) << 16))
    }

    /// Determines if this ID carries the given PDU Format and address pair.
    #[inline]
    pub const fn matches(&self, pf: u8, da: u8, sa: u8) -> bool {
        self.pf() == pf && self.da() == da && self.sa() == sa
    }

    /// Gets the embedded_can::ExtendedId representation of the value.
    pub fn as_extended_id(&self) -> ExtendedId {
        // safe unwrap: the value was range-checked on construction
        ExtendedId::new(self.0).unwrap()
    }
}

impl From<ExtendedId> for J1939Id {
    #[inline]
    fn from(id: ExtendedId) -> Self {
        Self(id.as_raw())
    }
}

impl From<J1939Id> for ExtendedId {
    #[inline]
    fn from(id: J1939Id) -> Self {
        id.as_extended_id()
    }
}

impl From<J1939Id> for Id {
    #[inline]
    fn from(id: J1939Id) -> Self {
        Id::Extended(id.as_extended_id())
    }
}

impl TryFrom<u32> for J1939Id {
    type Error = ConstructionError;

    fn try_from(id: u32) -> Result<Self, Self::Error> {
        Self::from_raw(id).ok_or(ConstructionError::IDTooLarge)
    }
}

impl TryFrom<Id> for J1939Id {
    type Error = ConstructionError;

    /// Only extended IDs have a J1939 layout.
    fn try_from(id: Id) -> Result<Self, Self::Error> {
        match id {
            Id::Extended(id) => Ok(id.into()),
            Id::Standard(_) => Err(ConstructionError::WrongFrameType),
        }
    }
}

impl fmt::Display for J1939Id {
    /// Formats the ID the way candump prints extended IDs: 8 upper-case
    /// hex digits.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}

impl fmt::UpperHex for J1939Id {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::UpperHex::fmt(&self.0, f)
    }
}

/////////////////////////////////////////////////////////////////////////////
