// socketcan-replay/src/frame.rs
//
// Implements the extended CAN 2.0 frames that are replayed on the bus.
//
// This file is part of the Rust 'socketcan-replay' utility.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! CAN bus frames.
//!
//! All the traffic handled by the replay is J1939, so the only frame type
//! needed is a classic CAN 2.0 data frame with a 29-bit extended ID and up
//! to 8 bytes of data. It is binary compatible with the C
//! [can_frame](https://docs.rs/libc/latest/libc/struct.can_frame.html)
//! so that it can be written to and read from a raw SocketCAN socket
//! without any conversion.
//!
//! Frames print in the compact `candump` style, such as
//! `1CEC1020#1012000300FFCAFE`, while the alternate upper-hex format
//! separates the data bytes with spaces.

use crate::{
    id::{id_to_canid_t, IdFlags, CAN_EFF_MASK},
    ConstructionError, J1939Id,
};
use embedded_can::{Frame as EmbeddedFrame, Id};
use itertools::Itertools;
use libc::{can_frame, canid_t, CAN_MAX_DLEN};
use std::{fmt, mem, mem::size_of};

/// Creates a default C `can_frame`.
/// This initializes the entire structure to zeros.
#[inline(always)]
pub fn can_frame_default() -> can_frame {
    unsafe { mem::zeroed() }
}

/// Trait to get a pointer to an inner type
pub trait AsPtr {
    /// The inner type to which we resolve as a pointer
    type Inner;

    /// Gets a const pointer to the inner type
    fn as_ptr(&self) -> *const Self::Inner;

    /// The size of the inner type
    fn size(&self) -> usize {
        size_of::<Self::Inner>()
    }

    /// Gets a byte slice to the inner type
    fn as_bytes(&self) -> &[u8] {
        unsafe {
            std::slice::from_raw_parts::<'_, u8>(
                self.as_ptr() as *const _ as *const u8,
                self.size(),
            )
        }
    }
}

// ===== CanFrame =====

/// A classic CAN 2.0 data frame with an extended, 29-bit, ID.
///
/// This is highly compatible with the `can_frame` from libc.
/// ([ref](https://docs.rs/libc/latest/libc/struct.can_frame.html))
#[derive(Clone, Copy)]
pub struct CanFrame(can_frame);

impl CanFrame {
    /// Creates an extended data frame.
    ///
    /// Fails if there are more than 8 bytes of data.
    pub fn new(id: J1939Id, data: &[u8]) -> Result<Self, ConstructionError> {
        match data.len() {
            n if n <= CAN_MAX_DLEN => {
                let mut frame = can_frame_default();
                frame.can_id = id_to_canid_t(id);
                frame.can_dlc = n as u8;
                frame.data[..n].copy_from_slice(data);
                Ok(Self(frame))
            }
            _ => Err(ConstructionError::TooMuchData),
        }
    }

    /// Creates an extended data frame from a raw, integer, CAN ID.
    pub fn from_raw_id(id: u32, data: &[u8]) -> Result<Self, ConstructionError> {
        Self::new(J1939Id::try_from(id)?, data)
    }

    /// Get the composite SocketCAN ID word, with EFF/RTR/ERR flags
    #[inline]
    pub fn id_word(&self) -> canid_t {
        self.0.can_id
    }

    /// Returns the EFF/RTR/ERR flags from the ID word
    #[inline]
    pub fn id_flags(&self) -> IdFlags {
        IdFlags::from_bits_truncate(self.id_word())
    }

    /// Return the actual raw CAN ID (without EFF/RTR/ERR flags)
    #[inline]
    pub fn raw_id(&self) -> canid_t {
        self.id_word() & CAN_EFF_MASK
    }

    /// The identifier, with its J1939 fields.
    #[inline]
    pub fn j1939_id(&self) -> J1939Id {
        J1939Id::from_parts(
            (self.raw_id() >> 24) as u8,
            (self.raw_id() >> 16) as u8,
            (self.raw_id() >> 8) as u8,
            self.raw_id() as u8,
        )
    }

    /// A slice into the actual data. Slice will always be <= 8 bytes in length
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.0.data[..self.len()]
    }

    /// Get the data length
    #[allow(clippy::len_without_is_empty)]
    #[inline]
    pub fn len(&self) -> usize {
        (self.0.can_dlc as usize).min(CAN_MAX_DLEN)
    }
}

impl AsPtr for CanFrame {
    type Inner = can_frame;

    /// Gets a pointer to the CAN frame structure that is compatible with
    /// the Linux C API.
    fn as_ptr(&self) -> *const Self::Inner {
        &self.0
    }
}

impl EmbeddedFrame for CanFrame {
    /// Create a new extended data frame.
    ///
    /// Standard IDs have no J1939 layout, so they are refused.
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        let id = J1939Id::try_from(id.into()).ok()?;
        Self::new(id, data).ok()
    }

    /// Remote frames are never replayed.
    fn new_remote(_id: impl Into<Id>, _dlc: usize) -> Option<Self> {
        None
    }

    /// Check if frame uses 29-bit extended ID format.
    fn is_extended(&self) -> bool {
        self.id_flags().contains(IdFlags::EFF)
    }

    /// Check if frame is a remote transmission request.
    fn is_remote_frame(&self) -> bool {
        false
    }

    /// Return the frame identifier.
    fn id(&self) -> Id {
        self.j1939_id().into()
    }

    /// Data length
    fn dlc(&self) -> usize {
        self.len()
    }

    /// A slice into the actual data.
    fn data(&self) -> &[u8] {
        CanFrame::data(self)
    }
}

impl Default for CanFrame {
    /// The default frame has a zero extended ID and no data.
    fn default() -> Self {
        let mut frame = can_frame_default();
        frame.can_id = IdFlags::EFF.bits();
        Self(frame)
    }
}

impl PartialEq for CanFrame {
    fn eq(&self, other: &Self) -> bool {
        self.id_word() == other.id_word() && self.data() == other.data()
    }
}

impl Eq for CanFrame {}

impl fmt::Debug for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CanFrame {{ ")?;
        fmt::UpperHex::fmt(self, f)?;
        write!(f, " }}")
    }
}

impl fmt::Display for CanFrame {
    /// Formats the frame in the `candump` compact style, `1CEC1020#0102`
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}#{}", self.j1939_id(), hex::encode_upper(self.data()))
    }
}

impl fmt::UpperHex for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        write!(f, "{}#", self.j1939_id())?;
        let mut parts = self.data().iter().map(|v| format!("{:02X}", v));
        let sep = if f.alternate() { " " } else { "" };
        write!(f, "{}", parts.join(sep))
    }
}

impl TryFrom<can_frame> for CanFrame {
    type Error = ConstructionError;

    /// Try to create a `CanFrame` from a C `can_frame`
    ///
    /// This will succeed as long as the C frame uses an extended ID and is
    /// not marked as an error or remote frame.
    fn try_from(frame: can_frame) -> Result<Self, Self::Error> {
        let flags = IdFlags::from_bits_truncate(frame.can_id);
        if !flags.contains(IdFlags::EFF) || flags.intersects(IdFlags::ERR | IdFlags::RTR) {
            Err(ConstructionError::WrongFrameType)
        } else if frame.can_dlc as usize > CAN_MAX_DLEN {
            Err(ConstructionError::TooMuchData)
        } else {
            Ok(Self(frame))
        }
    }
}

impl AsRef<can_frame> for CanFrame {
    fn as_ref(&self) -> &can_frame {
        &self.0
    }
}

/////////////////////////////////////////////////////////////////////////////
