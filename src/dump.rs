// socketcan-replay/src/dump.rs
//
// Implements candump format parsing.
//
// This file is part of the Rust 'socketcan-replay' utility.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! candump format parsing
//!
//! Parses the text log format emitted by the `candump` utility, which is
//! part of [can-utils](https://github.com/linux-can/can-utils). This is how
//! the traffic to be replayed is captured in the first place:
//!
//! ```text
//! $ candump -L can0 > capture.log
//! ```
//!
//! Example:
//!
//! ```text
//! (1735270496.916858) can0 18FEF117#FFFFFFFF0000FFFF
//! (1735270509.245511) can0 18EA2010#00EE00
//! (1735270588.936508) can0 110#00112233
//! (1735279041.257318) can1 18FEF117#R
//! (1735279048.349278) can1 110#R4
//! (1735270606.171980) can0 122##500112233445566778899AABBCC000000
//! ```
//!
//! Extended IDs are written with 8 hex digits, standard ones with 3.
//! Remote (`#R`) and CAN FD (`##`) lines are recognized, but as they can't
//! be replayed they are reported as [`ParseError::UnsupportedFrame`]
//! rather than parsed.
//!
//! Can be parsed by a `Reader` object. The API is inspired by the
//! [csv](https://crates.io/crates/csv) crate.

use crate::{id::id_from_raw, CanFrame, Id};
use embedded_can::ExtendedId;
use hex::FromHex;
use itertools::Itertools;
use libc::{canid_t, CAN_MAX_DLEN, CAN_SFF_MASK};
use std::{
    fmt,
    fs::File,
    io::{self, BufRead, BufReader},
    path::Path,
};
use thiserror::Error;

/// candump line parse error
#[derive(Error, Debug)]
pub enum ParseError {
    /// I/O Error
    #[error(transparent)]
    Io(#[from] io::Error),
    /// Unexpected end of line
    #[error("Unexpected end of line")]
    UnexpectedEndOfLine,
    /// Invalid time stamp
    #[error("Invalid timestamp")]
    InvalidTimestamp,
    /// Invalid CAN frame
    #[error("Invalid CAN frame")]
    InvalidCanFrame,
    /// A remote or CAN FD frame
    #[error("Unsupported frame type")]
    UnsupportedFrame,
}

/// Recorded CAN frame.
/// This corresponds to the information in a line from the candump log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanDumpRecord {
    /// The timestamp, in microseconds
    pub t_us: u64,
    /// The name of the device
    pub device: String,
    /// The CAN ID
    pub id: Id,
    /// The payload, up to 8 bytes
    pub data: Vec<u8>,
}

impl CanDumpRecord {
    /// The record as a replayable frame.
    ///
    /// Only classic data frames with an extended ID can be replayed.
    pub fn frame(&self) -> Option<CanFrame> {
        match self.id {
            Id::Extended(id) => CanFrame::new(id.into(), &self.data).ok(),
            Id::Standard(_) => None,
        }
    }

    /// The timestamp, in seconds
    pub fn timestamp(&self) -> f64 {
        1.0e-6 * self.t_us as f64
    }
}

impl fmt::Display for CanDumpRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}.{:06}) {} ", self.t_us / 1_000_000, self.t_us % 1_000_000, self.device)?;

        match self.id {
            Id::Standard(id) => write!(f, "{:03X}", id.as_raw())?,
            Id::Extended(id) => write!(f, "{:08X}", id.as_raw())?,
        }

        let data = self.data.iter().map(|v| format!("{:02X}", v)).join("");
        write!(f, "#{}", data)
    }
}

// Parses the CAN ID field of a line.
//
// candump always pads extended IDs to 8 digits, so a long field is an
// extended ID even when the value would fit in 11 bits.
fn parse_id(s: &str) -> Option<Id> {
    let id = canid_t::from_str_radix(s, 16).ok()?;
    if s.len() > 3 && id <= CAN_SFF_MASK {
        ExtendedId::new(id).map(Id::from)
    } else {
        id_from_raw(id)
    }
}

/////////////////////////////////////////////////////////////////////////////
// Reader

#[derive(Debug)]
/// A CAN log reader.
pub struct Reader<R> {
    // The underlying reader
    rdr: R,
    // The line buffer
    buf: String,
}

impl<R: io::Read> Reader<R> {
    /// Creates an I/O buffered reader from a CAN log reader.
    pub fn from_reader(rdr: R) -> Reader<BufReader<R>> {
        Reader {
            rdr: BufReader::new(rdr),
            buf: String::with_capacity(256),
        }
    }
}

impl Reader<File> {
    /// Creates an I/O buffered reader from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Reader<BufReader<File>>> {
        Ok(Reader::from_reader(File::open(path)?))
    }
}

impl<R: BufRead> Reader<R> {
    /// Advance state, returning next record.
    ///
    /// Blank lines are skipped.
    pub fn next_record(&mut self) -> Result<Option<CanDumpRecord>, ParseError> {
        let line = loop {
            self.buf.clear();
            let nread = self.rdr.read_line(&mut self.buf)?;

            // reached EOF
            if nread == 0 {
                return Ok(None);
            }

            let line = self.buf.trim();
            if !line.is_empty() {
                break line;
            }
        };

        let mut field_iter = line.split_whitespace();

        // parse timestamp field
        let ts = field_iter.next().ok_or(ParseError::UnexpectedEndOfLine)?;

        if ts.len() < 3 || !ts.starts_with('(') || !ts.ends_with(')') {
            return Err(ParseError::InvalidTimestamp);
        }

        let ts = &ts[1..ts.len() - 1];

        let t_us = match ts.split_once('.') {
            Some((num, mant)) if !mant.is_empty() && mant.len() <= 6 => {
                let mant_len = mant.len();
                let num = num
                    .parse::<u64>()
                    .map_err(|_| ParseError::InvalidTimestamp)?;
                let mant = mant
                    .parse::<u64>()
                    .map_err(|_| ParseError::InvalidTimestamp)?;
                // "(12.5)" is half a second, not 5us
                let mant = mant * 10u64.pow(6 - mant_len as u32);
                num.saturating_mul(1_000_000).saturating_add(mant)
            }
            _ => return Err(ParseError::InvalidTimestamp),
        };

        // device name
        let device = field_iter
            .next()
            .ok_or(ParseError::UnexpectedEndOfLine)?
            .to_string();

        // parse packet
        let can_raw = field_iter.next().ok_or(ParseError::UnexpectedEndOfLine)?;

        let (can_id_str, can_data) = match can_raw.split_once('#') {
            Some((id, data)) => (id, data),
            _ => return Err(ParseError::InvalidCanFrame),
        };

        let id = parse_id(can_id_str).ok_or(ParseError::InvalidCanFrame)?;

        // CAN FD is "<canid>##<flags>[data]", remote is "<canid>#R[len]"
        if can_data.starts_with(['#', 'R']) {
            return Err(ParseError::UnsupportedFrame);
        }

        let data = Vec::from_hex(can_data)
            .ok()
            .filter(|data| data.len() <= CAN_MAX_DLEN)
            .ok_or(ParseError::InvalidCanFrame)?;

        Ok(Some(CanDumpRecord {
            t_us,
            device,
            id,
            data,
        }))
    }
}

impl<R: BufRead> Iterator for Reader<R> {
    type Item = Result<CanDumpRecord, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        // lift Option:
        match self.next_record() {
            Ok(Some(rec)) => Some(Ok(rec)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/////////////////////////////////////////////////////////////////////////////
