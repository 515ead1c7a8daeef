// socketcan-replay/src/extract.rs
//
// Implements building the replay catalogs from a candump log.
//
// This file is part of the Rust 'socketcan-replay' utility.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Extraction of the replay catalogs from a captured log.
//!
//! Every extended data frame in the log is sorted into one of the two
//! catalogs by its PDU Format:
//!
//! - Requests and Transport Protocol frames (PF 0xEA, 0xEB, 0xEC) go to
//!   the transport catalog, which keeps the distinct payloads of each ID.
//! - Anything else goes to the standard catalog, which keeps the distinct
//!   payloads of each ID and the average time between occurrences.
//!
//! Frames sent from address 0x00 are left out of both.

use crate::{
    catalog::{StandardJson, StandardRecord, TransportJson},
    dump::{CanDumpRecord, ParseError, Reader},
    id::{PF_REQUEST, PF_TP_CM, PF_TP_DT},
    CanFrame, J1939Id,
};
use log::{debug, info};
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use std::{
    collections::BTreeMap,
    fs::File,
    io::{self, BufRead, BufWriter, Write},
    path::Path,
};

/// The interval, in seconds, given to an ID that was only seen once.
pub const DEFAULT_INTERVAL: f64 = 1.0;

/// Source address whose frames are never extracted.
pub const IGNORED_SOURCE: u8 = 0x00;

// Accumulated history of a broadcast ID.
#[derive(Debug, Default)]
struct Broadcast {
    payloads: Vec<Vec<u8>>,
    last_us: Option<u64>,
    gap_sum_us: u64,
    num_gaps: u64,
}

impl Broadcast {
    fn average_interval(&self) -> f64 {
        if self.num_gaps == 0 {
            return DEFAULT_INTERVAL;
        }
        let avg = 1.0e-6 * self.gap_sum_us as f64 / self.num_gaps as f64;
        // All at the same instant; the catalog needs a positive interval
        if avg > 0.0 {
            avg
        } else {
            DEFAULT_INTERVAL
        }
    }
}

// Appends the payload if it hasn't been seen yet.
fn push_unique(payloads: &mut Vec<Vec<u8>>, data: &[u8]) {
    if !payloads.iter().any(|p| p == data) {
        payloads.push(data.to_vec());
    }
}

/// Whether the PDU Format belongs to the transport catalog.
pub fn is_transport_pf(pf: u8) -> bool {
    matches!(pf, PF_REQUEST | PF_TP_DT | PF_TP_CM)
}

/// Builds the two catalogs from a stream of logged frames.
#[derive(Debug, Default)]
pub struct Extractor {
    standard: BTreeMap<J1939Id, Broadcast>,
    transport: BTreeMap<J1939Id, Vec<Vec<u8>>>,
    num_frames: usize,
    num_skipped: usize,
}

impl Extractor {
    /// Creates an empty extractor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads every record of a candump log.
    ///
    /// Lines that can't be parsed are skipped.
    pub fn from_reader<R: BufRead>(rdr: Reader<R>) -> io::Result<Self> {
        let mut ext = Self::new();
        for (i, rec) in rdr.enumerate() {
            match rec {
                Ok(rec) => {
                    ext.add_record(&rec);
                }
                Err(ParseError::Io(err)) => return Err(err),
                Err(err) => {
                    debug!("Skipping line {}: {}", i + 1, err);
                    ext.num_skipped += 1;
                }
            }
        }
        Ok(ext)
    }

    /// Reads a candump log file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Self::from_reader(Reader::from_file(path)?)
    }

    /// Adds one log record.
    ///
    /// Returns whether it was taken into one of the catalogs.
    pub fn add_record(&mut self, rec: &CanDumpRecord) -> bool {
        match rec.frame() {
            Some(frame) => self.add_frame(rec.t_us, &frame),
            None => {
                debug!("Skipping non-J1939 record: {}", rec);
                self.num_skipped += 1;
                false
            }
        }
    }

    /// Adds one frame, seen at the timestamp (in microseconds).
    ///
    /// Returns whether it was taken into one of the catalogs.
    pub fn add_frame(&mut self, t_us: u64, frame: &CanFrame) -> bool {
        let id = frame.j1939_id();

        if id.sa() == IGNORED_SOURCE {
            self.num_skipped += 1;
            return false;
        }
        self.num_frames += 1;

        if is_transport_pf(id.pf()) {
            push_unique(self.transport.entry(id).or_default(), frame.data());
        } else {
            let bc = self.standard.entry(id).or_default();
            push_unique(&mut bc.payloads, frame.data());

            if let Some(last) = bc.last_us {
                bc.gap_sum_us += t_us.saturating_sub(last);
                bc.num_gaps += 1;
            }
            bc.last_us = Some(t_us);
        }
        true
    }

    /// The number of frames taken into the catalogs
    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    /// The number of records left out
    pub fn num_skipped(&self) -> usize {
        self.num_skipped
    }

    /// The standard catalog, in its JSON form.
    pub fn standard_json(&self) -> StandardJson {
        self.standard
            .iter()
            .map(|(id, bc)| {
                let rec = StandardRecord {
                    data: bc.payloads.iter().map(hex::encode_upper).collect(),
                    average_interval: bc.average_interval(),
                };
                (id.to_string(), rec)
            })
            .collect()
    }

    /// The transport catalog, in its JSON form.
    pub fn transport_json(&self) -> TransportJson {
        self.transport
            .iter()
            .map(|(id, payloads)| {
                let data = payloads.iter().map(hex::encode_upper).collect();
                (id.to_string(), data)
            })
            .collect()
    }

    /// Writes the standard catalog as JSON.
    pub fn write_standard<W: Write>(&self, wr: W) -> serde_json::Result<()> {
        write_pretty(wr, &self.standard_json())
    }

    /// Writes the transport catalog as JSON.
    pub fn write_transport<W: Write>(&self, wr: W) -> serde_json::Result<()> {
        write_pretty(wr, &self.transport_json())
    }

    /// Writes both catalogs to files.
    pub fn write_files<P, Q>(&self, standard_path: P, transport_path: Q) -> io::Result<()>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let mut wr = BufWriter::new(File::create(standard_path.as_ref())?);
        self.write_standard(&mut wr)?;
        wr.flush()?;
        info!(
            "Wrote {} standard ID(s) to '{}'",
            self.standard.len(),
            standard_path.as_ref().display()
        );

        let mut wr = BufWriter::new(File::create(transport_path.as_ref())?);
        self.write_transport(&mut wr)?;
        wr.flush()?;
        info!(
            "Wrote {} transport ID(s) to '{}'",
            self.transport.len(),
            transport_path.as_ref().display()
        );
        Ok(())
    }
}

// Writes JSON with a 4-space indent.
fn write_pretty<W: Write, T: Serialize>(wr: W, val: &T) -> serde_json::Result<()> {
    let mut ser = Serializer::with_formatter(wr, PrettyFormatter::with_indent(b"    "));
    val.serialize(&mut ser)
}

/////////////////////////////////////////////////////////////////////////////
