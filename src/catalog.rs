// socketcan-replay/src/catalog.rs
//
// Implements the replay catalogs.
//
// This file is part of the Rust 'socketcan-replay' utility.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! The catalogs of recorded traffic that drive the replay.
//!
//! Both catalogs are JSON files, keyed by the CAN ID written as hex:
//!
//! ```text
//! standard_messages.json:
//! {
//!     "18FEF117": {
//!         "data": ["FFFFFFFF0000FFFF", "FFFFFFFF0100FFFF"],
//!         "average_interval": 0.1
//!     }
//! }
//!
//! tp_messages.json:
//! {
//!     "1CEC1020": ["1012000300FFCAFE"],
//!     "1CEB1020": ["0211223344556677", "0111223344556677"]
//! }
//! ```
//!
//! The catalogs are validated completely when they are loaded, and are
//! read-only from then on, so they can be shared between the replay
//! threads without any locking.

use crate::{
    id::{PF_TP_CM, PF_TP_DT, TP_HIGH_BITS},
    CanFrame, CatalogLoadError, J1939Id,
};
use hex::FromHex;
use log::debug;
use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::File,
    io::{self, BufReader},
    path::Path,
    time::Duration,
};

/// A standard message, as it appears in the JSON catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardRecord {
    /// The distinct payloads seen for the ID, as hex strings.
    pub data: Vec<String>,
    /// The mean time between two occurrences, in seconds.
    pub average_interval: f64,
}

/// The JSON form of the standard catalog.
pub type StandardJson = BTreeMap<String, StandardRecord>;

/// The JSON form of the transport catalog.
pub type TransportJson = BTreeMap<String, Vec<String>>;

// Opens a catalog file for reading.
fn open_catalog(path: &Path) -> Result<BufReader<File>, CatalogLoadError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| CatalogLoadError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Parses an ID as written in a catalog.
fn parse_id(s: &str) -> Result<J1939Id, CatalogLoadError> {
    u32::from_str_radix(s.trim(), 16)
        .ok()
        .and_then(J1939Id::from_raw)
        .ok_or_else(|| CatalogLoadError::InvalidId(s.to_string()))
}

/// Parses a hex payload, which must fit in a classic CAN frame.
fn parse_payload(id: &str, payload: &str) -> Result<Vec<u8>, CatalogLoadError> {
    Vec::from_hex(payload.trim())
        .ok()
        .filter(|data| data.len() <= libc::CAN_MAX_DLEN)
        .ok_or_else(|| CatalogLoadError::InvalidPayload {
            id: id.to_string(),
            payload: payload.to_string(),
        })
}

/////////////////////////////////////////////////////////////////////////////
// Standard catalog

/// One periodically broadcast identifier.
///
/// Every payload variant is kept as a ready-to-send frame.
#[derive(Debug, Clone)]
pub struct StandardEntry {
    id: J1939Id,
    variants: Vec<CanFrame>,
    interval: Duration,
}

impl StandardEntry {
    /// Creates an entry from its JSON record.
    pub fn from_record(key: &str, rec: &StandardRecord) -> Result<Self, CatalogLoadError> {
        let id = parse_id(key)?;

        if rec.data.is_empty() {
            return Err(CatalogLoadError::NoPayloads(key.to_string()));
        }

        if !rec.average_interval.is_finite() || rec.average_interval <= 0.0 {
            return Err(CatalogLoadError::InvalidInterval {
                id: key.to_string(),
                interval: rec.average_interval,
            });
        }

        let interval = Duration::try_from_secs_f64(rec.average_interval).map_err(|_| {
            CatalogLoadError::InvalidInterval {
                id: key.to_string(),
                interval: rec.average_interval,
            }
        })?;

        let variants = rec
            .data
            .iter()
            .map(|payload| {
                let data = parse_payload(key, payload)?;
                CanFrame::new(id, &data).map_err(|_| CatalogLoadError::InvalidPayload {
                    id: key.to_string(),
                    payload: payload.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id,
            variants,
            interval,
        })
    }

    /// The CAN ID broadcast by this entry
    #[inline]
    pub fn id(&self) -> J1939Id {
        self.id
    }

    /// The recorded payload variants, as frames. Never empty.
    #[inline]
    pub fn variants(&self) -> &[CanFrame] {
        &self.variants
    }

    /// The time between two broadcasts.
    #[inline]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Picks one of the variants, uniformly at random.
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> &CanFrame {
        // safe unwrap: entries are never created without variants
        self.variants.choose(rng).unwrap()
    }
}

/// The periodically broadcast messages, ordered by CAN ID.
#[derive(Debug, Clone, Default)]
pub struct StandardCatalog {
    entries: Vec<StandardEntry>,
}

impl StandardCatalog {
    /// Builds the catalog from its JSON form.
    pub fn from_json(json: &StandardJson) -> Result<Self, CatalogLoadError> {
        let mut entries = json
            .iter()
            .map(|(key, rec)| StandardEntry::from_record(key, rec))
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(|entry| entry.id);
        Ok(Self { entries })
    }

    /// Parses the catalog from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self, CatalogLoadError> {
        let json: StandardJson = serde_json::from_str(s)?;
        Self::from_json(&json)
    }

    /// Parses the catalog from a JSON reader.
    pub fn from_reader<R: io::Read>(rdr: R) -> Result<Self, CatalogLoadError> {
        let json: StandardJson = serde_json::from_reader(rdr)?;
        Self::from_json(&json)
    }

    /// Loads the catalog from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, CatalogLoadError> {
        let path = path.as_ref();
        Self::from_reader(open_catalog(path)?).map_err(|err| err.in_file(path))
    }

    /// All the entries, in ascending ID order.
    pub fn entries(&self) -> &[StandardEntry] {
        &self.entries
    }

    /// Looks up the entry for a CAN ID.
    pub fn get(&self, id: J1939Id) -> Option<&StandardEntry> {
        self.entries
            .binary_search_by_key(&id, |entry| entry.id)
            .ok()
            .map(|idx| &self.entries[idx])
    }

    /// The number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/////////////////////////////////////////////////////////////////////////////
// Transport catalog

/// One recorded data transfer packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    /// The 1-based packet number, from the first data byte
    pub sequence: u8,
    /// The complete packet payload, sequence number included
    pub payload: &'a [u8],
}

/// The recorded Transport Protocol frames.
///
/// Only two kinds of identifiers matter to the replay: the connection
/// management ID (PF 0xEC) whose first recorded payload is the RTS
/// announcement, and the data transfer ID (PF 0xEB) whose payloads are the
/// packets. Anything else in the file, like the requests themselves, is
/// ignored.
#[derive(Debug, Clone, Default)]
pub struct TransportCatalog {
    rts: BTreeMap<J1939Id, CanFrame>,
    dt: BTreeMap<J1939Id, Vec<Vec<u8>>>,
}

impl TransportCatalog {
    /// Builds the catalog from its JSON form.
    pub fn from_json(json: &TransportJson) -> Result<Self, CatalogLoadError> {
        let mut cat = Self::default();

        for (key, payloads) in json {
            let id = parse_id(key)?;

            if payloads.is_empty() {
                return Err(CatalogLoadError::NoPayloads(key.clone()));
            }

            let data = payloads
                .iter()
                .map(|payload| parse_payload(key, payload))
                .collect::<Result<Vec<_>, _>>()?;

            match id.pf() {
                PF_TP_CM => {
                    // The first recorded announcement wins
                    let frame = CanFrame::new(id, &data[0]).map_err(|_| {
                        CatalogLoadError::InvalidPayload {
                            id: key.clone(),
                            payload: payloads[0].clone(),
                        }
                    })?;
                    cat.rts.insert(id, frame);
                }
                PF_TP_DT => {
                    if let Some(idx) = data.iter().position(|d| d.is_empty()) {
                        return Err(CatalogLoadError::InvalidPayload {
                            id: key.clone(),
                            payload: payloads[idx].clone(),
                        });
                    }
                    cat.dt.insert(id, data);
                }
                pf => debug!("Ignoring transport catalog entry {} (PF {:02X})", id, pf),
            }
        }
        Ok(cat)
    }

    /// Parses the catalog from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self, CatalogLoadError> {
        let json: TransportJson = serde_json::from_str(s)?;
        Self::from_json(&json)
    }

    /// Parses the catalog from a JSON reader.
    pub fn from_reader<R: io::Read>(rdr: R) -> Result<Self, CatalogLoadError> {
        let json: TransportJson = serde_json::from_reader(rdr)?;
        Self::from_json(&json)
    }

    /// Loads the catalog from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, CatalogLoadError> {
        let path = path.as_ref();
        Self::from_reader(open_catalog(path)?).map_err(|err| err.in_file(path))
    }

    /// Finds the RTS announcement for a session between a source and a
    /// destination address.
    ///
    /// The announcement is the one recorded as `1CEC<SA><DA>`. Entries for
    /// the same pair at any other priority are not part of the session.
    pub fn find_rts(&self, sa: u8, da: u8) -> Option<&CanFrame> {
        self.rts.get(&J1939Id::from_parts(TP_HIGH_BITS, PF_TP_CM, sa, da))
    }

    /// Gets the data transfer packets for a session, in ascending sequence
    /// number order.
    ///
    /// The packets are the ones recorded as `1CEB<SA><DA>`. When the same
    /// sequence number was recorded more than once, the last one recorded
    /// is used.
    pub fn find_segments(&self, sa: u8, da: u8) -> Vec<Segment<'_>> {
        let id = J1939Id::from_parts(TP_HIGH_BITS, PF_TP_DT, sa, da);
        let mut segments = BTreeMap::new();

        for payload in self.dt.get(&id).into_iter().flatten() {
            segments.insert(payload[0], payload.as_slice());
        }

        segments
            .into_iter()
            .map(|(sequence, payload)| Segment { sequence, payload })
            .collect()
    }

    /// The number of RTS announcements in the catalog
    pub fn num_sessions(&self) -> usize {
        self.rts.len()
    }

    /// Whether the catalog has nothing to reply with.
    pub fn is_empty(&self) -> bool {
        self.rts.is_empty()
    }
}

/////////////////////////////////////////////////////////////////////////////

/// Both replay catalogs.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    /// The periodic broadcasts
    pub standard: StandardCatalog,
    /// The transport protocol sessions
    pub transport: TransportCatalog,
}

impl Catalog {
    /// Loads both catalogs.
    ///
    /// Fails if either of them can not be read or is not valid. There is
    /// no partial result.
    pub fn load<P, Q>(standard_path: P, transport_path: Q) -> Result<Self, CatalogLoadError>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        Ok(Self {
            standard: StandardCatalog::from_file(standard_path)?,
            transport: TransportCatalog::from_file(transport_path)?,
        })
    }
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const STANDARD: &str = r#"{
        "18FEF117": {
            "data": ["FFFFFFFF0000FFFF", "ffffffff0100ffff"],
            "average_interval": 0.1
        },
        "0CF00400": {
            "data": ["F07D7D000000F07D"],
            "average_interval": 0.02
        }
    }"#;

    const TRANSPORT: &str = r#"{
        "18EA2010": ["00EE00"],
        "1CEC1020": ["1012000300FFCAFE", "1000000000000000"],
        "1CEB1020": ["0222222222222222", "0111111111111111", "0333333333333333", "02AAAAAAAAAAAAAA"],
        "1CEC3040": ["1009000200FFBEEF"],
        "1CEB3040": ["0100000000000000", "0200000000000000"]
    }"#;

    #[test]
    fn test_standard() {
        let cat = StandardCatalog::from_json_str(STANDARD).unwrap();
        assert_eq!(cat.len(), 2);

        // sorted by ID
        assert_eq!(cat.entries()[0].id().as_raw(), 0x0CF00400);

        let entry = cat.get(J1939Id::from_raw(0x18FEF117).unwrap()).unwrap();
        assert_eq!(entry.interval(), Duration::from_millis(100));
        assert_eq!(entry.variants().len(), 2);
        assert_eq!(
            entry.variants()[1].data(),
            &[0xFF, 0xFF, 0xFF, 0xFF, 0x01, 0x00, 0xFF, 0xFF]
        );
        assert!(entry.variants().iter().all(|f| f.raw_id() == 0x18FEF117));

        assert!(cat.get(J1939Id::from_raw(0x18FEF100).unwrap()).is_none());
    }

    #[test]
    fn test_choose_stays_in_set() {
        let cat = StandardCatalog::from_json_str(STANDARD).unwrap();
        let entry = &cat.entries()[1];
        let mut rng = rand::thread_rng();

        let mut seen = [false; 2];
        for _ in 0..200 {
            let frame = entry.choose(&mut rng);
            let idx = entry.variants().iter().position(|f| f == frame).unwrap();
            seen[idx] = true;
        }
        assert_eq!(seen, [true, true]);
    }

    #[test]
    fn test_standard_errors() {
        let err = StandardCatalog::from_json_str(
            r#"{"18FEF117": {"data": [], "average_interval": 0.1}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, CatalogLoadError::NoPayloads(_)));

        for interval in ["0", "-0.5"] {
            let json = format!(
                r#"{{"18FEF117": {{"data": ["00"], "average_interval": {}}}}}"#,
                interval
            );
            let err = StandardCatalog::from_json_str(&json).unwrap_err();
            assert!(matches!(err, CatalogLoadError::InvalidInterval { .. }));
        }

        let err = StandardCatalog::from_json_str(
            r#"{"XYZ": {"data": ["00"], "average_interval": 0.1}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, CatalogLoadError::InvalidId(_)));

        let err = StandardCatalog::from_json_str(
            r#"{"3FFFFFFF": {"data": ["00"], "average_interval": 0.1}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, CatalogLoadError::InvalidId(_)));

        let err = StandardCatalog::from_json_str(
            r#"{"18FEF117": {"data": ["001122334455667788"], "average_interval": 0.1}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, CatalogLoadError::InvalidPayload { .. }));

        let err = StandardCatalog::from_json_str(
            r#"{"18FEF117": {"data": ["0G"], "average_interval": 0.1}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, CatalogLoadError::InvalidPayload { .. }));

        let err = StandardCatalog::from_json_str(r#"{"18FEF117": {"data": ["00"]}}"#)
            .unwrap_err();
        assert!(matches!(err, CatalogLoadError::Json(_)));
    }

    #[test]
    fn test_rts_first_wins() {
        let cat = TransportCatalog::from_json_str(TRANSPORT).unwrap();
        assert_eq!(cat.num_sessions(), 2);

        let rts = cat.find_rts(0x10, 0x20).unwrap();
        assert_eq!(rts.raw_id(), 0x1CEC1020);
        assert_eq!(rts.data(), &[0x10, 0x12, 0x00, 0x03, 0x00, 0xFF, 0xCA, 0xFE]);

        assert!(cat.find_rts(0x20, 0x10).is_none());
        assert!(cat.find_rts(0x10, 0x21).is_none());
    }

    #[test]
    fn test_rts_other_priority_ignored() {
        let cat = TransportCatalog::from_json_str(
            r#"{"18EC1020": ["AA"], "1CEC1020": ["1012000300FFCAFE"]}"#,
        )
        .unwrap();

        let rts = cat.find_rts(0x10, 0x20).unwrap();
        assert_eq!(rts.to_string(), "1CEC1020#1012000300FFCAFE");

        let cat = TransportCatalog::from_json_str(r#"{"18EC1020": ["10"]}"#).unwrap();
        assert!(cat.find_rts(0x10, 0x20).is_none());
    }

    #[test]
    fn test_dt_other_priority_not_merged() {
        let cat = TransportCatalog::from_json_str(
            r#"{
                "18EB1020": ["01AAAAAAAAAAAAAA", "04AAAAAAAAAAAAAA"],
                "1CEB1020": ["0111111111111111", "0222222222222222"]
            }"#,
        )
        .unwrap();

        let segs = cat.find_segments(0x10, 0x20);
        let seqs: Vec<u8> = segs.iter().map(|s| s.sequence).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert_eq!(segs[0].payload[1], 0x11);
    }

    #[test]
    fn test_dt_sorted_last_wins() {
        let cat = TransportCatalog::from_json_str(TRANSPORT).unwrap();

        let segs = cat.find_segments(0x10, 0x20);
        let seqs: Vec<u8> = segs.iter().map(|s| s.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3]);

        // the later duplicate of packet 2 overwrote the earlier one
        assert_eq!(segs[1].payload, &[0x02, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA]);
        assert_eq!(segs[0].payload[1], 0x11);

        assert_eq!(cat.find_segments(0x30, 0x40).len(), 2);
        assert!(cat.find_segments(0x40, 0x30).is_empty());
    }

    #[test]
    fn test_transport_errors() {
        let err = TransportCatalog::from_json_str(r#"{"1CEC1020": []}"#).unwrap_err();
        assert!(matches!(err, CatalogLoadError::NoPayloads(_)));

        let err = TransportCatalog::from_json_str(r#"{"1CEB1020": ["01", ""]}"#).unwrap_err();
        assert!(matches!(err, CatalogLoadError::InvalidPayload { .. }));

        let err = TransportCatalog::from_json_str(r#"["1CEC1020"]"#).unwrap_err();
        assert!(matches!(err, CatalogLoadError::Json(_)));
    }

    #[test]
    fn test_load_files() {
        let mut std_file = tempfile::NamedTempFile::new().unwrap();
        std_file.write_all(STANDARD.as_bytes()).unwrap();

        let mut tp_file = tempfile::NamedTempFile::new().unwrap();
        tp_file.write_all(TRANSPORT.as_bytes()).unwrap();

        let cat = Catalog::load(std_file.path(), tp_file.path()).unwrap();
        assert_eq!(cat.standard.len(), 2);
        assert_eq!(cat.transport.num_sessions(), 2);
    }

    #[test]
    fn test_load_missing_file() {
        let mut std_file = tempfile::NamedTempFile::new().unwrap();
        std_file.write_all(STANDARD.as_bytes()).unwrap();

        let err = Catalog::load(std_file.path(), "/nonexistent/tp_messages.json").unwrap_err();
        assert!(matches!(err, CatalogLoadError::Io { .. }));
    }

    #[test]
    fn test_load_bad_file_names_it() {
        let mut std_file = tempfile::NamedTempFile::new().unwrap();
        std_file.write_all(b"{ not json").unwrap();

        let err = StandardCatalog::from_file(std_file.path()).unwrap_err();
        match err {
            CatalogLoadError::InFile { path, source } => {
                assert_eq!(path, std_file.path());
                assert!(matches!(*source, CatalogLoadError::Json(_)));
            }
            _ => panic!("Expected InFile error"),
        }
    }
}
