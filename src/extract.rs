/// Payload extraction: classify an advertisement against the target signature
/// and pull out candidate identifier strings.
///
/// Matching is a case-insensitive substring search for the signature,
/// evaluated in a fixed priority order where the first hit wins:
/// service UUID, manufacturer data (hex), service data (hex), then a textual
/// dump of the whole advertisement. Candidate extraction runs regardless of
/// the outcome and each field is handled independently, so a bad field never
/// hides the others.
use core::fmt::Write;

use heapless::{String, Vec};

use crate::defaults::PAYLOAD_HEADER_SIZE;
use crate::hex::{self, Identifier};
use crate::scanner::{format_mac, local_names, MacString, ObservationRecord};

/// Capacity for a rendered candidate (hex of the largest field fits)
pub type CandidateText = String<128>;

/// Capacity of the whole-advertisement text dump
pub type DumpText = String<512>;

pub const MAX_CANDIDATES: usize = 8;
pub const MAX_IDENTIFIERS: usize = 4;

/// Which rule matched the target signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSource {
    ServiceUuid,
    ManufacturerData,
    ServiceData,
    AdvertisementDump,
}

impl MatchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchSource::ServiceUuid => "service_uuid",
            MatchSource::ManufacturerData => "manufacturer_data",
            MatchSource::ServiceData => "service_data",
            MatchSource::AdvertisementDump => "advertisement",
        }
    }
}

/// Where a candidate string came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    LocalName,
    ServiceDataHex,
    ServiceDataAscii,
    PayloadHex,
    PayloadAscii,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::LocalName => "local_name",
            Field::ServiceDataHex => "service_data_hex",
            Field::ServiceDataAscii => "service_data_ascii",
            Field::PayloadHex => "payload_hex",
            Field::PayloadAscii => "payload_ascii",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub field: Field,
    pub text: CandidateText,
    /// Whether the candidate itself contains the target signature
    pub is_match: bool,
}

/// Result of extracting one advertisement
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub matched: Option<MatchSource>,
    pub candidates: Vec<Candidate, MAX_CANDIDATES>,
    /// Identifiers reported to presence tracking when the advertisement matched
    pub identifiers: Vec<Identifier, MAX_IDENTIFIERS>,
}

impl Extraction {
    fn add_candidate(&mut self, field: Field, text: CandidateText, target: &str) {
        if text.is_empty() {
            return;
        }
        let is_match = contains_ignore_case(text.as_bytes(), target.as_bytes());
        let _ = self.candidates.push(Candidate {
            field,
            text,
            is_match,
        });
    }

    fn add_identifier(&mut self, id: Identifier) {
        if !self.identifiers.contains(&id) {
            let _ = self.identifiers.push(id);
        }
    }
}

/// Evaluate one advertisement against `target`.
///
/// Identifiers come from service data and from local names that already are
/// ASCII hex; payload-slice candidates are diagnostic only.
pub fn extract(record: &ObservationRecord, target: &str) -> Extraction {
    let mut extraction = Extraction {
        matched: match_signature(record, target),
        ..Extraction::default()
    };

    // Local names, straight from the payload TLVs
    for name in local_names(&record.payload) {
        let mut text = CandidateText::new();
        hex::printable_ascii(name, &mut text);
        extraction.add_candidate(Field::LocalName, text, target);
        if let Some(id) = Identifier::parse(name) {
            extraction.add_identifier(id);
        }
    }

    // Service data: hex and printable ASCII. The ASCII form wins as the
    // identifier when it already is hex; otherwise the raw bytes are encoded.
    if let Some(data) = record.service_data.as_ref().filter(|d| !d.is_empty()) {
        let mut hex_text = CandidateText::new();
        hex::encode_upper(data, &mut hex_text);
        extraction.add_candidate(Field::ServiceDataHex, hex_text, target);

        let mut ascii = CandidateText::new();
        hex::printable_ascii(data, &mut ascii);
        let id = if hex::is_ascii_hex(ascii.as_bytes()) {
            Identifier::parse(ascii.as_bytes())
        } else {
            Identifier::encode(data)
        };
        extraction.add_candidate(Field::ServiceDataAscii, ascii, target);
        if let Some(id) = id {
            extraction.add_identifier(id);
        }
    }

    // Badge payload following the fixed header
    if record.payload.len() > PAYLOAD_HEADER_SIZE {
        let body = &record.payload[PAYLOAD_HEADER_SIZE..];
        let mut hex_text = CandidateText::new();
        hex::encode_upper(body, &mut hex_text);
        extraction.add_candidate(Field::PayloadHex, hex_text, target);

        let mut ascii = CandidateText::new();
        hex::printable_ascii(body, &mut ascii);
        extraction.add_candidate(Field::PayloadAscii, ascii, target);
    }

    extraction
}

/// Apply the match rules in priority order; first match wins.
pub fn match_signature(record: &ObservationRecord, target: &str) -> Option<MatchSource> {
    let needle = target.as_bytes();

    if let Some(uuid) = &record.service_uuid {
        if contains_ignore_case(uuid.as_bytes(), needle) {
            return Some(MatchSource::ServiceUuid);
        }
    }

    if let Some(data) = &record.manufacturer_data {
        let mut text = CandidateText::new();
        hex::encode_upper(data, &mut text);
        if contains_ignore_case(text.as_bytes(), needle) {
            return Some(MatchSource::ManufacturerData);
        }
    }

    if let Some(data) = &record.service_data {
        let mut text = CandidateText::new();
        hex::encode_upper(data, &mut text);
        if contains_ignore_case(text.as_bytes(), needle) {
            return Some(MatchSource::ServiceData);
        }
    }

    let mut dump = DumpText::new();
    describe(record, &mut dump);
    if contains_ignore_case(dump.as_bytes(), needle) {
        return Some(MatchSource::AdvertisementDump);
    }

    None
}

/// Human-readable dump of every field of the advertisement.
pub fn describe(record: &ObservationRecord, out: &mut DumpText) {
    let mut mac = MacString::new();
    format_mac(&record.addr, &mut mac);

    let _ = write!(out, "Address: {}, rssi: {}", mac, record.rssi);
    if let Some(name) = &record.name {
        let mut text = CandidateText::new();
        hex::printable_ascii(name, &mut text);
        let _ = write!(out, ", Name: {}", text);
    }
    if let Some(data) = &record.manufacturer_data {
        let _ = out.push_str(", manufacturer data: ");
        hex::encode_upper(data, out);
    }
    if let Some(uuid) = &record.service_uuid {
        let _ = write!(out, ", serviceUUID: {}", uuid);
    }
    if let Some(data) = &record.service_data {
        let _ = out.push_str(", serviceData: ");
        hex::encode_upper(data, out);
    }
    let _ = out.push_str(", payload: ");
    hex::encode_upper(&record.payload, out);
}

/// Case-insensitive (ASCII) substring search. An empty needle never matches.
pub fn contains_ignore_case(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() || needle.len() > haystack.len() {
        return false;
    }
    haystack
        .windows(needle.len())
        .any(|window| window.eq_ignore_ascii_case(needle))
}
