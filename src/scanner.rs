/// BLE advertisement records and the radio-facing traits.
///
/// The radio driver hands raw advertisement bytes to [`ObservationRecord::parse`],
/// which splits out the fields the extractor cares about. Records flow into an
/// [`ObservationSink`]; the scan loop buffers one scan window's worth in an
/// [`ObservationBatch`] and processes them after the window closes, so no
/// presence or dedupe state is touched from the radio callback.
use core::fmt::Write;

use heapless::{Deque, String, Vec};

use crate::defaults::MAX_OBSERVATIONS_PER_CYCLE;

/// Raw advertisement capacity: legacy advertising data + scan response
pub const MAX_ADV_LEN: usize = 62;

/// Capacity for a single AD structure payload
pub const MAX_FIELD_LEN: usize = 31;

/// "d7e1a3f4-0000-1000-8000-00805f9b34fb"
pub type UuidString = String<37>;

/// "AA:BB:CC:DD:EE:FF"
pub type MacString = String<18>;

pub type FieldBytes = Vec<u8, MAX_FIELD_LEN>;

/// AD structure types we decode
pub mod ad_type {
    pub const UUID16_INCOMPLETE: u8 = 0x02;
    pub const UUID16_COMPLETE: u8 = 0x03;
    pub const UUID32_INCOMPLETE: u8 = 0x04;
    pub const UUID32_COMPLETE: u8 = 0x05;
    pub const UUID128_INCOMPLETE: u8 = 0x06;
    pub const UUID128_COMPLETE: u8 = 0x07;
    pub const SHORTENED_LOCAL_NAME: u8 = 0x08;
    pub const COMPLETE_LOCAL_NAME: u8 = 0x09;
    pub const SERVICE_DATA_UUID16: u8 = 0x16;
    pub const SERVICE_DATA_UUID32: u8 = 0x20;
    pub const SERVICE_DATA_UUID128: u8 = 0x21;
    pub const MANUFACTURER_DATA: u8 = 0xFF;
}

/// One AD structure: `[length] [type] [data...]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdStructure<'a> {
    pub ad_type: u8,
    pub data: &'a [u8],
}

/// Iterator over the AD structures of an advertisement payload.
///
/// Stops at a zero length byte or at a structure whose declared length runs
/// past the buffer; structures yielded before that point remain valid.
pub struct AdStructures<'a> {
    payload: &'a [u8],
    pos: usize,
}

impl<'a> AdStructures<'a> {
    pub fn new(payload: &'a [u8]) -> Self {
        Self { payload, pos: 0 }
    }
}

impl<'a> Iterator for AdStructures<'a> {
    type Item = AdStructure<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let payload = self.payload;
        if self.pos >= payload.len() {
            return None;
        }
        let len = payload[self.pos] as usize;
        if len == 0 || self.pos + 1 + len > payload.len() {
            // Terminate for good: a truncated structure poisons the rest.
            self.pos = payload.len();
            return None;
        }
        let item = AdStructure {
            ad_type: payload[self.pos + 1],
            data: &payload[self.pos + 2..self.pos + 1 + len],
        };
        self.pos += 1 + len;
        Some(item)
    }
}

/// Every advertised local name (shortened or complete), in payload order.
pub fn local_names(payload: &[u8]) -> impl Iterator<Item = &[u8]> {
    AdStructures::new(payload)
        .filter(|ad| {
            matches!(
                ad.ad_type,
                ad_type::SHORTENED_LOCAL_NAME | ad_type::COMPLETE_LOCAL_NAME
            )
        })
        .map(|ad| ad.data)
        .filter(|name| !name.is_empty())
}

/// A parsed BLE advertisement. Transient: lives for one scan cycle at most.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservationRecord {
    pub addr: [u8; 6],
    pub rssi: i8,
    /// First advertised service UUID, rendered as text
    pub service_uuid: Option<UuidString>,
    /// Manufacturer-specific data including the 2-byte company ID
    pub manufacturer_data: Option<FieldBytes>,
    /// Service data following its UUID
    pub service_data: Option<FieldBytes>,
    /// First advertised local name
    pub name: Option<FieldBytes>,
    /// The whole advertisement as received
    pub payload: Vec<u8, MAX_ADV_LEN>,
}

impl ObservationRecord {
    /// Parse advertisement data bytes into a record.
    ///
    /// Each field is decoded independently: a malformed service-data entry
    /// (shorter than its UUID) is skipped without affecting the others.
    /// Payloads longer than [`MAX_ADV_LEN`] are truncated.
    pub fn parse(addr: &[u8; 6], rssi: i8, ad_data: &[u8]) -> Self {
        let ad_data = &ad_data[..ad_data.len().min(MAX_ADV_LEN)];
        let mut record = ObservationRecord {
            addr: *addr,
            rssi,
            service_uuid: None,
            manufacturer_data: None,
            service_data: None,
            name: None,
            payload: Vec::new(),
        };
        let _ = record.payload.extend_from_slice(ad_data);

        for ad in AdStructures::new(ad_data) {
            match ad.ad_type {
                ad_type::UUID16_INCOMPLETE | ad_type::UUID16_COMPLETE => {
                    if record.service_uuid.is_none() && ad.data.len() >= 2 {
                        record.service_uuid = format_uuid(&ad.data[..2]);
                    }
                }
                ad_type::UUID32_INCOMPLETE | ad_type::UUID32_COMPLETE => {
                    if record.service_uuid.is_none() && ad.data.len() >= 4 {
                        record.service_uuid = format_uuid(&ad.data[..4]);
                    }
                }
                ad_type::UUID128_INCOMPLETE | ad_type::UUID128_COMPLETE => {
                    if record.service_uuid.is_none() && ad.data.len() >= 16 {
                        record.service_uuid = format_uuid(&ad.data[..16]);
                    }
                }
                ad_type::SHORTENED_LOCAL_NAME | ad_type::COMPLETE_LOCAL_NAME => {
                    if record.name.is_none() && !ad.data.is_empty() {
                        record.name = field_bytes(ad.data);
                    }
                }
                ad_type::SERVICE_DATA_UUID16 => {
                    record.service_data = record.service_data.take().or_else(|| service_data(ad.data, 2));
                }
                ad_type::SERVICE_DATA_UUID32 => {
                    record.service_data = record.service_data.take().or_else(|| service_data(ad.data, 4));
                }
                ad_type::SERVICE_DATA_UUID128 => {
                    record.service_data = record.service_data.take().or_else(|| service_data(ad.data, 16));
                }
                ad_type::MANUFACTURER_DATA => {
                    if record.manufacturer_data.is_none() && ad.data.len() >= 2 {
                        record.manufacturer_data = field_bytes(ad.data);
                    }
                }
                _ => {}
            }
        }

        record
    }

    /// Manufacturer company ID (little-endian, first two bytes)
    pub fn company_id(&self) -> Option<u16> {
        self.manufacturer_data
            .as_ref()
            .filter(|d| d.len() >= 2)
            .map(|d| u16::from_le_bytes([d[0], d[1]]))
    }
}

fn field_bytes(data: &[u8]) -> Option<FieldBytes> {
    let mut out = FieldBytes::new();
    out.extend_from_slice(&data[..data.len().min(MAX_FIELD_LEN)]).ok()?;
    Some(out)
}

fn service_data(data: &[u8], uuid_len: usize) -> Option<FieldBytes> {
    if data.len() < uuid_len {
        log::debug!("Skipping malformed service data ({} bytes)", data.len());
        return None;
    }
    field_bytes(&data[uuid_len..])
}

/// Render a little-endian UUID as text: 16/32-bit as `0x180f`, 128-bit in the
/// canonical dashed form.
fn format_uuid(le: &[u8]) -> Option<UuidString> {
    let mut out = UuidString::new();
    match le.len() {
        2 => write!(out, "0x{:04x}", u16::from_le_bytes([le[0], le[1]])).ok()?,
        4 => write!(out, "0x{:08x}", u32::from_le_bytes([le[0], le[1], le[2], le[3]])).ok()?,
        16 => {
            for (i, b) in le.iter().rev().enumerate() {
                if matches!(i, 4 | 6 | 8 | 10) {
                    out.push('-').ok()?;
                }
                write!(out, "{:02x}", b).ok()?;
            }
        }
        _ => return None,
    }
    Some(out)
}

/// Format a 6-byte MAC address into "AA:BB:CC:DD:EE:FF" string
pub fn format_mac(mac: &[u8; 6], buf: &mut MacString) {
    let _ = write!(
        buf,
        "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    );
}

/// Receiver of advertisement records from the radio.
pub trait ObservationSink {
    fn on_observation(&mut self, record: ObservationRecord);
}

/// Source of advertisement records: runs one bounded scan window and pushes
/// every advertisement seen into `sink` before returning.
pub trait Radio {
    fn scan(&mut self, window_ms: u32, sink: &mut dyn ObservationSink);
}

/// Bounded FIFO of the advertisements collected during one scan window.
/// Records arriving when full are dropped and counted.
pub struct ObservationBatch {
    queue: Deque<ObservationRecord, MAX_OBSERVATIONS_PER_CYCLE>,
    dropped: u32,
}

impl ObservationBatch {
    pub const fn new() -> Self {
        Self {
            queue: Deque::new(),
            dropped: 0,
        }
    }

    pub fn pop(&mut self) -> Option<ObservationRecord> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of records dropped since the last [`clear`](Self::clear)
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.dropped = 0;
    }
}

impl Default for ObservationBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ObservationSink for ObservationBatch {
    fn on_observation(&mut self, record: ObservationRecord) {
        if self.queue.push_back(record).is_err() {
            self.dropped += 1;
        }
    }
}
