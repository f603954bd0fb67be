/// Wire formats for the AutoAttend worker API.
///
/// - `POST /api/esp32/detect` with `{"hex_value":"<HEX>","action":"checkin"|"checkout"}`
/// - `GET /api/ota/manifest` returning `{"version":..,"key":..,"size":..,"sha256":..}`
/// - `GET /api/ota/download[?key=..]` returning the raw image
///
/// Uses `heapless` types and `serde-json-core` for no_std/no-alloc operation.
use core::fmt::Write;

use heapless::String;
use serde::{Deserialize, Serialize};

use crate::defaults::{DETECT_PATH, DOWNLOAD_PATH, MANIFEST_PATH};
use crate::error::Error;
use crate::extract::contains_ignore_case;

/// Firmware version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum size of a serialized request body
pub const MAX_REQUEST_LEN: usize = 256;

/// Bytes of a response body kept for inspection
pub const MAX_RESPONSE_LEN: usize = 1024;

/// Absolute request URL, room for a fully escaped download key
pub type Url = String<512>;

/// Manifest fields are unbounded server side; these leave room for anything
/// that fits a response body alongside the other fields.
pub type VersionString = String<128>;
pub type KeyString = String<192>;
pub type DigestString = String<64>;

/// Presence action reported to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Action {
    #[serde(rename = "checkin")]
    CheckIn,
    #[serde(rename = "checkout")]
    CheckOut,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::CheckIn => "checkin",
            Action::CheckOut => "checkout",
        }
    }
}

/// Body of a detection report
#[derive(Debug, Serialize)]
pub struct DetectRequest<'a> {
    pub hex_value: &'a str,
    pub action: Action,
}

/// Fields of the detection response we look at. Everything else
/// (employee name, timestamps, ...) is ignored.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct DetectResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub deduped: Option<bool>,
}

/// Latest firmware description served by the manifest endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FirmwareManifest {
    #[serde(default)]
    pub version: Option<VersionString>,
    /// Object key of the image, passed back as the `key` download parameter
    #[serde(default)]
    pub key: Option<KeyString>,
    /// Image size in bytes
    #[serde(default)]
    pub size: Option<u32>,
    /// Lower-case hex SHA-256 of the image
    #[serde(default)]
    pub sha256: Option<DigestString>,
}

impl FirmwareManifest {
    /// Non-empty version, if the manifest has one
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref().filter(|v| !v.is_empty())
    }

    /// Non-empty download key, if the manifest has one
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref().filter(|k| !k.is_empty())
    }
}

/// Serialize a detection report into `buf`. Returns the body length.
///
/// String values are JSON-escaped by the serializer.
pub fn encode_detect_request(hex_value: &str, action: Action, buf: &mut [u8]) -> Option<usize> {
    let request = DetectRequest { hex_value, action };
    serde_json_core::to_slice(&request, buf).ok()
}

/// Whether a detect response body reports success.
///
/// Structured parse first; bodies `serde-json-core` cannot handle (nested
/// arrays, escaped strings, truncation) fall back to searching for the
/// `"success":true` marker.
pub fn is_success_body(body: &[u8]) -> bool {
    match serde_json_core::from_slice::<DetectResponse>(body) {
        Ok((response, _)) => response.success == Some(true),
        Err(_) => contains_ignore_case(body, br#""success":true"#),
    }
}

/// Whether a successful response says the server already had this event
pub fn is_deduped_body(body: &[u8]) -> bool {
    match serde_json_core::from_slice::<DetectResponse>(body) {
        Ok((response, _)) => response.deduped == Some(true),
        Err(_) => contains_ignore_case(body, br#""deduped":true"#),
    }
}

/// Parse the manifest endpoint response. A missing or empty version is an
/// error, never a default.
pub fn parse_manifest(body: &[u8]) -> Result<FirmwareManifest, Error> {
    let (manifest, _) = serde_json_core::from_slice::<FirmwareManifest>(body)
        .map_err(|_| Error::MalformedManifest("unparsable manifest"))?;
    if manifest.version.is_none() {
        return Err(Error::MalformedManifest("missing version"));
    }
    if manifest.version().is_none() {
        return Err(Error::MalformedManifest("empty version"));
    }
    Ok(manifest)
}

/// `{host}{path}`
pub fn endpoint_url(host: &str, path: &str) -> Url {
    let mut url = Url::new();
    let _ = url.push_str(host.trim_end_matches('/'));
    let _ = url.push_str(path);
    url
}

pub fn detect_url(host: &str) -> Url {
    endpoint_url(host, DETECT_PATH)
}

pub fn manifest_url(host: &str) -> Url {
    endpoint_url(host, MANIFEST_PATH)
}

/// Download URL for a manifest: `?key=` with the percent-encoded key when the
/// manifest supplied one, the bare endpoint otherwise (the server then looks
/// the key up itself).
pub fn download_url(host: &str, key: Option<&str>) -> Url {
    let mut url = endpoint_url(host, DOWNLOAD_PATH);
    if let Some(key) = key.filter(|k| !k.is_empty()) {
        let _ = url.push_str("?key=");
        percent_encode(key, &mut url);
    }
    url
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
fn percent_encode<const N: usize>(value: &str, out: &mut String<N>) {
    for b in value.bytes() {
        let unreserved = b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~');
        let full = if unreserved {
            out.push(b as char).is_err()
        } else {
            write!(out, "%{:02X}", b).is_err()
        };
        if full {
            break;
        }
    }
}
