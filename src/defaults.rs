/// Compiled-in defaults for the AutoAttend scanner.
///
/// Every value here can be overridden at runtime through
/// [`AgentConfig`](crate::config::AgentConfig); the firmware binary fills the
/// deployment-specific ones (server host, Wi-Fi credentials) from build-time
/// environment variables.

/// Payload signature the badge app advertises (case-insensitive).
///
/// Appears as the leading group of the 128-bit service UUID
/// `d7e1a3f4-0000-1000-8000-00805f9b34fb`.
pub const TARGET_SIGNATURE: &str = "D7E1A3F4";

/// Base URL of the AutoAttend worker
pub const SERVER_HOST: &str = "http://192.168.2.177:5175";

/// Detection endpoint (POST, JSON body)
pub const DETECT_PATH: &str = "/api/esp32/detect";

/// OTA manifest endpoint (GET, JSON body)
pub const MANIFEST_PATH: &str = "/api/ota/manifest";

/// OTA firmware download endpoint (GET, raw binary)
pub const DOWNLOAD_PATH: &str = "/api/ota/download";

// ── Presence ─────────────────────────────────────────────────────────

/// Silence interval after which a present identifier is considered departed.
pub const PRESENCE_TIMEOUT_SECONDS: u32 = 30;

/// Maximum number of identifiers tracked as present at the same time.
/// Must be a power of two (heapless index map).
pub const MAX_PRESENT: usize = 32;

/// Maximum number of distinct peer addresses processed per scan window.
pub const MAX_DEVICES_PER_CYCLE: usize = 5;

// ── Delivery ─────────────────────────────────────────────────────────

/// Minimum spacing between two delivery attempts for the same identifier.
pub const SEEN_TTL_SECONDS: u32 = 10;

/// Delivery attempts per event
pub const MAX_RETRIES: u8 = 3;

/// Wait before retrying when the network is down
pub const DISCONNECTED_BACKOFF_MS: u32 = 2000;

/// Linear backoff step between failed requests (1 s, 2 s, ...)
pub const RETRY_BACKOFF_STEP_MS: u32 = 1000;

/// Capacity of the dedupe cache. Must be a power of two.
pub const MAX_DEDUPE_ENTRIES: usize = 32;

// ── Scan cycle ───────────────────────────────────────────────────────

/// Scan window duration. Active scan, interval 100 / window 99.
pub const SCAN_WINDOW_MS: u32 = 2000;

/// Pause after each sweep. Window + pause give a ~6 s cycle.
pub const POST_SCAN_PAUSE_MS: u32 = 4000;

/// Maximum advertisements buffered during one scan window
pub const MAX_OBSERVATIONS_PER_CYCLE: usize = 16;

// ── Payload layout ───────────────────────────────────────────────────

/// Bytes of BLE header + service UUID preceding the badge payload:
/// `02011A 020A0B 1107 FB349B5F8000008000100000F4A3E1D7`
pub const PAYLOAD_HEADER_SIZE: usize = 24;

/// Upper bound on identifier length (hex characters)
pub const MAX_IDENTIFIER_LEN: usize = 64;

// ── OTA ──────────────────────────────────────────────────────────────

/// Interval between firmware update checks
pub const UPDATE_INTERVAL_SECONDS: u32 = 600;

/// Bytes read from the download stream per flash write
pub const OTA_CHUNK_SIZE: usize = 1024;

/// Delay between a verified commit and the restart, lets logs flush
pub const RESTART_DELAY_MS: u32 = 1000;
