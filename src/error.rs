//! Error taxonomy shared by the delivery and update state machines.
//!
//! Transient classes (`TransportUnavailable`, `ServerError`) are retried by the
//! delivery client and surface as a [`DeliveryResult`](crate::delivery::DeliveryResult),
//! never as a fatal error. The structural classes end an update attempt; the
//! agent waits for the next scheduled check.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// No network path (Wi-Fi down)
    #[error("transport unavailable")]
    TransportUnavailable,

    /// Non-2xx status, failed request (`status: None`) or an unrecognized body
    #[error("server error (status {status:?})")]
    ServerError { status: Option<u16> },

    /// Manifest without a usable version, or with fields that disagree
    #[error("malformed manifest: {0}")]
    MalformedManifest(&'static str),

    /// Download reported no content length, or zero
    #[error("firmware download has no usable content length")]
    InvalidContentLength,

    /// Stream ended (or failed) before the declared length was received
    #[error("firmware stream truncated: {written}/{expected} bytes")]
    StreamTruncated { expected: u32, written: u32 },

    #[error("flash update could not be started")]
    FlashBeginFailed,

    /// Flash sink accepted fewer bytes than requested
    #[error("flash write failed")]
    FlashWriteFailed,

    #[error("flash commit failed")]
    FlashCommitFailed,

    /// Commit returned but the sink does not report the image as finished
    #[error("flash commit incomplete")]
    FlashCommitIncomplete,

    /// SHA-256 of the received image differs from the manifest
    #[error("firmware digest mismatch")]
    IntegrityMismatch,

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

impl Error {
    /// Whether the delivery client retries this class locally
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransportUnavailable | Error::ServerError { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_network_errors_are_transient() {
        assert!(Error::TransportUnavailable.is_transient());
        assert!(Error::ServerError { status: Some(500) }.is_transient());
        assert!(Error::ServerError { status: None }.is_transient());
        assert!(!Error::MalformedManifest("missing version").is_transient());
        assert!(!Error::StreamTruncated { expected: 10, written: 5 }.is_transient());
        assert!(!Error::FlashCommitIncomplete.is_transient());
    }

    #[test]
    fn display_includes_context() {
        let msg = std::format!("{}", Error::StreamTruncated { expected: 1000, written: 800 });
        assert_eq!(msg, "firmware stream truncated: 800/1000 bytes");
    }
}
