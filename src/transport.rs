/// Platform seams: network, time and restart.
///
/// The library never talks to hardware directly. The firmware binary
/// implements these traits on top of ESP-IDF; tests use scripted fakes.
use core::fmt::Debug;

/// Monotonic time source plus blocking delay
pub trait Clock {
    /// Seconds since boot
    fn now_secs(&self) -> u32;
    fn sleep_ms(&mut self, ms: u32);
}

/// Device restart, used after a verified firmware commit
pub trait Reboot {
    fn restart(&mut self);
}

/// Status and body length of a buffered response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Bytes of the body copied into the caller's buffer
    pub len: usize,
}

/// Blocking request/response network transport.
///
/// Request failures are reported as `Err`; any HTTP status, including 4xx and
/// 5xx, is an `Ok` response.
pub trait Transport {
    type Error: Debug;
    type Download<'a>: FirmwareStream
    where
        Self: 'a;

    /// Whether a network path is currently up
    fn is_connected(&self) -> bool;

    /// POST a JSON body. The response body is copied into `response`,
    /// truncated to its length.
    fn post_json(
        &mut self,
        url: &str,
        body: &[u8],
        response: &mut [u8],
    ) -> Result<HttpResponse, Self::Error>;

    /// GET into `response`, truncated to its length.
    fn get(&mut self, url: &str, response: &mut [u8]) -> Result<HttpResponse, Self::Error>;

    /// Start a streamed GET for a firmware image.
    fn download(&mut self, url: &str) -> Result<Self::Download<'_>, Self::Error>;
}

/// Response body of a firmware download, read incrementally.
pub trait FirmwareStream {
    type Error: Debug;

    fn status(&self) -> u16;

    /// Declared Content-Length, if the server sent one
    fn content_length(&self) -> Option<u64>;

    /// Read the next bytes into `buf`. `Ok(0)` means end of stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;
}
