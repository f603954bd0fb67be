//! Scripted stand-ins for the platform traits, shared by the unit tests.

use std::cell::RefCell;
use std::collections::VecDeque;

use crate::ota::{FlashSink, FlashUpdate};
use crate::scanner::{ObservationRecord, ObservationSink, Radio};
use crate::transport::{Clock, FirmwareStream, HttpResponse, Reboot, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakeError;

// ── Clock ───────────────────────────────────────────────────────────

/// Clock that only moves when told to or when slept on.
pub struct FakeClock {
    now_ms: u64,
    pub sleeps: Vec<u32>,
}

impl FakeClock {
    pub fn at(secs: u32) -> Self {
        Self {
            now_ms: u64::from(secs) * 1000,
            sleeps: Vec::new(),
        }
    }

    pub fn set(&mut self, secs: u32) {
        self.now_ms = u64::from(secs) * 1000;
    }

    pub fn advance(&mut self, secs: u32) {
        self.now_ms += u64::from(secs) * 1000;
    }
}

impl Clock for FakeClock {
    fn now_secs(&self) -> u32 {
        (self.now_ms / 1000) as u32
    }

    fn sleep_ms(&mut self, ms: u32) {
        self.sleeps.push(ms);
        self.now_ms += u64::from(ms);
    }
}

#[derive(Default)]
pub struct FakeReboot {
    pub restarts: u32,
}

impl Reboot for FakeReboot {
    fn restart(&mut self) {
        self.restarts += 1;
    }
}

// ── Transport ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub url: String,
    pub body: String,
}

enum Reply {
    Status(u16, String),
    Error,
}

/// Transport answering from a queue of canned replies. With the queue empty
/// every request gets a 500.
pub struct ScriptedTransport {
    /// Connectivity answers, consumed one per `is_connected` call; the last
    /// one sticks.
    connectivity: RefCell<VecDeque<bool>>,
    connected: RefCell<bool>,
    replies: VecDeque<Reply>,
    download: Option<FakeStream>,
    pub requests: Vec<Request>,
    pub download_urls: Vec<String>,
}

impl ScriptedTransport {
    pub fn connected() -> Self {
        Self {
            connectivity: RefCell::new(VecDeque::new()),
            connected: RefCell::new(true),
            replies: VecDeque::new(),
            download: None,
            requests: Vec::new(),
            download_urls: Vec::new(),
        }
    }

    pub fn set_connected(&mut self, connected: bool) -> &mut Self {
        self.connectivity.borrow_mut().clear();
        *self.connected.borrow_mut() = connected;
        self
    }

    /// Answer the next `is_connected` calls in order.
    pub fn connectivity(&mut self, script: &[bool]) -> &mut Self {
        self.connectivity.borrow_mut().extend(script.iter().copied());
        self
    }

    pub fn reply(&mut self, status: u16, body: &str) -> &mut Self {
        self.replies
            .push_back(Reply::Status(status, body.to_string()));
        self
    }

    pub fn fail_request(&mut self) -> &mut Self {
        self.replies.push_back(Reply::Error);
        self
    }

    pub fn set_download(&mut self, stream: FakeStream) -> &mut Self {
        self.download = Some(stream);
        self
    }

    fn respond(&mut self, response: &mut [u8]) -> Result<HttpResponse, FakeError> {
        match self.replies.pop_front() {
            Some(Reply::Status(status, body)) => {
                let len = body.len().min(response.len());
                response[..len].copy_from_slice(&body.as_bytes()[..len]);
                Ok(HttpResponse { status, len })
            }
            Some(Reply::Error) => Err(FakeError),
            None => Ok(HttpResponse {
                status: 500,
                len: 0,
            }),
        }
    }
}

impl Transport for ScriptedTransport {
    type Error = FakeError;
    type Download<'a> = FakeStream where Self: 'a;

    fn is_connected(&self) -> bool {
        if let Some(next) = self.connectivity.borrow_mut().pop_front() {
            *self.connected.borrow_mut() = next;
        }
        *self.connected.borrow()
    }

    fn post_json(
        &mut self,
        url: &str,
        body: &[u8],
        response: &mut [u8],
    ) -> Result<HttpResponse, FakeError> {
        self.requests.push(Request {
            url: url.to_string(),
            body: String::from_utf8_lossy(body).into_owned(),
        });
        self.respond(response)
    }

    fn get(&mut self, url: &str, response: &mut [u8]) -> Result<HttpResponse, FakeError> {
        self.requests.push(Request {
            url: url.to_string(),
            body: String::new(),
        });
        self.respond(response)
    }

    fn download(&mut self, url: &str) -> Result<FakeStream, FakeError> {
        self.download_urls.push(url.to_string());
        self.download.take().ok_or(FakeError)
    }
}

/// Firmware body served in bounded reads.
pub struct FakeStream {
    status: u16,
    content_length: Option<u64>,
    data: Vec<u8>,
    pos: usize,
    fail_at: Option<usize>,
}

impl FakeStream {
    pub fn new(status: u16, content_length: Option<u64>, data: Vec<u8>) -> Self {
        Self {
            status,
            content_length,
            data,
            pos: 0,
            fail_at: None,
        }
    }

    /// Report a read error once `offset` bytes have been served.
    pub fn fail_after(mut self, offset: usize) -> Self {
        self.fail_at = Some(offset);
        self
    }
}

impl FirmwareStream for FakeStream {
    type Error = FakeError;

    fn status(&self) -> u16 {
        self.status
    }

    fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FakeError> {
        if self.fail_at.is_some_and(|at| self.pos >= at) {
            return Err(FakeError);
        }
        let end = self.data.len().min(self.pos + buf.len());
        let end = self.fail_at.map_or(end, |at| end.min(at));
        let n = end - self.pos;
        buf[..n].copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(n)
    }
}

// ── Flash ───────────────────────────────────────────────────────────

pub struct FakeFlash {
    pub begun: Vec<u32>,
    pub written: Vec<u8>,
    pub write_sizes: Vec<usize>,
    pub committed: bool,
    pub aborted: u32,
    finished: bool,
    pub fail_begin: bool,
    pub fail_commit: bool,
    /// Accept at most this many bytes per write
    pub accept_limit: Option<usize>,
    pub finish_on_commit: bool,
}

impl FakeFlash {
    pub fn new() -> Self {
        Self {
            begun: Vec::new(),
            written: Vec::new(),
            write_sizes: Vec::new(),
            committed: false,
            aborted: 0,
            finished: false,
            fail_begin: false,
            fail_commit: false,
            accept_limit: None,
            finish_on_commit: true,
        }
    }
}

impl Default for FakeFlash {
    fn default() -> Self {
        Self::new()
    }
}

pub struct FakeUpdate<'a> {
    flash: &'a mut FakeFlash,
}

impl FlashSink for FakeFlash {
    type Error = FakeError;
    type Update<'a> = FakeUpdate<'a> where Self: 'a;

    fn begin(&mut self, size: u32) -> Result<FakeUpdate<'_>, FakeError> {
        if self.fail_begin {
            return Err(FakeError);
        }
        self.begun.push(size);
        self.written.clear();
        self.finished = false;
        Ok(FakeUpdate { flash: self })
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

impl FlashUpdate for FakeUpdate<'_> {
    type Error = FakeError;

    fn write(&mut self, data: &[u8]) -> Result<usize, FakeError> {
        let n = self.flash.accept_limit.map_or(data.len(), |limit| data.len().min(limit));
        self.flash.written.extend_from_slice(&data[..n]);
        self.flash.write_sizes.push(n);
        Ok(n)
    }

    fn commit(&mut self) -> Result<(), FakeError> {
        if self.flash.fail_commit {
            return Err(FakeError);
        }
        self.flash.committed = true;
        self.flash.finished = self.flash.finish_on_commit;
        Ok(())
    }

    fn abort(&mut self) -> Result<(), FakeError> {
        self.flash.aborted += 1;
        Ok(())
    }
}

// ── Radio ───────────────────────────────────────────────────────────

/// Radio replaying one list of advertisements per scan window.
#[derive(Default)]
pub struct FakeRadio {
    windows: VecDeque<Vec<ObservationRecord>>,
    pub scans: Vec<u32>,
}

impl FakeRadio {
    pub fn push_window(&mut self, records: Vec<ObservationRecord>) -> &mut Self {
        self.windows.push_back(records);
        self
    }
}

impl Radio for FakeRadio {
    fn scan(&mut self, window_ms: u32, sink: &mut dyn ObservationSink) {
        self.scans.push(window_ms);
        for record in self.windows.pop_front().unwrap_or_default() {
            sink.on_observation(record);
        }
    }
}
