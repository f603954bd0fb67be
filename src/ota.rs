/// Over-the-air firmware update.
///
/// `Idle → CheckingManifest → UpToDate`, or
/// `Idle → CheckingManifest → Downloading → Verifying → Applied | Aborted`.
///
/// The flash side is transactional: an update is opened with
/// [`FlashSink::begin`], fed with [`FlashUpdate::write`] and either committed
/// or aborted. [`FlashTransaction`] aborts on drop, so every early return
/// leaves the previous image bootable. The device restarts only after a commit
/// the sink reports as finished.
use core::cmp::min;
use core::fmt::Debug;

use sha2::{Digest, Sha256};

use crate::config::AgentConfig;
use crate::defaults::{OTA_CHUNK_SIZE, RESTART_DELAY_MS};
use crate::error::Error;
use crate::hex::encode_upper;
use crate::protocol::{self, DigestString, FirmwareManifest, Url, MAX_RESPONSE_LEN};
use crate::transport::{Clock, FirmwareStream, Reboot, Transport};

/// Destination for a new firmware image (the inactive OTA slot).
pub trait FlashSink {
    type Error: Debug;
    type Update<'a>: FlashUpdate
    where
        Self: 'a;

    /// Open an update sized for `size` bytes.
    fn begin(&mut self, size: u32) -> Result<Self::Update<'_>, Self::Error>;

    /// Whether the last committed image is complete and selected for boot
    fn is_finished(&self) -> bool;
}

/// An open flash update.
pub trait FlashUpdate {
    type Error: Debug;

    /// Write the next bytes. Returns how many were accepted.
    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error>;

    /// Finalize the image and mark it bootable.
    fn commit(&mut self) -> Result<(), Self::Error>;

    /// Discard everything written so far. Called once unless a commit
    /// succeeded, including after a failed commit.
    fn abort(&mut self) -> Result<(), Self::Error>;
}

/// Scoped flash update that aborts unless committed.
pub struct FlashTransaction<U: FlashUpdate> {
    update: U,
    committed: bool,
}

impl<U: FlashUpdate> FlashTransaction<U> {
    pub fn new(update: U) -> Self {
        Self {
            update,
            committed: false,
        }
    }

    pub fn write(&mut self, data: &[u8]) -> Result<usize, U::Error> {
        self.update.write(data)
    }

    pub fn commit(mut self) -> Result<(), U::Error> {
        self.update.commit()?;
        self.committed = true;
        Ok(())
    }
}

impl<U: FlashUpdate> Drop for FlashTransaction<U> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        log::warn!("Aborting firmware update");
        if let Err(e) = self.update.abort() {
            log::error!("Firmware update abort failed: {:?}", e);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    Idle,
    CheckingManifest,
    UpToDate,
    Downloading,
    Verifying,
    Applied,
    Aborted,
}

/// Result of one [`UpdateAgent::poll`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Offline, or the next check is not due yet
    NotDue,
    UpToDate,
    /// New image committed; restart requested
    Applied,
    Failed(Error),
}

pub struct UpdateAgent {
    server_host: &'static str,
    current_version: &'static str,
    interval_secs: u32,
    /// `None` until the first check, which runs immediately
    next_check_at: Option<u32>,
    state: UpdateState,
}

impl UpdateAgent {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            server_host: config.server_host,
            current_version: config.current_version,
            interval_secs: config.update_interval_secs,
            next_check_at: None,
            state: UpdateState::Idle,
        }
    }

    pub fn state(&self) -> UpdateState {
        self.state
    }

    pub fn next_check_at(&self) -> Option<u32> {
        self.next_check_at
    }

    /// Run a check if connected and due. The next check is scheduled one
    /// interval later whatever the outcome. A finished check (up to date or
    /// aborted) drops back to `Idle` on the next poll.
    pub fn poll<T, F, C, B>(
        &mut self,
        now: u32,
        transport: &mut T,
        flash: &mut F,
        clock: &mut C,
        reboot: &mut B,
    ) -> UpdateOutcome
    where
        T: Transport,
        F: FlashSink,
        C: Clock,
        B: Reboot,
    {
        if matches!(self.state, UpdateState::UpToDate | UpdateState::Aborted) {
            self.state = UpdateState::Idle;
        }
        if !transport.is_connected() {
            return UpdateOutcome::NotDue;
        }
        if self.next_check_at.is_some_and(|next| now < next) {
            return UpdateOutcome::NotDue;
        }
        self.next_check_at = Some(now.saturating_add(self.interval_secs));
        self.check(transport, flash, clock, reboot)
    }

    /// Check the manifest and install a newer image if there is one.
    pub fn check<T, F, C, B>(
        &mut self,
        transport: &mut T,
        flash: &mut F,
        clock: &mut C,
        reboot: &mut B,
    ) -> UpdateOutcome
    where
        T: Transport,
        F: FlashSink,
        C: Clock,
        B: Reboot,
    {
        self.state = UpdateState::CheckingManifest;
        let manifest = match self.fetch_manifest(transport) {
            Ok(manifest) => manifest,
            Err(e) => {
                log::warn!("Update check failed: {}", e);
                self.state = UpdateState::Idle;
                return UpdateOutcome::Failed(e);
            }
        };

        let latest = manifest.version().unwrap_or_default();
        if latest == self.current_version {
            log::info!("Firmware up to date ({})", self.current_version);
            self.state = UpdateState::UpToDate;
            return UpdateOutcome::UpToDate;
        }
        log::info!("Update available: {} -> {}", self.current_version, latest);

        match self.install(&manifest, transport, flash) {
            Ok(()) => {
                self.state = UpdateState::Applied;
                log::info!("Firmware {} installed, restarting", latest);
                clock.sleep_ms(RESTART_DELAY_MS);
                reboot.restart();
                UpdateOutcome::Applied
            }
            Err(e) => {
                log::error!("Firmware update aborted: {}", e);
                self.state = UpdateState::Aborted;
                UpdateOutcome::Failed(e)
            }
        }
    }

    fn fetch_manifest<T: Transport>(&self, transport: &mut T) -> Result<FirmwareManifest, Error> {
        let url = protocol::manifest_url(self.server_host);
        let mut body = [0u8; MAX_RESPONSE_LEN];
        let response = transport.get(&url, &mut body).map_err(|e| {
            log::warn!("Manifest request to {} failed: {:?}", url, e);
            Error::ServerError { status: None }
        })?;
        if response.status != 200 {
            return Err(Error::ServerError {
                status: Some(response.status),
            });
        }
        protocol::parse_manifest(&body[..response.len])
    }

    fn install<T, F>(
        &mut self,
        manifest: &FirmwareManifest,
        transport: &mut T,
        flash: &mut F,
    ) -> Result<(), Error>
    where
        T: Transport,
        F: FlashSink,
    {
        self.state = UpdateState::Downloading;
        let url: Url = protocol::download_url(self.server_host, manifest.key());
        log::info!("Downloading firmware from {}", url);

        let mut stream = transport.download(&url).map_err(|e| {
            log::warn!("Download request failed: {:?}", e);
            Error::ServerError { status: None }
        })?;
        if stream.status() != 200 {
            return Err(Error::ServerError {
                status: Some(stream.status()),
            });
        }

        let expected = match stream.content_length() {
            Some(len) if len > 0 => u32::try_from(len).map_err(|_| Error::InvalidContentLength)?,
            _ => return Err(Error::InvalidContentLength),
        };
        if manifest.size.is_some_and(|size| size != expected) {
            return Err(Error::MalformedManifest("size does not match content length"));
        }

        let update = flash.begin(expected).map_err(|e| {
            log::error!("Flash begin failed: {:?}", e);
            Error::FlashBeginFailed
        })?;
        let mut tx = FlashTransaction::new(update);

        let digest = stream_image(&mut stream, &mut tx, expected)?;

        self.state = UpdateState::Verifying;
        if let Some(want) = manifest.sha256.as_deref() {
            if !digest.eq_ignore_ascii_case(want) {
                log::error!("Firmware digest {} does not match manifest {}", digest, want);
                return Err(Error::IntegrityMismatch);
            }
        }

        tx.commit().map_err(|e| {
            log::error!("Flash commit failed: {:?}", e);
            Error::FlashCommitFailed
        })?;
        if !flash.is_finished() {
            return Err(Error::FlashCommitIncomplete);
        }
        Ok(())
    }
}

/// Copy exactly `expected` bytes from `stream` into `tx`, hashing as we go.
fn stream_image<S, U>(
    stream: &mut S,
    tx: &mut FlashTransaction<U>,
    expected: u32,
) -> Result<DigestString, Error>
where
    S: FirmwareStream,
    U: FlashUpdate,
{
    let mut hasher = Sha256::new();
    let mut buf = [0u8; OTA_CHUNK_SIZE];
    let mut written: u32 = 0;

    while written < expected {
        let want = min(buf.len(), (expected - written) as usize);
        let n = match stream.read(&mut buf[..want]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                log::warn!("Firmware stream error after {} bytes: {:?}", written, e);
                break;
            }
        };

        let accepted = tx.write(&buf[..n]).map_err(|e| {
            log::error!("Flash write failed: {:?}", e);
            Error::FlashWriteFailed
        })?;
        if accepted != n {
            log::error!("Flash accepted {} of {} bytes", accepted, n);
            return Err(Error::FlashWriteFailed);
        }

        hasher.update(&buf[..n]);
        written += n as u32;
        log::debug!("Firmware progress {}/{}", written, expected);
    }

    if written != expected {
        return Err(Error::StreamTruncated { expected, written });
    }

    let mut digest = DigestString::new();
    encode_upper(&hasher.finalize(), &mut digest);
    Ok(digest)
}
