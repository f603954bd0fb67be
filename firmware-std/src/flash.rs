//! Flash sink over the ESP-IDF OTA partitions.

use esp_idf_svc::ota::{EspOta, EspOtaUpdate};
use esp_idf_svc::sys::EspError;

use autoattend::ota::{FlashSink, FlashUpdate};

pub struct EspFlash {
    ota: EspOta,
}

impl EspFlash {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self { ota: EspOta::new()? })
    }

    /// Confirm the running image so the bootloader does not roll back to the
    /// previous slot on the next reset.
    pub fn mark_running_valid(&mut self) {
        match self.ota.get_running_slot() {
            Ok(slot) => log::info!("Running from OTA slot {}", slot.label.as_str()),
            Err(e) => log::warn!("Failed to read running OTA slot: {:?}", e),
        }
        if let Err(e) = self.ota.mark_running_slot_valid() {
            log::warn!("Failed to mark running OTA slot valid: {:?}", e);
        }
    }
}

impl FlashSink for EspFlash {
    type Error = EspError;
    type Update<'a> = EspFlashUpdate<'a>;

    fn begin(&mut self, size: u32) -> Result<EspFlashUpdate<'_>, EspError> {
        log::info!("Opening OTA update for {} bytes", size);
        let update = self.ota.initiate_update()?;
        Ok(EspFlashUpdate {
            update: Some(update),
        })
    }

    /// The boot slot moves away from the running one once a committed image
    /// has been selected.
    fn is_finished(&self) -> bool {
        match (self.ota.get_boot_slot(), self.ota.get_running_slot()) {
            (Ok(boot), Ok(running)) => boot.label != running.label,
            _ => false,
        }
    }
}

/// `complete` and `abort` consume the ESP-IDF handle; `None` once either ran.
pub struct EspFlashUpdate<'a> {
    update: Option<EspOtaUpdate<'a>>,
}

impl FlashUpdate for EspFlashUpdate<'_> {
    type Error = EspError;

    fn write(&mut self, data: &[u8]) -> Result<usize, EspError> {
        match self.update.as_mut() {
            Some(update) => {
                update.write(data)?;
                Ok(data.len())
            }
            None => Ok(0),
        }
    }

    fn commit(&mut self) -> Result<(), EspError> {
        match self.update.take() {
            Some(update) => update.complete(),
            None => Ok(()),
        }
    }

    fn abort(&mut self) -> Result<(), EspError> {
        match self.update.take() {
            Some(update) => update.abort(),
            None => Ok(()),
        }
    }
}
