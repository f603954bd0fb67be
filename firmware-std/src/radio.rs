//! BLE scanning through NimBLE.
//!
//! The scan callback runs on the NimBLE host task. It only parses the
//! advertisement and queues it; the main loop drains the queue after the
//! window closes. Advertisements that cannot match the signature are dropped
//! in the callback so a crowded room does not fill the bounded queue.

use std::sync::mpsc::{self, Receiver, SyncSender};

use esp32_nimble::{BLEDevice, BLEScan};
use esp_idf_svc::hal::task::block_on;

use autoattend::defaults::MAX_OBSERVATIONS_PER_CYCLE;
use autoattend::extract::match_signature;
use autoattend::scanner::{ObservationRecord, ObservationSink, Radio};

pub struct NimbleRadio {
    scan: BLEScan,
    target: &'static str,
    tx: SyncSender<ObservationRecord>,
    rx: Receiver<ObservationRecord>,
}

impl NimbleRadio {
    pub fn new(target: &'static str) -> Self {
        let mut scan = BLEScan::new();
        scan.active_scan(true).interval(100).window(99);
        let (tx, rx) = mpsc::sync_channel(MAX_OBSERVATIONS_PER_CYCLE);
        Self {
            scan,
            target,
            tx,
            rx,
        }
    }
}

impl Radio for NimbleRadio {
    fn scan(&mut self, window_ms: u32, sink: &mut dyn ObservationSink) {
        let ble_device = BLEDevice::take();
        let tx = &self.tx;
        let target = self.target;
        let duration = i32::try_from(window_ms).unwrap_or(i32::MAX);

        let result = block_on(self.scan.start(ble_device, duration, |device, data| {
            let addr = device.addr().as_be_bytes();
            let record = ObservationRecord::parse(&addr, device.rssi(), data.payload());
            if match_signature(&record, target).is_none() {
                return None;
            }
            if tx.try_send(record).is_err() {
                log::debug!("Scan queue full, advertisement dropped");
            }
            None::<()>
        }));
        if let Err(e) = result {
            log::warn!("BLE scan failed: {:?}", e);
        }

        while let Ok(record) = self.rx.try_recv() {
            sink.on_observation(record);
        }
    }
}
