/// The scan loop: one cycle of observe, report, expire, update.
///
/// ```text
/// reset guard → scan window → per record: extract → observe → checkin
///             → sweep → checkout per departure → pause → update poll
/// ```
///
/// Presence and dedupe state live here and are only touched from
/// [`ScanLoop::run_cycle`]; the radio only fills the observation batch.
use heapless::Vec;

use crate::config::AgentConfig;
use crate::defaults::MAX_DEVICES_PER_CYCLE;
use crate::delivery::{DeliveryClient, DeliveryResult};
use crate::extract::{self, DumpText};
use crate::ota::{FlashSink, UpdateAgent, UpdateOutcome};
use crate::presence::{PresenceEvent, PresenceTracker, Transition};
use crate::protocol::Action;
use crate::scanner::{format_mac, MacString, ObservationBatch, ObservationRecord, Radio};
use crate::transport::{Clock, Reboot, Transport};

/// Addresses already handled in the current scan window.
///
/// Only the first matching advertisement per address is processed. Once the
/// guard is full, further addresses are processed without being recorded.
pub struct CycleGuard {
    seen: Vec<[u8; 6], MAX_DEVICES_PER_CYCLE>,
}

impl CycleGuard {
    pub const fn new() -> Self {
        Self { seen: Vec::new() }
    }

    pub fn reset(&mut self) {
        self.seen.clear();
    }

    /// True the first time `addr` is offered in this cycle
    pub fn first_sighting(&mut self, addr: &[u8; 6]) -> bool {
        if self.seen.contains(addr) {
            return false;
        }
        let _ = self.seen.push(*addr);
        true
    }
}

impl Default for CycleGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters for one cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub observed: u32,
    /// Advertisements lost to a full observation batch
    pub dropped: u32,
    pub matched: u32,
    /// Matching advertisements skipped as repeats of an address
    pub repeats: u32,
    pub entered: u32,
    pub left: u32,
    pub delivered: u32,
    pub suppressed: u32,
    pub failed: u32,
    pub update: Option<UpdateOutcome>,
}

pub struct ScanLoop {
    config: AgentConfig,
    presence: PresenceTracker,
    delivery: DeliveryClient,
    updater: UpdateAgent,
    guard: CycleGuard,
    batch: ObservationBatch,
}

impl ScanLoop {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            presence: PresenceTracker::new(config.presence_timeout_secs),
            delivery: DeliveryClient::new(&config),
            updater: UpdateAgent::new(&config),
            guard: CycleGuard::new(),
            batch: ObservationBatch::new(),
            config,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn updater(&self) -> &UpdateAgent {
        &self.updater
    }

    /// Run one full cycle.
    pub fn run_cycle<R, T, F, C, B>(
        &mut self,
        radio: &mut R,
        transport: &mut T,
        flash: &mut F,
        clock: &mut C,
        reboot: &mut B,
    ) -> CycleReport
    where
        R: Radio,
        T: Transport,
        F: FlashSink,
        C: Clock,
        B: Reboot,
    {
        let mut report = CycleReport::default();

        self.guard.reset();
        self.batch.clear();
        radio.scan(self.config.scan_window_ms, &mut self.batch);
        report.dropped = self.batch.dropped();
        if report.dropped > 0 {
            log::warn!("Observation batch full, dropped {}", report.dropped);
        }

        while let Some(record) = self.batch.pop() {
            report.observed += 1;
            self.handle_observation(&record, transport, clock, &mut report);
        }

        let now = clock.now_secs();
        for event in self.presence.sweep(now) {
            log::info!("{} left", event.identifier);
            report.left += 1;
            self.deliver(&event, transport, clock, &mut report);
        }

        clock.sleep_ms(self.config.post_scan_pause_ms);

        let now = clock.now_secs();
        report.update = Some(self.updater.poll(now, transport, flash, clock, reboot));

        log::info!(
            "Cycle: {} seen, {} matched, {} entered, {} left, {} delivered, {} failed, {} present",
            report.observed,
            report.matched,
            report.entered,
            report.left,
            report.delivered,
            report.failed,
            self.presence.len()
        );
        report
    }

    fn handle_observation<T: Transport, C: Clock>(
        &mut self,
        record: &ObservationRecord,
        transport: &mut T,
        clock: &mut C,
        report: &mut CycleReport,
    ) {
        let extraction = extract::extract(record, self.config.target_signature);
        let Some(source) = extraction.matched else {
            return;
        };
        if !self.guard.first_sighting(&record.addr) {
            report.repeats += 1;
            return;
        }
        report.matched += 1;

        let mut mac = MacString::new();
        format_mac(&record.addr, &mut mac);
        log::info!(
            "Target {} found in {} from {} ({} dBm)",
            self.config.target_signature,
            source.as_str(),
            mac,
            record.rssi
        );
        if log::log_enabled!(log::Level::Debug) {
            let mut dump = DumpText::new();
            extract::describe(record, &mut dump);
            log::debug!("{}", dump);
            for candidate in &extraction.candidates {
                log::debug!(
                    "  {}: {}{}",
                    candidate.field.as_str(),
                    candidate.text,
                    if candidate.is_match { " (match)" } else { "" }
                );
            }
        }
        if extraction.identifiers.is_empty() {
            log::warn!("No identifier in matching advertisement from {}", mac);
        }

        let now = clock.now_secs();
        for id in &extraction.identifiers {
            if let Some(event) = self.presence.observe(id, now) {
                log::info!("{} entered", event.identifier);
                report.entered += 1;
                self.deliver(&event, transport, clock, report);
            }
        }
    }

    /// Send the event and undo membership when it did not reach the server,
    /// so the next sighting reports again.
    fn deliver<T: Transport, C: Clock>(
        &mut self,
        event: &PresenceEvent,
        transport: &mut T,
        clock: &mut C,
        report: &mut CycleReport,
    ) {
        let action = match event.transition {
            Transition::Enter => Action::CheckIn,
            Transition::Leave => Action::CheckOut,
        };
        let result = self
            .delivery
            .send(transport, clock, &event.identifier, action);
        match result {
            DeliveryResult::Delivered { .. } => report.delivered += 1,
            DeliveryResult::Suppressed => report.suppressed += 1,
            DeliveryResult::TransportUnavailable | DeliveryResult::Failed { .. } => {
                report.failed += 1
            }
        }
        if result.needs_rollback() {
            // Departures were already removed by the sweep; forgetting is a
            // no-op for them and the checkout is not retried.
            self.presence.forget(&event.identifier);
            log::warn!(
                "{} for {} not delivered ({:?}), presence rolled back",
                action.as_str(),
                event.identifier,
                result
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hex::Identifier;
    use crate::testing::{FakeClock, FakeFlash, FakeRadio, FakeReboot, ScriptedTransport};

    const BADGE: [u8; 6] = [0x24, 0x0A, 0xC4, 0x01, 0x02, 0x03];
    const PHONE: [u8; 6] = [0x5C, 0xF3, 0x70, 0x0A, 0x0B, 0x0C];

    /// Service data (UUID 0xFEAA) carrying the signature bytes
    fn badge_ad(addr: [u8; 6]) -> ObservationRecord {
        ObservationRecord::parse(
            &addr,
            -60,
            &[0x07, 0x16, 0xAA, 0xFE, 0xD7, 0xE1, 0xA3, 0xF4],
        )
    }

    fn phone_ad() -> ObservationRecord {
        ObservationRecord::parse(&PHONE, -70, b"\x08\x09Pixel 7")
    }

    fn badge_id() -> Identifier {
        Identifier::parse(b"D7E1A3F4").unwrap()
    }

    struct Rig {
        radio: FakeRadio,
        transport: ScriptedTransport,
        flash: FakeFlash,
        clock: FakeClock,
        reboot: FakeReboot,
        scan: ScanLoop,
    }

    impl Rig {
        fn new() -> Self {
            let mut config = AgentConfig::new();
            config.server_host = "http://attend.test";
            // Keep the update agent quiet
            config.current_version = "0.0.0";
            Self {
                radio: FakeRadio::default(),
                transport: ScriptedTransport::connected(),
                flash: FakeFlash::new(),
                clock: FakeClock::at(1000),
                reboot: FakeReboot::default(),
                scan: ScanLoop::new(config),
            }
        }

        fn cycle(&mut self) -> CycleReport {
            self.scan.run_cycle(
                &mut self.radio,
                &mut self.transport,
                &mut self.flash,
                &mut self.clock,
                &mut self.reboot,
            )
        }

        fn detect_bodies(&self) -> std::vec::Vec<&str> {
            self.transport
                .requests
                .iter()
                .filter(|r| r.url.ends_with("/api/esp32/detect"))
                .map(|r| r.body.as_str())
                .collect()
        }
    }

    const CHECKIN: &str = r#"{"hex_value":"D7E1A3F4","action":"checkin"}"#;
    const CHECKOUT: &str = r#"{"hex_value":"D7E1A3F4","action":"checkout"}"#;
    const UP_TO_DATE: &str = r#"{"version":"0.0.0"}"#;

    #[test]
    fn guard_admits_each_address_once() {
        let mut guard = CycleGuard::new();
        assert!(guard.first_sighting(&BADGE));
        assert!(!guard.first_sighting(&BADGE));
        guard.reset();
        assert!(guard.first_sighting(&BADGE));
    }

    #[test]
    fn full_guard_still_admits_new_addresses() {
        let mut guard = CycleGuard::new();
        for i in 0..MAX_DEVICES_PER_CYCLE as u8 {
            assert!(guard.first_sighting(&[i; 6]));
        }
        assert!(guard.first_sighting(&[0xEE; 6]));
        assert!(guard.first_sighting(&[0xEE; 6]));
    }

    #[test]
    fn badge_checks_in_once() {
        let mut rig = Rig::new();
        rig.radio
            .push_window(vec![badge_ad(BADGE), phone_ad(), badge_ad(BADGE)])
            .push_window(vec![badge_ad(BADGE)]);
        rig.transport
            .reply(200, r#"{"success":true}"#)
            .reply(200, UP_TO_DATE);

        let report = rig.cycle();
        assert_eq!(report.observed, 3);
        assert_eq!(report.matched, 1);
        assert_eq!(report.repeats, 1);
        assert_eq!(report.entered, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.update, Some(UpdateOutcome::UpToDate));
        assert!(rig.scan.presence().is_present(&badge_id()));

        // Still present: no new event
        let report = rig.cycle();
        assert_eq!(report.entered, 0);
        assert_eq!(report.update, Some(UpdateOutcome::NotDue));
        assert_eq!(rig.detect_bodies(), [CHECKIN]);
    }

    #[test]
    fn cycle_order_and_timing() {
        let mut rig = Rig::new();
        rig.transport.reply(200, UP_TO_DATE);

        rig.cycle();
        assert_eq!(rig.radio.scans, [rig.scan.config().scan_window_ms]);
        assert_eq!(rig.clock.sleeps, [rig.scan.config().post_scan_pause_ms]);
        assert!(rig.transport.requests[0].url.ends_with("/api/ota/manifest"));
    }

    #[test]
    fn departure_checks_out() {
        let mut rig = Rig::new();
        rig.radio.push_window(vec![badge_ad(BADGE)]);
        rig.transport
            .reply(200, r#"{"success":true}"#)
            .reply(200, UP_TO_DATE)
            .reply(200, r#"{"success":true}"#);

        rig.cycle();
        // Silent windows until the timeout passes
        let mut left = 0;
        for _ in 0..8 {
            left += rig.cycle().left;
        }
        assert_eq!(left, 1);
        assert!(!rig.scan.presence().is_present(&badge_id()));
        assert_eq!(rig.detect_bodies(), [CHECKIN, CHECKOUT]);
    }

    #[test]
    fn failed_checkout_is_not_retried_and_next_sighting_reenters() {
        let mut rig = Rig::new();
        rig.radio.push_window(vec![badge_ad(BADGE)]);
        rig.transport
            .reply(200, r#"{"success":true}"#)
            .reply(200, UP_TO_DATE)
            .reply(500, "")
            .reply(500, "")
            .reply(500, "")
            .reply(200, r#"{"success":true}"#);

        rig.cycle();
        let mut departure = CycleReport::default();
        for _ in 0..8 {
            let report = rig.cycle();
            if report.left > 0 {
                departure = report;
            }
        }
        assert_eq!(departure.left, 1);
        assert_eq!(departure.failed, 1);
        assert!(!rig.scan.presence().is_present(&badge_id()));

        // Gone for good: the failed checkout is not sent again
        let report = rig.cycle();
        assert_eq!(report.left, 0);
        assert_eq!(rig.detect_bodies(), [CHECKIN, CHECKOUT, CHECKOUT, CHECKOUT]);

        rig.clock.advance(rig.scan.config().seen_ttl_secs);
        rig.radio.push_window(vec![badge_ad(BADGE)]);
        let report = rig.cycle();
        assert_eq!(report.entered, 1);
        assert_eq!(report.delivered, 1);
        assert!(rig.scan.presence().is_present(&badge_id()));
        assert_eq!(
            rig.detect_bodies(),
            [CHECKIN, CHECKOUT, CHECKOUT, CHECKOUT, CHECKIN]
        );
    }

    #[test]
    fn failed_checkin_rolls_back_and_reenters() {
        let mut rig = Rig::new();
        rig.radio
            .push_window(vec![badge_ad(BADGE)])
            .push_window(vec![badge_ad(BADGE)])
            .push_window(vec![badge_ad(BADGE)]);
        rig.transport
            .reply(500, "")
            .reply(500, "")
            .reply(500, "")
            .reply(200, UP_TO_DATE);

        let report = rig.cycle();
        assert_eq!(report.entered, 1);
        assert_eq!(report.failed, 1);
        assert!(!rig.scan.presence().is_present(&badge_id()));

        // Next cycle is within the seen-TTL: fresh Enter, send suppressed
        let report = rig.cycle();
        assert_eq!(report.entered, 1);
        assert_eq!(report.suppressed, 1);
        assert!(rig.scan.presence().is_present(&badge_id()));
        assert_eq!(rig.detect_bodies().len(), 3);
    }

    #[test]
    fn failed_checkin_retries_after_ttl() {
        let mut rig = Rig::new();
        rig.radio
            .push_window(vec![badge_ad(BADGE)])
            .push_window(vec![badge_ad(BADGE)]);
        rig.transport
            .reply(500, "")
            .reply(500, "")
            .reply(500, "")
            .reply(200, UP_TO_DATE)
            .reply(200, r#"{"success":true}"#);

        rig.cycle();
        rig.clock.advance(rig.scan.config().seen_ttl_secs);
        let report = rig.cycle();
        assert_eq!(report.entered, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(rig.detect_bodies(), [CHECKIN, CHECKIN, CHECKIN, CHECKIN]);
    }

    #[test]
    fn offline_checkin_rolls_back() {
        let mut rig = Rig::new();
        rig.radio.push_window(vec![badge_ad(BADGE)]);
        rig.transport.set_connected(false);

        let report = rig.cycle();
        assert_eq!(report.entered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.update, Some(UpdateOutcome::NotDue));
        assert!(rig.transport.requests.is_empty());
        assert!(!rig.scan.presence().is_present(&badge_id()));
    }

    #[test]
    fn non_matching_traffic_is_ignored() {
        let mut rig = Rig::new();
        rig.radio.push_window(vec![phone_ad(), phone_ad()]);
        rig.transport.reply(200, UP_TO_DATE);

        let report = rig.cycle();
        assert_eq!(report.observed, 2);
        assert_eq!(report.matched, 0);
        assert!(rig.scan.presence().is_empty());
        assert!(rig.detect_bodies().is_empty());
    }
}
