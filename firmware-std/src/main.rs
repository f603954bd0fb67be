//! AutoAttend ESP-IDF std firmware
//!
//! Single-threaded scan loop: NimBLE scanning, HTTP reporting over station
//! Wi-Fi and OTA updates through the ESP-IDF partition API. All presence,
//! dedupe and update logic lives in the `autoattend` library; this binary
//! only provides the platform pieces.

mod flash;
mod net;
mod radio;

use std::thread;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use embedded_svc::wifi::{AuthMethod, ClientConfiguration, Configuration};
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{BlockingWifi, EspWifi};

use autoattend::agent::ScanLoop;
use autoattend::config::AgentConfig;
use autoattend::protocol::VERSION;
use autoattend::transport::{Clock, Reboot};

use flash::EspFlash;
use net::EspTransport;
use radio::NimbleRadio;

// ── Build-time configuration ─────────────────────────────────────────

const WIFI_SSID: &str = match option_env!("AUTOATTEND_WIFI_SSID") {
    Some(ssid) => ssid,
    None => "",
};
const WIFI_PASS: &str = match option_env!("AUTOATTEND_WIFI_PASS") {
    Some(pass) => pass,
    None => "",
};
const WIFI_CONNECT_ATTEMPTS: u32 = 5;

fn agent_config() -> AgentConfig {
    let mut config = AgentConfig::new();
    if let Some(host) = option_env!("AUTOATTEND_SERVER_HOST") {
        config.server_host = host;
    }
    if let Some(target) = option_env!("AUTOATTEND_TARGET") {
        config.target_signature = target;
    }
    config
}

// ── Platform services ────────────────────────────────────────────────

struct SystemClock {
    boot: Instant,
}

impl Clock for SystemClock {
    fn now_secs(&self) -> u32 {
        self.boot.elapsed().as_secs() as u32
    }

    fn sleep_ms(&mut self, ms: u32) {
        thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}

struct SystemReboot;

impl Reboot for SystemReboot {
    fn restart(&mut self) {
        log::info!("Restarting");
        unsafe { esp_idf_svc::sys::esp_restart() };
    }
}

fn main() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    // Bind the ESP-IDF logger to the `log` facade
    esp_idf_svc::log::EspLogger::initialize_default();

    let config = agent_config();
    config
        .validate()
        .map_err(|e| anyhow!("{e}"))?;
    log::info!(
        "AutoAttend v{} starting, target {}, server {}",
        VERSION,
        config.target_signature,
        config.server_host
    );

    // ── Firmware slot ────────────────────────────────────────────────

    let mut flash = EspFlash::new()?;
    flash.mark_running_valid();

    // ── Wi-Fi ────────────────────────────────────────────────────────

    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    let mut wifi = BlockingWifi::wrap(
        EspWifi::new(peripherals.modem, sys_loop.clone(), Some(nvs))?,
        sys_loop,
    )?;
    let auth_method = if WIFI_PASS.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };
    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: WIFI_SSID
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: WIFI_PASS
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;
    wifi.start()?;
    log::info!("Wi-Fi started, connecting to '{}'", WIFI_SSID);

    for attempt in 1..=WIFI_CONNECT_ATTEMPTS {
        match wifi.connect().and_then(|_| wifi.wait_netif_up()) {
            Ok(()) => {
                log::info!("Wi-Fi connected on attempt {}", attempt);
                break;
            }
            Err(e) => log::warn!(
                "Wi-Fi connect attempt {}/{} failed: {:?}",
                attempt,
                WIFI_CONNECT_ATTEMPTS,
                e
            ),
        }
    }

    // ── Scan loop ────────────────────────────────────────────────────

    let mut transport = EspTransport::new(wifi);
    let mut radio = NimbleRadio::new(config.target_signature);
    let mut clock = SystemClock {
        boot: Instant::now(),
    };
    let mut reboot = SystemReboot;
    let mut scan_loop = Box::new(ScanLoop::new(config));

    log::info!("Scanning");
    loop {
        transport.ensure_connected();
        let report = scan_loop.run_cycle(
            &mut radio,
            &mut transport,
            &mut flash,
            &mut clock,
            &mut reboot,
        );
        log::debug!("{:?}", report);
    }
}
