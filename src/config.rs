/// Runtime configuration for the scan loop.
///
/// Mirrors the compiled-in [`defaults`](crate::defaults); the firmware
/// overrides the deployment-specific fields before handing it to
/// [`ScanLoop`](crate::agent::ScanLoop).
use crate::defaults;
use crate::error::Error;
use crate::protocol::VERSION;

#[derive(Debug, Clone, Copy)]
pub struct AgentConfig {
    /// Signature searched for in every advertisement (case-insensitive)
    pub target_signature: &'static str,
    /// Base URL of the server, without trailing slash
    pub server_host: &'static str,
    /// Version string of the running firmware, compared verbatim with the manifest
    pub current_version: &'static str,

    pub presence_timeout_secs: u32,
    pub seen_ttl_secs: u32,
    pub max_retries: u8,
    pub disconnected_backoff_ms: u32,
    pub retry_backoff_step_ms: u32,

    pub scan_window_ms: u32,
    pub post_scan_pause_ms: u32,

    pub update_interval_secs: u32,
}

impl AgentConfig {
    pub const fn new() -> Self {
        Self {
            target_signature: defaults::TARGET_SIGNATURE,
            server_host: defaults::SERVER_HOST,
            current_version: VERSION,
            presence_timeout_secs: defaults::PRESENCE_TIMEOUT_SECONDS,
            seen_ttl_secs: defaults::SEEN_TTL_SECONDS,
            max_retries: defaults::MAX_RETRIES,
            disconnected_backoff_ms: defaults::DISCONNECTED_BACKOFF_MS,
            retry_backoff_step_ms: defaults::RETRY_BACKOFF_STEP_MS,
            scan_window_ms: defaults::SCAN_WINDOW_MS,
            post_scan_pause_ms: defaults::POST_SCAN_PAUSE_MS,
            update_interval_secs: defaults::UPDATE_INTERVAL_SECONDS,
        }
    }

    /// Nominal duration of one scan cycle, excluding network time.
    pub const fn cycle_period_ms(&self) -> u32 {
        self.scan_window_ms.saturating_add(self.post_scan_pause_ms)
    }

    /// Reject configurations that would make every present device flap or
    /// never deliver anything.
    pub fn validate(&self) -> Result<(), Error> {
        if self.target_signature.is_empty() {
            return Err(Error::InvalidConfig("empty target signature"));
        }
        if self.server_host.is_empty() {
            return Err(Error::InvalidConfig("empty server host"));
        }
        if self.max_retries == 0 {
            return Err(Error::InvalidConfig("max_retries must be at least 1"));
        }
        // Compare in milliseconds so a 5.5 s cycle against a 5 s timeout fails.
        let timeout_ms = u64::from(self.presence_timeout_secs) * 1000;
        if timeout_ms <= u64::from(self.cycle_period_ms()) {
            return Err(Error::InvalidConfig(
                "presence timeout must exceed one scan cycle",
            ));
        }
        Ok(())
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AgentConfig::new();
        assert_eq!(config.cycle_period_ms(), 6000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn timeout_equal_to_cycle_is_rejected() {
        let config = AgentConfig {
            presence_timeout_secs: 6,
            ..AgentConfig::new()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn timeout_shorter_than_fractional_cycle_is_rejected() {
        let config = AgentConfig {
            presence_timeout_secs: 5,
            scan_window_ms: 1500,
            post_scan_pause_ms: 4000,
            ..AgentConfig::new()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_retries_rejected() {
        let config = AgentConfig {
            max_retries: 0,
            ..AgentConfig::new()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_signature_rejected() {
        let config = AgentConfig {
            target_signature: "",
            ..AgentConfig::new()
        };
        assert!(config.validate().is_err());
    }
}
