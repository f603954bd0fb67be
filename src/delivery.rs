/// Reliable delivery of presence events to the server.
///
/// Each send is deduplicated per identifier: an attempt started within the
/// seen-TTL suppresses the next one regardless of how the first ended. The
/// attempt timestamp is recorded before any network activity. Within one
/// send, up to `max_retries` attempts are made with a fixed back-off while
/// offline and a linear back-off after failed requests.
use heapless::index_map::FnvIndexMap;

use crate::config::AgentConfig;
use crate::defaults::MAX_DEDUPE_ENTRIES;
use crate::error::Error;
use crate::hex::Identifier;
use crate::protocol::{
    self, encode_detect_request, is_deduped_body, is_success_body, Action, Url, MAX_REQUEST_LEN,
    MAX_RESPONSE_LEN,
};
use crate::transport::{Clock, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryResult {
    /// Server confirmed the event; `deduped` when it already had it
    Delivered { attempts: u8, deduped: bool },
    /// An attempt for this identifier started within the seen-TTL
    Suppressed,
    /// No network on the final attempt
    TransportUnavailable,
    /// Every attempt got an error response or failed outright
    Failed { last_error: Error },
}

impl DeliveryResult {
    /// Whether presence membership has to be rolled back so the next
    /// sighting reports again
    pub fn needs_rollback(&self) -> bool {
        matches!(
            self,
            DeliveryResult::TransportUnavailable | DeliveryResult::Failed { .. }
        )
    }
}

pub struct DeliveryClient {
    detect_url: Url,
    /// identifier -> time the last attempt started (seconds)
    last_sent: FnvIndexMap<Identifier, u32, MAX_DEDUPE_ENTRIES>,
    seen_ttl_secs: u32,
    max_retries: u8,
    disconnected_backoff_ms: u32,
    retry_backoff_step_ms: u32,
}

impl DeliveryClient {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            detect_url: protocol::detect_url(config.server_host),
            last_sent: FnvIndexMap::new(),
            seen_ttl_secs: config.seen_ttl_secs,
            max_retries: config.max_retries,
            disconnected_backoff_ms: config.disconnected_backoff_ms,
            retry_backoff_step_ms: config.retry_backoff_step_ms,
        }
    }

    /// Whether a send for `id` at `now` would be suppressed
    pub fn is_suppressed(&self, id: &Identifier, now: u32) -> bool {
        self.last_sent
            .get(id)
            .is_some_and(|&sent| now.saturating_sub(sent) < self.seen_ttl_secs)
    }

    /// Report `action` for `id`, retrying as configured.
    pub fn send<T: Transport, C: Clock>(
        &mut self,
        transport: &mut T,
        clock: &mut C,
        id: &Identifier,
        action: Action,
    ) -> DeliveryResult {
        let now = clock.now_secs();
        if self.is_suppressed(id, now) {
            log::debug!(
                "Suppressing {} for {}: sent less than {}s ago",
                action.as_str(),
                id,
                self.seen_ttl_secs
            );
            return DeliveryResult::Suppressed;
        }
        if !self.record_attempt(id, now) {
            log::warn!(
                "Suppressing {} for {}: dedupe table full of live entries",
                action.as_str(),
                id
            );
            return DeliveryResult::Suppressed;
        }

        let mut body = [0u8; MAX_REQUEST_LEN];
        let Some(body_len) = encode_detect_request(id.as_str(), action, &mut body) else {
            log::error!("Detect request for {} does not fit the body buffer", id);
            return DeliveryResult::Failed {
                last_error: Error::ServerError { status: None },
            };
        };
        let body = &body[..body_len];

        let mut response = [0u8; MAX_RESPONSE_LEN];
        let mut last_error = Error::TransportUnavailable;

        for attempt in 1..=self.max_retries {
            if !transport.is_connected() {
                log::warn!(
                    "{} {} attempt {}/{}: not connected",
                    action.as_str(),
                    id,
                    attempt,
                    self.max_retries
                );
                last_error = Error::TransportUnavailable;
                clock.sleep_ms(self.disconnected_backoff_ms);
                continue;
            }

            match transport.post_json(&self.detect_url, body, &mut response) {
                Ok(reply) => {
                    let reply_body = &response[..reply.len];
                    if matches!(reply.status, 200 | 201) && is_success_body(reply_body) {
                        let deduped = is_deduped_body(reply_body);
                        log::info!(
                            "{} {} delivered (status {}{})",
                            action.as_str(),
                            id,
                            reply.status,
                            if deduped { ", deduped" } else { "" }
                        );
                        return DeliveryResult::Delivered {
                            attempts: attempt,
                            deduped,
                        };
                    }
                    log::warn!(
                        "{} {} attempt {}/{}: status {}",
                        action.as_str(),
                        id,
                        attempt,
                        self.max_retries,
                        reply.status
                    );
                    if let Ok(text) = core::str::from_utf8(reply_body) {
                        log::debug!("Response body: {}", text);
                    }
                    last_error = Error::ServerError {
                        status: Some(reply.status),
                    };
                }
                Err(e) => {
                    log::warn!(
                        "{} {} attempt {}/{}: request failed: {:?}",
                        action.as_str(),
                        id,
                        attempt,
                        self.max_retries,
                        e
                    );
                    last_error = Error::ServerError { status: None };
                }
            }

            if attempt < self.max_retries {
                clock.sleep_ms(self.retry_backoff_step_ms.saturating_mul(u32::from(attempt)));
            }
        }

        log::error!(
            "{} {} failed after {} attempts: {}",
            action.as_str(),
            id,
            self.max_retries,
            last_error
        );
        match last_error {
            Error::TransportUnavailable => DeliveryResult::TransportUnavailable,
            last_error => DeliveryResult::Failed { last_error },
        }
    }

    /// Record an attempt start. Returns false when the table is full and
    /// every entry is still inside the seen-TTL; live entries are never
    /// evicted.
    fn record_attempt(&mut self, id: &Identifier, now: u32) -> bool {
        if let Some(sent) = self.last_sent.get_mut(id) {
            *sent = now;
            return true;
        }
        if self.last_sent.len() == MAX_DEDUPE_ENTRIES {
            let ttl = self.seen_ttl_secs;
            let expired = self
                .last_sent
                .iter()
                .filter(|&(_, &sent)| now.saturating_sub(sent) >= ttl)
                .min_by_key(|&(_, &sent)| sent)
                .map(|(id, _)| id.clone());
            match expired {
                Some(expired) => {
                    self.last_sent.remove(&expired);
                }
                None => return false,
            }
        }
        self.last_sent.insert(id.clone(), now).is_ok()
    }
}
