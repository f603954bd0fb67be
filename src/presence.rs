/// Presence tracking: turns repeated identifier sightings into a clean
/// enter/leave event stream.
///
/// An identifier is *present* from its first sighting until it has been
/// silent for longer than the presence timeout. `observe` only reports the
/// absent → present edge; `sweep` reports present → absent.
use heapless::index_map::FnvIndexMap;
use heapless::Vec;

use crate::defaults::MAX_PRESENT;
use crate::hex::Identifier;

/// Direction of a presence transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Enter,
    Leave,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEvent {
    pub identifier: Identifier,
    pub transition: Transition,
}

pub struct PresenceTracker {
    /// identifier -> last seen (seconds)
    present: FnvIndexMap<Identifier, u32, MAX_PRESENT>,
    timeout_secs: u32,
}

impl PresenceTracker {
    pub fn new(timeout_secs: u32) -> Self {
        Self {
            present: FnvIndexMap::new(),
            timeout_secs,
        }
    }

    /// Record a sighting at `now`. Returns an `Enter` event when the identifier
    /// was not present before.
    ///
    /// When the tracker is full a new identifier is not tracked and no event is
    /// produced; it gets another chance once a slot frees up.
    pub fn observe(&mut self, id: &Identifier, now: u32) -> Option<PresenceEvent> {
        if let Some(last_seen) = self.present.get_mut(id) {
            *last_seen = now;
            return None;
        }

        if self.present.insert(id.clone(), now).is_err() {
            log::warn!(
                "Presence table full ({} entries), not tracking {}",
                MAX_PRESENT,
                id
            );
            return None;
        }

        Some(PresenceEvent {
            identifier: id.clone(),
            transition: Transition::Enter,
        })
    }

    /// Remove every identifier silent for longer than the timeout and return a
    /// `Leave` event for each.
    pub fn sweep(&mut self, now: u32) -> Vec<PresenceEvent, MAX_PRESENT> {
        let mut expired: Vec<Identifier, MAX_PRESENT> = Vec::new();
        for (id, &last_seen) in self.present.iter() {
            if now.saturating_sub(last_seen) > self.timeout_secs {
                let _ = expired.push(id.clone());
            }
        }

        let mut events = Vec::new();
        for id in expired {
            self.present.remove(&id);
            let _ = events.push(PresenceEvent {
                identifier: id,
                transition: Transition::Leave,
            });
        }
        events
    }

    /// Drop membership without emitting an event, so the next sighting
    /// produces a fresh `Enter`. Returns whether the identifier was present.
    pub fn forget(&mut self, id: &Identifier) -> bool {
        self.present.remove(id).is_some()
    }

    pub fn is_present(&self, id: &Identifier) -> bool {
        self.present.contains_key(id)
    }

    pub fn last_seen(&self, id: &Identifier) -> Option<u32> {
        self.present.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.present.len()
    }

    pub fn is_empty(&self) -> bool {
        self.present.is_empty()
    }
}
