//! Key layout.
//!
//! Every key of an event carries the `{eventId}` hash tag, so one event's
//! keys live in one cluster slot and a single script can touch all of them.
//!
//! | Key                          | Type       | Score / value            |
//! |------------------------------|------------|--------------------------|
//! | `queue:{e}:waiting`          | sorted set | join sequence            |
//! | `queue:{e}:waiting_since`    | sorted set | join time (ms)           |
//! | `queue:{e}:active`           | sorted set | reservation expiry (ms)  |
//! | `queue:{e}:seq`              | string     | last join sequence       |
//! | `queue:{e}:config`           | hash       | `QueueConfig` fields     |
//! | `queue:configured`           | set        | event ids with a config  |

use purchase_queue_core::EventId;

/// Set of event ids that have a config.
pub const CONFIGURED_EVENTS: &str = "queue:configured";

/// All keys belonging to one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventKeys {
    /// Wait line scored by join sequence.
    pub waiting: String,
    /// Join timestamps, used only for the queue timeout.
    pub waiting_since: String,
    /// Slot holders scored by reservation expiry.
    pub active: String,
    /// Join sequence counter.
    pub seq: String,
    /// Config hash.
    pub config: String,
}

impl EventKeys {
    /// Keys for `event_id`.
    #[must_use]
    pub fn new(event_id: &EventId) -> Self {
        let prefix = format!("queue:{{{event_id}}}");
        Self {
            waiting: format!("{prefix}:waiting"),
            waiting_since: format!("{prefix}:waiting_since"),
            active: format!("{prefix}:active"),
            seq: format!("{prefix}:seq"),
            config: format!("{prefix}:config"),
        }
    }

    /// Keys in the order the admission scripts expect them.
    #[must_use]
    pub fn script_keys(&self) -> [&str; 4] {
        [&self.waiting, &self.waiting_since, &self.active, &self.seq]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_share_hash_tag() {
        let keys = EventKeys::new(&EventId::new("concert-42"));
        assert_eq!(keys.waiting, "queue:{concert-42}:waiting");
        assert_eq!(keys.active, "queue:{concert-42}:active");
        assert_eq!(keys.config, "queue:{concert-42}:config");
        for key in keys.script_keys() {
            assert!(key.starts_with("queue:{concert-42}:"));
        }
    }
}
