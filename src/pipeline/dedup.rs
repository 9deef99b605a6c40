use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::RwLock;

use crate::models::Signal;

/// Time-windowed duplicate detector keyed by signal fingerprint.
///
/// The fingerprint combines symbol, direction and timeframe with a content
/// hash of the raw payload, so two genuinely different signals that happen to
/// share the field triple never collide (a false positive here would drop a
/// real signal). `serde_json` serializes object keys in sorted order, which
/// makes the content hash insensitive to key ordering in the source payload.
///
/// `is_duplicate` is check-and-record: the first sighting of a fingerprint
/// registers it and answers false; any repeat within the window answers true.
/// Expired entries are swept on a window cadence so the map never grows
/// unbounded. Interior locking makes a shared reference safe across
/// concurrent pipeline invocations.
pub struct DeduplicationCache {
    window: Duration,
    inner: RwLock<Inner>,
}

struct Inner {
    seen: HashMap<String, DateTime<Utc>>,
    last_sweep: DateTime<Utc>,
}

impl DeduplicationCache {
    pub fn new(window_secs: u64) -> Self {
        Self {
            window: Duration::seconds(window_secs as i64),
            inner: RwLock::new(Inner {
                seen: HashMap::new(),
                last_sweep: Utc::now(),
            }),
        }
    }

    pub fn window_secs(&self) -> i64 {
        self.window.num_seconds()
    }

    pub fn fingerprint(signal: &Signal, raw: &Value) -> String {
        let mut hasher = DefaultHasher::new();
        raw.to_string().hash(&mut hasher);

        format!(
            "{}|{}|{}|{:016x}",
            signal.symbol,
            signal.direction.as_str(),
            signal.timeframe,
            hasher.finish()
        )
    }

    pub fn is_duplicate(&self, signal: &Signal, raw: &Value) -> bool {
        self.is_duplicate_at(signal, raw, Utc::now())
    }

    /// Check with an explicit clock (tests exercise window edges with this)
    pub fn is_duplicate_at(&self, signal: &Signal, raw: &Value, now: DateTime<Utc>) -> bool {
        let fingerprint = Self::fingerprint(signal, raw);
        let mut inner = match self.inner.write() {
            Ok(guard) => guard,
            // A poisoned lock means a panic elsewhere; treat as not-duplicate
            // (false negatives are safe, false positives are not)
            Err(_) => return false,
        };

        if now - inner.last_sweep > self.window {
            let window = self.window;
            inner.seen.retain(|_, first_seen| now - *first_seen <= window);
            inner.last_sweep = now;
        }

        match inner.seen.get(&fingerprint) {
            Some(first_seen) if now - *first_seen < self.window => true,
            _ => {
                inner.seen.insert(fingerprint, now);
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.seen.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, SignalSource};
    use serde_json::json;
    use uuid::Uuid;

    fn test_signal(symbol: &str, direction: Direction, timeframe: &str) -> Signal {
        Signal {
            id: Uuid::new_v4(),
            source: SignalSource::Tradingview,
            symbol: symbol.to_string(),
            direction,
            timeframe: timeframe.to_string(),
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_repeat_within_window_is_duplicate() {
        let cache = DeduplicationCache::new(300);
        let signal = test_signal("SPY", Direction::Call, "5m");
        let raw = json!({"symbol": "SPY", "action": "BUY", "timeframe": "5m"});

        assert!(!cache.is_duplicate(&signal, &raw));
        assert!(cache.is_duplicate(&signal, &raw));
    }

    #[test]
    fn test_different_payload_same_triple_is_not_duplicate() {
        let cache = DeduplicationCache::new(300);
        let signal = test_signal("SPY", Direction::Call, "5m");
        let raw_a = json!({"symbol": "SPY", "action": "BUY", "timeframe": "5m", "price": 510.0});
        let raw_b = json!({"symbol": "SPY", "action": "BUY", "timeframe": "5m", "price": 511.0});

        assert!(!cache.is_duplicate(&signal, &raw_a));
        assert!(!cache.is_duplicate(&signal, &raw_b));
    }

    #[test]
    fn test_key_order_does_not_defeat_detection() {
        let cache = DeduplicationCache::new(300);
        let signal = test_signal("SPY", Direction::Call, "5m");
        let raw_a = json!({"symbol": "SPY", "action": "BUY", "timeframe": "5m"});
        let raw_b = json!({"timeframe": "5m", "action": "BUY", "symbol": "SPY"});

        assert!(!cache.is_duplicate(&signal, &raw_a));
        assert!(cache.is_duplicate(&signal, &raw_b));
    }

    #[test]
    fn test_expired_entry_is_new_again() {
        let cache = DeduplicationCache::new(300);
        let signal = test_signal("SPY", Direction::Call, "5m");
        let raw = json!({"symbol": "SPY", "action": "BUY", "timeframe": "5m"});

        let t0 = Utc::now();
        assert!(!cache.is_duplicate_at(&signal, &raw, t0));
        assert!(cache.is_duplicate_at(&signal, &raw, t0 + Duration::seconds(299)));
        assert!(!cache.is_duplicate_at(&signal, &raw, t0 + Duration::seconds(601)));
    }

    #[test]
    fn test_sweep_evicts_expired_entries() {
        let cache = DeduplicationCache::new(300);
        let raw = json!({});
        let t0 = Utc::now();

        for symbol in ["SPY", "QQQ", "IWM"] {
            let signal = test_signal(symbol, Direction::Put, "5m");
            cache.is_duplicate_at(&signal, &raw, t0);
        }
        assert_eq!(cache.len(), 3);

        // A later check past the window triggers the sweep
        let late = test_signal("TLT", Direction::Call, "1h");
        cache.is_duplicate_at(&late, &raw, t0 + Duration::seconds(700));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_fingerprint_distinguishes_direction_and_timeframe() {
        let raw = json!({});
        let call_5m = test_signal("SPY", Direction::Call, "5m");
        let put_5m = test_signal("SPY", Direction::Put, "5m");
        let call_1h = test_signal("SPY", Direction::Call, "1h");

        let fp_call = DeduplicationCache::fingerprint(&call_5m, &raw);
        assert_ne!(fp_call, DeduplicationCache::fingerprint(&put_5m, &raw));
        assert_ne!(fp_call, DeduplicationCache::fingerprint(&call_1h, &raw));
    }
}
