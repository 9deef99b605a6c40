use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Direction, Signal, SignalSource};

/// Ordered fallback lists per canonical field. First present field wins.
const SYMBOL_FIELDS: &[&str] = &["symbol", "ticker", "underlying"];
const DIRECTION_FIELDS: &[&str] = &["direction", "action", "side", "signal", "type", "option_type"];
const TIMEFRAME_FIELDS: &[&str] = &["timeframe", "interval", "tf", "resolution"];
const TIMESTAMP_FIELDS: &[&str] = &["timestamp", "time", "triggered_at", "bar_time"];
const SOURCE_FIELDS: &[&str] = &["source", "origin"];

/// TradingView-style interval aliases -> canonical timeframe strings
const TIMEFRAME_ALIASES: &[(&str, &str)] = &[
    ("1", "1m"),
    ("3", "3m"),
    ("5", "5m"),
    ("15", "15m"),
    ("30", "30m"),
    ("45", "45m"),
    ("60", "1h"),
    ("120", "2h"),
    ("240", "4h"),
    ("1min", "1m"),
    ("5min", "5m"),
    ("15min", "15m"),
    ("30min", "30m"),
    ("1hour", "1h"),
    ("4hour", "4h"),
    ("d", "1d"),
    ("day", "1d"),
    ("daily", "1d"),
    ("w", "1w"),
    ("week", "1w"),
    ("weekly", "1w"),
];

#[derive(Debug, Error)]
pub enum NormalizationError {
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("no recognizable symbol field in payload")]
    MissingSymbol,
    #[error("no recognizable direction field in payload")]
    MissingDirection,
    #[error("unrecognized direction value: {0:?}")]
    UnknownDirection(String),
    #[error("no recognizable timeframe field in payload")]
    MissingTimeframe,
}

/// Converts heterogeneous raw payloads into canonical `Signal`s.
///
/// Symbol, direction and timeframe are required; a signal is never dropped
/// for a malformed timestamp (ingestion time is substituted) or for unknown
/// extra fields (they ride along in `metadata`).
#[derive(Debug, Default)]
pub struct SignalNormalizer;

impl SignalNormalizer {
    pub fn new() -> Self {
        Self
    }

    pub fn normalize(&self, raw: &Value) -> Result<Signal, NormalizationError> {
        let obj = raw.as_object().ok_or(NormalizationError::NotAnObject)?;

        let symbol_raw = resolve_field(obj, SYMBOL_FIELDS).ok_or(NormalizationError::MissingSymbol)?;
        let symbol = normalize_symbol(&symbol_raw);
        if symbol.is_empty() {
            return Err(NormalizationError::MissingSymbol);
        }

        let direction = resolve_direction(obj)?;

        let timeframe_raw =
            resolve_field(obj, TIMEFRAME_FIELDS).ok_or(NormalizationError::MissingTimeframe)?;
        let timeframe = normalize_timeframe(&timeframe_raw);

        let timestamp = resolve_field(obj, TIMESTAMP_FIELDS)
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now);

        let source = resolve_field(obj, SOURCE_FIELDS)
            .as_deref()
            .and_then(SignalSource::parse)
            .unwrap_or(SignalSource::Tradingview);

        // Everything outside the alias tables is preserved verbatim
        let metadata: Map<String, Value> = obj
            .iter()
            .filter(|(key, _)| !is_canonical_field(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok(Signal {
            id: Uuid::new_v4(),
            source,
            symbol,
            direction,
            timeframe,
            timestamp,
            metadata,
        })
    }
}

fn is_canonical_field(key: &str) -> bool {
    SYMBOL_FIELDS.contains(&key)
        || DIRECTION_FIELDS.contains(&key)
        || TIMEFRAME_FIELDS.contains(&key)
        || TIMESTAMP_FIELDS.contains(&key)
        || SOURCE_FIELDS.contains(&key)
}

/// First present field from the fallback list, as a string. Numbers are
/// accepted (TradingView sends intervals as bare numbers).
fn resolve_field(obj: &Map<String, Value>, fields: &[&str]) -> Option<String> {
    for field in fields {
        match obj.get(*field) {
            Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => continue,
        }
    }
    None
}

/// Uppercase, strip `EXCHANGE:` prefixes and `.SUFFIX` extensions
fn normalize_symbol(raw: &str) -> String {
    let upper = raw.trim().to_uppercase();
    let without_prefix = upper.rsplit(':').next().unwrap_or(&upper);
    let without_suffix = without_prefix.split('.').next().unwrap_or(without_prefix);
    without_suffix.to_string()
}

/// Scan direction fields in order until one value resolves.
fn resolve_direction(obj: &Map<String, Value>) -> Result<Direction, NormalizationError> {
    let mut first_seen: Option<String> = None;

    for field in DIRECTION_FIELDS {
        if let Some(value) = obj.get(*field).and_then(Value::as_str) {
            if let Some(direction) = parse_direction(value) {
                return Ok(direction);
            }
            first_seen.get_or_insert_with(|| value.to_string());
        }
    }

    match first_seen {
        Some(value) => Err(NormalizationError::UnknownDirection(value)),
        None => Err(NormalizationError::MissingDirection),
    }
}

fn parse_direction(raw: &str) -> Option<Direction> {
    let upper = raw.trim().to_uppercase();

    match upper.as_str() {
        "CALL" | "BUY" | "LONG" | "C" => return Some(Direction::Call),
        "PUT" | "SELL" | "SHORT" | "P" => return Some(Direction::Put),
        _ => {}
    }

    // Substring inference, checked in a fixed order
    if upper.contains("CALL") || upper.contains("LONG") {
        Some(Direction::Call)
    } else if upper.contains("PUT") || upper.contains("SHORT") {
        Some(Direction::Put)
    } else {
        None
    }
}

/// Lowercase + alias lookup; unknown values pass through unchanged so
/// forward-compatible timeframes are tolerated
fn normalize_timeframe(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();
    for (alias, canonical) in TIMEFRAME_ALIASES {
        if lower == *alias {
            return canonical.to_string();
        }
    }
    lower
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    // Epoch seconds or milliseconds
    if let Ok(epoch) = raw.parse::<i64>() {
        let secs = if epoch > 10_000_000_000 { epoch / 1000 } else { epoch };
        return DateTime::from_timestamp(secs, 0);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalize(raw: Value) -> Result<Signal, NormalizationError> {
        SignalNormalizer::new().normalize(&raw)
    }

    #[test]
    fn test_tradingview_style_payload() {
        let signal = normalize(json!({
            "symbol": "SPY",
            "action": "BUY",
            "type": "CALL",
            "timeframe": "5m"
        }))
        .unwrap();

        assert_eq!(signal.symbol, "SPY");
        assert_eq!(signal.direction, Direction::Call);
        assert_eq!(signal.timeframe, "5m");
        assert_eq!(signal.source, SignalSource::Tradingview);
    }

    #[test]
    fn test_symbol_prefix_and_suffix_stripped() {
        let signal = normalize(json!({
            "ticker": "nasdaq:qqq.x",
            "side": "sell",
            "interval": "60"
        }))
        .unwrap();

        assert_eq!(signal.symbol, "QQQ");
        assert_eq!(signal.direction, Direction::Put);
        assert_eq!(signal.timeframe, "1h");
    }

    #[test]
    fn test_direction_substring_inference() {
        let signal = normalize(json!({
            "symbol": "SPY",
            "signal": "going short here",
            "tf": "15"
        }))
        .unwrap();
        assert_eq!(signal.direction, Direction::Put);

        let signal = normalize(json!({
            "symbol": "SPY",
            "option_type": "weekly_call",
            "tf": "15"
        }))
        .unwrap();
        assert_eq!(signal.direction, Direction::Call);
    }

    #[test]
    fn test_direction_fallback_scans_later_fields() {
        // `direction` is garbage but `action` resolves
        let signal = normalize(json!({
            "symbol": "SPY",
            "direction": "sideways",
            "action": "BUY",
            "timeframe": "5m"
        }))
        .unwrap();
        assert_eq!(signal.direction, Direction::Call);
    }

    #[test]
    fn test_unknown_direction_fails() {
        let err = normalize(json!({
            "symbol": "SPY",
            "direction": "sideways",
            "timeframe": "5m"
        }))
        .unwrap_err();
        assert!(matches!(err, NormalizationError::UnknownDirection(_)));
    }

    #[test]
    fn test_missing_required_fields() {
        assert!(matches!(
            normalize(json!({"action": "BUY", "timeframe": "5m"})),
            Err(NormalizationError::MissingSymbol)
        ));
        assert!(matches!(
            normalize(json!({"symbol": "SPY", "timeframe": "5m"})),
            Err(NormalizationError::MissingDirection)
        ));
        assert!(matches!(
            normalize(json!({"symbol": "SPY", "action": "BUY"})),
            Err(NormalizationError::MissingTimeframe)
        ));
        assert!(matches!(
            normalize(json!("not an object")),
            Err(NormalizationError::NotAnObject)
        ));
    }

    #[test]
    fn test_unknown_timeframe_passes_through() {
        let signal = normalize(json!({
            "symbol": "SPY",
            "action": "BUY",
            "timeframe": "7m"
        }))
        .unwrap();
        assert_eq!(signal.timeframe, "7m");
    }

    #[test]
    fn test_malformed_timestamp_is_not_fatal() {
        let before = Utc::now();
        let signal = normalize(json!({
            "symbol": "SPY",
            "action": "BUY",
            "timeframe": "5m",
            "timestamp": "yesterday-ish"
        }))
        .unwrap();
        assert!(signal.timestamp >= before);
    }

    #[test]
    fn test_timestamp_formats() {
        let signal = normalize(json!({
            "symbol": "SPY",
            "action": "BUY",
            "timeframe": "5m",
            "timestamp": "2026-08-07T14:30:00Z"
        }))
        .unwrap();
        assert_eq!(signal.timestamp.to_rfc3339(), "2026-08-07T14:30:00+00:00");

        let signal = normalize(json!({
            "symbol": "SPY",
            "action": "BUY",
            "timeframe": "5m",
            "time": 1754577000
        }))
        .unwrap();
        assert_eq!(signal.timestamp.timestamp(), 1754577000);
    }

    #[test]
    fn test_metadata_preserves_unrecognized_fields() {
        let signal = normalize(json!({
            "symbol": "SPY",
            "action": "BUY",
            "timeframe": "5m",
            "confluence_score": 82,
            "strategy": "orb-breakout"
        }))
        .unwrap();

        assert_eq!(signal.metadata.len(), 2);
        assert_eq!(signal.metadata_f64("confluence_score"), Some(82.0));
        assert_eq!(
            signal.metadata.get("strategy").and_then(Value::as_str),
            Some("orb-breakout")
        );
        // Canonical fields are not duplicated into metadata
        assert!(!signal.metadata.contains_key("symbol"));
        assert!(!signal.metadata.contains_key("action"));
    }

    #[test]
    fn test_source_resolution() {
        let signal = normalize(json!({
            "symbol": "SPY",
            "action": "BUY",
            "timeframe": "5m",
            "source": "gex"
        }))
        .unwrap();
        assert_eq!(signal.source, SignalSource::Gex);
    }

    #[test]
    fn test_tracking_ids_are_unique() {
        let normalizer = SignalNormalizer::new();
        let raw = json!({"symbol": "SPY", "action": "BUY", "timeframe": "5m"});

        let a = normalizer.normalize(&raw).unwrap();
        let b = normalizer.normalize(&raw).unwrap();
        assert_ne!(a.id, b.id);
    }
}
