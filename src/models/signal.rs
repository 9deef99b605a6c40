use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Where a signal originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalSource {
    Tradingview,
    Gex,
    Mtf,
    Manual,
}

impl SignalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalSource::Tradingview => "TRADINGVIEW",
            SignalSource::Gex => "GEX",
            SignalSource::Mtf => "MTF",
            SignalSource::Manual => "MANUAL",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "TRADINGVIEW" | "TV" => Some(SignalSource::Tradingview),
            "GEX" => Some(SignalSource::Gex),
            "MTF" => Some(SignalSource::Mtf),
            "MANUAL" => Some(SignalSource::Manual),
            _ => None,
        }
    }
}

impl fmt::Display for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Option direction of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Call,
    Put,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Call => "CALL",
            Direction::Put => "PUT",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A normalized trading event.
///
/// Created exactly once by the normalizer and immutable afterwards. The `id`
/// doubles as the tracking ID threaded through every downstream record
/// (decisions, failures, positions) for this signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub source: SignalSource,
    pub symbol: String,
    pub direction: Direction,
    pub timeframe: String,
    pub timestamp: DateTime<Utc>,
    /// All raw fields not consumed by normalization, preserved verbatim
    pub metadata: Map<String, Value>,
}

impl Signal {
    /// Numeric metadata lookup. Analytics sources attach their scores here
    /// (e.g. `confluence_score`, `mtf_alignment`), sometimes as strings.
    pub fn metadata_f64(&self, key: &str) -> Option<f64> {
        match self.metadata.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Timestamp metadata lookup (RFC 3339 strings or epoch seconds).
    pub fn metadata_datetime(&self, key: &str) -> Option<DateTime<Utc>> {
        match self.metadata.get(key)? {
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            Value::Number(n) => n.as_i64().and_then(|secs| DateTime::from_timestamp(secs, 0)),
            _ => None,
        }
    }
}
