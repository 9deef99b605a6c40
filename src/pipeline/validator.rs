use chrono::{DateTime, Datelike, Duration, Timelike, Utc, Weekday};
use chrono_tz::America::New_York;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::models::{Direction, Signal, ValidationChecks, ValidationResult};

/// Regular US equity session, minutes since midnight Eastern
const SESSION_OPEN_MIN: u32 = 9 * 60 + 30;
const SESSION_CLOSE_MIN: u32 = 16 * 60;

#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Per symbol+direction trading throttle, distinct from deduplication
    pub cooldown_secs: i64,
    /// MTF alignment gate threshold; binds only when the signal carries a score
    pub mtf_alignment_min: f64,
    /// Confluence gate threshold; binds only when the signal carries a score
    pub confluence_min: f64,
    /// Skip entries this many minutes after the open
    pub open_buffer_minutes: u32,
    /// Skip entries this many minutes before the close
    pub close_buffer_minutes: u32,
    /// Disable the session clock entirely (backtests, 24/7 sources)
    pub enforce_market_hours: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 900,
            mtf_alignment_min: 60.0,
            confluence_min: 50.0,
            open_buffer_minutes: 15,
            close_buffer_minutes: 10,
            enforce_market_hours: true,
        }
    }
}

/// Runs the fixed battery of gating checks against a signal.
///
/// Evaluation order is part of the contract: cooldown, market hours, MTF
/// alignment, confluence, time-of-day. The first failing check supplies the
/// rejection reason, so identical inputs always reject identically.
///
/// Cooldown state is recorded by the pipeline when an entry actually happens
/// (`record_entry`), not on every sighting; event-level repeats are the
/// deduplication cache's job.
pub struct SignalValidator {
    config: ValidatorConfig,
    last_entries: Mutex<HashMap<(String, Direction), DateTime<Utc>>>,
}

impl SignalValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self {
            config,
            last_entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn validate(&self, signal: &Signal) -> ValidationResult {
        self.validate_at(signal, Utc::now())
    }

    pub fn validate_at(&self, signal: &Signal, now: DateTime<Utc>) -> ValidationResult {
        let mut details = HashMap::new();

        let (cooldown, cooldown_reason) = self.check_cooldown(signal, now, &mut details);
        let (market_hours, hours_reason) = self.check_market_hours(now, &mut details);
        let (mtf, mtf_reason) = self.check_mtf(signal, &mut details);
        let (confluence, confluence_reason) = self.check_confluence(signal, &mut details);
        let (time_filters, time_reason) = self.check_time_filters(now, &mut details);

        let checks = ValidationChecks {
            cooldown,
            market_hours,
            mtf,
            confluence,
            time_filters,
        };

        // First failing check in the fixed order names the rejection
        let rejection_reason = [
            (cooldown, cooldown_reason),
            (market_hours, hours_reason),
            (mtf, mtf_reason),
            (confluence, confluence_reason),
            (time_filters, time_reason),
        ]
        .into_iter()
        .find(|(passed, _)| !passed)
        .map(|(_, reason)| reason);

        ValidationResult {
            valid: checks.all_passed(),
            checks,
            rejection_reason,
            details,
        }
    }

    /// Record that an entry happened, starting the cooldown clock.
    pub fn record_entry(&self, symbol: &str, direction: Direction) {
        self.record_entry_at(symbol, direction, Utc::now());
    }

    pub fn record_entry_at(&self, symbol: &str, direction: Direction, now: DateTime<Utc>) {
        if let Ok(mut entries) = self.last_entries.lock() {
            entries.insert((symbol.to_string(), direction), now);
        }
    }

    fn check_cooldown(
        &self,
        signal: &Signal,
        now: DateTime<Utc>,
        details: &mut HashMap<String, String>,
    ) -> (bool, String) {
        let last = self
            .last_entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(&(signal.symbol.clone(), signal.direction)).copied());

        if let Some(last_entry) = last {
            let elapsed = now - last_entry;
            if elapsed < Duration::seconds(self.config.cooldown_secs) {
                let remaining = self.config.cooldown_secs - elapsed.num_seconds();
                details.insert("cooldown_remaining_secs".to_string(), remaining.to_string());
                return (
                    false,
                    format!(
                        "cooldown active for {} {} ({remaining}s remaining)",
                        signal.symbol, signal.direction
                    ),
                );
            }
        }

        (true, String::new())
    }

    fn check_market_hours(
        &self,
        now: DateTime<Utc>,
        details: &mut HashMap<String, String>,
    ) -> (bool, String) {
        if !self.config.enforce_market_hours {
            return (true, String::new());
        }

        let eastern = now.with_timezone(&New_York);
        details.insert("session_time".to_string(), eastern.format("%H:%M %Z").to_string());

        if matches!(eastern.weekday(), Weekday::Sat | Weekday::Sun) {
            return (false, "market closed (weekend)".to_string());
        }

        let minute_of_day = eastern.hour() * 60 + eastern.minute();
        if !(SESSION_OPEN_MIN..SESSION_CLOSE_MIN).contains(&minute_of_day) {
            return (
                false,
                format!("outside regular session ({})", eastern.format("%H:%M %Z")),
            );
        }

        (true, String::new())
    }

    fn check_mtf(&self, signal: &Signal, details: &mut HashMap<String, String>) -> (bool, String) {
        match signal.metadata_f64("mtf_alignment") {
            Some(score) => {
                details.insert("mtf_alignment".to_string(), score.to_string());
                if score < self.config.mtf_alignment_min {
                    (
                        false,
                        format!(
                            "timeframes not aligned (alignment {score:.0} < {:.0})",
                            self.config.mtf_alignment_min
                        ),
                    )
                } else {
                    (true, String::new())
                }
            }
            // No score on the signal: the gate has nothing to bind on
            None => (true, String::new()),
        }
    }

    fn check_confluence(
        &self,
        signal: &Signal,
        details: &mut HashMap<String, String>,
    ) -> (bool, String) {
        match signal.metadata_f64("confluence_score") {
            Some(score) => {
                details.insert("confluence_score".to_string(), score.to_string());
                if score < self.config.confluence_min {
                    (
                        false,
                        format!(
                            "confluence too weak ({score:.0} < {:.0})",
                            self.config.confluence_min
                        ),
                    )
                } else {
                    (true, String::new())
                }
            }
            None => (true, String::new()),
        }
    }

    /// Avoid the first minutes after the open and the last before the close.
    /// Outside the session there is nothing to filter (the market-hours gate
    /// already failed), so this check passes there.
    fn check_time_filters(
        &self,
        now: DateTime<Utc>,
        details: &mut HashMap<String, String>,
    ) -> (bool, String) {
        if !self.config.enforce_market_hours {
            return (true, String::new());
        }

        let eastern = now.with_timezone(&New_York);
        if matches!(eastern.weekday(), Weekday::Sat | Weekday::Sun) {
            return (true, String::new());
        }

        let minute_of_day = eastern.hour() * 60 + eastern.minute();
        if !(SESSION_OPEN_MIN..SESSION_CLOSE_MIN).contains(&minute_of_day) {
            return (true, String::new());
        }

        let since_open = minute_of_day - SESSION_OPEN_MIN;
        if since_open < self.config.open_buffer_minutes {
            details.insert("minutes_since_open".to_string(), since_open.to_string());
            return (
                false,
                format!("too close to the open ({since_open}min after)"),
            );
        }

        let until_close = SESSION_CLOSE_MIN - minute_of_day;
        if until_close <= self.config.close_buffer_minutes {
            details.insert("minutes_until_close".to_string(), until_close.to_string());
            return (
                false,
                format!("too close to the close ({until_close}min left)"),
            );
        }

        (true, String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SignalSource;
    use chrono::TimeZone;
    use serde_json::Value;
    use uuid::Uuid;

    fn test_signal(symbol: &str, direction: Direction) -> Signal {
        Signal {
            id: Uuid::new_v4(),
            source: SignalSource::Tradingview,
            symbol: symbol.to_string(),
            direction,
            timeframe: "5m".to_string(),
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    fn with_metadata(mut signal: Signal, key: &str, value: f64) -> Signal {
        signal.metadata.insert(key.to_string(), Value::from(value));
        signal
    }

    /// Tuesday 2026-08-04, 11:00 Eastern - mid-session
    fn mid_session() -> DateTime<Utc> {
        New_York
            .with_ymd_and_hms(2026, 8, 4, 11, 0, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_all_checks_pass_mid_session() {
        let validator = SignalValidator::new(ValidatorConfig::default());
        let result = validator.validate_at(&test_signal("SPY", Direction::Call), mid_session());

        assert!(result.valid);
        assert!(result.rejection_reason.is_none());
        assert!(result.checks.all_passed());
    }

    #[test]
    fn test_cooldown_blocks_repeat_entries() {
        let validator = SignalValidator::new(ValidatorConfig::default());
        let signal = test_signal("SPY", Direction::Call);
        let now = mid_session();

        validator.record_entry_at("SPY", Direction::Call, now - Duration::seconds(60));
        let result = validator.validate_at(&signal, now);

        assert!(!result.valid);
        assert!(!result.checks.cooldown);
        assert!(result
            .rejection_reason
            .as_deref()
            .unwrap()
            .contains("cooldown"));
    }

    #[test]
    fn test_cooldown_is_per_symbol_and_direction() {
        let validator = SignalValidator::new(ValidatorConfig::default());
        let now = mid_session();
        validator.record_entry_at("SPY", Direction::Call, now - Duration::seconds(60));

        // Same symbol, opposite direction: no cooldown
        let put = test_signal("SPY", Direction::Put);
        assert!(validator.validate_at(&put, now).checks.cooldown);

        // Different symbol: no cooldown
        let qqq = test_signal("QQQ", Direction::Call);
        assert!(validator.validate_at(&qqq, now).checks.cooldown);
    }

    #[test]
    fn test_cooldown_expires() {
        let validator = SignalValidator::new(ValidatorConfig::default());
        let now = mid_session();
        validator.record_entry_at("SPY", Direction::Call, now - Duration::seconds(901));

        let result = validator.validate_at(&test_signal("SPY", Direction::Call), now);
        assert!(result.checks.cooldown);
    }

    #[test]
    fn test_weekend_fails_market_hours() {
        let validator = SignalValidator::new(ValidatorConfig::default());
        // Saturday 2026-08-08
        let saturday = New_York
            .with_ymd_and_hms(2026, 8, 8, 11, 0, 0)
            .unwrap()
            .with_timezone(&Utc);

        let result = validator.validate_at(&test_signal("SPY", Direction::Call), saturday);
        assert!(!result.checks.market_hours);
        assert!(result
            .rejection_reason
            .as_deref()
            .unwrap()
            .contains("weekend"));
    }

    #[test]
    fn test_pre_market_fails_market_hours() {
        let validator = SignalValidator::new(ValidatorConfig::default());
        let pre_market = New_York
            .with_ymd_and_hms(2026, 8, 4, 8, 0, 0)
            .unwrap()
            .with_timezone(&Utc);

        let result = validator.validate_at(&test_signal("SPY", Direction::Call), pre_market);
        assert!(!result.checks.market_hours);
        // Time filter does not bind outside the session
        assert!(result.checks.time_filters);
    }

    #[test]
    fn test_open_buffer_fails_time_filter() {
        let validator = SignalValidator::new(ValidatorConfig::default());
        let just_opened = New_York
            .with_ymd_and_hms(2026, 8, 4, 9, 35, 0)
            .unwrap()
            .with_timezone(&Utc);

        let result = validator.validate_at(&test_signal("SPY", Direction::Call), just_opened);
        assert!(result.checks.market_hours);
        assert!(!result.checks.time_filters);
        assert!(result
            .rejection_reason
            .as_deref()
            .unwrap()
            .contains("open"));
    }

    #[test]
    fn test_close_buffer_fails_time_filter() {
        let validator = SignalValidator::new(ValidatorConfig::default());
        let almost_closed = New_York
            .with_ymd_and_hms(2026, 8, 4, 15, 55, 0)
            .unwrap()
            .with_timezone(&Utc);

        let result = validator.validate_at(&test_signal("SPY", Direction::Call), almost_closed);
        assert!(!result.checks.time_filters);
    }

    #[test]
    fn test_mtf_and_confluence_gates_bind_on_scores() {
        let validator = SignalValidator::new(ValidatorConfig::default());
        let now = mid_session();

        let weak_mtf = with_metadata(test_signal("SPY", Direction::Call), "mtf_alignment", 40.0);
        let result = validator.validate_at(&weak_mtf, now);
        assert!(!result.checks.mtf);
        assert!(result.rejection_reason.as_deref().unwrap().contains("aligned"));

        let weak_confluence =
            with_metadata(test_signal("SPY", Direction::Call), "confluence_score", 30.0);
        let result = validator.validate_at(&weak_confluence, now);
        assert!(!result.checks.confluence);

        let strong = with_metadata(
            with_metadata(test_signal("SPY", Direction::Call), "mtf_alignment", 85.0),
            "confluence_score",
            75.0,
        );
        assert!(validator.validate_at(&strong, now).valid);
    }

    #[test]
    fn test_rejection_reason_cites_first_failing_check() {
        let validator = SignalValidator::new(ValidatorConfig::default());
        let now = mid_session();

        // Cooldown active AND confluence weak: cooldown comes first in order
        validator.record_entry_at("SPY", Direction::Call, now - Duration::seconds(10));
        let signal = with_metadata(test_signal("SPY", Direction::Call), "confluence_score", 10.0);

        let result = validator.validate_at(&signal, now);
        assert!(!result.checks.cooldown);
        assert!(!result.checks.confluence);
        assert!(result
            .rejection_reason
            .as_deref()
            .unwrap()
            .contains("cooldown"));
    }

    #[test]
    fn test_market_hours_enforcement_can_be_disabled() {
        let config = ValidatorConfig {
            enforce_market_hours: false,
            ..Default::default()
        };
        let validator = SignalValidator::new(config);
        let saturday = New_York
            .with_ymd_and_hms(2026, 8, 8, 3, 0, 0)
            .unwrap()
            .with_timezone(&Utc);

        let result = validator.validate_at(&test_signal("SPY", Direction::Call), saturday);
        assert!(result.valid);
    }
}
