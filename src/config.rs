use serde::Deserialize;

use crate::decision::{DecisionConfig, KellyParams};
use crate::execution::ExitMonitorConfig;
use crate::pipeline::ValidatorConfig;
use crate::risk::RiskLimits;

/// Every tunable in one place, loadable from the environment with the
/// `SIGNALBOT_` prefix (e.g. `SIGNALBOT_CONFIDENCE_THRESHOLD=65`). Missing
/// variables fall back to the defaults below.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    // Pipeline
    pub dedup_window_secs: u64,
    pub cooldown_secs: i64,
    pub mtf_alignment_min: f64,
    pub confluence_min: f64,
    pub open_buffer_minutes: u32,
    pub close_buffer_minutes: u32,
    pub enforce_market_hours: bool,

    // Decision
    pub confidence_threshold: f64,
    pub base_position_size: f64,
    pub kelly_win_rate: f64,
    pub kelly_payoff_ratio: f64,

    // Exits
    pub profit_target_pct: f64,
    pub stop_loss_pct: f64,
    pub max_hold_minutes: i64,
    pub expiry_critical_minutes: i64,
    pub expiry_warn_minutes: i64,

    // Risk
    pub max_open_positions: usize,
    pub max_daily_entries: u32,
    pub max_position_size: f64,

    // Runtime
    pub signal_poll_secs: u64,
    pub exit_poll_secs: u64,
    pub signal_batch_size: usize,
    pub paper_slippage_bps: f64,
    pub market_data_url: String,
    pub market_data_rpm: u32,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: 300,
            cooldown_secs: 900,
            mtf_alignment_min: 60.0,
            confluence_min: 50.0,
            open_buffer_minutes: 15,
            close_buffer_minutes: 10,
            enforce_market_hours: true,
            confidence_threshold: 60.0,
            base_position_size: 1_000.0,
            kelly_win_rate: 0.55,
            kelly_payoff_ratio: 1.5,
            profit_target_pct: 0.50,
            stop_loss_pct: 0.25,
            max_hold_minutes: 240,
            expiry_critical_minutes: 15,
            expiry_warn_minutes: 60,
            max_open_positions: 5,
            max_daily_entries: 20,
            max_position_size: 2_500.0,
            signal_poll_secs: 10,
            exit_poll_secs: 60,
            signal_batch_size: 50,
            paper_slippage_bps: 10.0,
            market_data_url: "http://127.0.0.1:8500".to_string(),
            market_data_rpm: 120,
        }
    }
}

impl BotConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("SIGNALBOT").try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn validator(&self) -> ValidatorConfig {
        ValidatorConfig {
            cooldown_secs: self.cooldown_secs,
            mtf_alignment_min: self.mtf_alignment_min,
            confluence_min: self.confluence_min,
            open_buffer_minutes: self.open_buffer_minutes,
            close_buffer_minutes: self.close_buffer_minutes,
            enforce_market_hours: self.enforce_market_hours,
        }
    }

    pub fn decision(&self) -> DecisionConfig {
        DecisionConfig {
            confidence_threshold: self.confidence_threshold,
            base_position_size: self.base_position_size,
            max_position_size: self.max_position_size,
            profit_target_pct: self.profit_target_pct,
            stop_loss_pct: self.stop_loss_pct,
            max_hold_minutes: self.max_hold_minutes,
            kelly: KellyParams {
                win_rate: self.kelly_win_rate,
                payoff_ratio: self.kelly_payoff_ratio,
                ..KellyParams::default()
            },
        }
    }

    pub fn risk(&self) -> RiskLimits {
        RiskLimits {
            max_open_positions: self.max_open_positions,
            max_daily_entries: self.max_daily_entries,
            max_position_size: self.max_position_size,
        }
    }

    pub fn exit_monitor(&self) -> ExitMonitorConfig {
        ExitMonitorConfig {
            poll_interval_secs: self.exit_poll_secs,
            expiry_critical_minutes: self.expiry_critical_minutes,
            expiry_warn_minutes: self.expiry_warn_minutes,
        }
    }
}
