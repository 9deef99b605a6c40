use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use uuid::Uuid;

use crate::models::{
    DecisionResult, Direction, ExitReason, PipelineFailure, Position, PositionStatus, Signal,
};
use crate::store::{PendingSignal, Store};
use crate::Result;

/// Postgres-backed store.
///
/// Signals, decisions and failures are append-only audit tables; positions
/// are upserted. The close claim is a conditional update on the position row,
/// which is what makes concurrent exit monitors safe.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to Postgres and run migrations
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres at {}", database_url);

        Ok(Self { pool })
    }

    /// Queue a raw payload for the pipeline's driving loop (ingestion side)
    pub async fn push_pending(&self, payload: &Value) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO pending_signals (id, payload, received_at, processed)
            VALUES ($1, $2, NOW(), FALSE)
            "#,
        )
        .bind(id)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn save_signal(&self, signal: &Signal) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO signals (id, source, symbol, direction, timeframe, event_time, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(signal.id)
        .bind(signal.source.as_str())
        .bind(&signal.symbol)
        .bind(signal.direction.as_str())
        .bind(&signal.timeframe)
        .bind(signal.timestamp)
        .bind(Value::Object(signal.metadata.clone()))
        .execute(&self.pool)
        .await?;

        tracing::debug!("Saved signal {} ({})", signal.id, signal.symbol);
        Ok(())
    }

    async fn save_decision(&self, decision: &DecisionResult) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO decisions (
                id, signal_id, position_id, decision, confidence, position_size,
                reasoning, calculations, degraded, exit_reason, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(decision.id)
        .bind(decision.signal_id())
        .bind(decision.position_id)
        .bind(decision.decision.as_str())
        .bind(decision.confidence)
        .bind(decision.position_size)
        .bind(serde_json::to_value(&decision.reasoning)?)
        .bind(serde_json::to_value(decision.calculations)?)
        .bind(decision.degraded)
        .bind(decision.exit_reason.map(|r| r.as_str()))
        .bind(decision.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_failure(&self, failure: &PipelineFailure) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pipeline_failures (tracking_id, signal_id, stage, reason, signal_data, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (tracking_id) DO NOTHING
            "#,
        )
        .bind(failure.tracking_id)
        .bind(failure.signal_id)
        .bind(failure.stage.as_str())
        .bind(&failure.reason)
        .bind(&failure.signal_data)
        .bind(failure.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_position(&self, position: &Position) -> Result<()> {
        self.update_position(position).await
    }

    async fn update_position(&self, position: &Position) -> Result<()> {
        let status_str = match position.status {
            PositionStatus::Open => "Open",
            PositionStatus::Closed => "Closed",
        };

        sqlx::query(
            r#"
            INSERT INTO positions (
                id, signal_id, symbol, direction, quantity, entry_price, entry_time,
                current_price, unrealized_pnl, exit_price, exit_time, realized_pnl,
                exit_reason, expires_at, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (id) DO UPDATE SET
                quantity = EXCLUDED.quantity,
                current_price = EXCLUDED.current_price,
                unrealized_pnl = EXCLUDED.unrealized_pnl,
                exit_price = EXCLUDED.exit_price,
                exit_time = EXCLUDED.exit_time,
                realized_pnl = EXCLUDED.realized_pnl,
                exit_reason = EXCLUDED.exit_reason,
                status = EXCLUDED.status,
                updated_at = NOW()
            "#,
        )
        .bind(position.id)
        .bind(position.signal_id)
        .bind(&position.symbol)
        .bind(position.direction.as_str())
        .bind(position.quantity)
        .bind(position.entry_price)
        .bind(position.entry_time)
        .bind(position.current_price)
        .bind(position.unrealized_pnl)
        .bind(position.exit_price)
        .bind(position.exit_time)
        .bind(position.realized_pnl)
        .bind(position.exit_reason.map(|r| r.as_str()))
        .bind(position.expires_at)
        .bind(status_str)
        .execute(&self.pool)
        .await?;

        tracing::debug!("Saved position {} for {}", position.id, position.symbol);
        Ok(())
    }

    async fn claim_position_close(&self, position_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE positions
            SET close_claimed = TRUE, updated_at = NOW()
            WHERE id = $1 AND status = 'Open' AND close_claimed = FALSE
            "#,
        )
        .bind(position_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_position_claim(&self, position_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE positions
            SET close_claimed = FALSE, updated_at = NOW()
            WHERE id = $1 AND status = 'Open'
            "#,
        )
        .bind(position_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_open_positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query(
            r#"
            SELECT id, signal_id, symbol, direction, quantity, entry_price, entry_time,
                   current_price, unrealized_pnl, exit_price, exit_time, realized_pnl,
                   exit_reason, expires_at, status
            FROM positions
            WHERE status = 'Open'
            ORDER BY entry_time ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut positions = Vec::new();
        for row in rows {
            positions.push(row_to_position(&row)?);
        }

        tracing::info!("Loaded {} open positions from Postgres", positions.len());
        Ok(positions)
    }

    async fn fetch_pending_signals(&self, limit: usize) -> Result<Vec<PendingSignal>> {
        let rows = sqlx::query(
            r#"
            SELECT id, payload, received_at
            FROM pending_signals
            WHERE processed = FALSE
            ORDER BY received_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut pending = Vec::new();
        for row in rows {
            pending.push(PendingSignal {
                id: row.get("id"),
                payload: row.get("payload"),
                received_at: row.get("received_at"),
            });
        }
        Ok(pending)
    }

    async fn mark_signal_processed(&self, pending_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE pending_signals SET processed = TRUE WHERE id = $1
            "#,
        )
        .bind(pending_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn row_to_position(row: &sqlx::postgres::PgRow) -> Result<Position> {
    let direction_str: String = row.get("direction");
    let direction = match direction_str.as_str() {
        "CALL" => Direction::Call,
        "PUT" => Direction::Put,
        _ => return Err("Invalid position direction".into()),
    };

    let status_str: String = row.get("status");
    let status = match status_str.as_str() {
        "Open" => PositionStatus::Open,
        "Closed" => PositionStatus::Closed,
        _ => return Err("Invalid position status".into()),
    };

    let exit_reason_str: Option<String> = row.get("exit_reason");
    let exit_reason = match exit_reason_str.as_deref() {
        Some(raw) => Some(ExitReason::parse(raw).ok_or("Invalid exit reason")?),
        None => None,
    };

    let quantity: rust_decimal::Decimal = row.get("quantity");
    let entry_price: rust_decimal::Decimal = row.get("entry_price");
    let current_price: Option<rust_decimal::Decimal> = row.get("current_price");
    let unrealized_pnl: Option<rust_decimal::Decimal> = row.get("unrealized_pnl");
    let exit_price: Option<rust_decimal::Decimal> = row.get("exit_price");
    let realized_pnl: Option<rust_decimal::Decimal> = row.get("realized_pnl");

    let entry_time: DateTime<Utc> = row.get("entry_time");
    let exit_time: Option<DateTime<Utc>> = row.get("exit_time");
    let expires_at: Option<DateTime<Utc>> = row.get("expires_at");

    Ok(Position {
        id: row.get("id"),
        signal_id: row.get("signal_id"),
        symbol: row.get("symbol"),
        direction,
        quantity: quantity.to_string().parse()?,
        entry_price: entry_price.to_string().parse()?,
        entry_time,
        current_price: current_price.map(|v| v.to_string().parse()).transpose()?,
        unrealized_pnl: unrealized_pnl.map(|v| v.to_string().parse()).transpose()?,
        exit_price: exit_price.map(|v| v.to_string().parse()).transpose()?,
        exit_time,
        realized_pnl: realized_pnl.map(|v| v.to_string().parse()).transpose()?,
        exit_reason,
        expires_at,
        status,
    })
}
