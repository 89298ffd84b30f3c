use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::backtest::{BacktestReport, BacktestRequest};
use crate::error::Result;

/// PostgreSQL storage adapter. Services borrow the pool; connections are
/// acquired per operation and returned by the pool on every exit path.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        info!("connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Reuse an existing connection pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Append a backtest run's aggregated metrics; these drive community
    /// performance stats.
    pub async fn record_backtest_run(
        &self,
        user_id: i64,
        request: &BacktestRequest,
        report: &BacktestReport,
    ) -> Result<i64> {
        use sqlx::Row;
        let row = sqlx::query(
            r#"
            INSERT INTO qd_backtest_runs
                (user_id, market, symbol, timeframe, start_date, end_date,
                 initial_capital, leverage, trade_direction,
                 total_return, annual_return, max_drawdown, sharpe_ratio,
                 win_rate, profit_factor, total_trades, total_profit,
                 is_liquidated, execution_timeframe, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9,
                    $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, NOW())
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(request.market.as_str())
        .bind(&request.symbol)
        .bind(request.timeframe.as_str())
        .bind(request.start)
        .bind(request.end)
        .bind(request.initial_capital)
        .bind(request.leverage as i32)
        .bind(serde_json::to_value(request.trade_direction)?.as_str().unwrap_or("long").to_string())
        .bind(report.metrics.total_return)
        .bind(report.metrics.annual_return)
        .bind(report.metrics.max_drawdown)
        .bind(report.metrics.sharpe_ratio)
        .bind(report.metrics.win_rate)
        .bind(report.metrics.profit_factor)
        .bind(report.metrics.total_trades as i32)
        .bind(report.metrics.total_profit)
        .bind(report.is_liquidated)
        .bind(&report.execution_timeframe)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("id"))
    }
}
