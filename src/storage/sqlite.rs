//! SQLite persistence for bar history, transactions, and the equity curve.
//!
//! Decimals are stored as TEXT so prices round-trip exactly; timestamps are
//! unix seconds.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use super::Storage;
use crate::models::{AssetClass, Bar, EquityPoint, Interval, OrderSide, Transaction};

/// Storage backed by a SQLite connection pool.
pub struct SqliteStorage {
    pool: SqlitePool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredBar {
    timestamp: i64,
    open: String,
    high: String,
    low: String,
    close: String,
    volume: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredTransaction {
    timestamp: i64,
    side: String,
    asset_class: String,
    symbol: String,
    quantity: String,
    order_id: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredEquityPoint {
    timestamp: i64,
    cash: String,
    equity: String,
}

impl SqliteStorage {
    /// Connect and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        // Every in-memory connection is its own database, so keep exactly one alive
        let options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Duration::from_secs(10))
        };

        let pool = options
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bars (
                symbol TEXT NOT NULL,
                interval TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                open TEXT NOT NULL,
                high TEXT NOT NULL,
                low TEXT NOT NULL,
                close TEXT NOT NULL,
                volume TEXT NOT NULL,
                PRIMARY KEY (symbol, interval, timestamp)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                side TEXT NOT NULL,
                asset_class TEXT NOT NULL,
                symbol TEXT NOT NULL,
                quantity TEXT NOT NULL,
                order_id TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS equity_curve (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                cash TEXT NOT NULL,
                equity TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_transactions_symbol ON transactions(symbol)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_equity_curve_time ON equity_curve(timestamp)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn load_series(&self, symbol: &str, interval: Interval) -> Result<Vec<Bar>> {
        let rows = sqlx::query_as::<_, StoredBar>(
            r#"
            SELECT timestamp, open, high, low, close, volume FROM bars
            WHERE symbol = ? AND interval = ?
            ORDER BY timestamp
            "#,
        )
        .bind(symbol)
        .bind(interval.as_str())
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch bars")?;

        rows.into_iter().map(StoredBar::into_bar).collect()
    }

    /// Intervals stored for a symbol, finest first.
    pub async fn intervals(&self, symbol: &str) -> Result<Vec<Interval>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT interval FROM bars WHERE symbol = ?")
                .bind(symbol)
                .fetch_all(&self.pool)
                .await?;

        let mut intervals = rows
            .into_iter()
            .map(|(i,)| Interval::from_str(&i).map_err(|e| anyhow!(e)))
            .collect::<Result<Vec<_>>>()?;
        intervals.sort();
        Ok(intervals)
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn store(&self, symbol: &str, interval: Interval, bars: &[Bar]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for bar in bars {
            sqlx::query(
                r#"
                INSERT INTO bars (symbol, interval, timestamp, open, high, low, close, volume)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(symbol, interval, timestamp) DO UPDATE SET
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    volume = excluded.volume
                "#,
            )
            .bind(symbol)
            .bind(interval.as_str())
            .bind(bar.timestamp.timestamp())
            .bind(bar.open.to_string())
            .bind(bar.high.to_string())
            .bind(bar.low.to_string())
            .bind(bar.close.to_string())
            .bind(bar.volume.to_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await.context("Failed to store bars")
    }

    async fn load(&self, symbol: &str, interval: Option<Interval>) -> Result<Vec<Bar>> {
        let interval = match interval {
            Some(i) => i,
            None => match self.intervals(symbol).await?.first() {
                Some(i) => *i,
                None => return Ok(Vec::new()),
            },
        };
        self.load_series(symbol, interval).await
    }

    async fn load_since(
        &self,
        symbol: &str,
        interval: Interval,
        from: DateTime<Utc>,
    ) -> Result<Vec<Bar>> {
        let rows = sqlx::query_as::<_, StoredBar>(
            r#"
            SELECT timestamp, open, high, low, close, volume FROM bars
            WHERE symbol = ? AND interval = ? AND timestamp >= ?
            ORDER BY timestamp
            "#,
        )
        .bind(symbol)
        .bind(interval.as_str())
        .bind(from.timestamp())
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch bars")?;

        rows.into_iter().map(StoredBar::into_bar).collect()
    }

    async fn last_bar(&self, symbol: &str, interval: Interval) -> Result<Option<Bar>> {
        let row = sqlx::query_as::<_, StoredBar>(
            r#"
            SELECT timestamp, open, high, low, close, volume FROM bars
            WHERE symbol = ? AND interval = ?
            ORDER BY timestamp DESC LIMIT 1
            "#,
        )
        .bind(symbol)
        .bind(interval.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(StoredBar::into_bar).transpose()
    }

    async fn record_transaction(&self, tx: &Transaction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO transactions (timestamp, side, asset_class, symbol, quantity, order_id)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(tx.timestamp.timestamp())
        .bind(tx.side.as_str())
        .bind(tx.asset_class.as_str())
        .bind(&tx.symbol)
        .bind(tx.quantity.to_string())
        .bind(&tx.order_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn transactions(&self) -> Result<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, StoredTransaction>(
            "SELECT timestamp, side, asset_class, symbol, quantity, order_id FROM transactions ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch transactions")?;

        rows.into_iter().map(StoredTransaction::into_transaction).collect()
    }

    async fn record_equity(&self, point: &EquityPoint) -> Result<()> {
        sqlx::query("INSERT INTO equity_curve (timestamp, cash, equity) VALUES (?, ?, ?)")
            .bind(point.timestamp.timestamp())
            .bind(point.cash.to_string())
            .bind(point.equity.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn equity_curve(&self, limit: usize) -> Result<Vec<EquityPoint>> {
        let rows = sqlx::query_as::<_, StoredEquityPoint>(
            "SELECT timestamp, cash, equity FROM equity_curve ORDER BY id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch equity curve")?;

        // Rows come back newest first
        rows.into_iter().rev().map(StoredEquityPoint::into_point).collect()
    }
}

impl StoredBar {
    fn into_bar(self) -> Result<Bar> {
        Ok(Bar {
            timestamp: parse_timestamp(self.timestamp)?,
            open: parse_decimal(&self.open)?,
            high: parse_decimal(&self.high)?,
            low: parse_decimal(&self.low)?,
            close: parse_decimal(&self.close)?,
            volume: parse_decimal(&self.volume)?,
        })
    }
}

impl StoredTransaction {
    fn into_transaction(self) -> Result<Transaction> {
        let side = match self.side.as_str() {
            "buy" => OrderSide::Buy,
            "sell" => OrderSide::Sell,
            other => bail!("Unknown transaction side '{}'", other),
        };
        let asset_class = match self.asset_class.as_str() {
            "stock" => AssetClass::Stock,
            "option" => AssetClass::Option,
            "crypto" => AssetClass::Crypto,
            other => bail!("Unknown asset class '{}'", other),
        };

        Ok(Transaction {
            timestamp: parse_timestamp(self.timestamp)?,
            side,
            asset_class,
            symbol: self.symbol,
            quantity: parse_decimal(&self.quantity)?,
            order_id: self.order_id,
        })
    }
}

impl StoredEquityPoint {
    fn into_point(self) -> Result<EquityPoint> {
        Ok(EquityPoint {
            timestamp: parse_timestamp(self.timestamp)?,
            cash: parse_decimal(&self.cash)?,
            equity: parse_decimal(&self.equity)?,
        })
    }
}

fn parse_timestamp(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| anyhow!("Timestamp out of range: {}", secs))
}

fn parse_decimal(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw).with_context(|| format!("Invalid decimal '{}'", raw))
}
