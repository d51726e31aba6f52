use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, QueryBuilder, Row, Sqlite, SqlitePool};
use std::str::FromStr;
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::models::{Bot, Trade, User};
use crate::performance::{sharpe_ratio, DEFAULT_RISK_FREE_RATE};
use crate::store::{BotRepository, Database, TradeFilter, TradeRepository, UserRepository};

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool.clone(),
        }
    }
}

fn parse_col<T: FromStr<Err = AppError>>(row: &SqliteRow, col: &str) -> Result<T> {
    let raw: String = row.try_get(col)?;
    raw.parse()
}

fn json_col<T: DeserializeOwned>(row: &SqliteRow, col: &str) -> Result<T> {
    let raw: String = row.try_get(col)?;
    Ok(serde_json::from_str(&raw)?)
}

fn opt_json_col<T: DeserializeOwned>(row: &SqliteRow, col: &str) -> Result<Option<T>> {
    let raw: Option<String> = row.try_get(col)?;
    raw.map(|r| serde_json::from_str(&r))
        .transpose()
        .map_err(AppError::from)
}

/// Translate a unique-index violation into a client-facing conflict
fn map_unique(err: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            let msg = db_err.message();
            if msg.contains("users.email") {
                return AppError::Conflict("Email already registered".into());
            }
            if msg.contains("users.username") {
                return AppError::Conflict("Username already taken".into());
            }
            return AppError::Conflict("Record already exists".into());
        }
    }
    AppError::Database(err)
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        username: row.try_get("username")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        is_active: row.try_get("is_active")?,
        role: parse_col(row, "role")?,
        api_keys: json_col(row, "api_keys")?,
        trading_settings: json_col(row, "trading_settings")?,
        wallet_address: row.try_get("wallet_address")?,
        onic_balance: row.try_get("onic_balance")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn bot_from_row(row: &SqliteRow) -> Result<Bot> {
    Ok(Bot {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
        strategy: parse_col(row, "strategy")?,
        symbol: row.try_get("symbol")?,
        interval: parse_col(row, "interval")?,
        is_active: row.try_get("is_active")?,
        settings: json_col(row, "settings")?,
        performance: json_col(row, "performance")?,
        last_activity: row.try_get("last_activity")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn trade_from_row(row: &SqliteRow) -> Result<Trade> {
    Ok(Trade {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        bot_id: row.try_get("bot_id")?,
        symbol: row.try_get("symbol")?,
        side: parse_col(row, "side")?,
        quantity: row.try_get("quantity")?,
        price: row.try_get("price")?,
        total_value: row.try_get("total_value")?,
        strategy: parse_col(row, "strategy")?,
        exchange: parse_col(row, "exchange")?,
        order_id: row.try_get("order_id")?,
        status: parse_col(row, "status")?,
        pnl: row.try_get("pnl")?,
        pnl_percentage: row.try_get("pnl_percentage")?,
        entry_time: row.try_get("entry_time")?,
        exit_time: row.try_get("exit_time")?,
        stop_loss: row.try_get("stop_loss")?,
        take_profit: row.try_get("take_profit")?,
        copy_trade_info: opt_json_col(row, "copy_trade_info")?,
        metadata: json_col(row, "metadata")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl UserRepository for SqliteStore {
    async fn create(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, password_hash, username, first_name, last_name,
                is_active, role, api_keys, trading_settings, wallet_address, onic_balance,
                created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.username)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.is_active)
        .bind(user.role.as_str())
        .bind(serde_json::to_string(&user.api_keys)?)
        .bind(serde_json::to_string(&user.trading_settings)?)
        .bind(&user.wallet_address)
        .bind(user.onic_balance)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_unique)?;

        debug!(user_id = %user.id, "User persisted");
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn update(&self, user: &User) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE users SET email = ?, password_hash = ?, username = ?, first_name = ?,
                last_name = ?, is_active = ?, role = ?, api_keys = ?, trading_settings = ?,
                wallet_address = ?, onic_balance = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.username)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.is_active)
        .bind(user.role.as_str())
        .bind(serde_json::to_string(&user.api_keys)?)
        .bind(serde_json::to_string(&user.trading_settings)?)
        .bind(&user.wallet_address)
        .bind(user.onic_balance)
        .bind(user.updated_at)
        .bind(&user.id)
        .execute(&self.pool)
        .await
        .map_err(map_unique)?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found("User not found"));
        }
        Ok(())
    }
}

#[async_trait]
impl BotRepository for SqliteStore {
    async fn create(&self, bot: &Bot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bots (id, user_id, name, strategy, symbol, interval, is_active,
                settings, performance, last_activity, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&bot.id)
        .bind(&bot.user_id)
        .bind(&bot.name)
        .bind(bot.strategy.as_str())
        .bind(&bot.symbol)
        .bind(bot.interval.as_str())
        .bind(bot.is_active)
        .bind(serde_json::to_string(&bot.settings)?)
        .bind(serde_json::to_string(&bot.performance)?)
        .bind(bot.last_activity)
        .bind(bot.created_at)
        .bind(bot.updated_at)
        .execute(&self.pool)
        .await?;

        debug!(bot_id = %bot.id, user_id = %bot.user_id, "Bot persisted");
        Ok(())
    }

    async fn find_for_user(&self, id: &str, user_id: &str) -> Result<Option<Bot>> {
        let row = sqlx::query("SELECT * FROM bots WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(bot_from_row).transpose()
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Bot>> {
        let rows = sqlx::query("SELECT * FROM bots WHERE user_id = ? ORDER BY created_at DESC, rowid DESC")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(bot_from_row).collect()
    }

    async fn update(&self, bot: &Bot) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE bots SET name = ?, strategy = ?, symbol = ?, interval = ?, is_active = ?,
                settings = ?, performance = ?, last_activity = ?, updated_at = ?
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(&bot.name)
        .bind(bot.strategy.as_str())
        .bind(&bot.symbol)
        .bind(bot.interval.as_str())
        .bind(bot.is_active)
        .bind(serde_json::to_string(&bot.settings)?)
        .bind(serde_json::to_string(&bot.performance)?)
        .bind(bot.last_activity)
        .bind(bot.updated_at)
        .bind(&bot.id)
        .bind(&bot.user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found("Bot not found"));
        }
        Ok(())
    }

    async fn delete(&self, id: &str, user_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM bots WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn push_trade_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &TradeFilter) {
    qb.push(" WHERE user_id = ").push_bind(filter.user_id.clone());
    if let Some(bot_id) = &filter.bot_id {
        qb.push(" AND bot_id = ").push_bind(bot_id.clone());
    }
    if let Some(symbol) = &filter.symbol {
        qb.push(" AND symbol = ").push_bind(symbol.to_uppercase());
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(strategy) = filter.strategy {
        qb.push(" AND strategy = ").push_bind(strategy.as_str());
    }
}

async fn fetch_realized_pnls<'e, E>(executor: E, bot_id: &str) -> Result<Vec<f64>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        "SELECT pnl FROM trades WHERE bot_id = ? AND pnl IS NOT NULL ORDER BY exit_time ASC, rowid ASC",
    )
    .bind(bot_id)
    .fetch_all(executor)
    .await?;

    rows.iter()
        .map(|row| row.try_get::<f64, _>("pnl").map_err(AppError::from))
        .collect()
}

#[async_trait]
impl TradeRepository for SqliteStore {
    async fn create(&self, trade: &Trade) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades (id, user_id, bot_id, symbol, side, quantity, price, total_value,
                strategy, exchange, order_id, status, pnl, pnl_percentage, entry_time, exit_time,
                stop_loss, take_profit, copy_trade_info, metadata, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&trade.id)
        .bind(&trade.user_id)
        .bind(&trade.bot_id)
        .bind(&trade.symbol)
        .bind(trade.side.as_str())
        .bind(trade.quantity)
        .bind(trade.price)
        .bind(trade.total_value)
        .bind(trade.strategy.as_str())
        .bind(trade.exchange.as_str())
        .bind(&trade.order_id)
        .bind(trade.status.as_str())
        .bind(trade.pnl)
        .bind(trade.pnl_percentage)
        .bind(trade.entry_time)
        .bind(trade.exit_time)
        .bind(trade.stop_loss)
        .bind(trade.take_profit)
        .bind(
            trade
                .copy_trade_info
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(serde_json::to_string(&trade.metadata)?)
        .bind(trade.created_at)
        .bind(trade.updated_at)
        .execute(&self.pool)
        .await?;

        debug!(trade_id = %trade.id, symbol = %trade.symbol, "Trade persisted");
        Ok(())
    }

    async fn find_for_user(&self, id: &str, user_id: &str) -> Result<Option<Trade>> {
        let row = sqlx::query("SELECT * FROM trades WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(trade_from_row).transpose()
    }

    async fn update(&self, trade: &Trade) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE trades SET status = ?, price = ?, quantity = ?, total_value = ?, pnl = ?,
                pnl_percentage = ?, exit_time = ?, stop_loss = ?, take_profit = ?, updated_at = ?
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(trade.status.as_str())
        .bind(trade.price)
        .bind(trade.quantity)
        .bind(trade.total_value)
        .bind(trade.pnl)
        .bind(trade.pnl_percentage)
        .bind(trade.exit_time)
        .bind(trade.stop_loss)
        .bind(trade.take_profit)
        .bind(trade.updated_at)
        .bind(&trade.id)
        .bind(&trade.user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found("Trade not found"));
        }
        Ok(())
    }

    async fn close_position(&self, trade: &Trade) -> Result<Option<Bot>> {
        let pnl = trade
            .pnl
            .ok_or_else(|| AppError::Internal("Closing a trade without a P&L".into()))?;
        let mut tx = self.pool.begin().await?;

        // exit_time guards against a concurrent close; the loser matches no row
        let closed = sqlx::query(
            r#"
            UPDATE trades SET status = ?, pnl = ?, pnl_percentage = ?, exit_time = ?, updated_at = ?
            WHERE id = ? AND user_id = ? AND exit_time IS NULL
            "#,
        )
        .bind(trade.status.as_str())
        .bind(trade.pnl)
        .bind(trade.pnl_percentage)
        .bind(trade.exit_time)
        .bind(trade.updated_at)
        .bind(&trade.id)
        .bind(&trade.user_id)
        .execute(&mut *tx)
        .await?;
        if closed.rows_affected() == 0 {
            return Err(AppError::validation("Trade already closed"));
        }

        let Some(bot_id) = trade.bot_id.as_deref() else {
            tx.commit().await?;
            return Ok(None);
        };
        let row = sqlx::query("SELECT * FROM bots WHERE id = ? AND user_id = ?")
            .bind(bot_id)
            .bind(&trade.user_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(mut bot) = row.as_ref().map(bot_from_row).transpose()? else {
            warn!(trade_id = %trade.id, bot_id = bot_id, "Closed trade references a missing bot");
            tx.commit().await?;
            return Ok(None);
        };

        bot.performance.record(pnl);
        let pnls = fetch_realized_pnls(&mut *tx, &bot.id).await?;
        bot.performance.sharpe_ratio = sharpe_ratio(&pnls, DEFAULT_RISK_FREE_RATE);
        bot.last_activity = Utc::now();

        sqlx::query("UPDATE bots SET performance = ?, last_activity = ? WHERE id = ? AND user_id = ?")
            .bind(serde_json::to_string(&bot.performance)?)
            .bind(bot.last_activity)
            .bind(&bot.id)
            .bind(&bot.user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(trade_id = %trade.id, bot_id = %bot.id, pnl = pnl, "Position closed");
        Ok(Some(bot))
    }

    async fn list(&self, filter: &TradeFilter) -> Result<Vec<Trade>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM trades");
        push_trade_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC, rowid DESC LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.offset);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(trade_from_row).collect()
    }

    async fn list_all(&self, filter: &TradeFilter) -> Result<Vec<Trade>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM trades");
        push_trade_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC, rowid DESC");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(trade_from_row).collect()
    }

    async fn count(&self, filter: &TradeFilter) -> Result<u64> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS n FROM trades");
        push_trade_filter(&mut qb, filter);

        let row = qb.build().fetch_one(&self.pool).await?;
        let n: i64 = row.try_get("n")?;
        Ok(n.max(0) as u64)
    }

    async fn realized_pnls(&self, bot_id: &str) -> Result<Vec<f64>> {
        fetch_realized_pnls(&self.pool, bot_id).await
    }
}
