use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

use crate::error::{ErrorExt, Result};

const SCHEMA: &[(&str, &str)] = &[
    (
        "users",
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            username TEXT NOT NULL UNIQUE,
            first_name TEXT NOT NULL DEFAULT '',
            last_name TEXT NOT NULL DEFAULT '',
            is_active BOOLEAN NOT NULL DEFAULT 1,
            role TEXT NOT NULL DEFAULT 'user',
            api_keys TEXT NOT NULL,
            trading_settings TEXT NOT NULL,
            wallet_address TEXT,
            onic_balance REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_users_wallet ON users (wallet_address);
        "#,
    ),
    (
        "bots",
        r#"
        CREATE TABLE IF NOT EXISTS bots (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users (id),
            name TEXT NOT NULL,
            strategy TEXT NOT NULL,
            symbol TEXT NOT NULL,
            interval TEXT NOT NULL,
            is_active BOOLEAN NOT NULL DEFAULT 0,
            settings TEXT NOT NULL,
            performance TEXT NOT NULL,
            last_activity TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_bots_user_active ON bots (user_id, is_active);
        CREATE INDEX IF NOT EXISTS idx_bots_strategy_active ON bots (strategy, is_active);
        CREATE INDEX IF NOT EXISTS idx_bots_symbol_active ON bots (symbol, is_active);
        "#,
    ),
    (
        "trades",
        r#"
        CREATE TABLE IF NOT EXISTS trades (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users (id),
            bot_id TEXT,
            symbol TEXT NOT NULL,
            side TEXT NOT NULL,
            quantity REAL NOT NULL,
            price REAL NOT NULL,
            total_value REAL NOT NULL,
            strategy TEXT NOT NULL,
            exchange TEXT NOT NULL,
            order_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            pnl REAL,
            pnl_percentage REAL,
            entry_time TEXT NOT NULL,
            exit_time TEXT,
            stop_loss REAL,
            take_profit REAL,
            copy_trade_info TEXT,
            metadata TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_trades_user_created ON trades (user_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_trades_symbol_created ON trades (symbol, created_at);
        CREATE INDEX IF NOT EXISTS idx_trades_strategy_created ON trades (strategy, created_at);
        CREATE INDEX IF NOT EXISTS idx_trades_status ON trades (status);
        CREATE INDEX IF NOT EXISTS idx_trades_bot ON trades (bot_id);
        "#,
    ),
];

#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn connect(db_url: &str) -> Result<Self> {
        let in_memory = db_url.contains(":memory:") || db_url.contains("mode=memory");

        if !in_memory {
            if let Some(path_part) = db_url.strip_prefix("sqlite://") {
                let path = Path::new(path_part.split('?').next().unwrap_or(path_part));
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    if !parent.exists() {
                        fs::create_dir_all(parent)
                            .await
                            .context("Failed to create database directory")?;
                    }
                }
            }
        }

        let mut options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to `:memory:` opens a fresh database, so pin the
        // pool to one connection that never expires.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options.connect_with(options).await?;
        info!(url = %db_url, "Connected to database");

        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    /// Fresh in-memory database with the schema applied
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    async fn init(&self) -> Result<()> {
        for (table, ddl) in SCHEMA {
            sqlx::raw_sql(ddl).execute(&self.pool).await?;
            info!(table = %table, "Schema ready");
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
