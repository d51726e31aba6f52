//! Persistence for users, bots and trades.
//!
//! Repositories are traits so handlers only see the operations they need;
//! [`SqliteStore`] backs all three with one connection pool.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Bot, Trade, User};
use crate::types::{Strategy, TradeStatus};

pub mod database;
pub mod sqlite;

pub use database::Database;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a new user. Duplicate email or username yields `Conflict`.
    async fn create(&self, user: &User) -> Result<()>;

    async fn find_by_id(&self, id: &str) -> Result<Option<User>>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn update(&self, user: &User) -> Result<()>;
}

#[async_trait]
pub trait BotRepository: Send + Sync {
    async fn create(&self, bot: &Bot) -> Result<()>;

    /// Look up a bot owned by `user_id`; other users' bots are invisible
    async fn find_for_user(&self, id: &str, user_id: &str) -> Result<Option<Bot>>;

    /// All bots of a user, newest first
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Bot>>;

    async fn update(&self, bot: &Bot) -> Result<()>;

    /// Returns false when no matching bot existed
    async fn delete(&self, id: &str, user_id: &str) -> Result<bool>;
}

#[async_trait]
pub trait TradeRepository: Send + Sync {
    async fn create(&self, trade: &Trade) -> Result<()>;

    async fn find_for_user(&self, id: &str, user_id: &str) -> Result<Option<Trade>>;

    async fn update(&self, trade: &Trade) -> Result<()>;

    /// Persists a trade that was just closed and folds its P&L into its bot,
    /// atomically. Fails with "Trade already closed" when another close won
    /// the race. Returns the updated bot, if the trade has one.
    async fn close_position(&self, trade: &Trade) -> Result<Option<Bot>>;

    /// Trades matching `filter`, newest first, honouring limit/offset
    async fn list(&self, filter: &TradeFilter) -> Result<Vec<Trade>>;

    /// Every trade matching `filter`, newest first, ignoring limit/offset
    async fn list_all(&self, filter: &TradeFilter) -> Result<Vec<Trade>>;

    /// Number of trades matching `filter`, ignoring limit/offset
    async fn count(&self, filter: &TradeFilter) -> Result<u64>;

    /// Realised P&L of every closed trade of a bot, oldest first
    async fn realized_pnls(&self, bot_id: &str) -> Result<Vec<f64>>;
}

pub const DEFAULT_TRADE_LIMIT: i64 = 50;
pub const MAX_TRADE_LIMIT: i64 = 100;

#[derive(Debug, Clone)]
pub struct TradeFilter {
    pub user_id: String,
    pub bot_id: Option<String>,
    pub symbol: Option<String>,
    pub status: Option<TradeStatus>,
    pub strategy: Option<Strategy>,
    pub limit: i64,
    pub offset: i64,
}

impl TradeFilter {
    pub fn for_user(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            bot_id: None,
            symbol: None,
            status: None,
            strategy: None,
            limit: DEFAULT_TRADE_LIMIT,
            offset: 0,
        }
    }

    /// Trades a bot accounts for: its owner's trades on the bot's strategy
    /// and symbol, whether or not they were tagged with the bot's id
    pub fn for_bot(bot: &Bot) -> Self {
        let mut filter = Self::for_user(&bot.user_id);
        filter.strategy = Some(bot.strategy);
        filter.symbol = Some(bot.symbol.clone());
        filter
    }

    pub fn page(mut self, limit: i64, offset: i64) -> Self {
        self.limit = limit.clamp(1, MAX_TRADE_LIMIT);
        self.offset = offset.max(0);
        self
    }
}
