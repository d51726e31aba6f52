pub mod bot;
pub mod trade;
pub mod user;

pub use bot::{Bot, BotPerformance, BotSettings, CreateBotRequest, UpdateBotRequest};
pub use trade::{NewTradeRequest, Trade};
pub use user::{User, TradingSettings};
