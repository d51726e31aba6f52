use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::auth::TokenService;
use crate::config::Config;
use crate::models::User;
use crate::realtime::RealtimeHub;
use crate::store::{BotRepository, Database, SqliteStore, TradeRepository, UserRepository};
use crate::venues::ExchangeClient;

/// Everything a request handler can reach. Cheap to clone; every field is
/// shared.
#[derive(Clone)]
pub struct Services {
    pub config: Arc<Config>,
    pub users: Arc<dyn UserRepository>,
    pub bots: Arc<dyn BotRepository>,
    pub trades: Arc<dyn TradeRepository>,
    pub exchange: Arc<dyn ExchangeClient>,
    pub tokens: Arc<TokenService>,
    pub hub: Arc<RealtimeHub>,
    pub started_at: Instant,
}

impl Services {
    /// Wires the SQLite repositories around an already connected database
    pub fn new(config: Config, db: &Database, exchange: Arc<dyn ExchangeClient>) -> Self {
        let store = Arc::new(SqliteStore::new(db));
        let tokens = Arc::new(TokenService::new(&config.jwt_secret, config.jwt_expires_in));

        info!(exchange = exchange.name(), "Services initialized");

        Self {
            config: Arc::new(config),
            users: store.clone(),
            bots: store.clone(),
            trades: store,
            exchange,
            tokens,
            hub: Arc::new(RealtimeHub::new()),
            started_at: Instant::now(),
        }
    }

    /// Exchange client signing with the user's own Binance keys when they are
    /// set, otherwise the server-wide client
    pub fn exchange_for(&self, user: &User) -> Arc<dyn ExchangeClient> {
        let creds = &user.api_keys.binance;
        if creds.is_usable() {
            debug!(user_id = %user.id, "Using the user's exchange keys");
            self.exchange.for_account(&creds.api_key, &creds.api_secret)
        } else {
            self.exchange.clone()
        }
    }

    /// Seconds since the services were built
    pub fn uptime(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }
}
