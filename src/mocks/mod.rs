
pub use mock_exchange::{MockExchange, MockExchangeConfig, SERVER_ACCOUNT};
