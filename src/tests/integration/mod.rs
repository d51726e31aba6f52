
mod auth_flow_tests;
mod bot_flow_tests;
mod market_flow_tests;
mod trade_flow_tests;
