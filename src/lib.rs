pub mod api;
pub mod auth;
pub mod command;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod performance;
pub mod realtime;
pub mod services;
pub mod store;
pub mod strategy;
pub mod types;
pub mod venues;
#[cfg(test)]
pub mod mocks;
#[cfg(test)]
mod tests;
