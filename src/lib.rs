//! PortaFi Library
//!
//! LSTM next-step price forecasting and risk/return analytics for weighted
//! stock portfolios

pub mod analysis;
pub mod config;
pub mod error;
pub mod market_data;
pub mod ml_engine;
pub mod portfolio;
pub mod stats;
pub mod types;
