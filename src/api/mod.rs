pub mod binance;
pub mod cache;
pub mod rates;
