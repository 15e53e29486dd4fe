pub mod backtest;
pub mod config;
pub mod facts;
pub mod logging;
pub mod math;
pub mod pricing;
pub mod rules;
pub mod service;
pub mod storage;
pub mod window;
