pub mod adapter;
pub mod booster;
pub mod config;
pub mod encoding;
pub mod error;
pub mod lookup;
pub mod model;
