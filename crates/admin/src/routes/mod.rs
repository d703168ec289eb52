pub mod config;
pub mod health;
pub mod limits;
pub mod metrics;
pub mod stats;
