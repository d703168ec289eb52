//! Shared configuration model and error types for tixgate.

pub mod config;
pub mod error;

pub use config::{
    route_matches, AdminConfig, AppConfig, PolicyConfig, RateLimitConfig, RouteConfig,
    ServerConfig, UpstreamConfig, UpstreamServer,
};
pub use error::{RateLimitRejection, TixgateError, TixgateResult};
