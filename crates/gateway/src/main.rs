mod config;
mod context;
mod service;
mod upstream;

use std::time::Duration;

use anyhow::Result;
use pingora_core::server::Server;
use pingora_proxy::http_proxy_service;
use tixgate_admin::SharedStateType as SharedState;
use tixgate_common::AppConfig;
use tixgate_rate_limit::{PolicyResolver, RateLimiter};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::GatewayConfig;
use crate::service::TixgateProxy;

fn main() -> Result<()> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let config_path = GatewayConfig::path_from_args(std::env::args());
    info!(config_path = %config_path, "starting tixgate");

    let gateway_config = GatewayConfig::load(&config_path)?;
    info!(
        path = %gateway_config.config_path.display(),
        routes = gateway_config.config.routes.len(),
        "configuration loaded"
    );
    let app_config = gateway_config.config;

    let rate_limiter = build_rate_limiter(&app_config);
    let state = tixgate_admin::new_shared_state(app_config.clone(), rate_limiter);

    // Create Pingora server
    let mut server = Server::new(None)?;
    server.bootstrap();

    let proxy = TixgateProxy::new(app_config.clone(), state.clone());
    let mut proxy_service = http_proxy_service(&server.configuration, proxy);

    for listen_addr in &app_config.server.listen {
        info!(addr = %listen_addr, "adding listener");
        proxy_service.add_tcp(listen_addr);
    }

    server.add_service(proxy_service);

    if app_config.server.admin.enabled {
        server.add_service(pingora_core::services::background::background_service(
            "admin API",
            AdminBackgroundService {
                listen_addr: app_config.server.admin.listen.clone(),
                state,
            },
        ));
    }

    info!("tixgate started successfully");
    server.run_forever();
}

/// One limiter per process, or `None` when rate limiting is disabled.
fn build_rate_limiter(config: &AppConfig) -> Option<RateLimiter> {
    if !config.rate_limit.enabled {
        return None;
    }

    let limiter = RateLimiter::new(PolicyResolver::from_config(config));

    let interval = config.rate_limit.sweep_interval_secs;
    if interval > 0 {
        if let Err(e) = limiter.start_sweep_task(Duration::from_secs(interval)) {
            warn!(error = %e, "failed to start rate limit sweep, relying on lazy expiry");
        }
    }

    Some(limiter)
}

/// Background service to run the admin API alongside Pingora.
struct AdminBackgroundService {
    listen_addr: String,
    state: SharedState,
}

#[async_trait::async_trait]
impl pingora_core::services::background::BackgroundService for AdminBackgroundService {
    async fn start(&self, mut shutdown: pingora_core::server::ShutdownWatch) {
        info!(addr = %self.listen_addr, "starting admin API");

        tokio::select! {
            result = tixgate_admin::run_admin_server(self.state.clone(), &self.listen_addr) => {
                if let Err(e) = result {
                    error!(error = %e, "admin API server error");
                }
            }
            _ = shutdown.changed() => {
                info!("admin API shutting down");
            }
        }
    }
}
