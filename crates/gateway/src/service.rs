use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use pingora_core::prelude::*;
use pingora_core::upstreams::peer::HttpPeer;
use pingora_http::{RequestHeader, ResponseHeader};
use pingora_proxy::{ProxyHttp, Session};
use tixgate_admin::SharedStateType as SharedState;
use tixgate_common::{AppConfig, RateLimitRejection};
use tracing::{debug, info, warn};

use crate::context::{client_identity, RequestContext};
use crate::upstream::UpstreamPool;

/// Reverse proxy in front of the ticketing API that enforces request quotas.
pub struct TixgateProxy {
    pub config: AppConfig,
    pub upstreams: Vec<UpstreamPool>,
    pub state: SharedState,
}

impl TixgateProxy {
    pub fn new(config: AppConfig, state: SharedState) -> Self {
        let upstreams: Vec<UpstreamPool> = config
            .upstreams
            .iter()
            .map(UpstreamPool::from_config)
            .collect();

        if state.rate_limiter.is_none() {
            info!("rate limiting disabled, all requests will be forwarded");
        }

        Self {
            config,
            upstreams,
            state,
        }
    }

    fn find_upstream(&self, name: &str) -> Option<&UpstreamPool> {
        self.upstreams.iter().find(|u| u.name == name)
    }
}

/// JSON body for a 429 response.
pub fn rejection_body(rejection: &RateLimitRejection) -> Bytes {
    match rejection.to_json() {
        Ok(body) => Bytes::from(body),
        Err(e) => {
            warn!(error = %e, "failed to encode rate limit rejection");
            Bytes::from(format!(
                "{{\"statusCode\":{},\"retryAfter\":{}}}",
                rejection.status_code, rejection.retry_after
            ))
        }
    }
}

/// Response header and body sent to a caller whose quota is exhausted.
pub fn rejection_response(rejection: &RateLimitRejection) -> Result<(ResponseHeader, Bytes)> {
    let body = rejection_body(rejection);
    let status =
        StatusCode::from_u16(rejection.status_code).unwrap_or(StatusCode::TOO_MANY_REQUESTS);
    let mut resp = ResponseHeader::build(status, Some(4))?;
    resp.insert_header("content-type", "application/json")?;
    resp.insert_header("content-length", body.len().to_string())?;
    resp.insert_header("retry-after", rejection.retry_after.to_string())?;
    Ok((resp, body))
}

impl TixgateProxy {
    /// Book-keeping for a rejected request: the counter and the fields the
    /// request log reads.
    fn record_rejection(&self, ctx: &mut RequestContext, rejection: &RateLimitRejection) {
        ctx.retry_after_secs = Some(rejection.retry_after);
        ctx.response_status = rejection.status_code;
        self.state.metrics.rate_limited_total.inc();
    }
}

#[async_trait]
impl ProxyHttp for TixgateProxy {
    type CTX = RequestContext;

    fn new_ctx(&self) -> Self::CTX {
        RequestContext::new()
    }

    async fn request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> Result<bool> {
        self.state.metrics.requests_total.inc();

        let header = session.req_header();
        ctx.method = header.method.as_str().to_string();
        ctx.path = header.uri.path().to_string();

        let forwarded_for = header
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let host = header
            .headers
            .get("host")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let peer = session.client_addr().map(|a| a.to_string());

        ctx.client_ip = client_identity(
            forwarded_for.as_deref(),
            peer.as_deref(),
            self.config.server.trust_forwarded_for,
        );
        ctx.route_index = self.config.find_route(host.as_deref(), &ctx.path);

        let Some(ref limiter) = self.state.rate_limiter else {
            return Ok(false);
        };

        let Err(err) = limiter.enforce(&ctx.client_ip, host.as_deref(), &ctx.path) else {
            return Ok(false);
        };
        let Some(rejection) = err.rejection() else {
            warn!(error = %err, "rate limiter failed, forwarding request");
            return Ok(false);
        };

        info!(
            client_ip = %ctx.client_ip,
            path = %ctx.path,
            retry_after_secs = rejection.retry_after,
            "request rate limited"
        );
        self.record_rejection(ctx, &rejection);

        let (resp, body) = rejection_response(&rejection)?;
        session.set_keepalive(None);
        session
            .write_response_header(Box::new(resp), false)
            .await?;
        session.write_response_body(Some(body), true).await?;
        Ok(true)
    }

    async fn upstream_peer(
        &self,
        _session: &mut Session,
        ctx: &mut Self::CTX,
    ) -> Result<Box<HttpPeer>> {
        let upstream_name = ctx
            .route_index
            .and_then(|i| self.config.routes.get(i))
            .or_else(|| self.config.routes.first())
            .map(|r| r.upstream.as_str())
            .unwrap_or("ticketing-api");

        let addr = self
            .find_upstream(upstream_name)
            .and_then(|u| u.select())
            .ok_or_else(|| Error::new(ErrorType::ConnectProxyFailure))?;

        debug!(upstream = upstream_name, addr, "selected upstream peer");

        let peer = HttpPeer::new(addr, false, String::new());
        Ok(Box::new(peer))
    }

    async fn upstream_request_filter(
        &self,
        _session: &mut Session,
        upstream_request: &mut RequestHeader,
        ctx: &mut Self::CTX,
    ) -> Result<()> {
        if !ctx.client_ip.is_empty() {
            upstream_request.insert_header("x-real-ip", ctx.client_ip.as_str())?;
        }
        Ok(())
    }

    async fn response_filter(
        &self,
        _session: &mut Session,
        upstream_response: &mut ResponseHeader,
        ctx: &mut Self::CTX,
    ) -> Result<()>
    where
        Self::CTX: Send + Sync,
    {
        ctx.response_status = upstream_response.status.as_u16();
        Ok(())
    }

    async fn logging(
        &self,
        _session: &mut Session,
        _error: Option<&pingora_core::Error>,
        ctx: &mut Self::CTX,
    ) {
        let duration = ctx.request_start.elapsed();

        let upstream_label = ctx
            .route_index
            .and_then(|i| self.config.routes.get(i))
            .map(|r| r.upstream.as_str())
            .unwrap_or("unknown");
        self.state
            .metrics
            .request_duration
            .with_label_values(&[upstream_label])
            .observe(duration.as_secs_f64());

        info!(
            client_ip = %ctx.client_ip,
            method = %ctx.method,
            path = %ctx.path,
            status = ctx.response_status,
            duration_ms = duration.as_millis() as u64,
            rate_limited = ctx.rate_limited(),
            "request completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tixgate_rate_limit::{ManualClock, PolicyResolver, RateLimitPolicy, RateLimiter};

    const CONFIG: &str = r#"
server:
  listen: ["0.0.0.0:8080"]
upstreams:
  - name: ticketing-api
    servers: [{ addr: "127.0.0.1:3000" }]
  - name: scanner-api
    servers: [{ addr: "127.0.0.1:3100" }]
routes:
  - path_prefix: /api/scanner
    upstream: scanner-api
  - upstream: ticketing-api
"#;

    #[test]
    fn rejection_body_matches_wire_format() {
        let body = rejection_body(&RateLimitRejection::new(17));
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(value["statusCode"], 429);
        assert_eq!(value["retryAfter"], 17);
        assert_eq!(value["message"], "Too many requests, please try again later");
    }

    #[test]
    fn rejection_response_carries_retry_after() {
        let (resp, body) = rejection_response(&RateLimitRejection::new(42)).unwrap();

        assert_eq!(resp.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers.get("retry-after").unwrap(), "42");
        assert_eq!(resp.headers.get("content-type").unwrap(), "application/json");
        assert_eq!(
            resp.headers.get("content-length").unwrap().to_str().unwrap(),
            body.len().to_string()
        );

        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["retryAfter"], 42);
    }

    #[test]
    fn rejected_request_is_counted_and_logged() {
        let config = AppConfig::from_yaml(CONFIG).unwrap();
        let limiter = RateLimiter::with_clock(
            PolicyResolver::new(RateLimitPolicy::new(60, 1)),
            Arc::new(ManualClock::new(0)),
        );
        let state = tixgate_admin::new_shared_state(config.clone(), Some(limiter.clone()));
        let proxy = TixgateProxy::new(config, state);

        limiter.enforce("10.0.0.1", None, "/api/events").unwrap();
        let err = limiter.enforce("10.0.0.1", None, "/api/events").unwrap_err();
        let rejection = err.rejection().unwrap();

        let mut ctx = RequestContext::new();
        proxy.record_rejection(&mut ctx, &rejection);

        assert!(ctx.rate_limited());
        assert_eq!(ctx.retry_after_secs, Some(60));
        assert_eq!(ctx.response_status, 429);
        assert_eq!(proxy.state.metrics.rate_limited_total.get(), 1);
    }

    #[test]
    fn proxy_builds_pools_and_shares_limiter() {
        let config = AppConfig::from_yaml(CONFIG).unwrap();
        let limiter = RateLimiter::with_clock(
            PolicyResolver::from_config(&config),
            Arc::new(ManualClock::new(0)),
        );
        let state = tixgate_admin::new_shared_state(config.clone(), Some(limiter.clone()));
        let proxy = TixgateProxy::new(config, state);

        assert_eq!(proxy.find_upstream("scanner-api").and_then(|u| u.select()), Some("127.0.0.1:3100"));
        assert!(proxy.find_upstream("missing").is_none());

        limiter.check("10.0.0.1", None, "/api/events");
        assert_eq!(
            proxy.state.rate_limiter.as_ref().map(|l| l.tracked_keys()),
            Some(1)
        );
    }
}
