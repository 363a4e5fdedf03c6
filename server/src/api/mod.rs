use axum::{
    extract::{DefaultBodyLimit, Request, State as AxumState},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use governor::middleware::NoOpMiddleware;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::Service;

mod http;

pub struct Api {
    service: Arc<Service>,
}

type IpGovernorConfig =
    tower_governor::governor::GovernorConfig<SmartIpKeyExtractor, NoOpMiddleware>;

fn governor_config(period: Duration, burst_size: u32) -> Option<Arc<IpGovernorConfig>> {
    GovernorConfigBuilder::default()
        .period(period)
        .burst_size(burst_size)
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .or_else(|| {
            tracing::warn!("invalid rate-limit config; falling back to defaults");
            GovernorConfigBuilder::default()
                .key_extractor(SmartIpKeyExtractor)
                .finish()
        })
        .map(Arc::new)
}

impl Api {
    pub fn new(service: Arc<Service>) -> Self {
        Self { service }
    }

    pub fn router(&self) -> Router {
        let config = &self.service.config;

        let allowed_origins = parse_allowed_origins("ALLOWED_HTTP_ORIGINS");
        let cors = if allowed_origins.is_empty() || allowed_origins.iter().any(|o| o == "*") {
            CorsLayer::new().allow_origin(AllowOrigin::any())
        } else {
            let origins = allowed_origins
                .iter()
                .filter_map(|origin| match HeaderValue::from_str(origin) {
                    Ok(value) => Some(value),
                    Err(_) => {
                        tracing::warn!("Invalid origin in ALLOWED_HTTP_ORIGINS: {}", origin);
                        None
                    }
                })
                .collect::<Vec<_>>();
            CorsLayer::new().allow_origin(AllowOrigin::list(origins))
        }
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::HeaderName::from_static("x-admin-token"),
            header::HeaderName::from_static("x-request-id"),
        ])
        .expose_headers([header::HeaderName::from_static("x-request-id")]);

        // Environment variables override config
        let http_rate_per_sec =
            parse_env_u64("RATE_LIMIT_HTTP_PER_SEC").or(config.http_rate_limit_per_second);
        let http_rate_burst =
            parse_env_u32("RATE_LIMIT_HTTP_BURST").or(config.http_rate_limit_burst);
        let bet_rate_per_min =
            parse_env_u64("RATE_LIMIT_BET_PER_MIN").or(config.bet_rate_limit_per_minute);
        let bet_rate_burst = parse_env_u32("RATE_LIMIT_BET_BURST").or(config.bet_rate_limit_burst);

        let governor_conf = match (http_rate_per_sec, http_rate_burst) {
            (Some(rate_per_second), Some(burst_size)) if rate_per_second > 0 && burst_size > 0 => {
                let nanos_per_request = (1_000_000_000u64 / rate_per_second).max(1);
                governor_config(Duration::from_nanos(nanos_per_request), burst_size)
            }
            _ => None,
        };

        let bet_governor_conf = match (bet_rate_per_min, bet_rate_burst) {
            (Some(rate_per_minute), Some(burst_size)) if rate_per_minute > 0 && burst_size > 0 => {
                let nanos_per_request = (60_000_000_000u64 / rate_per_minute).max(1);
                let period = Duration::from_nanos(nanos_per_request);
                tracing::info!(
                    rate_per_minute,
                    burst_size,
                    period_ms = period.as_millis() as u64,
                    "bet endpoint rate limit configured"
                );
                governor_config(period, burst_size)
            }
            _ => None,
        };

        // Stakes get their own, stricter limiter
        let bet_route = match bet_governor_conf {
            Some(config) => Router::new()
                .route("/api/roulette/bet", post(http::place_bet))
                .layer(GovernorLayer { config }),
            None => Router::new().route("/api/roulette/bet", post(http::place_bet)),
        };

        let router = Router::new()
            .route("/healthz", get(http::healthz))
            .route("/config", get(http::config))
            .route("/metrics/http", get(http::http_metrics))
            .route("/api/roulette/state", get(http::current_round))
            .route("/api/roulette/rounds/:round_id", get(http::get_round))
            .route(
                "/api/roulette/rounds/:round_id/resolve",
                post(http::resolve_round),
            )
            .route("/api/roulette/rounds/:round_id/reset", post(http::reset_round))
            .route("/api/store/gifts", get(http::list_gifts))
            .route("/api/store/buy", post(http::buy_gift))
            .route("/api/users/sync", post(http::sync_user))
            .route("/api/users/:user_id/gifts", get(http::user_gifts));

        let router = match governor_conf {
            Some(config) => router.layer(GovernorLayer { config }),
            None => router,
        };

        let router = router.merge(bet_route);
        let router = router.layer(cors);
        let router = match config.http_body_limit_bytes {
            Some(limit) if limit > 0 => router.layer(DefaultBodyLimit::max(limit)),
            _ => router,
        };
        let router = router.layer(middleware::from_fn_with_state(
            self.service.clone(),
            request_id_middleware,
        ));
        let router = router.layer(TraceLayer::new_for_http());

        router.with_state(self.service.clone())
    }
}

fn parse_allowed_origins(var: &str) -> Vec<String> {
    std::env::var(var)
        .unwrap_or_default()
        .split(',')
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

fn parse_env_u64(var: &str) -> Option<u64> {
    std::env::var(var).ok().and_then(|v| v.parse().ok())
}

fn parse_env_u32(var: &str) -> Option<u32> {
    std::env::var(var).ok().and_then(|v| v.parse().ok())
}

async fn request_id_middleware(
    AxumState(service): AxumState<Arc<Service>>,
    req: Request,
    next: Next,
) -> Response {
    let request_id = req
        .headers()
        .get(header::HeaderName::from_static("x-request-id"))
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();
    let mut response = next.run(req).await;
    match response.status() {
        StatusCode::PAYLOAD_TOO_LARGE => service.http_metrics().inc_reject_body_limit(),
        StatusCode::TOO_MANY_REQUESTS => service.http_metrics().inc_reject_rate_limit(),
        _ => {}
    }
    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(
            header::HeaderName::from_static("x-request-id"),
            header_value,
        );
    }
    tracing::info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "http.request"
    );
    response
}
