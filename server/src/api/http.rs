use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State as AxumState,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use giftwheel_execution::Error as EngineError;
use giftwheel_types::{GiftId, ItemId, RoundId, StakeId, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{Service, ServiceError};

#[derive(Serialize)]
struct HealthzResponse {
    ok: bool,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct BetRequest {
    user_id: UserId,
    user_gift_id: ItemId,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlacedStakeResponse {
    round_id: RoundId,
    stake_id: StakeId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct StateQuery {
    round_id: Option<RoundId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct BuyRequest {
    user_id: UserId,
    gift_id: GiftId,
    #[serde(default)]
    transaction_memo: String,
}

#[derive(Deserialize)]
pub(super) struct SyncRequest {
    id: UserId,
    #[serde(default)]
    username: Option<String>,
}

/// Wire form of a failed operation: `{error: CODE, message}`.
struct ApiError(ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0.code() {
            "ITEM_NOT_OWNED" => StatusCode::FORBIDDEN,
            "DUPLICATE_STAKE"
            | "ROUND_FULL"
            | "ROUND_NOT_ACCEPTING_STAKES"
            | "INVALID_ROUND_STATE"
            | "NOT_ENOUGH_PARTICIPANTS" => StatusCode::CONFLICT,
            "ROUND_NOT_FOUND" | "GIFT_NOT_FOUND" => StatusCode::NOT_FOUND,
            "PAYMENT_NOT_CONFIRMED" | "BAD_REQUEST" => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = ?self.0, "request failed");
            "internal error".to_string()
        } else {
            self.0.to_string()
        };
        (
            status,
            Json(ErrorResponse {
                error: self.0.code(),
                message,
            }),
        )
            .into_response()
    }
}

/// Count the failure against the service's metrics and render it.
fn reject(service: &Service, err: ServiceError) -> Response {
    match &err {
        ServiceError::Engine(EngineError::Admission(_)) => {
            service.http_metrics().inc_reject_admission()
        }
        ServiceError::Engine(EngineError::Store(_)) | ServiceError::Internal(_) => {
            service.http_metrics().inc_internal_error()
        }
        _ => {}
    }
    ApiError::from(err).into_response()
}

/// Malformed bodies, paths and queries get the same `{error, message}` shape as domain errors.
fn bad_request(service: &Service, status: StatusCode, message: String) -> Response {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        return (
            status,
            Json(ErrorResponse {
                error: "PAYLOAD_TOO_LARGE",
                message,
            }),
        )
            .into_response();
    }
    reject(service, ServiceError::BadRequest(message))
}

fn respond<T: Serialize>(service: &Service, result: Result<T, ServiceError>) -> Response {
    match result {
        Ok(value) => Json(value).into_response(),
        Err(err) => reject(service, err),
    }
}

pub(super) async fn healthz() -> Response {
    Json(HealthzResponse { ok: true }).into_response()
}

pub(super) async fn config(AxumState(service): AxumState<Arc<Service>>) -> Response {
    Json(service.config.clone()).into_response()
}

pub(super) async fn http_metrics(AxumState(service): AxumState<Arc<Service>>) -> Response {
    Json(service.http_metrics_snapshot()).into_response()
}

pub(super) async fn place_bet(
    AxumState(service): AxumState<Arc<Service>>,
    request: Result<Json<BetRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match request {
        Ok(request) => request,
        Err(rejection) => return bad_request(&service, rejection.status(), rejection.body_text()),
    };
    let result = service
        .place_stake(request.user_id, request.user_gift_id)
        .await
        .map(|placed| PlacedStakeResponse {
            round_id: placed.round_id,
            stake_id: placed.stake_id,
        });
    respond(&service, result)
}

pub(super) async fn current_round(
    AxumState(service): AxumState<Arc<Service>>,
    query: Result<Query<StateQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => return bad_request(&service, rejection.status(), rejection.body_text()),
    };
    let result = service.round_view(query.round_id).await;
    respond(&service, result)
}

pub(super) async fn get_round(
    AxumState(service): AxumState<Arc<Service>>,
    round_id: Result<Path<RoundId>, PathRejection>,
) -> Response {
    let Path(round_id) = match round_id {
        Ok(round_id) => round_id,
        Err(rejection) => return bad_request(&service, rejection.status(), rejection.body_text()),
    };
    let result = service.round_view(Some(round_id)).await;
    respond(&service, result)
}

pub(super) async fn resolve_round(
    AxumState(service): AxumState<Arc<Service>>,
    round_id: Result<Path<RoundId>, PathRejection>,
) -> Response {
    let Path(round_id) = match round_id {
        Ok(round_id) => round_id,
        Err(rejection) => return bad_request(&service, rejection.status(), rejection.body_text()),
    };
    let result = service.resolve_round(round_id).await;
    respond(&service, result)
}

pub(super) async fn reset_round(
    AxumState(service): AxumState<Arc<Service>>,
    headers: HeaderMap,
    round_id: Result<Path<RoundId>, PathRejection>,
) -> Response {
    if let Some(status) = admin_auth_error(&headers) {
        return (
            status,
            Json(ErrorResponse {
                error: "UNAUTHORIZED",
                message: "invalid or missing admin token".to_string(),
            }),
        )
            .into_response();
    }
    let Path(round_id) = match round_id {
        Ok(round_id) => round_id,
        Err(rejection) => return bad_request(&service, rejection.status(), rejection.body_text()),
    };
    let result = service.reset_round(round_id).await;
    if result.is_ok() {
        tracing::warn!(round_id, "round reset by admin");
    }
    respond(&service, result)
}

pub(super) async fn list_gifts(AxumState(service): AxumState<Arc<Service>>) -> Response {
    let result = service.gifts().await;
    respond(&service, result)
}

pub(super) async fn buy_gift(
    AxumState(service): AxumState<Arc<Service>>,
    request: Result<Json<BuyRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match request {
        Ok(request) => request,
        Err(rejection) => return bad_request(&service, rejection.status(), rejection.body_text()),
    };
    let result = service
        .buy(request.user_id, request.gift_id, request.transaction_memo)
        .await;
    respond(&service, result)
}

pub(super) async fn sync_user(
    AxumState(service): AxumState<Arc<Service>>,
    request: Result<Json<SyncRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match request {
        Ok(request) => request,
        Err(rejection) => return bad_request(&service, rejection.status(), rejection.body_text()),
    };
    let result = service.sync_user(request.id, request.username).await;
    respond(&service, result)
}

pub(super) async fn user_gifts(
    AxumState(service): AxumState<Arc<Service>>,
    user_id: Result<Path<UserId>, PathRejection>,
) -> Response {
    let Path(user_id) = match user_id {
        Ok(user_id) => user_id,
        Err(rejection) => return bad_request(&service, rejection.status(), rejection.body_text()),
    };
    let result = service.inventory(user_id).await;
    respond(&service, result)
}

fn admin_auth_error(headers: &HeaderMap) -> Option<StatusCode> {
    let token = std::env::var("ADMIN_AUTH_TOKEN").unwrap_or_default();
    if token.is_empty() {
        // No token configured blocks every admin route
        return Some(StatusCode::UNAUTHORIZED);
    }
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    let header_token = headers
        .get("x-admin-token")
        .and_then(|value| value.to_str().ok());
    if bearer == Some(token.as_str()) || header_token == Some(token.as_str()) {
        None
    } else {
        Some(StatusCode::UNAUTHORIZED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Api, ServerConfig};
    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request},
        Router,
    };
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    fn router(config: ServerConfig) -> (Arc<Service>, Router) {
        let service = Arc::new(
            Service::in_memory(ServerConfig {
                seed_catalog: true,
                deterministic_seed: Some(3),
                ..config
            })
            .unwrap(),
        );
        let router = Api::new(service.clone()).router();
        (service, router)
    }

    async fn send(
        router: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn buy(router: &Router, user_id: UserId, gift_id: u64) -> u64 {
        let (status, item) = send(
            router,
            Method::POST,
            "/api/store/buy",
            Some(json!({"userId": user_id, "giftId": gift_id, "transactionMemo": "memo"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        item["id"].as_u64().unwrap()
    }

    #[tokio::test]
    async fn test_healthz_and_config() {
        let (_, router) = router(ServerConfig::for_tests());
        let (status, body) = send(&router, Method::GET, "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": true}));

        let (status, body) = send(&router, Method::GET, "/config", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["maxParticipants"], 5);
        assert_eq!(body["countdownMs"], 20_000);
    }

    #[tokio::test]
    async fn test_stake_flow_and_error_codes() {
        let (service, router) = router(ServerConfig::for_tests());
        let (status, user) = send(
            &router,
            Method::POST,
            "/api/users/sync",
            Some(json!({"id": 42, "username": "carol"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(user["username"], "carol");

        let (_, gifts) = send(&router, Method::GET, "/api/store/gifts", None).await;
        let gift_id = gifts[0]["id"].as_u64().unwrap();
        let item_id = buy(&router, 42, gift_id).await;

        let (_, inventory) = send(&router, Method::GET, "/api/users/42/gifts", None).await;
        assert_eq!(inventory.as_array().unwrap().len(), 1);

        let bet = json!({"userId": 42, "userGiftId": item_id});
        let (status, placed) =
            send(&router, Method::POST, "/api/roulette/bet", Some(bet.clone())).await;
        assert_eq!(status, StatusCode::OK);
        let round_id = placed["roundId"].as_u64().unwrap();

        let (status, body) = send(&router, Method::POST, "/api/roulette/bet", Some(bet)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "DUPLICATE_STAKE");

        let (status, body) = send(
            &router,
            Method::POST,
            "/api/roulette/bet",
            Some(json!({"userId": 7, "userGiftId": item_id})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "ITEM_NOT_OWNED");

        let (status, view) = send(&router, Method::GET, "/api/roulette/state", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["roundId"].as_u64(), Some(round_id));
        assert_eq!(view["status"], "waiting");
        assert_eq!(view["participants"][0]["displayName"], "carol");

        let uri = format!("/api/roulette/rounds/{round_id}/resolve");
        let (status, body) = send(&router, Method::POST, &uri, None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "NOT_ENOUGH_PARTICIPANTS");

        let (status, body) = send(&router, Method::GET, "/api/roulette/rounds/999", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "ROUND_NOT_FOUND");

        assert_eq!(service.http_metrics_snapshot().reject_admission, 2);
    }

    #[tokio::test]
    async fn test_round_resolves_over_http() {
        let (_, router) = router(ServerConfig {
            countdown_ms: 1,
            ..ServerConfig::for_tests()
        });
        let (_, gifts) = send(&router, Method::GET, "/api/store/gifts", None).await;
        let gift_id = gifts[1]["id"].as_u64().unwrap();
        let first = buy(&router, 1, gift_id).await;
        let second = buy(&router, 2, gift_id).await;

        let (_, placed) = send(
            &router,
            Method::POST,
            "/api/roulette/bet",
            Some(json!({"userId": 1, "userGiftId": first})),
        )
        .await;
        let round_id = placed["roundId"].as_u64().unwrap();
        send(
            &router,
            Method::POST,
            "/api/roulette/bet",
            Some(json!({"userId": 2, "userGiftId": second})),
        )
        .await;

        tokio::time::sleep(Duration::from_millis(5)).await;
        let uri = format!("/api/roulette/rounds/{round_id}");
        let (_, view) = send(&router, Method::GET, &uri, None).await;
        assert_eq!(view["status"], "spinning");

        let (status, resolution) =
            send(&router, Method::POST, &format!("{uri}/resolve"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resolution["settledItemCount"], 2);
        let winner = resolution["winnerId"].as_u64().unwrap();
        assert!(winner == 1 || winner == 2);

        let (_, inventory) =
            send(&router, Method::GET, &format!("/api/users/{winner}/gifts"), None).await;
        assert_eq!(inventory.as_array().unwrap().len(), 2);

        let (status, body) = send(&router, Method::POST, &format!("{uri}/resolve"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "INVALID_ROUND_STATE");
    }

    #[tokio::test]
    async fn test_buy_errors() {
        let (_, router) = router(ServerConfig::for_tests());
        let (status, body) = send(
            &router,
            Method::POST,
            "/api/store/buy",
            Some(json!({"userId": 1, "giftId": 999, "transactionMemo": "memo"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "GIFT_NOT_FOUND");

        let (status, body) = send(
            &router,
            Method::POST,
            "/api/store/buy",
            Some(json!({"userId": 1, "giftId": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_reset_requires_admin_token() {
        let (_, router) = router(ServerConfig::for_tests());
        let (status, body) =
            send(&router, Method::POST, "/api/roulette/rounds/1/reset", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_body_limit_is_counted() {
        let (service, router) = router(ServerConfig {
            http_body_limit_bytes: Some(32),
            ..ServerConfig::for_tests()
        });
        let (status, _) = send(
            &router,
            Method::POST,
            "/api/users/sync",
            Some(json!({"id": 1, "username": "x".repeat(256)})),
        )
        .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(service.http_metrics_snapshot().reject_body_limit, 1);
    }

    #[tokio::test]
    async fn test_malformed_requests_get_json_errors() {
        let (_, router) = router(ServerConfig::for_tests());
        let (status, body) = send(
            &router,
            Method::POST,
            "/api/roulette/bet",
            Some(json!({"userId": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "BAD_REQUEST");
        assert!(body["message"].as_str().unwrap().contains("userGiftId"));

        let (status, body) = send(&router, Method::GET, "/api/users/abc/gifts", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "BAD_REQUEST");

        let (status, body) =
            send(&router, Method::POST, "/api/roulette/rounds/abc/resolve", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "BAD_REQUEST");

        let (status, body) =
            send(&router, Method::GET, "/api/roulette/state?roundId=x", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "BAD_REQUEST");

        let (status, body) = send(&router, Method::POST, "/api/users/sync", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_reset_with_admin_token() {
        std::env::set_var("ADMIN_AUTH_TOKEN", "reset-secret");
        let (_, router) = router(ServerConfig::for_tests());
        let (_, gifts) = send(&router, Method::GET, "/api/store/gifts", None).await;
        let gift_id = gifts[0]["id"].as_u64().unwrap();
        let first = buy(&router, 1, gift_id).await;
        let second = buy(&router, 2, gift_id).await;
        let (_, placed) = send(
            &router,
            Method::POST,
            "/api/roulette/bet",
            Some(json!({"userId": 1, "userGiftId": first})),
        )
        .await;
        let round_id = placed["roundId"].as_u64().unwrap();
        send(
            &router,
            Method::POST,
            "/api/roulette/bet",
            Some(json!({"userId": 2, "userGiftId": second})),
        )
        .await;
        let (_, view) = send(&router, Method::GET, "/api/roulette/state", None).await;
        assert_eq!(view["status"], "countdown");

        let uri = format!("/api/roulette/rounds/{round_id}/reset");
        let reset = |token: &str| {
            Request::builder()
                .method(Method::POST)
                .uri(uri.as_str())
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap()
        };

        let response = router.clone().oneshot(reset("wrong")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = router.clone().oneshot(reset("reset-secret")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let view: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(view["roundId"].as_u64(), Some(round_id));
        assert_eq!(view["status"], "waiting");
        assert!(view["participants"].as_array().unwrap().is_empty());

        let (_, inventory) = send(&router, Method::GET, "/api/users/1/gifts", None).await;
        assert_eq!(inventory[0]["id"].as_u64(), Some(first));
        assert_eq!(inventory[0]["staked"], false);
    }

    #[test]
    fn test_admin_auth_rejects_missing_headers() {
        assert_eq!(
            admin_auth_error(&HeaderMap::new()),
            Some(StatusCode::UNAUTHORIZED)
        );
    }
}
