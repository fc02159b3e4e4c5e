//! Routes and the rate limiting middleware.

use std::sync::Arc;

use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::gate::{GateDecision, RateLimitGate};

/// JSON body returned by every endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub status: String,
    pub body: String,
}

impl Message {
    fn successful(body: &str) -> Self {
        Self {
            status: "Successful".to_string(),
            body: body.to_string(),
        }
    }

    fn failed(body: &str) -> Self {
        Self {
            status: "Request Failed".to_string(),
            body: body.to_string(),
        }
    }
}

/// Query parameters identifying the caller.
#[derive(Debug, Deserialize)]
pub struct ClientQuery {
    /// Client identity used as the rate limit key
    pub ip: Option<String>,
}

/// Build the router with every route gated by `gate`.
pub fn router(gate: Arc<RateLimitGate>) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route_layer(middleware::from_fn_with_state(gate, rate_limit))
}

async fn ping() -> Json<Message> {
    Json(Message::successful("Hi! You've reached the API."))
}

fn reply(status: StatusCode, body: &str) -> Response {
    (status, Json(Message::failed(body))).into_response()
}

/// Admit or reject a request before it reaches its handler.
///
/// Fails closed: configuration problems reject with 403, engine failures
/// with 500, and only an admitted decision runs the handler.
async fn rate_limit(
    State(gate): State<Arc<RateLimitGate>>,
    Query(query): Query<ClientQuery>,
    request: Request,
    next: Next,
) -> Response {
    let Some(client) = query.ip.as_deref().filter(|ip| !ip.is_empty()) else {
        warn!("Received request without a client identity");
        return reply(StatusCode::BAD_REQUEST, "Missing client identity");
    };

    info!(client = %client, "Received request");

    match gate.check(client).await {
        Ok(GateDecision::Admitted) => next.run(request).await,
        Ok(GateDecision::Denied) => {
            debug!(client = %client, "Rate limit exceeded");
            reply(
                StatusCode::TOO_MANY_REQUESTS,
                "Too Many Request, try again later.",
            )
        }
        Err(e) if e.is_configuration() => {
            warn!(client = %client, error = %e, "Rejecting unconfigured client");
            reply(StatusCode::FORBIDDEN, "IP not allowed")
        }
        Err(e) => {
            error!(client = %client, error = %e, "Rate limiter failed");
            reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error in rate limiter middleware",
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::ratelimit::{Algorithm, ClientLimits, StrategyFactory};
    use crate::store::{BucketKeys, MemoryStore, SharedStore, SharedStoreHandle, StoreEvaluation};
    use async_trait::async_trait;
    use axum::body::Body;
    use std::time::Duration;
    use tower::ServiceExt;

    #[derive(Debug)]
    struct BrokenStore;

    #[async_trait]
    impl SharedStore for BrokenStore {
        async fn evaluate(
            &self,
            _keys: &BucketKeys,
            _now_ms: i64,
            _refill_rate: f64,
            _capacity: f64,
        ) -> Result<StoreEvaluation, StoreError> {
            Err(StoreError::MalformedReply("expected 3 elements, got 2".to_string()))
        }
    }

    fn app(store: SharedStoreHandle) -> Router {
        let mut limits = ClientLimits::new();
        limits.insert("1.1.1.1", 2.0, 0.001);

        let factory = StrategyFactory::new().with_store(store, Duration::from_millis(100));
        let gate = RateLimitGate::new(
            Arc::new(limits),
            factory,
            Algorithm::DistributedTokenBucket,
            Duration::from_secs(1),
        )
        .unwrap();

        router(Arc::new(gate))
    }

    async fn get_ping(app: &Router, uri: &str) -> (StatusCode, Message) {
        let response = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_admitted_request_reaches_handler() {
        let app = app(Arc::new(MemoryStore::new()));

        let (status, message) = get_ping(&app, "/ping?ip=1.1.1.1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(message.status, "Successful");
    }

    #[tokio::test]
    async fn test_exhausted_client_gets_too_many_requests() {
        let app = app(Arc::new(MemoryStore::new()));

        for _ in 0..2 {
            let (status, _) = get_ping(&app, "/ping?ip=1.1.1.1").await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, message) = get_ping(&app, "/ping?ip=1.1.1.1").await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            message,
            Message {
                status: "Request Failed".to_string(),
                body: "Too Many Request, try again later.".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_unconfigured_client_is_forbidden() {
        let app = app(Arc::new(MemoryStore::new()));

        let (status, message) = get_ping(&app, "/ping?ip=9.9.9.9").await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(message.body, "IP not allowed");
    }

    #[tokio::test]
    async fn test_store_failure_is_server_error() {
        let app = app(Arc::new(BrokenStore));

        let (status, message) = get_ping(&app, "/ping?ip=1.1.1.1").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(message.status, "Request Failed");
    }

    #[tokio::test]
    async fn test_missing_identity_is_bad_request() {
        let app = app(Arc::new(MemoryStore::new()));

        let (status, _) = get_ping(&app, "/ping").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = get_ping(&app, "/ping?ip=").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
