//! Gateway HTTP tests
//!
//! Drives the full router (auth middleware, handlers, write-behind) against
//! in-process stand-ins for the identity and prediction services.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum::routing::{get, post};
use chrono::Utc;
use http_body_util::BodyExt;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use predict_gateway::auth::claims::Claims;
use predict_gateway::config::Config;
use predict_gateway::gateway::Gateway;
use predict_gateway::history::{InMemoryResultStore, ResultStore};
use predict_gateway::model::UserStatistics;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower::ServiceExt;

const SECRET: &str = "gateway-test-secret";
const USER: &str = "3f1c2b4a-5d6e-4f70-8a9b-0c1d2e3f4a5b";

/// Serve `app` on an ephemeral port
async fn spawn(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Prediction service answering with one real outcome, then zeros
async fn prediction_backend() -> SocketAddr {
    let calls = Arc::new(AtomicUsize::new(0));
    let predict = move || {
        let calls = Arc::clone(&calls);
        async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                axum::Json(json!({"predicted_price": 19.99, "predicted_sales": 42.0}))
            } else {
                axum::Json(json!({"predicted_price": 0.0, "predicted_sales": 0.0}))
            }
        }
    };
    let app = Router::new()
        .route("/api/v1/predict", post(predict.clone()))
        .route("/api/v1/predict/minimal", post(predict))
        .route(
            "/api/v1/status",
            get(|| async { axum::Json(json!({"models_trained": true})) }),
        );
    spawn(app).await
}

/// Identity service accepting every registration
async fn identity_backend() -> SocketAddr {
    let app = Router::new().route(
        "/auth/register",
        post(|| async {
            (
                StatusCode::CREATED,
                axum::Json(json!({"id": USER, "email": "new@example.com"})),
            )
        }),
    );
    spawn(app).await
}

fn config(prediction: SocketAddr, identity: SocketAddr) -> Config {
    let mut config = Config::default();
    config.auth.jwt_secret = SECRET.to_string();
    config.prediction.url = format!("http://{prediction}");
    config.prediction.timeout = Duration::from_secs(2);
    config.identity.url = format!("http://{identity}");
    config.identity.timeout = Duration::from_secs(2);
    config
}

fn token(exp_in: i64) -> String {
    token_for(USER, SECRET, exp_in)
}

fn token_for(user_id: &str, secret: &str, exp_in: i64) -> String {
    let claims = Claims {
        user_id: Some(user_id.to_string()),
        sub: None,
        email: Some("user@example.com".to_string()),
        role: "user".to_string(),
        exp: Some(Utc::now().timestamp() + exp_in),
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

fn minimal_body() -> Value {
    json!({"product_name": "Kettle", "region": "North", "seller": "Shop-1"})
}

fn post_json(uri: &str, auth: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get_with(uri: &str, auth: Option<&str>) -> Request<Body> {
    let mut builder = Request::get(uri);
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    builder.body(Body::empty()).unwrap()
}

async fn send(gateway: &Gateway, request: Request<Body>) -> (StatusCode, Value) {
    let response = gateway.router().unwrap().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn statistics(gateway: &Gateway, auth: &str) -> UserStatistics {
    let (status, body) = send(gateway, get_with("/api/v1/statistics/user", Some(auth))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    serde_json::from_value(body).unwrap()
}

async fn gateway() -> (Gateway, Arc<InMemoryResultStore>) {
    let prediction = prediction_backend().await;
    let identity = identity_backend().await;
    let store = Arc::new(InMemoryResultStore::new());
    let gateway = Gateway::with_store(
        config(prediction, identity),
        Arc::clone(&store) as Arc<dyn ResultStore>,
    )
    .unwrap();
    (gateway, store)
}

/// Poll until the write-behind has made `want` records visible
async fn wait_for_history(gateway: &Gateway, auth: &str, want: usize) -> UserStatistics {
    for _ in 0..100 {
        let stats = statistics(gateway, auth).await;
        if stats.predictions.len() >= want {
            return stats;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("history never reached {want} records");
}

#[tokio::test]
async fn test_prediction_then_history() {
    let (gateway, store) = gateway().await;
    let auth = format!("Bearer {}", token(3600));

    let (status, body) = send(
        &gateway,
        post_json("/api/v1/predict/minimal", Some(&auth), &minimal_body()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"predicted_price": 19.99, "predicted_sales": 42.0}));

    let stats = wait_for_history(&gateway, &auth, 1).await;
    assert_eq!(stats.user_id.to_string(), USER);

    let (_, raw) = send(&gateway, get_with("/api/v1/statistics/user", Some(&auth))).await;
    let entry = &raw["predictions"][0];
    assert_eq!(entry["request"]["product_name"], "Kettle");
    assert_eq!(entry["endpoint_type"], "predict/minimal");
    assert_eq!(entry["minimal"], true);
    assert_eq!(stats.predictions.len(), 1);
    let recorded = stats.predictions[0].clone();
    assert_eq!(recorded.outcome.predicted_price, 19.99);
    assert_eq!(recorded.outcome.predicted_sales, 42.0);

    // Zero outcomes are returned to the caller but never recorded
    let (status, body) = send(
        &gateway,
        post_json("/api/v1/predict/minimal", Some(&auth), &minimal_body()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"predicted_price": 0.0, "predicted_sales": 0.0}));

    gateway.service().fanout().shutdown().await;
    assert_eq!(statistics(&gateway, &auth).await.predictions, vec![recorded]);
    assert_eq!(store.row_count(), 1);
}

#[tokio::test]
async fn test_statistics_for_unknown_user_is_empty() {
    let (gateway, _store) = gateway().await;
    let stats = statistics(&gateway, &format!("Bearer {}", token(3600))).await;
    assert!(stats.predictions.is_empty());
}

#[tokio::test]
async fn test_unauthorized_messages() {
    let (gateway, _store) = gateway().await;

    let (status, body) = send(&gateway, get_with("/api/v1/statistics/user", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "authorization header is required");

    let (status, body) = send(
        &gateway,
        get_with("/api/v1/statistics/user", Some("Token abc")),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid authorization header format");

    let expired = format!("Bearer {}", token(-60));
    let (status, body) = send(&gateway, get_with("/api/v1/statistics/user", Some(&expired))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "token has expired");
}

/// A rejected credential gets the same answer however often it is retried
#[tokio::test]
async fn test_rejections_are_stable_across_retries() {
    let (gateway, _store) = gateway().await;
    let cases = [
        (format!("Bearer {}", token(-60)), "token has expired"),
        (
            format!("Bearer {}", token_for("user-42", SECRET, 3600)),
            "invalid user ID",
        ),
        (
            format!("Bearer {}", token_for(USER, "not-the-gateway-secret", 3600)),
            "invalid token",
        ),
        ("Bearer abc".to_string(), "invalid token"),
    ];

    for (auth, message) in &cases {
        for attempt in 0..3 {
            let (status, body) =
                send(&gateway, get_with("/api/v1/statistics/user", Some(auth))).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{message} attempt {attempt}");
            assert_eq!(body["error"], *message, "attempt {attempt}");
        }
    }
}

#[tokio::test]
async fn test_unknown_path_is_not_found() {
    let (gateway, _store) = gateway().await;

    let (status, _) = send(&gateway, get_with("/api/v1/unknown", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let auth = format!("Bearer {}", token(3600));
    let (status, _) = send(&gateway, get_with("/api/v1/unknown", Some(&auth))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_public_paths_skip_auth() {
    let (gateway, _store) = gateway().await;

    let (status, body) = send(&gateway, get_with("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = send(
        &gateway,
        post_json(
            "/auth/register",
            None,
            &json!({"email": "new@example.com", "password": "hunter22"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["id"], USER);
}

#[tokio::test]
async fn test_invalid_bodies_rejected() {
    let (gateway, _store) = gateway().await;
    let auth = format!("Bearer {}", token(3600));

    let request = Request::post("/api/v1/predict/minimal")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, &auth)
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&gateway, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid request format");

    let mut unknown = minimal_body();
    unknown["discount_code"] = json!("SPRING");
    let (status, body) = send(
        &gateway,
        post_json("/api/v1/predict/minimal", Some(&auth), &unknown),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid request format");
}

#[tokio::test]
async fn test_prediction_backend_down() {
    let identity = identity_backend().await;
    // Bind then drop to get a port nobody listens on
    let closed = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let store = Arc::new(InMemoryResultStore::new());
    let gateway = Gateway::with_store(config(closed, identity), store).unwrap();
    let auth = format!("Bearer {}", token(3600));

    let (status, body) = send(
        &gateway,
        post_json("/api/v1/predict/minimal", Some(&auth), &minimal_body()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "upstream service failure");

    let (status, _) = send(&gateway, get_with("/api/v1/status", Some(&auth))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}
