use axum::body::{to_bytes, Body};
use axum::extract::Path;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use pfpwall_server::config::Config;
use pfpwall_server::state::AppState;
use pfpwall_server::storage::{ProfileRecord, ProfileStore};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceExt;

async fn spawn_upstream(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock upstream");
    let addr = listener.local_addr().expect("mock upstream addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

async fn mock_twitter_user(Path(handle): Path<String>, headers: HeaderMap) -> Response {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value == "Bearer token-1");
    if !authorized {
        return (StatusCode::UNAUTHORIZED, "bad token").into_response();
    }
    match handle.as_str() {
        "ghost" | "nobody" => (StatusCode::NOT_FOUND, "missing").into_response(),
        "limited" => (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, "17")],
            "slow down",
        )
            .into_response(),
        "blank" => Json(json!({ "data": { "id": "7" } })).into_response(),
        _ => Json(json!({
            "data": {
                "id": "42",
                "profile_image_url": format!("https://pbs.twimg.com/profile_images/1/{handle}_normal.jpg"),
            }
        }))
        .into_response(),
    }
}

async fn mock_unavatar(Path(handle): Path<String>) -> Response {
    if handle == "nobody" {
        return Json(json!({ "url": "https://unavatar.io/fallback.png" })).into_response();
    }
    Json(json!({ "url": format!("https://cdn.unavatar.io/{handle}.jpg") })).into_response()
}

struct Harness {
    app: Router,
    state: Arc<AppState>,
}

impl Harness {
    async fn start(tokens: Vec<String>, secret: Option<&str>) -> Self {
        let twitter = spawn_upstream(
            Router::new().route("/2/users/by/username/{handle}", get(mock_twitter_user)),
        )
        .await;
        let unavatar =
            spawn_upstream(Router::new().route("/twitter/{handle}", get(mock_unavatar))).await;

        let mut config = Config::default();
        config.storage.backend = "memory".to_string();
        config.twitter.api_hosts = vec![twitter];
        config.twitter.bearer_tokens = tokens;
        config.unavatar.base_url = unavatar;
        config.refresh.secret = secret.map(str::to_string);
        config.refresh.delay_ms = 0;

        let state = Arc::new(AppState::new(config).expect("build state"));
        let app = pfpwall_server::build_router(state.clone());
        Self { app, state }
    }

    async fn with_token() -> Self {
        Self::start(vec!["token-1".to_string()], Some("s3cret")).await
    }

    async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        self.app
            .clone()
            .oneshot(builder.body(body).expect("build request"))
            .await
            .expect("router response")
    }
}

async fn read_json(response: Response) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("parse json")
}

fn env_has_bearer() -> bool {
    ["TWITTER_BEARER", "TWITTER_BEARER_TOKEN_2"]
        .iter()
        .any(|name| std::env::var(name).is_ok_and(|value| !value.trim().is_empty()))
}

#[tokio::test]
async fn health_reports_ok() {
    let harness = Harness::with_token().await;
    let response = harness.send(Method::GET, "/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await, json!({ "ok": true }));
}

#[tokio::test]
async fn submitted_handle_is_normalized_and_listed() {
    let harness = Harness::with_token().await;
    let response = harness
        .send(Method::POST, "/api/submit", Some(json!({ "handle": "@Foo" })))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json(response).await;
    assert_eq!(payload["ok"], json!(true));
    assert_eq!(
        payload["profile"]["pfp_url"],
        json!("https://pbs.twimg.com/profile_images/1/foo_400x400.jpg")
    );

    let response = harness.send(Method::GET, "/api/list", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CACHE_CONTROL],
        "s-maxage=120, stale-while-revalidate=1800"
    );
    let profiles = read_json(response).await;
    let profiles = profiles.as_array().expect("profile array");
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0]["handle"], json!("foo"));
    assert_eq!(profiles[0]["twitter_url"], json!("https://twitter.com/foo"));
}

#[tokio::test]
async fn resubmitting_keeps_one_record_per_handle() {
    let harness = Harness::with_token().await;
    let first = read_json(
        harness
            .send(Method::POST, "/api/submit", Some(json!({ "handle": "@dup" })))
            .await,
    )
    .await;
    let second = read_json(
        harness
            .send(Method::POST, "/api/submit", Some(json!({ "handle": "@DUP" })))
            .await,
    )
    .await;
    assert_eq!(first["profile"]["id"], second["profile"]["id"]);
    assert_eq!(harness.state.store.list_all().unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_api_user_falls_back_to_public_resolver() {
    let harness = Harness::with_token().await;
    let payload = read_json(
        harness
            .send(Method::POST, "/api/submit", Some(json!({ "handle": "@ghost" })))
            .await,
    )
    .await;
    assert_eq!(
        payload["profile"]["pfp_url"],
        json!("https://cdn.unavatar.io/ghost.jpg")
    );
}

#[tokio::test]
async fn submit_rejections_use_unified_error_body() {
    let harness = Harness::with_token().await;

    let response = harness
        .send(Method::POST, "/api/submit", Some(json!({ "handle": "foo" })))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(response.headers().contains_key("x-trace-id"));
    let payload = read_json(response).await;
    assert_eq!(payload["ok"], json!(false));
    assert_eq!(
        payload["error"],
        json!("Please enter your @handle (must start with @)")
    );
    assert_eq!(payload["detail"]["code"], json!("INVALID_REQUEST"));

    let response = harness.send(Method::POST, "/api/submit", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = harness
        .send(Method::POST, "/api/submit", Some(json!({ "handle": "@nobody" })))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let payload = read_json(response).await;
    assert_eq!(payload["detail"]["code"], json!("HANDLE_NOT_FOUND"));
    assert_eq!(
        payload["error"],
        json!("X handle not found. Please enter a valid X username.")
    );
    assert!(harness.state.store.list_all().unwrap().is_empty());
}

#[tokio::test]
async fn unsupported_methods_return_405_with_allow() {
    let harness = Harness::with_token().await;
    for (method, uri, allow) in [
        (Method::GET, "/api/submit", "POST"),
        (Method::POST, "/api/list", "GET"),
        (Method::DELETE, "/api/refresh-fallbacks", "GET, POST"),
        (Method::POST, "/api/img?u=https://pbs.twimg.com/a.jpg", "GET, HEAD"),
        (Method::POST, "/api/twitter-pfp?u=jack", "GET"),
    ] {
        let response = harness.send(method.clone(), uri, None).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED, "{method} {uri}");
        assert_eq!(response.headers()[header::ALLOW], allow);
        let payload = read_json(response).await;
        assert_eq!(payload["detail"]["code"], json!("METHOD_NOT_ALLOWED"));
    }
}

#[tokio::test]
async fn odd_query_strings_still_get_json_errors() {
    let harness = Harness::with_token().await;
    for (method, uri, status, code) in [
        (Method::POST, "/api/img?u=a&u=b", StatusCode::METHOD_NOT_ALLOWED, "METHOD_NOT_ALLOWED"),
        (Method::PUT, "/api/twitter-pfp?u=a&u=b", StatusCode::METHOD_NOT_ALLOWED, "METHOD_NOT_ALLOWED"),
        (Method::GET, "/api/img?u=%zz&u=https%3A%2F%2Fpbs.twimg.com%2Fa.jpg", StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
        (Method::GET, "/api/twitter-pfp?u=bad-handle&u=jack", StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
    ] {
        let response = harness.send(method.clone(), uri, None).await;
        assert_eq!(response.status(), status, "{method} {uri}");
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json",
            "{method} {uri}"
        );
        let payload = read_json(response).await;
        assert_eq!(payload["ok"], json!(false));
        assert_eq!(payload["detail"]["status"], json!(status.as_u16()));
        assert_eq!(payload["detail"]["code"], json!(code), "{method} {uri}");
    }
}

#[tokio::test]
async fn image_proxy_rejects_bad_targets() {
    let harness = Harness::with_token().await;
    for (uri, message) in [
        ("/api/img", "missing url"),
        ("/api/img?u=%3A%2F%2Fnope", "invalid url"),
        ("/api/img?u=http%3A%2F%2Fpbs.twimg.com%2Fa.jpg", "https only"),
        ("/api/img?u=https%3A%2F%2Fexample.com%2Fa.jpg", "host not allowed"),
    ] {
        let response = harness.send(Method::GET, uri, None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(read_json(response).await["error"], json!(message));
    }
}

#[tokio::test]
async fn refresh_requires_configured_and_matching_secret() {
    let unset = Harness::start(vec!["token-1".to_string()], None).await;
    if std::env::var("REFRESH_SECRET").is_err() {
        let response = unset.send(Method::GET, "/api/refresh-fallbacks", None).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(read_json(response).await["error"], json!("REFRESH_SECRET not set"));
    }

    let harness = Harness::with_token().await;
    let response = harness
        .send(Method::GET, "/api/refresh-fallbacks?secret=wrong", None)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/api/refresh-fallbacks")
                .header("x-refresh-secret", "s3cret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
}

#[tokio::test]
async fn refresh_rejects_padded_secret() {
    let harness = Harness::with_token().await;
    let response = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/api/refresh-fallbacks")
                .header("x-refresh-secret", " s3cret ")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = harness
        .send(Method::GET, "/api/refresh-fallbacks?secret=%20s3cret", None)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(read_json(response).await["error"], json!("Unauthorized"));
}

#[tokio::test]
async fn refresh_without_tokens_fails_before_touching_store() {
    if env_has_bearer() {
        return;
    }
    let harness = Harness::start(Vec::new(), Some("s3cret")).await;
    harness
        .state
        .store
        .upsert_by_handle(&ProfileRecord::new("stale", "https://unavatar.io/twitter/stale"))
        .unwrap();

    let response = harness
        .send(Method::GET, "/api/refresh-fallbacks?secret=s3cret", None)
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        read_json(response).await["error"],
        json!("No TWITTER_BEARER tokens configured")
    );
    let records = harness.state.store.list_all().unwrap();
    assert_eq!(records[0].pfp_url, "https://unavatar.io/twitter/stale");
}

#[tokio::test]
async fn refresh_replaces_only_fallback_images() {
    let harness = Harness::with_token().await;
    for (handle, pfp) in [
        ("good", "https://pbs.twimg.com/profile_images/9/good_400x400.jpg"),
        ("stale", "https://unavatar.io/twitter/stale"),
        (
            "proxied",
            "/api/img?u=https%3A%2F%2Funavatar.io%2Ftwitter%2Fproxied",
        ),
        ("ghost", "/img/default-pfp.svg"),
    ] {
        harness
            .state
            .store
            .upsert_by_handle(&ProfileRecord::new(handle, pfp))
            .unwrap();
    }

    let response = harness
        .send(Method::GET, "/api/refresh-fallbacks?secret=s3cret", None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let summary = read_json(response).await;
    assert_eq!(summary["ok"], json!(true));
    assert_eq!(summary["scanned"], json!(4));
    assert_eq!(summary["refreshed"], json!(1));
    assert_eq!(summary["kept"], json!(3));
    assert_eq!(summary["errors"], json!(0));
    assert_eq!(summary["tokenUsage"], json!([1]));
    assert_eq!(summary["refreshedHandles"], json!(["stale"]));

    let records = harness.state.store.list_all().unwrap();
    let stale = records.iter().find(|r| r.handle == "stale").unwrap();
    assert_eq!(
        stale.pfp_url,
        "https://pbs.twimg.com/profile_images/1/stale_400x400.jpg"
    );
    let proxied = records.iter().find(|r| r.handle == "proxied").unwrap();
    assert_eq!(
        proxied.pfp_url,
        "/api/img?u=https%3A%2F%2Funavatar.io%2Ftwitter%2Fproxied"
    );
    let ghost = records.iter().find(|r| r.handle == "ghost").unwrap();
    assert_eq!(ghost.pfp_url, "/img/default-pfp.svg");
}

#[tokio::test]
async fn lookup_returns_upgraded_image_with_cache_headers() {
    let harness = Harness::with_token().await;
    let response = harness
        .send(Method::GET, "/api/twitter-pfp?u=%40jack", None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CACHE_CONTROL],
        "s-maxage=21600, stale-while-revalidate=86400"
    );
    let payload = read_json(response).await;
    assert_eq!(payload["handle"], json!("jack"));
    assert_eq!(
        payload["url"],
        json!("https://pbs.twimg.com/profile_images/1/jack_400x400.jpg")
    );
    assert_eq!(
        payload["raw"],
        json!("https://pbs.twimg.com/profile_images/1/jack_normal.jpg")
    );
    assert_eq!(payload["user_id"], json!("42"));
}

#[tokio::test]
async fn lookup_maps_upstream_failures() {
    let harness = Harness::with_token().await;

    let response = harness
        .send(Method::GET, "/api/twitter-pfp?u=bad-handle", None)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(response).await["error"], json!("Invalid handle"));

    let response = harness
        .send(Method::GET, "/api/twitter-pfp?u=limited", None)
        .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[header::RETRY_AFTER], "17");
    assert_eq!(read_json(response).await["detail"]["retryAfter"], json!("17"));

    let response = harness
        .send(Method::GET, "/api/twitter-pfp?u=blank", None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(read_json(response).await["error"], json!("No profile_image_url"));

    let response = harness
        .send(Method::GET, "/api/twitter-pfp?u=ghost", None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(read_json(response).await["error"], json!("Upstream 404"));
}
