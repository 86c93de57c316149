//! End-to-end tests of the redirect server's HTTP surface, exercised
//! in-process against the router.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use beacon_server::{build_router, TargetStore};

fn server_with_secret(secret: &str) -> (Router, TargetStore) {
    let store = TargetStore::new(secret).unwrap();
    (build_router(store.clone()), store)
}

async fn get(router: &Router, uri: &str) -> (StatusCode, Vec<(String, String)>, String) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let headers = response
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
        .collect();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, String::from_utf8_lossy(&body).into_owned())
}

fn location(headers: &[(String, String)]) -> Option<&str> {
    headers
        .iter()
        .find(|(k, _)| k == header::LOCATION.as_str())
        .map(|(_, v)| v.as_str())
}

#[tokio::test]
async fn redirect_preserves_path_and_query() {
    let (router, store) = server_with_secret("s3cret");
    store.set_target(Some("https://host".into())).await;

    let (status, headers, _) = get(&router, "/foo/bar?x=1").await;
    assert_eq!(status, StatusCode::MOVED_PERMANENTLY);
    assert_eq!(location(&headers), Some("https://host/foo/bar?x=1"));
}

#[tokio::test]
async fn redirect_passes_odd_paths_through_verbatim() {
    let (router, store) = server_with_secret("s3cret");
    store.set_target(Some("https://host".into())).await;

    let (status, headers, _) = get(&router, "/a//b%20c?q=%2F").await;
    assert_eq!(status, StatusCode::MOVED_PERMANENTLY);
    assert_eq!(location(&headers), Some("https://host/a//b%20c?q=%2F"));
}

#[tokio::test]
async fn unset_target_serves_maintenance_page() {
    let (router, _) = server_with_secret("s3cret");

    let (status, _, body) = get(&router, "/anything").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body.contains("Service Unavailable"));
}

#[tokio::test]
async fn admin_marker_gets_info_page_while_unset() {
    let (router, _) = server_with_secret("s3cret");

    let (status, _, body) = get(&router, "/?admin=true").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Not Yet Updated"));

    // Only the exact value "true" counts as the admin marker.
    let (status, _, _) = get(&router, "/?admin=false").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn update_sets_target_and_is_idempotent() {
    let (router, store) = server_with_secret("s3cret");

    for _ in 0..2 {
        let (status, _, body) =
            get(&router, "/api/update/target?key=s3cret&value=https://abc.ngrok.io").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
        assert_eq!(
            store.snapshot().await.target.as_deref(),
            Some("https://abc.ngrok.io")
        );
    }

    let (status, headers, _) = get(&router, "/deep/link?a=b").await;
    assert_eq!(status, StatusCode::MOVED_PERMANENTLY);
    assert_eq!(location(&headers), Some("https://abc.ngrok.io/deep/link?a=b"));
}

#[tokio::test]
async fn empty_value_unsets_target() {
    let (router, store) = server_with_secret("s3cret");
    store.set_target(Some("https://abc.ngrok.io".into())).await;

    let (status, _, body) = get(&router, "/api/update/target?key=s3cret&value=").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");
    assert!(store.snapshot().await.target.is_none());

    let (status, _, _) = get(&router, "/").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn wrong_secret_never_mutates_state() {
    let (router, store) = server_with_secret("s3cret");

    // Valid value, wrong secret.
    let (status, _, _) =
        get(&router, "/api/update/target?key=wrong&value=https://evil.example").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Bad field and bad value too: auth is still checked first.
    let (status, _, _) = get(&router, "/api/update/nonsense?key=wrong&value=").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Missing secret entirely.
    let (status, _, _) = get(&router, "/api/update/target?value=https://evil.example").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert!(store.snapshot().await.target.is_none());
    assert_eq!(store.snapshot().await.secret, "s3cret");
}

#[tokio::test]
async fn malformed_updates_are_rejected_per_request() {
    let (router, store) = server_with_secret("s3cret");

    // Not an absolute URL.
    let (status, _, _) = get(&router, "/api/update/target?key=s3cret&value=not-a-url").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Missing value.
    let (status, _, _) = get(&router, "/api/update/target?key=s3cret").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Unknown field.
    let (status, _, _) = get(&router, "/api/update/redirect_url?key=s3cret&value=x").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Empty replacement secret.
    let (status, _, _) = get(&router, "/api/update/secret?key=s3cret&value=").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(store.snapshot().await.target.is_none());
}

#[tokio::test]
async fn secret_rotation_authenticates_with_the_old_secret() {
    let (router, store) = server_with_secret("old");

    // Rotation proves possession of the current secret.
    let (status, _, _) = get(&router, "/api/update/secret?key=old&value=new").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(store.snapshot().await.secret, "new");

    // The old secret no longer authenticates.
    let (status, _, _) =
        get(&router, "/api/update/target?key=old&value=https://abc.ngrok.io").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // The new one does.
    let (status, _, _) =
        get(&router, "/api/update/target?key=new&value=https://abc.ngrok.io").await;
    assert_eq!(status, StatusCode::OK);
}
