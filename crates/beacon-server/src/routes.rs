//! HTTP surface: the catch-all redirect front and the authenticated update
//! endpoint, composed behind one listener.

use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, Uri};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use url::Url;

use beacon_proto::{UpdateField, UPDATE_OK};

use crate::pages::FrontOutcome;
use crate::store::TargetStore;

/// Build the router over a shared target store.
pub fn build_router(store: TargetStore) -> Router {
    Router::new()
        .route("/api/update/{field}", get(update))
        .fallback(front)
        .with_state(store)
        .layer(TraceLayer::new_for_http())
}

/// Admin marker detection. Only the exact value `true` counts; the historic
/// behavior of treating any non-empty value (including `"false"`) as set was
/// a bug, not a contract.
fn is_admin(query: Option<&str>) -> bool {
    let Some(query) = query else {
        return false;
    };
    url::form_urlencoded::parse(query.as_bytes()).any(|(k, v)| k == "admin" && v == "true")
}

/// Redirect front: answer every request with a redirect to the current
/// target, or a maintenance response while none is set.
async fn front(State(store): State<TargetStore>, uri: Uri) -> FrontOutcome {
    let state = store.snapshot().await;
    match state.target {
        Some(target) => {
            // Deep links survive the indirection: the original path and query
            // are appended verbatim, with no canonicalization.
            let path_and_query = uri
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/");
            FrontOutcome::Redirect(format!("{target}{path_and_query}"))
        }
        None if is_admin(uri.query()) => FrontOutcome::NotConfigured,
        None => FrontOutcome::Maintenance,
    }
}

#[derive(Debug, Deserialize)]
struct UpdateParams {
    /// Shared secret.
    key: Option<String>,
    /// New value for the addressed field.
    value: Option<String>,
}

/// Authenticated mutation of the target store.
///
/// Authentication is checked before the field name is even parsed: a request
/// with a bad secret gets 401 no matter how the rest of it looks, and never
/// mutates state.
async fn update(
    State(store): State<TargetStore>,
    Path(field): Path<String>,
    Query(params): Query<UpdateParams>,
) -> (StatusCode, &'static str) {
    let state = store.snapshot().await;
    match params.key.as_deref() {
        Some(supplied) if supplied == state.secret => {}
        _ => {
            // The supplied secret is deliberately not logged.
            warn!(field = %field, "update rejected: bad secret");
            return (StatusCode::UNAUTHORIZED, "unauthorized");
        }
    }

    let field: UpdateField = match field.parse() {
        Ok(field) => field,
        Err(err) => {
            warn!(%err, "update rejected");
            return (StatusCode::BAD_REQUEST, "bad request");
        }
    };

    match field {
        UpdateField::Target => match params.value.as_deref() {
            None => (StatusCode::BAD_REQUEST, "bad request"),
            Some("") => {
                store.set_target(None).await;
                info!("redirect target unset");
                (StatusCode::OK, UPDATE_OK)
            }
            Some(value) => {
                if Url::parse(value).is_err() {
                    warn!(%value, "update rejected: not an absolute URL");
                    return (StatusCode::BAD_REQUEST, "bad request");
                }
                store.set_target(Some(value.to_string())).await;
                info!(target = %value, "redirect target updated");
                (StatusCode::OK, UPDATE_OK)
            }
        },
        UpdateField::Secret => match params.value.as_deref() {
            Some(value) if !value.is_empty() => {
                if store.rotate_secret(value).await.is_err() {
                    return (StatusCode::BAD_REQUEST, "bad request");
                }
                info!("shared secret rotated");
                (StatusCode::OK, UPDATE_OK)
            }
            _ => (StatusCode::BAD_REQUEST, "bad request"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::is_admin;

    #[test]
    fn admin_marker_requires_exact_true() {
        assert!(is_admin(Some("admin=true")));
        assert!(!is_admin(Some("admin=false")));
        assert!(!is_admin(Some("admin=1")));
        assert!(!is_admin(Some("admin=")));
        assert!(!is_admin(Some("other=true")));
        assert!(!is_admin(None));
    }
}
