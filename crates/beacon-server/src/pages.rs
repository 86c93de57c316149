//! Front handler outcomes and their response bodies.
//!
//! The three ways a front request can resolve are modeled as one enum with a
//! status/body lookup, rather than as framework error hooks.

use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};

/// Outcome of routing one front request against the target state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontOutcome {
    /// Target set: permanent redirect carrying the original path and query.
    Redirect(String),
    /// Target unset, plain visitor.
    Maintenance,
    /// Target unset, request carried the admin marker.
    NotConfigured,
}

const MAINTENANCE_PAGE: &str = r#"<!doctype html>
<html lang="en">
    <head>
        <title>503 Service Unavailable</title>
    </head>
    <body>
        <h1>Service Unavailable</h1>
        <p>The server is temporarily unable to service your request due to
        maintenance downtime or capacity problems. Please try again later.</p>

        <h6><a href="/?admin=true">For the system administrator</a></h6>
    </body>
</html>
"#;

const NOT_CONFIGURED_PAGE: &str = r#"<!doctype html>
<html lang="en">
    <head>
        <title>Not Yet Updated</title>
        <style type="text/css">
            code { background-color: gray; color: white; }
        </style>
    </head>
    <body>
        <h1>Not Yet Updated</h1>

        <p>The redirect target has not been announced yet.</p>
        <p>Run <code>beacon-agent</code> next to your server to start.</p>
    </body>
</html>
"#;

impl IntoResponse for FrontOutcome {
    fn into_response(self) -> Response {
        match self {
            FrontOutcome::Redirect(location) => {
                (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response()
            }
            FrontOutcome::Maintenance => {
                (StatusCode::SERVICE_UNAVAILABLE, Html(MAINTENANCE_PAGE)).into_response()
            }
            FrontOutcome::NotConfigured => (StatusCode::OK, Html(NOT_CONFIGURED_PAGE)).into_response(),
        }
    }
}
