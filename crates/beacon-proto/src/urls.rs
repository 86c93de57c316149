//! URL scheme qualification and update-request construction.
//!
//! Tunnel providers and config files hand around addresses with and without
//! schemes; everything that leaves the agent must be fully schema-qualified.

use url::Url;

use crate::{UpdateField, SECRET_PARAM, UPDATE_PATH, VALUE_PARAM};

const HTTP: &str = "http://";
const HTTPS: &str = "https://";

fn has_scheme(url: &str) -> bool {
    url.starts_with(HTTP) || url.starts_with(HTTPS)
}

/// Prefix `url` with a scheme if it does not already carry one.
pub fn ensure_scheme(url: &str, https: bool) -> String {
    if has_scheme(url) {
        url.to_string()
    } else {
        let scheme = if https { HTTPS } else { HTTP };
        format!("{scheme}{url}")
    }
}

/// Prefix `url` with a scheme, replacing any existing one.
pub fn force_scheme(url: &str, https: bool) -> String {
    let scheme = if https { HTTPS } else { HTTP };
    for existing in [HTTP, HTTPS] {
        if let Some(rest) = url.strip_prefix(existing) {
            return format!("{scheme}{rest}");
        }
    }
    format!("{scheme}{url}")
}

/// Build the fully-qualified update request for one field.
///
/// `server` is the redirect server's base address, scheme optional. The value
/// is carried as a query pair so URL-typed values survive percent-encoding.
pub fn update_url(
    server: &str,
    https: bool,
    field: UpdateField,
    secret: &str,
    value: &str,
) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(&ensure_scheme(server, https))?;
    url.set_path(&format!("{}/{}", UPDATE_PATH, field.as_str()));
    url.query_pairs_mut()
        .append_pair(SECRET_PARAM, secret)
        .append_pair(VALUE_PARAM, value);
    Ok(url)
}
