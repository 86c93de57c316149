//! Beacon wire contract
//!
//! Shared definitions for the target-update protocol between the tunnel agent
//! and the redirect server: the mutable fields, the query parameter names, and
//! URL scheme qualification helpers. This crate does no I/O; both sides build
//! and interpret requests through it so the processes stay independently
//! deployable.

pub mod field;
pub mod urls;

pub use field::{UnknownField, UpdateField};
pub use urls::{ensure_scheme, force_scheme, update_url};

/// Path prefix of the authenticated update endpoint.
pub const UPDATE_PATH: &str = "/api/update";

/// Query parameter carrying the shared secret.
pub const SECRET_PARAM: &str = "key";

/// Query parameter carrying the new value for the addressed field.
pub const VALUE_PARAM: &str = "value";

/// Body returned by the update endpoint on success.
pub const UPDATE_OK: &str = "OK";
