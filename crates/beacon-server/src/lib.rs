//! Beacon redirect server
//!
//! Holds one mutable redirect target behind a stable public address and
//! 301-redirects every inbound request to it. The target is mutated remotely
//! by the tunnel agent through an authenticated update endpoint; visitors
//! landing here while no target is set get a maintenance page instead.

pub mod pages;
pub mod routes;
pub mod store;

pub use pages::FrontOutcome;
pub use routes::build_router;
pub use store::{StoreError, TargetState, TargetStore};
