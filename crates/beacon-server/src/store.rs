//! Target store - single source of truth for the redirect state.

use std::sync::Arc;

use tokio::sync::RwLock;

/// Snapshot of the redirect server's mutable state.
///
/// The target is kept as the validated original string rather than a parsed
/// `Url`: redirects concatenate the original request path onto it verbatim,
/// and `Url` re-serialization would append a trailing slash to host-only
/// targets and corrupt the concatenation.
#[derive(Debug, Clone)]
pub struct TargetState {
    /// Current redirect destination. `None` until the first announce.
    pub target: Option<String>,
    /// Shared secret required to mutate either field.
    pub secret: String,
}

/// Errors from store construction and mutation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("shared secret must not be empty")]
    EmptySecret,
}

/// Cheaply cloneable handle to the shared redirect state.
///
/// All access goes through one `RwLock`: reads run concurrently with each
/// other, mutations are mutually exclusive, and every mutation replaces a
/// whole value, so a reader observes either the old or the new state in full.
/// Nothing is persisted; a restart always comes up with the target unset.
#[derive(Clone)]
pub struct TargetStore {
    inner: Arc<RwLock<TargetState>>,
}

impl TargetStore {
    /// Create a store with no target set. The initial secret comes from
    /// configuration and must be non-empty.
    pub fn new(secret: impl Into<String>) -> Result<Self, StoreError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(StoreError::EmptySecret);
        }
        Ok(Self {
            inner: Arc::new(RwLock::new(TargetState {
                target: None,
                secret,
            })),
        })
    }

    /// Full-copy snapshot of the current state.
    pub async fn snapshot(&self) -> TargetState {
        self.inner.read().await.clone()
    }

    /// Replace the redirect target. `None` is an explicit unset.
    pub async fn set_target(&self, target: Option<String>) {
        self.inner.write().await.target = target;
    }

    /// Install a new shared secret. The caller has already authenticated
    /// with the old one.
    pub async fn rotate_secret(&self, secret: impl Into<String>) -> Result<(), StoreError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(StoreError::EmptySecret);
        }
        self.inner.write().await.secret = secret;
        Ok(())
    }
}
