//! Login-time cart merge.
//!
//! When the shopper logs in, the cart they filled anonymously is folded into
//! their account's cart. The server does the merge atomically and deletes the
//! anonymous cart afterwards, so asking again is harmless. This side only
//! decides when to ask: once per login transition.

use std::sync::{Arc, Mutex};

use merkato_core::MergeReport;
use tracing::{debug, info, instrument, warn};

use crate::api::CartApi;
use crate::error::CartClientError;
use crate::identity::IdentityResolver;

/// Why a merge was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeSkipReason {
    /// The auth token was empty.
    NoToken,
    /// There is no anonymous identity, hence no anonymous cart.
    NoAnonymousIdentity,
}

/// Outcome of one merge attempt.
#[derive(Debug)]
pub enum MergeOutcome {
    /// The server merged (or found nothing to merge).
    Merged(MergeReport),
    /// The merge was not attempted.
    Skipped(MergeSkipReason),
    /// The merge failed; the error has already been logged.
    Failed(CartClientError),
}

/// Triggers the anonymous → authenticated cart merge.
///
/// Cheap to clone; clones share the login-transition state.
#[derive(Clone)]
pub struct MergeCoordinator {
    inner: Arc<MergeCoordinatorInner>,
}

struct MergeCoordinatorInner {
    api: Arc<CartApi>,
    identity: Arc<IdentityResolver>,
    /// Token of the current authenticated session, if any.
    session_token: Mutex<Option<String>>,
}

impl MergeCoordinator {
    /// Create a coordinator.
    #[must_use]
    pub fn new(api: Arc<CartApi>, identity: Arc<IdentityResolver>) -> Self {
        Self {
            inner: Arc::new(MergeCoordinatorInner {
                api,
                identity,
                session_token: Mutex::new(None),
            }),
        }
    }

    /// Report the current auth state; merges on a login transition.
    ///
    /// A transition is unauthenticated → authenticated, or a switch to a
    /// different token. Repeated reports of the same token do nothing.
    /// Returns `true` if a merge was started.
    pub fn on_auth_state_changed(&self, auth_token: Option<&str>) -> bool {
        let Ok(mut session_token) = self.inner.session_token.lock() else {
            warn!("login state lock poisoned");
            return false;
        };

        match auth_token.filter(|t| !t.trim().is_empty()) {
            Some(token) if session_token.as_deref() != Some(token) => {
                *session_token = Some(token.to_owned());
                drop(session_token);
                info!("Login detected, merging anonymous cart");
                self.merge_cart_on_login(token.to_owned());
                true
            }
            Some(_) => false,
            None => {
                *session_token = None;
                false
            }
        }
    }

    /// Merge in the background and return immediately.
    ///
    /// Outside a tokio runtime the merge is dropped with a warning.
    pub fn merge_cart_on_login(&self, auth_token: String) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime available, cart merge dropped");
            return;
        };
        let this = self.clone();
        handle.spawn(async move {
            this.try_merge(&auth_token).await;
        });
    }

    /// Merge and report what happened. Never returns an error.
    #[instrument(skip(self, auth_token))]
    pub async fn try_merge(&self, auth_token: &str) -> MergeOutcome {
        if auth_token.trim().is_empty() {
            return MergeOutcome::Skipped(MergeSkipReason::NoToken);
        }

        // Never create an identity here: a fresh one has no cart to merge
        let Some(anonymous_id) = self.inner.identity.existing_anonymous_id() else {
            debug!("No anonymous identity, nothing to merge");
            return MergeOutcome::Skipped(MergeSkipReason::NoAnonymousIdentity);
        };

        match self.inner.api.merge(&anonymous_id, auth_token).await {
            Ok(report) => {
                info!(
                    status = ?report.status,
                    lines = report.lines.len(),
                    clamped = report.clamped.len(),
                    "Cart merge finished"
                );
                MergeOutcome::Merged(report)
            }
            Err(e) => {
                warn!(error = %e, "Cart merge failed");
                MergeOutcome::Failed(e)
            }
        }
    }
}

impl std::fmt::Debug for MergeCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeCoordinator")
            .field("api", &self.inner.api)
            .finish_non_exhaustive()
    }
}
