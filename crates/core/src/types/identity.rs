//! Anonymous shopper identity as seen by cart operations.

use serde::{Deserialize, Serialize};

use super::id::AnonymousId;

/// Result of resolving the anonymous identity of the current storage scope.
///
/// `Unavailable` is a normal value, not an error: browsers with storage
/// disabled still get a working (server-less) cart, and every cart sync or
/// merge treats it as "nothing to key on".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "id", rename_all = "snake_case")]
pub enum AnonymousIdentity {
    /// A persisted identity exists for this storage scope.
    Known(AnonymousId),
    /// Local storage could not be read or written.
    Unavailable,
}

impl AnonymousIdentity {
    /// The identity, if known.
    #[must_use]
    pub const fn id(&self) -> Option<&AnonymousId> {
        match self {
            Self::Known(id) => Some(id),
            Self::Unavailable => None,
        }
    }

    /// Returns `true` when storage was unavailable.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable)
    }
}

impl From<AnonymousId> for AnonymousIdentity {
    fn from(id: AnonymousId) -> Self {
        Self::Known(id)
    }
}
