//! Anonymous identity resolution.
//!
//! A visitor who has not logged in still gets a server-side cart. That cart is
//! keyed by an opaque id generated once, persisted in local storage, and
//! reused for as long as the storage keeps it.

use std::sync::{Arc, Mutex, PoisonError};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use merkato_core::{AnonymousId, AnonymousIdentity, IdError};
use rand::RngCore;
use tracing::{debug, warn};

use crate::storage::{LocalStorage, StorageError};

/// Local storage key holding the anonymous identity.
pub const ANONYMOUS_ID_STORAGE_KEY: &str = "merkato-anonymous-id";

/// Source of fresh anonymous ids.
pub trait IdGenerator: Send + Sync {
    /// Produce a new, collision-resistant id.
    ///
    /// # Errors
    ///
    /// Returns an error if the produced value is not a valid [`AnonymousId`].
    fn generate(&self) -> Result<AnonymousId, IdError>;
}

/// Default generator: millisecond timestamp plus 128 random bits.
///
/// Output looks like `19a2f3c4b5d-q0Zx3l...`: hex time, a dash, then the
/// random part in URL-safe base64.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimeRandomGenerator;

impl IdGenerator for TimeRandomGenerator {
    fn generate(&self) -> Result<AnonymousId, IdError> {
        let mut bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut bytes);
        let millis = chrono::Utc::now().timestamp_millis().max(0);
        AnonymousId::parse(&format!("{millis:x}-{}", URL_SAFE_NO_PAD.encode(bytes)))
    }
}

/// Resolves and remembers the anonymous identity of one storage scope.
///
/// The first successful resolution is memoized, so the identity stays stable
/// for the life of the resolver even if the storage is later cleared behind
/// its back. Only [`IdentityResolver::forget`] drops it.
///
/// Storage is touched only while no identity is memoized. Concurrent first
/// resolutions are serialized so they agree on a single id, but the memo
/// itself is never locked across storage I/O.
pub struct IdentityResolver {
    storage: Arc<dyn LocalStorage>,
    generator: Arc<dyn IdGenerator>,
    key: String,
    current: Mutex<Option<AnonymousId>>,
    resolving: Mutex<()>,
}

impl IdentityResolver {
    /// Create a resolver over `storage` using the default key and generator.
    #[must_use]
    pub fn new(storage: Arc<dyn LocalStorage>) -> Self {
        Self::with_generator(storage, Arc::new(TimeRandomGenerator))
    }

    /// Create a resolver with a custom id generator.
    #[must_use]
    pub fn with_generator(storage: Arc<dyn LocalStorage>, generator: Arc<dyn IdGenerator>) -> Self {
        Self {
            storage,
            generator,
            key: ANONYMOUS_ID_STORAGE_KEY.to_string(),
            current: Mutex::new(None),
            resolving: Mutex::new(()),
        }
    }

    /// Use a different storage key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Return the persisted identity, creating and persisting one if needed.
    ///
    /// Never fails: when storage cannot be read or written, or no valid id
    /// can be generated, the result is [`AnonymousIdentity::Unavailable`].
    pub fn get_or_create_anonymous_id(&self) -> AnonymousIdentity {
        if let Some(id) = self.memoized() {
            return AnonymousIdentity::Known(id);
        }

        let _resolving = self.resolving.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = self.memoized() {
            return AnonymousIdentity::Known(id);
        }

        let id = match self.read_stored() {
            Ok(Some(id)) => id,
            Ok(None) => match self.create() {
                Some(id) => id,
                None => return AnonymousIdentity::Unavailable,
            },
            Err(()) => return AnonymousIdentity::Unavailable,
        };

        self.remember(Some(id.clone()));
        AnonymousIdentity::Known(id)
    }

    /// Return the identity if one already exists, without creating one.
    pub fn existing_anonymous_id(&self) -> Option<AnonymousId> {
        if let Some(id) = self.memoized() {
            return Some(id);
        }

        let _resolving = self.resolving.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = self.memoized() {
            return Some(id);
        }

        let id = self.read_stored().ok().flatten()?;
        self.remember(Some(id.clone()));
        Some(id)
    }

    /// Drop the identity from memory and storage.
    ///
    /// The next [`get_or_create_anonymous_id`](Self::get_or_create_anonymous_id)
    /// creates a new one.
    pub fn forget(&self) {
        let _resolving = self.resolving.lock().unwrap_or_else(PoisonError::into_inner);
        self.remember(None);
        if let Err(e) = self.storage.remove_item(&self.key) {
            warn!(error = %e, "Failed to remove anonymous identity from storage");
        }
    }

    fn memoized(&self) -> Option<AnonymousId> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn remember(&self, id: Option<AnonymousId>) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = id;
    }

    /// Generate and persist a new id.
    fn create(&self) -> Option<AnonymousId> {
        let id = match self.generator.generate() {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "Generated anonymous identity is invalid");
                return None;
            }
        };

        if let Err(e) = self.storage.set_item(&self.key, id.as_str()) {
            warn!(error = %e, "Failed to persist anonymous identity");
            return None;
        }

        debug!(anonymous_id = %id, "Created anonymous identity");
        Some(id)
    }

    /// Read and validate the stored id. `Err(())` means storage is unavailable.
    ///
    /// An unparseable value or a corrupt storage document reads as absent, so
    /// a fresh id gets written over it.
    fn read_stored(&self) -> Result<Option<AnonymousId>, ()> {
        match self.storage.get_item(&self.key) {
            Ok(Some(raw)) => match AnonymousId::parse(&raw) {
                Ok(id) => Ok(Some(id)),
                Err(e) => {
                    warn!(error = %e, "Discarding invalid stored anonymous identity");
                    Ok(None)
                }
            },
            Ok(None) => Ok(None),
            Err(StorageError::Corrupt(e)) => {
                warn!(error = %e, "Discarding corrupt local storage document");
                Ok(None)
            }
            Err(e) => {
                warn!(error = %e, "Local storage unavailable");
                Err(())
            }
        }
    }
}

impl std::fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityResolver")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::storage::{FileStorage, MemoryStorage, UnavailableStorage};

    struct CountingGenerator(AtomicUsize);

    impl IdGenerator for CountingGenerator {
        fn generate(&self) -> Result<AnonymousId, IdError> {
            let n = self.0.fetch_add(1, Ordering::SeqCst);
            AnonymousId::parse(&format!("anon-{n}"))
        }
    }

    struct BrokenGenerator;

    impl IdGenerator for BrokenGenerator {
        fn generate(&self) -> Result<AnonymousId, IdError> {
            AnonymousId::parse("not valid!")
        }
    }

    /// Memory storage that counts reads.
    #[derive(Default)]
    struct CountingStorage {
        inner: MemoryStorage,
        reads: AtomicUsize,
    }

    impl LocalStorage for CountingStorage {
        fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get_item(key)
        }

        fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
            self.inner.set_item(key, value)
        }

        fn remove_item(&self, key: &str) -> Result<(), StorageError> {
            self.inner.remove_item(key)
        }
    }

    fn counting() -> Arc<CountingGenerator> {
        Arc::new(CountingGenerator(AtomicUsize::new(0)))
    }

    #[test]
    fn test_generated_ids_are_valid_and_distinct() {
        let a = TimeRandomGenerator.generate().unwrap();
        let b = TimeRandomGenerator.generate().unwrap();
        assert_ne!(a, b);
        assert!(a.as_str().contains('-'));
        assert!(AnonymousId::parse(a.as_str()).is_ok());
    }

    #[test]
    fn test_repeated_calls_return_same_id() {
        let resolver = IdentityResolver::new(Arc::new(MemoryStorage::new()));
        let first = resolver.get_or_create_anonymous_id();
        let second = resolver.get_or_create_anonymous_id();
        assert!(first.id().is_some());
        assert_eq!(first, second);
    }

    #[test]
    fn test_id_is_persisted_and_reused_by_new_resolver() {
        let storage: Arc<dyn LocalStorage> = Arc::new(MemoryStorage::new());
        let generator = counting();

        let first = IdentityResolver::with_generator(storage.clone(), generator.clone())
            .get_or_create_anonymous_id();
        assert_eq!(
            storage.get_item(ANONYMOUS_ID_STORAGE_KEY).unwrap().as_deref(),
            Some("anon-0")
        );

        let second =
            IdentityResolver::with_generator(storage, generator.clone()).get_or_create_anonymous_id();
        assert_eq!(first, second);
        assert_eq!(generator.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_memo_survives_external_clear() {
        let storage: Arc<dyn LocalStorage> = Arc::new(MemoryStorage::new());
        let resolver = IdentityResolver::with_generator(storage.clone(), counting());
        let first = resolver.get_or_create_anonymous_id();

        storage.remove_item(ANONYMOUS_ID_STORAGE_KEY).unwrap();
        assert_eq!(resolver.get_or_create_anonymous_id(), first);
    }

    #[test]
    fn test_invalid_stored_value_is_replaced() {
        let storage: Arc<dyn LocalStorage> = Arc::new(MemoryStorage::new());
        storage
            .set_item(ANONYMOUS_ID_STORAGE_KEY, "not a valid id!")
            .unwrap();

        let resolver = IdentityResolver::with_generator(storage.clone(), counting());
        let identity = resolver.get_or_create_anonymous_id();
        assert_eq!(identity.id().unwrap().as_str(), "anon-0");
        assert_eq!(
            storage.get_item(ANONYMOUS_ID_STORAGE_KEY).unwrap().as_deref(),
            Some("anon-0")
        );
    }

    #[test]
    fn test_unavailable_storage_yields_unavailable() {
        let resolver = IdentityResolver::new(Arc::new(UnavailableStorage));
        assert_eq!(
            resolver.get_or_create_anonymous_id(),
            AnonymousIdentity::Unavailable
        );
        assert_eq!(resolver.existing_anonymous_id(), None);
    }

    #[test]
    fn test_existing_does_not_create() {
        let storage: Arc<dyn LocalStorage> = Arc::new(MemoryStorage::new());
        let resolver = IdentityResolver::new(storage.clone());
        assert_eq!(resolver.existing_anonymous_id(), None);
        assert_eq!(storage.get_item(ANONYMOUS_ID_STORAGE_KEY).unwrap(), None);

        let created = resolver.get_or_create_anonymous_id();
        assert_eq!(resolver.existing_anonymous_id().as_ref(), created.id());
    }

    #[test]
    fn test_forget_creates_new_identity() {
        let storage: Arc<dyn LocalStorage> = Arc::new(MemoryStorage::new());
        let resolver = IdentityResolver::with_generator(storage.clone(), counting());
        let first = resolver.get_or_create_anonymous_id();

        resolver.forget();
        assert_eq!(storage.get_item(ANONYMOUS_ID_STORAGE_KEY).unwrap(), None);

        let second = resolver.get_or_create_anonymous_id();
        assert_ne!(first, second);
    }

    #[test]
    fn test_custom_key() {
        let storage: Arc<dyn LocalStorage> = Arc::new(MemoryStorage::new());
        let resolver = IdentityResolver::new(storage.clone()).with_key("other-key");
        resolver.get_or_create_anonymous_id();
        assert!(storage.get_item("other-key").unwrap().is_some());
        assert_eq!(storage.get_item(ANONYMOUS_ID_STORAGE_KEY).unwrap(), None);
    }

    #[test]
    fn test_invalid_generated_id_yields_unavailable() {
        let storage: Arc<dyn LocalStorage> = Arc::new(MemoryStorage::new());
        let resolver = IdentityResolver::with_generator(storage.clone(), Arc::new(BrokenGenerator));
        assert_eq!(
            resolver.get_or_create_anonymous_id(),
            AnonymousIdentity::Unavailable
        );
        assert_eq!(storage.get_item(ANONYMOUS_ID_STORAGE_KEY).unwrap(), None);
    }

    #[test]
    fn test_corrupt_file_storage_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        std::fs::write(&path, b"{\"merkato-anonymous-id\": ").unwrap();

        let generator = counting();
        let resolver =
            IdentityResolver::with_generator(Arc::new(FileStorage::new(&path)), generator.clone());
        let identity = resolver.get_or_create_anonymous_id();
        assert_eq!(identity.id().unwrap().as_str(), "anon-0");

        // The rewritten document is readable again
        let reopened =
            IdentityResolver::with_generator(Arc::new(FileStorage::new(&path)), generator.clone());
        assert_eq!(reopened.get_or_create_anonymous_id(), identity);
        assert_eq!(generator.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_first_resolution_agrees() {
        let generator = counting();
        let resolver =
            IdentityResolver::with_generator(Arc::new(MemoryStorage::new()), generator.clone());

        let ids: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| resolver.get_or_create_anonymous_id()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let first = ids.first().unwrap();
        assert!(first.id().is_some());
        assert!(ids.iter().all(|id| id == first));
        assert_eq!(generator.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_memoized_identity_skips_storage() {
        let storage = Arc::new(CountingStorage::default());
        let resolver = IdentityResolver::with_generator(storage.clone(), counting());

        let first = resolver.get_or_create_anonymous_id();
        let reads = storage.reads.load(Ordering::SeqCst);
        assert_eq!(resolver.get_or_create_anonymous_id(), first);
        assert_eq!(resolver.existing_anonymous_id().as_ref(), first.id());
        assert_eq!(storage.reads.load(Ordering::SeqCst), reads);
    }
}
