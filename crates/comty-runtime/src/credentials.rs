//! Credential persistence abstraction.
//!
//! The runtime only needs a small key/value surface; applications back it
//! with whatever durable storage they have. [`MemoryCredentialStore`] is the
//! default and what tests use.

use parking_lot::RwLock;
use std::collections::HashMap;

/// Storage key of the access token.
pub const ACCESS_TOKEN_KEY: &str = "token";
/// Storage key of the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Durable key/value holder for session tokens.
///
/// Calls are synchronous so a token pair can be written without a
/// suspension point in between.
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// In-process credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store already holding `credentials`.
    pub fn with_credentials(credentials: &Credentials) -> Self {
        let store = Self::new();
        credentials.persist(&store);
        store
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries.write().insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.entries.write().remove(key);
    }
}

/// The token pair identifying the current session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl Credentials {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: Some(access_token.into()),
            refresh_token: Some(refresh_token.into()),
        }
    }

    /// Read the current pair from `store`.
    pub fn load(store: &dyn CredentialStore) -> Self {
        Self {
            access_token: store.get(ACCESS_TOKEN_KEY),
            refresh_token: store.get(REFRESH_TOKEN_KEY),
        }
    }

    /// Write the pair to `store`. A `None` half removes the stored value.
    pub fn persist(&self, store: &dyn CredentialStore) {
        match &self.access_token {
            Some(token) => store.set(ACCESS_TOKEN_KEY, token),
            None => store.remove(ACCESS_TOKEN_KEY),
        }
        match &self.refresh_token {
            Some(token) => store.set(REFRESH_TOKEN_KEY, token),
            None => store.remove(REFRESH_TOKEN_KEY),
        }
    }

    /// Remove both tokens from `store`.
    pub fn clear(store: &dyn CredentialStore) {
        store.remove(ACCESS_TOKEN_KEY);
        store.remove(REFRESH_TOKEN_KEY);
    }

    #[inline]
    pub fn has_access_token(&self) -> bool {
        self.access_token.is_some()
    }

    #[inline]
    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryCredentialStore::new();
        assert_eq!(store.get("token"), None);

        store.set("token", "abc");
        assert_eq!(store.get("token").as_deref(), Some("abc"));

        store.remove("token");
        assert_eq!(store.get("token"), None);
    }

    #[test]
    fn test_credentials_persist_and_load() {
        let store = MemoryCredentialStore::with_credentials(&Credentials::new("old", "r1"));
        assert_eq!(store.get(ACCESS_TOKEN_KEY).as_deref(), Some("old"));
        assert_eq!(store.get(REFRESH_TOKEN_KEY).as_deref(), Some("r1"));
        assert_eq!(Credentials::load(&store), Credentials::new("old", "r1"));
    }

    #[test]
    fn test_persist_none_removes() {
        let store = MemoryCredentialStore::with_credentials(&Credentials::new("a", "b"));
        Credentials {
            access_token: Some("c".into()),
            refresh_token: None,
        }
        .persist(&store);

        let loaded = Credentials::load(&store);
        assert_eq!(loaded.access_token.as_deref(), Some("c"));
        assert!(!loaded.has_refresh_token());
    }

    #[test]
    fn test_clear() {
        let store = MemoryCredentialStore::with_credentials(&Credentials::new("a", "b"));
        Credentials::clear(&store);
        assert_eq!(Credentials::load(&store), Credentials::default());
    }
}
