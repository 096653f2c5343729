//! Sharded In-Memory User Table
//!
//! Holds the accounts behind the login and register pages.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        UserStore                            │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! User names are distributed across shards by hash, so logins for
//! different users never contend on the same lock.

use bytes::Bytes;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use super::StoreError;

/// Number of shards in the user table.
const NUM_SHARDS: usize = 16;

#[derive(Debug, Default)]
struct Shard {
    users: RwLock<HashMap<Bytes, Bytes>>,
}

/// Thread-safe user name → password table.
///
/// # Example
///
/// ```
/// use tinyweb::storage::UserStore;
///
/// let store = UserStore::new();
/// assert!(store.register("ariz", "hunter2").unwrap());
/// assert!(store.verify("ariz", "hunter2"));
/// assert!(!store.verify("ariz", "wrong"));
/// ```
pub struct UserStore {
    shards: Vec<Shard>,

    /// Statistics: registered users
    user_count: AtomicU64,

    /// Statistics: verify calls
    verify_count: AtomicU64,

    /// Statistics: failed verify calls
    verify_failures: AtomicU64,
}

impl std::fmt::Debug for UserStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserStore")
            .field("shards", &self.shards.len())
            .field("users", &self.user_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for UserStore {
    fn default() -> Self {
        Self::new()
    }
}

impl UserStore {
    pub fn new() -> Self {
        Self {
            shards: (0..NUM_SHARDS).map(|_| Shard::default()).collect(),
            user_count: AtomicU64::new(0),
            verify_count: AtomicU64::new(0),
            verify_failures: AtomicU64::new(0),
        }
    }

    #[inline]
    fn shard(&self, name: &[u8]) -> &Shard {
        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % NUM_SHARDS]
    }

    /// Creates an account.
    ///
    /// # Returns
    ///
    /// `Ok(true)` if the user was created, `Ok(false)` if the name is taken.
    /// Empty names or passwords are rejected.
    pub fn register(&self, name: &str, password: &str) -> Result<bool, StoreError> {
        if name.is_empty() || password.is_empty() {
            return Err(StoreError::EmptyCredentials);
        }

        let mut users = self.shard(name.as_bytes()).users.write().unwrap();
        if users.contains_key(name.as_bytes()) {
            return Ok(false);
        }
        users.insert(
            Bytes::copy_from_slice(name.as_bytes()),
            Bytes::copy_from_slice(password.as_bytes()),
        );
        self.user_count.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    /// Checks a name/password pair.
    pub fn verify(&self, name: &str, password: &str) -> bool {
        self.verify_count.fetch_add(1, Ordering::Relaxed);

        let users = self.shard(name.as_bytes()).users.read().unwrap();
        let ok = !password.is_empty()
            && users
                .get(name.as_bytes())
                .is_some_and(|stored| stored.as_ref() == password.as_bytes());

        if !ok {
            self.verify_failures.fetch_add(1, Ordering::Relaxed);
        }
        ok
    }

    pub fn contains(&self, name: &str) -> bool {
        self.shard(name.as_bytes())
            .users
            .read()
            .unwrap()
            .contains_key(name.as_bytes())
    }

    /// Deletes an account. Returns `true` if it existed.
    pub fn remove(&self, name: &str) -> bool {
        let removed = self
            .shard(name.as_bytes())
            .users
            .write()
            .unwrap()
            .remove(name.as_bytes())
            .is_some();
        if removed {
            self.user_count.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    pub fn len(&self) -> u64 {
        self.user_count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            users: self.user_count.load(Ordering::Relaxed),
            verifies: self.verify_count.load(Ordering::Relaxed),
            verify_failures: self.verify_failures.load(Ordering::Relaxed),
        }
    }
}

/// User table statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub users: u64,
    pub verifies: u64,
    pub verify_failures: u64,
}
