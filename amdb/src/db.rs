//! The `Database` façade composing the cache, lock manager, version manager
//! and optional authentication layer into the single entry point callers
//! use.
//!
//! Operation order for a mutation is: check auth (if enabled), acquire the
//! key's lock, mutate the version manager, then update the cache — and
//! every exit path, including an error from any step, releases the lock
//! before returning.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::auth::{AccessControl, AuthenticationManager, Permission};
use crate::cache::Cache;
use crate::config::Config;
use crate::error::{CResult, Error};
use crate::lock::{HolderId, LockManager};
use crate::version::{Stats as VersionStats, VersionManager};

/// Merges cache size, lock-table size and version-manager stats into the
/// single view `Database::stats` hands back to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStats {
    pub cache_size: usize,
    pub locked_keys: usize,
    pub version: VersionStats,
    pub merkle_root: [u8; 32],
}

pub struct Database {
    cache: Cache,
    locks: Arc<LockManager>,
    version_manager: Mutex<VersionManager>,
    auth: Option<AuthenticationManager>,
    auth_required: bool,
    lock_timeout: Option<Duration>,
    sweeper: Option<Sweeper>,
}

struct Sweeper {
    stop: Arc<std::sync::atomic::AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop.store(true, std::sync::atomic::Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Database {
    pub fn open(config: Config) -> CResult<Self> {
        let version_manager = VersionManager::open(&config.data_dir)?;
        let cache = Cache::new(config.cache_policy, config.cache_size, config.cache_ttl);
        let locks = Arc::new(LockManager::new());

        let sweeper = if config.deadlock_check_interval > Duration::from_secs(0) {
            let locks = locks.clone();
            let interval = config.deadlock_check_interval;
            let lock_timeout = config.lock_default_timeout;
            let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
            let stop_for_thread = stop.clone();
            let handle = std::thread::spawn(move || {
                while !stop_for_thread.load(std::sync::atomic::Ordering::SeqCst) {
                    std::thread::sleep(interval);
                    if stop_for_thread.load(std::sync::atomic::Ordering::SeqCst) {
                        break;
                    }
                    locks.check_deadlock(lock_timeout);
                }
            });
            Some(Sweeper { stop, handle: Some(handle) })
        } else {
            None
        };

        Ok(Database {
            cache,
            locks,
            version_manager: Mutex::new(version_manager),
            auth: None,
            auth_required: config.auth_required,
            lock_timeout: config.lock_default_timeout,
            sweeper,
        })
    }

    /// Installs an authentication manager, enabling permission checks on
    /// every call below. Until a manager is installed, or while it has no
    /// registered users, operations proceed unauthenticated.
    pub fn with_auth(mut self, auth: AuthenticationManager) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn auth(&self) -> Option<&AuthenticationManager> {
        self.auth.as_ref()
    }

    fn check_auth(&self, username: Option<&str>, operation: &str) -> CResult<()> {
        let Some(auth) = &self.auth else {
            // `auth_required` can't be satisfied without an installed
            // manager to issue and verify tokens against.
            return if self.auth_required { Err(Error::PermissionDenied) } else { Ok(()) };
        };
        if !auth.has_users() {
            return Ok(());
        }
        let username = username.ok_or(Error::PermissionDenied)?;
        AccessControl::check_access(auth, username, operation)
    }

    pub fn put(&self, username: Option<&str>, key: &[u8], value: Vec<u8>) -> CResult<u64> {
        self.check_auth(username, "put")?;
        let holder = HolderId::new();
        self.locks.acquire_exclusive(key, holder, self.lock_timeout)?;
        let result = (|| {
            let mut vm = self.version_manager.lock().unwrap();
            vm.put(key, value.clone())
        })();
        let aborted = self.locks.release_exclusive(key, holder);
        let version = result?;
        if aborted {
            return Err(Error::DeadlockAborted);
        }
        self.cache.put(key.to_vec(), value);
        Ok(version)
    }

    pub fn get(&self, username: Option<&str>, key: &[u8]) -> CResult<Option<Vec<u8>>> {
        self.check_auth(username, "get")?;
        let holder = HolderId::new();
        self.locks.acquire_shared(key, holder, self.lock_timeout)?;
        let result = (|| {
            if let Some(hit) = self.cache.get(key) {
                return Ok(Some(hit));
            }
            let mut vm = self.version_manager.lock().unwrap();
            vm.get(key)
        })();
        let aborted = self.locks.release_shared(key, holder);
        let value = result?;
        if aborted {
            return Err(Error::DeadlockAborted);
        }
        if let Some(value) = &value {
            self.cache.put(key.to_vec(), value.clone());
        }
        Ok(value)
    }

    /// Returns whether `key` existed (and was therefore actually removed).
    pub fn delete(&self, username: Option<&str>, key: &[u8]) -> CResult<bool> {
        self.check_auth(username, "delete")?;
        let holder = HolderId::new();
        self.locks.acquire_exclusive(key, holder, self.lock_timeout)?;
        let result = (|| {
            let mut vm = self.version_manager.lock().unwrap();
            vm.delete(key)
        })();
        let aborted = self.locks.release_exclusive(key, holder);
        let existed = result?;
        if aborted {
            return Err(Error::DeadlockAborted);
        }
        if existed {
            self.cache.delete(key);
        }
        Ok(existed)
    }

    pub fn merkle_root(&self, username: Option<&str>) -> CResult<[u8; 32]> {
        self.check_auth(username, "get")?;
        self.version_manager.lock().unwrap().merkle_root()
    }

    pub fn stats(&self, username: Option<&str>) -> CResult<DatabaseStats> {
        self.check_auth(username, "stats")?;
        let mut vm = self.version_manager.lock().unwrap();
        let version = vm.stats()?;
        let merkle_root = vm.merkle_root()?;
        Ok(DatabaseStats {
            cache_size: self.cache.size(),
            locked_keys: self.locks.table_size(),
            version,
            merkle_root,
        })
    }

    pub fn compact(&self, username: Option<&str>) -> CResult<()> {
        self.check_auth(username, "compact")?;
        self.version_manager.lock().unwrap().compact()
    }

    pub fn flush(&self) -> CResult<()> {
        self.version_manager.lock().unwrap().flush()
    }

    pub fn close(self) -> CResult<()> {
        self.flush()
    }
}
