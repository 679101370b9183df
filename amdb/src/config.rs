//! Engine configuration, loaded once at [`crate::db::Database::open`].

use std::path::PathBuf;
use std::time::Duration;

use serde_derive::{Deserialize, Serialize};

use crate::cache::CachePolicyKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding persisted state (manifest, segments, checkpoint).
    pub data_dir: PathBuf,

    /// Cache eviction policy.
    pub cache_policy: CachePolicyKind,

    /// Max entries held in the cache.
    pub cache_size: usize,

    /// Cache entry lifetime. `None` means entries never expire by age.
    #[serde(default)]
    pub cache_ttl: Option<Duration>,

    /// Default lock-acquisition timeout when a caller doesn't specify one.
    /// `None` means wait indefinitely.
    #[serde(default)]
    pub lock_default_timeout: Option<Duration>,

    /// Interval between periodic deadlock sweeps.
    pub deadlock_check_interval: Duration,

    /// Bearer token lifetime.
    pub token_ttl: Duration,

    /// Whether every façade operation must go through an installed,
    /// populated [`crate::auth::AuthenticationManager`]. When `true` and no
    /// manager has been installed at all, every call is denied. Once a
    /// manager is installed but before its first user is registered, auth
    /// still sits unenforced regardless of this flag — the bootstrap window
    /// needed to register that first user.
    pub auth_required: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from("./amdb-data"),
            cache_policy: CachePolicyKind::Lru,
            cache_size: 1000,
            cache_ttl: None,
            lock_default_timeout: None,
            deadlock_check_interval: Duration::from_secs(5),
            token_ttl: Duration::from_secs(3600),
            auth_required: false,
        }
    }
}

impl Config {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Config { data_dir: data_dir.into(), ..Config::default() }
    }
}
