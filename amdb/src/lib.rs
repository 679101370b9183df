//! `amdb` is an embedded, Merkle-verified key-value storage engine.
//!
//! It keeps key-value pairs in an append-only log file plus an in-memory
//! index of file positions, the way a log-structured hash table does, but
//! every write is stamped with a monotonic version and the live set's
//! Merkle root is checkpointed on every flush. Reopening the engine
//! recomputes that root from the replayed log and refuses to come up if it
//! no longer matches the checkpoint, so silent on-disk tampering or
//! corruption is caught at startup rather than surfacing later as a wrong
//! answer.
//!
//! A [`db::Database`] composes the version manager with a policy-selectable
//! cache, a shared/exclusive lock manager with deadlock detection, and an
//! optional authentication layer, the way a storage engine and the
//! surrounding service concerns are usually layered.
//!
//! ## Getting started
//!
//! ```rust
//! use amdb::config::Config;
//! use amdb::db::Database;
//!
//! fn run() -> amdb::error::CResult<()> {
//!     let dir = tempfile::tempdir()?;
//!     let db = Database::open(Config::new(dir.path()))?;
//!
//!     db.put(None, b"a", vec![0x01])?;
//!     assert_eq!(db.get(None, b"a")?, Some(vec![0x01]));
//!
//!     db.delete(None, b"a")?;
//!     assert_eq!(db.get(None, b"a")?, None);
//!
//!     Ok(())
//! }
//!
//! fn main() {
//!     run().unwrap();
//! }
//! ```

pub mod auth;
pub mod cache;
pub mod config;
pub mod crypto;
pub mod db;
pub mod digest;
pub mod error;
pub mod lock;
pub mod version;
