//! The durable, Merkle-verified version manager.
//!
//! Generalizes the append-only log-plus-keydir design to carry a global
//! monotonic version per write and a manifest checkpoint recording the
//! Merkle root over the live set. On open, the log is replayed to rebuild
//! the keydir and the root is recomputed and checked against the last
//! checkpoint; a mismatch means the data directory was corrupted or
//! tampered with since the last flush.

mod log;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde_derive::{Deserialize, Serialize};

use crate::digest;
use crate::error::{CResult, Error};

use log::VersionedLog;

/// key -> (value position, value length, version it was written at).
type KeyDir = BTreeMap<Vec<u8>, (u64, u32, u64)>;

const MANIFEST_FILE: &str = "MANIFEST.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    current_version: u64,
    merkle_root: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    pub keys: u64,
    pub live_bytes: u64,
    pub total_disk_size: u64,
    pub garbage_disk_size: u64,
    pub current_version: u64,
}

pub struct VersionManager {
    log: VersionedLog,
    keydir: KeyDir,
    manifest_path: PathBuf,
    current_version: AtomicU64,
}

impl VersionManager {
    pub fn open(data_dir: &Path) -> CResult<Self> {
        Self::open_with_lock(data_dir, true)
    }

    pub fn open_with_lock(data_dir: &Path, try_lock: bool) -> CResult<Self> {
        std::fs::create_dir_all(data_dir)?;
        let log_path = data_dir.join("segment.log");
        let manifest_path = data_dir.join(MANIFEST_FILE);

        let mut log = VersionedLog::new_with_lock(log_path, try_lock)?;
        let (mut keydir, max_version) = log.build_keydir()?;

        // Verified against the manifest while still plain locals: a
        // constructed `VersionManager` flushes on `Drop`, which would
        // silently overwrite a tampered or corrupt checkpoint with the
        // freshly recomputed root on the way out of an error return.
        verify_against_checkpoint(&manifest_path, &mut log, &mut keydir)?;

        Ok(VersionManager {
            log,
            keydir,
            manifest_path,
            current_version: AtomicU64::new(max_version),
        })
    }

    /// Re-runs the same check performed at `open`: replay the log, recompute
    /// the root, and verify it against the checkpoint. Exposed for callers
    /// that want to re-validate a long-lived instance without reopening it.
    pub fn recover(&mut self) -> CResult<()> {
        let (keydir, max_version) = self.log.build_keydir()?;
        self.keydir = keydir;
        self.current_version.store(max_version, Ordering::SeqCst);
        verify_against_checkpoint(&self.manifest_path, &mut self.log, &mut self.keydir)
    }

    fn write_manifest(&mut self) -> CResult<()> {
        let manifest = Manifest {
            current_version: self.current_version.load(Ordering::SeqCst),
            merkle_root: hex::encode(self.merkle_root()?),
        };
        let bytes = serde_json::to_vec_pretty(&manifest)?;
        std::fs::write(&self.manifest_path, bytes)?;
        Ok(())
    }

    fn next_version(&self) -> u64 {
        self.current_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn put(&mut self, key: &[u8], value: Vec<u8>) -> CResult<u64> {
        let version = self.next_version();
        let (value_pos, value_len) = self.log.write_entry(key, Some(&value), version)?;
        self.keydir.insert(key.to_vec(), (value_pos, value_len, version));
        Ok(version)
    }

    pub fn get(&mut self, key: &[u8]) -> CResult<Option<Vec<u8>>> {
        match self.keydir.get(key) {
            Some(&(pos, len, _)) => Ok(Some(self.log.read_value(pos, len)?)),
            None => Ok(None),
        }
    }

    /// Returns whether `key` existed (and was therefore actually tombstoned
    /// and had its version bumped). Deleting an already-absent key is a
    /// no-op: it doesn't mint a version or append another tombstone frame.
    pub fn delete(&mut self, key: &[u8]) -> CResult<bool> {
        if !self.keydir.contains_key(key) {
            return Ok(false);
        }
        let version = self.next_version();
        self.log.write_entry(key, None, version)?;
        self.keydir.remove(key);
        Ok(true)
    }

    pub fn enumerate(&mut self) -> CResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let keys: Vec<(Vec<u8>, u64, u32)> =
            self.keydir.iter().map(|(k, &(pos, len, _))| (k.clone(), pos, len)).collect();
        let mut out = Vec::with_capacity(keys.len());
        for (key, pos, len) in keys {
            let value = self.log.read_value(pos, len)?;
            out.push((key, value));
        }
        Ok(out)
    }

    pub fn merkle_root(&mut self) -> CResult<[u8; 32]> {
        compute_root_of(&mut self.log, &self.keydir)
    }

    pub fn flush(&mut self) -> CResult<()> {
        self.log.file.sync_all().map_err(|e| Error::DurabilityFailure(e.to_string()))?;
        self.write_manifest()
    }

    pub fn stats(&mut self) -> CResult<Stats> {
        let keys = self.keydir.len() as u64;
        let live_bytes = self
            .keydir
            .iter()
            .fold(0u64, |acc, (k, &(_, len, _))| acc + k.len() as u64 + len as u64);
        let total_disk_size = self.log.file.metadata()?.len();
        // length-prefix + version + flags overhead per live entry.
        let overhead = 4 + 4 + 8 + 1;
        let live_disk_size = live_bytes + overhead * keys;
        let garbage_disk_size = total_disk_size.saturating_sub(live_disk_size);
        Ok(Stats {
            keys,
            live_bytes,
            total_disk_size,
            garbage_disk_size,
            current_version: self.current_version.load(Ordering::SeqCst),
        })
    }

    /// Rewrites the log containing only live entries, preserving their
    /// versions, then replaces the active log file with it.
    pub fn compact(&mut self) -> CResult<()> {
        let mut tmp_path = self.log.path.clone();
        tmp_path.set_extension("compact");

        let mut new_log = VersionedLog::new(tmp_path)?;
        new_log.file.set_len(0)?;
        let mut new_keydir = KeyDir::new();

        let entries: Vec<(Vec<u8>, u64, u32, u64)> = self
            .keydir
            .iter()
            .map(|(k, &(pos, len, version))| (k.clone(), pos, len, version))
            .collect();

        for (key, pos, len, version) in entries {
            let value = self.log.read_value(pos, len)?;
            let (new_pos, new_len) = new_log.write_entry(&key, Some(&value), version)?;
            new_keydir.insert(key, (new_pos, new_len, version));
        }

        std::fs::rename(&new_log.path, &self.log.path).map_err(|err| {
            Error::Internal(format!(
                "compact rename from {:?} to {:?} failed: {err}",
                new_log.path, self.log.path
            ))
        })?;
        new_log.path = self.log.path.clone();

        self.log = new_log;
        self.keydir = new_keydir;
        self.write_manifest()
    }
}

impl Drop for VersionManager {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            log::error!("failed to flush version manager on drop: {err}");
        }
    }
}

/// Recomputes the Merkle root over everything currently in `keydir` by
/// reading each value back out of `log`.
fn compute_root_of(log: &mut VersionedLog, keydir: &KeyDir) -> CResult<[u8; 32]> {
    let reads: Vec<(Vec<u8>, u64, u32)> =
        keydir.iter().map(|(k, &(pos, len, _))| (k.clone(), pos, len)).collect();
    let mut entries = Vec::with_capacity(reads.len());
    for (key, pos, len) in reads {
        let value = log.read_value(pos, len)?;
        entries.push((key, value));
    }
    let refs: Vec<(&[u8], &[u8])> = entries.iter().map(|(k, v)| (k.as_slice(), v.as_slice())).collect();
    Ok(digest::merkle_root(refs))
}

fn read_manifest_at(path: &Path) -> CResult<Option<Manifest>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Recomputes the root from `log`/`keydir` and checks it against the
/// checkpoint recorded at `manifest_path`, if one exists. Deliberately takes
/// plain locals rather than `&VersionManager`: called before the manager is
/// constructed, so a verification failure can return `Err` without ever
/// building (and then dropping, and then flushing) a `VersionManager` over
/// data that hasn't been validated yet.
fn verify_against_checkpoint(
    manifest_path: &Path,
    log: &mut VersionedLog,
    keydir: &mut KeyDir,
) -> CResult<()> {
    let Some(manifest) = read_manifest_at(manifest_path)? else { return Ok(()) };
    let computed = hex::encode(compute_root_of(log, keydir)?);
    if computed != manifest.merkle_root {
        return Err(Error::Corruption(format!(
            "checkpoint root {} does not match recomputed root {computed}",
            manifest.merkle_root
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut vm = VersionManager::open(dir.path()).unwrap();

        vm.put(b"a", b"1".to_vec()).unwrap();
        assert_eq!(vm.get(b"a").unwrap(), Some(b"1".to_vec()));

        assert!(vm.delete(b"a").unwrap());
        assert_eq!(vm.get(b"a").unwrap(), None);
    }

    #[test]
    fn delete_of_an_absent_key_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut vm = VersionManager::open(dir.path()).unwrap();
        let before = vm.stats().unwrap().current_version;
        assert!(!vm.delete(b"missing").unwrap());
        assert_eq!(vm.stats().unwrap().current_version, before);
    }

    #[test]
    fn versions_are_monotonic_and_global() {
        let dir = tempfile::tempdir().unwrap();
        let mut vm = VersionManager::open(dir.path()).unwrap();

        let v1 = vm.put(b"a", b"1".to_vec()).unwrap();
        let v2 = vm.put(b"b", b"2".to_vec()).unwrap();
        assert!(v1 < v2);

        assert!(vm.delete(b"a").unwrap());
        let v3 = vm.put(b"c", b"3".to_vec()).unwrap();
        assert!(v2 < v3);
    }

    #[test]
    fn merkle_root_changes_with_content_and_reproduces_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut vm = VersionManager::open(dir.path()).unwrap();
        let empty_root = vm.merkle_root().unwrap();

        vm.put(b"a", b"1".to_vec()).unwrap();
        let root_with_a = vm.merkle_root().unwrap();
        assert_ne!(empty_root, root_with_a);

        vm.flush().unwrap();
        drop(vm);

        let mut reopened = VersionManager::open(dir.path()).unwrap();
        assert_eq!(reopened.merkle_root().unwrap(), root_with_a);
    }

    #[test]
    fn explicit_recover_rebuilds_from_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut vm = VersionManager::open(dir.path()).unwrap();
        vm.put(b"a", b"1".to_vec()).unwrap();
        vm.flush().unwrap();
        let root = vm.merkle_root().unwrap();

        vm.recover().unwrap();
        assert_eq!(vm.merkle_root().unwrap(), root);
        assert_eq!(vm.get(b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn recovery_detects_checkpoint_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let mut vm = VersionManager::open(dir.path()).unwrap();
        vm.put(b"a", b"1".to_vec()).unwrap();
        vm.flush().unwrap();
        drop(vm);

        // Tamper with the manifest's recorded root.
        let manifest_path = dir.path().join(MANIFEST_FILE);
        let tampered = Manifest { current_version: 1, merkle_root: hex::encode([0u8; 32]) };
        std::fs::write(&manifest_path, serde_json::to_vec(&tampered).unwrap()).unwrap();

        let err = VersionManager::open_with_lock(dir.path(), false);
        assert!(matches!(err, Err(Error::Corruption(_))));
    }

    #[test]
    fn compact_preserves_live_entries_and_versions() {
        let dir = tempfile::tempdir().unwrap();
        let mut vm = VersionManager::open(dir.path()).unwrap();
        vm.put(b"a", b"1".to_vec()).unwrap();
        vm.put(b"a", b"2".to_vec()).unwrap();
        vm.put(b"b", b"3".to_vec()).unwrap();
        assert!(vm.delete(b"b").unwrap());

        let before = vm.enumerate().unwrap();
        let root_before = vm.merkle_root().unwrap();

        vm.compact().unwrap();

        let after = vm.enumerate().unwrap();
        assert_eq!(before, after);
        assert_eq!(vm.merkle_root().unwrap(), root_before);
    }

    #[test]
    fn stats_reports_garbage_after_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let mut vm = VersionManager::open(dir.path()).unwrap();
        vm.put(b"a", b"1".to_vec()).unwrap();
        vm.put(b"a", b"22".to_vec()).unwrap();
        let stats = vm.stats().unwrap();
        assert_eq!(stats.keys, 1);
        assert!(stats.garbage_disk_size > 0);
    }
}
