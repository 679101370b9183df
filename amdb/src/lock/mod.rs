//! Shared/exclusive key locking with timeout-bounded acquisition and
//! deadlock detection.
//!
//! Holders are identified by an opaque, monotonically minted [`HolderId`]
//! rather than the OS thread id: a single logical caller (e.g. a
//! transaction retried across threads, or a test driving the manager from
//! one thread on behalf of several simulated callers) needs one stable
//! identity independent of which OS thread happens to run it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::{CResult, Error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HolderId(u64);

static NEXT_HOLDER: AtomicU64 = AtomicU64::new(1);

impl HolderId {
    pub fn new() -> Self {
        HolderId(NEXT_HOLDER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for HolderId {
    fn default() -> Self {
        HolderId::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockKind {
    Shared,
    Exclusive,
}

struct KeyLock {
    kind: LockKind,
    holders: HashSet<HolderId>,
    acquired_at: Instant,
}

#[derive(Debug, Clone)]
pub struct LockInfo {
    pub key: Vec<u8>,
    pub shared: bool,
    pub holders: Vec<HolderId>,
    pub held_for: Duration,
}

struct State {
    locks: HashMap<Vec<u8>, KeyLock>,
    /// holder -> key it is currently blocked waiting on, for deadlock DFS.
    waiting_for: HashMap<HolderId, Vec<u8>>,
    /// Holders whose lock was forcibly released by `check_deadlock` to break
    /// a cycle. Consumed (and cleared) the next time that holder releases a
    /// lock, so the in-flight operation can report `DeadlockAborted` instead
    /// of quietly succeeding atop a lock it no longer actually holds.
    aborted: HashSet<HolderId>,
}

pub struct LockManager {
    state: Mutex<State>,
    cv: Condvar,
}

impl LockManager {
    pub fn new() -> Self {
        LockManager {
            state: Mutex::new(State {
                locks: HashMap::new(),
                waiting_for: HashMap::new(),
                aborted: HashSet::new(),
            }),
            cv: Condvar::new(),
        }
    }

    pub fn acquire_shared(
        &self,
        key: &[u8],
        holder: HolderId,
        timeout: Option<Duration>,
    ) -> CResult<()> {
        self.acquire(key, holder, LockKind::Shared, timeout)
    }

    pub fn acquire_exclusive(
        &self,
        key: &[u8],
        holder: HolderId,
        timeout: Option<Duration>,
    ) -> CResult<()> {
        self.acquire(key, holder, LockKind::Exclusive, timeout)
    }

    fn acquire(
        &self,
        key: &[u8],
        holder: HolderId,
        kind: LockKind,
        timeout: Option<Duration>,
    ) -> CResult<()> {
        let deadline = timeout.map(|d| Instant::now() + d);
        let mut guard = self.state.lock().unwrap();
        loop {
            let compatible = match guard.locks.get(key) {
                None => true,
                Some(existing) => match (existing.kind, kind) {
                    (LockKind::Shared, LockKind::Shared) => true,
                    _ => existing.holders.len() == 1 && existing.holders.contains(&holder),
                },
            };

            if compatible {
                guard.waiting_for.remove(&holder);
                let entry = guard
                    .locks
                    .entry(key.to_vec())
                    .or_insert_with(|| KeyLock { kind, holders: HashSet::new(), acquired_at: Instant::now() });
                entry.kind = kind;
                entry.holders.insert(holder);
                entry.acquired_at = Instant::now();
                return Ok(());
            }

            guard.waiting_for.insert(holder, key.to_vec());

            match deadline {
                None => {
                    guard = self.cv.wait(guard).unwrap();
                }
                Some(dl) => {
                    let now = Instant::now();
                    if now >= dl {
                        guard.waiting_for.remove(&holder);
                        return Err(Error::LockTimeout);
                    }
                    let (g, timeout_result) = self.cv.wait_timeout(guard, dl - now).unwrap();
                    guard = g;
                    if timeout_result.timed_out() && Instant::now() >= dl {
                        guard.waiting_for.remove(&holder);
                        return Err(Error::LockTimeout);
                    }
                }
            }
        }
    }

    /// Releases `holder`'s lock on `key`. Returns `true` if `holder`'s lock
    /// had been forcibly released by the deadlock sweeper since it was
    /// acquired — callers must surface that as `Error::DeadlockAborted`
    /// rather than treat the operation as having completed normally.
    pub fn release_shared(&self, key: &[u8], holder: HolderId) -> bool {
        self.release(key, holder)
    }

    pub fn release_exclusive(&self, key: &[u8], holder: HolderId) -> bool {
        self.release(key, holder)
    }

    fn release(&self, key: &[u8], holder: HolderId) -> bool {
        let mut guard = self.state.lock().unwrap();
        let mut drop_entry = false;
        if let Some(lock) = guard.locks.get_mut(key) {
            lock.holders.remove(&holder);
            if lock.holders.is_empty() {
                drop_entry = true;
            }
        }
        if drop_entry {
            guard.locks.remove(key);
        }
        let aborted = guard.aborted.remove(&holder);
        drop(guard);
        self.cv.notify_all();
        aborted
    }

    /// Number of distinct keys currently locked.
    pub fn table_size(&self) -> usize {
        self.state.lock().unwrap().locks.len()
    }

    pub fn inspect(&self, key: &[u8]) -> Option<LockInfo> {
        let guard = self.state.lock().unwrap();
        guard.locks.get(key).map(|lock| LockInfo {
            key: key.to_vec(),
            shared: lock.kind == LockKind::Shared,
            holders: lock.holders.iter().copied().collect(),
            held_for: lock.acquired_at.elapsed(),
        })
    }

    /// Runs one deadlock sweep: expires locks held past `max_hold`, then
    /// walks the wait-for graph for cycles. On finding one, releases exactly
    /// the single lock blocking the cycle's chosen holder — not every lock
    /// held by every holder in the cycle — marking whoever held it as
    /// aborted. Returns `true` if any corrective action was taken (an
    /// expiry or a cycle break), `false` if the manager was already clean.
    pub fn check_deadlock(&self, max_hold: Option<Duration>) -> bool {
        let mut guard = self.state.lock().unwrap();
        let mut acted = false;

        if let Some(max_hold) = max_hold {
            let expired_keys: Vec<Vec<u8>> = guard
                .locks
                .iter()
                .filter(|(_, lock)| lock.acquired_at.elapsed() >= max_hold)
                .map(|(k, _)| k.clone())
                .collect();
            for k in expired_keys {
                guard.locks.remove(&k);
                acted = true;
            }
        }

        let waiting_for = guard.waiting_for.clone();
        let locks_snapshot: HashMap<Vec<u8>, Vec<HolderId>> = guard
            .locks
            .iter()
            .map(|(k, v)| (k.clone(), v.holders.iter().copied().collect()))
            .collect();

        if let Some(cycle) = find_cycle(&waiting_for, &locks_snapshot) {
            let blocked_holder = cycle[0];
            if let Some(key) = guard.waiting_for.remove(&blocked_holder) {
                if let Some(lock) = guard.locks.remove(&key) {
                    for victim in lock.holders {
                        guard.aborted.insert(victim);
                    }
                }
            }
            acted = true;
        }

        drop(guard);
        if acted {
            self.cv.notify_all();
        }
        acted
    }
}

impl Default for LockManager {
    fn default() -> Self {
        LockManager::new()
    }
}

/// Depth-first search over the wait-for graph (holder -> blocking holders)
/// using an explicit recursion stack to detect a cycle. Returns the holders
/// in the first cycle found.
///
/// `stack` tracks the current recursion path only — a holder is pushed on
/// entry and popped on every return from `visit`, not just when it turns out
/// to be a leaf. Popping only on the leaf case (as an earlier version of
/// this did) leaves branching, non-cyclic holders stuck marked "on the
/// stack" after their subtree finishes, so a later, unrelated path that
/// happens to revisit them reports a cycle that was never actually there.
fn find_cycle(
    waiting_for: &HashMap<HolderId, Vec<u8>>,
    locks: &HashMap<Vec<u8>, Vec<HolderId>>,
) -> Option<Vec<HolderId>> {
    fn visit(
        holder: HolderId,
        waiting_for: &HashMap<HolderId, Vec<u8>>,
        locks: &HashMap<Vec<u8>, Vec<HolderId>>,
        visited: &mut HashSet<HolderId>,
        stack: &mut Vec<HolderId>,
    ) -> Option<Vec<HolderId>> {
        visited.insert(holder);
        stack.push(holder);

        if let Some(key) = waiting_for.get(&holder) {
            if let Some(blockers) = locks.get(key) {
                for &blocker in blockers {
                    if blocker == holder {
                        continue;
                    }
                    if let Some(pos) = stack.iter().position(|h| *h == blocker) {
                        return Some(stack[pos..].to_vec());
                    }
                    if !visited.contains(&blocker) {
                        if let Some(cycle) = visit(blocker, waiting_for, locks, visited, stack) {
                            return Some(cycle);
                        }
                    }
                }
            }
        }

        stack.pop();
        None
    }

    let mut visited: HashSet<HolderId> = HashSet::new();
    for &start in waiting_for.keys() {
        if !visited.contains(&start) {
            let mut stack = Vec::new();
            if let Some(cycle) = visit(start, waiting_for, locks, &mut visited, &mut stack) {
                return Some(cycle);
            }
        }
    }

    None
}
