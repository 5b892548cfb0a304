//! Reader/writer lock keyed by pixel rectangles.
//!
//! Each [`Image`](crate::image::Image) owns one [`RegionLock`]. A request
//! conflicts with an active entry when the rectangles overlap and either
//! side wants to write. Conflicting requests park on a condition variable
//! and re-run the admission scan from scratch after every release; no
//! fairness between waiters is promised.


use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::Rect;

common::id_type!(LockToken);
common::id_type!(HolderId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockMode {
    Read,
    Write,
}

/// How active entries are recorded for admission checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockSemantics {
    /// Overlapping entries coexist only when both are reads.
    #[default]
    Symmetric,
    /// Every entry is recorded as a read, whatever was requested. New reads
    /// never wait on active writes; new writes still wait on any overlap.
    /// Kept for callers that rely on reads passing active writes.
    Legacy,
}

impl LockSemantics {
    fn recorded_mode(self, requested: LockMode) -> LockMode {
        match self {
            LockSemantics::Symmetric => requested,
            LockSemantics::Legacy => LockMode::Read,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("Holder {holder} already holds a region lock on this image")]
    RecursiveLock { holder: HolderId },
    #[error("Lock {token} is held by {owner}, not by {holder}")]
    NotOwner {
        token: LockToken,
        holder: HolderId,
        owner: HolderId,
    },
    #[error("No active region lock with token {0}")]
    UnknownToken(LockToken),
}

pub type LockResult<T> = Result<T, LockError>;

#[derive(Debug, Clone, Copy)]
pub struct RegionLockEntry {
    pub rect: Rect,
    pub mode: LockMode,
    pub holder: HolderId,
    pub token: LockToken,
    recorded: LockMode,
}

impl RegionLockEntry {
    fn conflicts_with(&self, rect: &Rect, mode: LockMode) -> bool {
        (self.recorded == LockMode::Write || mode == LockMode::Write) && self.rect.intersects(rect)
    }
}

#[derive(Debug, Default)]
struct LockState {
    entries: Vec<RegionLockEntry>,
    /// Number of callers currently parked in `enter`.
    waiting: usize,
}

impl LockState {
    fn position(&self, token: LockToken) -> LockResult<usize> {
        self.entries
            .iter()
            .position(|entry| entry.token == token)
            .ok_or(LockError::UnknownToken(token))
    }
}

enum Admission {
    Granted(LockToken),
    /// Carries the token of the first conflicting entry.
    Blocked(LockToken),
}

#[derive(Debug, Default)]
pub struct RegionLock {
    state: Mutex<LockState>,
    released: Condvar,
    semantics: LockSemantics,
}

impl RegionLock {
    pub fn new(semantics: LockSemantics) -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            released: Condvar::new(),
            semantics,
        }
    }

    pub fn semantics(&self) -> LockSemantics {
        self.semantics
    }

    /// Claims `rect` for `holder`, blocking while a conflicting entry is active.
    ///
    /// Fails with [`LockError::RecursiveLock`] if `holder` already holds an
    /// entry on this lock.
    pub fn enter(&self, rect: Rect, mode: LockMode, holder: HolderId) -> LockResult<LockToken> {
        let mut state = self.state.lock();
        loop {
            let conflict = match self.admit(&mut state, rect, mode, holder)? {
                Admission::Granted(token) => return Ok(token),
                Admission::Blocked(conflict) => conflict,
            };

            tracing::trace!(
                "{:?} lock on {} by {} waits for {}",
                mode,
                rect,
                holder,
                conflict
            );
            state.waiting += 1;
            self.released.wait(&mut state);
            state.waiting -= 1;
        }
    }

    /// Non-blocking variant of [`enter`](Self::enter): `Ok(None)` when the
    /// request would have to wait.
    pub fn try_enter(
        &self,
        rect: Rect,
        mode: LockMode,
        holder: HolderId,
    ) -> LockResult<Option<LockToken>> {
        let mut state = self.state.lock();
        match self.admit(&mut state, rect, mode, holder)? {
            Admission::Granted(token) => Ok(Some(token)),
            Admission::Blocked(_) => Ok(None),
        }
    }

    /// Admission check and insert, done under the state lock.
    fn admit(
        &self,
        state: &mut LockState,
        rect: Rect,
        mode: LockMode,
        holder: HolderId,
    ) -> LockResult<Admission> {
        if state.entries.iter().any(|entry| entry.holder == holder) {
            return Err(LockError::RecursiveLock { holder });
        }
        if let Some(entry) = state
            .entries
            .iter()
            .find(|entry| entry.conflicts_with(&rect, mode))
        {
            return Ok(Admission::Blocked(entry.token));
        }

        let token = LockToken::unique();
        state.entries.push(RegionLockEntry {
            rect,
            mode,
            holder,
            token,
            recorded: self.semantics.recorded_mode(mode),
        });
        Ok(Admission::Granted(token))
    }

    /// Releases the entry `token`, which must belong to `holder`.
    pub fn exit(&self, token: LockToken, holder: HolderId) -> LockResult<()> {
        let mut state = self.state.lock();
        let idx = state.position(token)?;
        let owner = state.entries[idx].holder;
        if owner != holder {
            return Err(LockError::NotOwner {
                token,
                holder,
                owner,
            });
        }
        state.entries.swap_remove(idx);
        drop(state);

        self.released.notify_all();
        Ok(())
    }

    /// Releases `token` regardless of who holds it. Meant for recovering
    /// locks left behind by a worker that failed.
    pub fn force_exit(&self, token: LockToken) -> LockResult<()> {
        let mut state = self.state.lock();
        let idx = state.position(token)?;
        let entry = state.entries.swap_remove(idx);
        drop(state);

        tracing::warn!(
            "Force-released {:?} lock {} on {} held by {}",
            entry.mode,
            entry.token,
            entry.rect,
            entry.holder
        );
        self.released.notify_all();
        Ok(())
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn waiting_count(&self) -> usize {
        self.state.lock().waiting
    }

    pub fn holds(&self, holder: HolderId) -> bool {
        self.state
            .lock()
            .entries
            .iter()
            .any(|entry| entry.holder == holder)
    }

    /// Snapshot of the active entries.
    pub fn entries(&self) -> Vec<RegionLockEntry> {
        self.state.lock().entries.clone()
    }
}
