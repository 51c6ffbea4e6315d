//! Pool of reusable render sessions.
//!
//! The pool owns the renderer and every session it opened. Sessions are handed
//! out as [`SessionLease`]s. A released lease marks its session idle again. A
//! lease dropped without being released belongs to an interrupted render whose
//! browser work may still be running, so its session is removed and closed
//! instead of being handed to the next caller.
//!
//! The pool never waits for a busy session to free up: when no session is
//! idle a new one is created. Growth is bounded only by the eviction sweeper
//! reclaiming sessions that have been idle for too long.

use crate::renderer::{RenderSession, Renderer};
use crate::{Error, Result};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Lifecycle state of a pooled session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Assigned to exactly one in-flight render
    Busy,
    /// Available for reuse since the given instant
    Idle { since: Instant },
}

impl SessionState {
    pub fn is_idle(&self) -> bool {
        matches!(self, SessionState::Idle { .. })
    }
}

/// Snapshot of the pool's occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Sessions currently in the pool
    pub total: usize,
    pub busy: usize,
    pub idle: usize,
    /// Sessions ever created
    pub created: u64,
}

struct Slot<S> {
    id: u64,
    session: Arc<S>,
    state: SessionState,
}

struct Slots<S> {
    slots: Vec<Slot<S>>,
    created: u64,
    shut_down: bool,
}

struct PoolInner<R: Renderer> {
    renderer: R,
    slots: Mutex<Slots<R::Session>>,
}

/// Shared handle to the session pool.
///
/// Cloning is cheap; all clones operate on the same sessions.
pub struct SessionPool<R: Renderer> {
    inner: Arc<PoolInner<R>>,
}

impl<R: Renderer> Clone for SessionPool<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Renderer> SessionPool<R> {
    /// Create an empty pool over a launched renderer.
    pub fn new(renderer: R) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                renderer,
                slots: Mutex::new(Slots {
                    slots: Vec::new(),
                    created: 0,
                    shut_down: false,
                }),
            }),
        }
    }

    pub fn renderer(&self) -> &R {
        &self.inner.renderer
    }

    // State transitions are single assignments, so a poisoned lock still
    // holds consistent data.
    fn lock(&self) -> MutexGuard<'_, Slots<R::Session>> {
        self.inner.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand out the first idle session, or create a new one.
    ///
    /// Creation runs on its own task. If the caller stops waiting (a timeout
    /// or a dropped request), the new session still joins the pool as idle
    /// rather than being leaked.
    pub async fn acquire(&self) -> Result<SessionLease<R>> {
        {
            let mut slots = self.lock();
            if slots.shut_down {
                return Err(Error::ShutDown);
            }
            if let Some(slot) = slots.slots.iter_mut().find(|s| s.state.is_idle()) {
                slot.state = SessionState::Busy;
                debug!("reusing session {}", slot.id);
                return Ok(SessionLease::new(self.clone(), slot.id, Arc::clone(&slot.session)));
            }
        }

        let (tx, rx) = oneshot::channel();
        let pool = self.clone();
        tokio::spawn(async move {
            let created = pool.create().await;
            if let Err(Ok(lease)) = tx.send(created) {
                debug!("session {} outlived its caller, keeping it idle", lease.id());
                lease.release();
            }
        });
        rx.await
            .map_err(|_| Error::SessionError("session creation task ended without a result".into()))?
    }

    async fn create(&self) -> Result<SessionLease<R>> {
        let started = Instant::now();
        let session = Arc::new(self.inner.renderer.new_session().await?);

        let registered = {
            let mut slots = self.lock();
            if slots.shut_down {
                None
            } else {
                slots.created += 1;
                let id = slots.created;
                slots.slots.push(Slot {
                    id,
                    session: Arc::clone(&session),
                    state: SessionState::Busy,
                });
                Some((id, slots.slots.len()))
            }
        };

        match registered {
            Some((id, size)) => {
                info!(
                    "created session {} in {}ms (pool size {})",
                    id,
                    started.elapsed().as_millis(),
                    size
                );
                Ok(SessionLease::new(self.clone(), id, session))
            }
            None => {
                if let Err(e) = session.close().await {
                    warn!("failed to close session created during shutdown: {}", e);
                }
                Err(Error::ShutDown)
            }
        }
    }

    fn mark_idle(&self, id: u64) {
        let mut slots = self.lock();
        if let Some(slot) = slots.slots.iter_mut().find(|s| s.id == id) {
            slot.state = SessionState::Idle { since: Instant::now() };
            debug!("session {} released", id);
        }
    }

    fn remove(&self, id: u64) -> Option<Arc<R::Session>> {
        let mut slots = self.lock();
        let index = slots.slots.iter().position(|s| s.id == id)?;
        Some(slots.slots.remove(index).session)
    }

    /// Close and remove every session that has been idle for at least
    /// `max_idle`. Returns how many were evicted.
    ///
    /// Eligibility is decided and the slot removed under one lock, so a
    /// session re-acquired concurrently is never closed.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut evicted = Vec::new();
        {
            let mut slots = self.lock();
            slots.slots.retain(|slot| match slot.state {
                SessionState::Idle { since } if now.saturating_duration_since(since) >= max_idle => {
                    evicted.push((slot.id, Arc::clone(&slot.session)));
                    false
                }
                _ => true,
            });
        }

        if evicted.is_empty() {
            return 0;
        }
        let ids: Vec<u64> = evicted.iter().map(|(id, _)| *id).collect();
        for (id, session) in &evicted {
            if let Err(e) = session.close().await {
                warn!("failed to close evicted session {}: {}", id, e);
            }
        }
        info!("evicted {} idle session(s): {:?}", ids.len(), ids);
        ids.len()
    }

    pub fn stats(&self) -> PoolStats {
        let slots = self.lock();
        let busy = slots.slots.iter().filter(|s| s.state == SessionState::Busy).count();
        PoolStats {
            total: slots.slots.len(),
            busy,
            idle: slots.slots.len() - busy,
            created: slots.created,
        }
    }

    /// State of the session with the given id, if it is still pooled.
    pub fn state_of(&self, id: u64) -> Option<SessionState> {
        self.lock().slots.iter().find(|s| s.id == id).map(|s| s.state)
    }

    pub fn is_shut_down(&self) -> bool {
        self.lock().shut_down
    }

    /// Close every session and then the renderer.
    ///
    /// Later calls to [`acquire`](Self::acquire) fail with [`Error::ShutDown`].
    /// Calling this more than once is a no-op.
    pub async fn shutdown(&self) {
        let drained = {
            let mut slots = self.lock();
            if slots.shut_down {
                return;
            }
            slots.shut_down = true;
            std::mem::take(&mut slots.slots)
        };

        let count = drained.len();
        for slot in drained {
            if slot.state == SessionState::Busy {
                warn!("closing session {} while it is still busy", slot.id);
            }
            if let Err(e) = slot.session.close().await {
                warn!("failed to close session {}: {}", slot.id, e);
            }
        }
        if let Err(e) = self.inner.renderer.close().await {
            warn!("failed to close renderer: {}", e);
        }
        info!("session pool shut down, {} session(s) closed", count);
    }
}

/// Exclusive use of one pooled session.
///
/// [`release`](Self::release) returns the session to the pool as idle;
/// [`discard`](Self::discard) removes and closes it. Dropping the lease
/// without either retires the session like `discard`, with the close running
/// on a background task.
pub struct SessionLease<R: Renderer> {
    pool: SessionPool<R>,
    id: u64,
    session: Arc<R::Session>,
    done: bool,
}

impl<R: Renderer> SessionLease<R> {
    fn new(pool: SessionPool<R>, id: u64, session: Arc<R::Session>) -> Self {
        Self {
            pool,
            id,
            session,
            done: false,
        }
    }

    /// Correlation id, for logs only.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn session(&self) -> &R::Session {
        &self.session
    }

    /// Return the session to the pool as idle.
    pub fn release(mut self) {
        self.done = true;
        self.pool.mark_idle(self.id);
    }

    /// Remove the session from the pool and close it.
    pub async fn discard(mut self) {
        self.done = true;
        if let Some(session) = self.pool.remove(self.id) {
            if let Err(e) = session.close().await {
                warn!("failed to close discarded session {}: {}", self.id, e);
            }
            info!("discarded session {}", self.id);
        }
    }
}

impl<R: Renderer> Drop for SessionLease<R> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let Some(session) = self.pool.remove(self.id) else {
            return;
        };
        let id = self.id;
        warn!("session {} dropped mid-render, retiring it", id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = session.close().await {
                        warn!("failed to close retired session {}: {}", id, e);
                    }
                });
            }
            Err(_) => warn!("no runtime to close retired session {}", id),
        }
    }
}
