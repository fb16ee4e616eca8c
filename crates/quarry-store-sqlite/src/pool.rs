// crates/quarry-store-sqlite/src/pool.rs
// ============================================================================
// Module: Handle Pool
// Description: Single-writer, multi-reader connection pool with blockade.
// Purpose: Issue and recycle connections for one database path.
// Dependencies: quarry-core, rusqlite, tracing
// ============================================================================

//! ## Overview
//! The pool is the only synchronization point for handle issuance. It keeps
//! at most one idle write connection and a stack of idle read connections,
//! and counts what is currently issued. A mutex guards the counters and a
//! condition variable wakes waiters whenever a handle returns.
//!
//! ## Blockade
//! A blockade refuses every acquisition that does not present the
//! blockading [`BlockadeGuard`], then waits a bounded time for issued
//! handles to drain. Maintenance operations (backup, deposit, retrieve, file
//! moves) run under a blockade so they observe a quiescent database.
//!
//! ## Configuration Generations
//! Registering or removing a handle config bumps the pool generation. Idle
//! connections from an older generation are closed instead of reused, and
//! issued ones are closed when they come back.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::ops::Deref;
use std::ops::DerefMut;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Instant;

use quarry_core::Operation;
use quarry_core::QuarryError;

use crate::config::EngineConfig;
use crate::context::HandleContext;
use crate::database::DatabaseShared;
use crate::handle::HandleKind;
use crate::handle::InnerHandle;
use crate::handle_config::ConfigSet;
use crate::handle_config::HandleConfig;
use crate::handle_config::Priority;
use crate::sqlite::apply_pragmas;
use crate::sqlite::ensure_parent_dir;
use crate::sqlite::open_connection;
use crate::sqlite::sqlite_error;

// ============================================================================
// SECTION: Types
// ============================================================================

/// How an acquisition behaves when no slot is free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AcquireMode {
    /// Wait up to the configured acquire timeout.
    Wait,
    /// Fail immediately with `Busy`.
    Try,
}

/// Mutable pool bookkeeping.
#[derive(Default)]
struct PoolState {
    /// Idle write connection.
    idle_writer: Option<InnerHandle>,
    /// Idle read connections.
    idle_readers: Vec<InnerHandle>,
    /// True while the write slot is issued.
    writer_issued: bool,
    /// Number of issued read handles.
    readers_issued: usize,
    /// True while a blockade is held.
    blockaded: bool,
}

impl PoolState {
    /// Returns true when any handle is issued.
    const fn has_issued(&self) -> bool {
        self.writer_issued || self.readers_issued > 0
    }

    /// Removes every idle connection.
    fn take_idle(&mut self) -> Vec<InnerHandle> {
        let mut idle = std::mem::take(&mut self.idle_readers);
        if let Some(writer) = self.idle_writer.take() {
            idle.push(writer);
        }
        idle
    }
}

/// Connection pool of one database.
///
/// # Invariants
/// - At most one write handle is issued at any time.
/// - At most `max_readers` read handles are issued at any time.
/// - While blockaded, only bypassing acquisitions succeed.
pub(crate) struct HandlePool {
    /// Shared database context handed to every connection.
    context: Arc<HandleContext>,
    /// Engine configuration.
    config: EngineConfig,
    /// Registered handle configs.
    configs: Mutex<ConfigSet>,
    /// Current config generation.
    generation: AtomicU64,
    /// Issuance bookkeeping.
    state: Mutex<PoolState>,
    /// Signalled whenever a handle returns or a blockade lifts.
    released: Condvar,
}

impl HandlePool {
    /// Creates an empty pool; connections open lazily.
    pub(crate) fn new(context: Arc<HandleContext>, config: EngineConfig) -> Self {
        Self {
            context,
            config,
            configs: Mutex::new(ConfigSet::default()),
            generation: AtomicU64::new(0),
            state: Mutex::new(PoolState::default()),
            released: Condvar::new(),
        }
    }

    /// Returns the engine configuration.
    pub(crate) const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Issues a handle of `kind`.
    ///
    /// `bypass` is set only by the blockade owner.
    pub(crate) fn acquire(
        &self,
        kind: HandleKind,
        mode: AcquireMode,
        bypass: bool,
    ) -> Result<InnerHandle, QuarryError> {
        let deadline = Instant::now() + self.config.acquire_timeout();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let reused = loop {
            if state.blockaded && !bypass {
                return Err(self.busy("database is blockaded", kind));
            }
            match kind {
                HandleKind::Write if !state.writer_issued => {
                    state.writer_issued = true;
                    break state.idle_writer.take();
                }
                HandleKind::Read if state.readers_issued < self.config.max_readers => {
                    state.readers_issued += 1;
                    break state.idle_readers.pop();
                }
                _ => {}
            }
            if mode == AcquireMode::Try {
                return Err(self.busy("no free handle slot", kind));
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(self.busy("timed out waiting for a handle", kind));
            }
            let (guard, _) = self
                .released
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        };
        drop(state);

        let generation = self.generation.load(Ordering::Acquire);
        match reused {
            Some(handle) if handle.generation() == generation => Ok(handle),
            stale => {
                drop(stale);
                self.open_handle(kind, generation).inspect_err(|_| self.release_slot(kind))
            }
        }
    }

    /// Returns a handle to the pool.
    pub(crate) fn release(&self, mut handle: InnerHandle) {
        handle.recycle();
        let kind = handle.kind();
        let fresh = handle.generation() == self.generation.load(Ordering::Acquire);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let discarded = match kind {
            HandleKind::Write => {
                state.writer_issued = false;
                if fresh { state.idle_writer.replace(handle) } else { Some(handle) }
            }
            HandleKind::Read => {
                state.readers_issued = state.readers_issued.saturating_sub(1);
                if fresh {
                    state.idle_readers.push(handle);
                    None
                } else {
                    Some(handle)
                }
            }
        };
        drop(state);
        drop(discarded);
        self.released.notify_all();
    }

    /// Frees a slot whose connection could not be opened.
    fn release_slot(&self, kind: HandleKind) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match kind {
            HandleKind::Write => state.writer_issued = false,
            HandleKind::Read => state.readers_issued = state.readers_issued.saturating_sub(1),
        }
        drop(state);
        self.released.notify_all();
    }

    /// Opens and configures a new connection.
    fn open_handle(&self, kind: HandleKind, generation: u64) -> Result<InnerHandle, QuarryError> {
        let path = self.context.path();
        ensure_parent_dir(path).map_err(|err| self.context.report(err))?;
        let connection = open_connection(path)
            .and_then(|connection| {
                apply_pragmas(&connection, &self.config)?;
                if kind == HandleKind::Read {
                    connection
                        .execute_batch("PRAGMA query_only = ON;")
                        .map_err(|err| sqlite_error(&err))?;
                }
                Ok(connection)
            })
            .map_err(|err| self.context.report(err.with_operation("open handle")))?;
        let mut handle = InnerHandle::new(connection, kind, Arc::clone(&self.context), generation);
        let configs = self.configs.lock().unwrap_or_else(PoisonError::into_inner).ordered();
        for config in configs {
            config.invoke(&mut handle)?;
        }
        tracing::debug!(
            path = %self.context.path_key(),
            handle = handle.id(),
            kind = kind.label(),
            "opened database handle"
        );
        self.context.emit_operation(Operation::OpenHandle);
        Ok(handle)
    }

    /// Builds and reports a `Busy` error.
    fn busy(&self, message: &str, kind: HandleKind) -> QuarryError {
        self.context.report(QuarryError::busy(format!("{message} ({} handle)", kind.label())))
    }

    // ------------------------------------------------------------------------
    // Blockade
    // ------------------------------------------------------------------------

    /// Refuses new acquisitions and waits for issued handles to drain.
    pub(crate) fn blockade(&self) -> Result<(), QuarryError> {
        let deadline = Instant::now() + self.config.blockade_drain_timeout();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.blockaded {
            drop(state);
            return Err(self.context.report(QuarryError::busy("database is already blockaded")));
        }
        state.blockaded = true;
        while state.has_issued() {
            let now = Instant::now();
            if now >= deadline {
                state.blockaded = false;
                drop(state);
                self.released.notify_all();
                return Err(self
                    .context
                    .report(QuarryError::busy("timed out waiting for handles to drain")));
            }
            let (guard, _) = self
                .released
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
        drop(state);
        tracing::debug!(path = %self.context.path_key(), "database blockaded");
        Ok(())
    }

    /// Lifts the blockade.
    pub(crate) fn unblockade(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.blockaded = false;
        drop(state);
        self.released.notify_all();
        tracing::debug!(path = %self.context.path_key(), "database unblockaded");
    }

    /// Returns true while a blockade is held.
    pub(crate) fn is_blockaded(&self) -> bool {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).blockaded
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Returns true when any connection is idle or issued.
    pub(crate) fn is_opened(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.idle_writer.is_some() || !state.idle_readers.is_empty() || state.has_issued()
    }

    /// Closes every idle connection, returning how many were closed.
    pub(crate) fn purge(&self) -> usize {
        let idle = self.state.lock().unwrap_or_else(PoisonError::into_inner).take_idle();
        let closed = idle.len();
        drop(idle);
        if closed > 0 {
            tracing::debug!(path = %self.context.path_key(), closed, "purged idle handles");
        }
        closed
    }

    /// Registers or replaces a handle config.
    pub(crate) fn set_config(&self, name: &str, config: Arc<dyn HandleConfig>, priority: Priority) {
        self.configs.lock().unwrap_or_else(PoisonError::into_inner).set(name, config, priority);
        self.bump_generation();
    }

    /// Removes a handle config, returning true when it existed.
    pub(crate) fn remove_config(&self, name: &str) -> bool {
        let removed = self.configs.lock().unwrap_or_else(PoisonError::into_inner).remove(name);
        if removed {
            self.bump_generation();
        }
        removed
    }

    /// Returns registered config names in invocation order.
    pub(crate) fn config_names(&self) -> Vec<String> {
        self.configs.lock().unwrap_or_else(PoisonError::into_inner).names()
    }

    /// Invalidates every existing connection.
    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.purge();
    }
}

// ============================================================================
// SECTION: Recyclable Handle
// ============================================================================

/// Handle on loan from the pool; returns itself when dropped.
pub struct RecyclableHandle {
    /// Loaned connection, present until drop.
    handle: Option<InnerHandle>,
    /// Owning database, kept alive while the loan lasts.
    shared: Arc<DatabaseShared>,
}

impl RecyclableHandle {
    /// Wraps a loaned connection.
    pub(crate) const fn new(handle: InnerHandle, shared: Arc<DatabaseShared>) -> Self {
        Self {
            handle: Some(handle),
            shared,
        }
    }
}

impl Deref for RecyclableHandle {
    type Target = InnerHandle;

    #[allow(clippy::expect_used, reason = "The handle is present until drop.")]
    fn deref(&self) -> &InnerHandle {
        self.handle.as_ref().expect("recyclable handle used after release")
    }
}

impl DerefMut for RecyclableHandle {
    #[allow(clippy::expect_used, reason = "The handle is present until drop.")]
    fn deref_mut(&mut self) -> &mut InnerHandle {
        self.handle.as_mut().expect("recyclable handle used after release")
    }
}

impl Drop for RecyclableHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.shared.pool().release(handle);
        }
    }
}

impl fmt::Debug for RecyclableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecyclableHandle").field("handle", &self.handle).finish()
    }
}
