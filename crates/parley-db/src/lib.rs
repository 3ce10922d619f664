pub mod cache;
pub mod cascade;
pub mod error;
pub mod history;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod notifications;
pub mod threads;
pub mod users;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags, Transaction, TransactionBehavior};
use tracing::info;

pub use cache::UnreadCounts;
pub use cascade::{CascadeCoordinator, PurgeSummary};
pub use error::{Entity, Result, StoreError};
pub use history::HistoryLog;
pub use messages::MessageStore;
pub use notifications::{NotificationSink, UnreadNotifications};
pub use threads::ThreadIndex;
pub use users::{LocalUsers, UserDirectory};

/// Tunables for a store. `Default` gives values suited to a small server.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Extra attempts an edit makes after losing a write conflict.
    pub edit_retries: u32,
    /// Longest accepted message body, in characters.
    pub max_body_len: usize,
    /// Rows fetched per page by the lazy unread-notification iterator.
    pub unread_page_size: usize,
    /// Users whose unread count is kept in memory. Zero disables the cache.
    pub unread_cache_capacity: usize,
    /// Read-only connections opened next to the writer (file databases only).
    pub reader_pool_size: usize,
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            edit_retries: 3,
            max_body_len: 4000,
            unread_page_size: 100,
            unread_cache_capacity: 1024,
            reader_pool_size: 4,
            busy_timeout_ms: 5000,
        }
    }
}

/// Message store backed by SQLite: one writer connection, a small pool of
/// read-only connections, and the user directory consulted on every create.
pub struct Database {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    reader_idx: AtomicUsize,
    directory: Box<dyn UserDirectory>,
    unread_counts: UnreadCounts,
    config: StoreConfig,
}

impl Database {
    pub fn open(path: &Path, config: StoreConfig) -> Result<Self> {
        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);

        let writer = Connection::open(path)?;
        // WAL mode for concurrent reads
        writer.pragma_update(None, "journal_mode", "WAL")?;
        writer.pragma_update(None, "foreign_keys", "ON")?;
        writer.busy_timeout(busy_timeout)?;

        migrations::run(&writer)?;

        let mut readers = Vec::with_capacity(config.reader_pool_size);
        for _ in 0..config.reader_pool_size {
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            conn.busy_timeout(busy_timeout)?;
            readers.push(Mutex::new(conn));
        }

        info!(
            "Database opened at {} (1 writer + {} readers)",
            path.display(),
            readers.len()
        );
        Ok(Self::assemble(writer, readers, config))
    }

    /// Single-connection database that lives as long as the value does.
    pub fn open_in_memory(config: StoreConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        Ok(Self::assemble(conn, Vec::new(), config))
    }

    fn assemble(
        writer: Connection,
        readers: Vec<Mutex<Connection>>,
        config: StoreConfig,
    ) -> Self {
        Self {
            writer: Mutex::new(writer),
            readers,
            reader_idx: AtomicUsize::new(0),
            directory: Box::new(LocalUsers),
            unread_counts: UnreadCounts::new(config.unread_cache_capacity),
            config,
        }
    }

    /// Replace the user directory consulted when messages are created.
    pub fn with_directory(mut self, directory: impl UserDirectory + 'static) -> Self {
        self.directory = Box::new(directory);
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn messages(&self) -> MessageStore<'_> {
        MessageStore::new(self)
    }

    pub fn notifications(&self) -> NotificationSink<'_> {
        NotificationSink::new(self)
    }

    pub fn history(&self) -> HistoryLog<'_> {
        HistoryLog::new(self)
    }

    pub fn threads(&self) -> ThreadIndex<'_> {
        ThreadIndex::new(self)
    }

    pub fn cascade(&self) -> CascadeCoordinator<'_> {
        CascadeCoordinator::new(self)
    }

    /// Run a read on one of the pooled readers, or on the writer when there is no pool.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        if self.readers.is_empty() {
            let conn = self.lock_writer()?;
            return f(&conn);
        }
        let idx = self.reader_idx.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let conn = self.readers[idx]
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?;
        f(&conn)
    }

    /// Run `f` inside an immediate write transaction. The transaction commits
    /// when `f` returns `Ok` and rolls back otherwise, so callers never
    /// observe partial effects.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.lock_writer()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, Connection>> {
        self.writer.lock().map_err(|_| StoreError::LockPoisoned)
    }

    pub(crate) fn directory(&self) -> &dyn UserDirectory {
        self.directory.as_ref()
    }

    pub(crate) fn unread_counts(&self) -> &UnreadCounts {
        &self.unread_counts
    }
}
