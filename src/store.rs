use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use crate::error::{DockError, Result};
use crate::model::{normalize_list, AppItem, AppList};
use crate::shortcut::Shortcut;

pub const APPS_KEY: &str = "apps";
pub const SHORTCUT_KEY: &str = "shortcut";

const BUSY_TIMEOUT_MS: u64 = 2000;

/// The host's persistent key-value store. Change polling reports writes made
/// through this handle as well as writes made by other views.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: &Value) -> Result<()>;
    /// Keys changed since the previous poll, oldest first, without repeats.
    fn poll_changes(&self) -> Result<Vec<String>>;
}

fn sha256_for_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub struct SqliteStore {
    connection: Connection,
    last_revision: Cell<i64>,
}

impl SqliteStore {
    pub fn open(database_path: &Path) -> Result<Self> {
        if let Some(parent) = database_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let connection = Connection::open(database_path)?;
        Self::with_connection(connection)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(connection: Connection) -> Result<Self> {
        connection.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))?;
        run_migrations(&connection)?;
        let current: i64 =
            connection.query_row("SELECT COALESCE(MAX(revision), 0) FROM kv", [], |row| {
                row.get(0)
            })?;
        Ok(Self {
            connection,
            last_revision: Cell::new(current),
        })
    }
}

fn run_migrations(connection: &Connection) -> Result<()> {
    connection.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS kv (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            value_sha256 TEXT NOT NULL,
            revision INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_kv_revision ON kv(revision);
        "#,
    )?;
    Ok(())
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let raw: Option<String> = self
            .connection
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &Value) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        let digest = sha256_for_bytes(raw.as_bytes());

        let transaction = self.connection.unchecked_transaction()?;
        let existing: Option<String> = transaction
            .query_row(
                "SELECT value_sha256 FROM kv WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        if existing.as_deref() == Some(digest.as_str()) {
            log::debug!("store write for {} skipped; content unchanged", key);
            return Ok(());
        }

        let revision: i64 =
            transaction.query_row("SELECT COALESCE(MAX(revision), 0) + 1 FROM kv", [], |row| {
                row.get(0)
            })?;
        transaction.execute(
            "INSERT INTO kv (key, value, value_sha256, revision, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                value_sha256 = excluded.value_sha256,
                revision = excluded.revision,
                updated_at = excluded.updated_at",
            params![key, raw, digest, revision, Utc::now().timestamp_millis()],
        )?;
        transaction.commit()?;
        Ok(())
    }

    fn poll_changes(&self) -> Result<Vec<String>> {
        let mut statement = self
            .connection
            .prepare("SELECT key, revision FROM kv WHERE revision > ?1 ORDER BY revision")?;
        let rows = statement.query_map(params![self.last_revision.get()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut keys = Vec::new();
        for row in rows {
            let (key, revision) = row?;
            if revision > self.last_revision.get() {
                self.last_revision.set(revision);
            }
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}

/// In-process store for tests and hosts without durable storage.
#[derive(Default)]
pub struct MemoryStore {
    values: RefCell<HashMap<String, Value>>,
    pending: RefCell<Vec<String>>,
    unavailable: Cell<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.set(unavailable);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.get() {
            return Err(DockError::Unavailable("memory store marked unavailable".to_string()));
        }
        Ok(())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        self.check_available()?;
        Ok(self.values.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &Value) -> Result<()> {
        self.check_available()?;
        let mut values = self.values.borrow_mut();
        if values.get(key) == Some(value) {
            return Ok(());
        }
        values.insert(key.to_string(), value.clone());
        let mut pending = self.pending.borrow_mut();
        if !pending.iter().any(|existing| existing == key) {
            pending.push(key.to_string());
        }
        Ok(())
    }

    fn poll_changes(&self) -> Result<Vec<String>> {
        self.check_available()?;
        Ok(std::mem::take(&mut *self.pending.borrow_mut()))
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Rc<S> {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &Value) -> Result<()> {
        (**self).set(key, value)
    }

    fn poll_changes(&self) -> Result<Vec<String>> {
        (**self).poll_changes()
    }
}

/// Flags shared between the drag engine, the store adapter and the
/// visibility machine. Only ever touched from the UI thread.
#[derive(Debug, Default)]
pub struct DockContext {
    dragging: Cell<bool>,
    loading: Cell<bool>,
    modal_open: Cell<bool>,
    menu_open: Cell<bool>,
}

impl DockContext {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging.get()
    }

    pub fn set_dragging(&self, dragging: bool) {
        self.dragging.set(dragging);
    }

    pub fn is_loading(&self) -> bool {
        self.loading.get()
    }

    pub fn is_modal_open(&self) -> bool {
        self.modal_open.get()
    }

    pub fn set_modal_open(&self, open: bool) {
        self.modal_open.set(open);
    }

    pub fn is_menu_open(&self) -> bool {
        self.menu_open.get()
    }

    pub fn set_menu_open(&self, open: bool) {
        self.menu_open.set(open);
    }

    /// Claims the single render-pass slot. Returns `None` (the trigger is
    /// dropped) while another pass holds it.
    pub fn try_begin_load(self: &Rc<Self>) -> Option<LoadingGuard> {
        if self.loading.replace(true) {
            return None;
        }
        Some(LoadingGuard {
            context: Rc::clone(self),
        })
    }
}

#[derive(Debug)]
pub struct LoadingGuard {
    context: Rc<DockContext>,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.context.loading.set(false);
    }
}

/// Coalesces store change bursts into one reload signal.
#[derive(Debug)]
pub struct ChangeDebouncer {
    window_ms: u64,
    deadline: Option<u64>,
}

impl ChangeDebouncer {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            deadline: None,
        }
    }

    /// Restarts the window; an earlier pending deadline is discarded.
    pub fn notify(&mut self, now_ms: u64) {
        self.deadline = Some(now_ms + self.window_ms);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.deadline
    }

    /// True once the window has elapsed and nothing blocks a reload.
    pub fn poll(&mut self, now_ms: u64, context: &DockContext) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now_ms => {
                self.deadline = None;
                if context.is_dragging() {
                    log::debug!("list change ignored while dragging");
                    return false;
                }
                if context.is_loading() {
                    log::debug!("list change ignored; reload already in flight");
                    return false;
                }
                true
            }
            _ => false,
        }
    }
}

/// Typed access to the dock's keys with fail-soft semantics.
pub struct AppStore<S> {
    kv: S,
}

impl<S: KeyValueStore> AppStore<S> {
    pub fn new(kv: S) -> Self {
        Self { kv }
    }

    pub fn kv(&self) -> &S {
        &self.kv
    }

    /// The persisted list, or an empty one when the store is unavailable,
    /// empty or holds something other than an array.
    pub fn get_all(&self) -> AppList {
        let value = match self.kv.get(APPS_KEY) {
            Ok(Some(value)) => value,
            Ok(None) => return Vec::new(),
            Err(err) => {
                log::warn!("failed to read app list: {}", err);
                return Vec::new();
            }
        };
        let Value::Array(entries) = value else {
            log::warn!("stored app list is not an array; treating as empty");
            return Vec::new();
        };

        let mut list = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            match serde_json::from_value::<AppItem>(entry) {
                Ok(item) => list.push(item),
                Err(err) => log::warn!("skipping malformed app entry {}: {}", index, err),
            }
        }
        normalize_list(list)
    }

    /// Replaces the whole list. Returns false (after logging) on failure.
    pub fn save_all(&self, list: &[AppItem]) -> bool {
        let normalized = normalize_list(list.to_vec());
        let result = serde_json::to_value(&normalized)
            .map_err(DockError::from)
            .and_then(|value| self.kv.set(APPS_KEY, &value));
        match result {
            Ok(()) => true,
            Err(err) => {
                log::error!("failed to save app list: {}", err);
                false
            }
        }
    }

    pub fn load_shortcut(&self) -> Shortcut {
        match self.kv.get(SHORTCUT_KEY) {
            Ok(Some(value)) => serde_json::from_value(value).unwrap_or_else(|err| {
                log::warn!("stored shortcut is malformed: {}; using default", err);
                Shortcut::default()
            }),
            Ok(None) => Shortcut::default(),
            Err(err) => {
                log::warn!("failed to read shortcut: {}", err);
                Shortcut::default()
            }
        }
    }

    pub fn save_shortcut(&self, shortcut: &Shortcut) -> bool {
        let result = serde_json::to_value(shortcut)
            .map_err(DockError::from)
            .and_then(|value| self.kv.set(SHORTCUT_KEY, &value));
        match result {
            Ok(()) => true,
            Err(err) => {
                log::error!("failed to save shortcut: {}", err);
                false
            }
        }
    }

    pub fn poll_changes(&self) -> Vec<String> {
        self.kv.poll_changes().unwrap_or_else(|err| {
            log::warn!("failed to poll store changes: {}", err);
            Vec::new()
        })
    }
}
