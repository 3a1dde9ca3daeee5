//! Auto-save coordinator actor.
//!
//! A single task owns all coordinator state:
//! - Change notifications are debounced per source id
//! - Processed changes are content-diffed against the last recorded content
//! - Surviving ids are collected in a short batch window and persisted with
//!   one bulk write of the whole entry map
//!
//! Callers talk to it through the cloneable [`AutoSaveCoordinator`] handle.
//! When every handle is dropped the actor flushes what it still holds and
//! stops.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::config::AutoSaveConfig;
use crate::error::AutoSaveError;
use crate::storage::SharedStorage;

use super::entry::{AutoSaveEntry, SourceChange, SourceIdentity, SourceKind, SourceValue};
use super::schedule::{Batcher, Debouncer};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Window collecting recorded ids into one bulk write.
pub const BATCH_WINDOW: Duration = Duration::from_millis(100);

/// Channel capacity for commands.
const CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// Commands
// ============================================================================

/// Result of termination handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminationOutcome {
    /// Unsaved entries existed, so the host should ask before terminating
    pub needs_confirmation: bool,
    /// Whether the final flush reached the backend
    pub flushed: bool,
    /// Entry flagged as abandoned, if the session had not completed
    pub abandoned: Option<String>,
}

enum Command {
    Init {
        reply: oneshot::Sender<usize>,
    },
    Change {
        change: SourceChange,
    },
    Unwatch {
        identity: SourceIdentity,
    },
    SaveEntry {
        entry: AutoSaveEntry,
        reply: oneshot::Sender<bool>,
    },
    HasUnsavedChanges {
        reply: oneshot::Sender<bool>,
    },
    GetUnsavedEntries {
        reply: oneshot::Sender<Vec<AutoSaveEntry>>,
    },
    GetEntriesForPath {
        path: String,
        reply: oneshot::Sender<Vec<AutoSaveEntry>>,
    },
    GetEntry {
        id: String,
        reply: oneshot::Sender<Option<AutoSaveEntry>>,
    },
    ClearEntry {
        id: String,
        reply: oneshot::Sender<bool>,
    },
    ClearAllEntries {
        reply: oneshot::Sender<()>,
    },
    AttemptRecovery {
        reply: oneshot::Sender<Vec<AutoSaveEntry>>,
    },
    ForceSave {
        reply: oneshot::Sender<bool>,
    },
    Cleanup {
        reply: oneshot::Sender<()>,
    },
    SetCurrentPath {
        path: String,
        reply: oneshot::Sender<()>,
    },
    MarkCompleted {
        reply: oneshot::Sender<()>,
    },
    Terminate {
        reply: oneshot::Sender<TerminationOutcome>,
    },
}

// ============================================================================
// Handle
// ============================================================================

/// Handle to a running coordinator. Cheap to clone.
#[derive(Clone)]
pub struct AutoSaveCoordinator {
    tx: mpsc::Sender<Command>,
}

impl AutoSaveCoordinator {
    /// Starts a coordinator scoped to `current_path`.
    ///
    /// Nothing is loaded or observed until [`init`](Self::init).
    pub fn spawn(
        config: AutoSaveConfig,
        storage: SharedStorage,
        current_path: impl Into<String>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        let actor = CoordinatorActor {
            debouncer: Debouncer::new(config.debounce),
            batcher: Batcher::new(BATCH_WINDOW),
            config,
            storage,
            current_path: current_path.into(),
            entries: HashMap::new(),
            carried: HashMap::new(),
            last_content: HashMap::new(),
            observing: false,
            completed: false,
            dirty: false,
            last_active: None,
            commands: rx,
        };

        let handle = tokio::spawn(actor.run());
        (Self { tx }, handle)
    }

    async fn send(&self, command: Command) -> Result<(), AutoSaveError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| AutoSaveError::ActorShutdown)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, AutoSaveError> {
        let (reply, rx) = oneshot::channel();
        self.send(command(reply)).await?;
        rx.await.map_err(|_| AutoSaveError::ActorShutdown)
    }

    /// Loads persisted entries and starts observing changes. Idempotent.
    ///
    /// Returns the number of recoverable entries for the current path.
    pub async fn init(&self) -> Result<usize, AutoSaveError> {
        self.request(|reply| Command::Init { reply }).await
    }

    /// Subscribes a source. Changes are delivered through the returned watch.
    pub fn watch(&self, identity: SourceIdentity, kind: SourceKind) -> SourceWatch {
        SourceWatch {
            coordinator: self.clone(),
            identity,
            kind,
        }
    }

    /// Delivers one raw change notification.
    pub async fn notify_change(&self, change: SourceChange) -> Result<(), AutoSaveError> {
        self.send(Command::Change { change }).await
    }

    /// Records an entry directly, bypassing the debounce.
    ///
    /// Returns `false` when the content matches what is already recorded.
    pub async fn save_entry(&self, entry: AutoSaveEntry) -> Result<bool, AutoSaveError> {
        self.request(|reply| Command::SaveEntry { entry, reply })
            .await
    }

    pub async fn has_unsaved_changes(&self) -> Result<bool, AutoSaveError> {
        self.request(|reply| Command::HasUnsavedChanges { reply })
            .await
    }

    /// Entries of this session, most recent first. Persisted entries of other
    /// paths are not included.
    pub async fn get_unsaved_entries(&self) -> Result<Vec<AutoSaveEntry>, AutoSaveError> {
        self.request(|reply| Command::GetUnsavedEntries { reply })
            .await
    }

    pub async fn get_entries_for_path(
        &self,
        path: impl Into<String>,
    ) -> Result<Vec<AutoSaveEntry>, AutoSaveError> {
        let path = path.into();
        self.request(|reply| Command::GetEntriesForPath { path, reply })
            .await
    }

    pub async fn get_entry(
        &self,
        id: impl Into<String>,
    ) -> Result<Option<AutoSaveEntry>, AutoSaveError> {
        let id = id.into();
        self.request(|reply| Command::GetEntry { id, reply }).await
    }

    /// Forgets an entry and schedules a write reflecting the removal.
    pub async fn clear_entry(&self, id: impl Into<String>) -> Result<bool, AutoSaveError> {
        let id = id.into();
        self.request(|reply| Command::ClearEntry { id, reply })
            .await
    }

    pub async fn clear_all_entries(&self) -> Result<(), AutoSaveError> {
        self.request(|reply| Command::ClearAllEntries { reply })
            .await
    }

    /// Entries recorded under the current path, most recent first.
    pub async fn attempt_recovery(&self) -> Result<Vec<AutoSaveEntry>, AutoSaveError> {
        self.request(|reply| Command::AttemptRecovery { reply })
            .await
    }

    /// Applies pending changes and writes immediately.
    pub async fn force_save(&self) -> Result<bool, AutoSaveError> {
        self.request(|reply| Command::ForceSave { reply }).await
    }

    /// Cancels pending timers and clears the diff cache. Persisted data is
    /// kept, and observation stops until the next `init`.
    pub async fn cleanup(&self) -> Result<(), AutoSaveError> {
        self.request(|reply| Command::Cleanup { reply }).await
    }

    pub async fn set_current_path(&self, path: impl Into<String>) -> Result<(), AutoSaveError> {
        let path = path.into();
        self.request(|reply| Command::SetCurrentPath { path, reply })
            .await
    }

    /// Records that the session completed, so termination flags nothing.
    pub async fn mark_completed(&self) -> Result<(), AutoSaveError> {
        self.request(|reply| Command::MarkCompleted { reply })
            .await
    }

    /// Termination handling: always flushes.
    pub async fn terminate(&self) -> Result<TerminationOutcome, AutoSaveError> {
        self.request(|reply| Command::Terminate { reply }).await
    }
}

// ============================================================================
// Source Watch
// ============================================================================

/// Subscription of one source to a coordinator.
pub struct SourceWatch {
    coordinator: AutoSaveCoordinator,
    identity: SourceIdentity,
    kind: SourceKind,
}

impl SourceWatch {
    pub async fn notify(&self, value: impl Into<SourceValue>) -> Result<(), AutoSaveError> {
        self.coordinator
            .notify_change(SourceChange {
                identity: self.identity.clone(),
                kind: self.kind,
                value: value.into(),
            })
            .await
    }

    /// Ends the subscription, dropping any change still waiting out its
    /// debounce window.
    pub async fn unsubscribe(self) -> Result<(), AutoSaveError> {
        self.coordinator
            .send(Command::Unwatch {
                identity: self.identity,
            })
            .await
    }
}

// ============================================================================
// Actor
// ============================================================================

struct CoordinatorActor {
    config: AutoSaveConfig,
    storage: SharedStorage,
    current_path: String,

    // State
    /// Entries of this session: the current path's persisted entries plus
    /// everything recorded since
    entries: HashMap<String, AutoSaveEntry>,
    /// Persisted entries of other paths, written back untouched
    carried: HashMap<String, AutoSaveEntry>,
    /// Diff cache: last recorded content per id
    last_content: HashMap<String, String>,
    last_active: Option<String>,
    observing: bool,
    completed: bool,
    /// Entries changed since the last successful write
    dirty: bool,

    // Scheduling
    debouncer: Debouncer<String, AutoSaveEntry>,
    batcher: Batcher<String>,

    commands: mpsc::Receiver<Command>,
}

impl CoordinatorActor {
    async fn run(mut self) {
        debug!(path = %self.current_path, "Auto-save coordinator started");

        loop {
            let deadline = self.next_deadline();

            tokio::select! {
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            debug!("All handles dropped, shutting down");
                            if self.dirty || !self.debouncer.is_empty() {
                                self.force_save().await;
                            }
                            break;
                        }
                    }
                }

                _ = sleep_until_deadline(deadline) => {
                    self.on_timer(Instant::now()).await;
                }
            }
        }

        debug!("Auto-save coordinator stopped");
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.debouncer.next_deadline(), self.batcher.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Init { reply } => {
                let count = self.init().await;
                let _ = reply.send(count);
            }
            Command::Change { change } => self.on_change(change),
            Command::Unwatch { identity } => {
                // Pending changes may have been resolved under an earlier path
                let name = identity.stable_name();
                let dropped = self
                    .debouncer
                    .cancel_where(|_, entry| entry.metadata.name == name);
                if dropped > 0 {
                    debug!(source = %name, dropped, "Dropped pending change of unsubscribed source");
                }
            }
            Command::SaveEntry { entry, reply } => {
                let queued = self.record(entry, Instant::now());
                let _ = reply.send(queued);
            }
            Command::HasUnsavedChanges { reply } => {
                let _ = reply.send(!self.entries.is_empty() || !self.debouncer.is_empty());
            }
            Command::GetUnsavedEntries { reply } => {
                let _ = reply.send(newest_first(self.entries.values()));
            }
            Command::GetEntriesForPath { path, reply } => {
                let entries = self.known_entries().filter(|e| e.source_path == path);
                let _ = reply.send(newest_first(entries));
            }
            Command::GetEntry { id, reply } => {
                let entry = self.entries.get(&id).or_else(|| self.carried.get(&id));
                let _ = reply.send(entry.cloned());
            }
            Command::ClearEntry { id, reply } => {
                let removed = self.clear_entry(&id);
                let _ = reply.send(removed);
            }
            Command::ClearAllEntries { reply } => {
                self.clear_all_entries();
                let _ = reply.send(());
            }
            Command::AttemptRecovery { reply } => {
                let entries = if self.config.enable_recovery {
                    let path = &self.current_path;
                    newest_first(self.known_entries().filter(|e| &e.source_path == path))
                } else {
                    Vec::new()
                };
                let _ = reply.send(entries);
            }
            Command::ForceSave { reply } => {
                let ok = self.force_save().await;
                let _ = reply.send(ok);
            }
            Command::Cleanup { reply } => {
                self.cleanup();
                let _ = reply.send(());
            }
            Command::SetCurrentPath { path, reply } => {
                debug!(from = %self.current_path, to = %path, "Current path changed");
                self.current_path = path;
                self.adopt_current_path();
                let _ = reply.send(());
            }
            Command::MarkCompleted { reply } => {
                self.completed = true;
                let _ = reply.send(());
            }
            Command::Terminate { reply } => {
                let outcome = self.terminate().await;
                let _ = reply.send(outcome);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    async fn init(&mut self) -> usize {
        if !self.observing {
            if self.config.enable_recovery {
                self.load_persisted().await;
            }
            self.adopt_current_path();
            for (id, entry) in &self.entries {
                self.last_content.insert(id.clone(), entry.content.clone());
            }
            self.observing = true;
        }

        let recoverable = self
            .entries
            .values()
            .filter(|e| e.source_path == self.current_path)
            .count();
        info!(
            path = %self.current_path,
            entries = self.entries.len(),
            recoverable,
            "Auto-save initialized"
        );
        recoverable
    }

    async fn load_persisted(&mut self) {
        let persisted: Option<Vec<(String, AutoSaveEntry)>> = self
            .storage
            .write()
            .await
            .get_json(&self.config.storage_key, &self.config.storage_options);

        for (id, entry) in persisted.unwrap_or_default() {
            // Entries already held in memory are newer than the persisted copy
            if !self.entries.contains_key(&id) {
                self.carried.insert(id, entry);
            }
        }
    }

    /// Moves carried entries of the current path into the session.
    fn adopt_current_path(&mut self) {
        let ids: Vec<String> = self
            .carried
            .values()
            .filter(|e| e.source_path == self.current_path)
            .map(|e| e.id.clone())
            .collect();

        for id in ids {
            if let Some(entry) = self.carried.remove(&id) {
                self.last_content
                    .insert(id.clone(), entry.content.clone());
                self.entries.entry(id).or_insert(entry);
            }
        }
    }

    fn cleanup(&mut self) {
        self.debouncer.clear();
        self.batcher.cancel();
        self.last_content.clear();
        self.observing = false;
        debug!("Auto-save timers cancelled");
    }

    async fn terminate(&mut self) -> TerminationOutcome {
        self.apply_pending(Instant::now());
        let needs_confirmation = !self.entries.is_empty();

        let abandoned = if self.completed {
            None
        } else {
            self.last_active
                .clone()
                .filter(|id| match self.entries.get_mut(id) {
                    Some(entry) => {
                        entry.metadata.abandoned = true;
                        true
                    }
                    None => false,
                })
        };
        if abandoned.is_some() {
            self.dirty = true;
        }

        self.batcher.cancel();
        let flushed = self.persist().await;

        info!(needs_confirmation, flushed, abandoned = ?abandoned, "Auto-save terminated");
        TerminationOutcome {
            needs_confirmation,
            flushed,
            abandoned,
        }
    }

    // ------------------------------------------------------------------------
    // Change pipeline
    // ------------------------------------------------------------------------

    fn on_change(&mut self, change: SourceChange) {
        if !self.observing {
            debug!("Change received before init, ignoring");
            return;
        }
        let entry = AutoSaveEntry::from_change(&change, &self.current_path);
        self.debouncer.schedule(entry.id.clone(), entry, Instant::now());
    }

    async fn on_timer(&mut self, now: Instant) {
        for (_, entry) in self.debouncer.take_due(now) {
            self.record(entry, now);
        }

        if let Some(ids) = self.batcher.take_if_due(now) {
            debug!(ids = ids.len(), "Batch window closed");
            self.persist().await;
        }
    }

    fn apply_pending(&mut self, now: Instant) {
        for (_, entry) in self.debouncer.drain() {
            self.record(entry, now);
        }
    }

    /// Content-diffs `entry` and queues it for the next batch.
    fn record(&mut self, entry: AutoSaveEntry, now: Instant) -> bool {
        if self.last_content.get(&entry.id) == Some(&entry.content) {
            debug!(id = %entry.id, "Content unchanged, skipping save");
            return false;
        }

        self.last_content
            .insert(entry.id.clone(), entry.content.clone());
        self.last_active = Some(entry.id.clone());
        self.completed = false;
        self.dirty = true;
        self.batcher.push(entry.id.clone(), now);
        self.entries.insert(entry.id.clone(), entry);
        true
    }

    fn clear_entry(&mut self, id: &str) -> bool {
        let id = id.to_string();
        let removed = self.entries.remove(&id).is_some() | self.carried.remove(&id).is_some();
        self.last_content.remove(&id);
        self.debouncer.cancel(&id);
        if self.last_active.as_deref() == Some(id.as_str()) {
            self.last_active = None;
        }
        self.dirty = true;
        self.batcher.push(id, Instant::now());
        removed
    }

    fn clear_all_entries(&mut self) {
        self.entries.clear();
        self.carried.clear();
        self.last_content.clear();
        self.debouncer.clear();
        self.last_active = None;
        self.dirty = true;
        self.batcher.arm(Instant::now());
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    async fn force_save(&mut self) -> bool {
        self.apply_pending(Instant::now());
        self.batcher.cancel();
        self.persist().await
    }

    /// Writes session and carried entries, capped to the most recent
    /// `max_entries`.
    ///
    /// On failure entries stay in memory and `dirty` stays set, so the next
    /// flush retries.
    async fn persist(&mut self) -> bool {
        self.evict_overflow();
        let snapshot: Vec<(String, AutoSaveEntry)> = newest_first(self.known_entries())
            .into_iter()
            .map(|entry| (entry.id.clone(), entry))
            .collect();

        let ok = self.storage.write().await.set_json(
            &self.config.storage_key,
            &snapshot,
            &self.config.storage_options,
        );

        if ok {
            self.dirty = false;
            debug!(entries = snapshot.len(), "Auto-save batch written");
        } else {
            warn!(
                entries = snapshot.len(),
                "Auto-save batch write failed, entries kept for retry"
            );
        }
        ok
    }

    fn evict_overflow(&mut self) {
        let overflow: Vec<String> = newest_first(self.known_entries())
            .into_iter()
            .skip(self.config.max_entries)
            .map(|entry| entry.id)
            .collect();

        for id in overflow {
            self.entries.remove(&id);
            self.carried.remove(&id);
            self.last_content.remove(&id);
            debug!(id = %id, "Evicted oldest auto-save entry");
        }
    }

    /// Session entries, then carried entries not shadowed by one.
    fn known_entries(&self) -> impl Iterator<Item = &AutoSaveEntry> + '_ {
        self.entries.values().chain(
            self.carried
                .values()
                .filter(|e| !self.entries.contains_key(&e.id)),
        )
    }
}

fn newest_first<'a>(entries: impl Iterator<Item = &'a AutoSaveEntry>) -> Vec<AutoSaveEntry> {
    let mut entries: Vec<AutoSaveEntry> = entries.cloned().collect();
    entries.sort_by_key(|e| (Reverse(e.timestamp), e.id.clone()));
    entries
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use chrono::{TimeDelta, Utc};

    use crate::config::StorageConfig;
    use crate::error::{StorageError, StorageResult};
    use crate::storage::{Backend, MemoryBackend, StorageEngine, StorageOptions};

    use super::super::entry::EntryMetadata;

    const KEY: &str = "autosave_entries";

    /// Durable backend counting bulk writes, switchable into failing mode.
    #[derive(Default)]
    struct CountingBackend {
        inner: MemoryBackend,
        writes: AtomicUsize,
        failing: AtomicBool,
    }

    impl CountingBackend {
        fn writes(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }
    }

    impl Backend for CountingBackend {
        fn get(&self, key: &str) -> StorageResult<Option<String>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> StorageResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StorageError::Backend("simulated outage".to_string()));
            }
            if key.ends_with(KEY) {
                self.writes.fetch_add(1, Ordering::SeqCst);
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> StorageResult<bool> {
            self.inner.remove(key)
        }

        fn keys(&self) -> StorageResult<Vec<String>> {
            self.inner.keys()
        }
    }

    fn config() -> AutoSaveConfig {
        AutoSaveConfig {
            debounce: Duration::from_millis(2000),
            max_entries: 50,
            storage_key: KEY.to_string(),
            enable_recovery: true,
            storage_options: StorageOptions::default(),
        }
    }

    fn storage() -> (SharedStorage, Arc<CountingBackend>) {
        let backend = Arc::new(CountingBackend::default());
        let engine = StorageEngine::new(
            StorageConfig::default(),
            Box::new(backend.clone()),
            Box::new(MemoryBackend::new()),
        );
        (engine.into_shared(), backend)
    }

    async fn started(storage: &SharedStorage, path: &str) -> AutoSaveCoordinator {
        let (coordinator, _handle) = AutoSaveCoordinator::spawn(config(), storage.clone(), path);
        coordinator.init().await.unwrap();
        coordinator
    }

    async fn persisted(storage: &SharedStorage) -> Vec<(String, AutoSaveEntry)> {
        storage
            .write()
            .await
            .get_json(KEY, &StorageOptions::default())
            .unwrap_or_default()
    }

    fn entry(id: &str, content: &str, path: &str, age_secs: i64) -> AutoSaveEntry {
        AutoSaveEntry {
            id: id.to_string(),
            content: content.to_string(),
            timestamp: Utc::now() - TimeDelta::seconds(age_secs),
            source_path: path.to_string(),
            metadata: EntryMetadata {
                kind: SourceKind::Text,
                name: id.to_string(),
                abandoned: false,
                extra: Default::default(),
            },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_coalesces_burst_into_one_write() {
        let (storage, backend) = storage();
        let coordinator = started(&storage, "/compose").await;
        let watch = coordinator.watch(SourceIdentity::with_id("title"), SourceKind::Text);

        for text in ["H", "He", "Hel", "Hell", "Hello"] {
            watch.notify(text).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(backend.writes(), 0, "still inside the quiet period");

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(backend.writes(), 1);

        let saved = persisted(&storage).await;
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].0, "/compose:title");
        assert_eq!(saved[0].1.content, "Hello");
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_content_not_saved_twice() {
        let (storage, backend) = storage();
        let coordinator = started(&storage, "/p").await;

        assert!(coordinator.save_entry(entry("a", "same", "/p", 0)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(backend.writes(), 1);

        assert!(!coordinator.save_entry(entry("a", "same", "/p", 0)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(backend.writes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_micro_batch_single_write_for_many_ids() {
        let (storage, backend) = storage();
        let coordinator = started(&storage, "/form").await;

        for (i, field) in ["first", "last", "email"].into_iter().enumerate() {
            coordinator
                .save_entry(entry(field, "x", "/form", i as i64))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(backend.writes(), 1);
        assert_eq!(persisted(&storage).await.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_changes_ignored_before_init() {
        let (storage, backend) = storage();
        let (coordinator, _handle) = AutoSaveCoordinator::spawn(config(), storage.clone(), "/p");

        coordinator
            .watch(SourceIdentity::with_id("f"), SourceKind::Text)
            .notify("ignored")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(backend.writes(), 0);
        assert!(!coordinator.has_unsaved_changes().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_composite_source_content() {
        let (storage, _backend) = storage();
        let coordinator = started(&storage, "/signup").await;

        let mut fields = std::collections::BTreeMap::new();
        fields.insert("name".to_string(), "Ada".to_string());
        coordinator
            .watch(SourceIdentity::with_id("signup"), SourceKind::Form)
            .notify(SourceValue::Fields(fields))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        let entry = coordinator.get_entry("/signup:signup").await.unwrap().unwrap();
        assert_eq!(entry.content, r#"{"name":"Ada"}"#);
        assert_eq!(entry.metadata.kind, SourceKind::Form);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_is_path_scoped() {
        let (storage, _backend) = storage();

        let writer = started(&storage, "/a").await;
        writer
            .watch(SourceIdentity::with_id("body"), SourceKind::TextArea)
            .notify("draft")
            .await
            .unwrap();
        assert!(writer.force_save().await.unwrap());

        let elsewhere = started(&storage, "/b").await;
        assert!(elsewhere.attempt_recovery().await.unwrap().is_empty());
        assert_eq!(elsewhere.get_entries_for_path("/a").await.unwrap().len(), 1);

        let same_path = started(&storage, "/a").await;
        let recovered = same_path.attempt_recovery().await.unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].content, "draft");
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_paths_are_not_unsaved_work() {
        let (storage, _backend) = storage();
        let writer = started(&storage, "/a").await;
        writer.save_entry(entry("/a:draft", "draft", "/a", 0)).await.unwrap();
        assert!(writer.force_save().await.unwrap());

        let fresh = started(&storage, "/b").await;
        assert!(!fresh.has_unsaved_changes().await.unwrap());
        assert!(fresh.get_unsaved_entries().await.unwrap().is_empty());

        let outcome = fresh.terminate().await.unwrap();
        assert!(!outcome.needs_confirmation);
        assert_eq!(outcome.abandoned, None);

        // The final write keeps the other path's draft
        let saved = persisted(&storage).await;
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].1.content, "draft");
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulk_write_carries_other_paths() {
        let (storage, _backend) = storage();
        let writer = started(&storage, "/a").await;
        writer.save_entry(entry("/a:x", "1", "/a", 5)).await.unwrap();
        writer.force_save().await.unwrap();

        let other = started(&storage, "/b").await;
        other.save_entry(entry("/b:y", "2", "/b", 0)).await.unwrap();
        assert!(other.force_save().await.unwrap());

        let ids: Vec<String> = persisted(&storage).await.into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["/b:y", "/a:x"]);
        assert_eq!(other.get_unsaved_entries().await.unwrap().len(), 1);

        // Navigating to /a adopts its persisted entry
        other.set_current_path("/a").await.unwrap();
        assert_eq!(other.attempt_recovery().await.unwrap()[0].id, "/a:x");
        assert_eq!(other.get_unsaved_entries().await.unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_disabled() {
        let (storage, _backend) = storage();
        let writer = started(&storage, "/a").await;
        writer.save_entry(entry("x", "1", "/a", 0)).await.unwrap();
        writer.force_save().await.unwrap();

        let config = AutoSaveConfig {
            enable_recovery: false,
            ..config()
        };
        let (reader, _handle) = AutoSaveCoordinator::spawn(config, storage.clone(), "/a");
        assert_eq!(reader.init().await.unwrap(), 0);
        assert!(reader.attempt_recovery().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_is_idempotent_and_seeds_diff_cache() {
        let (storage, backend) = storage();
        let writer = started(&storage, "/p").await;
        writer.save_entry(entry("a", "kept", "/p", 0)).await.unwrap();
        writer.force_save().await.unwrap();
        let writes = backend.writes();

        let reader = started(&storage, "/p").await;
        assert_eq!(reader.init().await.unwrap(), 1);

        // Persisted content is already known, so re-saving it is a no-op
        assert!(!reader.save_entry(entry("a", "kept", "/p", 0)).await.unwrap());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(backend.writes(), writes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflow_evicts_oldest_entries() {
        let (storage, _backend) = storage();
        let config = AutoSaveConfig {
            max_entries: 3,
            ..config()
        };
        let (coordinator, _handle) = AutoSaveCoordinator::spawn(config, storage.clone(), "/p");
        coordinator.init().await.unwrap();

        for i in 0..5 {
            coordinator
                .save_entry(entry(&format!("e{i}"), "c", "/p", 10 - i))
                .await
                .unwrap();
        }
        assert!(coordinator.force_save().await.unwrap());

        let ids: Vec<String> = persisted(&storage).await.into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["e4", "e3", "e2"]);
        assert!(coordinator.get_entry("e0").await.unwrap().is_none());
        assert_eq!(coordinator.get_unsaved_entries().await.unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_flush_keeps_entries_for_retry() {
        let (storage, backend) = storage();
        let coordinator = started(&storage, "/p").await;

        backend.failing.store(true, Ordering::SeqCst);
        coordinator.save_entry(entry("a", "v1", "/p", 0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(persisted(&storage).await.is_empty());
        assert!(coordinator.get_entry("a").await.unwrap().is_some());
        assert!(!coordinator.force_save().await.unwrap());

        backend.failing.store(false, Ordering::SeqCst);
        assert!(coordinator.force_save().await.unwrap());
        assert_eq!(persisted(&storage).await[0].1.content, "v1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_entry_persists_removal() {
        let (storage, _backend) = storage();
        let coordinator = started(&storage, "/p").await;

        coordinator.save_entry(entry("a", "1", "/p", 1)).await.unwrap();
        coordinator.save_entry(entry("b", "2", "/p", 0)).await.unwrap();
        coordinator.force_save().await.unwrap();

        assert!(coordinator.clear_entry("a").await.unwrap());
        assert!(!coordinator.clear_entry("a").await.unwrap());
        tokio::time::sleep(Duration::from_millis(200)).await;

        let ids: Vec<String> = persisted(&storage).await.into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["b"]);

        coordinator.clear_all_entries().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(persisted(&storage).await.is_empty());
        assert!(!coordinator.has_unsaved_changes().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_cancels_pending_work() {
        let (storage, backend) = storage();
        let coordinator = started(&storage, "/p").await;

        coordinator
            .watch(SourceIdentity::with_id("f"), SourceKind::Text)
            .notify("pending")
            .await
            .unwrap();
        coordinator.cleanup().await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(backend.writes(), 0);
        assert!(coordinator.get_entry("/p:f").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_drops_pending_change() {
        let (storage, backend) = storage();
        let coordinator = started(&storage, "/p").await;

        let watch = coordinator.watch(SourceIdentity::with_id("f"), SourceKind::Text);
        watch.notify("typed").await.unwrap();
        watch.unsubscribe().await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(backend.writes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_after_path_change() {
        let (storage, backend) = storage();
        let coordinator = started(&storage, "/one").await;

        let watch = coordinator.watch(SourceIdentity::with_id("f"), SourceKind::Text);
        watch.notify("typed on one").await.unwrap();
        coordinator.set_current_path("/two").await.unwrap();
        watch.unsubscribe().await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(backend.writes(), 0);
        assert!(!coordinator.has_unsaved_changes().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminate_flushes_and_flags_abandoned() {
        let (storage, _backend) = storage();
        let coordinator = started(&storage, "/p").await;

        coordinator
            .watch(SourceIdentity::with_id("body"), SourceKind::TextArea)
            .notify("unfinished")
            .await
            .unwrap();

        // Termination arrives inside the debounce window
        let outcome = coordinator.terminate().await.unwrap();
        assert!(outcome.needs_confirmation);
        assert!(outcome.flushed);
        assert_eq!(outcome.abandoned.as_deref(), Some("/p:body"));

        let saved = persisted(&storage).await;
        assert_eq!(saved[0].1.content, "unfinished");
        assert!(saved[0].1.metadata.abandoned);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminate_after_completion() {
        let (storage, _backend) = storage();
        let coordinator = started(&storage, "/p").await;

        let outcome = coordinator.terminate().await.unwrap();
        assert!(!outcome.needs_confirmation);
        assert_eq!(outcome.abandoned, None);

        coordinator.save_entry(entry("a", "1", "/p", 0)).await.unwrap();
        coordinator.mark_completed().await.unwrap();
        let outcome = coordinator.terminate().await.unwrap();
        assert!(outcome.needs_confirmation);
        assert_eq!(outcome.abandoned, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handles_flushes() {
        let (storage, _backend) = storage();
        let (coordinator, handle) = AutoSaveCoordinator::spawn(config(), storage.clone(), "/p");
        coordinator.init().await.unwrap();
        coordinator
            .watch(SourceIdentity::with_id("f"), SourceKind::Text)
            .notify("last words")
            .await
            .unwrap();

        drop(coordinator);
        handle.await.unwrap();

        assert_eq!(persisted(&storage).await[0].1.content, "last words");
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_current_path_scopes_new_entries() {
        let (storage, _backend) = storage();
        let coordinator = started(&storage, "/one").await;
        let watch = coordinator.watch(SourceIdentity::with_id("q"), SourceKind::Text);

        watch.notify("first").await.unwrap();
        coordinator.set_current_path("/two").await.unwrap();
        watch.notify("second").await.unwrap();
        coordinator.force_save().await.unwrap();

        assert_eq!(coordinator.get_entries_for_path("/one").await.unwrap().len(), 1);
        let recovered = coordinator.attempt_recovery().await.unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].id, "/two:q");
    }
}
