use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};

use crate::error::{OperationConflict, RegistryError};
use crate::models::{EntryState, FileHandle, StateKind, UploadEntry};

const EVENT_CAPACITY: usize = 64;

/// Change notification for views rendering the registry
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    Added { id: String },
    Removed { id: String },
    StateChanged { id: String, state: StateKind },
}

/// Outcome of a state update request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// The entry no longer exists; the update was dropped
    Missing,
    /// The move is not allowed from the entry's current state
    Rejected { from: StateKind, to: StateKind },
}

/// An entry moved to `Analyzing` on behalf of a caller
#[derive(Debug, Clone)]
pub struct Claim {
    pub file: FileHandle,
    pub retry: bool,
}

#[derive(Debug, Default)]
struct Entries {
    items: Vec<UploadEntry>,
    /// Every id ever registered, removed ones included
    issued: HashSet<String>,
}

impl Entries {
    fn find_mut(&mut self, id: &str) -> Option<&mut UploadEntry> {
        self.items.iter_mut().find(|e| e.id == id)
    }
}

/// Ordered, shared collection of upload entries keyed by id.
///
/// Cloning the registry yields another handle to the same entries. Every
/// read-modify-write happens under a single write lock with no await point
/// inside, and change events are sent before the lock is released, so
/// subscribers see changes in the order they were applied.
#[derive(Debug, Clone)]
pub struct UploadRegistry {
    entries: Arc<RwLock<Entries>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl Default for UploadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn is_forward(from: StateKind, to: StateKind) -> bool {
    matches!(
        (from, to),
        (StateKind::Pending, StateKind::Analyzing)
            | (StateKind::Analyzing, StateKind::Completed)
            | (StateKind::Analyzing, StateKind::Failed)
    )
}

impl UploadRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: Arc::new(RwLock::new(Entries::default())),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: RegistryEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Appends an entry. Ids are never reused, even after removal.
    pub async fn add(&self, entry: UploadEntry) -> Result<(), RegistryError> {
        let id = entry.id.clone();
        let mut entries = self.entries.write().await;
        if !entries.issued.insert(id.clone()) {
            return Err(RegistryError::DuplicateId(id));
        }
        entries.items.push(entry);
        tracing::debug!("Registered upload {}", id);
        self.emit(RegistryEvent::Added { id });
        Ok(())
    }

    pub async fn remove(&self, id: &str) -> Option<UploadEntry> {
        let mut entries = self.entries.write().await;
        let pos = entries.items.iter().position(|e| e.id == id)?;
        let removed = entries.items.remove(pos);
        tracing::debug!("Removed upload {} ({})", id, removed.file.name);
        self.emit(RegistryEvent::Removed { id: id.to_string() });
        Some(removed)
    }

    pub async fn get(&self, id: &str) -> Option<UploadEntry> {
        self.entries
            .read()
            .await
            .items
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    /// Snapshot of all entries in insertion order
    pub async fn list(&self) -> Vec<UploadEntry> {
        self.entries.read().await.items.clone()
    }

    /// Snapshot of `Pending` entries in insertion order
    pub async fn list_pending(&self) -> Vec<UploadEntry> {
        self.entries
            .read()
            .await
            .items
            .iter()
            .filter(|e| e.state == EntryState::Pending)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.items.is_empty()
    }

    /// Drops every entry, e.g. when the owning view is disposed
    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        for entry in entries.items.drain(..) {
            self.emit(RegistryEvent::Removed { id: entry.id });
        }
    }

    /// Moves an entry forward along `Pending -> Analyzing -> {Completed | Failed}`.
    ///
    /// Updates for ids that are gone are dropped silently: the user may have
    /// removed the entry while its analysis was still running.
    pub async fn update_state(&self, id: &str, new_state: EntryState) -> Transition {
        let to = new_state.kind();
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.find_mut(id) else {
            tracing::debug!("Dropping {} update for removed upload {}", to, id);
            return Transition::Missing;
        };

        let from = entry.state.kind();
        if !is_forward(from, to) {
            tracing::warn!("Ignoring out-of-order transition {} -> {} for {}", from, to, id);
            return Transition::Rejected { from, to };
        }

        if to == StateKind::Analyzing {
            entry.attempts += 1;
        }
        entry.state = new_state;
        entry.updated_at = Utc::now();
        self.emit(RegistryEvent::StateChanged {
            id: id.to_string(),
            state: to,
        });
        Transition::Applied
    }

    /// Explicit retry, the only sanctioned move back: `Failed -> Analyzing`.
    pub async fn retry(&self, id: &str) -> Transition {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.find_mut(id) else {
            return Transition::Missing;
        };

        match entry.state.kind() {
            StateKind::Failed => {
                entry.state = EntryState::Analyzing;
                entry.attempts += 1;
                entry.updated_at = Utc::now();
                self.emit(RegistryEvent::StateChanged {
                    id: id.to_string(),
                    state: StateKind::Analyzing,
                });
                Transition::Applied
            }
            from => Transition::Rejected {
                from,
                to: StateKind::Analyzing,
            },
        }
    }

    /// Atomically checks an entry's state and moves it to `Analyzing`.
    ///
    /// `Pending` entries are always claimable; `Failed` ones only when
    /// `allow_retry` is set. Returns the file to submit on success.
    pub async fn claim(&self, id: &str, allow_retry: bool) -> Result<Claim, OperationConflict> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .find_mut(id)
            .ok_or_else(|| OperationConflict::EntryNotFound(id.to_string()))?;

        let retry = match entry.state.kind() {
            StateKind::Pending => false,
            StateKind::Failed if allow_retry => true,
            StateKind::Analyzing => {
                return Err(OperationConflict::AlreadyAnalyzing(id.to_string()));
            }
            StateKind::Completed => {
                return Err(OperationConflict::AlreadyCompleted(id.to_string()));
            }
            state => {
                return Err(OperationConflict::NotPending {
                    id: id.to_string(),
                    state,
                });
            }
        };

        entry.state = EntryState::Analyzing;
        entry.attempts += 1;
        entry.updated_at = Utc::now();
        let claim = Claim {
            file: entry.file.clone(),
            retry,
        };

        self.emit(RegistryEvent::StateChanged {
            id: id.to_string(),
            state: StateKind::Analyzing,
        });
        Ok(claim)
    }
}
