//! Debounced autosave and version switching against an injected store.
//!
//! The controller never talks to a clock or a network itself: callers
//! pass `now_ms` into [`VersionController::note_edit`] and
//! [`VersionController::poll`], and perform the store call for any
//! [`SaveRequest`] that `poll` hands out. Completion races with version
//! switches are resolved by the epoch in [`SaveTag`]: the last load wins,
//! stale save results are discarded on arrival.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const DEFAULT_DEBOUNCE_MS: u64 = 1000;

pub type VersionSeq = u64;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

/// One stored version of a document. `version` is the monotonic sequence
/// number as text, matching the store's wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub id: String,
    pub version: String,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
    pub content_length: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("version not found")]
    NotFound,
    #[error("storage backend failure: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Persistence collaborator. The engine only ever sees this trait; hosts
/// decide what sits behind it.
pub trait SpecStore {
    fn list_versions(&mut self, doc: &DocumentId) -> Result<Vec<VersionRecord>, StoreError>;
    fn fetch_content(
        &mut self,
        doc: &DocumentId,
        version: VersionSeq,
    ) -> Result<String, StoreError>;
    fn create_version(
        &mut self,
        doc: &DocumentId,
        version: VersionSeq,
        content: &str,
    ) -> Result<VersionRecord, StoreError>;
    fn update_version(
        &mut self,
        doc: &DocumentId,
        version: VersionSeq,
        content: &str,
    ) -> Result<VersionRecord, StoreError>;
}

#[derive(Debug, Clone)]
pub struct VersionConfig {
    pub debounce_ms: u64,
}

impl Default for VersionConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
        }
    }
}

/// Identifies which document/version/epoch a save was issued for, so a
/// completion arriving after an intervening load can be recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveTag {
    pub doc: DocumentId,
    pub version: VersionSeq,
    pub epoch: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveRequest {
    pub tag: SaveTag,
    pub content: String,
}

#[derive(Debug)]
struct PendingSave {
    content: String,
    deadline_ms: u64,
}

#[derive(Debug)]
pub struct VersionController {
    doc: DocumentId,
    config: VersionConfig,
    current_version: VersionSeq,
    epoch: u64,
    pending: Option<PendingSave>,
}

impl VersionController {
    pub fn new(doc: DocumentId, config: VersionConfig) -> Self {
        Self {
            doc,
            config,
            current_version: 0,
            epoch: 0,
            pending: None,
        }
    }

    pub fn document_id(&self) -> &DocumentId {
        &self.doc
    }

    pub fn current_version(&self) -> VersionSeq {
        self.current_version
    }

    pub fn has_pending_save(&self) -> bool {
        self.pending.is_some()
    }

    /// Records an edit and (re)arms the debounce timer. Successive edits
    /// within the quiet period coalesce; only the latest content survives.
    pub fn note_edit(&mut self, content: String, now_ms: u64) {
        self.pending = Some(PendingSave {
            content,
            deadline_ms: now_ms.saturating_add(self.config.debounce_ms),
        });
    }

    /// Fires at most one save per quiet gap. The caller performs the store
    /// call and reports back through [`complete_save`].
    ///
    /// [`complete_save`]: VersionController::complete_save
    pub fn poll(&mut self, now_ms: u64) -> Option<SaveRequest> {
        let due = self
            .pending
            .as_ref()
            .map(|pending| now_ms >= pending.deadline_ms)
            .unwrap_or(false);
        if !due {
            return None;
        }
        let pending = self.pending.take()?;
        Some(SaveRequest {
            tag: SaveTag {
                doc: self.doc.clone(),
                version: self.current_version,
                epoch: self.epoch,
            },
            content: pending.content,
        })
    }

    /// Accepts the result of a save the host performed. A tag minted
    /// before the latest load is stale and its result is dropped; a
    /// failure is logged and implicitly retried by the next edit.
    pub fn complete_save(&mut self, tag: &SaveTag, result: Result<VersionRecord, StoreError>) {
        if tag.epoch != self.epoch || tag.doc != self.doc {
            tracing::debug!(
                version = tag.version,
                epoch = tag.epoch,
                "discarding stale save result"
            );
            return;
        }
        if let Err(err) = result {
            tracing::warn!(version = tag.version, error = %err, "autosave failed");
        }
    }

    /// Fetches a version's content without making it current. Callers that
    /// ingest the content first (parsing it, say) commit the switch with
    /// [`commit_load`] only once ingestion succeeded.
    ///
    /// [`commit_load`]: VersionController::commit_load
    pub fn fetch(
        &mut self,
        version: VersionSeq,
        store: &mut dyn SpecStore,
    ) -> Result<String, LoadError> {
        Ok(store.fetch_content(&self.doc, version)?)
    }

    /// Makes a fetched version current. Bumps the epoch so in-flight saves
    /// for the previous content are discarded, and drops any pending
    /// debounce.
    pub fn commit_load(&mut self, version: VersionSeq) {
        self.epoch += 1;
        self.pending = None;
        self.current_version = version;
    }

    /// Fetches a version's content and makes it current in one step. On
    /// failure nothing changes.
    pub fn load(
        &mut self,
        version: VersionSeq,
        store: &mut dyn SpecStore,
    ) -> Result<String, LoadError> {
        let content = self.fetch(version, store)?;
        self.commit_load(version);
        Ok(content)
    }

    /// Sequence number of the newest stored version.
    pub fn latest_version(&mut self, store: &mut dyn SpecStore) -> Result<VersionSeq, LoadError> {
        let count = store.list_versions(&self.doc)?.len() as VersionSeq;
        if count == 0 {
            return Err(LoadError::Store(StoreError::NotFound));
        }
        Ok(count - 1)
    }

    /// Loads the newest stored version (the one with the highest sequence
    /// number).
    pub fn load_latest(
        &mut self,
        store: &mut dyn SpecStore,
    ) -> Result<(VersionSeq, String), LoadError> {
        let latest = self.latest_version(store)?;
        let content = self.load(latest, store)?;
        Ok((latest, content))
    }

    /// Creates the next version slot. Sequence numbers are gap-free and
    /// count-derived: with N stored versions the next one is N. Autosave
    /// targets the new slot from here on.
    pub fn create_next(
        &mut self,
        store: &mut dyn SpecStore,
        content: &str,
    ) -> Result<VersionRecord, StoreError> {
        let next = store.list_versions(&self.doc)?.len() as VersionSeq;
        let record = store.create_version(&self.doc, next, content)?;
        self.epoch += 1;
        self.pending = None;
        self.current_version = next;
        Ok(record)
    }
}

/// In-memory store, the reference backend used by the tests and the CLI.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: BTreeMap<DocumentId, BTreeMap<VersionSeq, VersionRecord>>,
    pub fail_next: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_fail(&mut self) -> Result<(), StoreError> {
        if self.fail_next {
            self.fail_next = false;
            return Err(StoreError::Backend("injected failure".to_string()));
        }
        Ok(())
    }

    fn record(doc: &DocumentId, version: VersionSeq, content: &str) -> VersionRecord {
        VersionRecord {
            id: format!("{}-v{version}", doc.0),
            version: version.to_string(),
            content: content.to_string(),
            created_at: String::new(),
            updated_at: String::new(),
            content_length: content.len(),
        }
    }
}

impl SpecStore for MemoryStore {
    fn list_versions(&mut self, doc: &DocumentId) -> Result<Vec<VersionRecord>, StoreError> {
        self.check_fail()?;
        Ok(self
            .documents
            .get(doc)
            .map(|versions| versions.values().cloned().collect())
            .unwrap_or_default())
    }

    fn fetch_content(
        &mut self,
        doc: &DocumentId,
        version: VersionSeq,
    ) -> Result<String, StoreError> {
        self.check_fail()?;
        self.documents
            .get(doc)
            .and_then(|versions| versions.get(&version))
            .map(|record| record.content.clone())
            .ok_or(StoreError::NotFound)
    }

    fn create_version(
        &mut self,
        doc: &DocumentId,
        version: VersionSeq,
        content: &str,
    ) -> Result<VersionRecord, StoreError> {
        self.check_fail()?;
        let record = Self::record(doc, version, content);
        self.documents
            .entry(doc.clone())
            .or_default()
            .insert(version, record.clone());
        Ok(record)
    }

    fn update_version(
        &mut self,
        doc: &DocumentId,
        version: VersionSeq,
        content: &str,
    ) -> Result<VersionRecord, StoreError> {
        self.check_fail()?;
        let versions = self.documents.get_mut(doc).ok_or(StoreError::NotFound)?;
        if !versions.contains_key(&version) {
            return Err(StoreError::NotFound);
        }
        let record = Self::record(doc, version, content);
        versions.insert(version, record.clone());
        Ok(record)
    }
}
