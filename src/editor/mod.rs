//! Editor facade: owns the document, the derived outline, the contextual
//! UI controller, the version controller, navigation state, and the host
//! event queue, and keeps them consistent across every entry point.

use crate::events::{EventQueue, HostEvent};
use crate::markup::{self, MarkupError};
use crate::model::{Block, Command, CommandRejected, Document, ensure_section_ids};
use crate::nav::{Highlight, NavigationError, Navigator};
use crate::outline::{self, OutlineItem};
use crate::ui::{PaletteItem, UiController, UiInput, ViewProjection};
use crate::version::{
    DocumentId, LoadError, SaveRequest, SaveTag, SpecStore, StoreError, VersionConfig,
    VersionController, VersionRecord, VersionSeq,
};

#[derive(Debug, Clone)]
pub struct EditorConfig {
    pub doc: DocumentId,
    pub version: VersionConfig,
}

impl EditorConfig {
    pub fn new(doc: DocumentId) -> Self {
        Self {
            doc,
            version: VersionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditorError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Markup(#[from] MarkupError),
}

pub struct Editor {
    document: Document,
    outline: Vec<OutlineItem>,
    ui: UiController,
    versions: VersionController,
    navigator: Navigator,
    events: EventQueue,
}

impl Editor {
    /// Starts with a single empty paragraph, the smallest editable tree.
    pub fn new(config: EditorConfig) -> Self {
        let document = Document::from_blocks(vec![Block::empty_paragraph()]);
        let outline = outline::extract(&document);
        Self {
            document,
            outline,
            ui: UiController::new(),
            versions: VersionController::new(config.doc, config.version),
            navigator: Navigator::new(),
            events: EventQueue::new(),
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn outline(&self) -> &[OutlineItem] {
        &self.outline
    }

    pub fn ui(&self) -> &UiController {
        &self.ui
    }

    pub fn markup(&self) -> String {
        markup::serialize(&self.document)
    }

    pub fn current_version(&self) -> VersionSeq {
        self.versions.current_version()
    }

    /// Wholesale content replacement with the recovery ladder: parse the
    /// text as-is, then parse its sanitized form, and if both fail keep
    /// the current tree and surface the error. Does not arm autosave.
    pub fn set_content(&mut self, text: &str) -> Result<(), MarkupError> {
        let mut document = match markup::parse(text) {
            Ok(document) => document,
            Err(first_error) => match markup::parse(&markup::sanitize(text)) {
                Ok(document) => {
                    tracing::debug!(error = %first_error, "content accepted after repair");
                    document
                }
                Err(_) => return Err(first_error),
            },
        };
        ensure_section_ids(&mut document);
        self.document = document;
        self.outline = outline::extract(&self.document);
        self.ui.reset();
        self.navigator.reset();
        Ok(())
    }

    /// Applies one structural command. Success rebuilds the outline and
    /// arms the debounced save with the new serialized content; rejection
    /// leaves everything untouched.
    pub fn apply(&mut self, command: Command, now_ms: u64) -> Result<(), CommandRejected> {
        self.document.apply(command)?;
        ensure_section_ids(&mut self.document);
        self.outline = outline::extract(&self.document);
        self.versions.note_edit(self.markup(), now_ms);
        Ok(())
    }

    /// Feeds a UI input through the contextual-UI controller and runs any
    /// edits it requests. A command the model rejects is dropped; the
    /// controller only ever produces best-effort formatting edits.
    pub fn handle_ui(&mut self, input: UiInput, view: &dyn ViewProjection, now_ms: u64) {
        let commands = self.ui.handle(input, &self.document, view);
        self.run_ui_commands(commands, now_ms);
    }

    /// Resolves a slash-palette choice.
    pub fn choose_palette(&mut self, item: PaletteItem, now_ms: u64) {
        let commands = self.ui.choose(item);
        self.run_ui_commands(commands, now_ms);
    }

    fn run_ui_commands(&mut self, commands: Vec<Command>, now_ms: u64) {
        for command in commands {
            if let Err(rejection) = self.apply(command, now_ms) {
                tracing::debug!(error = %rejection, "dropping rejected ui edit");
            }
        }
    }

    /// Drives the debounce timer; at most one save request per quiet gap.
    pub fn poll(&mut self, now_ms: u64) -> Option<SaveRequest> {
        self.versions.poll(now_ms)
    }

    pub fn complete_save(&mut self, tag: &SaveTag, result: Result<VersionRecord, StoreError>) {
        self.versions.complete_save(tag, result);
    }

    /// Convenience for hosts without their own scheduler: performs any due
    /// save synchronously against the store.
    pub fn flush_save(&mut self, store: &mut dyn SpecStore, now_ms: u64) {
        if let Some(request) = self.versions.poll(now_ms) {
            let result =
                store.update_version(&request.tag.doc, request.tag.version, &request.content);
            self.versions.complete_save(&request.tag, result);
        }
    }

    /// Switches to a stored version: fetch, parse (with repair), replace
    /// wholesale, rebuild the outline, and drop all transient UI state.
    /// The version switch commits only after the content parses, so a
    /// fetch or parse failure leaves the displayed content, the current
    /// version, and any pending save untouched. In-flight saves for the
    /// old content become stale.
    pub fn load_version(
        &mut self,
        version: VersionSeq,
        store: &mut dyn SpecStore,
    ) -> Result<(), EditorError> {
        let content = self.versions.fetch(version, store)?;
        self.set_content(&content)?;
        self.versions.commit_load(version);
        Ok(())
    }

    pub fn load_latest(&mut self, store: &mut dyn SpecStore) -> Result<(), EditorError> {
        let latest = self.versions.latest_version(store)?;
        self.load_version(latest, store)
    }

    /// Creates the next version slot holding the current content.
    pub fn create_version(
        &mut self,
        store: &mut dyn SpecStore,
    ) -> Result<VersionRecord, StoreError> {
        let content = self.markup();
        self.versions.create_next(store, &content)
    }

    /// Jumps to the first heading with the given section id and asks the
    /// host to scroll there. The arrival highlight stays active for two
    /// seconds of `now_ms` time.
    pub fn navigate_to(
        &mut self,
        section_id: &str,
        now_ms: u64,
    ) -> Result<(), NavigationError> {
        let path = self
            .navigator
            .navigate_to(section_id, &self.document, now_ms)?;
        self.events.push(HostEvent::ScrollTo { path });
        Ok(())
    }

    pub fn active_highlight(&mut self, now_ms: u64) -> Option<&Highlight> {
        self.navigator.active_highlight(now_ms)
    }

    pub fn activate_citation(&mut self, number: u32) {
        self.events.push(HostEvent::CitationActivated { number });
    }

    pub fn activate_prototype(&mut self, id: impl Into<String>) {
        self.events.push(HostEvent::PrototypeActivated { id: id.into() });
    }

    /// For hosts whose outline panel lives outside the editor surface.
    pub fn request_section_navigate(&mut self, section_id: impl Into<String>) {
        self.events.push(HostEvent::SectionNavigateRequested {
            section_id: section_id.into(),
        });
    }

    pub fn drain_events(&mut self) -> Vec<HostEvent> {
        self.events.drain()
    }
}
