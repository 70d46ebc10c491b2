//! Host event channel.
//!
//! Each editor instance owns its queue; the host drains it after every
//! call into the engine. Nothing here is global.

use serde::{Deserialize, Serialize};

use crate::model::BlockPath;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostEvent {
    /// A citation marker was activated; the host shows the source.
    CitationActivated { number: u32 },
    /// A prototype reference was activated; the host opens the prototype.
    PrototypeActivated { id: String },
    /// Something outside the editor asked to jump to a section.
    SectionNavigateRequested { section_id: String },
    /// The engine wants the given block scrolled into view.
    ScrollTo { path: BlockPath },
}

#[derive(Debug, Default)]
pub struct EventQueue {
    events: Vec<HostEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: HostEvent) {
        self.events.push(event);
    }

    pub fn drain(&mut self) -> Vec<HostEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
