//! specdoc: structured document engine for requirements specification
//! authoring.
//!
//! The engine underneath a rich requirements-authoring surface. It owns
//! everything except rendering and input capture:
//!
//! - **Document model** - typed block/inline tree with content rules and
//!   validate-then-mutate structural commands
//! - **Markup codec** - tag-based serializer, tolerant parser, and an
//!   idempotent `sanitize` repair pass
//! - **Outline** - derived heading hierarchy, recomputed per mutation
//! - **Contextual UI** - selection-driven menu state machine with a
//!   single-shot format painter
//! - **Versioning** - debounced autosave and race-safe version switching
//!   against an injected store
//! - **Navigation** - section jumps with a transient arrival highlight
//!
//! # Quick Start
//!
//! ```rust
//! use specdoc::{Editor, EditorConfig, DocumentId};
//!
//! let mut editor = Editor::new(EditorConfig::new(DocumentId::new("spec-1")));
//! editor
//!     .set_content("<h1 data-section-id=\"overview\">Overview</h1>\n<p>Scope.</p>")
//!     .unwrap();
//! assert_eq!(editor.outline()[0].title, "Overview");
//! ```

// Document tree and structural commands
pub mod model;

// Markup serializer, parser, and sanitize
pub mod markup;

// Derived heading outline
pub mod outline;

// Section navigation and arrival highlight
pub mod nav;

// Selection-driven contextual UI
pub mod ui;

// Debounced autosave and version switching
pub mod version;

// Host event channel
pub mod events;

// Facade wiring the engine together
pub mod editor;

// Re-export model types
pub use model::{
    Alignment, Block, BlockPath, Command, CommandRejected, Document, HeadingLevel, Inline,
    Mark, MarkKind, MarkSet, NodeConversion, NodeKind, Selection, TextPosition,
};

// Re-export codec entry points
pub use markup::{MarkupError, parse, sanitize, serialize};

// Re-export outline types
pub use outline::{OutlineItem, extract};

// Re-export navigation types
pub use nav::{Highlight, NavigationError, Navigator};

// Re-export UI types
pub use ui::{
    FormatPainter, MenuState, PaletteItem, ScreenPoint, ScreenRect, UiController, UiInput,
    ViewProjection, palette_entries,
};

// Re-export versioning types
pub use version::{
    DocumentId, LoadError, MemoryStore, SaveRequest, SaveTag, SpecStore, StoreError,
    VersionConfig, VersionController, VersionRecord, VersionSeq,
};

// Re-export the facade and events
pub use editor::{Editor, EditorConfig, EditorError};
pub use events::HostEvent;
