//! Selection-driven contextual UI: floating insert button, slash palette,
//! bubble menu, table menu flag, and the single-shot format painter.
//!
//! The controller is an explicit state machine over selection, key, and
//! click inputs. It never mutates the document; edits it wants are
//! returned as [`Command`] values for the caller to run through the
//! model, so every mutation still passes the content rules.

use serde::{Deserialize, Serialize};

use crate::model::{
    Block, BlockPath, Command, Document, HeadingLevel, Inline, MarkSet, NodeConversion,
    NodeKind, Selection, TextPosition, marks_at, new_table,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Maps document positions to screen coordinates, already reprojected
/// into the scroll container. Returning `None` marks the position stale;
/// the controller degrades to `Neutral` instead of erroring.
pub trait ViewProjection {
    fn point_at(&self, position: &TextPosition) -> Option<ScreenPoint>;
    fn selection_rect(&self, selection: &Selection) -> Option<ScreenRect>;
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum MenuState {
    #[default]
    Neutral,
    /// Collapsed caret in an empty paragraph or heading.
    FloatingInsert(ScreenPoint),
    /// Anchored at the caret; dismissed by Escape or an outside click.
    SlashPalette(ScreenPoint),
    /// Tracks a non-empty selection.
    BubbleMenu(ScreenRect),
}

/// Single-shot format painter. Captures the mark set at the selection
/// head when armed; the next non-empty selection change fires it once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormatPainter {
    pub armed: bool,
    pub captured: MarkSet,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiInput {
    SelectionChanged(Selection),
    Click { inside_editor: bool },
    /// Opens the palette at the current selection head; ignored until a
    /// selection has arrived.
    SlashKey,
    EscapeKey,
    Focus,
    FormatPainterToggle,
}

/// Entries of the slash palette, provided as data so hosts render them.
/// Citation and prototype carry their payload because the host collects
/// it before choosing.
#[derive(Debug, Clone, PartialEq)]
pub enum PaletteItem {
    Paragraph,
    Heading(HeadingLevel),
    BulletList,
    OrderedList,
    TaskList,
    Blockquote,
    CodeBlock,
    Table,
    Citation { number: u32 },
    Prototype { id: String },
    Clarification,
    HorizontalRule,
    ImagePlaceholder,
}

/// Stable ids and display labels for the palette, in display order.
pub fn palette_entries() -> &'static [(&'static str, &'static str)] {
    &[
        ("paragraph", "Paragraph"),
        ("heading-1", "Heading 1"),
        ("heading-2", "Heading 2"),
        ("heading-3", "Heading 3"),
        ("bullet-list", "Bullet list"),
        ("ordered-list", "Ordered list"),
        ("task-list", "Task list"),
        ("blockquote", "Quote"),
        ("code-block", "Code block"),
        ("table", "Table"),
        ("citation", "Citation"),
        ("prototype", "Prototype reference"),
        ("clarification", "Clarification paragraph"),
        ("horizontal-rule", "Divider"),
        ("image-placeholder", "Image placeholder"),
    ]
}

#[derive(Debug, Default)]
pub struct UiController {
    menu: MenuState,
    table_menu: bool,
    painter: FormatPainter,
    selection: Option<Selection>,
}

impl UiController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn menu(&self) -> &MenuState {
        &self.menu
    }

    pub fn table_menu_visible(&self) -> bool {
        self.table_menu
    }

    pub fn painter(&self) -> &FormatPainter {
        &self.painter
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    /// Loading another version or replacing the content wholesale drops
    /// every transient UI state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Feeds one input through the state machine. Returned commands are
    /// edits the controller wants applied (currently only the format
    /// painter produces any).
    pub fn handle(
        &mut self,
        input: UiInput,
        document: &Document,
        view: &dyn ViewProjection,
    ) -> Vec<Command> {
        match input {
            UiInput::SelectionChanged(selection) => {
                self.on_selection(selection, document, view)
            }
            UiInput::SlashKey => {
                if let Some(selection) = self.selection.clone() {
                    match view.point_at(&selection.head) {
                        Some(point) => self.menu = MenuState::SlashPalette(point),
                        None => {
                            tracing::debug!("stale caret position, dropping slash palette");
                            self.menu = MenuState::Neutral;
                        }
                    }
                }
                Vec::new()
            }
            UiInput::EscapeKey => {
                self.menu = MenuState::Neutral;
                self.painter.armed = false;
                Vec::new()
            }
            UiInput::Click { inside_editor } => {
                // An in-editor click is followed by a SelectionChanged that
                // rebuilds the right state; only an outside click dismisses.
                if !inside_editor {
                    self.menu = MenuState::Neutral;
                }
                Vec::new()
            }
            UiInput::Focus => {
                if let Some(selection) = self.selection.clone() {
                    self.on_selection(selection, document, view)
                } else {
                    Vec::new()
                }
            }
            UiInput::FormatPainterToggle => {
                if self.painter.armed {
                    self.painter.armed = false;
                } else if let Some(selection) = &self.selection
                    && let Some(content) = document
                        .block(&selection.head.path)
                        .and_then(Block::inline)
                {
                    self.painter = FormatPainter {
                        armed: true,
                        captured: marks_at(content, selection.head.offset),
                    };
                }
                Vec::new()
            }
        }
    }

    fn on_selection(
        &mut self,
        selection: Selection,
        document: &Document,
        view: &dyn ViewProjection,
    ) -> Vec<Command> {
        self.table_menu = in_table(document, &selection.head.path);

        if self.painter.armed && !selection.is_empty() {
            let painter = std::mem::take(&mut self.painter);
            self.selection = Some(selection.clone());
            self.menu = MenuState::Neutral;
            return painter_commands(&painter.captured, &selection);
        }

        self.selection = Some(selection.clone());
        if selection.is_empty() {
            let empty_text_block = document
                .block(&selection.head.path)
                .filter(|block| {
                    matches!(block.kind(), NodeKind::Paragraph | NodeKind::Heading)
                })
                .map(|block| block.inline().map(<[Inline]>::is_empty).unwrap_or(false))
                .unwrap_or(false);
            // The slash palette outlives caret moves within the block; it
            // is dismissed explicitly, not by typing.
            if matches!(self.menu, MenuState::SlashPalette(_)) {
                return Vec::new();
            }
            self.menu = if empty_text_block {
                match view.point_at(&selection.head) {
                    Some(point) => MenuState::FloatingInsert(point),
                    None => MenuState::Neutral,
                }
            } else {
                MenuState::Neutral
            };
        } else {
            self.menu = match view.selection_rect(&selection) {
                Some(rect) => MenuState::BubbleMenu(rect),
                None => MenuState::Neutral,
            };
        }
        Vec::new()
    }

    /// Resolves a palette choice into edit commands against the caret
    /// block, and closes the palette.
    pub fn choose(&mut self, item: PaletteItem) -> Vec<Command> {
        self.menu = MenuState::Neutral;
        let Some(selection) = self.selection.clone() else {
            return Vec::new();
        };
        let caret = selection.head;
        let path = caret.path.clone();
        let after = next_sibling(&path);
        match item {
            PaletteItem::Paragraph => vec![Command::SetNodeType {
                path,
                conversion: NodeConversion::Paragraph,
            }],
            PaletteItem::Heading(level) => vec![Command::SetNodeType {
                path,
                conversion: NodeConversion::Heading {
                    level,
                    section_id: None,
                },
            }],
            PaletteItem::Clarification => vec![Command::SetNodeType {
                path,
                conversion: NodeConversion::Clarification,
            }],
            PaletteItem::CodeBlock => vec![Command::SetNodeType {
                path,
                conversion: NodeConversion::CodeBlock,
            }],
            PaletteItem::BulletList => vec![Command::InsertBlock {
                at: after,
                block: Block::BulletList {
                    children: vec![Block::ListItem {
                        children: vec![Block::empty_paragraph()],
                    }],
                },
            }],
            PaletteItem::OrderedList => vec![Command::InsertBlock {
                at: after,
                block: Block::OrderedList {
                    children: vec![Block::ListItem {
                        children: vec![Block::empty_paragraph()],
                    }],
                },
            }],
            PaletteItem::TaskList => vec![Command::InsertBlock {
                at: after,
                block: Block::TaskList {
                    children: vec![Block::TaskItem {
                        checked: false,
                        children: vec![Block::empty_paragraph()],
                    }],
                },
            }],
            PaletteItem::Blockquote => vec![Command::InsertBlock {
                at: after,
                block: Block::Blockquote {
                    children: vec![Block::empty_paragraph()],
                },
            }],
            PaletteItem::Table => vec![Command::InsertBlock {
                at: after,
                block: new_table(3, 3, true),
            }],
            PaletteItem::HorizontalRule => vec![Command::InsertBlock {
                at: after,
                block: Block::HorizontalRule,
            }],
            PaletteItem::ImagePlaceholder => vec![Command::InsertBlock {
                at: after,
                block: Block::ImagePlaceholder,
            }],
            PaletteItem::Citation { number } => vec![Command::InsertInline {
                at: caret,
                inline: Inline::Citation { number },
            }],
            PaletteItem::Prototype { id } => vec![Command::InsertInline {
                at: caret,
                inline: Inline::PrototypeRef { id },
            }],
        }
    }
}

/// Lays each captured mark over the selection. An empty capture applies
/// nothing; existing marks on the target are left in place.
fn painter_commands(captured: &MarkSet, selection: &Selection) -> Vec<Command> {
    let from = selection.anchor.clone();
    let to = selection.head.clone();
    captured
        .iter()
        .map(|mark| Command::SetMark {
            from: from.clone(),
            to: to.clone(),
            mark: mark.clone(),
        })
        .collect()
}

fn next_sibling(path: &BlockPath) -> BlockPath {
    match path.parent() {
        Some((parent, index)) => parent.child(index + 1),
        None => BlockPath::root(0),
    }
}

/// True when any block on the path, the target included, is a table.
pub fn in_table(document: &Document, path: &BlockPath) -> bool {
    for depth in 1..=path.0.len() {
        let prefix = BlockPath(path.0[..depth].to_vec());
        if let Some(block) = document.block(&prefix)
            && block.kind() == NodeKind::Table
        {
            return true;
        }
    }
    false
}

/// Marks that are uniformly active across a selection head position,
/// used by hosts to render bubble-menu toggle states.
pub fn active_marks(document: &Document, selection: &Selection) -> MarkSet {
    document
        .block(&selection.head.path)
        .and_then(Block::inline)
        .map(|content| marks_at(content, selection.head.offset))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Inline, Mark};

    struct FixedView;

    impl ViewProjection for FixedView {
        fn point_at(&self, _position: &TextPosition) -> Option<ScreenPoint> {
            Some(ScreenPoint { x: 10.0, y: 20.0 })
        }

        fn selection_rect(&self, _selection: &Selection) -> Option<ScreenRect> {
            Some(ScreenRect {
                x: 5.0,
                y: 6.0,
                width: 100.0,
                height: 18.0,
            })
        }
    }

    struct StaleView;

    impl ViewProjection for StaleView {
        fn point_at(&self, _position: &TextPosition) -> Option<ScreenPoint> {
            None
        }

        fn selection_rect(&self, _selection: &Selection) -> Option<ScreenRect> {
            None
        }
    }

    fn doc() -> Document {
        Document::from_blocks(vec![
            Block::empty_paragraph(),
            Block::paragraph(vec![Inline::styled(
                "styled text",
                MarkSet::from_marks([Mark::Bold]),
            )]),
            new_table(2, 2, false),
        ])
    }

    fn caret(path: Vec<usize>, offset: usize) -> Selection {
        Selection::caret(TextPosition::new(BlockPath(path), offset))
    }

    #[test]
    fn test_floating_insert_only_in_empty_text_block() {
        let document = doc();
        let mut ui = UiController::new();
        ui.handle(
            UiInput::SelectionChanged(caret(vec![0], 0)),
            &document,
            &FixedView,
        );
        assert!(matches!(ui.menu(), MenuState::FloatingInsert(_)));

        ui.handle(
            UiInput::SelectionChanged(caret(vec![1], 0)),
            &document,
            &FixedView,
        );
        assert_eq!(*ui.menu(), MenuState::Neutral);
    }

    #[test]
    fn test_stale_projection_degrades_to_neutral() {
        let document = doc();
        let mut ui = UiController::new();
        ui.handle(
            UiInput::SelectionChanged(caret(vec![0], 0)),
            &document,
            &StaleView,
        );
        assert_eq!(*ui.menu(), MenuState::Neutral);
    }

    #[test]
    fn test_bubble_menu_on_nonempty_selection() {
        let document = doc();
        let mut ui = UiController::new();
        let selection = Selection::range(
            TextPosition::new(BlockPath(vec![1]), 0),
            TextPosition::new(BlockPath(vec![1]), 6),
        );
        ui.handle(UiInput::SelectionChanged(selection), &document, &FixedView);
        assert!(matches!(ui.menu(), MenuState::BubbleMenu(_)));
    }

    #[test]
    fn test_slash_palette_opens_and_escape_closes() {
        let document = doc();
        let mut ui = UiController::new();
        ui.handle(
            UiInput::SelectionChanged(caret(vec![0], 0)),
            &document,
            &FixedView,
        );
        ui.handle(UiInput::SlashKey, &document, &FixedView);
        assert!(matches!(ui.menu(), MenuState::SlashPalette(_)));

        // Caret moves inside the block do not dismiss the palette.
        ui.handle(
            UiInput::SelectionChanged(caret(vec![0], 0)),
            &document,
            &FixedView,
        );
        assert!(matches!(ui.menu(), MenuState::SlashPalette(_)));

        ui.handle(UiInput::EscapeKey, &document, &FixedView);
        assert_eq!(*ui.menu(), MenuState::Neutral);
    }

    #[test]
    fn test_outside_click_closes_palette() {
        let document = doc();
        let mut ui = UiController::new();
        ui.handle(
            UiInput::SelectionChanged(caret(vec![0], 0)),
            &document,
            &FixedView,
        );
        ui.handle(UiInput::SlashKey, &document, &FixedView);
        ui.handle(
            UiInput::Click {
                inside_editor: false,
            },
            &document,
            &FixedView,
        );
        assert_eq!(*ui.menu(), MenuState::Neutral);
    }

    #[test]
    fn test_inside_click_leaves_palette_open() {
        let document = doc();
        let mut ui = UiController::new();
        ui.handle(
            UiInput::SelectionChanged(caret(vec![0], 0)),
            &document,
            &FixedView,
        );
        ui.handle(UiInput::SlashKey, &document, &FixedView);
        ui.handle(
            UiInput::Click {
                inside_editor: true,
            },
            &document,
            &FixedView,
        );
        assert!(matches!(ui.menu(), MenuState::SlashPalette(_)));
    }

    #[test]
    fn test_slash_opens_over_nonempty_selection() {
        let document = doc();
        let mut ui = UiController::new();
        let selection = Selection::range(
            TextPosition::new(BlockPath(vec![1]), 0),
            TextPosition::new(BlockPath(vec![1]), 6),
        );
        ui.handle(UiInput::SelectionChanged(selection), &document, &FixedView);
        ui.handle(UiInput::SlashKey, &document, &FixedView);
        assert!(matches!(ui.menu(), MenuState::SlashPalette(_)));
    }

    #[test]
    fn test_table_menu_tracks_membership_at_depth() {
        let document = doc();
        let mut ui = UiController::new();
        // Cell paragraph: table index 2 -> row 0 -> cell 0 -> paragraph 0.
        ui.handle(
            UiInput::SelectionChanged(caret(vec![2, 0, 0, 0], 0)),
            &document,
            &FixedView,
        );
        assert!(ui.table_menu_visible());

        ui.handle(
            UiInput::SelectionChanged(caret(vec![1], 0)),
            &document,
            &FixedView,
        );
        assert!(!ui.table_menu_visible());
    }

    #[test]
    fn test_format_painter_single_shot() {
        let document = doc();
        let mut ui = UiController::new();
        // Caret in the bold run, arm the painter.
        ui.handle(
            UiInput::SelectionChanged(caret(vec![1], 3)),
            &document,
            &FixedView,
        );
        ui.handle(UiInput::FormatPainterToggle, &document, &FixedView);
        assert!(ui.painter().armed);
        assert!(ui.painter().captured.contains(crate::model::MarkKind::Bold));

        // First non-empty selection fires exactly once.
        let target = Selection::range(
            TextPosition::new(BlockPath(vec![1]), 0),
            TextPosition::new(BlockPath(vec![1]), 6),
        );
        let commands = ui.handle(
            UiInput::SelectionChanged(target),
            &document,
            &FixedView,
        );
        assert!(!ui.painter().armed);
        assert_eq!(commands.len(), 1);
        assert!(matches!(commands[0], Command::SetMark { .. }));

        // Second selection change applies nothing.
        let again = Selection::range(
            TextPosition::new(BlockPath(vec![1]), 0),
            TextPosition::new(BlockPath(vec![1]), 3),
        );
        let commands = ui.handle(
            UiInput::SelectionChanged(again),
            &document,
            &FixedView,
        );
        assert!(commands.is_empty());
    }

    #[test]
    fn test_painter_with_empty_capture_applies_nothing() {
        let document = doc();
        let mut ui = UiController::new();
        // Arm at a caret in the empty paragraph: nothing to capture.
        ui.handle(
            UiInput::SelectionChanged(caret(vec![0], 0)),
            &document,
            &FixedView,
        );
        ui.handle(UiInput::FormatPainterToggle, &document, &FixedView);
        assert!(ui.painter().armed);
        assert!(ui.painter().captured.is_empty());

        // Firing over the bold run emits no edits, so its marks survive.
        let target = Selection::range(
            TextPosition::new(BlockPath(vec![1]), 0),
            TextPosition::new(BlockPath(vec![1]), 4),
        );
        let commands = ui.handle(
            UiInput::SelectionChanged(target),
            &document,
            &FixedView,
        );
        assert!(commands.is_empty());
        assert!(!ui.painter().armed);
    }

    #[test]
    fn test_painter_toggle_while_armed_disarms() {
        let document = doc();
        let mut ui = UiController::new();
        ui.handle(
            UiInput::SelectionChanged(caret(vec![1], 3)),
            &document,
            &FixedView,
        );
        ui.handle(UiInput::FormatPainterToggle, &document, &FixedView);
        assert!(ui.painter().armed);
        ui.handle(UiInput::FormatPainterToggle, &document, &FixedView);
        assert!(!ui.painter().armed);

        // Disarmed painter leaves later selections alone.
        let selection = Selection::range(
            TextPosition::new(BlockPath(vec![1]), 0),
            TextPosition::new(BlockPath(vec![1]), 4),
        );
        let commands = ui.handle(
            UiInput::SelectionChanged(selection),
            &document,
            &FixedView,
        );
        assert!(commands.is_empty());
    }

    #[test]
    fn test_palette_choice_converts_caret_block() {
        let document = doc();
        let mut ui = UiController::new();
        ui.handle(
            UiInput::SelectionChanged(caret(vec![0], 0)),
            &document,
            &FixedView,
        );
        let commands = ui.choose(PaletteItem::Heading(HeadingLevel::H2));
        assert_eq!(commands.len(), 1);
        assert!(matches!(commands[0], Command::SetNodeType { .. }));
        assert_eq!(*ui.menu(), MenuState::Neutral);
    }

    #[test]
    fn test_palette_table_inserts_three_by_three() {
        let document = doc();
        let mut ui = UiController::new();
        ui.handle(
            UiInput::SelectionChanged(caret(vec![0], 0)),
            &document,
            &FixedView,
        );
        let commands = ui.choose(PaletteItem::Table);
        let Command::InsertBlock { at, block } = &commands[0] else {
            panic!("expected insert");
        };
        assert_eq!(*at, BlockPath(vec![1]));
        let rows = block.children().unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|row| row.children().unwrap().len() == 3));
    }
}
