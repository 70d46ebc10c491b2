//! Contextual-UI state machine driven through the public API.

use specdoc::model::new_table;
use specdoc::{
    Block, BlockPath, Command, Document, HeadingLevel, Inline, Mark, MarkKind, MarkSet,
    MenuState, PaletteItem, ScreenPoint, ScreenRect, Selection, TextPosition, UiController,
    UiInput, ViewProjection,
};

struct FixedView;

impl ViewProjection for FixedView {
    fn point_at(&self, _position: &TextPosition) -> Option<ScreenPoint> {
        Some(ScreenPoint { x: 1.0, y: 2.0 })
    }

    fn selection_rect(&self, _selection: &Selection) -> Option<ScreenRect> {
        Some(ScreenRect {
            x: 0.0,
            y: 0.0,
            width: 50.0,
            height: 10.0,
        })
    }
}

fn document() -> Document {
    Document::from_blocks(vec![
        Block::empty_paragraph(),
        Block::heading(HeadingLevel::H2, "s", vec![]),
        Block::paragraph(vec![Inline::styled(
            "formatted",
            MarkSet::from_marks([Mark::Bold, Mark::Italic]),
        )]),
        new_table(2, 2, true),
        Block::CodeBlock {
            text: "code".to_string(),
        },
    ])
}

fn caret(path: Vec<usize>, offset: usize) -> UiInput {
    UiInput::SelectionChanged(Selection::caret(TextPosition::new(BlockPath(path), offset)))
}

fn select(path: Vec<usize>, from: usize, to: usize) -> UiInput {
    UiInput::SelectionChanged(Selection::range(
        TextPosition::new(BlockPath(path.clone()), from),
        TextPosition::new(BlockPath(path), to),
    ))
}

#[test]
fn floating_insert_in_empty_paragraph_and_heading_only() {
    let document = document();
    let mut ui = UiController::new();

    ui.handle(caret(vec![0], 0), &document, &FixedView);
    assert!(matches!(ui.menu(), MenuState::FloatingInsert(_)));

    ui.handle(caret(vec![1], 0), &document, &FixedView);
    assert!(matches!(ui.menu(), MenuState::FloatingInsert(_)));

    // Non-empty paragraph: no insert affordance.
    ui.handle(caret(vec![2], 0), &document, &FixedView);
    assert_eq!(*ui.menu(), MenuState::Neutral);

    // Empty but not a paragraph/heading: code block gets nothing.
    ui.handle(caret(vec![4], 0), &document, &FixedView);
    assert_eq!(*ui.menu(), MenuState::Neutral);
}

#[test]
fn bubble_menu_follows_selection_state() {
    let document = document();
    let mut ui = UiController::new();

    ui.handle(select(vec![2], 0, 9), &document, &FixedView);
    assert!(matches!(ui.menu(), MenuState::BubbleMenu(_)));

    // Collapsing the selection drops the bubble.
    ui.handle(caret(vec![2], 3), &document, &FixedView);
    assert_eq!(*ui.menu(), MenuState::Neutral);
}

#[test]
fn slash_palette_lifecycle() {
    let document = document();
    let mut ui = UiController::new();

    // Slash with no caret does nothing.
    ui.handle(UiInput::SlashKey, &document, &FixedView);
    assert_eq!(*ui.menu(), MenuState::Neutral);

    ui.handle(caret(vec![0], 0), &document, &FixedView);
    ui.handle(UiInput::SlashKey, &document, &FixedView);
    assert!(matches!(ui.menu(), MenuState::SlashPalette(_)));

    // An in-editor click leaves the palette open; the selection change
    // that follows rebuilds state, and a click elsewhere dismisses.
    ui.handle(
        UiInput::Click {
            inside_editor: true,
        },
        &document,
        &FixedView,
    );
    assert!(matches!(ui.menu(), MenuState::SlashPalette(_)));
    ui.handle(
        UiInput::Click {
            inside_editor: false,
        },
        &document,
        &FixedView,
    );
    assert_eq!(*ui.menu(), MenuState::Neutral);

    // Slash opens over a non-empty selection too.
    ui.handle(select(vec![2], 0, 4), &document, &FixedView);
    ui.handle(UiInput::SlashKey, &document, &FixedView);
    assert!(matches!(ui.menu(), MenuState::SlashPalette(_)));
}

#[test]
fn table_menu_is_orthogonal_to_menu_state() {
    let document = document();
    let mut ui = UiController::new();

    // Caret in a cell paragraph: table menu on, empty cell paragraph also
    // shows the floating insert.
    ui.handle(caret(vec![3, 0, 0, 0], 0), &document, &FixedView);
    assert!(ui.table_menu_visible());
    assert!(matches!(ui.menu(), MenuState::FloatingInsert(_)));

    ui.handle(caret(vec![0], 0), &document, &FixedView);
    assert!(!ui.table_menu_visible());
}

#[test]
fn format_painter_full_cycle() {
    let document = document();
    let mut ui = UiController::new();

    // Arm from within the formatted run.
    ui.handle(caret(vec![2], 4), &document, &FixedView);
    ui.handle(UiInput::FormatPainterToggle, &document, &FixedView);
    assert!(ui.painter().armed);
    assert!(ui.painter().captured.contains(MarkKind::Bold));
    assert!(ui.painter().captured.contains(MarkKind::Italic));

    // A collapsed selection change does not fire it.
    let commands = ui.handle(caret(vec![2], 1), &document, &FixedView);
    assert!(commands.is_empty());
    assert!(ui.painter().armed);

    // The first non-empty selection fires it exactly once and the state
    // returns to neutral.
    let commands = ui.handle(select(vec![2], 0, 9), &document, &FixedView);
    assert_eq!(commands.len(), 2);
    assert!(commands
        .iter()
        .all(|command| matches!(command, Command::SetMark { .. })));
    assert!(!ui.painter().armed);
    assert_eq!(*ui.menu(), MenuState::Neutral);

    // Nothing left to apply afterwards.
    let commands = ui.handle(select(vec![2], 1, 5), &document, &FixedView);
    assert!(commands.is_empty());
}

#[test]
fn format_painter_plain_capture_leaves_target_untouched() {
    let mut base = document();
    let mut ui = UiController::new();

    // Empty mark set captured from an unformatted position.
    ui.handle(caret(vec![0], 0), &base, &FixedView);
    ui.handle(UiInput::FormatPainterToggle, &base, &FixedView);
    assert!(ui.painter().armed);
    assert!(ui.painter().captured.is_empty());

    // Firing over part of the formatted run paints nothing, so the run
    // keeps its bold and italic instead of being split and stripped.
    let before = base.clone();
    let commands = ui.handle(select(vec![2], 0, 4), &base, &FixedView);
    assert!(!ui.painter().armed);
    for command in commands {
        base.apply(command).expect("painter output applies cleanly");
    }
    assert_eq!(base, before);
}

#[test]
fn escape_disarms_painter() {
    let document = document();
    let mut ui = UiController::new();
    ui.handle(caret(vec![2], 4), &document, &FixedView);
    ui.handle(UiInput::FormatPainterToggle, &document, &FixedView);
    ui.handle(UiInput::EscapeKey, &document, &FixedView);
    assert!(!ui.painter().armed);
}

#[test]
fn palette_choices_produce_valid_commands() {
    let mut base = document();
    let mut ui = UiController::new();
    ui.handle(caret(vec![0], 0), &base, &FixedView);

    for item in [
        PaletteItem::Heading(HeadingLevel::H1),
        PaletteItem::BulletList,
        PaletteItem::OrderedList,
        PaletteItem::TaskList,
        PaletteItem::Blockquote,
        PaletteItem::Table,
        PaletteItem::Clarification,
        PaletteItem::HorizontalRule,
        PaletteItem::ImagePlaceholder,
        PaletteItem::Citation { number: 5 },
        PaletteItem::Prototype {
            id: "p-1".to_string(),
        },
    ] {
        ui.handle(caret(vec![0], 0), &base, &FixedView);
        for command in ui.choose(item.clone()) {
            base.apply(command)
                .unwrap_or_else(|err| panic!("{item:?} rejected: {err}"));
        }
        base.assert_well_formed().expect("tree stays valid");
    }
}
