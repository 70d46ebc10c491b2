//! Typed block/inline document tree and structural edit commands.
//!
//! The tree is plain owned data: blocks contain either child blocks, inline
//! content, or nothing. Every mutation goes through [`Document::apply`],
//! which validates against per-node content rules before touching the tree,
//! so a rejected command always leaves the document unchanged.

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    Left,
    Center,
    Right,
}

impl Alignment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Alignment::Left => "left",
            Alignment::Center => "center",
            Alignment::Right => "right",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "left" => Some(Alignment::Left),
            "center" => Some(Alignment::Center),
            "right" => Some(Alignment::Right),
            _ => None,
        }
    }
}

/// Composable inline formatting annotation. At most one mark of each kind
/// applies to a given text run; re-adding a kind replaces its value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mark {
    Bold,
    Italic,
    Underline,
    Strike,
    Superscript,
    Subscript,
    TextColor { value: String },
    Highlight { value: String },
    Link { href: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MarkKind {
    Bold,
    Italic,
    Underline,
    Strike,
    Superscript,
    Subscript,
    TextColor,
    Highlight,
    Link,
}

impl Mark {
    pub fn kind(&self) -> MarkKind {
        match self {
            Mark::Bold => MarkKind::Bold,
            Mark::Italic => MarkKind::Italic,
            Mark::Underline => MarkKind::Underline,
            Mark::Strike => MarkKind::Strike,
            Mark::Superscript => MarkKind::Superscript,
            Mark::Subscript => MarkKind::Subscript,
            Mark::TextColor { .. } => MarkKind::TextColor,
            Mark::Highlight { .. } => MarkKind::Highlight,
            Mark::Link { .. } => MarkKind::Link,
        }
    }
}

/// Set of marks attached to a text run, kept in a stable kind order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkSet(Vec<Mark>);

impl MarkSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn from_marks(marks: impl IntoIterator<Item = Mark>) -> Self {
        let mut set = Self::new();
        for mark in marks {
            set.add(mark);
        }
        set
    }

    pub fn add(&mut self, mark: Mark) {
        self.0.retain(|existing| existing.kind() != mark.kind());
        self.0.push(mark);
        self.0.sort_by_key(|mark| mark.kind());
    }

    pub fn remove(&mut self, kind: MarkKind) {
        self.0.retain(|mark| mark.kind() != kind);
    }

    pub fn contains(&self, kind: MarkKind) -> bool {
        self.0.iter().any(|mark| mark.kind() == kind)
    }

    pub fn get(&self, kind: MarkKind) -> Option<&Mark> {
        self.0.iter().find(|mark| mark.kind() == kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mark> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Inline content: text runs with marks, plus atomic marker nodes that are
/// selected and deleted as a single unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Inline {
    Text { text: String, marks: MarkSet },
    Citation { number: u32 },
    PrototypeRef { id: String },
}

impl Inline {
    pub fn text(text: impl Into<String>) -> Self {
        Inline::Text {
            text: text.into(),
            marks: MarkSet::new(),
        }
    }

    pub fn styled(text: impl Into<String>, marks: MarkSet) -> Self {
        Inline::Text {
            text: text.into(),
            marks,
        }
    }

    pub fn is_atomic(&self) -> bool {
        !matches!(self, Inline::Text { .. })
    }

    /// Number of selection units this node occupies: one per grapheme
    /// cluster for text, exactly one for an atomic node.
    pub fn width(&self) -> usize {
        match self {
            Inline::Text { text, .. } => text.graphemes(true).count(),
            _ => 1,
        }
    }
}

/// Heading depth, restricted to the four levels the outline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct HeadingLevel(u8);

impl HeadingLevel {
    pub const H1: HeadingLevel = HeadingLevel(1);
    pub const H2: HeadingLevel = HeadingLevel(2);
    pub const H3: HeadingLevel = HeadingLevel(3);
    pub const H4: HeadingLevel = HeadingLevel(4);

    pub fn new(level: u8) -> Option<Self> {
        (1..=4).contains(&level).then_some(HeadingLevel(level))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for HeadingLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        HeadingLevel::new(value).ok_or_else(|| format!("heading level out of range: {value}"))
    }
}

impl From<HeadingLevel> for u8 {
    fn from(level: HeadingLevel) -> u8 {
        level.0
    }
}

/// Tag identifying a node type; content rules and rendering dispatch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    Paragraph,
    Heading,
    Clarification,
    BulletList,
    OrderedList,
    TaskList,
    ListItem,
    TaskItem,
    Table,
    TableRow,
    TableCell,
    CodeBlock,
    Blockquote,
    HorizontalRule,
    ImagePlaceholder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Block {
    Paragraph {
        content: Vec<Inline>,
        align: Option<Alignment>,
    },
    Heading {
        level: HeadingLevel,
        section_id: String,
        content: Vec<Inline>,
        align: Option<Alignment>,
    },
    /// Paragraph flagged for requirement clarification; inline content only.
    Clarification { content: Vec<Inline> },
    BulletList { children: Vec<Block> },
    OrderedList { children: Vec<Block> },
    TaskList { children: Vec<Block> },
    ListItem { children: Vec<Block> },
    TaskItem { checked: bool, children: Vec<Block> },
    Table { children: Vec<Block> },
    TableRow { children: Vec<Block> },
    TableCell { header: bool, children: Vec<Block> },
    CodeBlock { text: String },
    Blockquote { children: Vec<Block> },
    HorizontalRule,
    ImagePlaceholder,
}

impl Block {
    pub fn paragraph(content: Vec<Inline>) -> Self {
        Block::Paragraph {
            content,
            align: None,
        }
    }

    pub fn empty_paragraph() -> Self {
        Block::paragraph(Vec::new())
    }

    pub fn heading(level: HeadingLevel, section_id: impl Into<String>, content: Vec<Inline>) -> Self {
        Block::Heading {
            level,
            section_id: section_id.into(),
            content,
            align: None,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Block::Paragraph { .. } => NodeKind::Paragraph,
            Block::Heading { .. } => NodeKind::Heading,
            Block::Clarification { .. } => NodeKind::Clarification,
            Block::BulletList { .. } => NodeKind::BulletList,
            Block::OrderedList { .. } => NodeKind::OrderedList,
            Block::TaskList { .. } => NodeKind::TaskList,
            Block::ListItem { .. } => NodeKind::ListItem,
            Block::TaskItem { .. } => NodeKind::TaskItem,
            Block::Table { .. } => NodeKind::Table,
            Block::TableRow { .. } => NodeKind::TableRow,
            Block::TableCell { .. } => NodeKind::TableCell,
            Block::CodeBlock { .. } => NodeKind::CodeBlock,
            Block::Blockquote { .. } => NodeKind::Blockquote,
            Block::HorizontalRule => NodeKind::HorizontalRule,
            Block::ImagePlaceholder => NodeKind::ImagePlaceholder,
        }
    }

    pub fn children(&self) -> Option<&[Block]> {
        match self {
            Block::BulletList { children }
            | Block::OrderedList { children }
            | Block::TaskList { children }
            | Block::ListItem { children }
            | Block::TaskItem { children, .. }
            | Block::Table { children }
            | Block::TableRow { children }
            | Block::TableCell { children, .. }
            | Block::Blockquote { children } => Some(children),
            _ => None,
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut Vec<Block>> {
        match self {
            Block::BulletList { children }
            | Block::OrderedList { children }
            | Block::TaskList { children }
            | Block::ListItem { children }
            | Block::TaskItem { children, .. }
            | Block::Table { children }
            | Block::TableRow { children }
            | Block::TableCell { children, .. }
            | Block::Blockquote { children } => Some(children),
            _ => None,
        }
    }

    pub fn inline(&self) -> Option<&[Inline]> {
        match self {
            Block::Paragraph { content, .. }
            | Block::Heading { content, .. }
            | Block::Clarification { content } => Some(content),
            _ => None,
        }
    }

    pub fn inline_mut(&mut self) -> Option<&mut Vec<Inline>> {
        match self {
            Block::Paragraph { content, .. }
            | Block::Heading { content, .. }
            | Block::Clarification { content } => Some(content),
            _ => None,
        }
    }

    /// Plain text of this block's inline content (atomic markers excluded).
    pub fn inline_text(&self) -> String {
        let mut out = String::new();
        if let Some(content) = self.inline() {
            for node in content {
                if let Inline::Text { text, .. } = node {
                    out.push_str(text);
                }
            }
        }
        out
    }
}

/// Content rules: which block kinds a container accepts. Nodes carrying
/// inline content or nothing accept no block children.
pub fn allowed_child(parent: NodeKind, child: NodeKind) -> bool {
    use NodeKind::*;
    match parent {
        BulletList | OrderedList => child == ListItem,
        TaskList => child == TaskItem,
        TaskItem => child == Paragraph,
        Table => child == TableRow,
        TableRow => child == TableCell,
        ListItem => matches!(
            child,
            Paragraph | BulletList | OrderedList | CodeBlock | Blockquote
        ),
        TableCell => matches!(child, Paragraph | BulletList | OrderedList | CodeBlock),
        Blockquote => matches!(
            child,
            Paragraph
                | Heading
                | Clarification
                | BulletList
                | OrderedList
                | TaskList
                | CodeBlock
                | HorizontalRule
        ),
        _ => false,
    }
}

/// Block kinds that may sit directly under the document root.
pub fn allowed_top_level(kind: NodeKind) -> bool {
    !matches!(
        kind,
        NodeKind::ListItem | NodeKind::TaskItem | NodeKind::TableRow | NodeKind::TableCell
    )
}

/// Child-index path from the document root to a block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockPath(pub Vec<usize>);

impl BlockPath {
    pub fn root(index: usize) -> Self {
        BlockPath(vec![index])
    }

    pub fn child(&self, index: usize) -> Self {
        let mut indices = self.0.clone();
        indices.push(index);
        BlockPath(indices)
    }

    pub fn parent(&self) -> Option<(BlockPath, usize)> {
        let (&last, rest) = self.0.split_last()?;
        Some((BlockPath(rest.to_vec()), last))
    }

    pub fn starts_with(&self, other: &BlockPath) -> bool {
        self.0.len() >= other.0.len() && self.0[..other.0.len()] == other.0[..]
    }
}

/// A caret position: block plus an offset counted in inline units
/// (one unit per grapheme cluster, one unit per atomic inline node).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextPosition {
    pub path: BlockPath,
    pub offset: usize,
}

impl TextPosition {
    pub fn new(path: BlockPath, offset: usize) -> Self {
        Self { path, offset }
    }
}

/// Ephemeral selection; drives the contextual UI, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub anchor: TextPosition,
    pub head: TextPosition,
}

impl Selection {
    pub fn caret(position: TextPosition) -> Self {
        Self {
            anchor: position.clone(),
            head: position,
        }
    }

    pub fn range(anchor: TextPosition, head: TextPosition) -> Self {
        Self { anchor, head }
    }

    pub fn is_empty(&self) -> bool {
        self.anchor == self.head
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandRejected {
    #[error("no block at the target path")]
    PathNotFound,
    #[error("offset outside the block's inline content")]
    OffsetOutOfRange,
    #[error("{child:?} not allowed inside {parent:?}")]
    ContentRule { parent: NodeKind, child: NodeKind },
    #[error("{kind:?} not allowed at the document root")]
    TopLevelRule { kind: NodeKind },
    #[error("block does not carry inline content")]
    NotInlineContent,
    #[error("edit would leave the table without a row or non-rectangular")]
    TableShape,
    #[error("range endpoints are not compatible")]
    IncompatibleRange,
    #[error("node cannot be converted to the requested type")]
    BadConversion,
}

/// Block-type conversions reachable from the UI (set paragraph, toggle
/// heading, flag/unflag clarification, code block).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeConversion {
    Paragraph,
    Heading {
        level: HeadingLevel,
        section_id: Option<String>,
    },
    Clarification,
    CodeBlock,
}

/// Structural edit commands. Everything user input can do to the tree is
/// expressed as one of these and funneled through [`Document::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    InsertBlock { at: BlockPath, block: Block },
    RemoveBlock { at: BlockPath },
    InsertText { at: TextPosition, text: String },
    InsertInline { at: TextPosition, inline: Inline },
    DeleteRange { from: TextPosition, to: TextPosition },
    SetMark { from: TextPosition, to: TextPosition, mark: Mark },
    UnsetMark { from: TextPosition, to: TextPosition, kind: MarkKind },
    ClearFormatting { from: TextPosition, to: TextPosition },
    SetNodeType { path: BlockPath, conversion: NodeConversion },
    SetAlignment { path: BlockPath, align: Option<Alignment> },
    SetTaskChecked { path: BlockPath, checked: bool },
    InsertTableRow { table: BlockPath, at: usize },
    DeleteTableRow { table: BlockPath, at: usize },
    InsertTableColumn { table: BlockPath, at: usize },
    DeleteTableColumn { table: BlockPath, at: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub children: Vec<Block>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_blocks(children: Vec<Block>) -> Self {
        Self { children }
    }

    pub fn block(&self, path: &BlockPath) -> Option<&Block> {
        let (&first, rest) = path.0.split_first()?;
        let mut current = self.children.get(first)?;
        for &index in rest {
            current = current.children()?.get(index)?;
        }
        Some(current)
    }

    pub fn block_mut(&mut self, path: &BlockPath) -> Option<&mut Block> {
        let (&first, rest) = path.0.split_first()?;
        let mut current = self.children.get_mut(first)?;
        for &index in rest {
            current = current.children_mut()?.get_mut(index)?;
        }
        Some(current)
    }

    /// The sibling list a path points into, together with the final index.
    fn sibling_list_mut(&mut self, path: &BlockPath) -> Option<(&mut Vec<Block>, usize)> {
        let (parent, index) = path.parent()?;
        if parent.0.is_empty() {
            return Some((&mut self.children, index));
        }
        let parent_block = self.block_mut(&parent)?;
        Some((parent_block.children_mut()?, index))
    }

    fn parent_kind(&self, path: &BlockPath) -> Option<NodeKind> {
        let (parent, _) = path.parent()?;
        if parent.0.is_empty() {
            None
        } else {
            self.block(&parent).map(Block::kind)
        }
    }

    /// Depth-first walk over every block, containers before their children.
    pub fn walk(&self, visit: &mut impl FnMut(&BlockPath, &Block)) {
        fn recurse(
            blocks: &[Block],
            prefix: &BlockPath,
            visit: &mut impl FnMut(&BlockPath, &Block),
        ) {
            for (index, block) in blocks.iter().enumerate() {
                let path = prefix.child(index);
                visit(&path, block);
                if let Some(children) = block.children() {
                    recurse(children, &path, visit);
                }
            }
        }
        recurse(&self.children, &BlockPath::default(), visit);
    }

    /// Validates the whole tree against the content rules and the table
    /// invariants. The parser runs this on every tree it produces.
    pub fn assert_well_formed(&self) -> Result<(), CommandRejected> {
        fn check(block: &Block) -> Result<(), CommandRejected> {
            if let Some(children) = block.children() {
                for child in children {
                    if !allowed_child(block.kind(), child.kind()) {
                        return Err(CommandRejected::ContentRule {
                            parent: block.kind(),
                            child: child.kind(),
                        });
                    }
                    check(child)?;
                }
            }
            if let Block::Table { children } = block {
                if children.is_empty() {
                    return Err(CommandRejected::TableShape);
                }
                let width = children
                    .first()
                    .and_then(Block::children)
                    .map(<[Block]>::len)
                    .unwrap_or(0);
                if width == 0 {
                    return Err(CommandRejected::TableShape);
                }
                for row in children {
                    let cells = row.children().map(<[Block]>::len).unwrap_or(0);
                    if cells != width {
                        return Err(CommandRejected::TableShape);
                    }
                }
            }
            if let Block::TaskItem { children, .. } = block
                && children.is_empty()
            {
                return Err(CommandRejected::ContentRule {
                    parent: NodeKind::TaskItem,
                    child: NodeKind::TaskItem,
                });
            }
            Ok(())
        }

        for block in &self.children {
            if !allowed_top_level(block.kind()) {
                return Err(CommandRejected::TopLevelRule { kind: block.kind() });
            }
            check(block)?;
        }
        Ok(())
    }

    /// Applies a structural command, validating first so a rejection leaves
    /// the tree untouched. Rejection is a silent no-op for callers: the
    /// inputs come from trusted UI actions, not user-facing forms.
    pub fn apply(&mut self, command: Command) -> Result<(), CommandRejected> {
        match command {
            Command::InsertBlock { at, block } => self.insert(at, block),
            Command::RemoveBlock { at } => self.remove_block(&at),
            Command::InsertText { at, text } => self.insert_text(&at, &text),
            Command::InsertInline { at, inline } => self.insert_inline(&at, inline),
            Command::DeleteRange { from, to } => self.delete_range(&from, &to),
            Command::SetMark { from, to, mark } => self.set_mark(&from, &to, mark),
            Command::UnsetMark { from, to, kind } => self.unset_mark(&from, &to, kind),
            Command::ClearFormatting { from, to } => self.clear_formatting(&from, &to),
            Command::SetNodeType { path, conversion } => self.set_node_type(&path, conversion),
            Command::SetAlignment { path, align } => self.set_alignment(&path, align),
            Command::SetTaskChecked { path, checked } => self.set_task_checked(&path, checked),
            Command::InsertTableRow { table, at } => self.insert_table_row(&table, at),
            Command::DeleteTableRow { table, at } => self.delete_table_row(&table, at),
            Command::InsertTableColumn { table, at } => self.insert_table_column(&table, at),
            Command::DeleteTableColumn { table, at } => self.delete_table_column(&table, at),
        }
    }

    /// Inserts a block so that it ends up at `at` among its siblings.
    pub fn insert(&mut self, at: BlockPath, block: Block) -> Result<(), CommandRejected> {
        let (parent, index) = at.parent().ok_or(CommandRejected::PathNotFound)?;
        let kind = block.kind();
        if parent.0.is_empty() {
            if !allowed_top_level(kind) {
                return Err(CommandRejected::TopLevelRule { kind });
            }
            if index > self.children.len() {
                return Err(CommandRejected::PathNotFound);
            }
            self.children.insert(index, block);
            return Ok(());
        }
        let parent_kind = self
            .block(&parent)
            .map(Block::kind)
            .ok_or(CommandRejected::PathNotFound)?;
        if !allowed_child(parent_kind, kind) {
            return Err(CommandRejected::ContentRule {
                parent: parent_kind,
                child: kind,
            });
        }
        // Rows and cells are managed by the table commands, which keep the
        // rectangularity invariant; direct insertion would break it.
        if matches!(kind, NodeKind::TableRow | NodeKind::TableCell) {
            return Err(CommandRejected::TableShape);
        }
        let siblings = self
            .block_mut(&parent)
            .and_then(Block::children_mut)
            .ok_or(CommandRejected::PathNotFound)?;
        if index > siblings.len() {
            return Err(CommandRejected::PathNotFound);
        }
        siblings.insert(index, block);
        Ok(())
    }

    fn remove_block(&mut self, at: &BlockPath) -> Result<(), CommandRejected> {
        if self.block(at).is_none() {
            return Err(CommandRejected::PathNotFound);
        }
        let kind = self.block(at).map(Block::kind).unwrap_or(NodeKind::Paragraph);
        if matches!(kind, NodeKind::TableRow | NodeKind::TableCell) {
            return Err(CommandRejected::TableShape);
        }
        let (siblings, index) = self
            .sibling_list_mut(at)
            .ok_or(CommandRejected::PathNotFound)?;
        siblings.remove(index);
        Ok(())
    }

    pub fn insert_text(&mut self, at: &TextPosition, text: &str) -> Result<(), CommandRejected> {
        let block = self.block(&at.path).ok_or(CommandRejected::PathNotFound)?;
        let content = block.inline().ok_or(CommandRejected::NotInlineContent)?;
        if at.offset > inline_len(content) {
            return Err(CommandRejected::OffsetOutOfRange);
        }
        let content = self
            .block_mut(&at.path)
            .and_then(Block::inline_mut)
            .ok_or(CommandRejected::NotInlineContent)?;
        splice_text(content, at.offset, text);
        Ok(())
    }

    pub fn insert_inline(&mut self, at: &TextPosition, inline: Inline) -> Result<(), CommandRejected> {
        let block = self.block(&at.path).ok_or(CommandRejected::PathNotFound)?;
        let content = block.inline().ok_or(CommandRejected::NotInlineContent)?;
        if at.offset > inline_len(content) {
            return Err(CommandRejected::OffsetOutOfRange);
        }
        let content = self
            .block_mut(&at.path)
            .and_then(Block::inline_mut)
            .ok_or(CommandRejected::NotInlineContent)?;
        splice_inline(content, at.offset, inline);
        Ok(())
    }

    /// Deletes the inline units between two positions. Within one block
    /// this trims text runs at grapheme boundaries and removes any atomic
    /// node whose single unit falls in the range. Across sibling blocks
    /// with inline content, interior blocks are removed and the trailing
    /// remainder merges into the leading block.
    pub fn delete_range(
        &mut self,
        from: &TextPosition,
        to: &TextPosition,
    ) -> Result<(), CommandRejected> {
        let (from, to) = order_positions(from, to);
        self.check_inline_position(&from)?;
        self.check_inline_position(&to)?;

        if from.path == to.path {
            let content = self
                .block_mut(&from.path)
                .and_then(Block::inline_mut)
                .ok_or(CommandRejected::NotInlineContent)?;
            delete_inline_range(content, from.offset, to.offset);
            return Ok(());
        }

        let (from_parent, from_index) = from.path.parent().ok_or(CommandRejected::PathNotFound)?;
        let (to_parent, to_index) = to.path.parent().ok_or(CommandRejected::PathNotFound)?;
        if from_parent != to_parent || to_index <= from_index {
            return Err(CommandRejected::IncompatibleRange);
        }

        // Trailing remainder of the end block, to be merged into the start.
        let tail: Vec<Inline> = {
            let content = self
                .block(&to.path)
                .and_then(Block::inline)
                .ok_or(CommandRejected::NotInlineContent)?;
            slice_inline(content, to.offset, inline_len(content))
        };

        {
            let content = self
                .block_mut(&from.path)
                .and_then(Block::inline_mut)
                .ok_or(CommandRejected::NotInlineContent)?;
            let len = inline_len(content);
            delete_inline_range(content, from.offset, len);
            for node in tail {
                content.push(node);
            }
            merge_adjacent_runs(content);
        }

        let (siblings, _) = self
            .sibling_list_mut(&from.path)
            .ok_or(CommandRejected::PathNotFound)?;
        siblings.drain(from_index + 1..=to_index);
        Ok(())
    }

    pub fn set_mark(
        &mut self,
        from: &TextPosition,
        to: &TextPosition,
        mark: Mark,
    ) -> Result<(), CommandRejected> {
        self.with_inline_range(from, to, |content, start, end| {
            apply_mark_range(content, start, end, Some(mark.clone()), None);
        })
    }

    pub fn unset_mark(
        &mut self,
        from: &TextPosition,
        to: &TextPosition,
        kind: MarkKind,
    ) -> Result<(), CommandRejected> {
        self.with_inline_range(from, to, |content, start, end| {
            apply_mark_range(content, start, end, None, Some(kind));
        })
    }

    pub fn clear_formatting(
        &mut self,
        from: &TextPosition,
        to: &TextPosition,
    ) -> Result<(), CommandRejected> {
        self.with_inline_range(from, to, |content, start, end| {
            clear_marks_range(content, start, end);
        })
    }

    /// Plain text between two positions; blocks are joined with a single
    /// space, and atomic markers contribute nothing.
    pub fn get_text(&self, from: &TextPosition, to: &TextPosition) -> Option<String> {
        let (from, to) = order_positions(from, to);
        if from.path == to.path {
            let content = self.block(&from.path)?.inline()?;
            return Some(inline_text_slice(content, from.offset, to.offset));
        }
        let mut pieces = Vec::new();
        let mut in_range = false;
        let mut done = false;
        self.walk(&mut |path, block| {
            if done {
                return;
            }
            if *path == from.path {
                if let Some(content) = block.inline() {
                    pieces.push(inline_text_slice(content, from.offset, inline_len(content)));
                }
                in_range = true;
            } else if *path == to.path {
                if let Some(content) = block.inline() {
                    pieces.push(inline_text_slice(content, 0, to.offset));
                }
                done = true;
            } else if in_range {
                if let Some(content) = block.inline() {
                    pieces.push(inline_text_slice(content, 0, inline_len(content)));
                }
            }
        });
        done.then(|| pieces.join(" "))
    }

    /// Converts a block between the inline-carrying types. Content and, for
    /// headings, the section id survive the conversion.
    pub fn set_node_type(
        &mut self,
        path: &BlockPath,
        conversion: NodeConversion,
    ) -> Result<(), CommandRejected> {
        let block = self.block(path).ok_or(CommandRejected::PathNotFound)?;
        let convertible = matches!(
            block.kind(),
            NodeKind::Paragraph | NodeKind::Heading | NodeKind::Clarification | NodeKind::CodeBlock
        );
        if !convertible {
            return Err(CommandRejected::BadConversion);
        }
        let replacement_kind = match conversion {
            NodeConversion::Paragraph => NodeKind::Paragraph,
            NodeConversion::Heading { .. } => NodeKind::Heading,
            NodeConversion::Clarification => NodeKind::Clarification,
            NodeConversion::CodeBlock => NodeKind::CodeBlock,
        };
        match self.parent_kind(path) {
            None => {
                if !allowed_top_level(replacement_kind) {
                    return Err(CommandRejected::TopLevelRule {
                        kind: replacement_kind,
                    });
                }
            }
            Some(parent) => {
                if !allowed_child(parent, replacement_kind) {
                    return Err(CommandRejected::ContentRule {
                        parent,
                        child: replacement_kind,
                    });
                }
            }
        }

        let block = self.block_mut(path).ok_or(CommandRejected::PathNotFound)?;
        let (content, align, old_section_id) = match block {
            Block::Paragraph { content, align } => (std::mem::take(content), *align, None),
            Block::Heading {
                content,
                align,
                section_id,
                ..
            } => (
                std::mem::take(content),
                *align,
                Some(std::mem::take(section_id)),
            ),
            Block::Clarification { content } => (std::mem::take(content), None, None),
            Block::CodeBlock { text } => (
                vec![Inline::text(std::mem::take(text))],
                None,
                None,
            ),
            _ => unreachable!("convertibility checked above"),
        };

        *block = match conversion {
            NodeConversion::Paragraph => Block::Paragraph { content, align },
            NodeConversion::Heading { level, section_id } => Block::Heading {
                level,
                section_id: section_id
                    .or(old_section_id)
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(fresh_section_id),
                content,
                align,
            },
            NodeConversion::Clarification => Block::Clarification { content },
            NodeConversion::CodeBlock => {
                let mut text = String::new();
                for node in &content {
                    if let Inline::Text { text: run, .. } = node {
                        text.push_str(run);
                    }
                }
                Block::CodeBlock { text }
            }
        };
        Ok(())
    }

    pub fn set_alignment(
        &mut self,
        path: &BlockPath,
        align: Option<Alignment>,
    ) -> Result<(), CommandRejected> {
        match self.block_mut(path) {
            Some(Block::Paragraph { align: slot, .. })
            | Some(Block::Heading { align: slot, .. }) => {
                *slot = align;
                Ok(())
            }
            Some(_) => Err(CommandRejected::BadConversion),
            None => Err(CommandRejected::PathNotFound),
        }
    }

    pub fn set_task_checked(
        &mut self,
        path: &BlockPath,
        checked: bool,
    ) -> Result<(), CommandRejected> {
        match self.block_mut(path) {
            Some(Block::TaskItem { checked: slot, .. }) => {
                *slot = checked;
                Ok(())
            }
            Some(_) => Err(CommandRejected::BadConversion),
            None => Err(CommandRejected::PathNotFound),
        }
    }

    fn table_children_mut(&mut self, table: &BlockPath) -> Result<&mut Vec<Block>, CommandRejected> {
        match self.block_mut(table) {
            Some(Block::Table { children }) => Ok(children),
            Some(_) => Err(CommandRejected::BadConversion),
            None => Err(CommandRejected::PathNotFound),
        }
    }

    fn table_width(&self, table: &BlockPath) -> Result<usize, CommandRejected> {
        match self.block(table) {
            Some(Block::Table { children }) => Ok(children
                .first()
                .and_then(Block::children)
                .map(<[Block]>::len)
                .unwrap_or(0)),
            Some(_) => Err(CommandRejected::BadConversion),
            None => Err(CommandRejected::PathNotFound),
        }
    }

    pub fn insert_table_row(&mut self, table: &BlockPath, at: usize) -> Result<(), CommandRejected> {
        let width = self.table_width(table)?;
        let rows = self.table_children_mut(table)?;
        if at > rows.len() {
            return Err(CommandRejected::OffsetOutOfRange);
        }
        let cells = (0..width)
            .map(|_| Block::TableCell {
                header: false,
                children: vec![Block::empty_paragraph()],
            })
            .collect();
        rows.insert(at, Block::TableRow { children: cells });
        Ok(())
    }

    pub fn delete_table_row(&mut self, table: &BlockPath, at: usize) -> Result<(), CommandRejected> {
        let rows = self.table_children_mut(table)?;
        if at >= rows.len() {
            return Err(CommandRejected::OffsetOutOfRange);
        }
        // A table keeps at least one row.
        if rows.len() == 1 {
            return Err(CommandRejected::TableShape);
        }
        rows.remove(at);
        Ok(())
    }

    pub fn insert_table_column(
        &mut self,
        table: &BlockPath,
        at: usize,
    ) -> Result<(), CommandRejected> {
        let width = self.table_width(table)?;
        if at > width {
            return Err(CommandRejected::OffsetOutOfRange);
        }
        let rows = self.table_children_mut(table)?;
        for (row_index, row) in rows.iter_mut().enumerate() {
            if let Some(cells) = row.children_mut() {
                let header = row_index == 0 && cells.iter().all(is_header_cell);
                cells.insert(
                    at,
                    Block::TableCell {
                        header,
                        children: vec![Block::empty_paragraph()],
                    },
                );
            }
        }
        Ok(())
    }

    pub fn delete_table_column(
        &mut self,
        table: &BlockPath,
        at: usize,
    ) -> Result<(), CommandRejected> {
        let width = self.table_width(table)?;
        if at >= width {
            return Err(CommandRejected::OffsetOutOfRange);
        }
        if width == 1 {
            return Err(CommandRejected::TableShape);
        }
        let rows = self.table_children_mut(table)?;
        for row in rows.iter_mut() {
            if let Some(cells) = row.children_mut() {
                cells.remove(at);
            }
        }
        Ok(())
    }

    fn check_inline_position(&self, position: &TextPosition) -> Result<(), CommandRejected> {
        let block = self
            .block(&position.path)
            .ok_or(CommandRejected::PathNotFound)?;
        let content = block.inline().ok_or(CommandRejected::NotInlineContent)?;
        if position.offset > inline_len(content) {
            return Err(CommandRejected::OffsetOutOfRange);
        }
        Ok(())
    }

    /// Runs `edit` over every (content, start, end) inline span covered by
    /// the range, validating all endpoints before mutating anything.
    fn with_inline_range(
        &mut self,
        from: &TextPosition,
        to: &TextPosition,
        mut edit: impl FnMut(&mut Vec<Inline>, usize, usize),
    ) -> Result<(), CommandRejected> {
        let (from, to) = order_positions(from, to);
        self.check_inline_position(&from)?;
        self.check_inline_position(&to)?;
        if from.path == to.path {
            let content = self
                .block_mut(&from.path)
                .and_then(Block::inline_mut)
                .ok_or(CommandRejected::NotInlineContent)?;
            edit(content, from.offset, to.offset);
            return Ok(());
        }

        // Multi-block: collect the covered inline blocks first, then edit.
        let mut covered: Vec<(BlockPath, usize, Option<usize>)> = Vec::new();
        let mut in_range = false;
        let mut found_end = false;
        self.walk(&mut |path, block| {
            if found_end {
                return;
            }
            if *path == from.path {
                covered.push((path.clone(), from.offset, None));
                in_range = true;
            } else if *path == to.path {
                covered.push((path.clone(), 0, Some(to.offset)));
                found_end = true;
            } else if in_range && block.inline().is_some() {
                covered.push((path.clone(), 0, None));
            }
        });
        if !found_end {
            return Err(CommandRejected::IncompatibleRange);
        }
        for (path, start, end) in covered {
            let content = self
                .block_mut(&path)
                .and_then(Block::inline_mut)
                .ok_or(CommandRejected::NotInlineContent)?;
            let end = end.unwrap_or_else(|| inline_len(content));
            edit(content, start, end);
        }
        Ok(())
    }
}

fn is_header_cell(block: &Block) -> bool {
    matches!(block, Block::TableCell { header: true, .. })
}

fn order_positions(a: &TextPosition, b: &TextPosition) -> (TextPosition, TextPosition) {
    if (&b.path, b.offset) < (&a.path, a.offset) {
        (b.clone(), a.clone())
    } else {
        (a.clone(), b.clone())
    }
}

/// Total width of an inline sequence in selection units.
pub fn inline_len(content: &[Inline]) -> usize {
    content.iter().map(Inline::width).sum()
}

/// Marks present at (just before) `offset`, the caret-head rule the format
/// painter captures with.
pub fn marks_at(content: &[Inline], offset: usize) -> MarkSet {
    let mut cursor = 0usize;
    for node in content {
        let width = node.width();
        if offset <= cursor + width && offset > cursor {
            if let Inline::Text { marks, .. } = node {
                return marks.clone();
            }
            return MarkSet::new();
        }
        cursor += width;
    }
    MarkSet::new()
}

fn grapheme_byte_offset(text: &str, graphemes: usize) -> usize {
    if graphemes == 0 {
        return 0;
    }
    let mut seen = 0;
    for (byte_index, _) in text.grapheme_indices(true) {
        if seen == graphemes {
            return byte_index;
        }
        seen += 1;
    }
    text.len()
}

fn splice_text(content: &mut Vec<Inline>, offset: usize, new_text: &str) {
    let mut cursor = 0usize;
    for index in 0..content.len() {
        let width = content[index].width();
        if let Inline::Text { text, .. } = &mut content[index] {
            // A boundary between two runs belongs to the earlier one, so
            // the insertion keeps its marks.
            if offset >= cursor && offset <= cursor + width {
                let byte = grapheme_byte_offset(text, offset - cursor);
                text.insert_str(byte, new_text);
                return;
            }
        } else if offset == cursor {
            content.insert(index, Inline::text(new_text));
            return;
        }
        cursor += width;
    }
    content.push(Inline::text(new_text));
}

fn splice_inline(content: &mut Vec<Inline>, offset: usize, inline: Inline) {
    let mut cursor = 0usize;
    for index in 0..content.len() {
        let width = content[index].width();
        if offset == cursor {
            content.insert(index, inline);
            return;
        }
        if offset < cursor + width {
            // Split a text run around the insertion point.
            if let Inline::Text { text, marks } = content[index].clone() {
                let byte = grapheme_byte_offset(&text, offset - cursor);
                let (left, right) = text.split_at(byte);
                content[index] = Inline::styled(left, marks.clone());
                content.insert(index + 1, inline);
                content.insert(index + 2, Inline::styled(right, marks));
            }
            return;
        }
        cursor += width;
    }
    content.push(inline);
}

/// Copies the inline nodes covering `[from, to)`, trimming text runs at
/// grapheme boundaries and keeping atomic nodes whole.
fn slice_inline(content: &[Inline], from: usize, to: usize) -> Vec<Inline> {
    let mut out = Vec::new();
    let mut cursor = 0usize;
    for node in content {
        let width = node.width();
        let start = cursor;
        let end = cursor + width;
        cursor = end;
        if end <= from || start >= to {
            continue;
        }
        match node {
            Inline::Text { text, marks } => {
                let keep_from = from.saturating_sub(start);
                let keep_to = (to - start).min(width);
                let byte_from = grapheme_byte_offset(text, keep_from);
                let byte_to = grapheme_byte_offset(text, keep_to);
                if byte_from < byte_to {
                    out.push(Inline::styled(&text[byte_from..byte_to], marks.clone()));
                }
            }
            other => out.push(other.clone()),
        }
    }
    out
}

fn inline_text_slice(content: &[Inline], from: usize, to: usize) -> String {
    slice_inline(content, from, to)
        .into_iter()
        .filter_map(|node| match node {
            Inline::Text { text, .. } => Some(text),
            _ => None,
        })
        .collect()
}

fn delete_inline_range(content: &mut Vec<Inline>, from: usize, to: usize) {
    if from >= to {
        return;
    }
    let mut replacement = slice_inline(content, 0, from);
    replacement.extend(slice_inline(content, to, inline_len(content)));
    *content = replacement;
    merge_adjacent_runs(content);
}

/// Splits runs at the range boundaries, then adds or removes a mark on
/// every covered text run. Atomic nodes are unaffected.
fn apply_mark_range(
    content: &mut Vec<Inline>,
    from: usize,
    to: usize,
    add: Option<Mark>,
    remove: Option<MarkKind>,
) {
    if from >= to {
        return;
    }
    let len = inline_len(content);
    let mut rebuilt = slice_inline(content, 0, from);
    let mut middle = slice_inline(content, from, to);
    for node in &mut middle {
        if let Inline::Text { marks, .. } = node {
            if let Some(mark) = &add {
                marks.add(mark.clone());
            }
            if let Some(kind) = remove {
                marks.remove(kind);
            }
        }
    }
    rebuilt.extend(middle);
    rebuilt.extend(slice_inline(content, to, len));
    *content = rebuilt;
    merge_adjacent_runs(content);
}

fn clear_marks_range(content: &mut Vec<Inline>, from: usize, to: usize) {
    if from >= to {
        return;
    }
    let len = inline_len(content);
    let mut rebuilt = slice_inline(content, 0, from);
    let mut middle = slice_inline(content, from, to);
    for node in &mut middle {
        if let Inline::Text { marks, .. } = node {
            *marks = MarkSet::new();
        }
    }
    rebuilt.extend(middle);
    rebuilt.extend(slice_inline(content, to, len));
    *content = rebuilt;
    merge_adjacent_runs(content);
}

/// Joins neighbouring text runs that carry identical mark sets.
pub fn merge_adjacent_runs(content: &mut Vec<Inline>) {
    let mut index = 0;
    while index + 1 < content.len() {
        let merge = matches!(
            (&content[index], &content[index + 1]),
            (Inline::Text { marks: a, .. }, Inline::Text { marks: b, .. }) if a == b
        );
        if merge {
            if let Inline::Text { text, .. } = content.remove(index + 1)
                && let Inline::Text { text: target, .. } = &mut content[index]
            {
                target.push_str(&text);
            }
        } else {
            index += 1;
        }
    }
    content.retain(|node| !matches!(node, Inline::Text { text, .. } if text.is_empty()));
}

fn fresh_section_id() -> String {
    format!("heading-{}", Uuid::new_v4().simple())
}

/// Authoring-boundary repair: gives every heading a non-empty section id
/// that is unique within the document. Existing unique ids are kept.
pub fn ensure_section_ids(document: &mut Document) {
    fn visit(blocks: &mut [Block], seen: &mut std::collections::HashSet<String>) {
        for block in blocks {
            if let Block::Heading { section_id, .. } = block {
                if section_id.is_empty() || !seen.insert(section_id.clone()) {
                    let fresh = fresh_section_id();
                    seen.insert(fresh.clone());
                    *section_id = fresh;
                }
            } else if let Some(children) = block.children_mut() {
                visit(children, seen);
            }
        }
    }
    let mut seen = std::collections::HashSet::new();
    visit(&mut document.children, &mut seen);
}

/// Convenience constructor for the 3x3 table the insert palette creates.
pub fn new_table(rows: usize, cols: usize, with_header_row: bool) -> Block {
    let rows = rows.max(1);
    let cols = cols.max(1);
    let children = (0..rows)
        .map(|row_index| Block::TableRow {
            children: (0..cols)
                .map(|_| Block::TableCell {
                    header: with_header_row && row_index == 0,
                    children: vec![Block::empty_paragraph()],
                })
                .collect(),
        })
        .collect();
    Block::Table { children }
}
