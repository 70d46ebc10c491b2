//! Derived heading outline.
//!
//! The outline is recomputed from scratch after every mutation; it is a
//! pure function of the tree and carries no state of its own.

use serde::{Deserialize, Serialize};

use crate::model::{Block, BlockPath, Document, HeadingLevel};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineItem {
    pub section_id: String,
    pub title: String,
    pub level: HeadingLevel,
    pub path: BlockPath,
    pub children: Vec<OutlineItem>,
}

/// Builds the nested outline with a stack of open items: a new heading
/// pops every open item at its level or deeper, then attaches to the
/// remaining top (or the root when the stack empties). Headings inside
/// containers are visited in document order like any other block.
pub fn extract(document: &Document) -> Vec<OutlineItem> {
    let mut roots: Vec<OutlineItem> = Vec::new();
    // (level, position in the tree being built)
    let mut stack: Vec<(HeadingLevel, Vec<usize>)> = Vec::new();
    let mut heading_index = 0usize;

    document.walk(&mut |path, block| {
        let Block::Heading {
            level, section_id, ..
        } = block
        else {
            return;
        };
        let item = OutlineItem {
            section_id: if section_id.is_empty() {
                // Fallback id for headings that never went through the
                // authoring boundary.
                format!("heading-{heading_index}")
            } else {
                section_id.clone()
            },
            title: block.inline_text(),
            level: *level,
            path: path.clone(),
            children: Vec::new(),
        };
        heading_index += 1;

        while let Some((open_level, _)) = stack.last() {
            if *open_level >= *level {
                stack.pop();
            } else {
                break;
            }
        }

        let slot = match stack.last() {
            None => {
                roots.push(item);
                vec![roots.len() - 1]
            }
            Some((_, parent_slot)) => {
                let parent = item_at_mut(&mut roots, parent_slot);
                parent.children.push(item);
                let mut slot = parent_slot.clone();
                slot.push(parent.children.len() - 1);
                slot
            }
        };
        stack.push((*level, slot));
    });
    roots
}

fn item_at_mut<'a>(roots: &'a mut Vec<OutlineItem>, slot: &[usize]) -> &'a mut OutlineItem {
    let (&first, rest) = slot
        .split_first()
        .unwrap_or_else(|| unreachable!("outline slots are never empty"));
    let mut item = &mut roots[first];
    for &index in rest {
        item = &mut item.children[index];
    }
    item
}

/// Flattened document-order view, handy for the CLI listing.
pub fn flatten(items: &[OutlineItem]) -> Vec<&OutlineItem> {
    let mut out = Vec::new();
    fn visit<'a>(items: &'a [OutlineItem], out: &mut Vec<&'a OutlineItem>) {
        for item in items {
            out.push(item);
            visit(&item.children, out);
        }
    }
    visit(items, &mut out);
    out
}
