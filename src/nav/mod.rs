//! Section navigation: locate a heading by section id and track the
//! transient arrival highlight.

use crate::model::{Block, BlockPath, Document};

pub const HIGHLIGHT_MS: u64 = 2000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NavigationError {
    #[error("no heading carries section id {0:?}")]
    SectionNotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Highlight {
    pub path: BlockPath,
    pub until_ms: u64,
}

#[derive(Debug, Default)]
pub struct Navigator {
    highlight: Option<Highlight>,
}

impl Navigator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finds the first heading (document order) carrying `section_id` and
    /// arms the arrival highlight. A missing id is a logged no-op for the
    /// document; the caller decides whether to surface the error.
    pub fn navigate_to(
        &mut self,
        section_id: &str,
        document: &Document,
        now_ms: u64,
    ) -> Result<BlockPath, NavigationError> {
        let Some(path) = find_section(document, section_id) else {
            tracing::warn!(section_id, "navigation target not found");
            return Err(NavigationError::SectionNotFound(section_id.to_string()));
        };
        self.highlight = Some(Highlight {
            path: path.clone(),
            until_ms: now_ms.saturating_add(HIGHLIGHT_MS),
        });
        Ok(path)
    }

    /// The block currently highlighted, if the 2 s window is still open.
    /// Expiry clears the stored state.
    pub fn active_highlight(&mut self, now_ms: u64) -> Option<&Highlight> {
        if let Some(highlight) = &self.highlight
            && now_ms >= highlight.until_ms
        {
            self.highlight = None;
        }
        self.highlight.as_ref()
    }

    /// Loading another version invalidates any pending highlight.
    pub fn reset(&mut self) {
        self.highlight = None;
    }
}

/// First heading with the given id, in document order.
pub fn find_section(document: &Document, section_id: &str) -> Option<BlockPath> {
    let mut found = None;
    document.walk(&mut |path, block| {
        if found.is_some() {
            return;
        }
        if let Block::Heading { section_id: id, .. } = block
            && id == section_id
        {
            found = Some(path.clone());
        }
    });
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HeadingLevel, Inline};

    fn doc() -> Document {
        Document::from_blocks(vec![
            Block::paragraph(vec![Inline::text("intro")]),
            Block::heading(HeadingLevel::H1, "overview", vec![Inline::text("Overview")]),
            Block::heading(HeadingLevel::H2, "dup", vec![Inline::text("First dup")]),
            Block::heading(HeadingLevel::H2, "dup", vec![Inline::text("Second dup")]),
        ])
    }

    #[test]
    fn test_navigate_finds_heading() {
        let mut nav = Navigator::new();
        let path = nav.navigate_to("overview", &doc(), 0).unwrap();
        assert_eq!(path, BlockPath(vec![1]));
    }

    #[test]
    fn test_duplicate_id_resolves_to_first_match() {
        let mut nav = Navigator::new();
        let path = nav.navigate_to("dup", &doc(), 0).unwrap();
        assert_eq!(path, BlockPath(vec![2]));
    }

    #[test]
    fn test_missing_section_is_error() {
        let mut nav = Navigator::new();
        assert_eq!(
            nav.navigate_to("ghost", &doc(), 0),
            Err(NavigationError::SectionNotFound("ghost".to_string()))
        );
        assert!(nav.active_highlight(0).is_none());
    }

    #[test]
    fn test_highlight_expires_after_two_seconds() {
        let mut nav = Navigator::new();
        nav.navigate_to("overview", &doc(), 10_000).unwrap();
        assert!(nav.active_highlight(10_000).is_some());
        assert!(nav.active_highlight(11_999).is_some());
        assert!(nav.active_highlight(12_000).is_none());
        // And it stays cleared.
        assert!(nav.active_highlight(10_500).is_none());
    }
}
