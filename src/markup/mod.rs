//! Tag-based markup codec: serializer, strict parser, and token-level
//! repair (`sanitize`).
//!
//! The parser is strict about closure and disallowed content but tolerant
//! of unknown tags, which it treats as transparent wrappers. `sanitize`
//! repairs what the parser rejects: it strips script-like content, closes
//! unclosed tags, and normalizes block nesting. The editor's recovery
//! ladder is `parse(text)`, then `parse(sanitize(text))`, then keep the
//! previous tree.

use crate::model::{
    Alignment, Block, Document, HeadingLevel, Inline, Mark, MarkSet, merge_adjacent_runs,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarkupError {
    #[error("unclosed tag <{0}>")]
    UnclosedTag(String),
    #[error("unexpected closing tag </{0}>")]
    UnexpectedClose(String),
    #[error("disallowed tag <{0}>")]
    DisallowedTag(String),
    #[error("disallowed attribute {0}")]
    DisallowedAttribute(String),
    #[error("parsed tree violates content rules: {0}")]
    MalformedStructure(String),
}

// ---------------------------------------------------------------------------
// Serializer

/// Renders the tree to markup text, one top-level block per line.
pub fn serialize(document: &Document) -> String {
    let mut lines = Vec::with_capacity(document.children.len());
    for block in &document.children {
        let mut out = String::new();
        serialize_block(block, &mut out);
        lines.push(out);
    }
    lines.join("\n")
}

fn serialize_block(block: &Block, out: &mut String) {
    match block {
        Block::Paragraph { content, align } => {
            out.push_str("<p");
            push_align(*align, out);
            out.push('>');
            serialize_inline(content, out);
            out.push_str("</p>");
        }
        Block::Clarification { content } => {
            out.push_str("<p class=\"clarification-paragraph\">");
            serialize_inline(content, out);
            out.push_str("</p>");
        }
        Block::Heading {
            level,
            section_id,
            content,
            align,
        } => {
            let level = level.get();
            out.push_str(&format!(
                "<h{level} data-section-id=\"{}\"",
                escape_attr(section_id)
            ));
            push_align(*align, out);
            out.push('>');
            serialize_inline(content, out);
            out.push_str(&format!("</h{level}>"));
        }
        Block::BulletList { children } => wrap_children("ul", children, out),
        Block::OrderedList { children } => wrap_children("ol", children, out),
        Block::ListItem { children } => wrap_children("li", children, out),
        Block::TaskList { children } => {
            out.push_str("<ul data-type=\"taskList\">");
            for child in children {
                serialize_block(child, out);
            }
            out.push_str("</ul>");
        }
        Block::TaskItem { checked, children } => {
            out.push_str(&format!("<li data-checked=\"{checked}\">"));
            for child in children {
                serialize_block(child, out);
            }
            out.push_str("</li>");
        }
        Block::Table { children } => wrap_children("table", children, out),
        Block::TableRow { children } => wrap_children("tr", children, out),
        Block::TableCell { header, children } => {
            let tag = if *header { "th" } else { "td" };
            out.push_str(&format!("<{tag}>"));
            for child in children {
                serialize_block(child, out);
            }
            out.push_str(&format!("</{tag}>"));
        }
        Block::Blockquote { children } => wrap_children("blockquote", children, out),
        Block::CodeBlock { text } => {
            out.push_str("<pre><code>");
            out.push_str(&escape_text(text));
            out.push_str("</code></pre>");
        }
        Block::HorizontalRule => out.push_str("<hr>"),
        Block::ImagePlaceholder => {
            out.push_str("<div data-type=\"image-placeholder\"></div>");
        }
    }
}

fn wrap_children(tag: &str, children: &[Block], out: &mut String) {
    out.push_str(&format!("<{tag}>"));
    for child in children {
        serialize_block(child, out);
    }
    out.push_str(&format!("</{tag}>"));
}

fn push_align(align: Option<Alignment>, out: &mut String) {
    if let Some(align) = align {
        out.push_str(&format!(" style=\"text-align: {}\"", align.as_str()));
    }
}

fn serialize_inline(content: &[Inline], out: &mut String) {
    for node in content {
        match node {
            Inline::Text { text, marks } => {
                let mut close_stack = Vec::new();
                for mark in marks.iter() {
                    match mark {
                        Mark::Bold => {
                            out.push_str("<strong>");
                            close_stack.push("</strong>".to_string());
                        }
                        Mark::Italic => {
                            out.push_str("<em>");
                            close_stack.push("</em>".to_string());
                        }
                        Mark::Underline => {
                            out.push_str("<u>");
                            close_stack.push("</u>".to_string());
                        }
                        Mark::Strike => {
                            out.push_str("<s>");
                            close_stack.push("</s>".to_string());
                        }
                        Mark::Superscript => {
                            out.push_str("<sup>");
                            close_stack.push("</sup>".to_string());
                        }
                        Mark::Subscript => {
                            out.push_str("<sub>");
                            close_stack.push("</sub>".to_string());
                        }
                        Mark::TextColor { value } => {
                            out.push_str(&format!(
                                "<span style=\"color: {}\">",
                                escape_attr(value)
                            ));
                            close_stack.push("</span>".to_string());
                        }
                        Mark::Highlight { value } => {
                            out.push_str(&format!(
                                "<mark data-color=\"{}\">",
                                escape_attr(value)
                            ));
                            close_stack.push("</mark>".to_string());
                        }
                        Mark::Link { href } => {
                            out.push_str(&format!("<a href=\"{}\">", escape_attr(href)));
                            close_stack.push("</a>".to_string());
                        }
                    }
                }
                out.push_str(&escape_text(text));
                for close in close_stack.into_iter().rev() {
                    out.push_str(&close);
                }
            }
            Inline::Citation { number } => {
                out.push_str(&format!(
                    "<span class=\"citation-component\" data-number=\"{number}\">{number}</span>"
                ));
            }
            Inline::PrototypeRef { id } => {
                out.push_str(&format!(
                    "<span class=\"prototype-reference\" data-id=\"{}\">原型</span>",
                    escape_attr(id)
                ));
            }
        }
    }
}

fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

fn escape_attr(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        let replaced = [
            ("&amp;", "&"),
            ("&lt;", "<"),
            ("&gt;", ">"),
            ("&quot;", "\""),
            ("&#39;", "'"),
            ("&nbsp;", " "),
        ]
        .iter()
        .find(|(entity, _)| rest.starts_with(entity));
        match replaced {
            Some((entity, value)) => {
                out.push_str(value);
                rest = &rest[entity.len()..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

// ---------------------------------------------------------------------------
// Tokenizer

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open {
        name: String,
        attrs: Vec<(String, String)>,
    },
    Close {
        name: String,
    },
    Text(String),
}

const VOID_TAGS: &[&str] = &["hr", "br", "img", "input", "meta", "col"];

fn is_void(name: &str) -> bool {
    VOID_TAGS.contains(&name)
}

/// Scans markup into a token stream. A `<` that does not begin a
/// recognizable tag is kept as text, so the tokenizer itself never fails.
fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut text = String::new();
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'<' {
            if let Some((token, consumed)) = scan_tag(&input[i..]) {
                if !text.is_empty() {
                    tokens.push(Token::Text(std::mem::take(&mut text)));
                }
                tokens.push(token);
                i += consumed;
                continue;
            }
            text.push('<');
            i += 1;
        } else {
            let ch = input[i..].chars().next().unwrap_or('\u{fffd}');
            text.push(ch);
            i += ch.len_utf8();
        }
    }
    if !text.is_empty() {
        tokens.push(Token::Text(text));
    }
    tokens
}

/// Scans one tag starting at `<`. Returns the token and the bytes consumed,
/// or `None` when the text is not a tag.
fn scan_tag(input: &str) -> Option<(Token, usize)> {
    let end = input.find('>')?;
    let inner = &input[1..end];
    let consumed = end + 1;

    if let Some(name) = inner.strip_prefix('/') {
        let name = name.trim().to_ascii_lowercase();
        if name.is_empty() || !name.chars().all(|ch| ch.is_ascii_alphanumeric()) {
            return None;
        }
        return Some((Token::Close { name }, consumed));
    }

    // Comments and processing instructions are dropped entirely.
    if inner.starts_with('!') || inner.starts_with('?') {
        return Some((Token::Text(String::new()), consumed));
    }

    let inner = inner.strip_suffix('/').unwrap_or(inner);
    let mut name_end = inner.len();
    for (index, ch) in inner.char_indices() {
        if ch.is_whitespace() {
            name_end = index;
            break;
        }
        if !ch.is_ascii_alphanumeric() {
            return None;
        }
    }
    let name = inner[..name_end].to_ascii_lowercase();
    if name.is_empty() {
        return None;
    }
    let attrs = scan_attrs(&inner[name_end..]);
    Some((Token::Open { name, attrs }, consumed))
}

fn scan_attrs(mut rest: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            return attrs;
        }
        let name_end = rest
            .find(|ch: char| ch == '=' || ch.is_whitespace())
            .unwrap_or(rest.len());
        let name = rest[..name_end].to_ascii_lowercase();
        rest = rest[name_end..].trim_start();
        if name.is_empty() {
            return attrs;
        }
        let value = if let Some(after_eq) = rest.strip_prefix('=') {
            let after_eq = after_eq.trim_start();
            if let Some(stripped) = after_eq.strip_prefix('"') {
                let close = stripped.find('"').unwrap_or(stripped.len());
                rest = stripped.get(close + 1..).unwrap_or("");
                unescape(&stripped[..close])
            } else if let Some(stripped) = after_eq.strip_prefix('\'') {
                let close = stripped.find('\'').unwrap_or(stripped.len());
                rest = stripped.get(close + 1..).unwrap_or("");
                unescape(&stripped[..close])
            } else {
                let close = after_eq
                    .find(char::is_whitespace)
                    .unwrap_or(after_eq.len());
                rest = &after_eq[close..];
                unescape(&after_eq[..close])
            }
        } else {
            String::new()
        };
        attrs.push((name, value));
    }
}

fn attr<'a>(attrs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

fn has_class(attrs: &[(String, String)], class: &str) -> bool {
    attr(attrs, "class")
        .map(|value| value.split_whitespace().any(|part| part == class))
        .unwrap_or(false)
}

fn style_text_align(attrs: &[(String, String)]) -> Option<Alignment> {
    let style = attr(attrs, "style")?;
    for decl in style.split(';') {
        let mut parts = decl.splitn(2, ':');
        let key = parts.next()?.trim();
        if key == "text-align" {
            return Alignment::from_str(parts.next()?.trim());
        }
    }
    None
}

fn style_color(attrs: &[(String, String)]) -> Option<String> {
    let style = attr(attrs, "style")?;
    for decl in style.split(';') {
        let mut parts = decl.splitn(2, ':');
        if parts.next()?.trim() == "color" {
            return Some(parts.next()?.trim().to_string());
        }
    }
    None
}

const STRIPPED_TAGS: &[&str] = &["script", "style", "iframe", "object", "embed"];

fn is_javascript_href(href: &str) -> bool {
    href.trim_start()
        .to_ascii_lowercase()
        .starts_with("javascript:")
}

// ---------------------------------------------------------------------------
// Parser

struct TokenCursor {
    tokens: Vec<Token>,
    index: usize,
}

impl TokenCursor {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.index).cloned();
        if token.is_some() {
            self.index += 1;
        }
        token
    }
}

/// Parses markup into a document. Strict about closure and disallowed
/// content; unknown but well-formed tags are transparent. The resulting
/// tree always passes the model's content rules.
pub fn parse(input: &str) -> Result<Document, MarkupError> {
    let mut cursor = TokenCursor {
        tokens: tokenize(input),
        index: 0,
    };
    let children = parse_blocks(&mut cursor, None)?;
    if let Some(Token::Close { name }) = cursor.peek() {
        return Err(MarkupError::UnexpectedClose(name.clone()));
    }
    let document = Document::from_blocks(children);
    document
        .assert_well_formed()
        .map_err(|err| MarkupError::MalformedStructure(err.to_string()))?;
    Ok(document)
}

/// Parses a run of blocks until the matching close tag (or end of input
/// when `stop` is `None`). Stray inline content is wrapped in a paragraph.
fn parse_blocks(
    cursor: &mut TokenCursor,
    stop: Option<&str>,
) -> Result<Vec<Block>, MarkupError> {
    let mut blocks = Vec::new();
    let mut pending_inline: Vec<Inline> = Vec::new();

    macro_rules! flush_inline {
        () => {
            if !pending_inline.is_empty() {
                let mut content = std::mem::take(&mut pending_inline);
                merge_adjacent_runs(&mut content);
                if !content.is_empty() {
                    blocks.push(Block::paragraph(content));
                }
            }
        };
    }

    loop {
        match cursor.peek().cloned() {
            None => {
                if let Some(stop) = stop {
                    return Err(MarkupError::UnclosedTag(stop.to_string()));
                }
                flush_inline!();
                return Ok(blocks);
            }
            Some(Token::Close { name }) => {
                if Some(name.as_str()) == stop {
                    cursor.next();
                    flush_inline!();
                    return Ok(blocks);
                }
                // Transparent wrappers close here; anything else is the
                // caller's problem (or a stray close at the top level).
                if stop.is_none() {
                    return Err(MarkupError::UnexpectedClose(name));
                }
                flush_inline!();
                return Ok(blocks);
            }
            Some(Token::Text(text)) => {
                cursor.next();
                let unescaped = unescape(&text);
                if !unescaped.trim().is_empty() {
                    pending_inline.push(Inline::text(unescaped));
                }
            }
            Some(Token::Open { name, attrs }) => {
                if STRIPPED_TAGS.contains(&name.as_str()) {
                    return Err(MarkupError::DisallowedTag(name));
                }
                if attrs.iter().any(|(key, _)| key.starts_with("on")) {
                    return Err(MarkupError::DisallowedAttribute(
                        attrs
                            .iter()
                            .find(|(key, _)| key.starts_with("on"))
                            .map(|(key, _)| key.clone())
                            .unwrap_or_default(),
                    ));
                }
                if let Some(block) = try_parse_block(cursor, &name, &attrs)? {
                    flush_inline!();
                    blocks.push(block);
                } else if is_inline_tag(&name) {
                    parse_inline_run(cursor, &mut pending_inline)?;
                } else {
                    // Unknown tag: transparent. Parse its children in place.
                    cursor.next();
                    flush_inline!();
                    let mut inner = parse_blocks(cursor, Some(&name))?;
                    blocks.append(&mut inner);
                }
            }
        }
    }
}

/// Consumes and parses one block-level element, or returns `Ok(None)`
/// without consuming when the tag at the cursor is not block-level.
fn try_parse_block(
    cursor: &mut TokenCursor,
    name: &str,
    attrs: &[(String, String)],
) -> Result<Option<Block>, MarkupError> {
    let block = match name {
        "p" => {
            cursor.next();
            let content = parse_inline(cursor, "p")?;
            if has_class(attrs, "clarification-paragraph") {
                Block::Clarification { content }
            } else {
                Block::Paragraph {
                    content,
                    align: style_text_align(attrs),
                }
            }
        }
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            cursor.next();
            let digit = name[1..].parse::<u8>().unwrap_or(1);
            // Levels past the outline's depth clamp to the deepest.
            let level = HeadingLevel::new(digit.min(4)).unwrap_or(HeadingLevel::H4);
            let content = parse_inline(cursor, name)?;
            Block::Heading {
                level,
                section_id: attr(attrs, "data-section-id").unwrap_or_default().to_string(),
                content,
                align: style_text_align(attrs),
            }
        }
        "ul" if attr(attrs, "data-type") == Some("taskList") => {
            cursor.next();
            let children = parse_blocks(cursor, Some("ul"))?;
            Block::TaskList {
                children: children.into_iter().map(into_task_item).collect(),
            }
        }
        "ul" | "ol" => {
            cursor.next();
            let children = parse_blocks(cursor, Some(name))?
                .into_iter()
                .map(into_list_item)
                .collect();
            if name == "ul" {
                Block::BulletList { children }
            } else {
                Block::OrderedList { children }
            }
        }
        "li" => {
            cursor.next();
            let children = nonempty_blocks(parse_blocks(cursor, Some("li"))?);
            if let Some(checked) = attr(attrs, "data-checked") {
                Block::TaskItem {
                    checked: checked == "true",
                    children: paragraphs_only(children),
                }
            } else {
                Block::ListItem { children }
            }
        }
        "table" => {
            cursor.next();
            let rows: Vec<Block> = parse_blocks(cursor, Some("table"))?
                .into_iter()
                .filter(|block| matches!(block, Block::TableRow { .. }))
                .collect();
            normalize_table(rows)
        }
        "tr" => {
            cursor.next();
            let cells = parse_blocks(cursor, Some("tr"))?
                .into_iter()
                .filter(|block| matches!(block, Block::TableCell { .. }))
                .collect();
            Block::TableRow { children: cells }
        }
        "td" | "th" => {
            cursor.next();
            Block::TableCell {
                header: name == "th",
                children: nonempty_blocks(parse_blocks(cursor, Some(name))?),
            }
        }
        "blockquote" => {
            cursor.next();
            Block::Blockquote {
                children: parse_blocks(cursor, Some("blockquote"))?,
            }
        }
        "pre" => {
            cursor.next();
            Block::CodeBlock {
                text: parse_code_text(cursor)?,
            }
        }
        "hr" => {
            cursor.next();
            Block::HorizontalRule
        }
        "div" if attr(attrs, "data-type") == Some("image-placeholder") => {
            cursor.next();
            // Placeholder bodies carry no content worth keeping.
            skip_until_close(cursor, "div")?;
            Block::ImagePlaceholder
        }
        _ => return Ok(None),
    };
    Ok(Some(block))
}

fn into_list_item(block: Block) -> Block {
    match block {
        item @ Block::ListItem { .. } => item,
        Block::TaskItem { children, .. } => Block::ListItem { children },
        other => Block::ListItem {
            children: vec![other],
        },
    }
}

fn into_task_item(block: Block) -> Block {
    match block {
        item @ Block::TaskItem { .. } => item,
        Block::ListItem { children } => Block::TaskItem {
            checked: false,
            children: paragraphs_only(children),
        },
        other => Block::TaskItem {
            checked: false,
            children: paragraphs_only(vec![other]),
        },
    }
}

/// Task items hold paragraphs only; anything else degrades to its text.
fn paragraphs_only(blocks: Vec<Block>) -> Vec<Block> {
    let mut out: Vec<Block> = blocks
        .into_iter()
        .map(|block| match block {
            paragraph @ Block::Paragraph { .. } => paragraph,
            other => Block::paragraph(vec![Inline::text(other.inline_text())]),
        })
        .collect();
    if out.is_empty() {
        out.push(Block::empty_paragraph());
    }
    out
}

fn nonempty_blocks(blocks: Vec<Block>) -> Vec<Block> {
    if blocks.is_empty() {
        vec![Block::empty_paragraph()]
    } else {
        blocks
    }
}

/// Pads ragged rows so the table satisfies the rectangularity invariant.
fn normalize_table(mut rows: Vec<Block>) -> Block {
    let width = rows
        .iter()
        .filter_map(Block::children)
        .map(<[Block]>::len)
        .max()
        .unwrap_or(0)
        .max(1);
    if rows.is_empty() {
        rows.push(Block::TableRow { children: vec![] });
    }
    for row in &mut rows {
        if let Some(cells) = row.children_mut() {
            while cells.len() < width {
                cells.push(Block::TableCell {
                    header: false,
                    children: vec![Block::empty_paragraph()],
                });
            }
        }
    }
    Block::Table { children: rows }
}

fn parse_code_text(cursor: &mut TokenCursor) -> Result<String, MarkupError> {
    let mut text = String::new();
    let mut saw_code = false;
    loop {
        match cursor.next() {
            None => return Err(MarkupError::UnclosedTag("pre".to_string())),
            Some(Token::Text(chunk)) => text.push_str(&unescape(&chunk)),
            Some(Token::Open { name, .. }) if name == "code" => saw_code = true,
            Some(Token::Close { name }) if name == "code" && saw_code => {}
            Some(Token::Close { name }) if name == "pre" => return Ok(text),
            Some(Token::Open { name, .. }) => {
                return Err(MarkupError::DisallowedTag(name));
            }
            Some(Token::Close { name }) => {
                return Err(MarkupError::UnexpectedClose(name));
            }
        }
    }
}

fn skip_until_close(cursor: &mut TokenCursor, tag: &str) -> Result<(), MarkupError> {
    let mut depth = 0usize;
    loop {
        match cursor.next() {
            None => return Err(MarkupError::UnclosedTag(tag.to_string())),
            Some(Token::Open { name, .. }) if name == tag => depth += 1,
            Some(Token::Close { name }) if name == tag => {
                if depth == 0 {
                    return Ok(());
                }
                depth -= 1;
            }
            Some(_) => {}
        }
    }
}

fn is_inline_tag(name: &str) -> bool {
    matches!(
        name,
        "strong" | "b" | "em" | "i" | "u" | "s" | "strike" | "del" | "sup" | "sub" | "a"
            | "mark" | "code" | "br"
    ) || name == "span"
}

/// Parses one inline element (at the cursor) into the pending run.
fn parse_inline_run(
    cursor: &mut TokenCursor,
    out: &mut Vec<Inline>,
) -> Result<(), MarkupError> {
    let mut content = parse_inline_nodes(cursor, &MarkSet::new(), None)?;
    out.append(&mut content);
    Ok(())
}

/// Parses inline content up to the close tag of `stop`, accumulating marks
/// from nested formatting tags.
fn parse_inline(cursor: &mut TokenCursor, stop: &str) -> Result<Vec<Inline>, MarkupError> {
    let mut content = parse_inline_nodes(cursor, &MarkSet::new(), Some(stop))?;
    merge_adjacent_runs(&mut content);
    Ok(content)
}

/// Core inline loop. With `stop: Some`, consumes until that close tag;
/// with `None`, parses exactly one leading element.
fn parse_inline_nodes(
    cursor: &mut TokenCursor,
    marks: &MarkSet,
    stop: Option<&str>,
) -> Result<Vec<Inline>, MarkupError> {
    let mut out = Vec::new();
    let single = stop.is_none();
    loop {
        match cursor.peek().cloned() {
            None => {
                if let Some(stop) = stop {
                    return Err(MarkupError::UnclosedTag(stop.to_string()));
                }
                return Ok(out);
            }
            Some(Token::Text(text)) => {
                cursor.next();
                let unescaped = unescape(&text);
                if !unescaped.is_empty() {
                    out.push(Inline::styled(unescaped, marks.clone()));
                }
                if single {
                    return Ok(out);
                }
            }
            Some(Token::Close { name }) => {
                if Some(name.as_str()) == stop {
                    cursor.next();
                    return Ok(out);
                }
                if single {
                    return Ok(out);
                }
                return Err(MarkupError::UnexpectedClose(name));
            }
            Some(Token::Open { name, attrs }) => {
                if STRIPPED_TAGS.contains(&name.as_str()) {
                    return Err(MarkupError::DisallowedTag(name));
                }
                if let Some((key, _)) = attrs.iter().find(|(key, _)| key.starts_with("on")) {
                    return Err(MarkupError::DisallowedAttribute(key.clone()));
                }
                if name == "span" && has_class(&attrs, "citation-component") {
                    cursor.next();
                    let number = attr(&attrs, "data-number")
                        .and_then(|value| value.parse().ok())
                        .unwrap_or(0);
                    skip_until_close(cursor, "span")?;
                    out.push(Inline::Citation { number });
                } else if name == "span" && has_class(&attrs, "prototype-reference") {
                    cursor.next();
                    let id = attr(&attrs, "data-id").unwrap_or_default().to_string();
                    skip_until_close(cursor, "span")?;
                    out.push(Inline::PrototypeRef { id });
                } else if name == "br" {
                    cursor.next();
                    out.push(Inline::styled("\n", marks.clone()));
                } else if let Some(mark) = mark_for_tag(&name, &attrs)? {
                    cursor.next();
                    let mut nested_marks = marks.clone();
                    if let Some(mark) = mark {
                        nested_marks.add(mark);
                    }
                    let mut nested = parse_inline_nodes(cursor, &nested_marks, Some(&name))?;
                    out.append(&mut nested);
                } else {
                    // A block tag inside inline context: stop here and let
                    // the block loop handle it (strict parse will then see
                    // the enclosing tag as unclosed).
                    if single {
                        return Ok(out);
                    }
                    return Err(MarkupError::UnclosedTag(
                        stop.unwrap_or_default().to_string(),
                    ));
                }
                if single {
                    return Ok(out);
                }
            }
        }
    }
}

/// `Ok(Some(None))` means a transparent inline wrapper (plain span, code);
/// `Ok(Some(Some(mark)))` a formatting tag; `Ok(None)` not inline at all.
#[allow(clippy::type_complexity)]
fn mark_for_tag(
    name: &str,
    attrs: &[(String, String)],
) -> Result<Option<Option<Mark>>, MarkupError> {
    let mark = match name {
        "strong" | "b" => Some(Mark::Bold),
        "em" | "i" => Some(Mark::Italic),
        "u" => Some(Mark::Underline),
        "s" | "strike" | "del" => Some(Mark::Strike),
        "sup" => Some(Mark::Superscript),
        "sub" => Some(Mark::Subscript),
        "a" => {
            let href = attr(attrs, "href").unwrap_or_default();
            if is_javascript_href(href) {
                return Err(MarkupError::DisallowedAttribute("href".to_string()));
            }
            Some(Mark::Link {
                href: href.to_string(),
            })
        }
        "mark" => Some(Mark::Highlight {
            value: attr(attrs, "data-color").unwrap_or("yellow").to_string(),
        }),
        // A span without a color style is a transparent wrapper.
        "span" => style_color(attrs).map(|value| Mark::TextColor { value }),
        "code" => None,
        _ => return Ok(None),
    };
    Ok(Some(mark))
}

// ---------------------------------------------------------------------------
// Sanitize

const BLOCK_TAGS: &[&str] = &[
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "ul", "ol", "li", "table", "thead", "tbody",
    "tr", "td", "th", "blockquote", "pre", "hr", "div",
];

fn is_block_tag(name: &str) -> bool {
    BLOCK_TAGS.contains(&name)
}

/// Contexts whose direct children are blocks. Bare whitespace there is
/// layout noise; inside inline content it separates runs and is kept.
fn drops_bare_whitespace(context: Option<&str>) -> bool {
    match context {
        None => true,
        Some(name) => matches!(
            name,
            "ul" | "ol" | "table" | "thead" | "tbody" | "tr" | "blockquote"
        ),
    }
}

/// Tags implicitly closed when `opening` starts while they are innermost.
fn implicitly_closed_by(open: &str, opening: &str) -> bool {
    match open {
        "p" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => is_block_tag(opening),
        "li" => opening == "li",
        "tr" => opening == "tr",
        "td" | "th" => matches!(opening, "td" | "th" | "tr"),
        _ => false,
    }
}

/// Token-level repair pass. Strips script-like content and event-handler
/// attributes, closes unclosed tags, drops stray closes, and normalizes
/// implicit block boundaries. Running it twice yields the first output.
pub fn sanitize(input: &str) -> String {
    let tokens = tokenize(input);
    let mut out = String::new();
    let mut open_stack: Vec<String> = Vec::new();
    let mut skip_depth: Option<(String, usize)> = None;
    let mut repaired = false;

    let emit_close = |out: &mut String, name: &str| {
        out.push_str(&format!("</{name}>"));
    };

    for token in tokens {
        match token {
            Token::Text(text) => {
                if skip_depth.is_some() {
                    continue;
                }
                let unescaped = unescape(&text);
                if unescaped.trim().is_empty()
                    && drops_bare_whitespace(open_stack.last().map(String::as_str))
                {
                    continue;
                }
                out.push_str(&escape_text(&unescaped));
            }
            Token::Open { name, attrs } => {
                if let Some((skip_name, depth)) = &mut skip_depth {
                    if &name == skip_name {
                        *depth += 1;
                    }
                    continue;
                }
                if STRIPPED_TAGS.contains(&name.as_str()) {
                    repaired = true;
                    if !is_void(&name) {
                        skip_depth = Some((name, 0));
                    }
                    continue;
                }
                // Implicit closes: <p>Hello<p>World, li/tr/td chains.
                while let Some(top) = open_stack.last() {
                    if implicitly_closed_by(top, &name) {
                        repaired = true;
                        let top = open_stack.pop().unwrap_or_default();
                        emit_close(&mut out, &top);
                    } else {
                        break;
                    }
                }
                if open_stack.is_empty() && !out.is_empty() && is_block_tag(&name) {
                    out.push('\n');
                }
                let mut kept_attrs = Vec::new();
                for (key, value) in attrs {
                    if key.starts_with("on") {
                        repaired = true;
                        continue;
                    }
                    if key == "href" && is_javascript_href(&value) {
                        repaired = true;
                        continue;
                    }
                    kept_attrs.push((key, value));
                }
                out.push('<');
                out.push_str(&name);
                for (key, value) in &kept_attrs {
                    if value.is_empty() {
                        out.push_str(&format!(" {key}"));
                    } else {
                        out.push_str(&format!(" {key}=\"{}\"", escape_attr(value)));
                    }
                }
                out.push('>');
                if !is_void(&name) {
                    open_stack.push(name);
                }
            }
            Token::Close { name } => {
                if let Some((skip_name, depth)) = &mut skip_depth {
                    if &name == skip_name {
                        if *depth == 0 {
                            skip_depth = None;
                        } else {
                            *depth -= 1;
                        }
                    }
                    continue;
                }
                if let Some(position) = open_stack.iter().rposition(|open| open == &name) {
                    // Auto-close anything the stray nesting left open.
                    while open_stack.len() > position + 1 {
                        repaired = true;
                        let inner = open_stack.pop().unwrap_or_default();
                        emit_close(&mut out, &inner);
                    }
                    open_stack.pop();
                    emit_close(&mut out, &name);
                } else {
                    // Stray close with no matching open: dropped.
                    repaired = true;
                }
            }
        }
    }
    while let Some(open) = open_stack.pop() {
        repaired = true;
        emit_close(&mut out, &open);
    }
    if skip_depth.is_some() {
        repaired = true;
    }
    if repaired {
        tracing::debug!("markup repaired during sanitize");
    }
    out
}
