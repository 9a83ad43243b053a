//! Structural block parsing: the body is cut into headings, paragraphs, quotes, list items
//! and other markdown blocks before any semantic segmentation happens.

use pulldown_cmark::{Event, Options, Parser as CmarkParser, Tag};
use regex::Regex;
use std::ops::Range;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockType {
    Heading,
    Paragraph,
    Blockquote,
    ListItem,
    Code,
    Html,
    Table,
}

impl BlockType {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockType::Heading => "heading",
            BlockType::Paragraph => "paragraph",
            BlockType::Blockquote => "blockquote",
            BlockType::ListItem => "list_item",
            BlockType::Code => "code",
            BlockType::Html => "html",
            BlockType::Table => "table",
        }
    }
}

/// One structural unit of a document
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub block_type: BlockType,
    pub content: String,
    /// Nearest heading above this block (the heading itself for heading blocks).
    pub heading: Option<String>,
}

fn list_marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:[-*+]|\d{1,9}[.)])\s+").expect("valid list marker regex"))
}

/// Parse a document body by file extension: `.txt` bodies are split on blank lines,
/// everything else is treated as markdown.
pub fn parse_document(body: &str, extension: &str, min_chars: usize) -> Vec<Block> {
    if extension.eq_ignore_ascii_case("txt") {
        parse_plain_blocks(body, min_chars)
    } else {
        parse_blocks(body, min_chars)
    }
}

/// Parse markdown into top-level blocks. List items are emitted one per item; nested
/// lists stay inside their parent item.
pub fn parse_blocks(source: &str, min_chars: usize) -> Vec<Block> {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    let parser = CmarkParser::new_ext(source, options).into_offset_iter();

    let mut blocks = Vec::new();
    let mut heading: Option<String> = None;
    let mut depth = 0usize;
    // (kind, source range, depth at which the block opened)
    let mut current: Option<(BlockType, Range<usize>, usize)> = None;
    let mut collected = String::new();

    for (event, range) in parser {
        match event {
            Event::Start(tag) => {
                if current.is_none() {
                    let kind = match tag {
                        Tag::Heading { .. } => Some(BlockType::Heading),
                        Tag::Paragraph => Some(BlockType::Paragraph),
                        Tag::BlockQuote(_) => Some(BlockType::Blockquote),
                        Tag::Item => Some(BlockType::ListItem),
                        Tag::CodeBlock(_) => Some(BlockType::Code),
                        Tag::HtmlBlock => Some(BlockType::Html),
                        Tag::Table(_) => Some(BlockType::Table),
                        _ => None,
                    };
                    if let Some(kind) = kind {
                        current = Some((kind, range, depth));
                        collected.clear();
                    }
                }
                depth += 1;
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                let closes = matches!(current, Some((_, _, d)) if d == depth);
                if closes {
                    if let Some((kind, range, _)) = current.take() {
                        let content = block_content(kind, &source[range], &collected);
                        if kind == BlockType::Heading {
                            if content.is_empty() {
                                continue;
                            }
                            heading = Some(content.clone());
                        } else if content.chars().count() < min_chars.max(1) {
                            continue;
                        }
                        blocks.push(Block {
                            block_type: kind,
                            content,
                            heading: heading.clone(),
                        });
                    }
                }
            }
            Event::Text(text) | Event::Code(text) => {
                if matches!(current, Some((BlockType::Heading | BlockType::Code, _, _))) {
                    collected.push_str(&text);
                }
            }
            Event::SoftBreak | Event::HardBreak => {
                if matches!(current, Some((BlockType::Heading, _, _))) {
                    collected.push(' ');
                }
            }
            _ => {}
        }
    }

    blocks
}

fn block_content(kind: BlockType, source: &str, collected: &str) -> String {
    match kind {
        BlockType::Heading => collapse_lines(collected),
        BlockType::Code => collected.trim_end().to_string(),
        BlockType::Paragraph => collapse_lines(source),
        BlockType::Blockquote => {
            let unquoted: Vec<&str> = source
                .lines()
                .map(|line| {
                    let mut line = line.trim_start();
                    while let Some(rest) = line.strip_prefix('>') {
                        line = rest.trim_start();
                    }
                    line
                })
                .collect();
            collapse_lines(&unquoted.join("\n"))
        }
        BlockType::ListItem => {
            let without_marker = list_marker_regex().replace(source, "");
            collapse_lines(&without_marker)
        }
        BlockType::Html | BlockType::Table => source.trim().to_string(),
    }
}

/// Join lines with single spaces, trimming each line
fn collapse_lines(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Plain text: paragraphs are separated by blank lines
pub fn parse_plain_blocks(source: &str, min_chars: usize) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut lines: Vec<&str> = Vec::new();

    let flush = |lines: &mut Vec<&str>, blocks: &mut Vec<Block>| {
        let content = collapse_lines(&lines.join("\n"));
        lines.clear();
        if content.chars().count() >= min_chars.max(1) {
            blocks.push(Block {
                block_type: BlockType::Paragraph,
                content,
                heading: None,
            });
        }
    };

    for line in source.lines() {
        if line.trim().is_empty() {
            flush(&mut lines, &mut blocks);
        } else {
            lines.push(line);
        }
    }
    flush(&mut lines, &mut blocks);
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_blocks_types_and_heading_context() {
        let md = "# Part One\n\nO Son of Spirit!\nMy first counsel is this.\n\n> Quoted words\n> continue here.\n\n- first item\n- second item\n\n## Part Two\n\n```\nverbatim\n```\n";
        let blocks = parse_blocks(md, 3);
        let types: Vec<BlockType> = blocks.iter().map(|b| b.block_type).collect();
        assert_eq!(
            types,
            vec![
                BlockType::Heading,
                BlockType::Paragraph,
                BlockType::Blockquote,
                BlockType::ListItem,
                BlockType::ListItem,
                BlockType::Heading,
                BlockType::Code,
            ]
        );
        assert_eq!(blocks[0].content, "Part One");
        assert_eq!(blocks[1].content, "O Son of Spirit! My first counsel is this.");
        assert_eq!(blocks[1].heading.as_deref(), Some("Part One"));
        assert_eq!(blocks[2].content, "Quoted words continue here.");
        assert_eq!(blocks[3].content, "first item");
        assert_eq!(blocks[6].content, "verbatim");
        assert_eq!(blocks[6].heading.as_deref(), Some("Part Two"));
    }

    #[test]
    fn test_short_blocks_dropped_but_headings_kept() {
        let md = "# I\n\nok\n\nLong enough paragraph.\n";
        let blocks = parse_blocks(md, 3);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].block_type, BlockType::Heading);
        assert_eq!(blocks[0].content, "I");
        assert_eq!(blocks[1].content, "Long enough paragraph.");
    }

    #[test]
    fn test_markers_survive_parsing() {
        let md = "⁅s1⁆First sentence.⁅/s1⁆ ⁅s2⁆Second one.⁅/s2⁆\n";
        let blocks = parse_blocks(md, 3);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].content, "⁅s1⁆First sentence.⁅/s1⁆ ⁅s2⁆Second one.⁅/s2⁆");
    }

    #[test]
    fn test_ordered_list_marker_removed() {
        let blocks = parse_blocks("1. Praise be to God\n2) Glory be to Him\n", 3);
        assert_eq!(blocks[0].content, "Praise be to God");
        assert!(blocks.iter().all(|b| b.block_type == BlockType::ListItem));
    }

    #[test]
    fn test_plain_blocks() {
        let text = "بسم الله الرحمن الرحيم\nالحمد لله\n\n\nx\n\nsecond paragraph\n";
        let blocks = parse_document(text, "txt", 3);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].content, "بسم الله الرحمن الرحيم الحمد لله");
        assert_eq!(blocks[1].content, "second paragraph");
    }
}
