//! Syntax-aware source chunker.
//!
//! Splits a file into contiguous, non-overlapping chunks whose content stays
//! within a size budget while respecting declaration boundaries. When the
//! language has a tree-sitter grammar, top-level declarations (with their
//! attached leading comments) are packed greedily up to `chunk_size`;
//! oversized class-like containers are recursed one level; anything still
//! over `max_chunk_size` is split by lines, preferring blank-line breaks.
//! Without a grammar (or on parse failure) the file is packed by blank-line
//! blocks instead.
//!
//! Invariants upheld for every input:
//! - chunks are ordered by `start_line` ascending and never overlap;
//! - their line ranges cover every non-blank line (blank-line gaps allowed);
//! - empty or whitespace-only files produce zero chunks.

use tracing::warn;
use tree_sitter::Node;

use crate::language::{self, LanguageProfile};
use crate::models::{self, Chunk, ChunkKind};

/// A contiguous line span that must stay together: a declaration plus its
/// attached leading comments, or one blank-line block in fallback mode.
#[derive(Debug, Clone)]
struct Unit {
    /// 1-indexed inclusive.
    start_line: u32,
    end_line: u32,
    len: usize,
    kind: Option<ChunkKind>,
    symbol_name: Option<String>,
    /// Set when the unit is a container whose members can be re-grouped.
    container: bool,
}

/// Split a file into chunks.
///
/// `file` is the forward-slash relative path used in chunk ids; `chunk_size`
/// is the soft target and `max_chunk_size` the hard ceiling, both in chars.
pub fn chunk_file(
    group: &str,
    project: &str,
    file: &str,
    language_id: &str,
    text: &str,
    chunk_size: usize,
    max_chunk_size: usize,
) -> Vec<Chunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let lines: Vec<&str> = text.lines().collect();
    let profile = language::profile(language_id);

    let spans = match profile.and_then(|p| p.grammar.map(|g| (p, g))) {
        Some((profile, grammar)) => match parse_units(text, &lines, profile, grammar) {
            Some(units) => pack_units(&lines, units, chunk_size, max_chunk_size),
            None => {
                warn!(file, language = language_id, "parse failed, falling back to blank-line chunking");
                fallback_spans(&lines, chunk_size, max_chunk_size)
            }
        },
        None => fallback_spans(&lines, chunk_size, max_chunk_size),
    };

    spans
        .into_iter()
        .filter(|s| span_has_content(&lines, s))
        .map(|s| build_chunk(group, project, file, language_id, &lines, s))
        .collect()
}

/// A packed chunk-to-be: line range plus classification carried from its
/// first declaration unit.
#[derive(Debug, Clone)]
struct Span {
    start_line: u32,
    end_line: u32,
    kind: Option<ChunkKind>,
    symbol_name: Option<String>,
}

fn build_chunk(
    group: &str,
    project: &str,
    file: &str,
    language_id: &str,
    lines: &[&str],
    span: Span,
) -> Chunk {
    let content = slice_lines(lines, span.start_line, span.end_line);
    let hash = models::content_hash(&content);
    let chunk_id = models::chunk_id(group, project, file, span.start_line, span.end_line, &hash);
    Chunk {
        group: group.to_string(),
        project: project.to_string(),
        file: file.to_string(),
        language: language_id.to_string(),
        start_line: span.start_line,
        end_line: span.end_line,
        content,
        hash,
        chunk_id,
        symbol_name: span.symbol_name,
        kind: span.kind,
        service: None,
        bounded_context: None,
        tags: Vec::new(),
        defines_symbols: Vec::new(),
        uses_symbols: Vec::new(),
        last_commit_hash: None,
        last_commit_at: None,
        last_author_email: None,
        ticket_keys: Vec::new(),
    }
}

/// Exact text of the 1-indexed inclusive line range.
fn slice_lines(lines: &[&str], start_line: u32, end_line: u32) -> String {
    let from = (start_line as usize).saturating_sub(1);
    let to = (end_line as usize).min(lines.len());
    lines[from..to].join("\n")
}

fn span_len(lines: &[&str], start_line: u32, end_line: u32) -> usize {
    let from = (start_line as usize).saturating_sub(1);
    let to = (end_line as usize).min(lines.len());
    let newlines = to.saturating_sub(from).saturating_sub(1);
    lines[from..to].iter().map(|l| l.len()).sum::<usize>() + newlines
}

fn span_has_content(lines: &[&str], span: &Span) -> bool {
    let from = (span.start_line as usize).saturating_sub(1);
    let to = (span.end_line as usize).min(lines.len());
    lines[from..to].iter().any(|l| !l.trim().is_empty())
}

// ── AST path ────────────────────────────────────────────────────────────

/// Parse the file and produce declaration units in source order, or `None`
/// when the grammar cannot make sense of the file.
fn parse_units(
    text: &str,
    lines: &[&str],
    profile: &LanguageProfile,
    grammar: fn() -> tree_sitter::Language,
) -> Option<Vec<Unit>> {
    let mut parser = tree_sitter::Parser::new();
    parser.set_language(grammar()).ok()?;
    let tree = parser.parse(text, None)?;
    let root = tree.root_node();
    if root.has_error() {
        return None;
    }

    Some(group_children(root, text, lines, profile))
}

/// Walk a node's named children in order, attaching each run of leading
/// comments (separated by whitespace only) to the declaration that follows.
fn group_children(
    parent: Node<'_>,
    text: &str,
    lines: &[&str],
    profile: &LanguageProfile,
) -> Vec<Unit> {
    let mut units: Vec<Unit> = Vec::new();
    let mut pending_comment: Option<(u32, u32, usize)> = None; // (start, end, end_byte)

    let mut cursor = parent.walk();
    for child in parent.named_children(&mut cursor) {
        let start = child.start_position().row as u32 + 1;
        let end = child.end_position().row as u32 + 1;

        if profile.comment_kinds.contains(&child.kind()) {
            pending_comment = match pending_comment {
                // Consecutive comments merge into one attachment run.
                Some((cs, _, _)) => Some((cs, end, child.end_byte())),
                None => Some((start, end, child.end_byte())),
            };
            continue;
        }

        let mut unit_start = start;
        if let Some((cs, ce, c_end_byte)) = pending_comment.take() {
            let gap = &text[c_end_byte..child.start_byte()];
            if gap.chars().all(char::is_whitespace) {
                unit_start = cs;
            } else {
                // The run did not attach but still needs coverage: fold it
                // into the previous unit, or emit it standalone.
                match units.last_mut() {
                    Some(prev) if prev.end_line < cs => {
                        prev.end_line = ce;
                        prev.len = span_len(lines, prev.start_line, prev.end_line);
                    }
                    _ => units.push(Unit {
                        start_line: cs,
                        end_line: ce,
                        len: span_len(lines, cs, ce),
                        kind: None,
                        symbol_name: None,
                        container: false,
                    }),
                }
            }
        }

        // Ranges stay disjoint even when a trailing comment shares the
        // previous unit's last line.
        if let Some(prev) = units.last_mut() {
            unit_start = unit_start.max(prev.end_line + 1);
            if unit_start > end {
                prev.end_line = prev.end_line.max(end);
                prev.len = span_len(lines, prev.start_line, prev.end_line);
                continue;
            }
        }

        units.push(Unit {
            start_line: unit_start,
            end_line: end,
            len: span_len(lines, unit_start, end),
            kind: language::classify_node_kind(child.kind()),
            symbol_name: declaration_name(child, text),
            container: profile.container_kinds.contains(&child.kind()),
        });
    }

    // Trailing comments become their own unit (or extend the last one when
    // they share its final line).
    if let Some((cs, ce, _)) = pending_comment {
        let floor = units.last().map(|u| u.end_line + 1).unwrap_or(1);
        if cs.max(floor) > ce {
            if let Some(prev) = units.last_mut() {
                prev.end_line = prev.end_line.max(ce);
                prev.len = span_len(lines, prev.start_line, prev.end_line);
            }
        } else {
            let start = cs.max(floor);
            units.push(Unit {
                start_line: start,
                end_line: ce,
                len: span_len(lines, start, ce),
                kind: None,
                symbol_name: None,
                container: false,
            });
        }
    }

    units
}

/// Best-effort declared name of a node: the `name` field, drilling through
/// wrapper declarations (lexical declarations, type specs) when needed.
fn declaration_name(node: Node<'_>, text: &str) -> Option<String> {
    if let Some(name) = node.child_by_field_name("name") {
        return name.utf8_text(text.as_bytes()).ok().map(str::to_string);
    }
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        match child.kind() {
            "variable_declarator" | "type_spec" | "const_spec" | "var_spec" => {
                if let Some(name) = child.child_by_field_name("name") {
                    return name.utf8_text(text.as_bytes()).ok().map(str::to_string);
                }
            }
            _ => {}
        }
    }
    None
}

/// Greedy packing of units into spans, recursing into oversized containers
/// and line-splitting anything that still exceeds the ceiling.
fn pack_units(
    lines: &[&str],
    units: Vec<Unit>,
    chunk_size: usize,
    max_chunk_size: usize,
) -> Vec<Span> {
    let mut spans: Vec<Span> = Vec::new();
    let mut current: Option<Span> = None;
    let mut current_len = 0usize;

    for unit in units {
        if unit.len > max_chunk_size {
            if let Some(span) = current.take() {
                spans.push(span);
            }
            if unit.container {
                spans.extend(split_container(lines, &unit, chunk_size, max_chunk_size));
            } else {
                spans.extend(split_by_lines(lines, unit.start_line, unit.end_line, max_chunk_size));
            }
            current_len = 0;
            continue;
        }

        match current.as_mut() {
            Some(span) if current_len + unit.len <= chunk_size => {
                span.end_line = unit.end_line;
                current_len = span_len(lines, span.start_line, span.end_line);
            }
            _ => {
                if let Some(span) = current.take() {
                    spans.push(span);
                }
                current_len = unit.len;
                current = Some(Span {
                    start_line: unit.start_line,
                    end_line: unit.end_line,
                    kind: unit.kind,
                    symbol_name: unit.symbol_name.clone(),
                });
            }
        }
    }

    if let Some(span) = current {
        spans.push(span);
    }
    spans
}

/// One-level recursion into a class-like container: group its member lines
/// by blank-line blocks within the container's range, keeping the header on
/// the first piece and the closing lines on the last.
fn split_container(
    lines: &[&str],
    unit: &Unit,
    chunk_size: usize,
    max_chunk_size: usize,
) -> Vec<Span> {
    let inner = blank_line_blocks(lines, unit.start_line, unit.end_line);
    let mut packed = pack_blocks(lines, inner, chunk_size, max_chunk_size);
    if let Some(first) = packed.first_mut() {
        first.start_line = unit.start_line;
        first.kind = unit.kind;
        first.symbol_name = unit.symbol_name.clone();
    }
    if let Some(last) = packed.last_mut() {
        last.end_line = unit.end_line;
    }
    packed
}

/// Split a line range into windows each at most `max_chunk_size` chars,
/// preferring to break after a blank line.
fn split_by_lines(
    lines: &[&str],
    start_line: u32,
    end_line: u32,
    max_chunk_size: usize,
) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut window_start = start_line;
    let mut window_len = 0usize;
    let mut last_blank: Option<u32> = None;

    let mut line_no = start_line;
    while line_no <= end_line {
        let line = lines[(line_no - 1) as usize];
        let add = line.len() + usize::from(window_len > 0);

        if window_len + add > max_chunk_size && window_len > 0 {
            let cut = match last_blank {
                Some(blank) if blank >= window_start => blank,
                _ => line_no - 1,
            };
            spans.push(Span {
                start_line: window_start,
                end_line: cut,
                kind: None,
                symbol_name: None,
            });
            window_start = cut + 1;
            window_len = span_len(lines, window_start, line_no);
            last_blank = None;
            line_no += 1;
            continue;
        }

        window_len += add;
        if line.trim().is_empty() {
            last_blank = Some(line_no);
        }
        line_no += 1;
    }

    if window_start <= end_line {
        spans.push(Span {
            start_line: window_start,
            end_line,
            kind: None,
            symbol_name: None,
        });
    }
    spans
}

// ── Fallback path ───────────────────────────────────────────────────────

/// No grammar: tokenize into blank-line blocks and pack those.
fn fallback_spans(lines: &[&str], chunk_size: usize, max_chunk_size: usize) -> Vec<Span> {
    let blocks = blank_line_blocks(lines, 1, lines.len() as u32);
    pack_blocks(lines, blocks, chunk_size, max_chunk_size)
}

/// Runs of non-blank lines within an inclusive range.
fn blank_line_blocks(lines: &[&str], start_line: u32, end_line: u32) -> Vec<(u32, u32)> {
    let mut blocks = Vec::new();
    let mut block_start: Option<u32> = None;
    for line_no in start_line..=end_line.min(lines.len() as u32) {
        let blank = lines[(line_no - 1) as usize].trim().is_empty();
        match (blank, block_start) {
            (false, None) => block_start = Some(line_no),
            (true, Some(start)) => {
                blocks.push((start, line_no - 1));
                block_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = block_start {
        blocks.push((start, end_line.min(lines.len() as u32)));
    }
    blocks
}

fn pack_blocks(
    lines: &[&str],
    blocks: Vec<(u32, u32)>,
    chunk_size: usize,
    max_chunk_size: usize,
) -> Vec<Span> {
    let units = blocks
        .into_iter()
        .map(|(start, end)| Unit {
            start_line: start,
            end_line: end,
            len: span_len(lines, start, end),
            kind: None,
            symbol_name: None,
            container: false,
        })
        .collect();
    pack_units(lines, units, chunk_size, max_chunk_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(language: &str, text: &str, chunk_size: usize, max: usize) -> Vec<Chunk> {
        chunk_file("g", "p", "src/file", language, text, chunk_size, max)
    }

    fn assert_invariants(text: &str, chunks: &[Chunk]) {
        // Ordered, non-overlapping.
        for pair in chunks.windows(2) {
            assert!(pair[0].start_line <= pair[1].start_line, "ordering violated");
            assert!(pair[0].end_line < pair[1].start_line, "overlap");
        }
        // Every non-blank line covered.
        let covered: Vec<(u32, u32)> = chunks.iter().map(|c| (c.start_line, c.end_line)).collect();
        for (i, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let line_no = i as u32 + 1;
            assert!(
                covered.iter().any(|(s, e)| *s <= line_no && line_no <= *e),
                "line {line_no} not covered"
            );
        }
    }

    #[test]
    fn test_empty_and_whitespace_files() {
        assert!(chunks("typescript", "", 512, 1536).is_empty());
        assert!(chunks("typescript", "\n\n   \n", 512, 1536).is_empty());
        assert!(chunks("generic", "\n  \n", 512, 1536).is_empty());
    }

    #[test]
    fn test_comment_attachment_two_functions() {
        let src = "// greet a name\nfunction greet(n: string) { return n; }\n// sum two ints\nfunction sum(a: number, b: number) { return a+b; }";
        let result = chunks("typescript", src, 64, 600);
        assert_eq!(result.len(), 2, "{result:#?}");
        assert_eq!((result[0].start_line, result[0].end_line), (1, 2));
        assert_eq!((result[1].start_line, result[1].end_line), (3, 4));
        assert!(result[0].content.contains("greet a name"));
        assert!(result[0].content.contains("function greet"));
        assert!(result[1].content.contains("sum two ints"));
        assert_invariants(src, &result);
    }

    #[test]
    fn test_greedy_packing_within_budget() {
        let src = "function a() { return 1; }\nfunction b() { return 2; }\nfunction c() { return 3; }";
        let result = chunks("typescript", src, 4096, 12288);
        assert_eq!(result.len(), 1);
        assert_eq!((result[0].start_line, result[0].end_line), (1, 3));
    }

    #[test]
    fn test_oversize_function_splits_by_lines() {
        let body: String = (0..300).map(|n| format!("  const v{n}={n};\n")).collect();
        let src = format!("function big() {{\n{body}}}");
        let result = chunks("typescript", &src, 200, 600);
        assert!(result.len() >= 2, "expected multiple chunks, got {}", result.len());
        for c in &result {
            assert!(c.content.len() <= 600, "chunk over ceiling: {}", c.content.len());
        }
        assert_invariants(&src, &result);
    }

    #[test]
    fn test_oversize_class_recurses_into_members() {
        let methods: String = (0..40)
            .map(|n| format!("  m{n}() {{ return {n}; }}\n\n"))
            .collect();
        let src = format!("class Wide {{\n{methods}}}");
        let result = chunks("typescript", &src, 200, 400);
        assert!(result.len() >= 2);
        assert_eq!(result.first().unwrap().start_line, 1);
        assert_eq!(
            result.last().unwrap().end_line as usize,
            src.lines().count()
        );
        assert_invariants(&src, &result);
    }

    #[test]
    fn test_trailing_same_line_comment_stays_disjoint() {
        let src = "function a() { return 1; } // note\nfunction b() { return 2; }";
        let result = chunks("typescript", src, 16, 600);
        assert!(result.len() >= 2);
        assert_invariants(src, &result);
    }

    #[test]
    fn test_fallback_blank_line_blocks() {
        let src = "alpha block line one\nalpha line two\n\nbeta block\n\ngamma block";
        let result = chunks("generic", src, 24, 200);
        assert!(result.len() >= 2);
        assert_invariants(src, &result);
    }

    #[test]
    fn test_fallback_on_parse_failure() {
        // Unbalanced braces force an error tree.
        let src = "function broken( {{{ ]]\nmore garbage here\n\nanother block";
        let result = chunks("typescript", src, 64, 600);
        assert!(!result.is_empty());
        assert_invariants(src, &result);
    }

    #[test]
    fn test_hash_and_chunk_id_deterministic() {
        let src = "function stable() { return 42; }";
        let a = chunks("typescript", src, 512, 1536);
        let b = chunks("typescript", src, 512, 1536);
        assert_eq!(a[0].hash, b[0].hash);
        assert_eq!(a[0].chunk_id, b[0].chunk_id);
        assert_eq!(a[0].hash.len(), 16);
    }

    #[test]
    fn test_symbol_name_and_kind_carried() {
        let src = "function lonely() { return 1; }";
        let result = chunks("typescript", src, 512, 1536);
        assert_eq!(result[0].symbol_name.as_deref(), Some("lonely"));
        assert_eq!(result[0].kind, Some(ChunkKind::Function));
    }

    #[test]
    fn test_python_chunks() {
        let src = "# helper\ndef one():\n    return 1\n\n\ndef two():\n    return 2";
        let result = chunks("python", src, 32, 600);
        assert!(result.len() >= 2);
        assert!(result[0].content.contains("# helper"));
        assert_invariants(src, &result);
    }

    #[test]
    fn test_content_is_exact_line_slice() {
        let src = "function a() {\n  return 1;\n}";
        let result = chunks("typescript", src, 512, 1536);
        assert_eq!(result[0].content, src);
    }
}
