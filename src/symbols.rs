//! Per-chunk symbol extraction and name-matched edge construction.
//!
//! Each language profile carries one query with two capture names:
//! `@definition` for names the chunk defines and `@usage` for names it
//! references. Languages without a grammar produce empty sets. Extraction is
//! deterministic: captures are collected in tree order and deduplicated.
//!
//! Edges are pure name matching: no scope resolution, no cross-language
//! linking. A chunk using symbol `s` gets a `calls` edge to every other chunk
//! defining `s`.

use std::collections::HashMap;
use tree_sitter::{Query, QueryCursor};

use crate::language;
use crate::models::{Chunk, EdgeRelation, SymbolEdge};

/// Names a chunk defines and names it references.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolSets {
    pub defines: Vec<String>,
    pub uses: Vec<String>,
}

/// Run the language's symbol query over a chunk's content.
pub fn extract_symbols(language_id: &str, content: &str) -> SymbolSets {
    let Some(profile) = language::profile(language_id) else {
        return SymbolSets::default();
    };
    let (Some(grammar), Some(query_src)) = (profile.grammar, profile.symbol_query) else {
        return SymbolSets::default();
    };

    let mut parser = tree_sitter::Parser::new();
    if parser.set_language(grammar()).is_err() {
        return SymbolSets::default();
    }
    let Some(tree) = parser.parse(content, None) else {
        return SymbolSets::default();
    };
    let Ok(query) = Query::new(grammar(), query_src) else {
        return SymbolSets::default();
    };

    let capture_names = query.capture_names();
    let mut sets = SymbolSets::default();
    let mut cursor = QueryCursor::new();
    for m in cursor.matches(&query, tree.root_node(), content.as_bytes()) {
        for capture in m.captures {
            let Ok(text) = capture.node.utf8_text(content.as_bytes()) else {
                continue;
            };
            let name = text.to_string();
            match capture_names.get(capture.index as usize).map(String::as_str) {
                Some("definition") => push_unique(&mut sets.defines, name),
                Some("usage") => push_unique(&mut sets.uses, name),
                _ => {}
            }
        }
    }
    sets
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

/// Build `calls` edges across a set of chunks by matching used symbol names
/// against defined ones. Self-edges are never produced.
pub fn link_chunks(chunks: &[Chunk]) -> Vec<SymbolEdge> {
    let mut definers: HashMap<&str, Vec<&str>> = HashMap::new();
    for chunk in chunks {
        for symbol in &chunk.defines_symbols {
            definers.entry(symbol.as_str()).or_default().push(&chunk.chunk_id);
        }
    }

    let mut edges = Vec::new();
    for chunk in chunks {
        for symbol in &chunk.uses_symbols {
            let Some(targets) = definers.get(symbol.as_str()) else {
                continue;
            };
            for target in targets {
                if *target == chunk.chunk_id {
                    continue;
                }
                edges.push(SymbolEdge {
                    from_chunk_id: chunk.chunk_id.clone(),
                    to_chunk_id: (*target).to_string(),
                    relation: EdgeRelation::Calls,
                    symbol_name: symbol.clone(),
                });
            }
        }
    }
    edges
}
