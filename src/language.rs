//! Language profile registry.
//!
//! A profile bundles everything per-language the engine needs: glob patterns,
//! default excludes, file extensions, the tree-sitter grammar handle, the
//! symbol capture query, and the node-kind tables driving the chunker. The
//! registry is static; `generic` is the catch-all profile that matches every
//! file and extracts no symbols.
//!
//! The symbol query is the contract's only per-language surface: two capture
//! names, `@definition` for names a chunk defines and `@usage` for names it
//! references.

use std::path::Path;

use crate::models::ChunkKind;

/// Per-language capability set.
pub struct LanguageProfile {
    pub id: &'static str,
    /// Include globs relative to the project root.
    pub patterns: &'static [&'static str],
    /// Default exclude globs, replaced entirely by user-supplied excludes.
    pub excludes: &'static [&'static str],
    pub extensions: &'static [&'static str],
    /// Tree-sitter grammar; `None` falls back to blank-line chunking.
    pub grammar: Option<fn() -> tree_sitter::Language>,
    /// Query with `@definition` / `@usage` captures; `None` yields empty sets.
    pub symbol_query: Option<&'static str>,
    /// Node kinds that open a one-level member recursion when oversized.
    pub container_kinds: &'static [&'static str],
    /// Node kinds treated as attachable leading comments.
    pub comment_kinds: &'static [&'static str],
    /// Marker files for language auto-detection.
    pub marker_files: &'static [&'static str],
}

const COMMON_EXCLUDES: &[&str] = &[
    "**/node_modules/**",
    "**/.git/**",
    "**/dist/**",
    "**/build/**",
    "**/target/**",
    "**/vendor/**",
    "**/__pycache__/**",
    "**/.venv/**",
];

static TYPESCRIPT: LanguageProfile = LanguageProfile {
    id: "typescript",
    patterns: &["**/*.ts", "**/*.tsx", "**/*.mts", "**/*.cts"],
    excludes: COMMON_EXCLUDES,
    extensions: &["ts", "tsx", "mts", "cts"],
    grammar: Some(ts_typescript),
    symbol_query: Some(
        r#"
        (function_declaration name: (identifier) @definition)
        (generator_function_declaration name: (identifier) @definition)
        (class_declaration name: (type_identifier) @definition)
        (abstract_class_declaration name: (type_identifier) @definition)
        (interface_declaration name: (type_identifier) @definition)
        (type_alias_declaration name: (type_identifier) @definition)
        (enum_declaration name: (identifier) @definition)
        (method_definition name: (property_identifier) @definition)
        (variable_declarator name: (identifier) @definition)
        (call_expression function: (identifier) @usage)
        (call_expression function: (member_expression property: (property_identifier) @usage))
        (new_expression constructor: (identifier) @usage)
        "#,
    ),
    container_kinds: &["class_declaration", "abstract_class_declaration"],
    comment_kinds: &["comment"],
    marker_files: &["tsconfig.json"],
};

static JAVASCRIPT: LanguageProfile = LanguageProfile {
    id: "javascript",
    patterns: &["**/*.js", "**/*.jsx", "**/*.mjs", "**/*.cjs"],
    excludes: COMMON_EXCLUDES,
    extensions: &["js", "jsx", "mjs", "cjs"],
    grammar: Some(ts_javascript),
    symbol_query: Some(
        r#"
        (function_declaration name: (identifier) @definition)
        (generator_function_declaration name: (identifier) @definition)
        (class_declaration name: (identifier) @definition)
        (method_definition name: (property_identifier) @definition)
        (variable_declarator name: (identifier) @definition)
        (call_expression function: (identifier) @usage)
        (call_expression function: (member_expression property: (property_identifier) @usage))
        (new_expression constructor: (identifier) @usage)
        "#,
    ),
    container_kinds: &["class_declaration"],
    comment_kinds: &["comment"],
    marker_files: &["package.json"],
};

static PYTHON: LanguageProfile = LanguageProfile {
    id: "python",
    patterns: &["**/*.py"],
    excludes: COMMON_EXCLUDES,
    extensions: &["py"],
    grammar: Some(ts_python),
    symbol_query: Some(
        r#"
        (function_definition name: (identifier) @definition)
        (class_definition name: (identifier) @definition)
        (call function: (identifier) @usage)
        (call function: (attribute attribute: (identifier) @usage))
        "#,
    ),
    container_kinds: &["class_definition"],
    comment_kinds: &["comment"],
    marker_files: &["pyproject.toml", "requirements.txt", "setup.py"],
};

static RUST: LanguageProfile = LanguageProfile {
    id: "rust",
    patterns: &["**/*.rs"],
    excludes: COMMON_EXCLUDES,
    extensions: &["rs"],
    grammar: Some(ts_rust),
    symbol_query: Some(
        r#"
        (function_item name: (identifier) @definition)
        (struct_item name: (type_identifier) @definition)
        (enum_item name: (type_identifier) @definition)
        (trait_item name: (type_identifier) @definition)
        (type_item name: (type_identifier) @definition)
        (const_item name: (identifier) @definition)
        (static_item name: (identifier) @definition)
        (call_expression function: (identifier) @usage)
        (call_expression function: (field_expression field: (field_identifier) @usage))
        (call_expression function: (scoped_identifier name: (identifier) @usage))
        "#,
    ),
    container_kinds: &["impl_item", "trait_item", "mod_item"],
    comment_kinds: &["line_comment", "block_comment"],
    marker_files: &["Cargo.toml"],
};

static GO: LanguageProfile = LanguageProfile {
    id: "go",
    patterns: &["**/*.go"],
    excludes: COMMON_EXCLUDES,
    extensions: &["go"],
    grammar: Some(ts_go),
    symbol_query: Some(
        r#"
        (function_declaration name: (identifier) @definition)
        (method_declaration name: (field_identifier) @definition)
        (type_declaration (type_spec name: (type_identifier) @definition))
        (const_declaration (const_spec name: (identifier) @definition))
        (var_declaration (var_spec name: (identifier) @definition))
        (call_expression function: (identifier) @usage)
        (call_expression function: (selector_expression field: (field_identifier) @usage))
        "#,
    ),
    container_kinds: &[],
    comment_kinds: &["comment"],
    marker_files: &["go.mod"],
};

static JAVA: LanguageProfile = LanguageProfile {
    id: "java",
    patterns: &["**/*.java"],
    excludes: COMMON_EXCLUDES,
    extensions: &["java"],
    grammar: Some(ts_java),
    symbol_query: Some(
        r#"
        (class_declaration name: (identifier) @definition)
        (interface_declaration name: (identifier) @definition)
        (enum_declaration name: (identifier) @definition)
        (method_declaration name: (identifier) @definition)
        (method_invocation name: (identifier) @usage)
        (object_creation_expression type: (type_identifier) @usage)
        "#,
    ),
    container_kinds: &["class_declaration", "interface_declaration", "enum_declaration"],
    comment_kinds: &["line_comment", "block_comment", "comment"],
    marker_files: &["pom.xml", "build.gradle", "build.gradle.kts"],
};

static C: LanguageProfile = LanguageProfile {
    id: "c",
    patterns: &["**/*.c", "**/*.h"],
    excludes: COMMON_EXCLUDES,
    extensions: &["c", "h"],
    grammar: Some(ts_c),
    symbol_query: Some(
        r#"
        (function_definition declarator: (function_declarator declarator: (identifier) @definition))
        (struct_specifier name: (type_identifier) @definition)
        (enum_specifier name: (type_identifier) @definition)
        (type_definition declarator: (type_identifier) @definition)
        (call_expression function: (identifier) @usage)
        "#,
    ),
    container_kinds: &[],
    comment_kinds: &["comment"],
    marker_files: &["Makefile", "CMakeLists.txt"],
};

static CPP: LanguageProfile = LanguageProfile {
    id: "cpp",
    patterns: &["**/*.cpp", "**/*.cc", "**/*.cxx", "**/*.hpp", "**/*.hh"],
    excludes: COMMON_EXCLUDES,
    extensions: &["cpp", "cc", "cxx", "hpp", "hh"],
    grammar: Some(ts_cpp),
    symbol_query: Some(
        r#"
        (function_definition declarator: (function_declarator declarator: (identifier) @definition))
        (class_specifier name: (type_identifier) @definition)
        (struct_specifier name: (type_identifier) @definition)
        (enum_specifier name: (type_identifier) @definition)
        (call_expression function: (identifier) @usage)
        (call_expression function: (field_expression field: (field_identifier) @usage))
        "#,
    ),
    container_kinds: &["class_specifier", "struct_specifier"],
    comment_kinds: &["comment"],
    marker_files: &["CMakeLists.txt"],
};

static RUBY: LanguageProfile = LanguageProfile {
    id: "ruby",
    patterns: &["**/*.rb"],
    excludes: COMMON_EXCLUDES,
    extensions: &["rb"],
    grammar: Some(ts_ruby),
    symbol_query: Some(
        r#"
        (method name: (identifier) @definition)
        (class name: (constant) @definition)
        (module name: (constant) @definition)
        (call method: (identifier) @usage)
        "#,
    ),
    container_kinds: &["class", "module"],
    comment_kinds: &["comment"],
    marker_files: &["Gemfile"],
};

/// Matches everything, extracts nothing.
static GENERIC: LanguageProfile = LanguageProfile {
    id: "generic",
    patterns: &["**/*"],
    excludes: COMMON_EXCLUDES,
    extensions: &[],
    grammar: None,
    symbol_query: None,
    container_kinds: &[],
    comment_kinds: &[],
    marker_files: &[],
};

fn ts_typescript() -> tree_sitter::Language {
    tree_sitter_typescript::language_typescript()
}
fn ts_javascript() -> tree_sitter::Language {
    tree_sitter_javascript::language()
}
fn ts_python() -> tree_sitter::Language {
    tree_sitter_python::language()
}
fn ts_rust() -> tree_sitter::Language {
    tree_sitter_rust::language()
}
fn ts_go() -> tree_sitter::Language {
    tree_sitter_go::language()
}
fn ts_java() -> tree_sitter::Language {
    tree_sitter_java::language()
}
fn ts_c() -> tree_sitter::Language {
    tree_sitter_c::language()
}
fn ts_cpp() -> tree_sitter::Language {
    tree_sitter_cpp::language()
}
fn ts_ruby() -> tree_sitter::Language {
    tree_sitter_ruby::language()
}

/// Registry order doubles as auto-detection order.
static REGISTRY: &[&LanguageProfile] = &[
    &TYPESCRIPT,
    &JAVASCRIPT,
    &PYTHON,
    &RUST,
    &GO,
    &JAVA,
    &C,
    &CPP,
    &RUBY,
    &GENERIC,
];

/// Look up a profile by language id.
pub fn profile(id: &str) -> Option<&'static LanguageProfile> {
    REGISTRY.iter().find(|p| p.id == id).copied()
}

pub fn known_languages() -> Vec<&'static str> {
    REGISTRY.iter().map(|p| p.id).collect()
}

/// Language id for a file extension, if any profile claims it.
pub fn language_for_extension(ext: &str) -> Option<&'static str> {
    let ext = ext.to_lowercase();
    REGISTRY
        .iter()
        .find(|p| p.extensions.contains(&ext.as_str()))
        .map(|p| p.id)
}

/// Detect project languages from marker files in the root.
///
/// Returns profiles in registry order, or `["generic"]` when nothing matches.
pub fn detect_languages(root: &Path) -> Vec<String> {
    let mut detected = Vec::new();
    for profile in REGISTRY {
        if profile
            .marker_files
            .iter()
            .any(|marker| root.join(marker).is_file())
        {
            detected.push(profile.id.to_string());
        }
    }
    if detected.is_empty() {
        detected.push("generic".to_string());
    }
    detected
}

/// Map a syntax-node kind to a chunk kind. Shared across grammars; node kind
/// names rarely collide across the supported languages.
pub fn classify_node_kind(kind: &str) -> Option<ChunkKind> {
    match kind {
        "function_declaration" | "generator_function_declaration" | "function_item"
        | "function_definition" | "arrow_function" => Some(ChunkKind::Function),
        "method_definition" | "method_declaration" | "method" => Some(ChunkKind::Method),
        "class_declaration" | "abstract_class_declaration" | "class_definition"
        | "class_specifier" | "struct_specifier" | "class" | "struct_item" | "impl_item" => {
            Some(ChunkKind::Class)
        }
        "interface_declaration" | "trait_item" => Some(ChunkKind::Interface),
        "type_alias_declaration" | "type_declaration" | "type_item" | "type_definition" => {
            Some(ChunkKind::Type)
        }
        "enum_declaration" | "enum_item" | "enum_specifier" => Some(ChunkKind::Enum),
        "const_item" | "static_item" | "const_declaration" => Some(ChunkKind::Constant),
        "lexical_declaration" | "variable_declaration" | "var_declaration"
        | "variable_declarator" => Some(ChunkKind::Variable),
        "mod_item" | "module" | "internal_module" => Some(ChunkKind::Module),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_profile_lookup() {
        assert!(profile("typescript").is_some());
        assert!(profile("generic").is_some());
        assert!(profile("cobol").is_none());
    }

    #[test]
    fn test_generic_matches_everything_extracts_nothing() {
        let generic = profile("generic").unwrap();
        assert_eq!(generic.patterns, &["**/*"]);
        assert!(generic.grammar.is_none());
        assert!(generic.symbol_query.is_none());
    }

    #[test]
    fn test_extension_lookup() {
        assert_eq!(language_for_extension("ts"), Some("typescript"));
        assert_eq!(language_for_extension("RS"), Some("rust"));
        assert_eq!(language_for_extension("rb"), Some("ruby"));
        assert_eq!(language_for_extension("hpp"), Some("cpp"));
        assert_eq!(language_for_extension("exe"), None);
    }

    #[test]
    fn test_detect_languages_markers() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("go.mod"), "module demo\n").unwrap();
        fs::write(tmp.path().join("package.json"), "{}").unwrap();
        let langs = detect_languages(tmp.path());
        assert_eq!(langs, vec!["javascript", "go"]);
    }

    #[test]
    fn test_detect_languages_fallback() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(detect_languages(tmp.path()), vec!["generic"]);
    }

    #[test]
    fn test_classify_kinds() {
        assert_eq!(
            classify_node_kind("function_declaration"),
            Some(ChunkKind::Function)
        );
        assert_eq!(classify_node_kind("trait_item"), Some(ChunkKind::Interface));
        assert_eq!(classify_node_kind("expression_statement"), None);
    }
}
