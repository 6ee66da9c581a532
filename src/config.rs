//! Configuration parsing and validation.
//!
//! Each indexed project is described by a YAML document. Required fields are
//! `group` and `language`; everything else has defaults. Validation errors
//! name the offending field and the allowed range, not a generic parse error.
//!
//! # Example
//!
//! ```yaml
//! group: platform
//! project: billing-api
//! root: /srv/repos/billing-api
//! language: [typescript, go]
//! paths: [src, internal]
//! excludes: ["**/*.spec.ts"]
//! respect_ignore_file: true
//! indexing:
//!   chunk_size: 2048
//!   concurrency: 4
//! metadata:
//!   service: billing
//!   git:
//!     enabled: true
//!     ticket_patterns: ["PAY-\\d+"]
//! ```
//!
//! Only plain data types are accepted: the schema is closed
//! (`deny_unknown_fields`) and documents carrying YAML code/function tags are
//! rejected before deserialization.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::language::{self, LanguageProfile};
use crate::models::validate_group;

/// Per-project configuration document.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    pub group: String,
    /// Project name; defaults to the root directory name when omitted.
    #[serde(default)]
    pub project: Option<String>,
    /// Filesystem root of the repository.
    #[serde(default)]
    pub root: Option<PathBuf>,
    pub language: LanguageList,
    /// Relative sub-paths to index. Empty means the whole root.
    #[serde(default)]
    pub paths: Vec<String>,
    /// User exclude globs. When supplied they replace the language defaults.
    #[serde(default)]
    pub excludes: Vec<String>,
    #[serde(default = "default_true")]
    pub respect_ignore_file: bool,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
}

/// `language: typescript` or `language: [typescript, go]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LanguageList {
    One(String),
    Many(Vec<String>),
}

impl LanguageList {
    pub fn as_vec(&self) -> Vec<String> {
        match self {
            LanguageList::One(s) => vec![s.clone()],
            LanguageList::Many(v) => v.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub overlap: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: 0,
            concurrency: default_concurrency(),
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatcherConfig {
    /// Milliseconds of quiet before a file event fires.
    #[serde(default = "default_debounce_ms")]
    pub debounce: u64,
    /// Milliseconds a file must stay unchanged before it is read.
    #[serde(default = "default_stability_ms")]
    pub stability: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: default_debounce_ms(),
            stability: default_stability_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingsConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            dimensions: default_dimensions(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetadataConfig {
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub bounded_context: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Path prefix → extra tags merged into chunks under that prefix.
    #[serde(default)]
    pub directory_tags: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub git: GitConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_commits")]
    pub max_commits_per_file: usize,
    #[serde(default)]
    pub ticket_patterns: Vec<String>,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_commits_per_file: default_max_commits(),
            ticket_patterns: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_chunk_size() -> usize {
    2048
}
fn default_concurrency() -> usize {
    4
}
fn default_batch_size() -> usize {
    64
}
fn default_debounce_ms() -> u64 {
    500
}
fn default_stability_ms() -> u64 {
    500
}
fn default_provider() -> String {
    "remote".to_string()
}
fn default_model() -> String {
    "nomic-embed-text-v1.5".to_string()
}
fn default_dimensions() -> usize {
    768
}
fn default_max_commits() -> usize {
    50
}

/// Hard chunk ceiling relative to the soft target.
pub const MAX_CHUNK_FACTOR: usize = 3;

/// A project config with its group sanitized, languages resolved against the
/// registry, and effective include/exclude patterns computed.
#[derive(Debug, Clone)]
pub struct ResolvedProject {
    pub group: String,
    pub project: String,
    pub root: Option<PathBuf>,
    pub languages: Vec<String>,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub extensions: Vec<String>,
    pub respect_ignore_file: bool,
    pub indexing: IndexingConfig,
    pub watcher: WatcherConfig,
    pub embeddings: EmbeddingsConfig,
    pub metadata: MetadataConfig,
}

impl ResolvedProject {
    pub fn max_chunk_size(&self) -> usize {
        self.indexing.chunk_size * MAX_CHUNK_FACTOR
    }
}

/// Read and validate a project config file.
pub fn load_project_config(path: &Path) -> Result<ResolvedProject> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
    parse_project_config(&raw)
}

/// Parse and validate a project config document.
pub fn parse_project_config(raw: &str) -> Result<ResolvedProject> {
    reject_code_tags(raw)?;

    let config: ProjectConfig = serde_yaml::from_str(raw)
        .map_err(|e| Error::Config(format!("invalid config document: {e}")))?;

    resolve(config)
}

/// Reject documents carrying YAML tags that smuggle code or arbitrary types.
///
/// The config is plain data only. Any non-core `!!` tag (`!!js/function`,
/// `!!python/object`, ...) and any local `!` tag fails parsing. A `!` only
/// counts as tag syntax at a node position (line start, after `key:` or `-`
/// plus whitespace, or directly inside a flow collection) and outside quoted
/// scalars and comments, so literal `!` characters in values such as paths
/// or `[!...]` glob classes pass through untouched.
fn reject_code_tags(raw: &str) -> Result<()> {
    const CORE_TAGS: &[&str] = &[
        "!!str", "!!int", "!!float", "!!bool", "!!null", "!!map", "!!seq", "!!set", "!!binary",
        "!!timestamp",
    ];

    for (lineno, line) in raw.lines().enumerate() {
        let mut in_single = false;
        let mut in_double = false;
        let mut escaped = false;
        let mut prev_char: Option<char> = None;
        let mut prev_non_ws: Option<char> = None;

        for (i, c) in line.char_indices() {
            if in_double {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == '"' {
                    in_double = false;
                }
            } else if in_single {
                if c == '\'' {
                    in_single = false;
                }
            } else {
                match c {
                    '"' => in_double = true,
                    '\'' => in_single = true,
                    // An unquoted '#' at line start or after whitespace
                    // opens a comment; the rest of the line is inert.
                    '#' if prev_char.map(char::is_whitespace).unwrap_or(true) => break,
                    '!' if tag_position(prev_char, prev_non_ws) => {
                        let rest = &line[i..];
                        if rest.starts_with("!!") {
                            if !CORE_TAGS.iter().any(|t| rest.starts_with(t)) {
                                return Err(Error::Config(format!(
                                    "line {}: non-core YAML tag is not allowed in config",
                                    lineno + 1
                                )));
                            }
                        } else {
                            return Err(Error::Config(format!(
                                "line {}: local YAML tags are not allowed in config",
                                lineno + 1
                            )));
                        }
                    }
                    _ => {}
                }
            }
            prev_char = Some(c);
            if !c.is_whitespace() {
                prev_non_ws = Some(c);
            }
        }
    }
    Ok(())
}

/// Whether a `!` at this position starts a YAML node tag: the beginning of
/// the line, after `key:`/`-`/`?` plus whitespace, or immediately inside a
/// flow collection. A `!` in the middle of a plain scalar is just a value
/// character.
fn tag_position(prev_char: Option<char>, prev_non_ws: Option<char>) -> bool {
    match prev_char {
        None => true,
        Some('[') | Some('{') | Some(',') => true,
        Some(p) if p.is_whitespace() => matches!(
            prev_non_ws,
            None | Some(':') | Some('-') | Some('[') | Some('{') | Some(',') | Some('?')
        ),
        _ => false,
    }
}

fn resolve(config: ProjectConfig) -> Result<ResolvedProject> {
    let group = validate_group(&config.group).map_err(|e| Error::Config(e.to_string()))?;

    let languages = config.language.as_vec();
    if languages.is_empty() {
        return Err(Error::Config("language: at least one language required".into()));
    }

    let mut profiles: Vec<&'static LanguageProfile> = Vec::new();
    for lang in &languages {
        match language::profile(lang) {
            Some(p) => profiles.push(p),
            None => {
                return Err(Error::Config(format!(
                    "language: unknown language {lang:?} (known: {})",
                    language::known_languages().join(", ")
                )))
            }
        }
    }

    validate_range("indexing.chunk_size", config.indexing.chunk_size, 128, 8192)?;
    if config.indexing.overlap >= config.indexing.chunk_size {
        return Err(Error::Config(format!(
            "indexing.overlap must be in [0, chunk_size): got {} with chunk_size {}",
            config.indexing.overlap, config.indexing.chunk_size
        )));
    }
    validate_range("indexing.concurrency", config.indexing.concurrency, 1, 20)?;
    validate_range("indexing.batch_size", config.indexing.batch_size, 1, 1000)?;
    validate_range("watcher.debounce", config.watcher.debounce as usize, 100, 10_000)?;
    validate_range("watcher.stability", config.watcher.stability as usize, 100, 10_000)?;
    validate_range(
        "metadata.git.max_commits_per_file",
        config.metadata.git.max_commits_per_file,
        1,
        500,
    )?;

    for pattern in &config.metadata.git.ticket_patterns {
        regex::Regex::new(pattern).map_err(|e| {
            Error::Config(format!(
                "metadata.git.ticket_patterns: {pattern:?} does not compile: {e}"
            ))
        })?;
    }

    for p in &config.paths {
        validate_relative_path("paths", p)?;
    }
    for prefix in config.metadata.directory_tags.keys() {
        validate_relative_path("metadata.directory_tags", prefix)?;
    }

    // Union of language profile patterns; user paths prefix each pattern,
    // user excludes replace the profile defaults entirely.
    let mut include_patterns: Vec<String> = Vec::new();
    let mut default_excludes: Vec<String> = Vec::new();
    let mut extensions: Vec<String> = Vec::new();
    for profile in &profiles {
        for pat in profile.patterns {
            if config.paths.is_empty() {
                push_unique(&mut include_patterns, (*pat).to_string());
            } else {
                for path in &config.paths {
                    let joined = format!("{}/{}", path.trim_end_matches('/'), pat);
                    push_unique(&mut include_patterns, joined);
                }
            }
        }
        for pat in profile.excludes {
            push_unique(&mut default_excludes, (*pat).to_string());
        }
        for ext in profile.extensions {
            push_unique(&mut extensions, (*ext).to_string());
        }
    }

    let exclude_patterns = if config.excludes.is_empty() {
        default_excludes
    } else {
        config.excludes.clone()
    };

    let project = config
        .project
        .clone()
        .or_else(|| {
            config.root.as_ref().and_then(|r| {
                r.file_name().map(|n| n.to_string_lossy().to_string())
            })
        })
        .ok_or_else(|| Error::Config("project: name required when root is not set".into()))?;

    Ok(ResolvedProject {
        group,
        project,
        root: config.root,
        languages,
        include_patterns,
        exclude_patterns,
        extensions,
        respect_ignore_file: config.respect_ignore_file,
        indexing: config.indexing,
        watcher: config.watcher,
        embeddings: config.embeddings,
        metadata: config.metadata,
    })
}

fn validate_range(field: &str, value: usize, min: usize, max: usize) -> Result<()> {
    if value < min || value > max {
        return Err(Error::Config(format!(
            "{field} must be in [{min}, {max}], got {value}"
        )));
    }
    Ok(())
}

fn validate_relative_path(field: &str, p: &str) -> Result<()> {
    let path = Path::new(p);
    if path.is_absolute() {
        return Err(Error::Config(format!(
            "{field}: {p:?} must be relative to the project root"
        )));
    }
    if path
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(Error::Config(format!(
            "{field}: {p:?} must not escape the project root"
        )));
    }
    Ok(())
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

/// Process-level settings read from the environment.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub qdrant_url: String,
    pub qdrant_api_key: Option<String>,
    pub embedding_url: String,
    /// Directory holding the metadata and embedding-cache databases.
    pub data_dir: PathBuf,
    /// Project allow-list; empty means unrestricted.
    pub allowed_projects: Vec<String>,
    pub verbose: bool,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        let allowed_projects = std::env::var("PAPARATS_PROJECTS")
            .ok()
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            qdrant_url: std::env::var("QDRANT_URL")
                .unwrap_or_else(|_| "http://localhost:6333".to_string()),
            qdrant_api_key: std::env::var("QDRANT_API_KEY").ok().filter(|s| !s.is_empty()),
            embedding_url: std::env::var("EMBEDDING_URL")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            data_dir: std::env::var("PAPARATS_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),
            allowed_projects,
            verbose: std::env::var("PAPARATS_VERBOSE").is_ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = "group: demo\nproject: svc\nlanguage: typescript\n";

    #[test]
    fn test_minimal_config() {
        let resolved = parse_project_config(MINIMAL).unwrap();
        assert_eq!(resolved.group, "demo");
        assert_eq!(resolved.project, "svc");
        assert_eq!(resolved.languages, vec!["typescript"]);
        assert!(!resolved.include_patterns.is_empty());
        assert_eq!(resolved.indexing.chunk_size, 2048);
    }

    #[test]
    fn test_language_list_form() {
        let resolved =
            parse_project_config("group: g\nproject: p\nlanguage: [typescript, go]\n").unwrap();
        assert_eq!(resolved.languages, vec!["typescript", "go"]);
    }

    #[test]
    fn test_unknown_language_names_field() {
        let err = parse_project_config("group: g\nproject: p\nlanguage: cobol\n").unwrap_err();
        assert!(err.to_string().contains("language"), "{err}");
    }

    #[test]
    fn test_chunk_size_range() {
        let doc = "group: g\nproject: p\nlanguage: go\nindexing:\n  chunk_size: 64\n";
        let err = parse_project_config(doc).unwrap_err();
        assert!(err.to_string().contains("indexing.chunk_size"), "{err}");
        assert!(err.to_string().contains("[128, 8192]"), "{err}");
    }

    #[test]
    fn test_overlap_must_stay_under_chunk_size() {
        let doc = "group: g\nproject: p\nlanguage: go\nindexing:\n  chunk_size: 256\n  overlap: 256\n";
        assert!(parse_project_config(doc).is_err());
    }

    #[test]
    fn test_bad_ticket_pattern() {
        let doc = "group: g\nproject: p\nlanguage: go\nmetadata:\n  git:\n    ticket_patterns: [\"[\"]\n";
        let err = parse_project_config(doc).unwrap_err();
        assert!(err.to_string().contains("ticket_patterns"), "{err}");
    }

    #[test]
    fn test_absolute_path_rejected() {
        let doc = "group: g\nproject: p\nlanguage: go\npaths: [/etc]\n";
        assert!(parse_project_config(doc).is_err());
    }

    #[test]
    fn test_parent_traversal_rejected() {
        let doc = "group: g\nproject: p\nlanguage: go\npaths: [\"../other\"]\n";
        assert!(parse_project_config(doc).is_err());
    }

    #[test]
    fn test_code_tags_rejected() {
        let doc = "group: g\nproject: p\nlanguage: go\nhook: !!js/function \"function(){}\"\n";
        assert!(parse_project_config(doc).is_err());
        let doc2 = "group: g\nproject: p\nlanguage: go\nhook: !ruby/object {}\n";
        assert!(parse_project_config(doc2).is_err());
        let doc3 = "group: g\nproject: p\nlanguage: go\nexcludes:\n  - !python/tuple [a]\n";
        assert!(parse_project_config(doc3).is_err());
    }

    #[test]
    fn test_literal_bang_in_values_accepted() {
        // A '!' inside a plain scalar value is data, not tag syntax.
        let doc = "group: g\nproject: p\nlanguage: go\nroot: /data/my-app!\n";
        let resolved = parse_project_config(doc).unwrap();
        assert_eq!(
            resolved.root.as_deref(),
            Some(std::path::Path::new("/data/my-app!"))
        );

        // Negated glob classes in quoted scalars pass through untouched.
        let doc2 = "group: g\nproject: p\nlanguage: go\nexcludes: [\"[!.]*.tmp\"]\n";
        let resolved2 = parse_project_config(doc2).unwrap();
        assert_eq!(resolved2.exclude_patterns, vec!["[!.]*.tmp"]);
    }

    #[test]
    fn test_bang_in_comment_accepted() {
        let doc = "group: g\nproject: p\nlanguage: go\n# note: !watch out for this!\n";
        assert!(parse_project_config(doc).is_ok());
        let doc2 = "group: g\nproject: p\nlanguage: go\npaths: [src] # hot path: !important\n";
        assert!(parse_project_config(doc2).is_ok());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let doc = "group: g\nproject: p\nlanguage: go\nbogus: 1\n";
        assert!(parse_project_config(doc).is_err());
    }

    #[test]
    fn test_paths_prefix_patterns() {
        let doc = "group: g\nproject: p\nlanguage: go\npaths: [internal]\n";
        let resolved = parse_project_config(doc).unwrap();
        assert!(resolved
            .include_patterns
            .iter()
            .all(|p| p.starts_with("internal/")));
    }

    #[test]
    fn test_user_excludes_replace_defaults() {
        let doc = "group: g\nproject: p\nlanguage: go\nexcludes: [\"only/this/**\"]\n";
        let resolved = parse_project_config(doc).unwrap();
        assert_eq!(resolved.exclude_patterns, vec!["only/this/**"]);
    }
}
