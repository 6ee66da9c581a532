//! File enumeration for indexing.
//!
//! Given a resolved project config and a root, produces the deterministic,
//! sorted set of files to index. Filters apply in order: include patterns
//! (language + user paths), user exclude patterns, ignore-file rules when
//! `respect_ignore_file` is set, then the binary and UTF-8 guards at read
//! time.

use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::ResolvedProject;
use crate::error::{Error, Result};

/// Enumerate all files under `root` that the project config selects.
///
/// Output paths are absolute and sorted, so a given input tree always yields
/// the same sequence.
pub fn enumerate_files(root: &Path, project: &ResolvedProject) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(Error::NotFound(format!(
            "project root does not exist: {}",
            root.display()
        )));
    }

    let include = build_globset(&project.include_patterns)?;
    let exclude = build_globset(&project.exclude_patterns)?;

    let mut files = Vec::new();

    if project.respect_ignore_file {
        // The ignore walker unions the root's ignore files with ancestor
        // rules, matching what git itself would skip.
        let walker = WalkBuilder::new(root)
            .hidden(false)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .parents(true)
            .follow_links(false)
            .build();
        for entry in walker.flatten() {
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                collect_if_selected(entry.path(), root, &include, &exclude, &mut files);
            }
        }
    } else {
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            if entry.file_type().is_file() {
                collect_if_selected(entry.path(), root, &include, &exclude, &mut files);
            }
        }
    }

    files.sort();
    Ok(files)
}

fn collect_if_selected(
    path: &Path,
    root: &Path,
    include: &GlobSet,
    exclude: &GlobSet,
    out: &mut Vec<PathBuf>,
) {
    let rel = match path.strip_prefix(root) {
        Ok(r) => r,
        Err(_) => return,
    };
    let rel_str = to_forward_slashes(rel);
    if exclude.is_match(&rel_str) {
        return;
    }
    if !include.is_match(&rel_str) {
        return;
    }
    out.push(path.to_path_buf());
}

/// Relative path with forward slashes, the canonical form used in chunk ids.
pub fn to_forward_slashes(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::Config(format!("invalid glob pattern {pattern:?}: {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::Config(format!("glob set: {e}")))
}

/// Read a source file, applying the binary and encoding guards.
///
/// Returns `None` when the file should be silently skipped: a NUL byte in
/// the first read buffer, invalid UTF-8, or a Unicode replacement character
/// after decoding.
pub fn read_source_file(path: &Path) -> std::io::Result<Option<String>> {
    let bytes = std::fs::read(path)?;
    Ok(decode_source(&bytes))
}

/// Guard logic shared by the disk reader and in-memory content submission.
pub fn decode_source(bytes: &[u8]) -> Option<String> {
    let probe_len = bytes.len().min(8192);
    if bytes[..probe_len].contains(&0) {
        return None;
    }
    let text = String::from_utf8(bytes.to_vec()).ok()?;
    if text.contains('\u{FFFD}') {
        return None;
    }
    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_project_config;
    use std::fs;
    use tempfile::TempDir;

    fn project(doc: &str) -> ResolvedProject {
        parse_project_config(doc).unwrap()
    }

    #[test]
    fn test_enumerate_applies_include_and_exclude() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("src")).unwrap();
        fs::write(tmp.path().join("src/a.ts"), "const a = 1;\n").unwrap();
        fs::write(tmp.path().join("src/a.spec.ts"), "test\n").unwrap();
        fs::write(tmp.path().join("readme.md"), "# hi\n").unwrap();

        let p = project(
            "group: g\nproject: p\nlanguage: typescript\nexcludes: [\"**/*.spec.ts\"]\n",
        );
        let files = enumerate_files(tmp.path(), &p).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|f| to_forward_slashes(f.strip_prefix(tmp.path()).unwrap()))
            .collect();
        assert_eq!(names, vec!["src/a.ts"]);
    }

    #[test]
    fn test_enumerate_deterministic_order() {
        let tmp = TempDir::new().unwrap();
        for name in ["z.go", "a.go", "m.go"] {
            fs::write(tmp.path().join(name), "package main\n").unwrap();
        }
        let p = project("group: g\nproject: p\nlanguage: go\n");
        let first = enumerate_files(tmp.path(), &p).unwrap();
        let second = enumerate_files(tmp.path(), &p).unwrap();
        assert_eq!(first, second);
        assert!(first.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_enumerate_missing_root() {
        let p = project("group: g\nproject: p\nlanguage: go\n");
        assert!(enumerate_files(Path::new("/nonexistent/prj"), &p).is_err());
    }

    #[test]
    fn test_respects_gitignore() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(".gitignore"), "generated.go\n").unwrap();
        fs::write(tmp.path().join("kept.go"), "package main\n").unwrap();
        fs::write(tmp.path().join("generated.go"), "package main\n").unwrap();

        let p = project("group: g\nproject: p\nlanguage: go\n");
        let files = enumerate_files(tmp.path(), &p).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert!(names.contains(&"kept.go".to_string()));
        assert!(!names.contains(&"generated.go".to_string()));
    }

    #[test]
    fn test_binary_guard() {
        assert!(decode_source(b"hello\0world").is_none());
        assert!(decode_source(b"plain text").is_some());
    }

    #[test]
    fn test_utf8_guard() {
        assert!(decode_source(&[0xff, 0xfe, 0x41]).is_none());
        let with_replacement = "bad \u{FFFD} char".as_bytes();
        assert!(decode_source(with_replacement).is_none());
    }
}
