//! Git metadata extraction: per-file commit history, hunk→chunk attribution,
//! and ticket references.
//!
//! Runs only when the project root is under version control and the project
//! enables it. History comes from the `git` CLI: `git log` for the commit
//! list and `git show --unified=0` for the per-commit hunk ranges. A commit
//! is attributed to a chunk when any of its hunks overlaps the chunk's line
//! range; the commit that introduces the file (no prior hunks) is attributed
//! to every chunk.
//!
//! The metadata store is the source of truth. The denormalized payload patch
//! on the vector store is best-effort: failures are logged and do not fail
//! the extraction.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::meta_store::MetaStore;
use crate::models::{Chunk, CommitRecord, TicketRecord, TicketSource};
use crate::vector_store::VectorStore;

const JIRA_PATTERN: &str = r"[A-Z]+-\d+";
const GITHUB_PATTERN: &str = r"#\d+";

/// One commit touching a file, with the line ranges it modified.
#[derive(Debug, Clone)]
pub struct FileCommit {
    pub hash: String,
    pub committed_at: DateTime<Utc>,
    pub author_email: String,
    pub summary: String,
    /// 1-indexed inclusive line ranges on the post-image of the file.
    pub hunks: Vec<(u32, u32)>,
    /// The commit created the file.
    pub is_creation: bool,
}

pub struct GitMetaExtractor {
    jira: Regex,
    github: Regex,
    custom: Vec<Regex>,
}

impl GitMetaExtractor {
    /// Custom patterns were validated at config load; a failure here is a bug.
    pub fn new(custom_patterns: &[String]) -> Result<Self> {
        let custom = custom_patterns
            .iter()
            .map(|p| Regex::new(p).map_err(|e| Error::Internal(format!("ticket pattern {p:?}: {e}"))))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            jira: Regex::new(JIRA_PATTERN).map_err(|e| Error::Internal(e.to_string()))?,
            github: Regex::new(GITHUB_PATTERN).map_err(|e| Error::Internal(e.to_string()))?,
            custom,
        })
    }

    /// Whether `root` is under version control.
    pub fn is_repo(root: &Path) -> bool {
        root.join(".git").exists()
    }

    /// Tickets mentioned in one commit summary, in pattern order
    /// (jira, github, then custom), deduplicated by key.
    pub fn extract_tickets(&self, summary: &str) -> Vec<(String, TicketSource)> {
        let mut tickets: Vec<(String, TicketSource)> = Vec::new();
        let mut push = |key: String, source: TicketSource| {
            if !tickets.iter().any(|(k, _)| *k == key) {
                tickets.push((key, source));
            }
        };
        for m in self.jira.find_iter(summary) {
            push(m.as_str().to_string(), TicketSource::Jira);
        }
        for m in self.github.find_iter(summary) {
            push(m.as_str().to_string(), TicketSource::Github);
        }
        for pattern in &self.custom {
            for m in pattern.find_iter(summary) {
                push(m.as_str().to_string(), TicketSource::Custom);
            }
        }
        tickets
    }

    /// The last `max_commits` commits touching `rel_file`, newest first,
    /// each with its hunk ranges.
    pub async fn file_history(
        &self,
        root: &Path,
        rel_file: &str,
        max_commits: usize,
    ) -> Result<Vec<FileCommit>> {
        let log = run_git(
            root,
            &[
                "log",
                "-n",
                &max_commits.to_string(),
                "--format=%H%x1f%cI%x1f%ae%x1f%s",
                "--",
                rel_file,
            ],
        )
        .await?;

        let mut commits = Vec::new();
        for line in log.lines() {
            let parts: Vec<&str> = line.split('\u{1f}').collect();
            if parts.len() != 4 {
                continue;
            }
            let committed_at = DateTime::parse_from_rfc3339(parts[1])
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());

            let (hunks, is_creation) = self.commit_hunks(root, parts[0], rel_file).await?;
            commits.push(FileCommit {
                hash: parts[0].to_string(),
                committed_at,
                author_email: parts[2].to_string(),
                summary: parts[3].to_string(),
                hunks,
                is_creation,
            });
        }
        Ok(commits)
    }

    async fn commit_hunks(
        &self,
        root: &Path,
        hash: &str,
        rel_file: &str,
    ) -> Result<(Vec<(u32, u32)>, bool)> {
        let diff = run_git(
            root,
            &["show", "--format=", "--unified=0", hash, "--", rel_file],
        )
        .await?;
        Ok(parse_hunks(&diff))
    }

    /// Attribute commits and tickets to every chunk, write them to the
    /// metadata store, and patch the vector payloads.
    pub async fn annotate_chunks(
        &self,
        root: &Path,
        group: &str,
        chunks: &[Chunk],
        max_commits: usize,
        meta: &MetaStore,
        store: &dyn VectorStore,
    ) -> Result<()> {
        let mut by_file: HashMap<&str, Vec<&Chunk>> = HashMap::new();
        for chunk in chunks {
            by_file.entry(chunk.file.as_str()).or_default().push(chunk);
        }

        for (file, file_chunks) in by_file {
            let history = match self.file_history(root, file, max_commits).await {
                Ok(h) => h,
                Err(e) => {
                    warn!(file, error = %e, "git history failed, skipping file");
                    continue;
                }
            };
            if history.is_empty() {
                continue;
            }

            for chunk in file_chunks {
                let assigned: Vec<&FileCommit> = history
                    .iter()
                    .filter(|c| {
                        c.is_creation
                            || c.hunks
                                .iter()
                                .any(|&(from, to)| from <= chunk.end_line && chunk.start_line <= to)
                    })
                    .collect();
                if assigned.is_empty() {
                    continue;
                }

                let commit_records: Vec<CommitRecord> = assigned
                    .iter()
                    .map(|c| CommitRecord {
                        chunk_id: chunk.chunk_id.clone(),
                        commit_hash: c.hash.clone(),
                        committed_at: c.committed_at,
                        author_email: c.author_email.clone(),
                        message_summary: c.summary.clone(),
                    })
                    .collect();

                let mut ticket_records: Vec<TicketRecord> = Vec::new();
                for commit in &assigned {
                    for (key, source) in self.extract_tickets(&commit.summary) {
                        if !ticket_records.iter().any(|t| t.ticket_key == key && t.source == source)
                        {
                            ticket_records.push(TicketRecord {
                                chunk_id: chunk.chunk_id.clone(),
                                ticket_key: key,
                                source,
                            });
                        }
                    }
                }

                meta.upsert_commits_for_chunk(&chunk.chunk_id, &commit_records).await?;
                meta.upsert_tickets_for_chunk(&chunk.chunk_id, &ticket_records).await?;

                // Newest assigned commit becomes the denormalized payload copy.
                let Some(latest) = assigned.iter().max_by_key(|c| c.committed_at) else {
                    continue;
                };
                let ticket_keys: Vec<String> =
                    ticket_records.iter().map(|t| t.ticket_key.clone()).collect();
                let patch = serde_json::json!({
                    "last_commit_hash": latest.hash,
                    "last_commit_at": latest.committed_at.to_rfc3339(),
                    "last_author_email": latest.author_email,
                    "ticket_keys": ticket_keys,
                });
                if let Err(e) = store.set_payload(group, &chunk.point_id(), patch).await {
                    warn!(chunk_id = %chunk.chunk_id, error = %e, "payload patch failed");
                }
            }
            debug!(file, commits = history.len(), "git metadata attributed");
        }
        Ok(())
    }
}

async fn run_git(root: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .current_dir(root)
        .args(args)
        .output()
        .await
        .map_err(|e| Error::Upstream(format!("git: {e}")))?;

    if !output.status.success() {
        return Err(Error::Upstream(format!(
            "git {} failed: {}",
            args.first().unwrap_or(&""),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse unified-diff output into post-image line ranges. Returns the ranges
/// and whether the diff introduces the file.
fn parse_hunks(diff: &str) -> (Vec<(u32, u32)>, bool) {
    let mut hunks = Vec::new();
    let mut is_creation = false;

    for line in diff.lines() {
        if line.starts_with("--- /dev/null") || line.starts_with("new file mode") {
            is_creation = true;
            continue;
        }
        let Some(rest) = line.strip_prefix("@@ ") else {
            continue;
        };
        // "@@ -l[,s] +l[,s] @@"
        let Some(plus) = rest.split(' ').find(|part| part.starts_with('+')) else {
            continue;
        };
        let spec = &plus[1..];
        let (start, count) = match spec.split_once(',') {
            Some((s, c)) => (s.parse::<u32>().ok(), c.parse::<u32>().ok()),
            None => (spec.parse::<u32>().ok(), Some(1)),
        };
        if let (Some(start), Some(count)) = (start, count) {
            // A pure deletion (count 0) still touches the line it removed at.
            let span = count.max(1);
            let from = start.max(1);
            hunks.push((from, from + span - 1));
        }
    }
    (hunks, is_creation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::chunk_file;
    use crate::vector_store::{MemoryVectorStore, Point, SearchFilter};
    use std::process::Command as StdCommand;
    use tempfile::TempDir;

    fn extractor() -> GitMetaExtractor {
        GitMetaExtractor::new(&["OPS-[0-9]+".to_string()]).unwrap()
    }

    #[test]
    fn test_extract_tickets_union() {
        let tickets = extractor().extract_tickets("PAY-12 fixes #345 and OPS-9");
        assert!(tickets.contains(&("PAY-12".to_string(), TicketSource::Jira)));
        assert!(tickets.contains(&("#345".to_string(), TicketSource::Github)));
        // OPS-9 matches both the jira builtin and the custom pattern; first
        // match wins, so it stays jira-sourced.
        assert!(tickets.contains(&("OPS-9".to_string(), TicketSource::Jira)));
    }

    #[test]
    fn test_extract_tickets_dedup() {
        let tickets = extractor().extract_tickets("PAY-1 PAY-1 PAY-1");
        assert_eq!(tickets.len(), 1);
    }

    #[test]
    fn test_parse_hunks_ranges() {
        let diff = "\
diff --git a/f b/f
index 111..222 100644
--- a/f
+++ b/f
@@ -3,0 +4,2 @@ context
+added one
+added two
@@ -10 +12 @@ context
-old
+new
";
        let (hunks, creation) = parse_hunks(diff);
        assert_eq!(hunks, vec![(4, 5), (12, 12)]);
        assert!(!creation);
    }

    #[test]
    fn test_parse_hunks_creation() {
        let diff = "\
diff --git a/f b/f
new file mode 100644
--- /dev/null
+++ b/f
@@ -0,0 +1,3 @@
+a
+b
+c
";
        let (hunks, creation) = parse_hunks(diff);
        assert!(creation);
        assert_eq!(hunks, vec![(1, 3)]);
    }

    fn git(root: &std::path::Path, args: &[&str]) {
        let status = StdCommand::new("git")
            .current_dir(root)
            .args(args)
            .env("GIT_AUTHOR_NAME", "Test")
            .env("GIT_AUTHOR_EMAIL", "test@example.com")
            .env("GIT_COMMITTER_NAME", "Test")
            .env("GIT_COMMITTER_EMAIL", "test@example.com")
            .status()
            .expect("git available");
        assert!(status.success(), "git {args:?} failed");
    }

    #[tokio::test]
    async fn test_annotate_chunks_against_real_repo() {
        if StdCommand::new("git").arg("--version").status().is_err() {
            return;
        }

        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        git(root, &["init", "-q"]);

        let file = root.join("lib.ts");
        std::fs::write(&file, "function a() { return 1; }\nfunction b() { return 2; }\n").unwrap();
        git(root, &["add", "."]);
        git(root, &["commit", "-q", "-m", "PAY-77 initial import"]);

        std::fs::write(
            &file,
            "function a() { return 10; }\nfunction b() { return 2; }\n",
        )
        .unwrap();
        git(root, &["add", "."]);
        git(root, &["commit", "-q", "-m", "tune a, refs #12"]);

        let content = std::fs::read_to_string(&file).unwrap();
        let chunks = chunk_file("g", "p", "lib.ts", "typescript", &content, 30, 600);
        assert!(chunks.len() >= 2, "want one chunk per function");

        let store = MemoryVectorStore::new();
        let points: Vec<Point> = chunks
            .iter()
            .map(|c| Point {
                id: c.point_id(),
                vector: vec![1.0, 0.0],
                payload: c.into(),
            })
            .collect();
        store.upsert("g", points).await.unwrap();

        let meta = MetaStore::open(&root.join("meta.sqlite")).await.unwrap();
        extractor()
            .annotate_chunks(root, "g", &chunks, 50, &meta, &store)
            .await
            .unwrap();

        // The creation commit reaches every chunk; the second commit only
        // the chunk containing line 1.
        let first_chunk = &chunks[0];
        let last_chunk = chunks.last().unwrap();
        let first_commits = meta.get_commits(&first_chunk.chunk_id, None).await.unwrap();
        let last_commits = meta.get_commits(&last_chunk.chunk_id, None).await.unwrap();
        assert_eq!(first_commits.len(), 2);
        assert_eq!(last_commits.len(), 1);
        assert!(last_commits[0].message_summary.contains("initial import"));

        let tickets = meta.get_tickets(&first_chunk.chunk_id).await.unwrap();
        let keys: Vec<&str> = tickets.iter().map(|t| t.ticket_key.as_str()).collect();
        assert!(keys.contains(&"PAY-77"));
        assert!(keys.contains(&"#12"));

        // Payload patch carried the newest assigned commit.
        let payloads = store.scroll_by_filter("g", &SearchFilter::default()).await.unwrap();
        assert!(payloads.iter().all(|p| p.last_commit_hash.is_some()));
    }
}
