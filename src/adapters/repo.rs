//! Local repository snippet fetcher.
//!
//! Code search and revision retrieval shell out to `grep` and `git`; the
//! evidence builder only needs small line windows, not a full VCS client.

use crate::hashing::stable_hash;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// A ±10-line window of source code tied to a file and line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoSnippet {
    pub snippet_id: String,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    pub reason: String,
}

/// Fetch lightweight repository snippets and recent revision history.
#[derive(Debug, Default)]
pub struct RepoSnippetFetcher;

impl RepoSnippetFetcher {
    /// Snippet around a stack-frame location. The frame only carries a file
    /// basename, so the file is located inside the repo first; when a commit
    /// SHA is known the content is read from that revision.
    pub async fn snippet_for_file_line(
        &self,
        repo_local_path: &str,
        basename: &str,
        line_no: usize,
        commit_sha: Option<&str>,
    ) -> Option<RepoSnippet> {
        let repo = Path::new(repo_local_path);
        if repo_local_path.is_empty() || !repo.exists() {
            return None;
        }
        let file_path = find_file_by_basename(repo, basename)?;
        let content = match commit_sha {
            Some(sha) if !sha.is_empty() => {
                let relative = file_path.strip_prefix(repo).ok()?;
                match git_show(repo, sha, relative).await {
                    Some(text) => text,
                    None => std::fs::read_to_string(&file_path).ok()?,
                }
            }
            _ => std::fs::read_to_string(&file_path).ok()?,
        };
        let (start_line, end_line, window) = extract_window(&content, line_no);
        let snippet_id = stable_hash(&format!("{}:{}", file_path.display(), line_no))[..12].to_string();
        Some(RepoSnippet {
            snippet_id,
            file_path: file_path.display().to_string(),
            start_line,
            end_line,
            content: window,
            reason: format!("stack frame: {basename}:{line_no}"),
        })
    }

    /// Keyword search via `grep -RIn`, two matches per keyword, capped.
    pub async fn search_snippets(
        &self,
        repo_local_path: &str,
        keywords: &[String],
        limit: usize,
    ) -> Vec<RepoSnippet> {
        let repo = Path::new(repo_local_path);
        if repo_local_path.is_empty() || !repo.exists() || keywords.is_empty() {
            return Vec::new();
        }

        let mut snippets = Vec::new();
        for keyword in keywords.iter().take(limit) {
            let output = Command::new("grep")
                .args(["-RIn", "--exclude-dir=.git", keyword])
                .arg(repo)
                .output()
                .await;
            let Ok(output) = output else {
                return snippets;
            };
            let stdout = String::from_utf8_lossy(&output.stdout);
            for line in stdout.lines().take(2) {
                let mut parts = line.splitn(3, ':');
                let (Some(path), Some(line_no), Some(_)) =
                    (parts.next(), parts.next(), parts.next())
                else {
                    continue;
                };
                let Ok(line_no) = line_no.parse::<usize>() else {
                    continue;
                };
                let Ok(content) = std::fs::read_to_string(path) else {
                    continue;
                };
                let (start_line, end_line, window) = extract_window(&content, line_no);
                snippets.push(RepoSnippet {
                    snippet_id: stable_hash(&format!("{path}:{line_no}:{keyword}"))[..12]
                        .to_string(),
                    file_path: path.to_string(),
                    start_line,
                    end_line,
                    content: window,
                    reason: format!("keyword match: {keyword}"),
                });
                if snippets.len() >= limit {
                    return snippets;
                }
            }
        }
        snippets
    }

    /// Last `limit` commit subjects via `git log --oneline`.
    pub async fn recent_commits(&self, repo_local_path: &str, limit: usize) -> Vec<String> {
        let repo = Path::new(repo_local_path);
        if repo_local_path.is_empty() || !repo.exists() || limit == 0 {
            return Vec::new();
        }
        let output = Command::new("git")
            .arg("-C")
            .arg(repo)
            .args(["log", "--oneline", "-n", &limit.to_string()])
            .output()
            .await;
        match output {
            Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
                .lines()
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }
}

async fn git_show(repo: &Path, sha: &str, relative: &Path) -> Option<String> {
    let spec = format!("{}:{}", sha, relative.display());
    let output = Command::new("git")
        .arg("-C")
        .arg(repo)
        .args(["show", &spec])
        .output()
        .await
        .ok()?;
    if output.status.success() {
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        None
    }
}

/// Depth-first search for a file by basename, skipping `.git`.
fn find_file_by_basename(root: &Path, basename: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(root).ok()?;
    let mut directories = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if path.file_name().is_some_and(|name| name == ".git") {
                continue;
            }
            directories.push(path);
        } else if path.file_name().is_some_and(|name| name == basename) {
            return Some(path);
        }
    }
    directories
        .into_iter()
        .find_map(|dir| find_file_by_basename(&dir, basename))
}

/// ±10-line window around a 1-indexed line number.
fn extract_window(content: &str, line_no: usize) -> (usize, usize, String) {
    let lines: Vec<&str> = content.lines().collect();
    let start = line_no.saturating_sub(11);
    let end = (line_no + 10).min(lines.len());
    let window = lines
        .get(start..end)
        .unwrap_or_default()
        .join("\n");
    (start + 1, end, window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn seeded_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("app");
        std::fs::create_dir(&nested).expect("mkdir");
        let mut file = std::fs::File::create(nested.join("handler.py")).expect("create");
        for i in 1..=40 {
            writeln!(file, "line {i} retry_checkout logic").expect("write");
        }
        dir
    }

    #[tokio::test]
    async fn test_snippet_for_file_line_finds_nested_file() {
        let dir = seeded_repo();
        let fetcher = RepoSnippetFetcher;
        let snippet = fetcher
            .snippet_for_file_line(&dir.path().display().to_string(), "handler.py", 20, None)
            .await
            .expect("snippet");
        assert_eq!(snippet.start_line, 10);
        assert_eq!(snippet.end_line, 30);
        assert!(snippet.content.contains("line 20"));
        assert_eq!(snippet.snippet_id.len(), 12);
    }

    #[tokio::test]
    async fn test_missing_repo_yields_nothing() {
        let fetcher = RepoSnippetFetcher;
        assert!(fetcher
            .snippet_for_file_line("/nonexistent/repo", "handler.py", 5, None)
            .await
            .is_none());
        assert!(fetcher
            .search_snippets("/nonexistent/repo", &["kw".to_string()], 5)
            .await
            .is_empty());
        assert!(fetcher.recent_commits("", 5).await.is_empty());
    }

    #[tokio::test]
    async fn test_keyword_search_returns_windows() {
        let dir = seeded_repo();
        let fetcher = RepoSnippetFetcher;
        let snippets = fetcher
            .search_snippets(
                &dir.path().display().to_string(),
                &["retry_checkout".to_string()],
                3,
            )
            .await;
        assert!(!snippets.is_empty());
        assert!(snippets.len() <= 3);
        assert!(snippets[0].reason.contains("retry_checkout"));
    }

    #[test]
    fn test_window_clamps_at_file_start() {
        let content = "a\nb\nc\nd\ne";
        let (start, end, window) = extract_window(content, 1);
        assert_eq!(start, 1);
        assert_eq!(end, 5);
        assert!(window.starts_with('a'));
    }
}
