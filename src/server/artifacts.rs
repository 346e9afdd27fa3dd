//! Resolution of files written by the analysis scripts.
//!
//! Scripts announce where they wrote their output, but the announcement is
//! not always reliable, so every lookup walks the same chain:
//! 1. the path the script printed, if it can be read
//! 2. the standard path inside the well-known output folder
//! 3. a scan of that folder, one glob pattern at a time, newest file first

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use glob::Pattern;
use serde::Serialize;

use crate::config::OutputLayout;
use crate::errors::ArtifactError;

/// README flavours and the file-name prefix each one is saved under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadmeVariant {
    WithCallgraph,
    Simple,
    Llama,
}

impl ReadmeVariant {
    pub fn prefix(self) -> &'static str {
        match self {
            ReadmeVariant::WithCallgraph => "",
            ReadmeVariant::Simple => "simple_",
            ReadmeVariant::Llama => "llama_",
        }
    }

    /// Value of the `type` field returned to the browser.
    pub fn label(self) -> &'static str {
        match self {
            ReadmeVariant::WithCallgraph => "with-callgraph",
            ReadmeVariant::Simple => "without-callgraph",
            ReadmeVariant::Llama => "llama-inference",
        }
    }
}

/// Where a located artifact came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Direct,
    Standard,
    Scan,
}

/// A lookup: candidate paths plus scan patterns for the fallback.
#[derive(Debug, Clone, Default)]
pub struct ArtifactQuery {
    pub direct: Option<PathBuf>,
    pub standard: Option<PathBuf>,
    pub scan_dir: PathBuf,
    /// File-name glob patterns, highest priority first
    pub patterns: Vec<String>,
}

impl ArtifactQuery {
    pub fn with_direct(mut self, direct: Option<PathBuf>) -> Self {
        self.direct = direct;
        self
    }

    /// `README_FOLDER/{prefix}{repo}.md`
    pub fn readme(layout: &OutputLayout, repo: &str, variant: ReadmeVariant) -> Self {
        let file_name = format!("{}{}.md", variant.prefix(), repo);
        Self {
            direct: None,
            standard: Some(layout.readme_dir.join(&file_name)),
            scan_dir: layout.readme_dir.clone(),
            patterns: vec![Pattern::escape(&file_name)],
        }
    }

    /// `COMMENTED_CODE/commented_{basename}`, falling back to any commented file.
    pub fn commented(layout: &OutputLayout, original_path: Option<&str>) -> Self {
        let mut patterns = Vec::new();
        let mut standard = None;
        if let Some(base) = original_path.and_then(file_basename) {
            let expected = format!("commented_{}", base);
            standard = Some(layout.comments_dir.join(&expected));
            patterns.push(Pattern::escape(&expected));
            patterns.push(format!("commented_*{}*", Pattern::escape(base)));
        }
        patterns.push("commented_*.py".to_string());
        Self {
            direct: None,
            standard,
            scan_dir: layout.comments_dir.clone(),
            patterns,
        }
    }

    /// `CALLGRAPHS_FOLDER/{repo}.dot`, then `{repo}*.dot`
    pub fn callgraph(layout: &OutputLayout, repo: &str) -> Self {
        let escaped = Pattern::escape(repo);
        Self {
            direct: None,
            standard: Some(layout.callgraph_dir.join(format!("{}.dot", repo))),
            scan_dir: layout.callgraph_dir.clone(),
            patterns: vec![format!("{}.dot", escaped), format!("{}*.dot", escaped)],
        }
    }
}

/// A resolved artifact and its contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub path: PathBuf,
    pub content: String,
    pub resolution: Resolution,
}

impl Located {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Walk the resolution chain for `query`.
pub fn locate(query: &ArtifactQuery) -> Result<Located, ArtifactError> {
    let mut tried = 0;

    for (candidate, resolution) in [
        (query.direct.as_ref(), Resolution::Direct),
        (query.standard.as_ref(), Resolution::Standard),
    ] {
        let Some(path) = candidate else { continue };
        tried += 1;
        match std::fs::read_to_string(path) {
            Ok(content) => {
                tracing::debug!(path = %path.display(), ?resolution, "Resolved artifact");
                return Ok(Located {
                    path: path.clone(),
                    content,
                    resolution,
                });
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Artifact candidate not readable");
            }
        }
    }

    for pattern in &query.patterns {
        tried += 1;
        if let Some(path) = newest_match(&query.scan_dir, pattern)? {
            let content = std::fs::read_to_string(&path).map_err(|source| ArtifactError::Read {
                path: path.clone(),
                source,
            })?;
            tracing::info!(
                path = %path.display(),
                pattern = %pattern,
                "Resolved artifact by directory scan"
            );
            return Ok(Located {
                path,
                content,
                resolution: Resolution::Scan,
            });
        }
    }

    Err(ArtifactError::NotFound { tried })
}

/// Most recently modified file in `dir` whose name matches `pattern`.
/// A missing directory yields `None`.
pub fn newest_match(dir: &Path, pattern: &str) -> Result<Option<PathBuf>, ArtifactError> {
    if !dir.is_dir() {
        return Ok(None);
    }

    let full = format!("{}/{}", Pattern::escape(&dir.to_string_lossy()), pattern);
    let entries = glob::glob(&full).map_err(|source| ArtifactError::Pattern {
        pattern: full.clone(),
        source,
    })?;

    let newest = entries
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_file())
        .map(|path| {
            let modified = std::fs::metadata(&path)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, path)
        })
        .max_by(|a, b| a.0.cmp(&b.0));

    Ok(newest.map(|(_, path)| path))
}

fn file_basename(path: &str) -> Option<&str> {
    path.rsplit(['/', '\\']).next().filter(|s| !s.is_empty())
}

// ── Analysis files ────────────────────────────────────────────────────

/// Which intermediate analysis outputs exist for a repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisFiles {
    pub repo_analysis: bool,
    pub function_summaries: bool,
    pub callgraph: bool,
}

impl AnalysisFiles {
    pub fn probe(layout: &OutputLayout, repo: &str) -> Self {
        Self {
            repo_analysis: layout.repo_analysis_dir.join(format!("{}.json", repo)).is_file(),
            function_summaries: function_summaries_path(layout, repo).is_file(),
            callgraph: layout.callgraph_dir.join(format!("{}.dot", repo)).is_file(),
        }
    }

    pub fn any(&self) -> bool {
        self.repo_analysis || self.function_summaries || self.callgraph
    }
}

pub fn function_summaries_path(layout: &OutputLayout, repo: &str) -> PathBuf {
    layout.function_summaries_dir.join(format!("{}.json", repo))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::time::Duration;
    use tempfile::tempdir;

    fn touch(path: &Path, content: &str, age_secs: u64) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
        let mtime = SystemTime::now() - Duration::from_secs(age_secs);
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();
    }

    #[test]
    fn test_direct_path_wins() {
        let dir = tempdir().unwrap();
        let layout = OutputLayout::under(dir.path());
        let direct = dir.path().join("elsewhere.md");
        touch(&direct, "direct", 0);
        touch(&layout.readme_dir.join("repo.md"), "standard", 0);

        let query = ArtifactQuery::readme(&layout, "repo", ReadmeVariant::WithCallgraph)
            .with_direct(Some(direct.clone()));
        let found = locate(&query).unwrap();
        assert_eq!(found.resolution, Resolution::Direct);
        assert_eq!(found.content, "direct");
        assert_eq!(found.path, direct);
    }

    #[test]
    fn test_unreadable_direct_falls_back_to_standard() {
        let dir = tempdir().unwrap();
        let layout = OutputLayout::under(dir.path());
        touch(&layout.readme_dir.join("simple_repo.md"), "# Simple", 0);

        let query = ArtifactQuery::readme(&layout, "repo", ReadmeVariant::Simple)
            .with_direct(Some(dir.path().join("missing.md")));
        let found = locate(&query).unwrap();
        assert_eq!(found.resolution, Resolution::Standard);
        assert_eq!(found.content, "# Simple");
        assert_eq!(found.file_name(), "simple_repo.md");
    }

    #[test]
    fn test_scan_picks_newest_match() {
        let dir = tempdir().unwrap();
        let layout = OutputLayout::under(dir.path());
        touch(&layout.callgraph_dir.join("repo_old.dot"), "old", 100);
        touch(&layout.callgraph_dir.join("repo_new.dot"), "new", 1);
        touch(&layout.callgraph_dir.join("other.dot"), "other", 0);

        let found = locate(&ArtifactQuery::callgraph(&layout, "repo")).unwrap();
        assert_eq!(found.resolution, Resolution::Scan);
        assert_eq!(found.content, "new");
    }

    #[test]
    fn test_scan_respects_pattern_priority_over_recency() {
        let dir = tempdir().unwrap();
        let layout = OutputLayout::under(dir.path());
        touch(&layout.comments_dir.join("commented_x_main.py"), "partial", 50);
        touch(&layout.comments_dir.join("commented_other.py"), "newest", 0);

        // no exact commented_main.py, so the standard path misses
        let found = locate(&ArtifactQuery::commented(&layout, Some("src/main.py"))).unwrap();
        assert_eq!(found.resolution, Resolution::Scan);
        assert_eq!(found.content, "partial");
    }

    #[test]
    fn test_commented_without_file_uses_any_python_file() {
        let dir = tempdir().unwrap();
        let layout = OutputLayout::under(dir.path());
        touch(&layout.comments_dir.join("commented_a.py"), "a", 30);
        touch(&layout.comments_dir.join("commented_b.py"), "b", 2);
        touch(&layout.comments_dir.join("commented_c.txt"), "c", 0);

        let query = ArtifactQuery::commented(&layout, None);
        assert!(query.standard.is_none());
        let found = locate(&query).unwrap();
        assert_eq!(found.content, "b");
    }

    #[test]
    fn test_commented_standard_path_uses_basename() {
        let dir = tempdir().unwrap();
        let layout = OutputLayout::under(dir.path());
        let query = ArtifactQuery::commented(&layout, Some("pkg/sub/util.py"));
        assert_eq!(
            query.standard,
            Some(layout.comments_dir.join("commented_util.py"))
        );
        assert_eq!(query.patterns[0], "commented_util.py");
        assert_eq!(query.patterns[1], "commented_*util.py*");
    }

    #[test]
    fn test_missing_directory_is_not_found() {
        let dir = tempdir().unwrap();
        let layout = OutputLayout::under(&dir.path().join("nothing-here"));
        let err = locate(&ArtifactQuery::callgraph(&layout, "repo")).unwrap_err();
        assert!(matches!(err, ArtifactError::NotFound { tried: 3 }));
    }

    #[test]
    fn test_repo_names_with_glob_characters_are_escaped() {
        let dir = tempdir().unwrap();
        let layout = OutputLayout::under(dir.path());
        touch(&layout.callgraph_dir.join("rxyz.dot"), "wrong", 0);

        let pattern = format!("{}.dot", Pattern::escape("r[x]yz"));
        assert!(newest_match(&layout.callgraph_dir, &pattern).unwrap().is_none());
        assert!(locate(&ArtifactQuery::callgraph(&layout, "r[x]yz")).is_err());
    }

    #[test]
    fn test_readme_variants() {
        assert_eq!(ReadmeVariant::WithCallgraph.prefix(), "");
        assert_eq!(ReadmeVariant::Simple.label(), "without-callgraph");
        assert_eq!(ReadmeVariant::Llama.prefix(), "llama_");
    }

    #[test]
    fn test_analysis_files_probe() {
        let dir = tempdir().unwrap();
        let layout = OutputLayout::under(dir.path());
        assert!(!AnalysisFiles::probe(&layout, "repo").any());

        touch(&function_summaries_path(&layout, "repo"), "{}", 0);
        let files = AnalysisFiles::probe(&layout, "repo");
        assert!(files.function_summaries);
        assert!(!files.repo_analysis);
        assert!(files.any());

        let json = serde_json::to_value(files).unwrap();
        assert_eq!(json["functionSummaries"], true);
        assert_eq!(json["repoAnalysis"], false);
    }
}
