//! External analysis script invocation and output classification.
//!
//! Every analysis endpoint has the same shape: run
//! `<python> <scripts_dir>/<script> <args…>`, then read the outcome from the
//! process output. A success marker line on stdout names the generated file;
//! diagnostics on stderr are pattern-matched into an [`UpstreamFailure`].

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use regex::Regex;
use tokio::process::Command;
use tokio::time::timeout;

use crate::errors::ScriptError;

static README_SAVED_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"README saved to: (.+\.md)").unwrap());

static COMMENTED_SAVED_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Commented code saved to: (.+)").unwrap());

/// Substrings on stderr that are noise rather than failures.
const WARNING_MARKERS: &[&str] = &["WARNING", "SyntaxWarning", "invalid escape sequence", "NOTICE"];

// ── Scripts ───────────────────────────────────────────────────────────

/// The external analysis scripts the server knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    ReadmeGenerator,
    Comments,
    Callgraph,
    RepoAnalyzer,
    LlamaInference,
}

impl Script {
    pub fn file_name(self) -> &'static str {
        match self {
            Script::ReadmeGenerator => "readme_generator.py",
            Script::Comments => "comments.py",
            Script::Callgraph => "generate_callgraph.py",
            Script::RepoAnalyzer => "repo_analyzer.py",
            Script::LlamaInference => "llama_inference.py",
        }
    }
}

/// A single script run: which script, its arguments and extra environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptInvocation {
    pub script: Script,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Index into `args` of a value that must never be logged.
    secret_arg: Option<usize>,
}

impl ScriptInvocation {
    pub fn new(script: Script, args: Vec<String>) -> Self {
        Self {
            script,
            args,
            env: Vec::new(),
            secret_arg: None,
        }
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    /// `readme_generator.py <url> [--simple]`
    pub fn readme(repo_url: &str, simple: bool) -> Self {
        let mut args = vec![repo_url.to_string()];
        if simple {
            args.push("--simple".to_string());
        }
        Self::new(Script::ReadmeGenerator, args)
    }

    /// `comments.py <url> --list-files`
    pub fn list_python_files(repo_url: &str) -> Self {
        Self::new(
            Script::Comments,
            vec![repo_url.to_string(), "--list-files".to_string()],
        )
    }

    /// `comments.py <url> [--file <path>]`
    pub fn comments(repo_url: &str, file_path: Option<&str>) -> Self {
        let mut args = vec![repo_url.to_string()];
        if let Some(file) = file_path {
            args.push("--file".to_string());
            args.push(file.to_string());
        }
        Self::new(Script::Comments, args)
    }

    /// `generate_callgraph.py --single-repo <url> --output <dir>`
    pub fn callgraph(repo_url: &str, output_dir: &Path) -> Self {
        Self::new(
            Script::Callgraph,
            vec![
                "--single-repo".to_string(),
                repo_url.to_string(),
                "--output".to_string(),
                output_dir.to_string_lossy().to_string(),
            ],
        )
        .with_env("PYTHONWARNINGS", "ignore")
    }

    /// `repo_analyzer.py <url> --output-dir <summaries> --analysis-dir <analysis>`
    pub fn repo_analyzer(repo_url: &str, summaries_dir: &Path, analysis_dir: &Path) -> Self {
        Self::new(
            Script::RepoAnalyzer,
            vec![
                repo_url.to_string(),
                "--output-dir".to_string(),
                summaries_dir.to_string_lossy().to_string(),
                "--analysis-dir".to_string(),
                analysis_dir.to_string_lossy().to_string(),
            ],
        )
    }

    /// `llama_inference.py <url> --token <hf_token>`
    pub fn llama(repo_url: &str, hf_token: &str) -> Self {
        let mut invocation = Self::new(
            Script::LlamaInference,
            vec![
                repo_url.to_string(),
                "--token".to_string(),
                hf_token.to_string(),
            ],
        );
        invocation.secret_arg = Some(2);
        invocation
    }

    /// Argument list safe for logs.
    pub fn display_args(&self) -> String {
        self.args
            .iter()
            .enumerate()
            .map(|(i, a)| {
                if Some(i) == self.secret_arg {
                    "<redacted>".to_string()
                } else {
                    a.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
}

impl ScriptOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stderr with warning-only lines removed, or `None` if nothing remains.
    pub fn significant_stderr(&self) -> Option<String> {
        significant_stderr(&self.stderr)
    }
}

// ── Runner ────────────────────────────────────────────────────────────

/// Abstraction over script execution for testability.
/// Real implementation: `ProcessRunner`.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    async fn run(&self, invocation: &ScriptInvocation) -> Result<ScriptOutput, ScriptError>;
}

/// Runs scripts as child processes of a configured interpreter.
pub struct ProcessRunner {
    interpreter: String,
    scripts_dir: PathBuf,
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(interpreter: &str, scripts_dir: &Path, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.to_string(),
            scripts_dir: scripts_dir.to_path_buf(),
            timeout,
        }
    }

    pub fn script_path(&self, script: Script) -> PathBuf {
        self.scripts_dir.join(script.file_name())
    }
}

#[async_trait]
impl ScriptRunner for ProcessRunner {
    async fn run(&self, invocation: &ScriptInvocation) -> Result<ScriptOutput, ScriptError> {
        let script_path = self.script_path(invocation.script);
        tracing::info!(
            script = %script_path.display(),
            args = %invocation.display_args(),
            "Running analysis script"
        );

        let mut command = Command::new(&self.interpreter);
        command
            .arg(&script_path)
            .args(&invocation.args)
            .current_dir(&self.scripts_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &invocation.env {
            command.env(key, value);
        }

        let child = command.spawn().map_err(|source| ScriptError::SpawnFailed {
            program: self.interpreter.clone(),
            source,
        })?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| ScriptError::Io {
                script: invocation.script.file_name().to_string(),
                source,
            })?,
            Err(_) => {
                return Err(ScriptError::TimedOut {
                    script: invocation.script.file_name().to_string(),
                    timeout: self.timeout,
                });
            }
        };

        let output = ScriptOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
        };

        tracing::debug!(
            script = invocation.script.file_name(),
            exit_code = ?output.exit_code,
            stdout_len = output.stdout.len(),
            stderr_len = output.stderr.len(),
            "Analysis script finished"
        );
        if !output.stderr.trim().is_empty() {
            tracing::debug!(script = invocation.script.file_name(), stderr = %output.stderr.trim());
        }

        Ok(output)
    }
}

// ── Output classification ─────────────────────────────────────────────

/// A recognised upstream failure reported by a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamFailure {
    NotFound,
    RateLimited,
    InvalidRepository,
}

impl UpstreamFailure {
    pub fn status(self) -> StatusCode {
        match self {
            UpstreamFailure::NotFound => StatusCode::NOT_FOUND,
            UpstreamFailure::RateLimited => StatusCode::FORBIDDEN,
            UpstreamFailure::InvalidRepository => StatusCode::BAD_REQUEST,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            UpstreamFailure::NotFound => "Repository not found",
            UpstreamFailure::RateLimited => "GitHub API rate limit exceeded",
            UpstreamFailure::InvalidRepository => "Invalid GitHub repository URL format",
        }
    }

    pub fn details(self) -> &'static str {
        match self {
            UpstreamFailure::NotFound => {
                "The GitHub profile exists, but the specified repository could not be found. It may be private, misspelled, or doesn't exist."
            }
            UpstreamFailure::RateLimited => {
                "We've reached the limit for GitHub API requests. Please try again later or use a GitHub token for authentication."
            }
            UpstreamFailure::InvalidRepository => {
                "Please use the format: https://github.com/username/repo"
            }
        }
    }
}

/// Map script diagnostics to a recognised failure. Checked in priority order:
/// not-found, then rate limit, then invalid repository.
pub fn classify_failure(text: &str) -> Option<UpstreamFailure> {
    if text.contains("404") || text.contains("Not Found") || text.contains("Repository not found") {
        Some(UpstreamFailure::NotFound)
    } else if text.contains("403") || text.contains("rate limit") {
        Some(UpstreamFailure::RateLimited)
    } else if text.contains("Invalid GitHub repository") {
        Some(UpstreamFailure::InvalidRepository)
    } else {
        None
    }
}

/// Drop warning-only lines from stderr. Returns what is left, if anything.
pub fn significant_stderr(stderr: &str) -> Option<String> {
    let kept: Vec<&str> = stderr
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !WARNING_MARKERS.iter().any(|m| line.contains(m)))
        .collect();
    if kept.is_empty() {
        None
    } else {
        Some(kept.join("\n"))
    }
}

/// Which success line a script prints when it has written its output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessMarker {
    ReadmeSaved,
    CommentedCodeSaved,
}

/// Extract the file path announced by a success marker line.
pub fn extract_marker(stdout: &str, marker: SuccessMarker) -> Option<PathBuf> {
    let regex = match marker {
        SuccessMarker::ReadmeSaved => &*README_SAVED_REGEX,
        SuccessMarker::CommentedCodeSaved => &*COMMENTED_SAVED_REGEX,
    };
    regex
        .captures(stdout)
        .and_then(|c| c.get(1))
        .map(|m| PathBuf::from(m.as_str().trim()))
}

/// Path the script announced, falling back to the whole trimmed stdout when
/// no marker line is present.
pub fn announced_path(stdout: &str, marker: SuccessMarker) -> Option<PathBuf> {
    extract_marker(stdout, marker).or_else(|| {
        let trimmed = stdout.trim();
        (!trimmed.is_empty() && !trimmed.contains('\n')).then(|| PathBuf::from(trimmed))
    })
}
