use std::path::Path;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path as UrlPath, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::artifacts::{self, AnalysisFiles, ArtifactQuery, ReadmeVariant};
use super::extract::JsonOrForm;
use super::github::{GitHubClient, GitHubGateway};
use super::pending::PendingUpdates;
use super::readme::clean_readme_content;
use super::repo_url::{RepoRef, parse_repo_url};
use super::scripts::{
    ProcessRunner, ScriptInvocation, ScriptOutput, ScriptRunner, SuccessMarker, UpstreamFailure,
    announced_path, classify_failure,
};
use super::webhook::{receive_webhook, webhook_liveness};
use crate::config::{NarratorConfig, OutputLayout};
use crate::errors::{GitHubError, RepoUrlError, ScriptError};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub runner: Arc<dyn ScriptRunner>,
    pub github: Arc<dyn GitHubGateway>,
    pub pending: Arc<PendingUpdates>,
    pub output: OutputLayout,
    pub huggingface_token: Option<String>,
    pub webhook_secret: Option<String>,
    pub pr_welcome_message: String,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire the real process runner and GitHub client from configuration.
    pub fn from_config(config: &NarratorConfig) -> Self {
        Self {
            runner: Arc::new(ProcessRunner::new(
                &config.python_cmd,
                &config.scripts_dir,
                config.script_timeout,
            )),
            github: Arc::new(GitHubClient::new(
                &config.github_api_url,
                config.github_token.clone(),
                config.app.clone(),
            )),
            pending: Arc::new(PendingUpdates::with_capacity(config.pending_capacity)),
            output: config.output.clone(),
            huggingface_token: config.huggingface_token.clone(),
            webhook_secret: config.webhook_secret.clone(),
            pr_welcome_message: config.pr_welcome_message.clone(),
        }
    }
}

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct RepoRequest {
    #[serde(default)]
    pub repo_url: String,
}

#[derive(Deserialize)]
pub struct CommentsRequest {
    #[serde(default)]
    pub repo_url: String,
    #[serde(default)]
    pub file_path: Option<String>,
}

/// Installation ids arrive as numbers from scripts and as strings from the
/// browser, which reads them out of the query string.
#[derive(Deserialize)]
#[serde(untagged)]
pub enum InstallationIdField {
    Number(u64),
    Text(String),
}

impl InstallationIdField {
    fn value(&self) -> Option<u64> {
        match self {
            InstallationIdField::Number(n) => Some(*n),
            InstallationIdField::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushReadmeRequest {
    #[serde(default)]
    pub repo_url: String,
    #[serde(default)]
    pub readme_content: String,
    pub installation_id: Option<InstallationIdField>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushCommentsRequest {
    #[serde(default)]
    pub repo_url: String,
    #[serde(default)]
    pub commented_content: String,
    #[serde(default)]
    pub file_path: String,
    pub installation_id: Option<InstallationIdField>,
}

#[derive(Deserialize)]
pub struct DownloadQuery {
    pub filename: Option<String>,
}

#[derive(Deserialize)]
pub struct InstallQuery {
    pub installation_id: Option<String>,
    pub setup_action: Option<String>,
}

// ── Response types ────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ReadmeResponse {
    pub readme: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

#[derive(Serialize)]
pub struct CommentsResponse {
    pub commented_code: String,
    pub filename: String,
    #[serde(rename = "originalPath")]
    pub original_path: String,
}

#[derive(Serialize)]
pub struct CallgraphResponse {
    pub success: bool,
    pub filename: String,
    pub message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisStatus {
    pub analysis_exists: bool,
    pub files: AnalysisFiles,
}

#[derive(Serialize)]
pub struct InferenceResults {
    pub function_summaries_path: Option<String>,
    pub function_summaries: Option<serde_json::Value>,
    pub callgraph_path: Option<String>,
}

#[derive(Serialize)]
pub struct InferenceReport {
    pub success: bool,
    pub message: &'static str,
    pub repo_name: String,
    pub results: InferenceResults,
}

#[derive(Serialize)]
pub struct PushResponse {
    pub success: bool,
    pub message: &'static str,
    pub commit_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

// ── Error handling ────────────────────────────────────────────────────

/// JSON error returned to the browser: `{"error": ..., "details": ...}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: String,
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    pub fn internal(error: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error)
    }

    /// Mapping used for read-only GitHub calls such as metadata lookups.
    pub fn from_github(err: GitHubError) -> Self {
        match (&err, err.status()) {
            (GitHubError::AppNotConfigured, _) => app_not_configured(),
            (_, Some(404)) => Self::new(
                StatusCode::NOT_FOUND,
                "Repository not found. The repository might be private or doesn't exist.",
            )
            .with_details("Please check that the URL is correct and the repository is public."),
            (_, Some(403)) => Self::new(
                StatusCode::FORBIDDEN,
                "Access forbidden. GitHub API rate limit may have been exceeded.",
            )
            .with_details("Please try again later or use a GitHub token for authentication."),
            (_, Some(401)) => Self::new(
                StatusCode::UNAUTHORIZED,
                "Authentication failed. GitHub token may have expired or is invalid.",
            )
            .with_details("Please check your GitHub token configuration."),
            _ => Self::internal(format!("Error accessing GitHub API: {}", err)).with_details(
                "There may be an issue with the GitHub API or with your connection.",
            ),
        }
    }

    /// Mapping used when writing to a repository through the app.
    fn from_push(err: GitHubError, error: &str) -> Self {
        if matches!(err, GitHubError::AppNotConfigured) {
            return app_not_configured();
        }
        let details = match err.status() {
            Some(403) => {
                "Permission denied. Make sure the GitHub App has write access to the repository."
                    .to_string()
            }
            Some(404) => {
                "Repository not found or GitHub App is not installed on this repository.".to_string()
            }
            _ => err.to_string(),
        };
        Self::internal(error).with_details(details)
    }
}

fn app_not_configured() -> ApiError {
    ApiError::new(
        StatusCode::SERVICE_UNAVAILABLE,
        "GitHub App is not configured",
    )
    .with_details("Set APP_ID and PRIVATE_KEY (or PRIVATE_KEY_PATH) to enable GitHub integration.")
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self.details {
            Some(details) => json!({"error": self.error, "details": details}),
            None => json!({"error": self.error}),
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<RepoUrlError> for ApiError {
    fn from(err: RepoUrlError) -> Self {
        let details = match err {
            RepoUrlError::Empty => "The URL field cannot be empty.",
            _ => "Please check the URL and try again.",
        };
        ApiError::bad_request(err.to_string()).with_details(details)
    }
}

impl From<UpstreamFailure> for ApiError {
    fn from(failure: UpstreamFailure) -> Self {
        ApiError::new(failure.status(), failure.message()).with_details(failure.details())
    }
}

impl From<ScriptError> for ApiError {
    fn from(err: ScriptError) -> Self {
        match &err {
            ScriptError::TimedOut { .. } => {
                ApiError::new(StatusCode::GATEWAY_TIMEOUT, "Analysis timed out")
                    .with_details(err.to_string())
            }
            ScriptError::SpawnFailed { .. } | ScriptError::Io { .. } => {
                ApiError::internal("Failed to run analysis script").with_details(err.to_string())
            }
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/fetch-metadata", post(fetch_metadata))
        .route("/generate-readme", post(generate_readme))
        .route("/generate-readme-with-callgraph", post(generate_readme))
        .route("/generate-readme-without-callgraph", post(generate_simple_readme))
        .route("/fetch-python-files", post(fetch_python_files))
        .route("/generate-comments", post(generate_comments))
        .route("/generate-callgraph", post(generate_callgraph))
        .route("/download-callgraph", get(download_callgraph))
        .route("/check-analysis-files", post(check_analysis_files))
        .route("/run-codet5-inference", post(run_codet5_inference))
        .route("/run-llama-inference", post(run_llama_inference))
        .route("/api/check-updates/{owner}/{repo}", get(check_updates))
        .route("/api/clear-update/{owner}/{repo}", post(clear_update))
        .route(
            "/api/check-updates-global/{installation_id}",
            get(check_updates_global),
        )
        .route(
            "/api/clear-update-global/{installation_id}",
            post(clear_update_global),
        )
        .route("/install", get(install_redirect))
        .route("/api/push-readme", post(push_readme))
        .route("/api/push-comments", post(push_comments))
        .route("/debug/installations", get(debug_installations))
        .route("/debug/installation/{installation_id}", get(debug_installation))
        .route("/api/webhook", get(webhook_liveness).post(receive_webhook))
        .route("/events", post(receive_webhook))
}

// ── Helpers ───────────────────────────────────────────────────────────

fn require_repo(repo_url: &str) -> Result<RepoRef, ApiError> {
    Ok(parse_repo_url(repo_url)?)
}

/// Installation IDs arrive as path segments; reject non-numeric ones with
/// the usual JSON error body.
fn parse_installation_id(raw: &str) -> Result<u64, ApiError> {
    raw.trim().parse().map_err(|_| {
        ApiError::bad_request("Invalid installation ID")
            .with_details(format!("'{}' is not a numeric GitHub App installation ID", raw))
    })
}

async fn ensure_dir(dir: &Path) -> Result<(), ApiError> {
    tokio::fs::create_dir_all(dir).await.map_err(|e| {
        tracing::error!(dir = %dir.display(), error = %e, "Failed to create output directory");
        ApiError::internal("Failed to prepare output directory").with_details(e.to_string())
    })
}

/// Which stderr output fails an otherwise clean (exit 0) script run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StderrPolicy {
    /// Anything other than warnings.
    Strict,
    /// Only not-found and rate-limit diagnostics. Progress chatter passes.
    UpstreamOnly,
    /// Lines carrying `Error:` or `Exception:`.
    ErrorMarkers,
}

impl StderrPolicy {
    fn failing_stderr(self, output: &ScriptOutput) -> Option<String> {
        match self {
            StderrPolicy::Strict => output.significant_stderr(),
            StderrPolicy::UpstreamOnly => classify_failure(&output.stderr)
                .filter(|f| matches!(f, UpstreamFailure::NotFound | UpstreamFailure::RateLimited))
                .map(|_| output.stderr.clone()),
            StderrPolicy::ErrorMarkers => output
                .significant_stderr()
                .filter(|s| s.contains("Error:") || s.contains("Exception:")),
        }
    }
}

/// Reject script runs that exited non-zero or whose stderr fails `policy`.
/// Recognised diagnostics map to 404/403/400.
fn ensure_script_succeeded(
    output: &ScriptOutput,
    policy: StderrPolicy,
    error: &str,
    details: &str,
) -> Result<(), ApiError> {
    let failing = policy.failing_stderr(output);
    if output.success() && failing.is_none() {
        if !output.stderr.trim().is_empty() {
            tracing::debug!(stderr = %output.stderr.trim(), "Script stderr (not shown to user)");
        }
        return Ok(());
    }

    let diagnostics = failing
        .or_else(|| output.significant_stderr())
        .unwrap_or_else(|| format!("{}\n{}", output.stderr, output.stdout));
    tracing::error!(
        exit_code = ?output.exit_code,
        diagnostics = %diagnostics.trim(),
        "Analysis script failed"
    );

    if let Some(failure) = classify_failure(&diagnostics) {
        return Err(failure.into());
    }
    Err(ApiError::internal(error).with_details(details))
}

async fn readme_flow(
    state: &AppState,
    repo: &RepoRef,
    invocation: ScriptInvocation,
    variant: ReadmeVariant,
    error: &str,
) -> Result<Json<ReadmeResponse>, ApiError> {
    ensure_dir(&state.output.readme_dir).await?;
    let output = state.runner.run(&invocation).await?;
    ensure_script_succeeded(
        &output,
        StderrPolicy::Strict,
        error,
        "The Python script failed to execute properly. Please try again or try with a different repository.",
    )?;

    let direct = announced_path(&output.stdout, SuccessMarker::ReadmeSaved);
    let query = ArtifactQuery::readme(&state.output, &repo.name, variant).with_direct(direct);
    let located = artifacts::locate(&query).map_err(|e| {
        tracing::error!(repo = %repo, error = %e, "Generated README could not be read");
        ApiError::internal("Could not read generated README file")
            .with_details("The README was generated but could not be read from disk.")
    })?;

    tracing::info!(repo = %repo, path = %located.path.display(), kind = variant.label(), "README generated");
    Ok(Json(ReadmeResponse {
        readme: clean_readme_content(&located.content),
        kind: variant.label(),
    }))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn fetch_metadata(
    State(state): State<SharedState>,
    JsonOrForm(req): JsonOrForm<RepoRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = require_repo(&req.repo_url)?;
    let metadata = state
        .github
        .repo_metadata(&repo)
        .await
        .map_err(ApiError::from_github)?;
    Ok(Json(metadata))
}

async fn generate_readme(
    State(state): State<SharedState>,
    JsonOrForm(req): JsonOrForm<RepoRequest>,
) -> Result<Json<ReadmeResponse>, ApiError> {
    let repo = require_repo(&req.repo_url)?;
    tracing::info!(repo = %repo, "Generating README with call graph");
    readme_flow(
        &state,
        &repo,
        ScriptInvocation::readme(req.repo_url.trim(), false),
        ReadmeVariant::WithCallgraph,
        "Error generating README",
    )
    .await
}

async fn generate_simple_readme(
    State(state): State<SharedState>,
    JsonOrForm(req): JsonOrForm<RepoRequest>,
) -> Result<Json<ReadmeResponse>, ApiError> {
    let repo = require_repo(&req.repo_url)?;
    tracing::info!(repo = %repo, "Generating simple README");
    readme_flow(
        &state,
        &repo,
        ScriptInvocation::readme(req.repo_url.trim(), true),
        ReadmeVariant::Simple,
        "Error generating README",
    )
    .await
}

async fn fetch_python_files(
    State(state): State<SharedState>,
    JsonOrForm(req): JsonOrForm<RepoRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = require_repo(&req.repo_url)?;
    let output = state
        .runner
        .run(&ScriptInvocation::list_python_files(req.repo_url.trim()))
        .await?;
    ensure_script_succeeded(
        &output,
        StderrPolicy::UpstreamOnly,
        "Error fetching Python files",
        "There was a problem accessing the repository. Please ensure it exists and is public.",
    )?;

    let no_files = || {
        ApiError::new(StatusCode::NOT_FOUND, "No Python files found in this repository.")
            .with_details("The repository exists but doesn't contain any Python files.")
    };

    let trimmed = output.stdout.trim();
    if !trimmed.starts_with('[') {
        if trimmed.contains("No Python files found") {
            return Err(no_files());
        }
        tracing::error!(repo = %repo, stdout = %trimmed, "File listing is not a JSON array");
        return Err(ApiError::internal("Failed to retrieve Python files")
            .with_details("The repository might be private, empty, or doesn't exist."));
    }

    let files: Vec<String> = serde_json::from_str(trimmed).map_err(|e| {
        tracing::error!(repo = %repo, error = %e, "Could not parse file listing");
        ApiError::internal("Failed to parse the list of Python files")
            .with_details("There was an issue processing the repository data.")
    })?;
    if files.is_empty() {
        return Err(no_files());
    }

    tracing::info!(repo = %repo, count = files.len(), "Listed Python files");
    Ok(Json(json!({ "files": files })))
}

async fn generate_comments(
    State(state): State<SharedState>,
    JsonOrForm(req): JsonOrForm<CommentsRequest>,
) -> Result<Json<CommentsResponse>, ApiError> {
    let repo = require_repo(&req.repo_url)?;
    let file_path = req
        .file_path
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());
    tracing::info!(repo = %repo, file = file_path.unwrap_or("default"), "Generating comments");

    ensure_dir(&state.output.comments_dir).await?;
    let output = state
        .runner
        .run(&ScriptInvocation::comments(req.repo_url.trim(), file_path))
        .await?;
    ensure_script_succeeded(
        &output,
        StderrPolicy::ErrorMarkers,
        "Error generating comments",
        "The Python script failed to execute properly.",
    )?;
    if output.stdout.contains("Error generating comments:") || output.stdout.contains("Error:") {
        tracing::error!(repo = %repo, stdout = %output.stdout.trim(), "Comment script reported an error");
        return Err(ApiError::internal(output.stdout.trim()));
    }

    let direct = announced_path(&output.stdout, SuccessMarker::CommentedCodeSaved);
    let query = ArtifactQuery::commented(&state.output, file_path).with_direct(direct);
    let located = artifacts::locate(&query).map_err(|e| {
        tracing::error!(repo = %repo, error = %e, "Commented file could not be read");
        ApiError::internal("Could not read the generated comments file").with_details(e.to_string())
    })?;

    let filename = located.file_name();
    if let Some(requested) = file_path
        && let Some(base) = Path::new(requested).file_name()
        && !filename.contains(&*base.to_string_lossy())
    {
        tracing::warn!(returned = %filename, requested, "Returned commented file does not match the requested file");
    }

    Ok(Json(CommentsResponse {
        commented_code: located.content,
        filename,
        original_path: file_path.unwrap_or("default").to_string(),
    }))
}

async fn generate_callgraph(
    State(state): State<SharedState>,
    JsonOrForm(req): JsonOrForm<RepoRequest>,
) -> Result<Json<CallgraphResponse>, ApiError> {
    let repo = require_repo(&req.repo_url)?;
    let out_dir = state.output.callgraph_dir.clone();
    ensure_dir(&out_dir).await?;

    let output = state
        .runner
        .run(&ScriptInvocation::callgraph(req.repo_url.trim(), &out_dir))
        .await?;
    ensure_script_succeeded(
        &output,
        StderrPolicy::Strict,
        "Error generating callgraph",
        "There was a problem processing your repository.",
    )?;

    let located = artifacts::locate(&ArtifactQuery::callgraph(&state.output, &repo.name)).map_err(|e| {
        tracing::error!(repo = %repo, error = %e, "Call graph output missing");
        ApiError::internal("Callgraph file not found")
            .with_details("The callgraph was generated but the output file was not found.")
    })?;

    Ok(Json(CallgraphResponse {
        success: true,
        filename: located.file_name(),
        message: format!("Callgraph for {} has been generated successfully!", repo),
    }))
}

async fn download_callgraph(
    State(state): State<SharedState>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, ApiError> {
    let filename = query.filename.unwrap_or_default();
    if filename.is_empty() {
        return Err(ApiError::bad_request("Filename is required")
            .with_details("Please provide a valid filename"));
    }
    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        return Err(ApiError::bad_request("Invalid filename")
            .with_details("The filename contains invalid characters"));
    }

    let path = state.output.callgraph_dir.join(&filename);
    let bytes = tokio::fs::read(&path).await.map_err(|e| {
        tracing::debug!(path = %path.display(), error = %e, "Call graph download missed");
        ApiError::new(StatusCode::NOT_FOUND, "File not found")
            .with_details("The requested callgraph file does not exist")
    })?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/vnd.graphviz".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        bytes,
    )
        .into_response())
}

async fn check_analysis_files(
    State(state): State<SharedState>,
    JsonOrForm(req): JsonOrForm<RepoRequest>,
) -> Result<Json<AnalysisStatus>, ApiError> {
    let repo = require_repo(&req.repo_url)?;
    let files = AnalysisFiles::probe(&state.output, &repo.name);
    Ok(Json(AnalysisStatus {
        analysis_exists: files.any(),
        files,
    }))
}

/// Runs the analyzer and then the call graph generator; the second step runs
/// even when the first one fails.
async fn run_codet5_inference(
    State(state): State<SharedState>,
    JsonOrForm(req): JsonOrForm<RepoRequest>,
) -> Result<Json<InferenceReport>, ApiError> {
    let repo = require_repo(&req.repo_url)?;
    let url = req.repo_url.trim();
    tracing::info!(repo = %repo, "Running CodeT5 inference");

    let layout = &state.output;
    for dir in [
        &layout.function_summaries_dir,
        &layout.callgraph_dir,
        &layout.repo_analysis_dir,
    ] {
        ensure_dir(dir).await?;
    }

    let analyzer_ok = run_step(
        &state,
        ScriptInvocation::repo_analyzer(url, &layout.function_summaries_dir, &layout.repo_analysis_dir),
    )
    .await;
    let callgraph_ok = run_step(&state, ScriptInvocation::callgraph(url, &layout.callgraph_dir)).await;

    let summaries_path = artifacts::function_summaries_path(layout, &repo.name);
    let function_summaries = match tokio::fs::read_to_string(&summaries_path).await {
        Ok(raw) => serde_json::from_str::<serde_json::Value>(&raw)
            .map_err(|e| tracing::warn!(path = %summaries_path.display(), error = %e, "Function summaries are not valid JSON"))
            .ok(),
        Err(_) => None,
    };
    let callgraph_name = format!("{}.dot", repo.name);
    let callgraph_exists = layout.callgraph_dir.join(&callgraph_name).is_file();

    Ok(Json(InferenceReport {
        success: analyzer_ok || callgraph_ok,
        message: if analyzer_ok && callgraph_ok {
            "Code analysis and call graph generation completed successfully!"
        } else {
            "Partial success: Some components couldn't be generated."
        },
        repo_name: repo.name.clone(),
        results: InferenceResults {
            function_summaries_path: summaries_path
                .is_file()
                .then(|| summaries_path.display().to_string()),
            function_summaries,
            callgraph_path: callgraph_exists.then_some(callgraph_name),
        },
    }))
}

/// One step of a multi-script pipeline. Failures are logged, not returned.
async fn run_step(state: &AppState, invocation: ScriptInvocation) -> bool {
    let script = invocation.script.file_name();
    match state.runner.run(&invocation).await {
        Ok(output) if output.success() => {
            tracing::info!(script, "Pipeline step completed");
            true
        }
        Ok(output) => {
            tracing::error!(script, exit_code = ?output.exit_code, stderr = %output.stderr.trim(), "Pipeline step failed");
            false
        }
        Err(e) => {
            tracing::error!(script, error = %e, "Pipeline step could not run");
            false
        }
    }
}

async fn run_llama_inference(
    State(state): State<SharedState>,
    JsonOrForm(req): JsonOrForm<RepoRequest>,
) -> Result<Json<ReadmeResponse>, ApiError> {
    let repo = require_repo(&req.repo_url)?;
    if !AnalysisFiles::probe(&state.output, &repo.name).any() {
        return Err(ApiError::bad_request("Required analysis data not found").with_details(
            "Please run CodeT5 inference first to generate the necessary analysis files.",
        ));
    }

    let token = state.huggingface_token.as_deref().unwrap_or_else(|| {
        tracing::warn!("HUGGINGFACE_TOKEN is not set; running llama inference without a token");
        ""
    });
    tracing::info!(repo = %repo, "Running Llama inference");
    readme_flow(
        &state,
        &repo,
        ScriptInvocation::llama(req.repo_url.trim(), token),
        ReadmeVariant::Llama,
        "Error generating README with Llama",
    )
    .await
}

// ── Pending updates ───────────────────────────────────────────────────

async fn check_updates(
    State(state): State<SharedState>,
    UrlPath((owner, repo)): UrlPath<(String, String)>,
) -> Json<serde_json::Value> {
    let full_name = format!("{}/{}", owner, repo);
    match state.pending.get(&full_name) {
        Some(update) => Json(json!({ "hasPendingUpdate": true, "update": update })),
        None => Json(json!({ "hasPendingUpdate": false })),
    }
}

async fn clear_update(
    State(state): State<SharedState>,
    UrlPath((owner, repo)): UrlPath<(String, String)>,
) -> Json<serde_json::Value> {
    let full_name = format!("{}/{}", owner, repo);
    if state.pending.clear(&full_name) {
        tracing::info!(repo = %full_name, "Pending update acknowledged");
    }
    Json(json!({ "success": true }))
}

async fn check_updates_global(
    State(state): State<SharedState>,
    UrlPath(raw_id): UrlPath<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let installation_id = parse_installation_id(&raw_id)?;
    Ok(match state.pending.find_by_installation(installation_id) {
        Some((_, update)) => Json(json!({ "hasPendingUpdate": true, "update": update })),
        None => Json(json!({ "hasPendingUpdate": false })),
    })
}

async fn clear_update_global(
    State(state): State<SharedState>,
    UrlPath(raw_id): UrlPath<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let installation_id = parse_installation_id(&raw_id)?;
    let cleared = state.pending.clear_installation(installation_id);
    tracing::info!(installation_id, cleared, "Pending updates acknowledged for installation");
    Ok(Json(json!({ "success": true, "cleared": cleared })))
}

// ── GitHub App ────────────────────────────────────────────────────────

async fn install_redirect(Query(query): Query<InstallQuery>) -> Redirect {
    match (query.setup_action.as_deref(), query.installation_id) {
        (Some("install"), Some(id)) => {
            let target = url::form_urlencoded::Serializer::new(String::new())
                .append_pair("installation_id", &id)
                .finish();
            Redirect::to(&format!("/?{}", target))
        }
        _ => Redirect::to("/"),
    }
}

async fn push_readme(
    State(state): State<SharedState>,
    JsonOrForm(req): JsonOrForm<PushReadmeRequest>,
) -> Result<Json<PushResponse>, ApiError> {
    let installation_id = req.installation_id.as_ref().and_then(InstallationIdField::value);
    let (Some(installation_id), false, false) = (
        installation_id,
        req.repo_url.trim().is_empty(),
        req.readme_content.is_empty(),
    ) else {
        return Err(ApiError::bad_request(
            "Repository URL, README content, and installation ID are required",
        ));
    };
    let repo = require_repo(&req.repo_url)?;
    tracing::info!(repo = %repo, installation_id, "Pushing README");

    let commit = state
        .github
        .push_file(
            installation_id,
            &repo,
            "README.md",
            "Updated README.md with Code Narrator",
            &req.readme_content,
        )
        .await
        .map_err(|e| {
            tracing::error!(repo = %repo, error = %e, "Failed to push README");
            ApiError::from_push(e, "Failed to push README to GitHub")
        })?;

    Ok(Json(PushResponse {
        success: true,
        message: "README successfully pushed to GitHub!",
        commit_url: commit.html_url,
        file_path: None,
    }))
}

/// `dir/name.py` becomes `dir/commented_name.py`.
pub fn commented_file_path(file_path: &str) -> (String, String) {
    let trimmed = file_path.trim().trim_start_matches('/');
    match trimmed.rsplit_once('/') {
        Some((dir, name)) => (format!("{}/commented_{}", dir, name), name.to_string()),
        None => (format!("commented_{}", trimmed), trimmed.to_string()),
    }
}

async fn push_comments(
    State(state): State<SharedState>,
    JsonOrForm(req): JsonOrForm<PushCommentsRequest>,
) -> Result<Json<PushResponse>, ApiError> {
    let installation_id = req.installation_id.as_ref().and_then(InstallationIdField::value);
    let (Some(installation_id), false, false, false) = (
        installation_id,
        req.repo_url.trim().is_empty(),
        req.commented_content.is_empty(),
        req.file_path.trim().is_empty(),
    ) else {
        return Err(ApiError::bad_request(
            "Repository URL, commented content, file path, and installation ID are required",
        ));
    };
    let repo = require_repo(&req.repo_url)?;
    let (target_path, file_name) = commented_file_path(&req.file_path);
    tracing::info!(repo = %repo, installation_id, path = %target_path, "Pushing commented file");

    let commit = state
        .github
        .push_file(
            installation_id,
            &repo,
            &target_path,
            &format!("Added commented version of {} via Code Narrator", file_name),
            &req.commented_content,
        )
        .await
        .map_err(|e| {
            tracing::error!(repo = %repo, error = %e, "Failed to push commented file");
            ApiError::from_push(e, "Failed to push commented code to GitHub")
        })?;

    Ok(Json(PushResponse {
        success: true,
        message: "Commented code successfully pushed to GitHub!",
        commit_url: commit.html_url,
        file_path: Some(target_path),
    }))
}

fn debug_error(err: GitHubError) -> ApiError {
    if matches!(err, GitHubError::AppNotConfigured) {
        return app_not_configured();
    }
    let status = err
        .status()
        .and_then(|s| StatusCode::from_u16(s).ok())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    ApiError::new(status, err.to_string())
}

async fn debug_installations(
    State(state): State<SharedState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let installations = state.github.list_installations().await.map_err(debug_error)?;
    Ok(Json(json!({ "success": true, "installations": installations })))
}

async fn debug_installation(
    State(state): State<SharedState>,
    UrlPath(raw_id): UrlPath<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let installation_id = parse_installation_id(&raw_id)?;
    let installation = state
        .github
        .get_installation(installation_id)
        .await
        .map_err(debug_error)?;
    let repositories = installation
        .get("repositories_url")
        .cloned()
        .unwrap_or(serde_json::Value::Null);
    Ok(Json(json!({
        "success": true,
        "installation": installation,
        "repositories": repositories,
    })))
}
