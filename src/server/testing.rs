//! Test doubles for the script runner and GitHub gateway.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::api::AppState;
use super::github::{CommitRef, GitHubGateway, InstallationSummary, RepoMetadata};
use super::pending::PendingUpdates;
use super::repo_url::RepoRef;
use super::scripts::{ScriptInvocation, ScriptOutput, ScriptRunner};
use crate::config::OutputLayout;
use crate::errors::{GitHubError, ScriptError};

type Responder = Box<dyn Fn(&ScriptInvocation) -> Result<ScriptOutput, ScriptError> + Send + Sync>;

/// Records invocations and answers them with a configurable responder.
pub struct FakeRunner {
    responder: Mutex<Responder>,
    invocations: Mutex<Vec<ScriptInvocation>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self {
            responder: Mutex::new(Box::new(|_| Ok(ok_output("")))),
            invocations: Mutex::new(Vec::new()),
        }
    }

    pub fn respond_with<F>(&self, f: F)
    where
        F: Fn(&ScriptInvocation) -> Result<ScriptOutput, ScriptError> + Send + Sync + 'static,
    {
        *self.responder.lock().unwrap() = Box::new(f);
    }

    pub fn invocations(&self) -> Vec<ScriptInvocation> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScriptRunner for FakeRunner {
    async fn run(&self, invocation: &ScriptInvocation) -> Result<ScriptOutput, ScriptError> {
        self.invocations.lock().unwrap().push(invocation.clone());
        (self.responder.lock().unwrap())(invocation)
    }
}

pub fn ok_output(stdout: &str) -> ScriptOutput {
    ScriptOutput {
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code: Some(0),
    }
}

pub fn failed_output(stderr: &str) -> ScriptOutput {
    ScriptOutput {
        stdout: String::new(),
        stderr: stderr.to_string(),
        exit_code: Some(1),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPush {
    pub installation_id: u64,
    pub repo: RepoRef,
    pub path: String,
    pub message: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedComment {
    pub installation_id: u64,
    pub repo: RepoRef,
    pub number: u64,
    pub body: String,
}

/// In-memory GitHub. A configured status turns the matching call into an
/// `GitHubError::Status`.
#[derive(Default)]
pub struct FakeGateway {
    pub metadata_status: Mutex<Option<u16>>,
    pub push_status: Mutex<Option<u16>>,
    pub app_configured: Mutex<bool>,
    pushes: Mutex<Vec<RecordedPush>>,
    comments: Mutex<Vec<RecordedComment>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            app_configured: Mutex::new(true),
            ..Default::default()
        }
    }

    pub fn pushes(&self) -> Vec<RecordedPush> {
        self.pushes.lock().unwrap().clone()
    }

    pub fn comments(&self) -> Vec<RecordedComment> {
        self.comments.lock().unwrap().clone()
    }

    fn require_app(&self) -> Result<(), GitHubError> {
        if *self.app_configured.lock().unwrap() {
            Ok(())
        } else {
            Err(GitHubError::AppNotConfigured)
        }
    }
}

fn status_error(status: u16) -> GitHubError {
    GitHubError::Status {
        status,
        message: "fake failure".to_string(),
    }
}

#[async_trait]
impl GitHubGateway for FakeGateway {
    async fn repo_metadata(&self, _repo: &RepoRef) -> Result<RepoMetadata, GitHubError> {
        if let Some(status) = *self.metadata_status.lock().unwrap() {
            return Err(status_error(status));
        }
        Ok(RepoMetadata {
            stars: 42,
            forks: 7,
            watchers: 3,
        })
    }

    async fn list_installations(&self) -> Result<Vec<InstallationSummary>, GitHubError> {
        self.require_app()?;
        Ok(vec![InstallationSummary {
            id: 77,
            account: "octo".to_string(),
            repositories_url: "https://api.github.com/installation/repositories".to_string(),
        }])
    }

    async fn get_installation(&self, installation_id: u64) -> Result<serde_json::Value, GitHubError> {
        self.require_app()?;
        if installation_id != 77 {
            return Err(status_error(404));
        }
        Ok(serde_json::json!({
            "id": 77,
            "account": {"login": "octo"},
            "repositories_url": "https://api.github.com/installation/repositories"
        }))
    }

    async fn push_file(
        &self,
        installation_id: u64,
        repo: &RepoRef,
        path: &str,
        message: &str,
        content: &str,
    ) -> Result<CommitRef, GitHubError> {
        self.require_app()?;
        if let Some(status) = *self.push_status.lock().unwrap() {
            return Err(status_error(status));
        }
        self.pushes.lock().unwrap().push(RecordedPush {
            installation_id,
            repo: repo.clone(),
            path: path.to_string(),
            message: message.to_string(),
            content: content.to_string(),
        });
        Ok(CommitRef {
            sha: "c0ffee".to_string(),
            html_url: format!("https://github.com/{}/commit/c0ffee", repo),
        })
    }

    async fn comment_on_issue(
        &self,
        installation_id: u64,
        repo: &RepoRef,
        number: u64,
        body: &str,
    ) -> Result<(), GitHubError> {
        self.require_app()?;
        self.comments.lock().unwrap().push(RecordedComment {
            installation_id,
            repo: repo.clone(),
            number,
            body: body.to_string(),
        });
        Ok(())
    }
}

pub const TEST_WEBHOOK_SECRET: &str = "test-webhook-secret";

/// State with fakes, writing artifacts under `output_root`.
pub fn test_state_in(output_root: &Path) -> (Arc<AppState>, Arc<FakeRunner>, Arc<FakeGateway>) {
    let runner = Arc::new(FakeRunner::new());
    let github = Arc::new(FakeGateway::new());
    let state = Arc::new(AppState {
        runner: runner.clone(),
        github: github.clone(),
        pending: Arc::new(PendingUpdates::with_capacity(16)),
        output: OutputLayout::under(output_root),
        huggingface_token: Some("hf_test".to_string()),
        webhook_secret: Some(TEST_WEBHOOK_SECRET.to_string()),
        pr_welcome_message: crate::config::DEFAULT_PR_WELCOME_MESSAGE.to_string(),
    });
    (state, runner, github)
}

pub fn test_state() -> (Arc<AppState>, Arc<FakeRunner>, Arc<FakeGateway>) {
    test_state_in(Path::new("/nonexistent/narrator-test-output"))
}
