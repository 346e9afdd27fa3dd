//! GitHub REST and GitHub App client.
//!
//! Two identities are in play:
//! - an optional personal token (`GITHUB_TOKEN`) for public repository
//!   metadata
//! - the GitHub App, which signs a short-lived RS256 JWT to list
//!   installations and exchange it for per-installation access tokens used
//!   to write contents and comment on pull requests

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::repo_url::RepoRef;
use crate::config::AppCredentials;
use crate::errors::GitHubError;

const USER_AGENT: &str = "narrator";
const API_VERSION: &str = "2022-11-28";

/// Installation tokens are refreshed this long before GitHub expires them.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// Public counters shown next to the repository URL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoMetadata {
    pub stars: u64,
    pub forks: u64,
    pub watchers: u64,
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    #[serde(default)]
    stargazers_count: u64,
    #[serde(default)]
    forks_count: u64,
    /// GitHub's `watchers_count` mirrors stars; subscribers are the real watchers.
    #[serde(default)]
    subscribers_count: u64,
}

/// One app installation (subset of fields).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallationSummary {
    pub id: u64,
    pub account: String,
    pub repositories_url: String,
}

#[derive(Debug, Deserialize)]
struct InstallationResponse {
    id: u64,
    account: Option<AccountResponse>,
    #[serde(default)]
    repositories_url: String,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    login: String,
}

/// The commit created by a contents write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRef {
    pub sha: String,
    pub html_url: String,
}

#[derive(Debug, Deserialize)]
struct ContentsWriteResponse {
    commit: CommitRef,
}

#[derive(Debug, Deserialize)]
struct ExistingFile {
    sha: String,
}

#[derive(Debug, Serialize)]
struct ContentsWriteRequest<'a> {
    message: &'a str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

// ── Gateway trait ─────────────────────────────────────────────────────

/// Abstraction over GitHub for testability.
/// Real implementation: `GitHubClient`.
#[async_trait]
pub trait GitHubGateway: Send + Sync {
    async fn repo_metadata(&self, repo: &RepoRef) -> Result<RepoMetadata, GitHubError>;

    async fn list_installations(&self) -> Result<Vec<InstallationSummary>, GitHubError>;

    /// Raw installation object as returned by GitHub.
    async fn get_installation(&self, installation_id: u64) -> Result<serde_json::Value, GitHubError>;

    /// Create or update `path` in the default branch of `repo`.
    async fn push_file(
        &self,
        installation_id: u64,
        repo: &RepoRef,
        path: &str,
        message: &str,
        content: &str,
    ) -> Result<CommitRef, GitHubError>;

    async fn comment_on_issue(
        &self,
        installation_id: u64,
        repo: &RepoRef,
        number: u64,
        body: &str,
    ) -> Result<(), GitHubError>;
}

// ── App JWT ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppClaims {
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

impl AppClaims {
    /// Backdate `iat` to absorb clock drift; GitHub caps lifetime at 10 minutes.
    pub fn new(app_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            iat: (now - Duration::seconds(60)).timestamp(),
            exp: (now + Duration::seconds(540)).timestamp(),
            iss: app_id.to_string(),
        }
    }
}

pub fn sign_app_jwt(app: &AppCredentials, now: DateTime<Utc>) -> Result<String, GitHubError> {
    let key = EncodingKey::from_rsa_pem(app.private_key_pem.as_bytes())?;
    let claims = AppClaims::new(&app.app_id, now);
    Ok(jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)?)
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) > now
    }
}

// ── Client ────────────────────────────────────────────────────────────

/// `reqwest`-backed GitHub client.
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: String,
    token: Option<String>,
    app: Option<AppCredentials>,
    installation_tokens: DashMap<u64, CachedToken>,
}

impl GitHubClient {
    pub fn new(api_base: &str, token: Option<String>, app: Option<AppCredentials>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
            app,
            installation_tokens: DashMap::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, self.url(path))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .header("User-Agent", USER_AGENT)
    }

    fn app_request(&self, method: reqwest::Method, path: &str) -> Result<RequestBuilder, GitHubError> {
        let app = self.app.as_ref().ok_or(GitHubError::AppNotConfigured)?;
        let jwt = sign_app_jwt(app, Utc::now())?;
        Ok(self.request(method, path).bearer_auth(jwt))
    }

    /// Access token for an installation, minted on demand and cached.
    async fn installation_token(&self, installation_id: u64) -> Result<String, GitHubError> {
        let now = Utc::now();
        if let Some(cached) = self.installation_tokens.get(&installation_id)
            && cached.is_fresh(now)
        {
            return Ok(cached.token.clone());
        }

        let response = self
            .app_request(
                reqwest::Method::POST,
                &format!("/app/installations/{}/access_tokens", installation_id),
            )?
            .send()
            .await?;
        let minted: AccessTokenResponse = ensure_success(response).await?.json().await?;
        tracing::debug!(
            installation_id,
            expires_at = %minted.expires_at,
            "Minted installation token"
        );

        self.installation_tokens.insert(
            installation_id,
            CachedToken {
                token: minted.token.clone(),
                expires_at: minted.expires_at,
            },
        );
        Ok(minted.token)
    }

    async fn installation_request(
        &self,
        installation_id: u64,
        method: reqwest::Method,
        path: &str,
    ) -> Result<RequestBuilder, GitHubError> {
        let token = self.installation_token(installation_id).await?;
        Ok(self.request(method, path).bearer_auth(token))
    }

    /// SHA of an existing file, or `None` when it does not exist yet.
    async fn existing_sha(
        &self,
        installation_id: u64,
        repo: &RepoRef,
        path: &str,
    ) -> Result<Option<String>, GitHubError> {
        let response = self
            .installation_request(
                installation_id,
                reqwest::Method::GET,
                &contents_path(repo, path),
            )
            .await?
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                // Directories come back as arrays and carry no single sha.
                let value: serde_json::Value = response.json().await?;
                Ok(serde_json::from_value::<ExistingFile>(value).ok().map(|f| f.sha))
            }
            status => {
                tracing::warn!(
                    repo = %repo,
                    path,
                    status = status.as_u16(),
                    "Could not check for existing file, writing without sha"
                );
                Ok(None)
            }
        }
    }

    #[cfg(test)]
    fn seed_installation_token(&self, installation_id: u64, token: &str, expires_at: DateTime<Utc>) {
        self.installation_tokens.insert(
            installation_id,
            CachedToken {
                token: token.to_string(),
                expires_at,
            },
        );
    }
}

#[async_trait]
impl GitHubGateway for GitHubClient {
    async fn repo_metadata(&self, repo: &RepoRef) -> Result<RepoMetadata, GitHubError> {
        let mut request = self.request(
            reqwest::Method::GET,
            &format!("/repos/{}/{}", repo.owner, repo.name),
        );
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let data: RepoResponse = ensure_success(request.send().await?).await?.json().await?;
        Ok(RepoMetadata {
            stars: data.stargazers_count,
            forks: data.forks_count,
            watchers: data.subscribers_count,
        })
    }

    async fn list_installations(&self) -> Result<Vec<InstallationSummary>, GitHubError> {
        let response = self
            .app_request(reqwest::Method::GET, "/app/installations")?
            .send()
            .await?;
        let installations: Vec<InstallationResponse> = ensure_success(response).await?.json().await?;
        Ok(installations
            .into_iter()
            .map(|i| InstallationSummary {
                id: i.id,
                account: i.account.map(|a| a.login).unwrap_or_default(),
                repositories_url: i.repositories_url,
            })
            .collect())
    }

    async fn get_installation(&self, installation_id: u64) -> Result<serde_json::Value, GitHubError> {
        let response = self
            .app_request(
                reqwest::Method::GET,
                &format!("/app/installations/{}", installation_id),
            )?
            .send()
            .await?;
        Ok(ensure_success(response).await?.json().await?)
    }

    async fn push_file(
        &self,
        installation_id: u64,
        repo: &RepoRef,
        path: &str,
        message: &str,
        content: &str,
    ) -> Result<CommitRef, GitHubError> {
        let sha = self.existing_sha(installation_id, repo, path).await?;
        tracing::info!(
            repo = %repo,
            path,
            installation_id,
            update = sha.is_some(),
            "Writing file to GitHub"
        );

        let body = ContentsWriteRequest {
            message,
            content: BASE64.encode(content.as_bytes()),
            sha,
        };
        let response = self
            .installation_request(
                installation_id,
                reqwest::Method::PUT,
                &contents_path(repo, path),
            )
            .await?
            .json(&body)
            .send()
            .await?;
        let written: ContentsWriteResponse = ensure_success(response).await?.json().await?;
        Ok(written.commit)
    }

    async fn comment_on_issue(
        &self,
        installation_id: u64,
        repo: &RepoRef,
        number: u64,
        body: &str,
    ) -> Result<(), GitHubError> {
        let response = self
            .installation_request(
                installation_id,
                reqwest::Method::POST,
                &format!("/repos/{}/{}/issues/{}/comments", repo.owner, repo.name, number),
            )
            .await?
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }
}

fn contents_path(repo: &RepoRef, path: &str) -> String {
    format!(
        "/repos/{}/{}/contents/{}",
        repo.owner,
        repo.name,
        path.trim_start_matches('/')
    )
}

/// Turn a non-2xx response into `GitHubError::Status` carrying GitHub's message.
async fn ensure_success(response: Response) -> Result<Response, GitHubError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .and_then(|b| b.message)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
    Err(GitHubError::Status {
        status: status.as_u16(),
        message,
    })
}
