//! GitHub App webhook ingestion.
//!
//! Deliveries are authenticated with `X-Hub-Signature-256`, decoded into a
//! [`WebhookEvent`], then dispatched. Push events land in the shared
//! [`PendingUpdates`](super::pending::PendingUpdates) store that the browser
//! polls. Pull-request comments are posted from a detached task so GitHub
//! gets its acknowledgement immediately.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use super::api::{AppState, SharedState};
use super::pending::PendingUpdate;
use super::repo_url::RepoRef;
use crate::errors::WebhookError;

type HmacSha256 = Hmac<Sha256>;

pub const EVENT_HEADER: &str = "X-GitHub-Event";
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";
pub const DELIVERY_HEADER: &str = "X-GitHub-Delivery";

// ── Signatures ────────────────────────────────────────────────────────

/// Check `sha256=<hex>` against the HMAC-SHA256 of `body`.
pub fn verify_signature(secret: &str, body: &[u8], header: &str) -> Result<(), WebhookError> {
    let hex_digest = header
        .trim()
        .strip_prefix("sha256=")
        .ok_or(WebhookError::MalformedSignature)?;
    let expected = hex::decode(hex_digest).map_err(|_| WebhookError::MalformedSignature)?;

    keyed_mac(secret, body)?
        .verify_slice(&expected)
        .map_err(|_| WebhookError::SignatureMismatch)
}

/// Header value GitHub would send for `body`.
pub fn signature_header(secret: &str, body: &[u8]) -> Result<String, WebhookError> {
    let digest = keyed_mac(secret, body)?.finalize().into_bytes();
    Ok(format!("sha256={}", hex::encode(digest)))
}

fn keyed_mac(secret: &str, body: &[u8]) -> Result<HmacSha256, WebhookError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| WebhookError::SecretNotConfigured)?;
    mac.update(body);
    Ok(mac)
}

// ── Events ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HeadCommit {
    pub id: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct InstallationRef {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct RepositoryName {
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct PushPayload {
    repository: serde_json::Value,
    head_commit: Option<HeadCommit>,
    installation: Option<InstallationRef>,
}

#[derive(Debug, Deserialize)]
struct InstallationPayload {
    installation: InstallationRef,
    #[serde(default)]
    repositories: Vec<RepositoryName>,
    #[serde(default)]
    repositories_added: Vec<RepositoryName>,
}

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    pull_request: PullRequestRef,
    repository: PrRepository,
    installation: Option<InstallationRef>,
}

#[derive(Debug, Deserialize)]
struct PullRequestRef {
    number: u64,
}

#[derive(Debug, Deserialize)]
struct PrRepository {
    name: String,
    owner: PrOwner,
}

#[derive(Debug, Deserialize)]
struct PrOwner {
    login: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PushEvent {
    pub full_name: String,
    pub repository: serde_json::Value,
    /// `None` for branch deletions
    pub head_commit: Option<HeadCommit>,
    pub installation_id: Option<u64>,
}

/// A decoded webhook delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    Push(PushEvent),
    InstallationCreated {
        installation_id: u64,
        repositories: Vec<String>,
    },
    InstallationRepositoriesAdded {
        installation_id: u64,
        repositories: Vec<String>,
    },
    PullRequestOpened {
        installation_id: Option<u64>,
        repo: RepoRef,
        number: u64,
    },
    Ping,
    Ignored {
        event: String,
        action: Option<String>,
    },
}

impl WebhookEvent {
    pub fn parse(event: &str, payload: &[u8]) -> Result<Self, WebhookError> {
        let value: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;
        let action = value
            .get("action")
            .and_then(|a| a.as_str())
            .map(str::to_string);

        let parsed = match (event, action.as_deref()) {
            ("push", _) => {
                let push: PushPayload = decode(value)?;
                let full_name = push
                    .repository
                    .get("full_name")
                    .and_then(|n| n.as_str())
                    .ok_or_else(|| {
                        WebhookError::InvalidPayload("repository.full_name is missing".into())
                    })?
                    .to_string();
                WebhookEvent::Push(PushEvent {
                    full_name,
                    repository: push.repository,
                    head_commit: push.head_commit,
                    installation_id: push.installation.map(|i| i.id),
                })
            }
            ("installation", Some("created")) => {
                let payload: InstallationPayload = decode(value)?;
                WebhookEvent::InstallationCreated {
                    installation_id: payload.installation.id,
                    repositories: names(payload.repositories),
                }
            }
            ("installation_repositories", Some("added")) => {
                let payload: InstallationPayload = decode(value)?;
                WebhookEvent::InstallationRepositoriesAdded {
                    installation_id: payload.installation.id,
                    repositories: names(payload.repositories_added),
                }
            }
            ("pull_request", Some("opened")) => {
                let payload: PullRequestPayload = decode(value)?;
                WebhookEvent::PullRequestOpened {
                    installation_id: payload.installation.map(|i| i.id),
                    repo: RepoRef::new(payload.repository.owner.login, payload.repository.name),
                    number: payload.pull_request.number,
                }
            }
            ("ping", _) => WebhookEvent::Ping,
            _ => WebhookEvent::Ignored {
                event: event.to_string(),
                action,
            },
        };
        Ok(parsed)
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, WebhookError> {
    serde_json::from_value(value).map_err(|e| WebhookError::InvalidPayload(e.to_string()))
}

fn names(repos: Vec<RepositoryName>) -> Vec<String> {
    repos.into_iter().map(|r| r.full_name).collect()
}

// ── Dispatch ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    RecordedUpdate { repo: String },
    InstallationLogged { installation_id: u64 },
    CommentScheduled { repo: String, number: u64 },
    Pong,
    Ignored,
}

/// Apply an event to the server state.
pub fn dispatch(event: WebhookEvent, state: &AppState) -> WebhookOutcome {
    match event {
        WebhookEvent::Push(push) => {
            let Some(commit) = push.head_commit else {
                tracing::debug!(repo = %push.full_name, "Push without head commit, ignoring");
                return WebhookOutcome::Ignored;
            };
            tracing::info!(
                repo = %push.full_name,
                sha = %commit.id,
                installation_id = ?push.installation_id,
                "Recorded pending update"
            );
            state.pending.record(
                &push.full_name,
                PendingUpdate {
                    sha: commit.id,
                    message: commit.message,
                    timestamp: Utc::now(),
                    repository: push.repository,
                    installation_id: push.installation_id,
                },
            );
            WebhookOutcome::RecordedUpdate {
                repo: push.full_name,
            }
        }
        WebhookEvent::InstallationCreated {
            installation_id,
            repositories,
        }
        | WebhookEvent::InstallationRepositoriesAdded {
            installation_id,
            repositories,
        } => {
            tracing::info!(
                installation_id,
                repositories = %repositories.join(", "),
                "App installed on repositories"
            );
            WebhookOutcome::InstallationLogged { installation_id }
        }
        WebhookEvent::PullRequestOpened {
            installation_id,
            repo,
            number,
        } => {
            let Some(installation_id) = installation_id else {
                tracing::warn!(repo = %repo, number, "Pull request event without installation, not commenting");
                return WebhookOutcome::Ignored;
            };
            let github = state.github.clone();
            let body = state.pr_welcome_message.clone();
            let outcome = WebhookOutcome::CommentScheduled {
                repo: repo.full_name(),
                number,
            };
            tokio::spawn(async move {
                match github
                    .comment_on_issue(installation_id, &repo, number, &body)
                    .await
                {
                    Ok(()) => tracing::info!(repo = %repo, number, "Posted pull request welcome comment"),
                    Err(e) => tracing::error!(repo = %repo, number, error = %e, "Failed to comment on pull request"),
                }
            });
            outcome
        }
        WebhookEvent::Ping => WebhookOutcome::Pong,
        WebhookEvent::Ignored { event, action } => {
            tracing::debug!(event = %event, action = ?action, "Ignoring webhook event");
            WebhookOutcome::Ignored
        }
    }
}

// ── HTTP ──────────────────────────────────────────────────────────────

fn error_status(err: &WebhookError) -> StatusCode {
    match err {
        WebhookError::SecretNotConfigured => StatusCode::SERVICE_UNAVAILABLE,
        WebhookError::MissingHeader(_) | WebhookError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
        WebhookError::MalformedSignature | WebhookError::SignatureMismatch => StatusCode::UNAUTHORIZED,
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, WebhookError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or(WebhookError::MissingHeader(name))
}

fn verify_and_parse(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<WebhookEvent, WebhookError> {
    let secret = state
        .webhook_secret
        .as_deref()
        .ok_or(WebhookError::SecretNotConfigured)?;
    let event = header(headers, EVENT_HEADER)?;
    let signature = header(headers, SIGNATURE_HEADER)?;
    verify_signature(secret, body, signature)?;
    WebhookEvent::parse(event, body)
}

/// `POST /api/webhook`, `POST /events`
pub async fn receive_webhook(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let delivery = headers
        .get(DELIVERY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    match verify_and_parse(&state, &headers, &body) {
        Ok(event) => {
            let outcome = dispatch(event, &state);
            tracing::debug!(delivery = %delivery, ?outcome, "Webhook delivery handled");
            (StatusCode::OK, "OK").into_response()
        }
        Err(e) => {
            tracing::warn!(delivery = %delivery, error = %e, "Rejected webhook delivery");
            (error_status(&e), e.to_string()).into_response()
        }
    }
}

/// `GET /api/webhook`
pub async fn webhook_liveness() -> &'static str {
    "This is a GET request to the webhook endpoint"
}
