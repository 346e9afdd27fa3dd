//! Code Narrator web back-end.
//!
//! ## Overview
//!
//! The browser submits a GitHub repository URL. Each analysis endpoint
//! validates it, runs one of the Python analysis scripts, and resolves the
//! file the script wrote. A GitHub App webhook listener records pushes as
//! pending updates, which the browser polls so it can offer regeneration.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │ Browser  │ ───────> │  server.rs  (Router, TraceLayer, start_server)   │
//! │ (ui/)    │ <─────── │    └─ api.rs  (handlers, AppState, ApiError)     │
//! └──────────┘  polling │         │                                        │
//!                       │         │ ScriptRunner::run(ScriptInvocation)    │
//!                       │         v                                        │
//!                       │  scripts.rs  (ProcessRunner, failure mapping)    │
//!                       │         │                                        │
//!                       │         │ artifacts::locate(ArtifactQuery)       │
//!                       │         v                                        │
//!                       │  artifacts.rs (direct → standard → mtime scan)   │
//!                       └──────────────────────────────────────────────────┘
//! ┌──────────┐ webhook  ┌──────────────────────────────────────────────────┐
//! │  GitHub  │ ───────> │  webhook.rs  (HMAC check, WebhookEvent dispatch) │
//! │          │ <─────── │    ├─ pending.rs (PendingUpdates)                │
//! └──────────┘ REST API │    └─ github.rs  (GitHubGateway, app tokens)     │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module     | Responsibility                                           |
//! |------------|----------------------------------------------------------|
//! | `repo_url` | `parse_repo_url()` → `RepoRef`                           |
//! | `readme`   | strips model preamble from generated READMEs             |
//! | `extract`  | `JsonOrForm<T>` body extractor                           |
//! | `embedded` | statically embeds `ui/` (`rust-embed`)                   |

pub mod api;
pub mod artifacts;
pub mod embedded;
pub mod extract;
pub mod github;
pub mod pending;
pub mod readme;
pub mod repo_url;
pub mod scripts;
pub mod server;
pub mod webhook;

#[cfg(test)]
mod testing;
