//! Layered configuration for the narrator server.
//!
//! Values resolve in this order, later layers winning:
//! 1. built-in defaults
//! 2. `narrator.toml` (explicit `--config`, then `./narrator.toml`, then the
//!    user config dir)
//! 3. environment (a `.env` file is loaded into the environment by `main`)
//! 4. CLI flags
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3001
//!
//! [scripts]
//! python = "python3"
//! dir = "/opt/narrator/scripts"
//! output_dir = "/var/lib/narrator"
//! timeout_secs = 900
//!
//! [github]
//! api_url = "https://api.github.com"
//! app_id = "123456"
//! private_key_path = "/etc/narrator/app.pem"
//! pr_welcome_message = "Thanks for opening a new PR!"
//!
//! [updates]
//! capacity = 1024
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_SCRIPT_TIMEOUT_SECS: u64 = 900;
pub const DEFAULT_PENDING_CAPACITY: usize = 1024;
pub const DEFAULT_PR_WELCOME_MESSAGE: &str = "Thanks for opening a new PR! Please follow our contributing guidelines to make your PR easier to review.";

const CONFIG_FILE_NAME: &str = "narrator.toml";

// ── narrator.toml ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptsSection {
    /// Interpreter used to run the analysis scripts
    #[serde(default)]
    pub python: Option<String>,
    /// Directory containing the analysis scripts
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Root of the well-known output folders (defaults to the scripts dir)
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitHubSection {
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
    #[serde(default)]
    pub pr_welcome_message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatesSection {
    #[serde(default)]
    pub capacity: Option<usize>,
}

/// Parsed `narrator.toml`. Secrets are deliberately not accepted here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NarratorToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub scripts: ScriptsSection,
    #[serde(default)]
    pub github: GitHubSection,
    #[serde(default)]
    pub updates: UpdatesSection,
}

impl NarratorToml {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Find the config file to use. An explicit path must exist; the implicit
    /// locations are optional.
    pub fn discover(explicit: Option<&Path>) -> Result<Option<(PathBuf, Self)>, ConfigError> {
        if let Some(path) = explicit {
            return Ok(Some((path.to_path_buf(), Self::load(path)?)));
        }

        let mut candidates = vec![PathBuf::from(CONFIG_FILE_NAME)];
        if let Some(dir) = dirs::config_dir() {
            candidates.push(dir.join("narrator").join(CONFIG_FILE_NAME));
        }

        for candidate in candidates {
            if candidate.is_file() {
                let parsed = Self::load(&candidate)?;
                return Ok(Some((candidate, parsed)));
            }
        }
        Ok(None)
    }
}

// ── Resolved configuration ────────────────────────────────────────────

/// GitHub App identity used to mint installation tokens.
#[derive(Clone)]
pub struct AppCredentials {
    pub app_id: String,
    pub private_key_pem: String,
}

impl std::fmt::Debug for AppCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppCredentials")
            .field("app_id", &self.app_id)
            .field("private_key_pem", &"<redacted>")
            .finish()
    }
}

/// Well-known folders the analysis scripts write into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    pub readme_dir: PathBuf,
    pub comments_dir: PathBuf,
    pub callgraph_dir: PathBuf,
    pub function_summaries_dir: PathBuf,
    pub repo_analysis_dir: PathBuf,
}

impl OutputLayout {
    pub fn under(root: &Path) -> Self {
        Self {
            readme_dir: root.join("README_FOLDER"),
            comments_dir: root.join("COMMENTED_CODE"),
            callgraph_dir: root.join("CALLGRAPHS_FOLDER"),
            function_summaries_dir: root.join("FUNCTION_SUMMARIES_FOLDER"),
            repo_analysis_dir: root.join("REPO_ANALYSIS_FOLDER"),
        }
    }
}

/// CLI flags that override every other layer.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub python: Option<String>,
    pub scripts_dir: Option<PathBuf>,
    pub dev_mode: bool,
}

/// Effective runtime configuration.
#[derive(Debug, Clone)]
pub struct NarratorConfig {
    pub host: String,
    pub port: u16,
    pub dev_mode: bool,
    pub python_cmd: String,
    pub scripts_dir: PathBuf,
    pub output: OutputLayout,
    pub script_timeout: Duration,
    pub pending_capacity: usize,
    pub github_api_url: String,
    pub github_token: Option<String>,
    pub huggingface_token: Option<String>,
    pub webhook_secret: Option<String>,
    pub app: Option<AppCredentials>,
    pub pr_welcome_message: String,
    /// Config file that contributed to this configuration, if any
    pub source_file: Option<PathBuf>,
}

impl Default for NarratorConfig {
    fn default() -> Self {
        let scripts_dir = PathBuf::from(".");
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            dev_mode: false,
            python_cmd: "python3".to_string(),
            output: OutputLayout::under(&scripts_dir),
            scripts_dir,
            script_timeout: Duration::from_secs(DEFAULT_SCRIPT_TIMEOUT_SECS),
            pending_capacity: DEFAULT_PENDING_CAPACITY,
            github_api_url: DEFAULT_GITHUB_API_URL.to_string(),
            github_token: None,
            huggingface_token: None,
            webhook_secret: None,
            app: None,
            pr_welcome_message: DEFAULT_PR_WELCOME_MESSAGE.to_string(),
            source_file: None,
        }
    }
}

impl NarratorConfig {
    /// Load configuration from the config file, the process environment and
    /// CLI overrides.
    pub fn load(config_file: Option<&Path>, cli: CliOverrides) -> Result<Self, ConfigError> {
        let file = NarratorToml::discover(config_file)?;
        Self::resolve(file, |key| std::env::var(key).ok(), cli)
    }

    /// Resolve configuration from explicit layers. `env` looks up a variable
    /// by name so tests don't have to touch the process environment.
    pub fn resolve<F>(
        file: Option<(PathBuf, NarratorToml)>,
        env: F,
        cli: CliOverrides,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();
        let mut explicit_output_dir = None;

        let (source_file, toml) = match file {
            Some((path, toml)) => (Some(path), toml),
            None => (None, NarratorToml::default()),
        };
        config.source_file = source_file;

        // file layer
        if let Some(host) = toml.server.host {
            config.host = host;
        }
        if let Some(port) = toml.server.port {
            config.port = port;
        }
        if let Some(python) = toml.scripts.python {
            config.python_cmd = python;
        }
        if let Some(dir) = toml.scripts.dir {
            config.scripts_dir = dir;
        }
        if let Some(dir) = toml.scripts.output_dir {
            explicit_output_dir = Some(dir);
        }
        if let Some(secs) = toml.scripts.timeout_secs {
            config.script_timeout = Duration::from_secs(secs);
        }
        if let Some(capacity) = toml.updates.capacity {
            config.pending_capacity = capacity;
        }
        if let Some(url) = toml.github.api_url {
            config.github_api_url = url;
        }
        if let Some(message) = toml.github.pr_welcome_message {
            config.pr_welcome_message = message;
        }
        let mut app_id = toml.github.app_id;
        let mut private_key_path = toml.github.private_key_path;

        // environment layer
        if let Some(host) = env("NARRATOR_HOST") {
            config.host = host;
        }
        if let Some(port) = env("NARRATOR_PORT") {
            config.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: "NARRATOR_PORT",
                message: format!("'{}' is not a valid port", port),
            })?;
        }
        if let Some(python) = env("NARRATOR_PYTHON") {
            config.python_cmd = python;
        }
        if let Some(dir) = env("NARRATOR_SCRIPTS_DIR") {
            config.scripts_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env("NARRATOR_OUTPUT_DIR") {
            explicit_output_dir = Some(PathBuf::from(dir));
        }
        if let Some(secs) = env("NARRATOR_SCRIPT_TIMEOUT_SECS") {
            let secs: u64 = secs.parse().map_err(|_| ConfigError::InvalidValue {
                key: "NARRATOR_SCRIPT_TIMEOUT_SECS",
                message: format!("'{}' is not a number of seconds", secs),
            })?;
            config.script_timeout = Duration::from_secs(secs);
        }
        if let Some(url) = env("GITHUB_API_URL") {
            config.github_api_url = url;
        }
        config.github_token = env("GITHUB_TOKEN");
        config.huggingface_token = env("HUGGINGFACE_TOKEN");
        config.webhook_secret = env("WEBHOOK_SECRET");
        if let Some(id) = env("APP_ID") {
            app_id = Some(id);
        }
        if let Some(path) = env("PRIVATE_KEY_PATH") {
            private_key_path = Some(PathBuf::from(path));
        }

        // An inline key wins over a key file.
        let private_key_pem = match env("PRIVATE_KEY") {
            Some(inline) => Some(normalize_pem(&inline)),
            None => match private_key_path {
                Some(path) => Some(std::fs::read_to_string(&path).map_err(|source| {
                    ConfigError::PrivateKey { path, source }
                })?),
                None => None,
            },
        };
        config.app = match (app_id, private_key_pem) {
            (Some(app_id), Some(private_key_pem)) => Some(AppCredentials {
                app_id,
                private_key_pem,
            }),
            _ => None,
        };

        // CLI layer
        if let Some(host) = cli.host {
            config.host = host;
        }
        if let Some(port) = cli.port {
            config.port = port;
        }
        if let Some(python) = cli.python {
            config.python_cmd = python;
        }
        if let Some(dir) = cli.scripts_dir {
            config.scripts_dir = dir;
        }
        config.dev_mode = cli.dev_mode;

        let output_root = explicit_output_dir.unwrap_or_else(|| config.scripts_dir.clone());
        config.output = OutputLayout::under(&output_root);

        if config.pending_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "updates.capacity",
                message: "must be at least 1".into(),
            });
        }

        Ok(config)
    }

    /// Socket address string the server binds to.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if !self.scripts_dir.is_dir() {
            warnings.push(format!(
                "Scripts directory '{}' does not exist",
                self.scripts_dir.display()
            ));
        }
        if self.app.is_none() {
            warnings.push(
                "GitHub App credentials (APP_ID + PRIVATE_KEY/PRIVATE_KEY_PATH) are not set; pushing to GitHub is disabled"
                    .to_string(),
            );
        }
        if self.webhook_secret.is_none() {
            warnings.push("WEBHOOK_SECRET is not set; webhook deliveries will be rejected".to_string());
        }
        if self.github_token.is_none() {
            warnings.push(
                "GITHUB_TOKEN is not set; repository metadata requests are unauthenticated and rate limited"
                    .to_string(),
            );
        }
        if self.huggingface_token.is_none() {
            warnings.push("HUGGINGFACE_TOKEN is not set; llama inference may fail".to_string());
        }

        warnings
    }

    /// Key/value view of the effective configuration with secrets redacted.
    pub fn summary(&self) -> Vec<(&'static str, String)> {
        fn secret(value: &Option<String>) -> String {
            match value {
                Some(_) => "<set>".to_string(),
                None => "<unset>".to_string(),
            }
        }

        vec![
            (
                "config_file",
                self.source_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "<none>".to_string()),
            ),
            ("bind", self.bind_addr()),
            ("dev_mode", self.dev_mode.to_string()),
            ("python", self.python_cmd.clone()),
            ("scripts_dir", self.scripts_dir.display().to_string()),
            ("readme_dir", self.output.readme_dir.display().to_string()),
            ("comments_dir", self.output.comments_dir.display().to_string()),
            ("callgraph_dir", self.output.callgraph_dir.display().to_string()),
            ("script_timeout_secs", self.script_timeout.as_secs().to_string()),
            ("pending_capacity", self.pending_capacity.to_string()),
            ("github_api_url", self.github_api_url.clone()),
            ("github_token", secret(&self.github_token)),
            ("huggingface_token", secret(&self.huggingface_token)),
            ("webhook_secret", secret(&self.webhook_secret)),
            (
                "app_id",
                self.app
                    .as_ref()
                    .map(|a| a.app_id.clone())
                    .unwrap_or_else(|| "<unset>".to_string()),
            ),
        ]
    }
}

/// Keys pasted into a single-line env var usually carry literal `\n`.
fn normalize_pem(raw: &str) -> String {
    raw.trim().replace("\\n", "\n")
}
