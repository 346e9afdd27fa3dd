//! GitHub repository URL parsing.

use serde::Serialize;
use url::Url;

use crate::errors::RepoUrlError;

/// An `owner/name` pair extracted from a repository URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Parse a user-supplied repository URL.
///
/// The host must contain `github.com` and the path must carry at least two
/// non-empty segments. Anything after the second segment (`/tree/main`,
/// `/blob/...`) is ignored.
pub fn parse_repo_url(input: &str) -> Result<RepoRef, RepoUrlError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(RepoUrlError::Empty);
    }

    let url = Url::parse(input).map_err(|_| RepoUrlError::Malformed)?;
    let host = url.host_str().ok_or(RepoUrlError::Malformed)?;
    if !host.contains("github.com") {
        return Err(RepoUrlError::NotGitHub);
    }

    let mut segments = url
        .path_segments()
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty());

    match (segments.next(), segments.next()) {
        (Some(owner), Some(name)) => Ok(RepoRef::new(owner, name)),
        _ => Err(RepoUrlError::MissingSegments),
    }
}
