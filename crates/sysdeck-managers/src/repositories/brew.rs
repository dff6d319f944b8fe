use async_trait::async_trait;

use sysdeck_backend::{
    AdminError, Credential, Domain, OpOutcome, PackageBackendKind, Repository, RepositoryBackend,
};
use sysdeck_exec::{ExecutionGateway, ExecutionRequest};

use crate::validate;

const BREW: PackageBackendKind = PackageBackendKind::Brew;

/// `user/repo` taps live at `github.com/user/homebrew-repo` unless added
/// with an explicit URL.
fn tap_url(tap: &str) -> String {
    match tap.split_once('/') {
        Some((user, repo)) => format!("https://github.com/{user}/homebrew-{repo}"),
        None => String::new(),
    }
}

pub(crate) fn parse_taps(output: &str) -> Vec<Repository> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| line.contains('/') && !line.contains(char::is_whitespace))
        .map(|tap| Repository {
            id: tap.to_string(),
            name: tap.to_string(),
            url: tap_url(tap),
            enabled: true,
            backend: BREW,
            file: None,
        })
        .collect()
}

/// Homebrew taps. Never elevated.
pub struct BrewTaps {
    gateway: ExecutionGateway,
}

impl BrewTaps {
    #[must_use]
    pub fn new(gateway: ExecutionGateway) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl RepositoryBackend for BrewTaps {
    fn kind(&self) -> PackageBackendKind {
        BREW
    }

    async fn list(&self) -> Result<Vec<Repository>, AdminError> {
        let output = self
            .gateway
            .read(ExecutionRequest::new("brew").arg("tap"), None)
            .await?;
        Ok(parse_taps(&output))
    }

    /// `brew tap <name> [url]`. Without a name the url is the tap name.
    async fn add(
        &self,
        url: &str,
        name: Option<&str>,
        _cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let url = validate::token("url", url.trim())?;
        let request = match name {
            Some(name) => {
                ExecutionRequest::new("brew").args(["tap", validate::token("name", name)?, url])
            }
            None => ExecutionRequest::new("brew").args(["tap", url]),
        };
        self.gateway
            .mutate(Domain::Repositories, request, None)
            .await?;
        Ok(OpOutcome::ok(format!("Tapped {}", name.unwrap_or(url))))
    }

    async fn remove(&self, key: &str, _cred: Option<&Credential>) -> Result<OpOutcome, AdminError> {
        let key = validate::token("tap", key)?;
        self.gateway
            .mutate(
                Domain::Repositories,
                ExecutionRequest::new("brew").args(["untap", key]),
                None,
            )
            .await?;
        Ok(OpOutcome::ok(format!("Untapped {key}")))
    }

    async fn refresh(&self, _cred: Option<&Credential>) -> Result<OpOutcome, AdminError> {
        self.gateway
            .mutate(
                Domain::Repositories,
                ExecutionRequest::new("brew").arg("update"),
                None,
            )
            .await?;
        Ok(OpOutcome::ok("Homebrew updated"))
    }
}
