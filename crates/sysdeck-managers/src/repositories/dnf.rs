use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::debug;

use sysdeck_backend::{
    AdminError, Credential, Domain, OpOutcome, PackageBackendKind, Parsed, Repository,
    RepositoryBackend,
};
use sysdeck_exec::{ExecutionGateway, ExecutionRequest};

use super::NOT_FOUND;
use crate::config_file::{apply_line_edits, files_with_extension, read_if_exists, LineEdit};
use crate::validate;

const DNF: PackageBackendKind = PackageBackendKind::Dnf;

/// `dnf repolist --all`: `repo id  repo name  status`.
pub(crate) fn parse_repolist(output: &str) -> Parsed<Repository> {
    let mut parsed = Parsed::new();

    for (index, line) in output.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("repo id") {
            continue;
        }
        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        let enabled = match fields.last() {
            Some(&"enabled") => true,
            Some(&"disabled") => false,
            _ => {
                parsed.skip(DNF.as_str(), index + 1, line);
                continue;
            }
        };
        if fields.len() < 2 {
            parsed.skip(DNF.as_str(), index + 1, line);
            continue;
        }

        let id = fields[0];
        let name = fields[1..fields.len() - 1].join(" ");
        parsed.push(Repository {
            id: id.to_string(),
            name: if name.is_empty() { id.to_string() } else { name },
            url: String::new(),
            enabled,
            backend: DNF,
            file: None,
        });
    }

    parsed
}

/// A `[section]` of a `.repo` file and its origin URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RepoSection {
    pub id: String,
    pub url: Option<String>,
    pub lines: (usize, usize),
}

pub(crate) fn parse_repo_file(contents: &str) -> Vec<RepoSection> {
    let mut sections: Vec<RepoSection> = Vec::new();

    for (index, line) in contents.lines().enumerate() {
        let trimmed = line.trim();
        if let Some(id) = trimmed
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
        {
            sections.push(RepoSection {
                id: id.trim().to_string(),
                url: None,
                lines: (index, index),
            });
            continue;
        }
        let Some(section) = sections.last_mut() else {
            continue;
        };
        section.lines.1 = index;
        if section.url.is_none()
            && let Some((key, value)) = trimmed.split_once('=')
            && matches!(key.trim(), "baseurl" | "metalink" | "mirrorlist")
        {
            section.url = Some(value.trim().to_string());
        }
    }

    sections
}

pub struct DnfRepositories {
    gateway: ExecutionGateway,
    repos_dir: PathBuf,
}

impl DnfRepositories {
    #[must_use]
    pub fn new(gateway: ExecutionGateway, repos_dir: impl Into<PathBuf>) -> Self {
        Self {
            gateway,
            repos_dir: repos_dir.into(),
        }
    }

    async fn repo_files(&self) -> Result<Vec<(PathBuf, String)>, AdminError> {
        let mut files = Vec::new();
        for path in files_with_extension(&self.repos_dir, &["repo"]).await? {
            if let Some(contents) = read_if_exists(&path).await? {
                files.push((path, contents));
            }
        }
        Ok(files)
    }

    fn dnf<'a>(args: impl IntoIterator<Item = &'a str>) -> ExecutionRequest {
        ExecutionRequest::new("dnf").args(args)
    }
}

fn find_section<'a>(
    files: &'a [(PathBuf, String)],
    id: &str,
) -> Option<(&'a Path, &'a str, RepoSection)> {
    files.iter().find_map(|(path, contents)| {
        parse_repo_file(contents)
            .into_iter()
            .find(|section| section.id == id)
            .map(|section| (path.as_path(), contents.as_str(), section))
    })
}

#[async_trait]
impl RepositoryBackend for DnfRepositories {
    fn kind(&self) -> PackageBackendKind {
        DNF
    }

    async fn list(&self) -> Result<Vec<Repository>, AdminError> {
        let output = self
            .gateway
            .read(Self::dnf(["repolist", "--all"]), None)
            .await?;
        let files = self.repo_files().await?;

        Ok(parse_repolist(&output)
            .into_records()
            .into_iter()
            .map(|mut repo| {
                if let Some((path, _, section)) = find_section(&files, &repo.id) {
                    repo.url = section.url.unwrap_or_default();
                    repo.file = Some(path.to_path_buf());
                }
                repo
            })
            .collect())
    }

    async fn add(
        &self,
        url: &str,
        name: Option<&str>,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let url = validate::token("url", url.trim())?;
        if let Some(name) = name {
            debug!("dnf names added repositories itself, ignoring {name}");
        }
        let result = self
            .gateway
            .mutate(
                Domain::Repositories,
                Self::dnf(["config-manager", "--add-repo", url]).privileged(),
                cred,
            )
            .await?;
        Ok(OpOutcome::ok(result.stdout.trim().to_string()))
    }

    async fn remove(&self, key: &str, cred: Option<&Credential>) -> Result<OpOutcome, AdminError> {
        let key = validate::token("repository", key)?;
        let guard = self.gateway.lock(Domain::Repositories).await;
        let files = self.repo_files().await?;
        let Some((path, contents, section)) = find_section(&files, key) else {
            return Ok(OpOutcome::failed(NOT_FOUND));
        };

        let (start, end) = section.lines;
        let edits: BTreeMap<usize, LineEdit> =
            (start..=end).map(|index| (index, LineEdit::Drop)).collect();
        self.gateway
            .replace_file(&guard, path, &apply_line_edits(contents, &edits), cred)
            .await?;
        Ok(OpOutcome::ok(format!("Removed repository {key}")))
    }

    async fn set_enabled(
        &self,
        key: &str,
        enabled: bool,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let key = validate::token("repository", key)?;
        let flag = if enabled {
            "--set-enabled"
        } else {
            "--set-disabled"
        };
        self.gateway
            .mutate(
                Domain::Repositories,
                Self::dnf(["config-manager", flag, key]).privileged(),
                cred,
            )
            .await?;
        Ok(OpOutcome::ok(format!(
            "Repository {key} {}",
            if enabled { "enabled" } else { "disabled" }
        )))
    }

    async fn refresh(&self, cred: Option<&Credential>) -> Result<OpOutcome, AdminError> {
        self.gateway
            .mutate(
                Domain::Repositories,
                Self::dnf(["makecache"]).privileged(),
                cred,
            )
            .await?;
        Ok(OpOutcome::ok("Repository metadata refreshed"))
    }
}
