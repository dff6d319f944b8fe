use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use sysdeck_backend::{
    AdminError, Credential, Domain, OpOutcome, PackageBackendKind, Repository, RepositoryBackend,
};
use sysdeck_exec::{ExecutionGateway, ExecutionRequest};

use super::NOT_FOUND;
use crate::config_file::{apply_line_edits, read_if_exists, LineEdit};
use crate::validate;

const PACMAN: PackageBackendKind = PackageBackendKind::Pacman;

/// A repository section of `pacman.conf`, enabled or commented out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Section {
    pub name: String,
    pub enabled: bool,
    pub url: String,
    pub lines: (usize, usize),
}

/// `[name]` or `#[name]`.
fn section_header(line: &str) -> Option<(bool, &str)> {
    let trimmed = line.trim();
    let (enabled, rest) = match trimmed.strip_prefix('#') {
        Some(rest) => (false, rest.trim_start()),
        None => (true, trimmed),
    };
    let name = rest.strip_prefix('[')?.strip_suffix(']')?.trim();
    (!name.is_empty() && !name.contains(char::is_whitespace)).then_some((enabled, name))
}

/// `Server = x` or `Include = x`, commented or not.
fn origin(line: &str) -> Option<&str> {
    let trimmed = line.trim().trim_start_matches('#').trim_start();
    let (key, value) = trimmed.split_once('=')?;
    matches!(key.trim(), "Server" | "Include").then(|| value.trim())
}

pub(crate) fn parse_pacman_conf(contents: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();

    for (index, line) in contents.lines().enumerate() {
        if let Some((enabled, name)) = section_header(line) {
            sections.push(Section {
                name: name.to_string(),
                enabled,
                url: String::new(),
                lines: (index, index),
            });
            continue;
        }
        let Some(section) = sections.last_mut() else {
            continue;
        };
        if line.trim().is_empty() {
            continue;
        }
        section.lines.1 = index;
        if section.url.is_empty()
            && let Some(url) = origin(line)
        {
            section.url = url.to_string();
        }
    }

    sections.retain(|section| section.name != "options");
    sections
}

fn toggle_edits(contents: &str, section: &Section, enabled: bool) -> BTreeMap<usize, LineEdit> {
    let mut edits = BTreeMap::new();
    let (start, end) = section.lines;

    for (index, line) in contents.lines().enumerate().take(end + 1).skip(start) {
        let is_directive = index == start || origin(line).is_some() || line.contains('=');
        if !is_directive {
            continue;
        }
        let trimmed = line.trim();
        let commented = trimmed.starts_with('#');
        if enabled && commented {
            let uncommented = trimmed.trim_start_matches('#').trim_start();
            edits.insert(index, LineEdit::Replace(uncommented.to_string()));
        } else if !enabled && !commented {
            edits.insert(index, LineEdit::Replace(format!("#{trimmed}")));
        }
    }

    edits
}

fn default_section_name(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .trim_end_matches(".git")
        .to_string()
}

pub struct PacmanRepositories {
    gateway: ExecutionGateway,
    conf: PathBuf,
}

impl PacmanRepositories {
    #[must_use]
    pub fn new(gateway: ExecutionGateway, conf: impl Into<PathBuf>) -> Self {
        Self {
            gateway,
            conf: conf.into(),
        }
    }

    async fn contents(&self) -> Result<String, AdminError> {
        read_if_exists(&self.conf)
            .await?
            .ok_or_else(|| AdminError::Io {
                kind: std::io::ErrorKind::NotFound,
                message: format!("{} does not exist", self.conf.display()),
            })
    }

    async fn rewrite(
        &self,
        key: &str,
        cred: Option<&Credential>,
        edit: impl Fn(&str, &Section) -> BTreeMap<usize, LineEdit> + Send + Sync,
    ) -> Result<bool, AdminError> {
        let guard = self.gateway.lock(Domain::Repositories).await;
        let contents = self.contents().await?;
        let Some(section) = parse_pacman_conf(&contents)
            .into_iter()
            .find(|section| section.name == key)
        else {
            return Ok(false);
        };
        let rewritten = apply_line_edits(&contents, &edit(&contents, &section));
        self.gateway
            .replace_file(&guard, &self.conf, &rewritten, cred)
            .await?;
        Ok(true)
    }

    fn path(&self) -> &Path {
        &self.conf
    }
}

#[async_trait]
impl RepositoryBackend for PacmanRepositories {
    fn kind(&self) -> PackageBackendKind {
        PACMAN
    }

    async fn list(&self) -> Result<Vec<Repository>, AdminError> {
        let contents = self.contents().await?;
        Ok(parse_pacman_conf(&contents)
            .into_iter()
            .map(|section| Repository {
                id: section.name.clone(),
                name: section.name,
                url: section.url,
                enabled: section.enabled,
                backend: PACMAN,
                file: Some(self.path().to_path_buf()),
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
        let name = match name {
            Some(name) => name.to_string(),
            None => default_section_name(url),
        };
        let name = validate::file_token("name", &name)?;

        let guard = self.gateway.lock(Domain::Repositories).await;
        let mut contents = self.contents().await?;
        if parse_pacman_conf(&contents)
            .iter()
            .any(|section| section.name == name)
        {
            return Ok(OpOutcome::failed(format!("Repository {name} already exists")));
        }
        if !contents.ends_with('\n') {
            contents.push('\n');
        }
        contents.push_str(&format!("\n[{name}]\nServer = {url}\n"));
        self.gateway
            .replace_file(&guard, &self.conf, &contents, cred)
            .await?;
        Ok(OpOutcome::ok("Repository added successfully"))
    }

    async fn remove(&self, key: &str, cred: Option<&Credential>) -> Result<OpOutcome, AdminError> {
        let removed = self
            .rewrite(key, cred, |_, section| {
                let (start, end) = section.lines;
                (start..=end).map(|index| (index, LineEdit::Drop)).collect()
            })
            .await?;
        Ok(if removed {
            OpOutcome::ok("Repository removed successfully")
        } else {
            OpOutcome::failed(NOT_FOUND)
        })
    }

    async fn set_enabled(
        &self,
        key: &str,
        enabled: bool,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let toggled = self
            .rewrite(key, cred, |contents, section| {
                toggle_edits(contents, section, enabled)
            })
            .await?;
        Ok(if toggled {
            OpOutcome::ok("Repository toggled successfully")
        } else {
            OpOutcome::failed(NOT_FOUND)
        })
    }

    async fn refresh(&self, cred: Option<&Credential>) -> Result<OpOutcome, AdminError> {
        self.gateway
            .mutate(
                Domain::Repositories,
                ExecutionRequest::new("pacman").arg("-Sy").privileged(),
                cred,
            )
            .await?;
        Ok(OpOutcome::ok("Package databases synchronized"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONF: &str = "\
[options]
HoldPkg     = pacman glibc
Architecture = auto

[core]
Include = /etc/pacman.d/mirrorlist

[extra]
Include = /etc/pacman.d/mirrorlist

#[multilib]
#Include = /etc/pacman.d/mirrorlist
";

    #[test]
    fn sections_skip_options_and_detect_commented_repos() {
        let sections = parse_pacman_conf(CONF);
        let names: Vec<_> = sections.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["core", "extra", "multilib"]);
        assert!(sections[0].enabled);
        assert!(!sections[2].enabled);
        assert_eq!(sections[2].url, "/etc/pacman.d/mirrorlist");
        assert_eq!(sections[2].lines, (10, 11));
    }

    #[test]
    fn toggle_round_trips_a_section() {
        let multilib = parse_pacman_conf(CONF).remove(2);
        let enabled = apply_line_edits(CONF, &toggle_edits(CONF, &multilib, true));
        assert!(enabled.ends_with("[multilib]\nInclude = /etc/pacman.d/mirrorlist\n"));

        let section = parse_pacman_conf(&enabled).remove(2);
        assert!(section.enabled);
        let disabled = apply_line_edits(&enabled, &toggle_edits(&enabled, &section, false));
        assert_eq!(disabled, CONF);
    }

    #[test]
    fn default_name_comes_from_the_url() {
        assert_eq!(default_section_name("https://repo.example.org/chaotic-aur/"), "chaotic-aur");
        assert_eq!(default_section_name("https://github.com/x/custom.git"), "custom");
    }
}
