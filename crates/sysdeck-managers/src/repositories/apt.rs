use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::info;

use sysdeck_backend::{
    AdminError, Credential, Domain, OpOutcome, PackageBackendKind, Parsed, Repository,
    RepositoryBackend, closest_match,
};
use sysdeck_exec::{ExecutionGateway, ExecutionRequest};

use super::{default_repo_name, NOT_FOUND};
use crate::config_file::{apply_line_edits, files_with_extension, read_if_exists, LineEdit};
use crate::validate;

const APT: PackageBackendKind = PackageBackendKind::Apt;

/// Where apt keeps its source definitions.
#[derive(Debug, Clone)]
pub struct AptSources {
    pub sources_list: PathBuf,
    pub parts_dir: PathBuf,
}

impl Default for AptSources {
    fn default() -> Self {
        Self::under(Path::new("/etc/apt"))
    }
}

impl AptSources {
    /// `sources.list` and `sources.list.d` inside `dir`.
    #[must_use]
    pub fn under(dir: &Path) -> Self {
        Self {
            sources_list: dir.join("sources.list"),
            parts_dir: dir.join("sources.list.d"),
        }
    }
}

/// A parsed source together with the lines that define it.
#[derive(Debug, Clone)]
pub(crate) struct AptEntry {
    pub repository: Repository,
    /// First and last zero-based line of the definition.
    pub lines: (usize, usize),
    pub deb822: bool,
}

/// `deb [opts] uri suite comp...` minus the type and options.
fn split_one_line(entry: &str) -> Option<(&str, &str)> {
    let (_kind, rest) = entry.split_once(char::is_whitespace)?;
    let rest = rest.trim_start();
    let rest = if rest.starts_with('[') {
        rest.split_once(']')?.1.trim_start()
    } else {
        rest
    };
    let mut fields = rest.split_whitespace();
    let uri = fields.next()?;
    let suite = fields.next().unwrap_or_default();
    Some((uri, suite))
}

/// A `deb`/`deb-src` line, active or commented out. Other comments are
/// `None`.
fn source_line(line: &str) -> Option<(bool, &str)> {
    let trimmed = line.trim();
    let (enabled, entry) = match trimmed.strip_prefix('#') {
        Some(rest) => (false, rest.trim_start()),
        None => (true, trimmed),
    };
    (entry.starts_with("deb ") || entry.starts_with("deb-src ")).then_some((enabled, entry))
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// One-line-style `.list` file.
pub(crate) fn parse_list_file(path: &Path, contents: &str, is_main: bool) -> Parsed<AptEntry> {
    let mut parsed = Parsed::new();

    for (index, line) in contents.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Some((enabled, entry)) = source_line(trimmed) else {
            if !trimmed.starts_with('#') {
                parsed.skip(APT.as_str(), index + 1, line);
            }
            continue;
        };
        let Some((uri, suite)) = split_one_line(entry) else {
            parsed.skip(APT.as_str(), index + 1, line);
            continue;
        };

        let name = if is_main {
            suite.to_string()
        } else {
            file_stem(path)
        };
        parsed.push(AptEntry {
            repository: Repository {
                id: entry.to_string(),
                name,
                url: uri.to_string(),
                enabled,
                backend: APT,
                file: Some(path.to_path_buf()),
            },
            lines: (index, index),
            deb822: false,
        });
    }

    parsed
}

/// deb822 `.sources` file: blank-line separated stanzas of `Key: value`.
pub(crate) fn parse_sources_file(path: &Path, contents: &str) -> Parsed<AptEntry> {
    let mut parsed = Parsed::new();
    let lines: Vec<&str> = contents.lines().collect();
    let mut start = 0;

    while start < lines.len() {
        if lines[start].trim().is_empty() || lines[start].trim_start().starts_with('#') {
            start += 1;
            continue;
        }
        let mut end = start;
        while end + 1 < lines.len() && !lines[end + 1].trim().is_empty() {
            end += 1;
        }

        let mut fields: BTreeMap<String, String> = BTreeMap::new();
        for line in &lines[start..=end] {
            if line.trim_start().starts_with('#') || line.starts_with([' ', '\t']) {
                continue;
            }
            if let Some((key, value)) = line.split_once(':') {
                fields.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }

        match (fields.get("types"), fields.get("uris"), fields.get("suites")) {
            (Some(types), Some(uris), Some(suites)) => {
                let url = uris.split_whitespace().next().unwrap_or_default();
                let enabled = !fields
                    .get("enabled")
                    .is_some_and(|value| value.eq_ignore_ascii_case("no"));
                parsed.push(AptEntry {
                    repository: Repository {
                        id: format!("{types} {uris} {suites}"),
                        name: file_stem(path),
                        url: url.to_string(),
                        enabled,
                        backend: APT,
                        file: Some(path.to_path_buf()),
                    },
                    lines: (start, end),
                    deb822: true,
                });
            }
            _ => parsed.skip(APT.as_str(), start + 1, lines[start]),
        }

        start = end + 1;
    }

    parsed
}

/// Line edits that put `entry` into the requested state.
fn toggle_edits(contents: &str, entry: &AptEntry, enabled: bool) -> BTreeMap<usize, LineEdit> {
    let lines: Vec<&str> = contents.lines().collect();
    let (start, end) = entry.lines;
    let mut edits = BTreeMap::new();

    if entry.deb822 {
        let value = if enabled { "yes" } else { "no" };
        let existing = (start..=end).find(|&index| {
            lines[index]
                .split_once(':')
                .is_some_and(|(key, _)| key.trim().eq_ignore_ascii_case("enabled"))
        });
        match existing {
            Some(index) => {
                edits.insert(index, LineEdit::Replace(format!("Enabled: {value}")));
            }
            None => {
                edits.insert(
                    start,
                    LineEdit::Replace(format!("{}\nEnabled: {value}", lines[start])),
                );
            }
        }
    } else if enabled {
        edits.insert(start, LineEdit::Replace(entry.repository.id.clone()));
    } else {
        edits.insert(start, LineEdit::Replace(format!("# {}", entry.repository.id)));
    }

    edits
}

fn removal_edits(entry: &AptEntry) -> BTreeMap<usize, LineEdit> {
    let (start, end) = entry.lines;
    (start..=end).map(|index| (index, LineEdit::Drop)).collect()
}

/// `deb` prefix is implied for bare `uri suite components` input.
fn source_line_for(input: &str) -> Result<String, AdminError> {
    let input = input.trim();
    if input.is_empty() || input.chars().any(char::is_control) {
        return Err(AdminError::invalid("url", "must be a single non-empty line"));
    }
    let line = if input.starts_with("deb ") || input.starts_with("deb-src ") {
        input.to_string()
    } else {
        format!("deb {input}")
    };
    if split_one_line(&line).is_none_or(|(uri, _)| !uri.contains(':')) {
        return Err(AdminError::invalid("url", format!("{input:?} has no URI")));
    }
    Ok(line)
}

pub struct AptRepositories {
    gateway: ExecutionGateway,
    sources: AptSources,
}

impl AptRepositories {
    #[must_use]
    pub fn new(gateway: ExecutionGateway, sources: AptSources) -> Self {
        Self { gateway, sources }
    }

    pub(crate) async fn entries(&self) -> Result<Vec<(PathBuf, String, AptEntry)>, AdminError> {
        let mut files = vec![self.sources.sources_list.clone()];
        files.extend(files_with_extension(&self.sources.parts_dir, &["list", "sources"]).await?);

        let mut entries = Vec::new();
        for path in files {
            let Some(contents) = read_if_exists(&path).await? else {
                continue;
            };
            let parsed = if path.extension().is_some_and(|ext| ext == "sources") {
                parse_sources_file(&path, &contents)
            } else {
                parse_list_file(&path, &contents, path == self.sources.sources_list)
            };
            for entry in parsed.into_records() {
                entries.push((path.clone(), contents.clone(), entry));
            }
        }
        Ok(entries)
    }

    /// Rewrites every file containing a matching entry, then refreshes.
    async fn edit_matching(
        &self,
        key: &str,
        cred: Option<&Credential>,
        edit: impl Fn(&str, &AptEntry) -> BTreeMap<usize, LineEdit> + Send + Sync,
    ) -> Result<bool, AdminError> {
        let guard = self.gateway.lock(Domain::Repositories).await;

        let entries = self.entries().await?;
        let Some(closest) = closest_match(entries.iter().map(|(_, _, e)| &e.repository), key) else {
            return Ok(false);
        };

        let mut per_file: BTreeMap<PathBuf, (String, BTreeMap<usize, LineEdit>)> = BTreeMap::new();
        for (path, contents, entry) in entries {
            if entry.repository.match_key(key) != Some(closest) {
                continue;
            }
            let edits = edit(&contents, &entry);
            per_file
                .entry(path)
                .or_insert_with(|| (contents, BTreeMap::new()))
                .1
                .extend(edits);
        }
        if per_file.is_empty() {
            return Ok(false);
        }

        for (path, (contents, edits)) in &per_file {
            let rewritten = apply_line_edits(contents, edits);
            self.gateway
                .replace_file(&guard, path, &rewritten, cred)
                .await?;
        }
        self.gateway
            .mutate_locked(&guard, apt_update(), cred)
            .await?;
        Ok(true)
    }
}

fn apt_update() -> ExecutionRequest {
    ExecutionRequest::new("apt").arg("update").privileged()
}

#[async_trait]
impl RepositoryBackend for AptRepositories {
    fn kind(&self) -> PackageBackendKind {
        APT
    }

    async fn list(&self) -> Result<Vec<Repository>, AdminError> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .map(|(_, _, entry)| entry.repository)
            .collect())
    }

    async fn add(
        &self,
        url: &str,
        name: Option<&str>,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let line = source_line_for(url)?;
        let name = match name {
            Some(name) => validate::file_token("name", name)?.to_string(),
            None => default_repo_name(),
        };
        let path = self.sources.parts_dir.join(format!("{name}.list"));

        let guard = self.gateway.lock(Domain::Repositories).await;
        if read_if_exists(&path).await?.is_some() {
            return Ok(OpOutcome::failed(format!(
                "Repository file {} already exists",
                path.display()
            )));
        }
        self.gateway
            .replace_file(&guard, &path, &format!("{line}\n"), cred)
            .await?;
        self.gateway
            .mutate_locked(&guard, apt_update(), cred)
            .await?;
        info!("Added apt source {name}");
        Ok(OpOutcome::ok("Repository added successfully"))
    }

    async fn remove(&self, key: &str, cred: Option<&Credential>) -> Result<OpOutcome, AdminError> {
        if self
            .edit_matching(key, cred, |_, entry| removal_edits(entry))
            .await?
        {
            Ok(OpOutcome::ok("Repository removed successfully"))
        } else {
            Ok(OpOutcome::failed(NOT_FOUND))
        }
    }

    async fn set_enabled(
        &self,
        key: &str,
        enabled: bool,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        if self
            .edit_matching(key, cred, |contents, entry| {
                toggle_edits(contents, entry, enabled)
            })
            .await?
        {
            Ok(OpOutcome::ok(if enabled {
                "Repository enabled"
            } else {
                "Repository disabled"
            }))
        } else {
            Ok(OpOutcome::failed(NOT_FOUND))
        }
    }

    async fn refresh(&self, cred: Option<&Credential>) -> Result<OpOutcome, AdminError> {
        self.gateway
            .mutate(Domain::Repositories, apt_update(), cred)
            .await?;
        Ok(OpOutcome::ok("Package lists refreshed"))
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    const MAIN: &str = "\
# See sources.list(5)
deb http://deb.debian.org/debian bookworm main contrib
deb-src http://deb.debian.org/debian bookworm main
#deb http://deb.debian.org/debian bookworm-backports main
deb [arch=amd64 signed-by=/usr/share/keyrings/x.gpg] https://download.docker.com/linux/debian bookworm stable
garbage line
";

    #[test]
    fn parses_one_line_entries_with_options_and_comments() {
        let parsed = parse_list_file(Path::new("/etc/apt/sources.list"), MAIN, true);
        assert_eq!(parsed.skipped(), 1);

        let repos: Vec<_> = parsed.records.iter().map(|e| &e.repository).collect();
        assert_eq!(repos.len(), 4);
        assert_eq!(repos[0].url, "http://deb.debian.org/debian");
        assert_eq!(repos[0].name, "bookworm");
        assert!(repos[0].enabled);
        assert!(!repos[2].enabled);
        assert_eq!(repos[2].name, "bookworm-backports");
        assert_eq!(repos[3].url, "https://download.docker.com/linux/debian");
        assert_eq!(parsed.records[3].lines, (4, 4));
    }

    #[test]
    fn parses_deb822_stanzas() {
        let contents = "\
Types: deb
URIs: http://archive.ubuntu.com/ubuntu/
Suites: noble noble-updates
Components: main restricted
Signed-By: /usr/share/keyrings/ubuntu-archive-keyring.gpg

Types: deb
URIs: http://security.ubuntu.com/ubuntu/
Suites: noble-security
Components: main
Enabled: no
";
        let parsed = parse_sources_file(Path::new("/etc/apt/sources.list.d/ubuntu.sources"), contents);
        assert_eq!(parsed.records.len(), 2);
        assert!(parsed.records[0].repository.enabled);
        assert_eq!(parsed.records[0].repository.name, "ubuntu");
        assert_eq!(parsed.records[0].lines, (0, 4));
        assert!(!parsed.records[1].repository.enabled);
        assert_eq!(parsed.records[1].lines, (6, 10));
    }

    #[test]
    fn toggling_one_line_entries_comments_and_uncomments() {
        let path = Path::new("/etc/apt/sources.list");
        let parsed = parse_list_file(path, MAIN, true);
        let active = &parsed.records[0];

        let disabled = apply_line_edits(MAIN, &toggle_edits(MAIN, active, false));
        assert!(disabled.contains("\n# deb http://deb.debian.org/debian bookworm main contrib\n"));

        let reparsed = parse_list_file(path, &disabled, true);
        assert!(!reparsed.records[0].repository.enabled);
        let enabled = apply_line_edits(&disabled, &toggle_edits(&disabled, &reparsed.records[0], true));
        assert_eq!(enabled, MAIN);
    }

    #[test]
    fn toggling_deb822_inserts_enabled_field() {
        let contents = "Types: deb\nURIs: http://x/\nSuites: a\n";
        let path = Path::new("x.sources");
        let entry = &parse_sources_file(path, contents).records[0];
        let disabled = apply_line_edits(contents, &toggle_edits(contents, entry, false));
        assert_eq!(disabled, "Types: deb\nEnabled: no\nURIs: http://x/\nSuites: a\n");
        assert!(!parse_sources_file(path, &disabled).records[0].repository.enabled);
    }

    #[test]
    fn add_input_requires_a_uri() {
        assert_eq!(
            source_line_for("http://ppa.launchpad.net/x/ubuntu jammy main").expect("line"),
            "deb http://ppa.launchpad.net/x/ubuntu jammy main"
        );
        assert!(source_line_for("deb-src https://x/ stable main").is_ok());
        assert!(source_line_for("jammy main").is_err());
        assert!(source_line_for("http://x/ a\ndeb http://evil/ b").is_err());
    }

    fn seeded_main(dir: &Path) -> (AptRepositories, PathBuf) {
        let sources = AptSources::under(dir);
        std::fs::create_dir_all(&sources.parts_dir).expect("parts dir");
        std::fs::write(
            &sources.sources_list,
            "deb http://deb.debian.org/debian bookworm main\n\
             deb-src http://deb.debian.org/debian bookworm main\n",
        )
        .expect("seed");
        let main = sources.sources_list.clone();
        let runner = std::sync::Arc::new(sysdeck_exec::testing::ScriptedRunner::new());
        (AptRepositories::new(runner.into_gateway(), sources), main)
    }

    #[tokio::test]
    async fn exact_id_toggles_only_that_entry() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (apt, main) = seeded_main(dir.path());
        let deb_src = apt
            .list()
            .await
            .expect("list")
            .into_iter()
            .find(|repo| repo.id.starts_with("deb-src"))
            .expect("deb-src entry");

        let outcome = apt.set_enabled(&deb_src.id, false, None).await.expect("toggle");
        assert!(outcome.success);

        let contents = std::fs::read_to_string(&main).expect("read");
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines[0], "deb http://deb.debian.org/debian bookworm main");
        assert!(lines[1].starts_with('#'), "{contents}");
    }

    #[tokio::test]
    async fn suite_name_falls_back_to_every_entry_of_that_suite() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (apt, main) = seeded_main(dir.path());

        let outcome = apt.set_enabled("bookworm", false, None).await.expect("toggle");
        assert!(outcome.success);

        let contents = std::fs::read_to_string(&main).expect("read");
        assert!(contents.lines().all(|line| line.starts_with('#')), "{contents}");
    }
}
