use async_trait::async_trait;

use sysdeck_backend::{
    AdminError, Credential, Domain, OpOutcome, PackageBackendKind, Parsed, Repository,
    RepositoryBackend,
};
use sysdeck_exec::{ExecutionGateway, ExecutionRequest};

use super::default_repo_name;
use crate::table::parse_pipe_table;
use crate::validate;

const ZYPPER: PackageBackendKind = PackageBackendKind::Zypper;

/// `zypper lr -u`, columns located by header name.
pub(crate) fn parse_repo_table(output: &str) -> Parsed<Repository> {
    let rows = parse_pipe_table(ZYPPER.as_str(), output);
    let mut parsed = Parsed {
        records: Vec::new(),
        issues: rows.issues,
    };

    for row in rows.records {
        let Some(alias) = row.get("Alias").filter(|alias| !alias.is_empty()) else {
            parsed.skip(ZYPPER.as_str(), row.line_no, &row.raw);
            continue;
        };
        parsed.push(Repository {
            id: alias.to_string(),
            name: row.get("Name").unwrap_or(alias).to_string(),
            url: row.first(&["URI", "Url"]).unwrap_or_default().to_string(),
            enabled: row.get("Enabled").is_some_and(|value| value.starts_with("Yes")),
            backend: ZYPPER,
            file: None,
        });
    }

    parsed
}

pub struct ZypperRepositories {
    gateway: ExecutionGateway,
}

impl ZypperRepositories {
    #[must_use]
    pub fn new(gateway: ExecutionGateway) -> Self {
        Self { gateway }
    }

    fn zypper<'a>(args: impl IntoIterator<Item = &'a str>) -> ExecutionRequest {
        ExecutionRequest::new("zypper")
            .arg("--non-interactive")
            .args(args)
    }
}

#[async_trait]
impl RepositoryBackend for ZypperRepositories {
    fn kind(&self) -> PackageBackendKind {
        ZYPPER
    }

    async fn list(&self) -> Result<Vec<Repository>, AdminError> {
        let output = self.gateway.read(Self::zypper(["lr", "-u"]), None).await?;
        Ok(parse_repo_table(&output).into_records())
    }

    async fn add(
        &self,
        url: &str,
        name: Option<&str>,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let url = validate::token("url", url.trim())?;
        let alias = match name {
            Some(name) => validate::token("name", name)?.to_string(),
            None => default_repo_name(),
        };
        self.gateway
            .mutate(
                Domain::Repositories,
                Self::zypper(["addrepo", url, &alias]).privileged(),
                cred,
            )
            .await?;
        Ok(OpOutcome::ok(format!("Added repository {alias}")))
    }

    async fn remove(&self, key: &str, cred: Option<&Credential>) -> Result<OpOutcome, AdminError> {
        let key = validate::token("repository", key)?;
        self.gateway
            .mutate(
                Domain::Repositories,
                Self::zypper(["removerepo", key]).privileged(),
                cred,
            )
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
        let flag = if enabled { "--enable" } else { "--disable" };
        self.gateway
            .mutate(
                Domain::Repositories,
                Self::zypper(["modifyrepo", flag, key]).privileged(),
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
                Self::zypper(["refresh"]).privileged(),
                cred,
            )
            .await?;
        Ok(OpOutcome::ok("Repositories refreshed"))
    }
}

#[cfg(test)]
mod tests {
    use super::parse_repo_table;

    #[test]
    fn repo_table_columns_are_found_by_header() {
        let output = "\
Repository priorities are without effect. All enabled repositories share the same priority.

#  | Alias          | Name                 | Enabled | GPG Check | Refresh | URI
---+----------------+----------------------+---------+-----------+---------+------------------------------------------
 1 | repo-oss       | Main Repository      | Yes     | (r ) Yes  | Yes     | https://download.opensuse.org/tumbleweed/repo/oss/
 2 | repo-debug     | Debug Repository     | No      | ----      | ----    | https://download.opensuse.org/debug/tumbleweed/repo/oss/
";
        let parsed = parse_repo_table(output);
        assert_eq!(parsed.skipped(), 0);
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.records[0].id, "repo-oss");
        assert_eq!(parsed.records[0].name, "Main Repository");
        assert!(parsed.records[0].enabled);
        assert!(!parsed.records[1].enabled);
        assert!(parsed.records[1].url.ends_with("repo/oss/"));
    }
}
