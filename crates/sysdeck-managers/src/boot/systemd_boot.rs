use std::path::PathBuf;

use async_trait::async_trait;

use sysdeck_backend::{
    AdminError, BootBackend, BootConfiguration, BootEntry, BootLoaderKind, Credential, Domain,
    OpOutcome,
};
use sysdeck_exec::{ExecutionGateway, ExecutionRequest};

use crate::config_file::{assignment_value, files_with_extension, read_if_exists};

/// Title of a Boot Loader Specification entry, falling back to the file
/// name the loader uses as its id.
pub(crate) fn parse_entry(id: &str, contents: &str) -> BootEntry {
    let field = |key: &str| {
        contents
            .lines()
            .find_map(|line| assignment_value(line, key, " "))
            .filter(|value| !value.is_empty())
    };
    let title = match (field("title"), field("version")) {
        (Some(title), Some(version)) => format!("{title} ({version})"),
        (Some(title), None) => title.to_string(),
        (None, _) => id.trim_end_matches(".conf").to_string(),
    };
    BootEntry {
        id: id.to_string(),
        title,
    }
}

pub struct SystemdBoot {
    gateway: ExecutionGateway,
    loader_dir: PathBuf,
}

impl SystemdBoot {
    #[must_use]
    pub fn new(gateway: ExecutionGateway, loader_dir: impl Into<PathBuf>) -> Self {
        Self {
            gateway,
            loader_dir: loader_dir.into(),
        }
    }

    async fn bootctl<I, S>(&self, args: I, cred: Option<&Credential>) -> Result<(), AdminError>
    where
        I: IntoIterator<Item = S> + Send,
        S: Into<String>,
    {
        self.gateway
            .mutate(
                Domain::Boot,
                ExecutionRequest::new("bootctl").args(args).privileged(),
                cred,
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl BootBackend for SystemdBoot {
    fn kind(&self) -> BootLoaderKind {
        BootLoaderKind::SystemdBoot
    }

    async fn config(&self) -> Result<BootConfiguration, AdminError> {
        let loader = read_if_exists(&self.loader_dir.join("loader.conf"))
            .await?
            .unwrap_or_default();
        let setting = |key: &str| {
            loader
                .lines()
                .find_map(|line| assignment_value(line, key, " "))
        };

        let mut entries = Vec::new();
        for path in files_with_extension(&self.loader_dir.join("entries"), &["conf"]).await? {
            let Some(id) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let contents = read_if_exists(&path).await?.unwrap_or_default();
            entries.push(parse_entry(id, &contents));
        }

        Ok(BootConfiguration {
            loader: BootLoaderKind::SystemdBoot,
            default_entry: setting("default").map(str::to_string),
            timeout_secs: setting("timeout").and_then(|value| value.parse().ok()),
            entries,
        })
    }

    async fn set_default_entry(
        &self,
        entry: &str,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        self.bootctl(["set-default", entry], cred).await?;
        Ok(OpOutcome::ok(format!("Default entry set to {entry}")))
    }

    async fn set_timeout(
        &self,
        seconds: u32,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        self.bootctl(["set-timeout".to_string(), seconds.to_string()], cred)
            .await?;
        Ok(OpOutcome::ok(format!("Timeout set to {seconds}s")))
    }

    async fn update(&self, cred: Option<&Credential>) -> Result<OpOutcome, AdminError> {
        self.bootctl(["update"], cred).await?;
        Ok(OpOutcome::ok("systemd-boot updated"))
    }
}
