use std::path::PathBuf;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use sysdeck_backend::{
    AdminError, BootBackend, BootConfiguration, BootEntry, BootLoaderKind, Credential, Domain,
    OpOutcome,
};
use sysdeck_exec::ExecutionGateway;

use crate::config_file::{assignment_value, read_if_exists, set_assignment, unquote};

static MENU_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*menuentry\s+(?:"(?P<quoted>[^"]+)"|(?P<bare>\S+))"#)
        .expect("refind menuentry regex")
});

/// Manual stanzas only; rEFInd finds the rest at boot time.
pub(crate) fn parse_stanzas(contents: &str) -> Vec<BootEntry> {
    contents
        .lines()
        .filter_map(|line| MENU_ENTRY.captures(line))
        .filter_map(|caps| caps.name("quoted").or_else(|| caps.name("bare")))
        .map(|title| BootEntry {
            id: title.as_str().to_string(),
            title: title.as_str().to_string(),
        })
        .collect()
}

pub struct RefindBoot {
    gateway: ExecutionGateway,
    conf: PathBuf,
}

impl RefindBoot {
    #[must_use]
    pub fn new(gateway: ExecutionGateway, conf: impl Into<PathBuf>) -> Self {
        Self {
            gateway,
            conf: conf.into(),
        }
    }

    async fn set_key(
        &self,
        key: &str,
        value: &str,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let guard = self.gateway.lock(Domain::Boot).await;
        let Some(contents) = read_if_exists(&self.conf).await? else {
            return Ok(OpOutcome::failed("rEFInd configuration not found"));
        };
        let updated = set_assignment(&contents, key, " ", value);
        self.gateway
            .replace_file(&guard, &self.conf, &updated, cred)
            .await?;
        Ok(OpOutcome::ok(format!("{key} set to {value}")))
    }
}

#[async_trait]
impl BootBackend for RefindBoot {
    fn kind(&self) -> BootLoaderKind {
        BootLoaderKind::Refind
    }

    async fn config(&self) -> Result<BootConfiguration, AdminError> {
        let contents = read_if_exists(&self.conf).await?.unwrap_or_default();
        let setting = |key: &str| {
            contents
                .lines()
                .find_map(|line| assignment_value(line, key, " "))
                .map(unquote)
        };
        Ok(BootConfiguration {
            loader: BootLoaderKind::Refind,
            default_entry: setting("default_selection").map(str::to_string),
            timeout_secs: setting("timeout").and_then(|value| value.parse().ok()),
            entries: parse_stanzas(&contents),
        })
    }

    async fn set_default_entry(
        &self,
        entry: &str,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        if entry.contains('"') {
            return Err(AdminError::invalid("entry", "must not contain quotes"));
        }
        let value = if entry.contains(char::is_whitespace) {
            format!("\"{entry}\"")
        } else {
            entry.to_string()
        };
        self.set_key("default_selection", &value, cred).await
    }

    async fn set_timeout(
        &self,
        seconds: u32,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        self.set_key("timeout", &seconds.to_string(), cred).await
    }

    /// rEFInd scans at boot; there is nothing to regenerate.
    async fn update(&self, _cred: Option<&Credential>) -> Result<OpOutcome, AdminError> {
        Ok(OpOutcome::ok("rEFInd needs no regeneration"))
    }
}
