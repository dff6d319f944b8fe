use std::path::PathBuf;
use std::sync::LazyLock;

use async_trait::async_trait;
use log::info;
use regex::Regex;

use sysdeck_backend::{
    AdminError, BootBackend, BootConfiguration, BootEntry, BootLoaderKind, Credential, Domain,
    OpOutcome,
};
use sysdeck_exec::{DomainGuard, ExecutionGateway, ExecutionRequest};
use sysdeck_platform::Host;

use crate::config_file::{assignment_value, read_if_exists, set_assignment, unquote};

static MENU_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*(?P<kind>menuentry|submenu)\s+(?:'(?P<single>[^']*)'|"(?P<double>[^"]*)")"#)
        .expect("grub menu regex")
});

/// Program that rebuilds `grub.cfg`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrubGenerator {
    /// Debian's wrapper, which knows its own output path.
    UpdateGrub,
    Mkconfig(&'static str),
}

impl GrubGenerator {
    #[must_use]
    pub fn detect(host: &dyn Host) -> Self {
        if host.find_binary("update-grub").is_some() {
            Self::UpdateGrub
        } else if host.find_binary("grub2-mkconfig").is_some() {
            Self::Mkconfig("grub2-mkconfig")
        } else {
            Self::Mkconfig("grub-mkconfig")
        }
    }
}

/// Menu titles from `grub.cfg`. Entries inside a submenu are addressed as
/// `Submenu>Entry`, the form `GRUB_DEFAULT` accepts.
pub(crate) fn parse_menu(contents: &str) -> Vec<BootEntry> {
    let mut entries = Vec::new();
    let mut submenu: Option<String> = None;

    for line in contents.lines() {
        if line.starts_with('}') {
            submenu = None;
            continue;
        }
        let Some(caps) = MENU_LINE.captures(line) else {
            continue;
        };
        let title = caps
            .name("single")
            .or_else(|| caps.name("double"))
            .map_or("", |m| m.as_str())
            .to_string();
        if &caps["kind"] == "submenu" {
            submenu = Some(title);
            continue;
        }
        let id = match (&submenu, line.starts_with(char::is_whitespace)) {
            (Some(parent), true) => format!("{parent}>{title}"),
            _ => title.clone(),
        };
        entries.push(BootEntry { id, title });
    }

    entries
}

/// `set default=` and `set timeout=` as written by the generator.
fn generated_setting<'a>(contents: &'a str, key: &str) -> Option<&'a str> {
    contents.lines().find_map(|line| {
        let value = assignment_value(line.trim(), &format!("set {key}"), "=")?;
        Some(unquote(value))
    })
}

pub struct GrubBoot {
    gateway: ExecutionGateway,
    cfg: PathBuf,
    defaults: PathBuf,
    generator: GrubGenerator,
}

impl GrubBoot {
    #[must_use]
    pub fn new(
        gateway: ExecutionGateway,
        cfg: impl Into<PathBuf>,
        defaults: impl Into<PathBuf>,
        generator: GrubGenerator,
    ) -> Self {
        Self {
            gateway,
            cfg: cfg.into(),
            defaults: defaults.into(),
            generator,
        }
    }

    fn generate_request(&self) -> ExecutionRequest {
        match self.generator {
            GrubGenerator::UpdateGrub => ExecutionRequest::new("update-grub"),
            GrubGenerator::Mkconfig(program) => ExecutionRequest::new(program)
                .arg("-o")
                .arg(self.cfg.display().to_string()),
        }
        .privileged()
    }

    async fn regenerate(
        &self,
        guard: &DomainGuard,
        cred: Option<&Credential>,
    ) -> Result<(), AdminError> {
        self.gateway
            .mutate_locked(guard, self.generate_request(), cred)
            .await?;
        info!("Regenerated {}", self.cfg.display());
        Ok(())
    }

    /// Sets one `/etc/default/grub` key and regenerates under one lock.
    async fn set_default_key(
        &self,
        key: &str,
        value: &str,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let guard = self.gateway.lock(Domain::Boot).await;
        let Some(contents) = read_if_exists(&self.defaults).await? else {
            return Ok(OpOutcome::failed("GRUB configuration not found"));
        };
        let updated = set_assignment(&contents, key, "=", value);
        self.gateway
            .replace_file(&guard, &self.defaults, &updated, cred)
            .await?;
        self.regenerate(&guard, cred).await?;
        Ok(OpOutcome::ok(format!("{key} set to {value}")))
    }
}

#[async_trait]
impl BootBackend for GrubBoot {
    fn kind(&self) -> BootLoaderKind {
        BootLoaderKind::Grub
    }

    /// `/etc/default/grub` wins over the generated file, since it is what
    /// the next regeneration will use.
    async fn config(&self) -> Result<BootConfiguration, AdminError> {
        let generated = read_if_exists(&self.cfg).await?.unwrap_or_default();
        let defaults = read_if_exists(&self.defaults).await?.unwrap_or_default();
        let configured = |key: &str| {
            defaults
                .lines()
                .find_map(|line| assignment_value(line, key, "="))
                .map(unquote)
        };

        let default_entry = configured("GRUB_DEFAULT")
            .or_else(|| generated_setting(&generated, "default"))
            .map(str::to_string);
        let timeout_secs = configured("GRUB_TIMEOUT")
            .or_else(|| generated_setting(&generated, "timeout"))
            .and_then(|value| value.parse().ok());

        Ok(BootConfiguration {
            loader: BootLoaderKind::Grub,
            default_entry,
            timeout_secs,
            entries: parse_menu(&generated),
        })
    }

    async fn set_default_entry(
        &self,
        entry: &str,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        if entry.contains(['"', '$', '`', '\\']) {
            return Err(AdminError::invalid(
                "entry",
                "must not contain quotes, '$', '`' or '\\'",
            ));
        }
        let value = if entry == "saved" || entry.parse::<u32>().is_ok() {
            entry.to_string()
        } else {
            format!("\"{entry}\"")
        };
        self.set_default_key("GRUB_DEFAULT", &value, cred).await
    }

    async fn set_timeout(
        &self,
        seconds: u32,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        self.set_default_key("GRUB_TIMEOUT", &seconds.to_string(), cred)
            .await
    }

    async fn update(&self, cred: Option<&Credential>) -> Result<OpOutcome, AdminError> {
        let guard = self.gateway.lock(Domain::Boot).await;
        self.regenerate(&guard, cred).await?;
        Ok(OpOutcome::ok("GRUB configuration updated"))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sysdeck_exec::testing::ScriptedRunner;

    use super::*;

    const GRUB_CFG: &str = "\
set default=\"0\"
if [ x\"${feature_timeout_style}\" = xy ] ; then
  set timeout=5
fi
menuentry 'Debian GNU/Linux' --class debian --class gnu-linux {
\tlinux /vmlinuz-6.1.0-18-amd64 root=UUID=abc ro quiet
}
submenu 'Advanced options for Debian GNU/Linux' $menuentry_id_option 'gnulinux-advanced' {
\tmenuentry 'Debian GNU/Linux, with Linux 6.1.0-18-amd64' --class debian {
\t\tlinux /vmlinuz-6.1.0-18-amd64
\t}
}
menuentry \"UEFI Firmware Settings\" {
\tfwsetup
}
";

    #[test]
    fn menu_entries_keep_submenu_paths() {
        let entries = parse_menu(GRUB_CFG);
        let ids: Vec<_> = entries.iter().map(|entry| entry.id.as_str()).collect();
        assert_eq!(
            ids,
            [
                "Debian GNU/Linux",
                "Advanced options for Debian GNU/Linux>Debian GNU/Linux, with Linux 6.1.0-18-amd64",
                "UEFI Firmware Settings",
            ]
        );
        assert_eq!(entries[1].title, "Debian GNU/Linux, with Linux 6.1.0-18-amd64");
    }

    #[test]
    fn generated_settings_are_read_from_nested_lines() {
        assert_eq!(generated_setting(GRUB_CFG, "default"), Some("0"));
        assert_eq!(generated_setting(GRUB_CFG, "timeout"), Some("5"));
    }

    #[tokio::test]
    async fn timeout_edit_rewrites_defaults_then_regenerates() {
        let dir = tempfile::tempdir().expect("temp dir");
        let cfg = dir.path().join("grub.cfg");
        let defaults = dir.path().join("grub");
        std::fs::write(&cfg, GRUB_CFG).expect("seed cfg");
        std::fs::write(&defaults, "GRUB_DEFAULT=0\nGRUB_TIMEOUT=5\nGRUB_CMDLINE_LINUX=\"\"\n")
            .expect("seed defaults");

        let runner = Arc::new(ScriptedRunner::new());
        let grub = GrubBoot::new(
            Arc::clone(&runner).into_gateway(),
            &cfg,
            &defaults,
            GrubGenerator::Mkconfig("grub2-mkconfig"),
        );

        let outcome = grub.set_timeout(2, None).await.expect("set timeout");
        assert!(outcome.success);
        assert_eq!(
            std::fs::read_to_string(&defaults).expect("read defaults"),
            "GRUB_DEFAULT=0\nGRUB_TIMEOUT=2\nGRUB_CMDLINE_LINUX=\"\"\n"
        );
        assert_eq!(
            runner.command_lines(),
            [format!("grub2-mkconfig -o {}", cfg.display())]
        );

        let config = grub.config().await.expect("config");
        assert_eq!(config.timeout_secs, Some(2));
        assert_eq!(config.default_entry.as_deref(), Some("0"));
        assert_eq!(config.entries.len(), 3);
    }

    #[tokio::test]
    async fn named_defaults_are_quoted() {
        let dir = tempfile::tempdir().expect("temp dir");
        let defaults = dir.path().join("grub");
        std::fs::write(&defaults, "GRUB_DEFAULT=0\n").expect("seed defaults");
        let runner = Arc::new(ScriptedRunner::new());
        let grub = GrubBoot::new(
            Arc::clone(&runner).into_gateway(),
            dir.path().join("grub.cfg"),
            &defaults,
            GrubGenerator::UpdateGrub,
        );

        grub.set_default_entry("Debian GNU/Linux", None)
            .await
            .expect("set default");
        assert_eq!(
            std::fs::read_to_string(&defaults).expect("read defaults"),
            "GRUB_DEFAULT=\"Debian GNU/Linux\"\n"
        );
        assert_eq!(runner.command_lines(), ["update-grub"]);
        assert!(grub.set_default_entry("$(reboot)", None).await.is_err());
    }
}
