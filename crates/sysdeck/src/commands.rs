use std::io::BufRead;

use serde::Serialize;
use serde_json::Value;

use sysdeck_backend::{
    AdminError, Credential, Direction, FirewallAction, LogKind, NewUser, OpOutcome,
    ProcessSignal, Protocol, RuleSpec, ServiceAction, UserChanges,
};
use sysdeck_managers::Managers;
use sysdeck_platform::SystemCapabilities;

use crate::cli::{
    BootCmd, Command, FirewallCmd, KernelCmd, LogCmd, PackageCmd, ProcessCmd, RepositoryCmd,
    RuleArgs, ServiceCmd, UserCmd,
};
use crate::settings::Settings;

/// What a command produced: a record to print and whether it counts as
/// success for the exit status.
pub struct Report {
    pub value: Value,
    pub success: bool,
}

impl Report {
    fn record<T: Serialize>(record: &T) -> Result<Self, AdminError> {
        let value = serde_json::to_value(record).map_err(|e| AdminError::Parse {
            backend: "json",
            line_no: e.line(),
            line: e.to_string(),
        })?;
        Ok(Self {
            value,
            success: true,
        })
    }

    fn outcome(outcome: &OpOutcome) -> Result<Self, AdminError> {
        let mut report = Self::record(outcome)?;
        report.success = outcome.success;
        Ok(report)
    }
}

/// Secrets arrive one per line on stdin, sudo password first.
pub struct SecretInput<R> {
    reader: R,
}

impl<R: BufRead> SecretInput<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    pub fn next(&mut self, field: &'static str) -> Result<Credential, AdminError> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(AdminError::invalid(field, "expected a line on stdin"));
        }
        Ok(Credential::from_line(line))
    }
}

fn parse_named<T>(
    field: &'static str,
    value: &str,
    from_name: fn(&str) -> Option<T>,
) -> Result<T, AdminError> {
    from_name(value).ok_or_else(|| AdminError::invalid(field, format!("unknown value {value:?}")))
}

fn rule_spec(args: RuleArgs) -> Result<RuleSpec, AdminError> {
    Ok(RuleSpec {
        action: parse_named("action", &args.action, FirewallAction::from_name)?,
        direction: parse_named("direction", &args.direction, Direction::from_name)?,
        protocol: parse_named("protocol", &args.protocol, Protocol::from_name)?,
        port: args.port,
        source: args.source,
        destination: args.destination,
        service: args.service,
    })
}

/// Runs one command. `cred` is consumed by the operation that needs it
/// and dropped unused otherwise.
pub async fn run<R: BufRead>(
    command: Command,
    caps: &SystemCapabilities,
    managers: &Managers,
    settings: &Settings,
    cred: Option<Credential>,
    secrets: &mut SecretInput<R>,
) -> Result<Report, AdminError> {
    match command {
        Command::Probe => Report::record(caps),
        Command::Info => Report::record(&managers.system.info().await?),
        Command::Packages(cmd) => packages(cmd, managers, cred).await,
        Command::Repositories(cmd) => repositories(cmd, managers, cred).await,
        Command::Services(cmd) => services(cmd, managers, cred).await,
        Command::Firewall(cmd) => firewall(cmd, managers, cred).await,
        Command::Boot(cmd) => boot(cmd, managers, cred).await,
        Command::Kernels(cmd) => kernels(cmd, managers, settings, cred).await,
        Command::Logs(cmd) => logs(cmd, managers, settings, cred).await,
        Command::Users(cmd) => users(cmd, managers, cred, secrets).await,
        Command::Processes(cmd) => processes(cmd, managers, cred).await,
    }
}

async fn packages(
    cmd: PackageCmd,
    managers: &Managers,
    cred: Option<Credential>,
) -> Result<Report, AdminError> {
    let packages = &managers.packages;
    match cmd {
        PackageCmd::Search { query } => Report::record(&packages.search(&query).await?),
        PackageCmd::Installed => Report::record(&packages.list_installed().await?),
        PackageCmd::Upgradable => Report::record(&packages.list_upgradable().await?),
        PackageCmd::Install { name } => Report::outcome(&packages.install(&name, cred).await?),
        PackageCmd::Remove { name } => Report::outcome(&packages.remove(&name, cred).await?),
        PackageCmd::UpgradeAll => Report::outcome(&packages.upgrade_all(cred).await?),
        PackageCmd::Clean => Report::outcome(&packages.clean(cred).await?),
    }
}

async fn repositories(
    cmd: RepositoryCmd,
    managers: &Managers,
    cred: Option<Credential>,
) -> Result<Report, AdminError> {
    let repos = &managers.repositories;
    match cmd {
        RepositoryCmd::List => Report::record(&repos.list().await?),
        RepositoryCmd::Add { source, name } => {
            Report::outcome(&repos.add(&source, name.as_deref(), cred).await?)
        }
        RepositoryCmd::Remove { key } => Report::outcome(&repos.remove(&key, cred).await?),
        RepositoryCmd::Enable { key } => toggled(&repos.toggle(&key, true, cred).await?),
        RepositoryCmd::Disable { key } => toggled(&repos.toggle(&key, false, cred).await?),
        RepositoryCmd::Refresh => Report::outcome(&repos.refresh(cred).await?),
    }
}

fn toggled<T: Serialize>(toggled: &sysdeck_backend::Toggled<T>) -> Result<Report, AdminError> {
    let mut report = Report::record(toggled)?;
    report.success = toggled.outcome.success;
    Ok(report)
}

async fn services(
    cmd: ServiceCmd,
    managers: &Managers,
    cred: Option<Credential>,
) -> Result<Report, AdminError> {
    let services = &managers.services;
    match cmd {
        ServiceCmd::List => Report::record(&services.list().await?),
        ServiceCmd::Status { name } => Report::record(&services.status(&name).await?),
        ServiceCmd::Control { action, name } => {
            let action = parse_named("action", &action, ServiceAction::from_name)?;
            Report::outcome(&services.control(&name, action, cred).await?)
        }
        ServiceCmd::Enable { name } => toggled(&services.set_enabled(&name, true, cred).await?),
        ServiceCmd::Disable { name } => toggled(&services.set_enabled(&name, false, cred).await?),
    }
}

async fn firewall(
    cmd: FirewallCmd,
    managers: &Managers,
    cred: Option<Credential>,
) -> Result<Report, AdminError> {
    let firewall = &managers.firewall;
    match cmd {
        FirewallCmd::Status => Report::record(&firewall.status(cred).await?),
        FirewallCmd::Rules => Report::record(&firewall.list_rules(cred).await?),
        FirewallCmd::Add(args) => Report::outcome(&firewall.add_rule(&rule_spec(args)?, cred).await?),
        FirewallCmd::Remove(args) => {
            Report::outcome(&firewall.remove_rule(&rule_spec(args)?, cred).await?)
        }
        FirewallCmd::Enable => Report::outcome(&firewall.set_enabled(true, cred).await?),
        FirewallCmd::Disable => Report::outcome(&firewall.set_enabled(false, cred).await?),
    }
}

async fn boot(
    cmd: BootCmd,
    managers: &Managers,
    cred: Option<Credential>,
) -> Result<Report, AdminError> {
    let boot = &managers.boot;
    match cmd {
        BootCmd::Show => Report::record(&boot.config().await?),
        BootCmd::SetDefault { entry } => {
            Report::outcome(&boot.set_default_entry(&entry, cred).await?)
        }
        BootCmd::SetTimeout { seconds } => Report::outcome(&boot.set_timeout(seconds, cred).await?),
        BootCmd::Update => Report::outcome(&boot.update(cred).await?),
    }
}

async fn kernels(
    cmd: KernelCmd,
    managers: &Managers,
    settings: &Settings,
    cred: Option<Credential>,
) -> Result<Report, AdminError> {
    let kernels = &managers.kernels;
    match cmd {
        KernelCmd::List => Report::record(&kernels.list().await?),
        KernelCmd::RemoveOld { keep } => {
            let keep = keep.unwrap_or(settings.kernel_keep_count);
            Report::outcome(&kernels.remove_old(keep, cred).await?)
        }
        KernelCmd::Remove { release } => Report::outcome(&kernels.remove(&release, cred).await?),
    }
}

async fn logs(
    cmd: LogCmd,
    managers: &Managers,
    settings: &Settings,
    cred: Option<Credential>,
) -> Result<Report, AdminError> {
    let logs = &managers.logs;
    match cmd {
        LogCmd::Show { kind, lines } => {
            let kind = parse_named("kind", &kind, LogKind::from_name)?;
            let lines = lines.unwrap_or(settings.log_lines);
            Report::record(&logs.get(kind, lines, cred).await?)
        }
        LogCmd::Clear { kind } => {
            let kind = parse_named("kind", &kind, LogKind::from_name)?;
            Report::outcome(&logs.clear(kind, cred).await?)
        }
    }
}

async fn users<R: BufRead>(
    cmd: UserCmd,
    managers: &Managers,
    cred: Option<Credential>,
    secrets: &mut SecretInput<R>,
) -> Result<Report, AdminError> {
    let users = &managers.users;
    match cmd {
        UserCmd::List { all } => Report::record(&users.list(all).await?),
        UserCmd::Groups => Report::record(&users.groups().await?),
        UserCmd::Create {
            username,
            full_name,
            home,
            shell,
            groups,
        } => {
            let mut user = NewUser::new(username, secrets.next("password")?);
            user.full_name = full_name;
            user.home = home;
            if let Some(shell) = shell {
                user.shell = shell;
            }
            user.groups = groups;
            Report::outcome(&users.create(user, cred).await?)
        }
        UserCmd::Modify {
            username,
            full_name,
            home,
            shell,
            add_groups,
        } => {
            let changes = UserChanges {
                full_name,
                shell,
                home,
                add_groups,
            };
            Report::outcome(&users.modify(&username, &changes, cred).await?)
        }
        UserCmd::Delete {
            username,
            remove_home,
        } => Report::outcome(&users.delete(&username, remove_home, cred).await?),
        UserCmd::Lock { username } => Report::outcome(&users.lock(&username, cred).await?),
        UserCmd::Unlock { username } => Report::outcome(&users.unlock(&username, cred).await?),
        UserCmd::Passwd { username } => {
            let password = secrets.next("password")?;
            Report::outcome(&users.set_password(&username, password, cred).await?)
        }
    }
}

async fn processes(
    cmd: ProcessCmd,
    managers: &Managers,
    cred: Option<Credential>,
) -> Result<Report, AdminError> {
    let processes = &managers.processes;
    match cmd {
        ProcessCmd::List { filter } => Report::record(&processes.list(filter.as_deref()).await?),
        ProcessCmd::Kill { pid, force } => {
            let signal = if force {
                ProcessSignal::Kill
            } else {
                ProcessSignal::Terminate
            };
            Report::outcome(&processes.signal(pid, signal, cred).await?)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use sysdeck_backend::ErrorKind;

    use super::*;

    #[test]
    fn secrets_are_read_line_by_line() {
        let mut secrets = SecretInput::new(Cursor::new("sudo-pass\nnew-pass\r\n"));

        assert_eq!(secrets.next("credential").expect("first").expose_secret(), b"sudo-pass");
        assert_eq!(secrets.next("password").expect("second").expose_secret(), b"new-pass");
        let error = secrets.next("password").expect_err("exhausted");
        assert_eq!(error.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn rule_arguments_become_a_spec() {
        let spec = rule_spec(RuleArgs {
            action: "allow".to_string(),
            direction: "in".to_string(),
            protocol: "tcp".to_string(),
            port: Some("22".to_string()),
            source: None,
            destination: None,
            service: None,
        })
        .expect("spec");
        assert_eq!(
            spec,
            RuleSpec::new(FirewallAction::Allow)
                .with_protocol(Protocol::Tcp)
                .with_port("22")
        );

        let error = rule_spec(RuleArgs {
            action: "permit".to_string(),
            direction: "in".to_string(),
            protocol: "any".to_string(),
            port: None,
            source: None,
            destination: None,
            service: None,
        })
        .expect_err("unknown action");
        assert_eq!(error.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn failed_outcomes_are_reported_as_failures() {
        let report = Report::outcome(&OpOutcome::failed("No matching rule")).expect("report");
        assert!(!report.success);
        assert_eq!(report.value["message"], "No matching rule");
    }
}
