use std::collections::HashMap;

use async_trait::async_trait;

use sysdeck_backend::{
    AdminError, Credential, Domain, OpOutcome, Parsed, ServiceAction, ServiceBackend,
    ServiceBackendKind, ServiceUnit,
};
use sysdeck_exec::{ExecutionGateway, ExecutionRequest};

const SYSTEMD: &str = ServiceBackendKind::Systemd.as_str();

/// `systemctl list-units --plain --no-legend`:
/// `unit load active sub description...`.
pub(crate) fn parse_list_units(output: &str) -> Parsed<ServiceUnit> {
    let mut parsed = Parsed::new();

    for (index, line) in output.lines().enumerate() {
        let trimmed = line.trim().trim_start_matches(['●', '*']).trim_start();
        if trimmed.is_empty() {
            continue;
        }
        let mut fields = trimmed.split_whitespace();
        let (Some(name), Some(load), Some(active), Some(sub)) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            parsed.skip(SYSTEMD, index + 1, line);
            continue;
        };
        if !name.ends_with(".service") {
            parsed.skip(SYSTEMD, index + 1, line);
            continue;
        }

        parsed.push(ServiceUnit {
            name: name.to_string(),
            load_state: load.to_string(),
            active_state: active.to_string(),
            sub_state: sub.to_string(),
            description: fields.collect::<Vec<_>>().join(" "),
            ..ServiceUnit::default()
        });
    }

    parsed
}

/// `systemctl list-unit-files --no-legend`: `unit state [preset]`.
pub(crate) fn parse_unit_files(output: &str) -> HashMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            Some((fields.next()?.to_string(), fields.next()?.to_string()))
        })
        .collect()
}

fn is_enabled_state(state: &str) -> bool {
    matches!(state, "enabled" | "enabled-runtime" | "alias")
}

/// Numeric `systemctl show` value; `[not set]` and systemd's "infinity"
/// sentinel have no value.
fn show_number(value: &str) -> Option<u64> {
    value.parse::<u64>().ok().filter(|n| *n != u64::MAX)
}

/// `systemctl show <unit>` key=value output. Memory is reported in bytes
/// and converted to whole megabytes.
pub(crate) fn parse_show(name: &str, output: &str) -> ServiceUnit {
    let mut unit = ServiceUnit {
        name: name.to_string(),
        ..ServiceUnit::default()
    };

    for line in output.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key {
            "Id" if !value.is_empty() => unit.name = value.to_string(),
            "LoadState" => unit.load_state = value.to_string(),
            "ActiveState" => unit.active_state = value.to_string(),
            "SubState" => unit.sub_state = value.to_string(),
            "UnitFileState" => unit.enabled = is_enabled_state(value),
            "Description" => unit.description = value.to_string(),
            "MainPID" => {
                unit.main_pid = value.parse::<u32>().ok().filter(|pid| *pid != 0);
            }
            "MemoryCurrent" => {
                unit.memory_mb = show_number(value).map_or(0, |bytes| bytes / 1024 / 1024);
            }
            "TasksCurrent" => unit.tasks = show_number(value),
            _ => {}
        }
    }

    unit
}

pub struct SystemdServices {
    gateway: ExecutionGateway,
}

impl SystemdServices {
    #[must_use]
    pub fn new(gateway: ExecutionGateway) -> Self {
        Self { gateway }
    }

    fn systemctl<'a>(args: impl IntoIterator<Item = &'a str>) -> ExecutionRequest {
        ExecutionRequest::new("systemctl").args(args)
    }
}

#[async_trait]
impl ServiceBackend for SystemdServices {
    fn kind(&self) -> ServiceBackendKind {
        ServiceBackendKind::Systemd
    }

    async fn list(&self) -> Result<Vec<ServiceUnit>, AdminError> {
        let units = self
            .gateway
            .read(
                Self::systemctl([
                    "list-units",
                    "--type=service",
                    "--all",
                    "--no-pager",
                    "--no-legend",
                    "--plain",
                ]),
                None,
            )
            .await?;
        let files = self
            .gateway
            .read(
                Self::systemctl([
                    "list-unit-files",
                    "--type=service",
                    "--no-pager",
                    "--no-legend",
                ]),
                None,
            )
            .await?;

        let states = parse_unit_files(&files);
        let mut units = parse_list_units(&units).into_records();
        for unit in &mut units {
            unit.enabled = states
                .get(&unit.name)
                .is_some_and(|state| is_enabled_state(state));
        }
        Ok(units)
    }

    async fn status(&self, name: &str) -> Result<ServiceUnit, AdminError> {
        let output = self
            .gateway
            .read(Self::systemctl(["show", "--no-pager", name]), None)
            .await?;
        Ok(parse_show(name, &output))
    }

    async fn control(
        &self,
        name: &str,
        action: ServiceAction,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        self.gateway
            .mutate(
                Domain::Services,
                Self::systemctl([action.as_str(), name]).privileged(),
                cred,
            )
            .await?;
        Ok(OpOutcome::ok(format!("{action} {name}: done")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn show_converts_memory_bytes_to_megabytes() {
        let unit = parse_show(
            "nginx.service",
            "Id=nginx.service\nLoadState=loaded\nActiveState=active\nSubState=running\n\
             UnitFileState=enabled\nMainPID=812\nMemoryCurrent=104857600\nTasksCurrent=3\n\
             Description=A high performance web server\n",
        );
        assert_eq!(unit.memory_mb, 100);
        assert_eq!(unit.main_pid, Some(812));
        assert_eq!(unit.tasks, Some(3));
        assert!(unit.enabled);
        assert!(unit.is_active());
        assert_eq!(unit.description, "A high performance web server");
    }

    #[test]
    fn show_treats_not_set_as_zero() {
        let unit = parse_show(
            "cups.service",
            "LoadState=loaded\nActiveState=inactive\nMainPID=0\nMemoryCurrent=[not set]\n\
             TasksCurrent=[not set]\nUnitFileState=disabled\n",
        );
        assert_eq!(unit.memory_mb, 0);
        assert_eq!(unit.main_pid, None);
        assert_eq!(unit.tasks, None);
        assert!(!unit.enabled);
        assert_eq!(unit.name, "cups.service");
    }

    #[test]
    fn list_units_tolerates_failed_markers_and_junk() {
        let output = "\
  cron.service     loaded    active   running Regular background program processing daemon
● snapd.service    loaded    failed   failed  Snap Daemon
  nonsense
  tmp.mount        loaded    active   mounted /tmp
";
        let parsed = parse_list_units(output);
        assert_eq!(parsed.skipped(), 2);
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.records[1].name, "snapd.service");
        assert_eq!(parsed.records[1].active_state, "failed");
        assert_eq!(
            parsed.records[0].description,
            "Regular background program processing daemon"
        );
    }

    #[test]
    fn unit_files_map_to_states() {
        let states = parse_unit_files("cron.service enabled enabled\ncups.service disabled enabled\n");
        assert_eq!(states.get("cron.service").map(String::as_str), Some("enabled"));
        assert_eq!(states.get("cups.service").map(String::as_str), Some("disabled"));
    }
}
