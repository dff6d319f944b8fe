use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, warn};

use sysdeck_backend::{AdminError, BootMode, OsFamily, SystemInfo};
use sysdeck_exec::{ExecutionGateway, ExecutionRequest};

use crate::config_file::read_if_exists;

const KIB_PER_MIB: u64 = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInfoPaths {
    pub proc_dir: PathBuf,
    /// Present only when the firmware booted the host through UEFI.
    pub efi_dir: PathBuf,
}

impl Default for SystemInfoPaths {
    fn default() -> Self {
        Self {
            proc_dir: PathBuf::from("/proc"),
            efi_dir: PathBuf::from("/sys/firmware/efi"),
        }
    }
}

/// First `model name` (x86) or `Model`/`Hardware` (ARM) value, and the
/// number of `processor` stanzas.
fn parse_cpuinfo(cpuinfo: &str) -> (Option<String>, usize) {
    let mut model = None;
    let mut fallback = None;
    let mut cores = 0;
    for line in cpuinfo.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "processor" => cores += 1,
            "model name" if model.is_none() && !value.is_empty() => {
                model = Some(value.to_string());
            }
            "Model" | "Hardware" if fallback.is_none() && !value.is_empty() => {
                fallback = Some(value.to_string());
            }
            _ => {}
        }
    }
    (model.or(fallback), cores)
}

/// Total and used MiB; used is `None` without `MemAvailable`.
fn parse_meminfo(meminfo: &str) -> (Option<u64>, Option<u64>) {
    let field = |name: &str| {
        meminfo.lines().find_map(|line| {
            line.strip_prefix(name)?
                .strip_prefix(':')?
                .split_whitespace()
                .next()?
                .parse::<u64>()
                .ok()
        })
    };
    let total = field("MemTotal");
    let used = total
        .zip(field("MemAvailable"))
        .map(|(total, available)| total.saturating_sub(available) / KIB_PER_MIB);
    (total.map(|kib| kib / KIB_PER_MIB), used)
}

/// Whole seconds from `/proc/uptime`.
fn parse_uptime(uptime: &str) -> Option<u64> {
    let seconds = uptime.split_whitespace().next()?;
    seconds.split('.').next()?.parse().ok()
}

/// Total and used MiB from `df -Pk` output.
fn parse_df(output: &str) -> Option<(u64, u64)> {
    let mut fields = output.lines().nth(1)?.split_whitespace().skip(1);
    let total: u64 = fields.next()?.parse().ok()?;
    let used: u64 = fields.next()?.parse().ok()?;
    Some((total / KIB_PER_MIB, used / KIB_PER_MIB))
}

fn parse_sb_state(output: &str) -> Option<bool> {
    let output = output.to_ascii_lowercase();
    if output.contains("secureboot enabled") {
        Some(true)
    } else if output.contains("secureboot disabled") {
        Some(false)
    } else {
        None
    }
}

/// Seconds since the epoch from `kern.boottime`, e.g.
/// `{ sec = 1700000000, usec = 0 } Tue Nov 14 22:13:20 2023`.
fn parse_boottime(value: &str) -> Option<u64> {
    let rest = value.split_once("sec =")?.1;
    rest.split(',').next()?.trim().parse().ok()
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Read-only host summary: kernel, hardware, storage and firmware.
pub struct SystemInfoManager {
    gateway: ExecutionGateway,
    os: OsFamily,
    distro: String,
    paths: SystemInfoPaths,
}

impl SystemInfoManager {
    #[must_use]
    pub fn new(
        gateway: ExecutionGateway,
        os: OsFamily,
        distro: impl Into<String>,
        paths: SystemInfoPaths,
    ) -> Self {
        Self {
            gateway,
            os,
            distro: distro.into(),
            paths,
        }
    }

    /// Gathers what the host reports. A source that is missing or fails
    /// leaves its fields empty instead of failing the whole summary.
    ///
    /// # Errors
    /// Only I/O errors other than a missing file.
    pub async fn info(&self) -> Result<SystemInfo, AdminError> {
        let mut info = match self.os {
            OsFamily::Linux => self.linux().await?,
            OsFamily::Darwin => self.darwin().await,
        };
        if let Some((total, used)) = self.disk_usage().await {
            info.disk_total_mb = Some(total);
            info.disk_used_mb = Some(used);
        }
        if info.cpu_cores == 0 {
            info.cpu_cores = std::thread::available_parallelism().map_or(1, usize::from);
        }
        Ok(info)
    }

    fn empty(&self) -> SystemInfo {
        SystemInfo {
            os: self.os,
            distro: self.distro.clone(),
            kernel: String::new(),
            hostname: String::new(),
            uptime_secs: None,
            cpu_model: None,
            cpu_cores: 0,
            memory_total_mb: None,
            memory_used_mb: None,
            disk_total_mb: None,
            disk_used_mb: None,
            boot_mode: BootMode::Unknown,
            secure_boot: None,
        }
    }

    async fn proc_file(&self, relative: &str) -> Result<Option<String>, AdminError> {
        read_if_exists(&self.paths.proc_dir.join(relative)).await
    }

    async fn linux(&self) -> Result<SystemInfo, AdminError> {
        let mut info = self.empty();
        info.kernel = trimmed(self.proc_file("sys/kernel/osrelease").await?).unwrap_or_default();
        info.hostname = trimmed(self.proc_file("sys/kernel/hostname").await?).unwrap_or_default();
        info.uptime_secs = self
            .proc_file("uptime")
            .await?
            .as_deref()
            .and_then(parse_uptime);
        if let Some(cpuinfo) = self.proc_file("cpuinfo").await? {
            (info.cpu_model, info.cpu_cores) = parse_cpuinfo(&cpuinfo);
        }
        if let Some(meminfo) = self.proc_file("meminfo").await? {
            (info.memory_total_mb, info.memory_used_mb) = parse_meminfo(&meminfo);
        }
        info.boot_mode = if tokio::fs::try_exists(&self.paths.efi_dir).await? {
            BootMode::Uefi
        } else {
            BootMode::Bios
        };
        if info.boot_mode == BootMode::Uefi {
            info.secure_boot = self.secure_boot().await;
        }
        Ok(info)
    }

    async fn darwin(&self) -> SystemInfo {
        let mut info = self.empty();
        info.kernel = self.sysctl("kern.osrelease").await.unwrap_or_default();
        info.hostname = self.sysctl("kern.hostname").await.unwrap_or_default();
        info.cpu_model = self.sysctl("machdep.cpu.brand_string").await;
        info.cpu_cores = self
            .sysctl("hw.ncpu")
            .await
            .and_then(|cores| cores.parse().ok())
            .unwrap_or_default();
        info.memory_total_mb = self
            .sysctl("hw.memsize")
            .await
            .and_then(|bytes| bytes.parse::<u64>().ok())
            .map(|bytes| bytes / KIB_PER_MIB / KIB_PER_MIB);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();
        info.uptime_secs = self
            .sysctl("kern.boottime")
            .await
            .as_deref()
            .and_then(parse_boottime)
            .map(|booted| now.saturating_sub(booted));
        info
    }

    async fn sysctl(&self, key: &str) -> Option<String> {
        let request = ExecutionRequest::new("sysctl").args(["-n", key]);
        match self.gateway.read(request, None).await {
            Ok(value) => trimmed(Some(value)),
            Err(e) => {
                warn!("sysctl {key}: {e}");
                None
            }
        }
    }

    async fn disk_usage(&self) -> Option<(u64, u64)> {
        let request = ExecutionRequest::new("df").args(["-Pk", "/"]);
        match self.gateway.read(request, None).await {
            Ok(output) => parse_df(&output),
            Err(e) => {
                warn!("Disk usage unavailable: {e}");
                None
            }
        }
    }

    /// `None` when mokutil is missing or cannot tell.
    async fn secure_boot(&self) -> Option<bool> {
        let request = ExecutionRequest::new("mokutil").arg("--sb-state");
        match self.gateway.run(request).await {
            Ok(result) if result.exit_code == Some(0) => parse_sb_state(&result.stdout),
            Ok(result) => {
                debug!("mokutil exited with {:?}", result.exit_code);
                None
            }
            Err(e) => {
                debug!("mokutil unavailable: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use sysdeck_exec::testing::{ScriptedResponse, ScriptedRunner};

    use super::*;

    const CPUINFO: &str = "processor\t: 0\nvendor_id\t: GenuineIntel\n\
        model name\t: Intel(R) Core(TM) i7-8550U CPU @ 1.80GHz\n\n\
        processor\t: 1\nmodel name\t: Intel(R) Core(TM) i7-8550U CPU @ 1.80GHz\n";

    const DF: &str = "Filesystem     1024-blocks     Used Available Capacity Mounted on\n\
        /dev/nvme0n1p2    102400000 51200000  51200000      50% /\n";

    fn seed_proc(dir: &Path) -> SystemInfoPaths {
        let proc_dir = dir.join("proc");
        std::fs::create_dir_all(proc_dir.join("sys/kernel")).expect("proc");
        std::fs::write(proc_dir.join("sys/kernel/osrelease"), "6.1.0-18-amd64\n").expect("write");
        std::fs::write(proc_dir.join("sys/kernel/hostname"), "deck\n").expect("write");
        std::fs::write(proc_dir.join("uptime"), "93784.52 180000.10\n").expect("write");
        std::fs::write(proc_dir.join("cpuinfo"), CPUINFO).expect("write");
        std::fs::write(
            proc_dir.join("meminfo"),
            "MemTotal:       16303428 kB\nMemFree:         1203456 kB\nMemAvailable:    8151714 kB\n",
        )
        .expect("write");
        SystemInfoPaths {
            proc_dir,
            efi_dir: dir.join("efi"),
        }
    }

    #[test]
    fn cpuinfo_counts_processors_and_takes_the_first_model() {
        let (model, cores) = parse_cpuinfo(CPUINFO);
        assert_eq!(
            model.as_deref(),
            Some("Intel(R) Core(TM) i7-8550U CPU @ 1.80GHz")
        );
        assert_eq!(cores, 2);

        let arm = "processor\t: 0\nBogoMIPS\t: 108.00\n\nModel\t\t: Raspberry Pi 4 Model B Rev 1.4\n";
        assert_eq!(
            parse_cpuinfo(arm),
            (Some("Raspberry Pi 4 Model B Rev 1.4".to_string()), 1)
        );
    }

    #[test]
    fn meminfo_without_available_reports_only_the_total() {
        assert_eq!(
            parse_meminfo("MemTotal:       2048000 kB\nMemFree:  1024 kB\n"),
            (Some(2000), None)
        );
        assert_eq!(parse_meminfo(""), (None, None));
    }

    #[test]
    fn boottime_and_sb_state_are_read_from_tool_output() {
        assert_eq!(
            parse_boottime("{ sec = 1700000000, usec = 431 } Tue Nov 14 22:13:20 2023"),
            Some(1_700_000_000)
        );
        assert_eq!(parse_boottime("garbage"), None);
        assert_eq!(parse_sb_state("SecureBoot enabled\n"), Some(true));
        assert_eq!(parse_sb_state("SecureBoot disabled\nPlatform is in Setup Mode\n"), Some(false));
        assert_eq!(parse_sb_state("EFI variables are not supported on this system\n"), None);
        assert_eq!(parse_df("Filesystem 1024-blocks\n"), None);
    }

    #[tokio::test]
    async fn linux_summary_reads_proc_df_and_mokutil() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = seed_proc(dir.path());
        std::fs::create_dir_all(&paths.efi_dir).expect("efi");
        let runner = Arc::new(
            ScriptedRunner::new()
                .on(&["df", "-Pk", "/"], ScriptedResponse::ok(DF))
                .on(&["mokutil"], ScriptedResponse::ok("SecureBoot enabled\n")),
        );
        let system = SystemInfoManager::new(
            Arc::clone(&runner).into_gateway(),
            OsFamily::Linux,
            "debian",
            paths,
        );

        let info = system.info().await.expect("info");
        assert_eq!(info.kernel, "6.1.0-18-amd64");
        assert_eq!(info.hostname, "deck");
        assert_eq!(info.uptime_label().as_deref(), Some("1d 2h 3m"));
        assert_eq!(info.cpu_cores, 2);
        assert_eq!(info.memory_total_mb, Some(15921));
        assert_eq!(info.memory_used_mb, Some(7960));
        assert_eq!(info.disk_total_mb, Some(100_000));
        assert_eq!(info.disk_used_mb, Some(50_000));
        assert_eq!(info.boot_mode, BootMode::Uefi);
        assert_eq!(info.secure_boot, Some(true));
        assert!(runner.calls().iter().all(|call| !call.privileged));
    }

    #[tokio::test]
    async fn bios_hosts_skip_secure_boot_and_survive_a_failing_df() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = seed_proc(dir.path());
        let runner = Arc::new(
            ScriptedRunner::new().on(&["df"], ScriptedResponse::exit(1, "df: /: Permission denied")),
        );
        let system = SystemInfoManager::new(
            Arc::clone(&runner).into_gateway(),
            OsFamily::Linux,
            "arch",
            paths,
        );

        let info = system.info().await.expect("info");
        assert_eq!(info.boot_mode, BootMode::Bios);
        assert_eq!(info.secure_boot, None);
        assert_eq!(info.disk_total_mb, None);
        assert_eq!(info.distro, "arch");
        assert_eq!(runner.command_lines(), ["df -Pk /"]);
    }

    #[tokio::test]
    async fn darwin_summary_comes_from_sysctl() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on(&["sysctl", "-n", "kern.osrelease"], ScriptedResponse::ok("23.3.0\n"))
                .on(&["sysctl", "-n", "kern.hostname"], ScriptedResponse::ok("mini.local\n"))
                .on(
                    &["sysctl", "-n", "machdep.cpu.brand_string"],
                    ScriptedResponse::ok("Apple M2\n"),
                )
                .on(&["sysctl", "-n", "hw.ncpu"], ScriptedResponse::ok("8\n"))
                .on(&["sysctl", "-n", "hw.memsize"], ScriptedResponse::ok("17179869184\n"))
                .on(
                    &["sysctl", "-n", "kern.boottime"],
                    ScriptedResponse::ok("{ sec = 1700000000, usec = 0 } Tue Nov 14 22:13:20 2023\n"),
                )
                .on(&["df"], ScriptedResponse::ok(DF)),
        );
        let system = SystemInfoManager::new(
            runner.into_gateway(),
            OsFamily::Darwin,
            "macos",
            SystemInfoPaths::default(),
        );

        let info = system.info().await.expect("info");
        assert_eq!(info.kernel, "23.3.0");
        assert_eq!(info.hostname, "mini.local");
        assert_eq!(info.cpu_model.as_deref(), Some("Apple M2"));
        assert_eq!(info.cpu_cores, 8);
        assert_eq!(info.memory_total_mb, Some(16_384));
        assert_eq!(info.memory_used_mb, None);
        assert!(info.uptime_secs.is_some_and(|secs| secs > 0));
        assert_eq!(info.boot_mode, BootMode::Unknown);
    }
}
