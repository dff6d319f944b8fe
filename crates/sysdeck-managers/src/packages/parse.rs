use sysdeck_backend::{Package, PackageBackendKind, PackageStatus, Parsed};

use crate::table::parse_pipe_table;

const APT: PackageBackendKind = PackageBackendKind::Apt;
const DNF: PackageBackendKind = PackageBackendKind::Dnf;
const ZYPPER: PackageBackendKind = PackageBackendKind::Zypper;
const PACMAN: PackageBackendKind = PackageBackendKind::Pacman;
const BREW: PackageBackendKind = PackageBackendKind::Brew;

/// `libc6:amd64` -> `libc6`
fn strip_dpkg_arch(name: &str) -> &str {
    name.split_once(':').map_or(name, |(name, _)| name)
}

/// `bash.x86_64` -> (`bash`, `x86_64`)
fn split_rpm_arch(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((base, arch)) if !base.is_empty() && !arch.is_empty() => (base, Some(arch)),
        _ => (name, None),
    }
}

fn is_progress_line(line: &str) -> bool {
    let line = line.trim();
    line.ends_with("...") || line.starts_with("WARNING:")
}

/// `name/suite[,now] version arch [installed|upgradable from: x]`
fn parse_apt_header(line: &str) -> Option<Package> {
    let (name, rest) = line.split_once('/')?;
    let mut fields = rest.split_whitespace();
    let _suites = fields.next()?;
    let version = fields.next()?;
    let arch = fields.next()?;
    let flags = fields.collect::<Vec<_>>().join(" ");

    let status = if flags.contains("upgradable") {
        PackageStatus::Upgradable
    } else if flags.contains("installed") {
        PackageStatus::Installed
    } else {
        PackageStatus::Available
    };

    Some(
        Package::new(name.trim(), status, APT)
            .with_version(version)
            .with_arch(arch),
    )
}

/// `apt search` prints a header line per package followed by an indented
/// description line.
pub(crate) fn parse_apt_search(output: &str) -> Parsed<Package> {
    let mut parsed = Parsed::new();
    let mut pending: Option<Package> = None;

    for (index, line) in output.lines().enumerate() {
        if line.trim().is_empty() || is_progress_line(line) {
            continue;
        }
        if line.starts_with(char::is_whitespace) {
            if let Some(package) = pending.take() {
                parsed.push(package.with_description(line.trim()));
            }
            continue;
        }
        if let Some(package) = pending.take() {
            parsed.push(package);
        }
        match parse_apt_header(line) {
            Some(package) => pending = Some(package),
            None => parsed.skip(APT.as_str(), index + 1, line),
        }
    }
    if let Some(package) = pending {
        parsed.push(package);
    }

    parsed
}

/// `apt list --upgradable`
pub(crate) fn parse_apt_upgradable(output: &str) -> Parsed<Package> {
    let mut parsed = Parsed::new();
    for (index, line) in output.lines().enumerate() {
        if line.trim().is_empty() || is_progress_line(line) {
            continue;
        }
        match parse_apt_header(line) {
            Some(mut package) => {
                package.status = PackageStatus::Upgradable;
                parsed.push(package);
            }
            None => parsed.skip(APT.as_str(), index + 1, line),
        }
    }
    parsed
}

/// `dpkg -l`: only `ii` (and held `hi`) rows are installed packages.
pub(crate) fn parse_dpkg_list(output: &str) -> Parsed<Package> {
    let mut parsed = Parsed::new();

    for (index, line) in output.lines().enumerate() {
        let mut fields = line.split_whitespace();
        let Some(state) = fields.next() else {
            continue;
        };
        if state != "ii" && state != "hi" {
            // Legend, header and non-installed states.
            continue;
        }

        let (Some(name), Some(version), Some(arch)) = (fields.next(), fields.next(), fields.next())
        else {
            parsed.skip(APT.as_str(), index + 1, line);
            continue;
        };
        let description = fields.collect::<Vec<_>>().join(" ");

        parsed.push(
            Package::new(strip_dpkg_arch(name), PackageStatus::Installed, APT)
                .with_version(version)
                .with_arch(arch)
                .with_description(description),
        );
    }

    parsed
}

fn is_dnf_chatter(line: &str) -> bool {
    let line = line.trim();
    line.is_empty()
        || line.starts_with('=')
        || line.starts_with("Last metadata expiration")
        || line.starts_with("Matched fields:")
        || line.starts_with("Updating and loading repositories")
        || line.starts_with("Repositories loaded")
        || line.ends_with("Packages")
        || line.ends_with("packages")
}

/// `dnf search`: `name.arch : summary` (dnf4) or `name.arch\tsummary` (dnf5).
pub(crate) fn parse_dnf_search(output: &str) -> Parsed<Package> {
    let mut parsed = Parsed::new();

    for (index, line) in output.lines().enumerate() {
        if is_dnf_chatter(line) {
            continue;
        }
        let entry = line
            .split_once(" : ")
            .or_else(|| line.trim().split_once('\t'));
        let Some((name_arch, summary)) = entry else {
            parsed.skip(DNF.as_str(), index + 1, line);
            continue;
        };

        let (name, arch) = split_rpm_arch(name_arch.trim());
        let mut package =
            Package::new(name, PackageStatus::Available, DNF).with_description(summary.trim());
        if let Some(arch) = arch {
            package = package.with_arch(arch);
        }
        parsed.push(package);
    }

    parsed
}

/// Three-column `name.arch  version  repo` listings used by
/// `dnf list installed` and `dnf check-update`. Long names wrap the
/// remaining columns onto the next line.
pub(crate) fn parse_dnf_columns(output: &str, status: PackageStatus) -> Parsed<Package> {
    let mut parsed = Parsed::new();
    let mut wrapped: Option<(usize, String)> = None;

    for (index, line) in output.lines().enumerate() {
        if line.starts_with("Obsoleting Packages") || line.starts_with("Security:") {
            break;
        }
        if is_dnf_chatter(line) {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        let (name_arch, version) = match (wrapped.take(), fields.as_slice()) {
            (None, [name_arch, version, _repo, ..]) => ((*name_arch).to_string(), *version),
            (None, [name_arch]) if name_arch.contains('.') => {
                wrapped = Some((index + 1, (*name_arch).to_string()));
                continue;
            }
            (Some((_, name_arch)), [version, _repo]) => (name_arch, *version),
            (Some((line_no, name_arch)), _) => {
                parsed.skip(DNF.as_str(), line_no, &name_arch);
                parsed.skip(DNF.as_str(), index + 1, line);
                continue;
            }
            (None, _) => {
                parsed.skip(DNF.as_str(), index + 1, line);
                continue;
            }
        };

        let (name, arch) = split_rpm_arch(&name_arch);
        let mut package = Package::new(name, status, DNF).with_version(version);
        if let Some(arch) = arch {
            package = package.with_arch(arch);
        }
        parsed.push(package);
    }

    if let Some((line_no, name_arch)) = wrapped {
        parsed.skip(DNF.as_str(), line_no, &name_arch);
    }

    parsed
}

/// `zypper search -s [-i]` table.
pub(crate) fn parse_zypper_search(output: &str) -> Parsed<Package> {
    let rows = parse_pipe_table(ZYPPER.as_str(), output);
    let mut parsed = Parsed {
        records: Vec::new(),
        issues: rows.issues,
    };

    for row in rows.records {
        if row.get("Type").is_some_and(|kind| kind != "package") {
            continue;
        }
        let Some(name) = row.get("Name").filter(|name| !name.is_empty()) else {
            parsed.skip(ZYPPER.as_str(), row.line_no, &row.raw);
            continue;
        };

        let status = match row.get("S").unwrap_or_default() {
            "v" => PackageStatus::Upgradable,
            s if s.starts_with('i') => PackageStatus::Installed,
            _ => PackageStatus::Available,
        };

        let mut package = Package::new(name, status, ZYPPER);
        if let Some(version) = row.get("Version").filter(|v| !v.is_empty()) {
            package = package.with_version(version);
        }
        if let Some(arch) = row.get("Arch").filter(|a| !a.is_empty()) {
            package = package.with_arch(arch);
        }
        parsed.push(package);
    }

    // The same package appears once per repository.
    parsed.records.dedup_by(|a, b| a.name == b.name && a.version == b.version);
    parsed
}

/// `zypper list-updates` table.
pub(crate) fn parse_zypper_updates(output: &str) -> Parsed<Package> {
    let rows = parse_pipe_table(ZYPPER.as_str(), output);
    let mut parsed = Parsed {
        records: Vec::new(),
        issues: rows.issues,
    };

    for row in rows.records {
        let Some(name) = row.get("Name").filter(|name| !name.is_empty()) else {
            parsed.skip(ZYPPER.as_str(), row.line_no, &row.raw);
            continue;
        };
        let mut package = Package::new(name, PackageStatus::Upgradable, ZYPPER);
        if let Some(version) = row.first(&["Available Version", "Version"]) {
            package = package.with_version(version);
        }
        if let Some(arch) = row.get("Arch").filter(|a| !a.is_empty()) {
            package = package.with_arch(arch);
        }
        parsed.push(package);
    }

    parsed
}

/// `pacman -Ss`: `repo/name version [(groups)] [[installed]]` then an
/// indented description.
pub(crate) fn parse_pacman_search(output: &str) -> Parsed<Package> {
    let mut parsed = Parsed::new();
    let mut pending: Option<Package> = None;

    for (index, line) in output.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        if line.starts_with(char::is_whitespace) {
            if let Some(package) = pending.take() {
                parsed.push(package.with_description(line.trim()));
            }
            continue;
        }
        if let Some(package) = pending.take() {
            parsed.push(package);
        }

        let mut fields = line.split_whitespace();
        let header = fields
            .next()
            .and_then(|qualified| qualified.split_once('/'))
            .zip(fields.next());
        let Some(((_repo, name), version)) = header else {
            parsed.skip(PACMAN.as_str(), index + 1, line);
            continue;
        };
        let status = if line.contains("[installed") {
            PackageStatus::Installed
        } else {
            PackageStatus::Available
        };
        pending = Some(Package::new(name, status, PACMAN).with_version(version));
    }
    if let Some(package) = pending {
        parsed.push(package);
    }

    parsed
}

/// `pacman -Q`: `name version`
pub(crate) fn parse_pacman_installed(output: &str) -> Parsed<Package> {
    let mut parsed = Parsed::new();
    for (index, line) in output.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match line.split_whitespace().collect::<Vec<_>>().as_slice() {
            [name, version] => parsed.push(
                Package::new(*name, PackageStatus::Installed, PACMAN).with_version(*version),
            ),
            _ => parsed.skip(PACMAN.as_str(), index + 1, line),
        }
    }
    parsed
}

/// `pacman -Qu`: `name old -> new [ignored]`
pub(crate) fn parse_pacman_upgradable(output: &str) -> Parsed<Package> {
    let mut parsed = Parsed::new();
    for (index, line) in output.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match line.split_whitespace().collect::<Vec<_>>().as_slice() {
            [name, _old, "->", new, ..] => parsed
                .push(Package::new(*name, PackageStatus::Upgradable, PACMAN).with_version(*new)),
            _ => parsed.skip(PACMAN.as_str(), index + 1, line),
        }
    }
    parsed
}

/// `brew search`: bare names, grouped under `==>` headings.
pub(crate) fn parse_brew_search(output: &str) -> Parsed<Package> {
    let mut parsed: Parsed<Package> = Parsed::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("==>") || line.starts_with("If you meant") {
            continue;
        }
        for token in line.split_whitespace() {
            if token == "✔" {
                if let Some(last) = parsed.records.last_mut() {
                    last.status = PackageStatus::Installed;
                }
                continue;
            }
            parsed.push(Package::new(token, PackageStatus::Available, BREW));
        }
    }
    parsed
}

/// `brew list --versions`: `name v1 [v2 ...]`, newest last.
pub(crate) fn parse_brew_versions(output: &str) -> Parsed<Package> {
    let mut parsed = Parsed::new();
    for line in output.lines() {
        let mut fields = line.split_whitespace();
        let Some(name) = fields.next() else {
            continue;
        };
        let mut package = Package::new(name, PackageStatus::Installed, BREW);
        if let Some(version) = fields.last() {
            package = package.with_version(version);
        }
        parsed.push(package);
    }
    parsed
}

/// `brew outdated --verbose`: `name (installed) < latest` or `!= latest`.
pub(crate) fn parse_brew_outdated(output: &str) -> Parsed<Package> {
    let mut parsed = Parsed::new();
    for (index, line) in output.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [name, .., "<" | "!=", latest] => parsed
                .push(Package::new(*name, PackageStatus::Upgradable, BREW).with_version(*latest)),
            [name] => parsed.push(Package::new(*name, PackageStatus::Upgradable, BREW)),
            _ => parsed.skip(BREW.as_str(), index + 1, line),
        }
    }
    parsed
}
