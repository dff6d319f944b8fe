use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sysdeck_backend::{
    Direction, FirewallAction, FirewallBackendKind, KernelBuild, PackageBackendKind, Protocol,
    RuleSpec,
};
use sysdeck_exec::testing::{RecordedCall, ScriptedResponse, ScriptedRunner};
use sysdeck_managers::repositories::AptSources;
use sysdeck_managers::{
    FirewallManager, PackageManager, RepositoryManager, RepositoryPaths, firewall, packages,
    plan_kernel_removal, repositories,
};

fn assert_serial(calls: &[RecordedCall]) {
    let mut calls = calls.to_vec();
    calls.sort_by_key(|call| call.started);
    for pair in calls.windows(2) {
        assert!(
            pair[0].finished <= pair[1].started,
            "{} overlapped {}",
            pair[0].command_line(),
            pair[1].command_line()
        );
    }
}

/// Canned listing and search output per backend, each mentioning `htop`.
fn scripted_listing(kind: PackageBackendKind) -> ScriptedRunner {
    let runner = ScriptedRunner::new();
    match kind {
        PackageBackendKind::Apt => runner
            .on(
                &["dpkg", "-l"],
                ScriptedResponse::ok(
                    "Desired=Unknown/Install/Remove/Purge/Hold\n\
                     ||/ Name           Version      Architecture Description\n\
                     +++-==============-============-============-=================\n\
                     ii  htop           3.2.2-2      amd64        interactive processes viewer\n\
                     ii  libc6:amd64    2.36-9       amd64        GNU C Library\n",
                ),
            )
            .on(
                &["apt", "search"],
                ScriptedResponse::ok(
                    "Sorting...\nFull Text Search...\n\
                     htop/stable,now 3.2.2-2 amd64 [installed]\n  interactive processes viewer\n",
                ),
            ),
        PackageBackendKind::Dnf => runner
            .on(
                &["dnf", "list", "installed"],
                ScriptedResponse::ok(
                    "Installed Packages\n\
                     htop.x86_64                      3.3.0-1.fc40            @updates\n",
                ),
            )
            .on(
                &["dnf", "search"],
                ScriptedResponse::ok("htop.x86_64 : Interactive process viewer\n"),
            ),
        PackageBackendKind::Zypper => runner
            .on(
                &["zypper", "--non-interactive", "search", "-s", "-i"],
                ScriptedResponse::ok(
                    "S  | Name | Type    | Version | Arch   | Repository\n\
                     ---+------+---------+---------+--------+-----------\n\
                     i+ | htop | package | 3.3.0-1 | x86_64 | Main Repository (OSS)\n",
                ),
            )
            .on(
                &["zypper", "--non-interactive", "search", "-s"],
                ScriptedResponse::ok(
                    "S  | Name | Type    | Version | Arch   | Repository\n\
                     ---+------+---------+---------+--------+-----------\n\
                     i+ | htop | package | 3.3.0-1 | x86_64 | Main Repository (OSS)\n",
                ),
            ),
        PackageBackendKind::Pacman => runner
            .on(&["pacman", "-Q"], ScriptedResponse::ok("htop 3.3.0-3\n"))
            .on(
                &["pacman", "-Ss"],
                ScriptedResponse::ok("extra/htop 3.3.0-3 [installed]\n    Interactive process viewer\n"),
            ),
        PackageBackendKind::Brew => runner
            .on(&["brew", "list"], ScriptedResponse::ok("htop 3.3.0\n"))
            .on(
                &["brew", "search"],
                ScriptedResponse::ok("==> Formulae\nhtop ✔\nhtop-osx\n"),
            ),
    }
}

#[tokio::test]
async fn installed_packages_are_found_by_search_on_every_backend() {
    for &kind in PackageBackendKind::ALL {
        let runner = Arc::new(scripted_listing(kind));
        let manager = PackageManager::new(Some(packages::backend_for(
            kind,
            Arc::clone(&runner).into_gateway(),
        )));

        let installed = manager.list_installed().await.expect("list installed");
        assert!(!installed.is_empty(), "{kind}: nothing installed");
        for package in &installed {
            if package.name != "htop" {
                continue;
            }
            let found = manager.search(&package.name).await.expect("search");
            assert!(
                found.iter().any(|hit| hit.name == package.name),
                "{kind}: search for {} missed it",
                package.name
            );
        }
    }
}

#[test]
fn kernel_plan_never_touches_the_running_kernel() {
    let build = |version: &str, is_current: bool| KernelBuild {
        version: version.to_string(),
        path: PathBuf::from(format!("/boot/vmlinuz-{version}")),
        size_bytes: 0,
        is_current,
        package: None,
    };
    let kernels = vec![
        build("6.8.0-31-generic", false),
        build("6.8.0-45-generic", true),
        build("6.5.0-9-generic", false),
        build("6.8.0-40-generic", false),
        build("6.1.0-13-amd64", false),
    ];
    let non_current = kernels.iter().filter(|k| !k.is_current).count();

    for keep in 0..=6 {
        let plan = plan_kernel_removal(&kernels, keep);
        assert!(plan.iter().all(|k| !k.is_current), "keep={keep}");
        assert_eq!(plan.len(), non_current.saturating_sub(keep), "keep={keep}");
    }

    let versions: Vec<_> = plan_kernel_removal(&kernels, 2)
        .into_iter()
        .map(|k| k.version.as_str())
        .collect();
    assert_eq!(versions, ["6.5.0-9-generic", "6.1.0-13-amd64"]);
}

#[tokio::test]
async fn toggling_an_apt_source_twice_restores_it() {
    let dir = tempfile::tempdir().expect("temp dir");
    let sources = AptSources::under(dir.path());
    std::fs::create_dir_all(&sources.parts_dir).expect("parts dir");
    let file = sources.parts_dir.join("extra.list");
    let original = "deb https://example.org/debian stable main\n";
    std::fs::write(&file, original).expect("seed");

    let paths = RepositoryPaths {
        apt: sources,
        ..RepositoryPaths::default()
    };
    let runner = Arc::new(ScriptedRunner::new());
    let repos = RepositoryManager::new(Some(repositories::backend_for(
        PackageBackendKind::Apt,
        Arc::clone(&runner).into_gateway(),
        &paths,
    )));
    let key = "https://example.org/debian";

    let before = repos.list().await.expect("list");
    assert!(before.iter().find(|r| r.matches(key)).expect("listed").enabled);

    let off = repos.toggle(key, false, None).await.expect("disable");
    assert!(off.outcome.success);
    assert!(!off.record.expect("record").enabled);

    let on = repos.toggle(key, true, None).await.expect("enable");
    assert!(on.record.expect("record").enabled);

    let after = repos.list().await.expect("list");
    assert!(after.iter().find(|r| r.matches(key)).expect("listed").enabled);
    assert_eq!(std::fs::read_to_string(&file).expect("read"), original);
}

#[tokio::test]
async fn concurrent_installs_run_one_at_a_time() {
    let runner = Arc::new(ScriptedRunner::new().on(
        &["apt", "install"],
        ScriptedResponse::ok("").with_delay(Duration::from_millis(30)),
    ));
    let manager = Arc::new(PackageManager::new(Some(packages::backend_for(
        PackageBackendKind::Apt,
        Arc::clone(&runner).into_gateway(),
    ))));

    let handles: Vec<_> = ["pkg-a", "pkg-b", "pkg-c"]
        .into_iter()
        .map(|name| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.install(name, None).await })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.expect("join").expect("install").success);
    }

    let calls = runner.calls();
    assert_eq!(calls.len(), 3);
    assert_serial(&calls);
}

#[tokio::test]
async fn ufw_rule_is_added_then_listed() {
    let runner = Arc::new(ScriptedRunner::new().on(
        &["ufw", "status"],
        ScriptedResponse::ok(
            "Status: active\n\
             Logging: on (low)\n\
             Default: deny (incoming), allow (outgoing), disabled (routed)\n\
             New profiles: skip\n\
             \n\
             To                         Action      From\n\
             --                         ------      ----\n\
             22/tcp                     ALLOW IN    Anywhere\n",
        ),
    ));
    let manager = FirewallManager::new(Some(firewall::backend_for(
        FirewallBackendKind::Ufw,
        Arc::clone(&runner).into_gateway(),
    )));

    let spec = RuleSpec::new(FirewallAction::Allow)
        .with_protocol(Protocol::Tcp)
        .with_port("22");
    let outcome = manager.add_rule(&spec, None).await.expect("add");
    assert!(outcome.success);
    assert_eq!(runner.command_lines(), ["ufw allow 22/tcp"]);

    let rules = manager.list_rules(None).await.expect("list");
    assert!(rules.iter().any(|rule| {
        rule.action == FirewallAction::Allow
            && rule.protocol == Protocol::Tcp
            && rule.direction == Direction::In
    }));
}
