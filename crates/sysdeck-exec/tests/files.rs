use std::sync::Arc;

use sysdeck_backend::Domain;
use sysdeck_exec::testing::ScriptedRunner;

#[tokio::test]
async fn replace_file_rewrites_writable_target_without_elevation() {
    let dir = tempfile::tempdir().expect("temp dir");
    let target = dir.path().join("custom.list");
    std::fs::write(&target, "deb http://old.example/ stable main\n").expect("seed");

    let runner = Arc::new(ScriptedRunner::new());
    let gateway = runner.clone().into_gateway();
    let guard = gateway.lock(Domain::Repositories).await;

    gateway
        .replace_file(
            &guard,
            &target,
            "# deb http://old.example/ stable main\n",
            None,
        )
        .await
        .expect("rewrite succeeds");

    assert_eq!(
        std::fs::read_to_string(&target).expect("read back"),
        "# deb http://old.example/ stable main\n"
    );
    assert!(runner.calls().is_empty(), "no elevated commands expected");
}

#[tokio::test]
async fn replace_file_creates_missing_target() {
    let dir = tempfile::tempdir().expect("temp dir");
    let target = dir.path().join("new.repo");

    let gateway = Arc::new(ScriptedRunner::new()).into_gateway();
    let guard = gateway.lock(Domain::Repositories).await;

    gateway
        .replace_file(&guard, &target, "[new]\nbaseurl=https://repo.example/\n", None)
        .await
        .expect("create succeeds");

    assert!(target.is_file());
}
