//! Abort-and-resume against a stub pipeliner (`tests/fixtures/relion_schemer`).
//!
//! Drives the one flow the runner's unit tests cannot reach: the store-level
//! sequencing of a live run, a mid-run abort (Failed rewrite plus lock
//! removal), a head reset, and a rerun of the same jobs to completion.
//!
//! Kept as a single test: the stub is found via PATH, and this test binary
//! owns that environment edit.

mod common;

use camino::Utf8Path;
use crboost_model::{JobKind, JobStatus, ParamValue};
use crboost_server::CreateProjectRequest;
use std::fs;
use std::time::Duration;

/// Copy the stub pipeliner next to the fixture and put it on PATH, so the
/// unwrapped `relion_schemer` invocation the store spawns resolves to it.
fn install_stub_pipeliner(fixture: &common::Fixture) {
    let bin_dir = fixture.projects_base.parent().unwrap().join("bin");
    fs::create_dir_all(bin_dir.as_std_path()).unwrap();

    let source = Utf8Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("relion_schemer");
    let stub = bin_dir.join("relion_schemer");
    fs::copy(source.as_std_path(), stub.as_std_path()).unwrap();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(stub.as_std_path(), fs::Permissions::from_mode(0o755)).unwrap();
    }

    let path = std::env::var("PATH").unwrap_or_default();
    // Single-threaded at this point: the runtime and its workers spawn
    // after the fixture is built.
    unsafe { std::env::set_var("PATH", format!("{bin_dir}:{path}")) };
}

#[tokio::test]
async fn abort_resets_and_reruns_the_same_jobs() {
    let fixture = common::fixture_with_binary_tools();
    install_stub_pipeliner(&fixture);

    fixture
        .store
        .create_project(CreateProjectRequest {
            name: "demo".to_string(),
            base: Some(fixture.projects_base.clone()),
            movies_glob: fixture.movies_glob(),
            mdocs_glob: fixture.mdocs_glob(),
            selected_jobs: vec![
                JobKind::ImportMovies,
                JobKind::FsMotionAndCtf,
                JobKind::TsAlignment,
            ],
        })
        .await
        .unwrap();
    for (field, value) in [
        ("microscope.spherical_aberration_mm", 2.7),
        ("microscope.amplitude_contrast", 0.07),
    ] {
        fixture
            .store
            .set_global(field, ParamValue::Float(value))
            .await
            .unwrap();
    }

    let root = fixture.projects_base.join("demo");
    let processes = root.join("default_pipeline.star");
    let scheme_lock = root.join("Schemes").join("scheme_demo").join(".relion_lock");

    let pid = fixture.store.start_pipeline().await.unwrap();
    assert!(pid > 0);

    // The stub takes the locks and reports import_movies as Running.
    wait_until("stub reports a running job", || {
        scheme_lock.is_dir()
            && fs::read_to_string(processes.as_std_path())
                .map(|c| c.contains("Running"))
                .unwrap_or(false)
    })
    .await;
    wait_until_async("runner reaches running", || async {
        fixture.store.current().await.unwrap().runner_phase == "running"
    })
    .await;

    fixture.store.abort_pipeline().await.unwrap();

    // The Running row was rewritten to Failed and the locks are gone.
    let content = fs::read_to_string(processes.as_std_path()).unwrap();
    assert!(content.contains("Failed"));
    assert!(!content.contains("Running"));
    assert!(!scheme_lock.exists());
    assert!(!root.join(".relion_lock").exists());

    let view = fixture.store.current().await.unwrap();
    assert_eq!(view.runner_phase, "idle");
    assert_eq!(
        view.project.jobs[&JobKind::ImportMovies].execution_status,
        JobStatus::Failed
    );

    fixture.store.reset_head().await.unwrap();

    // A fresh start re-runs the same jobs from the top; the stub now
    // completes the whole scheme.
    let pid = fixture.store.start_pipeline().await.unwrap();
    assert!(pid > 0);
    wait_until_async("rerun completes every job", || async {
        let view = fixture.store.current().await.unwrap();
        view.runner_phase == "completed" && view.counters.succeeded == 3
    })
    .await;

    let view = fixture.store.current().await.unwrap();
    assert_eq!(view.counters.running, 0);
    assert_eq!(view.counters.failed, 0);
    for kind in [
        JobKind::ImportMovies,
        JobKind::FsMotionAndCtf,
        JobKind::TsAlignment,
    ] {
        assert_eq!(
            view.project.jobs[&kind].execution_status,
            JobStatus::Succeeded
        );
    }
    assert!(!scheme_lock.exists());
}

async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn wait_until_async<F, Fut>(what: &str, cond: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if cond().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}");
}
