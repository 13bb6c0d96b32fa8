//! End-to-end lifecycle tests: real child processes, fake HTTP backend.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{attach_recorder, FakeBackend, ProcessBehavior, TestHarness};
use inet_report_lib::backend::{launch, BackendStatus, LaunchOutcome, ShellHost, StatusKind};
use inet_report_lib::error::LifecycleError;
use inet_report_lib::instance::InstanceGuard;

#[derive(Default)]
struct CountingHost {
    windows: AtomicUsize,
    focused: AtomicUsize,
}

impl ShellHost for CountingHost {
    fn open_main_window(&self) -> Result<(), String> {
        self.windows.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn focus_main_window(&self) {
        self.focused.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_missing_executable_never_probes() {
    let harness = TestHarness::new();
    let backend = FakeBackend::start(1, ProcessBehavior::Succeed).await;
    let (runtime, missing) = harness.missing_runtime(&backend.base_url);
    let recorder = attach_recorder(&runtime);

    let err = runtime.bring_up().await.unwrap_err();

    assert!(matches!(err, LifecycleError::ExecutableNotFound { .. }));
    assert_eq!(backend.ping_calls(), 0);
    assert_eq!(recorder.kinds(), vec![StatusKind::Starting, StatusKind::Error]);

    let last = runtime.channel().last();
    assert!(last.is(StatusKind::Error));
    assert!(last.detail.contains(&missing.display().to_string()));
}

#[cfg(unix)]
#[tokio::test]
async fn test_ready_on_third_attempt() {
    let harness = TestHarness::new();
    let backend = FakeBackend::start(3, ProcessBehavior::Succeed).await;
    let runtime = harness.shell_runtime("sleep 30", &backend.base_url, 60);
    let recorder = attach_recorder(&runtime);

    runtime.bring_up().await.unwrap();

    assert_eq!(backend.ping_calls(), 3);
    assert_eq!(
        recorder.seen(),
        vec![
            BackendStatus::starting(),
            BackendStatus::checking(1, 60),
            BackendStatus::checking(2, 60),
            BackendStatus::checking(3, 60),
            BackendStatus::ready(),
        ]
    );
    assert_eq!(runtime.channel().last(), BackendStatus::ready());

    runtime.shutdown();
}

#[cfg(unix)]
#[tokio::test]
async fn test_crash_after_ready_then_fresh_start() {
    let harness = TestHarness::new();
    let backend = FakeBackend::start(1, ProcessBehavior::Succeed).await;
    let runtime = harness.shell_runtime("sleep 0.3; exit 1", &backend.base_url, 60);
    let recorder = attach_recorder(&runtime);

    runtime.bring_up().await.unwrap();
    let first_pid = runtime.supervisor().pid();

    let seen = recorder.wait_for(StatusKind::Error, 1).await;
    assert_eq!(seen.last().unwrap().detail, "Backend exited (code 1)");
    assert!(!runtime.supervisor().is_running());
    assert_eq!(runtime.supervisor().last_exit_code(), Some(1));

    // a later start spawns a new child instead of reusing the dead handle
    runtime.bring_up().await.unwrap();
    assert!(runtime.supervisor().pid().is_some());
    assert_ne!(runtime.supervisor().pid(), first_pid);
    assert_eq!(recorder.count(StatusKind::Ready), 2);

    runtime.shutdown();
}

#[cfg(unix)]
#[tokio::test]
async fn test_probe_exhaustion_publishes_single_error() {
    let harness = TestHarness::new();
    let backend = FakeBackend::start(u32::MAX, ProcessBehavior::Succeed).await;
    let runtime = harness.shell_runtime("sleep 30", &backend.base_url, 5);
    let recorder = attach_recorder(&runtime);

    let err = runtime.bring_up().await.unwrap_err();

    assert!(matches!(err, LifecycleError::ProbeTimeout { attempts: 5 }));
    assert_eq!(backend.ping_calls(), 5);
    assert_eq!(recorder.count(StatusKind::Checking), 5);
    assert_eq!(recorder.count(StatusKind::Error), 1);
    assert_eq!(recorder.count(StatusKind::Ready), 0);
    assert!(runtime.channel().last().detail.contains("/ping"));

    runtime.shutdown();
}

#[cfg(unix)]
#[tokio::test]
async fn test_stop_during_readiness_wait_ends_in_error() {
    let harness = TestHarness::new();
    let backend = FakeBackend::start(u32::MAX, ProcessBehavior::Succeed).await;
    let runtime = Arc::new(harness.shell_runtime("sleep 30", &backend.base_url, 20));
    let recorder = attach_recorder(&runtime);

    let waiting = Arc::clone(&runtime);
    let bring_up = tokio::spawn(async move { waiting.bring_up().await });

    recorder.wait_for(StatusKind::Checking, 2).await;
    runtime.supervisor().stop();

    let err = bring_up.await.unwrap().unwrap_err();
    assert!(matches!(err, LifecycleError::ProbeTimeout { attempts: 20 }));

    let last = runtime.channel().last();
    assert!(last.is(StatusKind::Error));
    assert!(last.detail.contains("/ping"));

    // one final error, after the last attempt
    let kinds = recorder.kinds();
    let last_checking = kinds.iter().rposition(|k| *k == StatusKind::Checking).unwrap();
    assert_eq!(&kinds[last_checking + 1..], &[StatusKind::Error]);
    assert_eq!(recorder.count(StatusKind::Ready), 0);
    assert!(!runtime.supervisor().is_running());
}

#[cfg(unix)]
#[tokio::test]
async fn test_restart_replaces_backend() {
    let harness = TestHarness::new();
    let backend = FakeBackend::start(1, ProcessBehavior::Succeed).await;
    let runtime = harness.shell_runtime("sleep 30", &backend.base_url, 60);
    let recorder = attach_recorder(&runtime);

    runtime.bring_up().await.unwrap();
    let first_pid = runtime.supervisor().pid();

    runtime.restart().await.unwrap();

    assert_ne!(runtime.supervisor().pid(), first_pid);
    assert_eq!(runtime.channel().last(), BackendStatus::ready());
    // the old child's exit arrives before the new start
    let kinds = recorder.kinds();
    let error_at = kinds.iter().position(|k| *k == StatusKind::Error).unwrap();
    let second_start = kinds.iter().rposition(|k| *k == StatusKind::Starting).unwrap();
    assert!(error_at < second_start);

    runtime.shutdown();
}

#[cfg(unix)]
#[tokio::test]
async fn test_secondary_instance_starts_nothing() {
    let harness = TestHarness::new();
    let backend = FakeBackend::start(1, ProcessBehavior::Succeed).await;

    let primary_guard = InstanceGuard::new(harness.lock_path());
    let primary_host = Arc::new(CountingHost::default());
    let primary = harness.shell_runtime("sleep 30", &backend.base_url, 60);
    assert_eq!(
        launch(&primary_guard, &primary_host, &primary).await.unwrap(),
        LaunchOutcome::Primary
    );
    assert_eq!(primary_host.windows.load(Ordering::SeqCst), 1);
    let pings_after_primary = backend.ping_calls();

    let second_guard = InstanceGuard::new(harness.lock_path());
    let second_host = Arc::new(CountingHost::default());
    let second = harness.shell_runtime("sleep 30", &backend.base_url, 60);
    let recorder = attach_recorder(&second);

    let outcome = launch(&second_guard, &second_host, &second).await.unwrap();

    assert_eq!(outcome, LaunchOutcome::Secondary);
    assert_eq!(second_host.windows.load(Ordering::SeqCst), 0);
    assert!(!second.supervisor().is_running());
    assert!(recorder.seen().is_empty());
    assert_eq!(backend.ping_calls(), pings_after_primary);

    // the running instance is focused instead
    primary_guard.notify_second_launch();
    assert_eq!(primary_host.focused.load(Ordering::SeqCst), 1);

    primary.shutdown();
}

#[cfg(unix)]
#[tokio::test]
async fn test_backend_output_reaches_diagnostics_log() {
    let harness = TestHarness::new();
    let backend = FakeBackend::start(1, ProcessBehavior::Succeed).await;
    let runtime = harness.shell_runtime(
        "echo 'Running on http://127.0.0.1:5000'; echo 'ERROR boom' >&2; sleep 30",
        &backend.base_url,
        60,
    );

    runtime.bring_up().await.unwrap();
    runtime.supervisor().stop_and_wait(Duration::from_secs(5)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let log = harness.log_contents();
    assert!(log.contains("Backend started pid="));
    assert!(log.contains("Backend: Running on http://127.0.0.1:5000"));
    assert!(log.contains("BackendERR: ERROR boom"));
    assert!(log.contains("Stopping backend pid="));
    assert!(log.contains("Backend exited pid="));
}

/// Linux only: inspects `/proc` to prove the grandchild is gone.
#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_stop_kills_grandchildren() {
    let harness = TestHarness::new();
    let backend = FakeBackend::start(1, ProcessBehavior::Succeed).await;
    let pid_file = harness.path().join("grandchild.pid");
    let script = format!("sleep 30 & echo $! > '{}'; wait", pid_file.display());
    let runtime = harness.shell_runtime(&script, &backend.base_url, 60);

    runtime.bring_up().await.unwrap();

    let grandchild: u32 = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(text) = std::fs::read_to_string(&pid_file) {
                if let Ok(pid) = text.trim().parse() {
                    return pid;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("grandchild pid never written");
    assert!(process_alive(grandchild));

    runtime.supervisor().stop_and_wait(Duration::from_secs(5)).await;

    let gone = tokio::time::timeout(Duration::from_secs(5), async {
        while process_alive(grandchild) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(gone.is_ok(), "grandchild {} survived stop()", grandchild);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_crashed_backend_leaves_no_grandchildren() {
    let harness = TestHarness::new();
    let backend = FakeBackend::start(u32::MAX, ProcessBehavior::Succeed).await;
    let pid_file = harness.path().join("grandchild.pid");
    let script = format!("sleep 30 & echo $! > '{}'; exit 1", pid_file.display());
    let runtime = harness.shell_runtime(&script, &backend.base_url, 60);
    let recorder = attach_recorder(&runtime);

    runtime.supervisor().start().await.unwrap();
    let seen = recorder.wait_for(StatusKind::Error, 1).await;
    assert!(seen.last().unwrap().detail.contains("code 1"), "{:?}", seen);

    let grandchild: u32 = std::fs::read_to_string(&pid_file)
        .expect("grandchild pid never written")
        .trim()
        .parse()
        .unwrap();

    let gone = tokio::time::timeout(Duration::from_secs(5), async {
        while process_alive(grandchild) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(gone.is_ok(), "grandchild {} outlived its crashed parent", grandchild);
    assert!(!runtime.supervisor().is_running());
}

/// Alive means present in `/proc` and not a zombie awaiting its reaper.
#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .and_then(|rest| rest.split_whitespace().next())
            .map(|state| state != "Z" && state != "X")
            .unwrap_or(false),
        Err(_) => false,
    }
}
