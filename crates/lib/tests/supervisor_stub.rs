//! Integration test: supervise the `goosed-stub` backend end to end.
//! Each test gets its own registry and temp working directory.

use futures_util::future::join_all;
use goose_host::backend::BackendClient;
use goose_host::env::{EnvMap, PORT_VAR};
use goose_host::launch::{OutputLine, StreamKind};
use goose_host::probe::ProbePolicy;
use goose_host::{InstanceRegistry, LaunchRequest, Supervisor, SupervisorConfig, SupervisorError};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

fn temp_work_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("goose-host-it-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create work dir");
    dir
}

fn stub_config(work_dir: &Path, max_attempts: u32) -> SupervisorConfig {
    SupervisorConfig {
        executable: PathBuf::from(env!("CARGO_BIN_EXE_goosed-stub")),
        args: vec!["agent".to_string()],
        home: work_dir.to_path_buf(),
        default_working_dir: work_dir.to_path_buf(),
        env: EnvMap::new(),
        probe: ProbePolicy {
            max_attempts,
            interval: Duration::from_millis(50),
            request_timeout: Duration::from_millis(500),
        },
    }
}

fn vars(pairs: &[(&str, &str)]) -> EnvMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Wait until `pred` matches a line on `rx`, collecting everything seen.
async fn wait_for_line(
    rx: &mut mpsc::UnboundedReceiver<OutputLine>,
    pred: impl Fn(&OutputLine) -> bool,
) -> Option<OutputLine> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(line)) if pred(&line) => return Some(line),
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => return None,
        }
    }
}

#[tokio::test]
async fn launch_returns_instance_only_after_status_answers() {
    let work_dir = temp_work_dir();
    let registry = InstanceRegistry::new();
    let supervisor = Supervisor::new(stub_config(&work_dir, 60), registry.clone());

    let request = LaunchRequest {
        working_dir: None,
        env: vars(&[("GOOSED_STUB_READY_DELAY_MS", "300"), ("GOOSED_STUB_VERSION", "1.4.2")]),
    };
    let instance = supervisor.launch(request).await.expect("launch");

    let client = BackendClient::new(instance.port);
    client.status().await.expect("status answers on receipt");
    assert_eq!(client.current_version().await, "1.4.2");
    assert_eq!(instance.working_dir, work_dir);
    assert_eq!(registry.ids().await, vec![instance.id]);
    assert!(supervisor.ports().is_leased(instance.port));

    supervisor.shutdown().await;
    assert!(instance.handle.is_terminated());
    assert!(registry.is_empty().await);
    assert!(!supervisor.ports().is_leased(instance.port));
    assert_eq!(client.current_version().await, "unknown");
    let _ = std::fs::remove_dir_all(&work_dir);
}

#[tokio::test]
async fn child_gets_composed_env_and_working_dir() {
    let work_dir = temp_work_dir();
    let instance_dir = temp_work_dir();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let supervisor = Supervisor::new(stub_config(&work_dir, 60), InstanceRegistry::new())
        .with_output_sink(tx)
        .with_base_env(vars(&[("GOOSE_SERVER__SECRET_KEY", "s3cret"), ("PARENT_ONLY", "yes")]));

    let request = LaunchRequest {
        working_dir: Some(instance_dir.clone()),
        env: vars(&[
            ("GOOSED_STUB_ECHO_ENV", "FOO,GOOSE_SERVER__PORT,GOOSE_SERVER__SECRET_KEY,HOME,PARENT_ONLY"),
            ("FOO", "bar"),
            (PORT_VAR, "1"),
        ]),
    };
    let instance = supervisor.launch(request).await.expect("launch");
    let port_line = format!("{}={}", PORT_VAR, instance.port);

    for expected in [
        "FOO=bar".to_string(),
        port_line,
        "GOOSE_SERVER__SECRET_KEY=s3cret".to_string(),
        format!("HOME={}", work_dir.display()),
        "PARENT_ONLY=yes".to_string(),
    ] {
        let line = wait_for_line(&mut rx, |l| l.line == expected)
            .await
            .unwrap_or_else(|| panic!("stub never printed {expected}"));
        assert_eq!(line.stream, StreamKind::Stdout);
        assert_eq!(line.port, instance.port);
        assert_eq!(line.instance_id, instance.id);
        assert_eq!(line.working_dir, instance_dir);
    }

    supervisor.shutdown().await;
    let _ = std::fs::remove_dir_all(&work_dir);
    let _ = std::fs::remove_dir_all(&instance_dir);
}

#[tokio::test]
async fn never_ready_backend_is_killed_before_timeout_error() {
    let work_dir = temp_work_dir();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let supervisor = Supervisor::new(stub_config(&work_dir, 5), InstanceRegistry::new())
        .with_output_sink(tx);

    let request = LaunchRequest {
        working_dir: None,
        env: vars(&[("GOOSED_STUB_NEVER_READY", "1")]),
    };
    let err = supervisor.launch(request).await.unwrap_err();
    let port = match err {
        SupervisorError::StartupTimeout { port, attempts } => {
            assert_eq!(attempts, 5);
            port
        }
        other => panic!("expected startup timeout, got {other}"),
    };
    assert!(supervisor.registry().is_empty().await);
    assert!(!supervisor.ports().is_leased(port));

    let pid_line = wait_for_line(&mut rx, |l| l.line.starts_with("pid="))
        .await
        .expect("stub printed its pid");
    let pid: u32 = pid_line.line["pid=".len()..].parse().expect("pid");
    #[cfg(target_os = "linux")]
    assert!(
        !Path::new(&format!("/proc/{}", pid)).exists(),
        "backend {pid} still exists after startup timeout"
    );
    let _ = pid;
    let _ = std::fs::remove_dir_all(&work_dir);
}

#[tokio::test]
async fn missing_backend_is_spawn_error() {
    let work_dir = temp_work_dir();
    let mut config = stub_config(&work_dir, 60);
    config.executable = work_dir.join("goosed-does-not-exist");
    let supervisor = Supervisor::new(config, InstanceRegistry::new());

    let started = std::time::Instant::now();
    let err = supervisor.launch(LaunchRequest::default()).await.unwrap_err();
    assert!(matches!(err, SupervisorError::Spawn(_)), "got {err}");
    assert!(started.elapsed() < Duration::from_secs(1));
    let _ = std::fs::remove_dir_all(&work_dir);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_launches_get_distinct_ports() {
    let work_dir = temp_work_dir();
    let supervisor = Supervisor::new(stub_config(&work_dir, 60), InstanceRegistry::new());

    let results = join_all((0..4).map(|_| supervisor.launch(LaunchRequest::default()))).await;
    let instances: Vec<_> = results
        .into_iter()
        .map(|r| r.expect("launch"))
        .collect();
    let ports: HashSet<u16> = instances.iter().map(|i| i.port).collect();
    assert_eq!(ports.len(), instances.len());
    assert_eq!(supervisor.registry().len().await, 4);

    supervisor.shutdown().await;
    assert!(instances.iter().all(|i| i.handle.is_terminated()));
    let _ = std::fs::remove_dir_all(&work_dir);
}

#[tokio::test]
async fn terminate_twice_leaves_other_instances_alone() {
    let work_dir = temp_work_dir();
    let supervisor = Supervisor::new(stub_config(&work_dir, 60), InstanceRegistry::new());
    let a = supervisor.launch(LaunchRequest::default()).await.expect("launch a");
    let b = supervisor.launch(LaunchRequest::default()).await.expect("launch b");

    assert!(supervisor.terminate(a.id).await);
    a.handle.terminate().await;
    assert!(!supervisor.terminate(a.id).await);
    assert!(a.handle.try_exited().await);

    BackendClient::new(b.port)
        .status()
        .await
        .expect("other instance still answers");
    assert!(!b.handle.try_exited().await);
    assert_eq!(supervisor.registry().ids().await, vec![b.id]);

    supervisor.shutdown().await;
    let _ = std::fs::remove_dir_all(&work_dir);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_during_startup_kills_the_backend() {
    let work_dir = temp_work_dir();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let supervisor = std::sync::Arc::new(
        Supervisor::new(stub_config(&work_dir, 1_000), InstanceRegistry::new()).with_output_sink(tx),
    );
    let launching = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move {
            supervisor
                .launch(LaunchRequest {
                    working_dir: None,
                    env: vars(&[("GOOSED_STUB_NEVER_READY", "1")]),
                })
                .await
        })
    };

    let pid_line = wait_for_line(&mut rx, |l| l.line.starts_with("pid="))
        .await
        .expect("stub printed its pid");
    let pid: u32 = pid_line.line["pid=".len()..].parse().expect("pid");
    for _ in 0..100 {
        if supervisor.registry().len().await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(supervisor.registry().len().await, 1, "starting backend is registered");

    supervisor.shutdown().await;
    #[cfg(target_os = "linux")]
    assert!(
        !Path::new(&format!("/proc/{}", pid)).exists(),
        "backend {pid} outlived shutdown"
    );
    let _ = pid;

    let result = tokio::time::timeout(Duration::from_secs(2), launching)
        .await
        .expect("launch returns after shutdown")
        .expect("launch task");
    match result {
        Err(SupervisorError::Terminated { port }) => {
            assert!(!supervisor.ports().is_leased(port));
        }
        other => panic!("expected terminated launch, got {other:?}"),
    }
    assert!(supervisor.registry().is_empty().await);
    let _ = std::fs::remove_dir_all(&work_dir);
}

/// `target` expressed relative to the test's current directory.
#[cfg(unix)]
fn relative_to_cwd(target: &Path) -> PathBuf {
    let cwd = std::env::current_dir().expect("cwd");
    let mut rel = PathBuf::new();
    for _ in cwd.components().skip(1) {
        rel.push("..");
    }
    rel.join(target.strip_prefix("/").expect("absolute target"))
}

#[cfg(unix)]
#[tokio::test]
async fn relative_backend_path_spawns_from_another_working_dir() {
    let work_dir = temp_work_dir();
    let relative = relative_to_cwd(Path::new(env!("CARGO_BIN_EXE_goosed-stub")));
    assert!(relative.is_relative());

    let executable = goose_host::locate::locate(Some(&relative), None, None, None).expect("locate");
    assert!(executable.is_absolute());

    let mut config = stub_config(&work_dir, 60);
    config.executable = executable;
    let supervisor = Supervisor::new(config, InstanceRegistry::new());
    let instance = supervisor
        .launch(LaunchRequest::default())
        .await
        .expect("relative backend path launches");
    assert_eq!(instance.working_dir, work_dir);
    BackendClient::new(instance.port)
        .status()
        .await
        .expect("backend answers");

    supervisor.shutdown().await;
    let _ = std::fs::remove_dir_all(&work_dir);
}
