//! The executor driving real `devlink` task processes.

#![cfg(all(unix, feature = "cli"))]

use std::fs;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use devlink::exec::{
    ErrorPolicy, ExecConfig, ExecError, Executor, Spawner, TaskResult, TaskSpec, NO_RESULT_KIND,
};
use devlink::link::{LinkAddress, LinkListener};
use devlink::rpc::Simulator;
use serde_json::json;

fn executor() -> Executor {
    Executor::new(
        Spawner::new(env!("CARGO_BIN_EXE_devlink")).log_level("warn"),
        ExecConfig {
            terminate_grace: Duration::from_millis(500),
            kill_grace: Duration::from_millis(500),
            drain_grace: Duration::from_millis(500),
        },
    )
}

fn sleep(seconds: f64) -> TaskSpec {
    TaskSpec::new("sleep").arg(seconds)
}

struct Device {
    dir: PathBuf,
    address: String,
    server: Option<JoinHandle<()>>,
}

impl Device {
    fn start(name: &str, connections: usize) -> Self {
        let dir = std::env::temp_dir().join(format!(
            "devlink-parallel-{}-{name}",
            std::process::id()
        ));
        fs::create_dir_all(&dir).unwrap();
        let socket = dir.join("device.sock");
        let listener = LinkListener::bind(&socket).unwrap();
        let server = thread::spawn(move || {
            Simulator::demo().run(&listener, Some(connections)).unwrap();
        });
        Self {
            address: LinkAddress::socket(&socket).to_string(),
            dir,
            server: Some(server),
        }
    }

    fn join(mut self) {
        if let Some(server) = self.server.take() {
            server.join().unwrap();
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}

#[test]
fn hung_task_yields_no_result_between_finished_ones() {
    let start = Instant::now();
    let outcome = executor()
        .execute(
            &[sleep(0.1), sleep(30.0), sleep(0.2)],
            Duration::from_secs(2),
            ErrorPolicy::Collect,
        )
        .unwrap();
    let elapsed = start.elapsed();

    assert_eq!(
        outcome.results,
        [
            TaskResult::Returned(json!(0.1)),
            TaskResult::NoResult,
            TaskResult::Returned(json!(0.2)),
        ]
    );
    assert!(outcome.errors[0].is_none());
    assert_eq!(outcome.errors[1].as_ref().unwrap().kind, NO_RESULT_KIND);
    assert!(outcome.errors[2].is_none());
    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_secs(8), "took {elapsed:?}");
}

#[test]
fn failures_do_not_leak_into_other_slots() {
    let outcome = executor()
        .execute(
            &[
                TaskSpec::new("fail").arg("boom"),
                sleep(0.01),
                TaskSpec::new("no-such-task"),
                TaskSpec::new("sleep").kwarg("seconds", "soon"),
            ],
            Duration::from_secs(20),
            ErrorPolicy::Collect,
        )
        .unwrap();

    assert_eq!(outcome.len(), 4);
    let kinds: Vec<_> = outcome
        .errors
        .iter()
        .map(|error| error.as_ref().map(|failure| failure.kind.as_str()))
        .collect();
    assert_eq!(
        kinds,
        [
            Some("TaskError"),
            None,
            Some("UnknownTaskError"),
            Some("ArgumentError")
        ]
    );
    assert_eq!(outcome.errors[0].as_ref().unwrap().message, "boom");
    assert_eq!(outcome.results[1], TaskResult::Returned(json!(0.01)));
    assert!(outcome.results[0].is_no_result());
}

#[test]
fn raise_policy_reports_every_failed_index() {
    let err = executor()
        .execute(
            &[
                TaskSpec::new("fail").arg("first"),
                sleep(0.01),
                TaskSpec::new("fail").arg("third"),
            ],
            Duration::from_secs(20),
            ErrorPolicy::Raise,
        )
        .unwrap_err();

    let ExecError::TaskFailures { failures } = &err else {
        panic!("unexpected error {err}");
    };
    let indices: Vec<_> = failures.iter().map(|(index, _)| *index).collect();
    assert_eq!(indices, [0, 2]);
    let message = err.to_string();
    assert!(message.contains("[0] TaskError: first"), "{message}");
    assert!(message.contains("[2] TaskError: third"), "{message}");
}

#[test]
fn device_tasks_each_get_their_own_connection() {
    let device = Device::start("device-tasks", 4);
    let address = device.address.clone();

    let outcome = executor()
        .execute(
            &[
                TaskSpec::new("rpc")
                    .arg(address.as_str())
                    .arg("Lighting")
                    .arg("Set")
                    .kwarg("level", 10),
                TaskSpec::new("rpc")
                    .kwarg("address", address.as_str())
                    .kwarg("service", "Lighting")
                    .kwarg("method", "Set")
                    .kwarg("level", 300),
                TaskSpec::new("echo").arg(address.as_str()).arg("ping"),
                TaskSpec::new("logs").arg(address.as_str()).arg(0.5),
            ],
            Duration::from_secs(20),
            ErrorPolicy::Raise,
        )
        .unwrap();
    device.join();

    assert_eq!(
        outcome.results,
        [
            TaskResult::Returned(json!({ "ack": true, "payload": { "level": 10 } })),
            TaskResult::Returned(json!({ "ack": false, "payload": null })),
            TaskResult::Returned(json!({ "ack": true, "msg": "ping" })),
            TaskResult::Returned(json!(["boot: devlink simulator", "boot: lighting ready"])),
        ]
    );
}

#[test]
fn missing_device_fails_only_its_task() {
    let outcome = executor()
        .execute(
            &[
                TaskSpec::new("echo")
                    .arg("unix:/nonexistent/devlink.sock")
                    .arg("ping"),
                sleep(0.01),
            ],
            Duration::from_secs(20),
            ErrorPolicy::Collect,
        )
        .unwrap();

    let failure = outcome.errors[0].as_ref().unwrap();
    assert_eq!(failure.kind, "TransportError");
    assert!(failure.message.starts_with("link unavailable"));
    assert!(outcome.errors[1].is_none());
}
