use std::fs;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use devlink_link::{LinkAddress, LinkListener};
use devlink_rpc::{
    RpcConfig, ServiceReply, Simulator, TimeoutPolicy, Transport, TransportConfig, TransportError,
};
use serde_json::{json, Value};

struct Device {
    dir: PathBuf,
    socket: PathBuf,
    server: Option<JoinHandle<()>>,
}

impl Device {
    /// Serve `sim` for exactly `connections` connections on a fresh socket.
    fn start(name: &str, sim: Simulator, connections: usize) -> Self {
        let dir = std::env::temp_dir().join(format!(
            "devlink-rpc-test-{}-{name}",
            std::process::id()
        ));
        fs::create_dir_all(&dir).unwrap();
        let socket = dir.join("device.sock");
        let listener = LinkListener::bind(&socket).unwrap();
        let server = thread::spawn(move || {
            sim.run(&listener, Some(connections)).unwrap();
        });
        Self {
            dir,
            socket,
            server: Some(server),
        }
    }

    fn transport(&self) -> Transport {
        Transport::new(TransportConfig::new(LinkAddress::socket(&self.socket)))
    }

    fn transport_with(&self, rpc: RpcConfig) -> Transport {
        let mut config = TransportConfig::new(LinkAddress::socket(&self.socket));
        config.rpc = rpc;
        Transport::new(config)
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

fn read_line(transport: &Transport) -> String {
    String::from_utf8(transport.read(Duration::from_secs(2)).to_vec()).unwrap()
}

#[test]
fn lighting_set_is_acked_with_echoed_kwargs() {
    let device = Device::start("lighting", Simulator::demo(), 1);
    let mut transport = device.transport();
    transport.open().unwrap();
    assert!(transport.is_open());

    let (ack, payload) = transport
        .call("Lighting", "Set", json!({ "level": 10 }))
        .unwrap()
        .into_parts();
    assert!(ack);
    let echoed: Value = serde_json::from_slice(&payload).unwrap();
    assert_eq!(echoed, json!({ "level": 10 }));

    let state = transport.call("Lighting", "Get", ()).unwrap();
    assert_eq!(state.decode::<Value>().unwrap()["level"], 10);

    transport.close().unwrap();
    device.join();
}

#[test]
fn declining_remote_returns_nack_and_empty_payload() {
    let sim = Simulator::new().automation_service("Lighting", |_, _| ServiceReply::Nack);
    let device = Device::start("decline", sim, 1);
    let mut transport = device.transport();
    transport.open().unwrap();

    let (ack, payload) = transport
        .call("Lighting", "Set", json!({ "level": 10 }))
        .unwrap()
        .into_parts();
    assert!(!ack);
    assert!(payload.is_empty());

    transport.close().unwrap();
    device.join();
}

#[test]
fn echo_round_trips() {
    let device = Device::start("echo", Simulator::new(), 1);
    let mut transport = device.transport();
    transport.open().unwrap();

    assert_eq!(transport.echo("hello").unwrap(), (true, "hello".to_string()));

    transport.close().unwrap();
    device.join();
}

#[test]
fn boot_log_lines_are_readable_in_order() {
    let sim = Simulator::new().boot_log(["line one", "line two"]);
    let device = Device::start("logs", sim, 1);
    let mut transport = device.transport();
    transport.open().unwrap();

    assert_eq!(read_line(&transport), "line one\n");
    assert_eq!(read_line(&transport), "line two\n");

    let start = Instant::now();
    assert!(transport.read(Duration::from_millis(100)).is_empty());
    assert!(start.elapsed() < Duration::from_secs(1));

    transport.close().unwrap();
    device.join();
}

#[test]
fn logs_and_rpc_interleave_without_loss() {
    let device = Device::start(
        "interleave",
        Simulator::demo().boot_log(["after demo boot"]),
        1,
    );
    let mut transport = device.transport();
    transport.open().unwrap();

    for level in 0..5 {
        assert!(transport.call("Lighting", "Set", json!({ "level": level })).unwrap().ack);
    }
    assert_eq!(read_line(&transport), "boot: devlink simulator\n");
    assert_eq!(read_line(&transport), "boot: lighting ready\n");
    assert_eq!(read_line(&transport), "after demo boot\n");

    transport.close().unwrap();
    device.join();
}

#[test]
fn ignored_call_times_out_per_policy() {
    let sim = Simulator::new().automation_service("Sleepy", |_, _| ServiceReply::Ignore);
    let device = Device::start("timeout", sim, 2);
    let quick = Duration::from_millis(200);

    let mut strict = device.transport_with(RpcConfig {
        call_timeout: quick,
        ..RpcConfig::default()
    });
    strict.open().unwrap();
    let err = strict.call("Sleepy", "Nap", ()).unwrap_err();
    assert!(matches!(err, TransportError::Rpc(_)), "{err}");
    strict.close().unwrap();

    let mut lenient = device.transport_with(RpcConfig {
        call_timeout: quick,
        timeout_policy: TimeoutPolicy::Nack,
        ..RpcConfig::default()
    });
    lenient.open().unwrap();
    let reply = lenient.call("Sleepy", "Nap", ()).unwrap();
    assert!(!reply.ack);
    lenient.close().unwrap();

    device.join();
}

#[test]
fn open_close_lifecycle() {
    let device = Device::start("lifecycle", Simulator::new(), 2);
    let mut transport = device.transport();

    transport.open().unwrap();
    assert!(matches!(transport.open(), Err(TransportError::AlreadyOpen)));

    transport.close().unwrap();
    assert!(!transport.is_open());
    transport.close().unwrap();
    assert!(matches!(transport.echo("x"), Err(TransportError::NotOpen)));

    // A closed transport can be opened again.
    transport.open().unwrap();
    assert_eq!(transport.echo("again").unwrap(), (true, "again".to_string()));
    transport.close().unwrap();

    device.join();
}

#[test]
fn remote_hangup_marks_transport_closed() {
    let dir = std::env::temp_dir().join(format!("devlink-rpc-test-{}-hangup", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    let socket = dir.join("device.sock");
    let listener = LinkListener::bind(&socket).unwrap();
    let server = thread::spawn(move || {
        // Accept and hang up immediately.
        drop(listener.accept().unwrap());
    });

    let mut transport = Transport::new(TransportConfig::new(LinkAddress::socket(&socket)));
    transport.open().unwrap();
    server.join().unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while transport.is_open() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert!(!transport.is_open());
    transport.close().unwrap();
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn missing_device_is_link_unavailable() {
    let socket = std::env::temp_dir().join(format!(
        "devlink-rpc-test-{}-missing/device.sock",
        std::process::id()
    ));
    let mut transport = Transport::new(TransportConfig::new(LinkAddress::socket(socket)));
    let err = transport.open().unwrap_err();
    assert!(matches!(err, TransportError::LinkUnavailable(_)));
    assert!(!transport.is_open());
}
