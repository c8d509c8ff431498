#![cfg(feature = "cli")]

use std::net::{TcpListener, TcpStream};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn free_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("ephemeral port should bind");
    let addr = listener.local_addr().expect("bound socket has an address");
    addr.to_string()
}

fn wait_for_listener(addr: &str, timeout: Duration) {
    let start = Instant::now();
    loop {
        if TcpStream::connect(addr).is_ok() {
            return;
        }
        if start.elapsed() >= timeout {
            panic!("listener at {addr} did not come up");
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn spawn_wsmux(args: &[&str]) -> Child {
    Command::new(env!("CARGO_BIN_EXE_wsmux"))
        .arg("--log-level")
        .arg("error")
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("wsmux should start")
}

#[test]
fn send_with_wait_prints_echoed_reply() {
    let addr = free_addr();
    let mut echo = spawn_wsmux(&["echo", &addr]);
    wait_for_listener(&addr, Duration::from_secs(3));

    let output = Command::new(env!("CARGO_BIN_EXE_wsmux"))
        .arg("--log-level")
        .arg("error")
        .arg("--format")
        .arg("json")
        .arg("send")
        .arg(format!("ws://{addr}"))
        .arg("--data")
        .arg("hello over websocket")
        .arg("--wait")
        .output()
        .expect("send should run");

    let _ = echo.kill();
    let _ = echo.wait();

    assert!(output.status.success(), "send failed: {output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let reply: serde_json::Value =
        serde_json::from_str(stdout.trim()).expect("send should emit json");
    assert_eq!(reply["payload"], "hello over websocket");
    assert_eq!(reply["payload_size"], 20);
}

#[test]
fn chunked_file_payload_round_trips() {
    let addr = free_addr();
    let mut echo = spawn_wsmux(&["echo", &addr]);
    wait_for_listener(&addr, Duration::from_secs(3));

    let dir = std::env::temp_dir().join(format!("wsmux-cli-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    let file = dir.join("payload.txt");
    std::fs::write(&file, "x".repeat(300_000)).expect("payload should be writable");

    let output = Command::new(env!("CARGO_BIN_EXE_wsmux"))
        .arg("--format")
        .arg("json")
        .arg("send")
        .arg(format!("ws://{addr}"))
        .arg("--file")
        .arg(&file)
        .arg("--chunk-size")
        .arg("1000")
        .arg("--wait")
        .output()
        .expect("send should run");

    let _ = echo.kill();
    let _ = echo.wait();
    let _ = std::fs::remove_dir_all(&dir);

    assert!(output.status.success(), "send failed: {output:?}");
    let reply: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("send should emit json");
    assert_eq!(reply["payload_size"], 300_000);
}

#[test]
fn listen_prints_received_messages() {
    let addr = free_addr();
    let listen = spawn_wsmux(&["--format", "pretty", "listen", &addr, "--count", "1"]);
    wait_for_listener(&addr, Duration::from_secs(3));

    let status = Command::new(env!("CARGO_BIN_EXE_wsmux"))
        .arg("--log-level")
        .arg("error")
        .arg("send")
        .arg(format!("ws://{addr}"))
        .arg("--data")
        .arg("ping")
        .status()
        .expect("send should run");
    assert!(status.success());

    let output = listen.wait_with_output().expect("listen should exit after one message");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("payload=ping"));
    assert!(stdout.contains("size=4"));
}

#[test]
fn send_to_closed_port_fails() {
    let addr = free_addr();

    let output = Command::new(env!("CARGO_BIN_EXE_wsmux"))
        .arg("send")
        .arg(format!("ws://{addr}"))
        .arg("--data")
        .arg("nobody home")
        .output()
        .expect("send should run");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("connect failed"));
}

#[test]
fn version_reports_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_wsmux"))
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("wsmux {}", env!("CARGO_PKG_VERSION")));
}
