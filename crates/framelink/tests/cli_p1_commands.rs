#![cfg(all(unix, feature = "cli"))]

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use framelink::transport::is_listening;

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/flcli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn wait_for_listener(path: &Path, timeout: Duration) {
    let start = Instant::now();
    while !is_listening(path) {
        if start.elapsed() >= timeout {
            panic!("listener did not come up");
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn write_npy_file(path: &Path, descr: &str, shape: &str, body: &[u8]) {
    let mut header = format!("{{'descr': '{descr}', 'fortran_order': False, 'shape': {shape}, }}");
    while (10 + header.len() + 1) % 64 != 0 {
        header.push(' ');
    }
    header.push('\n');

    let mut bytes = b"\x93NUMPY\x01\x00".to_vec();
    bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
    bytes.extend_from_slice(header.as_bytes());
    bytes.extend_from_slice(body);
    std::fs::write(path, bytes).expect("npy should be writable");
}

/// A 3 x 2 x 2 uint16 `.npy` file holding `300 * (0..12)`.
fn write_npy(dir: &Path) -> PathBuf {
    let body: Vec<u8> = (0u16..12).flat_map(|v| (v * 300).to_le_bytes()).collect();
    let path = dir.join("stack.npy");
    write_npy_file(&path, "<u2", "(2, 2, 3)", &body);
    path
}

fn spawn_listener(sock: &Path, count: usize) -> std::process::Child {
    let child = Command::new(env!("CARGO_BIN_EXE_framelink"))
        .args(["--log-level", "error", "--format", "json", "--socket"])
        .arg(sock)
        .args(["listen", "--count", &count.to_string()])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("listen should start");
    wait_for_listener(sock, Duration::from_secs(5));
    child
}

fn received(child: std::process::Child) -> Vec<serde_json::Value> {
    let output = child.wait_with_output().expect("listen should exit");
    assert!(output.status.success());
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("each line should be json"))
        .collect()
}

fn framelink(args: &[&std::ffi::OsStr]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_framelink"))
        .args(["--log-level", "error", "--format", "json"])
        .args(args)
        .output()
        .expect("framelink should run")
}

fn json(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(stdout.lines().next().unwrap_or_default()).expect("stdout should be json")
}

#[test]
fn info_reports_npy_stack() {
    let dir = unique_temp_dir("info");
    let npy = write_npy(&dir);

    let output = framelink(&["info".as_ref(), npy.as_os_str()]);
    assert!(output.status.success());
    let payload = json(&output);
    assert_eq!(payload["nx"], 3);
    assert_eq!(payload["ny"], 2);
    assert_eq!(payload["length"], 2);
    assert_eq!(payload["good"], true);

    let output = framelink(&[
        "info".as_ref(),
        npy.as_os_str(),
        "--frame".as_ref(),
        "1".as_ref(),
    ]);
    assert!(output.status.success());
    let payload = json(&output);
    assert_eq!(payload["stats"]["min"], 1800.0);
    assert_eq!(payload["stats"]["max"], 3300.0);
    assert_eq!(payload["bit_range"], "u12");

    let output = framelink(&[
        "info".as_ref(),
        npy.as_os_str(),
        "--frame".as_ref(),
        "5".as_ref(),
    ]);
    assert_eq!(output.status.code(), Some(64));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn info_on_unloadable_path_returns_60() {
    let dir = unique_temp_dir("bad");
    let broken = dir.join("broken.npy");
    std::fs::write(&broken, b"nope").expect("file should be writable");

    let output = framelink(&["info".as_ref(), broken.as_os_str()]);
    assert_eq!(output.status.code(), Some(60));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ERROR: file loading failed"));

    let output = framelink(&["info".as_ref(), dir.join("missing.tif").as_os_str()]);
    assert_eq!(output.status.code(), Some(60));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn comment_on_npy_is_usage_error() {
    let dir = unique_temp_dir("comment");
    let npy = write_npy(&dir);

    let output = framelink(&["comment".as_ref(), npy.as_os_str(), "hello".as_ref()]);
    assert_eq!(output.status.code(), Some(64));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn send_without_instance_fails() {
    let dir = unique_temp_dir("noserver");
    let sock = dir.join("none.sock");

    let output = framelink(&[
        "--socket".as_ref(),
        sock.as_os_str(),
        "send".as_ref(),
        "a.npy".as_ref(),
    ]);
    assert_eq!(output.status.code(), Some(1));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn listen_receives_paths_and_arrays() {
    let dir = unique_temp_dir("listen");
    let sock = dir.join("fl.sock");
    let npy = write_npy(&dir);
    let child = spawn_listener(&sock, 2);

    let output = framelink(&[
        "--socket".as_ref(),
        sock.as_os_str(),
        "send".as_ref(),
        npy.as_os_str(),
    ]);
    assert!(output.status.success());

    let output = framelink(&[
        "--socket".as_ref(),
        sock.as_os_str(),
        "send-array".as_ref(),
        npy.as_os_str(),
        "--name".as_ref(),
        "remote".as_ref(),
    ]);
    assert!(output.status.success());

    let items = received(child);
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["kind"], "path");
    assert_eq!(items[0]["path"], npy.display().to_string());
    assert_eq!(items[1]["kind"], "array");
    assert_eq!(items[1]["name"], "remote");
    assert_eq!(items[1]["element_type"], "uint16");
    assert_eq!(items[1]["length"], 2);
    assert_eq!(items[1]["range"][1], 3300.0);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn send_array_keeps_fractional_floats() {
    let dir = unique_temp_dir("float");
    let sock = dir.join("fl.sock");
    let npy = dir.join("float.npy");
    let values = [0.4f32, 100.7, 3.25, 7.5];
    let body: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    write_npy_file(&npy, "<f4", "(2, 2)", &body);
    let child = spawn_listener(&sock, 1);

    let output = framelink(&[
        "--socket".as_ref(),
        sock.as_os_str(),
        "send-array".as_ref(),
        npy.as_os_str(),
    ]);
    assert!(output.status.success());

    let items = received(child);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["kind"], "array");
    assert_eq!(items[0]["name"], "float");
    assert_eq!(items[0]["element_type"], "float32");
    let range = &items[0]["range"];
    assert_eq!(range[0].as_f64().map(|v| v as f32), Some(0.4));
    assert_eq!(range[1].as_f64().map(|v| v as f32), Some(100.7));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn version_prints_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_framelink"))
        .arg("version")
        .output()
        .expect("version should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("framelink {}", env!("CARGO_PKG_VERSION"))
    );
}
