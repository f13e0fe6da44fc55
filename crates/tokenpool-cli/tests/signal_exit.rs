//! SIGTERM against the built pilot binary.
#![cfg(unix)]

use std::io::{BufRead, BufReader, Lines};
use std::process::{Child, ChildStdout, Command, Stdio};

use serde_json::Value;

fn spawn_pilot(envs: &[(&str, &str)]) -> (Child, Lines<BufReader<ChildStdout>>) {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_tokenpool"));
    cmd.env_clear()
        .env("PATH", std::env::var("PATH").unwrap_or_default())
        .env("RUST_LOG", "info")
        .env("NO_COLOR", "1")
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());
    for (key, value) in envs {
        cmd.env(key, value);
    }
    let mut child = cmd.spawn().unwrap();
    let lines = BufReader::new(child.stdout.take().unwrap()).lines();
    (child, lines)
}

/// Read stdout until a line contains `needle`.
fn wait_for(lines: &mut Lines<BufReader<ChildStdout>>, needle: &str) {
    for line in lines.by_ref() {
        if line.unwrap().contains(needle) {
            return;
        }
    }
    panic!("pilot exited before logging {needle:?}");
}

fn sigterm(child: &Child) {
    let status = Command::new("kill")
        .args(["-TERM", &child.id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());
}

/// Remaining stdout up to exit, returning the printed state counts.
fn final_counts(lines: Lines<BufReader<ChildStdout>>) -> Value {
    let counts = lines
        .map(Result::unwrap)
        .find_map(|line| line.strip_prefix("counts: ").map(str::to_string))
        .expect("pilot printed no counts");
    serde_json::from_str(&counts).unwrap()
}

#[test]
fn sigterm_mid_task_resets_it_and_exits_zero() {
    let (mut child, mut lines) = spawn_pilot(&[
        ("TOKENPOOL_DEMO_TOKENS", "2"),
        ("TOKENPOOL_DEMO_DELAY_SECS", "60"),
        ("TOKENPOOL_ENDLESS", "true"),
    ]);
    wait_for(&mut lines, "processing task");

    sigterm(&child);
    let counts = final_counts(lines);
    let status = child.wait().unwrap();

    assert_eq!(status.code(), Some(0));
    assert_eq!(counts["todo"], 2);
    assert_eq!(counts["locked"], 0);
}

#[test]
fn sigterm_while_waiting_for_work_exits_zero() {
    let (mut child, mut lines) = spawn_pilot(&[
        ("TOKENPOOL_DEMO_TOKENS", "1"),
        ("TOKENPOOL_ENDLESS", "true"),
        ("TOKENPOOL_POLL_INTERVAL_SECS", "60"),
    ]);
    wait_for(&mut lines, "iterator is waiting for work");

    sigterm(&child);
    let counts = final_counts(lines);
    let status = child.wait().unwrap();

    assert_eq!(status.code(), Some(0));
    assert_eq!(counts["done"], 1);
}
