// tests/timeout_and_kill.rs

//! Deadline enforcement and whole-subtree termination.

#![cfg(unix)]

mod common;
use common::init_tracing;

use std::time::{Duration, Instant};

use cmdrun::{run, Method, RunOptions, StreamSpec, EXIT_TIMEOUT};

fn methods() -> [Method; 2] {
    [Method::Poller, Method::Monitor]
}

#[tokio::test]
async fn timeout_kills_a_sleeping_child_quickly() {
    init_tracing();
    for method in methods() {
        let started = Instant::now();
        let result = run(
            "sleep 30",
            RunOptions {
                method,
                timeout: Some(Duration::from_secs(1)),
                ..Default::default()
            },
        )
        .await;
        let elapsed = started.elapsed();

        assert_eq!(result.exit_code, EXIT_TIMEOUT, "method {:?}", method);
        assert!(
            result.output_string().contains("Timeout"),
            "output should mention the timeout: {:?}",
            result.output_string()
        );
        assert!(
            elapsed < Duration::from_secs(3),
            "timeout=1 run took {:?} with method {:?}",
            elapsed,
            method
        );
    }
}

#[tokio::test]
async fn no_timeout_lets_the_child_finish() {
    init_tracing();
    for method in methods() {
        let result = run(
            "sleep 0.2 && echo done",
            RunOptions {
                shell: true,
                method,
                ..Default::default()
            },
        )
        .await;
        assert_eq!(result.exit_code, 0, "method {:?}", method);
        assert_eq!(result.output_string(), "done\n");
    }
}

#[tokio::test]
async fn partial_output_survives_a_timeout() {
    init_tracing();
    for method in methods() {
        let result = run(
            "echo partial; sleep 30",
            RunOptions {
                shell: true,
                method,
                timeout: Some(Duration::from_secs(1)),
                ..Default::default()
            },
        )
        .await;
        assert_eq!(result.exit_code, EXIT_TIMEOUT, "method {:?}", method);
        let output = result.output_string();
        assert!(
            output.contains("partial"),
            "partial output should be kept with method {:?}: {:?}",
            method,
            output
        );
        assert!(output.contains("Original output was"), "output {:?}", output);
    }
}

#[tokio::test]
async fn timeout_kills_the_grandchild_too() {
    init_tracing();
    // The shell prints the grandchild's pid and then blocks on it; only a
    // subtree kill reaches the sleeping grandchild.
    let result = run(
        "sleep 60 & echo $!; wait",
        RunOptions {
            shell: true,
            timeout: Some(Duration::from_secs(1)),
            ..Default::default()
        },
    )
    .await;
    assert_eq!(result.exit_code, EXIT_TIMEOUT);

    let output = result.output_string();
    let grandchild: i32 = output
        .lines()
        .find_map(|line| line.trim().parse().ok())
        .expect("grandchild pid should be in the captured output");

    // Give the escalation a moment to finish delivering signals.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let alive = unsafe { libc::kill(grandchild, 0) } == 0;
    assert!(!alive, "grandchild {} should be dead after the run", grandchild);
}

#[tokio::test]
async fn timeout_message_lands_in_redirected_stdout_file() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("captured.log");

    let result = run(
        "echo data; sleep 30",
        RunOptions {
            shell: true,
            timeout: Some(Duration::from_secs(1)),
            stdout: StreamSpec::File(path.clone()),
            ..Default::default()
        },
    )
    .await;
    assert_eq!(result.exit_code, EXIT_TIMEOUT);

    let content = std::fs::read_to_string(&path).expect("file should exist and be closed");
    assert!(content.contains("data"), "file content: {:?}", content);
    assert!(content.contains("Timeout"), "file content: {:?}", content);
}

#[tokio::test]
async fn quick_child_beats_its_timeout() {
    init_tracing();
    let started = Instant::now();
    let result = run(
        "echo fast",
        RunOptions {
            timeout: Some(Duration::from_secs(10)),
            ..Default::default()
        },
    )
    .await;
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.output_string(), "fast\n");
    assert!(started.elapsed() < Duration::from_secs(2));
}
