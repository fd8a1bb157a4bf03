// Copyright (c) The treetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests for the harness supervisor: a real subprocess, a real
//! loopback connection, and the event protocol over the wire.

#![cfg(unix)]

use camino_tempfile::tempdir;
use std::{
    io::Write,
    net::TcpStream,
    time::Duration,
};
use treetest_runner::{
    errors::SupervisorError,
    harness::{HarnessCommand, HarnessSupervisor, StopCause},
    reporter::TestReporter,
    signal::SignalHandlerKind,
};

const SCENARIO_EVENTS: &[u8] = b"TEST_MODULE_STARTED {\"moduleName\":\"m\"}\n\
TEST_RUN_STARTED {\"testCount\":2}\n\
TEST_STARTED {\"className\":\"C\",\"testName\":\"a\",\"start_time\":0}\n\
TEST_ENDED {\"className\":\"C\",\"testName\":\"a\",\"end_time\":10}\n\
TEST_STARTED {\"className\":\"C\",\"testName\":\"b\",\"start_time\":11}\n\
TEST_FAILED {\"className\":\"C\",\"testName\":\"b\",\"trace\":\"t\"}\n\
TEST_ENDED {\"className\":\"C\",\"testName\":\"b\",\"end_time\":20}\n\
TEST_RUN_ENDED {}\n\
TEST_MODULE_ENDED {}\n";

fn shell_command(script: &str) -> HarnessCommand {
    HarnessCommand {
        program: "sh".into(),
        args: vec!["-c".to_owned(), script.to_owned()],
    }
}

fn supervisor_for(script: &str, log_name: &str) -> (HarnessSupervisor, camino_tempfile::Utf8TempDir) {
    let dir = tempdir().unwrap();
    let mut supervisor =
        HarnessSupervisor::new(shell_command(script), dir.path().join(log_name)).unwrap();
    supervisor.set_signal_handler_kind(SignalHandlerKind::Noop);
    (supervisor, dir)
}

#[test]
fn child_that_never_connects_is_early_exit() {
    let (supervisor, _dir) = supervisor_for("echo boom; exit 2", "harness.log");
    let err = supervisor.execute(|_, _| {}).unwrap_err();
    match err {
        SupervisorError::ExitedEarly {
            exit_code,
            log_tail,
        } => {
            assert_eq!(exit_code, Some(2));
            assert!(
                log_tail.iter().any(|line| line.contains("boom")),
                "log tail should surface child output: {log_tail:?}"
            );
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn clean_exit_without_connecting_is_still_early_exit() {
    let (supervisor, _dir) = supervisor_for("exit 0", "harness.log");
    let err = supervisor.execute(|_, _| {}).unwrap_err();
    match err {
        SupervisorError::ExitedEarly { exit_code, .. } => assert_eq!(exit_code, Some(0)),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn module_event_stream_feeds_the_reporter() {
    let (supervisor, _dir) = supervisor_for("sleep 1", "harness.log");
    let port = supervisor.port();

    let client = std::thread::spawn(move || {
        // First connection is the invocation-level channel; hold it open,
        // silent, the way the harness does.
        let invocation = TcpStream::connect(("127.0.0.1", port)).unwrap();
        std::thread::sleep(Duration::from_millis(100));

        let mut module_conn = TcpStream::connect(("127.0.0.1", port)).unwrap();
        module_conn.write_all(SCENARIO_EVENTS).unwrap();
        drop(module_conn);
        drop(invocation);
    });

    let mut reporter = TestReporter::new();
    let mut out = Vec::new();
    let outcome = supervisor
        .execute(|source, event| {
            reporter.report_event(source, event, &mut out).unwrap();
        })
        .unwrap();
    client.join().unwrap();

    assert_eq!(outcome.exit_code, Some(0));
    assert_eq!(outcome.stop_cause, StopCause::ChildExited);

    let stats = reporter.finalize(&mut out).unwrap();
    assert_eq!(stats.passed, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.started, 2);
    assert_eq!(stats.incomplete_modules, 0);
    assert!(!stats.is_success());

    let rendered = String::from_utf8(out).unwrap();
    assert!(rendered.contains("PASS"), "{rendered}");
    assert!(rendered.contains("FAIL"), "{rendered}");
}

#[test]
fn split_and_coalesced_reads_assemble_identically() {
    let (supervisor, _dir) = supervisor_for("sleep 1", "harness.log");
    let port = supervisor.port();

    let client = std::thread::spawn(move || {
        let invocation = TcpStream::connect(("127.0.0.1", port)).unwrap();
        std::thread::sleep(Duration::from_millis(100));

        let mut module_conn = TcpStream::connect(("127.0.0.1", port)).unwrap();
        // Split one event's JSON mid-object; everything before it lands in
        // one write so at least one read carries two complete events.
        let split_at = SCENARIO_EVENTS
            .windows(b"\"testName\":\"b\",\"end".len())
            .position(|w| w == b"\"testName\":\"b\",\"end")
            .unwrap();
        module_conn.write_all(&SCENARIO_EVENTS[..split_at]).unwrap();
        module_conn.flush().unwrap();
        std::thread::sleep(Duration::from_millis(150));
        module_conn.write_all(&SCENARIO_EVENTS[split_at..]).unwrap();
        drop(module_conn);
        drop(invocation);
    });

    let mut reporter = TestReporter::new();
    let mut out = Vec::new();
    supervisor
        .execute(|source, event| {
            reporter.report_event(source, event, &mut out).unwrap();
        })
        .unwrap();
    client.join().unwrap();

    let stats = reporter.finalize(&mut out).unwrap();
    assert_eq!(stats.passed, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.protocol_warnings, 0);
}

#[test]
fn open_module_at_child_exit_is_incomplete() {
    let (supervisor, _dir) = supervisor_for("sleep 1", "harness.log");
    let port = supervisor.port();

    let client = std::thread::spawn(move || {
        let invocation = TcpStream::connect(("127.0.0.1", port)).unwrap();
        std::thread::sleep(Duration::from_millis(100));

        let mut module_conn = TcpStream::connect(("127.0.0.1", port)).unwrap();
        // The module never ends before the connection and child go away.
        module_conn
            .write_all(
                b"TEST_MODULE_STARTED {\"moduleName\":\"m\"}\n\
                  TEST_STARTED {\"className\":\"C\",\"testName\":\"a\",\"start_time\":0}\n",
            )
            .unwrap();
        drop(module_conn);
        drop(invocation);
    });

    let mut reporter = TestReporter::new();
    let outcome = supervisor
        .execute(|source, event| {
            reporter.report_event(source, event, Vec::new()).unwrap();
        })
        .unwrap();
    client.join().unwrap();

    assert_eq!(outcome.exit_code, Some(0));
    let stats = reporter.finalize(Vec::new()).unwrap();
    assert_eq!(stats.incomplete, 1);
    assert_eq!(stats.incomplete_modules, 1);
    assert!(!stats.is_success(), "exit code must signal test failure");
}

#[test]
fn deadline_interrupts_a_hung_harness() {
    let (mut supervisor, _dir) = supervisor_for("sleep 30", "harness.log");
    supervisor.set_deadline(Some(Duration::from_millis(300)));
    let port = supervisor.port();

    // Connect so the run is not an early exit, then go away while the
    // harness is still hung.
    let client = std::thread::spawn(move || {
        let connection = TcpStream::connect(("127.0.0.1", port)).unwrap();
        std::thread::sleep(Duration::from_secs(1));
        drop(connection);
    });

    let outcome = supervisor.execute(|_, _| {}).unwrap();
    assert_eq!(outcome.stop_cause, StopCause::Deadline);
    client.join().unwrap();
}
