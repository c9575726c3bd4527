// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! End-to-end scenarios from spec.md §8, exercised against a real
//! `Runtime` rather than individual modules in isolation.

use std::net::Ipv4Addr;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use async_core::{coroutine, sleep, spawn, spawn_detached, Error, Runtime, TcpListener, TcpStream};

// Scenario 1: a coroutine that performs `co_await yield()` and returns
// 42, run under a fresh reactor, yields exit code 42 with at least two
// reactor iterations observed.
#[test]
fn yield_round_trip_observes_at_least_two_iterations() {
    let runtime = Runtime::new().expect("io_uring unavailable");

    let mut task = spawn(async {
        coroutine::yield_now().await;
        Ok(42)
    });

    let mut iterations = 0;
    while !task.is_ready() {
        runtime.reactor().run();
        iterations += 1;
    }

    assert!(iterations >= 2, "expected at least two reactor iterations, got {iterations}");
    assert_eq!(task.get().unwrap(), 42);
}

// Scenario 4: a TCP listener on an ephemeral port; a connecting client
// writes "Hello, World!" (13 bytes); the accepted side reads exactly 13
// bytes matching the payload; both sides close cleanly.
//
// `TcpListener::bind` takes a concrete port rather than handing back an
// OS-assigned ephemeral one (the wrapper has no `getsockname` shim), so
// this picks a fixed high port instead of a true ephemeral one.
#[test]
fn echo_round_trip() {
    const PAYLOAD: &[u8] = b"Hello, World!";
    assert_eq!(PAYLOAD.len(), 13);

    let runtime = Runtime::new().expect("io_uring unavailable");
    let port = 18_080u16;

    let task = spawn(async move {
        let listener = TcpListener::bind(port).await?;
        let mut accepted = spawn(async move {
            let stream = listener.accept().await?;
            let mut buf = [0u8; PAYLOAD.len()];
            let n = stream.read(&mut buf).await?;
            stream.close().await?;
            Ok((n, buf))
        });

        let client = TcpStream::connect(Ipv4Addr::LOCALHOST, port).await?;
        let written = client.write(PAYLOAD).await?;
        client.close().await?;

        let (read, buf) = (&mut accepted).await?;
        Ok((written, read, buf))
    });

    let (written, read, buf) = runtime.run_until(task).expect("echo round trip failed");
    assert_eq!(written, PAYLOAD.len() as u64);
    assert_eq!(read, PAYLOAD.len() as u64);
    assert_eq!(&buf[..], PAYLOAD);
}

// Scenario 5: a coroutine starts a monotonic timer, sleeps for 1
// second, reads the timer; observed elapsed >= 1s, <= 1.2s.
#[test]
fn sleep_measurement() {
    let runtime = Runtime::new().expect("io_uring unavailable");

    let task = spawn(async {
        let start = Instant::now();
        sleep(Duration::from_secs(1)).await?;
        Ok(start.elapsed())
    });

    let elapsed = runtime.run_until(task).expect("sleep must not fail");
    assert!(elapsed >= Duration::from_secs(1), "slept for only {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(1200), "slept for {elapsed:?}, too long");
}

// Scenario 6: a detached coroutine throws; its Future is not awaited;
// the orphan log category receives a line containing the error text;
// the surrounding `run()` returns normally.
#[test]
fn orphan_logging() {
    install_capturing_logger();

    let runtime = Runtime::new().expect("io_uring unavailable");
    spawn_detached::<_, ()>(async { Err(Error::InvalidArgument("deliberate orphan failure".into())) });

    // The detached coroutine never awaits anything, so it settles on
    // its very first poll; a couple of quanta is more than enough, and
    // mirrors how a caller would normally keep driving the reactor
    // around other, unrelated work.
    runtime.reactor().run();
    runtime.reactor().run();

    let captured = CAPTURED.get().unwrap().lock().unwrap();
    assert!(
        captured
            .iter()
            .any(|(target, message)| target == "orphan" && message.contains("deliberate orphan failure")),
        "expected an orphan-targeted log record, got: {captured:?}"
    );
}

static CAPTURED: OnceLock<Mutex<Vec<(String, String)>>> = OnceLock::new();
static LOGGER_INSTALLED: OnceLock<()> = OnceLock::new();

struct CapturingLogger;

impl log::Log for CapturingLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        CAPTURED
            .get()
            .unwrap()
            .lock()
            .unwrap()
            .push((record.target().to_string(), record.args().to_string()));
    }

    fn flush(&self) {}
}

fn install_capturing_logger() {
    CAPTURED.get_or_init(|| Mutex::new(Vec::new()));
    LOGGER_INSTALLED.get_or_init(|| {
        log::set_boxed_logger(Box::new(CapturingLogger)).expect("logger already installed");
        log::set_max_level(log::LevelFilter::Trace);
    });
}
