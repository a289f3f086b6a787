//! 制御リスナーのテスト

use relay_debug::{AbortHandle, ControlListener, DebuggerMode, KeywordDebugger};
use std::io::Write;
use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn send(listener: &ControlListener, token: &str) {
    let mut stream = TcpStream::connect(listener.local_addr()).unwrap();
    stream.write_all(token.as_bytes()).unwrap();
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

fn start() -> (Arc<KeywordDebugger>, Arc<AtomicUsize>, ControlListener) {
    let debugger = Arc::new(KeywordDebugger::default());
    let aborts = Arc::new(AtomicUsize::new(0));
    let on_kill: AbortHandle = {
        let aborts = Arc::clone(&aborts);
        Arc::new(move || {
            aborts.fetch_add(1, Ordering::SeqCst);
        })
    };
    let listener = ControlListener::bind("127.0.0.1", Arc::clone(&debugger), on_kill).unwrap();
    (debugger, aborts, listener)
}

#[test]
fn test_commands_drive_debugger() {
    let (debugger, _, listener) = start();
    assert_ne!(listener.port(), 0);

    send(&listener, "pause\n");
    assert!(wait_until(|| debugger.is_paused()));

    send(&listener, "step_over");
    assert!(wait_until(|| debugger.state().mode == DebuggerMode::StepOver));

    send(&listener, "pause_on_failure");
    assert!(wait_until(|| debugger.state().pause_on_failure));
    send(&listener, "do_not_pause_on_failure");
    assert!(wait_until(|| !debugger.state().pause_on_failure));

    send(&listener, "resume");
    assert!(wait_until(|| debugger.state().mode == DebuggerMode::Running));
}

#[test]
fn test_unknown_token_is_ignored() {
    let (debugger, aborts, listener) = start();
    send(&listener, "reboot");
    send(&listener, "pause");
    assert!(wait_until(|| debugger.is_paused()));
    assert_eq!(aborts.load(Ordering::SeqCst), 0);
}

#[test]
fn test_kill_releases_blocked_keyword() {
    let (debugger, aborts, listener) = start();
    debugger.pause();

    let worker = {
        let debugger = Arc::clone(&debugger);
        thread::spawn(move || debugger.on_keyword_start())
    };

    send(&listener, "kill");
    worker.join().unwrap();
    assert_eq!(aborts.load(Ordering::SeqCst), 1);
    assert!(debugger.is_killed());
}

#[test]
fn test_shutdown_joins_thread() {
    let (_, _, mut listener) = start();
    let addr = listener.local_addr();
    listener.shutdown();
    listener.shutdown();
    // 停止後は接続できない
    assert!(TcpStream::connect_timeout(&addr, Duration::from_millis(200)).is_err());
}
