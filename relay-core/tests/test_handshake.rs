//! ハンドシェイクとイベント転送のテスト

mod common;

use common::{attrs, FakePeer, TestEngine};
use relay_core::{Agent, ExecutionListener, OperatingMode};
use serde_json::json;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_protocol_mismatch_closes_without_events() {
    let peer = FakePeer::bind();
    let config = peer.config();

    let peer_thread = thread::spawn(move || {
        let mut conn = peer.accept();
        conn.expect("agent_initializing");
        conn.send("operating_mode", json!({"mode": "Debug", "wait_for_start_allowance": false}));
        conn.expect("version");
        conn.send(
            "protocol_version",
            json!({"is_correct": false, "error": "Agent protocol 2 is not supported"}),
        );
        conn.drain()
    });

    let mut agent = Agent::start(config, Arc::new(TestEngine::new()));
    assert!(!agent.is_attached());
    assert_eq!(agent.mode(), None);

    agent.start_suite("Suite", &attrs(json!({"source": "/tmp"})));
    agent.start_keyword("Log", &attrs(json!({"status": "NOT RUN"})));
    agent.close();

    let rest = peer_thread.join().unwrap();
    assert!(rest.is_empty(), "agent kept sending after mismatch: {:?}", rest);
}

#[test]
fn test_unreachable_peer_leaves_agent_detached() {
    let port = {
        let peer = FakePeer::bind();
        peer.config().port
    };
    let config = relay_core::AgentConfig::new(port)
        .with_host("127.0.0.1")
        .with_connect_timeout(Duration::from_millis(100))
        .with_retry_interval(Duration::from_millis(20));

    let mut agent = Agent::start(config, Arc::new(TestEngine::new()));
    assert!(!agent.is_attached());
    assert_eq!(agent.control_port(), None);

    // 切り離された状態でもキーワードは実行できる
    agent.start_keyword("Log", &attrs(json!({})));
    agent.end_keyword("Log", &attrs(json!({"status": "PASS"})));
    assert_eq!(agent.debugger().depth(), 0);
    agent.close();
}

#[test]
fn test_run_mode_forwards_shaped_events() {
    let peer = FakePeer::bind();
    let config = peer.config();

    let peer_thread = thread::spawn(move || {
        let mut conn = peer.accept();
        let port = conn.handshake("RUN");
        assert_ne!(port, 0);

        let suite = conn.expect("start_suite");
        assert_eq!(suite[0], "Suite");
        assert_eq!(suite[1]["is_dir"], false);
        assert!(suite[1].get("doc").is_none());

        let test = conn.expect("start_test");
        assert_eq!(test, json!(["T1", {"id": "s1-t1"}]));

        // RUNモードでは問い合わせが間引かれ、pre_* イベントも送られない
        let keyword = conn.expect("start_keyword");
        assert_eq!(keyword, json!(["BuiltIn.Log", {"type": "Keyword"}]));
        conn.expect("end_keyword");

        let message = conn.expect("message");
        assert_eq!(message[0]["level"], "FAIL");

        let log = conn.expect("log_message");
        assert_eq!(log[0]["message"], "abcd <truncated>");

        let library = conn.expect("library_import");
        assert_eq!(library[1]["source"], "/opt/lib/remote.jar");

        conn.expect("resource_import");
        assert_eq!(conn.expect("log_file"), json!(["/out/log.html"]));
        conn.expect("output_file");
        conn.expect("report_file");
        conn.expect("end_test");
        conn.expect("end_suite");
        conn.expect("close");
        conn.drain()
    });

    let config = config.with_max_value_length(4);
    let mut agent = Agent::start(config, Arc::new(TestEngine::new()));
    assert_eq!(agent.mode(), Some(OperatingMode::Run));

    agent.start_suite("Suite", &attrs(json!({"doc": "d", "source": "/no/such/dir.robot"})));
    agent.start_test("T1", &attrs(json!({"id": "s1-t1", "doc": "d"})));
    let kw = attrs(json!({"type": "Keyword", "args": ["x"], "assign": [], "doc": "d", "status": "PASS"}));
    agent.start_keyword("BuiltIn.Log", &attrs(json!({"type": "Keyword", "args": ["x"]})));
    agent.end_keyword("BuiltIn.Log", &kw);

    agent.message(&attrs(json!({"level": "INFO", "message": "dropped"})));
    agent.message(&attrs(json!({"level": "FAIL", "message": "kept"})));
    agent.log_message(&attrs(json!({"level": "TRACE", "message": "dropped"})));
    agent.log_message(&attrs(json!({"level": "INFO", "message": "abcdefgh"})));
    agent.library_import(
        "Remote",
        &attrs(json!({"source": "jar:file:/opt/lib/remote.jar!/Remote.class"})),
    );
    agent.resource_import("common.resource", &attrs(json!({"source": "/r/common.resource"})));
    agent.log_file("/out/log.html");
    agent.output_file("/out/output.xml");
    agent.report_file("/out/report.html");
    agent.end_test("T1", &attrs(json!({"id": "s1-t1", "status": "PASS"})));
    agent.end_suite("Suite", &attrs(json!({"source": "/no/such/dir.robot"})));
    agent.close();

    let rest = peer_thread.join().unwrap();
    assert!(rest.is_empty(), "unexpected trailing messages: {:?}", rest);
    assert!(!agent.is_attached());
}
