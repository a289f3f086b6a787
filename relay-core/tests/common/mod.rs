//! 結合テスト用の偽エンジンと偽ピア

#![allow(dead_code)]

use parking_lot::Mutex;
use relay_core::{AgentConfig, Attributes, Engine, FrameStack, Value, VariableFrame};
use serde_json::{json, Value as JsonValue};
use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// メモリ上のフレームスタックを持つエンジン
pub struct TestEngine {
    pub stack: Mutex<FrameStack>,
    pub aborts: AtomicUsize,
}

impl TestEngine {
    pub fn new() -> Self {
        let mut stack = FrameStack::new(VariableFrame::new().with("${x}", Value::Int(1)));
        stack.push_suite(VariableFrame::new());
        stack.push_test(VariableFrame::new());
        stack.push_local(VariableFrame::new().with("${arg}", Value::str("a")));
        Self {
            stack: Mutex::new(stack),
            aborts: AtomicUsize::new(0),
        }
    }

    pub fn aborts(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }
}

impl Engine for TestEngine {
    fn name_and_version(&self) -> String {
        "Test Engine 1.0".to_string()
    }

    fn with_variables(&self, f: &mut dyn FnMut(&mut FrameStack)) {
        f(&mut *self.stack.lock());
    }

    fn run_keyword_and_return_status(&self, name: &str, args: &[String]) -> Result<bool, String> {
        match name {
            "Fail" => Err(format!("keyword failed: {}", args.join(" "))),
            _ => Ok(args.first().map(String::as_str) == Some("1")),
        }
    }

    fn request_abort(&self) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
    }

    fn is_logged(&self, level: &str) -> bool {
        level != "TRACE"
    }
}

/// 属性を作る
pub fn attrs(value: JsonValue) -> Attributes {
    match value {
        JsonValue::Object(map) => map,
        other => panic!("attributes must be an object, got {}", other),
    }
}

/// 偽ピア（リモートコントローラ）
pub struct FakePeer {
    listener: TcpListener,
}

impl FakePeer {
    pub fn bind() -> Self {
        Self {
            listener: TcpListener::bind("127.0.0.1:0").expect("Failed to bind fake peer"),
        }
    }

    pub fn config(&self) -> AgentConfig {
        AgentConfig::new(self.listener.local_addr().unwrap().port())
            .with_host("127.0.0.1")
            .with_connect_timeout(Duration::from_secs(5))
            .with_retry_interval(Duration::from_millis(50))
    }

    pub fn accept(&self) -> PeerConnection {
        let (stream, _) = self.listener.accept().expect("Agent did not connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        PeerConnection {
            reader: BufReader::new(stream.try_clone().unwrap()),
            writer: stream,
        }
    }
}

/// 受け入れた接続
pub struct PeerConnection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl PeerConnection {
    /// 1メッセージ受信して `(kind, payload)` を返す（EOFなら `None`）
    pub fn try_recv(&mut self) -> Option<(String, JsonValue)> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).expect("Failed to read from agent") == 0 {
            return None;
        }
        let value: JsonValue = serde_json::from_str(&line).expect("Agent sent invalid JSON");
        let (kind, payload) = value
            .as_object()
            .and_then(|o| o.iter().next())
            .map(|(k, v)| (k.clone(), v.clone()))
            .expect("Agent sent a message without kind");
        Some((kind, payload))
    }

    /// 指定した種別のメッセージを受信してペイロードを返す
    pub fn expect(&mut self, kind: &str) -> JsonValue {
        let (actual, payload) = self.try_recv().expect("Agent closed the connection");
        assert_eq!(actual, kind, "unexpected message {}: {}", actual, payload);
        payload
    }

    pub fn send(&mut self, kind: &str, payload: JsonValue) {
        let mut message = serde_json::Map::new();
        message.insert(kind.to_string(), payload);
        let line = format!("{}\n", JsonValue::Object(message));
        self.writer.write_all(line.as_bytes()).unwrap();
        self.writer.flush().unwrap();
    }

    /// 任意の1行をそのまま送る
    pub fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).unwrap();
        self.writer.write_all(b"\n").unwrap();
        self.writer.flush().unwrap();
    }

    /// ソケットを閉じる
    pub fn shutdown(&self) {
        self.writer.shutdown(Shutdown::Both).unwrap();
    }

    /// 残りのメッセージをEOFまで読む
    pub fn drain(&mut self) -> Vec<String> {
        let mut kinds = Vec::new();
        while let Some((kind, _)) = self.try_recv() {
            kinds.push(kind);
        }
        kinds
    }

    /// ハンドシェイクを行い、制御ポートを返す
    pub fn handshake(&mut self, mode: &str) -> u16 {
        self.expect("agent_initializing");
        self.send(
            "operating_mode",
            json!({"mode": mode, "wait_for_start_allowance": true}),
        );
        let version = self.expect("version");
        assert_eq!(version[0]["protocol"], 2);
        self.send("protocol_version", json!({"is_correct": true, "error": ""}));
        self.expect("ready_to_start");
        self.send("do_start", json!([]));

        let port = self.expect("port");
        port[0].as_u64().expect("port must be a number") as u16
    }
}
