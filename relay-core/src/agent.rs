//! デバッグエージェント本体

use crate::library::normalize_source;
use crate::pause::PauseProtocol;
use crate::{
    AgentConfig, Attributes, Engine, EventSink, ExecutionListener, LibraryImportProxy,
    LibraryResolver, OperatingMode, PausingPoint, Result, Session,
};
use relay_debug::{AbortHandle, ControlListener, KeywordDebugger};
use relay_vars::{truncate, ScopeCollector};
use relay_wire::{EventKind, Message};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// `message` コールバックで転送するレベル
const FORWARDED_MESSAGE_LEVELS: [&str; 3] = ["ERROR", "FAIL", "NONE"];

/// デバッグエージェント
///
/// エンジンのライフサイクルコールバックをプロトコルメッセージに変換し、
/// キーワード境界でデバッガに問い合わせて必要なら実行を止めます。
/// 接続に失敗した場合やピアが切断した後は、すべてのコールバックが何もしません。
pub struct Agent<E: Engine> {
    config: AgentConfig,
    engine: Arc<E>,
    session: Option<Arc<Session>>,
    debugger: Arc<KeywordDebugger>,
    control: Option<ControlListener>,
    collector: ScopeCollector,
    last_pause_check: Instant,
}

impl<E: Engine> Agent<E> {
    /// ピアに接続してエージェントを開始する
    ///
    /// 接続やハンドシェイクに失敗してもエンジンの実行は止めず、
    /// 切り離された状態のエージェントを返します。
    pub fn start(config: AgentConfig, engine: Arc<E>) -> Self {
        let mut agent = Self::detached(config, engine);
        match Session::establish(&agent.config, &agent.engine.name_and_version()) {
            Ok(session) => {
                if let Err(e) = agent.attach(session) {
                    error!("failed to attach agent: {}", e);
                }
            }
            Err(e) => error!("agent not connected: {}", e),
        }
        agent
    }

    /// 接続していないエージェントを作成する
    pub fn detached(config: AgentConfig, engine: Arc<E>) -> Self {
        let debugger = Arc::new(KeywordDebugger::new(config.pause_on_failure));
        let collector = ScopeCollector::new(config.max_value_length);
        Self {
            config,
            engine,
            session: None,
            debugger,
            control: None,
            collector,
            last_pause_check: Instant::now(),
        }
    }

    /// 確立済みのセッションをつなぎ、制御リスナーを開始する
    ///
    /// 制御リスナーのポートは `port` イベントでピアに通知します。
    pub fn attach(&mut self, session: Session) -> Result<()> {
        let session = Arc::new(session);
        let on_kill: AbortHandle = {
            let engine = Arc::clone(&self.engine);
            Arc::new(move || engine.request_abort())
        };
        let control = ControlListener::bind(&self.config.control_host, Arc::clone(&self.debugger), on_kill)
            .map_err(crate::AgentError::Control);

        let control = match control {
            Ok(control) => control,
            Err(e) => {
                session.close();
                return Err(e);
            }
        };

        session.emit(&Message::event(EventKind::Port, vec![json!(control.port())]));
        info!("agent attached, control port {}", control.port());
        self.control = Some(control);
        self.session = Some(session);
        Ok(())
    }

    /// ピアとのセッションが生きているかどうか
    pub fn is_attached(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_open())
    }

    /// 動作モード（切り離されていれば `None`）
    pub fn mode(&self) -> Option<OperatingMode> {
        self.live_session().map(|s| s.mode())
    }

    /// デバッガ
    pub fn debugger(&self) -> &Arc<KeywordDebugger> {
        &self.debugger
    }

    /// 制御リスナーのポート
    pub fn control_port(&self) -> Option<u16> {
        self.control.as_ref().map(ControlListener::port)
    }

    /// セッションを送信先にしたライブラリインポートプロキシを作成する
    pub fn library_proxy<R: LibraryResolver>(&self, resolver: Arc<R>) -> LibraryImportProxy<R> {
        let proxy = LibraryImportProxy::new(resolver, self.config.library_timeout);
        match &self.session {
            Some(session) => {
                let sink: Arc<dyn EventSink> = session.clone();
                proxy.with_sink(sink)
            }
            None => proxy,
        }
    }

    fn live_session(&self) -> Option<&Session> {
        self.session.as_deref().filter(|s| s.is_open())
    }

    fn send(&self, kind: EventKind, args: Vec<Value>) {
        if let Some(session) = self.live_session() {
            session.emit(&Message::event(kind, args));
        }
    }

    fn protocol<'a>(&'a self, session: &'a Session) -> PauseProtocol<'a, E> {
        PauseProtocol {
            session,
            debugger: self.debugger.as_ref(),
            engine: self.engine.as_ref(),
            collector: &self.collector,
        }
    }

    /// 一時停止ポイントで問い合わせ、必要なら一時停止する
    fn check_pausing_point(&self, point: PausingPoint) {
        let Some(session) = self.live_session() else {
            return;
        };
        let protocol = self.protocol(session);
        if protocol.should_pause(point) {
            self.debugger.pause();
            protocol.wait_for_resume();
        }
    }

    /// デバッガが一時停止状態なら、再開されるまで一時停止プロトコルを回す
    ///
    /// ピアがいなければ誰も再開できないので、一時停止を解除します。
    fn serve_pending_pause(&mut self) {
        while self.debugger.is_paused() {
            match self.live_session() {
                Some(session) => self.protocol(session).wait_for_resume(),
                None => {
                    self.detach_if_lost();
                    debug!("no peer to serve the pause, resuming");
                    self.debugger.resume();
                    return;
                }
            }
        }
    }

    /// セッションが失われていれば制御リスナーを止めて切り離す
    ///
    /// リスナーを止めてからデバッガを再開するため、以降は一時停止しません。
    fn detach_if_lost(&mut self) {
        let lost = self.session.as_ref().is_some_and(|s| !s.is_open());
        if !lost {
            return;
        }
        self.session = None;
        if let Some(mut control) = self.control.take() {
            control.shutdown();
        }
        self.debugger.resume();
        info!("session lost, continuing unobserved");
    }

    fn should_ask_on_start(&mut self) -> bool {
        match self.mode() {
            Some(OperatingMode::Debug) => true,
            Some(OperatingMode::Run) => {
                if self.last_pause_check.elapsed() > self.config.run_mode_pause_check {
                    self.last_pause_check = Instant::now();
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }
}

fn keyword_payload(name: &str, attrs: &Attributes) -> Vec<Value> {
    let mut attrs = attrs.clone();
    for key in ["args", "doc", "assign"] {
        attrs.remove(key);
    }
    vec![json!(name), Value::Object(attrs)]
}

fn suite_payload(name: &str, attrs: &Attributes) -> Vec<Value> {
    let mut shaped = attrs.clone();
    shaped.remove("doc");
    let is_dir = attrs
        .get("source")
        .and_then(Value::as_str)
        .is_some_and(|source| Path::new(source).is_dir());
    shaped.insert("is_dir".to_string(), json!(is_dir));
    vec![json!(name), Value::Object(shaped)]
}

fn test_payload(name: &str, attrs: &Attributes) -> Vec<Value> {
    let mut shaped = attrs.clone();
    shaped.remove("doc");
    vec![json!(name), Value::Object(shaped)]
}

impl<E: Engine> ExecutionListener for Agent<E> {
    fn start_suite(&mut self, name: &str, attrs: &Attributes) {
        self.detach_if_lost();
        self.send(EventKind::StartSuite, suite_payload(name, attrs));
    }

    fn end_suite(&mut self, name: &str, attrs: &Attributes) {
        self.detach_if_lost();
        self.send(EventKind::EndSuite, suite_payload(name, attrs));
    }

    fn start_test(&mut self, name: &str, attrs: &Attributes) {
        self.detach_if_lost();
        self.send(EventKind::StartTest, test_payload(name, attrs));
    }

    fn end_test(&mut self, name: &str, attrs: &Attributes) {
        self.detach_if_lost();
        self.send(EventKind::EndTest, test_payload(name, attrs));
    }

    fn start_keyword(&mut self, name: &str, attrs: &Attributes) {
        self.detach_if_lost();
        let payload = keyword_payload(name, attrs);
        let debug_mode = self.mode() == Some(OperatingMode::Debug);

        if debug_mode {
            self.send(EventKind::PreStartKeyword, payload.clone());
            self.check_pausing_point(PausingPoint::PreStartKeyword);
        }
        self.send(EventKind::StartKeyword, payload);
        if self.should_ask_on_start() {
            self.check_pausing_point(PausingPoint::StartKeyword);
        }

        self.serve_pending_pause();
        self.debugger.on_keyword_start();
    }

    fn end_keyword(&mut self, name: &str, attrs: &Attributes) {
        self.detach_if_lost();
        let passed = attrs.get("status").and_then(Value::as_str) == Some("PASS");
        if self.debugger.on_keyword_end(passed) {
            debug!("keyword '{}' ended in paused state", name);
        }

        let payload = keyword_payload(name, attrs);
        let debug_mode = self.mode() == Some(OperatingMode::Debug);

        if debug_mode {
            self.send(EventKind::PreEndKeyword, payload.clone());
            self.check_pausing_point(PausingPoint::PreEndKeyword);
        }
        self.send(EventKind::EndKeyword, payload);
        if debug_mode {
            self.check_pausing_point(PausingPoint::EndKeyword);
        }

        self.serve_pending_pause();
    }

    fn message(&mut self, message: &Attributes) {
        let level = message.get("level").and_then(Value::as_str).unwrap_or_default();
        if FORWARDED_MESSAGE_LEVELS.contains(&level) {
            self.send(EventKind::Message, vec![Value::Object(message.clone())]);
        }
    }

    fn log_message(&mut self, message: &Attributes) {
        let level = message.get("level").and_then(Value::as_str).unwrap_or_default();
        if !self.engine.is_logged(level) {
            return;
        }
        let mut shaped = message.clone();
        if let Some(text) = message.get("message").and_then(Value::as_str) {
            shaped.insert(
                "message".to_string(),
                json!(truncate(self.config.max_value_length, text)),
            );
        }
        self.send(EventKind::LogMessage, vec![Value::Object(shaped)]);
    }

    fn library_import(&mut self, name: &str, attrs: &Attributes) {
        let mut shaped = attrs.clone();
        if let Some(path) = attrs
            .get("source")
            .and_then(Value::as_str)
            .and_then(normalize_source)
        {
            shaped.insert("source".to_string(), json!(path));
        }
        self.send(EventKind::LibraryImport, vec![json!(name), Value::Object(shaped)]);
    }

    fn resource_import(&mut self, name: &str, attrs: &Attributes) {
        self.send(
            EventKind::ResourceImport,
            vec![json!(name), Value::Object(attrs.clone())],
        );
    }

    fn log_file(&mut self, path: &str) {
        self.send(EventKind::LogFile, vec![json!(path)]);
    }

    fn output_file(&mut self, path: &str) {
        self.send(EventKind::OutputFile, vec![json!(path)]);
    }

    fn report_file(&mut self, path: &str) {
        self.send(EventKind::ReportFile, vec![json!(path)]);
    }

    fn close(&mut self) {
        self.send(EventKind::Close, Vec::new());
        if let Some(session) = self.session.take() {
            session.close();
        }
        if let Some(mut control) = self.control.take() {
            control.shutdown();
        }
        info!("agent closed");
    }
}
