//! ワイヤメッセージ

use serde_json::Value;

/// ワイヤメッセージ
///
/// 種別（kind）とペイロードの組です。ワイヤ上では `{"<kind>": <payload>}` という
/// キーが1つだけのJSONオブジェクトになります。
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    kind: String,
    payload: Value,
}

impl Message {
    /// 任意の種別とペイロードからメッセージを作成する
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// エージェントイベントを作成する
    ///
    /// リスナーコールバックの引数列がそのままJSON配列のペイロードになります。
    pub fn event(kind: EventKind, args: Vec<Value>) -> Self {
        Self::new(kind.as_str(), Value::Array(args))
    }

    /// 引数なしのエージェントイベントを作成する
    pub fn bare(kind: EventKind) -> Self {
        Self::event(kind, Vec::new())
    }

    /// 種別を取得する
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// ペイロードを取得する
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// ペイロードを取り出す
    pub fn into_payload(self) -> Value {
        self.payload
    }

    /// ピアからのメッセージ種別として解釈する
    pub fn peer_kind(&self) -> Option<PeerKind> {
        PeerKind::parse(&self.kind)
    }
}

/// エージェント → ピアのイベント種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    AgentInitializing,
    Version,
    ReadyToStart,
    Port,
    StartSuite,
    EndSuite,
    StartTest,
    EndTest,
    PreStartKeyword,
    StartKeyword,
    PreEndKeyword,
    EndKeyword,
    ShouldContinue,
    ConditionResult,
    Variables,
    Paused,
    Resumed,
    ResourceImport,
    LibraryImport,
    KeywordSource,
    Message,
    LogMessage,
    LogFile,
    OutputFile,
    ReportFile,
    Close,
}

impl EventKind {
    /// ワイヤ上の名前
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::AgentInitializing => "agent_initializing",
            EventKind::Version => "version",
            EventKind::ReadyToStart => "ready_to_start",
            EventKind::Port => "port",
            EventKind::StartSuite => "start_suite",
            EventKind::EndSuite => "end_suite",
            EventKind::StartTest => "start_test",
            EventKind::EndTest => "end_test",
            EventKind::PreStartKeyword => "pre_start_keyword",
            EventKind::StartKeyword => "start_keyword",
            EventKind::PreEndKeyword => "pre_end_keyword",
            EventKind::EndKeyword => "end_keyword",
            EventKind::ShouldContinue => "should_continue",
            EventKind::ConditionResult => "condition_result",
            EventKind::Variables => "vars",
            EventKind::Paused => "paused",
            EventKind::Resumed => "resumed",
            EventKind::ResourceImport => "resource_import",
            EventKind::LibraryImport => "library_import",
            EventKind::KeywordSource => "keyword_source",
            EventKind::Message => "message",
            EventKind::LogMessage => "log_message",
            EventKind::LogFile => "log_file",
            EventKind::OutputFile => "output_file",
            EventKind::ReportFile => "report_file",
            EventKind::Close => "close",
        }
    }
}

/// ピア → エージェントのメッセージ種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerKind {
    OperatingMode,
    ProtocolVersion,
    DoStart,
    Continue,
    Pause,
    Resume,
    Terminate,
    Disconnect,
    EvaluateCondition,
    ChangeVariable,
}

impl PeerKind {
    /// ワイヤ上の名前
    pub fn as_str(self) -> &'static str {
        match self {
            PeerKind::OperatingMode => "operating_mode",
            PeerKind::ProtocolVersion => "protocol_version",
            PeerKind::DoStart => "do_start",
            PeerKind::Continue => "continue",
            PeerKind::Pause => "pause",
            PeerKind::Resume => "resume",
            PeerKind::Terminate => "terminate",
            PeerKind::Disconnect => "disconnect",
            PeerKind::EvaluateCondition => "evaluate_condition",
            PeerKind::ChangeVariable => "change_variable",
        }
    }

    /// ワイヤ上の名前から種別を取得する
    pub fn parse(name: &str) -> Option<Self> {
        let kind = match name {
            "operating_mode" => PeerKind::OperatingMode,
            "protocol_version" => PeerKind::ProtocolVersion,
            "do_start" => PeerKind::DoStart,
            "continue" => PeerKind::Continue,
            "pause" => PeerKind::Pause,
            "resume" => PeerKind::Resume,
            "terminate" => PeerKind::Terminate,
            "disconnect" => PeerKind::Disconnect,
            "evaluate_condition" => PeerKind::EvaluateCondition,
            "change_variable" => PeerKind::ChangeVariable,
            _ => return None,
        };
        Some(kind)
    }
}
