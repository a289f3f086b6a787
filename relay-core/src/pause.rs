//! 一時停止プロトコル
//!
//! キーワード境界でピアに続行してよいかを問い合わせ、一時停止中は
//! メインチャネル上で再開・終了・切断の指示を待ちます。待機中は
//! 変数の書き換え要求を受け付け、そのたびに最新のスナップショットを返します。

use crate::session::print_error;
use crate::{Engine, OperatingMode, Session};
use relay_debug::KeywordDebugger;
use relay_vars::{apply_mutation, ChangeRequest, MutationError, ScopeCollector};
use relay_wire::{EventKind, Message, PeerKind};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

/// 受信待ちのポーリング間隔
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// 一時停止ポイント
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PausingPoint {
    /// キーワード本体の実行前
    PreStartKeyword,
    /// `start_keyword` イベントの送信後
    StartKeyword,
    /// キーワード本体の実行後
    PreEndKeyword,
    /// `end_keyword` イベントの送信後
    EndKeyword,
}

impl PausingPoint {
    pub fn as_str(self) -> &'static str {
        match self {
            PausingPoint::PreStartKeyword => "PRE_START_KEYWORD",
            PausingPoint::StartKeyword => "START_KEYWORD",
            PausingPoint::PreEndKeyword => "PRE_END_KEYWORD",
            PausingPoint::EndKeyword => "END_KEYWORD",
        }
    }

    /// ブレークポイント条件の評価を受け付けるかどうか
    pub fn accepts_condition(self) -> bool {
        matches!(self, PausingPoint::PreStartKeyword | PausingPoint::PreEndKeyword)
    }
}

/// 一時停止プロトコルの1回分の実行に必要なもの
pub(crate) struct PauseProtocol<'a, E: Engine> {
    pub session: &'a Session,
    pub debugger: &'a KeywordDebugger,
    pub engine: &'a E,
    pub collector: &'a ScopeCollector,
}

impl<'a, E: Engine> PauseProtocol<'a, E> {
    /// ピアに一時停止するかどうかを問い合わせる
    pub fn should_pause(&self, point: PausingPoint) -> bool {
        if !self.session.is_open() || self.debugger.is_killed() {
            return false;
        }
        self.session.emit(&Message::event(
            EventKind::ShouldContinue,
            vec![json!({"pausing_point": point.as_str()})],
        ));

        let mut expected = vec![
            PeerKind::Continue,
            PeerKind::Pause,
            PeerKind::Terminate,
            PeerKind::Disconnect,
        ];
        if self.session.mode() == OperatingMode::Debug && point.accepts_condition() {
            expected.push(PeerKind::EvaluateCondition);
        }

        let Some(message) = self.await_message(&expected, || self.debugger.is_killed()) else {
            return false;
        };
        match message.peer_kind() {
            Some(PeerKind::Pause) => true,
            Some(PeerKind::Terminate) => {
                self.terminate();
                false
            }
            Some(PeerKind::Disconnect) => {
                self.disconnect();
                false
            }
            Some(PeerKind::EvaluateCondition) => self.evaluate_condition(message.into_payload()),
            _ => false,
        }
    }

    /// 再開されるまでピアの指示を処理する
    ///
    /// 呼び出し時点でデバッガは一時停止状態でなければなりません。
    /// 制御リスナーから再開された場合もループを抜けます。
    pub fn wait_for_resume(&self) {
        if !self.session.is_open() {
            return;
        }
        let mut expected = vec![PeerKind::Resume, PeerKind::Terminate, PeerKind::Disconnect];
        if self.session.mode() == OperatingMode::Debug {
            expected.push(PeerKind::ChangeVariable);
        }

        self.send_variables(None);
        loop {
            self.session.emit(&Message::bare(EventKind::Paused));

            let Some(message) = self.await_message(&expected, || !self.debugger.is_paused()) else {
                if self.session.is_open() {
                    debug!("resumed through the control channel");
                    self.session.emit(&Message::bare(EventKind::Resumed));
                } else {
                    // セッションが失われたら実行を止めたままにしない
                    self.debugger.resume();
                }
                return;
            };

            match message.peer_kind() {
                Some(PeerKind::Resume) => {
                    self.debugger.resume();
                    self.session.emit(&Message::bare(EventKind::Resumed));
                    return;
                }
                Some(PeerKind::Terminate) => {
                    self.terminate();
                    return;
                }
                Some(PeerKind::Disconnect) => {
                    self.disconnect();
                    return;
                }
                Some(PeerKind::ChangeVariable) => self.change_variable(message.into_payload()),
                _ => {}
            }
        }
    }

    /// 期待する種別のメッセージを待つ
    ///
    /// `interrupted` が真になるか、セッションが失われた場合は `None` を返します。
    fn await_message(&self, expected: &[PeerKind], interrupted: impl Fn() -> bool) -> Option<Message> {
        loop {
            if !self.session.is_open() || interrupted() {
                return None;
            }
            match self.session.channel().receive_within(Some(POLL_INTERVAL)) {
                Ok(Some(message)) => match message.peer_kind() {
                    Some(kind) if expected.contains(&kind) => return Some(message),
                    _ => debug!("ignoring '{}' while waiting for {:?}", message.kind(), expected),
                },
                Ok(None) => {}
                Err(e) => {
                    self.session.fail(&e);
                    return None;
                }
            }
        }
    }

    fn terminate(&self) {
        info!("terminate requested by peer");
        self.engine.request_abort();
        self.debugger.kill();
    }

    fn disconnect(&self) {
        info!("peer disconnected, continuing unobserved");
        self.session.close();
        self.debugger.resume();
    }

    fn evaluate_condition(&self, payload: Value) -> bool {
        let outcome = match parse_condition(payload) {
            Some((keyword, args)) => self.engine.run_keyword_and_return_status(&keyword, &args),
            None => Err("condition must name a keyword".to_string()),
        };

        match outcome {
            Ok(result) => {
                debug!("breakpoint condition evaluated to {}", result);
                self.session.emit(&Message::event(
                    EventKind::ConditionResult,
                    vec![json!({"result": result})],
                ));
                result
            }
            Err(e) => {
                let error = format!("Error occurred when evaluating breakpoint condition. {}", e);
                warn!("{}", error);
                self.session.emit(&Message::event(
                    EventKind::ConditionResult,
                    vec![json!({"error": error})],
                ));
                false
            }
        }
    }

    fn change_variable(&self, payload: Value) {
        let request: ChangeRequest = match serde_json::from_value(unwrap_single(payload)) {
            Ok(request) => request,
            Err(e) => {
                let error = format!("Unable to change value of variable. {}", e);
                print_error(&error);
                self.send_variables(Some(&error));
                return;
            }
        };

        let mut outcome = Ok(());
        self.engine
            .with_variables(&mut |stack| outcome = apply_mutation(stack, &request));

        match outcome {
            Ok(()) => self.send_variables(None),
            Err(e) => {
                let error = describe_mutation_error(&request.name, &e);
                print_error(&error);
                self.send_variables(Some(&error));
            }
        }
    }

    /// 変数スナップショットを送る
    pub fn send_variables(&self, error: Option<&str>) {
        let mut frames = Vec::new();
        self.engine
            .with_variables(&mut |stack| frames = self.collector.collect(stack));

        let var_scopes = match serde_json::to_value(&frames) {
            Ok(value) => value,
            Err(e) => {
                warn!("failed to encode variables: {}", e);
                return;
            }
        };
        let payload = match error {
            Some(error) => json!({"var_scopes": var_scopes, "error": error}),
            None => json!({"var_scopes": var_scopes}),
        };
        self.session
            .emit(&Message::event(EventKind::Variables, vec![payload]));
    }
}

/// `[keyword, args...]` を分解する
fn parse_condition(payload: Value) -> Option<(String, Vec<String>)> {
    let Value::Array(items) = payload else {
        return None;
    };
    let mut items = items.into_iter().map(|item| match item {
        Value::String(s) => s,
        other => other.to_string(),
    });
    let keyword = items.next()?;
    Some((keyword, items.collect()))
}

/// 要素1つの配列で包まれたペイロードを取り出す
fn unwrap_single(payload: Value) -> Value {
    match payload {
        Value::Array(mut items) if items.len() == 1 => items.remove(0),
        other => other,
    }
}

fn describe_mutation_error(name: &str, err: &MutationError) -> String {
    match err {
        MutationError::InvalidScope { .. } => err.to_string(),
        _ => format!("Unable to change value of variable {}. {}", name, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pausing_point_names() {
        assert_eq!(PausingPoint::PreStartKeyword.as_str(), "PRE_START_KEYWORD");
        assert_eq!(PausingPoint::EndKeyword.as_str(), "END_KEYWORD");
        assert!(PausingPoint::PreEndKeyword.accepts_condition());
        assert!(!PausingPoint::StartKeyword.accepts_condition());
    }

    #[test]
    fn test_parse_condition() {
        assert_eq!(
            parse_condition(json!(["Should Be Equal", "${x}", 2])),
            Some(("Should Be Equal".to_string(), vec!["${x}".to_string(), "2".to_string()]))
        );
        assert_eq!(parse_condition(json!([])), None);
        assert_eq!(parse_condition(json!({"keyword": "x"})), None);
    }

    #[test]
    fn test_unwrap_single() {
        assert_eq!(unwrap_single(json!([{"a": 1}])), json!({"a": 1}));
        assert_eq!(unwrap_single(json!({"a": 1})), json!({"a": 1}));
    }

    #[test]
    fn test_mutation_error_description() {
        let scope = MutationError::InvalidScope {
            name: "${x}".to_string(),
            scope: "keyword".to_string(),
        };
        assert_eq!(
            describe_mutation_error("${x}", &scope),
            "Unable to change value of variable ${x} inside unrecognized scope keyword"
        );
        let missing = MutationError::UnknownVariable("${y}".to_string());
        assert!(describe_mutation_error("${y}", &missing).starts_with("Unable to change value of variable ${y}. "));
    }
}
