//! 制御コマンド

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// 制御ポートで受け付けるコマンド
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlCommand {
    /// 実行を強制終了
    Kill,
    /// 次のキーワード境界で一時停止
    Pause,
    /// 実行再開
    Resume,
    /// 次のキーワードの中で停止
    StepNext,
    /// 現在のキーワードが終わったら停止
    StepOver,
    /// 失敗時に一時停止する
    PauseOnFailure,
    /// 失敗時に一時停止しない
    DoNotPauseOnFailure,
}

/// 不明なコマンド
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown control command '{0}'")]
pub struct UnknownCommand(pub String);

impl ControlCommand {
    /// すべてのコマンド
    pub const ALL: [ControlCommand; 7] = [
        ControlCommand::Kill,
        ControlCommand::Pause,
        ControlCommand::Resume,
        ControlCommand::StepNext,
        ControlCommand::StepOver,
        ControlCommand::PauseOnFailure,
        ControlCommand::DoNotPauseOnFailure,
    ];

    /// コマンド文字列をパースする
    ///
    /// 前後の空白と改行は無視します。
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim() {
            "kill" => Some(ControlCommand::Kill),
            "pause" => Some(ControlCommand::Pause),
            "resume" => Some(ControlCommand::Resume),
            "step_next" => Some(ControlCommand::StepNext),
            "step_over" => Some(ControlCommand::StepOver),
            "pause_on_failure" => Some(ControlCommand::PauseOnFailure),
            "do_not_pause_on_failure" => Some(ControlCommand::DoNotPauseOnFailure),
            _ => None,
        }
    }

    /// ワイヤ上のトークン
    pub fn as_str(self) -> &'static str {
        match self {
            ControlCommand::Kill => "kill",
            ControlCommand::Pause => "pause",
            ControlCommand::Resume => "resume",
            ControlCommand::StepNext => "step_next",
            ControlCommand::StepOver => "step_over",
            ControlCommand::PauseOnFailure => "pause_on_failure",
            ControlCommand::DoNotPauseOnFailure => "do_not_pause_on_failure",
        }
    }
}

impl FromStr for ControlCommand {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| UnknownCommand(s.trim().to_string()))
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
