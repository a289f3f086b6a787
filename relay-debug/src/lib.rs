//! Relay デバッガ
//!
//! このクレートは、キーワード単位の一時停止・再開・ステップ実行を管理する
//! 状態機械と、外部から状態機械を操作するための制御リスナーを提供します。
//! 状態機械は実行スレッドと制御リスナースレッドの両方から操作されるため、
//! すべての遷移は1つのミューテックスの下で行われます。

pub mod command;
pub mod debugger;
pub mod listener;

pub use command::{ControlCommand, UnknownCommand};
pub use debugger::{DebuggerMode, DebuggerState, KeywordDebugger};
pub use listener::{AbortHandle, ControlListener};

/// 制御リスナーの結果型
pub type Result<T> = std::result::Result<T, std::io::Error>;
