//! キーワード単位のデバッガ状態機械

use crate::ControlCommand;
use parking_lot::{Condvar, Mutex};
use std::time::Duration;
use tracing::debug;

/// デバッガのモード
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebuggerMode {
    /// 通常実行
    Running,
    /// 一時停止中（実行スレッドはキーワード開始時にブロックする）
    Paused,
    /// 次のキーワード開始で一時停止する
    StepNext,
    /// 次のキーワードが終わった時点で一時停止する
    StepOver,
}

/// デバッガの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebuggerState {
    pub mode: DebuggerMode,
    /// 実行中のキーワードの入れ子の深さ
    pub keyword_depth: usize,
    /// この深さに戻ったら一時停止する
    pub pause_at_depth: Option<usize>,
    pub pause_on_failure: bool,
    /// `kill` を受け取ったかどうか（以降は一時停止しない）
    pub killed: bool,
}

impl DebuggerState {
    fn new(pause_on_failure: bool) -> Self {
        Self {
            mode: DebuggerMode::Running,
            keyword_depth: 0,
            pause_at_depth: None,
            pause_on_failure,
            killed: false,
        }
    }
}

/// キーワードデバッガ
///
/// 状態は1つのミューテックスで保護されます。実行スレッドは一時停止中に
/// 条件変数で待機し、外部コマンドのたびに起こされます。
pub struct KeywordDebugger {
    state: Mutex<DebuggerState>,
    changed: Condvar,
}

impl KeywordDebugger {
    /// 新しいデバッガを作成する
    pub fn new(pause_on_failure: bool) -> Self {
        Self {
            state: Mutex::new(DebuggerState::new(pause_on_failure)),
            changed: Condvar::new(),
        }
    }

    /// 状態のコピーを取得する
    pub fn state(&self) -> DebuggerState {
        *self.state.lock()
    }

    /// 一時停止中かどうか
    pub fn is_paused(&self) -> bool {
        self.state.lock().mode == DebuggerMode::Paused
    }

    /// `kill` を受け取ったかどうか
    pub fn is_killed(&self) -> bool {
        self.state.lock().killed
    }

    /// 現在のキーワードの深さ
    pub fn depth(&self) -> usize {
        self.state.lock().keyword_depth
    }

    /// 一時停止する
    pub fn pause(&self) {
        self.transition(|state| {
            if !state.killed {
                state.mode = DebuggerMode::Paused;
            }
        });
    }

    /// 実行を再開する
    pub fn resume(&self) {
        self.transition(|state| {
            state.mode = DebuggerMode::Running;
            state.pause_at_depth = None;
        });
    }

    /// 次のキーワードの中で停止する
    pub fn step_next(&self) {
        self.transition(|state| {
            if !state.killed {
                state.mode = DebuggerMode::StepNext;
            }
        });
    }

    /// 現在のキーワードをまたいで停止する
    pub fn step_over(&self) {
        self.transition(|state| {
            if !state.killed {
                state.mode = DebuggerMode::StepOver;
            }
        });
    }

    /// 失敗時の一時停止を切り替える
    pub fn set_pause_on_failure(&self, enabled: bool) {
        self.transition(|state| state.pause_on_failure = enabled);
    }

    /// 強制終了を記録し、待機中の実行スレッドを解放する
    pub fn kill(&self) {
        self.transition(|state| {
            state.killed = true;
            state.mode = DebuggerMode::Running;
            state.pause_at_depth = None;
        });
    }

    /// 制御コマンドを適用する
    pub fn apply(&self, command: ControlCommand) {
        match command {
            ControlCommand::Kill => self.kill(),
            ControlCommand::Pause => self.pause(),
            ControlCommand::Resume => self.resume(),
            ControlCommand::StepNext => self.step_next(),
            ControlCommand::StepOver => self.step_over(),
            ControlCommand::PauseOnFailure => self.set_pause_on_failure(true),
            ControlCommand::DoNotPauseOnFailure => self.set_pause_on_failure(false),
        }
    }

    fn transition(&self, f: impl FnOnce(&mut DebuggerState)) {
        let mut state = self.state.lock();
        f(&mut state);
        debug!("debugger state: {:?}", *state);
        self.changed.notify_all();
    }

    /// キーワード開始時に呼ぶ
    ///
    /// 一時停止中は再開されるまでブロックします。
    pub fn on_keyword_start(&self) {
        let mut state = self.state.lock();
        while state.mode == DebuggerMode::Paused && !state.killed {
            self.changed.wait(&mut state);
        }

        match state.mode {
            DebuggerMode::StepNext => state.mode = DebuggerMode::Paused,
            DebuggerMode::StepOver => {
                state.pause_at_depth = Some(state.keyword_depth);
                state.mode = DebuggerMode::Running;
            }
            DebuggerMode::Running | DebuggerMode::Paused => {}
        }
        state.keyword_depth += 1;
    }

    /// キーワード終了時に呼ぶ
    ///
    /// 一時停止状態に入った場合は `true` を返します。
    pub fn on_keyword_end(&self, passed: bool) -> bool {
        let mut state = self.state.lock();
        state.keyword_depth = state.keyword_depth.saturating_sub(1);

        let reached = state.pause_at_depth == Some(state.keyword_depth);
        let failed = state.pause_on_failure && !passed;
        if (reached || failed) && !state.killed {
            debug!(
                "pausing at depth {} (step over: {}, failure: {})",
                state.keyword_depth, reached, failed
            );
            state.mode = DebuggerMode::Paused;
        }
        state.mode == DebuggerMode::Paused
    }

    /// 一時停止が解除されるまで最大 `timeout` 待つ
    ///
    /// 戻り値は、待機後もまだ一時停止中かどうかです。
    pub fn wait_while_paused(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if state.mode == DebuggerMode::Paused && !state.killed {
            self.changed.wait_for(&mut state, timeout);
        }
        state.mode == DebuggerMode::Paused && !state.killed
    }
}

impl Default for KeywordDebugger {
    fn default() -> Self {
        Self::new(false)
    }
}
