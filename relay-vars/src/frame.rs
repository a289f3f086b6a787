//! 変数フレームとフレームスタック

use crate::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// スコープラベル（変数の可視範囲の階層）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeLabel {
    Global,
    Suite,
    Test,
    Local,
}

impl ScopeLabel {
    /// ワイヤ上の名前
    pub fn as_str(self) -> &'static str {
        match self {
            ScopeLabel::Global => "global",
            ScopeLabel::Suite => "suite",
            ScopeLabel::Test => "test",
            ScopeLabel::Local => "local",
        }
    }

    /// スコープ名をパースする
    ///
    /// 旧プロトコルの `test_case` / `test_suite` も受け付けます。
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "global" => Some(ScopeLabel::Global),
            "suite" | "test_suite" => Some(ScopeLabel::Suite),
            "test" | "test_case" => Some(ScopeLabel::Test),
            "local" => Some(ScopeLabel::Local),
            _ => None,
        }
    }
}

impl fmt::Display for ScopeLabel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 変数フレーム（変数名 → 値、挿入順）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableFrame {
    variables: Vec<(String, Value)>,
}

impl VariableFrame {
    /// 空のフレームを作成する
    pub fn new() -> Self {
        Self::default()
    }

    /// 変数を追加したフレームを返す
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.set(name, value);
        self
    }

    /// 変数の値を取得する
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// 変数の値を可変参照で取得する
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.variables
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// 変数を設定する（既存なら置き換え、なければ末尾に追加）
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.get_mut(&name) {
            Some(slot) => *slot = value,
            None => self.variables.push((name, value)),
        }
    }

    /// 変数を削除する
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let index = self.variables.iter().position(|(n, _)| n == name)?;
        Some(self.variables.remove(index).1)
    }

    /// 変数を挿入順に列挙する
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.variables.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// 変数の数
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// 空かどうか
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

/// エンジンのフレームスタック
///
/// フレームは外側（グローバル）から内側（ローカル）の順に並びます。
/// 先頭は常にグローバルフレームです。スイート境界とテスト境界のフレームを
/// インデックスで記録し、各フレームの名目上のスコープを決めます。
#[derive(Debug, Clone, PartialEq)]
pub struct FrameStack {
    frames: Vec<VariableFrame>,
    /// 最も内側のスイートフレーム
    suite: usize,
    /// 実行中のテストのフレーム
    test: Option<usize>,
    /// 外側のスイート境界（pop_suite で戻すため）
    outer_suites: Vec<usize>,
}

impl FrameStack {
    /// グローバルフレームだけのスタックを作成する
    pub fn new(globals: VariableFrame) -> Self {
        Self {
            frames: vec![globals],
            suite: 0,
            test: None,
            outer_suites: Vec::new(),
        }
    }

    /// スイートに入る
    ///
    /// 新しいフレームは外側の変数をすべて引き継ぎ、`frame` の内容で上書きされます。
    pub fn push_suite(&mut self, frame: VariableFrame) {
        self.push_inherited(frame);
        self.outer_suites.push(self.suite);
        self.suite = self.frames.len() - 1;
    }

    /// スイートから出る
    pub fn pop_suite(&mut self) {
        if self.frames.len() > 1 && self.frames.len() - 1 == self.suite {
            self.frames.pop();
            self.suite = self.outer_suites.pop().unwrap_or(0);
        }
    }

    /// テストに入る
    pub fn push_test(&mut self, frame: VariableFrame) {
        self.push_inherited(frame);
        self.test = Some(self.frames.len() - 1);
    }

    /// テストから出る
    pub fn pop_test(&mut self) {
        if let Some(test) = self.test.take() {
            self.frames.truncate(test);
        }
    }

    /// ユーザーキーワードのローカルフレームに入る
    pub fn push_local(&mut self, frame: VariableFrame) {
        self.push_inherited(frame);
    }

    /// ローカルフレームから出る
    pub fn pop_local(&mut self) {
        let innermost_marker = self.test.unwrap_or(self.suite);
        if self.frames.len() - 1 > innermost_marker {
            self.frames.pop();
        }
    }

    fn push_inherited(&mut self, frame: VariableFrame) {
        let mut inherited = self.frames.last().cloned().unwrap_or_default();
        for (name, value) in frame.iter() {
            inherited.set(name, value.clone());
        }
        self.frames.push(inherited);
    }

    /// フレーム（外側 → 内側）
    pub fn frames(&self) -> &[VariableFrame] {
        &self.frames
    }

    /// フレームを可変参照で取得する
    pub fn frames_mut(&mut self) -> &mut [VariableFrame] {
        &mut self.frames
    }

    /// 最も内側のスイートフレームのインデックス
    pub fn suite_index(&self) -> usize {
        self.suite
    }

    /// テストフレームのインデックス
    pub fn test_index(&self) -> Option<usize> {
        self.test
    }

    /// 最も内側のフレームのインデックス
    pub fn innermost_index(&self) -> usize {
        self.frames.len() - 1
    }

    /// フレームの位置から決まる名目上のスコープ
    pub fn nominal_label(&self, index: usize) -> ScopeLabel {
        if index == 0 {
            ScopeLabel::Global
        } else if index <= self.suite {
            ScopeLabel::Suite
        } else if Some(index) == self.test {
            ScopeLabel::Test
        } else {
            ScopeLabel::Local
        }
    }

    /// スコープ名に対応するフレームのインデックス
    pub fn index_of(&self, scope: ScopeLabel) -> Option<usize> {
        match scope {
            ScopeLabel::Global => Some(0),
            ScopeLabel::Suite => Some(self.suite),
            ScopeLabel::Test => self.test,
            ScopeLabel::Local => Some(self.innermost_index()),
        }
    }

    /// 最も内側のフレームの変数を設定する
    pub fn set_local(&mut self, name: impl Into<String>, value: Value) {
        let innermost = self.innermost_index();
        self.frames[innermost].set(name, value);
    }
}
