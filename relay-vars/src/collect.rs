//! 変数スコープのスナップショット作成
//!
//! フレームを外側から内側へたどり、各変数にスコープラベルを付けます。
//! 直前（1つ外側）のフレームと値が等しい変数はそのフレームのラベルを引き継ぎ、
//! 値が変わった変数や新しく現れた変数には現在のフレームの名目上のスコープを付けます。
//! 偶然同じ値を持つ別の変数も「引き継ぎ」と判定されますが、この挙動は
//! リモート側の表示が前提にしているため変えていません。

use crate::{FrameStack, ScopeLabel, Value, MAX_VALUE_LENGTH};
use serde::{Serialize, Serializer};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};

/// スナップショット中の1変数
///
/// ワイヤ上では `[型名, 値, スコープ]` の3要素配列になります。
#[derive(Debug, Clone, PartialEq)]
pub struct VariableSnapshot {
    pub type_name: String,
    pub value: JsonValue,
    pub scope: ScopeLabel,
}

impl Serialize for VariableSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.type_name, &self.value, self.scope).serialize(serializer)
    }
}

/// スナップショット中の1フレーム
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FrameSnapshot {
    variables: BTreeMap<String, VariableSnapshot>,
}

impl FrameSnapshot {
    /// 変数を取得する
    pub fn get(&self, name: &str) -> Option<&VariableSnapshot> {
        self.variables.get(name)
    }

    /// 変数名を列挙する
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
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

/// スコープコレクタ
#[derive(Debug, Clone)]
pub struct ScopeCollector {
    max_value_length: usize,
}

impl ScopeCollector {
    /// 文字列の最大長を指定してコレクタを作成する
    pub fn new(max_value_length: usize) -> Self {
        Self { max_value_length }
    }

    /// フレームスタックのスナップショットを作成する
    ///
    /// 戻り値は内側（ローカル）から外側（グローバル）の順です。
    pub fn collect(&self, stack: &FrameStack) -> Vec<FrameSnapshot> {
        let mut snapshots = Vec::with_capacity(stack.frames().len());
        let mut previous: HashMap<&str, (ScopeLabel, &Value)> = HashMap::new();

        for (index, frame) in stack.frames().iter().enumerate() {
            let mut current = HashMap::with_capacity(frame.len());
            let mut snapshot = FrameSnapshot::default();

            for (name, value) in frame.iter() {
                let scope = match previous.get(name) {
                    _ if index == 0 => ScopeLabel::Global,
                    Some((label, prev)) if *prev == value => *label,
                    _ => stack.nominal_label(index),
                };

                snapshot
                    .variables
                    .insert(name.to_string(), self.snapshot_variable(value, scope));
                current.insert(name, (scope, value));
            }

            snapshots.push(snapshot);
            previous = current;
        }

        snapshots.reverse();
        snapshots
    }

    fn snapshot_variable(&self, value: &Value, scope: ScopeLabel) -> VariableSnapshot {
        VariableSnapshot {
            type_name: value.type_name().to_string(),
            value: value.snapshot(self.max_value_length),
            scope,
        }
    }
}

impl Default for ScopeCollector {
    fn default() -> Self {
        Self::new(MAX_VALUE_LENGTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VariableFrame;
    use serde_json::json;

    fn stack_with(global: i64, suite: i64, test: i64) -> FrameStack {
        let mut stack = FrameStack::new(VariableFrame::new().with("x", Value::Int(global)));
        stack.push_suite(VariableFrame::new().with("x", Value::Int(suite)));
        stack.push_test(VariableFrame::new().with("x", Value::Int(test)));
        stack
    }

    #[test]
    fn test_unchanged_variable_keeps_outer_label() {
        let frames = ScopeCollector::default().collect(&stack_with(1, 1, 2));

        // 内側から順に test, suite, global
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].get("x").unwrap().scope, ScopeLabel::Test);
        assert_eq!(frames[1].get("x").unwrap().scope, ScopeLabel::Global);
        assert_eq!(frames[2].get("x").unwrap().scope, ScopeLabel::Global);
    }

    #[test]
    fn test_changed_variable_gets_frame_label() {
        let frames = ScopeCollector::default().collect(&stack_with(1, 5, 5));
        assert_eq!(frames[1].get("x").unwrap().scope, ScopeLabel::Suite);
        assert_eq!(frames[0].get("x").unwrap().scope, ScopeLabel::Suite);
    }

    #[test]
    fn test_local_variables() {
        let mut stack = stack_with(1, 1, 1);
        stack.push_local(VariableFrame::new().with("${arg}", Value::str("v")));

        let frames = ScopeCollector::default().collect(&stack);
        assert_eq!(frames[0].get("${arg}").unwrap().scope, ScopeLabel::Local);
        assert_eq!(frames[0].get("x").unwrap().scope, ScopeLabel::Global);
    }

    #[test]
    fn test_snapshot_serializes_as_triples() {
        let frames = ScopeCollector::new(4).collect(&stack_with(1, 1, 1));
        assert_eq!(
            serde_json::to_value(&frames[2]).unwrap(),
            json!({"x": ["int", "1", "global"]})
        );

        let mut stack = FrameStack::new(VariableFrame::new());
        stack.set_local("${long}", Value::str("abcdefgh"));
        let frames = ScopeCollector::new(4).collect(&stack);
        assert_eq!(
            serde_json::to_value(&frames).unwrap(),
            json!([{"${long}": ["str", "abcd <truncated>", "global"]}])
        );
    }
}
