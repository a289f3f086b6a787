//! リモート側から要求された変数の書き換え

use crate::{FrameStack, ScopeLabel, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// 入れ子パス要素の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Scalar,
    List,
    Dict,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ElementKind::Scalar => write!(f, "scalar"),
            ElementKind::List => write!(f, "list"),
            ElementKind::Dict => write!(f, "dict"),
        }
    }
}

/// コンテナ内の位置（リストのインデックスまたは辞書のキー）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Address {
    Index(usize),
    Key(String),
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Address::Index(i) => write!(f, "{}", i),
            Address::Key(k) => write!(f, "{}", k),
        }
    }
}

/// 入れ子パスの1要素（ワイヤ上では `[kind, address]`）
///
/// 最後の要素以外は、その段で辿るコンテナの種類と位置を表します。
/// 最後の要素の種類は、新しい値をどの形で組み立てるかを表します。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathStep(pub ElementKind, pub Address);

/// 変数変更リクエスト
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub name: String,
    pub scope: String,
    pub values: Vec<String>,
    /// スナップショット内のフレーム位置（内側から0始まり）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<PathStep>,
}

/// 変数書き換えのエラー
#[derive(Debug, Error, PartialEq)]
pub enum MutationError {
    #[error("Unable to change value of variable {name} inside unrecognized scope {scope}")]
    InvalidScope { name: String, scope: String },

    #[error("Requested to change value in {expected} object type, but {found} found")]
    TypeMismatch { expected: ElementKind, found: String },

    #[error("Variable {0} does not exist in requested scope")]
    UnknownVariable(String),

    #[error("Frame level {0} is out of range")]
    LevelOutOfRange(usize),

    #[error("Nothing stored under '{0}'")]
    MissingElement(Address),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// 変数書き換えを適用する
///
/// スコープ名（または `level`）で対象フレームを決め、`path` が空ならフレームに直接、
/// そうでなければコンテナを辿った先に値を設定します。
/// ローカル以外のスコープへの代入は、古い値を引き継いでいる内側のフレームにも反映されます。
pub fn apply_mutation(stack: &mut FrameStack, request: &ChangeRequest) -> crate::Result<()> {
    let invalid_scope = || MutationError::InvalidScope {
        name: request.name.clone(),
        scope: request.scope.clone(),
    };
    let scope = ScopeLabel::parse(&request.scope).ok_or_else(invalid_scope)?;

    let target = match request.level {
        Some(level) => stack
            .innermost_index()
            .checked_sub(level)
            .ok_or(MutationError::LevelOutOfRange(level))?,
        None => stack.index_of(scope).ok_or_else(invalid_scope)?,
    };

    debug!(
        "changing {} in frame {} ({}) with {} value(s)",
        request.name,
        target,
        scope,
        request.values.len()
    );

    match request.path.split_last() {
        None => {
            let value = shape_value(kind_of_name(&request.name), &request.values)?;
            assign_top_level(stack, target, scope, &request.name, value);
            Ok(())
        }
        Some((leaf, [])) => {
            let value = shape_value(leaf.0, &request.values)?;
            assign_top_level(stack, target, scope, &request.name, value);
            Ok(())
        }
        Some((leaf, containers)) => {
            let value = shape_value(leaf.0, &request.values)?;
            assign_nested(stack, target, &request.name, containers, value)
        }
    }
}

/// 変数名のシジルから値の形を決める
fn kind_of_name(name: &str) -> ElementKind {
    match name.chars().next() {
        Some('@') => ElementKind::List,
        Some('&') => ElementKind::Dict,
        _ => ElementKind::Scalar,
    }
}

/// 文字列の値列から新しい値を組み立てる
///
/// スカラーに複数の値が与えられた場合はリストになります。
/// 辞書は `key=value` 形式の要素から作ります。
fn shape_value(kind: ElementKind, values: &[String]) -> crate::Result<Value> {
    match kind {
        ElementKind::Scalar => match values {
            [] => Ok(Value::str("")),
            [single] => Ok(Value::str(single.as_str())),
            many => Ok(Value::str_list(many.iter().cloned())),
        },
        ElementKind::List => Ok(Value::str_list(values.iter().cloned())),
        ElementKind::Dict => values
            .iter()
            .map(|item| {
                item.split_once('=')
                    .map(|(k, v)| (k.to_string(), Value::str(v)))
                    .ok_or_else(|| {
                        MutationError::InvalidValue(format!(
                            "dictionary item '{}' does not contain '='",
                            item
                        ))
                    })
            })
            .collect::<crate::Result<Vec<_>>>()
            .map(Value::Dict),
    }
}

fn assign_top_level(
    stack: &mut FrameStack,
    target: usize,
    scope: ScopeLabel,
    name: &str,
    value: Value,
) {
    let frames = stack.frames_mut();
    let old = frames[target].get(name).cloned();

    if scope != ScopeLabel::Local {
        // 古い値をそのまま引き継いでいる内側のフレームも更新する
        for frame in frames[target + 1..].iter_mut() {
            if frame.get(name) == old.as_ref() {
                frame.set(name, value.clone());
            }
        }
    }
    frames[target].set(name, value);
}

fn assign_nested(
    stack: &mut FrameStack,
    target: usize,
    name: &str,
    containers: &[PathStep],
    value: Value,
) -> crate::Result<()> {
    let frames = stack.frames_mut();
    let old = frames[target]
        .get(name)
        .cloned()
        .ok_or_else(|| MutationError::UnknownVariable(name.to_string()))?;

    let mut updated = old.clone();
    set_inner(&mut updated, containers, value)?;

    // 同じ値を共有しているフレームにはすべて反映する
    for frame in frames.iter_mut() {
        if frame.get(name) == Some(&old) {
            frame.set(name, updated.clone());
        }
    }
    Ok(())
}

fn set_inner(container: &mut Value, path: &[PathStep], value: Value) -> crate::Result<()> {
    let Some((PathStep(kind, address), rest)) = path.split_first() else {
        return Err(MutationError::InvalidPath("empty container path".to_string()));
    };

    let slot = match (kind, container) {
        (ElementKind::List, Value::List(items) | Value::Tuple(items)) => {
            let Address::Index(index) = address else {
                return Err(MutationError::InvalidPath(format!(
                    "list element addressed by key '{}'",
                    address
                )));
            };
            // 末尾の直後への代入は追加として扱う
            if *index == items.len() && rest.is_empty() {
                items.push(Value::None);
            }
            items
                .get_mut(*index)
                .ok_or_else(|| MutationError::MissingElement(address.clone()))?
        }
        (ElementKind::Dict, Value::Dict(entries)) => {
            let key = address.to_string();
            let position = match entries.iter().position(|(k, _)| *k == key) {
                Some(position) => position,
                None if rest.is_empty() => {
                    entries.push((key, Value::None));
                    entries.len() - 1
                }
                None => return Err(MutationError::MissingElement(address.clone())),
            };
            &mut entries[position].1
        }
        (ElementKind::Scalar, _) => {
            return Err(MutationError::InvalidPath(
                "scalar cannot contain other values".to_string(),
            ))
        }
        (expected, found) => {
            return Err(MutationError::TypeMismatch {
                expected: *expected,
                found: found.type_name().to_string(),
            })
        }
    };

    if rest.is_empty() {
        *slot = value;
        Ok(())
    } else {
        set_inner(slot, rest, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VariableFrame;
    use serde_json::json;

    fn request(value: serde_json::Value) -> ChangeRequest {
        serde_json::from_value(value).unwrap()
    }

    fn sample_stack() -> FrameStack {
        let nested = Value::List(vec![
            Value::Int(1),
            Value::Dict(vec![("k".to_string(), Value::List(vec![Value::str("a")]))]),
        ]);
        let mut stack = FrameStack::new(VariableFrame::new().with("${g}", Value::str("g")));
        stack.push_suite(VariableFrame::new().with("@{nested}", nested));
        stack.push_test(VariableFrame::new());
        stack.push_local(VariableFrame::new().with("${x}", Value::Int(1)));
        stack
    }

    #[test]
    fn test_local_assignment() {
        let mut stack = sample_stack();
        apply_mutation(
            &mut stack,
            &request(json!({"name": "${x}", "scope": "local", "values": ["2"]})),
        )
        .unwrap();
        assert_eq!(stack.frames()[3].get("${x}"), Some(&Value::str("2")));
    }

    #[test]
    fn test_global_assignment_reaches_inheriting_frames() {
        let mut stack = sample_stack();
        stack.set_local("${g}", Value::str("overridden"));
        apply_mutation(
            &mut stack,
            &request(json!({"name": "${g}", "scope": "global", "values": ["new"]})),
        )
        .unwrap();

        assert_eq!(stack.frames()[0].get("${g}"), Some(&Value::str("new")));
        assert_eq!(stack.frames()[1].get("${g}"), Some(&Value::str("new")));
        assert_eq!(stack.frames()[2].get("${g}"), Some(&Value::str("new")));
        // ローカルで上書きされた値はそのまま
        assert_eq!(stack.frames()[3].get("${g}"), Some(&Value::str("overridden")));
    }

    #[test]
    fn test_scalar_with_many_values_becomes_list() {
        let mut stack = sample_stack();
        apply_mutation(
            &mut stack,
            &request(json!({"name": "${x}", "scope": "test", "values": ["a", "b"]})),
        )
        .unwrap();
        assert_eq!(stack.frames()[2].get("${x}"), Some(&Value::str_list(["a", "b"])));
    }

    #[test]
    fn test_dictionary_values() {
        let mut stack = sample_stack();
        apply_mutation(
            &mut stack,
            &request(json!({"name": "&{d}", "scope": "suite", "values": ["a=1", "b=x=y"]})),
        )
        .unwrap();
        let d = stack.frames()[1].get("&{d}").unwrap();
        assert_eq!(d.dict_get("a"), Some(&Value::str("1")));
        assert_eq!(d.dict_get("b"), Some(&Value::str("x=y")));

        let err = apply_mutation(
            &mut stack,
            &request(json!({"name": "&{d}", "scope": "suite", "values": ["novalue"]})),
        )
        .unwrap_err();
        assert!(matches!(err, MutationError::InvalidValue(_)));
    }

    #[test]
    fn test_nested_assignment() {
        let mut stack = sample_stack();
        apply_mutation(
            &mut stack,
            &request(json!({
                "name": "@{nested}",
                "scope": "local",
                "values": ["b"],
                "path": [["list", 1], ["dict", "k"], ["list", 0], ["scalar", 0]]
            })),
        )
        .unwrap();

        let expected = Value::List(vec![
            Value::Int(1),
            Value::Dict(vec![("k".to_string(), Value::List(vec![Value::str("b")]))]),
        ]);
        // 同じ値を共有していたフレームすべてに反映される
        for frame in &stack.frames()[1..] {
            assert_eq!(frame.get("@{nested}"), Some(&expected));
        }
    }

    #[test]
    fn test_nested_type_mismatch() {
        let mut stack = sample_stack();
        let err = apply_mutation(
            &mut stack,
            &request(json!({
                "name": "@{nested}",
                "scope": "suite",
                "values": ["b"],
                "path": [["dict", "0"], ["scalar", 0]]
            })),
        )
        .unwrap_err();
        assert_eq!(
            err,
            MutationError::TypeMismatch {
                expected: ElementKind::Dict,
                found: "list".to_string()
            }
        );
        assert_eq!(
            err.to_string(),
            "Requested to change value in dict object type, but list found"
        );
    }

    #[test]
    fn test_invalid_scope() {
        let mut stack = sample_stack();
        let err = apply_mutation(
            &mut stack,
            &request(json!({"name": "${x}", "scope": "keyword", "values": ["1"]})),
        )
        .unwrap_err();
        assert!(matches!(err, MutationError::InvalidScope { .. }));

        let mut no_test = FrameStack::new(VariableFrame::new());
        let err = apply_mutation(
            &mut no_test,
            &request(json!({"name": "${x}", "scope": "test", "values": ["1"]})),
        )
        .unwrap_err();
        assert!(matches!(err, MutationError::InvalidScope { .. }));
    }

    #[test]
    fn test_level_selects_frame_from_innermost() {
        let mut stack = sample_stack();
        apply_mutation(
            &mut stack,
            &request(json!({"name": "${y}", "scope": "suite", "values": ["1"], "level": 2})),
        )
        .unwrap();
        assert_eq!(stack.frames()[1].get("${y}"), Some(&Value::str("1")));

        let err = apply_mutation(
            &mut stack,
            &request(json!({"name": "${y}", "scope": "suite", "values": ["1"], "level": 9})),
        )
        .unwrap_err();
        assert_eq!(err, MutationError::LevelOutOfRange(9));
    }

    #[test]
    fn test_unknown_variable_in_nested_path() {
        let mut stack = sample_stack();
        let err = apply_mutation(
            &mut stack,
            &request(json!({
                "name": "@{missing}",
                "scope": "local",
                "values": ["1"],
                "path": [["list", 0], ["scalar", 0]]
            })),
        )
        .unwrap_err();
        assert_eq!(err, MutationError::UnknownVariable("@{missing}".to_string()));
    }
}
