//! 変数の値

use crate::truncate::truncate;
use serde_json::{json, Map, Value as JsonValue};
use std::fmt;

/// シリアライズしない値の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpaqueKind {
    /// 関数・メソッドなど呼び出し可能なもの
    Callable,
    /// モジュール
    Module,
    /// 型オブジェクト
    Type,
}

/// 変数の値
///
/// エンジンが保持する値を、スナップショットと書き換えに必要な範囲でモデル化したものです。
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    /// 挿入順を保つマッピング
    Dict(Vec<(String, Value)>),
    /// その他のオブジェクト（`repr` が `None` なら文字列化に失敗する）
    Object {
        type_name: String,
        repr: Option<String>,
    },
    /// 値として送らず、`<type>@<identity>` で表すもの
    Opaque {
        kind: OpaqueKind,
        type_name: String,
        id: u64,
    },
}

impl Value {
    /// 文字列値を作成する
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    /// 文字列のリストを作成する
    pub fn str_list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Value::List(items.into_iter().map(|s| Value::Str(s.into())).collect())
    }

    /// 型名
    pub fn type_name(&self) -> &str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Object { type_name, .. } => type_name,
            Value::Opaque { type_name, .. } => type_name,
        }
    }

    /// コンテナ（リスト・タプル・辞書）かどうか
    pub fn is_container(&self) -> bool {
        matches!(self, Value::List(_) | Value::Tuple(_) | Value::Dict(_))
    }

    /// 辞書のキーで値を探す
    pub fn dict_get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Dict(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// `<type>@<identity>` 形式のプレースホルダ
    fn placeholder(type_name: &str, id: u64) -> String {
        format!("{}@{}", type_name, id)
    }

    /// スナップショット用の値（型ラベルなし）
    ///
    /// コンテナは子要素を型ラベル付きで再帰的に並べ、スカラーは文字列にして
    /// `max_length` 文字で切り詰めます。
    pub fn snapshot(&self, max_length: usize) -> JsonValue {
        match self {
            Value::List(items) | Value::Tuple(items) => JsonValue::Array(
                items.iter().map(|item| item.labeled(max_length)).collect(),
            ),
            Value::Dict(entries) => {
                let mut object = Map::new();
                for (key, value) in entries {
                    object.insert(truncate(max_length, key), value.labeled(max_length));
                }
                JsonValue::Object(object)
            }
            Value::Opaque { type_name, id, .. } => {
                JsonValue::String(Self::placeholder(type_name, *id))
            }
            Value::Object { repr: None, .. } => {
                JsonValue::String("<error retrieving value>".to_string())
            }
            scalar => JsonValue::String(truncate(max_length, &scalar.to_string())),
        }
    }

    /// `[型名, 値]` の組
    pub fn labeled(&self, max_length: usize) -> JsonValue {
        json!([self.type_name(), self.snapshot(max_length)])
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::Str(s) => write!(f, "{}", s),
            Value::List(items) | Value::Tuple(items) => {
                let (open, close) = if matches!(self, Value::List(_)) {
                    ("[", "]")
                } else {
                    ("(", ")")
                };
                write!(f, "{}", open)?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "{}", close)
            }
            Value::Dict(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                write!(f, "}}")
            }
            Value::Object { repr: Some(repr), .. } => write!(f, "{}", repr),
            Value::Object { type_name, repr: None } => write!(f, "<{}>", type_name),
            Value::Opaque { type_name, id, .. } => {
                write!(f, "{}", Self::placeholder(type_name, *id))
            }
        }
    }
}
