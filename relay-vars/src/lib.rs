//! Relay 変数スコープ
//!
//! このクレートは、実行エンジンの入れ子になった変数フレームをモデル化し、
//! リモート側に送るための型ラベル付きスナップショットを作成します。
//! また、リモート側から要求された変数の書き換えを任意の入れ子の深さで適用します。

pub mod collect;
pub mod frame;
pub mod mutate;
pub mod truncate;
pub mod value;

pub use collect::{FrameSnapshot, ScopeCollector, VariableSnapshot};
pub use frame::{FrameStack, ScopeLabel, VariableFrame};
pub use mutate::{apply_mutation, Address, ChangeRequest, ElementKind, MutationError, PathStep};
pub use truncate::{truncate, MAX_VALUE_LENGTH, TRUNCATION_SUFFIX};
pub use value::{OpaqueKind, Value};

/// 変数操作の結果型
pub type Result<T> = std::result::Result<T, MutationError>;
