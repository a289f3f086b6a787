//! Relay エージェントのコア機能
//!
//! このクレートは、実行エンジンに組み込まれるデバッグエージェント本体を提供します。
//! ハンドシェイク、ライフサイクルイベントの転送、一時停止プロトコル、
//! ライブラリインポートのプロキシを統合します。

pub mod agent;
pub mod config;
pub mod engine;
pub mod errors;
pub mod library;
pub mod pause;
pub mod session;

pub use agent::Agent;
pub use config::AgentConfig;
pub use engine::{Attributes, Engine, ExecutionListener};
pub use errors::{AgentError, LibraryError};
pub use library::{
    EventSink, Keyword, KeywordSource, Library, LibraryImportProxy, LibraryResolver,
    PlaceholderLibrary, Resolution,
};
pub use pause::PausingPoint;
pub use session::{OperatingMode, Session, PROTOCOL_VERSION};

// 他のクレートから使用するために再エクスポート
pub use relay_debug::{ControlCommand, KeywordDebugger};
pub use relay_vars::{FrameStack, ScopeLabel, Value, VariableFrame};
pub use relay_wire::{EventKind, Message, PeerKind};

/// エージェントの結果型
pub type Result<T> = std::result::Result<T, AgentError>;
