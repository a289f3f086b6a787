//! Relay ワイヤプロトコル
//!
//! このクレートは、エージェントとリモートコントローラ間のメッセージ形式と
//! 行区切りのトランスポートを提供します。
//! 1メッセージ = 1行のJSONオブジェクト（キーが種別、値がペイロード）です。

pub mod channel;
pub mod codec;
pub mod error;
pub mod message;

pub use channel::Channel;
pub use codec::{decode, encode};
pub use error::WireError;
pub use message::{EventKind, Message, PeerKind};

/// ワイヤ層の結果型
pub type Result<T> = std::result::Result<T, WireError>;
