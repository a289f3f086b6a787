//! エージェントのエラー

use relay_wire::WireError;
use std::time::Duration;
use thiserror::Error;

/// エージェントのエラー
///
/// `Wire` はセッションにとって致命的です。それ以外はセッションの確立前に発生します。
#[derive(Debug, Error)]
pub enum AgentError {
    /// リスナー引数が不正
    #[error("invalid listener arguments: {0}")]
    InvalidArguments(String),

    /// 接続タイムアウトまでに接続できなかった
    #[error("unable to connect to {address} within {timeout:?}")]
    ConnectTimeout { address: String, timeout: Duration },

    /// ピアがプロトコルバージョンを拒否した
    #[error("protocol version rejected: {0}")]
    ProtocolMismatch(String),

    /// ハンドシェイク中に想定外のペイロードを受け取った
    #[error("unexpected handshake payload: {0}")]
    Handshake(String),

    /// 制御リスナーを開始できなかった
    #[error("failed to start control listener: {0}")]
    Control(#[source] std::io::Error),

    /// トランスポートまたはフレーミングの失敗
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// ライブラリ解決のエラー
///
/// エンジンには伝播せず、`message` イベントとしてピアに報告します。
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LibraryError {
    #[error("Importing library '{name}' failed: {message}")]
    Import { name: String, message: String },

    #[error("Importing library '{name}' timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    #[error("Importing library '{name}' panicked: {message}")]
    Panicked { name: String, message: String },

    #[error("Creating stub for library '{name}' failed: {message}")]
    Stub { name: String, message: String },
}
