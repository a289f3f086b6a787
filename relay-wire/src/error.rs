//! ワイヤ層のエラー

use thiserror::Error;

/// ワイヤ層のエラー
///
/// どのエラーもセッションにとって致命的です。
/// 呼び出し側はチャネルを閉じて、以降の送受信を行いません。
#[derive(Debug, Error)]
pub enum WireError {
    /// ソケットI/Oの失敗
    #[error("transport failure: {0}")]
    Transport(#[from] std::io::Error),

    /// フレーミング違反（途中で切れた行、JSONでない行など）
    #[error("malformed message: {0}")]
    Malformed(String),

    /// ペイロードのシリアライズに失敗した
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    /// 相手側が接続を閉じた、またはこちらで閉じ済み
    #[error("connection closed")]
    Closed,
}
