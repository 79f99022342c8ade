//! ブリッジのエラー分類
//!
//! これらのエラーは公開APIから返されることはなく、ログ出力の文面として使われます。

use thiserror::Error;

/// ブリッジ内部で発生するエラー
#[derive(Debug, Error)]
pub enum BridgeError {
    /// デバッガプロセスを起動できなかった
    #[error("failed: {0}")]
    ConnectionFailure(String),
    /// コマンドの書き込みに失敗した
    #[error("send failed: {0}")]
    WriteFailure(#[from] std::io::Error),
    /// セッションが準備完了でない
    #[error("not connected")]
    NotConnected,
    /// セッションが既に終了している
    #[error("session terminated")]
    SessionTerminated,
}
