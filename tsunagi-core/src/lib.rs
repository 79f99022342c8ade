//! Tsunagi デバッガブリッジのコア機能
//!
//! このクレートは、対話型のコマンドラインデバッガ（jdb）を子プロセスとして駆動し、
//! 自由形式のコンソール出力をスレッド一覧・スタックフレーム・ローカル変数といった
//! 型付きの結果に変換します。
//! 出力の区切りはプロンプトの検出だけに頼り、コマンドと結果は送信順で対応付けます。

pub mod bridge;
pub mod breakpoint;
pub mod command;
pub mod config;
mod dispatch;
pub mod errors;
pub mod parse;
pub mod pending;
pub mod reader;
pub mod session;

pub use bridge::{DebugBridge, LogSink};
pub use breakpoint::{Breakpoint, BreakpointId, BreakpointLocation, BreakpointManager};
pub use command::Command;
pub use config::BridgeConfig;
pub use errors::BridgeError;
pub use parse::{LocalVariable, StackFrame, ThreadEntry};
pub use session::SessionState;

// 他のクレートから使用するために再エクスポート
pub use tsunagi_target::{Target, DEFAULT_JDWP_PORT};

/// ブリッジの結果型
pub type Result<T> = anyhow::Result<T>;
