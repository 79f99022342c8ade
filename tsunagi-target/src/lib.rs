//! Tsunagi ターゲットプロセス制御
//!
//! このクレートは、デバッグ対象への接続先の記述と、
//! 子プロセスとして起動したデバッガ（jdb）を制御するための低レベル機能を提供します。
//! プロセスの起動、出力のマージ、入力の排他制御、強制終了などを行います。

pub mod process;
pub mod target;

pub use process::{DebuggerProcess, InputGuard};
pub use target::{Target, DEFAULT_JDWP_PORT};

/// ターゲット制御の結果型
pub type Result<T> = anyhow::Result<T>;
