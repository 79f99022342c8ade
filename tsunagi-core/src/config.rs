//! ブリッジの設定

use std::ffi::OsString;
use std::time::Duration;
use tsunagi_target::Target;

/// デバッガの起動方法と終了方法の設定
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// デバッガの実行ファイル
    pub debugger: OsString,
    /// 接続先の引数より前に渡す引数
    pub debugger_args: Vec<OsString>,
    /// `stop()` で最初に送る終了コマンド
    pub exit_command: String,
    /// 終了コマンドの後、強制終了するまでの猶予
    pub stop_grace: Duration,
    /// ログシンクに送る診断メッセージの接頭辞
    pub log_prefix: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            debugger: OsString::from("jdb"),
            debugger_args: Vec::new(),
            exit_command: "exit".to_string(),
            stop_grace: Duration::from_millis(200),
            log_prefix: "[jdb]".to_string(),
        }
    }
}

impl BridgeConfig {
    /// 接続先に応じた起動コマンドラインを組み立てる
    pub fn command_line(&self, target: &Target) -> (OsString, Vec<OsString>) {
        let mut args = self.debugger_args.clone();
        args.extend(target.debugger_args());
        (self.debugger.clone(), args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_appends_target_args() {
        let config = BridgeConfig {
            debugger_args: vec![OsString::from("-J-Duser.language=en")],
            ..BridgeConfig::default()
        };
        let (program, args) = config.command_line(&Target::attach("vm", 8000));
        assert_eq!(program, "jdb");
        assert_eq!(args.len(), 3);
        assert_eq!(args[0], "-J-Duser.language=en");
        assert_eq!(args[2], "com.sun.jdi.SocketAttach:hostname=vm,port=8000");
    }
}
