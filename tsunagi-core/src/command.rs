//! デバッガコマンド
//!
//! ブリッジ自身はコマンドを不透明な文字列として扱います。
//! ここではREPLの入力を解釈し、jdbに送るテキストを組み立てます。

use crate::breakpoint::BreakpointLocation;
use std::fmt;

/// デバッガコマンド
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// ブレークポイントを設定
    Break(BreakpointLocation),
    /// ブレークポイントを解除
    Clear(BreakpointLocation),
    /// 実行継続
    Continue,
    /// ステップ実行
    Step,
    /// 次の行へ
    Next,
    /// 現在のメソッドから抜けるまで実行
    Finish,
    /// 全スレッドを中断
    Suspend,
    /// 全スレッドを再開
    Resume,
    /// スレッド一覧表示
    Threads,
    /// カレントスレッドを切り替え
    Thread(String),
    /// バックトレース表示
    Backtrace,
    /// 呼び出し元のフレームへ移動
    Up(u32),
    /// 呼び出し先のフレームへ移動
    Down(u32),
    /// ローカル変数表示
    Locals,
    /// 式の評価
    Print(String),
    /// ヘルプ表示
    Help,
    /// 終了
    Quit,
}

impl Command {
    /// コマンド文字列をパースする
    pub fn parse(input: &str) -> Option<Self> {
        let parts: Vec<&str> = input.split_whitespace().collect();
        if parts.is_empty() {
            return None;
        }
        let rest = || parts[1..].join(" ");

        match parts[0] {
            "break" | "b" | "stop" => BreakpointLocation::parse(&rest()).map(Command::Break),
            "clear" => BreakpointLocation::parse(&rest()).map(Command::Clear),
            "continue" | "cont" | "c" => Some(Command::Continue),
            "step" | "s" => match parts.get(1) {
                Some(&"up") => Some(Command::Finish),
                None => Some(Command::Step),
                Some(_) => None,
            },
            "next" | "n" => Some(Command::Next),
            "finish" | "f" => Some(Command::Finish),
            "suspend" => Some(Command::Suspend),
            "resume" => Some(Command::Resume),
            "threads" => Some(Command::Threads),
            "thread" if parts.len() == 2 => Some(Command::Thread(parts[1].to_string())),
            "where" | "backtrace" | "bt" => Some(Command::Backtrace),
            "up" => parse_count(parts.get(1)).map(Command::Up),
            "down" => parse_count(parts.get(1)).map(Command::Down),
            "locals" | "l" => Some(Command::Locals),
            "print" | "p" if parts.len() > 1 => Some(Command::Print(rest())),
            "help" | "h" | "?" => Some(Command::Help),
            "quit" | "q" | "exit" => Some(Command::Quit),
            _ => None,
        }
    }

    /// 実行を進める（または止める）コマンドか
    ///
    /// これらの後はスレッドやスタックの表示が古くなります。
    pub fn advances_execution(&self) -> bool {
        matches!(
            self,
            Command::Continue | Command::Step | Command::Next | Command::Finish | Command::Suspend
        )
    }
}

/// 省略時は1
fn parse_count(arg: Option<&&str>) -> Option<u32> {
    match arg {
        None => Some(1),
        Some(n) => n.parse().ok().filter(|&n| n > 0),
    }
}

/// jdbに送るコマンドテキスト
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Break(loc) => write!(f, "{}", loc.set_command()),
            Command::Clear(loc) => write!(f, "{}", loc.clear_command()),
            Command::Continue => f.write_str("cont"),
            Command::Step => f.write_str("step"),
            Command::Next => f.write_str("next"),
            Command::Finish => f.write_str("step up"),
            Command::Suspend => f.write_str("suspend"),
            Command::Resume => f.write_str("resume"),
            Command::Threads => f.write_str("threads"),
            Command::Thread(id) => write!(f, "thread {}", id),
            Command::Backtrace => f.write_str("where"),
            Command::Up(n) => write!(f, "up {}", n),
            Command::Down(n) => write!(f, "down {}", n),
            Command::Locals => f.write_str("locals"),
            Command::Print(expr) => write!(f, "print {}", expr),
            Command::Help => f.write_str("help"),
            Command::Quit => f.write_str("exit"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("continue"), Some(Command::Continue));
        assert_eq!(Command::parse("c"), Some(Command::Continue));
        assert_eq!(Command::parse("step"), Some(Command::Step));
        assert_eq!(Command::parse("step up"), Some(Command::Finish));
        assert_eq!(Command::parse("bt"), Some(Command::Backtrace));
        assert_eq!(Command::parse("thread 0x1"), Some(Command::Thread("0x1".to_string())));
        assert_eq!(Command::parse("up"), Some(Command::Up(1)));
        assert_eq!(Command::parse("down 3"), Some(Command::Down(3)));
        assert_eq!(Command::parse("p a + b"), Some(Command::Print("a + b".to_string())));
        assert_eq!(Command::parse("quit"), Some(Command::Quit));
    }

    #[test]
    fn test_parse_rejects_incomplete() {
        assert_eq!(Command::parse(""), None);
        assert_eq!(Command::parse("break"), None);
        assert_eq!(Command::parse("thread"), None);
        assert_eq!(Command::parse("up 0"), None);
        assert_eq!(Command::parse("print"), None);
        assert_eq!(Command::parse("dump this"), None);
    }

    #[test]
    fn test_advances_execution() {
        for input in ["cont", "step", "next", "step up", "suspend"] {
            assert!(Command::parse(input).unwrap().advances_execution(), "{}", input);
        }
        for input in ["threads", "where", "locals", "resume", "up", "print x", "b Main:3"] {
            assert!(!Command::parse(input).unwrap().advances_execution(), "{}", input);
        }
    }

    #[test]
    fn test_render_jdb_text() {
        assert_eq!(Command::Continue.to_string(), "cont");
        assert_eq!(Command::Finish.to_string(), "step up");
        assert_eq!(Command::Backtrace.to_string(), "where");
        assert_eq!(Command::Quit.to_string(), "exit");
        assert_eq!(
            Command::parse("b com.example.Main:12").unwrap().to_string(),
            "stop at com.example.Main:12"
        );
        assert_eq!(
            Command::parse("clear com.example.Main.main").unwrap().to_string(),
            "clear com.example.Main.main"
        );
    }
}
