//! jdbの出力をパースする関数群
//!
//! jdbのテキスト出力には決まった文法がないため、各パーサは行単位の
//! パターンマッチだけを行います。マッチしない行は黙って読み飛ばし、
//! 1行が壊れていても残りの行のパースは妨げません。

use regex::Regex;
use std::sync::OnceLock;

/// `threads` の1行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadEntry {
    /// スレッドID（例: `0x1`）
    pub id: String,
    /// スレッド名
    pub name: String,
    /// ID以降の行全体（名前と状態）
    pub raw_line: String,
}

/// `where` の1フレーム
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub index: u32,
    pub description: String,
}

/// `locals` の1変数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable {
    pub name: String,
    /// 値のテキスト（解釈はしない）
    pub value: String,
}

fn thread_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // 例: (java.lang.Thread)0x1 main running
    PATTERN.get_or_init(|| Regex::new(r"^\(([^)]+)\)(\S+)\s+(.*)$").expect("valid thread pattern"))
}

fn frame_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // 例: [1] com.example.Main.main (Main.java:10)
    PATTERN.get_or_init(|| Regex::new(r"^\[(\d+)\]\s+(.*)$").expect("valid frame pattern"))
}

fn local_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // 例: i = 10
    PATTERN.get_or_init(|| {
        Regex::new(r"^([A-Za-z_$][A-Za-z0-9_$]*)\s*=\s*(.*)$").expect("valid local pattern")
    })
}

/// スレッド一覧をパースする
///
/// # Examples
/// ```
/// use tsunagi_core::parse::parse_threads;
///
/// let threads = parse_threads(&["  (java.lang.Thread)0x1 main running".to_string()]);
/// assert_eq!(threads[0].id, "0x1");
/// assert_eq!(threads[0].name, "main");
/// ```
pub fn parse_threads<S: AsRef<str>>(lines: &[S]) -> Vec<ThreadEntry> {
    lines
        .iter()
        .filter_map(|line| {
            let caps = thread_pattern().captures(line.as_ref().trim())?;
            let rest = caps[3].to_string();
            let name = rest.split_whitespace().next()?.to_string();
            Some(ThreadEntry {
                id: caps[2].to_string(),
                name,
                raw_line: rest,
            })
        })
        .collect()
}

/// スタックフレーム一覧をパースする
pub fn parse_frames<S: AsRef<str>>(lines: &[S]) -> Vec<StackFrame> {
    lines
        .iter()
        .filter_map(|line| {
            let caps = frame_pattern().captures(line.as_ref().trim())?;
            // 桁あふれするインデックスは壊れた行として扱う
            let index = caps[1].parse().ok()?;
            Some(StackFrame {
                index,
                description: caps[2].to_string(),
            })
        })
        .collect()
}

/// ローカル変数一覧をパースする
pub fn parse_locals<S: AsRef<str>>(lines: &[S]) -> Vec<LocalVariable> {
    lines
        .iter()
        .filter_map(|line| {
            let caps = local_pattern().captures(line.as_ref().trim())?;
            Some(LocalVariable {
                name: caps[1].to_string(),
                value: caps[2].to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_threads() {
        let lines = [
            "Group system:",
            "  (java.lang.ref.Reference$ReferenceHandler)0x15a Reference Handler   running",
            "Group main:",
            "  (java.lang.Thread)0x1 main running",
            "garbage line",
        ];
        let threads = parse_threads(&lines);
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].id, "0x15a");
        assert_eq!(threads[0].name, "Reference");
        assert_eq!(threads[1].id, "0x1");
        assert_eq!(threads[1].name, "main");
        assert_eq!(threads[1].raw_line, "main running");
    }

    #[test]
    fn test_parse_threads_any_kind() {
        let threads = parse_threads(&["(kind)0x1 main running"]);
        assert_eq!(
            threads,
            vec![ThreadEntry {
                id: "0x1".to_string(),
                name: "main".to_string(),
                raw_line: "main running".to_string(),
            }]
        );
    }

    #[test]
    fn test_parse_frames() {
        let lines = [
            "  [1] pkg.Class.method (File:10)",
            "  [2] pkg.Class.main (File:4)",
            "[x] not a frame",
            "[99999999999] overflow",
        ];
        let frames = parse_frames(&lines);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].index, 1);
        assert_eq!(frames[0].description, "pkg.Class.method (File:10)");
        assert_eq!(frames[1].index, 2);
    }

    #[test]
    fn test_parse_locals_spacing() {
        let spaced = parse_locals(&["i = 10"]);
        let tight = parse_locals(&["i=10"]);
        let expected = vec![LocalVariable {
            name: "i".to_string(),
            value: "10".to_string(),
        }];
        assert_eq!(spaced, expected);
        assert_eq!(tight, expected);
    }

    #[test]
    fn test_parse_locals_skips_headers() {
        let lines = [
            "Method arguments:",
            "args = instance of java.lang.String[0] (id=1)",
            "Local variables:",
            "$tmp_1 = \"hello = world\"",
            "1abc = 3",
        ];
        let locals = parse_locals(&lines);
        assert_eq!(locals.len(), 2);
        assert_eq!(locals[0].name, "args");
        assert_eq!(locals[0].value, "instance of java.lang.String[0] (id=1)");
        assert_eq!(locals[1].name, "$tmp_1");
        assert_eq!(locals[1].value, "\"hello = world\"");
    }
}
