//! ブレークポイント管理

use crate::bridge::DebugBridge;
use std::collections::BTreeMap;
use std::fmt;

/// ブレークポイントID
pub type BreakpointId = usize;

/// ブレークポイントの位置
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BreakpointLocation {
    /// `Class:line`
    Line { class: String, line: u32 },
    /// `Class.method`
    Method { class: String, method: String },
}

impl BreakpointLocation {
    /// `com.example.Main:12` または `com.example.Main.main` をパースする
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.is_empty() || input.contains(char::is_whitespace) {
            return None;
        }

        if let Some((class, line)) = input.rsplit_once(':') {
            let line: u32 = line.parse().ok().filter(|&l| l > 0)?;
            if class.is_empty() {
                return None;
            }
            return Some(BreakpointLocation::Line {
                class: class.to_string(),
                line,
            });
        }

        let (class, method) = input.rsplit_once('.')?;
        if class.is_empty() || method.is_empty() {
            return None;
        }
        Some(BreakpointLocation::Method {
            class: class.to_string(),
            method: method.to_string(),
        })
    }

    /// 設定コマンド
    pub fn set_command(&self) -> String {
        match self {
            BreakpointLocation::Line { .. } => format!("stop at {}", self),
            BreakpointLocation::Method { .. } => format!("stop in {}", self),
        }
    }

    /// 解除コマンド
    pub fn clear_command(&self) -> String {
        format!("clear {}", self)
    }
}

impl fmt::Display for BreakpointLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakpointLocation::Line { class, line } => write!(f, "{}:{}", class, line),
            BreakpointLocation::Method { class, method } => write!(f, "{}.{}", class, method),
        }
    }
}

/// ブレークポイント
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    pub id: BreakpointId,
    pub location: BreakpointLocation,
}

/// ブレークポイントマネージャ
///
/// ユーザーが設定したブレークポイントを覚えておき、
/// 新しいセッションが準備完了になったときにまとめて設定し直します。
pub struct BreakpointManager {
    breakpoints: BTreeMap<BreakpointId, Breakpoint>,
    next_id: BreakpointId,
}

impl BreakpointManager {
    /// 新しいブレークポイントマネージャを作成する
    pub fn new() -> Self {
        Self {
            breakpoints: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// ブレークポイントを追加する
    ///
    /// 同じ位置が登録済みならそのIDを返します。
    pub fn add(&mut self, location: BreakpointLocation) -> BreakpointId {
        if let Some(existing) = self.find(&location) {
            return existing.id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.breakpoints.insert(id, Breakpoint { id, location });
        id
    }

    /// ブレークポイントを削除する
    pub fn remove(&mut self, id: BreakpointId) -> Option<Breakpoint> {
        self.breakpoints.remove(&id)
    }

    /// 位置からブレークポイントを探す
    pub fn find(&self, location: &BreakpointLocation) -> Option<&Breakpoint> {
        self.breakpoints.values().find(|bp| &bp.location == location)
    }

    /// 全てのブレークポイントをID順に取得する
    pub fn all(&self) -> impl Iterator<Item = &Breakpoint> {
        self.breakpoints.values()
    }

    /// ブレークポイントの数を取得する
    pub fn count(&self) -> usize {
        self.breakpoints.len()
    }

    /// 全てのブレークポイントをセッションに設定する
    ///
    /// 準備完了でなければ何も送らずに0を返します。
    pub fn apply_all(&self, bridge: &DebugBridge) -> usize {
        if !bridge.is_ready() {
            return 0;
        }
        for bp in self.all() {
            bridge.send(&bp.location.set_command());
        }
        self.count()
    }
}

impl Default for BreakpointManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_locations() {
        assert_eq!(
            BreakpointLocation::parse("com.example.Main:12"),
            Some(BreakpointLocation::Line {
                class: "com.example.Main".to_string(),
                line: 12,
            })
        );
        assert_eq!(
            BreakpointLocation::parse("com.example.Main.main"),
            Some(BreakpointLocation::Method {
                class: "com.example.Main".to_string(),
                method: "main".to_string(),
            })
        );
        assert_eq!(BreakpointLocation::parse("Main"), None);
        assert_eq!(BreakpointLocation::parse("Main:0"), None);
        assert_eq!(BreakpointLocation::parse(":3"), None);
        assert_eq!(BreakpointLocation::parse("Main."), None);
        assert_eq!(BreakpointLocation::parse("a b.c"), None);
    }

    #[test]
    fn test_commands() {
        let line = BreakpointLocation::parse("Main:7").unwrap();
        assert_eq!(line.set_command(), "stop at Main:7");
        assert_eq!(line.clear_command(), "clear Main:7");
        let method = BreakpointLocation::parse("pkg.Main.run").unwrap();
        assert_eq!(method.set_command(), "stop in pkg.Main.run");
    }

    #[test]
    fn test_manager_ids_and_dedup() {
        let mut manager = BreakpointManager::new();
        let a = manager.add(BreakpointLocation::parse("Main:7").unwrap());
        let b = manager.add(BreakpointLocation::parse("Main.main").unwrap());
        let again = manager.add(BreakpointLocation::parse("Main:7").unwrap());
        assert_eq!((a, b, again), (1, 2, 1));
        assert_eq!(manager.count(), 2);

        assert!(manager.remove(a).is_some());
        assert!(manager.find(&BreakpointLocation::parse("Main:7").unwrap()).is_none());
        let c = manager.add(BreakpointLocation::parse("Main:9").unwrap());
        assert_eq!(c, 3);
        let ids: Vec<_> = manager.all().map(|bp| bp.id).collect();
        assert_eq!(ids, vec![2, 3]);
    }
}
