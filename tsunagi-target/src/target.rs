//! デバッグ対象の記述

use std::ffi::OsString;
use std::fmt;

/// JDWPエージェントのデフォルトポート
pub const DEFAULT_JDWP_PORT: u16 = 5005;

/// デバッガの接続先
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// JDWPエージェント付きで起動済みのVMにソケットでアタッチする
    Attach {
        host: String,
        port: u16,
    },
    /// デバッガ自身にメインクラスを起動させる
    Launch {
        main_class: String,
        classpath: Option<String>,
        args: Vec<String>,
    },
}

impl Target {
    /// ソケットアタッチの接続先を作成する
    pub fn attach(host: impl Into<String>, port: u16) -> Self {
        Target::Attach {
            host: host.into(),
            port,
        }
    }

    /// `localhost:5005` へのアタッチ
    pub fn local_default() -> Self {
        Self::attach("localhost", DEFAULT_JDWP_PORT)
    }

    /// メインクラスを起動する接続先を作成する
    pub fn launch(main_class: impl Into<String>) -> Self {
        Target::Launch {
            main_class: main_class.into(),
            classpath: None,
            args: Vec::new(),
        }
    }

    /// デバッガに渡すコマンドライン引数を組み立てる
    ///
    /// # Examples
    /// ```
    /// use tsunagi_target::Target;
    ///
    /// let args = Target::attach("localhost", 5005).debugger_args();
    /// assert_eq!(args[0], "-connect");
    /// assert_eq!(args[1], "com.sun.jdi.SocketAttach:hostname=localhost,port=5005");
    /// ```
    pub fn debugger_args(&self) -> Vec<OsString> {
        match self {
            Target::Attach { host, port } => vec![
                OsString::from("-connect"),
                OsString::from(format!(
                    "com.sun.jdi.SocketAttach:hostname={},port={}",
                    host, port
                )),
            ],
            Target::Launch {
                main_class,
                classpath,
                args,
            } => {
                let mut out = Vec::with_capacity(args.len() + 3);
                if let Some(cp) = classpath {
                    out.push(OsString::from("-classpath"));
                    out.push(OsString::from(cp));
                }
                out.push(OsString::from(main_class));
                out.extend(args.iter().map(OsString::from));
                out
            }
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Attach { host, port } => write!(f, "{}:{}", host, port),
            Target::Launch { main_class, .. } => write!(f, "launch {}", main_class),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_args_with_classpath() {
        let target = Target::Launch {
            main_class: "com.example.Main".to_string(),
            classpath: Some("build/classes".to_string()),
            args: vec!["--verbose".to_string()],
        };
        let args: Vec<String> = target
            .debugger_args()
            .into_iter()
            .map(|a| a.into_string().unwrap())
            .collect();
        assert_eq!(
            args,
            vec!["-classpath", "build/classes", "com.example.Main", "--verbose"]
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Target::local_default().to_string(), "localhost:5005");
        assert_eq!(Target::launch("Main").to_string(), "launch Main");
    }
}
