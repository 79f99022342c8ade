//! デバッガブリッジのメインロジック

use crate::command::Command;
use crate::config::BridgeConfig;
use crate::dispatch;
use crate::errors::BridgeError;
use crate::parse::{parse_frames, parse_locals, parse_threads, LocalVariable, StackFrame, ThreadEntry};
use crate::reader;
use crate::session::{Session, SessionState};
use crate::Result;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use tracing::{debug, info, warn};
use tsunagi_target::{DebuggerProcess, Target};

/// 生の出力行と診断メッセージの受け口
///
/// 読み取りスレッドから呼ばれるため、重い処理をしてはいけません。
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

/// jdbを子プロセスとして駆動するブリッジ
///
/// 公開操作はどれもエラーを返さず、失敗はログにだけ現れます。
/// `request` の結果は専用の配送スレッドから、送信した順にコールバックへ渡されます。
pub struct DebugBridge {
    config: BridgeConfig,
    sink: LogSink,
    /// 現在のセッション
    current: Mutex<Option<Arc<Session>>>,
}

impl DebugBridge {
    /// 新しいブリッジを作成する
    pub fn new<F>(config: BridgeConfig, sink: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self {
            config,
            sink: Arc::new(sink),
            current: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<Session>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn session(&self) -> Option<Arc<Session>> {
        self.slot().clone()
    }

    fn diagnostic(&self, message: &str) {
        (self.sink)(&format!("{} {}", self.config.log_prefix, message));
    }

    /// デバッガを起動して接続する
    ///
    /// 生きているセッションがある間は何もしません。
    /// 起動に失敗した場合はログに記録し、セッションは `Terminated` になります。
    pub fn connect(&self, target: &Target) {
        let session = {
            let mut slot = self.slot();
            if let Some(existing) = slot.as_ref() {
                let state = existing.state();
                if state.is_live() {
                    debug!("connect to {} ignored: session is {:?}", target, state);
                    return;
                }
            }
            let session = Arc::new(Session::new(self.config.stop_grace));
            *slot = Some(Arc::clone(&session));
            session
        };

        match self.start_session(&session, target) {
            Ok(()) => {
                info!("connected to {}", target);
                self.diagnostic(&format!("connected to {}", target));
            }
            Err(e) => {
                session.abort();
                let error = BridgeError::ConnectionFailure(format!("{:#}", e));
                warn!("connect to {} failed: {}", target, error);
                self.diagnostic(&error.to_string());
            }
        }
    }

    fn start_session(&self, session: &Arc<Session>, target: &Target) -> Result<()> {
        let (program, args) = self.config.command_line(target);
        debug!("starting {:?} {:?}", program, args);
        let (process, output) = DebuggerProcess::spawn(&program, &args)?;

        if !session.attach(process) {
            anyhow::bail!("session stopped while connecting");
        }

        let (tx, rx) = mpsc::channel();
        dispatch::spawn(rx)?;

        let reader_session = Arc::clone(session);
        let sink = Arc::clone(&self.sink);
        let prefix = self.config.log_prefix.clone();
        thread::Builder::new()
            .name("jdb-session".to_string())
            .spawn(move || {
                if let Err(e) = reader::read_loop(output, &reader_session.pending, &sink, tx) {
                    warn!("reading debugger output failed: {}", e);
                }
                if let Some(dropped) = reader_session.abort() {
                    info!("debugger output closed");
                    report_termination(&sink, &prefix, "session ended", dropped);
                }
            })?;

        Ok(())
    }

    /// セッションが準備完了か
    pub fn is_ready(&self) -> bool {
        self.session().map(|s| s.is_ready()).unwrap_or(false)
    }

    /// 現在のセッションの状態
    pub fn state(&self) -> SessionState {
        self.session()
            .map(|s| s.state())
            .unwrap_or(SessionState::Disconnected)
    }

    /// デバッガのプロセスID
    pub fn pid(&self) -> Option<u32> {
        self.session().and_then(|s| s.pid())
    }

    /// コマンドを送信する（結果は待たない）
    pub fn send(&self, command: &str) {
        let result = match self.session() {
            Some(session) => session.send(command),
            None => Err(BridgeError::NotConnected),
        };
        match result {
            Ok(()) => debug!("sent {:?}", command),
            Err(BridgeError::WriteFailure(e)) => {
                warn!("writing {:?} failed: {}", command, e);
                self.diagnostic(&BridgeError::WriteFailure(e).to_string());
            }
            Err(_) => {
                debug!("send {:?} while not ready", command);
                self.diagnostic(&BridgeError::NotConnected.to_string());
            }
        }
    }

    /// コマンドを送信し、出力ブロックをコールバックで受け取る
    ///
    /// コールバックは高々1回、配送スレッドから呼ばれます。
    /// 準備完了でなければ何もしません。セッションが先に終了した場合、
    /// コールバックは呼ばれずに破棄されます。
    pub fn request<F>(&self, command: &str, on_result: F)
    where
        F: FnOnce(Vec<String>) + Send + 'static,
    {
        let Some(session) = self.session() else {
            debug!("request {:?} ignored: no session", command);
            return;
        };
        match session.request(command, Box::new(on_result)) {
            Ok(()) => debug!("requested {:?}", command),
            Err(BridgeError::WriteFailure(e)) => {
                warn!("writing {:?} failed: {}", command, e);
                self.diagnostic(&BridgeError::WriteFailure(e).to_string());
            }
            Err(e) => debug!("request {:?} ignored: {}", command, e),
        }
    }

    /// `threads` を送り、スレッド一覧を受け取る
    pub fn request_threads<F>(&self, on_result: F)
    where
        F: FnOnce(Vec<ThreadEntry>) + Send + 'static,
    {
        self.request(&Command::Threads.to_string(), move |lines| {
            on_result(parse_threads(&lines))
        });
    }

    /// `where` を送り、スタックフレームを受け取る
    pub fn request_frames<F>(&self, on_result: F)
    where
        F: FnOnce(Vec<StackFrame>) + Send + 'static,
    {
        self.request(&Command::Backtrace.to_string(), move |lines| {
            on_result(parse_frames(&lines))
        });
    }

    /// `locals` を送り、ローカル変数を受け取る
    pub fn request_locals<F>(&self, on_result: F)
    where
        F: FnOnce(Vec<LocalVariable>) + Send + 'static,
    {
        self.request(&Command::Locals.to_string(), move |lines| {
            on_result(parse_locals(&lines))
        });
    }

    /// セッションを終了する
    ///
    /// 終了コマンドを送って入力を閉じ、応答待ちのコールバックは呼ばずに破棄します。
    /// プロセスが猶予内に終わらなければ、バックグラウンドで強制終了されます。
    /// 何度呼んでも安全です。
    pub fn stop(&self) {
        let Some(session) = self.session() else {
            return;
        };
        if let Some(dropped) = session.shutdown(&self.config.exit_command) {
            info!("debugger stopped");
            report_termination(&self.sink, &self.config.log_prefix, "stopped", dropped);
        }
    }
}

/// ブリッジを破棄するときは、デバッガが回収されるまで待つ
impl Drop for DebugBridge {
    fn drop(&mut self) {
        self.stop();
        if let Some(session) = self.session() {
            session.wait_reaped();
        }
    }
}

fn report_termination(sink: &LogSink, prefix: &str, reason: &str, dropped: usize) {
    if dropped == 0 {
        sink(&format!("{} {}", prefix, reason));
        return;
    }
    warn!("{} pending request(s) dropped without result", dropped);
    sink(&format!(
        "{} {}; {} pending request(s) dropped",
        prefix, reason, dropped
    ));
}
